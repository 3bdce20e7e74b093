//! Data models
//!
//! Plain records for the entities the mention pipelines persist.
//! All models use ULID for IDs and chrono for timestamps; the records
//! know nothing about HTTP or HTML.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// ID Types
// =============================================================================

/// Entity ID wrapper (ULID format, 26 characters)
///
/// Example: "01ARZ3NDEKTSV4RRFFQ69G5FAV"
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    /// Generate a new ULID
    pub fn new() -> Self {
        Self(ulid::Ulid::new().to_string())
    }

    /// Create from existing string
    pub fn from_string(s: String) -> Self {
        Self(s)
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Post type
// =============================================================================

/// The kind of interaction a mention represents, detected from the
/// microformat classes on the source page. Absent means a plain mention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostType {
    Reply,
    Like,
    Repost,
    Bookmark,
    Listen,
    Translation,
    Watch,
}

impl PostType {
    /// Detection precedence: the first class found in this order wins.
    pub const ALL: [PostType; 7] = [
        Self::Reply,
        Self::Like,
        Self::Repost,
        Self::Bookmark,
        Self::Listen,
        Self::Translation,
        Self::Watch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reply => "reply",
            Self::Like => "like",
            Self::Repost => "repost",
            Self::Bookmark => "bookmark",
            Self::Listen => "listen",
            Self::Translation => "translation",
            Self::Watch => "watch",
        }
    }

    /// The microformats-2 property class announcing this post type.
    pub fn mf2_class(&self) -> &'static str {
        match self {
            Self::Reply => "u-in-reply-to",
            Self::Like => "u-like-of",
            Self::Repost => "u-repost-of",
            Self::Bookmark => "u-bookmark-of",
            Self::Listen => "u-listen-of",
            Self::Translation => "u-translation-of",
            Self::Watch => "u-watch-of",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.as_str() == s)
    }
}

// =============================================================================
// Retry state
// =============================================================================

/// Retry bookkeeping shared by every record that represents deferrable work.
///
/// Invariants (enforced by the record/advance methods):
/// - `is_retry_successful` implies `!is_awaiting_retry`
/// - `retry_attempt_count >= max_retries` implies `!is_awaiting_retry`
#[derive(Debug, Clone, Default, Serialize, Deserialize, sqlx::FromRow)]
pub struct RetryState {
    pub retry_attempt_count: i64,
    pub last_retry_attempt: Option<DateTime<Utc>>,
    pub is_awaiting_retry: bool,
    pub is_retry_successful: bool,
}

impl RetryState {
    /// Fresh state for a new unit of work.
    pub fn reset() -> Self {
        Self::default()
    }

    /// Whether a retry may run now.
    pub fn can_retry(&self, now: DateTime<Utc>, max_retries: u32, interval: chrono::Duration) -> bool {
        self.is_awaiting_retry
            && !self.is_retry_successful
            && self.retry_attempt_count < max_retries as i64
            && match self.last_retry_attempt {
                None => true,
                Some(last) => now - last >= interval,
            }
    }

    /// Record a failed attempt. Keeps awaiting further retries until the
    /// attempt budget is exhausted.
    pub fn record_failure(&mut self, now: DateTime<Utc>, max_retries: u32) {
        self.retry_attempt_count += 1;
        self.last_retry_attempt = Some(now);
        self.is_awaiting_retry = self.retry_attempt_count < max_retries as i64;
        self.is_retry_successful = false;
    }

    /// Record a successful attempt; the work is finished.
    pub fn record_success(&mut self, now: DateTime<Utc>) {
        self.retry_attempt_count += 1;
        self.last_retry_attempt = Some(now);
        self.is_awaiting_retry = false;
        self.is_retry_successful = true;
    }
}

// =============================================================================
// Mention
// =============================================================================

/// An accepted incoming webmention
///
/// `validated` reflects the most recent fetch of the source: true iff the
/// source HTML contained a link to `target_url` at that time. `approved`
/// is the separate moderation/publication flag and is never overwritten
/// by re-verification.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Mention {
    pub id: String,
    /// The remote page claiming to link to us (absolute http(s) URL)
    pub source_url: String,
    /// Our URL being mentioned (absolute http(s) URL)
    pub target_url: String,
    /// Origin of the HTTP POST that delivered this notification
    pub sent_by: String,
    /// Reference to the resolved local object ("model_name/object_id"),
    /// or NULL for URL-addressed mentions
    pub target_object: Option<String>,
    /// Reference to the actor's HCard
    pub hcard_id: Option<String>,
    /// Interaction kind: reply, like, repost, bookmark, listen,
    /// translation, watch; NULL for a plain mention
    pub post_type: Option<String>,
    /// Short excerpt from the source page
    pub quote: Option<String>,
    pub validated: bool,
    pub approved: bool,
    pub has_been_read: bool,
    /// Append-only audit log, capped at `notes::MAX_NOTES_LEN`
    pub notes: String,
    pub published: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// HCard
// =============================================================================

/// The actor behind a mention, extracted from the source's microformats.
///
/// At least one of {name, homepage, avatar} is non-empty. The pair
/// (homepage, name) is effectively unique: two cards may share a homepage
/// iff their names differ, and vice versa. An absent homepage is stored
/// as NULL so the uniqueness constraint does not collide on empty strings.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct HCard {
    pub id: String,
    pub name: Option<String>,
    pub avatar: Option<String>,
    pub homepage: Option<String>,
    /// Raw microformat properties as a JSON blob
    pub json: String,
    pub created_at: DateTime<Utc>,
}

impl HCard {
    /// A card with none of the identifying fields is useless to us.
    pub fn has_required_fields(&self) -> bool {
        let filled = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        filled(&self.name) || filled(&self.homepage) || filled(&self.avatar)
    }
}

// =============================================================================
// Outgoing status
// =============================================================================

/// Per source→target record of an outbound submission attempt.
///
/// (source_url, target_url) is logically unique; legacy stores may hold
/// duplicates, which the repository tolerates by updating the oldest row.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OutgoingStatus {
    pub id: String,
    /// Local path the mention originates from (e.g. "/article/1/")
    pub source_url: String,
    /// Remote URL we are notifying
    pub target_url: String,
    /// Discovered webmention endpoint; NULL only when discovery found none
    pub target_endpoint: Option<String>,
    pub successful: bool,
    /// Human-readable outcome, bounded
    pub status_message: Option<String>,
    /// Last HTTP status seen (POST, or GET if discovery never got further)
    pub response_code: Option<i64>,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub retry: RetryState,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Pending work
// =============================================================================

/// Deferred incoming verification, unique on (source_url, target_url).
///
/// Created when no worker is in use or a transient fetch failure occurred;
/// deleted once a Mention has been written or retries are exhausted.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PendingIncoming {
    pub id: String,
    pub source_url: String,
    pub target_url: String,
    pub sent_by: String,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub retry: RetryState,
    pub created_at: DateTime<Utc>,
}

/// Deferred outgoing scan, unique on absolute_url.
///
/// No retry counter: a scan restarts fresh and produces OutgoingStatus
/// rows that carry the retry state from then on.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PendingOutgoing {
    pub id: String,
    pub absolute_url: String,
    /// The HTML to scan for outbound links
    pub text: String,
    pub created_at: DateTime<Utc>,
}

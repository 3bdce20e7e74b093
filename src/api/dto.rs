//! Response shapes for the read API
//!
//! Only validated AND approved mentions are ever rendered through
//! these; moderation and retry state stays internal.

use serde::Serialize;

use crate::data::{HCard, Mention, PostType};

/// Every type key the grouped endpoint enumerates. "webmention" is a
/// plain mention with no detected interaction class; "simple" is kept
/// for consumers of older payloads and is never produced here.
pub const MENTION_TYPE_KEYS: [&str; 9] = [
    "webmention",
    "reply",
    "like",
    "repost",
    "bookmark",
    "listen",
    "translation",
    "watch",
    "simple",
];

#[derive(Debug, Clone, Serialize)]
pub struct HCardDto {
    pub name: Option<String>,
    pub avatar: Option<String>,
    pub homepage: Option<String>,
}

/// One mention as rendered to consumers.
#[derive(Debug, Clone, Serialize)]
pub struct MentionDto {
    pub hcard: Option<HCardDto>,
    pub quote: Option<String>,
    pub source_url: String,
    pub published: chrono::DateTime<chrono::Utc>,
    #[serde(rename = "type")]
    pub mention_type: String,
}

impl MentionDto {
    pub fn from_mention(mention: &Mention, hcard: Option<&HCard>) -> Self {
        let mention_type = mention
            .post_type
            .as_deref()
            .and_then(PostType::parse)
            .map(|t| t.as_str().to_string())
            .unwrap_or_else(|| "webmention".to_string());

        Self {
            hcard: hcard.map(|card| HCardDto {
                name: card.name.clone(),
                avatar: card.avatar.clone(),
                homepage: card.homepage.clone(),
            }),
            quote: mention.quote.clone(),
            source_url: mention.source_url.clone(),
            published: mention.published,
            mention_type,
        }
    }
}

/// `GET /get` payload.
#[derive(Debug, Serialize)]
pub struct MentionsResponse {
    pub target_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub mentions: Vec<MentionDto>,
}

/// `GET /get-by-type` payload; every key of [`MENTION_TYPE_KEYS`] is
/// present, empty list when nothing matched.
#[derive(Debug, Serialize)]
pub struct MentionsByTypeResponse {
    pub target_url: String,
    pub mentions_by_type: std::collections::BTreeMap<String, Vec<MentionDto>>,
}

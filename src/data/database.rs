//! SQLite database operations
//!
//! All database access goes through this module. The method set on
//! [`Database`] is the repository surface the mention pipelines depend on;
//! each operation is atomic per row.

use chrono::Utc;
use sqlx::{Pool, QueryBuilder, Row, Sqlite, SqlitePool};
use std::path::Path;

use super::models::*;
use crate::error::AppError;

/// Columns callers may filter mentions by (reverify selection).
/// Anything else is rejected before it reaches SQL.
const MENTION_FILTER_COLUMNS: [&str; 7] = [
    "id",
    "source_url",
    "target_url",
    "validated",
    "approved",
    "has_been_read",
    "post_type",
];

/// Database connection pool wrapper.
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    /// Connect to the SQLite database, creating it if necessary.
    ///
    /// # Errors
    /// Returns error if connection or migration fails
    pub async fn connect(path: &Path) -> Result<Self, AppError> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AppError::Database(sqlx::Error::Io(e)))?;
        }

        let connection_string = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePool::connect(&connection_string).await?;

        sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;

        // Run migrations
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| {
                tracing::error!("Migration failed: {}", e);
                AppError::Internal(anyhow::anyhow!("Migration failed: {}", e))
            })?;

        tracing::info!("Database connected and migrated successfully");

        Ok(Self { pool })
    }

    /// Raw pool access for tests that need to seed legacy data shapes.
    #[cfg(test)]
    pub(crate) fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    // =========================================================================
    // Mentions
    // =========================================================================

    /// Get the mention for a (source_url, target_url) pair, if any.
    pub async fn get_mention_by_pair(
        &self,
        source_url: &str,
        target_url: &str,
    ) -> Result<Option<Mention>, AppError> {
        let mention = sqlx::query_as::<_, Mention>(
            "SELECT * FROM mentions WHERE source_url = ? AND target_url = ?",
        )
        .bind(source_url)
        .bind(target_url)
        .fetch_optional(&self.pool)
        .await?;

        Ok(mention)
    }

    pub async fn get_mention(&self, id: &str) -> Result<Option<Mention>, AppError> {
        let mention = sqlx::query_as::<_, Mention>("SELECT * FROM mentions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(mention)
    }

    /// Insert or update a mention, idempotent on (source_url, target_url).
    ///
    /// On conflict the verification columns are refreshed; `approved`,
    /// `has_been_read`, `published` and `created_at` keep their stored
    /// values (moderation state is never overwritten by reprocessing).
    pub async fn upsert_mention(&self, mention: &Mention) -> Result<Mention, AppError> {
        sqlx::query(
            r#"
            INSERT INTO mentions (
                id, source_url, target_url, sent_by, target_object, hcard_id,
                post_type, quote, validated, approved, has_been_read, notes,
                published, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (source_url, target_url) DO UPDATE SET
                sent_by = excluded.sent_by,
                target_object = excluded.target_object,
                hcard_id = excluded.hcard_id,
                post_type = excluded.post_type,
                quote = excluded.quote,
                validated = excluded.validated,
                notes = excluded.notes
            "#,
        )
        .bind(&mention.id)
        .bind(&mention.source_url)
        .bind(&mention.target_url)
        .bind(&mention.sent_by)
        .bind(&mention.target_object)
        .bind(&mention.hcard_id)
        .bind(&mention.post_type)
        .bind(&mention.quote)
        .bind(mention.validated)
        .bind(mention.approved)
        .bind(mention.has_been_read)
        .bind(&mention.notes)
        .bind(mention.published)
        .bind(mention.created_at)
        .execute(&self.pool)
        .await?;

        // Return the authoritative row (the stored id wins over a fresh one)
        self.get_mention_by_pair(&mention.source_url, &mention.target_url)
            .await?
            .ok_or(AppError::NotFound)
    }

    /// Update the mutable columns of an existing mention by id.
    ///
    /// Used by reverify, which decides itself which values changed;
    /// `approved` and `created_at` are deliberately not touched.
    pub async fn update_mention(&self, mention: &Mention) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE mentions SET
                sent_by = ?, target_object = ?, hcard_id = ?, post_type = ?,
                quote = ?, validated = ?, has_been_read = ?, notes = ?
            WHERE id = ?
            "#,
        )
        .bind(&mention.sent_by)
        .bind(&mention.target_object)
        .bind(&mention.hcard_id)
        .bind(&mention.post_type)
        .bind(&mention.quote)
        .bind(mention.validated)
        .bind(mention.has_been_read)
        .bind(&mention.notes)
        .bind(&mention.id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Publicly visible mentions for any of the given target URLs
    /// (validated AND approved only), newest first.
    pub async fn get_public_mentions_for_urls(
        &self,
        target_urls: &[String],
    ) -> Result<Vec<Mention>, AppError> {
        if target_urls.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT * FROM mentions WHERE validated = 1 AND approved = 1 AND target_url IN (",
        );
        let mut separated = builder.separated(", ");
        for url in target_urls {
            separated.push_bind(url);
        }
        separated.push_unseparated(") ORDER BY published DESC");

        let mentions = builder
            .build_query_as::<Mention>()
            .fetch_all(&self.pool)
            .await?;

        Ok(mentions)
    }

    /// Whether any mention row (regardless of moderation state) exists
    /// for one of the given target URLs.
    pub async fn any_mentions_for_urls(&self, target_urls: &[String]) -> Result<bool, AppError> {
        if target_urls.is_empty() {
            return Ok(false);
        }

        let mut builder =
            QueryBuilder::<Sqlite>::new("SELECT COUNT(*) AS n FROM mentions WHERE target_url IN (");
        let mut separated = builder.separated(", ");
        for url in target_urls {
            separated.push_bind(url);
        }
        separated.push_unseparated(")");

        let row = builder.build().fetch_one(&self.pool).await?;
        let count: i64 = row.try_get("n")?;
        Ok(count > 0)
    }

    /// Select mentions by column/value filters (reverify selection).
    ///
    /// An empty filter set selects all mentions. Unknown columns are a
    /// validation error, not SQL.
    pub async fn find_mentions(
        &self,
        filters: &[(String, String)],
    ) -> Result<Vec<Mention>, AppError> {
        for (column, _) in filters {
            if !MENTION_FILTER_COLUMNS.contains(&column.as_str()) {
                return Err(AppError::Validation(format!(
                    "Unknown mention filter column '{}'",
                    column
                )));
            }
        }

        let mut builder = QueryBuilder::<Sqlite>::new("SELECT * FROM mentions WHERE 1 = 1");
        for (column, value) in filters {
            builder.push(format!(" AND {} = ", column));
            builder.push_bind(value);
        }
        builder.push(" ORDER BY created_at ASC");

        let mentions = builder
            .build_query_as::<Mention>()
            .fetch_all(&self.pool)
            .await?;

        Ok(mentions)
    }

    /// Cascade used when a local target entity is deleted.
    pub async fn delete_mentions_for_object(&self, target_object: &str) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM mentions WHERE target_object = ?")
            .bind(target_object)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    pub async fn count_mentions(&self) -> Result<i64, AppError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM mentions")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }

    // =========================================================================
    // HCards
    // =========================================================================

    pub async fn get_hcard(&self, id: &str) -> Result<Option<HCard>, AppError> {
        let hcard = sqlx::query_as::<_, HCard>("SELECT * FROM hcards WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(hcard)
    }

    /// Update-or-create an h-card with match precedence
    /// homepage > name > avatar.
    ///
    /// When a homepage is present the (homepage, name) pair is the match
    /// key, so two actors sharing a homepage but carrying different names
    /// stay distinct. Empty strings are normalized to NULL before storage.
    pub async fn upsert_hcard(&self, card: &HCard) -> Result<HCard, AppError> {
        let normalize = |v: &Option<String>| -> Option<String> {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        let name = normalize(&card.name);
        let homepage = normalize(&card.homepage);
        let avatar = normalize(&card.avatar);

        if name.is_none() && homepage.is_none() && avatar.is_none() {
            return Err(AppError::NotEnoughData(
                "h-card has no name, homepage or avatar".to_string(),
            ));
        }

        let existing: Option<HCard> = if homepage.is_some() {
            sqlx::query_as::<_, HCard>("SELECT * FROM hcards WHERE homepage IS ? AND name IS ?")
                .bind(&homepage)
                .bind(&name)
                .fetch_optional(&self.pool)
                .await?
        } else if name.is_some() {
            sqlx::query_as::<_, HCard>("SELECT * FROM hcards WHERE name IS ? AND homepage IS NULL")
                .bind(&name)
                .fetch_optional(&self.pool)
                .await?
        } else {
            sqlx::query_as::<_, HCard>(
                "SELECT * FROM hcards WHERE avatar IS ? AND homepage IS NULL AND name IS NULL",
            )
            .bind(&avatar)
            .fetch_optional(&self.pool)
            .await?
        };

        match existing {
            Some(mut stored) => {
                stored.avatar = avatar.or(stored.avatar);
                stored.json = card.json.clone();
                sqlx::query("UPDATE hcards SET avatar = ?, json = ? WHERE id = ?")
                    .bind(&stored.avatar)
                    .bind(&stored.json)
                    .bind(&stored.id)
                    .execute(&self.pool)
                    .await?;
                Ok(stored)
            }
            None => {
                let fresh = HCard {
                    id: EntityId::new().0,
                    name,
                    avatar,
                    homepage,
                    json: card.json.clone(),
                    created_at: Utc::now(),
                };
                sqlx::query(
                    "INSERT INTO hcards (id, name, avatar, homepage, json, created_at) \
                     VALUES (?, ?, ?, ?, ?, ?)",
                )
                .bind(&fresh.id)
                .bind(&fresh.name)
                .bind(&fresh.avatar)
                .bind(&fresh.homepage)
                .bind(&fresh.json)
                .bind(fresh.created_at)
                .execute(&self.pool)
                .await?;
                Ok(fresh)
            }
        }
    }

    // =========================================================================
    // Outgoing statuses
    // =========================================================================

    /// Get-or-create the status row for a (source_url, target_url) pair
    /// with its retry state reset for a fresh scan.
    ///
    /// Pre-existing duplicate rows are tolerated: the oldest by created_at
    /// is chosen and updated, the rest are left untouched.
    pub async fn prepare_outgoing_status(
        &self,
        source_url: &str,
        target_url: &str,
    ) -> Result<OutgoingStatus, AppError> {
        let existing = sqlx::query_as::<_, OutgoingStatus>(
            "SELECT * FROM outgoing_statuses WHERE source_url = ? AND target_url = ? \
             ORDER BY created_at ASC LIMIT 1",
        )
        .bind(source_url)
        .bind(target_url)
        .fetch_optional(&self.pool)
        .await?;

        match existing {
            Some(mut status) => {
                status.retry = RetryState::reset();
                status.successful = false;
                status.status_message = None;
                status.response_code = None;
                self.update_outgoing_status(&status).await?;
                Ok(status)
            }
            None => {
                let status = OutgoingStatus {
                    id: EntityId::new().0,
                    source_url: source_url.to_string(),
                    target_url: target_url.to_string(),
                    target_endpoint: None,
                    successful: false,
                    status_message: None,
                    response_code: None,
                    retry: RetryState::reset(),
                    created_at: Utc::now(),
                };
                sqlx::query(
                    r#"
                    INSERT INTO outgoing_statuses (
                        id, source_url, target_url, target_endpoint, successful,
                        status_message, response_code, retry_attempt_count,
                        last_retry_attempt, is_awaiting_retry, is_retry_successful,
                        created_at
                    )
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&status.id)
                .bind(&status.source_url)
                .bind(&status.target_url)
                .bind(&status.target_endpoint)
                .bind(status.successful)
                .bind(&status.status_message)
                .bind(status.response_code)
                .bind(status.retry.retry_attempt_count)
                .bind(status.retry.last_retry_attempt)
                .bind(status.retry.is_awaiting_retry)
                .bind(status.retry.is_retry_successful)
                .bind(status.created_at)
                .execute(&self.pool)
                .await?;
                Ok(status)
            }
        }
    }

    /// Write the outcome + retry columns of a status row in one statement.
    pub async fn update_outgoing_status(&self, status: &OutgoingStatus) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE outgoing_statuses SET
                target_endpoint = ?, successful = ?, status_message = ?,
                response_code = ?, retry_attempt_count = ?, last_retry_attempt = ?,
                is_awaiting_retry = ?, is_retry_successful = ?
            WHERE id = ?
            "#,
        )
        .bind(&status.target_endpoint)
        .bind(status.successful)
        .bind(&status.status_message)
        .bind(status.response_code)
        .bind(status.retry.retry_attempt_count)
        .bind(status.retry.last_retry_attempt)
        .bind(status.retry.is_awaiting_retry)
        .bind(status.retry.is_retry_successful)
        .bind(&status.id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_outgoing_statuses(
        &self,
        source_url: &str,
    ) -> Result<Vec<OutgoingStatus>, AppError> {
        let statuses = sqlx::query_as::<_, OutgoingStatus>(
            "SELECT * FROM outgoing_statuses WHERE source_url = ? ORDER BY created_at ASC",
        )
        .bind(source_url)
        .fetch_all(&self.pool)
        .await?;

        Ok(statuses)
    }

    /// Status rows still awaiting a retry (the drain pass filters further
    /// by interval and attempt budget via `RetryState::can_retry`).
    pub async fn get_awaiting_outgoing_statuses(&self) -> Result<Vec<OutgoingStatus>, AppError> {
        let statuses = sqlx::query_as::<_, OutgoingStatus>(
            "SELECT * FROM outgoing_statuses \
             WHERE is_awaiting_retry = 1 AND is_retry_successful = 0 \
             ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(statuses)
    }

    // =========================================================================
    // Pending incoming
    // =========================================================================

    /// Get-or-create the deferred-verification row for a pair.
    pub async fn upsert_pending_incoming(
        &self,
        source_url: &str,
        target_url: &str,
        sent_by: &str,
    ) -> Result<PendingIncoming, AppError> {
        sqlx::query(
            r#"
            INSERT INTO pending_incoming (
                id, source_url, target_url, sent_by, retry_attempt_count,
                last_retry_attempt, is_awaiting_retry, is_retry_successful,
                created_at
            )
            VALUES (?, ?, ?, ?, 0, NULL, 1, 0, ?)
            ON CONFLICT (source_url, target_url) DO UPDATE SET
                sent_by = excluded.sent_by
            "#,
        )
        .bind(EntityId::new().0)
        .bind(source_url)
        .bind(target_url)
        .bind(sent_by)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        let pending = sqlx::query_as::<_, PendingIncoming>(
            "SELECT * FROM pending_incoming WHERE source_url = ? AND target_url = ?",
        )
        .bind(source_url)
        .bind(target_url)
        .fetch_one(&self.pool)
        .await?;

        Ok(pending)
    }

    pub async fn update_pending_incoming(
        &self,
        pending: &PendingIncoming,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE pending_incoming SET
                retry_attempt_count = ?, last_retry_attempt = ?,
                is_awaiting_retry = ?, is_retry_successful = ?
            WHERE id = ?
            "#,
        )
        .bind(pending.retry.retry_attempt_count)
        .bind(pending.retry.last_retry_attempt)
        .bind(pending.retry.is_awaiting_retry)
        .bind(pending.retry.is_retry_successful)
        .bind(&pending.id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn delete_pending_incoming(
        &self,
        source_url: &str,
        target_url: &str,
    ) -> Result<(), AppError> {
        sqlx::query("DELETE FROM pending_incoming WHERE source_url = ? AND target_url = ?")
            .bind(source_url)
            .bind(target_url)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn list_pending_incoming(&self) -> Result<Vec<PendingIncoming>, AppError> {
        let rows = sqlx::query_as::<_, PendingIncoming>(
            "SELECT * FROM pending_incoming ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn count_pending_incoming(&self) -> Result<i64, AppError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM pending_incoming")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }

    // =========================================================================
    // Pending outgoing
    // =========================================================================

    /// Store a deferred outgoing scan; a newer text for the same URL
    /// replaces the stored one.
    pub async fn upsert_pending_outgoing(
        &self,
        absolute_url: &str,
        text: &str,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO pending_outgoing (id, absolute_url, text, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (absolute_url) DO UPDATE SET text = excluded.text
            "#,
        )
        .bind(EntityId::new().0)
        .bind(absolute_url)
        .bind(text)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn delete_pending_outgoing(&self, absolute_url: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM pending_outgoing WHERE absolute_url = ?")
            .bind(absolute_url)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn list_pending_outgoing(&self) -> Result<Vec<PendingOutgoing>, AppError> {
        let rows = sqlx::query_as::<_, PendingOutgoing>(
            "SELECT * FROM pending_outgoing ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn count_pending_outgoing(&self) -> Result<i64, AppError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM pending_outgoing")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }
}

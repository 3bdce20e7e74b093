//! Incoming mention verification
//!
//! Drives one `(source_url, target_url, sent_by)` triple through the
//! verification state machine: policy checks, target resolution, source
//! fetch, link verification, metadata extraction, persistence. Every
//! failure mode is translated into persisted state (notes, pending
//! rows) rather than propagated; callers only see hard internal errors.

use std::sync::Arc;

use chrono::Utc;
use url::Url;

use super::fetch::Fetcher;
use super::links;
use super::microformats::{self, HCardData};
use super::notes::append_note;
use crate::config::AppConfig;
use crate::data::{Database, EntityId, HCard, Mention};
use crate::error::AppError;
use crate::metrics::MENTIONS_VERIFIED_TOTAL;
use crate::resolver::UrlResolver;

/// What became of one processing run.
#[derive(Debug)]
pub enum ProcessOutcome {
    /// A Mention row was written (validated or not)
    Stored(Mention),
    /// Transient source failure; a PendingIncoming row awaits retry
    Deferred,
    /// Policy or resolution rejected the mention; nothing stored
    Dropped(String),
}

enum TargetResolution {
    Object(String),
    UrlAddressed,
    Drop(String),
}

/// The incoming verification pipeline.
pub struct IncomingProcessor {
    config: Arc<AppConfig>,
    db: Arc<Database>,
    fetcher: Fetcher,
    resolver: Arc<UrlResolver>,
}

impl IncomingProcessor {
    pub fn new(
        config: Arc<AppConfig>,
        db: Arc<Database>,
        fetcher: Fetcher,
        resolver: Arc<UrlResolver>,
    ) -> Self {
        Self {
            config,
            db,
            fetcher,
            resolver,
        }
    }

    /// Verify and record one incoming mention.
    ///
    /// Idempotent on (source_url, target_url): reprocessing updates the
    /// stored row. `approved` and the moderation state are never
    /// overwritten here.
    ///
    /// # Errors
    /// Only database and internal failures; protocol-level rejections
    /// come back as `ProcessOutcome::Dropped`.
    pub async fn process(
        &self,
        source_url: &str,
        target_url: &str,
        sent_by: &str,
    ) -> Result<ProcessOutcome, AppError> {
        // 1. Target must live on our domain
        let target = match Url::parse(target_url) {
            Ok(url) => url,
            Err(_) => return Ok(self.reject(source_url, target_url, "target is not a valid URL")),
        };
        let our_domain = &self.config.server.domain;
        if !target
            .host_str()
            .is_some_and(|h| h.eq_ignore_ascii_case(our_domain))
        {
            return Ok(self.reject(source_url, target_url, "target is not on our domain"));
        }

        // 2. Source host policy, evaluated before any network fetch
        let source = match Url::parse(source_url) {
            Ok(url) => url,
            Err(_) => return Ok(self.reject(source_url, target_url, "source is not a valid URL")),
        };
        let Some(source_host) = source.host_str().map(str::to_ascii_lowercase) else {
            return Ok(self.reject(source_url, target_url, "source has no host"));
        };
        if source_host.eq_ignore_ascii_case(our_domain)
            && !self.config.webmention.allow_self_mentions
        {
            return Ok(self.reject(source_url, target_url, "self-mentions are disabled"));
        }
        if !self.config.webmention.accepts_incoming_host(&source_host) {
            return Ok(self.reject(source_url, target_url, "source host rejected by domain policy"));
        }

        // 3. Attach the local object the target URL renders
        let target_object = match self.resolve_target(&target) {
            TargetResolution::Object(object_ref) => Some(object_ref),
            TargetResolution::UrlAddressed => None,
            TargetResolution::Drop(reason) => {
                return Ok(self.reject(source_url, target_url, &reason));
            }
        };

        let existing = self.db.get_mention_by_pair(source_url, target_url).await?;

        // 4. Fetch the source page
        let page = match self.fetcher.get_html(source_url).await {
            Ok(page) => page,
            Err(e) if e.is_transient() => {
                return self.defer(source_url, target_url, sent_by, existing).await;
            }
            Err(e) => {
                // Permanent failure (e.g. 404): no retry ladder
                let note = format!("{}; not retrying", e);
                return self
                    .store_unverifiable(
                        source_url,
                        target_url,
                        sent_by,
                        existing,
                        target_object,
                        &note,
                    )
                    .await;
            }
        };

        // 5. Verify the claimed link and extract metadata
        let linked = links::html_links_to(&page.body, &page.url, target_url);

        let prior_notes = existing.as_ref().map(|m| m.notes.clone()).unwrap_or_default();
        let now = Utc::now();

        let mention = if linked {
            let metadata = microformats::extract_metadata(&page.body, target_url, page.url.as_str());
            let hcard_id = self.store_hcard(metadata.hcard.as_ref()).await?;
            let notes = append_note(
                &prior_notes,
                "INFO",
                &format!("Source verified: contains a link to '{}'", target_url),
            );

            Mention {
                id: existing
                    .as_ref()
                    .map(|m| m.id.clone())
                    .unwrap_or_else(|| EntityId::new().0),
                source_url: source_url.to_string(),
                target_url: target_url.to_string(),
                sent_by: sent_by.to_string(),
                target_object,
                hcard_id,
                post_type: metadata.post_type.map(|t| t.as_str().to_string()),
                quote: metadata.quote,
                validated: true,
                approved: existing
                    .as_ref()
                    .map(|m| m.approved)
                    .unwrap_or(self.config.webmention.auto_approve),
                has_been_read: existing.as_ref().map(|m| m.has_been_read).unwrap_or(false),
                notes,
                published: existing.as_ref().map(|m| m.published).unwrap_or(now),
                created_at: existing.as_ref().map(|m| m.created_at).unwrap_or(now),
            }
        } else {
            let notes = append_note(
                &prior_notes,
                "WARN",
                &format!("Source does not contain a link to '{}'", target_url),
            );

            Mention {
                id: existing
                    .as_ref()
                    .map(|m| m.id.clone())
                    .unwrap_or_else(|| EntityId::new().0),
                source_url: source_url.to_string(),
                target_url: target_url.to_string(),
                sent_by: sent_by.to_string(),
                target_object,
                hcard_id: existing.as_ref().and_then(|m| m.hcard_id.clone()),
                post_type: existing.as_ref().and_then(|m| m.post_type.clone()),
                quote: existing.as_ref().and_then(|m| m.quote.clone()),
                validated: false,
                approved: existing
                    .as_ref()
                    .map(|m| m.approved)
                    .unwrap_or(self.config.webmention.auto_approve),
                has_been_read: existing.as_ref().map(|m| m.has_been_read).unwrap_or(false),
                notes,
                published: existing.as_ref().map(|m| m.published).unwrap_or(now),
                created_at: existing.as_ref().map(|m| m.created_at).unwrap_or(now),
            }
        };

        let stored = self.db.upsert_mention(&mention).await?;
        self.db.delete_pending_incoming(source_url, target_url).await?;

        MENTIONS_VERIFIED_TOTAL
            .with_label_values(&[if stored.validated { "validated" } else { "unvalidated" }])
            .inc();
        tracing::info!(
            source = %source_url,
            target = %target_url,
            validated = stored.validated,
            "Incoming mention stored"
        );

        Ok(ProcessOutcome::Stored(stored))
    }

    /// Re-run fetch + verification over an existing mention, writing
    /// only the columns whose value changed and noting which.
    pub async fn reverify(&self, mention: &Mention) -> Result<Mention, AppError> {
        let mut updated = mention.clone();

        let page = match self.fetcher.get_html(&mention.source_url).await {
            Ok(page) => page,
            Err(e) if e.is_transient() => {
                updated.notes = append_note(
                    &updated.notes,
                    "WARN",
                    &format!("Reverification failed: source '{}' not accessible", mention.source_url),
                );
                self.db.update_mention(&updated).await?;
                return Ok(updated);
            }
            Err(e) => {
                updated.validated = false;
                updated.notes = append_note(
                    &updated.notes,
                    "ERROR",
                    &format!("Reverification failed permanently: {}", e),
                );
                self.db.update_mention(&updated).await?;
                return Ok(updated);
            }
        };

        let linked = links::html_links_to(&page.body, &page.url, &mention.target_url);
        let mut changed: Vec<&str> = Vec::new();

        if linked != mention.validated {
            updated.validated = linked;
            changed.push("validated");
        }

        if linked {
            let metadata = microformats::extract_metadata(
                &page.body,
                &mention.target_url,
                page.url.as_str(),
            );
            let hcard_id = self.store_hcard(metadata.hcard.as_ref()).await?;
            let post_type = metadata.post_type.map(|t| t.as_str().to_string());

            if hcard_id.is_some() && hcard_id != mention.hcard_id {
                updated.hcard_id = hcard_id;
                changed.push("hcard");
            }
            if post_type != mention.post_type {
                updated.post_type = post_type;
                changed.push("post_type");
            }
            if metadata.quote.is_some() && metadata.quote != mention.quote {
                updated.quote = metadata.quote;
                changed.push("quote");
            }
        }

        if changed.is_empty() {
            return Ok(updated);
        }

        updated.notes = append_note(
            &updated.notes,
            "INFO",
            &format!("Updated fields: {}", changed.join(", ")),
        );
        self.db.update_mention(&updated).await?;

        tracing::info!(
            source = %mention.source_url,
            target = %mention.target_url,
            fields = ?changed,
            "Mention reverified"
        );

        Ok(updated)
    }

    fn resolve_target(&self, target: &Url) -> TargetResolution {
        match self.resolver.resolve(target.path()) {
            Ok(entity) => {
                if !entity.should_process_webmentions() {
                    return TargetResolution::Drop(
                        "target object does not accept webmentions".to_string(),
                    );
                }
                TargetResolution::Object(entity.object_ref())
            }
            Err(
                AppError::TargetDoesNotExist(_)
                | AppError::NoModelForUrlPath(_)
                | AppError::OptionalDependency(_),
            ) => {
                if self.config.webmention.incoming_target_model_required {
                    TargetResolution::Drop("target does not resolve to a local object".to_string())
                } else {
                    TargetResolution::UrlAddressed
                }
            }
            Err(AppError::BadUrlConfig(message)) => {
                tracing::error!(target = %target, error = %message, "URL route misconfigured");
                TargetResolution::Drop(format!("bad URL configuration: {}", message))
            }
            Err(e) => {
                tracing::error!(target = %target, error = %e, "Target resolution failed");
                TargetResolution::Drop(e.to_string())
            }
        }
    }

    /// Transient source failure: keep (or create) the pending row and
    /// advance its retry state. When the attempt budget runs out, store
    /// an unvalidated mention so the failure is visible, and give up.
    async fn defer(
        &self,
        source_url: &str,
        target_url: &str,
        sent_by: &str,
        existing: Option<Mention>,
    ) -> Result<ProcessOutcome, AppError> {
        let now = Utc::now();
        let max_retries = self.config.webmention.max_retries;

        let mut pending = self
            .db
            .upsert_pending_incoming(source_url, target_url, sent_by)
            .await?;
        pending.retry.record_failure(now, max_retries);

        if pending.retry.is_awaiting_retry {
            self.db.update_pending_incoming(&pending).await?;
            MENTIONS_VERIFIED_TOTAL.with_label_values(&["deferred"]).inc();
            tracing::info!(
                source = %source_url,
                target = %target_url,
                attempt = pending.retry.retry_attempt_count,
                "Source not accessible, awaiting retry"
            );
            return Ok(ProcessOutcome::Deferred);
        }

        // Retries exhausted
        let target_object = existing.as_ref().and_then(|m| m.target_object.clone());
        let note = format!(
            "Source '{}' could not be fetched; giving up after {} attempts",
            source_url, pending.retry.retry_attempt_count
        );
        self.store_unverifiable(source_url, target_url, sent_by, existing, target_object, &note)
            .await
    }

    /// The source cannot be verified and never will be on this path:
    /// drop any pending row and store an unvalidated mention carrying an
    /// ERROR note, so the failure is visible as state.
    async fn store_unverifiable(
        &self,
        source_url: &str,
        target_url: &str,
        sent_by: &str,
        existing: Option<Mention>,
        target_object: Option<String>,
        note: &str,
    ) -> Result<ProcessOutcome, AppError> {
        self.db.delete_pending_incoming(source_url, target_url).await?;

        let now = Utc::now();
        let prior_notes = existing.as_ref().map(|m| m.notes.clone()).unwrap_or_default();
        let notes = append_note(&prior_notes, "ERROR", note);

        let mention = Mention {
            id: existing
                .as_ref()
                .map(|m| m.id.clone())
                .unwrap_or_else(|| EntityId::new().0),
            source_url: source_url.to_string(),
            target_url: target_url.to_string(),
            sent_by: sent_by.to_string(),
            target_object,
            hcard_id: existing.as_ref().and_then(|m| m.hcard_id.clone()),
            post_type: existing.as_ref().and_then(|m| m.post_type.clone()),
            quote: existing.as_ref().and_then(|m| m.quote.clone()),
            validated: false,
            approved: existing
                .as_ref()
                .map(|m| m.approved)
                .unwrap_or(self.config.webmention.auto_approve),
            has_been_read: existing.as_ref().map(|m| m.has_been_read).unwrap_or(false),
            notes,
            published: existing.as_ref().map(|m| m.published).unwrap_or(now),
            created_at: existing.as_ref().map(|m| m.created_at).unwrap_or(now),
        };
        let stored = self.db.upsert_mention(&mention).await?;

        MENTIONS_VERIFIED_TOTAL.with_label_values(&["unvalidated"]).inc();
        tracing::warn!(
            source = %source_url,
            target = %target_url,
            note = %note,
            "Stored unvalidated mention"
        );

        Ok(ProcessOutcome::Stored(stored))
    }

    async fn store_hcard(&self, data: Option<&HCardData>) -> Result<Option<String>, AppError> {
        let Some(data) = data else {
            return Ok(None);
        };

        let card = HCard {
            id: EntityId::new().0,
            name: data.name.clone(),
            avatar: data.avatar.clone(),
            homepage: data.homepage.clone(),
            json: data.to_json(),
            created_at: Utc::now(),
        };

        match self.db.upsert_hcard(&card).await {
            Ok(stored) => Ok(Some(stored.id)),
            Err(AppError::NotEnoughData(reason)) => {
                tracing::debug!(reason = %reason, "Skipping h-card");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn reject(&self, source_url: &str, target_url: &str, reason: &str) -> ProcessOutcome {
        MENTIONS_VERIFIED_TOTAL.with_label_values(&["dropped"]).inc();
        tracing::info!(
            source = %source_url,
            target = %target_url,
            reason = %reason,
            "Incoming mention dropped"
        );
        ProcessOutcome::Dropped(reason.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::valid_config;
    use crate::resolver::{Mentionable, MentionableModel, ParamMapping};
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn test_db() -> (TempDir, Arc<Database>) {
        let dir = TempDir::new().expect("temp dir");
        let db = Database::connect(&dir.path().join("test.db"))
            .await
            .expect("connect");
        (dir, Arc::new(db))
    }

    fn processor(db: Arc<Database>, config: AppConfig) -> IncomingProcessor {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .user_agent("rustmention/test")
            .build()
            .expect("client");
        IncomingProcessor::new(
            Arc::new(config),
            db,
            Fetcher::new(Arc::new(client)),
            Arc::new(UrlResolver::new("id")),
        )
    }

    struct Page {
        id: String,
        open: bool,
    }

    impl Mentionable for Page {
        fn absolute_url(&self) -> String {
            format!("https://us.org/a/{}/", self.id)
        }

        fn content_html(&self) -> String {
            String::new()
        }

        fn should_process_webmentions(&self) -> bool {
            self.open
        }

        fn object_ref(&self) -> String {
            format!("blog.Page/{}", self.id)
        }
    }

    /// Page 1 accepts mentions, page 2 refuses them, nothing else exists.
    struct PageModel;

    impl MentionableModel for PageModel {
        fn name(&self) -> &str {
            "blog.Page"
        }

        fn resolve_from_url_kwargs(
            &self,
            kwargs: &[(String, String)],
        ) -> Result<Option<Arc<dyn Mentionable>>, AppError> {
            let id = kwargs.iter().find(|(f, _)| f == "id").map(|(_, v)| v.as_str());
            Ok(match id {
                Some("1") => Some(Arc::new(Page {
                    id: "1".to_string(),
                    open: true,
                })),
                Some("2") => Some(Arc::new(Page {
                    id: "2".to_string(),
                    open: false,
                })),
                _ => None,
            })
        }
    }

    /// A processor whose resolver routes /a/<id>/ to PageModel.
    fn routed_processor(db: Arc<Database>, config: AppConfig) -> IncomingProcessor {
        let mut resolver = UrlResolver::new("id");
        resolver.register_model(Arc::new(PageModel));
        resolver
            .add_route(
                r"/a/(?P<id>\d+)/",
                Some("blog.Page".to_string()),
                ParamMapping::Identity,
            )
            .expect("route");

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .user_agent("rustmention/test")
            .build()
            .expect("client");
        IncomingProcessor::new(
            Arc::new(config),
            db,
            Fetcher::new(Arc::new(client)),
            Arc::new(resolver),
        )
    }

    fn html_page(body: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_raw(body.to_string(), "text/html")
    }

    const TARGET: &str = "https://us.org/a/1/";

    #[tokio::test]
    async fn valid_mention_is_stored_with_hcard() {
        let server = MockServer::start().await;
        let html = format!(
            r#"
            <div class="h-card">
                <span class="p-name">Jane</span>
                <a class="u-url" href="https://janebloggs.org">home</a>
            </div>
            <p>I liked <a href="{TARGET}">this post</a>.</p>
            "#
        );
        Mock::given(method("GET"))
            .and(path("/post/42"))
            .respond_with(html_page(&html))
            .mount(&server)
            .await;

        let (_dir, db) = test_db().await;
        let p = processor(db.clone(), valid_config());
        let source = format!("{}/post/42", server.uri());

        let outcome = p.process(&source, TARGET, "1.2.3.4").await.unwrap();
        let ProcessOutcome::Stored(mention) = outcome else {
            panic!("expected stored mention");
        };

        assert!(mention.validated);
        assert!(!mention.approved);
        assert!(mention.hcard_id.is_some());
        let card = db
            .get_hcard(mention.hcard_id.as_deref().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(card.name.as_deref(), Some("Jane"));
        assert_eq!(db.count_pending_incoming().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn resolved_target_is_attached_to_its_object() {
        let server = MockServer::start().await;
        let html = format!(r#"<a href="{TARGET}">post</a>"#);
        Mock::given(method("GET"))
            .respond_with(html_page(&html))
            .mount(&server)
            .await;

        let (_dir, db) = test_db().await;
        let p = routed_processor(db.clone(), valid_config());
        let source = format!("{}/post/42", server.uri());

        let ProcessOutcome::Stored(mention) = p.process(&source, TARGET, "1.2.3.4").await.unwrap()
        else {
            panic!("expected stored mention");
        };
        assert!(mention.validated);
        assert_eq!(mention.target_object.as_deref(), Some("blog.Page/1"));
    }

    #[tokio::test]
    async fn target_refusing_webmentions_is_dropped_before_fetch() {
        let (_dir, db) = test_db().await;
        let p = routed_processor(db.clone(), valid_config());

        // peer.org is never fetched; the drop happens at resolution
        let outcome = p
            .process("https://peer.org/post/42", "https://us.org/a/2/", "1.2.3.4")
            .await
            .unwrap();
        assert!(matches!(outcome, ProcessOutcome::Dropped(_)));
        assert_eq!(db.count_mentions().await.unwrap(), 0);
        assert_eq!(db.count_pending_incoming().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unresolved_target_is_dropped_when_model_required() {
        let mut config = valid_config();
        config.webmention.incoming_target_model_required = true;

        let (_dir, db) = test_db().await;
        let p = routed_processor(db.clone(), config);

        let outcome = p
            .process("https://peer.org/post/42", "https://us.org/a/999/", "1.2.3.4")
            .await
            .unwrap();
        assert!(matches!(outcome, ProcessOutcome::Dropped(_)));
        assert_eq!(db.count_mentions().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn source_without_link_stores_unvalidated_mention() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/post/42"))
            .respond_with(html_page("<p>No links here.</p>"))
            .mount(&server)
            .await;

        let (_dir, db) = test_db().await;
        let p = processor(db.clone(), valid_config());
        let source = format!("{}/post/42", server.uri());

        let outcome = p.process(&source, TARGET, "1.2.3.4").await.unwrap();
        let ProcessOutcome::Stored(mention) = outcome else {
            panic!("expected stored mention");
        };

        assert!(!mention.validated);
        assert!(mention
            .notes
            .contains(&format!("Source does not contain a link to '{}'", TARGET)));
    }

    #[tokio::test]
    async fn server_error_defers_with_one_attempt_recorded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let (_dir, db) = test_db().await;
        let p = processor(db.clone(), valid_config());
        let source = format!("{}/post/42", server.uri());

        let outcome = p.process(&source, TARGET, "1.2.3.4").await.unwrap();
        assert!(matches!(outcome, ProcessOutcome::Deferred));

        let pending = db.list_pending_incoming().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].retry.retry_attempt_count, 1);
        assert!(pending[0].retry.is_awaiting_retry);
        assert_eq!(db.count_mentions().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn gone_source_stores_unvalidated_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let (_dir, db) = test_db().await;
        let p = processor(db.clone(), valid_config());
        let source = format!("{}/post/42", server.uri());

        let outcome = p.process(&source, TARGET, "1.2.3.4").await.unwrap();
        let ProcessOutcome::Stored(mention) = outcome else {
            panic!("expected stored mention");
        };

        assert!(!mention.validated);
        assert!(mention.notes.contains("not retrying"));
        assert_eq!(db.count_pending_incoming().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn non_html_source_is_deferred_as_not_accessible() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("{}", "application/json"))
            .mount(&server)
            .await;

        let (_dir, db) = test_db().await;
        let p = processor(db.clone(), valid_config());
        let source = format!("{}/post/42", server.uri());

        let outcome = p.process(&source, TARGET, "1.2.3.4").await.unwrap();
        assert!(matches!(outcome, ProcessOutcome::Deferred));
        assert_eq!(db.count_pending_incoming().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn foreign_target_domain_is_dropped_without_fetch() {
        let (_dir, db) = test_db().await;
        let p = processor(db.clone(), valid_config());

        let outcome = p
            .process("https://peer.org/post/42", "https://elsewhere.org/a/1/", "1.2.3.4")
            .await
            .unwrap();
        assert!(matches!(outcome, ProcessOutcome::Dropped(_)));
        assert_eq!(db.count_mentions().await.unwrap(), 0);
        assert_eq!(db.count_pending_incoming().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn denied_source_host_is_dropped() {
        let mut config = valid_config();
        config.webmention.domains_incoming_deny =
            vec![crate::config::HostPattern("*.spam.example".to_string())];

        let (_dir, db) = test_db().await;
        let p = processor(db.clone(), config);

        let outcome = p
            .process("https://bad.spam.example/x", TARGET, "1.2.3.4")
            .await
            .unwrap();
        assert!(matches!(outcome, ProcessOutcome::Dropped(_)));
    }

    #[tokio::test]
    async fn reprocessing_keeps_one_row_and_preserves_approval() {
        let server = MockServer::start().await;
        let html = format!(r#"<a href="{TARGET}">link</a>"#);
        Mock::given(method("GET"))
            .respond_with(html_page(&html))
            .mount(&server)
            .await;

        let (_dir, db) = test_db().await;
        let p = processor(db.clone(), valid_config());
        let source = format!("{}/post/42", server.uri());

        let ProcessOutcome::Stored(first) = p.process(&source, TARGET, "1.2.3.4").await.unwrap()
        else {
            panic!("expected stored mention");
        };

        // Moderator approves; reprocessing must not undo it
        sqlx::query("UPDATE mentions SET approved = 1 WHERE id = ?")
            .bind(&first.id)
            .execute(db.pool())
            .await
            .unwrap();

        let ProcessOutcome::Stored(second) = p.process(&source, TARGET, "5.6.7.8").await.unwrap()
        else {
            panic!("expected stored mention");
        };

        assert_eq!(db.count_mentions().await.unwrap(), 1);
        assert_eq!(second.id, first.id);
        assert!(second.approved);
        assert_eq!(second.sent_by, "5.6.7.8");
    }

    #[tokio::test]
    async fn reverify_updates_validated_and_notes_changed_fields() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(html_page("<p>Nothing yet.</p>"))
            .mount(&server)
            .await;

        let (_dir, db) = test_db().await;
        let p = processor(db.clone(), valid_config());
        let source = format!("{}/post/42", server.uri());

        let ProcessOutcome::Stored(mention) = p.process(&source, TARGET, "1.2.3.4").await.unwrap()
        else {
            panic!("expected stored mention");
        };
        assert!(!mention.validated);

        // The source page now links to us
        server.reset().await;
        let html = format!(r#"<a href="{TARGET}">finally</a>"#);
        Mock::given(method("GET"))
            .respond_with(html_page(&html))
            .mount(&server)
            .await;

        let updated = p.reverify(&mention).await.unwrap();
        assert!(updated.validated);
        assert!(updated.notes.contains("Updated fields:"));
        assert!(updated.notes.contains("validated"));

        let stored = db.get_mention(&mention.id).await.unwrap().unwrap();
        assert!(stored.validated);
    }

    #[tokio::test]
    async fn reverify_of_gone_source_marks_unvalidated() {
        let server = MockServer::start().await;
        let html = format!(r#"<a href="{TARGET}">link</a>"#);
        Mock::given(method("GET"))
            .respond_with(html_page(&html))
            .mount(&server)
            .await;

        let (_dir, db) = test_db().await;
        let p = processor(db.clone(), valid_config());
        let source = format!("{}/post/42", server.uri());

        let ProcessOutcome::Stored(mention) = p.process(&source, TARGET, "1.2.3.4").await.unwrap()
        else {
            panic!("expected stored mention");
        };
        assert!(mention.validated);

        // The source page is gone for good
        server.reset().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(410))
            .mount(&server)
            .await;

        let updated = p.reverify(&mention).await.unwrap();
        assert!(!updated.validated);
        assert!(updated.notes.contains("Reverification failed permanently"));

        let stored = db.get_mention(&mention.id).await.unwrap().unwrap();
        assert!(!stored.validated);
    }
}

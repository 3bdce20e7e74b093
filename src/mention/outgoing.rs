//! Outgoing mention submission
//!
//! Scans a page we published for outbound links, discovers each
//! target's webmention endpoint and notifies it, recording a per-target
//! OutgoingStatus row. Statuses carry the retry state; a fresh scan of
//! the same page resets it.

use std::sync::Arc;

use chrono::Utc;
use url::Url;

use super::endpoint::find_webmention_endpoint;
use super::fetch::Fetcher;
use super::links::{find_target_links, LinkFilter};
use crate::config::AppConfig;
use crate::data::{Database, OutgoingStatus};
use crate::error::AppError;
use crate::metrics::OUTGOING_SUBMISSIONS_TOTAL;

/// Outcome of one delivery attempt against one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Target page advertises no webmention endpoint (terminal)
    NoEndpoint,
    /// Target could not be fetched (network error, retryable)
    TargetUnreachable,
    /// Target fetch returned >= 300
    TargetHttpError(u16),
    /// Endpoint POST failed or returned >= 300
    EndpointError(u16),
    /// Endpoint accepted the notification with a 2xx
    Delivered(u16),
}

impl DeliveryOutcome {
    fn is_success(&self) -> bool {
        matches!(self, Self::Delivered(_))
    }

    /// Whether retrying can plausibly change the outcome.
    fn is_transient(&self) -> bool {
        !matches!(self, Self::NoEndpoint | Self::Delivered(_))
    }

    fn metric_label(&self) -> &'static str {
        match self {
            Self::NoEndpoint => "no_endpoint",
            Self::TargetUnreachable => "target_unreachable",
            Self::TargetHttpError(_) => "target_http_error",
            Self::EndpointError(_) => "endpoint_error",
            Self::Delivered(_) => "delivered",
        }
    }
}

struct Delivery {
    outcome: DeliveryOutcome,
    endpoint: Option<String>,
    response_code: Option<i64>,
    message: String,
}

/// The outgoing submission pipeline.
pub struct OutgoingProcessor {
    config: Arc<AppConfig>,
    db: Arc<Database>,
    fetcher: Fetcher,
}

impl OutgoingProcessor {
    pub fn new(config: Arc<AppConfig>, db: Arc<Database>, fetcher: Fetcher) -> Self {
        Self {
            config,
            db,
            fetcher,
        }
    }

    /// Scan `html` (the rendered page at local path `source_path`) and
    /// notify every accepted target, one status row per target.
    ///
    /// Rescanning the same path resets the retry state of its rows; the
    /// target set is recomputed from the HTML each time.
    pub async fn process(
        &self,
        source_path: &str,
        html: &str,
    ) -> Result<Vec<OutgoingStatus>, AppError> {
        let base = Url::parse(&self.config.server.base_url())
            .and_then(|u| u.join(source_path))
            .map_err(|e| AppError::Validation(format!("bad source path '{}': {}", source_path, e)))?;

        let wm = &self.config.webmention;
        let filter = LinkFilter {
            local_host: &self.config.server.domain,
            allow_self_mentions: wm.allow_self_mentions,
            allow: &wm.domains_outgoing_allow,
            deny: &wm.domains_outgoing_deny,
        };
        let targets = find_target_links(html, &base, &filter);

        tracing::info!(
            source = %source_path,
            targets = targets.len(),
            "Scanned page for outbound mentions"
        );

        let mut statuses = Vec::with_capacity(targets.len());
        for target in targets {
            let status = self.db.prepare_outgoing_status(source_path, &target).await?;
            let status = self.attempt(status, base.as_str()).await?;
            statuses.push(status);
        }

        Ok(statuses)
    }

    /// Retry every status row whose retry state permits it.
    pub async fn retry_awaiting(&self) -> Result<usize, AppError> {
        let now = Utc::now();
        let wm = &self.config.webmention;
        let base_url = self.config.server.base_url();

        let mut retried = 0;
        for status in self.db.get_awaiting_outgoing_statuses().await? {
            if !status.retry.can_retry(now, wm.max_retries, wm.retry_interval()) {
                continue;
            }
            let absolute_source = match Url::parse(&base_url).and_then(|u| u.join(&status.source_url)) {
                Ok(url) => url,
                Err(e) => {
                    tracing::warn!(source = %status.source_url, error = %e, "Unresolvable source path");
                    continue;
                }
            };
            self.attempt(status, absolute_source.as_str()).await?;
            retried += 1;
        }

        Ok(retried)
    }

    /// Run one delivery attempt and persist the result atomically with
    /// its retry bookkeeping.
    async fn attempt(
        &self,
        mut status: OutgoingStatus,
        absolute_source: &str,
    ) -> Result<OutgoingStatus, AppError> {
        let delivery = self.deliver(absolute_source, &status.target_url).await;
        let now = Utc::now();

        if let Some(endpoint) = delivery.endpoint {
            status.target_endpoint = Some(endpoint);
        }
        status.successful = delivery.outcome.is_success();
        status.status_message = Some(delivery.message);
        status.response_code = delivery.response_code;

        if status.successful {
            status.retry.record_success(now);
        } else {
            status.retry.record_failure(now, self.config.webmention.max_retries);
            if !delivery.outcome.is_transient() {
                status.retry.is_awaiting_retry = false;
            }
        }

        self.db.update_outgoing_status(&status).await?;

        OUTGOING_SUBMISSIONS_TOTAL
            .with_label_values(&[delivery.outcome.metric_label()])
            .inc();
        tracing::info!(
            source = %status.source_url,
            target = %status.target_url,
            outcome = delivery.outcome.metric_label(),
            code = ?status.response_code,
            "Outgoing mention attempt"
        );

        Ok(status)
    }

    /// Endpoint discovery + notification for a single target.
    async fn deliver(&self, absolute_source: &str, target_url: &str) -> Delivery {
        // 1. Fetch the target to discover its endpoint
        let page = match self.fetcher.get(target_url).await {
            Ok(page) => page,
            Err(e) => {
                return Delivery {
                    outcome: DeliveryOutcome::TargetUnreachable,
                    endpoint: None,
                    response_code: None,
                    message: format!("Target unreachable: {}", e),
                };
            }
        };

        if page.status >= 300 {
            return Delivery {
                outcome: DeliveryOutcome::TargetHttpError(page.status),
                endpoint: None,
                response_code: Some(page.status as i64),
                message: format!("Target returned HTTP {}", page.status),
            };
        }

        let Some(endpoint) = find_webmention_endpoint(&page) else {
            return Delivery {
                outcome: DeliveryOutcome::NoEndpoint,
                endpoint: None,
                response_code: Some(page.status as i64),
                message: "No webmention endpoint advertised".to_string(),
            };
        };

        // 2. Notify the endpoint
        match self
            .fetcher
            .post_webmention(endpoint.as_str(), absolute_source, target_url)
            .await
        {
            Ok(code) if (200..300).contains(&code) => Delivery {
                outcome: DeliveryOutcome::Delivered(code),
                endpoint: Some(endpoint.to_string()),
                response_code: Some(code as i64),
                message: format!("Accepted with HTTP {}", code),
            },
            Ok(code) => Delivery {
                outcome: DeliveryOutcome::EndpointError(code),
                endpoint: Some(endpoint.to_string()),
                response_code: Some(code as i64),
                message: format!("Endpoint returned HTTP {}", code),
            },
            // No POST status to report; keep the discovery GET's
            Err(e) => Delivery {
                outcome: DeliveryOutcome::EndpointError(0),
                endpoint: Some(endpoint.to_string()),
                response_code: Some(page.status as i64),
                message: format!("Endpoint unreachable: {}", e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::valid_config;
    use crate::config::AppConfig;
    use tempfile::TempDir;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn test_db() -> (TempDir, Arc<Database>) {
        let dir = TempDir::new().expect("temp dir");
        let db = Database::connect(&dir.path().join("test.db"))
            .await
            .expect("connect");
        (dir, Arc::new(db))
    }

    fn processor(db: Arc<Database>, config: AppConfig) -> OutgoingProcessor {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .user_agent("rustmention/test")
            .build()
            .expect("client");
        OutgoingProcessor::new(Arc::new(config), db, Fetcher::new(Arc::new(client)))
    }

    /// Mock a peer that advertises its endpoint in the Link header and
    /// accepts POSTed notifications.
    async fn accepting_peer() -> MockServer {
        let server = MockServer::start().await;
        let endpoint = format!("{}/webmention/", server.uri());
        Mock::given(method("GET"))
            .and(path("/post"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Link", format!("<{}>; rel=\"webmention\"", endpoint).as_str())
                    .set_body_raw("<html><body>a post</body></html>", "text/html"),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/webmention/"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn delivers_to_advertised_endpoint() {
        let peer = accepting_peer().await;
        let (_dir, db) = test_db().await;
        let p = processor(db.clone(), valid_config());

        let html = format!(
            r##"
            <a href="{0}/post">peer</a>
            <a href="#anchor">same page</a>
            "##,
            peer.uri()
        );
        let statuses = p.process("/article/1/", &html).await.unwrap();

        assert_eq!(statuses.len(), 1);
        let status = &statuses[0];
        assert!(status.successful);
        assert_eq!(
            status.target_endpoint.as_deref(),
            Some(format!("{}/webmention/", peer.uri()).as_str())
        );
        assert_eq!(status.response_code, Some(200));
        assert!(status.retry.is_retry_successful);
        assert!(!status.retry.is_awaiting_retry);
    }

    #[tokio::test]
    async fn self_mention_targets_are_included_when_allowed() {
        let peer = accepting_peer().await;
        let (_dir, db) = test_db().await;
        let p = processor(db.clone(), valid_config());

        // /relative resolves to our own domain, which is unreachable in
        // tests; its row records a failed attempt but still exists.
        let html = format!(
            r#"<a href="{}/post">peer</a><a href="/relative">self</a>"#,
            peer.uri()
        );
        let statuses = p.process("/article/1/", &html).await.unwrap();
        assert_eq!(statuses.len(), 2);

        let stored = db.get_outgoing_statuses("/article/1/").await.unwrap();
        assert_eq!(stored.len(), 2);
        assert!(stored
            .iter()
            .any(|s| s.target_url == "https://us.org/relative"));
    }

    #[tokio::test]
    async fn no_endpoint_is_terminal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("<html><body>no endpoint</body></html>", "text/html"),
            )
            .mount(&server)
            .await;

        let (_dir, db) = test_db().await;
        let p = processor(db.clone(), valid_config());

        let html = format!(r#"<a href="{}/post">peer</a>"#, server.uri());
        let statuses = p.process("/article/1/", &html).await.unwrap();

        let status = &statuses[0];
        assert!(!status.successful);
        assert!(status.target_endpoint.is_none());
        assert_eq!(status.retry.retry_attempt_count, 1);
        assert!(!status.retry.is_awaiting_retry);
    }

    #[tokio::test]
    async fn unreachable_target_awaits_retry() {
        let server = MockServer::start().await;
        let uri = server.uri();
        drop(server); // port is now closed

        let (_dir, db) = test_db().await;
        let p = processor(db.clone(), valid_config());

        let html = format!(r#"<a href="{}/post">peer</a>"#, uri);
        let statuses = p.process("/article/1/", &html).await.unwrap();

        let status = &statuses[0];
        assert!(!status.successful);
        assert_eq!(status.retry.retry_attempt_count, 1);
        assert!(status.retry.is_awaiting_retry);
    }

    #[tokio::test]
    async fn endpoint_network_failure_keeps_discovery_status() {
        // Bind the peer first so it cannot be assigned the port freed
        // by dropping the dead endpoint server below. The dead server
        // must be unpooled: pooled servers keep listening after drop.
        let peer = MockServer::start().await;

        let dead = MockServer::builder().start().await;
        let endpoint = format!("{}/wm", dead.uri());
        drop(dead); // endpoint port is now closed

        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Link", format!("<{}>; rel=webmention", endpoint).as_str())
                    .set_body_raw("<html></html>", "text/html"),
            )
            .mount(&peer)
            .await;

        let (_dir, db) = test_db().await;
        let p = processor(db.clone(), valid_config());

        let html = format!(r#"<a href="{}/post">peer</a>"#, peer.uri());
        let statuses = p.process("/article/1/", &html).await.unwrap();

        let status = &statuses[0];
        assert!(!status.successful);
        assert_eq!(status.response_code, Some(200));
        assert!(status.retry.is_awaiting_retry);
    }

    #[tokio::test]
    async fn rescan_resets_retry_state_and_keeps_one_row_per_target() {
        let peer = accepting_peer().await;
        let (_dir, db) = test_db().await;
        let p = processor(db.clone(), valid_config());

        let html = format!(r#"<a href="{}/post">peer</a>"#, peer.uri());
        p.process("/article/1/", &html).await.unwrap();
        let second = p.process("/article/1/", &html).await.unwrap();

        assert_eq!(second.len(), 1);
        assert_eq!(second[0].retry.retry_attempt_count, 1);

        let stored = db.get_outgoing_statuses("/article/1/").await.unwrap();
        assert_eq!(stored.len(), 1);
    }

    #[tokio::test]
    async fn notification_body_carries_absolute_source() {
        let server = MockServer::start().await;
        let endpoint = format!("{}/wm", server.uri());
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Link", format!("<{}>; rel=webmention", endpoint).as_str())
                    .set_body_raw("<html></html>", "text/html"),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/wm"))
            .and(body_string_contains("source=https%3A%2F%2Fus.org%2Farticle%2F1%2F"))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let (_dir, db) = test_db().await;
        let p = processor(db.clone(), valid_config());

        let html = format!(r#"<a href="{}/post">peer</a>"#, server.uri());
        let statuses = p.process("/article/1/", &html).await.unwrap();
        assert!(statuses[0].successful);
    }
}

//! Outbound HTTP for the mention pipelines
//!
//! Thin wrapper over the shared reqwest client that maps transport
//! failures to the typed errors the pipelines branch on. Timeout and
//! User-Agent are configured once on the client itself (see AppState).

use std::sync::Arc;

use url::Url;

use crate::error::AppError;

/// A fetched page, carrying everything endpoint discovery and
/// verification need to look at.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// Effective URL after redirects
    pub url: Url,
    pub status: u16,
    pub content_type: Option<String>,
    /// Every `Link` header value, in response order
    pub link_headers: Vec<String>,
    pub body: String,
}

impl FetchedPage {
    pub fn is_html(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.contains("text/html"))
    }
}

/// HTTP client wrapper for the mention pipelines
#[derive(Clone)]
pub struct Fetcher {
    http_client: Arc<reqwest::Client>,
}

impl Fetcher {
    pub fn new(http_client: Arc<reqwest::Client>) -> Self {
        Self { http_client }
    }

    /// GET a URL without judging the response.
    ///
    /// Network errors (including timeout) are surfaced as `HttpClient`;
    /// any HTTP status comes back in the page for the caller to classify.
    pub async fn get(&self, url: &str) -> Result<FetchedPage, AppError> {
        let response = self.http_client.get(url).send().await?;

        let status = response.status().as_u16();
        let effective_url = response.url().clone();
        let content_type = response
            .headers()
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let link_headers = response
            .headers()
            .get_all(http::header::LINK)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::to_string)
            .collect();
        let body = response.text().await.unwrap_or_default();

        Ok(FetchedPage {
            url: effective_url,
            status,
            content_type,
            link_headers,
            body,
        })
    }

    /// GET a source page for verification: requires a 2xx response with
    /// a `text/html` content-type. Every failure mode maps to
    /// `SourceNotAccessible`; 4xx statuses other than 429 are marked
    /// permanent, everything else stays retryable.
    pub async fn get_html(&self, url: &str) -> Result<FetchedPage, AppError> {
        let page = self.get(url).await.map_err(|e| {
            tracing::debug!(source = %url, error = %e, "Source fetch failed");
            AppError::SourceNotAccessible {
                url: url.to_string(),
                transient: true,
            }
        })?;

        if page.status >= 300 {
            tracing::debug!(source = %url, status = page.status, "Source returned non-2xx");
            return Err(AppError::SourceNotAccessible {
                url: url.to_string(),
                // A 4xx (other than 429) will not heal on retry
                transient: page.status >= 500 || page.status == 429,
            });
        }

        if !page.is_html() {
            tracing::debug!(
                source = %url,
                content_type = ?page.content_type,
                "Source is not text/html"
            );
            return Err(AppError::SourceNotAccessible {
                url: url.to_string(),
                transient: true,
            });
        }

        Ok(page)
    }

    /// POST a webmention notification to a discovered endpoint.
    ///
    /// Body is exactly `source=<source>&target=<target>`, form-encoded.
    /// Returns the HTTP status; network errors surface as `HttpClient`.
    pub async fn post_webmention(
        &self,
        endpoint: &str,
        source: &str,
        target: &str,
    ) -> Result<u16, AppError> {
        let response = self
            .http_client
            .post(endpoint)
            .form(&[("source", source), ("target", target)])
            .send()
            .await?;

        Ok(response.status().as_u16())
    }
}

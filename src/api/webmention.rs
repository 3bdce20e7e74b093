//! Public webmention endpoints
//!
//! The protocol surface: receive notifications, serve the manual
//! submission form, and expose stored mentions for rendering. The
//! receiving endpoint acknowledges with 202 before any verification
//! happens; acceptance never implies validation.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Json, Response};
use axum::routing::get;
use axum::{Form, Router};
use serde::Deserialize;
use url::Url;

use super::dto::{MentionDto, MentionsByTypeResponse, MentionsResponse, MENTION_TYPE_KEYS};
use crate::data::Mention;
use crate::error::AppError;
use crate::metrics::MENTIONS_RECEIVED_TOTAL;
use crate::AppState;

/// Routes:
/// - GET  /webmention/     - manual submission form
/// - POST /webmention/     - receive a webmention
/// - GET  /webmention/get  - mentions for a target URL
/// - GET  /webmention/get-by-type - same, grouped by post type
///
/// Full paths (rather than nesting) because the advertised endpoint
/// ends in a trailing slash, which `Router::nest` does not match.
pub fn webmention_router() -> Router<AppState> {
    Router::new()
        .route("/webmention", get(submission_form).post(receive))
        .route("/webmention/", get(submission_form).post(receive))
        .route("/webmention/get", get(get_mentions))
        .route("/webmention/get-by-type", get(get_mentions_by_type))
}

// =============================================================================
// Receiving
// =============================================================================

#[derive(Debug, Deserialize)]
struct ReceiveForm {
    source: Option<String>,
    target: Option<String>,
}

/// POST /
///
/// Accepts `source` and `target` form fields, validates both as
/// absolute http(s) URLs and queues verification. 202 on accept,
/// 400 with an empty body on malformed input.
async fn receive(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Form(form): Form<ReceiveForm>,
) -> Response {
    let (Some(source), Some(target)) = (form.source, form.target) else {
        MENTIONS_RECEIVED_TOTAL.with_label_values(&["rejected"]).inc();
        return StatusCode::BAD_REQUEST.into_response();
    };

    let sent_by = connect_info
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    match state.scheduler.handle_incoming(&source, &target, &sent_by).await {
        Ok(()) => {
            MENTIONS_RECEIVED_TOTAL.with_label_values(&["accepted"]).inc();
            (
                StatusCode::ACCEPTED,
                "Thank you, your webmention has been accepted.",
            )
                .into_response()
        }
        Err(AppError::Validation(reason)) => {
            MENTIONS_RECEIVED_TOTAL.with_label_values(&["rejected"]).inc();
            tracing::debug!(source = %source, target = %target, reason = %reason,
                "Rejected webmention submission");
            StatusCode::BAD_REQUEST.into_response()
        }
        Err(e) => {
            MENTIONS_RECEIVED_TOTAL.with_label_values(&["error"]).inc();
            tracing::error!(error = %e, "Failed to queue incoming webmention");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// GET /
///
/// A minimal HTML form for manual submission.
async fn submission_form() -> Html<&'static str> {
    Html(
        r#"<!DOCTYPE html>
<html>
<head><title>Send a Webmention</title></head>
<body>
<h1>Send a Webmention</h1>
<form action="" method="post">
  <label>Source URL (your page): <input type="url" name="source" required></label><br>
  <label>Target URL (our page): <input type="url" name="target" required></label><br>
  <button type="submit">Send</button>
</form>
</body>
</html>
"#,
    )
}

// =============================================================================
// Reading
// =============================================================================

#[derive(Debug, Deserialize)]
struct GetParams {
    url: Option<String>,
}

struct TargetLookup {
    canonical: String,
    candidates: Vec<String>,
    resolves: bool,
}

/// GET /get?url=…
///
/// 400 when `url` is missing; 404 with an empty list when the URL
/// neither resolves to local content nor has URL-addressed mentions;
/// 200 with the validated+approved mentions otherwise.
async fn get_mentions(
    State(state): State<AppState>,
    Query(params): Query<GetParams>,
) -> Result<Response, AppError> {
    let lookup = resolve_lookup(&state, params.url)?;

    let mentions = state
        .db
        .get_public_mentions_for_urls(&lookup.candidates)
        .await?;

    if !lookup.resolves && mentions.is_empty() {
        let found_any = state.db.any_mentions_for_urls(&lookup.candidates).await?;
        if !found_any {
            let body = MentionsResponse {
                target_url: lookup.canonical,
                message: Some("Target not found".to_string()),
                mentions: Vec::new(),
            };
            return Ok((StatusCode::NOT_FOUND, Json(body)).into_response());
        }
    }

    let dtos = render_mentions(&state, &mentions).await?;
    let body = MentionsResponse {
        target_url: lookup.canonical,
        message: None,
        mentions: dtos,
    };
    Ok(Json(body).into_response())
}

/// GET /get-by-type?url=…
///
/// Same lookup as `/get`, payload grouped by type with every known
/// type key present.
async fn get_mentions_by_type(
    State(state): State<AppState>,
    Query(params): Query<GetParams>,
) -> Result<Response, AppError> {
    let lookup = resolve_lookup(&state, params.url)?;

    let mentions = state
        .db
        .get_public_mentions_for_urls(&lookup.candidates)
        .await?;

    if !lookup.resolves && mentions.is_empty() {
        let found_any = state.db.any_mentions_for_urls(&lookup.candidates).await?;
        if !found_any {
            return Ok((
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({
                    "target_url": lookup.canonical,
                    "message": "Target not found",
                    "mentions_by_type": empty_groups(),
                })),
            )
                .into_response());
        }
    }

    let dtos = render_mentions(&state, &mentions).await?;
    let mut groups = empty_groups();
    for dto in dtos {
        groups
            .entry(dto.mention_type.clone())
            .or_default()
            .push(dto);
    }

    let body = MentionsByTypeResponse {
        target_url: lookup.canonical,
        mentions_by_type: groups,
    };
    Ok(Json(body).into_response())
}

fn empty_groups() -> BTreeMap<String, Vec<MentionDto>> {
    MENTION_TYPE_KEYS
        .iter()
        .map(|key| (key.to_string(), Vec::new()))
        .collect()
}

/// Normalize the `url` parameter (absolute or site-relative) into the
/// canonical absolute form plus the candidate strings mentions may be
/// stored under, and check whether it resolves to local content.
fn resolve_lookup(state: &AppState, raw: Option<String>) -> Result<TargetLookup, AppError> {
    let raw = raw
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| AppError::Validation("missing 'url' parameter".to_string()))?;

    let absolute = match Url::parse(&raw) {
        Ok(url) => url,
        Err(_) => Url::parse(&state.config.server.base_url())
            .and_then(|base| base.join(&raw))
            .map_err(|_| AppError::Validation(format!("'{}' is not a usable URL", raw)))?,
    };

    let mut candidates = vec![absolute.to_string()];
    if raw != absolute.as_str() {
        candidates.push(raw);
    }

    let resolves = state.resolver.resolve(absolute.path()).is_ok();

    Ok(TargetLookup {
        canonical: absolute.to_string(),
        candidates,
        resolves,
    })
}

async fn render_mentions(
    state: &AppState,
    mentions: &[Mention],
) -> Result<Vec<MentionDto>, AppError> {
    let mut dtos = Vec::with_capacity(mentions.len());
    for mention in mentions {
        let hcard = match &mention.hcard_id {
            Some(id) => state.db.get_hcard(id).await?,
            None => None,
        };
        dtos.push(MentionDto::from_mention(mention, hcard.as_ref()));
    }
    Ok(dtos)
}

// =============================================================================
// Endpoint advertisement
// =============================================================================

/// Middleware appending our endpoint to every response's `Link`
/// header, comma-joining any pre-existing value.
pub async fn advertise_endpoint(
    State(state): State<AppState>,
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    let advertisement = format!(
        "<{}/webmention/>; rel=\"webmention\"",
        state.config.server.base_url()
    );

    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    let value = match headers.get(axum::http::header::LINK) {
        Some(existing) => match existing.to_str() {
            Ok(existing) => format!("{}, {}", existing, advertisement),
            Err(_) => advertisement,
        },
        None => advertisement,
    };
    if let Ok(value) = axum::http::HeaderValue::from_str(&value) {
        headers.insert(axum::http::header::LINK, value);
    }

    response
}

//! Admin endpoints
//!
//! Operator commands over the scheduler (drain, reverify) and a status
//! dashboard. Authentication is left to the deployment (reverse proxy
//! or host middleware); the dashboard can additionally be opened up
//! with `webmention.dashboard_public`.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::mention::DrainReport;
use crate::AppState;

/// Routes:
/// - POST /webmention/drain    - process pending work once
/// - POST /webmention/reverify - re-run verification over stored mentions
/// - GET  /webmention/dashboard - queue and mention counts
pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/webmention/drain", post(drain))
        .route("/webmention/reverify", post(reverify))
        .route("/webmention/dashboard", get(dashboard))
}

// =============================================================================
// Drain
// =============================================================================

#[derive(Debug, Deserialize)]
struct DrainRequest {
    #[serde(default = "default_true")]
    incoming: bool,
    #[serde(default = "default_true")]
    outgoing: bool,
}

fn default_true() -> bool {
    true
}

impl Default for DrainRequest {
    fn default() -> Self {
        Self {
            incoming: true,
            outgoing: true,
        }
    }
}

/// POST /admin/webmention/drain
async fn drain(
    State(state): State<AppState>,
    body: Option<Json<DrainRequest>>,
) -> Result<Json<DrainReport>, AppError> {
    let Json(request) = body.unwrap_or_default();
    let report = state
        .scheduler
        .handle_pending(request.incoming, request.outgoing)
        .await?;
    Ok(Json(report))
}

// =============================================================================
// Reverify
// =============================================================================

#[derive(Debug, Default, Deserialize)]
struct ReverifyRequest {
    /// column → value selection; empty selects every mention
    #[serde(default)]
    filters: std::collections::BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
struct ReverifyResponse {
    reverified: usize,
}

/// POST /admin/webmention/reverify
async fn reverify(
    State(state): State<AppState>,
    body: Option<Json<ReverifyRequest>>,
) -> Result<Json<ReverifyResponse>, AppError> {
    let Json(request) = body.unwrap_or_default();
    let filters: Vec<(String, String)> = request.filters.into_iter().collect();
    let reverified = state.scheduler.reverify(&filters).await?;
    Ok(Json(ReverifyResponse { reverified }))
}

// =============================================================================
// Dashboard
// =============================================================================

#[derive(Debug, Serialize)]
struct DashboardResponse {
    mentions: i64,
    pending_incoming: i64,
    pending_outgoing: i64,
}

/// GET /admin/webmention/dashboard
///
/// 404 unless `webmention.dashboard_public` is set; deployments that
/// front this router with their own authentication can enable it.
async fn dashboard(
    State(state): State<AppState>,
) -> Result<Json<DashboardResponse>, (StatusCode, &'static str)> {
    if !state.config.webmention.dashboard_public {
        return Err((StatusCode::NOT_FOUND, "Not found"));
    }

    let load = async {
        Ok::<_, AppError>(DashboardResponse {
            mentions: state.db.count_mentions().await?,
            pending_incoming: state.db.count_pending_incoming().await?,
            pending_outgoing: state.db.count_pending_outgoing().await?,
        })
    };

    match load.await {
        Ok(body) => Ok(Json(body)),
        Err(e) => {
            tracing::error!(error = %e, "Dashboard query failed");
            Err((StatusCode::INTERNAL_SERVER_ERROR, "Internal error"))
        }
    }
}

//! RustMention - a server-side Webmention implementation
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      API Layer (Axum)                       │
//! │  - Webmention receive + read endpoints                      │
//! │  - Admin commands (drain, reverify)                         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Mention Engine                          │
//! │  - Incoming verification pipeline                           │
//! │  - Outgoing discovery + submission pipeline                 │
//! │  - Scheduler (worker tasks / pending-row drain)             │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Data Layer                             │
//! │  - SQLite (sqlx)                                            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `api`: HTTP handlers for the protocol, admin, and metrics surfaces
//! - `mention`: fetch/parse/verify/submit pipelines and the scheduler
//! - `resolver`: maps local URL paths to the entities they render
//! - `data`: database layer and data models
//! - `config`: configuration management
//! - `error`: error types

pub mod api;
pub mod config;
pub mod data;
pub mod error;
pub mod mention;
pub mod metrics;
pub mod resolver;

use std::sync::Arc;

/// Application state shared across all handlers
///
/// This struct is cloned for each request and contains shared
/// resources like the database pool, HTTP client, and scheduler.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// Database connection pool
    pub db: Arc<data::Database>,

    /// HTTP client for outbound fetches and submissions
    pub http_client: Arc<reqwest::Client>,

    /// URL-to-object resolver with the host's registered routes
    pub resolver: Arc<resolver::UrlResolver>,

    /// Public enqueue surface over the mention pipelines
    pub scheduler: Arc<mention::Scheduler>,
}

impl AppState {
    /// Initialize application state
    ///
    /// # Steps
    /// 1. Connect to SQLite database
    /// 2. Build the outbound HTTP client
    /// 3. Wire the pipelines and scheduler
    ///
    /// The resolver carries whatever routes the embedding application
    /// registered; pass `UrlResolver::new(...)` untouched for a purely
    /// URL-addressed deployment.
    ///
    /// # Errors
    /// Returns error if any initialization step fails
    pub async fn new(
        config: config::AppConfig,
        resolver: resolver::UrlResolver,
    ) -> Result<Self, error::AppError> {
        tracing::info!("Initializing application state...");

        // 1. Connect to SQLite database
        let db = Arc::new(data::Database::connect(&config.database.path).await?);
        tracing::info!("Database connected");

        // 2. Outbound HTTP client; timeout and User-Agent apply to
        //    every fetch and submission
        let http_client = Arc::new(
            reqwest::Client::builder()
                .user_agent(config.webmention.user_agent.clone())
                .timeout(config.webmention.timeout())
                .build()
                .map_err(|e| error::AppError::Internal(e.into()))?,
        );

        // 3. Pipelines and scheduler
        let config = Arc::new(config);
        let resolver = Arc::new(resolver);
        let fetcher = mention::Fetcher::new(http_client.clone());
        let incoming = Arc::new(mention::IncomingProcessor::new(
            config.clone(),
            db.clone(),
            fetcher.clone(),
            resolver.clone(),
        ));
        let outgoing = Arc::new(mention::OutgoingProcessor::new(
            config.clone(),
            db.clone(),
            fetcher,
        ));
        let scheduler = Arc::new(mention::Scheduler::new(
            config.clone(),
            db.clone(),
            incoming,
            outgoing,
        ));

        tracing::info!("Application state initialized successfully");

        Ok(Self {
            config,
            db,
            http_client,
            resolver,
            scheduler,
        })
    }
}

/// Build the Axum router with all routes.
///
/// This is shared by the binary and integration tests to keep route
/// composition consistent across environments. Every response carries
/// our endpoint advertisement in its `Link` header.
pub fn build_router(state: AppState) -> axum::Router {
    use axum::Router;
    use tower_http::{compression::CompressionLayer, trace::TraceLayer};

    Router::new()
        .route("/health", axum::routing::get(health_check))
        .merge(api::webmention_router())
        .nest("/admin", api::admin_router())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            api::advertise_endpoint,
        ))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
        .merge(api::metrics_router())
}

async fn health_check() -> &'static str {
    "OK"
}

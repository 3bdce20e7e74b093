//! RustMention binary entry point

use rustmention::{config, resolver, AppState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application entry point
///
/// # Setup
/// 1. Initialize tracing/logging
/// 2. Load configuration from file and environment
/// 3. Initialize AppState
/// 4. Build Axum router
/// 5. Start HTTP server
/// 6. Start the periodic drain task (inline mode)
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Initialize tracing/logging
    let log_format =
        std::env::var("RUSTMENTION__LOGGING__FORMAT").unwrap_or_else(|_| "pretty".to_string());

    if log_format == "json" {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "rustmention=info,tower_http=debug".into()),
            )
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "rustmention=info,tower_http=debug".into()),
            )
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }

    tracing::info!("Starting RustMention...");

    // 2. Initialize metrics
    rustmention::metrics::init_metrics();

    // 3. Load configuration
    let config = config::AppConfig::load()?;
    tracing::info!(
        domain = %config.server.domain,
        protocol = %config.server.protocol,
        background_worker = config.webmention.use_background_worker,
        "Configuration loaded"
    );

    // 4. Initialize application state
    //
    // The standalone binary serves URL-addressed mentions only; embed
    // the library and register routes on the resolver to attach
    // mentions to your own entities.
    let default_field = config.webmention.default_url_parameter_mapping.clone();
    let state = AppState::new(config.clone(), resolver::UrlResolver::new(default_field)).await?;

    // 5. Build Axum router
    let app = rustmention::build_router(state.clone());

    // 6. Start HTTP server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);
    tracing::info!("Public URL: {}", config.server.base_url());
    tracing::info!(
        "Webmention endpoint: {}/webmention/",
        config.server.base_url()
    );

    // 7. Without a background worker, drain pending work periodically
    if !config.webmention.use_background_worker {
        spawn_drain_task(state.clone());
    }

    // Start server
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Spawn the periodic pending-work drain task
fn spawn_drain_task(state: AppState) {
    tokio::spawn(async move {
        let interval_secs = state.config.webmention.retry_interval_seconds.max(1);
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs));

        // Consume the immediate first tick so the first drain waits a
        // full interval after startup.
        interval.tick().await;

        loop {
            interval.tick().await;

            match state.scheduler.handle_pending(true, true).await {
                Ok(report) => {
                    if report.incoming_processed > 0
                        || report.outgoing_processed > 0
                        || report.statuses_retried > 0
                    {
                        tracing::info!(
                            incoming = report.incoming_processed,
                            outgoing = report.outgoing_processed,
                            retried = report.statuses_retried,
                            "Periodic drain completed"
                        );
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Periodic drain failed");
                }
            }
        }
    });

    tracing::info!("Drain task spawned");
}

//! API layer
//!
//! HTTP handlers for:
//! - Webmention protocol endpoints (receive + read)
//! - Admin commands (drain, reverify, dashboard)
//! - Metrics (Prometheus)

mod admin;
mod dto;
pub mod metrics;
mod webmention;

pub use dto::*;

pub use admin::admin_router;
pub use metrics::metrics_router;
pub use webmention::{advertise_endpoint, webmention_router};

//! Scheduling layer over the mention pipelines
//!
//! The public enqueue surface for the rest of the application. With a
//! background worker configured, work runs on spawned tasks; otherwise
//! it is parked in pending rows and drained by an operator command.
//! Callers never block on pipeline network I/O.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use url::Url;

use super::incoming::IncomingProcessor;
use super::outgoing::OutgoingProcessor;
use crate::config::AppConfig;
use crate::data::Database;
use crate::error::AppError;
use crate::metrics::{PENDING_INCOMING, PENDING_OUTGOING};

/// What one drain pass got through.
#[derive(Debug, Default, Clone, Copy, serde::Serialize)]
pub struct DrainReport {
    pub incoming_processed: usize,
    pub outgoing_processed: usize,
    pub statuses_retried: usize,
}

pub struct Scheduler {
    config: Arc<AppConfig>,
    db: Arc<Database>,
    incoming: Arc<IncomingProcessor>,
    outgoing: Arc<OutgoingProcessor>,
    /// At most one follow-up drain task outstanding at a time
    drain_scheduled: AtomicBool,
}

impl Scheduler {
    pub fn new(
        config: Arc<AppConfig>,
        db: Arc<Database>,
        incoming: Arc<IncomingProcessor>,
        outgoing: Arc<OutgoingProcessor>,
    ) -> Self {
        Self {
            config,
            db,
            incoming,
            outgoing,
            drain_scheduled: AtomicBool::new(false),
        }
    }

    /// Accept an incoming webmention notification.
    ///
    /// Validates both URLs, then either spawns a verification task
    /// (worker mode) or parks the triple in a pending row. Returns as
    /// soon as the work is queued.
    ///
    /// # Errors
    /// `Validation` when either URL is not an absolute http(s) URL.
    pub async fn handle_incoming(
        self: &Arc<Self>,
        source_url: &str,
        target_url: &str,
        sent_by: &str,
    ) -> Result<(), AppError> {
        validate_http_url(source_url, "source")?;
        validate_http_url(target_url, "target")?;

        if self.config.webmention.use_background_worker {
            let scheduler = Arc::clone(self);
            let (source, target, sent_by) = (
                source_url.to_string(),
                target_url.to_string(),
                sent_by.to_string(),
            );
            tokio::spawn(async move {
                match scheduler.incoming.process(&source, &target, &sent_by).await {
                    Ok(_) => scheduler.schedule_followup_drain(),
                    Err(e) => {
                        tracing::error!(source = %source, target = %target, error = %e,
                            "Incoming verification task failed");
                    }
                }
            });
        } else {
            self.db
                .upsert_pending_incoming(source_url, target_url, sent_by)
                .await?;
            PENDING_INCOMING.set(self.db.count_pending_incoming().await?);
        }

        Ok(())
    }

    /// Queue an outbound scan of a freshly published page.
    pub async fn handle_outgoing(
        self: &Arc<Self>,
        source_path: &str,
        html: &str,
    ) -> Result<(), AppError> {
        let absolute = Url::parse(&self.config.server.base_url())
            .and_then(|u| u.join(source_path))
            .map_err(|e| AppError::Validation(format!("bad source path '{}': {}", source_path, e)))?;

        if self.config.webmention.use_background_worker {
            let scheduler = Arc::clone(self);
            let (path, html) = (source_path.to_string(), html.to_string());
            tokio::spawn(async move {
                match scheduler.outgoing.process(&path, &html).await {
                    Ok(_) => scheduler.schedule_followup_drain(),
                    Err(e) => {
                        tracing::error!(source = %path, error = %e, "Outgoing scan task failed");
                    }
                }
            });
        } else {
            self.db.upsert_pending_outgoing(absolute.as_str(), html).await?;
            PENDING_OUTGOING.set(self.db.count_pending_outgoing().await?);
        }

        Ok(())
    }

    /// Drain the pending queues once.
    ///
    /// Incoming rows are processed when their retry state permits;
    /// outgoing rows are scanned and deleted (their OutgoingStatus rows
    /// carry the retry state from then on), then awaiting statuses are
    /// retried.
    pub async fn handle_pending(
        &self,
        incoming: bool,
        outgoing: bool,
    ) -> Result<DrainReport, AppError> {
        let mut report = DrainReport::default();
        let now = Utc::now();
        let wm = &self.config.webmention;

        if incoming {
            for pending in self.db.list_pending_incoming().await? {
                if !pending.retry.can_retry(now, wm.max_retries, wm.retry_interval()) {
                    continue;
                }
                self.incoming
                    .process(&pending.source_url, &pending.target_url, &pending.sent_by)
                    .await?;
                report.incoming_processed += 1;
            }
            PENDING_INCOMING.set(self.db.count_pending_incoming().await?);
        }

        if outgoing {
            for pending in self.db.list_pending_outgoing().await? {
                let path = match Url::parse(&pending.absolute_url) {
                    Ok(url) => url.path().to_string(),
                    Err(e) => {
                        tracing::warn!(url = %pending.absolute_url, error = %e,
                            "Dropping pending scan with unparsable URL");
                        self.db.delete_pending_outgoing(&pending.absolute_url).await?;
                        continue;
                    }
                };
                self.outgoing.process(&path, &pending.text).await?;
                self.db.delete_pending_outgoing(&pending.absolute_url).await?;
                report.outgoing_processed += 1;
            }
            report.statuses_retried = self.outgoing.retry_awaiting().await?;
            PENDING_OUTGOING.set(self.db.count_pending_outgoing().await?);
        }

        tracing::info!(
            incoming = report.incoming_processed,
            outgoing = report.outgoing_processed,
            retried = report.statuses_retried,
            "Drained pending mention work"
        );

        Ok(report)
    }

    /// Reverify stored mentions selected by column filters (empty
    /// filters select all). Returns how many were reverified.
    pub async fn reverify(&self, filters: &[(String, String)]) -> Result<usize, AppError> {
        let mentions = self.db.find_mentions(filters).await?;
        let count = mentions.len();
        for mention in &mentions {
            self.incoming.reverify(mention).await?;
        }
        Ok(count)
    }

    /// After a successful worker task, schedule one drain at
    /// `retry_interval` in the future so deferred work gets picked up
    /// without an operator command. Deduplicates against an
    /// already-scheduled drain.
    fn schedule_followup_drain(self: &Arc<Self>) {
        if self
            .drain_scheduled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let scheduler = Arc::clone(self);
        let delay = std::time::Duration::from_secs(self.config.webmention.retry_interval_seconds);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            scheduler.drain_scheduled.store(false, Ordering::SeqCst);
            if let Err(e) = scheduler.handle_pending(true, true).await {
                tracing::error!(error = %e, "Scheduled drain failed");
            }
        });
    }
}

fn validate_http_url(value: &str, what: &str) -> Result<Url, AppError> {
    let url = Url::parse(value)
        .map_err(|_| AppError::Validation(format!("{} is not a valid absolute URL", what)))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(AppError::Validation(format!(
            "{} must be an http(s) URL",
            what
        )));
    }
    if url.host_str().is_none() {
        return Err(AppError::Validation(format!("{} has no host", what)));
    }
    Ok(url)
}

//! Progress reporting for harvesting sessions.
//!
//! The harvester emits one [`HarvestEvent`] per state transition through a
//! [`HarvestReporter`]. Frontends decide what to do with them: the CLI logs
//! them, tests collect them, library users may ignore them entirely with
//! [`SilentReporter`].

use std::sync::Arc;

use crate::error::AppError;
use crate::models::{Record, Schema};
use crate::sync::HarvestReport;

/// Events emitted during a harvest.
#[derive(Debug)]
pub enum HarvestEvent<'a> {
    /// The count succeeded and pages are about to be requested.
    Started { matched: u64, total: u64 },
    /// A new schema pass begins (only reported when there are several).
    PassStarted { schema: Schema },
    /// A classified record, including synthetic `removed` records.
    Record(&'a Record),
    /// A record whose identity was already seen during this session.
    RecordDuplicate {
        original_id: &'a str,
        record_type: &'a str,
    },
    /// A record without usable identity.
    RecordError { record_type: &'a str },
    /// A page was received with `count` records.
    Progress { count: u64 },
    /// A page could not be fetched. The harvest goes on.
    PageError { error: &'a AppError },
    /// Reconciliation starts with `unseen` cached records to resolve.
    Reconciling { unseen: usize, exhaustive: bool },
    /// The session ended; always the last event.
    Finished { report: &'a HarvestReport },
    /// A fatal error ended the session; followed by `Finished`.
    Error { error: &'a AppError },
}

/// Receiver of harvest events.
pub trait HarvestReporter: Send + Sync {
    fn report(&self, event: HarvestEvent<'_>);
}

impl<R: HarvestReporter + ?Sized> HarvestReporter for &R {
    fn report(&self, event: HarvestEvent<'_>) {
        (**self).report(event)
    }
}

impl<R: HarvestReporter + ?Sized> HarvestReporter for Arc<R> {
    fn report(&self, event: HarvestEvent<'_>) {
        (**self).report(event)
    }
}

/// Reporter that discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentReporter;

impl HarvestReporter for SilentReporter {
    fn report(&self, _event: HarvestEvent<'_>) {}
}

/// Reporter that forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl HarvestReporter for TracingReporter {
    fn report(&self, event: HarvestEvent<'_>) {
        match event {
            HarvestEvent::Started { matched, total } => {
                tracing::info!(matched, total, "Harvest started");
            }
            HarvestEvent::PassStarted { schema } => {
                tracing::info!(schema = %schema, "Schema pass started");
            }
            HarvestEvent::Record(record) => {
                tracing::debug!(
                    original_id = record.original_id.as_str(),
                    status = %record.status,
                    "Record"
                );
            }
            HarvestEvent::RecordDuplicate {
                original_id,
                record_type,
            } => {
                tracing::debug!(original_id, record_type, "Duplicate record skipped");
            }
            HarvestEvent::RecordError { record_type } => {
                tracing::warn!(record_type, "Record without identifier skipped");
            }
            HarvestEvent::Progress { count } => {
                tracing::debug!(count, "Page received");
            }
            HarvestEvent::PageError { error } => {
                tracing::warn!(
                    error = %error,
                    retryable = error.is_retryable(),
                    "Failed to fetch page, skipping"
                );
            }
            HarvestEvent::Reconciling { unseen, exhaustive } => {
                tracing::info!(unseen, exhaustive, "Reconciling cached records");
            }
            HarvestEvent::Finished { report } => {
                tracing::info!(
                    status = ?report.status,
                    returned = report.counters.returned,
                    missed = report.counters.missed,
                    duplicate = report.counters.duplicate,
                    changed = report.counters.statuses.changed(),
                    duration_ms = report.duration,
                    "Harvest finished"
                );
            }
            HarvestEvent::Error { error } => {
                tracing::error!(error = %error, "Harvest failed");
            }
        }
    }
}

//! Terminal output of the harvest command.

use std::sync::atomic::{AtomicU64, Ordering};

use csw_core::{HarvestEvent, HarvestReporter, Record, RecordStatus, TracingReporter};

use crate::config::DisplayMode;

/// Length of the abbreviated content hash in list mode.
const SHORT_HASH_LEN: usize = 7;

/// One line per record: short content hash, status and title. Removed records have
/// no title and show their original identifier instead.
pub fn format_record_line(record: &Record) -> String {
    match record.status {
        RecordStatus::Removed => format!(
            "{} ({}) {}",
            "x".repeat(SHORT_HASH_LEN),
            record.status,
            record.original_id
        ),
        _ => format!(
            "{} ({}) {}",
            record
                .content_hash
                .get(..SHORT_HASH_LEN)
                .unwrap_or(&record.content_hash),
            record.status,
            record.title.as_deref().unwrap_or("<untitled>")
        ),
    }
}

/// Harvest reporter of the CLI. Logs lifecycle events, and page progress in
/// `progress` mode.
#[derive(Debug)]
pub struct CliReporter {
    display: DisplayMode,
    received: AtomicU64,
    total: AtomicU64,
}

impl CliReporter {
    pub fn new(display: DisplayMode) -> Self {
        Self {
            display,
            received: AtomicU64::new(0),
            total: AtomicU64::new(0),
        }
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }
}

impl HarvestReporter for CliReporter {
    fn report(&self, event: HarvestEvent<'_>) {
        match event {
            HarvestEvent::Started { total, .. } => {
                self.total.store(total, Ordering::Relaxed);
                TracingReporter.report(event);
            }
            HarvestEvent::Progress { count } => {
                let received = self.received.fetch_add(count, Ordering::Relaxed) + count;
                if self.display == DisplayMode::Progress {
                    tracing::info!(
                        "{}/{} records received",
                        received,
                        self.total.load(Ordering::Relaxed)
                    );
                }
            }
            HarvestEvent::Record(_) => {}
            // Logged by the consumer of the session.
            HarvestEvent::Error { .. } => {}
            other => TracingReporter.report(other),
        }
    }
}

//! Delta detection and harvest accounting.
//!
//! This module provides pure business logic for record classification and
//! harvest statistics, decoupled from I/O operations and CLI orchestration.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{EndpointDiagnostics, RecordStatus};

/// Per-status record counters.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub new: u64,
    pub updated: u64,
    pub hit: u64,
    pub removed: u64,
}

impl StatusCounts {
    /// Creates a new empty stats tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an outcome, incrementing the appropriate counter.
    pub fn record(&mut self, status: RecordStatus) {
        match status {
            RecordStatus::New => self.new += 1,
            RecordStatus::Updated => self.updated += 1,
            RecordStatus::Hit => self.hit += 1,
            RecordStatus::Removed => self.removed += 1,
        }
    }

    /// Returns the total number of classified records.
    pub fn total(&self) -> u64 {
        self.new + self.updated + self.hit + self.removed
    }

    /// Returns the number of records that differ from the snapshot.
    pub fn changed(&self) -> u64 {
        self.new + self.updated + self.removed
    }
}

/// Result of delta detection for a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationDecision {
    /// The status assigned to this record
    pub status: RecordStatus,
    /// Human-readable reason for the decision
    pub reason: &'static str,
}

/// Classifies a live record based on content hash comparison.
///
/// # Arguments
/// * `cached_hash` - The content hash from the previous snapshot (None if absent)
/// * `content_hash` - The content hash computed from the live record
///
/// # Returns
/// A `ClassificationDecision`. Never returns [`RecordStatus::Removed`]: removal
/// is decided during reconciliation, not per record.
pub fn classify_record(cached_hash: Option<&str>, content_hash: &str) -> ClassificationDecision {
    match cached_hash {
        Some(hash) if hash == content_hash => ClassificationDecision {
            status: RecordStatus::Hit,
            reason: "content hash matches",
        },
        Some(_) => ClassificationDecision {
            status: RecordStatus::Updated,
            reason: "content hash changed",
        },
        None => ClassificationDecision {
            status: RecordStatus::New,
            reason: "new record",
        },
    }
}

// =============================================================================
// Session accounting
// =============================================================================

/// Lifecycle status of a harvesting session, as reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HarvestStatus {
    #[default]
    Pending,
    Running,
    Successful,
    Failed,
    /// Stopped by the consumer before completion.
    Cancelled,
}

impl HarvestStatus {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            HarvestStatus::Successful | HarvestStatus::Failed | HarvestStatus::Cancelled
        )
    }
}

/// Counters maintained by a harvesting session.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarvestCounters {
    pub matched: u64,
    pub total: u64,
    pub returned: u64,
    pub missed: u64,
    pub duplicate: u64,
    pub record_errors: u64,
    pub returned_pages: u64,
    pub errored_pages: u64,
    pub types: BTreeMap<String, u64>,
    pub statuses: StatusCounts,
}

impl HarvestCounters {
    /// Records a classified record of the given element type.
    pub fn record(&mut self, record_type: Option<&str>, status: RecordStatus) {
        if let Some(record_type) = record_type {
            *self.types.entry(record_type.to_string()).or_insert(0) += 1;
        }
        self.statuses.record(status);
    }
}

/// Final report of a harvesting session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarvestReport {
    pub status: HarvestStatus,
    #[serde(flatten)]
    pub counters: HarvestCounters,
    pub exhaustive: bool,
    pub started_at: Option<DateTime<Utc>>,
    /// Wall-clock duration in milliseconds.
    pub duration: u64,
    /// Returned records per second.
    pub speed: f64,
    pub endpoint: EndpointDiagnostics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HarvestReport {
    pub fn is_success(&self) -> bool {
        self.status == HarvestStatus::Successful
    }
}

/// Records per second, zero for an empty or instantaneous harvest.
pub fn compute_speed(returned: u64, duration_ms: u64) -> f64 {
    if duration_ms == 0 {
        return 0.0;
    }
    returned as f64 * 1000.0 / duration_ms as f64
}

// =============================================================================
// Batch Harvest Types
// =============================================================================

/// Result of harvesting a single catalog in batch mode.
#[derive(Debug, Clone)]
pub struct CatalogHarvestResult {
    /// Catalog name identifier.
    pub catalog_name: String,
    /// Catalog service URL.
    pub catalog_url: String,
    /// Final report, None if the harvest could not start at all.
    pub report: Option<HarvestReport>,
    /// Error message if harvest failed, None if successful.
    pub error: Option<String>,
}

impl CatalogHarvestResult {
    /// Creates a result from a finished report.
    pub fn from_report(name: String, url: String, report: HarvestReport) -> Self {
        let error = if report.is_success() {
            None
        } else {
            Some(
                report
                    .error
                    .clone()
                    .unwrap_or_else(|| format!("harvest {:?}", report.status).to_lowercase()),
            )
        };
        Self {
            catalog_name: name,
            catalog_url: url,
            report: Some(report),
            error,
        }
    }

    /// Creates a failed harvest result.
    pub fn failure(name: String, url: String, error: String) -> Self {
        Self {
            catalog_name: name,
            catalog_url: url,
            report: None,
            error: Some(error),
        }
    }

    /// Returns true if the harvest was successful.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Number of records returned by the catalog.
    pub fn returned(&self) -> u64 {
        self.report.as_ref().map_or(0, |r| r.counters.returned)
    }
}

/// Aggregated results from batch harvesting multiple catalogs.
#[derive(Debug, Clone, Default)]
pub struct BatchHarvestSummary {
    /// Results for each catalog.
    pub results: Vec<CatalogHarvestResult>,
}

impl BatchHarvestSummary {
    /// Creates a new empty summary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a catalog harvest result.
    pub fn add(&mut self, result: CatalogHarvestResult) {
        self.results.push(result);
    }

    /// Returns the count of successful harvests.
    pub fn successful_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    /// Returns the count of failed harvests.
    pub fn failed_count(&self) -> usize {
        self.results.iter().filter(|r| !r.is_success()).count()
    }

    /// Returns the total number of records returned across all catalogs.
    pub fn total_records(&self) -> u64 {
        self.results.iter().map(|r| r.returned()).sum()
    }

    /// Returns the total number of catalogs processed.
    pub fn total_catalogs(&self) -> usize {
        self.results.len()
    }
}

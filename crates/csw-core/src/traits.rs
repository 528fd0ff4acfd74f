//! Seams between the harvesting session and the protocol layer.

use async_trait::async_trait;

use crate::error::AppError;
use crate::models::{EndpointDiagnostics, RawRecord, SearchOptions, SearchResults};

/// The catalog operations a harvester needs.
///
/// Implemented by `csw_client::ServiceEndpoint`; tests provide in-memory
/// catalogs.
#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// Number of records matching the options (`resultType=hits`).
    async fn count(&self, options: &SearchOptions) -> Result<u64, AppError>;

    /// One page of records.
    async fn records(&self, options: &SearchOptions) -> Result<SearchResults, AppError>;

    /// A single record by identifier.
    ///
    /// Must fail with [`AppError::RecordNotFound`] when the catalog confirms
    /// the record does not exist.
    async fn record(&self, id: &str, options: &SearchOptions) -> Result<RawRecord, AppError>;

    /// URL, redirect and compatibility state, for reports.
    fn diagnostics(&self) -> EndpointDiagnostics {
        EndpointDiagnostics::default()
    }
}

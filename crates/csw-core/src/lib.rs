//! CSW Harvester Core - Domain types, harvesting session, error handling and
//! configuration.
//!
//! The protocol layer lives in `csw-client`; this crate only depends on it
//! through the [`CatalogClient`] trait.

pub mod config;
pub mod error;
pub mod harvest;
pub mod models;
pub mod progress;
pub mod records;
pub mod sync;
pub mod traits;

pub use config::{
    default_config_path, load_catalogs_config, CatalogEntry, CatalogsConfig, HarvestConfig,
    HttpConfig,
};
pub use error::AppError;
pub use harvest::{HarvestPhase, Harvester};
pub use models::{
    CacheSnapshot, CompatOption, CompatOptionSet, ElementSetName, EndpointDiagnostics,
    HarvestSchema, ProtocolException, ProtocolResult, RawRecord, Record, RecordStatus,
    ResultType, Schema, SearchOptions, SearchResults,
};
pub use progress::{HarvestEvent, HarvestReporter, SilentReporter, TracingReporter};
pub use records::{hash_identifier, normalize, NormalizedRecord};
pub use sync::{
    classify_record, BatchHarvestSummary, CatalogHarvestResult, HarvestCounters, HarvestReport,
    HarvestStatus, StatusCounts,
};
pub use traits::CatalogClient;

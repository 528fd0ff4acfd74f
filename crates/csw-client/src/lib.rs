//! CSW Client - Adaptive HTTP client for OGC Catalog Service endpoints.
//!
//! - [`endpoint`] - protocol operations over HTTP, redirect handling
//! - [`compat`] - detection of server quirks from declared exceptions
//! - [`parser`] - CSW 2.0.2 XML responses to protocol results
//! - [`service_url`] - service URL, redirect history and query strings
//!
//! # Overview
//!
//! A [`ServiceEndpoint`] implements [`csw_core::CatalogClient`], so it can be
//! handed to a [`csw_core::Harvester`] directly. Compatibility flags and
//! redirect state are learned once per endpoint and reused by every later
//! request.

pub mod compat;
pub mod endpoint;
pub mod parser;
pub mod service_url;

pub use compat::CompatibilityManager;
pub use endpoint::{EndpointOptions, ServiceEndpoint};
pub use parser::{ProtocolParser, XmlProtocolParser};
pub use service_url::{Query, ServiceUrl, MAX_HOPS};

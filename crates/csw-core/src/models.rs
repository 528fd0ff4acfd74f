//! Domain types shared by the endpoint layer and the harvesting session.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AppError;

/// Snapshot of a previous harvest: `originalId` to content hash.
pub type CacheSnapshot = HashMap<String, String>;

// =============================================================================
// Protocol vocabulary
// =============================================================================

/// Output schema of a single request.
///
/// `inspire` is accepted as an alias of `iso` when parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Schema {
    /// Dublin Core (`csw:Record`).
    Dc,
    /// ISO 19139 (`gmd:MD_Metadata`).
    #[serde(alias = "inspire")]
    Iso,
}

impl Schema {
    pub const DC_OUTPUT_SCHEMA: &'static str = "http://www.opengis.net/cat/csw/2.0.2";
    pub const ISO_OUTPUT_SCHEMA: &'static str = "http://www.isotc211.org/2005/gmd";

    /// Value of the `typeNames` parameter for this schema.
    pub fn type_names(&self) -> &'static str {
        match self {
            Schema::Dc => "csw:Record",
            Schema::Iso => "gmd:MD_Metadata",
        }
    }

    /// Value of the `outputSchema` parameter for this schema.
    pub fn output_schema(&self) -> &'static str {
        match self {
            Schema::Dc => Self::DC_OUTPUT_SCHEMA,
            Schema::Iso => Self::ISO_OUTPUT_SCHEMA,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Schema::Dc => "dc",
            Schema::Iso => "iso",
        }
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Schema selection for a whole harvest.
///
/// `Both` runs two passes: `iso` first, then `dc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HarvestSchema {
    #[default]
    Dc,
    #[serde(alias = "inspire")]
    Iso,
    Both,
}

impl HarvestSchema {
    /// Ordered list of passes this selection requires.
    pub fn passes(&self) -> Vec<Schema> {
        match self {
            HarvestSchema::Dc => vec![Schema::Dc],
            HarvestSchema::Iso => vec![Schema::Iso],
            HarvestSchema::Both => vec![Schema::Iso, Schema::Dc],
        }
    }
}

impl FromStr for HarvestSchema {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dc" => Ok(HarvestSchema::Dc),
            "iso" | "inspire" => Ok(HarvestSchema::Iso),
            "both" => Ok(HarvestSchema::Both),
            other => Err(AppError::ConfigError(format!(
                "unknown schema '{}' (expected dc, iso or both)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ElementSetName {
    Brief,
    #[default]
    Full,
}

impl ElementSetName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementSetName::Brief => "brief",
            ElementSetName::Full => "full",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResultType {
    Hits,
    #[default]
    Results,
}

impl ResultType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultType::Hits => "hits",
            ResultType::Results => "results",
        }
    }
}

/// Caller-facing options of a `GetRecords` / `GetRecordById` operation.
///
/// Unset fields fall back to the protocol defaults applied by the endpoint
/// (`elementSetName=full`, `resultType=results`, `maxRecords=10`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchOptions {
    pub schema: Option<Schema>,
    pub max_records: Option<u64>,
    pub start_position: Option<u64>,
    pub element_set_name: Option<ElementSetName>,
    pub result_type: Option<ResultType>,
}

impl SearchOptions {
    pub fn for_schema(schema: Schema) -> Self {
        Self {
            schema: Some(schema),
            ..Self::default()
        }
    }

    /// Options for one page: `startPosition` is 1-based, `offset` is not.
    pub fn page(schema: Schema, offset: u64, step: u64) -> Self {
        Self {
            schema: Some(schema),
            max_records: Some(step),
            start_position: Some(offset + 1),
            ..Self::default()
        }
    }
}

// =============================================================================
// Compatibility options
// =============================================================================

/// A learned (or preset) workaround for a non-conformant server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CompatOption {
    /// Send `constraintLanguage=CQL_TEXT` with `GetRecords`.
    DefineConstraintLanguage,
    /// Declare the `typeNames` prefixes with a `namespace` parameter.
    DefineNamespace,
    /// Do not percent-encode query string values.
    NoEncodeQs,
    /// List with `brief` and fetch `full` records one by one.
    ProgressiveElementSetName,
}

impl CompatOption {
    pub const ALL: [CompatOption; 4] = [
        CompatOption::DefineConstraintLanguage,
        CompatOption::DefineNamespace,
        CompatOption::NoEncodeQs,
        CompatOption::ProgressiveElementSetName,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CompatOption::DefineConstraintLanguage => "define-constraint-language",
            CompatOption::DefineNamespace => "define-namespace",
            CompatOption::NoEncodeQs => "no-encode-qs",
            CompatOption::ProgressiveElementSetName => "progressive-element-set-name",
        }
    }
}

impl fmt::Display for CompatOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompatOption {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CompatOption::ALL
            .into_iter()
            .find(|option| option.as_str() == s)
            .ok_or_else(|| AppError::UnknownCompatOption(s.to_string()))
    }
}

/// Monotonically growing set of compatibility options.
///
/// There is no way to remove an option once inserted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompatOptionSet {
    options: BTreeSet<CompatOption>,
}

impl CompatOptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a set from option names, rejecting names outside the vocabulary.
    pub fn from_names<I, S>(names: I) -> Result<Self, AppError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::new();
        for name in names {
            set.insert(name.as_ref().parse()?);
        }
        Ok(set)
    }

    pub fn contains(&self, option: CompatOption) -> bool {
        self.options.contains(&option)
    }

    /// Inserts an option. Returns true if it was not already enabled.
    pub fn insert(&mut self, option: CompatOption) -> bool {
        self.options.insert(option)
    }

    pub fn len(&self) -> usize {
        self.options.len()
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = CompatOption> + '_ {
        self.options.iter().copied()
    }

    pub fn names(&self) -> Vec<String> {
        self.iter().map(|option| option.as_str().to_string()).collect()
    }
}

// =============================================================================
// Protocol results
// =============================================================================

/// A structured OWS exception declared by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolException {
    pub exception_code: String,
    pub locator: Option<String>,
    pub message: String,
}

impl ProtocolException {
    /// Locator in lower case, empty when absent.
    pub fn locator_lowercase(&self) -> String {
        self.locator
            .as_deref()
            .unwrap_or_default()
            .to_ascii_lowercase()
    }
}

impl fmt::Display for ProtocolException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.locator {
            Some(locator) => write!(
                f,
                "{} (locator: {}): {}",
                self.exception_code, locator, self.message
            ),
            None => write!(f, "{}: {}", self.exception_code, self.message),
        }
    }
}

/// A parsed element from a result set, tagged with its element type
/// (`Record`, `MD_Metadata`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRecord {
    pub element_type: String,
    pub body: Value,
}

impl RawRecord {
    pub fn new(element_type: impl Into<String>, body: Value) -> Self {
        Self {
            element_type: element_type.into(),
            body,
        }
    }
}

/// One `GetRecords` result set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResults {
    pub records: Vec<RawRecord>,
    /// `numberOfRecordsMatched`, absent when the server omitted it.
    pub matched: Option<i64>,
    /// `numberOfRecordsReturned`, absent when the server omitted it.
    pub returned: Option<i64>,
}

/// Exactly one parsed protocol document.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolResult {
    Capabilities(Value),
    GetRecordsResponse(SearchResults),
    GetRecordByIdResponse(Vec<RawRecord>),
    ExceptionReport(ProtocolException),
}

impl ProtocolResult {
    /// Tag name as it appears on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            ProtocolResult::Capabilities(_) => "Capabilities",
            ProtocolResult::GetRecordsResponse(_) => "GetRecordsResponse",
            ProtocolResult::GetRecordByIdResponse(_) => "GetRecordByIdResponse",
            ProtocolResult::ExceptionReport(_) => "ExceptionReport",
        }
    }
}

// =============================================================================
// Canonical records
// =============================================================================

/// Classification of a record against the previous snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    /// Not present in the snapshot.
    New,
    /// Present with a different content hash.
    Updated,
    /// Present with the same content hash.
    Hit,
    /// Present in the snapshot but gone from the catalog.
    Removed,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::New => "new",
            RecordStatus::Updated => "updated",
            RecordStatus::Hit => "hit",
            RecordStatus::Removed => "removed",
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A canonical, classified record emitted by the harvester.
///
/// Synthetic `removed` records carry no type, title or body; their
/// `content_hash` is the hash stored in the snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub original_id: String,
    pub id: String,
    #[serde(rename = "type")]
    pub record_type: Option<String>,
    pub title: Option<String>,
    pub modified: Option<String>,
    pub content_hash: String,
    pub status: RecordStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

/// Diagnostics of the endpoint a harvest ran against.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointDiagnostics {
    pub original_url: String,
    pub current_url: String,
    pub redirections: Vec<String>,
    pub compat_options: Vec<String>,
}

//! Record normalization: raw parsed elements to canonical records.
//!
//! Each supported element type has a [`FieldMapping`] describing where its
//! identifier, title and modification date live in the parsed body. Parsed
//! bodies keep the XML structure, so ISO documents contain type wrappers
//! (`MD_DataIdentification`, `CI_Citation`) and value wrappers
//! (`CharacterString`, `DateTime`). Path lookup steps through a wrapper when
//! the requested key is not found directly.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::models::{RawRecord, Record, RecordStatus};

/// Where to find the summary fields of one element type.
///
/// Each field lists candidate dotted paths, tried in order.
#[derive(Debug)]
pub struct FieldMapping {
    pub id: &'static [&'static str],
    pub title: &'static [&'static str],
    pub modified: &'static [&'static str],
    /// Top-level keys excluded from the content hash.
    pub volatile: &'static [&'static str],
}

const DUBLIN_CORE: FieldMapping = FieldMapping {
    id: &["identifier"],
    title: &["title"],
    modified: &["modified"],
    volatile: &["modified"],
};

const ISO_METADATA: FieldMapping = FieldMapping {
    id: &["fileIdentifier"],
    title: &["identificationInfo.citation.title"],
    modified: &["dateStamp"],
    volatile: &["dateStamp"],
};

const FEATURE_CATALOGUE: FieldMapping = FieldMapping {
    id: &["@uuid", "uuid"],
    title: &["name"],
    modified: &[],
    volatile: &[],
};

/// Returns the field mapping for an element type, if the type is supported.
pub fn mapping_for(element_type: &str) -> Option<&'static FieldMapping> {
    match element_type {
        "Record" | "SummaryRecord" | "BriefRecord" => Some(&DUBLIN_CORE),
        "MD_Metadata" => Some(&ISO_METADATA),
        "FC_FeatureCatalogue" => Some(&FEATURE_CATALOGUE),
        _ => None,
    }
}

/// A raw record with its summary fields extracted, not yet classified.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    pub original_id: Option<String>,
    pub record_type: String,
    pub title: Option<String>,
    pub modified: Option<String>,
    pub content_hash: String,
    pub body: Value,
}

impl NormalizedRecord {
    /// Attaches a classification, producing the canonical record.
    ///
    /// Returns `None` when the record has no identity.
    pub fn classified(self, status: RecordStatus) -> Option<Record> {
        let original_id = self.original_id?;
        Some(Record {
            id: hash_identifier(&original_id),
            original_id,
            record_type: Some(self.record_type),
            title: self.title,
            modified: self.modified,
            content_hash: self.content_hash,
            status,
            body: Some(self.body),
        })
    }
}

/// Extracts the identifier, title, date and content hash of a raw record.
///
/// Unknown element types are kept but have no identity.
pub fn normalize(raw: RawRecord) -> NormalizedRecord {
    let RawRecord { element_type, body } = raw;
    let mapping = mapping_for(&element_type);

    let (original_id, title, modified, volatile) = match mapping {
        Some(mapping) => (
            first_text(&body, mapping.id).filter(|id| !id.trim().is_empty()),
            first_text(&body, mapping.title),
            first_text(&body, mapping.modified),
            mapping.volatile,
        ),
        None => (None, None, None, &[][..]),
    };

    NormalizedRecord {
        original_id,
        content_hash: content_hash(&body, volatile),
        record_type: element_type,
        title,
        modified,
        body,
    }
}

/// Extracts only the identifier of a raw record.
pub fn record_identifier(raw: &RawRecord) -> Option<String> {
    mapping_for(&raw.element_type)
        .and_then(|mapping| first_text(&raw.body, mapping.id))
        .filter(|id| !id.trim().is_empty())
}

/// Stable identifier derived from the original identifier.
pub fn hash_identifier(original_id: &str) -> String {
    format!("{:x}", Sha256::digest(original_id.as_bytes()))
}

/// Hash of a body with volatile top-level fields removed.
///
/// `serde_json` objects are key-ordered, so equal bodies hash equally
/// regardless of element order in the source document.
pub fn content_hash(body: &Value, volatile: &[&str]) -> String {
    let stable = match body {
        Value::Object(map) if !volatile.is_empty() => {
            let filtered: Map<String, Value> = map
                .iter()
                .filter(|(key, _)| !volatile.contains(&key.as_str()))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();
            Value::Object(filtered)
        }
        other => other.clone(),
    };
    let bytes = serde_json::to_vec(&stable).unwrap_or_default();
    format!("{:x}", Sha256::digest(&bytes))
}

fn first_text(body: &Value, paths: &[&str]) -> Option<String> {
    paths
        .iter()
        .find_map(|path| lookup(body, path).and_then(text_of))
}

/// Resolves a dotted path, stepping through arrays (first element) and
/// single-child type wrappers.
pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(value, |current, key| child(current, key))
}

fn child<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    match value {
        Value::Array(items) => items.first().and_then(|first| child(first, key)),
        Value::Object(map) => {
            if let Some(found) = map.get(key) {
                return Some(found);
            }
            match single_element_child(map) {
                Some(wrapped) => child(wrapped, key),
                None => None,
            }
        }
        _ => None,
    }
}

fn single_element_child(map: &Map<String, Value>) -> Option<&Value> {
    let mut elements = map
        .iter()
        .filter(|(key, _)| !key.starts_with(|c: char| c == '@' || c == '#'));
    match (elements.next(), elements.next()) {
        (Some((_, value)), None) if value.is_object() || value.is_array() => Some(value),
        _ => None,
    }
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Array(items) => items.first().and_then(text_of),
        Value::Object(map) => {
            if let Some(text) = map.get("#text") {
                return text_of(text);
            }
            let mut elements = map.iter().filter(|(key, _)| !key.starts_with('@'));
            match (elements.next(), elements.next()) {
                (Some((_, inner)), None) => text_of(inner),
                _ => None,
            }
        }
        _ => None,
    }
}

//! Cache snapshots on disk: a JSON object mapping original identifiers to
//! content hashes.

use std::collections::BTreeMap;
use std::path::Path;

use csw_core::{AppError, CacheSnapshot, Record, RecordStatus};

/// Reads a snapshot file.
pub fn load_snapshot(path: &Path) -> Result<CacheSnapshot, AppError> {
    let content = std::fs::read_to_string(path)?;
    let snapshot: CacheSnapshot = serde_json::from_str(&content)?;
    tracing::info!(path = %path.display(), records = snapshot.len(), "Loaded cache snapshot");
    Ok(snapshot)
}

/// Writes a snapshot file, keys sorted.
pub fn save_snapshot(path: &Path, snapshot: &CacheSnapshot) -> Result<(), AppError> {
    let sorted: BTreeMap<&String, &String> = snapshot.iter().collect();
    let content = serde_json::to_string_pretty(&sorted)?;
    std::fs::write(path, content)?;
    tracing::info!(path = %path.display(), records = snapshot.len(), "Saved cache snapshot");
    Ok(())
}

/// Folds a harvested record into a snapshot.
///
/// Records not seen again but not confirmed removed stay in the snapshot.
pub fn apply_record(snapshot: &mut CacheSnapshot, record: &Record) {
    match record.status {
        RecordStatus::Removed => {
            snapshot.remove(&record.original_id);
        }
        _ => {
            snapshot.insert(record.original_id.clone(), record.content_hash.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use csw_core::hash_identifier;

    fn record(original_id: &str, hash: &str, status: RecordStatus) -> Record {
        Record {
            original_id: original_id.to_string(),
            id: hash_identifier(original_id),
            record_type: None,
            title: None,
            modified: None,
            content_hash: hash.to_string(),
            status,
            body: None,
        }
    }

    #[test]
    fn test_apply_record() {
        let mut snapshot: CacheSnapshot = [
            ("a".to_string(), "old".to_string()),
            ("b".to_string(), "hash-b".to_string()),
            ("kept".to_string(), "hash-kept".to_string()),
        ]
        .into_iter()
        .collect();

        apply_record(&mut snapshot, &record("a", "new", RecordStatus::Updated));
        apply_record(&mut snapshot, &record("b", "hash-b", RecordStatus::Removed));
        apply_record(&mut snapshot, &record("c", "hash-c", RecordStatus::New));

        assert_eq!(snapshot.get("a").map(String::as_str), Some("new"));
        assert!(!snapshot.contains_key("b"));
        assert_eq!(snapshot.get("c").map(String::as_str), Some("hash-c"));
        assert!(snapshot.contains_key("kept"));
    }

    #[test]
    fn test_snapshot_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        let snapshot: CacheSnapshot = [("b".to_string(), "2".to_string()), ("a".to_string(), "1".to_string())]
            .into_iter()
            .collect();

        save_snapshot(&path, &snapshot).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.find("\"a\"").unwrap() < content.find("\"b\"").unwrap());
        assert_eq!(load_snapshot(&path).unwrap(), snapshot);
    }

    #[test]
    fn test_load_invalid_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "[1, 2, 3]").unwrap();

        assert!(matches!(
            load_snapshot(&path),
            Err(AppError::SerializationError(_))
        ));
    }
}

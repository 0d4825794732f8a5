// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Batch import of scraper output into the library

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::{ImageMeta, Library};
use crate::{Result, StockpileError};

/// One entry of a scraper's JSON output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportEntry {
    pub image_path: PathBuf,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub machine_name: Option<String>,
}

impl ImportEntry {
    /// Parse a single raw JSON element
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let entry: Self = serde_json::from_value(value)
            .map_err(|e| StockpileError::Validation(format!("Malformed entry: {}", e)))?;
        if entry.image_path.as_os_str().is_empty() {
            return Err(StockpileError::Validation("Malformed entry: empty image_path".to_string()));
        }
        Ok(entry)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportFailure {
    /// Position of the entry in the batch
    pub index: usize,
    pub image_path: Option<String>,
    pub error: String,
}

/// Outcome of a batch import
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportReport {
    pub success: usize,
    pub failed: usize,
    pub errors: Vec<ImportFailure>,
}

/// Split a JSON document into its array elements. Anything other than a
/// top-level array is rejected as a whole.
pub fn parse_entries(data: &[u8]) -> Result<Vec<serde_json::Value>> {
    match serde_json::from_slice::<serde_json::Value>(data)? {
        serde_json::Value::Array(items) => Ok(items),
        _ => Err(StockpileError::Validation("Import file must contain a JSON array".to_string())),
    }
}

/// Import every element; a bad element is counted and skipped
pub fn import_batch(library: &Library, entries: Vec<serde_json::Value>) -> ImportReport {
    let mut report = ImportReport::default();

    for (index, value) in entries.into_iter().enumerate() {
        let image_path = value
            .get("image_path")
            .and_then(|p| p.as_str())
            .map(String::from);

        let outcome = ImportEntry::from_value(value).and_then(|entry| {
            let meta = ImageMeta {
                category: entry.category,
                tags: entry.tags,
                source: entry.source,
                machine_name: entry.machine_name,
            };
            library.add_image(&entry.image_path, meta)
        });

        match outcome {
            Ok(_) => report.success += 1,
            Err(e) => {
                warn!("Import entry {} failed: {}", index, e);
                report.failed += 1;
                report.errors.push(ImportFailure { index, image_path, error: e.to_string() });
            }
        }
    }

    info!("Import finished: {} added, {} failed", report.success, report.failed);
    report
}

/// Import a JSON file written by a scraper
pub fn import_json_file(library: &Library, path: &Path) -> Result<ImportReport> {
    if !path.is_file() {
        return Err(StockpileError::NotFound(format!("Import file not found: {}", path.display())));
    }
    let data = std::fs::read(path)?;
    let entries = parse_entries(&data)?;
    info!("Importing {} entries from {:?}", entries.len(), path);
    Ok(import_batch(library, entries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ImageQuery;
    use crate::library::tests::write_png;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_mixed_batch_counts() {
        let dir = TempDir::new().unwrap();
        let library = Library::in_memory().unwrap();
        let a = write_png(dir.path(), "a.png", 8, 8);
        let b = write_png(dir.path(), "b.png", 8, 8);
        let c = write_png(dir.path(), "c.png", 8, 8);
        std::fs::write(dir.path().join("broken.png"), b"not an image").unwrap();

        let entries = vec![
            json!({"image_path": a, "category": "nature", "tags": ["x"], "source": "pixabay"}),
            json!({"image_path": dir.path().join("missing.png")}),
            json!({"image_path": b, "machine_name": "render-01"}),
            json!({"category": "nature"}),
            json!("just a string"),
            json!({"image_path": dir.path().join("broken.png")}),
            json!({"image_path": c, "tags": "not-a-list"}),
            json!({"image_path": c}),
        ];

        let report = import_batch(&library, entries);
        assert_eq!(report.success, 3);
        assert_eq!(report.failed, 5);
        assert_eq!(report.errors.iter().map(|e| e.index).collect::<Vec<_>>(), vec![1, 3, 4, 5, 6]);
        assert_eq!(library.search(&ImageQuery::default()).unwrap().len(), 3);

        let rendered = library.search(&ImageQuery::default().machine("render-01")).unwrap();
        assert_eq!(rendered.len(), 1);
    }

    #[test]
    fn test_duplicate_in_batch_fails_once() {
        let dir = TempDir::new().unwrap();
        let library = Library::in_memory().unwrap();
        let a = write_png(dir.path(), "a.png", 8, 8);

        let entries = vec![json!({"image_path": a}), json!({"image_path": a})];
        let report = import_batch(&library, entries);
        assert_eq!((report.success, report.failed), (1, 1));
        assert!(report.errors[0].error.contains("Already in library"));
    }

    #[test]
    fn test_import_json_file() {
        let dir = TempDir::new().unwrap();
        let library = Library::in_memory().unwrap();
        let a = write_png(dir.path(), "a.png", 8, 8);
        let listing = dir.path().join("scraped.json");
        let body = serde_json::to_vec(&json!([{"image_path": a, "category": "food"}])).unwrap();
        std::fs::write(&listing, body).unwrap();

        let report = import_json_file(&library, &listing).unwrap();
        assert_eq!(report.success, 1);
        assert_eq!(library.search(&ImageQuery::default().category("food")).unwrap().len(), 1);
    }

    #[test]
    fn test_non_array_document_rejected() {
        assert!(parse_entries(br#"{"image_path": "/a.png"}"#).is_err());
        assert!(parse_entries(b"[1, 2").is_err());
        assert_eq!(parse_entries(b"[]").unwrap().len(), 0);
    }

    #[test]
    fn test_missing_import_file() {
        let library = Library::in_memory().unwrap();
        let err = import_json_file(&library, Path::new("/no/such/listing.json")).unwrap_err();
        assert!(matches!(err, StockpileError::NotFound(_)));
    }
}

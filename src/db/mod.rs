// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Database module for the image library: records, tags and filtered search

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::functions::FunctionFlags;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::{Result, StockpileError};

/// Database manager for the image library (thread-safe wrapper)
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

/// A stored image record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: i64,
    pub filename: String,
    pub path: String,
    pub category: String,
    pub tags: Vec<String>,
    pub source: String,
    pub machine_name: String,
    pub width: u32,
    pub height: u32,
    pub file_size: i64,
    pub created_at: DateTime<Utc>,
}

impl ImageRecord {
    /// Whether the referenced file is still on disk
    pub fn file_exists(&self) -> bool {
        Path::new(&self.path).is_file()
    }
}

/// Fields for a record that is about to be inserted
#[derive(Debug, Clone)]
pub struct NewImage {
    pub path: String,
    pub category: String,
    pub tags: Vec<String>,
    pub source: String,
    pub machine_name: String,
    pub width: u32,
    pub height: u32,
    pub file_size: i64,
}

/// Search filters. Absent fields, empty strings and zero bounds match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageQuery {
    #[serde(default)]
    pub category: Option<String>,
    /// Case-insensitive substring of the filename or any tag. Case is
    /// folded with Unicode rules, so `CAFÉ` finds `café`.
    #[serde(default)]
    pub search_query: Option<String>,
    #[serde(default)]
    pub machine_name: Option<String>,
    #[serde(default)]
    pub min_width: Option<u32>,
    #[serde(default)]
    pub min_height: Option<u32>,
    /// Maximum number of rows to return
    #[serde(default)]
    pub limit: Option<usize>,
}

impl ImageQuery {
    pub fn category(mut self, category: &str) -> Self {
        self.category = Some(category.to_string());
        self
    }

    pub fn search(mut self, text: &str) -> Self {
        self.search_query = Some(text.to_string());
        self
    }

    pub fn machine(mut self, machine_name: &str) -> Self {
        self.machine_name = Some(machine_name.to_string());
        self
    }

    pub fn min_size(mut self, width: u32, height: u32) -> Self {
        self.min_width = Some(width);
        self.min_height = Some(height);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Per-record view used by the debug endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleImage {
    pub id: i64,
    pub filename: String,
    pub path: String,
    pub file_exists: bool,
    pub category: String,
    pub source: String,
}

/// Library statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryStats {
    pub total_images: i64,
    pub tag_count: i64,
    pub categories: Vec<(String, i64)>,
    pub sources: Vec<(String, i64)>,
    pub sample_images: Vec<SampleImage>,
}

const RECORD_COLUMNS: &str =
    "id, filename, filepath, category, source, machine_name, width, height, file_size, created_at";

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<ImageRecord> {
    let created_str: String = row.get(9)?;
    Ok(ImageRecord {
        id: row.get(0)?,
        filename: row.get(1)?,
        path: row.get(2)?,
        category: row.get(3)?,
        tags: Vec::new(),
        source: row.get(4)?,
        machine_name: row.get(5)?,
        width: row.get(6)?,
        height: row.get(7)?,
        file_size: row.get(8)?,
        created_at: DateTime::parse_from_rfc3339(&created_str)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

fn load_tags(conn: &Connection, record: &mut ImageRecord) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare_cached(
        "SELECT tag FROM image_tags WHERE image_id = ?1 ORDER BY position",
    )?;
    record.tags = stmt
        .query_map(params![record.id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(())
}

impl Database {
    /// Open or create the database
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path.to_path_buf()),
        };
        db.initialize()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        };
        db.initialize()?;
        Ok(db)
    }

    /// Location of the database file, `None` when in memory
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StockpileError::Config("Database lock poisoned".to_string()))
    }

    /// Initialize database schema
    fn initialize(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        // SQLite's LIKE only folds ASCII; search compares through this instead
        conn.create_scalar_function(
            "fold_case",
            1,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            |ctx| Ok(ctx.get::<String>(0)?.to_lowercase()),
        )?;
        conn.execute_batch(r#"
            CREATE TABLE IF NOT EXISTS images (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                filename TEXT NOT NULL,
                filepath TEXT NOT NULL UNIQUE,
                category TEXT NOT NULL DEFAULT '',
                source TEXT NOT NULL DEFAULT '',
                machine_name TEXT NOT NULL DEFAULT '',
                width INTEGER NOT NULL,
                height INTEGER NOT NULL,
                file_size INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS image_tags (
                image_id INTEGER NOT NULL REFERENCES images(id) ON DELETE CASCADE,
                position INTEGER NOT NULL,
                tag TEXT NOT NULL,
                PRIMARY KEY (image_id, position)
            );

            CREATE INDEX IF NOT EXISTS idx_images_category ON images(category);
            CREATE INDEX IF NOT EXISTS idx_images_machine ON images(machine_name);
            CREATE INDEX IF NOT EXISTS idx_image_tags_tag ON image_tags(tag);
        "#)?;
        Ok(())
    }

    /// Insert a new image record. Paths are unique; a second insert of the
    /// same path is rejected.
    pub fn insert_image(&self, image: &NewImage) -> Result<ImageRecord> {
        let mut conn = self.lock_conn()?;

        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM images WHERE filepath = ?1",
                params![image.path],
                |row| row.get(0),
            )
            .optional()?;
        if existing.is_some() {
            return Err(StockpileError::Duplicate(image.path.clone()));
        }

        let filename = Path::new(&image.path)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| image.path.clone());
        let created_at = Utc::now();

        let tx = conn.transaction()?;
        tx.execute(
            r#"INSERT INTO images (filename, filepath, category, source, machine_name,
                                  width, height, file_size, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"#,
            params![
                filename,
                image.path,
                image.category,
                image.source,
                image.machine_name,
                image.width,
                image.height,
                image.file_size,
                created_at.to_rfc3339(),
            ],
        )?;
        let id = tx.last_insert_rowid();
        for (position, tag) in image.tags.iter().enumerate() {
            tx.execute(
                "INSERT INTO image_tags (image_id, position, tag) VALUES (?1, ?2, ?3)",
                params![id, position as i64, tag],
            )?;
        }
        tx.commit()?;

        Ok(ImageRecord {
            id,
            filename,
            path: image.path.clone(),
            category: image.category.clone(),
            tags: image.tags.clone(),
            source: image.source.clone(),
            machine_name: image.machine_name.clone(),
            width: image.width,
            height: image.height,
            file_size: image.file_size,
            created_at,
        })
    }

    /// Search images. Every supplied filter must match; results come back in
    /// insertion order.
    pub fn search_images(&self, query: &ImageQuery) -> Result<Vec<ImageRecord>> {
        let conn = self.lock_conn()?;

        let mut sql = format!("SELECT {} FROM images WHERE 1=1", RECORD_COLUMNS);
        let mut values: Vec<Value> = Vec::new();

        if let Some(category) = non_empty(&query.category) {
            sql.push_str(" AND category = ?");
            values.push(Value::Text(category.to_string()));
        }

        if let Some(text) = non_empty(&query.search_query) {
            sql.push_str(
                r#" AND (fold_case(filename) LIKE ? ESCAPE '\'
                    OR EXISTS (SELECT 1 FROM image_tags t
                               WHERE t.image_id = images.id
                                 AND fold_case(t.tag) LIKE ? ESCAPE '\'))"#,
            );
            let pattern = format!("%{}%", escape_like(&text.to_lowercase()));
            values.push(Value::Text(pattern.clone()));
            values.push(Value::Text(pattern));
        }

        if let Some(machine) = non_empty(&query.machine_name) {
            sql.push_str(" AND machine_name = ?");
            values.push(Value::Text(machine.to_string()));
        }

        if let Some(min_width) = query.min_width.filter(|w| *w > 0) {
            sql.push_str(" AND width >= ?");
            values.push(Value::Integer(i64::from(min_width)));
        }

        if let Some(min_height) = query.min_height.filter(|h| *h > 0) {
            sql.push_str(" AND height >= ?");
            values.push(Value::Integer(i64::from(min_height)));
        }

        // LIMIT -1 is unbounded in SQLite
        sql.push_str(" ORDER BY id ASC LIMIT ?");
        values.push(Value::Integer(query.limit.map(|l| l as i64).unwrap_or(-1)));

        let mut stmt = conn.prepare(&sql)?;
        let mut records = stmt
            .query_map(params_from_iter(values.iter()), row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for record in &mut records {
            load_tags(&conn, record)?;
        }
        Ok(records)
    }

    /// Fetch a single record by id
    pub fn get_image(&self, id: i64) -> Result<Option<ImageRecord>> {
        let conn = self.lock_conn()?;
        let sql = format!("SELECT {} FROM images WHERE id = ?1", RECORD_COLUMNS);
        let record = conn.query_row(&sql, params![id], row_to_record).optional()?;
        match record {
            Some(mut record) => {
                load_tags(&conn, &mut record)?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Distinct non-empty categories in the store
    pub fn get_categories(&self) -> Result<Vec<String>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT category FROM images WHERE category != '' ORDER BY category",
        )?;
        let categories = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(categories)
    }

    /// Distinct non-empty machine names in the store
    pub fn get_machine_names(&self) -> Result<Vec<String>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT machine_name FROM images
             WHERE machine_name != '' ORDER BY machine_name",
        )?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }

    pub fn get_image_count(&self) -> Result<i64> {
        let conn = self.lock_conn()?;
        conn.query_row("SELECT COUNT(*) FROM images", [], |row| row.get(0))
            .map_err(Into::into)
    }

    /// Get library statistics
    pub fn get_stats(&self) -> Result<LibraryStats> {
        let conn = self.lock_conn()?;
        let total_images: i64 =
            conn.query_row("SELECT COUNT(*) FROM images", [], |row| row.get(0))?;
        let tag_count: i64 =
            conn.query_row("SELECT COUNT(DISTINCT tag) FROM image_tags", [], |row| row.get(0))?;

        let grouped = |column: &str| -> Result<Vec<(String, i64)>> {
            let sql = format!(
                "SELECT CASE WHEN {col} = '' THEN 'uncategorized' ELSE {col} END, COUNT(*)
                 FROM images GROUP BY {col} ORDER BY COUNT(*) DESC, {col}",
                col = column
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        };
        let categories = grouped("category")?;
        let sources = grouped("source")?;

        let mut stmt = conn.prepare(
            "SELECT id, filename, filepath, category, source FROM images ORDER BY id LIMIT 5",
        )?;
        let sample_images = stmt
            .query_map([], |row| {
                let path: String = row.get(2)?;
                Ok(SampleImage {
                    id: row.get(0)?,
                    filename: row.get(1)?,
                    file_exists: Path::new(&path).is_file(),
                    path,
                    category: row.get(3)?,
                    source: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(LibraryStats { total_images, tag_count, categories, sources, sample_images })
    }

    /// Vacuum database
    pub fn vacuum(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute("VACUUM", [])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_image(path: &str, category: &str, tags: &[&str], width: u32, height: u32) -> NewImage {
        NewImage {
            path: path.to_string(),
            category: category.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            source: "pixabay".to_string(),
            machine_name: "studio".to_string(),
            width,
            height,
            file_size: 1024,
        }
    }

    #[test]
    fn test_insert_and_get_keeps_tag_order() {
        let db = Database::in_memory().unwrap();
        let record = db
            .insert_image(&new_image(
                "/lib/forest.jpg",
                "nature",
                &["trees", "moss", "fog"],
                1920,
                1080,
            ))
            .unwrap();

        assert_eq!(record.filename, "forest.jpg");
        let fetched = db.get_image(record.id).unwrap().unwrap();
        assert_eq!(fetched.tags, vec!["trees", "moss", "fog"]);
        assert_eq!(fetched.width, 1920);
        assert!(db.get_image(record.id + 100).unwrap().is_none());
    }

    #[test]
    fn test_duplicate_path_rejected() {
        let db = Database::in_memory().unwrap();
        db.insert_image(&new_image("/lib/a.jpg", "nature", &[], 10, 10)).unwrap();
        let err = db.insert_image(&new_image("/lib/a.jpg", "food", &[], 10, 10)).unwrap_err();
        assert!(matches!(err, StockpileError::Duplicate(_)));
        assert_eq!(db.get_image_count().unwrap(), 1);
    }

    #[test]
    fn test_category_and_min_width() {
        let db = Database::in_memory().unwrap();
        db.insert_image(&new_image("/lib/wide.jpg", "nature", &[], 1920, 1080)).unwrap();
        db.insert_image(&new_image("/lib/narrow.jpg", "nature", &[], 1024, 768)).unwrap();

        let query = ImageQuery::default().category("nature").min_size(1920, 0);
        let results = db.search_images(&query).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].filename, "wide.jpg");
    }

    #[test]
    fn test_search_text_is_case_insensitive_over_filename_and_tags() {
        let db = Database::in_memory().unwrap();
        db.insert_image(&new_image("/lib/Mountain_Lake.jpg", "nature", &[], 100, 100)).unwrap();
        let tags = ["SnowCapped", "mountain"];
        db.insert_image(&new_image("/lib/img_002.jpg", "nature", &tags, 100, 100)).unwrap();
        db.insert_image(&new_image("/lib/city.jpg", "cityscapes", &["night"], 100, 100)).unwrap();

        let results = db.search_images(&ImageQuery::default().search("MOUNTAIN")).unwrap();
        let names: Vec<_> = results.iter().map(|r| r.filename.as_str()).collect();
        assert_eq!(names, vec!["Mountain_Lake.jpg", "img_002.jpg"]);
    }

    #[test]
    fn test_search_folds_non_ascii_case() {
        let db = Database::in_memory().unwrap();
        let tags = ["café", "morning"];
        db.insert_image(&new_image("/lib/terrace.jpg", "food", &tags, 100, 100)).unwrap();
        db.insert_image(&new_image("/lib/ÜBERSICHT.jpg", "travel", &[], 100, 100)).unwrap();

        assert_eq!(db.search_images(&ImageQuery::default().search("CAFÉ")).unwrap().len(), 1);
        let results = db.search_images(&ImageQuery::default().search("übersicht")).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].filename, "ÜBERSICHT.jpg");
    }

    #[test]
    fn test_like_wildcards_are_literal() {
        let db = Database::in_memory().unwrap();
        db.insert_image(&new_image("/lib/100%_real.jpg", "art", &[], 10, 10)).unwrap();
        db.insert_image(&new_image("/lib/plain.jpg", "art", &[], 10, 10)).unwrap();

        assert_eq!(db.search_images(&ImageQuery::default().search("%")).unwrap().len(), 1);
        assert_eq!(db.search_images(&ImageQuery::default().search("_")).unwrap().len(), 1);
    }

    #[test]
    fn test_empty_filters_are_wildcards() {
        let db = Database::in_memory().unwrap();
        db.insert_image(&new_image("/lib/a.jpg", "nature", &[], 10, 10)).unwrap();
        db.insert_image(&new_image("/lib/b.jpg", "food", &[], 10, 10)).unwrap();

        let query = ImageQuery {
            category: Some(String::new()),
            search_query: Some("   ".to_string()),
            machine_name: Some(String::new()),
            min_width: Some(0),
            min_height: Some(0),
            limit: None,
        };
        assert_eq!(db.search_images(&query).unwrap().len(), 2);
    }

    #[test]
    fn test_combined_query_equals_intersection() {
        let db = Database::in_memory().unwrap();
        let fixtures = [
            ("/lib/fox_1.jpg", "animals", vec!["fox", "snow"], 2000, 1200),
            ("/lib/fox_2.jpg", "animals", vec!["fox"], 800, 600),
            ("/lib/snow.jpg", "nature", vec!["snow"], 2400, 1600),
            ("/lib/owl.jpg", "animals", vec!["bird"], 2200, 1400),
            ("/lib/fox_den.jpg", "nature", vec![], 3000, 2000),
        ];
        for (path, category, tags, w, h) in &fixtures {
            let tags: Vec<&str> = tags.to_vec();
            db.insert_image(&new_image(path, category, &tags, *w, *h)).unwrap();
        }

        let ids = |q: ImageQuery| -> Vec<i64> {
            db.search_images(&q).unwrap().into_iter().map(|r| r.id).collect()
        };

        let by_category = ids(ImageQuery::default().category("animals"));
        let by_text = ids(ImageQuery::default().search("fox"));
        let by_width = ids(ImageQuery::default().min_size(1920, 0));
        let combined = ids(
            ImageQuery::default()
                .category("animals")
                .search("fox")
                .min_size(1920, 0),
        );

        let intersection: Vec<i64> = by_category
            .iter()
            .copied()
            .filter(|id| by_text.contains(id) && by_width.contains(id))
            .collect();
        assert_eq!(combined, intersection);
        assert_eq!(combined.len(), 1);
    }

    #[test]
    fn test_limit_caps_rows_in_insertion_order() {
        let db = Database::in_memory().unwrap();
        for i in 0..5 {
            db.insert_image(&new_image(&format!("/lib/{}.jpg", i), "art", &[], 10, 10)).unwrap();
        }
        let results = db.search_images(&ImageQuery::default().limit(3)).unwrap();
        let names: Vec<_> = results.iter().map(|r| r.filename.as_str()).collect();
        assert_eq!(names, vec!["0.jpg", "1.jpg", "2.jpg"]);
    }

    #[test]
    fn test_stats_groups_categories_and_sources() {
        let db = Database::in_memory().unwrap();
        db.insert_image(&new_image("/lib/a.jpg", "nature", &["x"], 10, 10)).unwrap();
        db.insert_image(&new_image("/lib/b.jpg", "nature", &["x", "y"], 10, 10)).unwrap();
        db.insert_image(&new_image("/lib/c.jpg", "", &[], 10, 10)).unwrap();

        let stats = db.get_stats().unwrap();
        assert_eq!(stats.total_images, 3);
        assert_eq!(stats.tag_count, 2);
        assert_eq!(stats.categories[0], ("nature".to_string(), 2));
        assert!(stats.categories.contains(&("uncategorized".to_string(), 1)));
        assert_eq!(stats.sources, vec![("pixabay".to_string(), 3)]);
        assert_eq!(stats.sample_images.len(), 3);
        assert!(!stats.sample_images[0].file_exists);
    }
}

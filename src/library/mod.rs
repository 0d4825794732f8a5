// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Image library: populate, search and selection on top of the database

pub mod import;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::config::LibraryConfig;
use crate::db::{Database, ImageQuery, ImageRecord, LibraryStats, NewImage};
use crate::{Result, StockpileError};

pub use import::{import_batch, import_json_file, ImportEntry, ImportFailure, ImportReport};

/// Source label used for images added by hand
pub const MANUAL_SOURCE: &str = "manual";

/// Optional metadata supplied when adding an image
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageMeta {
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub source: Option<String>,
    pub machine_name: Option<String>,
}

/// How a filtered match set is reduced to at most N images
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SelectionMode {
    /// The first N matches in insertion order
    First,
    /// N distinct matches drawn with a seeded generator
    Random { seed: u64 },
    /// Every match, capped at N
    All,
    /// The single match at `index`, wrapping around the match count
    Index { index: usize },
}

impl SelectionMode {
    /// Build a mode from the flat name/seed/index triple the nodes and the
    /// HTTP query string use.
    pub fn from_parts(name: &str, seed: Option<u64>, index: Option<usize>) -> Result<Self> {
        match name.trim().to_lowercase().as_str() {
            "" | "first" => Ok(Self::First),
            "all" => Ok(Self::All),
            "random" => Ok(Self::Random { seed: seed.unwrap_or_else(rand::random) }),
            "index" => Ok(Self::Index { index: index.unwrap_or(0) }),
            other => Err(StockpileError::Validation(format!("Unknown selection mode: {}", other))),
        }
    }
}

/// Reduce a match set according to the selection mode. An empty match set
/// always yields an empty selection.
pub fn select(matches: Vec<ImageRecord>, mode: SelectionMode, count: usize) -> Vec<ImageRecord> {
    match mode {
        SelectionMode::First | SelectionMode::All => matches.into_iter().take(count).collect(),
        SelectionMode::Random { seed } => {
            let amount = count.min(matches.len());
            let mut rng = StdRng::seed_from_u64(seed);
            let picked = rand::seq::index::sample(&mut rng, matches.len(), amount);
            let mut slots: Vec<Option<ImageRecord>> = matches.into_iter().map(Some).collect();
            picked.into_iter().filter_map(|i| slots[i].take()).collect()
        }
        SelectionMode::Index { index } => {
            if matches.is_empty() || count == 0 {
                return Vec::new();
            }
            let actual = index % matches.len();
            debug!("Index selection: {} (requested {}, total {})", actual, index, matches.len());
            matches.into_iter().nth(actual).into_iter().collect()
        }
    }
}

/// Keep the records whose file is still on disk
pub fn existing_files(records: Vec<ImageRecord>) -> Vec<ImageRecord> {
    records
        .into_iter()
        .filter(|record| {
            let exists = record.file_exists();
            if !exists {
                warn!("Image file not found: {}", record.path);
            }
            exists
        })
        .collect()
}

/// Hostname of this machine, used as the default machine name
pub fn local_machine_name() -> String {
    for var in ["HOSTNAME", "COMPUTERNAME"] {
        if let Ok(name) = std::env::var(var) {
            if !name.trim().is_empty() {
                return name.trim().to_string();
            }
        }
    }
    std::fs::read_to_string("/etc/hostname")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

/// The image library
#[derive(Clone)]
pub struct Library {
    db: Database,
    default_categories: Vec<String>,
}

impl Library {
    pub fn new(db: Database, default_categories: Vec<String>) -> Self {
        Self { db, default_categories }
    }

    /// Open the library described by the config
    pub fn open(config: &LibraryConfig) -> Result<Self> {
        let db = Database::open(&config.path)?;
        Ok(Self::new(db, config.default_categories.clone()))
    }

    /// Open an in-memory library with the default vocabulary (for testing)
    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(Database::in_memory()?, LibraryConfig::default().default_categories))
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Add an image file. Dimensions are read from the image header; the
    /// machine name defaults to this host.
    pub fn add_image(&self, path: &Path, meta: ImageMeta) -> Result<ImageRecord> {
        if !path.is_file() {
            return Err(StockpileError::NotFound(format!(
                "Image file not found: {}",
                path.display()
            )));
        }

        let path = path.canonicalize()?;
        let (width, height) = image::image_dimensions(&path)?;
        let file_size = std::fs::metadata(&path)?.len() as i64;

        let image = NewImage {
            path: path.to_string_lossy().to_string(),
            category: meta.category.unwrap_or_default().trim().to_string(),
            tags: meta
                .tags
                .into_iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
            source: meta
                .source
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| MANUAL_SOURCE.to_string()),
            machine_name: meta
                .machine_name
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(local_machine_name),
            width,
            height,
            file_size,
        };

        let record = self.db.insert_image(&image)?;
        info!("Added to library: {} ({}x{}, {})", record.filename, width, height, record.source);
        Ok(record)
    }

    /// Filtered search, in insertion order
    pub fn search(&self, query: &ImageQuery) -> Result<Vec<ImageRecord>> {
        self.db.search_images(query)
    }

    /// Search then reduce the match set to at most `count` records
    pub fn find(
        &self,
        query: &ImageQuery,
        mode: SelectionMode,
        count: usize,
    ) -> Result<Vec<ImageRecord>> {
        let matches = self.search(query)?;
        debug!("{} images match, selecting up to {} with {:?}", matches.len(), count, mode);
        Ok(select(matches, mode, count))
    }

    pub fn get(&self, id: i64) -> Result<Option<ImageRecord>> {
        self.db.get_image(id)
    }

    /// Stored categories merged with the default vocabulary
    pub fn categories(&self) -> Result<Vec<String>> {
        let mut categories = self.db.get_categories()?;
        categories.extend(self.default_categories.iter().cloned());
        categories.sort();
        categories.dedup();
        Ok(categories)
    }

    /// This host's name plus every machine name seen in the store
    pub fn machine_names(&self) -> Result<Vec<String>> {
        let mut names = self.db.get_machine_names()?;
        names.push(local_machine_name());
        names.sort();
        names.dedup();
        Ok(names)
    }

    pub fn stats(&self) -> Result<LibraryStats> {
        self.db.get_stats()
    }
}

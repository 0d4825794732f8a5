// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Configuration management for Stockpile

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Categories offered when the library has none of its own
pub const DEFAULT_CATEGORIES: &[&str] = &[
    "nature", "animals", "people", "architecture", "technology",
    "abstract", "business", "food", "travel", "sports",
    "art", "music", "science", "health", "education",
    "fashion", "vehicles", "landscapes", "cityscapes", "wildlife",
];

/// Main application configuration
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AppConfig {
    /// Image library settings
    #[serde(default)]
    pub library: LibraryConfig,

    /// Web control surface settings
    #[serde(default)]
    pub web: WebConfig,

    /// Scrape run tuning
    #[serde(default)]
    pub scraper: ScraperConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LibraryConfig {
    /// SQLite database file
    #[serde(default = "default_db_path")]
    pub path: String,
    /// Where scrape sessions save downloaded images
    #[serde(default = "default_download_dir")]
    pub download_dir: String,
    /// Vocabulary merged into the category listing
    #[serde(default = "default_categories")]
    pub default_categories: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WebConfig {
    #[serde(default = "default_web_host")]
    pub host: String,
    #[serde(default = "default_web_port")]
    pub port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ScraperConfig {
    /// Per-request timeout against the image sources
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Retries after an HTTP 429 before giving up on a page
    #[serde(default = "default_retries")]
    pub max_retries: u32,
    /// Pages tried per image before recording it as not found
    #[serde(default = "default_page_attempts")]
    pub page_attempts: u32,
    #[serde(default = "default_page_delay")]
    pub page_delay_ms: u64,
    /// Pause after each downloaded image
    #[serde(default = "default_request_delay")]
    pub request_delay_ms: u64,
}

// Default value functions
fn default_db_path() -> String { "image_library/library.db".to_string() }
fn default_download_dir() -> String { "image_library/scraped_images".to_string() }
fn default_categories() -> Vec<String> {
    DEFAULT_CATEGORIES.iter().map(|c| c.to_string()).collect()
}
fn default_web_host() -> String { "127.0.0.1".to_string() }
fn default_web_port() -> u16 { 8188 }
fn default_timeout() -> u64 { 10 }
fn default_retries() -> u32 { 3 }
fn default_page_attempts() -> u32 { 10 }
fn default_page_delay() -> u64 { 200 }
fn default_request_delay() -> u64 { 500 }

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            download_dir: default_download_dir(),
            default_categories: default_categories(),
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: default_web_host(),
            port: default_web_port(),
        }
    }
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
            max_retries: default_retries(),
            page_attempts: default_page_attempts(),
            page_delay_ms: default_page_delay(),
            request_delay_ms: default_request_delay(),
        }
    }
}

impl LibraryConfig {
    pub fn download_dir(&self) -> PathBuf {
        PathBuf::from(&self.download_dir)
    }
}

impl AppConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> crate::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = serde_json::from_str(&content).map_err(|e| {
                crate::StockpileError::Config(format!("Failed to parse config: {}", e))
            })?;
            Ok(config)
        } else {
            tracing::info!("Config file not found at {:?}, using defaults", path);
            Ok(Self::default())
        }
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> crate::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Stockpile: local scraped-image library and frame tools
//!
//! Keeps a SQLite catalogue of images pulled from stock-photo sites, runs
//! scrape sessions that feed it, and exposes graph nodes for loading library
//! images and blending, stitching and looping frame batches.

pub mod config;
pub mod db;
pub mod error;
pub mod library;
pub mod nodes;
pub mod scraper;
pub mod video;
pub mod web;

pub use config::AppConfig;
pub use error::{StockpileError, Result};

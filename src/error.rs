// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Error types for Stockpile

use thiserror::Error;

/// Result type alias for Stockpile operations
pub type Result<T> = std::result::Result<T, StockpileError>;

/// Stockpile error types
#[derive(Error, Debug)]
pub enum StockpileError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File system error: {0}")]
    FileSystem(#[from] std::io::Error),

    #[error("API error: {0}")]
    Api(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already in library: {0}")]
    Duplicate(String),

    #[error("Image source error: {0}")]
    Source(String),

    #[error("Blend error: {0}")]
    Blend(String),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl StockpileError {
    /// True for failures the caller caused (bad input or unknown ids)
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::NotFound(_) | Self::Duplicate(_))
    }
}

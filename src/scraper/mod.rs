// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Scrape sessions: request validation, lifecycle and progress tracking

mod run;
pub mod sources;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{AppConfig, ScraperConfig};
use crate::library::Library;
use crate::{Result, StockpileError};

pub use sources::{ImageSource, SourceImage, SourceKind};

/// Orientation constraint on downloaded images
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AspectRatio {
    #[default]
    Any,
    Landscape,
    Portrait,
    Square,
}

impl AspectRatio {
    /// Square allows 10% slack either way
    pub fn matches(self, width: u32, height: u32) -> bool {
        match self {
            AspectRatio::Any => true,
            AspectRatio::Landscape => width > height,
            AspectRatio::Portrait => height > width,
            AspectRatio::Square => {
                let ratio = width as f64 / height.max(1) as f64;
                (0.9..=1.1).contains(&ratio)
            }
        }
    }
}

fn default_source() -> String { "freepik".to_string() }
fn default_category() -> String { "nature".to_string() }
fn default_min_width() -> u32 { 1920 }
fn default_min_height() -> u32 { 1080 }
fn default_max_images() -> u32 { 10 }
fn default_true() -> bool { true }

/// Upper bound on images per session
pub const MAX_IMAGES_PER_SESSION: u32 = 500;

/// Parameters of one scrape run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeRequest {
    #[serde(default)]
    pub query: String,
    #[serde(default = "default_source")]
    pub source: String,
    /// Never echoed back in session snapshots
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_min_width")]
    pub min_width: u32,
    #[serde(default = "default_min_height")]
    pub min_height: u32,
    #[serde(default)]
    pub aspect_ratio: AspectRatio,
    #[serde(default = "default_max_images")]
    pub max_images: u32,
    #[serde(default = "default_true")]
    pub exclude_ai: bool,
    #[serde(default = "default_true")]
    pub photos_only: bool,
}

impl Default for ScrapeRequest {
    fn default() -> Self {
        Self {
            query: String::new(),
            source: default_source(),
            api_key: String::new(),
            category: default_category(),
            tags: Vec::new(),
            min_width: default_min_width(),
            min_height: default_min_height(),
            aspect_ratio: AspectRatio::Any,
            max_images: default_max_images(),
            exclude_ai: true,
            photos_only: true,
        }
    }
}

impl ScrapeRequest {
    /// Reject requests that could never produce a session
    pub fn validate(&self) -> Result<SourceKind> {
        if self.query.trim().is_empty() {
            return Err(StockpileError::Validation("Search query is required".to_string()));
        }
        if self.api_key.trim().is_empty() {
            return Err(StockpileError::Validation("API key is required".to_string()));
        }
        if self.max_images == 0 || self.max_images > MAX_IMAGES_PER_SESSION {
            return Err(StockpileError::Validation(format!(
                "max_images must be between 1 and {}",
                MAX_IMAGES_PER_SESSION
            )));
        }
        self.source.parse()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Running,
    Completed,
    Error,
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Error | SessionStatus::Cancelled)
    }
}

/// Snapshot of a scrape session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeSession {
    pub id: String,
    pub status: SessionStatus,
    pub progress: u8,
    pub current_step: String,
    pub scraped_images: u32,
    pub total_images: u32,
    pub errors: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub request: ScrapeRequest,
}

impl ScrapeSession {
    fn new(request: ScrapeRequest) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            status: SessionStatus::Pending,
            progress: 0,
            current_step: "Initializing...".to_string(),
            scraped_images: 0,
            total_images: request.max_images,
            errors: Vec::new(),
            created_at: Utc::now(),
            finished_at: None,
            request,
        }
    }

    fn finish(&mut self, status: SessionStatus, step: String) {
        self.status = status;
        self.current_step = step;
        self.finished_at = Some(Utc::now());
    }
}

/// Owns every session of the process and spawns their scrape tasks
#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<Mutex<HashMap<String, ScrapeSession>>>,
    library: Library,
    config: ScraperConfig,
    download_dir: PathBuf,
    http: sources::HttpContext,
}

impl SessionManager {
    pub fn new(library: Library, config: &AppConfig) -> Result<Self> {
        let http = sources::HttpContext::new(
            Duration::from_secs(config.scraper.timeout_secs),
            config.scraper.max_retries,
        )?;
        Ok(Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            library,
            config: config.scraper.clone(),
            download_dir: config.library.download_dir(),
            http,
        })
    }

    pub fn library(&self) -> &Library {
        &self.library
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ScrapeSession>> {
        // A panicking scrape task must not take the whole map down with it
        self.sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Validate the request, register a pending session and spawn its task
    pub fn start(&self, request: ScrapeRequest) -> Result<String> {
        request.validate()?;
        let source = sources::build_source(&request, self.http.clone())?;
        Ok(self.start_with_source(request, Arc::from(source)))
    }

    /// Start a session against an explicit source
    pub fn start_with_source(
        &self,
        request: ScrapeRequest,
        source: Arc<dyn ImageSource>,
    ) -> String {
        let session = ScrapeSession::new(request.clone());
        let id = session.id.clone();
        self.lock().insert(id.clone(), session);
        info!("Scrape session {} created: '{}' from {}", id, request.query, source.name());

        tokio::spawn(run::run_session(self.clone(), id.clone(), request, source));
        id
    }

    /// Cancel a pending or running session; terminal sessions are left as they are
    pub fn cancel(&self, id: &str) -> Result<ScrapeSession> {
        let mut sessions = self.lock();
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| StockpileError::NotFound(format!("Session not found: {}", id)))?;
        if session.status.is_terminal() {
            debug!("Session {} already {:?}, cancel ignored", id, session.status);
        } else {
            session.finish(SessionStatus::Cancelled, "Cancelled".to_string());
            info!("Scrape session {} cancelled", id);
        }
        Ok(session.clone())
    }

    pub fn status(&self, id: &str) -> Result<ScrapeSession> {
        self.lock()
            .get(id)
            .cloned()
            .ok_or_else(|| StockpileError::NotFound(format!("Session not found: {}", id)))
    }

    /// Every session, newest first
    pub fn list(&self) -> Vec<ScrapeSession> {
        let mut sessions: Vec<ScrapeSession> = self.lock().values().cloned().collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        sessions
    }

    fn update(&self, id: &str, f: impl FnOnce(&mut ScrapeSession)) {
        match self.lock().get_mut(id) {
            Some(session) => f(session),
            None => warn!("Update for unknown session {}", id),
        }
    }

    pub(crate) fn is_cancelled(&self, id: &str) -> bool {
        self.lock().get(id).map_or(true, |s| s.status == SessionStatus::Cancelled)
    }

    pub(crate) fn mark_running(&self, id: &str) {
        self.update(id, |s| {
            if s.status == SessionStatus::Pending {
                s.status = SessionStatus::Running;
            }
        });
    }

    /// Progress only moves forward, and only while running
    pub(crate) fn set_progress(&self, id: &str, progress: u8, step: String) {
        self.update(id, |s| {
            if s.status == SessionStatus::Running {
                s.progress = s.progress.max(progress.min(100));
                s.current_step = step;
            }
        });
    }

    pub(crate) fn record_scraped(&self, id: &str, scraped: u32) {
        self.update(id, |s| s.scraped_images = scraped);
    }

    pub(crate) fn push_error(&self, id: &str, message: String) {
        self.update(id, |s| s.errors.push(message));
    }

    /// Move a running session to a terminal state unless it already has one
    pub(crate) fn finish(&self, id: &str, status: SessionStatus, step: String) {
        self.update(id, |s| {
            if s.status.is_terminal() {
                return;
            }
            if status == SessionStatus::Completed {
                s.progress = 100;
            }
            s.finish(status, step);
        });
    }

    pub(crate) fn config(&self) -> &ScraperConfig {
        &self.config
    }
}

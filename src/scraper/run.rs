// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Body of a scrape task

use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::sources::{Download, ImageSource, SourceImage};
use super::{AspectRatio, ScrapeRequest, SessionManager, SessionStatus};
use crate::db::ImageRecord;
use crate::library::ImageMeta;
use crate::{Result, StockpileError};

pub(crate) async fn run_session(
    manager: SessionManager,
    id: String,
    request: ScrapeRequest,
    source: Arc<dyn ImageSource>,
) {
    manager.mark_running(&id);
    match scrape(&manager, &id, &request, source.as_ref()).await {
        Ok(scraped) => {
            info!("Scrape session {} finished with {} images", id, scraped);
            let step = format!("Completed! Scraped {} images.", scraped);
            manager.finish(&id, SessionStatus::Completed, step);
        }
        Err(e) => {
            error!("Scrape session {} failed: {}", id, e);
            manager.push_error(&id, e.to_string());
            manager.finish(&id, SessionStatus::Error, format!("Error: {}", e));
        }
    }
}

async fn scrape(
    manager: &SessionManager,
    id: &str,
    request: &ScrapeRequest,
    source: &dyn ImageSource,
) -> Result<u32> {
    tokio::fs::create_dir_all(manager.download_dir()).await?;
    manager.set_progress(id, 10, format!("Connecting to {}...", source.name()));

    let request_delay = Duration::from_millis(manager.config().request_delay_ms);
    let max = request.max_images;
    let mut page = 0u32;
    let mut scraped = 0u32;

    for i in 0..max {
        if manager.is_cancelled(id) {
            info!("Scrape session {} cancelled after {} images", id, scraped);
            break;
        }

        let progress = 10 + (i * 80 / max) as u8;
        manager.set_progress(
            id,
            progress,
            format!("Downloading image {}/{} from {}...", i + 1, max, source.name()),
        );

        let Some(found) = find_next(manager, id, request, source, &mut page).await else {
            if manager.is_cancelled(id) {
                break;
            }
            let message = format!(
                "Image {}: no acceptable image from {} for '{}' after {} pages",
                i + 1,
                source.name(),
                request.query,
                manager.config().page_attempts
            );
            warn!("{}", message);
            manager.push_error(id, message);
            continue;
        };

        match fetch_and_add(manager, request, source, &found, i).await {
            Ok(record) => {
                scraped += 1;
                manager.record_scraped(id, scraped);
                debug!("Image {} saved as {}", i + 1, record.filename);
            }
            Err(e) => {
                warn!("Image {} from {} failed: {}", i + 1, found.url, e);
                manager.push_error(id, format!("Image {}: {}", i + 1, e));
            }
        }

        if !request_delay.is_zero() {
            tokio::time::sleep(request_delay).await;
        }
    }

    Ok(scraped)
}

/// Walk forward through result pages until one yields an image
async fn find_next(
    manager: &SessionManager,
    id: &str,
    request: &ScrapeRequest,
    source: &dyn ImageSource,
    page: &mut u32,
) -> Option<SourceImage> {
    let page_delay = Duration::from_millis(manager.config().page_delay_ms);

    for _ in 0..manager.config().page_attempts {
        if manager.is_cancelled(id) {
            return None;
        }
        let current = *page;
        *page += 1;
        match source.find_image(&request.query, current).await {
            Ok(Some(image)) => return Some(image),
            Ok(None) => debug!("{} page {} had nothing usable", source.name(), current + 1),
            Err(e) => warn!("{} page {} failed: {}", source.name(), current + 1, e),
        }
        if !page_delay.is_zero() {
            tokio::time::sleep(page_delay).await;
        }
    }
    None
}

async fn fetch_and_add(
    manager: &SessionManager,
    request: &ScrapeRequest,
    source: &dyn ImageSource,
    found: &SourceImage,
    index: u32,
) -> Result<ImageRecord> {
    let download = source.download(found).await?;
    if download.bytes.is_empty() {
        return Err(StockpileError::Source("empty download".to_string()));
    }

    let filename = format!(
        "{}_{}_{}_{}{}",
        source.name(),
        safe_query(&request.query),
        Utc::now().timestamp(),
        index,
        extension_for(&download, &found.url)
    );
    let path: PathBuf = manager.download_dir().join(filename);
    tokio::fs::write(&path, &download.bytes).await?;

    let mut tags = request.tags.clone();
    tags.push(request.query.clone());
    tags.push(source.name().to_string());

    let meta = ImageMeta {
        category: Some(request.category.clone()),
        tags,
        source: Some(source.name().to_string()),
        machine_name: None,
    };
    let library = manager.library().clone();
    let (min_width, min_height) = (request.min_width, request.min_height);
    let aspect_ratio = request.aspect_ratio;
    let saved = path.clone();
    let added = tokio::task::spawn_blocking(move || {
        check_dimensions(&saved, min_width, min_height, aspect_ratio)?;
        library.add_image(&saved, meta)
    })
    .await
    .map_err(StockpileError::from)
    .and_then(|result| result);

    if added.is_err() {
        let _ = tokio::fs::remove_file(&path).await;
    }
    added
}

fn check_dimensions(
    path: &std::path::Path,
    min_width: u32,
    min_height: u32,
    aspect_ratio: AspectRatio,
) -> Result<()> {
    let (width, height) = image::image_dimensions(path)?;
    if width < min_width || height < min_height {
        return Err(StockpileError::Validation(format!(
            "{}x{} is below the minimum {}x{}",
            width, height, min_width, min_height
        )));
    }
    if !aspect_ratio.matches(width, height) {
        return Err(StockpileError::Validation(format!(
            "{}x{} does not match aspect ratio {:?}",
            width, height, aspect_ratio
        )));
    }
    Ok(())
}

/// Query text reduced to a filename-safe slug
pub(crate) fn safe_query(query: &str) -> String {
    query
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect()
}

/// File extension from the content type, falling back to the URL path
fn extension_for(download: &Download, url: &str) -> &'static str {
    let content_type = download.content_type.as_deref().unwrap_or("").to_lowercase();
    if content_type.contains("png") {
        return ".png";
    }
    if content_type.contains("webp") {
        return ".webp";
    }
    if content_type.contains("jpeg") || content_type.contains("jpg") {
        return ".jpg";
    }
    let path = url.split(['?', '#']).next().unwrap_or(url).to_lowercase();
    if path.ends_with(".png") {
        ".png"
    } else if path.ends_with(".webp") {
        ".webp"
    } else {
        ".jpg"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::tests::write_png;
    use tempfile::TempDir;

    fn download(content_type: Option<&str>) -> Download {
        Download { bytes: vec![1], content_type: content_type.map(String::from) }
    }

    #[test]
    fn test_safe_query() {
        assert_eq!(safe_query("Misty Forest"), "misty_forest");
        assert_eq!(safe_query(" a/b:c "), "a_b_c");
    }

    #[test]
    fn test_extension_for() {
        assert_eq!(extension_for(&download(Some("image/png")), "https://x/a.jpg"), ".png");
        assert_eq!(extension_for(&download(Some("image/webp")), "https://x/a"), ".webp");
        assert_eq!(extension_for(&download(None), "https://x/a.PNG?w=100"), ".png");
        let opaque = download(Some("application/octet-stream"));
        assert_eq!(extension_for(&opaque, "https://x/a"), ".jpg");
    }

    #[test]
    fn test_check_dimensions() {
        let dir = TempDir::new().unwrap();
        let wide = write_png(dir.path(), "wide.png", 64, 32);

        assert!(check_dimensions(&wide, 64, 32, AspectRatio::Landscape).is_ok());
        assert!(check_dimensions(&wide, 65, 32, AspectRatio::Any).is_err());
        assert!(matches!(
            check_dimensions(&wide, 0, 0, AspectRatio::Portrait),
            Err(StockpileError::Validation(_))
        ));
    }
}

// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Stock-photo sources: Pixabay, Unsplash and Freepik search clients

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{AspectRatio, ScrapeRequest};
use crate::{Result, StockpileError};

/// Supported image sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Pixabay,
    Unsplash,
    Freepik,
}

impl SourceKind {
    pub fn name(self) -> &'static str {
        match self {
            SourceKind::Pixabay => "pixabay",
            SourceKind::Unsplash => "unsplash",
            SourceKind::Freepik => "freepik",
        }
    }
}

impl FromStr for SourceKind {
    type Err = StockpileError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "pixabay" => Ok(SourceKind::Pixabay),
            "unsplash" => Ok(SourceKind::Unsplash),
            "freepik" => Ok(SourceKind::Freepik),
            other => Err(StockpileError::Validation(format!("Unknown source: {}", other))),
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A search hit that can be downloaded
#[derive(Debug, Clone, PartialEq)]
pub struct SourceImage {
    pub url: String,
    pub id: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Raw downloaded bytes
#[derive(Debug, Clone)]
pub struct Download {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// A place images can be searched for and downloaded from
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// Name recorded as the image's source
    fn name(&self) -> &'static str;

    /// Find one image for the query on the zero-based page.
    /// `Ok(None)` means the page held nothing acceptable.
    async fn find_image(&self, query: &str, page: u32) -> Result<Option<SourceImage>>;

    /// Fetch the image bytes
    async fn download(&self, image: &SourceImage) -> Result<Download>;
}

/// Shared HTTP plumbing with 429 backoff
#[derive(Clone)]
pub struct HttpContext {
    client: Client,
    max_retries: u32,
    backoff: Duration,
}

/// Delay before retry number `attempt` (1-based): base, 2*base, 4*base, ...
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base * 2u32.saturating_pow(attempt.saturating_sub(1))
}

impl HttpContext {
    pub fn new(timeout: Duration, max_retries: u32) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self { client, max_retries, backoff: Duration::from_secs(1) })
    }

    /// Base delay of the first 429 retry
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Send a request, retrying on HTTP 429 with exponential backoff
    async fn send(
        &self,
        source: &str,
        build: impl Fn(&Client) -> RequestBuilder,
    ) -> Result<Response> {
        let mut attempt = 0;
        loop {
            let response = build(&self.client).send().await?;
            if response.status() != StatusCode::TOO_MANY_REQUESTS || attempt >= self.max_retries {
                return Ok(response);
            }
            attempt += 1;
            let delay = backoff_delay(self.backoff, attempt);
            warn!("{} rate limited, retrying in {:?} (attempt {})", source, delay, attempt + 1);
            tokio::time::sleep(delay).await;
        }
    }

    /// Send and require a 2xx status
    async fn send_ok(
        &self,
        source: &str,
        build: impl Fn(&Client) -> RequestBuilder,
    ) -> Result<Response> {
        let response = self.send(source, build).await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let hint = match status {
            StatusCode::UNAUTHORIZED => " (check the API key)",
            StatusCode::FORBIDDEN => " (forbidden or rate limit exceeded)",
            StatusCode::TOO_MANY_REQUESTS => " (rate limit reached)",
            _ => "",
        };
        Err(StockpileError::Source(format!("{} returned HTTP {}{}", source, status, hint)))
    }

    async fn download(
        &self,
        source: &str,
        url: &str,
        headers: &[(&str, &str)],
    ) -> Result<Download> {
        let response = self
            .send_ok(source, |client| {
                headers.iter().fold(client.get(url), |req, (k, v)| req.header(*k, *v))
            })
            .await?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let bytes = response.bytes().await?.to_vec();
        Ok(Download { bytes, content_type })
    }
}

fn json_u32(value: &Value, key: &str) -> Option<u32> {
    value.get(key).and_then(Value::as_u64).and_then(|v| u32::try_from(v).ok())
}

fn json_id(value: &Value) -> Option<String> {
    match value.get("id")? {
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// First non-empty string among the given keys
fn first_str(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| value.get(*k).and_then(Value::as_str))
        .find(|s| !s.is_empty())
        .map(String::from)
}

/// Build the source named in a validated request
pub fn build_source(request: &ScrapeRequest, http: HttpContext) -> Result<Box<dyn ImageSource>> {
    let kind: SourceKind = request.source.parse()?;
    let api_key = request.api_key.trim().to_string();
    Ok(match kind {
        SourceKind::Pixabay => Box::new(PixabaySource {
            http,
            api_key,
            min_width: request.min_width,
            min_height: request.min_height,
        }),
        SourceKind::Unsplash => Box::new(UnsplashSource {
            http,
            api_key,
            orientation: request.aspect_ratio.unsplash_orientation(),
        }),
        SourceKind::Freepik => Box::new(FreepikSource {
            http,
            api_key,
            filter: ResourceFilter {
                photos_only: request.photos_only,
                exclude_ai: request.exclude_ai,
            },
        }),
    })
}

// === Pixabay ===

const PIXABAY_API: &str = "https://pixabay.com/api/";

/// Pixabay enforces a minimum page size of 3
const PIXABAY_PER_PAGE: u32 = 3;

pub struct PixabaySource {
    http: HttpContext,
    api_key: String,
    min_width: u32,
    min_height: u32,
}

#[async_trait]
impl ImageSource for PixabaySource {
    fn name(&self) -> &'static str {
        "pixabay"
    }

    async fn find_image(&self, query: &str, page: u32) -> Result<Option<SourceImage>> {
        debug!("Pixabay request: q='{}', page={}", query, page + 1);
        let params = [
            ("key", self.api_key.clone()),
            ("q", query.to_string()),
            ("image_type", "photo".to_string()),
            ("per_page", PIXABAY_PER_PAGE.to_string()),
            ("page", (page + 1).to_string()),
            ("min_width", self.min_width.to_string()),
            ("min_height", self.min_height.to_string()),
        ];
        let response = self
            .http
            .send_ok(self.name(), |client| client.get(PIXABAY_API).query(&params))
            .await?;
        let data: Value = response.json().await?;
        Ok(parse_pixabay(&data))
    }

    async fn download(&self, image: &SourceImage) -> Result<Download> {
        self.http.download(self.name(), &image.url, &[]).await
    }
}

/// Largest available URL of the first hit
pub fn parse_pixabay(data: &Value) -> Option<SourceImage> {
    let hit = data.get("hits")?.as_array()?.first()?;
    let url = first_str(hit, &["largeImageURL", "webformatURL", "previewURL"])?;
    Some(SourceImage {
        url,
        id: json_id(hit),
        width: json_u32(hit, "imageWidth"),
        height: json_u32(hit, "imageHeight"),
    })
}

// === Unsplash ===

const UNSPLASH_API: &str = "https://api.unsplash.com/search/photos";

pub struct UnsplashSource {
    http: HttpContext,
    api_key: String,
    orientation: Option<&'static str>,
}

#[async_trait]
impl ImageSource for UnsplashSource {
    fn name(&self) -> &'static str {
        "unsplash"
    }

    async fn find_image(&self, query: &str, page: u32) -> Result<Option<SourceImage>> {
        debug!("Unsplash request: query='{}', page={}", query, page + 1);
        let mut params = vec![
            ("query", query.to_string()),
            ("page", (page + 1).to_string()),
            ("per_page", "1".to_string()),
        ];
        if let Some(orientation) = self.orientation {
            params.push(("orientation", orientation.to_string()));
        }
        let auth = format!("Client-ID {}", self.api_key);
        let response = self
            .http
            .send_ok(self.name(), |client| {
                client.get(UNSPLASH_API).header("Authorization", &auth).query(&params)
            })
            .await?;
        let data: Value = response.json().await?;
        Ok(parse_unsplash(&data))
    }

    async fn download(&self, image: &SourceImage) -> Result<Download> {
        self.http.download(self.name(), &image.url, &[]).await
    }
}

/// Highest quality URL of the first result: full, then regular, then raw
pub fn parse_unsplash(data: &Value) -> Option<SourceImage> {
    let result = data.get("results")?.as_array()?.first()?;
    let urls = result.get("urls")?;
    let url = first_str(urls, &["full", "regular", "raw"])?;
    Some(SourceImage {
        url,
        id: json_id(result),
        width: json_u32(result, "width"),
        height: json_u32(result, "height"),
    })
}

// === Freepik ===

const FREEPIK_API: &str = "https://api.freepik.com/v1/resources";

/// Client-side filter over Freepik resources
#[derive(Debug, Clone, Copy)]
pub struct ResourceFilter {
    pub photos_only: bool,
    pub exclude_ai: bool,
}

const VECTOR_WORDS: &[&str] = &[
    "vector", "icon", "illustration", "drawing", "cartoon", "animated", "animation",
];
const AI_TITLE_MARKERS: &[&str] = &["ai-generated", "midjourney", "dall-e", "stable diffusion"];

fn has_word(text: &str, word: &str) -> bool {
    text.split(|c: char| !c.is_alphanumeric()).any(|w| w == word)
}

impl ResourceFilter {
    /// Whether a resource passes the photo and AI filters
    pub fn accepts(&self, resource: &Value) -> bool {
        let lower = |v: Option<&Value>| v.and_then(Value::as_str).unwrap_or("").to_lowercase();
        let image_type = lower(resource.pointer("/image/type"));
        let title = lower(resource.get("title"));
        let url = lower(resource.get("url"));
        let filename = lower(resource.get("filename"));

        if self.photos_only {
            if !image_type.is_empty() && image_type != "photo" {
                return false;
            }
            let vector_like = VECTOR_WORDS.iter().any(|w| title.contains(w))
                || filename.contains("gif")
                || url.contains("/free-vector")
                || url.contains("/free-icon");
            if vector_like {
                return false;
            }
        }

        if self.exclude_ai {
            let author = lower(resource.pointer("/author/name"));
            let author_slug = lower(resource.pointer("/author/slug"));
            let ai_title = has_word(&title, "ai")
                || AI_TITLE_MARKERS.iter().any(|m| title.contains(m))
                || (title.contains("generated")
                    && ["artificial", "machine"].iter().any(|w| title.contains(w)));
            let ai_url = url.contains("ai-generated")
                || url.contains("/ai-")
                || url.contains("ai-image")
                || filename.contains("ai-generated");
            let ai_author = has_word(&author, "ai")
                || author.contains("generator")
                || has_word(&author_slug, "ai");
            if ai_title || ai_url || ai_author {
                return false;
            }
        }

        true
    }
}

/// Pick a download URL from the `/download` response
fn freepik_download_url(data: &Value) -> Option<String> {
    match data.get("data")? {
        Value::Array(items) => {
            items.first().and_then(|item| first_str(item, &["url", "signed_url"]))
        }
        item => first_str(item, &["url", "signed_url", "download_url", "high_res_url"]),
    }
}

/// Fallback URL carried on the search resource itself
fn freepik_preview_url(resource: &Value) -> Option<String> {
    resource
        .pointer("/image/source/url")
        .and_then(Value::as_str)
        .map(String::from)
        .or_else(|| first_str(resource, &["image_url", "preview_url", "thumbnail_url"]))
}

pub struct FreepikSource {
    http: HttpContext,
    api_key: String,
    filter: ResourceFilter,
}

#[async_trait]
impl ImageSource for FreepikSource {
    fn name(&self) -> &'static str {
        "freepik"
    }

    async fn find_image(&self, query: &str, page: u32) -> Result<Option<SourceImage>> {
        debug!("Freepik request: term='{}', page={}", query, page + 1);
        let params = [
            ("term", query.to_string()),
            ("page", (page + 1).to_string()),
            ("limit", "1".to_string()),
            ("order", "relevance".to_string()),
        ];
        let response = self
            .http
            .send_ok(self.name(), |client| {
                client.get(FREEPIK_API).header("x-freepik-api-key", &self.api_key).query(&params)
            })
            .await?;
        let data: Value = response.json().await?;
        let resources = data.get("data").and_then(Value::as_array).cloned().unwrap_or_default();

        let accepted: Vec<&Value> = resources.iter().filter(|r| self.filter.accepts(r)).collect();
        info!(
            "Freepik page {}: {} resources, {} accepted (photos_only={}, exclude_ai={})",
            page + 1,
            resources.len(),
            accepted.len(),
            self.filter.photos_only,
            self.filter.exclude_ai
        );
        let Some(resource) = accepted.first() else {
            return Ok(None);
        };

        if let Some(id) = json_id(resource) {
            let download_api = format!("{}/{}/download", FREEPIK_API, id);
            let response = self
                .http
                .send(self.name(), |client| {
                    client.get(&download_api).header("x-freepik-api-key", &self.api_key)
                })
                .await?;
            match response.status() {
                status if status.is_success() => {
                    let data: Value = response.json().await?;
                    if let Some(url) = freepik_download_url(&data) {
                        let image = SourceImage { url, id: Some(id), width: None, height: None };
                        return Ok(Some(image));
                    }
                    warn!("Freepik download response for {} had no URL", id);
                }
                StatusCode::PAYMENT_REQUIRED => {
                    warn!("Freepik download of {} needs a premium plan, using preview", id)
                }
                StatusCode::FORBIDDEN => warn!("Freepik key cannot download {}, using preview", id),
                status => warn!("Freepik download request for {} failed: HTTP {}", id, status),
            }
        }

        Ok(freepik_preview_url(resource).map(|url| SourceImage {
            url,
            id: json_id(resource),
            width: None,
            height: None,
        }))
    }

    async fn download(&self, image: &SourceImage) -> Result<Download> {
        let headers = [
            ("User-Agent", "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36"),
            ("Referer", "https://www.freepik.com/"),
        ];
        self.http.download(self.name(), &image.url, &headers).await
    }
}

impl AspectRatio {
    fn unsplash_orientation(self) -> Option<&'static str> {
        match self {
            AspectRatio::Any => None,
            AspectRatio::Landscape => Some("landscape"),
            AspectRatio::Portrait => Some("portrait"),
            AspectRatio::Square => Some("squarish"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// Local server answering `status` to the first `failures` hits, then 200
    async fn flaky_server(failures: u32, status: u16) -> (String, Arc<AtomicU32>) {
        let hits = Arc::new(AtomicU32::new(0));
        let counter = hits.clone();
        let status = axum::http::StatusCode::from_u16(status).unwrap();
        let app = axum::Router::new().route(
            "/",
            axum::routing::get(move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < failures {
                        (status, "busy")
                    } else {
                        (axum::http::StatusCode::OK, "ok")
                    }
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        (format!("http://{}/", addr), hits)
    }

    fn http(max_retries: u32) -> HttpContext {
        HttpContext::new(Duration::from_secs(5), max_retries)
            .unwrap()
            .with_backoff(Duration::from_millis(5))
    }

    #[tokio::test]
    async fn test_send_retries_rate_limit_until_success() {
        let (url, hits) = flaky_server(2, 429).await;
        let response = http(3).send("stub", |client| client.get(&url)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_send_gives_up_after_max_retries() {
        let (url, hits) = flaky_server(u32::MAX, 429).await;
        let ctx = http(2);
        let response = ctx.send("stub", |client| client.get(&url)).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(hits.load(Ordering::SeqCst), 3);

        let err = ctx.send_ok("stub", |client| client.get(&url)).await.unwrap_err();
        assert!(matches!(err, StockpileError::Source(ref m) if m.contains("rate limit")));
    }

    #[tokio::test]
    async fn test_send_returns_other_failures_unchanged() {
        let (url, hits) = flaky_server(1, 500).await;
        let response = http(3).send("stub", |client| client.get(&url)).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_source_names() {
        assert_eq!("Pixabay".parse::<SourceKind>().unwrap(), SourceKind::Pixabay);
        assert_eq!(SourceKind::Freepik.to_string(), "freepik");
        assert!("gettyimages".parse::<SourceKind>().is_err());
    }

    #[test]
    fn test_backoff_doubles() {
        let base = Duration::from_secs(1);
        assert_eq!(backoff_delay(base, 1), Duration::from_secs(1));
        assert_eq!(backoff_delay(base, 2), Duration::from_secs(2));
        assert_eq!(backoff_delay(base, 4), Duration::from_secs(8));
    }

    #[test]
    fn test_parse_pixabay_prefers_large() {
        let data = json!({"hits": [{
            "id": 123,
            "largeImageURL": "https://cdn/large.jpg",
            "webformatURL": "https://cdn/web.jpg",
            "imageWidth": 4000,
            "imageHeight": 3000
        }]});
        let image = parse_pixabay(&data).unwrap();
        assert_eq!(image.url, "https://cdn/large.jpg");
        assert_eq!(image.id.as_deref(), Some("123"));
        assert_eq!((image.width, image.height), (Some(4000), Some(3000)));
        assert!(parse_pixabay(&json!({"hits": []})).is_none());
    }

    #[test]
    fn test_parse_unsplash_skips_empty_urls() {
        let data = json!({"total": 1, "results": [{
            "id": "abc",
            "width": 5000,
            "height": 3300,
            "urls": {"raw": "https://u/raw", "full": "", "regular": "https://u/regular"}
        }]});
        let image = parse_unsplash(&data).unwrap();
        assert_eq!(image.url, "https://u/regular");
        assert_eq!(image.id.as_deref(), Some("abc"));
    }

    #[test]
    fn test_freepik_filter_photos_only() {
        let filter = ResourceFilter { photos_only: true, exclude_ai: false };
        assert!(filter.accepts(&json!({"title": "Misty forest", "image": {"type": "photo"}})));
        assert!(filter.accepts(&json!({"title": "Misty forest"})));
        assert!(!filter.accepts(&json!({"title": "Forest", "image": {"type": "vector"}})));
        assert!(!filter.accepts(&json!({"title": "Cartoon forest"})));
        let vector_url = "https://www.freepik.com/free-vector/x";
        assert!(!filter.accepts(&json!({"title": "Forest", "url": vector_url})));
    }

    #[test]
    fn test_freepik_filter_excludes_ai() {
        let filter = ResourceFilter { photos_only: false, exclude_ai: true };
        assert!(!filter.accepts(&json!({"title": "Forest AI generated"})));
        assert!(!filter.accepts(&json!({"title": "Forest by midjourney"})));
        let ai_url = "https://www.freepik.com/ai-image/x";
        assert!(!filter.accepts(&json!({"title": "Forest", "url": ai_url})));
        let generator = json!({"name": "Image Generator"});
        assert!(!filter.accepts(&json!({"title": "Forest", "author": generator})));
        // "ai" only counts as a whole word
        assert!(filter.accepts(&json!({"title": "Mountain trail in Spain"})));

        let off = ResourceFilter { photos_only: false, exclude_ai: false };
        assert!(off.accepts(&json!({"title": "Forest AI generated", "image": {"type": "vector"}})));
    }

    #[test]
    fn test_freepik_url_fallbacks() {
        assert_eq!(
            freepik_download_url(&json!({"data": {"signed_url": "https://f/signed"}})).as_deref(),
            Some("https://f/signed")
        );
        assert_eq!(
            freepik_download_url(&json!({"data": [{"url": "https://f/first"}]})).as_deref(),
            Some("https://f/first")
        );
        assert_eq!(
            freepik_preview_url(&json!({"image": {"source": {"url": "https://f/preview"}}}))
                .as_deref(),
            Some("https://f/preview")
        );
        assert!(freepik_preview_url(&json!({"title": "x"})).is_none());
    }
}

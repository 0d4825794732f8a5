// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! HTTP control surface: scrape sessions, library queries and a dashboard

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::AppConfig;
use crate::db::{ImageQuery, LibraryStats};
use crate::library::import::parse_entries;
use crate::library::{existing_files, import_batch, select, Library, SelectionMode};
use crate::nodes::NodeRegistry;
use crate::scraper::{ScrapeRequest, ScrapeSession, SessionManager};
use crate::{Result, StockpileError};

/// Default number of images returned by the library listing
const DEFAULT_IMAGE_LIMIT: usize = 50;

/// Shared application state
pub struct AppState {
    pub library: Library,
    pub sessions: SessionManager,
    pub nodes: NodeRegistry,
    pub config: AppConfig,
}

impl AppState {
    pub fn new(config: AppConfig, library: Library) -> Result<Self> {
        let sessions = SessionManager::new(library.clone(), &config)?;
        Ok(Self { library, sessions, nodes: NodeRegistry::new(), config })
    }
}

impl IntoResponse for StockpileError {
    fn into_response(self) -> Response {
        let status = match &self {
            StockpileError::NotFound(_) => StatusCode::NOT_FOUND,
            _ if self.is_client_error() => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }
        (status, Json(json!({ "success": false, "error": self.to_string() }))).into_response()
    }
}

type ApiResult = std::result::Result<Json<Value>, StockpileError>;

/// Create the web application router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index_page))
        // Scrape sessions
        .route("/webscraper/start", post(api_start))
        .route("/webscraper/cancel/:session_id", post(api_cancel))
        .route("/webscraper/status/:session_id", get(api_status))
        .route("/webscraper/sessions", get(api_sessions))
        // Library
        .route("/webscraper/library/images", get(api_images))
        .route("/webscraper/library/categories", get(api_categories))
        .route("/webscraper/library/machine_names", get(api_machine_names))
        .route("/webscraper/library/image/:id", get(api_image_file))
        .route("/webscraper/library/debug", get(api_debug))
        .route("/webscraper/library/import", post(api_import))
        // Nodes
        .route("/webscraper/nodes", get(api_nodes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// === Scrape Session Handlers ===

async fn api_start(State(state): State<Arc<AppState>>, body: Bytes) -> ApiResult {
    let request: ScrapeRequest = serde_json::from_slice(&body)
        .map_err(|e| StockpileError::Validation(format!("Malformed request: {}", e)))?;
    let session_id = state.sessions.start(request)?;
    Ok(Json(json!({ "success": true, "session_id": session_id })))
}

async fn api_cancel(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> ApiResult {
    let session = state.sessions.cancel(&session_id)?;
    Ok(Json(json!({ "success": true, "session": session })))
}

async fn api_status(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> ApiResult {
    let session = state.sessions.status(&session_id)?;
    Ok(Json(json!({ "success": true, "session": session })))
}

async fn api_sessions(State(state): State<Arc<AppState>>) -> ApiResult {
    let sessions = state.sessions.list();
    Ok(Json(json!({ "success": true, "count": sessions.len(), "sessions": sessions })))
}

// === Library Handlers ===

/// Query-string filters for the library listing. Numeric fields arrive as
/// text so that an empty field acts as a wildcard.
#[derive(Debug, Default, Deserialize)]
struct ImagesQuery {
    category: Option<String>,
    search_query: Option<String>,
    machine_name: Option<String>,
    min_width: Option<String>,
    min_height: Option<String>,
    limit: Option<String>,
    selection_mode: Option<String>,
    seed: Option<String>,
    index: Option<String>,
}

/// Parse an optional numeric query field; blank means absent
fn parse_field<T: std::str::FromStr>(name: &str, value: Option<&str>) -> Result<Option<T>> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(raw) => raw.parse().map(Some).map_err(|_| {
            StockpileError::Validation(format!("{} must be a number, got '{}'", name, raw))
        }),
    }
}

async fn api_images(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ImagesQuery>,
) -> ApiResult {
    let mode = SelectionMode::from_parts(
        params.selection_mode.as_deref().unwrap_or(""),
        parse_field("seed", params.seed.as_deref())?,
        parse_field("index", params.index.as_deref())?,
    )?;
    let query = ImageQuery {
        category: params.category,
        search_query: params.search_query,
        machine_name: params.machine_name,
        min_width: parse_field("min_width", params.min_width.as_deref())?,
        min_height: parse_field("min_height", params.min_height.as_deref())?,
        limit: None,
    };
    let limit = parse_field("limit", params.limit.as_deref())?.unwrap_or(DEFAULT_IMAGE_LIMIT);
    let library = state.library.clone();
    let images = tokio::task::spawn_blocking(move || -> Result<_> {
        let pool = existing_files(library.search(&query)?);
        Ok(select(pool, mode, limit))
    })
    .await??;
    Ok(Json(json!({ "success": true, "count": images.len(), "images": images })))
}

async fn api_categories(State(state): State<Arc<AppState>>) -> ApiResult {
    Ok(Json(json!({ "success": true, "categories": state.library.categories()? })))
}

async fn api_machine_names(State(state): State<Arc<AppState>>) -> ApiResult {
    Ok(Json(json!({ "success": true, "machine_names": state.library.machine_names()? })))
}

async fn api_image_file(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> std::result::Result<Response, StockpileError> {
    let record = state
        .library
        .get(id)?
        .ok_or_else(|| StockpileError::NotFound(format!("Image {} not in library", id)))?;
    if !record.file_exists() {
        return Err(StockpileError::NotFound(format!("Image file missing: {}", record.path)));
    }
    let bytes = tokio::fs::read(&record.path).await?;
    let mime = mime_guess::from_path(&record.path).first_or_octet_stream();
    Ok(([(header::CONTENT_TYPE, mime.to_string())], bytes).into_response())
}

async fn api_debug(State(state): State<Arc<AppState>>) -> ApiResult {
    let stats = state.library.stats()?;
    let db_path = state.library.db().path().map(|p| p.display().to_string());
    let db_exists = state.library.db().path().is_some_and(|p| p.is_file());
    Ok(Json(json!({
        "success": true,
        "db_path": db_path,
        "db_exists": db_exists,
        "download_dir": state.sessions.download_dir().display().to_string(),
        "total_images": stats.total_images,
        "tag_count": stats.tag_count,
        "categories": stats.categories,
        "sources": stats.sources,
        "sample_images": stats.sample_images,
    })))
}

async fn api_import(State(state): State<Arc<AppState>>, body: Bytes) -> ApiResult {
    let entries = parse_entries(&body).map_err(|e| match e {
        StockpileError::Json(e) => StockpileError::Validation(format!("Malformed JSON: {}", e)),
        other => other,
    })?;
    let library = state.library.clone();
    let report = tokio::task::spawn_blocking(move || import_batch(&library, entries)).await?;
    Ok(Json(json!({
        "success": true,
        "imported": report.success,
        "failed": report.failed,
        "errors": report.errors,
    })))
}

async fn api_nodes(State(state): State<Arc<AppState>>) -> ApiResult {
    Ok(Json(json!({ "success": true, "nodes": state.nodes.schemas() })))
}

// === Dashboard ===

async fn index_page(State(state): State<Arc<AppState>>) -> Html<String> {
    let stats = state.library.stats().unwrap_or_else(|e| {
        error!("Could not read library stats: {}", e);
        LibraryStats {
            total_images: 0,
            tag_count: 0,
            categories: Vec::new(),
            sources: Vec::new(),
            sample_images: Vec::new(),
        }
    });
    Html(render_index(&stats, &state.sessions.list()))
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn base_template(title: &str, content: &str) -> String {
    format!(r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{} - Stockpile</title>
    <style>
        :root {{
            --bg-primary: #1a1a2e;
            --bg-card: #0f3460;
            --text-primary: #e8e8e8;
            --text-secondary: #a0a0a0;
            --accent: #e94560;
            --border: #2a2a4a;
        }}
        * {{ box-sizing: border-box; margin: 0; padding: 0; }}
        body {{
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            background: var(--bg-primary);
            color: var(--text-primary);
            line-height: 1.6;
        }}
        .container {{ max-width: 1200px; margin: 0 auto; padding: 20px; }}
        h1 {{ margin-bottom: 20px; color: var(--accent); }}
        .card {{
            background: var(--bg-card);
            border-radius: 12px;
            padding: 20px;
            margin-bottom: 20px;
        }}
        .card h2 {{ margin-bottom: 15px; color: var(--accent); }}
        .stats-grid {{
            display: grid;
            grid-template-columns: repeat(auto-fit, minmax(200px, 1fr));
            gap: 20px;
            margin-bottom: 30px;
        }}
        .stat-card {{
            background: var(--bg-card);
            border-radius: 12px;
            padding: 20px;
            text-align: center;
        }}
        .stat-card .number {{ font-size: 2.5em; font-weight: bold; color: var(--accent); }}
        .stat-card .label {{ color: var(--text-secondary); font-size: 0.9em; }}
        table {{ width: 100%; border-collapse: collapse; }}
        th, td {{ padding: 10px; text-align: left; border-bottom: 1px solid var(--border); }}
        th {{ color: var(--text-secondary); font-weight: 500; }}
    </style>
</head>
<body>
    <main class="container">
        {}
    </main>
</body>
</html>"#, escape_html(title), content)
}

fn render_counts(rows: &[(String, i64)], label: &str) -> String {
    let body: String = rows
        .iter()
        .map(|(name, count)| format!("<tr><td>{}</td><td>{}</td></tr>", escape_html(name), count))
        .collect();
    format!("<table><tr><th>{}</th><th>Images</th></tr>{}</table>", label, body)
}

fn render_sessions(sessions: &[ScrapeSession]) -> String {
    if sessions.is_empty() {
        return "<p>No scrape sessions yet</p>".to_string();
    }
    let rows: String = sessions
        .iter()
        .map(|s| {
            format!(
                "<tr><td>{}</td><td>{}</td><td>{:?}</td><td>{}%</td><td>{}/{}</td><td>{}</td></tr>",
                s.created_at.format("%Y-%m-%d %H:%M"),
                escape_html(&s.request.query),
                s.status,
                s.progress,
                s.scraped_images,
                s.total_images,
                escape_html(&s.current_step),
            )
        })
        .collect();
    let header: String = ["Started", "Query", "Status", "Progress", "Images", "Step"]
        .iter()
        .map(|h| format!("<th>{}</th>", h))
        .collect();
    format!("<table><tr>{}</tr>{}</table>", header, rows)
}

fn render_index(stats: &LibraryStats, sessions: &[ScrapeSession]) -> String {
    let content = format!(r#"
        <h1>Image Library</h1>
        <div class="stats-grid">
            <div class="stat-card">
                <div class="number">{}</div><div class="label">Images</div>
            </div>
            <div class="stat-card">
                <div class="number">{}</div><div class="label">Categories</div>
            </div>
            <div class="stat-card">
                <div class="number">{}</div><div class="label">Tags</div>
            </div>
        </div>
        <div style="display: grid; grid-template-columns: 1fr 1fr; gap: 20px;">
            <div class="card"><h2>Categories</h2>{}</div>
            <div class="card"><h2>Sources</h2>{}</div>
        </div>
        <div class="card"><h2>Scrape Sessions</h2>{}</div>
    "#,
        stats.total_images,
        stats.categories.len(),
        stats.tag_count,
        render_counts(&stats.categories, "Category"),
        render_counts(&stats.sources, "Source"),
        render_sessions(sessions),
    );

    base_template("Dashboard", &content)
}

/// Start the web server over an open library
pub async fn start_server(config: AppConfig, library: Library) -> Result<()> {
    let addr = format!("{}:{}", config.web.host, config.web.port);
    let state = Arc::new(AppState::new(config, library)?);
    info!("Registered {} nodes", state.nodes.len());
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("Control panel available at http://{}", addr);

    let router = create_router(state);
    axum::serve(listener, router)
        .await
        .map_err(|e| StockpileError::Config(format!("Server error: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::tests::write_png;
    use crate::library::ImageMeta;
    use axum::body::Body;
    use axum::http::Request;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn test_state(dir: &TempDir) -> Arc<AppState> {
        let mut config = AppConfig::default();
        config.library.download_dir = dir.path().join("scraped").to_string_lossy().to_string();
        Arc::new(AppState::new(config, Library::in_memory().unwrap()).unwrap())
    }

    async fn send(state: &Arc<AppState>, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = create_router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    async fn get_json(state: &Arc<AppState>, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let (status, body) = send(state, request).await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    async fn post_json(state: &Arc<AppState>, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let (status, body) = send(state, request).await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn nature() -> ImageMeta {
        ImageMeta { category: Some("nature".to_string()), ..Default::default() }
    }

    #[tokio::test]
    async fn test_images_filtered_and_existing_only() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        state.library.add_image(&write_png(dir.path(), "wide.png", 1920, 4), nature()).unwrap();
        state.library.add_image(&write_png(dir.path(), "narrow.png", 1024, 4), nature()).unwrap();
        let gone = write_png(dir.path(), "gone.png", 2000, 4);
        state.library.add_image(&gone, nature()).unwrap();
        std::fs::remove_file(&gone).unwrap();

        let uri = "/webscraper/library/images?category=nature&min_width=1920";
        let (status, body) = get_json(&state, uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["count"], 1);
        assert_eq!(body["images"][0]["filename"], "wide.png");
    }

    #[tokio::test]
    async fn test_images_empty_fields_are_wildcards() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        state.library.add_image(&write_png(dir.path(), "a.png", 640, 4), nature()).unwrap();
        let other = ImageMeta { category: Some("food".to_string()), ..Default::default() };
        state.library.add_image(&write_png(dir.path(), "b.png", 32, 4), other).unwrap();

        let uri = "/webscraper/library/images?category=&min_width=&min_height=&limit=&seed=&index=";
        let (status, body) = get_json(&state, uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 2);

        let uri = "/webscraper/library/images?min_width=%20640%20";
        let (status, body) = get_json(&state, uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 1);
    }

    #[tokio::test]
    async fn test_images_malformed_number_is_json_error() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);

        let request = Request::builder()
            .uri("/webscraper/library/images?min_width=abc")
            .body(Body::empty())
            .unwrap();
        let response = create_router(state.clone()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("min_width"));

        let (status, _) = get_json(&state, "/webscraper/library/images?limit=-1").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_parse_field() {
        assert_eq!(parse_field::<u32>("w", None).unwrap(), None);
        assert_eq!(parse_field::<u32>("w", Some("  ")).unwrap(), None);
        assert_eq!(parse_field::<u32>("w", Some("1920")).unwrap(), Some(1920));
        let err = parse_field::<u32>("w", Some("wide")).unwrap_err();
        assert!(matches!(err, StockpileError::Validation(_)));
    }

    #[tokio::test]
    async fn test_images_limit_and_bad_mode() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        for i in 0..4 {
            let path = write_png(dir.path(), &format!("{}.png", i), 8, 8);
            state.library.add_image(&path, nature()).unwrap();
        }

        let (_, body) = get_json(&state, "/webscraper/library/images?limit=2").await;
        assert_eq!(body["count"], 2);
        assert_eq!(body["images"][0]["filename"], "0.png");

        let uri = "/webscraper/library/images?selection_mode=random&seed=7&limit=3";
        let (_, body) = get_json(&state, uri).await;
        assert_eq!(body["count"], 3);

        let uri = "/webscraper/library/images?selection_mode=shuffle";
        let (status, body) = get_json(&state, uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_image_file_served_with_content_type() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        let path = write_png(dir.path(), "a.png", 8, 8);
        let record = state.library.add_image(&path, nature()).unwrap();

        let uri = format!("/webscraper/library/image/{}", record.id);
        let response = create_router(state.clone())
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");

        let (status, body) = get_json(&state, "/webscraper/library/image/999").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_categories_and_machine_names() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        let meta = ImageMeta {
            category: Some("zzz-custom".to_string()),
            machine_name: Some("render-01".to_string()),
            ..Default::default()
        };
        state.library.add_image(&write_png(dir.path(), "a.png", 8, 8), meta).unwrap();

        let (_, body) = get_json(&state, "/webscraper/library/categories").await;
        let categories: Vec<String> = serde_json::from_value(body["categories"].clone()).unwrap();
        assert!(categories.contains(&"nature".to_string()));
        assert!(categories.contains(&"zzz-custom".to_string()));

        let (_, body) = get_json(&state, "/webscraper/library/machine_names").await;
        let names: Vec<String> = serde_json::from_value(body["machine_names"].clone()).unwrap();
        assert!(names.contains(&"render-01".to_string()));
    }

    #[tokio::test]
    async fn test_start_validation_and_unknown_sessions() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);

        let blank = json!({"query": "", "api_key": "k"});
        let (status, body) = post_json(&state, "/webscraper/start", blank).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);

        let (status, _) = post_json(&state, "/webscraper/start", json!({"query": "lake"})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(state.sessions.list().is_empty());

        let (status, _) = get_json(&state, "/webscraper/status/missing").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = post_json(&state, "/webscraper/cancel/missing", json!({})).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, body) = get_json(&state, "/webscraper/sessions").await;
        assert_eq!(body["count"], 0);
    }

    #[tokio::test]
    async fn test_import_endpoint() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        let a = write_png(dir.path(), "a.png", 8, 8);

        let entries = json!([
            {"image_path": a, "category": "food"},
            {"image_path": "/no/such.png"},
        ]);
        let (status, body) = post_json(&state, "/webscraper/library/import", entries).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["imported"], 1);
        assert_eq!(body["failed"], 1);

        let not_an_array = json!({"image_path": a});
        let (status, _) = post_json(&state, "/webscraper/library/import", not_an_array).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_debug_nodes_and_dashboard() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        state.library.add_image(&write_png(dir.path(), "a.png", 8, 8), nature()).unwrap();

        let (_, body) = get_json(&state, "/webscraper/library/debug").await;
        assert_eq!(body["total_images"], 1);
        assert_eq!(body["sample_images"][0]["file_exists"], true);

        let (_, body) = get_json(&state, "/webscraper/nodes").await;
        assert_eq!(body["nodes"].as_array().unwrap().len(), 7);

        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let (status, html) = send(&state, request).await;
        assert_eq!(status, StatusCode::OK);
        let html = String::from_utf8(html).unwrap();
        assert!(html.contains("Image Library"));
        assert!(html.contains("nature"));
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("<b>\"x\" & y</b>"), "&lt;b&gt;&quot;x&quot; &amp; y&lt;/b&gt;");
    }
}

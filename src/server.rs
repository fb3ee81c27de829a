//! HTTP API for the studio.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/api/documents?q=&limit=` | List documents, or search when `q` is set |
//! | `GET`  | `/api/documents/{*path}` | One indexed document |
//! | `POST` | `/api/import?filename=&document_id=` | Raw upload body → markdown with localized images |
//! | `POST` | `/api/export` | `{ markdown, format, title }` → file download |
//! | `GET`  | `/api/images/{id}` | Stored image bytes |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "filename must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `payload_too_large` (413),
//! `unsupported_format` (415), `conversion_failed` (422), `internal` (500).

use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, DefaultBodyLimit, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::db;
use crate::error::ConvertError;
use crate::export::FormatExporter;
use crate::import::upload::{import_upload, ImportOutcome, UploadPolicy};
use crate::import::FormatImporter;
use crate::indexer::FileIndexer;
use crate::localize::{ImageLocalizer, IMAGE_ROUTE};
use crate::migrate;
use crate::models::{Document, SearchHit};
use crate::search::DEFAULT_LIMIT;
use crate::store::{DocumentStore, ImageRepository, SqliteStore};

/// Extra room above `upload.max_bytes` so oversize uploads still reach the
/// handler and get the JSON error body.
const BODY_LIMIT_SLACK: usize = 64 * 1024;

/// Shared state handed to every route handler.
#[derive(Clone)]
pub struct AppState {
    documents: Arc<dyn DocumentStore>,
    images: Arc<dyn ImageRepository>,
    importer: Arc<FormatImporter>,
    localizer: Arc<ImageLocalizer>,
    exporter: FormatExporter,
    upload: Arc<UploadPolicy>,
}

impl AppState {
    pub fn new(
        config: &Config,
        documents: Arc<dyn DocumentStore>,
        images: Arc<dyn ImageRepository>,
        exporter: FormatExporter,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            localizer: Arc::new(ImageLocalizer::new(images.clone(), &config.images)?),
            documents,
            images,
            importer: Arc::new(FormatImporter::new(config.epub.clone())),
            exporter,
            upload: Arc::new(UploadPolicy::from(&config.upload)),
        })
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let body_limit = state.upload.max_bytes.saturating_add(BODY_LIMIT_SLACK);

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/documents", get(handle_list_documents))
        .route("/api/documents/{*path}", get(handle_get_document))
        .route("/api/import", post(handle_import))
        .route("/api/export", post(handle_export))
        .route(&format!("{}/{{id}}", IMAGE_ROUTE), get(handle_get_image))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server on `[server].bind`. With `watch` set, the file
/// indexer runs alongside it and is stopped when the server exits.
pub async fn run_server(config: &Config, watch: bool) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    migrate::migrate_pool(&pool).await?;
    let store = Arc::new(SqliteStore::new(pool));

    let indexer = if watch {
        let indexer = FileIndexer::new(&config.watch, config.topics.clone(), store.clone())?;
        let report = indexer.start().await?;
        info!(
            indexed = report.indexed,
            failed = report.failed,
            root = %indexer.root().display(),
            "Indexer watching"
        );
        Some(indexer)
    } else {
        None
    };

    let state = AppState::new(
        config,
        store.clone(),
        store,
        FormatExporter::new(&config.export),
    )?;
    let app = router(state);

    let bind_addr = config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    println!("Markdown Studio listening on http://{}", bind_addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for shutdown signal");
            }
        })
        .await;

    if let Some(indexer) = indexer {
        indexer.stop().await;
    }
    served?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::NOT_FOUND, "not_found", message)
}

fn internal(err: anyhow::Error) -> AppError {
    error!(error = %format!("{:#}", err), "Request failed");
    AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", format!("{:#}", err))
}

impl From<ConvertError> for AppError {
    fn from(err: ConvertError) -> Self {
        let message = err.to_string();
        match err {
            ConvertError::UnsupportedFormat(_) | ConvertError::UnsupportedExportFormat(_) => {
                AppError::new(StatusCode::UNSUPPORTED_MEDIA_TYPE, "unsupported_format", message)
            }
            ConvertError::TooLarge { .. } => {
                AppError::new(StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large", message)
            }
            ConvertError::Conversion { .. } => {
                AppError::new(StatusCode::UNPROCESSABLE_ENTITY, "conversion_failed", message)
            }
            ConvertError::Io(e) => internal(e.into()),
        }
    }
}

impl From<BytesRejection> for AppError {
    fn from(rejection: BytesRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            AppError::new(
                StatusCode::PAYLOAD_TOO_LARGE,
                "payload_too_large",
                rejection.body_text(),
            )
        } else {
            bad_request(rejection.body_text())
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============ /api/documents ============

#[derive(Deserialize)]
struct DocumentsQuery {
    q: Option<String>,
    limit: Option<i64>,
}

#[derive(Serialize)]
struct DocumentSummary {
    path: String,
    title: String,
    tags: Vec<String>,
    topics: Vec<String>,
    #[serde(rename = "wordCount")]
    word_count: usize,
    #[serde(rename = "modifiedAt")]
    modified_at: i64,
}

impl From<Document> for DocumentSummary {
    fn from(doc: Document) -> Self {
        Self {
            path: doc.path,
            title: doc.title,
            tags: doc.tags,
            topics: doc.topics,
            word_count: doc.word_count,
            modified_at: doc.modified_at,
        }
    }
}

#[derive(Serialize)]
#[serde(untagged)]
enum DocumentsResponse {
    Hits { results: Vec<SearchHit> },
    Documents { documents: Vec<DocumentSummary> },
}

async fn handle_list_documents(
    State(state): State<AppState>,
    Query(params): Query<DocumentsQuery>,
) -> Result<Json<DocumentsResponse>, AppError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT);
    if limit < 1 {
        return Err(bad_request("limit must be >= 1"));
    }

    match params.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        Some(query) => {
            let results = state
                .documents
                .search(query, limit)
                .await
                .map_err(internal)?;
            Ok(Json(DocumentsResponse::Hits { results }))
        }
        None => {
            let documents = state
                .documents
                .list_documents()
                .await
                .map_err(internal)?
                .into_iter()
                .map(DocumentSummary::from)
                .collect();
            Ok(Json(DocumentsResponse::Documents { documents }))
        }
    }
}

async fn handle_get_document(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Json<Document>, AppError> {
    state
        .documents
        .get_document(&path)
        .await
        .map_err(internal)?
        .map(Json)
        .ok_or_else(|| not_found(format!("document not found: {}", path)))
}

// ============ POST /api/import ============

#[derive(Deserialize)]
struct ImportQuery {
    filename: Option<String>,
    document_id: Option<String>,
}

async fn handle_import(
    State(state): State<AppState>,
    Query(params): Query<ImportQuery>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<ImportOutcome>, AppError> {
    let body = body?;
    let filename = params
        .filename
        .as_deref()
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .ok_or_else(|| bad_request("filename must not be empty"))?;
    let document_id = params
        .document_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let outcome = import_upload(
        &state.upload,
        &state.importer,
        &state.localizer,
        filename,
        &body,
        &document_id,
    )
    .await?;

    Ok(Json(outcome))
}

// ============ POST /api/export ============

#[derive(Deserialize)]
struct ExportRequest {
    markdown: String,
    format: String,
    title: Option<String>,
}

async fn handle_export(
    State(state): State<AppState>,
    Json(request): Json<ExportRequest>,
) -> Result<Response, AppError> {
    let result = state
        .exporter
        .export_document(&request.markdown, &request.format, request.title.as_deref())
        .await?;

    let stem = request
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or("document");
    let filename = format!("{}.{}", stem, result.extension);

    Ok((
        [
            (header::CONTENT_TYPE, result.mime_type.to_string()),
            (header::CONTENT_DISPOSITION, attachment(&filename)),
        ],
        result.buffer,
    )
        .into_response())
}

/// `Content-Disposition` with an ASCII fallback and the RFC 5987 form.
fn attachment(filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        urlencoding::encode(filename)
    )
}

// ============ GET /api/images/{id} ============

async fn handle_get_image(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let image = state
        .images
        .get_image(&id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found(format!("image not found: {}", id)))?;

    Ok((
        [
            (header::CONTENT_TYPE, image.mime_type),
            (
                header::CACHE_CONTROL,
                "public, max-age=31536000, immutable".to_string(),
            ),
        ],
        image.data,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        DbConfig, EpubConfig, ExportConfig, ImagesConfig, ServerConfig, TopicsConfig,
        UploadConfig, WatchConfig,
    };
    use crate::export::pdf::tests::RecordingRenderer;
    use crate::models::CONTENT_TYPE_MARKDOWN;
    use crate::store::InMemoryStore;
    use serde_json::Value;
    use tempfile::TempDir;

    fn test_config(dir: &std::path::Path) -> Config {
        Config {
            db: DbConfig {
                path: dir.join("mds.sqlite"),
            },
            watch: WatchConfig {
                root: dir.join("notes"),
                include_globs: vec!["**/*.md".into()],
                exclude_globs: Vec::new(),
                follow_symlinks: false,
            },
            topics: TopicsConfig::default(),
            images: ImagesConfig::default(),
            upload: UploadConfig {
                dir: dir.join("uploads"),
                max_bytes: 4096,
                allowed_extensions: vec!["html".into(), "txt".into(), "md".into()],
            },
            epub: EpubConfig::default(),
            export: ExportConfig::default(),
            server: ServerConfig::default(),
        }
    }

    struct TestServer {
        base: String,
        store: Arc<InMemoryStore>,
        client: reqwest::Client,
        _tmp: TempDir,
    }

    async fn spawn_server() -> TestServer {
        let tmp = TempDir::new().unwrap();
        let config = test_config(tmp.path());
        let store = Arc::new(InMemoryStore::new());
        let exporter = FormatExporter::with_renderer(Arc::new(RecordingRenderer::default()));
        let state = AppState::new(&config, store.clone(), store.clone(), exporter).unwrap();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });

        TestServer {
            base: format!("http://{}", addr),
            store,
            client: reqwest::Client::new(),
            _tmp: tmp,
        }
    }

    fn document(path: &str, title: &str, content: &str) -> Document {
        Document {
            path: path.into(),
            title: title.into(),
            content: content.into(),
            raw_content: content.into(),
            frontmatter: Default::default(),
            tags: vec!["notes".into()],
            topics: Vec::new(),
            content_type: CONTENT_TYPE_MARKDOWN.into(),
            word_count: content.split_whitespace().count(),
            created_at: 1,
            modified_at: 2,
        }
    }

    #[tokio::test]
    async fn health_reports_version() {
        let server = spawn_server().await;
        let body: Value = server
            .client
            .get(format!("{}/health", server.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn documents_list_search_and_get() {
        let server = spawn_server().await;
        server
            .store
            .upsert_document(&document("guides/rust.md", "Rust Guide", "ownership and borrowing"))
            .await
            .unwrap();

        let list: Value = server
            .client
            .get(format!("{}/api/documents", server.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(list["documents"][0]["path"], "guides/rust.md");
        assert_eq!(list["documents"][0]["wordCount"], 3);

        let hits: Value = server
            .client
            .get(format!("{}/api/documents?q=borrowing&limit=5", server.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(hits["results"][0]["title"], "Rust Guide");

        let doc: Value = server
            .client
            .get(format!("{}/api/documents/guides/rust.md", server.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(doc["rawContent"], "ownership and borrowing");

        let missing = server
            .client
            .get(format!("{}/api/documents/nope.md", server.base))
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status(), 404);
        let body: Value = missing.json().await.unwrap();
        assert_eq!(body["error"]["code"], "not_found");
    }

    #[tokio::test]
    async fn import_localizes_and_serves_images() {
        let server = spawn_server().await;
        let html = r#"<h1>Upload</h1><p><img src="data:image/png;base64,iVBORw0KGgo=" alt="dot"></p>"#;

        let outcome: Value = server
            .client
            .post(format!(
                "{}/api/import?filename=page.html&document_id=doc-1",
                server.base
            ))
            .body(html)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        let markdown = outcome["markdown"].as_str().unwrap();
        assert!(markdown.starts_with("# Upload"));
        let image_id = outcome["images"][0]["imageId"].as_str().unwrap();
        assert!(markdown.contains(&format!("/api/images/{}", image_id)));

        let image = server
            .client
            .get(format!("{}/api/images/{}", server.base, image_id))
            .send()
            .await
            .unwrap();
        assert_eq!(image.status(), 200);
        assert_eq!(image.headers()["content-type"], "image/png");
        assert_eq!(image.bytes().await.unwrap().as_ref(), b"\x89PNG\r\n\x1a\n");
    }

    #[tokio::test]
    async fn import_errors_use_error_contract() {
        let server = spawn_server().await;

        let unsupported = server
            .client
            .post(format!("{}/api/import?filename=book.epub", server.base))
            .body("x")
            .send()
            .await
            .unwrap();
        assert_eq!(unsupported.status(), 415);
        let body: Value = unsupported.json().await.unwrap();
        assert_eq!(body["error"]["code"], "unsupported_format");

        let too_large = server
            .client
            .post(format!("{}/api/import?filename=notes.txt", server.base))
            .body(vec![b'a'; 5000])
            .send()
            .await
            .unwrap();
        assert_eq!(too_large.status(), 413);
        let body: Value = too_large.json().await.unwrap();
        assert_eq!(body["error"]["code"], "payload_too_large");

        let missing_name = server
            .client
            .post(format!("{}/api/import", server.base))
            .body("x")
            .send()
            .await
            .unwrap();
        assert_eq!(missing_name.status(), 400);
    }

    #[tokio::test]
    async fn export_sets_download_headers() {
        let server = spawn_server().await;
        let response = server
            .client
            .post(format!("{}/api/export", server.base))
            .json(&serde_json::json!({
                "markdown": "# Café\n\nBody *text*.",
                "format": "txt",
                "title": "Café notes"
            }))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(response.headers()["content-type"], "text/plain");
        assert_eq!(
            response.headers()["content-disposition"],
            "attachment; filename=\"Caf_ notes.txt\"; filename*=UTF-8''Caf%C3%A9%20notes.txt"
        );
        assert_eq!(response.text().await.unwrap(), "Café\n\nBody text.");

        let rejected = server
            .client
            .post(format!("{}/api/export", server.base))
            .json(&serde_json::json!({ "markdown": "x", "format": "rtf" }))
            .send()
            .await
            .unwrap();
        assert_eq!(rejected.status(), 415);
    }
}

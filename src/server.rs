//! HTTP server for the chat shell.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/api/generate` | Run a chat turn and save its unit |
//! | `GET`  | `/api/units` | List generated units |
//! | `GET`  | `/api/units/{filename}/exists` | Whether a generated unit exists |
//! | `GET`  | `/api/units/{filename}` | Source of a generated unit |
//! | `POST` | `/api/units/{filename}/render` | Load and render, JSON output |
//! | `GET`  | `/units/{filename}` | Load and render, HTML page |
//! | `POST` | `/api/library` | Promote a generated unit |
//! | `GET`  | `/api/library` | List library records |
//! | `DELETE` | `/api/library/{id}` | Delete a library record |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "not found: x.tsx" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `cancelled` (409),
//! `provider_error` (502), `internal` (500).
//!
//! Rendering never produces an error response: load and render failures
//! come back as a labeled error panel in a `200`.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so a browser chat shell
//! on another origin can call the API.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, error, info};

use component_harness_core::classify::Classifier;
use component_harness_core::error::StoreError;
use component_harness_core::library::{self, PromoteRequest};
use component_harness_core::loader::{UnitLoader, UnitRegistry};
use component_harness_core::models::{ChatMessage, LibraryUnit};
use component_harness_core::render::{html, RenderedOutput, Renderer};
use component_harness_core::resolve::is_safe_component;
use component_harness_core::store::UnitStore;

use crate::classify_script::create_classifier;
use crate::config::Config;
use crate::fs_store::FsUnitStore;
use crate::orchestrator::{CancelSignal, Orchestrator, TurnError, TurnTracker};
use crate::providers::Providers;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    store: Arc<dyn UnitStore>,
    loader: Arc<UnitLoader>,
    renderer: Arc<Renderer>,
    classifier: Arc<dyn Classifier>,
    orchestrator: Arc<Orchestrator>,
    turns: Arc<TurnTracker>,
}

/// Native units served alongside generated ones.
#[derive(Default)]
pub struct ServerExtensions {
    /// Structured modules keyed by filename. Loads of these filenames take
    /// the structured path instead of reading raw source.
    pub units: UnitRegistry,
}

/// Starts the HTTP server on `[server].bind`.
///
/// Runs until the process is terminated. For embedders that ship native
/// units, use [`run_server_with_extensions`].
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    run_server_with_extensions(config, ServerExtensions::default()).await
}

/// Starts the HTTP server with natively registered units.
///
/// # Example
///
/// ```rust,no_run
/// use component_harness::server::{run_server_with_extensions, ServerExtensions};
/// use component_harness_core::loader::UnitRegistry;
///
/// # async fn example(config: &component_harness::config::Config) -> anyhow::Result<()> {
/// let mut units = UnitRegistry::new();
/// // units.register("status.tsx", UnitModule::new().with_default(Arc::new(StatusUnit)));
/// run_server_with_extensions(config, ServerExtensions { units }).await?;
/// # Ok(())
/// # }
/// ```
pub async fn run_server_with_extensions(
    config: &Config,
    extensions: ServerExtensions,
) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let state = build_state(config, extensions)?;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(handle_health))
        .route("/api/generate", post(handle_generate))
        .route("/api/units", get(handle_list_units))
        .route("/api/units/{filename}", get(handle_unit_source))
        .route("/api/units/{filename}/exists", get(handle_unit_exists))
        .route("/api/units/{filename}/render", post(handle_render))
        .route("/units/{filename}", get(handle_render_page))
        .route("/api/library", post(handle_promote).get(handle_list_library))
        .route("/api/library/{id}", delete(handle_delete_library))
        .layer(cors)
        .with_state(state);

    info!(bind = %bind_addr, "component harness listening");
    println!("Component harness listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn build_state(config: &Config, extensions: ServerExtensions) -> anyhow::Result<AppState> {
    let store: Arc<dyn UnitStore> = Arc::new(FsUnitStore::from_config(&config.storage));
    let loader = UnitLoader::new(Arc::new(extensions.units), store.clone());
    let renderer = config.render.build_renderer()?;
    let classifier: Arc<dyn Classifier> = Arc::from(create_classifier(&config.classifier)?);
    let providers = Providers::from_config(&config.providers)?;
    let orchestrator = Orchestrator::new(providers, store.clone(), &config.storage.extension);

    Ok(AppState {
        config: Arc::new(config.clone()),
        store,
        loader: Arc::new(loader),
        renderer: Arc::new(renderer),
        classifier,
        orchestrator: Arc::new(orchestrator),
        turns: Arc::new(TurnTracker::new()),
    })
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

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn app_error(status: StatusCode, code: &str, message: impl Into<String>) -> AppError {
    AppError {
        status,
        code: code.to_string(),
        message: message.into(),
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    app_error(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn not_found(message: impl Into<String>) -> AppError {
    app_error(StatusCode::NOT_FOUND, "not_found", message)
}

fn cancelled(message: impl Into<String>) -> AppError {
    app_error(StatusCode::CONFLICT, "cancelled", message)
}

fn provider_error(message: impl Into<String>) -> AppError {
    app_error(StatusCode::BAD_GATEWAY, "provider_error", message)
}

fn internal(message: impl Into<String>) -> AppError {
    app_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(_) | StoreError::SourceNotFound(_) => not_found(e.to_string()),
            StoreError::InvalidFilename(_) => bad_request(e.to_string()),
            other => {
                error!(error = %other, "store failure");
                internal(other.to_string())
            }
        }
    }
}

impl From<TurnError> for AppError {
    fn from(e: TurnError) -> Self {
        match e {
            TurnError::Cancelled => cancelled(e.to_string()),
            TurnError::Invalid(_) => bad_request(e.to_string()),
            TurnError::Provider(p) => provider_error(p.to_string()),
        }
    }
}

/// Metadata extraction errors wrap a [`StoreError`] or a classifier failure.
fn classify_anyhow(err: anyhow::Error) -> AppError {
    match err.downcast::<StoreError>() {
        Ok(store_err) => store_err.into(),
        Err(other) => internal(format!("{:#}", other)),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /api/generate ============

#[derive(Deserialize)]
struct GenerateRequest {
    messages: Vec<ChatMessage>,
    /// Turns with the same session supersede each other.
    #[serde(default)]
    session: Option<String>,
}

/// Handler for `POST /api/generate`.
///
/// Returns `400` for an empty message list, `409` when a newer turn for the
/// same session superseded this one, and `502` when the completion service
/// is unreachable or has no credentials.
async fn handle_generate(
    State(state): State<AppState>,
    Json(req): Json<GenerateRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    if req.messages.is_empty() {
        return Err(bad_request("messages must not be empty"));
    }

    let response = match req.session.as_deref().filter(|s| !s.is_empty()) {
        Some(session) => {
            let active = state.turns.enter(session);
            state
                .orchestrator
                .run_turn(&req.messages, active.signal())
                .await?
        }
        None => {
            state
                .orchestrator
                .run_turn(&req.messages, &CancelSignal::never())
                .await?
        }
    };

    serde_json::to_value(&response)
        .map(Json)
        .map_err(|e| internal(e.to_string()))
}

// ============ Generated units ============

fn check_filename(filename: &str) -> Result<(), AppError> {
    if is_safe_component(filename) {
        Ok(())
    } else {
        Err(bad_request(format!("invalid filename: {:?}", filename)))
    }
}

async fn handle_list_units(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let units = state.store.list_generated().await?;
    Ok(Json(serde_json::json!({ "units": units })))
}

async fn handle_unit_exists(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    check_filename(&filename)?;
    let exists = state.store.exists(&filename).await?;
    Ok(Json(serde_json::json!({ "exists": exists })))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UnitSourceResponse {
    filename: String,
    source_text: String,
}

async fn handle_unit_source(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Json<UnitSourceResponse>, AppError> {
    check_filename(&filename)?;
    let source_text = state.store.read(&filename).await?;
    Ok(Json(UnitSourceResponse {
        filename,
        source_text,
    }))
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RenderRequest {
    #[serde(default)]
    data: serde_json::Value,
    #[serde(default)]
    unit_name: Option<String>,
}

async fn render_unit(
    state: &AppState,
    filename: &str,
    hint: Option<&str>,
    data: &serde_json::Value,
) -> RenderedOutput {
    match state.loader.load(filename, hint).await {
        Ok(unit) => state.renderer.render(&unit, data),
        Err(e) => state.renderer.render_load_failure(filename, &e, data),
    }
}

async fn handle_render(
    State(state): State<AppState>,
    Path(filename): Path<String>,
    body: Result<Json<RenderRequest>, JsonRejection>,
) -> Json<RenderedOutput> {
    let req = match body {
        Ok(Json(req)) => req,
        Err(rejection) => {
            debug!(filename = %filename, %rejection, "no usable render body");
            RenderRequest::default()
        }
    };
    Json(render_unit(&state, &filename, req.unit_name.as_deref(), &req.data).await)
}

#[derive(Deserialize)]
struct PageQuery {
    unit: Option<String>,
    /// JSON-encoded payload.
    data: Option<String>,
}

async fn handle_render_page(
    State(state): State<AppState>,
    Path(filename): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Html<String>, AppError> {
    let data = match query.data.as_deref() {
        Some(raw) => serde_json::from_str(raw)
            .map_err(|e| bad_request(format!("data must be JSON: {}", e)))?,
        None => serde_json::Value::Null,
    };
    let output = render_unit(&state, &filename, query.unit.as_deref(), &data).await;
    Ok(Html(html::page(&filename, &output.html)))
}

// ============ Library ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromoteBody {
    filename: String,
    unit_name: String,
    #[serde(default)]
    auto_extract: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    tags: Option<Vec<String>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PromoteResponse {
    success: bool,
    record: LibraryUnit,
    name_modified: bool,
    final_name: String,
}

/// Handler for `POST /api/library`.
///
/// `404` when the generated unit does not exist.
async fn handle_promote(
    State(state): State<AppState>,
    Json(body): Json<PromoteBody>,
) -> Result<Json<PromoteResponse>, AppError> {
    if body.unit_name.trim().is_empty() {
        return Err(bad_request("unitName must not be empty"));
    }

    let mut req = PromoteRequest {
        generated_filename: body.filename,
        unit_name: body.unit_name,
        description: body.description.unwrap_or_default(),
        category: body.category.unwrap_or_default(),
        tags: body.tags.unwrap_or_default(),
    };

    if body.auto_extract {
        library::fill_metadata(state.store.as_ref(), state.classifier.as_ref(), &mut req)
            .await
            .map_err(classify_anyhow)?;
    }

    let promotion =
        library::promote(state.store.as_ref(), req, &state.config.storage.extension).await?;

    Ok(Json(PromoteResponse {
        success: true,
        final_name: promotion.record.name.clone(),
        name_modified: promotion.name_modified,
        record: promotion.record,
    }))
}

async fn handle_list_library(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let records = library::list_library(state.store.as_ref()).await?;
    Ok(Json(serde_json::json!({ "records": records })))
}

async fn handle_delete_library(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let record = library::delete_library(state.store.as_ref(), &id).await?;
    Ok(Json(serde_json::json!({ "success": true, "id": record.id })))
}

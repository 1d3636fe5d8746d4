//! JSON HTTP API (`ragbot serve`).
//!
//! Exposes index management, personality CRUD and chat sessions. Each chat
//! session sits behind its own `tokio::sync::Mutex`, so one session answers
//! one turn at a time while different sessions run concurrently.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/catalog` | Providers with chat and vision models |
//! | `GET`  | `/indexes` | Vector index names |
//! | `POST` | `/indexes` | Build an index `{name, source}` |
//! | `POST` | `/indexes/{name}/resync` | Rebuild an index `{source}` |
//! | `DELETE` | `/indexes/{name}` | Delete an index |
//! | `GET`/`POST` | `/personalities` | List / add |
//! | `GET`/`PUT`/`DELETE` | `/personalities/{id}` | Show / update / delete |
//! | `POST` | `/sessions` | Start a session `{personality_id}` |
//! | `DELETE` | `/sessions/{id}` | End a session and free its state |
//! | `POST` | `/sessions/{id}/model` | Select `{provider, model, vision}` |
//! | `POST` | `/sessions/{id}/index` | Load `{name}` or disable with `{name: null}` |
//! | `GET`/`POST` | `/sessions/{id}/messages` | Displayed messages / send `{content}` |
//! | `POST` | `/sessions/{id}/clear` | Forget conversation and image |
//! | `POST` | `/sessions/{id}/image` | Describe the raw image body (up to `[server].max_image_bytes`) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "vector index 'x' not found" } }
//! ```
//!
//! Provider keys come from the environment only; the server never prompts.

use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, DefaultBodyLimit, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::catalog::{chat_models, vision_models, Provider};
use crate::chat::ChatSession;
use crate::config::Config;
use crate::credentials::NoPrompt;
use crate::embedding::shared_embedder;
use crate::error::{classify, RagError};
use crate::index_builder::{BuildReport, IndexBuilder};
use crate::llm::{create_chat_model, create_vision_model};
use crate::loader::{load_documents, DocumentSource};
use crate::models::{ChatMessage, Personality, PersonalityInput};
use crate::personality::PersonalityStore;
use crate::vector_store::IndexStore;

type SessionMap = HashMap<String, Arc<Mutex<ChatSession>>>;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    personalities: PersonalityStore,
    sessions: Arc<RwLock<SessionMap>>,
}

impl AppState {
    pub fn new(config: Config, personalities: PersonalityStore) -> Self {
        Self {
            config: Arc::new(config),
            personalities,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn session(&self, id: &str) -> Result<Arc<Mutex<ChatSession>>, AppError> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| not_found(format!("no session with id {}", id)))
    }
}

pub fn router(state: AppState) -> Router {
    let image_limit = state.config.server.max_image_bytes;
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/catalog", get(handle_catalog))
        .route("/indexes", get(handle_list_indexes).post(handle_create_index))
        .route("/indexes/{name}", delete(handle_delete_index))
        .route("/indexes/{name}/resync", post(handle_resync_index))
        .route(
            "/personalities",
            get(handle_list_personalities).post(handle_add_personality),
        )
        .route(
            "/personalities/{id}",
            get(handle_get_personality)
                .put(handle_update_personality)
                .delete(handle_delete_personality),
        )
        .route("/sessions", post(handle_create_session))
        .route("/sessions/{id}", delete(handle_delete_session))
        .route("/sessions/{id}/model", post(handle_select_model))
        .route("/sessions/{id}/index", post(handle_select_index))
        .route(
            "/sessions/{id}/messages",
            get(handle_list_messages).post(handle_send_message),
        )
        .route("/sessions/{id}/clear", post(handle_clear_session))
        .route(
            "/sessions/{id}/image",
            post(handle_image).layer(DefaultBodyLimit::max(image_limit)),
        )
        .layer(cors)
        .with_state(state)
}

/// Binds to `[server].bind` and serves until the process exits.
pub async fn run_server(config: &Config, personalities: PersonalityStore) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let app = router(AppState::new(config.clone(), personalities));

    println!("ragbot API listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;
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

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
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

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

fn status_for(err: &RagError) -> (StatusCode, &'static str) {
    match err {
        RagError::MissingCredential(_) => (StatusCode::BAD_REQUEST, "missing_credential"),
        RagError::ProviderSetup(_) => (StatusCode::BAD_REQUEST, "provider_setup"),
        RagError::IndexNotFound(_) | RagError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        RagError::IndexExists(_) => (StatusCode::CONFLICT, "index_exists"),
        RagError::NotConfigured(_) => (StatusCode::CONFLICT, "not_configured"),
        RagError::IndexLoad(_) => (StatusCode::UNPROCESSABLE_ENTITY, "index_load"),
        RagError::Invocation(_) => (StatusCode::BAD_GATEWAY, "invocation"),
        RagError::IndexSource(_)
        | RagError::NoDocuments
        | RagError::NoChunks
        | RagError::InvalidIndexName(_)
        | RagError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "bad_request"),
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        let (status, code) = match classify(&err) {
            Some(kind) => status_for(kind),
            None => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        if status.is_server_error() {
            tracing::error!(error = %format!("{:#}", err), "request failed");
        }
        AppError {
            status,
            code,
            message: format!("{:#}", err),
        }
    }
}

type ApiResult<T> = Result<Json<T>, AppError>;

// ============ Health and catalog ============

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

#[derive(Serialize)]
struct CatalogModel {
    name: &'static str,
    id: &'static str,
}

#[derive(Serialize)]
struct CatalogProvider {
    provider: String,
    label: &'static str,
    chat_models: Vec<CatalogModel>,
    vision_models: Vec<CatalogModel>,
}

fn to_models(list: &[(&'static str, &'static str)]) -> Vec<CatalogModel> {
    list.iter()
        .map(|&(name, id)| CatalogModel { name, id })
        .collect()
}

async fn handle_catalog() -> Json<Vec<CatalogProvider>> {
    Json(
        Provider::ALL
            .iter()
            .map(|p| CatalogProvider {
                provider: p.slug().to_string(),
                label: p.label(),
                chat_models: to_models(chat_models(*p)),
                vision_models: to_models(vision_models(*p)),
            })
            .collect(),
    )
}

// ============ Indexes ============

#[derive(Serialize)]
struct IndexList {
    indexes: Vec<String>,
}

async fn handle_list_indexes(State(state): State<AppState>) -> ApiResult<IndexList> {
    let indexes = IndexStore::from_config(&state.config).list_indexes()?;
    Ok(Json(IndexList { indexes }))
}

#[derive(Deserialize)]
struct CreateIndexRequest {
    name: String,
    source: DocumentSource,
}

async fn handle_create_index(
    State(state): State<AppState>,
    Json(req): Json<CreateIndexRequest>,
) -> Result<(StatusCode, Json<BuildReport>), AppError> {
    let documents = load_documents(&req.source, &state.config, &NoPrompt).await?;
    let embedder = shared_embedder(&state.config.embedding).await?;
    let report = IndexBuilder::from_config(&state.config, embedder)
        .create(&documents, &req.name)
        .await?;
    Ok((StatusCode::CREATED, Json(report)))
}

#[derive(Deserialize)]
struct ResyncRequest {
    source: DocumentSource,
}

async fn handle_resync_index(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<ResyncRequest>,
) -> ApiResult<BuildReport> {
    if !IndexStore::from_config(&state.config).exists(&name)? {
        return Err(RagError::IndexNotFound(name).into());
    }
    let documents = load_documents(&req.source, &state.config, &NoPrompt).await?;
    let embedder = shared_embedder(&state.config.embedding).await?;
    let report = IndexBuilder::from_config(&state.config, embedder)
        .resync(&name, &documents)
        .await?;
    Ok(Json(report))
}

async fn handle_delete_index(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, AppError> {
    IndexStore::from_config(&state.config).delete(&name)?;
    Ok(StatusCode::NO_CONTENT)
}

impl From<RagError> for AppError {
    fn from(err: RagError) -> Self {
        AppError::from(anyhow::Error::from(err))
    }
}

// ============ Personalities ============

async fn handle_list_personalities(State(state): State<AppState>) -> ApiResult<Vec<Personality>> {
    Ok(Json(state.personalities.list().await?))
}

async fn handle_add_personality(
    State(state): State<AppState>,
    Json(input): Json<PersonalityInput>,
) -> Result<(StatusCode, Json<Personality>), AppError> {
    let p = state.personalities.add(&input).await?;
    Ok((StatusCode::CREATED, Json(p)))
}

async fn handle_get_personality(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Personality> {
    state
        .personalities
        .get(id)
        .await?
        .map(Json)
        .ok_or_else(|| not_found(format!("personality {}", id)))
}

async fn handle_update_personality(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(input): Json<PersonalityInput>,
) -> ApiResult<Personality> {
    Ok(Json(state.personalities.update(id, &input).await?))
}

async fn handle_delete_personality(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    state.personalities.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============ Sessions ============

#[derive(Deserialize)]
struct CreateSessionRequest {
    personality_id: i64,
}

#[derive(Serialize)]
struct SessionCreated {
    id: String,
    chat_id: String,
    personality: String,
}

async fn handle_create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<SessionCreated>), AppError> {
    let personality = state
        .personalities
        .get(req.personality_id)
        .await?
        .ok_or_else(|| not_found(format!("personality {}", req.personality_id)))?;

    let session = ChatSession::new(personality);
    let created = SessionCreated {
        id: Uuid::new_v4().to_string(),
        chat_id: session.id().to_string(),
        personality: session.personality().name.clone(),
    };
    state
        .sessions
        .write()
        .await
        .insert(created.id.clone(), Arc::new(Mutex::new(session)));
    Ok((StatusCode::CREATED, Json(created)))
}

async fn handle_delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state
        .sessions
        .write()
        .await
        .remove(&id)
        .ok_or_else(|| not_found(format!("no session with id {}", id)))?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct SelectModelRequest {
    provider: String,
    model: String,
    #[serde(default)]
    vision: bool,
}

#[derive(Serialize)]
struct SelectedModel {
    provider: String,
    model_id: String,
    vision: bool,
}

async fn handle_select_model(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SelectModelRequest>,
) -> ApiResult<SelectedModel> {
    let session = state.session(&id).await?;
    let provider: Provider = req.provider.parse()?;
    let model = if req.vision {
        create_vision_model(provider, &req.model, &state.config.llm, &NoPrompt)?
    } else {
        create_chat_model(provider, &req.model, &state.config.llm, &NoPrompt)?
    };
    let selected = SelectedModel {
        provider: provider.slug().to_string(),
        model_id: model.model_id().to_string(),
        vision: req.vision,
    };

    let mut session = session.lock().await;
    if req.vision {
        session.set_vision_model(model);
    } else {
        session.set_model(model);
    }
    Ok(Json(selected))
}

#[derive(Deserialize)]
struct SelectIndexRequest {
    name: Option<String>,
}

#[derive(Serialize)]
struct SelectedIndex {
    index: Option<String>,
    loaded: bool,
}

async fn handle_select_index(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SelectIndexRequest>,
) -> ApiResult<SelectedIndex> {
    let session = state.session(&id).await?;
    let Some(name) = req.name else {
        session.lock().await.disable_retrieval();
        return Ok(Json(SelectedIndex {
            index: None,
            loaded: false,
        }));
    };

    let embedder = shared_embedder(&state.config.embedding).await?;
    let store = IndexStore::from_config(&state.config);
    let mut session = session.lock().await;
    let loaded = session.load_index(&store, &name, embedder, state.config.retrieval.k)?;
    Ok(Json(SelectedIndex {
        index: Some(name),
        loaded,
    }))
}

async fn handle_list_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Vec<ChatMessage>> {
    let session = state.session(&id).await?;
    let messages = session.lock().await.messages().to_vec();
    Ok(Json(messages))
}

#[derive(Deserialize)]
struct SendMessageRequest {
    content: String,
}

async fn handle_send_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<crate::chat::TurnOutcome> {
    let session = state.session(&id).await?;
    let mut session = session.lock().await;
    let outcome = session.submit(&req.content, &mut |_: &str| {}).await?;
    Ok(Json(outcome))
}

async fn handle_clear_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let session = state.session(&id).await?;
    session.lock().await.clear();
    Ok(StatusCode::NO_CONTENT)
}

async fn handle_image(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Bytes, BytesRejection>,
) -> ApiResult<crate::chat::image::ImageDescription> {
    let body = body.map_err(|rejection| {
        let status = rejection.status();
        AppError {
            status,
            code: if status == StatusCode::PAYLOAD_TOO_LARGE {
                "payload_too_large"
            } else {
                "bad_request"
            },
            message: rejection.body_text(),
        }
    })?;
    if body.is_empty() {
        return Err(RagError::InvalidInput("image body is empty".into()).into());
    }
    let session = state.session(&id).await?;
    let description = session.lock().await.analyze_image(&body).await?;
    Ok(Json(description))
}

use std::env;

use axum::{
    extract::{DefaultBodyLimit, Json, Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::error;
use uuid::Uuid;

use crate::{
    admins::AdminChanges,
    app_state::AppState,
    catalog::ModelChanges,
    logsink::LogFilter,
    models::{ChatDecision, ChatQuery, ModelCategory},
    pipeline::{ChatError, ChatOutcome},
};

// Mensajes visibles del contrato de error: genéricos a propósito, el
// detalle del proveedor sólo va al log operativo.
const AI_FAILED_MESSAGE: &str = "AI failed to respond.";
const DOCS_FAILED_MESSAGE: &str = "Failed to load documents.";

type ApiError = (StatusCode, Json<serde_json::Value>);

// --- Payloads y Respuestas de la API ---

/// Respuesta completa de una consulta de chat. Las banderas se exponen
/// como 0/1 en la frontera, igual que las produce el modelo.
#[derive(Serialize)]
pub struct ChatAnswerResponse {
    appropriate: u8,
    #[serde(rename = "inScope")]
    in_scope: u8,
    #[serde(rename = "answerInContext")]
    answer_in_context: u8,
    sources: Vec<String>,
    answer: String,
    escalated: u8,
    duration: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    language_env: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    question_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    framework: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    has_code: Option<bool>,
}

impl ChatAnswerResponse {
    fn new(decision: ChatDecision, duration: String) -> Self {
        Self {
            appropriate: decision.appropriate as u8,
            in_scope: decision.in_scope as u8,
            answer_in_context: decision.answer_in_context as u8,
            sources: decision.sources,
            answer: decision.answer,
            escalated: decision.escalated as u8,
            duration,
            language_env: decision.classification.language_env,
            question_type: decision.classification.question_type,
            framework: decision.classification.framework,
            has_code: decision.classification.has_code,
        }
    }
}

#[derive(Deserialize)]
pub struct CreateModelPayload {
    id: String,
    name: String,
    #[serde(rename = "fullName")]
    full_name: String,
    category: ModelCategory,
    #[serde(rename = "systemPrompt")]
    system_prompt: String,
    #[serde(default)]
    description: String,
    /// Nombre de la variable de entorno de la que leer la clave de API.
    #[serde(rename = "apiKeyEnv", default)]
    api_key_env: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateModelPayload {
    name: Option<String>,
    #[serde(rename = "fullName")]
    full_name: Option<String>,
    category: Option<ModelCategory>,
    #[serde(rename = "systemPrompt")]
    system_prompt: Option<String>,
    description: Option<String>,
    #[serde(rename = "apiKeyEnv", default)]
    api_key_env: Option<String>,
}

#[derive(Deserialize)]
pub struct RegisterAdminPayload {
    name: String,
    email: String,
    #[serde(default = "default_role")]
    role: String,
}

fn default_role() -> String {
    "admin".to_string()
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/chat", post(chat_handler))
        .route("/api/status", get(status_handler))
        .route(
            "/api/models",
            get(list_models_handler).post(create_model_handler),
        )
        .route(
            "/api/models/:id",
            get(get_model_handler)
                .put(update_model_handler)
                .delete(delete_model_handler),
        )
        .route("/api/docs/upload", post(upload_docs_handler))
        .route("/api/docs", get(list_docs_handler))
        .route(
            "/api/docs/:id",
            get(get_doc_handler).delete(delete_doc_handler),
        )
        .route("/api/admins/logs", get(chat_logs_handler))
        .route("/api/admins", get(list_admins_handler))
        .route("/api/admins/register", post(register_admin_handler))
        .route(
            "/api/admins/:id",
            get(get_admin_handler)
                .put(update_admin_handler)
                .delete(delete_admin_handler),
        )
        .layer(DefaultBodyLimit::max(25 * 1024 * 1024))
        .with_state(app_state)
}

// --- Chat ---

#[axum::debug_handler]
async fn chat_handler(
    State(state): State<AppState>,
    Json(payload): Json<ChatQuery>,
) -> Result<Response, ApiError> {
    match state.pipeline.handle(&payload).await {
        // La respuesta pre-escalada conserva su forma reducida histórica:
        // el frontend distingue ambas por la presencia de las banderas.
        Ok(ChatOutcome::PreEscalated { answer }) => {
            Ok(Json(json!({ "answer": answer, "escalated": true })).into_response())
        }
        Ok(ChatOutcome::Answered { decision, duration }) => {
            Ok(Json(ChatAnswerResponse::new(decision, duration)).into_response())
        }
        Err(ChatError::ModelNotFound(id)) => Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": format!("Invalid model selected: {id}")})),
        )),
        Err(ChatError::Documents(e)) => {
            error!("Error cargando el corpus documental: {e:#}");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": DOCS_FAILED_MESSAGE})),
            ))
        }
        Err(e) => {
            error!("La consulta de chat no llegó a término: {e}");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": AI_FAILED_MESSAGE})),
            ))
        }
    }
}

// --- Estado del servicio ---

#[axum::debug_handler]
async fn status_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let api_keys: serde_json::Map<String, serde_json::Value> = state
        .catalog
        .list()
        .into_iter()
        .map(|model| {
            let status = if model.api_key.is_some() {
                "configured"
            } else {
                "missing"
            };
            (model.id, json!(status))
        })
        .collect();

    Json(json!({
        "status": "Backend is running",
        "apiKeys": api_keys,
        "uploads": {
            "directory": state.config.uploads_dir.display().to_string(),
            "exists": state.config.uploads_dir.is_dir(),
        },
    }))
}

// --- Modelos ---

#[axum::debug_handler]
async fn list_models_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.catalog.list())
}

#[axum::debug_handler]
async fn get_model_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    match state.catalog.get(&id) {
        Some(model) => Ok(Json(model).into_response()),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Model not found."})),
        )),
    }
}

#[axum::debug_handler]
async fn create_model_handler(
    State(state): State<AppState>,
    Json(payload): Json<CreateModelPayload>,
) -> Result<Response, ApiError> {
    let now = chrono::Utc::now();
    let api_key = payload.api_key_env.as_deref().and_then(|var| env::var(var).ok());
    let model = crate::models::ModelDefinition {
        id: payload.id,
        name: payload.name,
        full_name: payload.full_name,
        api_key,
        category: payload.category,
        system_prompt: payload.system_prompt,
        description: payload.description,
        created_at: now,
        updated_at: now,
    };

    match state.catalog.insert(model) {
        Ok(created) => Ok((StatusCode::CREATED, Json(created)).into_response()),
        Err(e) => Err((
            StatusCode::CONFLICT,
            Json(json!({"error": e.to_string()})),
        )),
    }
}

#[axum::debug_handler]
async fn update_model_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<UpdateModelPayload>,
) -> Result<Response, ApiError> {
    let changes = ModelChanges {
        name: payload.name,
        full_name: payload.full_name,
        category: payload.category,
        system_prompt: payload.system_prompt,
        description: payload.description,
        api_key: payload
            .api_key_env
            .map(|var| env::var(var).ok()),
    };
    match state.catalog.update(&id, changes) {
        Some(updated) => Ok(Json(updated).into_response()),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Model not found."})),
        )),
    }
}

#[axum::debug_handler]
async fn delete_model_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    match state.catalog.remove(&id) {
        Some(removed) => Ok(Json(removed).into_response()),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Model not found."})),
        )),
    }
}

// --- Documentos ---

#[axum::debug_handler]
async fn upload_docs_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let mut uploaded = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": format!("Invalid multipart body: {e}")})),
        )
    })? {
        let Some(filename) = field.file_name().map(str::to_string) else {
            continue;
        };
        let content_type = field.content_type().map(str::to_string);
        let bytes = field.bytes().await.map_err(|e| {
            (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": format!("Could not read uploaded file: {e}")})),
            )
        })?;

        let record = state
            .documents
            .upload(&filename, content_type.as_deref(), &bytes)
            .map_err(|e| {
                error!("Error procesando la subida de '{filename}': {e:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"error": "Failed to process the uploaded document."})),
                )
            })?;
        uploaded.push(record);
    }

    if uploaded.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "No file provided."})),
        ));
    }
    Ok((StatusCode::CREATED, Json(uploaded)).into_response())
}

#[axum::debug_handler]
async fn list_docs_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.documents.list_all())
}

#[axum::debug_handler]
async fn get_doc_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    match state.documents.get(id) {
        Some(doc) => Ok(Json(doc).into_response()),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Document not found."})),
        )),
    }
}

#[axum::debug_handler]
async fn delete_doc_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    match state.documents.remove(id) {
        Ok(Some(removed)) => Ok(Json(removed).into_response()),
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Document not found."})),
        )),
        Err(e) => {
            error!("Error eliminando el documento {id}: {e:#}");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "Failed to delete the document."})),
            ))
        }
    }
}

// --- Logs de chat ---

#[axum::debug_handler]
async fn chat_logs_handler(
    State(state): State<AppState>,
    Query(filter): Query<LogFilter>,
) -> Result<Response, ApiError> {
    match state.chat_log.list(&filter) {
        Ok(records) => Ok(Json(records).into_response()),
        Err(e) => {
            error!("Error leyendo los logs de chat: {e:#}");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "Failed to fetch logs."})),
            ))
        }
    }
}

// --- Administradores ---

#[axum::debug_handler]
async fn list_admins_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.admins.list())
}

#[axum::debug_handler]
async fn get_admin_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    match state.admins.get(id) {
        Some(admin) => Ok(Json(admin).into_response()),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Admin not found."})),
        )),
    }
}

#[axum::debug_handler]
async fn register_admin_handler(
    State(state): State<AppState>,
    Json(payload): Json<RegisterAdminPayload>,
) -> Result<Response, ApiError> {
    match state
        .admins
        .register(&payload.name, &payload.email, &payload.role)
    {
        Ok(admin) => Ok((StatusCode::CREATED, Json(admin)).into_response()),
        Err(e) => Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": e.to_string()})),
        )),
    }
}

#[axum::debug_handler]
async fn update_admin_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(changes): Json<AdminChanges>,
) -> Result<Response, ApiError> {
    match state.admins.update(id, changes) {
        Ok(Some(updated)) => Ok(Json(updated).into_response()),
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Admin not found."})),
        )),
        Err(e) => Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": e.to_string()})),
        )),
    }
}

#[axum::debug_handler]
async fn delete_admin_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    match state.admins.remove(id) {
        Ok(Some(removed)) => Ok(Json(removed).into_response()),
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Admin not found."})),
        )),
        Err(e) => {
            error!("Error eliminando el administrador {id}: {e:#}");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "Failed to delete the admin."})),
            ))
        }
    }
}

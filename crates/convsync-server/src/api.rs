use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, rejection::JsonRejection, rejection::QueryRejection},
    extract::{DefaultBodyLimit, Extension, Path, Query, State},
    http::{Method, StatusCode},
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use convsync_shared::protocol::{
    ConversationMetadata, ConversationUpsert, DeleteBlobRequest, DeleteBlobResponse,
    GetBlobQuery, RemoteFileEntry, SaveBlobResponse,
};
use convsync_shared::validate::validate_conversation;
use convsync_shared::{Conversation, ConversationId, OwnerId};

use crate::auth::{auth_middleware, TokenAuthenticator};
use crate::blob_store::BlobStore;
use crate::config::ServerConfig;
use crate::conversations::ConversationService;
use crate::error::ServerError;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};

#[derive(Clone)]
pub struct AppState {
    pub blob_store: Arc<BlobStore>,
    pub conversations: ConversationService,
    pub auth: TokenAuthenticator,
    pub rate_limiter: RateLimiter,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    // Auth runs first, then the per-owner rate limit.
    let protected = Router::new()
        .route("/sync/list", get(sync_list))
        .route("/sync/get", get(sync_get))
        .route("/sync/save", post(sync_save))
        .route("/sync/delete", post(sync_delete))
        .route(
            "/conversations",
            post(upsert_conversation).get(list_conversations),
        )
        .route(
            "/conversations/:id",
            get(get_conversation).delete(delete_conversation),
        )
        .route_layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ))
        .route_layer(middleware::from_fn_with_state(
            state.auth.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/health", get(health_check))
        .merge(protected)
        .layer(DefaultBodyLimit::max(state.config.max_blob_size))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    name: String,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        name: state.config.instance_name.clone(),
    })
}

fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ServerError> {
    body.map(|Json(value)| value)
        .map_err(|e| ServerError::BadRequest(e.body_text()))
}

// ─── Blob store ───

async fn sync_list(
    State(state): State<AppState>,
    Extension(owner): Extension<OwnerId>,
) -> Result<Json<Vec<RemoteFileEntry>>, ServerError> {
    Ok(Json(state.blob_store.list(&owner).await?))
}

async fn sync_get(
    State(state): State<AppState>,
    Extension(owner): Extension<OwnerId>,
    query: Result<Query<GetBlobQuery>, QueryRejection>,
) -> Result<Json<Conversation>, ServerError> {
    let Query(query) = query.map_err(|e| ServerError::BadRequest(e.body_text()))?;
    Ok(Json(state.blob_store.get(&owner, &query.file_id).await?))
}

async fn sync_save(
    State(state): State<AppState>,
    Extension(owner): Extension<OwnerId>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<SaveBlobResponse>, ServerError> {
    let body = body.map_err(|e| match e.status() {
        StatusCode::PAYLOAD_TOO_LARGE => ServerError::PayloadTooLarge {
            max: state.config.max_blob_size,
        },
        _ => ServerError::BadRequest(e.body_text()),
    })?;

    let conversation: Conversation = serde_json::from_slice(&body)
        .map_err(|e| ServerError::BadRequest(format!("Invalid conversation JSON: {e}")))?;
    validate_conversation(&conversation)?;

    let file_id = state.blob_store.save(&owner, &conversation).await?;

    info!(
        owner = %owner,
        conversation_id = %conversation.id,
        file_id = %file_id,
        "Conversation saved"
    );
    Ok(Json(SaveBlobResponse { file_id }))
}

async fn sync_delete(
    State(state): State<AppState>,
    Extension(owner): Extension<OwnerId>,
    body: Result<Json<DeleteBlobRequest>, JsonRejection>,
) -> Result<Json<DeleteBlobResponse>, ServerError> {
    let request = json_body(body)?;
    state.blob_store.delete(&owner, &request.file_id).await?;
    Ok(Json(DeleteBlobResponse { success: true }))
}

// ─── Metadata registry ───

async fn upsert_conversation(
    State(state): State<AppState>,
    Extension(owner): Extension<OwnerId>,
    body: Result<Json<ConversationUpsert>, JsonRejection>,
) -> Result<Json<ConversationMetadata>, ServerError> {
    let upsert = json_body(body)?;
    Ok(Json(state.conversations.upsert(&owner, upsert).await?))
}

async fn list_conversations(
    State(state): State<AppState>,
    Extension(owner): Extension<OwnerId>,
) -> Result<Json<Vec<ConversationMetadata>>, ServerError> {
    Ok(Json(state.conversations.list(&owner).await?))
}

async fn get_conversation(
    State(state): State<AppState>,
    Extension(owner): Extension<OwnerId>,
    Path(id): Path<String>,
) -> Result<Json<ConversationMetadata>, ServerError> {
    let id = ConversationId(id);
    Ok(Json(state.conversations.get(&id, &owner).await?))
}

async fn delete_conversation(
    State(state): State<AppState>,
    Extension(owner): Extension<OwnerId>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let id = ConversationId(id);
    state.conversations.delete(&id, &owner).await?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

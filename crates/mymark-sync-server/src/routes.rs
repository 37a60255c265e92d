//! HTTP routes.

use std::sync::Arc;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use mymark_sync::{DomainManager, EngineFactory};
use mymark_sync_core::UserId;
use mymark_sync_protocol::limits;
use mymark_sync_store::DocumentRootStore;

use crate::error::ApiError;
use crate::session::SessionResolver;
use crate::socket;

/// Shared state for every handler.
pub struct AppState<F: EngineFactory> {
    pub manager: Arc<DomainManager<F>>,
    pub roots: Arc<dyn DocumentRootStore>,
    pub sessions: Arc<dyn SessionResolver>,
}

impl<F: EngineFactory> Clone for AppState<F> {
    fn clone(&self) -> Self {
        Self {
            manager: Arc::clone(&self.manager),
            roots: Arc::clone(&self.roots),
            sessions: Arc::clone(&self.sessions),
        }
    }
}

impl<F: EngineFactory> AppState<F> {
    async fn user(&self, headers: &HeaderMap) -> Result<UserId, ApiError> {
        self.sessions
            .resolve(headers)
            .await
            .ok_or(ApiError::Unauthorized)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentUrlResponse {
    pub document_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreDocumentUrlRequest {
    pub doc_url: String,
}

/// Build the server's router.
pub fn build_router<F: EngineFactory>(state: AppState<F>) -> Router {
    Router::new()
        .route("/automerge", get(automerge::<F>))
        .route(
            "/api/sync/document-url",
            get(get_document_url::<F>).post(store_document_url::<F>),
        )
        .route("/health", get(health))
        .with_state(state)
}

async fn automerge<F: EngineFactory>(
    State(state): State<AppState<F>>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let user_id = match state.user(&headers).await {
        Ok(user_id) => user_id,
        Err(e) => return e.into_response(),
    };
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let manager = Arc::clone(&state.manager);
    ws.max_message_size(limits::MAX_FRAME_BYTES)
        .on_upgrade(move |socket| socket::serve(manager, user_id, socket))
}

async fn get_document_url<F: EngineFactory>(
    State(state): State<AppState<F>>,
    headers: HeaderMap,
) -> Result<Json<DocumentUrlResponse>, ApiError> {
    let user_id = state.user(&headers).await?;
    let document_url = state.roots.get_root_url(&user_id).await?;
    Ok(Json(DocumentUrlResponse { document_url }))
}

async fn store_document_url<F: EngineFactory>(
    State(state): State<AppState<F>>,
    headers: HeaderMap,
    Json(body): Json<StoreDocumentUrlRequest>,
) -> Result<StatusCode, ApiError> {
    let user_id = state.user(&headers).await?;
    state.roots.store_root_url(&user_id, &body.doc_url).await?;
    tracing::info!(user_id = %user_id, "workspace root stored");
    Ok(StatusCode::NO_CONTENT)
}

async fn health() -> &'static str {
    "ok"
}

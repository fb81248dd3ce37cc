//! HTTP server for semdex
//!
//! Exposes the search engine over HTTP using axum.
//!
//! # Endpoints
//!
//! - `POST /search` - Nearest records to a query vector
//! - `GET /records/:id` - One record by primary or legacy id
//! - `POST /admin/reload` - Rebuild the vector store
//! - `GET /health` - Readiness and the loaded generation

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::{Any, CorsLayer};

use crate::catalog::RecordId;
use crate::engine::{SearchEngine, SearchError};
use crate::model::{ErrorResponse, HealthResponse, SearchRequest, SearchResponse};

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (status, Json(ErrorResponse { error: error.into() })).into_response()
}

/// POST /search - Query for the nearest records
///
/// The record-store lookup blocks, so the whole query runs on the blocking
/// pool against one snapshot of the vector store.
async fn search(
    State(engine): State<Arc<SearchEngine>>,
    Json(request): Json<SearchRequest>,
) -> Response {
    let top_k = request.effective_top_k();
    let started = Instant::now();

    let engine_bg = engine.clone();
    let result = tokio::task::spawn_blocking(move || {
        let store = engine_bg.snapshot();
        engine_bg
            .search_in(&store, &request.vector, top_k)
            .map(|results| (results, store.generation()))
    })
    .await;

    match result {
        Ok(Ok((results, generation))) => {
            let response = SearchResponse {
                results,
                query_time_ms: started.elapsed().as_secs_f64() * 1000.0,
                generation,
            };
            (StatusCode::OK, Json(response)).into_response()
        }
        Ok(Err(SearchError::Index(e))) => error_response(StatusCode::BAD_REQUEST, e.to_string()),
        Ok(Err(e)) => {
            tracing::error!("Search failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("search join error: {}", e),
        ),
    }
}

/// GET /records/:id
async fn get_record(State(engine): State<Arc<SearchEngine>>, Path(id): Path<i64>) -> Response {
    let result = tokio::task::spawn_blocking(move || engine.get_by_id(RecordId(id))).await;

    match result {
        Ok(Ok(Some(record))) => (StatusCode::OK, Json(record)).into_response(),
        Ok(Ok(None)) => error_response(StatusCode::NOT_FOUND, format!("record {} not found", id)),
        Ok(Err(e)) => {
            tracing::error!("Lookup of record {} failed: {}", id, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("lookup join error: {}", e),
        ),
    }
}

/// POST /admin/reload - Rebuild and swap in the next generation
async fn reload(State(engine): State<Arc<SearchEngine>>) -> Response {
    match tokio::task::spawn_blocking(move || engine.reload()).await {
        Ok(status) => (StatusCode::OK, Json(status)).into_response(),
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("reload join error: {}", e),
        ),
    }
}

/// GET /health
async fn health(State(engine): State<Arc<SearchEngine>>) -> impl IntoResponse {
    let store = engine.snapshot();
    let ready = !store.is_empty();

    let response = HealthResponse {
        status: if ready { "ok" } else { "empty" }.to_string(),
        ready,
        vectors_loaded: store.len(),
        dimensions: store.dim().unwrap_or(0),
        memory_mb: store.memory_bytes() as f64 / (1024.0 * 1024.0),
        generation: store.generation(),
    };

    (StatusCode::OK, Json(response))
}

/// Create the axum router
pub fn create_router(engine: Arc<SearchEngine>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/search", post(search))
        .route("/records/:id", get(get_record))
        .route("/admin/reload", post(reload))
        .route("/health", get(health))
        .layer(cors)
        .with_state(engine)
}

/// Start the server
pub async fn serve(engine: Arc<SearchEngine>, addr: std::net::SocketAddr) -> std::io::Result<()> {
    let router = create_router(engine);

    tracing::info!("Starting semdex server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

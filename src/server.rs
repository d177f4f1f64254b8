//! HTTP transport for the embedding service.
//!
//! `GET /` liveness, `GET /health` readiness, `POST /embed` one text → one vector.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

use crate::config;
use crate::error::ServiceError;
use crate::service::EmbeddingService;

#[derive(Debug, Deserialize)]
pub struct EmbedRequest {
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EmbedResponse {
    pub embedding: Vec<f32>,
    pub dimension: usize,
}

/// Error body: `{"error": "<kind>", "detail": "<message>"}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    error: ServiceError,
}

impl From<ServiceError> for ApiError {
    fn from(error: ServiceError) -> Self {
        let status = match error {
            ServiceError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ServiceError::NotReady(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError { status, error }
    }
}

/// Unreadable bodies are client errors. Oversized ones keep 413; everything else is 400.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        log::debug!("Rejected /embed body: {}", rejection.body_text());
        let status = if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            StatusCode::PAYLOAD_TOO_LARGE
        } else {
            StatusCode::BAD_REQUEST
        };
        ApiError {
            status,
            error: ServiceError::InvalidInput(format!("Invalid request body: {}", rejection.body_text())),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.error.kind(),
            "detail": self.error.to_string(),
        });
        (self.status, Json(body)).into_response()
    }
}

/// Build the router. Handlers only borrow the service; it is never mutated through them.
pub fn router(service: Arc<EmbeddingService>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/embed", post(embed_handler))
        .layer(DefaultBodyLimit::max(config::http::MAX_BODY_BYTES))
        .layer(middleware::from_fn(log_requests))
        .layer(cors)
        .with_state(service)
}

async fn root_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "message": config::http::ROOT_MESSAGE }))
}

async fn health_handler(State(service): State<Arc<EmbeddingService>>) -> impl IntoResponse {
    let report = service.health();
    let status = if report.status == "healthy" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

async fn embed_handler(
    State(service): State<Arc<EmbeddingService>>,
    payload: Result<Json<EmbedRequest>, JsonRejection>,
) -> Result<Json<EmbedResponse>, ApiError> {
    let Json(request) = payload?;

    let embedding = service.embed(&request.text).await?;
    Ok(Json(EmbedResponse {
        dimension: embedding.dimension,
        embedding: embedding.values,
    }))
}

async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let started = Instant::now();

    let response = next.run(request).await;

    let status = response.status();
    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
    if status.is_server_error() {
        log::warn!("{} {} -> {} ({:.1}ms)", method, path, status.as_u16(), elapsed_ms);
    } else {
        log::info!("{} {} -> {} ({:.1}ms)", method, path, status.as_u16(), elapsed_ms);
    }
    response
}

/// Serve until Ctrl-C / SIGTERM, then drain in-flight requests.
pub async fn serve(listener: TcpListener, service: Arc<EmbeddingService>) -> std::io::Result<()> {
    let app = router(Arc::clone(&service));
    let shutdown_service = Arc::clone(&service);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            log::info!("Shutdown signal received, draining in-flight requests");
            shutdown_service.begin_shutdown();
        })
        .await?;

    service.mark_stopped();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                log::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

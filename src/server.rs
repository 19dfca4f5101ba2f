//! Read API over stored delegations.

use std::net::SocketAddr;

use anyhow::Result;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::query::{PageParams, QueryError, QueryService};
use crate::types::DelegationRecord;

pub const DELEGATIONS_PATH: &str = "/xtz/delegations";
pub static TOTAL_PAGES_HEADER: HeaderName = HeaderName::from_static("x-total-pages");

#[derive(Clone)]
struct ApiState {
    query: QueryService,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    ok: bool,
    version: &'static str,
}

#[derive(Debug, Serialize)]
struct ApiErrorBody {
    ok: bool,
    error: String,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn internal() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "Internal Server Error".to_string(),
        }
    }
}

impl From<QueryError> for ApiError {
    fn from(error: QueryError) -> Self {
        match error {
            QueryError::Validation(err) => {
                warn!(param = err.param, value = %err.value, "rejected delegation query");
                Self::bad_request(format!("Bad Request: {err}"))
            }
            QueryError::Store(err) => {
                error!(error = %err, "couldn't read delegations from store");
                Self::internal()
            }
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        warn!(error = %rejection, "rejected delegation query string");
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ApiErrorBody {
            ok: false,
            error: self.message,
        });
        (self.status, body).into_response()
    }
}

pub fn router(query: QueryService) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([TOTAL_PAGES_HEADER.clone()]);

    Router::new()
        .route("/health", get(health))
        .route(DELEGATIONS_PATH, get(delegations))
        .with_state(ApiState { query })
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

pub async fn run_server(query: QueryService, bind: SocketAddr) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("delegation API listening on http://{bind}");
    axum::serve(listener, router(query))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("delegation API stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed listening for shutdown signal");
        std::future::pending::<()>().await;
    }
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn delegations(
    State(state): State<ApiState>,
    params: Result<Query<PageParams>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(params) = params?;
    let page = state.query.handle(&params).await?;
    let mut response = Json::<Vec<DelegationRecord>>(page.records).into_response();
    response
        .headers_mut()
        .insert(TOTAL_PAGES_HEADER.clone(), HeaderValue::from(page.total_pages));
    Ok(response)
}

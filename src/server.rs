use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router as AxumRouter};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::config::RuntimeConfig;
use crate::error::{RouterError, categorize_error};
use crate::pipeline::{Outcome, Pipeline, build_pipeline};
use crate::registry::AgentDescriptor;
use crate::telemetry::TelemetrySink;
use crate::todos::{TodoFilter, TodoPriority, TodoRecord, TodoStatus, TodoStore};

pub const SERVER_AUTH_TOKEN_ENV: &str = "AGENT_ROUTER_SERVER_AUTH_TOKEN";

#[derive(Clone)]
pub struct ServerState {
    pub profile: String,
    pub pipeline: Pipeline,
    pub store: Arc<TodoStore>,
    pub telemetry: TelemetrySink,
    pub auth_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ServerHealthResponse {
    pub status: &'static str,
    pub profile: String,
    pub model: String,
    pub agents: usize,
}

#[derive(Debug, Deserialize)]
pub struct RouteRequest {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct RouteResponse {
    #[serde(flatten)]
    pub outcome: Outcome,
    pub latency_ms: u128,
}

#[derive(Debug, Default, Deserialize)]
pub struct TodoQuery {
    pub status: Option<TodoStatus>,
    pub priority: Option<TodoPriority>,
    pub due_date: Option<NaiveDate>,
}

impl From<TodoQuery> for TodoFilter {
    fn from(query: TodoQuery) -> Self {
        TodoFilter {
            status: query.status,
            priority: query.priority,
            due_date: query.due_date,
        }
    }
}

pub type ApiError = (StatusCode, Json<Value>);
pub type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

pub fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

/// Map a pipeline failure to a status code and a categorized error body.
fn pipeline_error(err: &anyhow::Error) -> ApiError {
    let status = match err.downcast_ref::<RouterError>() {
        Some(RouterError::Provider { .. }) => StatusCode::BAD_GATEWAY,
        Some(RouterError::Routing { .. } | RouterError::Planning { .. }) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        Some(_) => StatusCode::INTERNAL_SERVER_ERROR,
        None if format!("{err}").contains("cannot be empty") => StatusCode::BAD_REQUEST,
        None => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let category = categorize_error(err);
    (
        status,
        Json(json!({
            "error": format!("{err:#}"),
            "code": category.code(),
        })),
    )
}

pub fn check_server_auth(
    state: &ServerState,
    headers: &axum::http::HeaderMap,
) -> Result<(), ApiError> {
    let Some(expected_token) = state.auth_token.as_deref() else {
        return Ok(()); // no token configured, auth disabled
    };

    let header_value = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let provided_token = header_value
        .strip_prefix("Bearer ")
        .unwrap_or_default()
        .trim();

    if provided_token.is_empty() || provided_token != expected_token {
        return Err(api_error(
            StatusCode::UNAUTHORIZED,
            "missing or invalid Authorization bearer token",
        ));
    }

    Ok(())
}

pub async fn handle_server_health(
    State(state): State<Arc<ServerState>>,
) -> Json<ServerHealthResponse> {
    Json(ServerHealthResponse {
        status: "ok",
        profile: state.profile.clone(),
        model: state.pipeline.model_name().to_string(),
        agents: state.pipeline.registry().len(),
    })
}

pub async fn handle_route(
    State(state): State<Arc<ServerState>>,
    headers: axum::http::HeaderMap,
    Json(request): Json<RouteRequest>,
) -> ApiResult<RouteResponse> {
    check_server_auth(&state, &headers)?;
    let started_at = Instant::now();

    let outcome = state
        .pipeline
        .run(&request.message, |_| {})
        .await
        .map_err(|err| {
            tracing::warn!(error = %format!("{err:#}"), "route request failed");
            pipeline_error(&err)
        })?;

    let latency_ms = started_at.elapsed().as_millis();
    state.telemetry.emit(
        "server.route.completed",
        json!({ "latency_ms": latency_ms }),
    );
    Ok(Json(RouteResponse {
        outcome,
        latency_ms,
    }))
}

pub async fn handle_agents(
    State(state): State<Arc<ServerState>>,
    headers: axum::http::HeaderMap,
) -> ApiResult<Vec<AgentDescriptor>> {
    check_server_auth(&state, &headers)?;
    let descriptors = state
        .pipeline
        .registry()
        .descriptors()
        .into_iter()
        .cloned()
        .collect();
    Ok(Json(descriptors))
}

pub async fn handle_todos(
    State(state): State<Arc<ServerState>>,
    headers: axum::http::HeaderMap,
    Query(query): Query<TodoQuery>,
) -> ApiResult<Vec<TodoRecord>> {
    check_server_auth(&state, &headers)?;
    let filter = TodoFilter::from(query);
    let records = state
        .store
        .list(&filter)
        .map_err(|err| api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}")))?;
    Ok(Json(records))
}

pub fn build_server_router(state: Arc<ServerState>) -> AxumRouter {
    AxumRouter::new()
        .route("/healthz", get(handle_server_health))
        .route("/v1/route", post(handle_route))
        .route("/v1/agents", get(handle_agents))
        .route("/v1/todos", get(handle_todos))
        .with_state(state)
}

pub async fn run_server(
    cfg: RuntimeConfig,
    host: String,
    port: u16,
    telemetry: &TelemetrySink,
) -> Result<()> {
    let addr = format!("{host}:{port}")
        .parse::<SocketAddr>()
        .with_context(|| format!("invalid server bind address '{}:{}'", host, port))?;
    let (pipeline, store) = build_pipeline(&cfg, telemetry.clone())?;
    let state = Arc::new(ServerState {
        profile: cfg.profile.clone(),
        pipeline,
        store,
        telemetry: telemetry.clone(),
        auth_token: std::env::var(SERVER_AUTH_TOKEN_ENV)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty()),
    });

    telemetry.emit(
        "server.started",
        json!({
            "host": host,
            "port": port,
            "profile": cfg.profile,
            "model": state.pipeline.model_name(),
        }),
    );

    println!(
        "Server mode listening on http://{} (health: /healthz, route: /v1/route, agents: /v1/agents, todos: /v1/todos)",
        addr
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind server listener")?;
    axum::serve(listener, build_server_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server runtime failed")
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { println!("\nReceived Ctrl+C, shutting down gracefully..."); }
        _ = terminate => { println!("\nReceived SIGTERM, shutting down gracefully..."); }
    }
}

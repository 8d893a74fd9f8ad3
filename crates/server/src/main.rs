use std::{convert::Infallible, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    routing::{delete, get, post},
    Json, Router,
};
use client_core::{
    ControlContext, GatewayClientFactory, MissingRemoteClientFactory, RemoteClientFactory,
    SessionPool,
};
use serde::Deserialize;
use shared::{
    domain::OperatorId,
    error::{ApiError, ErrorCode},
    protocol::{AccountStatus, ControlReply, ControlRequest, OperationStatus, SubscriptionStats},
};
use storage::{CredentialStore, SubscriptionLedger};
use tokio::sync::broadcast;
use tokio_stream::{wrappers::BroadcastStream, Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod api;
mod config;

use api::ApiContext;
use config::load_settings;

const MAX_CONTROL_BODY_BYTES: usize = 64 * 1024;
const EVENT_BUFFER: usize = 256;

#[derive(Clone)]
struct AppState {
    api: ApiContext,
}

#[derive(Debug, Deserialize)]
struct OperatorQuery {
    operator_id: i64,
}

#[derive(Debug, Deserialize)]
struct EventsQuery {
    operator_id: Option<i64>,
}

type HttpError = (StatusCode, Json<ApiError>);

fn http_error(error: ApiError) -> HttpError {
    let status = match error.code {
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Conflict => StatusCode::CONFLICT,
        ErrorCode::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(error))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let settings = load_settings();
    settings.prepare_paths()?;

    let credentials = CredentialStore::load(&settings.credentials_path).await;
    let ledger = Arc::new(SubscriptionLedger::load(&settings.ledger_path).await);
    let factory: Arc<dyn RemoteClientFactory> = match &settings.gateway_url {
        Some(url) => Arc::new(
            GatewayClientFactory::new(url)
                .with_context(|| format!("invalid gateway url '{url}'"))?,
        ),
        None => {
            warn!("no gateway configured; accounts will stay offline");
            Arc::new(MissingRemoteClientFactory)
        }
    };
    let pool = Arc::new(SessionPool::new(credentials, factory));
    info!(accounts = pool.len().await, "account pool loaded");

    let control = ControlContext::new(Arc::clone(&pool), ledger);
    let shutdown = CancellationToken::new();

    let stagger = settings.connect_stagger();
    let activity = control.activity(settings.activity());
    let activity_shutdown = shutdown.clone();
    let background = tokio::spawn(async move {
        pool.connect_all(stagger).await;
        activity.run(activity_shutdown).await;
    });

    let (events, _) = broadcast::channel(EVENT_BUFFER);
    let state = AppState {
        api: ApiContext::new(control, events, settings.broadcast_interval()),
    };
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings
        .bind_addr
        .parse()
        .with_context(|| format!("invalid bind address '{}'", settings.bind_addr))?;
    info!(%addr, "control server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown.cancel();
    if let Err(error) = background.await {
        warn!(%error, "background task ended abnormally");
    }
    info!("control server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(%error, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/control", post(http_control))
        .route("/operations", get(http_operation_status))
        .route("/events", get(http_events))
        .route("/accounts", get(http_list_accounts))
        .route("/accounts/:phone", delete(http_remove_account))
        .route("/subscriptions", get(http_subscriptions))
        .layer(RequestBodyLimitLayer::new(MAX_CONTROL_BODY_BYTES))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn http_control(
    State(state): State<Arc<AppState>>,
    Query(q): Query<OperatorQuery>,
    Json(request): Json<ControlRequest>,
) -> Result<Json<ControlReply>, HttpError> {
    api::handle_control(&state.api, OperatorId(q.operator_id), request)
        .await
        .map(Json)
        .map_err(http_error)
}

async fn http_operation_status(
    State(state): State<Arc<AppState>>,
    Query(q): Query<OperatorQuery>,
) -> Result<Json<OperationStatus>, HttpError> {
    api::operation_status(&state.api, OperatorId(q.operator_id))
        .map(Json)
        .map_err(http_error)
}

async fn http_events(
    State(state): State<Arc<AppState>>,
    Query(q): Query<EventsQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let only = q.operator_id.map(OperatorId);
    let stream = BroadcastStream::new(state.api.events.subscribe()).filter_map(move |message| {
        let event = match message {
            Ok(event) => event,
            Err(error) => {
                warn!(%error, "event subscriber lagged");
                return None;
            }
        };
        if only.is_some_and(|operator| operator != event.operator_id) {
            return None;
        }
        match Event::default().json_data(&event) {
            Ok(sse) => Some(Ok(sse)),
            Err(error) => {
                warn!(%error, "failed to encode event");
                None
            }
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn http_list_accounts(State(state): State<Arc<AppState>>) -> Json<Vec<AccountStatus>> {
    Json(api::list_accounts(&state.api).await)
}

async fn http_remove_account(
    State(state): State<Arc<AppState>>,
    Path(phone): Path<String>,
) -> Result<impl IntoResponse, HttpError> {
    api::remove_account(&state.api, &phone)
        .await
        .map_err(http_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn http_subscriptions(State(state): State<Arc<AppState>>) -> Json<Vec<SubscriptionStats>> {
    Json(api::subscription_stats(&state.api).await)
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;

use std::sync::Arc;
use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tokio::sync::watch;
use crate::config::ProbeConfig;
use crate::directory_manager::DirectoryHandle;
use crate::scrape::{self, ShellyClient, SCRAPE_TIMEOUT_HEADER};
use shared::types::TargetRecord;

#[derive(Clone)]
pub struct AppState {
    pub directory: DirectoryHandle,
    pub fingerprint_rx: watch::Receiver<String>,
    pub client: ShellyClient,
    pub probe: Arc<ProbeConfig>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(ok))
        .route("/readyz", get(ok))
        .route("/targets", get(get_targets))
        .route("/targets/hash", get(get_fingerprint))
        .route("/probe", get(probe))
        .with_state(state)
}

async fn ok() -> &'static str {
    "Ok"
}

async fn get_targets(
    State(state): State<AppState>,
) -> Result<Json<Vec<TargetRecord>>, StatusCode> {
    state
        .directory
        .get_targets()
        .await
        .map(Json)
        .map_err(|e| {
            tracing::error!("Failed to query targets: {}", e);
            StatusCode::BAD_REQUEST
        })
}

async fn get_fingerprint(State(state): State<AppState>) -> String {
    state.fingerprint_rx.borrow().clone()
}

async fn probe(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let header_value = headers
        .get(SCRAPE_TIMEOUT_HEADER)
        .and_then(|value| value.to_str().ok());

    let timeout = match scrape::scrape_timeout(header_value, state.probe.default_timeout_secs) {
        Ok(timeout) => timeout,
        Err(e) => {
            tracing::error!("Failed to detect Prometheus timeout: {:#}", e);
            return (
                StatusCode::BAD_REQUEST,
                format!("failed to parse timeout from Prometheus header: {:#}", e),
            )
                .into_response();
        }
    };

    match scrape::scrape(&state.directory, &state.client, timeout).await {
        Ok(body) => (
            [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("Failed to collect metrics: {:#}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

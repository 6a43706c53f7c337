//! HTTP surface: the update trigger and the metrics exposition.
//!
//! Both endpoints are gated by the same bearer token. The trigger shares
//! the update lock with the scheduler, so a request during a running
//! session reports a skip instead of queueing.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::get;
use axum::Router;
use log::info;
use serde::Deserialize;

use crate::metrics::MetricsRegistry;
use crate::scheduler::{Attempt, Updater};

pub const LISTEN_PORT: u16 = 8080;

/// State shared across axum handlers. Endpoints that were not enabled at
/// startup are simply absent.
pub struct ApiState {
    pub token: String,
    pub updater: Option<Arc<Updater>>,
    pub metrics: Option<Arc<MetricsRegistry>>,
}

#[derive(Deserialize)]
struct UpdateQuery {
    image: Option<String>,
}

pub async fn serve(state: Arc<ApiState>) -> std::io::Result<()> {
    let app = Router::new()
        .route("/v1/update", get(trigger_update))
        .route("/v1/metrics", get(serve_metrics))
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], LISTEN_PORT));
    info!("The HTTP API is enabled at :{LISTEN_PORT}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}

fn authorized(state: &ApiState, headers: &HeaderMap) -> bool {
    if state.token.is_empty() {
        return true;
    }
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(|value| value == format!("Bearer {}", state.token))
        .unwrap_or(false)
}

async fn trigger_update(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<UpdateQuery>,
    headers: HeaderMap,
) -> Result<String, (StatusCode, String)> {
    if !authorized(&state, &headers) {
        return Err((StatusCode::UNAUTHORIZED, "invalid token".to_string()));
    }
    let Some(updater) = &state.updater else {
        return Err((
            StatusCode::NOT_FOUND,
            "the update API is not enabled".to_string(),
        ));
    };

    let images = query.image.map(|list| {
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect::<Vec<_>>()
    });

    info!("Update triggered by HTTP API request");
    match updater.try_run(images).await {
        Attempt::Completed(metric) => Ok(format!(
            "Session done: {} scanned, {} updated, {} failed\n",
            metric.scanned, metric.updated, metric.failed
        )),
        Attempt::Skipped => Ok("Update skipped, another update is already running\n".to_string()),
    }
}

async fn serve_metrics(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
) -> Result<String, (StatusCode, String)> {
    if !authorized(&state, &headers) {
        return Err((StatusCode::UNAUTHORIZED, "invalid token".to_string()));
    }
    let Some(metrics) = &state.metrics else {
        return Err((
            StatusCode::NOT_FOUND,
            "the metrics API is not enabled".to_string(),
        ));
    };
    Ok(metrics.render())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(token: &str) -> ApiState {
        ApiState {
            token: token.to_string(),
            updater: None,
            metrics: None,
        }
    }

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            format!("Bearer {token}").parse().unwrap(),
        );
        headers
    }

    #[test]
    fn empty_token_allows_everything() {
        assert!(authorized(&state(""), &HeaderMap::new()));
    }

    #[test]
    fn matching_bearer_token_is_required() {
        let state = state("s3cret");
        assert!(authorized(&state, &bearer("s3cret")));
        assert!(!authorized(&state, &bearer("wrong")));
        assert!(!authorized(&state, &HeaderMap::new()));
    }
}

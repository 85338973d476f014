use super::{full_body, ResponseBody};
use crate::stats::MetricsSnapshot;
use crate::tunnel::TunnelRegistry;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::{Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;

/// `/stats` 返回的 JSON 结构
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsReport {
    /// 隧道计数器
    #[serde(flatten)]
    pub metrics: MetricsSnapshot,
    /// 已注册的隧道（`user@host:port`）
    pub tunnels: Vec<String>,
}

impl StatsReport {
    pub fn collect(registry: &TunnelRegistry) -> Self {
        let mut tunnels: Vec<String> = registry
            .identities()
            .iter()
            .map(|id| id.to_string())
            .collect();
        tunnels.sort();

        Self {
            metrics: registry.metrics().snapshot(),
            tunnels,
        }
    }
}

pub(super) fn metrics_response(registry: &Arc<TunnelRegistry>) -> Response<ResponseBody> {
    match registry.metrics().encode_text() {
        Ok(body) => text_response(StatusCode::OK, "text/plain; version=0.0.4", body),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            text_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "text/plain",
                "failed to encode metrics\n".to_string(),
            )
        }
    }
}

pub(super) fn stats_response(registry: &Arc<TunnelRegistry>) -> Response<ResponseBody> {
    let report = StatsReport::collect(registry);
    match serde_json::to_string_pretty(&report) {
        Ok(json) => text_response(StatusCode::OK, "application/json", json),
        Err(e) => {
            error!("Failed to serialize stats: {}", e);
            text_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "text/plain",
                "failed to serialize stats\n".to_string(),
            )
        }
    }
}

fn text_response(status: StatusCode, content_type: &'static str, body: String) -> Response<ResponseBody> {
    let mut response = Response::new(full_body(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

//! GIF provider proxy. Keeps the provider key server-side; without a key
//! the endpoints answer 502.

use crate::error::{AppError, AppResult};
use crate::state::Hub;
use axum::Json;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

const PROVIDER_BASE: &str = "https://api.giphy.com/v1/gifs";

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
    #[serde(default)]
    pub limit: Option<u32>,
}

/// `GET /api/gifs/search?q=...`.
pub async fn search(
    State(hub): State<Arc<Hub>>,
    headers: HeaderMap,
    Query(query): Query<SearchQuery>,
) -> AppResult<Json<Value>> {
    super::authenticate(&hub, &headers).await?;
    let limit = query.limit.unwrap_or(24).min(50);
    let url = format!(
        "{PROVIDER_BASE}/search?q={}&limit={limit}",
        urlencoding::encode(&query.q)
    );
    proxy(&hub, &url).await.map(Json)
}

/// `GET /api/gifs/trending`.
pub async fn trending(
    State(hub): State<Arc<Hub>>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    super::authenticate(&hub, &headers).await?;
    let url = format!("{PROVIDER_BASE}/trending?limit=24");
    proxy(&hub, &url).await.map(Json)
}

async fn proxy(hub: &Hub, url: &str) -> AppResult<Value> {
    let Some(api_key) = hub.config.giphy_api_key.as_deref() else {
        return Err(AppError::Internal("gif provider is not configured".into()));
    };
    let url = format!("{url}&api_key={api_key}");
    hub.http_client
        .get(&url)
        .timeout(Duration::from_secs(5))
        .send()
        .await
        .map_err(|e| AppError::Internal(format!("gif provider unreachable: {e}")))?
        .json::<Value>()
        .await
        .map_err(|e| AppError::Internal(format!("gif provider returned junk: {e}")))
}

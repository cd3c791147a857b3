//! REST surface: auth, uploads, health, metrics, and the provider proxies.

pub mod gifs;
pub mod og;
pub mod webhooks;

use crate::error::{AppError, AppResult};
use crate::services;
use crate::state::Hub;
use crate::store::UserRow;
use axum::Json;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::Router;
use base64::Engine;
use nexus_proto::Permissions;
use serde::Deserialize;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

pub fn router() -> Router<Arc<Hub>> {
    Router::new()
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/account", delete(delete_account))
        .route("/api/user/avatar", post(upload_avatar))
        .route("/api/server/:id/icon", post(upload_server_icon))
        .route("/api/webhooks/:id/:token", post(webhooks::ingest))
        .route("/api/og", get(og::scrape))
        .route("/api/gifs/search", get(gifs::search))
        .route("/api/gifs/trending", get(gifs::trending))
        .route("/api/health", get(health))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.http_status();
        let body = Json(json!({
            "error": self.public_message(),
            "kind": self.kind(),
        }));
        if status == StatusCode::TOO_MANY_REQUESTS {
            (status, [(header::RETRY_AFTER, "10")], body).into_response()
        } else {
            (status, body).into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct Credentials {
    username: String,
    password: String,
}

/// `POST /api/auth/register`.
async fn register(
    State(hub): State<Arc<Hub>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(body): Json<Credentials>,
) -> AppResult<Json<Value>> {
    if !hub.rate_limits.check_login(addr.ip()) {
        return Err(AppError::RateLimited);
    }
    let outcome = hub.sessions.register(&body.username, &body.password).await?;
    Ok(Json(json!({
        "token": outcome.token,
        "account": account_json(&outcome.user),
    })))
}

/// `POST /api/auth/login` - token + account snapshot + settings blob.
async fn login(
    State(hub): State<Arc<Hub>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(body): Json<Credentials>,
) -> AppResult<Json<Value>> {
    if !hub.rate_limits.check_login(addr.ip()) {
        return Err(AppError::RateLimited);
    }
    let outcome = hub.sessions.login(&body.username, &body.password).await?;
    Ok(Json(json!({
        "token": outcome.token,
        "account": account_json(&outcome.user),
    })))
}

/// `POST /api/auth/logout`.
async fn logout(State(hub): State<Arc<Hub>>, headers: HeaderMap) -> AppResult<Json<Value>> {
    let token = bearer_token(&headers)?;
    hub.sessions.logout(token).await?;
    Ok(Json(json!({ "success": true })))
}

/// `DELETE /api/auth/account` - soft retire; live sockets are dropped.
async fn delete_account(State(hub): State<Arc<Hub>>, headers: HeaderMap) -> AppResult<StatusCode> {
    let token = bearer_token(&headers)?;
    let user_id = hub.sessions.delete_account(token).await?;
    for socket_id in hub.rooms.members_of(&crate::state::user_key(&user_id)) {
        if let Some(handle) = hub.rooms.socket(&socket_id) {
            handle.terminate();
        }
    }
    info!(user = %user_id, "account deletion completed");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct AvatarUpload {
    avatar: String,
}

/// `POST /api/user/avatar` - data-URL upload, capped by `MAX_UPLOAD_BYTES`.
async fn upload_avatar(
    State(hub): State<Arc<Hub>>,
    headers: HeaderMap,
    Json(body): Json<AvatarUpload>,
) -> AppResult<Json<Value>> {
    let principal = authenticate(&hub, &headers).await?;
    validate_data_url(&body.avatar, hub.config.max_upload_bytes)?;

    hub.store
        .users()
        .set_custom_avatar(&principal.user_id, &body.avatar)
        .await?;
    services::session::broadcast_profile(&hub, &principal.user_id).await?;
    Ok(Json(json!({ "customAvatar": body.avatar })))
}

#[derive(Debug, Deserialize)]
struct IconUpload {
    icon: String,
}

/// `POST /api/server/:id/icon`.
async fn upload_server_icon(
    State(hub): State<Arc<Hub>>,
    Path(server_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<IconUpload>,
) -> AppResult<Json<Value>> {
    let principal = authenticate(&hub, &headers).await?;
    hub.perms
        .require(&principal.user_id, &server_id, None, Permissions::MANAGE_SERVER)
        .await?;
    validate_data_url(&body.icon, hub.config.max_upload_bytes)?;

    hub.store.servers().set_icon(&server_id, &body.icon).await?;
    services::broadcast_server_update(&hub, &server_id).await?;
    Ok(Json(json!({ "customIcon": body.icon })))
}

/// `GET /api/health` and `GET /health`.
async fn health() -> Json<Value> {
    Json(json!({ "ok": true }))
}

/// `GET /metrics` - Prometheus text format.
async fn metrics() -> String {
    crate::metrics::gather_metrics()
}

// ----------------------------------------------------------------------
// Shared helpers
// ----------------------------------------------------------------------

/// Pull the bearer token out of the Authorization header.
pub fn bearer_token(headers: &HeaderMap) -> AppResult<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .filter(|token| !token.is_empty())
        .ok_or(AppError::AuthInvalid)
}

/// Authenticate an HTTP request.
pub async fn authenticate(hub: &Hub, headers: &HeaderMap) -> AppResult<crate::auth::Principal> {
    let token = bearer_token(headers)?;
    hub.sessions.authenticate(token).await
}

/// Account snapshot for register/login responses.
fn account_json(user: &UserRow) -> Value {
    json!({
        "id": user.id,
        "username": user.username,
        "color": user.color,
        "avatar": user.avatar,
        "customAvatar": user.custom_avatar,
        "settings": serde_json::from_str::<Value>(&user.settings).unwrap_or_else(|_| json!({})),
    })
}

/// Data-URL image payloads only, with the decoded size under the cap.
fn validate_data_url(raw: &str, max_bytes: usize) -> AppResult<()> {
    if !raw.starts_with("data:image/") {
        return Err(AppError::Validation("expected a data: image URL".into()));
    }
    let Some((_, payload)) = raw.split_once(";base64,") else {
        return Err(AppError::Validation("expected base64 image data".into()));
    };
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(payload)
        .map_err(|_| AppError::Validation("invalid base64 image data".into()))?;
    if decoded.len() > max_bytes {
        return Err(AppError::Validation(format!(
            "image exceeds {max_bytes} bytes"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_extraction() {
        let mut headers = HeaderMap::new();
        assert!(bearer_token(&headers).is_err());

        headers.insert(header::AUTHORIZATION, "Bearer abc123".parse().unwrap());
        assert_eq!(bearer_token(&headers).unwrap(), "abc123");

        headers.insert(header::AUTHORIZATION, "Basic abc123".parse().unwrap());
        assert!(bearer_token(&headers).is_err());
    }

    #[test]
    fn data_url_validation() {
        let png = format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode([0u8; 16])
        );
        assert!(validate_data_url(&png, 1024).is_ok());
        assert!(validate_data_url(&png, 8).is_err());
        assert!(validate_data_url("https://x/y.png", 1024).is_err());
        assert!(validate_data_url("data:image/png;base64,!!!", 1024).is_err());
    }
}

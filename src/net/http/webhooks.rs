//! Webhook ingest: `POST /api/webhooks/<id>/<token>`.
//!
//! Auth is the (id, token) tuple alone, compared in constant time against
//! the stored digest. Accepted payloads flow through the exact message path
//! user sends take: same validation, same mention parsing, same fan-out.

use crate::error::AppError;
use crate::security::{DUMMY_TOKEN_DIGEST, token_matches};
use crate::security::rate_limit::RateBucket;
use crate::services::messages::{self, Draft};
use crate::state::Hub;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    /// Alias some webhook producers use.
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub embeds: Vec<Value>,
    #[serde(default)]
    pub attachments: Vec<String>,
}

/// The ingest handler.
pub async fn ingest(
    State(hub): State<Arc<Hub>>,
    Path((webhook_id, token)): Path<(String, String)>,
    Json(payload): Json<WebhookPayload>,
) -> Response {
    // Invalid id and invalid token are indistinguishable to the caller,
    // in the response and in its timing: an unresolved id still pays for a
    // hash-and-compare against a dummy digest.
    let webhook = hub.store.webhooks().by_id(&webhook_id).await.ok();
    let stored_digest = webhook
        .as_ref()
        .map_or(DUMMY_TOKEN_DIGEST, |w| w.token_digest.as_str());
    let token_ok = token_matches(&token, stored_digest);
    let Some(webhook) = webhook.filter(|_| token_ok) else {
        debug!(webhook = %webhook_id, "webhook auth rejected");
        return StatusCode::UNAUTHORIZED.into_response();
    };

    if !hub.rate_limits.check(RateBucket::WebhookPost, &webhook.id) {
        let retry_after = hub.rate_limits.retry_after_secs(RateBucket::WebhookPost);
        return (
            StatusCode::TOO_MANY_REQUESTS,
            [(header::RETRY_AFTER, retry_after.to_string())],
            Json(json!({ "error": "rate limited", "kind": "rate_limited" })),
        )
            .into_response();
    }

    let draft = Draft {
        content: payload.content.unwrap_or_default(),
        reply_to: None,
        attachments: payload.attachments,
        embeds: payload.embeds,
        command_data: None,
    };
    let display_name = payload
        .username
        .filter(|name| !name.trim().is_empty() && name.len() <= 64);
    let avatar = payload.avatar.or(payload.avatar_url);

    match messages::send_webhook_message(&hub, &webhook, display_name.clone(), avatar, draft).await {
        Ok(message) => (
            StatusCode::OK,
            Json(json!({
                "id": message.id,
                "success": true,
                "username": display_name.unwrap_or(webhook.display_name),
            })),
        )
            .into_response(),
        Err(err @ AppError::Validation(_)) => err.into_response(),
        Err(err) => {
            tracing::warn!(webhook = %webhook.id, error = %err, "webhook ingest failed");
            err.into_response()
        }
    }
}

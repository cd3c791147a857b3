//! Server-side OpenGraph scrape with a per-URL cache.
//!
//! Auth-required so the endpoint cannot be used as an open proxy. Scraped
//! tags are cached ten minutes per URL; the maintenance task sweeps stale
//! entries.

use crate::error::{AppError, AppResult};
use crate::state::Hub;
use axum::Json;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use dashmap::DashMap;
use lazy_static::lazy_static;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cache TTL for one scraped URL.
const CACHE_TTL: Duration = Duration::from_secs(600);
/// Response body cap: OpenGraph tags live in the head.
const MAX_BODY_BYTES: usize = 512 * 1024;

lazy_static! {
    static ref CACHE: DashMap<String, (Instant, Value)> = DashMap::new();
}

#[derive(Debug, Deserialize)]
pub struct OgQuery {
    pub url: String,
}

/// `GET /api/og?url=...`.
pub async fn scrape(
    State(hub): State<Arc<Hub>>,
    headers: HeaderMap,
    Query(query): Query<OgQuery>,
) -> AppResult<Json<Value>> {
    super::authenticate(&hub, &headers).await?;

    if !query.url.starts_with("http://") && !query.url.starts_with("https://") {
        return Err(AppError::Validation("url must be http(s)".into()));
    }

    if let Some(entry) = CACHE.get(&query.url) {
        let (fetched_at, value) = entry.value();
        if fetched_at.elapsed() < CACHE_TTL {
            return Ok(Json(value.clone()));
        }
    }

    let body = hub
        .http_client
        .get(&query.url)
        .timeout(Duration::from_secs(5))
        .send()
        .await
        .map_err(|e| AppError::Validation(format!("fetch failed: {e}")))?
        .text()
        .await
        .map_err(|e| AppError::Validation(format!("fetch failed: {e}")))?;
    let head = &body[..body.len().min(MAX_BODY_BYTES)];

    let value = json!({
        "url": query.url,
        "title": meta_content(head, "og:title").or_else(|| title_tag(head)),
        "description": meta_content(head, "og:description"),
        "image": meta_content(head, "og:image"),
        "siteName": meta_content(head, "og:site_name"),
    });
    CACHE.insert(query.url.clone(), (Instant::now(), value.clone()));
    Ok(Json(value))
}

/// Drop expired cache entries. Called from the maintenance task.
pub fn sweep_cache() {
    CACHE.retain(|_, (fetched_at, _)| fetched_at.elapsed() < CACHE_TTL);
}

/// Extract `content` of a `<meta property="og:x" content="...">` tag with a
/// plain scan; OpenGraph pages vary too much for anything stricter to pay
/// its way here.
fn meta_content(html: &str, property: &str) -> Option<String> {
    let needle = format!("property=\"{property}\"");
    let tag_start = find_meta(html, &needle)
        .or_else(|| find_meta(html, &format!("name=\"{property}\"")))?;
    let tag_end = tag_start + html[tag_start..].find('>')?;
    let tag = &html[tag_start..tag_end];
    let content_pos = tag.find("content=\"")? + "content=\"".len();
    let rest = &tag[content_pos..];
    let end = rest.find('"')?;
    let value = rest[..end].trim();
    (!value.is_empty()).then(|| html_unescape(value))
}

fn find_meta(html: &str, needle: &str) -> Option<usize> {
    let pos = html.find(needle)?;
    html[..pos].rfind("<meta")
}

fn title_tag(html: &str) -> Option<String> {
    let start = html.find("<title>")? + "<title>".len();
    let end = html[start..].find("</title>")?;
    let value = html[start..start + end].trim();
    (!value.is_empty()).then(|| html_unescape(value))
}

fn html_unescape(raw: &str) -> String {
    raw.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><head>
        <title>Fallback Title</title>
        <meta property="og:title" content="A &amp; B" />
        <meta property="og:image" content="https://cdn/x.png">
        </head><body></body></html>"#;

    #[test]
    fn meta_extraction() {
        assert_eq!(meta_content(PAGE, "og:title").unwrap(), "A & B");
        assert_eq!(meta_content(PAGE, "og:image").unwrap(), "https://cdn/x.png");
        assert!(meta_content(PAGE, "og:description").is_none());
    }

    #[test]
    fn title_fallback() {
        assert_eq!(title_tag(PAGE).unwrap(), "Fallback Title");
    }
}

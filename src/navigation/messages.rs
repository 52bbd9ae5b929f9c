//! Cooperative messages exchanged with the embedded session.
//!
//! Inbound shapes accepted, all normalized to one [`NavigationMessage`]:
//!
//! | Shape                                   | Kind         |
//! |-----------------------------------------|--------------|
//! | `{type: "url-change", path \| url}`     | `UrlChange`  |
//! | `{type: "navigation", path \| url}`     | `Navigation` |
//! | `{path}`                                | `SimplePath` |
//! | `{url}`                                 | `SimpleUrl`  |
//!
//! Typed messages without a path or url mean `/`. Outbound, the host sends
//! `{type: "get-url"}` to ask for the current route and `portal-info` once
//! the session has loaded.

use reqwest::Url;
use serde::Serialize;
use serde_json::{json, Value};

use super::address_bar::{origin_of, path_of};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageKind {
    UrlChange,
    Navigation,
    SimplePath,
    SimpleUrl,
}

/// A navigation report from the embedded session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationMessage {
    pub kind: MessageKind,
    /// Canonical route, always starting with `/`.
    pub path: String,
    /// The `url` field as sent, if any.
    pub raw_url: Option<String>,
}

fn non_empty_str<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// Route named by a `url` field, resolved against `base`.
fn route_from_url(url: &str, base: &str) -> String {
    Url::parse(base)
        .and_then(|b| b.join(url))
        .map_or_else(|_| url.to_string(), |u| path_of(&u))
}

fn with_leading_slash(path: String) -> String {
    if path.starts_with('/') {
        path
    } else {
        format!("/{path}")
    }
}

/// Normalize any accepted message shape. `base` resolves relative `url`s.
pub fn normalize(value: &Value, base: &str) -> Option<NavigationMessage> {
    let raw_url = non_empty_str(value, "url").map(ToString::to_string);
    let typed = match value.get("type").and_then(Value::as_str) {
        Some("url-change") => Some(MessageKind::UrlChange),
        Some("navigation") => Some(MessageKind::Navigation),
        _ => None,
    };

    let (kind, path) = if let Some(kind) = typed {
        let path = match (non_empty_str(value, "path"), raw_url.as_deref()) {
            (Some(path), _) => path.to_string(),
            (None, Some(url)) => route_from_url(url, base),
            (None, None) => "/".to_string(),
        };
        (kind, path)
    } else if let Some(path) = non_empty_str(value, "path") {
        (MessageKind::SimplePath, path.to_string())
    } else if let Some(url) = raw_url.as_deref() {
        (MessageKind::SimpleUrl, route_from_url(url, base))
    } else {
        return None;
    };

    Some(NavigationMessage {
        kind,
        path: with_leading_slash(path),
        raw_url,
    })
}

/// Whether a message from `origin` may drive navigation.
///
/// Accepted: the active tunnel's origin, or the host page's own origin.
/// Origins compare exactly; a shared prefix is not enough.
pub fn origin_allowed(origin: &str, tunnel_base: &str, host_origin: &str) -> bool {
    if origin == host_origin {
        return true;
    }
    if tunnel_base.is_empty() {
        return false;
    }
    origin_of(tunnel_base).is_some_and(|o| o == origin)
}

pub fn get_url_request() -> Value {
    json!({ "type": "get-url" })
}

pub fn portal_info(portal_base_url: &str, portal_page_url: &str) -> Value {
    json!({
        "type": "portal-info",
        "portalBaseUrl": portal_base_url,
        "portalPageUrl": portal_page_url,
    })
}

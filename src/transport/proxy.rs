use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use tracing::{debug, warn};

use crate::error::BridgeError;
use crate::security::request_signer::{NONCE_HEADER, SIGNATURE_HEADER, TIMESTAMP_HEADER};
use crate::security::verifier::TOKEN_HEADER;

/// Headers with this prefix are always passed through to the downstream service.
pub const FORWARD_PREFIX: &str = "x-platform-";

/// Downstream path for a proxied request.
///
/// A final segment without an extension gets `default_extension` appended. Empty
/// paths and directory paths (trailing `/`) are left alone. `..` segments are refused,
/// as are `?` and `#`, which can only come from percent-decoding.
pub fn target_path(path: &str, default_extension: &str) -> Result<String, BridgeError> {
    let path = path.trim_start_matches('/');
    if path.contains(['?', '#']) {
        return Err(BridgeError::BadRequest(
            "query or fragment delimiter in path".to_string(),
        ));
    }
    if path.split('/').any(|segment| segment == "..") {
        return Err(BridgeError::BadRequest(
            "path traversal is not allowed".to_string(),
        ));
    }
    if path.is_empty() || path.ends_with('/') || default_extension.is_empty() {
        return Ok(path.to_string());
    }

    let last = path.rsplit('/').next().unwrap_or(path);
    if last.contains('.') {
        Ok(path.to_string())
    } else {
        Ok(format!("{path}.{}", default_extension.trim_start_matches('.')))
    }
}

fn is_forwarded(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    name == SIGNATURE_HEADER.to_ascii_lowercase()
        || name == TIMESTAMP_HEADER.to_ascii_lowercase()
        || name == NONCE_HEADER.to_ascii_lowercase()
        || name == TOKEN_HEADER.to_ascii_lowercase()
        || name == CONTENT_TYPE.as_str()
        || name.starts_with(FORWARD_PREFIX)
}

/// Allowlisted subset of the inbound headers.
pub fn forwarded_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in headers {
        if is_forwarded(name.as_str()) {
            out.append(name.clone(), value.clone());
        }
    }
    out
}

/// Downstream answer, returned to the caller verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyResponse {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl IntoResponse for ProxyResponse {
    fn into_response(self) -> Response {
        match self.content_type {
            Some(ct) => (self.status, [(CONTENT_TYPE, ct)], self.body).into_response(),
            None => (self.status, self.body).into_response(),
        }
    }
}

/// Best-effort pass-through to the local downstream service.
#[derive(Debug, Clone)]
pub struct ProxyForwarder {
    http_client: Client,
    base_url: String,
    default_extension: String,
}

impl ProxyForwarder {
    pub fn new(http_client: Client, base_url: impl Into<String>, default_extension: impl Into<String>) -> Self {
        Self {
            http_client,
            base_url: base_url.into(),
            default_extension: default_extension.into(),
        }
    }

    pub fn url_for(&self, path: &str, query: Option<&str>) -> Result<String, BridgeError> {
        let target = target_path(path, &self.default_extension)?;
        let mut url = format!("{}/{}", self.base_url.trim_end_matches('/'), target);
        if let Some(q) = query.filter(|q| !q.is_empty()) {
            url.push('?');
            url.push_str(q);
        }
        Ok(url)
    }

    pub async fn forward(
        &self,
        method: Method,
        path: &str,
        query: Option<&str>,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<ProxyResponse, BridgeError> {
        let url = self.url_for(path, query)?;
        debug!(method = %method, url = %url, "proxying request");

        let response = self
            .http_client
            .request(method, &url)
            .headers(forwarded_headers(headers))
            .body(body)
            .send()
            .await
            .map_err(|e| map_reqwest_error(&url, e))?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .map_err(|e| BridgeError::Upstream(format!("reading downstream body: {e}")))?;

        Ok(ProxyResponse {
            status,
            content_type,
            body,
        })
    }
}

fn map_reqwest_error(url: &str, error: reqwest::Error) -> BridgeError {
    if error.is_connect() {
        warn!(url = %url, error = %error, "downstream service not reachable");
        BridgeError::DownstreamUnavailable(format!("downstream service not reachable: {error}"))
    } else {
        warn!(url = %url, error = %error, "proxy request failed");
        BridgeError::Upstream(format!("proxy request failed: {error}"))
    }
}

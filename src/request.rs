// Outgoing request shape, per-call context and header computation

use reqwest::Method;
use serde::Serialize;
use serde_json::Value;
use std::net::IpAddr;
use tokio_util::sync::CancellationToken;

/// Version token already carried by the configured base URL
const VERSION_PREFIX: &str = "v1/";

pub const HEADER_REQUEST_ID: &str = "X-Request-ID";
pub const HEADER_COMPANY_SUBDOMAIN: &str = "X-Company-Subdomain";
/// Deprecated alias of [`HEADER_COMPANY_SUBDOMAIN`], still read by older services
pub const HEADER_SUBDOMAIN: &str = "X-Subdomain";

/// A request as written by the caller
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
    pub query: Vec<(String, String)>,
    /// Suppress the user-facing notification for this call
    pub skip_error_toast: bool,
    /// Run the token refresh protocol on 401 (off for login/logout)
    pub refresh_on_unauthorized: bool,
    pub cancel: Option<CancellationToken>,
    /// Serialization failure of the body, reported by `send` before dispatch
    body_error: Option<String>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            query: Vec::new(),
            skip_error_toast: false,
            refresh_on_unauthorized: true,
            cancel: None,
            body_error: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Attach a JSON body. A body that fails to serialize makes the request
    /// fail with [`crate::ApiError::Encode`] without being sent.
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Self {
        match serde_json::to_value(body) {
            Ok(value) => {
                self.body = Some(value);
                self.body_error = None;
            }
            Err(e) => {
                self.body = None;
                self.body_error = Some(e.to_string());
            }
        }
        self
    }

    pub fn body_error(&self) -> Option<&str> {
        self.body_error.as_deref()
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn skip_error_toast(mut self) -> Self {
        self.skip_error_toast = true;
        self
    }

    /// Propagate a 401 directly instead of refreshing the session
    pub fn without_auth_refresh(mut self) -> Self {
        self.refresh_on_unauthorized = false;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Per-call metadata carried across retries of one logical request
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: Method,
    /// Normalized path, relative to the base URL
    pub path: String,
    /// 503 retries performed so far
    pub retry_count: u32,
    /// Set once the request has been reissued after a token refresh
    pub auth_retried: bool,
    pub skip_error_toast: bool,
    pub request_id: String,
}

impl RequestContext {
    pub fn new(request: &ApiRequest) -> Self {
        Self {
            method: request.method.clone(),
            path: normalize_path(&request.path),
            retry_count: 0,
            auth_retried: !request.refresh_on_unauthorized,
            skip_error_toast: request.skip_error_toast,
            request_id: generate_request_id(),
        }
    }

    /// Last path segment, used to name the operation in messages
    pub fn operation(&self) -> &str {
        let path = self.path.split('?').next().unwrap_or("");
        path.trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or("request")
    }
}

/// Normalize a caller-supplied path so `x`, `/x`, `v1/x` and `/v1/x` resolve
/// to the same URL under a base URL that already ends in the version segment.
pub fn normalize_path(path: &str) -> String {
    let path = path.strip_prefix('/').unwrap_or(path);
    let path = path.strip_prefix(VERSION_PREFIX).unwrap_or(path);
    path.to_string()
}

/// Join a base URL and a normalized path
pub fn join_url(base_url: &str, path: &str) -> String {
    if path.is_empty() {
        return base_url.trim_end_matches('/').to_string();
    }
    format!("{}/{}", base_url.trim_end_matches('/'), path)
}

/// Tenant label for hosts like `acme.admin.example.com`.
///
/// Requires at least three labels, a first label other than `www`, and a host
/// that is not a local development host.
pub fn tenant_subdomain(host: &str) -> Option<String> {
    let host = host.split(':').next().unwrap_or(host).trim_end_matches('.');
    if is_local_host(host) {
        return None;
    }

    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() < 3 {
        return None;
    }

    let first = labels[0];
    if first.is_empty() || first.eq_ignore_ascii_case("www") {
        return None;
    }
    Some(first.to_lowercase())
}

fn is_local_host(host: &str) -> bool {
    let lower = host.to_lowercase();
    lower == "localhost"
        || lower.ends_with(".localhost")
        || lower.split('.').any(|l| l == "localhost")
        || host.parse::<IpAddr>().is_ok()
}

/// Short random id for log correlation
pub fn generate_request_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

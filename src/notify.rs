// Error classification and user-facing notifications

use reqwest::Method;
use serde_json::Value;

use crate::error::TransportKind;
use crate::request::RequestContext;

pub const FALLBACK_MESSAGE: &str = "Something went wrong";

/// Statuses that never produce a notification here: 401 is handled by the
/// refresh protocol, 403 is logged by the client, 404 is often an expected
/// lookup miss, 503 is retried.
const SILENT_STATUSES: [u16; 4] = [401, 403, 404, 503];

/// A single-line, user-facing message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub status: Option<u16>,
    pub message: String,
}

/// Sink for user-facing notices
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: &Notice);
}

/// Writes notices to the log. Used when no UI sink is attached.
#[derive(Debug, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notice: &Notice) {
        tracing::warn!(status = ?notice.status, "{}", notice.message);
    }
}

/// What went wrong with a request, as seen by the classifier
#[derive(Debug, Clone, Copy)]
pub enum Failure<'a> {
    Status { status: u16, body: Option<&'a Value> },
    Transport { kind: TransportKind },
}

/// Decide whether `failure` deserves a notice and compose it.
///
/// Returns at most one notice per failed response.
pub fn classify(
    failure: Failure<'_>,
    ctx: &RequestContext,
    best_effort_endpoints: &[String],
) -> Option<Notice> {
    if let Failure::Status { status, .. } = failure {
        if SILENT_STATUSES.contains(&status) {
            return None;
        }
    }

    if ctx.skip_error_toast {
        return None;
    }

    if is_timeout(&failure) && is_best_effort(&ctx.path, best_effort_endpoints) {
        tracing::debug!(path = %ctx.path, "Best-effort request timed out");
        return None;
    }

    match failure {
        Failure::Transport { kind } => Some(Notice {
            status: None,
            message: transport_message(kind).to_string(),
        }),
        Failure::Status { status, body } => {
            let extracted = extract_message(body);

            if status >= 500 {
                let detail = extracted.unwrap_or_else(|| canned_server_message(status).to_string());
                let message = format!(
                    "Error while {} ({}): {}",
                    action_for(&ctx.method),
                    ctx.operation(),
                    detail
                );
                tracing::error!(
                    status = status,
                    method = %ctx.method,
                    path = %ctx.path,
                    request_id = %ctx.request_id,
                    data = ?body,
                    "Server error"
                );
                Some(Notice {
                    status: Some(status),
                    message,
                })
            } else if status >= 400 {
                Some(Notice {
                    status: Some(status),
                    message: extracted.unwrap_or_else(|| FALLBACK_MESSAGE.to_string()),
                })
            } else {
                None
            }
        }
    }
}

/// Human-readable message from an error body.
///
/// Precedence: `error.message` → string `error` → `message`.
pub fn extract_message(body: Option<&Value>) -> Option<String> {
    let body = body?;
    let non_empty = |v: Option<&Value>| {
        v.and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    non_empty(body.get("error").and_then(|e| e.get("message")))
        .or_else(|| non_empty(body.get("error")))
        .or_else(|| non_empty(body.get("message")))
}

/// HTTP method as the action the user attempted
pub fn action_for(method: &Method) -> &'static str {
    match *method {
        Method::GET => "fetching data",
        Method::POST => "adding data",
        Method::PUT | Method::PATCH => "updating data",
        Method::DELETE => "deleting data",
        _ => "processing the request",
    }
}

pub fn canned_server_message(status: u16) -> &'static str {
    match status {
        502 => "Server unreachable",
        503 => "Service temporarily unavailable",
        504 => "Gateway timeout",
        _ => "Internal server error",
    }
}

fn transport_message(kind: TransportKind) -> &'static str {
    match kind {
        TransportKind::Timeout => "Request timed out",
        TransportKind::Connect => "Network error: unable to reach the server",
        _ => "Network error",
    }
}

fn is_timeout(failure: &Failure<'_>) -> bool {
    match failure {
        Failure::Transport { kind } => *kind == TransportKind::Timeout,
        Failure::Status { status, .. } => *status == 408 || *status == 504,
    }
}

fn is_best_effort(path: &str, endpoints: &[String]) -> bool {
    endpoints.iter().any(|e| path.contains(e.as_str()))
}

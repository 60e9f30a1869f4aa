// Authentication types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Persisted session state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSession {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Cached user profile returned at login
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Refresh endpoint request
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

/// Refresh endpoint response. Refresh tokens rotate on every use.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub access_token: String,
    pub refresh_token: String,
}

/// Login request
#[derive(Serialize)]
pub struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

/// Login response
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub user: Option<Value>,
}

/// Process-wide session notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Session could not be recovered (`auth:unauthorized`)
    Unauthorized,
    /// User logged out explicitly
    LoggedOut,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_response_parsing() {
        let data: RefreshResponse =
            serde_json::from_str(r#"{"accessToken":"a2","refreshToken":"r2"}"#).unwrap();
        assert_eq!(data.access_token, "a2");
        assert_eq!(data.refresh_token, "r2");

        assert!(serde_json::from_str::<RefreshResponse>(r#"{"accessToken":"a2"}"#).is_err());
    }

    #[test]
    fn test_refresh_request_shape() {
        let body = serde_json::to_value(RefreshRequest { refresh_token: "r1" }).unwrap();
        assert_eq!(body, serde_json::json!({"refreshToken": "r1"}));
    }

    #[test]
    fn test_stored_session_skips_empty_fields() {
        let json = serde_json::to_string(&StoredSession::default()).unwrap();
        assert_eq!(json, "{}");

        let parsed: StoredSession = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed, StoredSession::default());
    }
}

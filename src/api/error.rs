//! Boundary error types for the console API.

use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// 401/403 from the backend. Always terminal for the session.
    #[error("not authorized (HTTP {status})")]
    Unauthorized { status: u16 },

    /// Any other non-success answer, carrying the server's `detail` when present.
    #[error("{}", .detail.as_deref().unwrap_or("request rejected"))]
    Rejected { status: u16, detail: Option<String> },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected response: {0}")]
    Decode(String),

    /// No credential was available, so the call was never issued.
    #[error("no active session")]
    NoSession,
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, ApiError::Unauthorized { .. } | ApiError::NoSession)
    }

    /// Classify an error response. `body` is whatever the server sent back.
    pub fn from_response(status: StatusCode, body: &str) -> Self {
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return ApiError::Unauthorized {
                status: status.as_u16(),
            };
        }
        let detail = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|v| v.get("detail").cloned())
            .and_then(|d| detail_to_string(&d));
        ApiError::Rejected {
            status: status.as_u16(),
            detail,
        }
    }

    /// Printable message for a notification, falling back to `generic` when the
    /// server gave no detail.
    pub fn user_message(&self, generic: &str) -> String {
        match self {
            ApiError::Rejected {
                detail: Some(d), ..
            } => d.clone(),
            ApiError::Rejected { status, .. } => format!("{generic} (HTTP {status})"),
            ApiError::Transport(_) | ApiError::Decode(_) => generic.to_string(),
            ApiError::Unauthorized { .. } | ApiError::NoSession => {
                "Session expired, please log in again".to_string()
            }
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ApiError::Decode(e.to_string())
        } else {
            ApiError::Transport(e.to_string())
        }
    }
}

/// Coerce a `detail` payload into one printable line.
///
/// FastAPI validation errors arrive as `[{"loc": [...], "msg": "..."}]`; those are
/// rendered as `loc.path: msg` joined by `; `. Other objects fall back to compact JSON.
pub fn detail_to_string(detail: &serde_json::Value) -> Option<String> {
    use serde_json::Value;
    match detail {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(validation_item).collect();
            if parts.is_empty() {
                Some(detail.to_string())
            } else {
                Some(parts.join("; "))
            }
        }
        Value::Object(map) => match map.get("msg").or_else(|| map.get("message")) {
            Some(Value::String(m)) => Some(m.clone()),
            _ => Some(detail.to_string()),
        },
        other => Some(other.to_string()),
    }
}

fn validation_item(item: &serde_json::Value) -> Option<String> {
    let msg = item.get("msg").and_then(|m| m.as_str())?;
    let loc = item
        .get("loc")
        .and_then(|l| l.as_array())
        .map(|parts| {
            parts
                .iter()
                .filter(|p| p.as_str() != Some("body"))
                .map(|p| match p {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(".")
        })
        .unwrap_or_default();
    if loc.is_empty() {
        Some(msg.to_string())
    } else {
        Some(format!("{loc}: {msg}"))
    }
}

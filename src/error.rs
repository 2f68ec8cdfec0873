//! Error taxonomy for calls against the REST service and the message
//! extraction shared by every list and form.
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// No response at all: DNS, connect, timeout, broken body.
    #[error("network error: {0}")]
    Transport(String),
    #[error("not signed in")]
    MissingToken,
    /// The server rejected the session token; the session has been cleared.
    #[error("session expired")]
    Unauthorized,
    #[error("request rejected ({status}): {}", .message.as_deref().unwrap_or("invalid input"))]
    Validation {
        status: u16,
        message: Option<String>,
        fields: BTreeMap<String, Vec<String>>,
    },
    #[error("forbidden: {}", .message.as_deref().unwrap_or("access denied"))]
    Forbidden { message: Option<String> },
    #[error("not found: {}", .message.as_deref().unwrap_or("no such resource"))]
    NotFound { message: Option<String> },
    #[error("conflict: {}", .message.as_deref().unwrap_or("resource changed"))]
    Conflict { message: Option<String> },
    /// Any other refusal, including a `401` on a request that carried no
    /// token (a failed login).
    #[error("request failed ({status}): {}", .message.as_deref().unwrap_or("no details"))]
    Status { status: u16, message: Option<String> },
    #[error("unexpected response: {0}")]
    Decode(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ApiError {
    /// Map a non-success HTTP status and its body to an error. A `401` only
    /// becomes [`ApiError::Unauthorized`] in the client, which knows whether a
    /// token was sent.
    pub fn from_status(status: u16, body: &Value) -> Self {
        let message = extract_message(body);
        match status {
            400 | 422 => ApiError::Validation {
                status,
                message,
                fields: field_errors(body),
            },
            403 => ApiError::Forbidden { message },
            404 => ApiError::NotFound { message },
            409 => ApiError::Conflict { message },
            _ => ApiError::Status { status, message },
        }
    }

    /// Text shown to the user. Falls back to `fallback` when the server gave
    /// nothing readable or never answered.
    pub fn user_message(&self, fallback: &str) -> String {
        match self {
            ApiError::Validation { message, .. }
            | ApiError::Forbidden { message }
            | ApiError::NotFound { message }
            | ApiError::Conflict { message }
            | ApiError::Status { message, .. } => {
                message.clone().unwrap_or_else(|| fallback.to_string())
            }
            ApiError::MissingToken | ApiError::Unauthorized => self.to_string(),
            ApiError::Transport(_) | ApiError::Decode(_) | ApiError::InvalidRequest(_) => {
                fallback.to_string()
            }
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized | ApiError::MissingToken)
    }

    /// Per-field validation messages, empty for every other kind of error.
    pub fn field_errors(&self) -> &BTreeMap<String, Vec<String>> {
        static EMPTY: BTreeMap<String, Vec<String>> = BTreeMap::new();
        match self {
            ApiError::Validation { fields, .. } => fields,
            _ => &EMPTY,
        }
    }
}

/// One failed request of a view that loads several in parallel. The other
/// parts still render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartFailure {
    pub part: &'static str,
    pub message: String,
}

impl PartFailure {
    pub fn new(part: &'static str, err: &ApiError, fallback: &str) -> Self {
        Self {
            part,
            message: err.user_message(fallback),
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        ApiError::Transport(err.to_string())
    }
}

/// Pull a human-readable message out of an error body.
///
/// Priority: `detail`, then `error.message`, then every field validation
/// message joined with `"; "`. Returns `None` when nothing matches.
pub fn extract_message(body: &Value) -> Option<String> {
    if let Some(detail) = body.get("detail").and_then(non_blank_str) {
        return Some(detail.to_string());
    }
    if let Some(message) = body
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(non_blank_str)
    {
        return Some(message.to_string());
    }
    let fields = field_errors(body);
    if fields.is_empty() {
        return None;
    }
    let joined = fields
        .iter()
        .flat_map(|(field, messages)| {
            messages.iter().map(move |msg| {
                if field == "non_field_errors" {
                    msg.clone()
                } else {
                    format!("{field}: {msg}")
                }
            })
        })
        .collect::<Vec<_>>()
        .join("; ");
    Some(joined)
}

/// Field validation messages from either a bare `{field: [msg]}` body or the
/// `error.details` map of the wrapped envelope.
pub fn field_errors(body: &Value) -> BTreeMap<String, Vec<String>> {
    let source = body
        .get("error")
        .and_then(|e| e.get("details"))
        .filter(|d| d.is_object())
        .unwrap_or(body);

    let mut out = BTreeMap::new();
    let Some(map) = source.as_object() else {
        return out;
    };
    for (field, value) in map {
        if field == "detail" || field == "error" {
            continue;
        }
        let messages: Vec<String> = match value {
            Value::String(s) if !s.trim().is_empty() => vec![s.clone()],
            Value::Array(items) => items
                .iter()
                .filter_map(|item| item.as_str())
                .filter(|s| !s.trim().is_empty())
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        };
        if !messages.is_empty() {
            out.insert(field.clone(), messages);
        }
    }
    out
}

fn non_blank_str(value: &Value) -> Option<&str> {
    value.as_str().filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn detail_wins_over_everything() {
        let body = json!({
            "detail": "Invalid token.",
            "error": { "message": "other" },
            "email": ["bad"]
        });
        assert_eq!(extract_message(&body).as_deref(), Some("Invalid token."));
    }

    #[test]
    fn wrapped_error_message_is_second() {
        let body = json!({
            "error": { "code": "ALREADY_CHECKED_IN", "message": "Already checked in today" }
        });
        assert_eq!(
            extract_message(&body).as_deref(),
            Some("Already checked in today")
        );
    }

    #[test]
    fn field_errors_joined_with_semicolons() {
        let body = json!({
            "email": ["This field is required."],
            "non_field_errors": ["Unable to log in."],
            "password": ["Too short.", "Too common."]
        });
        assert_eq!(
            extract_message(&body).as_deref(),
            Some(
                "email: This field is required.; Unable to log in.; \
                 password: Too short.; password: Too common."
            )
        );
    }

    #[test]
    fn details_inside_error_envelope_are_fields() {
        let body = json!({ "error": { "code": "ERROR", "details": { "name": ["taken"] } } });
        let fields = field_errors(&body);
        assert_eq!(fields.get("name").unwrap(), &vec!["taken".to_string()]);
        assert_eq!(extract_message(&body).as_deref(), Some("name: taken"));
    }

    #[test]
    fn nothing_readable_yields_none() {
        assert_eq!(extract_message(&json!(null)), None);
        assert_eq!(extract_message(&json!("<html>502</html>")), None);
        assert_eq!(extract_message(&json!({ "detail": "" })), None);
        assert_eq!(extract_message(&json!({ "count": 3 })), None);
    }

    #[test]
    fn status_mapping() {
        match ApiError::from_status(401, &json!({ "detail": "Invalid credentials" })) {
            ApiError::Status { status, message } => {
                assert_eq!(status, 401);
                assert_eq!(message.as_deref(), Some("Invalid credentials"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            ApiError::from_status(404, &json!({})),
            ApiError::NotFound { message: None }
        ));
        assert!(matches!(
            ApiError::from_status(409, &json!({"detail": "x"})),
            ApiError::Conflict { .. }
        ));
        match ApiError::from_status(400, &json!({"email": ["bad"]})) {
            ApiError::Validation { status, fields, .. } => {
                assert_eq!(status, 400);
                assert!(fields.contains_key("email"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            ApiError::from_status(500, &json!({})),
            ApiError::Status { status: 500, .. }
        ));
    }

    #[test]
    fn user_message_uses_fallback_when_silent() {
        let err = ApiError::Transport("connection refused".into());
        assert_eq!(err.user_message("Failed to load data"), "Failed to load data");

        let err = ApiError::from_status(500, &json!("oops"));
        assert_eq!(err.user_message("Failed to save"), "Failed to save");

        let err = ApiError::from_status(404, &json!({"detail": "Not found."}));
        assert_eq!(err.user_message("Failed to save"), "Not found.");
    }
}

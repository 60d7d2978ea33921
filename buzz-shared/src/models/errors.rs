use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error body returned by the Buzz API: `{"detail": ...}`.
///
/// `detail` is usually a human-readable string, but request validation
/// failures carry a structured list instead.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    #[serde(default)]
    pub detail: Option<Value>,
}

impl ErrorResponse {
    /// Creates an error response with a plain-text detail.
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: Some(Value::String(detail.into())),
        }
    }

    /// Parses a response body, yielding `None` for anything that is not an error object.
    #[must_use]
    pub fn from_body(body: &str) -> Option<Self> {
        serde_json::from_str(body).ok()
    }

    /// The detail text when the server sent one as a string.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.detail
            .as_ref()
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|text| !text.is_empty())
    }
}

impl std::fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.message() {
            Some(message) => f.write_str(message),
            None => f.write_str("request failed"),
        }
    }
}

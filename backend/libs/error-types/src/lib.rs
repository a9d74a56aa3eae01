use serde::{Deserialize, Serialize};

/// Uniform JSON error body returned by every HTTP endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Short error name, e.g. "NotFoundError"
    pub error: String,

    /// Human readable explanation
    pub message: String,

    /// HTTP status code
    pub status: u16,

    /// Error category used by clients for routing:
    /// - "validation_error"
    /// - "authentication_error"
    /// - "not_found_error"
    /// - "server_error"
    pub error_type: String,

    /// Stable machine-readable code, see [`error_codes`]
    pub code: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,

    /// RFC 3339 timestamp
    pub timestamp: String,
}

impl ErrorResponse {
    pub fn new(
        error: impl Into<String>,
        message: impl Into<String>,
        status: u16,
        error_type: impl Into<String>,
        code: impl Into<String>,
    ) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status,
            error_type: error_type.into(),
            code: code.into(),
            details: None,
            trace_id: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }
}

/// Error categories
pub mod error_types {
    pub const VALIDATION_ERROR: &str = "validation_error";
    pub const AUTHENTICATION_ERROR: &str = "authentication_error";
    pub const NOT_FOUND_ERROR: &str = "not_found_error";
    pub const SERVER_ERROR: &str = "server_error";
}

/// Stable error codes shared by HTTP responses and real-time `error` events
pub mod error_codes {
    pub const INVALID_TOKEN: &str = "INVALID_TOKEN";
    pub const USER_NOT_FOUND: &str = "USER_NOT_FOUND";
    pub const INVALID_REQUEST: &str = "INVALID_REQUEST";
    pub const DATABASE_ERROR: &str = "DATABASE_ERROR";
    pub const INTERNAL_SERVER_ERROR: &str = "INTERNAL_SERVER_ERROR";
}

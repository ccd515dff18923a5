use answerpipe_core::Error;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidParams,
    AgentFailed,
    ReformatFailed,
    StreamFailed,
    StoreError,
    NotFound,
    NotConfigured,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidParams => "invalid_params",
            Self::AgentFailed => "agent_failed",
            Self::ReformatFailed => "reformat_failed",
            Self::StreamFailed => "stream_failed",
            Self::StoreError => "store_error",
            Self::NotFound => "not_found",
            Self::NotConfigured => "not_configured",
        }
    }

    /// Whether the same request might succeed later. The server itself never retries.
    pub fn retryable(self) -> bool {
        match self {
            Self::AgentFailed | Self::ReformatFailed | Self::StreamFailed | Self::StoreError => {
                true
            }
            Self::InvalidParams | Self::NotFound | Self::NotConfigured => false,
        }
    }

    pub fn status(self) -> StatusCode {
        match self {
            Self::InvalidParams => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::AgentFailed | Self::ReformatFailed | Self::StreamFailed => {
                StatusCode::BAD_GATEWAY
            }
            Self::StoreError | Self::NotConfigured => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<&Error> for ErrorCode {
    fn from(e: &Error) -> Self {
        match e {
            Error::InvalidInput(_) => Self::InvalidParams,
            Error::Agent(_) => Self::AgentFailed,
            Error::Reformat(_) => Self::ReformatFailed,
            Error::Stream(_) => Self::StreamFailed,
            Error::Store(_) => Self::StoreError,
            Error::NotFound(_) => Self::NotFound,
            Error::NotConfigured(_) => Self::NotConfigured,
        }
    }
}

/// JSON error body: `{"error": "...", "code": "...", "retryable": bool}`.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: &'static str,
    pub retryable: bool,
}

impl ErrorBody {
    pub fn new(code: ErrorCode, message: impl ToString) -> Self {
        Self {
            error: message.to_string(),
            code: code.as_str(),
            retryable: code.retryable(),
        }
    }
}

/// Error type returned by handlers. Converts into a status code plus [`ErrorBody`].
#[derive(Debug)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl ToString) -> Self {
        Self {
            code,
            message: message.to_string(),
        }
    }

    pub fn invalid(message: impl ToString) -> Self {
        Self::new(ErrorCode::InvalidParams, message)
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        let code = ErrorCode::from(&e);
        // Input errors carry a caller-facing message already; everything else keeps its context.
        let message = match e {
            Error::InvalidInput(m) | Error::NotFound(m) => m,
            other => other.to_string(),
        };
        Self { code, message }
    }
}

/// Unparseable JSON bodies answer with the same envelope as any other bad input.
impl From<JsonRejection> for ApiError {
    fn from(r: JsonRejection) -> Self {
        Self::invalid(r.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.code.status().is_server_error() {
            tracing::warn!(
                target: "answerpipe::http",
                code = self.code.as_str(),
                error = %self.message,
                "request failed"
            );
        }
        (
            self.code.status(),
            Json(ErrorBody::new(self.code, self.message)),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_core_error_maps_to_a_stable_code() {
        let cases = [
            (Error::InvalidInput("x".into()), "invalid_params", 400, false),
            (Error::Agent("x".into()), "agent_failed", 502, true),
            (Error::Reformat("x".into()), "reformat_failed", 502, true),
            (Error::Stream("x".into()), "stream_failed", 502, true),
            (Error::Store("x".into()), "store_error", 500, true),
            (Error::NotFound("x".into()), "not_found", 404, false),
            (Error::NotConfigured("x".into()), "not_configured", 500, false),
        ];
        for (e, code, status, retryable) in cases {
            let c = ErrorCode::from(&e);
            assert_eq!(c.as_str(), code);
            assert_eq!(c.status().as_u16(), status);
            assert_eq!(c.retryable(), retryable);
        }
    }

    #[test]
    fn input_errors_keep_the_bare_message() {
        let e = ApiError::from(Error::InvalidInput("No query provided".into()));
        assert_eq!(e.message, "No query provided");
        let e = ApiError::from(Error::Agent("HTTP 500".into()));
        assert_eq!(e.message, "agent failed: HTTP 500");
    }
}

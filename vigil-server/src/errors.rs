use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
    pub code: Option<&'static str>,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = match self.code {
            Some(code) => Json(json!({ "error": self.message, "code": code })),
            None => Json(json!({ "error": self.message })),
        };
        (self.status, body).into_response()
    }
}

// Convert from various error types
impl From<vigil_core::MonitorError> for AppError {
    fn from(err: vigil_core::MonitorError) -> Self {
        use vigil_core::MonitorError;
        match err {
            MonitorError::Validation(msg) => {
                Self::bad_request(msg).with_code("validation")
            }
            MonitorError::NotFound(msg) => {
                Self::not_found(msg).with_code("not_found")
            }
            MonitorError::Forbidden(msg) => {
                Self::forbidden(msg).with_code("forbidden")
            }
            MonitorError::Conflict(msg) => {
                Self::conflict(msg).with_code("conflict")
            }
            MonitorError::Transient(msg) => {
                Self::bad_gateway(msg).with_code("transient")
            }
            other => Self::internal(other.to_string()),
        }
    }
}

impl From<vigil_model::ModelError> for AppError {
    fn from(err: vigil_model::ModelError) -> Self {
        Self::bad_request(err.to_string()).with_code("validation")
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::MonitorError;

    #[test]
    fn monitor_errors_map_to_http_statuses() {
        let cases = [
            (MonitorError::validation("x"), StatusCode::BAD_REQUEST),
            (MonitorError::not_found("x"), StatusCode::NOT_FOUND),
            (MonitorError::conflict("x"), StatusCode::CONFLICT),
            (MonitorError::transient("x"), StatusCode::BAD_GATEWAY),
            (MonitorError::internal("x"), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status, status);
        }
    }
}

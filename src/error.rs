use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::{json, Map, Value};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BookingError {
    #[error("{message}")]
    Validation {
        message: String,
        field: Option<&'static str>,
    },

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    InvalidState(String),

    #[error("Authentication required")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(String),

    #[error("Storage failure: {0}")]
    Storage(#[from] sqlx::Error),
}

impl BookingError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        BookingError::Validation {
            message: message.into(),
            field: Some(field),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            BookingError::Validation { .. } => StatusCode::BAD_REQUEST,
            BookingError::NotFound(_) => StatusCode::NOT_FOUND,
            BookingError::Conflict(_) => StatusCode::CONFLICT,
            BookingError::InvalidState(_) => StatusCode::BAD_REQUEST,
            BookingError::Unauthorized => StatusCode::UNAUTHORIZED,
            BookingError::Forbidden(_) => StatusCode::FORBIDDEN,
            BookingError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// HTTP face of a [`BookingError`]. Storage detail only leaves the process
/// when `expose_detail` is set (development mode).
#[derive(Debug)]
pub struct ApiError {
    pub error: BookingError,
    pub expose_detail: bool,
}

impl ApiError {
    pub fn new(error: BookingError, expose_detail: bool) -> Self {
        Self {
            error,
            expose_detail,
        }
    }

    fn envelope(&self) -> Value {
        // Scoped so it cannot shadow the `#[error]` attribute above.
        use tracing::error;

        let mut body = Map::new();
        body.insert("success".into(), Value::Bool(false));

        match &self.error {
            BookingError::Storage(source) => {
                error!(error = %source, "storage failure");
                body.insert("message".into(), json!("Internal server error"));
                if self.expose_detail {
                    body.insert("detail".into(), json!(source.to_string()));
                }
            }
            BookingError::Validation { message, field } => {
                body.insert("message".into(), json!(message));
                if let Some(field) = field {
                    body.insert("errors".into(), json!({ *field: message }));
                }
            }
            other => {
                body.insert("message".into(), json!(other.to_string()));
            }
        }

        Value::Object(body)
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.error.fmt(f)
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        self.error.status_code()
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(self.envelope())
    }
}

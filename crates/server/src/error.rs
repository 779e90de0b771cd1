use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum Error {
    /// Missing or malformed required field, rejected before persistence.
    #[error("{0}")]
    Validation(String),

    /// No valid session on the request.
    #[error("{0}")]
    Unauthorized(String),

    /// The acting user may not perform this operation.
    #[error("{0}")]
    Forbidden(String),

    /// Edit/delete attempted after the window closed. Distinct from
    /// `Forbidden`: the sender was allowed, just too late.
    #[error("cannot modify a message after 5 minutes")]
    WindowExpired,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation",
            Error::Unauthorized(_) => "unauthorized",
            Error::Forbidden(_) => "forbidden",
            Error::WindowExpired => "window_expired",
            Error::NotFound(_) => "not_found",
            Error::Database(_) | Error::Internal(_) => "internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Error::Validation(_) | Error::WindowExpired => StatusCode::BAD_REQUEST,
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Database(_) | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Server-side failures are logged in full but surfaced generically.
        let message = match &self {
            Error::Database(e) => {
                error!("database error: {}", e);
                "internal server error".to_string()
            }
            Error::Internal(msg) => {
                error!("internal error: {}", msg);
                "internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": {
                "code": self.code(),
                "message": message,
            }
        }));

        (self.status(), body).into_response()
    }
}

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use error_types::{error_codes, error_types as kinds, ErrorResponse};
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error, Clone)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    #[error("unauthenticated")]
    Unauthenticated,

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("internal server error")]
    Internal,
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        AppError::Database(e.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        AppError::StartServer(format!("migrations: {e}"))
    }
}

impl AppError {
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::InvalidArgument(_) => 400,
            AppError::Unauthenticated => 401,
            AppError::NotFound(_) => 404,
            AppError::Config(_)
            | AppError::StartServer(_)
            | AppError::Database(_)
            | AppError::Internal => 500,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::InvalidArgument(_) => error_codes::INVALID_REQUEST,
            AppError::Unauthenticated => error_codes::INVALID_TOKEN,
            AppError::NotFound(_) => error_codes::USER_NOT_FOUND,
            AppError::Database(_) => error_codes::DATABASE_ERROR,
            _ => error_codes::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            AppError::InvalidArgument(_) => kinds::VALIDATION_ERROR,
            AppError::Unauthenticated => kinds::AUTHENTICATION_ERROR,
            AppError::NotFound(_) => kinds::NOT_FOUND_ERROR,
            _ => kinds::SERVER_ERROR,
        }
    }

    fn error_name(&self) -> &'static str {
        match self {
            AppError::InvalidArgument(_) => "InvalidArgument",
            AppError::Unauthenticated => "Unauthenticated",
            AppError::NotFound(_) => "NotFound",
            AppError::Database(_) => "DatabaseError",
            _ => "InternalError",
        }
    }

    /// Message shown to clients. Server-side failures never leak their cause.
    pub fn client_message(&self) -> String {
        match self {
            AppError::InvalidArgument(_) | AppError::NotFound(_) | AppError::Unauthenticated => {
                self.to_string()
            }
            _ => "internal server error".to_string(),
        }
    }

    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse::new(
            self.error_name(),
            self.client_message(),
            self.status_code(),
            self.error_type(),
            self.error_code(),
        )
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(AppError::status_code(self))
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> HttpResponse {
        if AppError::status_code(self) >= 500 {
            tracing::error!(error = %self, "request failed");
        }
        HttpResponse::build(ResponseError::status_code(self)).json(self.to_response())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(AppError::InvalidArgument("x".into()).status_code(), 400);
        assert_eq!(AppError::Unauthenticated.status_code(), 401);
        assert_eq!(AppError::NotFound("x".into()).status_code(), 404);
        assert_eq!(AppError::Database("x".into()).status_code(), 500);
    }

    #[test]
    fn test_database_detail_is_not_exposed() {
        let body = AppError::Database("relation \"messages\" does not exist".into()).to_response();
        assert_eq!(body.message, "internal server error");
        assert_eq!(body.code, error_codes::DATABASE_ERROR);
    }

    #[test]
    fn test_client_errors_keep_their_message() {
        let body = AppError::InvalidArgument("cannot send a message to yourself".into()).to_response();
        assert_eq!(body.message, "cannot send a message to yourself");
        assert_eq!(body.error_type, "validation_error");
        assert_eq!(body.code, error_codes::INVALID_REQUEST);
    }
}

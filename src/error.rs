use axum::{http::StatusCode, response::{IntoResponse, Response}};
use thiserror::Error;

use crate::entitlements::{EntitlementError, StoreError};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("not found")]
    NotFound,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("{0}")]
    Message(String),
}

impl From<EntitlementError> for AppError {
    fn from(err: EntitlementError) -> Self {
        match err {
            EntitlementError::NotFound | EntitlementError::PaymentNotFound(_) => {
                AppError::NotFound
            }
            EntitlementError::PaymentIncomplete(reference) => {
                AppError::BadRequest(format!("payment {reference} is not completed"))
            }
            EntitlementError::Store(StoreError::Database(db)) => AppError::Db(db),
            EntitlementError::Store(other) => AppError::Message(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Db(_) | AppError::Message(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(?self);
        }
        (status, self.to_string()).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

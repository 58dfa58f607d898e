use thiserror::Error;

use super::store::StoreError;

#[derive(Debug, Error)]
pub enum EntitlementError {
    #[error("no applicable subscription")]
    NotFound,
    #[error("payment `{0}` not found")]
    PaymentNotFound(String),
    #[error("payment `{0}` is not completed")]
    PaymentIncomplete(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type EntitlementResult<T> = Result<T, EntitlementError>;

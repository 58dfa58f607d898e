use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use super::models::{LearnerProfile, Payment, Subscription, UsageRecord};

pub const SUBSCRIPTION_PAYMENT_REF_KEY: &str = "subscriptions_source_payment_ref_key";
pub const SUBSCRIPTION_IDENTITY_SCOPE_KEY: &str = "subscriptions_identity_scope_key";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("uniqueness constraint `{constraint}` violated")]
    Conflict { constraint: String },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// key: entitlement-store -> subscriptions + usage records
///
/// Writes replace a whole record. Implementations enforce uniqueness on
/// `source_payment_ref` and on `(identity, scope)` for active scoped rows,
/// reporting violations as [`StoreError::Conflict`]. Retired rows release
/// their scope.
#[async_trait]
pub trait EntitlementStore: Send + Sync {
    async fn insert_subscription(&self, subscription: &Subscription) -> StoreResult<()>;
    async fn update_subscription(&self, subscription: &Subscription) -> StoreResult<()>;
    async fn subscription_by_payment_ref(
        &self,
        payment_ref: &str,
    ) -> StoreResult<Option<Subscription>>;
    /// Binds an unscoped row to `scope`. Returns `false` without writing when
    /// the row already carries a scope.
    async fn promote_subscription(
        &self,
        id: Uuid,
        scope: &str,
        updated_at: DateTime<Utc>,
    ) -> StoreResult<bool>;
    /// Most recently created active row for `(identity, scope)`.
    async fn subscription_for_scope(
        &self,
        identity: &str,
        scope: Option<&str>,
    ) -> StoreResult<Option<Subscription>>;
    /// Rows flagged active for `identity`, newest first. Expiry is not applied.
    async fn active_subscriptions(&self, identity: &str) -> StoreResult<Vec<Subscription>>;
    async fn usage_record(&self, subscription_id: Uuid) -> StoreResult<Option<UsageRecord>>;
    async fn save_usage_record(&self, record: &UsageRecord) -> StoreResult<()>;
}

/// key: payment-ledger -> read-only view of completed transactions
#[async_trait]
pub trait PaymentLedger: Send + Sync {
    async fn payment(&self, reference: &str) -> StoreResult<Option<Payment>>;
    async fn latest_completed_payment(
        &self,
        identity: &str,
        scope: Option<&str>,
    ) -> StoreResult<Option<Payment>>;
}

/// key: sponsor-directory -> institutional links per learner
#[async_trait]
pub trait SponsorDirectory: Send + Sync {
    async fn learner_profile(&self, identity: &str) -> StoreResult<Option<LearnerProfile>>;
}

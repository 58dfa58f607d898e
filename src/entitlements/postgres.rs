use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use super::models::{
    DailyChatCounter, LearnerProfile, MonthlyGenerationCounter, Payment, PaymentStatus, PlanTier,
    Subscription, UsageRecord,
};
use super::store::{
    EntitlementStore, PaymentLedger, SponsorDirectory, StoreError, StoreResult,
};

/// key: entitlement-store-postgres -> sqlx adapter
#[derive(Clone)]
pub struct PgEntitlementStore {
    pool: PgPool,
}

impl PgEntitlementStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const SUBSCRIPTION_COLUMNS: &str = "id, identity, scope, tier, daily_chat_limit, \
    monthly_generation_limit, start_date, expiry_date, active, source_payment_ref, \
    resources_saved, max_resources_allowed, created_at, updated_at";

fn map_write_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        // 23505: unique_violation
        if db_err.code().as_deref() == Some("23505") {
            return StoreError::Conflict {
                constraint: db_err.constraint().unwrap_or_default().to_string(),
            };
        }
    }
    StoreError::Database(err)
}

#[async_trait]
impl EntitlementStore for PgEntitlementStore {
    async fn insert_subscription(&self, subscription: &Subscription) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions (
                id,
                identity,
                scope,
                tier,
                daily_chat_limit,
                monthly_generation_limit,
                start_date,
                expiry_date,
                active,
                source_payment_ref,
                resources_saved,
                max_resources_allowed,
                created_at,
                updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(subscription.id)
        .bind(&subscription.identity)
        .bind(&subscription.scope)
        .bind(subscription.tier.as_str())
        .bind(subscription.daily_chat_limit)
        .bind(subscription.monthly_generation_limit)
        .bind(subscription.start_date)
        .bind(subscription.expiry_date)
        .bind(subscription.active)
        .bind(&subscription.source_payment_ref)
        .bind(subscription.resources_saved)
        .bind(subscription.max_resources_allowed)
        .bind(subscription.created_at)
        .bind(subscription.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_write_error)?;
        Ok(())
    }

    async fn update_subscription(&self, subscription: &Subscription) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions SET
                scope = $2,
                tier = $3,
                daily_chat_limit = $4,
                monthly_generation_limit = $5,
                start_date = $6,
                expiry_date = $7,
                active = $8,
                resources_saved = $9,
                max_resources_allowed = $10,
                updated_at = $11
            WHERE id = $1
            "#,
        )
        .bind(subscription.id)
        .bind(&subscription.scope)
        .bind(subscription.tier.as_str())
        .bind(subscription.daily_chat_limit)
        .bind(subscription.monthly_generation_limit)
        .bind(subscription.start_date)
        .bind(subscription.expiry_date)
        .bind(subscription.active)
        .bind(subscription.resources_saved)
        .bind(subscription.max_resources_allowed)
        .bind(subscription.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_write_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Corrupt(format!(
                "subscription {} missing",
                subscription.id
            )));
        }
        Ok(())
    }

    async fn promote_subscription(
        &self,
        id: Uuid,
        scope: &str,
        updated_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE subscriptions SET scope = $2, updated_at = $3 WHERE id = $1 AND scope IS NULL",
        )
        .bind(id)
        .bind(scope)
        .bind(updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_write_error)?;
        Ok(result.rows_affected() == 1)
    }

    async fn subscription_by_payment_ref(
        &self,
        payment_ref: &str,
    ) -> StoreResult<Option<Subscription>> {
        let row = sqlx::query_as::<_, SubscriptionRow>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE source_payment_ref = $1"
        ))
        .bind(payment_ref)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Subscription::from))
    }

    async fn subscription_for_scope(
        &self,
        identity: &str,
        scope: Option<&str>,
    ) -> StoreResult<Option<Subscription>> {
        let row = sqlx::query_as::<_, SubscriptionRow>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions \
             WHERE identity = $1 AND active = TRUE AND scope IS NOT DISTINCT FROM $2::text \
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(identity)
        .bind(scope)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Subscription::from))
    }

    async fn active_subscriptions(&self, identity: &str) -> StoreResult<Vec<Subscription>> {
        let rows = sqlx::query_as::<_, SubscriptionRow>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions \
             WHERE identity = $1 AND active = TRUE \
             ORDER BY created_at DESC"
        ))
        .bind(identity)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Subscription::from).collect())
    }

    async fn usage_record(&self, subscription_id: Uuid) -> StoreResult<Option<UsageRecord>> {
        let row = sqlx::query_as::<_, UsageRecordRow>(
            r#"
            SELECT id, identity, subscription_id, daily_chat, monthly_generation,
                   resources_saved, updated_at
            FROM usage_records
            WHERE subscription_id = $1
            "#,
        )
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(UsageRecord::from))
    }

    async fn save_usage_record(&self, record: &UsageRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO usage_records (
                id,
                identity,
                subscription_id,
                daily_chat,
                monthly_generation,
                resources_saved,
                updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (subscription_id)
            DO UPDATE SET
                daily_chat = EXCLUDED.daily_chat,
                monthly_generation = EXCLUDED.monthly_generation,
                resources_saved = EXCLUDED.resources_saved,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(record.id)
        .bind(&record.identity)
        .bind(record.subscription_id)
        .bind(Json(&record.daily_chat))
        .bind(Json(&record.monthly_generation))
        .bind(record.resources_saved)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl PaymentLedger for PgEntitlementStore {
    async fn payment(&self, reference: &str) -> StoreResult<Option<Payment>> {
        let row = sqlx::query_as::<_, PaymentRow>(
            "SELECT reference, identity, scope, amount, status, completed_at FROM payments WHERE reference = $1",
        )
        .bind(reference)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Payment::from))
    }

    async fn latest_completed_payment(
        &self,
        identity: &str,
        scope: Option<&str>,
    ) -> StoreResult<Option<Payment>> {
        let row = sqlx::query_as::<_, PaymentRow>(
            r#"
            SELECT reference, identity, scope, amount, status, completed_at
            FROM payments
            WHERE identity = $1
              AND scope IS NOT DISTINCT FROM $2::text
              AND status = 'completed'
            ORDER BY completed_at DESC NULLS LAST
            LIMIT 1
            "#,
        )
        .bind(identity)
        .bind(scope)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Payment::from))
    }
}

#[async_trait]
impl SponsorDirectory for PgEntitlementStore {
    async fn learner_profile(&self, identity: &str) -> StoreResult<Option<LearnerProfile>> {
        let row = sqlx::query_as::<_, LearnerProfileRow>(
            r#"
            SELECT identity, teacher_id, organization_id, created_by, managed_by
            FROM learner_profiles
            WHERE identity = $1
            "#,
        )
        .bind(identity)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(LearnerProfile::from))
    }
}

#[derive(sqlx::FromRow)]
struct SubscriptionRow {
    pub id: Uuid,
    pub identity: String,
    pub scope: Option<String>,
    pub tier: String,
    pub daily_chat_limit: i64,
    pub monthly_generation_limit: i64,
    pub start_date: DateTime<Utc>,
    pub expiry_date: DateTime<Utc>,
    pub active: bool,
    pub source_payment_ref: String,
    pub resources_saved: i64,
    pub max_resources_allowed: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<SubscriptionRow> for Subscription {
    fn from(row: SubscriptionRow) -> Self {
        Self {
            id: row.id,
            identity: row.identity,
            scope: row.scope,
            tier: PlanTier::from(row.tier.as_str()),
            daily_chat_limit: row.daily_chat_limit,
            monthly_generation_limit: row.monthly_generation_limit,
            start_date: row.start_date,
            expiry_date: row.expiry_date,
            active: row.active,
            source_payment_ref: row.source_payment_ref,
            resources_saved: row.resources_saved,
            max_resources_allowed: row.max_resources_allowed,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct UsageRecordRow {
    pub id: Uuid,
    pub identity: String,
    pub subscription_id: Uuid,
    pub daily_chat: Json<Vec<DailyChatCounter>>,
    pub monthly_generation: Json<Vec<MonthlyGenerationCounter>>,
    pub resources_saved: i64,
    pub updated_at: DateTime<Utc>,
}

impl From<UsageRecordRow> for UsageRecord {
    fn from(row: UsageRecordRow) -> Self {
        Self {
            id: row.id,
            identity: row.identity,
            subscription_id: row.subscription_id,
            daily_chat: row.daily_chat.0,
            monthly_generation: row.monthly_generation.0,
            resources_saved: row.resources_saved,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct PaymentRow {
    pub reference: String,
    pub identity: String,
    pub scope: Option<String>,
    pub amount: i64,
    pub status: String,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<PaymentRow> for Payment {
    fn from(row: PaymentRow) -> Self {
        Self {
            reference: row.reference,
            identity: row.identity,
            scope: row.scope,
            amount: row.amount,
            status: PaymentStatus::from(row.status.as_str()),
            completed_at: row.completed_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct LearnerProfileRow {
    pub identity: String,
    pub teacher_id: Option<String>,
    pub organization_id: Option<String>,
    pub created_by: Vec<String>,
    pub managed_by: Vec<String>,
}

impl From<LearnerProfileRow> for LearnerProfile {
    fn from(row: LearnerProfileRow) -> Self {
        Self {
            identity: row.identity,
            teacher_id: row.teacher_id,
            organization_id: row.organization_id,
            created_by: row.created_by,
            managed_by: row.managed_by,
        }
    }
}

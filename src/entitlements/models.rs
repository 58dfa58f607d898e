use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// key: entitlement-models -> plans,subscriptions,usage,payments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanTier {
    Basic,
    Premium,
}

impl PlanTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Basic => "basic",
            PlanTier::Premium => "premium",
        }
    }
}

/// Stored labels; unknown values read as basic.
impl From<&str> for PlanTier {
    fn from(value: &str) -> Self {
        match value {
            "premium" => PlanTier::Premium,
            _ => PlanTier::Basic,
        }
    }
}

/// Limits granted by a tier. Derived from the paid amount, never stored as truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub tier: PlanTier,
    pub daily_chat_limit: i64,
    pub monthly_generation_limit: i64,
}

/// key: entitlement-subscription-model -> identity + optional scope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub identity: String,
    pub scope: Option<String>,
    pub tier: PlanTier,
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

impl Subscription {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry_date < now
    }

    pub fn plan(&self) -> Plan {
        Plan {
            tier: self.tier,
            daily_chat_limit: self.daily_chat_limit,
            monthly_generation_limit: self.monthly_generation_limit,
        }
    }

    pub fn apply_plan(&mut self, plan: Plan) {
        self.tier = plan.tier;
        self.daily_chat_limit = plan.daily_chat_limit;
        self.monthly_generation_limit = plan.monthly_generation_limit;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

/// Unknown ledger states read as pending, which never grants access.
impl From<&str> for PaymentStatus {
    fn from(value: &str) -> Self {
        match value {
            "completed" => PaymentStatus::Completed,
            "failed" => PaymentStatus::Failed,
            "refunded" => PaymentStatus::Refunded,
            _ => PaymentStatus::Pending,
        }
    }
}

/// key: entitlement-payment-model -> immutable ledger entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub reference: String,
    pub identity: String,
    pub scope: Option<String>,
    pub amount: i64,
    pub status: PaymentStatus,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Payment {
    pub fn is_completed(&self) -> bool {
        self.status == PaymentStatus::Completed
    }
}

/// Daily chat counter for one content item. Holds the date it was last written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyChatCounter {
    pub item: String,
    pub date: NaiveDate,
    pub count: i64,
}

/// Monthly generation counter for one content item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlyGenerationCounter {
    pub item: String,
    pub year: i32,
    pub month: u32,
    pub count: i64,
}

impl MonthlyGenerationCounter {
    pub fn matches(&self, today: NaiveDate) -> bool {
        self.year == today.year() && self.month == today.month()
    }
}

/// key: entitlement-usage-record -> windowed counters per subscription
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub id: Uuid,
    pub identity: String,
    pub subscription_id: Uuid,
    pub daily_chat: Vec<DailyChatCounter>,
    pub monthly_generation: Vec<MonthlyGenerationCounter>,
    pub resources_saved: i64,
    pub updated_at: DateTime<Utc>,
}

impl UsageRecord {
    pub fn new(subscription: &Subscription, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            identity: subscription.identity.clone(),
            subscription_id: subscription.id,
            daily_chat: Vec::new(),
            monthly_generation: Vec::new(),
            resources_saved: subscription.resources_saved,
            updated_at: now,
        }
    }
}

/// Institutional links for a learner, as stored by the onboarding flows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearnerProfile {
    pub identity: String,
    pub teacher_id: Option<String>,
    pub organization_id: Option<String>,
    #[serde(default)]
    pub created_by: Vec<String>,
    #[serde(default)]
    pub managed_by: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaKind {
    Chat,
    Generation,
    ResourceSave,
}

impl QuotaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuotaKind::Chat => "chat",
            QuotaKind::Generation => "generation",
            QuotaKind::ResourceSave => "resource_save",
        }
    }
}

/// Result of a quota check. `None` limits mean unlimited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaOutcome {
    pub allowed: bool,
    pub kind: QuotaKind,
    pub limit: Option<i64>,
    pub used: i64,
    pub remaining: Option<i64>,
    pub notes: Vec<String>,
}

impl QuotaOutcome {
    pub fn sponsored(kind: QuotaKind) -> Self {
        Self {
            allowed: true,
            kind,
            limit: None,
            used: 0,
            remaining: None,
            notes: vec!["quota:sponsored".to_string()],
        }
    }

    pub fn missing_subscription(kind: QuotaKind) -> Self {
        Self {
            allowed: false,
            kind,
            limit: Some(0),
            used: 0,
            remaining: Some(0),
            notes: vec!["quota:subscription-missing".to_string()],
        }
    }

    pub fn measured(kind: QuotaKind, used: i64, limit: i64) -> Self {
        let allowed = used < limit;
        let note = if allowed {
            format!("quota:{}:{used}/{limit}", kind.as_str())
        } else {
            format!("quota:{}:exhausted", kind.as_str())
        };
        Self {
            allowed,
            kind,
            limit: Some(limit),
            used,
            remaining: Some(limit.saturating_sub(used).max(0)),
            notes: vec![note],
        }
    }
}

/// What a record call wrote. Sponsored identities record nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordOutcome {
    pub kind: QuotaKind,
    pub sponsored: bool,
    pub subscription_id: Option<Uuid>,
    pub used: i64,
    pub limit: Option<i64>,
}

impl RecordOutcome {
    pub fn sponsored(kind: QuotaKind) -> Self {
        Self {
            kind,
            sponsored: true,
            subscription_id: None,
            used: 0,
            limit: None,
        }
    }
}

/// Display snapshot of a subscription and its current-window counters.
#[derive(Debug, Clone, Serialize)]
pub struct UsageSummary {
    pub subscription: Subscription,
    pub daily_chat: Vec<DailyChatCounter>,
    pub monthly_generation: Vec<MonthlyGenerationCounter>,
    pub resources_saved: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_labels_round_trip_and_unknowns_degrade() {
        for tier in [PlanTier::Basic, PlanTier::Premium] {
            assert_eq!(PlanTier::from(tier.as_str()), tier);
        }
        assert_eq!(PlanTier::from("gold"), PlanTier::Basic);

        assert_eq!(PaymentStatus::from("completed"), PaymentStatus::Completed);
        assert_eq!(PaymentStatus::from("refunded"), PaymentStatus::Refunded);
        assert_eq!(PaymentStatus::from("chargeback"), PaymentStatus::Pending);
    }
}

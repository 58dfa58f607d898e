//! Entitlement resolution, ledger reconciliation, and windowed usage metering.

pub mod api;
pub mod catalog;
pub mod clock;
pub mod error;
pub mod factory;
pub mod memory;
pub mod models;
pub mod postgres;
pub mod quota;
pub mod reconciliation;
pub mod resolver;
pub mod service;
pub mod sponsorship;
pub mod store;
pub mod usage;

pub use api::routes;
pub use catalog::{plan_catalog, plan_from_amount, PlanCatalogEntry};
pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{EntitlementError, EntitlementResult};
pub use factory::SubscriptionFactory;
pub use memory::InMemoryEntitlementStore;
pub use models::{
    DailyChatCounter, LearnerProfile, MonthlyGenerationCounter, Payment, PaymentStatus, Plan,
    PlanTier, QuotaKind, QuotaOutcome, RecordOutcome, Subscription, UsageRecord, UsageSummary,
};
pub use postgres::PgEntitlementStore;
pub use quota::QuotaGuard;
pub use reconciliation::ReconciliationEngine;
pub use resolver::EntitlementResolver;
pub use service::EntitlementService;
pub use sponsorship::FreeAccessOverride;
pub use store::{EntitlementStore, PaymentLedger, SponsorDirectory, StoreError, StoreResult};
pub use usage::UsageLedger;

/// key: entitlement-config -> knobs applied at subscription creation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntitlementConfig {
    pub max_resources_allowed: i64,
    pub term_months: u32,
}

impl Default for EntitlementConfig {
    fn default() -> Self {
        Self {
            max_resources_allowed: 1,
            term_months: 1,
        }
    }
}

use std::sync::Arc;

use super::clock::{Clock, SystemClock};
use super::error::{EntitlementError, EntitlementResult};
use super::factory::SubscriptionFactory;
use super::models::{QuotaOutcome, RecordOutcome, Subscription, UsageSummary};
use super::quota::QuotaGuard;
use super::reconciliation::ReconciliationEngine;
use super::resolver::EntitlementResolver;
use super::sponsorship::FreeAccessOverride;
use super::store::{EntitlementStore, PaymentLedger, SponsorDirectory};
use super::usage::UsageLedger;
use super::EntitlementConfig;

/// key: entitlement-service -> caller-facing entry points
///
/// Every quota entry point consults the sponsorship override before anything
/// else, then resolution, reconciliation and the usage ledger.
#[derive(Clone)]
pub struct EntitlementService {
    factory: SubscriptionFactory,
    quota: QuotaGuard,
    ledger: Arc<dyn PaymentLedger>,
    sponsorship: FreeAccessOverride,
}

impl EntitlementService {
    pub fn new<S>(store: Arc<S>, config: EntitlementConfig) -> Self
    where
        S: EntitlementStore + PaymentLedger + SponsorDirectory + 'static,
    {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    pub fn with_clock<S>(store: Arc<S>, config: EntitlementConfig, clock: Arc<dyn Clock>) -> Self
    where
        S: EntitlementStore + PaymentLedger + SponsorDirectory + 'static,
    {
        let entitlements: Arc<dyn EntitlementStore> = store.clone();
        let ledger: Arc<dyn PaymentLedger> = store.clone();
        let directory: Arc<dyn SponsorDirectory> = store;

        let sponsorship = FreeAccessOverride::new(directory);
        let resolver = EntitlementResolver::new(entitlements.clone(), clock.clone());
        let reconciler =
            ReconciliationEngine::new(entitlements.clone(), ledger.clone(), clock.clone());
        let usage = UsageLedger::new(entitlements.clone(), clock.clone());
        let factory =
            SubscriptionFactory::new(entitlements.clone(), ledger.clone(), clock.clone(), config);
        let quota = QuotaGuard::new(
            sponsorship.clone(),
            resolver,
            reconciler,
            usage,
            entitlements,
            clock,
        );

        Self {
            factory,
            quota,
            ledger,
            sponsorship,
        }
    }

    pub fn factory(&self) -> &SubscriptionFactory {
        &self.factory
    }

    pub fn quota(&self) -> &QuotaGuard {
        &self.quota
    }

    pub async fn is_sponsored(&self, identity: &str) -> EntitlementResult<bool> {
        Ok(self.sponsorship.is_sponsored(identity).await?)
    }

    /// Payment webhook path: looks the payment up and creates (or adopts) its subscription.
    pub async fn activate_payment(
        &self,
        identity: &str,
        reference: &str,
        requested_scope: Option<&str>,
    ) -> EntitlementResult<Subscription> {
        let payment = self
            .ledger
            .payment(reference)
            .await?
            .filter(|payment| payment.identity == identity)
            .ok_or_else(|| EntitlementError::PaymentNotFound(reference.to_string()))?;
        self.factory
            .create_from_payment(&payment, requested_scope)
            .await
    }

    pub async fn subscription(
        &self,
        identity: &str,
        scope: Option<&str>,
    ) -> EntitlementResult<Subscription> {
        self.quota
            .entitlement(identity, scope)
            .await?
            .ok_or(EntitlementError::NotFound)
    }

    pub async fn usage_summary(
        &self,
        identity: &str,
        scope: Option<&str>,
    ) -> EntitlementResult<UsageSummary> {
        let subscription = self.subscription(identity, scope).await?;
        let usage = self.quota.usage();
        let (daily_chat, monthly_generation) = match usage.record(&subscription).await? {
            Some(record) => usage.current_windows(&record),
            None => (Vec::new(), Vec::new()),
        };
        Ok(UsageSummary {
            resources_saved: subscription.resources_saved,
            subscription,
            daily_chat,
            monthly_generation,
        })
    }

    pub async fn check_chat(
        &self,
        identity: &str,
        item: &str,
        scope: Option<&str>,
    ) -> EntitlementResult<QuotaOutcome> {
        self.quota.check_chat(identity, item, scope).await
    }

    pub async fn record_chat(
        &self,
        identity: &str,
        item: &str,
        scope: Option<&str>,
    ) -> EntitlementResult<RecordOutcome> {
        self.quota.record_chat(identity, item, scope).await
    }

    pub async fn check_generation(
        &self,
        identity: &str,
        item: &str,
        scope: Option<&str>,
    ) -> EntitlementResult<QuotaOutcome> {
        self.quota.check_generation(identity, item, scope).await
    }

    pub async fn record_generation(
        &self,
        identity: &str,
        item: &str,
        scope: Option<&str>,
    ) -> EntitlementResult<RecordOutcome> {
        self.quota.record_generation(identity, item, scope).await
    }

    /// Resource-save gate. Only resolves; nothing is bound until a save is recorded.
    pub async fn check_resource_save(
        &self,
        identity: &str,
        scope: &str,
    ) -> EntitlementResult<QuotaOutcome> {
        self.quota.check_resource_save(identity, Some(scope)).await
    }

    /// Records a completed save, binding the purchase to `scope` first when it
    /// is still unscoped.
    pub async fn record_resource_save(
        &self,
        identity: &str,
        scope: &str,
    ) -> EntitlementResult<RecordOutcome> {
        if !self.sponsorship.is_sponsored(identity).await? {
            match self.factory.activate_for_scope(identity, scope).await {
                Ok(_) | Err(EntitlementError::NotFound) => {}
                Err(err) => return Err(err),
            }
        }
        self.quota.record_resource_save(identity, Some(scope)).await
    }
}

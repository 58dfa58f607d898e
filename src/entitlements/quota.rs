use std::sync::Arc;

use tracing::debug;

use super::clock::Clock;
use super::error::{EntitlementError, EntitlementResult};
use super::models::{QuotaKind, QuotaOutcome, RecordOutcome, Subscription};
use super::reconciliation::ReconciliationEngine;
use super::resolver::EntitlementResolver;
use super::sponsorship::FreeAccessOverride;
use super::store::EntitlementStore;
use super::usage::UsageLedger;

/// key: quota-guard -> check-then-record gates
///
/// Checks and records are separate calls, so concurrent callers can both pass a
/// check and both record. The overshoot is bounded by the number of racing
/// requests and is never corrected afterwards.
#[derive(Clone)]
pub struct QuotaGuard {
    sponsorship: FreeAccessOverride,
    resolver: EntitlementResolver,
    reconciler: ReconciliationEngine,
    usage: UsageLedger,
    store: Arc<dyn EntitlementStore>,
    clock: Arc<dyn Clock>,
}

impl QuotaGuard {
    pub fn new(
        sponsorship: FreeAccessOverride,
        resolver: EntitlementResolver,
        reconciler: ReconciliationEngine,
        usage: UsageLedger,
        store: Arc<dyn EntitlementStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            sponsorship,
            resolver,
            reconciler,
            usage,
            store,
            clock,
        }
    }

    /// Resolves and reconciles the subscription that governs `identity` in `scope`.
    pub async fn entitlement(
        &self,
        identity: &str,
        scope: Option<&str>,
    ) -> EntitlementResult<Option<Subscription>> {
        let Some(mut subscription) = self.resolver.resolve(identity, scope).await? else {
            return Ok(None);
        };
        self.reconciler.refresh(&mut subscription).await?;
        Ok(Some(subscription))
    }

    pub async fn check_chat(
        &self,
        identity: &str,
        item: &str,
        scope: Option<&str>,
    ) -> EntitlementResult<QuotaOutcome> {
        if self.sponsorship.is_sponsored(identity).await? {
            return Ok(QuotaOutcome::sponsored(QuotaKind::Chat));
        }
        let Some(subscription) = self.entitlement(identity, scope).await? else {
            return Ok(QuotaOutcome::missing_subscription(QuotaKind::Chat));
        };
        let used = self.usage.chat_count(&subscription, item).await?;
        Ok(self.outcome(QuotaKind::Chat, &subscription, used, subscription.daily_chat_limit))
    }

    pub async fn record_chat(
        &self,
        identity: &str,
        item: &str,
        scope: Option<&str>,
    ) -> EntitlementResult<RecordOutcome> {
        if self.sponsorship.is_sponsored(identity).await? {
            return Ok(RecordOutcome::sponsored(QuotaKind::Chat));
        }
        let subscription = self.require(identity, scope).await?;
        let used = self.usage.record_chat(&subscription, item).await?;
        Ok(RecordOutcome {
            kind: QuotaKind::Chat,
            sponsored: false,
            subscription_id: Some(subscription.id),
            used,
            limit: Some(subscription.daily_chat_limit),
        })
    }

    pub async fn check_generation(
        &self,
        identity: &str,
        item: &str,
        scope: Option<&str>,
    ) -> EntitlementResult<QuotaOutcome> {
        if self.sponsorship.is_sponsored(identity).await? {
            return Ok(QuotaOutcome::sponsored(QuotaKind::Generation));
        }
        let Some(subscription) = self.entitlement(identity, scope).await? else {
            return Ok(QuotaOutcome::missing_subscription(QuotaKind::Generation));
        };
        let used = self.usage.generation_count(&subscription, item).await?;
        Ok(self.outcome(
            QuotaKind::Generation,
            &subscription,
            used,
            subscription.monthly_generation_limit,
        ))
    }

    pub async fn record_generation(
        &self,
        identity: &str,
        item: &str,
        scope: Option<&str>,
    ) -> EntitlementResult<RecordOutcome> {
        if self.sponsorship.is_sponsored(identity).await? {
            return Ok(RecordOutcome::sponsored(QuotaKind::Generation));
        }
        let subscription = self.require(identity, scope).await?;
        let used = self.usage.record_generation(&subscription, item).await?;
        Ok(RecordOutcome {
            kind: QuotaKind::Generation,
            sponsored: false,
            subscription_id: Some(subscription.id),
            used,
            limit: Some(subscription.monthly_generation_limit),
        })
    }

    pub async fn check_resource_save(
        &self,
        identity: &str,
        scope: Option<&str>,
    ) -> EntitlementResult<QuotaOutcome> {
        if self.sponsorship.is_sponsored(identity).await? {
            return Ok(QuotaOutcome::sponsored(QuotaKind::ResourceSave));
        }
        let Some(subscription) = self.entitlement(identity, scope).await? else {
            return Ok(QuotaOutcome::missing_subscription(QuotaKind::ResourceSave));
        };
        Ok(self.outcome(
            QuotaKind::ResourceSave,
            &subscription,
            subscription.resources_saved,
            subscription.max_resources_allowed,
        ))
    }

    /// Lifetime counter on the subscription itself; the usage record only mirrors it.
    pub async fn record_resource_save(
        &self,
        identity: &str,
        scope: Option<&str>,
    ) -> EntitlementResult<RecordOutcome> {
        if self.sponsorship.is_sponsored(identity).await? {
            return Ok(RecordOutcome::sponsored(QuotaKind::ResourceSave));
        }
        let mut subscription = self.require(identity, scope).await?;
        subscription.resources_saved += 1;
        subscription.updated_at = self.clock.now();
        self.store.update_subscription(&subscription).await?;
        self.usage.mirror_resources_saved(&subscription).await?;
        Ok(RecordOutcome {
            kind: QuotaKind::ResourceSave,
            sponsored: false,
            subscription_id: Some(subscription.id),
            used: subscription.resources_saved,
            limit: Some(subscription.max_resources_allowed),
        })
    }

    pub fn usage(&self) -> &UsageLedger {
        &self.usage
    }

    async fn require(&self, identity: &str, scope: Option<&str>) -> EntitlementResult<Subscription> {
        self.entitlement(identity, scope)
            .await?
            .ok_or(EntitlementError::NotFound)
    }

    fn outcome(
        &self,
        kind: QuotaKind,
        subscription: &Subscription,
        used: i64,
        limit: i64,
    ) -> QuotaOutcome {
        let outcome = QuotaOutcome::measured(kind, used, limit);
        if !outcome.allowed {
            debug!(
                identity = %subscription.identity,
                subscription = %subscription.id,
                kind = kind.as_str(),
                used,
                limit,
                "quota exhausted"
            );
        }
        outcome
    }
}

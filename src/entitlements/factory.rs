use std::sync::Arc;

use chrono::Months;
use tracing::{debug, info};
use uuid::Uuid;

use super::catalog::plan_from_amount;
use super::clock::Clock;
use super::error::{EntitlementError, EntitlementResult};
use super::models::{Payment, Subscription};
use super::store::{EntitlementStore, PaymentLedger, StoreError};
use super::EntitlementConfig;

/// key: subscription-factory -> idempotent creation from completed payments
///
/// Creation is not wrapped in a transaction with resolution. Racing callers are
/// serialized by the store's uniqueness constraints: the loser re-reads and
/// adopts the winner's row.
#[derive(Clone)]
pub struct SubscriptionFactory {
    store: Arc<dyn EntitlementStore>,
    ledger: Arc<dyn PaymentLedger>,
    clock: Arc<dyn Clock>,
    config: EntitlementConfig,
}

impl SubscriptionFactory {
    pub fn new(
        store: Arc<dyn EntitlementStore>,
        ledger: Arc<dyn PaymentLedger>,
        clock: Arc<dyn Clock>,
        config: EntitlementConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            clock,
            config,
        }
    }

    pub async fn create_from_payment(
        &self,
        payment: &Payment,
        requested_scope: Option<&str>,
    ) -> EntitlementResult<Subscription> {
        if !payment.is_completed() {
            return Err(EntitlementError::PaymentIncomplete(
                payment.reference.clone(),
            ));
        }

        let effective_scope = payment
            .scope
            .as_deref()
            .or(requested_scope)
            .map(str::to_string);

        if let Some(existing) = self
            .store
            .subscription_by_payment_ref(&payment.reference)
            .await?
        {
            return self.adopt(existing, effective_scope).await;
        }

        let candidate = self.build(payment, effective_scope.clone())?;
        let Some(winner) = self.insert(&candidate, payment).await? else {
            return Ok(candidate);
        };

        // An expired holder from an earlier purchase gives the scope up once.
        if winner.source_payment_ref != payment.reference && self.retire_if_stale(&winner).await? {
            return match self.insert(&candidate, payment).await? {
                None => Ok(candidate),
                Some(holder) => self.adopt(holder, effective_scope).await,
            };
        }
        self.adopt(winner, effective_scope).await
    }

    /// Resource-save flow: binds the identity's purchase to `scope`, promoting a
    /// temporary subscription the first time a scope is established.
    pub async fn activate_for_scope(
        &self,
        identity: &str,
        scope: &str,
    ) -> EntitlementResult<Subscription> {
        let payment = match self
            .ledger
            .latest_completed_payment(identity, Some(scope))
            .await?
        {
            Some(payment) => payment,
            None => self
                .ledger
                .latest_completed_payment(identity, None)
                .await?
                .ok_or(EntitlementError::NotFound)?,
        };
        self.create_from_payment(&payment, Some(scope)).await
    }

    fn build(
        &self,
        payment: &Payment,
        scope: Option<String>,
    ) -> EntitlementResult<Subscription> {
        let now = self.clock.now();
        let start_date = payment.completed_at.unwrap_or(now);
        let expiry_date = start_date
            .checked_add_months(Months::new(self.config.term_months))
            .ok_or_else(|| {
                StoreError::Corrupt(format!(
                    "expiry overflow for payment {}",
                    payment.reference
                ))
            })?;
        let plan = plan_from_amount(payment.amount);

        Ok(Subscription {
            id: Uuid::new_v4(),
            identity: payment.identity.clone(),
            scope,
            tier: plan.tier,
            daily_chat_limit: plan.daily_chat_limit,
            monthly_generation_limit: plan.monthly_generation_limit,
            start_date,
            expiry_date,
            active: true,
            source_payment_ref: payment.reference.clone(),
            resources_saved: 0,
            max_resources_allowed: self.config.max_resources_allowed,
            created_at: now,
            updated_at: now,
        })
    }

    /// Inserts `candidate`. On a uniqueness conflict returns the row that won.
    async fn insert(
        &self,
        candidate: &Subscription,
        payment: &Payment,
    ) -> EntitlementResult<Option<Subscription>> {
        match self.store.insert_subscription(candidate).await {
            Ok(()) => {
                info!(
                    identity = %candidate.identity,
                    subscription = %candidate.id,
                    payment = %payment.reference,
                    scope = ?candidate.scope,
                    tier = candidate.tier.as_str(),
                    "subscription created from payment"
                );
                Ok(None)
            }
            Err(StoreError::Conflict { constraint }) => {
                debug!(
                    identity = %payment.identity,
                    payment = %payment.reference,
                    %constraint,
                    "subscription creation raced; adopting existing row"
                );
                let winner = self
                    .reread(
                        &payment.reference,
                        &payment.identity,
                        candidate.scope.as_deref(),
                    )
                    .await?;
                Ok(Some(winner))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// The single read-after-conflict step: by payment reference, then the
    /// active holder of `(identity, scope)`.
    async fn reread(
        &self,
        payment_ref: &str,
        identity: &str,
        scope: Option<&str>,
    ) -> EntitlementResult<Subscription> {
        if let Some(row) = self.store.subscription_by_payment_ref(payment_ref).await? {
            return Ok(row);
        }
        self.store
            .subscription_for_scope(identity, scope)
            .await?
            .ok_or(EntitlementError::NotFound)
    }

    /// Retires a row that is inactive or past expiry. Returns whether it was stale.
    async fn retire_if_stale(&self, subscription: &Subscription) -> EntitlementResult<bool> {
        let now = self.clock.now();
        if subscription.active && !subscription.is_expired(now) {
            return Ok(false);
        }
        if subscription.active {
            let mut retired = subscription.clone();
            retired.active = false;
            retired.updated_at = now;
            self.store.update_subscription(&retired).await?;
            info!(
                identity = %subscription.identity,
                subscription = %subscription.id,
                expiry = %subscription.expiry_date,
                "expired subscription retired"
            );
        }
        Ok(true)
    }

    /// Returns `existing` if still valid, promoting it to `scope` when it is
    /// unscoped. Only one promotion of a row ever lands.
    async fn adopt(
        &self,
        existing: Subscription,
        scope: Option<String>,
    ) -> EntitlementResult<Subscription> {
        if self.retire_if_stale(&existing).await? {
            return Err(EntitlementError::NotFound);
        }
        let Some(scope) = scope else {
            return Ok(existing);
        };
        if existing.scope.is_some() {
            return Ok(existing);
        }

        let now = self.clock.now();
        match self
            .store
            .promote_subscription(existing.id, &scope, now)
            .await
        {
            Ok(true) => {
                info!(
                    identity = %existing.identity,
                    subscription = %existing.id,
                    %scope,
                    "temporary subscription promoted to scope"
                );
                let mut promoted = existing;
                promoted.scope = Some(scope);
                promoted.updated_at = now;
                Ok(promoted)
            }
            Ok(false) => {
                debug!(
                    identity = %existing.identity,
                    subscription = %existing.id,
                    "subscription promoted concurrently; adopting its scope"
                );
                self.store
                    .subscription_by_payment_ref(&existing.source_payment_ref)
                    .await?
                    .ok_or(EntitlementError::NotFound)
            }
            Err(StoreError::Conflict { constraint }) => {
                debug!(
                    identity = %existing.identity,
                    subscription = %existing.id,
                    %scope,
                    %constraint,
                    "scope already held; adopting holder"
                );
                self.store
                    .subscription_for_scope(&existing.identity, Some(&scope))
                    .await?
                    .ok_or(EntitlementError::NotFound)
            }
            Err(err) => Err(err.into()),
        }
    }
}

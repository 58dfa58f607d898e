use std::sync::Arc;

use tracing::{debug, info, warn};

use super::catalog::plan_from_amount;
use super::clock::Clock;
use super::models::{Payment, Subscription};
use super::store::{EntitlementStore, PaymentLedger, StoreResult};

/// key: entitlement-reconciliation -> heal cached plan fields from the ledger
#[derive(Clone)]
pub struct ReconciliationEngine {
    store: Arc<dyn EntitlementStore>,
    ledger: Arc<dyn PaymentLedger>,
    clock: Arc<dyn Clock>,
}

impl ReconciliationEngine {
    pub fn new(
        store: Arc<dyn EntitlementStore>,
        ledger: Arc<dyn PaymentLedger>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            ledger,
            clock,
        }
    }

    /// Overwrites tier and limits with what `payment` paid for. A payment for a
    /// different scope is never applied; the subscription is left untouched.
    /// The row's own unscoped source payment still applies after promotion.
    pub async fn reconcile(
        &self,
        subscription: &mut Subscription,
        payment: &Payment,
    ) -> StoreResult<bool> {
        if !payment.is_completed() {
            debug!(
                subscription = %subscription.id,
                payment = %payment.reference,
                status = payment.status.as_str(),
                "skipping reconciliation against incomplete payment"
            );
            return Ok(false);
        }

        // A promoted row still answers to the unscoped purchase it came from.
        let own_promoted_purchase =
            payment.reference == subscription.source_payment_ref && payment.scope.is_none();
        if payment.scope != subscription.scope && !own_promoted_purchase {
            warn!(
                identity = %subscription.identity,
                subscription = %subscription.id,
                payment = %payment.reference,
                subscription_scope = ?subscription.scope,
                payment_scope = ?payment.scope,
                "scope mismatch between payment and subscription; correction skipped"
            );
            return Ok(false);
        }

        let expected = plan_from_amount(payment.amount);
        let cached = subscription.plan();
        if cached == expected {
            return Ok(false);
        }

        let mut corrected = subscription.clone();
        corrected.apply_plan(expected);
        corrected.updated_at = self.clock.now();
        self.store.update_subscription(&corrected).await?;

        info!(
            identity = %corrected.identity,
            subscription = %corrected.id,
            payment = %payment.reference,
            from = cached.tier.as_str(),
            to = expected.tier.as_str(),
            "subscription plan corrected from ledger"
        );
        *subscription = corrected;
        Ok(true)
    }

    /// Reconciles against the source payment, or the newest completed payment
    /// for the same identity and scope when the source is gone.
    pub async fn refresh(&self, subscription: &mut Subscription) -> StoreResult<bool> {
        let payment = match self
            .ledger
            .payment(&subscription.source_payment_ref)
            .await?
        {
            Some(payment) => Some(payment),
            None => {
                self.ledger
                    .latest_completed_payment(
                        &subscription.identity,
                        subscription.scope.as_deref(),
                    )
                    .await?
            }
        };

        let Some(payment) = payment else {
            debug!(
                subscription = %subscription.id,
                payment = %subscription.source_payment_ref,
                "no ledger entry to reconcile against"
            );
            return Ok(false);
        };

        self.reconcile(subscription, &payment).await
    }
}

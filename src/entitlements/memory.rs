use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use super::models::{LearnerProfile, Payment, Subscription, UsageRecord};
use super::store::{
    EntitlementStore, PaymentLedger, SponsorDirectory, StoreError, StoreResult,
    SUBSCRIPTION_IDENTITY_SCOPE_KEY, SUBSCRIPTION_PAYMENT_REF_KEY,
};

/// key: entitlement-store-memory -> process-local adapter
///
/// Mirrors the Postgres constraints: unique `source_payment_ref`, unique
/// `(identity, scope)` for active scoped rows. Unscoped duplicates are allowed,
/// the same way a NULL scope never collides in a Postgres unique index.
#[derive(Debug, Default)]
pub struct InMemoryEntitlementStore {
    sequence: AtomicU64,
    subscriptions: DashMap<Uuid, (u64, Subscription)>,
    payment_refs: DashMap<String, Uuid>,
    scope_keys: DashMap<(String, String), Uuid>,
    usage: DashMap<Uuid, UsageRecord>,
    payments: DashMap<String, (u64, Payment)>,
    learners: DashMap<String, LearnerProfile>,
}

impl InMemoryEntitlementStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_payment(&self, payment: Payment) {
        let seq = self.next_sequence();
        self.payments
            .insert(payment.reference.clone(), (seq, payment));
    }

    pub fn add_learner(&self, profile: LearnerProfile) {
        self.learners.insert(profile.identity.clone(), profile);
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn usage_record_count(&self) -> usize {
        self.usage.len()
    }

    pub fn subscriptions_for(&self, identity: &str) -> Vec<Subscription> {
        let mut rows = self.ordered(|sub| sub.identity == identity);
        rows.reverse();
        rows
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst)
    }

    /// Matching rows, oldest first.
    fn ordered(&self, filter: impl Fn(&Subscription) -> bool) -> Vec<Subscription> {
        let mut rows: Vec<(u64, Subscription)> = self
            .subscriptions
            .iter()
            .filter(|entry| filter(&entry.value().1))
            .map(|entry| entry.value().clone())
            .collect();
        rows.sort_by(|(a_seq, a), (b_seq, b)| {
            a.created_at.cmp(&b.created_at).then(a_seq.cmp(b_seq))
        });
        rows.into_iter().map(|(_, sub)| sub).collect()
    }

    fn reserve_scope(&self, subscription: &Subscription) -> StoreResult<()> {
        let Some(scope) = claimed_scope(subscription) else {
            return Ok(());
        };
        match self
            .scope_keys
            .entry((subscription.identity.clone(), scope.clone()))
        {
            Entry::Occupied(entry) if *entry.get() != subscription.id => {
                Err(StoreError::Conflict {
                    constraint: SUBSCRIPTION_IDENTITY_SCOPE_KEY.to_string(),
                })
            }
            Entry::Occupied(_) => Ok(()),
            Entry::Vacant(entry) => {
                entry.insert(subscription.id);
                Ok(())
            }
        }
    }

    fn release_scope(&self, subscription: &Subscription) {
        if let Some(scope) = claimed_scope(subscription) {
            self.scope_keys.remove_if(
                &(subscription.identity.clone(), scope.clone()),
                |_, id| *id == subscription.id,
            );
        }
    }
}

/// Scope key a row holds in the uniqueness index, if any.
fn claimed_scope(subscription: &Subscription) -> Option<&String> {
    subscription
        .scope
        .as_ref()
        .filter(|_| subscription.active)
}

#[async_trait]
impl EntitlementStore for InMemoryEntitlementStore {
    async fn insert_subscription(&self, subscription: &Subscription) -> StoreResult<()> {
        // The reference entry stays locked until the row is stored, so a reader
        // that observes the reference also observes the row.
        let entry = match self
            .payment_refs
            .entry(subscription.source_payment_ref.clone())
        {
            Entry::Occupied(_) => {
                return Err(StoreError::Conflict {
                    constraint: SUBSCRIPTION_PAYMENT_REF_KEY.to_string(),
                })
            }
            Entry::Vacant(entry) => entry,
        };

        self.reserve_scope(subscription)?;
        let seq = self.next_sequence();
        self.subscriptions
            .insert(subscription.id, (seq, subscription.clone()));
        entry.insert(subscription.id);
        Ok(())
    }

    async fn update_subscription(&self, subscription: &Subscription) -> StoreResult<()> {
        let previous = self
            .subscriptions
            .get(&subscription.id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::Corrupt(format!("subscription {} missing", subscription.id)))?;

        let before = claimed_scope(&previous.1);
        let after = claimed_scope(subscription);
        if before != after {
            self.reserve_scope(subscription)?;
            self.release_scope(&previous.1);
        }

        self.subscriptions
            .insert(subscription.id, (previous.0, subscription.clone()));
        Ok(())
    }

    async fn promote_subscription(
        &self,
        id: Uuid,
        scope: &str,
        updated_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut entry = self
            .subscriptions
            .get_mut(&id)
            .ok_or_else(|| StoreError::Corrupt(format!("subscription {id} missing")))?;
        let row = &mut entry.value_mut().1;
        if row.scope.is_some() {
            return Ok(false);
        }

        let mut promoted = row.clone();
        promoted.scope = Some(scope.to_string());
        promoted.updated_at = updated_at;
        self.reserve_scope(&promoted)?;
        *row = promoted;
        Ok(true)
    }

    async fn subscription_by_payment_ref(
        &self,
        payment_ref: &str,
    ) -> StoreResult<Option<Subscription>> {
        let Some(id) = self.payment_refs.get(payment_ref).map(|entry| *entry.value()) else {
            return Ok(None);
        };
        Ok(self
            .subscriptions
            .get(&id)
            .map(|entry| entry.value().1.clone()))
    }

    async fn subscription_for_scope(
        &self,
        identity: &str,
        scope: Option<&str>,
    ) -> StoreResult<Option<Subscription>> {
        Ok(self
            .ordered(|sub| {
                sub.identity == identity && sub.active && sub.scope.as_deref() == scope
            })
            .pop())
    }

    async fn active_subscriptions(&self, identity: &str) -> StoreResult<Vec<Subscription>> {
        let mut rows = self.ordered(|sub| sub.identity == identity && sub.active);
        rows.reverse();
        Ok(rows)
    }

    async fn usage_record(&self, subscription_id: Uuid) -> StoreResult<Option<UsageRecord>> {
        Ok(self
            .usage
            .get(&subscription_id)
            .map(|entry| entry.value().clone()))
    }

    async fn save_usage_record(&self, record: &UsageRecord) -> StoreResult<()> {
        self.usage.insert(record.subscription_id, record.clone());
        Ok(())
    }
}

#[async_trait]
impl PaymentLedger for InMemoryEntitlementStore {
    async fn payment(&self, reference: &str) -> StoreResult<Option<Payment>> {
        Ok(self
            .payments
            .get(reference)
            .map(|entry| entry.value().1.clone()))
    }

    async fn latest_completed_payment(
        &self,
        identity: &str,
        scope: Option<&str>,
    ) -> StoreResult<Option<Payment>> {
        let mut matches: Vec<(u64, Payment)> = self
            .payments
            .iter()
            .filter(|entry| {
                let payment = &entry.value().1;
                payment.identity == identity
                    && payment.scope.as_deref() == scope
                    && payment.is_completed()
            })
            .map(|entry| entry.value().clone())
            .collect();
        matches.sort_by(|(a_seq, a), (b_seq, b)| {
            a.completed_at.cmp(&b.completed_at).then(a_seq.cmp(b_seq))
        });
        Ok(matches.pop().map(|(_, payment)| payment))
    }
}

#[async_trait]
impl SponsorDirectory for InMemoryEntitlementStore {
    async fn learner_profile(&self, identity: &str) -> StoreResult<Option<LearnerProfile>> {
        Ok(self
            .learners
            .get(identity)
            .map(|entry| entry.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entitlements::models::PlanTier;
    use chrono::{Duration, Utc};

    fn subscription(identity: &str, scope: Option<&str>, payment_ref: &str) -> Subscription {
        let now = Utc::now();
        Subscription {
            id: Uuid::new_v4(),
            identity: identity.to_string(),
            scope: scope.map(str::to_string),
            tier: PlanTier::Basic,
            daily_chat_limit: 3,
            monthly_generation_limit: 3,
            start_date: now,
            expiry_date: now + Duration::days(30),
            active: true,
            source_payment_ref: payment_ref.to_string(),
            resources_saved: 0,
            max_resources_allowed: 1,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn duplicate_payment_ref_is_a_conflict() {
        let store = InMemoryEntitlementStore::new();
        store
            .insert_subscription(&subscription("s1", None, "pay-1"))
            .await
            .unwrap();
        let err = store
            .insert_subscription(&subscription("s1", Some("r1"), "pay-1"))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.subscription_count(), 1);
        // the rejected row must not leave its scope reserved
        store
            .insert_subscription(&subscription("s1", Some("r1"), "pay-2"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unscoped_rows_never_collide() {
        let store = InMemoryEntitlementStore::new();
        store
            .insert_subscription(&subscription("s1", None, "pay-1"))
            .await
            .unwrap();
        store
            .insert_subscription(&subscription("s1", None, "pay-2"))
            .await
            .unwrap();
        assert_eq!(store.active_subscriptions("s1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn promotion_into_taken_scope_is_a_conflict() {
        let store = InMemoryEntitlementStore::new();
        store
            .insert_subscription(&subscription("s1", Some("r1"), "pay-1"))
            .await
            .unwrap();
        let mut loose = subscription("s1", None, "pay-2");
        store.insert_subscription(&loose).await.unwrap();
        loose.scope = Some("r1".to_string());
        let err = store.update_subscription(&loose).await.unwrap_err();
        assert!(err.is_conflict());
        let stored = store.subscription_by_payment_ref("pay-2").await.unwrap().unwrap();
        assert_eq!(stored.scope, None);
    }

    #[tokio::test]
    async fn retired_row_releases_its_scope() {
        let store = InMemoryEntitlementStore::new();
        let mut old = subscription("s1", Some("r1"), "pay-1");
        store.insert_subscription(&old).await.unwrap();
        old.active = false;
        store.update_subscription(&old).await.unwrap();

        store
            .insert_subscription(&subscription("s1", Some("r1"), "pay-2"))
            .await
            .unwrap();
        let holder = store
            .subscription_for_scope("s1", Some("r1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(holder.source_payment_ref, "pay-2");
    }

    #[tokio::test]
    async fn promotion_only_applies_to_unscoped_rows() {
        let store = InMemoryEntitlementStore::new();
        let loose = subscription("s1", None, "pay-1");
        store.insert_subscription(&loose).await.unwrap();

        assert!(store
            .promote_subscription(loose.id, "r1", Utc::now())
            .await
            .unwrap());
        assert!(!store
            .promote_subscription(loose.id, "r2", Utc::now())
            .await
            .unwrap());
        let stored = store.subscription_by_payment_ref("pay-1").await.unwrap().unwrap();
        assert_eq!(stored.scope.as_deref(), Some("r1"));
    }
}

use std::sync::Arc;

use tracing::info;

use super::clock::Clock;
use super::models::Subscription;
use super::store::{EntitlementStore, StoreResult};

/// key: entitlement-resolver -> tiered lookup with lazy expiry
///
/// Precedence: row pinned to the requested scope, then the newest unscoped
/// row, then any other active row. Expired candidates are demoted in place
/// and skipped.
#[derive(Clone)]
pub struct EntitlementResolver {
    store: Arc<dyn EntitlementStore>,
    clock: Arc<dyn Clock>,
}

impl EntitlementResolver {
    pub fn new(store: Arc<dyn EntitlementStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn resolve(
        &self,
        identity: &str,
        scope: Option<&str>,
    ) -> StoreResult<Option<Subscription>> {
        let candidates = self.store.active_subscriptions(identity).await?;

        let mut ordered: Vec<Subscription> = Vec::with_capacity(candidates.len());
        if let Some(scope) = scope {
            ordered.extend(
                candidates
                    .iter()
                    .filter(|sub| sub.scope.as_deref() == Some(scope))
                    .cloned(),
            );
        }
        ordered.extend(candidates.iter().filter(|sub| sub.scope.is_none()).cloned());
        ordered.extend(
            candidates
                .iter()
                .filter(|sub| sub.scope.is_some() && sub.scope.as_deref() != scope)
                .cloned(),
        );

        for candidate in ordered {
            if self.expire_if_stale(&candidate).await? {
                continue;
            }
            return Ok(Some(candidate));
        }

        Ok(None)
    }

    /// Marks the row inactive when it is past expiry. Returns whether it was stale.
    async fn expire_if_stale(&self, subscription: &Subscription) -> StoreResult<bool> {
        let now = self.clock.now();
        if !subscription.is_expired(now) {
            return Ok(false);
        }

        let mut expired = subscription.clone();
        expired.active = false;
        expired.updated_at = now;
        self.store.update_subscription(&expired).await?;
        info!(
            identity = %subscription.identity,
            subscription = %subscription.id,
            expiry = %subscription.expiry_date,
            "subscription expired on access"
        );
        Ok(true)
    }
}

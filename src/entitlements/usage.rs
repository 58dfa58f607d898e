use std::sync::Arc;

use chrono::{Datelike, NaiveDate};

use super::clock::Clock;
use super::models::{DailyChatCounter, MonthlyGenerationCounter, Subscription, UsageRecord};
use super::store::{EntitlementStore, StoreResult};

/// key: usage-ledger -> windowed per-item counters
///
/// Windows roll over lazily: a stored counter from another day (or month) reads
/// as zero and is reset to one on the next write. Every write replaces the
/// whole record.
#[derive(Clone)]
pub struct UsageLedger {
    store: Arc<dyn EntitlementStore>,
    clock: Arc<dyn Clock>,
}

impl UsageLedger {
    pub fn new(store: Arc<dyn EntitlementStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.now().date_naive()
    }

    pub async fn chat_count(&self, subscription: &Subscription, item: &str) -> StoreResult<i64> {
        let today = self.today();
        Ok(self
            .store
            .usage_record(subscription.id)
            .await?
            .map(|record| daily_count(&record, item, today))
            .unwrap_or(0))
    }

    pub async fn generation_count(
        &self,
        subscription: &Subscription,
        item: &str,
    ) -> StoreResult<i64> {
        let today = self.today();
        Ok(self
            .store
            .usage_record(subscription.id)
            .await?
            .map(|record| monthly_count(&record, item, today))
            .unwrap_or(0))
    }

    /// Returns the count after the write.
    pub async fn record_chat(&self, subscription: &Subscription, item: &str) -> StoreResult<i64> {
        let today = self.today();
        let mut record = self.load_or_new(subscription).await?;
        let count = bump_daily(&mut record, item, today);
        self.save(&mut record).await?;
        Ok(count)
    }

    pub async fn record_generation(
        &self,
        subscription: &Subscription,
        item: &str,
    ) -> StoreResult<i64> {
        let today = self.today();
        let mut record = self.load_or_new(subscription).await?;
        let count = bump_monthly(&mut record, item, today);
        self.save(&mut record).await?;
        Ok(count)
    }

    /// Copies the subscription's lifetime save count for display.
    pub async fn mirror_resources_saved(&self, subscription: &Subscription) -> StoreResult<()> {
        let mut record = self.load_or_new(subscription).await?;
        record.resources_saved = subscription.resources_saved;
        self.save(&mut record).await
    }

    pub async fn record(&self, subscription: &Subscription) -> StoreResult<Option<UsageRecord>> {
        self.store.usage_record(subscription.id).await
    }

    /// Only counters belonging to the current windows.
    pub fn current_windows(
        &self,
        record: &UsageRecord,
    ) -> (Vec<DailyChatCounter>, Vec<MonthlyGenerationCounter>) {
        let today = self.today();
        let daily = record
            .daily_chat
            .iter()
            .filter(|counter| counter.date == today)
            .cloned()
            .collect();
        let monthly = record
            .monthly_generation
            .iter()
            .filter(|counter| counter.matches(today))
            .cloned()
            .collect();
        (daily, monthly)
    }

    async fn load_or_new(&self, subscription: &Subscription) -> StoreResult<UsageRecord> {
        Ok(match self.store.usage_record(subscription.id).await? {
            Some(record) => record,
            None => UsageRecord::new(subscription, self.clock.now()),
        })
    }

    async fn save(&self, record: &mut UsageRecord) -> StoreResult<()> {
        record.updated_at = self.clock.now();
        self.store.save_usage_record(record).await
    }
}

pub(crate) fn daily_count(record: &UsageRecord, item: &str, today: NaiveDate) -> i64 {
    record
        .daily_chat
        .iter()
        .find(|counter| counter.item == item && counter.date == today)
        .map(|counter| counter.count)
        .unwrap_or(0)
}

pub(crate) fn monthly_count(record: &UsageRecord, item: &str, today: NaiveDate) -> i64 {
    record
        .monthly_generation
        .iter()
        .find(|counter| counter.item == item && counter.matches(today))
        .map(|counter| counter.count)
        .unwrap_or(0)
}

pub(crate) fn bump_daily(record: &mut UsageRecord, item: &str, today: NaiveDate) -> i64 {
    match record
        .daily_chat
        .iter_mut()
        .find(|counter| counter.item == item)
    {
        Some(counter) if counter.date == today => {
            counter.count += 1;
            counter.count
        }
        Some(counter) => {
            counter.date = today;
            counter.count = 1;
            1
        }
        None => {
            record.daily_chat.push(DailyChatCounter {
                item: item.to_string(),
                date: today,
                count: 1,
            });
            1
        }
    }
}

pub(crate) fn bump_monthly(record: &mut UsageRecord, item: &str, today: NaiveDate) -> i64 {
    match record
        .monthly_generation
        .iter_mut()
        .find(|counter| counter.item == item)
    {
        Some(counter) if counter.matches(today) => {
            counter.count += 1;
            counter.count
        }
        Some(counter) => {
            counter.year = today.year();
            counter.month = today.month();
            counter.count = 1;
            1
        }
        None => {
            record.monthly_generation.push(MonthlyGenerationCounter {
                item: item.to_string(),
                year: today.year(),
                month: today.month(),
                count: 1,
            });
            1
        }
    }
}

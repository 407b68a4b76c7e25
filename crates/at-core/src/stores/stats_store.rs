//! Statistics store: a single running-totals document persisted as
//! `statistics.json`, updated once per completed or failed task.

use std::path::PathBuf;

use at_api_types::{DailyStats, ModelStats, RequestRecord, Statistics};
use chrono::NaiveDate;

use crate::locked_store::{LockedJsonStore, StoreResult};

pub struct StatsStore {
    inner: LockedJsonStore<Statistics>,
}

impl StatsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            inner: LockedJsonStore::new(path),
        }
    }

    pub fn record(&self, record: RequestRecord, today: NaiveDate) -> StoreResult<()> {
        self.inner.with_lock(|stats| stats.record(&record, today))
    }

    pub fn summary(&self) -> StoreResult<Statistics> {
        self.inner.load()
    }

    pub fn daily(&self, date: NaiveDate) -> StoreResult<Option<DailyStats>> {
        let stats = self.inner.load()?;
        Ok(stats.daily.get(&date.format("%Y-%m-%d").to_string()).cloned())
    }

    /// The most recent `limit` day records, newest first.
    pub fn daily_recent(&self, limit: usize) -> StoreResult<Vec<DailyStats>> {
        let stats = self.inner.load()?;
        let mut days: Vec<DailyStats> = stats.daily.values().cloned().collect();
        days.sort_by_key(|d| std::cmp::Reverse(d.date));
        days.truncate(limit);
        Ok(days)
    }

    pub fn daily_range(&self, from: NaiveDate, to: NaiveDate) -> StoreResult<Vec<DailyStats>> {
        let stats = self.inner.load()?;
        let mut days: Vec<DailyStats> = stats
            .daily
            .values()
            .filter(|d| d.date >= from && d.date <= to)
            .cloned()
            .collect();
        days.sort_by_key(|d| d.date);
        Ok(days)
    }

    pub fn top_models(&self, limit: usize) -> StoreResult<Vec<(String, ModelStats)>> {
        let stats = self.inner.load()?;
        Ok(stats.top_models(limit))
    }

    /// Reset all counters to zero, discarding daily history.
    pub fn reset(&self) -> StoreResult<()> {
        self.inner.with_lock(|stats| {
            *stats = Statistics::default();
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_store() -> StatsStore {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("statistics.json");
        std::mem::forget(dir);
        StatsStore::new(path)
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn record_accumulates_totals() {
        let store = tmp_store();
        store
            .record(
                RequestRecord {
                    success: true,
                    model: "claude-sonnet-4".into(),
                    cost_usd: 0.05,
                    input_tokens: 100,
                    output_tokens: 50,
                },
                day(2026, 1, 1),
            )
            .unwrap();
        store
            .record(
                RequestRecord {
                    success: false,
                    model: "claude-sonnet-4".into(),
                    cost_usd: 0.0,
                    input_tokens: 10,
                    output_tokens: 0,
                },
                day(2026, 1, 1),
            )
            .unwrap();

        let summary = store.summary().unwrap();
        assert_eq!(summary.requests.total, 2);
        assert_eq!(summary.requests.successful, 1);
        assert_eq!(summary.requests.failed, 1);
    }

    #[test]
    fn daily_lookup_returns_entry_for_date() {
        let store = tmp_store();
        store
            .record(
                RequestRecord {
                    success: true,
                    model: "m".into(),
                    cost_usd: 1.0,
                    input_tokens: 1,
                    output_tokens: 1,
                },
                day(2026, 3, 15),
            )
            .unwrap();
        let entry = store.daily(day(2026, 3, 15)).unwrap().unwrap();
        assert_eq!(entry.requests.total, 1);
        assert!(store.daily(day(2026, 3, 16)).unwrap().is_none());
    }

    #[test]
    fn daily_recent_sorted_newest_first() {
        let store = tmp_store();
        for d in [day(2026, 1, 1), day(2026, 1, 3), day(2026, 1, 2)] {
            store
                .record(
                    RequestRecord {
                        success: true,
                        model: "m".into(),
                        cost_usd: 0.0,
                        input_tokens: 1,
                        output_tokens: 1,
                    },
                    d,
                )
                .unwrap();
        }

        let recent = store.daily_recent(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].date, day(2026, 1, 3));
        assert_eq!(recent[1].date, day(2026, 1, 2));
    }

    #[test]
    fn top_models_sorted_by_count_desc() {
        let store = tmp_store();
        for _ in 0..3 {
            store
                .record(
                    RequestRecord {
                        success: true,
                        model: "popular".into(),
                        cost_usd: 0.01,
                        input_tokens: 1,
                        output_tokens: 1,
                    },
                    day(2026, 1, 1),
                )
                .unwrap();
        }
        store
            .record(
                RequestRecord {
                    success: true,
                    model: "rare".into(),
                    cost_usd: 0.01,
                    input_tokens: 1,
                    output_tokens: 1,
                },
                day(2026, 1, 1),
            )
            .unwrap();

        let top = store.top_models(10).unwrap();
        assert_eq!(top[0].0, "popular");
    }

    #[test]
    fn reset_clears_all_counters() {
        let store = tmp_store();
        store
            .record(
                RequestRecord {
                    success: true,
                    model: "m".into(),
                    cost_usd: 1.0,
                    input_tokens: 1,
                    output_tokens: 1,
                },
                day(2026, 1, 1),
            )
            .unwrap();
        store.reset().unwrap();
        let summary = store.summary().unwrap();
        assert_eq!(summary.requests.total, 0);
    }
}

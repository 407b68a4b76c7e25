use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Running totals for a single model tag.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelStats {
    #[serde(default)]
    pub count: u64,
    #[serde(default)]
    pub cost_usd: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestCounters {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub successful: u64,
    #[serde(default)]
    pub failed: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenCounters {
    #[serde(default)]
    pub total_input: u64,
    #[serde(default)]
    pub total_output: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostCounters {
    #[serde(default)]
    pub total_usd: f64,
}

/// Per-day aggregate, keyed by `YYYY-MM-DD` (UTC) in the enclosing map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DailyStats {
    pub date: NaiveDate,
    #[serde(default)]
    pub requests: RequestCounters,
    #[serde(default)]
    pub tokens: TokenCounters,
    #[serde(default)]
    pub costs: CostCounters,
    #[serde(default)]
    pub models: HashMap<String, ModelStats>,
}

impl DailyStats {
    pub fn for_date(date: NaiveDate) -> Self {
        Self {
            date,
            ..Default::default()
        }
    }
}

/// Global statistics singleton, persisted as a single JSON document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Statistics {
    #[serde(default)]
    pub requests: RequestCounters,
    #[serde(default)]
    pub tokens: TokenCounters,
    #[serde(default)]
    pub costs: CostCounters,
    #[serde(default)]
    pub models: HashMap<String, ModelStats>,
    #[serde(default)]
    pub daily: HashMap<String, DailyStats>,
}

/// Parameters for a single recorded request, passed by the executor to the
/// statistics store.
#[derive(Debug, Clone)]
pub struct RequestRecord {
    pub success: bool,
    pub model: String,
    pub cost_usd: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Statistics {
    pub const DAILY_RETENTION_DAYS: i64 = 90;

    /// Apply a single request's outcome to the global and today's counters,
    /// then prune day records older than [`Self::DAILY_RETENTION_DAYS`].
    pub fn record(&mut self, record: &RequestRecord, today: NaiveDate) {
        self.requests.total += 1;
        if record.success {
            self.requests.successful += 1;
        } else {
            self.requests.failed += 1;
        }
        self.tokens.total_input += record.input_tokens;
        self.tokens.total_output += record.output_tokens;
        self.costs.total_usd += record.cost_usd;

        let model_entry = self.models.entry(record.model.clone()).or_default();
        model_entry.count += 1;
        model_entry.cost_usd += record.cost_usd;

        let day_key = today.format("%Y-%m-%d").to_string();
        let day = self
            .daily
            .entry(day_key)
            .or_insert_with(|| DailyStats::for_date(today));
        day.requests.total += 1;
        if record.success {
            day.requests.successful += 1;
        } else {
            day.requests.failed += 1;
        }
        day.tokens.total_input += record.input_tokens;
        day.tokens.total_output += record.output_tokens;
        day.costs.total_usd += record.cost_usd;
        let day_model = day.models.entry(record.model.clone()).or_default();
        day_model.count += 1;
        day_model.cost_usd += record.cost_usd;

        self.prune_daily(today);
    }

    fn prune_daily(&mut self, today: NaiveDate) {
        let cutoff = today - chrono::Duration::days(Self::DAILY_RETENTION_DAYS);
        self.daily.retain(|_, d| d.date >= cutoff);
    }

    pub fn top_models(&self, limit: usize) -> Vec<(String, ModelStats)> {
        let mut models: Vec<(String, ModelStats)> = self
            .models
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        models.sort_by(|a, b| b.1.count.cmp(&a.1.count));
        models.truncate(limit);
        models
    }
}

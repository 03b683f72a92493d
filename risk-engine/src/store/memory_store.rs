use std::collections::BTreeMap;
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;

use common::{CorrelationEntry, Period, PriceBar, RiskMetricsRecord, RiskResult};
use super::RiskStore;

/// 内存存储 - 测试和SQLite不可用时的降级后端
#[derive(Default)]
pub struct MemoryStore {
    prices: DashMap<String, BTreeMap<NaiveDate, PriceBar>>,
    metrics: DashMap<(String, Period), Vec<RiskMetricsRecord>>,
    correlations: DashMap<(String, String), CorrelationEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn pair_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

impl RiskStore for MemoryStore {
    fn backend(&self) -> &str {
        "memory"
    }

    fn price_bars(&self, symbol: &str, since: NaiveDate) -> RiskResult<Vec<PriceBar>> {
        Ok(self.prices
            .get(symbol)
            .map(|series| series.range(since..).map(|(_, bar)| bar.clone()).collect())
            .unwrap_or_default())
    }

    fn append_price_bars(&self, symbol: &str, bars: &[PriceBar]) -> RiskResult<usize> {
        let mut series = self.prices.entry(symbol.to_string()).or_default();
        let mut inserted = 0;
        for bar in bars {
            // 已存在的日期不覆盖
            if !series.contains_key(&bar.date) {
                series.insert(bar.date, bar.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    fn insert_metrics(&self, record: &RiskMetricsRecord) -> RiskResult<()> {
        let mut history = self.metrics
            .entry((record.symbol.clone(), record.period))
            .or_default();
        if !history.iter().any(|r| r.computed_at == record.computed_at) {
            history.push(record.clone());
        }
        Ok(())
    }

    fn latest_metrics(
        &self,
        symbol: &str,
        period: Period,
        not_before: DateTime<Utc>,
    ) -> RiskResult<Option<RiskMetricsRecord>> {
        Ok(self.metrics
            .get(&(symbol.to_string(), period))
            .and_then(|history| {
                history
                    .iter()
                    .filter(|r| r.computed_at >= not_before)
                    .max_by_key(|r| r.computed_at)
                    .cloned()
            }))
    }

    fn upsert_correlation(&self, entry: &CorrelationEntry) -> RiskResult<()> {
        self.correlations
            .insert(pair_key(&entry.symbol_a, &entry.symbol_b), entry.clone());
        Ok(())
    }

    fn correlation(&self, a: &str, b: &str) -> RiskResult<Option<CorrelationEntry>> {
        Ok(self.correlations.get(&pair_key(a, b)).map(|e| e.value().clone()))
    }
}

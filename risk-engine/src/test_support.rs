//! 测试辅助：K线构造和可控的行情源

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;

use common::{CorrelationEntry, Period, PriceBar, RiskError, RiskLevel, RiskMetricsRecord, RiskResult};
use crate::market_data::QuoteSource;
use crate::store::RiskStore;

pub const BENCHMARK: &str = "^BENCH";

pub fn bar(symbol: &str, day: u32, close: i64) -> PriceBar {
    let close = Decimal::from(close);
    PriceBar {
        symbol: symbol.to_string(),
        date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
        open: close,
        high: close,
        low: close,
        close,
        volume: 1_000,
    }
}

/// 连续自然日K线，最后一根落在 `end`
pub fn bars_ending(symbol: &str, closes: &[f64], end: NaiveDate) -> Vec<PriceBar> {
    let n = closes.len() as i64;
    closes
        .iter()
        .enumerate()
        .map(|(i, &c)| {
            let close = Decimal::from_f64(c).unwrap();
            PriceBar {
                symbol: symbol.to_string(),
                date: end - chrono::Duration::days(n - 1 - i as i64),
                open: close,
                high: close,
                low: close,
                close,
                volume: 1_000,
            }
        })
        .collect()
}

pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

pub fn record(symbol: &str, computed_at: DateTime<Utc>) -> RiskMetricsRecord {
    RiskMetricsRecord {
        symbol: symbol.to_string(),
        period: Period::OneMonth,
        computed_at,
        volatility: 0.21,
        var_95: -0.025,
        var_99: -0.031,
        cvar_95: -0.028,
        cvar_99: -0.031,
        max_drawdown: -0.08,
        sharpe_ratio: 0.12,
        beta: Some(1.1),
        risk_score: 3,
        risk_level: RiskLevel::Medium,
        data_points: 20,
        mean_return: 0.001,
        std_return: 0.013,
        current_price: Decimal::from(105),
        price_high: Decimal::from(110),
        price_low: Decimal::from(95),
        price_position: Some(2.0 / 3.0),
        upside_potential: 0.0476,
        downside_risk: 0.0952,
        start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        end_date: NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
    }
}

/// 可控行情源：预置序列、可注入失败和延迟、统计调用次数
#[derive(Default)]
pub struct StubQuoteSource {
    series: Mutex<HashMap<String, Vec<PriceBar>>>,
    fail: AtomicBool,
    delay: Mutex<Option<Duration>>,
    calls: AtomicUsize,
}

impl StubQuoteSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_series(self, symbol: &str, bars: Vec<PriceBar>) -> Self {
        self.set_series(symbol, bars);
        self
    }

    pub fn set_series(&self, symbol: &str, bars: Vec<PriceBar>) {
        self.series.lock().insert(symbol.to_string(), bars);
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn serve(&self, symbol: &str) -> anyhow::Result<Vec<PriceBar>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("upstream unavailable");
        }
        Ok(self.series.lock().get(symbol).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl QuoteSource for StubQuoteSource {
    fn name(&self) -> &str {
        "stub"
    }

    fn benchmark_symbol(&self) -> &str {
        BENCHMARK
    }

    async fn fetch_history(&self, symbol: &str, _period_days: u32) -> anyhow::Result<Vec<PriceBar>> {
        self.serve(symbol).await
    }

    async fn fetch_benchmark_history(&self, _period_days: u32) -> anyhow::Result<Vec<PriceBar>> {
        self.serve(BENCHMARK).await
    }
}

/// 所有读写都失败的存储，模拟数据库不可用
#[derive(Default)]
pub struct UnavailableStore {
    writes: AtomicUsize,
}

impl UnavailableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 尝试写入的次数
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn down<T>(&self) -> RiskResult<T> {
        Err(RiskError::StoreUnavailable("database is locked".to_string()))
    }

    fn write<T>(&self) -> RiskResult<T> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.down()
    }
}

impl RiskStore for UnavailableStore {
    fn backend(&self) -> &str {
        "unavailable"
    }

    fn price_bars(&self, _symbol: &str, _since: NaiveDate) -> RiskResult<Vec<PriceBar>> {
        self.down()
    }

    fn append_price_bars(&self, _symbol: &str, _bars: &[PriceBar]) -> RiskResult<usize> {
        self.write()
    }

    fn insert_metrics(&self, _record: &RiskMetricsRecord) -> RiskResult<()> {
        self.write()
    }

    fn latest_metrics(
        &self,
        _symbol: &str,
        _period: Period,
        _not_before: DateTime<Utc>,
    ) -> RiskResult<Option<RiskMetricsRecord>> {
        self.down()
    }

    fn upsert_correlation(&self, _entry: &CorrelationEntry) -> RiskResult<()> {
        self.write()
    }

    fn correlation(&self, _a: &str, _b: &str) -> RiskResult<Option<CorrelationEntry>> {
        self.down()
    }
}

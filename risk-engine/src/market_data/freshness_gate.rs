use std::sync::Arc;
use std::time::Duration;
use chrono::{NaiveDate, Utc};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use common::{Period, PriceBar};
use common::config::FreshnessConfig;
use crate::store::PriceSeriesStore;
use super::QuoteSource;

/// 数据新鲜度闸门
///
/// 存储中最新K线距今不超过 `max_age_days` 时直接使用存储数据，
/// 否则向上游拉取并回写；上游失败、超时或返回空时退回到已存储的数据。
/// 永远不向上抛错，拿不到任何数据时返回空序列。
pub struct FreshnessGate {
    store: PriceSeriesStore,
    quotes: Arc<dyn QuoteSource>,
    max_age_days: i64,
    fetch_timeout: Duration,
}

enum Upstream<'a> {
    Symbol(&'a str),
    Benchmark,
}

impl FreshnessGate {
    pub fn new(store: PriceSeriesStore, quotes: Arc<dyn QuoteSource>, config: &FreshnessConfig) -> Self {
        Self {
            store,
            quotes,
            max_age_days: config.max_age_days,
            fetch_timeout: Duration::from_millis(config.fetch_timeout_ms),
        }
    }

    pub fn benchmark_symbol(&self) -> &str {
        self.quotes.benchmark_symbol()
    }

    /// 获取品种的价格序列
    pub async fn resolve(&self, symbol: &str, period: Period) -> Vec<PriceBar> {
        self.resolve_with(symbol, period, Upstream::Symbol(symbol)).await
    }

    /// 获取基准指数的价格序列（按基准代码落库）
    pub async fn resolve_benchmark(&self, period: Period) -> Vec<PriceBar> {
        let symbol = self.quotes.benchmark_symbol().to_string();
        self.resolve_with(&symbol, period, Upstream::Benchmark).await
    }

    async fn resolve_with(&self, symbol: &str, period: Period, upstream: Upstream<'_>) -> Vec<PriceBar> {
        let today = Utc::now().date_naive();

        let stored = match self.store.get(symbol, period, today).await {
            Ok(bars) => bars,
            Err(e) => {
                warn!("Price store read failed for {} ({}), continuing without stored bars", symbol, e);
                Vec::new()
            }
        };

        if self.is_fresh(&stored, today) {
            debug!("Using stored bars for {} {}", symbol, period);
            return stored;
        }

        info!("Fetching fresh data for {} {} from {}", symbol, period, self.quotes.name());
        let fetch = async {
            match upstream {
                Upstream::Symbol(s) => self.quotes.fetch_history(s, period.days()).await,
                Upstream::Benchmark => self.quotes.fetch_benchmark_history(period.days()).await,
            }
        };

        match timeout(self.fetch_timeout, fetch).await {
            Ok(Ok(bars)) if !bars.is_empty() => {
                let bars: Vec<PriceBar> = PriceBar::normalize_series(bars)
                    .into_iter()
                    .map(|mut b| {
                        b.symbol = symbol.to_string();
                        b
                    })
                    .collect();
                if let Err(e) = self.store.append(symbol, &bars).await {
                    warn!("Failed to persist bars for {}: {} (degraded mode)", symbol, e);
                }
                bars
            }
            Ok(Ok(_)) => {
                warn!("Upstream returned no bars for {}, falling back to {} stored bars", symbol, stored.len());
                stored
            }
            Ok(Err(e)) => {
                warn!("Upstream fetch failed for {}: {}, falling back to {} stored bars", symbol, e, stored.len());
                stored
            }
            Err(_) => {
                warn!(
                    "Upstream fetch for {} timed out after {:?}, falling back to {} stored bars",
                    symbol, self.fetch_timeout, stored.len()
                );
                stored
            }
        }
    }

    /// 最新K线日期距今是否在阈值内
    fn is_fresh(&self, bars: &[PriceBar], today: NaiveDate) -> bool {
        bars.last()
            .map(|b| (today - b.date).num_days() <= self.max_age_days)
            .unwrap_or(false)
    }
}

use std::collections::HashMap;
use std::sync::Arc;
use chrono::Utc;
use futures::future::join_all;
use tracing::{info, warn};

use common::{
    CorrelationEntry, EngineConfig, Period, PortfolioRiskRecord, PriceBar, RiskAlert, RiskError,
    RiskMetricsRecord, RiskResult,
};
use crate::cache::AnalysisCache;
use crate::market_data::{FreshnessGate, QuoteSource};
use crate::risk_control::{
    correlation, AlertRules, BetaEstimator, PortfolioAggregator, ReturnsCalculator, RiskCalculator, SymbolRisk,
};
use crate::store::{run_blocking, PriceSeriesStore, RiskStore};

/// 风险分析服务 - 对外暴露的全部操作
///
/// 存储句柄由进程入口注入，服务本身不持有全局状态。
pub struct RiskService {
    store: Arc<dyn RiskStore>,
    gate: FreshnessGate,
    cache: AnalysisCache,
    calculator: RiskCalculator,
    beta: BetaEstimator,
    aggregator: PortfolioAggregator,
    alert_rules: AlertRules,
    default_period: Period,
}

impl RiskService {
    pub fn new(store: Arc<dyn RiskStore>, quotes: Arc<dyn QuoteSource>, config: &EngineConfig) -> Self {
        let analysis = &config.analysis;
        info!(
            "Risk service using {} store, {} quotes, benchmark {}",
            store.backend(),
            quotes.name(),
            quotes.benchmark_symbol()
        );

        Self {
            gate: FreshnessGate::new(PriceSeriesStore::new(store.clone()), quotes, &config.freshness),
            cache: AnalysisCache::new(store.clone(), &config.cache),
            calculator: RiskCalculator::from_config(analysis),
            beta: BetaEstimator::new(analysis.min_observations),
            aggregator: PortfolioAggregator::from_config(analysis),
            alert_rules: AlertRules::default(),
            default_period: analysis.default_period,
            store,
        }
    }

    pub fn default_period(&self) -> Period {
        self.default_period
    }

    /// 单品种风险分析（带缓存与请求合并）
    pub async fn analyze_risk(&self, symbol: &str, period: Period) -> RiskResult<RiskMetricsRecord> {
        let symbol = normalize_symbol(symbol)?;
        self.cache
            .get_or_compute(symbol, period, move || async move {
                let bars = self.gate.resolve(symbol, period).await;
                self.compute_record(symbol, period, &bars).await
            })
            .await
    }

    async fn compute_record(&self, symbol: &str, period: Period, bars: &[PriceBar]) -> RiskResult<RiskMetricsRecord> {
        if bars.is_empty() {
            return Err(RiskError::DataUnavailable { symbol: symbol.to_string() });
        }

        let returns = ReturnsCalculator::returns(bars);
        if returns.len() < self.calculator.min_observations() {
            return Err(RiskError::InsufficientData {
                symbol: symbol.to_string(),
                required: self.calculator.min_observations(),
                actual: returns.len(),
            });
        }

        // 基准数据缺失只影响Beta
        let benchmark = ReturnsCalculator::returns(&self.gate.resolve_benchmark(period).await);
        let beta = self.beta.beta(&returns, &benchmark);

        self.calculator.compute(symbol, period, bars, &returns, beta)
    }

    /// 历史价格（经过新鲜度闸门）
    pub async fn get_historical_prices(&self, symbol: &str, period: Period) -> RiskResult<Vec<PriceBar>> {
        let symbol = normalize_symbol(symbol)?;
        let bars = self.gate.resolve(symbol, period).await;
        if bars.is_empty() {
            return Err(RiskError::DataUnavailable { symbol: symbol.to_string() });
        }
        Ok(bars)
    }

    /// 组合风险分析；未给权重时等权
    pub async fn analyze_portfolio_risk(
        &self,
        symbols: &[String],
        weights: Option<Vec<f64>>,
        period: Period,
    ) -> RiskResult<PortfolioRiskRecord> {
        let symbols = symbols
            .iter()
            .map(|s| normalize_symbol(s).map(str::to_string))
            .collect::<RiskResult<Vec<_>>>()?;
        let weights = weights.unwrap_or_else(|| PortfolioAggregator::equal_weights(symbols.len()));
        PortfolioAggregator::validate(&symbols, &weights)?;

        let inputs = join_all(symbols.iter().map(|s| self.resolve_symbol(s, period))).await;
        let portfolio = self.aggregator.aggregate(&symbols, &weights, &inputs)?;

        if !portfolio.correlations.is_empty() {
            self.persist_correlations(portfolio.correlations.clone()).await;
        }

        info!(
            "Portfolio of {} symbols analysed: level={} volatility={:?}",
            symbols.len(),
            portfolio.aggregate_risk_level,
            portfolio.portfolio_volatility
        );
        Ok(portfolio)
    }

    /// 组合成员：价格只解析一次，同时用于单品种分析和协方差
    async fn resolve_symbol(&self, symbol: &str, period: Period) -> SymbolRisk {
        let bars = self.gate.resolve(symbol, period).await;
        let analysed = self
            .cache
            .get_or_compute(symbol, period, || self.compute_record(symbol, period, &bars))
            .await;
        let record = match analysed {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Portfolio member {} not analysable: {}", symbol, e);
                None
            }
        };

        let returns = ReturnsCalculator::returns(&bars);
        SymbolRisk {
            symbol: symbol.to_string(),
            returns: (!returns.is_empty()).then_some(returns),
            record,
        }
    }

    /// 保存 "A_B" -> 相关系数；任意一项无效或写入失败时返回 false
    pub async fn store_correlations(&self, pairs: &HashMap<String, f64>) -> bool {
        let now = Utc::now();
        let mut entries = Vec::with_capacity(pairs.len());
        let mut ok = true;

        for (key, &value) in pairs {
            match correlation::parse_pair_key(key) {
                Some((a, b)) if value.is_finite() => entries.push(CorrelationEntry::new(a, b, value, now)),
                _ => {
                    warn!("Rejecting correlation entry {}={}", key, value);
                    ok = false;
                }
            }
        }

        self.persist_correlations(entries).await && ok
    }

    async fn persist_correlations(&self, entries: Vec<CorrelationEntry>) -> bool {
        let failed = run_blocking(&self.store, move |store| {
            Ok(entries
                .iter()
                .filter_map(|entry| store.upsert_correlation(entry).err().map(|e| (entry.pair_key(), e)))
                .collect::<Vec<_>>())
        })
        .await;

        match failed {
            Ok(failed) => {
                for (pair, e) in &failed {
                    warn!("Failed to store correlation {}: {} (degraded mode)", pair, e);
                }
                failed.is_empty()
            }
            Err(e) => {
                warn!("Failed to store correlations: {} (degraded mode)", e);
                false
            }
        }
    }

    /// 读取已保存的相关系数（顺序无关）
    pub async fn correlation(&self, a: &str, b: &str) -> RiskResult<Option<CorrelationEntry>> {
        let (a, b) = (a.to_string(), b.to_string());
        run_blocking(&self.store, move |store| store.correlation(&a, &b)).await
    }

    /// 风险预警；分析失败的品种跳过
    pub async fn risk_alerts(&self, symbols: &[String], period: Period) -> Vec<RiskAlert> {
        let results = join_all(symbols.iter().map(|s| self.analyze_risk(s, period))).await;

        results
            .into_iter()
            .zip(symbols)
            .flat_map(|(result, symbol)| match result {
                Ok(record) => self.alert_rules.evaluate(&record),
                Err(e) => {
                    warn!("Skipping alerts for {}: {}", symbol, e);
                    Vec::new()
                }
            })
            .collect()
    }
}

fn normalize_symbol(symbol: &str) -> RiskResult<&str> {
    let symbol = symbol.trim();
    if symbol.is_empty() {
        return Err(RiskError::InvalidRequest("symbol must not be empty".to_string()));
    }
    Ok(symbol)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use crate::store::{MemoryStore, SqliteStore};
    use crate::test_support::{bars_ending, today, StubQuoteSource, UnavailableStore, BENCHMARK};

    fn wave(n: usize, amplitude: f64, phase: usize) -> Vec<f64> {
        let mut price = 100.0;
        (0..n)
            .map(|i| {
                let r = if (i + phase) % 3 == 0 { amplitude } else { -amplitude * 0.4 };
                price *= 1.0 + r;
                price
            })
            .collect()
    }

    fn service_with(source: Arc<StubQuoteSource>) -> (RiskService, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let service = RiskService::new(store.clone(), source, &EngineConfig::default());
        (service, store)
    }

    fn source() -> StubQuoteSource {
        StubQuoteSource::new()
            .with_series("TCS", bars_ending("TCS", &wave(25, 0.02, 0), today()))
            .with_series("INFY", bars_ending("INFY", &wave(25, 0.03, 1), today()))
            .with_series(BENCHMARK, bars_ending(BENCHMARK, &wave(25, 0.01, 0), today()))
    }

    #[tokio::test]
    async fn test_analyze_risk_computes_and_caches() {
        let source = Arc::new(source());
        let (service, _) = service_with(source.clone());

        let first = service.analyze_risk("TCS", Period::OneMonth).await.unwrap();
        assert_eq!(first.data_points, 24);
        assert!(first.beta.is_some());
        // 品种 + 基准
        assert_eq!(source.calls(), 2);

        let second = service.analyze_risk("TCS", Period::OneMonth).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_analysis_fetches_once() {
        let source = Arc::new(source());
        source.set_delay(Duration::from_millis(30));
        let (service, _) = service_with(source.clone());

        let results = join_all((0..5).map(|_| service.analyze_risk("INFY", Period::OneMonth))).await;
        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_minimum_scenario_and_short_series() {
        let prices = [100.0, 102.0, 101.0, 105.0, 103.0, 108.0, 106.0, 110.0, 107.0, 112.0, 109.0];
        let source = Arc::new(
            StubQuoteSource::new()
                .with_series("OK", bars_ending("OK", &prices, today()))
                .with_series("SHORT", bars_ending("SHORT", &prices[..9], today())),
        );
        let (service, _) = service_with(source);

        let record = service.analyze_risk("OK", Period::OneMonth).await.unwrap();
        assert_eq!(record.data_points, 10);
        assert!(record.beta.is_none());

        let err = service.analyze_risk("SHORT", Period::OneMonth).await.unwrap_err();
        assert!(matches!(err, RiskError::InsufficientData { actual: 8, .. }));

        let err = service.analyze_risk("MISSING", Period::OneMonth).await.unwrap_err();
        assert!(matches!(err, RiskError::DataUnavailable { .. }));

        assert!(matches!(service.analyze_risk("  ", Period::OneMonth).await, Err(RiskError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_historical_prices() {
        let (service, _) = service_with(Arc::new(source()));
        let bars = service.get_historical_prices("TCS", Period::OneMonth).await.unwrap();
        assert_eq!(bars.len(), 25);
        assert!(bars.windows(2).all(|w| w[0].date < w[1].date));
        assert!(service.get_historical_prices("NONE", Period::OneMonth).await.unwrap_err().is_data_failure());
    }

    #[tokio::test]
    async fn test_portfolio_persists_correlations() {
        let (service, store) = service_with(Arc::new(source()));
        let symbols = vec!["TCS".to_string(), "INFY".to_string()];

        let portfolio = service
            .analyze_portfolio_risk(&symbols, None, Period::OneMonth)
            .await
            .unwrap();
        assert_eq!(portfolio.weights, vec![0.5, 0.5]);
        assert!(portfolio.portfolio_volatility.is_some());
        assert_eq!(portfolio.individual.len(), 2);
        assert_eq!(portfolio.risk_distribution.values().sum::<usize>(), 2);
        assert!(store.correlation("TCS", "INFY").unwrap().is_some());

        let err = service
            .analyze_portfolio_risk(&symbols, Some(vec![1.0]), Period::OneMonth)
            .await
            .unwrap_err();
        assert_eq!(err, RiskError::InvalidWeights { symbols: 2, weights: 1 });
    }

    #[tokio::test]
    async fn test_store_correlations() {
        let (service, _) = service_with(Arc::new(StubQuoteSource::new()));
        let mut pairs = HashMap::new();
        pairs.insert("TCS_INFY".to_string(), 0.82);
        assert!(service.store_correlations(&pairs).await);

        let stored = service.correlation("INFY", "TCS").await.unwrap().unwrap();
        assert_eq!(stored.symbol_a, "INFY");
        assert_eq!(stored.correlation, 0.82);

        pairs.insert("BROKEN".to_string(), 0.1);
        assert!(!service.store_correlations(&pairs).await);
    }

    #[tokio::test]
    async fn test_risk_alerts_skip_failures() {
        let mut volatile = vec![100.0];
        for i in 0..20 {
            let last = volatile[volatile.len() - 1];
            volatile.push(if i % 2 == 0 { last * 0.85 } else { last * 1.10 });
        }
        let source = Arc::new(StubQuoteSource::new().with_series("WILD", bars_ending("WILD", &volatile, today())));
        let (service, _) = service_with(source);

        let symbols = vec!["WILD".to_string(), "MISSING".to_string()];
        let alerts = service.risk_alerts(&symbols, Period::OneMonth).await;
        assert!(!alerts.is_empty());
        assert!(alerts.iter().all(|a| a.symbol == "WILD"));
    }

    #[tokio::test]
    async fn test_records_read_back_from_sqlite_are_identical() {
        let mut source = StubQuoteSource::new().with_series(BENCHMARK, bars_ending(BENCHMARK, &wave(40, 0.0123, 2), today()));
        let symbols: Vec<String> = (0..12).map(|i| format!("S{i}")).collect();
        for (i, symbol) in symbols.iter().enumerate() {
            let amplitude = 0.0071 + i as f64 * 0.00293;
            source = source.with_series(symbol, bars_ending(symbol, &wave(40, amplitude, i), today()));
        }
        let source = Arc::new(source);
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let service = RiskService::new(store, source.clone(), &EngineConfig::default());

        for symbol in &symbols {
            let first = service.analyze_risk(symbol, Period::ThreeMonths).await.unwrap();
            let calls = source.calls();
            let second = service.analyze_risk(symbol, Period::ThreeMonths).await.unwrap();
            assert_eq!(first, second, "{symbol}");
            assert_eq!(source.calls(), calls);
        }
    }

    #[tokio::test]
    async fn test_unavailable_store_degrades_to_uncached_analysis() {
        let source = Arc::new(source());
        let store = Arc::new(UnavailableStore::new());
        let service = RiskService::new(store.clone(), source.clone(), &EngineConfig::default());

        let first = service.analyze_risk("TCS", Period::OneMonth).await.unwrap();
        assert_eq!(first.data_points, 24);
        assert_eq!(source.calls(), 2);

        // 没有缓存也没有已存K线，第二次重新拉取并计算
        let second = service.analyze_risk("TCS", Period::OneMonth).await.unwrap();
        assert!(second.computed_at >= first.computed_at);
        assert_eq!(source.calls(), 4);
        assert!(store.writes() > 0);

        let mut pairs = HashMap::new();
        pairs.insert("TCS_INFY".to_string(), 0.5);
        assert!(!service.store_correlations(&pairs).await);
        assert!(service.correlation("TCS", "INFY").await.is_err());
    }

    #[tokio::test]
    async fn test_portfolio_member_prices_are_fetched_once() {
        // 最新K线已过期，每次解析都会请求上游
        let stale_end = today() - chrono::Duration::days(5);
        let source = Arc::new(
            StubQuoteSource::new()
                .with_series("OLD", bars_ending("OLD", &wave(20, 0.02, 0), stale_end))
                .with_series("OLDER", bars_ending("OLDER", &wave(20, 0.03, 1), stale_end)),
        );
        let (service, _) = service_with(source.clone());
        let symbols = vec!["OLD".to_string(), "OLDER".to_string()];

        let portfolio = service
            .analyze_portfolio_risk(&symbols, None, Period::OneMonth)
            .await
            .unwrap();
        assert_eq!(portfolio.individual.len(), 2);
        assert!(portfolio.portfolio_volatility.is_some());
        // 每个成员：自身一次 + 基准一次
        assert_eq!(source.calls(), 4);
    }

    #[tokio::test]
    async fn test_portfolio_of_short_series_is_insufficient() {
        let prices = [100.0, 101.0, 99.5, 102.0, 100.5, 103.0];
        let source = Arc::new(
            StubQuoteSource::new()
                .with_series("AAA", bars_ending("AAA", &prices, today()))
                .with_series("BBB", bars_ending("BBB", &prices, today())),
        );
        let (service, _) = service_with(source);
        let symbols = vec!["AAA".to_string(), "BBB".to_string()];

        let err = service
            .analyze_portfolio_risk(&symbols, None, Period::OneMonth)
            .await
            .unwrap_err();
        assert!(matches!(err, RiskError::InsufficientData { required: 10, actual: 5, .. }));
    }
}

use std::future::Future;
use std::sync::Arc;
use chrono::{Duration, Utc};
use dashmap::DashMap;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use common::{Period, RiskMetricsRecord, RiskResult};
use common::config::CacheConfig;
use crate::store::{run_blocking, RiskStore};

type Slot = Arc<OnceCell<RiskResult<RiskMetricsRecord>>>;

/// 风险分析缓存
///
/// 以 (symbol, period) 为互斥单位：TTL 内的历史记录直接返回；
/// 否则同一键上的并发请求合并为一次计算，所有等待者拿到同一个结果。
/// 过期记录重算失败时返回错误，不会退回旧记录。
pub struct AnalysisCache {
    store: Arc<dyn RiskStore>,
    ttl: Duration,
    in_flight: DashMap<(String, Period), Slot>,
}

impl AnalysisCache {
    pub fn new(store: Arc<dyn RiskStore>, config: &CacheConfig) -> Self {
        Self::with_ttl(store, Duration::seconds(config.ttl_seconds))
    }

    pub fn with_ttl(store: Arc<dyn RiskStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            in_flight: DashMap::new(),
        }
    }

    /// 读取 TTL 内最新的记录；存储不可用视为未命中
    pub async fn lookup(&self, symbol: &str, period: Period) -> Option<RiskMetricsRecord> {
        let not_before = Utc::now() - self.ttl;
        let owned = symbol.to_string();
        let found = run_blocking(&self.store, move |store| store.latest_metrics(&owned, period, not_before)).await;
        match found {
            Ok(found) => found,
            Err(e) => {
                warn!("Metrics lookup failed for {} {}: {} (degraded mode)", symbol, period, e);
                None
            }
        }
    }

    /// 命中则返回缓存记录，否则执行 `compute` 并写回存储
    pub async fn get_or_compute<F, Fut>(&self, symbol: &str, period: Period, compute: F) -> RiskResult<RiskMetricsRecord>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RiskResult<RiskMetricsRecord>>,
    {
        if let Some(record) = self.lookup(symbol, period).await {
            debug!("Cache hit for {} {} (computed at {})", symbol, period, record.computed_at);
            return Ok(record);
        }

        let key = (symbol.to_string(), period);
        let slot = self
            .in_flight
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let result = slot
            .get_or_init(|| async {
                // 排队期间可能已有其他请求完成写入
                if let Some(record) = self.lookup(symbol, period).await {
                    return Ok(record);
                }
                info!("Computing risk metrics for {} {}", symbol, period);
                let result = compute().await;
                if let Ok(record) = &result {
                    let owned = record.clone();
                    if let Err(e) = run_blocking(&self.store, move |store| store.insert_metrics(&owned)).await {
                        warn!("Failed to persist metrics for {} {}: {} (degraded mode)", symbol, period, e);
                    }
                }
                result
            })
            .await
            .clone();

        // 只移除自己这一轮的槽位
        self.in_flight.remove_if(&key, |_, current| Arc::ptr_eq(current, &slot));
        result
    }

    /// 正在计算中的键数量
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

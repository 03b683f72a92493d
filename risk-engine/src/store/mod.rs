pub mod memory_store;
pub mod sqlite_store;
pub mod price_series;

pub use memory_store::MemoryStore;
pub use sqlite_store::SqliteStore;
pub use price_series::PriceSeriesStore;

use std::sync::Arc;
use chrono::{DateTime, NaiveDate, Utc};
use common::{CorrelationEntry, Period, PriceBar, RiskError, RiskMetricsRecord, RiskResult};

/// 持久化存储接口 - 价格、风险指标历史、相关系数
///
/// 价格K线只追加；(symbol, date) 冲突视为成功的空操作。
pub trait RiskStore: Send + Sync {
    /// 后端名称（日志用）
    fn backend(&self) -> &str;

    /// 按品种读取 `since`（含）之后的K线，日期升序
    fn price_bars(&self, symbol: &str, since: NaiveDate) -> RiskResult<Vec<PriceBar>>;

    /// 追加K线，返回实际新增条数
    fn append_price_bars(&self, symbol: &str, bars: &[PriceBar]) -> RiskResult<usize>;

    /// 写入一条风险指标记录（保留历史，不覆盖）
    fn insert_metrics(&self, record: &RiskMetricsRecord) -> RiskResult<()>;

    /// 读取 computed_at >= not_before 的最新记录
    fn latest_metrics(
        &self,
        symbol: &str,
        period: Period,
        not_before: DateTime<Utc>,
    ) -> RiskResult<Option<RiskMetricsRecord>>;

    /// 品种对相关系数 upsert
    fn upsert_correlation(&self, entry: &CorrelationEntry) -> RiskResult<()>;

    fn correlation(&self, a: &str, b: &str) -> RiskResult<Option<CorrelationEntry>>;
}

/// 在阻塞线程池上执行一次存储操作，避免占用异步工作线程
pub async fn run_blocking<T, F>(store: &Arc<dyn RiskStore>, op: F) -> RiskResult<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn RiskStore) -> RiskResult<T> + Send + 'static,
{
    let store = store.clone();
    tokio::task::spawn_blocking(move || op(store.as_ref()))
        .await
        .map_err(|e| RiskError::StoreUnavailable(format!("store task failed: {e}")))?
}

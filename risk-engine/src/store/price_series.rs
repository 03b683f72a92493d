use std::sync::Arc;
use chrono::NaiveDate;
use tracing::{debug, info};

use common::{Period, PriceBar, RiskResult};
use super::{run_blocking, RiskStore};

/// 价格序列存储 - 只追加的日线K线
#[derive(Clone)]
pub struct PriceSeriesStore {
    store: Arc<dyn RiskStore>,
}

impl PriceSeriesStore {
    pub fn new(store: Arc<dyn RiskStore>) -> Self {
        Self { store }
    }

    /// 读取回看窗口内的K线（日期升序），没有数据时返回空序列
    pub async fn get(&self, symbol: &str, period: Period, today: NaiveDate) -> RiskResult<Vec<PriceBar>> {
        let since = period.window_start(today);
        let owned = symbol.to_string();
        let bars = run_blocking(&self.store, move |store| store.price_bars(&owned, since)).await?;
        debug!("Loaded {} stored bars for {} {} since {}", bars.len(), symbol, period, since);
        Ok(bars)
    }

    /// 追加K线；(symbol, date) 已存在的条目被忽略
    pub async fn append(&self, symbol: &str, bars: &[PriceBar]) -> RiskResult<usize> {
        if bars.is_empty() {
            return Ok(0);
        }
        let (owned, batch) = (symbol.to_string(), bars.to_vec());
        let inserted = run_blocking(&self.store, move |store| store.append_price_bars(&owned, &batch)).await?;
        if inserted > 0 {
            info!("Stored {} new price bars for {} ({})", inserted, symbol, self.store.backend());
        }
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::test_support::bars_ending;

    #[tokio::test]
    async fn test_get_applies_lookback_window() {
        let store = PriceSeriesStore::new(Arc::new(MemoryStore::new()));
        let today = NaiveDate::from_ymd_opt(2024, 6, 30).unwrap();
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        let bars = bars_ending("WIPRO", &closes, today);

        assert_eq!(store.append("WIPRO", &bars).await.unwrap(), 40);
        assert_eq!(store.append("WIPRO", &[]).await.unwrap(), 0);

        // 5d 窗口: today-5 .. today 共6个自然日
        let recent = store.get("WIPRO", Period::FiveDays, today).await.unwrap();
        assert_eq!(recent.len(), 6);
        assert_eq!(recent.last().unwrap().date, today);

        let month = store.get("WIPRO", Period::OneMonth, today).await.unwrap();
        assert_eq!(month.len(), 31);
    }
}

use std::path::{Path, PathBuf};
use std::str::FromStr;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use tracing::debug;

use common::PriceBar;

/// 上游行情源接口
#[async_trait]
pub trait QuoteSource: Send + Sync {
    fn name(&self) -> &str;

    /// 基准指数代码（用于Beta）
    fn benchmark_symbol(&self) -> &str;

    /// 拉取最近 `period_days` 个自然日的日线，日期升序，可能为空
    async fn fetch_history(&self, symbol: &str, period_days: u32) -> Result<Vec<PriceBar>>;

    async fn fetch_benchmark_history(&self, period_days: u32) -> Result<Vec<PriceBar>>;
}

/// CSV 文件行情源
///
/// 每个品种一个文件 `<data_dir>/<SYMBOL>.csv`，表头为
/// `date,open,high,low,close,volume`。
pub struct CsvQuoteSource {
    data_dir: PathBuf,
    benchmark_symbol: String,
}

impl CsvQuoteSource {
    pub fn new(data_dir: impl Into<PathBuf>, benchmark_symbol: impl Into<String>) -> Self {
        Self {
            data_dir: data_dir.into(),
            benchmark_symbol: benchmark_symbol.into(),
        }
    }

    fn file_for(&self, symbol: &str) -> PathBuf {
        self.data_dir.join(format!("{}.csv", symbol))
    }

    async fn load(&self, symbol: &str, period_days: u32) -> Result<Vec<PriceBar>> {
        let path = self.file_for(symbol);
        if !path.exists() {
            debug!("No quote file for {} at {:?}", symbol, path);
            return Ok(Vec::new());
        }
        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read quote file: {:?}", path))?;

        let since = Utc::now().date_naive() - chrono::Duration::days(period_days as i64);
        let bars = parse_csv(symbol, &content, &path)?
            .into_iter()
            .filter(|b| b.date >= since)
            .collect();
        Ok(PriceBar::normalize_series(bars))
    }
}

/// 解析CSV内容（跳过表头和空行）
fn parse_csv(symbol: &str, content: &str, path: &Path) -> Result<Vec<PriceBar>> {
    let mut bars = Vec::new();
    let mut lines = content.lines();

    // 跳过标题行
    lines.next();

    for (idx, line) in lines.enumerate() {
        if line.trim().is_empty() {
            continue;
        }

        let parts: Vec<&str> = line.split(',').map(str::trim).collect();
        if parts.len() < 6 {
            anyhow::bail!("{:?} line {}: expected 6 columns, got {}", path, idx + 2, parts.len());
        }

        let decimal = |s: &str| {
            Decimal::from_str(s).with_context(|| format!("{:?} line {}: invalid price {}", path, idx + 2, s))
        };

        bars.push(PriceBar {
            symbol: symbol.to_string(),
            date: NaiveDate::parse_from_str(parts[0], "%Y-%m-%d")
                .with_context(|| format!("{:?} line {}: invalid date {}", path, idx + 2, parts[0]))?,
            open: decimal(parts[1])?,
            high: decimal(parts[2])?,
            low: decimal(parts[3])?,
            close: decimal(parts[4])?,
            volume: parts[5]
                .parse::<f64>()
                .with_context(|| format!("{:?} line {}: invalid volume {}", path, idx + 2, parts[5]))?
                .max(0.0) as u64,
        });
    }

    Ok(bars)
}

#[async_trait]
impl QuoteSource for CsvQuoteSource {
    fn name(&self) -> &str {
        "csv"
    }

    fn benchmark_symbol(&self) -> &str {
        &self.benchmark_symbol
    }

    async fn fetch_history(&self, symbol: &str, period_days: u32) -> Result<Vec<PriceBar>> {
        self.load(symbol, period_days).await
    }

    async fn fetch_benchmark_history(&self, period_days: u32) -> Result<Vec<PriceBar>> {
        self.load(&self.benchmark_symbol, period_days).await
    }
}

use std::fs;
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use anyhow::{Result, Context};
use tracing::warn;

use crate::types::Period;

/// 风险引擎配置
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    pub store: StoreConfig,
    pub cache: CacheConfig,
    pub freshness: FreshnessConfig,
    pub quote_source: QuoteSourceConfig,
    pub analysis: AnalysisConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite 文件路径，":memory:" 表示内存库
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: "data/risk.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_seconds: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_seconds: 3600 }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FreshnessConfig {
    pub max_age_days: i64,       // 最新K线允许的最大滞后天数
    pub fetch_timeout_ms: u64,   // 上游拉取超时
}

impl Default for FreshnessConfig {
    fn default() -> Self {
        Self {
            max_age_days: 1,
            fetch_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QuoteSourceConfig {
    pub data_dir: PathBuf,
    pub benchmark_symbol: String,
}

impl Default for QuoteSourceConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/quotes"),
            benchmark_symbol: "^NSEI".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub default_period: Period,
    pub risk_free_rate: f64,     // 年化无风险利率
    pub trading_periods: u32,    // 年化交易日数
    pub min_observations: usize, // 最少收益点数
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            default_period: Period::OneMonth,
            risk_free_rate: 0.06,
            trading_periods: 252,
            min_observations: 10,
        }
    }
}

impl EngineConfig {
    /// 从TOML文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read engine config: {:?}", path))?;
        Self::from_toml(&content)
            .with_context(|| format!("Failed to parse engine config: {:?}", path))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }

    /// 文件不存在时使用默认配置，格式错误仍然返回错误
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            warn!("Config file {:?} not found, using defaults", path);
            return Ok(Self::default());
        }
        Self::from_file(path)
    }
}

use serde::{Deserialize, Serialize};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::RiskError;

/// 回看周期
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Period {
    #[serde(rename = "1d")]
    OneDay,
    #[serde(rename = "5d")]
    FiveDays,
    #[serde(rename = "1mo")]
    OneMonth,
    #[serde(rename = "3mo")]
    ThreeMonths,
    #[serde(rename = "6mo")]
    SixMonths,
    #[serde(rename = "1y")]
    OneYear,
    #[serde(rename = "2y")]
    TwoYears,
}

impl Period {
    pub const ALL: [Period; 7] = [
        Period::OneDay,
        Period::FiveDays,
        Period::OneMonth,
        Period::ThreeMonths,
        Period::SixMonths,
        Period::OneYear,
        Period::TwoYears,
    ];

    /// 周期对应的自然日天数
    pub fn days(&self) -> u32 {
        match self {
            Period::OneDay => 1,
            Period::FiveDays => 5,
            Period::OneMonth => 30,
            Period::ThreeMonths => 90,
            Period::SixMonths => 180,
            Period::OneYear => 365,
            Period::TwoYears => 730,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Period::OneDay => "1d",
            Period::FiveDays => "5d",
            Period::OneMonth => "1mo",
            Period::ThreeMonths => "3mo",
            Period::SixMonths => "6mo",
            Period::OneYear => "1y",
            Period::TwoYears => "2y",
        }
    }

    /// 窗口起始日期（含）
    pub fn window_start(&self, today: NaiveDate) -> NaiveDate {
        today - chrono::Duration::days(self.days() as i64)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Period {
    type Err = RiskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Period::ALL
            .iter()
            .find(|p| p.as_str() == s.trim())
            .copied()
            .ok_or_else(|| RiskError::InvalidPeriod(s.to_string()))
    }
}

/// 日线K线
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub symbol: String,
    pub date: NaiveDate,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: u64,
}

impl PriceBar {
    /// 按日期排序并去重，保证同一品种日期严格递增
    pub fn normalize_series(mut bars: Vec<PriceBar>) -> Vec<PriceBar> {
        bars.sort_by_key(|b| b.date);
        bars.dedup_by_key(|b| b.date);
        bars
    }
}

/// 风险等级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskLevel {
    #[serde(rename = "Very Low")]
    VeryLow,
    #[serde(rename = "Low")]
    Low,
    #[serde(rename = "Medium")]
    Medium,
    #[serde(rename = "High")]
    High,
    #[serde(rename = "Very High")]
    VeryHigh,
}

impl RiskLevel {
    /// 0-9 风险评分映射到等级
    pub fn from_score(score: u8) -> Self {
        match score {
            s if s >= 7 => RiskLevel::VeryHigh,
            s if s >= 5 => RiskLevel::High,
            s if s >= 3 => RiskLevel::Medium,
            s if s >= 1 => RiskLevel::Low,
            _ => RiskLevel::VeryLow,
        }
    }

    pub fn is_high(&self) -> bool {
        matches!(self, RiskLevel::High | RiskLevel::VeryHigh)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::VeryLow => "Very Low",
            RiskLevel::Low => "Low",
            RiskLevel::Medium => "Medium",
            RiskLevel::High => "High",
            RiskLevel::VeryHigh => "Very High",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单品种风险指标记录，写入后不可变
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskMetricsRecord {
    pub symbol: String,
    pub period: Period,
    pub computed_at: DateTime<Utc>,

    // 波动与尾部风险
    pub volatility: f64,              // 年化波动率
    pub var_95: f64,                  // 95% VaR（日收益分位数）
    pub var_99: f64,                  // 99% VaR
    pub cvar_95: f64,                 // 95% CVaR
    pub cvar_99: f64,                 // 99% CVaR
    pub max_drawdown: f64,            // 最大回撤（<= 0）
    pub sharpe_ratio: f64,
    pub beta: Option<f64>,            // 无法计算时为空，不等于0

    // 风险分级
    pub risk_score: u8,
    pub risk_level: RiskLevel,

    // 统计信息
    pub data_points: usize,
    pub mean_return: f64,
    pub std_return: f64,

    // 价格区间
    pub current_price: Decimal,
    pub price_high: Decimal,
    pub price_low: Decimal,
    pub price_position: Option<f64>,  // 区间宽度为0时为空
    pub upside_potential: f64,
    pub downside_risk: f64,

    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

/// 相关系数，按无序品种对唯一
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationEntry {
    pub symbol_a: String,
    pub symbol_b: String,
    pub correlation: f64,
    pub computed_at: DateTime<Utc>,
}

impl CorrelationEntry {
    /// 规范化品种对顺序（symbol_a <= symbol_b）
    pub fn new(a: &str, b: &str, correlation: f64, computed_at: DateTime<Utc>) -> Self {
        let (symbol_a, symbol_b) = if a <= b { (a, b) } else { (b, a) };
        Self {
            symbol_a: symbol_a.to_string(),
            symbol_b: symbol_b.to_string(),
            correlation,
            computed_at,
        }
    }

    pub fn pair_key(&self) -> String {
        format!("{}_{}", self.symbol_a, self.symbol_b)
    }
}

/// 组合风险结果，按需计算不落库
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioRiskRecord {
    pub symbols: Vec<String>,
    pub weights: Vec<f64>,
    pub portfolio_volatility: Option<f64>,
    pub weighted_beta: Option<f64>,
    pub weighted_sharpe: f64,
    pub risk_distribution: BTreeMap<RiskLevel, usize>,
    pub aggregate_risk_level: RiskLevel,
    pub individual: Vec<RiskMetricsRecord>,
    pub correlations: Vec<CorrelationEntry>,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertKind {
    HighVolatility,
    LargeDrawdown,
    ExtremeVar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AlertSeverity {
    Medium,
    High,
}

/// 风险预警
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAlert {
    pub symbol: String,
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub message: String,
    pub value: f64,
}

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use tracing::debug;

use common::{Period, PriceBar, RiskError, RiskLevel, RiskMetricsRecord, RiskResult};
use common::config::AnalysisConfig;
use super::returns::ReturnSeries;
use super::stats;

/// 单品种风险指标计算器
///
/// 只接受经过校验的收益序列：点数不足时直接失败，
/// 不会产出数值为0的"成功"结果。
#[derive(Debug, Clone)]
pub struct RiskCalculator {
    trading_periods: u32,     // 年化交易日数
    risk_free_rate: f64,      // 年化无风险利率
    min_observations: usize,  // 最少收益点数
}

/// 尾部风险
#[derive(Debug, Clone, Copy)]
struct TailRisk {
    var_95: f64,
    var_99: f64,
    cvar_95: f64,
    cvar_99: f64,
}

/// 价格区间
#[derive(Debug, Clone, Copy)]
struct PriceRange {
    current: Decimal,
    high: Decimal,
    low: Decimal,
}

impl RiskCalculator {
    pub fn new(trading_periods: u32, risk_free_rate: f64, min_observations: usize) -> Self {
        Self {
            trading_periods,
            risk_free_rate,
            min_observations,
        }
    }

    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self::new(config.trading_periods, config.risk_free_rate, config.min_observations)
    }

    pub fn min_observations(&self) -> usize {
        self.min_observations
    }

    /// 计算全部风险指标
    pub fn compute(
        &self,
        symbol: &str,
        period: Period,
        bars: &[PriceBar],
        returns: &ReturnSeries,
        beta: Option<f64>,
    ) -> RiskResult<RiskMetricsRecord> {
        if bars.is_empty() {
            return Err(RiskError::DataUnavailable { symbol: symbol.to_string() });
        }
        if returns.len() < self.min_observations {
            return Err(RiskError::InsufficientData {
                symbol: symbol.to_string(),
                required: self.min_observations,
                actual: returns.len(),
            });
        }

        let values = returns.values();
        let mean_return = stats::mean(&values);
        let std_return = stats::sample_std(&values);

        // 年化波动率
        let volatility = std_return * (self.trading_periods as f64).sqrt();

        let tail = Self::tail_risk(symbol, &values)?;
        let max_drawdown = Self::max_drawdown(&values);
        let sharpe_ratio = self.sharpe_ratio(&values);
        let risk_score = Self::risk_score(volatility, max_drawdown, tail.var_95);
        let range = Self::price_range(bars);

        debug!(
            "Computed {} {}: vol={:.4} var95={:.4} mdd={:.4} score={}",
            symbol, period, volatility, tail.var_95, max_drawdown, risk_score
        );

        Ok(RiskMetricsRecord {
            symbol: symbol.to_string(),
            period,
            computed_at: Utc::now(),
            volatility,
            var_95: tail.var_95,
            var_99: tail.var_99,
            cvar_95: tail.cvar_95,
            cvar_99: tail.cvar_99,
            max_drawdown,
            sharpe_ratio,
            beta,
            risk_score,
            risk_level: RiskLevel::from_score(risk_score),
            data_points: values.len(),
            mean_return,
            std_return,
            current_price: range.current,
            price_high: range.high,
            price_low: range.low,
            price_position: range.position(),
            upside_potential: range.upside(),
            downside_risk: range.downside(),
            start_date: bars[0].date,
            end_date: bars[bars.len() - 1].date,
        })
    }

    /// 计算VaR与CVaR（日收益口径，不年化）
    fn tail_risk(symbol: &str, values: &[f64]) -> RiskResult<TailRisk> {
        let missing = || RiskError::InsufficientData {
            symbol: symbol.to_string(),
            required: 1,
            actual: 0,
        };
        let var_95 = stats::percentile(values, 5.0).ok_or_else(missing)?;
        let var_99 = stats::percentile(values, 1.0).ok_or_else(missing)?;

        Ok(TailRisk {
            var_95,
            var_99,
            cvar_95: Self::conditional_var(values, var_95),
            cvar_99: Self::conditional_var(values, var_99),
        })
    }

    /// 阈值及以下收益的均值；尾部为空时取阈值本身
    pub fn conditional_var(values: &[f64], threshold: f64) -> f64 {
        let tail: Vec<f64> = values.iter().copied().filter(|&r| r <= threshold).collect();
        if tail.is_empty() {
            threshold
        } else {
            stats::mean(&tail)
        }
    }

    /// 最大回撤：净值从1开始累乘，相对历史最高点的最大跌幅（<= 0）
    pub fn max_drawdown(values: &[f64]) -> f64 {
        let mut nav = 1.0;
        let mut peak = 1.0;
        let mut max_drawdown: f64 = 0.0;

        for r in values {
            nav *= 1.0 + r;
            if nav > peak {
                peak = nav;
            }
            let drawdown = (nav - peak) / peak;
            max_drawdown = max_drawdown.min(drawdown);
        }

        max_drawdown
    }

    /// 夏普比率（日口径超额收益），标准差为0时返回0
    pub fn sharpe_ratio(&self, values: &[f64]) -> f64 {
        let daily_rf = self.risk_free_rate / self.trading_periods as f64;
        let excess: Vec<f64> = values.iter().map(|r| r - daily_rf).collect();
        stats::checked_div(stats::mean(&excess), stats::sample_std(&excess), "sharpe").unwrap_or(0.0)
    }

    /// 0-9 风险评分：波动率、最大回撤、VaR95 三项各 0-3 分
    pub fn risk_score(volatility: f64, max_drawdown: f64, var_95: f64) -> u8 {
        let vol_score = if volatility > 0.40 {
            3
        } else if volatility > 0.25 {
            2
        } else if volatility > 0.15 {
            1
        } else {
            0
        };

        let drawdown_score = if max_drawdown < -0.30 {
            3
        } else if max_drawdown < -0.20 {
            2
        } else if max_drawdown < -0.10 {
            1
        } else {
            0
        };

        let var_score = if var_95 < -0.05 {
            3
        } else if var_95 < -0.03 {
            2
        } else if var_95 < -0.02 {
            1
        } else {
            0
        };

        vol_score + drawdown_score + var_score
    }

    pub fn classify(volatility: f64, max_drawdown: f64, var_95: f64) -> RiskLevel {
        RiskLevel::from_score(Self::risk_score(volatility, max_drawdown, var_95))
    }

    fn price_range(bars: &[PriceBar]) -> PriceRange {
        let current = bars[bars.len() - 1].close;
        let (high, low) = bars.iter().fold((current, current), |(hi, lo), b| {
            (hi.max(b.close), lo.min(b.close))
        });
        PriceRange { current, high, low }
    }
}

impl PriceRange {
    /// (current - low) / (high - low)，区间宽度为0时为空
    fn position(&self) -> Option<f64> {
        let width = (self.high - self.low).to_f64()?;
        let offset = (self.current - self.low).to_f64()?;
        stats::checked_div(offset, width, "price position").ok()
    }

    fn upside(&self) -> f64 {
        self.relative(self.high - self.current)
    }

    fn downside(&self) -> f64 {
        self.relative(self.current - self.low)
    }

    fn relative(&self, delta: Decimal) -> f64 {
        match (delta.to_f64(), self.current.to_f64()) {
            (Some(d), Some(c)) => stats::checked_div(d, c, "relative move").unwrap_or(0.0),
            _ => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use crate::risk_control::ReturnsCalculator;
    use crate::test_support::bars_ending;

    const SCENARIO: [f64; 11] = [100.0, 102.0, 101.0, 105.0, 103.0, 108.0, 106.0, 110.0, 107.0, 112.0, 109.0];

    fn calculator() -> RiskCalculator {
        RiskCalculator::from_config(&AnalysisConfig::default())
    }

    fn end() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 28).unwrap()
    }

    fn run(closes: &[f64]) -> RiskResult<RiskMetricsRecord> {
        let bars = bars_ending("RELIANCE", closes, end());
        let returns = ReturnsCalculator::returns(&bars);
        calculator().compute("RELIANCE", Period::OneMonth, &bars, &returns, None)
    }

    #[test]
    fn test_minimum_scenario_succeeds() {
        let record = run(&SCENARIO).unwrap();
        assert_eq!(record.data_points, 10);
        assert_eq!(record.current_price, dec!(109));
        assert_eq!(record.price_high, dec!(112));
        assert_eq!(record.price_low, dec!(100));
        assert!((record.price_position.unwrap() - 0.75).abs() < 1e-9);
        assert!(record.volatility > 0.0);
        assert!(record.var_95 >= record.var_99);
        assert!(record.cvar_95 <= record.var_95);
        assert!(record.max_drawdown <= 0.0);
        assert_eq!(record.risk_level, RiskLevel::from_score(record.risk_score));
        assert_eq!(record.start_date, end() - chrono::Duration::days(10));
        assert_eq!(record.end_date, end());
        assert!(record.beta.is_none());
    }

    #[test]
    fn test_short_series_is_insufficient() {
        match run(&SCENARIO[..9]) {
            Err(RiskError::InsufficientData { required, actual, .. }) => {
                assert_eq!(required, 10);
                assert_eq!(actual, 8);
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(matches!(run(&SCENARIO[..1]), Err(RiskError::InsufficientData { actual: 0, .. })));
        assert!(matches!(run(&[]), Err(RiskError::DataUnavailable { .. })));
    }

    #[test]
    fn test_drawdown_bounds() {
        let rising: Vec<f64> = (0..15).map(|i| 100.0 + i as f64).collect();
        let record = run(&rising).unwrap();
        assert_eq!(record.max_drawdown, 0.0);

        // 100 -> 120 -> 90：回撤 -25%
        let returns = [0.2, -0.25];
        assert!((RiskCalculator::max_drawdown(&returns) + 0.25).abs() < 1e-12);
        assert_eq!(RiskCalculator::max_drawdown(&[]), 0.0);
    }

    #[test]
    fn test_constant_prices_give_zero_sharpe_and_no_position() {
        let flat = vec![50.0; 12];
        let record = run(&flat).unwrap();
        assert_eq!(record.sharpe_ratio, 0.0);
        assert_eq!(record.volatility, 0.0);
        assert!(record.price_position.is_none());
        assert_eq!(record.upside_potential, 0.0);
        assert_eq!(record.downside_risk, 0.0);
        assert_eq!(record.risk_level, RiskLevel::VeryLow);
    }

    #[test]
    fn test_cvar_falls_back_to_threshold() {
        assert_eq!(RiskCalculator::conditional_var(&[0.01, 0.02], -0.5), -0.5);
        assert!((RiskCalculator::conditional_var(&[-0.04, -0.02, 0.03], -0.02) + 0.03).abs() < 1e-12);
    }

    #[test]
    fn test_risk_score_thresholds() {
        assert_eq!(RiskCalculator::risk_score(0.10, -0.05, -0.01), 0);
        assert_eq!(RiskCalculator::risk_score(0.16, -0.11, -0.021), 3);
        assert_eq!(RiskCalculator::risk_score(0.26, -0.21, -0.031), 6);
        assert_eq!(RiskCalculator::risk_score(0.41, -0.31, -0.051), 9);
        // 阈值本身不计分
        assert_eq!(RiskCalculator::risk_score(0.40, -0.30, -0.05), 6);
        assert_eq!(RiskCalculator::classify(0.41, -0.31, -0.051), RiskLevel::VeryHigh);
        assert_eq!(RiskCalculator::classify(0.26, -0.05, -0.031), RiskLevel::Medium);
    }

    #[test]
    fn test_risk_score_monotonic_in_volatility() {
        for &(dd, var) in &[(0.0, 0.0), (-0.15, -0.025), (-0.35, -0.06)] {
            let mut last = 0;
            for step in 0..100 {
                let score = RiskCalculator::risk_score(step as f64 * 0.01, dd, var);
                assert!(score >= last);
                last = score;
            }
        }
    }
}

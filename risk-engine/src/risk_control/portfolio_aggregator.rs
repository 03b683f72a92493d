use std::collections::BTreeMap;
use chrono::Utc;
use tracing::{debug, warn};

use common::{PortfolioRiskRecord, RiskError, RiskLevel, RiskMetricsRecord, RiskResult};
use common::config::AnalysisConfig;
use super::correlation;
use super::returns::{ReturnSeries, ReturnsCalculator};
use super::stats;

/// 单个品种的已解析输入（收益序列和/或风险记录，均可能缺失）
#[derive(Debug, Clone)]
pub struct SymbolRisk {
    pub symbol: String,
    pub returns: Option<ReturnSeries>,
    pub record: Option<RiskMetricsRecord>,
}

/// 组合风险聚合器
#[derive(Debug, Clone)]
pub struct PortfolioAggregator {
    trading_periods: u32,
    min_observations: usize,
}

impl PortfolioAggregator {
    pub fn new(trading_periods: u32, min_observations: usize) -> Self {
        Self {
            trading_periods,
            min_observations,
        }
    }

    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self::new(config.trading_periods, config.min_observations)
    }

    /// 权重数量必须与品种数量一致
    pub fn validate(symbols: &[String], weights: &[f64]) -> RiskResult<()> {
        if symbols.is_empty() {
            return Err(RiskError::InvalidRequest("symbols must not be empty".to_string()));
        }
        if weights.len() != symbols.len() {
            return Err(RiskError::InvalidWeights {
                symbols: symbols.len(),
                weights: weights.len(),
            });
        }
        if weights.iter().any(|w| !w.is_finite()) {
            return Err(RiskError::InvalidRequest("weights must be finite numbers".to_string()));
        }
        Ok(())
    }

    /// 等权
    pub fn equal_weights(n: usize) -> Vec<f64> {
        if n == 0 {
            return Vec::new();
        }
        vec![1.0 / n as f64; n]
    }

    /// 年化协方差矩阵，任意一对对齐点数不足最小观测数时返回空
    pub fn covariance_matrix(&self, series: &[&ReturnSeries]) -> Option<Vec<Vec<f64>>> {
        let n = series.len();
        let annualize = self.trading_periods as f64;
        let required = self.min_observations.max(2);
        let mut matrix = vec![vec![0.0; n]; n];

        for i in 0..n {
            for j in i..n {
                let (xs, ys) = ReturnsCalculator::align(series[i], series[j]);
                if xs.len() < required {
                    debug!("Pair {}/{} has {} aligned points", series[i].symbol, series[j].symbol, xs.len());
                    return None;
                }
                let cov = stats::sample_covariance(&xs, &ys) * annualize;
                matrix[i][j] = cov;
                matrix[j][i] = cov;
            }
        }

        Some(matrix)
    }

    /// sqrt(wᵀ Σ w)
    pub fn portfolio_volatility(&self, series: &[&ReturnSeries], weights: &[f64]) -> Option<f64> {
        if series.is_empty() || series.len() != weights.len() {
            return None;
        }
        let matrix = self.covariance_matrix(series)?;

        let mut variance: f64 = 0.0;
        for (i, row) in matrix.iter().enumerate() {
            for (j, cov) in row.iter().enumerate() {
                variance += weights[i] * weights[j] * cov;
            }
        }

        // 浮点误差可能产生极小的负方差
        Some(variance.max(0.0).sqrt())
    }

    /// 汇总组合风险
    pub fn aggregate(
        &self,
        symbols: &[String],
        weights: &[f64],
        inputs: &[SymbolRisk],
    ) -> RiskResult<PortfolioRiskRecord> {
        Self::validate(symbols, weights)?;

        // 没有任何成员可单独分析时，组合结论无从谈起
        if inputs.iter().all(|i| i.record.is_none()) {
            let longest = inputs.iter().filter_map(|i| i.returns.as_ref()).map(ReturnSeries::len).max();
            return Err(match longest {
                Some(actual) if actual > 0 => RiskError::InsufficientData {
                    symbol: symbols.join(","),
                    required: self.min_observations,
                    actual,
                },
                _ => RiskError::DataUnavailable { symbol: symbols.join(",") },
            });
        }

        // 计算组合波动率（仅使用观测数足够的品种及其原始权重）
        let mut resolved_series = Vec::new();
        let mut resolved_weights = Vec::new();
        for (input, &w) in inputs.iter().zip(weights) {
            if let Some(series) = input.returns.as_ref().filter(|s| s.len() >= self.min_observations) {
                resolved_series.push(series);
                resolved_weights.push(w);
            }
        }
        let required = symbols.len().min(2);
        let portfolio_volatility = if resolved_series.len() >= required {
            self.portfolio_volatility(&resolved_series, &resolved_weights)
        } else {
            warn!(
                "Only {} of {} symbols have enough returns, portfolio volatility unavailable",
                resolved_series.len(),
                symbols.len()
            );
            None
        };

        // 计算加权Beta和加权Sharpe（缺失的Beta不计入）
        let mut weighted_beta = None;
        let mut weighted_sharpe = 0.0;
        for (input, &w) in inputs.iter().zip(weights) {
            if let Some(record) = &input.record {
                weighted_sharpe += w * record.sharpe_ratio;
                if let Some(beta) = record.beta {
                    *weighted_beta.get_or_insert(0.0) += w * beta;
                }
            }
        }

        let individual: Vec<RiskMetricsRecord> = inputs.iter().filter_map(|i| i.record.clone()).collect();
        let levels: Vec<RiskLevel> = individual.iter().map(|r| r.risk_level).collect();
        let mut risk_distribution = BTreeMap::new();
        for level in &levels {
            *risk_distribution.entry(*level).or_insert(0) += 1;
        }

        let computed_at = Utc::now();
        let correlations = correlation::pairwise(&resolved_series, self.min_observations, computed_at);

        Ok(PortfolioRiskRecord {
            symbols: symbols.to_vec(),
            weights: weights.to_vec(),
            portfolio_volatility,
            weighted_beta,
            weighted_sharpe,
            risk_distribution,
            aggregate_risk_level: Self::aggregate_level(&levels, symbols.len()),
            individual,
            correlations,
            computed_at,
        })
    }

    /// 高风险占比 >30% 为 High；存在高风险或中风险占比 >50% 为 Medium；否则 Low
    pub fn aggregate_level(levels: &[RiskLevel], total: usize) -> RiskLevel {
        if total == 0 {
            return RiskLevel::Low;
        }
        let high = levels.iter().filter(|l| l.is_high()).count() as f64;
        let medium = levels.iter().filter(|l| **l == RiskLevel::Medium).count() as f64;
        let total = total as f64;

        if high / total > 0.3 {
            RiskLevel::High
        } else if high > 0.0 || medium / total > 0.5 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

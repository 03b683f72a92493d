use super::returns::{ReturnSeries, ReturnsCalculator};
use super::stats;

/// Beta 估计：按日期对齐后 cov(instrument, benchmark) / var(benchmark)
#[derive(Debug, Clone)]
pub struct BetaEstimator {
    min_points: usize,
}

impl BetaEstimator {
    pub fn new(min_points: usize) -> Self {
        Self { min_points }
    }

    /// 对齐点数不足或基准方差为0时为空（不等于0）
    pub fn beta(&self, instrument: &ReturnSeries, benchmark: &ReturnSeries) -> Option<f64> {
        let (xs, ys) = ReturnsCalculator::align(instrument, benchmark);
        if xs.len() < self.min_points {
            return None;
        }
        let covariance = stats::sample_covariance(&xs, &ys);
        stats::checked_div(covariance, stats::sample_variance(&ys), "beta").ok()
    }
}

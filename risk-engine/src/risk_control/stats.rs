//! 基础统计函数（样本方差/协方差均为 n-1 口径）

use common::{RiskError, RiskResult};

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

pub fn sample_variance(values: &[f64]) -> f64 {
    sample_covariance(values, values)
}

pub fn sample_std(values: &[f64]) -> f64 {
    sample_variance(values).sqrt()
}

/// 样本协方差，两序列需等长且至少2个点，否则为0
pub fn sample_covariance(xs: &[f64], ys: &[f64]) -> f64 {
    let n = xs.len().min(ys.len());
    if n < 2 {
        return 0.0;
    }
    let (mx, my) = (mean(&xs[..n]), mean(&ys[..n]));
    xs.iter()
        .zip(ys.iter())
        .map(|(x, y)| (x - mx) * (y - my))
        .sum::<f64>()
        / (n as f64 - 1.0)
}

/// 线性插值分位数，`pct` 取值 0-100
pub fn percentile(values: &[f64], pct: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let rank = (pct / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// 分母为0时返回 ComputeDegenerate，由调用方换成约定的哨兵值
pub fn checked_div(numerator: f64, denominator: f64, what: &str) -> RiskResult<f64> {
    if denominator.abs() <= f64::EPSILON || !denominator.is_finite() {
        return Err(RiskError::ComputeDegenerate(format!("{what}: zero denominator")));
    }
    Ok(numerator / denominator)
}

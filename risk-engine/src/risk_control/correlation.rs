use chrono::{DateTime, Utc};
use tracing::debug;

use common::CorrelationEntry;
use super::returns::{ReturnSeries, ReturnsCalculator};
use super::stats;

/// Pearson 相关系数，按日期对齐
pub fn pearson(a: &ReturnSeries, b: &ReturnSeries, min_points: usize) -> Option<f64> {
    let (xs, ys) = ReturnsCalculator::align(a, b);
    if xs.len() < min_points.max(2) {
        return None;
    }
    let denominator = stats::sample_std(&xs) * stats::sample_std(&ys);
    stats::checked_div(stats::sample_covariance(&xs, &ys), denominator, "correlation")
        .ok()
        .map(|c| c.clamp(-1.0, 1.0))
}

/// 两两计算相关系数，无法计算的品种对跳过
pub fn pairwise(series: &[&ReturnSeries], min_points: usize, computed_at: DateTime<Utc>) -> Vec<CorrelationEntry> {
    let mut entries = Vec::new();
    for i in 0..series.len() {
        for j in (i + 1)..series.len() {
            let (a, b) = (series[i], series[j]);
            match pearson(a, b, min_points) {
                Some(c) => entries.push(CorrelationEntry::new(&a.symbol, &b.symbol, c, computed_at)),
                None => debug!("Skipping correlation {}/{}: not computable", a.symbol, b.symbol),
            }
        }
    }
    entries
}

/// 解析 "A_B" 形式的品种对，按第一个 '_' 切分
pub fn parse_pair_key(key: &str) -> Option<(&str, &str)> {
    let (a, b) = key.split_once('_')?;
    if a.is_empty() || b.is_empty() {
        return None;
    }
    Some((a, b))
}

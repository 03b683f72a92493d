use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;

use common::PriceBar;

/// 单日简单收益
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReturnPoint {
    pub date: NaiveDate,
    pub value: f64,
}

/// 收益序列，按日期升序；不落库，按需重新生成
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReturnSeries {
    pub symbol: String,
    pub points: Vec<ReturnPoint>,
}

impl ReturnSeries {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn values(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.value).collect()
    }
}

/// 收益率计算器
pub struct ReturnsCalculator;

impl ReturnsCalculator {
    /// returns[i] = (close[i] - close[i-1]) / close[i-1]，前收盘为0的点被剔除
    pub fn returns(bars: &[PriceBar]) -> ReturnSeries {
        let symbol = bars.first().map(|b| b.symbol.clone()).unwrap_or_default();
        let points = bars
            .windows(2)
            .filter_map(|w| {
                if w[0].close.is_zero() {
                    return None;
                }
                let prev = w[0].close.to_f64()?;
                let cur = w[1].close.to_f64()?;
                Some(ReturnPoint {
                    date: w[1].date,
                    value: (cur - prev) / prev,
                })
            })
            .collect();

        ReturnSeries { symbol, points }
    }

    /// 按日期取交集对齐两条收益序列
    pub fn align(a: &ReturnSeries, b: &ReturnSeries) -> (Vec<f64>, Vec<f64>) {
        let mut xs = Vec::new();
        let mut ys = Vec::new();
        let (mut i, mut j) = (0, 0);

        while i < a.points.len() && j < b.points.len() {
            let (pa, pb) = (&a.points[i], &b.points[j]);
            if pa.date == pb.date {
                xs.push(pa.value);
                ys.push(pb.value);
                i += 1;
                j += 1;
            } else if pa.date < pb.date {
                i += 1;
            } else {
                j += 1;
            }
        }

        (xs, ys)
    }
}

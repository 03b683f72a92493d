use thiserror::Error;

/// 风险分析错误分类
///
/// `Clone` 以便同一次合并计算的结果可以分发给所有等待的调用方。
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RiskError {
    /// 存储和上游都拿不到价格序列
    #[error("no price data available for {symbol}")]
    DataUnavailable { symbol: String },

    /// 有数据但收益点不足
    #[error("insufficient data for {symbol}: need {required} return observations, got {actual}")]
    InsufficientData {
        symbol: String,
        required: usize,
        actual: usize,
    },

    #[error("weights count {weights} does not match symbols count {symbols}")]
    InvalidWeights { symbols: usize, weights: usize },

    /// 分母为0，仅用于内部判断，不会作为失败返回给调用方
    #[error("degenerate computation: {0}")]
    ComputeDegenerate(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("invalid period: {0}")]
    InvalidPeriod(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl RiskError {
    /// 数据类失败（调用方可区分“没有数据”与参数错误）
    pub fn is_data_failure(&self) -> bool {
        matches!(self, RiskError::DataUnavailable { .. } | RiskError::InsufficientData { .. })
    }
}

pub type RiskResult<T> = Result<T, RiskError>;

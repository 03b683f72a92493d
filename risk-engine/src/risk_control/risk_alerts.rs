use common::{AlertKind, AlertSeverity, RiskAlert, RiskMetricsRecord};

/// 风险预警规则
#[derive(Debug, Clone)]
pub struct AlertRules {
    pub max_volatility: f64,   // 年化波动率上限
    pub max_drawdown: f64,     // 回撤下限（负数）
    pub min_var_95: f64,       // VaR95 下限（负数）
}

impl Default for AlertRules {
    fn default() -> Self {
        Self {
            max_volatility: 0.40,
            max_drawdown: -0.25,
            min_var_95: -0.05,
        }
    }
}

impl AlertRules {
    /// 对单个风险记录逐条检查
    pub fn evaluate(&self, record: &RiskMetricsRecord) -> Vec<RiskAlert> {
        let mut alerts = Vec::new();

        if record.volatility > self.max_volatility {
            alerts.push(RiskAlert {
                symbol: record.symbol.clone(),
                kind: AlertKind::HighVolatility,
                severity: AlertSeverity::High,
                message: format!("{} showing high volatility: {:.2}%", record.symbol, record.volatility * 100.0),
                value: record.volatility,
            });
        }

        if record.max_drawdown < self.max_drawdown {
            alerts.push(RiskAlert {
                symbol: record.symbol.clone(),
                kind: AlertKind::LargeDrawdown,
                severity: AlertSeverity::High,
                message: format!("{} has large drawdown: {:.2}%", record.symbol, record.max_drawdown * 100.0),
                value: record.max_drawdown,
            });
        }

        if record.var_95 < self.min_var_95 {
            alerts.push(RiskAlert {
                symbol: record.symbol.clone(),
                kind: AlertKind::ExtremeVar,
                severity: AlertSeverity::Medium,
                message: format!("{} has extreme VaR: {:.2}%", record.symbol, record.var_95 * 100.0),
                value: record.var_95,
            });
        }

        alerts
    }
}

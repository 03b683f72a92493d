use std::collections::HashMap;
use std::sync::Arc;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error};

use common::{Period, RiskError};
use super::RiskService;

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;
pub const DATA_ERROR: i64 = -32001;

/// JSON-RPC 请求
#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

/// JSON-RPC 响应
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

/// 支持的操作（封闭集合）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    AnalyzeRisk,
    GetHistoricalPrices,
    AnalyzePortfolioRisk,
    StoreCorrelation,
    RiskAlerts,
}

impl Operation {
    pub const ALL: [Operation; 5] = [
        Operation::AnalyzeRisk,
        Operation::GetHistoricalPrices,
        Operation::AnalyzePortfolioRisk,
        Operation::StoreCorrelation,
        Operation::RiskAlerts,
    ];

    pub fn method(&self) -> &'static str {
        match self {
            Operation::AnalyzeRisk => "analyze_risk",
            Operation::GetHistoricalPrices => "get_historical_prices",
            Operation::AnalyzePortfolioRisk => "analyze_portfolio_risk",
            Operation::StoreCorrelation => "store_correlation",
            Operation::RiskAlerts => "risk_alerts",
        }
    }

    pub fn from_method(method: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| op.method() == method)
    }
}

/// 操作处理器
#[async_trait]
pub trait OperationHandler: Send + Sync {
    async fn handle(&self, service: &RiskService, params: Value) -> Result<Value>;
}

#[derive(Deserialize)]
struct SymbolParams {
    symbol: String,
    #[serde(default)]
    period: Option<String>,
}

#[derive(Deserialize)]
struct PortfolioParams {
    symbols: Vec<String>,
    #[serde(default)]
    weights: Option<Vec<f64>>,
    #[serde(default)]
    period: Option<String>,
}

#[derive(Deserialize)]
struct CorrelationParams {
    #[serde(default)]
    symbols: Vec<String>,
    correlations: HashMap<String, f64>,
}

#[derive(Deserialize)]
struct AlertParams {
    symbols: Vec<String>,
    #[serde(default)]
    period: Option<String>,
}

struct AnalyzeRiskHandler;
struct HistoricalPricesHandler;
struct PortfolioRiskHandler;
struct StoreCorrelationHandler;
struct RiskAlertsHandler;

#[async_trait]
impl OperationHandler for AnalyzeRiskHandler {
    async fn handle(&self, service: &RiskService, params: Value) -> Result<Value> {
        let p: SymbolParams = parse_params(params)?;
        let period = period_or_default(service, p.period.as_deref())?;
        let record = service.analyze_risk(&p.symbol, period).await?;
        Ok(serde_json::to_value(record)?)
    }
}

#[async_trait]
impl OperationHandler for HistoricalPricesHandler {
    async fn handle(&self, service: &RiskService, params: Value) -> Result<Value> {
        let p: SymbolParams = parse_params(params)?;
        let period = period_or_default(service, p.period.as_deref())?;
        let bars = service.get_historical_prices(&p.symbol, period).await?;
        Ok(serde_json::to_value(bars)?)
    }
}

#[async_trait]
impl OperationHandler for PortfolioRiskHandler {
    async fn handle(&self, service: &RiskService, params: Value) -> Result<Value> {
        let p: PortfolioParams = parse_params(params)?;
        let period = period_or_default(service, p.period.as_deref())?;
        let portfolio = service.analyze_portfolio_risk(&p.symbols, p.weights, period).await?;
        Ok(serde_json::to_value(portfolio)?)
    }
}

#[async_trait]
impl OperationHandler for StoreCorrelationHandler {
    async fn handle(&self, service: &RiskService, params: Value) -> Result<Value> {
        let p: CorrelationParams = parse_params(params)?;
        debug!("Storing {} correlations for {:?}", p.correlations.len(), p.symbols);
        let success = service.store_correlations(&p.correlations).await;
        Ok(json!({ "success": success }))
    }
}

#[async_trait]
impl OperationHandler for RiskAlertsHandler {
    async fn handle(&self, service: &RiskService, params: Value) -> Result<Value> {
        let p: AlertParams = parse_params(params)?;
        let period = period_or_default(service, p.period.as_deref())?;
        let alerts = service.risk_alerts(&p.symbols, period).await;
        Ok(serde_json::to_value(alerts)?)
    }
}

fn parse_params<T: DeserializeOwned>(params: Value) -> Result<T, RiskError> {
    let params = if params.is_null() { json!({}) } else { params };
    serde_json::from_value(params).map_err(|e| RiskError::InvalidRequest(e.to_string()))
}

fn period_or_default(service: &RiskService, period: Option<&str>) -> Result<Period, RiskError> {
    match period {
        Some(code) => code.parse(),
        None => Ok(service.default_period()),
    }
}

/// 错误到 JSON-RPC 错误码的映射
pub fn error_code(err: &RiskError) -> i64 {
    match err {
        RiskError::InvalidPeriod(_) | RiskError::InvalidRequest(_) | RiskError::InvalidWeights { .. } => {
            INVALID_PARAMS
        }
        e if e.is_data_failure() => DATA_ERROR,
        _ => INTERNAL_ERROR,
    }
}

/// 请求分发器：操作 -> 处理器 查找表
pub struct Dispatcher {
    service: Arc<RiskService>,
    handlers: HashMap<Operation, Box<dyn OperationHandler>>,
}

impl Dispatcher {
    pub fn new(service: Arc<RiskService>) -> Result<Self> {
        let mut handlers: HashMap<Operation, Box<dyn OperationHandler>> = HashMap::new();

        handlers.insert(Operation::AnalyzeRisk, Box::new(AnalyzeRiskHandler));
        handlers.insert(Operation::GetHistoricalPrices, Box::new(HistoricalPricesHandler));
        handlers.insert(Operation::AnalyzePortfolioRisk, Box::new(PortfolioRiskHandler));
        handlers.insert(Operation::StoreCorrelation, Box::new(StoreCorrelationHandler));
        handlers.insert(Operation::RiskAlerts, Box::new(RiskAlertsHandler));

        // 启动时校验每个操作都有处理器
        if let Some(missing) = Operation::ALL.iter().find(|op| !handlers.contains_key(*op)) {
            return Err(anyhow!("No handler registered for {}", missing.method()));
        }

        Ok(Self { service, handlers })
    }

    pub fn methods(&self) -> Vec<&'static str> {
        Operation::ALL.iter().map(|op| op.method()).collect()
    }

    /// 处理一行输入，空行返回 None
    pub async fn handle_line(&self, line: &str) -> Option<RpcResponse> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let value: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => return Some(RpcResponse::failure(Value::Null, PARSE_ERROR, format!("Parse error: {}", e))),
        };

        let id = value.get("id").cloned().unwrap_or(Value::Null);
        match serde_json::from_value::<RpcRequest>(value) {
            Ok(request) => Some(self.dispatch(request).await),
            Err(e) => Some(RpcResponse::failure(id, INVALID_REQUEST, format!("Invalid request: {}", e))),
        }
    }

    pub async fn dispatch(&self, request: RpcRequest) -> RpcResponse {
        let RpcRequest { id, method, params, .. } = request;

        let handler = match Operation::from_method(&method).and_then(|op| self.handlers.get(&op)) {
            Some(handler) => handler,
            None => return RpcResponse::failure(id, METHOD_NOT_FOUND, format!("Method not found: {}", method)),
        };

        match handler.handle(&self.service, params).await {
            Ok(result) => RpcResponse::success(id, result),
            Err(e) => {
                let code = e.downcast_ref::<RiskError>().map(error_code).unwrap_or(INTERNAL_ERROR);
                error!("{} failed ({}): {}", method, code, e);
                RpcResponse::failure(id, code, e.to_string())
            }
        }
    }
}

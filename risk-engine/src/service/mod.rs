pub mod risk_service;
pub mod dispatcher;

pub use risk_service::RiskService;
pub use dispatcher::{Dispatcher, Operation, OperationHandler, RpcRequest, RpcResponse};

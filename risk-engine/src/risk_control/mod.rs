pub mod stats;
pub mod returns;
pub mod risk_calculator;
pub mod beta_estimator;
pub mod correlation;
pub mod portfolio_aggregator;
pub mod risk_alerts;

pub use returns::{ReturnPoint, ReturnSeries, ReturnsCalculator};
pub use risk_calculator::RiskCalculator;
pub use beta_estimator::BetaEstimator;
pub use portfolio_aggregator::{PortfolioAggregator, SymbolRisk};
pub use risk_alerts::AlertRules;

pub mod store;
pub mod market_data;
pub mod risk_control;
pub mod cache;
pub mod service;

#[cfg(test)]
mod test_support;

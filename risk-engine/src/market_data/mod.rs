pub mod quote_source;
pub mod freshness_gate;

pub use quote_source::{QuoteSource, CsvQuoteSource};
pub use freshness_gate::FreshnessGate;

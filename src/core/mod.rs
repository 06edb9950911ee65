//! Core business logic abstractions

pub mod audit;
pub mod config;
pub mod log;
pub mod rates;

// Re-export main types for cleaner imports
pub use audit::AuditSink;
pub use rates::{
    BatchResult, CurrencyCode, DateKey, DayOutcome, DayResult, FetchError, RateDocument,
    RateError, RateProvider, RateQuote, RawRate,
};

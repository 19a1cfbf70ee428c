use thiserror::Error;

/// The error kinds from the service's error-handling contract. `InvalidConfig` and
/// `UnknownEnumValue` are raised while building a [`crate::config::BacktestConfig`],
/// before any simulation day runs; the rest can only occur mid-run and are always
/// fatal for the job that raised them.
#[derive(Debug, Error)]
pub enum BacktestError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("unknown enum value: {0}")]
    UnknownEnumValue(String),

    #[error("missing base price for {ticker} on {date} needed to settle an order")]
    MissingPriceForSettlement { ticker: String, date: String },

    #[error("prepared data is empty for the requested ticker/date filter")]
    EmptyPreparedData,

    #[error("trade amount must be positive, got {0}")]
    NonPositiveTradeAmount(f64),
}

pub type Result<T> = std::result::Result<T, BacktestError>;

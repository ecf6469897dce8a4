mod concentration;
mod correlation;
mod data_freshness;
mod drawdown;
mod market_hours;
mod var;
mod volatility_confidence;

pub use concentration::{ConcentrationValidator, LeverageValidator};
pub use correlation::CorrelationValidator;
pub use data_freshness::DataFreshnessValidator;
pub use drawdown::DrawdownValidator;
pub use market_hours::MarketHoursValidator;
pub use var::VarValidator;
pub use volatility_confidence::VolatilityConfidenceValidator;

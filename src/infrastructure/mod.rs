pub mod breaker;
pub mod mock;
pub mod observability;
pub mod rate_limiter;
pub mod store;

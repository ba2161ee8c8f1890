pub mod invalidate;
pub mod rate_limit;
pub mod store;
pub mod tags;

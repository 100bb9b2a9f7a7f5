pub mod client;
pub mod market;

// Re-export the gateway surface (e.g. `use crate::provider::ProviderClient`).
pub use client::{FetchError, ProviderClient};
pub use market::{OverviewMetrics, TradeActivity};

//! Provider adapters.

pub mod cafef;
pub mod fireant;
mod traits;

pub use cafef::CafefProvider;
pub use fireant::FireAntProvider;
pub use traits::MarketDataProvider;

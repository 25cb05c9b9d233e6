//! SQLite persistence for collected market data.

pub mod model;
pub mod repository;

pub use model::{DailyPriceDB, DividendDB, FinancialReportDB, SymbolDB};
pub use repository::SqliteMarketDataSink;

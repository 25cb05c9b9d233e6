//! Storage traits consumed by the collector.

use async_trait::async_trait;

use crate::collector::model::{RateWindowSample, UpdateRun};
use crate::errors::Result;
use quotewatch_market_data::{DividendEvent, FinancialReport, ListingEntry, PricePoint};

/// Append-only run log. A row is inserted at batch start and finalized
/// exactly once; finalized rows are never rewritten.
#[async_trait]
pub trait RunLogStore: Send + Sync {
    async fn insert(&self, run: &UpdateRun) -> Result<()>;

    /// Write the terminal status, counts and duration for an open run.
    async fn finalize(&self, run: &UpdateRun) -> Result<()>;

    fn get_recent(&self, limit: usize) -> Result<Vec<UpdateRun>>;
}

/// Append-only rate/breaker observability samples.
#[async_trait]
pub trait RateSampleStore: Send + Sync {
    async fn append(&self, sample: &RateWindowSample) -> Result<()>;
}

/// The storage sink the collector writes fetched facts into.
///
/// Single-writer discipline: all writes during one batch are serialized by
/// the storage layer, so concurrent workers never race on an upsert key.
#[async_trait]
pub trait MarketDataSink: Send + Sync {
    /// Upsert daily bars keyed by (symbol, date).
    async fn upsert_prices(&self, points: &[PricePoint]) -> Result<()>;

    /// Upsert dividend events keyed by (symbol, ex_date).
    async fn upsert_dividends(&self, events: &[DividendEvent]) -> Result<()>;

    /// Upsert fundamental reports keyed by (symbol, period).
    async fn upsert_financials(&self, reports: &[FinancialReport]) -> Result<()>;

    /// Upsert the exchange listing keyed by symbol.
    async fn upsert_symbols(&self, listings: &[ListingEntry]) -> Result<()>;
}

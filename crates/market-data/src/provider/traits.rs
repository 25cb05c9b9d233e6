//! Provider adapter trait.

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::errors::{MarketDataError, Result};
use crate::models::{DividendEvent, FinancialReport, ListingEntry, PricePoint, ProviderId};

/// A single upstream market data source.
///
/// Implementations must be stateless with respect to orchestration: rate
/// limiting and circuit breaking are applied by the caller, never inside
/// the adapter.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Stable identifier, used as the circuit breaker key.
    fn id(&self) -> &'static str;

    /// Selection order in the provider chain; lower runs first.
    fn priority(&self) -> u8 {
        10
    }

    /// Daily price history for a symbol, inclusive of both endpoints.
    async fn fetch_price(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PricePoint>>;

    /// Dividend events for a symbol.
    async fn fetch_dividends(&self, symbol: &str) -> Result<Vec<DividendEvent>> {
        let _ = symbol;
        Err(MarketDataError::NotSupported {
            provider: self.provider_id(),
        })
    }

    /// Fundamental reports for a symbol.
    async fn fetch_financials(&self, symbol: &str) -> Result<Vec<FinancialReport>> {
        let _ = symbol;
        Err(MarketDataError::NotSupported {
            provider: self.provider_id(),
        })
    }

    /// Full exchange listing.
    async fn fetch_listing(&self) -> Result<Vec<ListingEntry>> {
        Err(MarketDataError::NotSupported {
            provider: self.provider_id(),
        })
    }

    /// `id()` as an owned [`ProviderId`].
    fn provider_id(&self) -> ProviderId {
        std::borrow::Cow::Borrowed(self.id())
    }
}

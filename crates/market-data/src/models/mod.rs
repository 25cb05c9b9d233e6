//! Domain models shared by provider adapters.

use std::borrow::Cow;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Provider identifier (e.g. "FIREANT", "CAFEF").
pub type ProviderId = Cow<'static, str>;

/// One daily OHLCV bar for a symbol.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricePoint {
    pub symbol: String,
    pub date: NaiveDate,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: u64,
}

/// A dividend or share-issue event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DividendEvent {
    pub symbol: String,
    pub ex_date: NaiveDate,
    /// Cash amount per share, zero for pure stock dividends.
    pub cash_amount: Decimal,
    /// Stock-dividend ratio, zero for pure cash dividends.
    pub ratio: Decimal,
}

/// One reporting period of fundamental data.
///
/// Providers disagree wildly on shape, so the body is kept as normalized
/// JSON and consumers key on (symbol, period).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinancialReport {
    pub symbol: String,
    /// Reporting period, e.g. "2025-Q2" or "2024" for annual reports.
    pub period: String,
    pub payload: serde_json::Value,
}

/// A listed symbol as reported by the exchange listing feed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingEntry {
    pub symbol: String,
    pub name: String,
    pub exchange: String,
    pub is_active: bool,
}

//! FireAnt provider implementation (primary source).
//!
//! Fetches Vietnamese equity data from the FireAnt REST API.
//!
//! # API Endpoints
//!
//! - Historical quotes: `https://restv2.fireant.vn/symbols/{symbol}/historical-quotes?startDate={start}&endDate={end}`
//! - Dividends: `https://restv2.fireant.vn/symbols/{symbol}/dividends`
//! - Financial reports: `https://restv2.fireant.vn/symbols/{symbol}/financial-reports`
//! - Listing: `https://restv2.fireant.vn/symbols`

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::debug;

use crate::errors::{MarketDataError, Result};
use crate::models::{DividendEvent, FinancialReport, ListingEntry, PricePoint};
use crate::provider::MarketDataProvider;

const BASE_URL: &str = "https://restv2.fireant.vn";
const PROVIDER_ID: &str = "FIREANT";

/// Default HTTP request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoricalQuote {
    /// ISO date-time, e.g. "2025-08-20T00:00:00".
    date: String,
    price_open: Option<f64>,
    price_high: Option<f64>,
    price_low: Option<f64>,
    price_close: Option<f64>,
    total_volume: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DividendRow {
    ex_date: String,
    cash_dividend: Option<f64>,
    stock_dividend_ratio: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FinancialRow {
    year: i32,
    quarter: Option<u8>,
    #[serde(flatten)]
    values: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolRow {
    symbol: String,
    #[serde(default)]
    company_name: Option<String>,
    #[serde(default)]
    exchange: Option<String>,
}

/// FireAnt provider for Vietnamese equities.
pub struct FireAntProvider {
    client: Client,
}

impl FireAntProvider {
    pub fn new() -> Self {
        Self::with_timeout(REQUEST_TIMEOUT)
    }

    /// Create a provider with a custom per-request timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("quotewatch/0.4")
            .build()
            .unwrap_or_else(|_| Client::new());

        Self { client }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        debug!(url, "fireant request");
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                MarketDataError::Timeout {
                    provider: PROVIDER_ID.into(),
                }
            } else {
                MarketDataError::ProviderError {
                    provider: PROVIDER_ID.into(),
                    message: e.to_string(),
                }
            }
        })?;

        match response.status() {
            reqwest::StatusCode::TOO_MANY_REQUESTS => {
                return Err(MarketDataError::RateLimited {
                    provider: PROVIDER_ID.into(),
                })
            }
            reqwest::StatusCode::NOT_FOUND => {
                return Err(MarketDataError::SymbolNotFound(url.to_string()))
            }
            status if !status.is_success() => {
                return Err(MarketDataError::ProviderError {
                    provider: PROVIDER_ID.into(),
                    message: format!("HTTP error: {}", status),
                })
            }
            _ => {}
        }

        response
            .json::<T>()
            .await
            .map_err(|e| MarketDataError::InvalidPayload {
                provider: PROVIDER_ID.into(),
                message: e.to_string(),
            })
    }

    fn decimal(value: Option<f64>) -> Decimal {
        value.and_then(Decimal::from_f64).unwrap_or_default()
    }

    fn parse_date(raw: &str) -> Result<NaiveDate> {
        let date_part = raw.split('T').next().unwrap_or(raw);
        NaiveDate::parse_from_str(date_part, "%Y-%m-%d").map_err(|e| {
            MarketDataError::InvalidPayload {
                provider: PROVIDER_ID.into(),
                message: format!("bad date '{}': {}", raw, e),
            }
        })
    }
}

impl Default for FireAntProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketDataProvider for FireAntProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn priority(&self) -> u8 {
        1
    }

    async fn fetch_price(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PricePoint>> {
        let url = format!(
            "{}/symbols/{}/historical-quotes?startDate={}&endDate={}&offset=0&limit=500",
            BASE_URL, symbol, start, end
        );
        let rows: Vec<HistoricalQuote> = self.get_json(&url).await?;

        if rows.is_empty() {
            return Err(MarketDataError::NoData {
                provider: PROVIDER_ID.into(),
                symbol: symbol.to_string(),
            });
        }

        let mut points = Vec::with_capacity(rows.len());
        for row in rows {
            points.push(PricePoint {
                symbol: symbol.to_string(),
                date: Self::parse_date(&row.date)?,
                open: Self::decimal(row.price_open),
                high: Self::decimal(row.price_high),
                low: Self::decimal(row.price_low),
                close: Self::decimal(row.price_close),
                volume: row.total_volume.unwrap_or(0),
            });
        }
        Ok(points)
    }

    async fn fetch_dividends(&self, symbol: &str) -> Result<Vec<DividendEvent>> {
        let url = format!("{}/symbols/{}/dividends", BASE_URL, symbol);
        let rows: Vec<DividendRow> = self.get_json(&url).await?;

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            events.push(DividendEvent {
                symbol: symbol.to_string(),
                ex_date: Self::parse_date(&row.ex_date)?,
                cash_amount: Self::decimal(row.cash_dividend),
                ratio: Self::decimal(row.stock_dividend_ratio),
            });
        }
        Ok(events)
    }

    async fn fetch_financials(&self, symbol: &str) -> Result<Vec<FinancialReport>> {
        let url = format!("{}/symbols/{}/financial-reports", BASE_URL, symbol);
        let rows: Vec<FinancialRow> = self.get_json(&url).await?;

        if rows.is_empty() {
            return Err(MarketDataError::NoData {
                provider: PROVIDER_ID.into(),
                symbol: symbol.to_string(),
            });
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                let period = match row.quarter {
                    Some(q) if q > 0 => format!("{}-Q{}", row.year, q),
                    _ => row.year.to_string(),
                };
                FinancialReport {
                    symbol: symbol.to_string(),
                    period,
                    payload: serde_json::Value::Object(row.values),
                }
            })
            .collect())
    }

    async fn fetch_listing(&self) -> Result<Vec<ListingEntry>> {
        let url = format!("{}/symbols", BASE_URL);
        let rows: Vec<SymbolRow> = self.get_json(&url).await?;

        Ok(rows
            .into_iter()
            .map(|row| ListingEntry {
                name: row.company_name.unwrap_or_default(),
                exchange: row.exchange.unwrap_or_else(|| "HOSE".to_string()),
                is_active: true,
                symbol: row.symbol,
            })
            .collect())
    }
}

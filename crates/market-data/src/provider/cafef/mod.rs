//! CafeF provider implementation (fallback source).
//!
//! Scrapes the CafeF AJAX endpoints used by its public price-history pages.
//! Dates come back as `dd/MM/yyyy` and prices in thousands of VND.
//!
//! # API Endpoints
//!
//! - Price history: `https://s.cafef.vn/Ajax/PageNew/DataHistory/PriceHistory.ashx?Symbol={symbol}&StartDate={start}&EndDate={end}&PageIndex=1&PageSize=500`
//! - Dividends: `https://s.cafef.vn/Ajax/PageNew/DataHistory/LichSuTraCoTuc.ashx?Symbol={symbol}`

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::debug;

use crate::errors::{MarketDataError, Result};
use crate::models::{DividendEvent, PricePoint};
use crate::provider::MarketDataProvider;

const BASE_URL: &str = "https://s.cafef.vn/Ajax/PageNew/DataHistory";
const PROVIDER_ID: &str = "CAFEF";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(rename = "Data")]
    data: Option<Inner<T>>,
}

#[derive(Debug, Deserialize)]
struct Inner<T> {
    #[serde(rename = "Data")]
    data: Option<Vec<T>>,
}

#[derive(Debug, Deserialize)]
struct PriceRow {
    #[serde(rename = "Ngay")]
    date: String,
    #[serde(rename = "GiaMoCua")]
    open: Option<f64>,
    #[serde(rename = "GiaCaoNhat")]
    high: Option<f64>,
    #[serde(rename = "GiaThapNhat")]
    low: Option<f64>,
    #[serde(rename = "GiaDongCua")]
    close: Option<f64>,
    #[serde(rename = "KhoiLuongKhopLenh")]
    volume: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct DividendRow {
    #[serde(rename = "NgayGDKHQ")]
    ex_date: String,
    #[serde(rename = "CoTucTienMat")]
    cash: Option<f64>,
    #[serde(rename = "TyLeCoPhieu")]
    ratio: Option<f64>,
}

/// CafeF fallback provider.
///
/// Covers prices and dividends only; financials and listing fall through
/// to [`MarketDataError::NotSupported`] so the chain moves on.
pub struct CafefProvider {
    client: Client,
}

impl CafefProvider {
    pub fn new() -> Self {
        Self::with_timeout(REQUEST_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("quotewatch/0.4")
            .build()
            .unwrap_or_else(|_| Client::new());

        Self { client }
    }

    async fn get_rows<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<Vec<T>> {
        debug!(url, "cafef request");
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

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(MarketDataError::RateLimited {
                provider: PROVIDER_ID.into(),
            });
        }
        if !response.status().is_success() {
            return Err(MarketDataError::ProviderError {
                provider: PROVIDER_ID.into(),
                message: format!("HTTP error: {}", response.status()),
            });
        }

        let envelope: Envelope<T> =
            response
                .json()
                .await
                .map_err(|e| MarketDataError::InvalidPayload {
                    provider: PROVIDER_ID.into(),
                    message: e.to_string(),
                })?;

        Ok(envelope.data.and_then(|inner| inner.data).unwrap_or_default())
    }

    fn decimal(value: Option<f64>) -> Decimal {
        value.and_then(Decimal::from_f64).unwrap_or_default()
    }

    fn parse_date(raw: &str) -> Result<NaiveDate> {
        NaiveDate::parse_from_str(raw, "%d/%m/%Y").map_err(|e| MarketDataError::InvalidPayload {
            provider: PROVIDER_ID.into(),
            message: format!("bad date '{}': {}", raw, e),
        })
    }
}

impl Default for CafefProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketDataProvider for CafefProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn priority(&self) -> u8 {
        2
    }

    async fn fetch_price(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PricePoint>> {
        let url = format!(
            "{}/PriceHistory.ashx?Symbol={}&StartDate={}&EndDate={}&PageIndex=1&PageSize=500",
            BASE_URL,
            symbol,
            start.format("%d/%m/%Y"),
            end.format("%d/%m/%Y")
        );
        let rows: Vec<PriceRow> = self.get_rows(&url).await?;

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
                open: Self::decimal(row.open),
                high: Self::decimal(row.high),
                low: Self::decimal(row.low),
                close: Self::decimal(row.close),
                volume: row.volume.unwrap_or(0.0) as u64,
            });
        }
        Ok(points)
    }

    async fn fetch_dividends(&self, symbol: &str) -> Result<Vec<DividendEvent>> {
        let url = format!("{}/LichSuTraCoTuc.ashx?Symbol={}", BASE_URL, symbol);
        let rows: Vec<DividendRow> = self.get_rows(&url).await?;

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            events.push(DividendEvent {
                symbol: symbol.to_string(),
                ex_date: Self::parse_date(&row.ex_date)?,
                cash_amount: Self::decimal(row.cash),
                ratio: Self::decimal(row.ratio),
            });
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_vietnamese_date() {
        let date = CafefProvider::parse_date("25/08/2025").unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2025, 8, 25).unwrap());
    }

    #[test]
    fn test_envelope_unwraps_missing_data() {
        let raw = r#"{"Data": null}"#;
        let envelope: Envelope<PriceRow> = serde_json::from_str(raw).unwrap();
        assert!(envelope.data.and_then(|i| i.data).is_none());
    }
}

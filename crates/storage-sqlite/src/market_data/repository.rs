//! SQLite sink for collected market data.
//!
//! All writes go through the single-writer actor, so concurrent batch
//! workers never race on an upsert key.

use async_trait::async_trait;
use diesel::prelude::*;

use quotewatch_core::collector::store::MarketDataSink;
use quotewatch_core::errors::Result;
use quotewatch_market_data::{DividendEvent, FinancialReport, ListingEntry, PricePoint};

use crate::db::WriteHandle;
use crate::errors::StorageError;
use crate::schema::{daily_prices, dividends, financial_reports, symbols};
use crate::utils::SQLITE_MAX_PARAMS_CHUNK;

use super::model::{DailyPriceDB, DividendDB, FinancialReportDB, SymbolDB};

pub struct SqliteMarketDataSink {
    writer: WriteHandle,
}

impl SqliteMarketDataSink {
    pub fn new(writer: WriteHandle) -> Self {
        Self { writer }
    }
}

#[async_trait]
impl MarketDataSink for SqliteMarketDataSink {
    async fn upsert_prices(&self, points: &[PricePoint]) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        let rows: Vec<DailyPriceDB> = points.iter().map(DailyPriceDB::from).collect();

        self.writer
            .exec(move |conn| {
                for chunk in rows.chunks(SQLITE_MAX_PARAMS_CHUNK) {
                    diesel::replace_into(daily_prices::table)
                        .values(chunk)
                        .execute(conn)
                        .map_err(StorageError::from)?;
                }
                Ok(())
            })
            .await
    }

    async fn upsert_dividends(&self, events: &[DividendEvent]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        let rows: Vec<DividendDB> = events.iter().map(DividendDB::from).collect();

        self.writer
            .exec(move |conn| {
                for chunk in rows.chunks(SQLITE_MAX_PARAMS_CHUNK) {
                    diesel::replace_into(dividends::table)
                        .values(chunk)
                        .execute(conn)
                        .map_err(StorageError::from)?;
                }
                Ok(())
            })
            .await
    }

    async fn upsert_financials(&self, reports: &[FinancialReport]) -> Result<()> {
        if reports.is_empty() {
            return Ok(());
        }
        let rows: Vec<FinancialReportDB> = reports.iter().map(FinancialReportDB::from).collect();

        self.writer
            .exec(move |conn| {
                for chunk in rows.chunks(SQLITE_MAX_PARAMS_CHUNK) {
                    diesel::replace_into(financial_reports::table)
                        .values(chunk)
                        .execute(conn)
                        .map_err(StorageError::from)?;
                }
                Ok(())
            })
            .await
    }

    async fn upsert_symbols(&self, listings: &[ListingEntry]) -> Result<()> {
        if listings.is_empty() {
            return Ok(());
        }
        let rows: Vec<SymbolDB> = listings.iter().map(SymbolDB::from).collect();

        self.writer
            .exec(move |conn| {
                for chunk in rows.chunks(SQLITE_MAX_PARAMS_CHUNK) {
                    diesel::replace_into(symbols::table)
                        .values(chunk)
                        .execute(conn)
                        .map_err(StorageError::from)?;
                }
                Ok(())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::get_connection;
    use crate::test_support::setup;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn price(symbol: &str, date: &str, close: &str, volume: u64) -> PricePoint {
        PricePoint {
            symbol: symbol.to_string(),
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            open: Decimal::from_str(close).unwrap(),
            high: Decimal::from_str(close).unwrap(),
            low: Decimal::from_str(close).unwrap(),
            close: Decimal::from_str(close).unwrap(),
            volume,
        }
    }

    #[tokio::test]
    async fn test_upsert_prices_is_idempotent_on_key() {
        let (_dir, pool, writer) = setup();
        let sink = SqliteMarketDataSink::new(writer);

        sink.upsert_prices(&[price("VNM", "2025-08-20", "61.5", 1_200_000)])
            .await
            .unwrap();
        // Same key with a corrected close replaces the row in place.
        sink.upsert_prices(&[price("VNM", "2025-08-20", "61.8", 1_250_000)])
            .await
            .unwrap();

        let mut conn = get_connection(&pool).unwrap();
        let rows: Vec<DailyPriceDB> = daily_prices::table.load(&mut conn).unwrap();
        assert_eq!(rows.len(), 1);

        let point = PricePoint::from(rows.into_iter().next().unwrap());
        assert_eq!(point.close, Decimal::from_str("61.8").unwrap());
        assert_eq!(point.volume, 1_250_000);
    }

    #[tokio::test]
    async fn test_upsert_dividends_and_financials() {
        let (_dir, pool, writer) = setup();
        let sink = SqliteMarketDataSink::new(writer);

        sink.upsert_dividends(&[DividendEvent {
            symbol: "FPT".to_string(),
            ex_date: NaiveDate::from_ymd_opt(2025, 6, 12).unwrap(),
            cash_amount: Decimal::from_str("1000").unwrap(),
            ratio: Decimal::ZERO,
        }])
        .await
        .unwrap();

        sink.upsert_financials(&[FinancialReport {
            symbol: "FPT".to_string(),
            period: "2025-Q2".to_string(),
            payload: serde_json::json!({"revenue": 15_000}),
        }])
        .await
        .unwrap();

        let mut conn = get_connection(&pool).unwrap();
        let divs: Vec<DividendDB> = dividends::table.load(&mut conn).unwrap();
        assert_eq!(divs.len(), 1);
        assert_eq!(divs[0].cash_amount, "1000");

        let reports: Vec<FinancialReportDB> = financial_reports::table.load(&mut conn).unwrap();
        assert_eq!(reports.len(), 1);
        let report = FinancialReport::from(reports.into_iter().next().unwrap());
        assert_eq!(report.payload["revenue"], 15_000);
    }

    #[tokio::test]
    async fn test_upsert_symbols_replaces_listing_rows() {
        let (_dir, pool, writer) = setup();
        let sink = SqliteMarketDataSink::new(writer);

        let listing = |active: bool| ListingEntry {
            symbol: "HPG".to_string(),
            name: "Hoa Phat Group".to_string(),
            exchange: "HOSE".to_string(),
            is_active: active,
        };

        sink.upsert_symbols(&[listing(true)]).await.unwrap();
        sink.upsert_symbols(&[listing(false)]).await.unwrap();

        let mut conn = get_connection(&pool).unwrap();
        let rows: Vec<SymbolDB> = symbols::table.load(&mut conn).unwrap();
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].is_active);
    }

    #[tokio::test]
    async fn test_empty_slices_are_no_ops() {
        let (_dir, pool, writer) = setup();
        let sink = SqliteMarketDataSink::new(writer);

        sink.upsert_prices(&[]).await.unwrap();
        sink.upsert_symbols(&[]).await.unwrap();

        let mut conn = get_connection(&pool).unwrap();
        let prices: Vec<DailyPriceDB> = daily_prices::table.load(&mut conn).unwrap();
        assert!(prices.is_empty());
    }
}

//! Database models for collected market data.
//!
//! Decimals are stored as TEXT to keep exact values; dates as ISO-8601
//! strings.

use chrono::NaiveDate;
use diesel::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use quotewatch_market_data::{DividendEvent, FinancialReport, ListingEntry, PricePoint};

/// Database model for daily OHLCV bars.
#[derive(
    Queryable,
    Identifiable,
    Insertable,
    AsChangeset,
    Selectable,
    PartialEq,
    Serialize,
    Deserialize,
    Debug,
    Clone,
)]
#[diesel(table_name = crate::schema::daily_prices)]
#[diesel(primary_key(symbol, date))]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct DailyPriceDB {
    pub symbol: String,
    pub date: String,
    pub open: String,
    pub high: String,
    pub low: String,
    pub close: String,
    pub volume: i64,
}

fn parse_date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap_or_default()
}

fn parse_decimal(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap_or_default()
}

impl From<&PricePoint> for DailyPriceDB {
    fn from(p: &PricePoint) -> Self {
        Self {
            symbol: p.symbol.clone(),
            date: p.date.format("%Y-%m-%d").to_string(),
            open: p.open.to_string(),
            high: p.high.to_string(),
            low: p.low.to_string(),
            close: p.close.to_string(),
            volume: p.volume as i64,
        }
    }
}

impl From<DailyPriceDB> for PricePoint {
    fn from(db: DailyPriceDB) -> Self {
        Self {
            symbol: db.symbol,
            date: parse_date(&db.date),
            open: parse_decimal(&db.open),
            high: parse_decimal(&db.high),
            low: parse_decimal(&db.low),
            close: parse_decimal(&db.close),
            volume: db.volume.max(0) as u64,
        }
    }
}

/// Database model for dividend events.
#[derive(
    Queryable,
    Identifiable,
    Insertable,
    AsChangeset,
    Selectable,
    PartialEq,
    Serialize,
    Deserialize,
    Debug,
    Clone,
)]
#[diesel(table_name = crate::schema::dividends)]
#[diesel(primary_key(symbol, ex_date))]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct DividendDB {
    pub symbol: String,
    pub ex_date: String,
    pub cash_amount: String,
    pub ratio: String,
}

impl From<&DividendEvent> for DividendDB {
    fn from(d: &DividendEvent) -> Self {
        Self {
            symbol: d.symbol.clone(),
            ex_date: d.ex_date.format("%Y-%m-%d").to_string(),
            cash_amount: d.cash_amount.to_string(),
            ratio: d.ratio.to_string(),
        }
    }
}

impl From<DividendDB> for DividendEvent {
    fn from(db: DividendDB) -> Self {
        Self {
            symbol: db.symbol,
            ex_date: parse_date(&db.ex_date),
            cash_amount: parse_decimal(&db.cash_amount),
            ratio: parse_decimal(&db.ratio),
        }
    }
}

/// Database model for fundamental reports; the payload is kept as the
/// provider's JSON.
#[derive(
    Queryable,
    Identifiable,
    Insertable,
    AsChangeset,
    Selectable,
    PartialEq,
    Serialize,
    Deserialize,
    Debug,
    Clone,
)]
#[diesel(table_name = crate::schema::financial_reports)]
#[diesel(primary_key(symbol, period))]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct FinancialReportDB {
    pub symbol: String,
    pub period: String,
    pub payload: String,
}

impl From<&FinancialReport> for FinancialReportDB {
    fn from(r: &FinancialReport) -> Self {
        Self {
            symbol: r.symbol.clone(),
            period: r.period.clone(),
            payload: r.payload.to_string(),
        }
    }
}

impl From<FinancialReportDB> for FinancialReport {
    fn from(db: FinancialReportDB) -> Self {
        Self {
            symbol: db.symbol,
            period: db.period,
            payload: serde_json::from_str(&db.payload).unwrap_or(serde_json::Value::Null),
        }
    }
}

/// Database model for exchange listing rows.
#[derive(
    Queryable,
    Identifiable,
    Insertable,
    AsChangeset,
    Selectable,
    PartialEq,
    Serialize,
    Deserialize,
    Debug,
    Clone,
)]
#[diesel(table_name = crate::schema::symbols)]
#[diesel(primary_key(symbol))]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SymbolDB {
    pub symbol: String,
    pub name: String,
    pub exchange: String,
    pub is_active: bool,
}

impl From<&ListingEntry> for SymbolDB {
    fn from(l: &ListingEntry) -> Self {
        Self {
            symbol: l.symbol.clone(),
            name: l.name.clone(),
            exchange: l.exchange.clone(),
            is_active: l.is_active,
        }
    }
}

impl From<SymbolDB> for ListingEntry {
    fn from(db: SymbolDB) -> Self {
        Self {
            symbol: db.symbol,
            name: db.name,
            exchange: db.exchange,
            is_active: db.is_active,
        }
    }
}

use std::fmt;
use std::io::Read;

use chrono::NaiveDate;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum DataError {
    #[error("time series is empty")]
    Empty,

    #[error("time series length mismatch: {dates} dates vs {values} values")]
    LengthMismatch { dates: usize, values: usize },

    #[error("invalid date {value:?} for asset {asset}")]
    InvalidDate { asset: String, value: String },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

macro_rules! label_type {
    (@ints $name:ident, $($int:ty),*) => {
        $(
            impl From<$int> for $name {
                fn from(value: $int) -> Self {
                    Self(value.to_string())
                }
            }
        )*
    };
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&String> for $name {
            fn from(value: &String) -> Self {
                Self(value.clone())
            }
        }

        label_type!(@ints $name, i8, i16, i32, i64, u8, u16, u32, u64, usize, isize);
    };
}

label_type!(
    /// Time bucket label (e.g. `"1d"`, `"1wk"`). Integers are canonicalized to
    /// their decimal form so `Interval::from(5) == Interval::from("5")`.
    Interval
);

label_type!(
    /// Instrument identifier, canonicalized the same way as [`Interval`].
    Asset
);

/// Close prices for one asset, sorted by date ascending.
#[derive(Clone, Debug, PartialEq)]
pub struct PriceSeries {
    pub dates: Vec<NaiveDate>,
    pub closes: Vec<f64>,
}

impl PriceSeries {
    pub fn new(dates: Vec<NaiveDate>, closes: Vec<f64>) -> Result<Self, DataError> {
        if dates.is_empty() || closes.is_empty() {
            return Err(DataError::Empty);
        }

        if dates.len() != closes.len() {
            return Err(DataError::LengthMismatch {
                dates: dates.len(),
                values: closes.len(),
            });
        }

        let mut paired: Vec<(NaiveDate, f64)> = dates.into_iter().zip(closes).collect();
        paired.sort_by_key(|(d, _)| *d);

        let (dates, closes): (Vec<_>, Vec<_>) = paired.into_iter().unzip();

        Ok(Self { dates, closes })
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn date_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        Some((*self.dates.first()?, *self.dates.last()?))
    }
}

/// A series derived from prices. May be empty.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReturnSeries {
    pub dates: Vec<NaiveDate>,
    pub values: Vec<f64>,
}

impl ReturnSeries {
    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn date_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        Some((*self.dates.first()?, *self.dates.last()?))
    }

    pub(crate) fn push(&mut self, date: NaiveDate, value: f64) {
        self.dates.push(date);
        self.values.push(value);
    }
}

/// Price history for every asset, in the order assets were supplied.
pub type PriceData = IndexMap<Asset, PriceSeries>;

#[derive(Deserialize)]
struct RawPricePoint {
    #[serde(rename = "Date", alias = "date")]
    date: String,
    #[serde(rename = "Close", alias = "close")]
    close: serde_json::Value,
}

/// Loads `{"ASSET": [{"Date": "2024-01-02", "Close": 101.5}, ...], ...}`.
///
/// Points whose close is not numeric are dropped with a warning; a malformed
/// date is an error since it cannot be placed on the time axis.
pub fn load_prices_reader<R: Read>(reader: R) -> Result<PriceData, DataError> {
    let raw: IndexMap<String, Vec<RawPricePoint>> = serde_json::from_reader(reader)?;
    prices_from_raw(raw)
}

pub fn load_prices_json(json: &str) -> Result<PriceData, DataError> {
    let raw: IndexMap<String, Vec<RawPricePoint>> = serde_json::from_str(json)?;
    prices_from_raw(raw)
}

fn prices_from_raw(raw: IndexMap<String, Vec<RawPricePoint>>) -> Result<PriceData, DataError> {
    let mut out = PriceData::with_capacity(raw.len());

    for (asset, points) in raw {
        let mut dates = Vec::with_capacity(points.len());
        let mut closes = Vec::with_capacity(points.len());

        for point in points {
            let date = parse_date(&point.date).ok_or_else(|| DataError::InvalidDate {
                asset: asset.clone(),
                value: point.date.clone(),
            })?;
            match numeric(&point.close) {
                Some(close) => {
                    dates.push(date);
                    closes.push(close);
                }
                None => warn!(%asset, %date, close = %point.close, "dropping non-numeric close"),
            }
        }

        if dates.is_empty() {
            warn!(%asset, "no usable price points, asset skipped");
            continue;
        }

        out.insert(Asset::from(asset), PriceSeries::new(dates, closes)?);
    }

    Ok(out)
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    let trimmed = value.trim();
    // Accept a bare date or the date part of a timestamp.
    let date_part = trimmed.get(..10).unwrap_or(trimmed);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

/// Coerces a JSON value to a number: numbers pass, numeric strings parse,
/// everything else is `None`.
pub(crate) fn numeric(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

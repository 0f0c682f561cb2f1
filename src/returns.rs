use crate::utils::{PriceSeries, ReturnSeries};

/// Both per-asset series the chart battery needs.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DerivedSeries {
    pub log_returns: ReturnSeries,
    pub cumulative_returns: ReturnSeries,
}

pub fn derive(prices: &PriceSeries) -> DerivedSeries {
    DerivedSeries {
        log_returns: log_returns(prices),
        cumulative_returns: cumulative_returns(prices),
    }
}

/// `ln(close[i] / close[i-1])` for i >= 1, dated at `i`.
///
/// A point is emitted only when both closes are finite and positive, so the
/// first observation never produces a value and bad prints leave a gap.
pub fn log_returns(prices: &PriceSeries) -> ReturnSeries {
    let mut out = ReturnSeries::default();
    for (date, window) in prices.dates.iter().skip(1).zip(prices.closes.windows(2)) {
        let (prev, curr) = (window[0], window[1]);
        if !is_valid_price(prev) || !is_valid_price(curr) {
            continue;
        }
        let value = (curr / prev).ln();
        if value.is_finite() {
            out.push(*date, value);
        }
    }
    out
}

/// `close[i] / close[0] - 1` for every i; the first point is 0.
///
/// Empty when the first close cannot serve as a base.
pub fn cumulative_returns(prices: &PriceSeries) -> ReturnSeries {
    let mut out = ReturnSeries::default();
    let base = match prices.closes.first() {
        Some(base) if is_valid_price(*base) => *base,
        _ => return out,
    };

    for (date, close) in prices.dates.iter().zip(&prices.closes) {
        let value = close / base - 1.0;
        if value.is_finite() {
            out.push(*date, value);
        }
    }
    out
}

fn is_valid_price(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

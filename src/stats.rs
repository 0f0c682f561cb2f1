use std::fmt;
use std::io::Read;

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};

use crate::utils::{numeric, Asset, DataError, Interval};

/// The six precomputed risk/return measures, in the fixed display order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Metric {
    #[serde(rename = "Mean Return")]
    MeanReturn,
    #[serde(rename = "Standard Deviation")]
    StdDeviation,
    #[serde(rename = "VaR 95%")]
    Var95,
    #[serde(rename = "ES 95%")]
    Es95,
    #[serde(rename = "CAGR")]
    Cagr,
    #[serde(rename = "Max Drawdown")]
    MaxDrawdown,
}

impl Metric {
    pub const ALL: [Metric; 6] = [
        Metric::MeanReturn,
        Metric::StdDeviation,
        Metric::Var95,
        Metric::Es95,
        Metric::Cagr,
        Metric::MaxDrawdown,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Metric::MeanReturn => "Mean Return",
            Metric::StdDeviation => "Standard Deviation",
            Metric::Var95 => "VaR 95%",
            Metric::Es95 => "ES 95%",
            Metric::Cagr => "CAGR",
            Metric::MaxDrawdown => "Max Drawdown",
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Statistics for one (interval, asset) pair. `None` marks a missing value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    #[serde(rename = "Mean Return", default, deserialize_with = "lenient_f64")]
    pub mean_return: Option<f64>,
    #[serde(rename = "Standard Deviation", default, deserialize_with = "lenient_f64")]
    pub std_deviation: Option<f64>,
    #[serde(rename = "VaR 95%", default, deserialize_with = "lenient_f64")]
    pub var_95: Option<f64>,
    #[serde(rename = "ES 95%", default, deserialize_with = "lenient_f64")]
    pub es_95: Option<f64>,
    #[serde(rename = "CAGR", default, deserialize_with = "lenient_f64")]
    pub cagr: Option<f64>,
    #[serde(rename = "Max Drawdown", default, deserialize_with = "lenient_f64")]
    pub max_drawdown: Option<f64>,
}

impl Metrics {
    pub fn get(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::MeanReturn => self.mean_return,
            Metric::StdDeviation => self.std_deviation,
            Metric::Var95 => self.var_95,
            Metric::Es95 => self.es_95,
            Metric::Cagr => self.cagr,
            Metric::MaxDrawdown => self.max_drawdown,
        }
    }

    pub fn with(mut self, metric: Metric, value: f64) -> Self {
        let slot = match metric {
            Metric::MeanReturn => &mut self.mean_return,
            Metric::StdDeviation => &mut self.std_deviation,
            Metric::Var95 => &mut self.var_95,
            Metric::Es95 => &mut self.es_95,
            Metric::Cagr => &mut self.cagr,
            Metric::MaxDrawdown => &mut self.max_drawdown,
        };
        *slot = Some(value);
        self
    }
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(numeric(&value))
}

/// Interval → asset → metrics, kept in insertion order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatsTable {
    intervals: IndexMap<Interval, IndexMap<Asset, Metrics>>,
}

impl StatsTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts metrics for a pair. Labels that canonicalize equal share a slot;
    /// the newer metrics replace the older ones in place.
    pub fn insert<I, A>(&mut self, interval: I, asset: A, metrics: Metrics)
    where
        I: Into<Interval>,
        A: Into<Asset>,
    {
        self.intervals
            .entry(interval.into())
            .or_default()
            .insert(asset.into(), metrics);
    }

    pub fn with<I, A>(mut self, interval: I, asset: A, metrics: Metrics) -> Self
    where
        I: Into<Interval>,
        A: Into<Asset>,
    {
        self.insert(interval, asset, metrics);
        self
    }

    pub fn get(&self, interval: &Interval, asset: &Asset) -> Option<&Metrics> {
        self.intervals.get(interval)?.get(asset)
    }

    /// Number of (interval, asset) pairs.
    pub fn len(&self) -> usize {
        self.intervals.values().map(IndexMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Interval, &Asset, &Metrics)> {
        self.intervals.iter().flat_map(|(interval, assets)| {
            assets
                .iter()
                .map(move |(asset, metrics)| (interval, asset, metrics))
        })
    }

    pub fn from_json_str(json: &str) -> Result<Self, DataError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, DataError> {
        Ok(serde_json::from_reader(reader)?)
    }
}

/// One flattened (interval, asset) row with every metric column.
#[derive(Clone, Debug, PartialEq)]
pub struct WideRow {
    pub interval: Interval,
    pub asset: Asset,
    pub metrics: Metrics,
}

/// One (interval, asset, metric) observation with a usable value.
#[derive(Clone, Debug, PartialEq)]
pub struct LongRow {
    pub interval: Interval,
    pub asset: Asset,
    pub metric: Metric,
    pub value: f64,
}

/// Flattens the table interval-major, asset-minor. Missing metrics stay `None`.
pub fn build_wide_rows(table: &StatsTable) -> Vec<WideRow> {
    table
        .iter()
        .map(|(interval, asset, metrics)| WideRow {
            interval: interval.clone(),
            asset: asset.clone(),
            metrics: *metrics,
        })
        .collect()
}

/// The filter applied when leaving wide form: a value survives only if it is
/// present and finite. NaN and infinities count as missing.
pub fn usable(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

/// Unpivots `rows` over `metrics`, row by row and in the given metric order,
/// dropping every cell that is not [`usable`].
pub fn melt(rows: &[WideRow], metrics: &[Metric]) -> Vec<LongRow> {
    let mut out = Vec::with_capacity(rows.len() * metrics.len());
    for row in rows {
        for metric in metrics {
            if let Some(value) = usable(row.metrics.get(*metric)) {
                out.push(LongRow {
                    interval: row.interval.clone(),
                    asset: row.asset.clone(),
                    metric: *metric,
                    value,
                });
            }
        }
    }
    out
}

pub fn long_form(rows: &[WideRow]) -> Vec<LongRow> {
    melt(rows, &Metric::ALL)
}

/// Pairwise Pearson correlation of the six metric columns.
#[derive(Clone, Debug, PartialEq)]
pub struct CorrelationMatrix {
    values: [[Option<f64>; 6]; 6],
}

impl CorrelationMatrix {
    pub fn get(&self, a: Metric, b: Metric) -> Option<f64> {
        self.values[a.index()][b.index()]
    }

    pub fn metrics(&self) -> &'static [Metric; 6] {
        &Metric::ALL
    }

    /// True when no cell could be computed.
    pub fn is_empty(&self) -> bool {
        self.values.iter().flatten().all(Option::is_none)
    }
}

/// Each cell uses only rows where both columns are usable. A cell is `None`
/// with fewer than two such rows or when either side has zero variance.
pub fn correlation_matrix(rows: &[WideRow]) -> CorrelationMatrix {
    let mut values = [[None; 6]; 6];

    for a in Metric::ALL {
        for b in Metric::ALL {
            if b < a {
                continue;
            }
            let pairs: Vec<(f64, f64)> = rows
                .iter()
                .filter_map(|row| {
                    Some((
                        usable(row.metrics.get(a))?,
                        usable(row.metrics.get(b))?,
                    ))
                })
                .collect();

            let corr = if a == b {
                pearson(&pairs).map(|_| 1.0)
            } else {
                pearson(&pairs)
            };
            values[a.index()][b.index()] = corr;
            values[b.index()][a.index()] = corr;
        }
    }

    CorrelationMatrix { values }
}

fn pearson(pairs: &[(f64, f64)]) -> Option<f64> {
    if pairs.len() < 2 {
        return None;
    }

    let n = pairs.len() as f64;
    let mean_x = pairs.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = pairs.iter().map(|(_, y)| y).sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (x, y) in pairs {
        let dx = x - mean_x;
        let dy = y - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    if var_x <= 0.0 || var_y <= 0.0 {
        return None;
    }

    Some((cov / (var_x.sqrt() * var_y.sqrt())).clamp(-1.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn full(seed: f64) -> Metrics {
        Metrics {
            mean_return: Some(0.001 * seed),
            std_deviation: Some(0.02 + 0.001 * seed * seed),
            var_95: Some(-0.03 * seed),
            es_95: Some(-0.04 * seed + 0.002 * seed * seed),
            cagr: Some(0.1 + 0.01 * seed),
            max_drawdown: Some(-0.2 - 0.05 * seed.sqrt()),
        }
    }

    fn sample_table() -> StatsTable {
        StatsTable::new()
            .with("1d", "BTC", full(1.0))
            .with("1d", "ETH", full(2.0))
            .with("1wk", "BTC", full(3.0))
            .with("1wk", "ETH", Metrics::default().with(Metric::Cagr, 0.4))
    }

    #[test]
    fn wide_rows_follow_table_order() {
        let rows = build_wide_rows(&sample_table());
        let keys: Vec<(&str, &str)> = rows
            .iter()
            .map(|r| (r.interval.as_str(), r.asset.as_str()))
            .collect();

        assert_eq!(
            keys,
            vec![("1d", "BTC"), ("1d", "ETH"), ("1wk", "BTC"), ("1wk", "ETH")]
        );
        assert_eq!(rows[3].metrics.mean_return, None);
        assert_eq!(rows[3].metrics.cagr, Some(0.4));
    }

    #[test]
    fn empty_table_gives_empty_tables() {
        let rows = build_wide_rows(&StatsTable::new());
        assert!(rows.is_empty());
        assert!(long_form(&rows).is_empty());
        assert!(correlation_matrix(&rows).is_empty());
    }

    #[test]
    fn canonical_labels_share_a_slot() {
        let table = StatsTable::new()
            .with(5, "BTC", full(1.0))
            .with("5", "BTC", full(2.0))
            .with(5u64, 1, full(3.0));

        assert_eq!(table.len(), 2);
        let rows = build_wide_rows(&table);
        assert_eq!(rows[0].metrics, full(2.0));
        assert_eq!(rows[1].asset, Asset::from("1"));
    }

    #[test]
    fn full_row_melts_into_six_exact_values() {
        let rows = build_wide_rows(&StatsTable::new().with("1d", "BTC", full(1.5)));
        let long = long_form(&rows);

        assert_eq!(long.len(), 6);
        for (row, metric) in long.iter().zip(Metric::ALL) {
            assert_eq!(row.metric, metric);
            assert_eq!(Some(row.value), full(1.5).get(metric));
        }
    }

    #[test]
    fn melt_drops_missing_and_non_finite() {
        let metrics = Metrics {
            mean_return: Some(f64::NAN),
            std_deviation: Some(0.02),
            var_95: None,
            es_95: Some(f64::INFINITY),
            cagr: Some(0.3),
            max_drawdown: None,
        };
        let rows = build_wide_rows(&StatsTable::new().with("1d", "BTC", metrics));
        let long = long_form(&rows);

        let kept: Vec<Metric> = long.iter().map(|r| r.metric).collect();
        assert_eq!(kept, vec![Metric::StdDeviation, Metric::Cagr]);
    }

    #[test]
    fn melt_respects_metric_subset_order() {
        let rows = build_wide_rows(&sample_table());
        let long = melt(&rows, &[Metric::Cagr, Metric::MeanReturn]);

        let first_row: Vec<Metric> = long.iter().take(2).map(|r| r.metric).collect();
        assert_eq!(first_row, vec![Metric::Cagr, Metric::MeanReturn]);
        // 3 full rows contribute 2 each, the sparse row only CAGR.
        assert_eq!(long.len(), 7);
    }

    #[test]
    fn json_values_are_coerced_leniently() {
        let json = r#"{
            "1d": {
                "BTC": {"Mean Return": 0.01, "Standard Deviation": "0.2", "VaR 95%": "n/a",
                        "ES 95%": null, "CAGR": true}
            },
            "1wk": {"ETH": {}}
        }"#;
        let table = StatsTable::from_json_str(json).unwrap();
        let btc = table.get(&Interval::from("1d"), &Asset::from("BTC")).unwrap();

        assert_eq!(btc.mean_return, Some(0.01));
        assert_eq!(btc.std_deviation, Some(0.2));
        assert_eq!(btc.var_95, None);
        assert_eq!(btc.es_95, None);
        assert_eq!(btc.cagr, None);
        assert_eq!(btc.max_drawdown, None);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn correlation_is_symmetric_with_unit_diagonal() {
        let rows = build_wide_rows(&sample_table());
        let corr = correlation_matrix(&rows);

        for a in Metric::ALL {
            for b in Metric::ALL {
                assert_eq!(corr.get(a, b), corr.get(b, a));
            }
        }
        for metric in Metric::ALL {
            let value = corr.get(metric, metric).unwrap();
            assert_approx_eq!(value, 1.0, 1e-12);
        }

        // mean_return and var_95 are exact linear opposites over the full rows.
        let opposite = corr.get(Metric::MeanReturn, Metric::Var95).unwrap();
        assert_approx_eq!(opposite, -1.0, 1e-9);
    }

    #[test]
    fn correlation_uses_pairwise_complete_rows() {
        let pair = |a: Metric, x: f64, b: Metric, y: f64| Metrics::default().with(a, x).with(b, y);
        let table = StatsTable::new()
            .with("a", "X", pair(Metric::MeanReturn, 1.0, Metric::Cagr, 2.0))
            .with("b", "X", pair(Metric::MeanReturn, 2.0, Metric::Cagr, 4.0))
            .with("c", "X", Metrics::default().with(Metric::MeanReturn, 3.0))
            .with("d", "X", pair(Metric::StdDeviation, 0.5, Metric::Cagr, 1.0));
        let corr = correlation_matrix(&build_wide_rows(&table));

        assert_approx_eq!(corr.get(Metric::MeanReturn, Metric::Cagr).unwrap(), 1.0, 1e-12);
        // Single observation and a constant column cannot be correlated.
        assert_eq!(corr.get(Metric::StdDeviation, Metric::StdDeviation), None);
        assert_eq!(corr.get(Metric::StdDeviation, Metric::Cagr), None);
        assert_eq!(corr.get(Metric::Var95, Metric::Var95), None);
    }
}

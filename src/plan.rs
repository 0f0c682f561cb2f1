use std::collections::HashSet;

use indexmap::IndexMap;

use crate::plots::{
    CategoryChart, CategorySeries, Figure, FigureSize, Frame, HeatmapChart, HistogramChart,
    Marker, Palette, TimeSeriesChart, TimeSeriesLine,
};
use crate::returns::{cumulative_returns, log_returns};
use crate::stats::{correlation_matrix, LongRow, Metric, WideRow};
use crate::utils::{Asset, PriceData};

pub const DISTRIBUTION_SUFFIX: &str = "_log_return_distribution";
pub const DISTRIBUTION_BINS: usize = 50;
pub const DISTRIBUTION_SIZE: FigureSize = FigureSize::new(10.0, 5.0);
const DISTRIBUTION_COLOR: &str = "#0000ff";

/// Which long-row column drives color (hue) or marker shape (style).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Hue {
    Asset,
    Metric,
}

impl Hue {
    pub fn label(self) -> &'static str {
        match self {
            Hue::Asset => "Asset",
            Hue::Metric => "Metric",
        }
    }

    fn key(self, row: &LongRow) -> String {
        match self {
            Hue::Asset => row.asset.to_string(),
            Hue::Metric => row.metric.name().to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChartKind {
    Bar { hue: Hue },
    Line { hue: Hue, style: Hue },
    Heatmap,
    /// Per-asset log-return histograms plus one combined cumulative chart.
    ReturnSeries,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Slice {
    Metrics(&'static [Metric]),
    AllMetrics,
    DerivedSeries,
}

impl Slice {
    pub fn contains(&self, metric: Metric) -> bool {
        match self {
            Slice::Metrics(metrics) => metrics.contains(&metric),
            Slice::AllMetrics => true,
            Slice::DerivedSeries => false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ChartSpec {
    pub artifact: &'static str,
    pub title: &'static str,
    pub x_label: &'static str,
    pub y_label: &'static str,
    pub kind: ChartKind,
    pub slice: Slice,
    pub palette: Palette,
    pub size: FigureSize,
}

pub const CHART_PLAN: [ChartSpec; 6] = [
    ChartSpec {
        artifact: "mean_return",
        title: "Mean Log Return across Intervals",
        x_label: "Interval",
        y_label: "Mean Return",
        kind: ChartKind::Bar { hue: Hue::Asset },
        slice: Slice::Metrics(&[Metric::MeanReturn]),
        palette: Palette::Set2,
        size: FigureSize::new(12.0, 6.0),
    },
    ChartSpec {
        artifact: "std_deviation",
        title: "Standard Deviation across Intervals",
        x_label: "Interval",
        y_label: "Standard Deviation",
        kind: ChartKind::Bar { hue: Hue::Asset },
        slice: Slice::Metrics(&[Metric::StdDeviation]),
        palette: Palette::Coolwarm,
        size: FigureSize::new(12.0, 6.0),
    },
    ChartSpec {
        artifact: "var_es",
        title: "VaR & ES (95%) across Intervals",
        x_label: "Interval",
        y_label: "Risk Value",
        kind: ChartKind::Line {
            hue: Hue::Asset,
            style: Hue::Metric,
        },
        slice: Slice::Metrics(&[Metric::Var95, Metric::Es95]),
        palette: Palette::Tab10,
        size: FigureSize::new(12.0, 6.0),
    },
    ChartSpec {
        artifact: "cagr_drawdown",
        title: "CAGR and Max Drawdown across Intervals",
        x_label: "Interval",
        y_label: "Value",
        kind: ChartKind::Bar { hue: Hue::Metric },
        slice: Slice::Metrics(&[Metric::Cagr, Metric::MaxDrawdown]),
        palette: Palette::Paired,
        size: FigureSize::new(12.0, 6.0),
    },
    ChartSpec {
        artifact: "correlation_heatmap",
        title: "Correlation of Risk & Return Metrics",
        x_label: "",
        y_label: "",
        kind: ChartKind::Heatmap,
        slice: Slice::AllMetrics,
        palette: Palette::Coolwarm,
        size: FigureSize::new(10.0, 6.0),
    },
    ChartSpec {
        artifact: "cumulative_returns",
        title: "Cumulative Returns Over Time",
        x_label: "Date",
        y_label: "Cumulative Return",
        kind: ChartKind::ReturnSeries,
        slice: Slice::DerivedSeries,
        palette: Palette::Tab10,
        size: FigureSize::new(12.0, 6.0),
    },
];

/// File stem of an asset's log-return histogram. Path separators in the asset
/// id are replaced so the artifact stays inside the output directory.
pub fn distribution_artifact(asset: &Asset) -> String {
    format!("{}{DISTRIBUTION_SUFFIX}", asset_stem(asset))
}

fn asset_stem(asset: &Asset) -> String {
    asset
        .as_str()
        .chars()
        .map(|c| if matches!(c, '/' | '\\') { '_' } else { c })
        .collect()
}

/// Like [`distribution_artifact`], but numbers the stem (`ETH_USD_2`, ...)
/// until it is not in `taken`, so two assets never share a file.
fn unique_distribution_artifact(asset: &Asset, taken: &mut HashSet<String>) -> String {
    let stem = asset_stem(asset);
    let mut name = format!("{stem}{DISTRIBUTION_SUFFIX}");
    let mut n = 2;
    while !taken.insert(name.clone()) {
        name = format!("{stem}_{n}{DISTRIBUTION_SUFFIX}");
        n += 1;
    }
    name
}

impl ChartSpec {
    pub fn select<'a>(&self, long: &'a [LongRow]) -> Vec<&'a LongRow> {
        long.iter().filter(|row| self.slice.contains(row.metric)).collect()
    }

    fn frame(&self) -> Frame {
        Frame {
            title: self.title.to_string(),
            x_label: self.x_label.to_string(),
            y_label: self.y_label.to_string(),
            size: self.size,
        }
    }

    /// Every artifact this entry produces, paired with its figure or `None`
    /// when its slice is empty.
    pub fn build(
        &self,
        wide: &[WideRow],
        long: &[LongRow],
        prices: &PriceData,
    ) -> Vec<(String, Option<Figure>)> {
        match self.kind {
            ChartKind::ReturnSeries => self.return_figures(prices),
            _ => vec![(self.artifact.to_string(), self.figure(wide, long))],
        }
    }

    /// Figure for the table-driven entries. `None` for an empty slice and for
    /// [`ChartKind::ReturnSeries`].
    pub fn figure(&self, wide: &[WideRow], long: &[LongRow]) -> Option<Figure> {
        match self.kind {
            ChartKind::Bar { hue } => {
                let rows = self.select(long);
                let grid = pivot(&rows, hue, None);
                (!grid.is_empty()).then(|| Figure::Bars(self.category_chart(grid, hue)))
            }
            ChartKind::Line { hue, style } => {
                let rows = self.select(long);
                let grid = pivot(&rows, hue, Some(style));
                (!grid.is_empty()).then(|| Figure::Lines(self.category_chart(grid, hue)))
            }
            ChartKind::Heatmap => {
                let corr = correlation_matrix(wide);
                if corr.is_empty() {
                    return None;
                }
                let metrics = corr.metrics();
                Some(Figure::Heatmap(HeatmapChart {
                    frame: self.frame(),
                    labels: metrics.iter().map(|m| m.name().to_string()).collect(),
                    cells: metrics
                        .iter()
                        .map(|a| metrics.iter().map(|b| corr.get(*a, *b)).collect())
                        .collect(),
                }))
            }
            ChartKind::ReturnSeries => None,
        }
    }

    /// One histogram per asset in input order, then the combined cumulative chart.
    pub fn return_figures(&self, prices: &PriceData) -> Vec<(String, Option<Figure>)> {
        if self.kind != ChartKind::ReturnSeries {
            return Vec::new();
        }

        let mut out = Vec::with_capacity(prices.len() + 1);
        let mut taken = HashSet::with_capacity(prices.len());
        for (asset, series) in prices {
            let log = log_returns(series);
            let figure = (!log.is_empty()).then(|| {
                Figure::Histogram(HistogramChart {
                    frame: Frame {
                        title: format!("Distribution of Daily Log Returns - {asset}"),
                        x_label: "Log Return".to_string(),
                        y_label: "Frequency".to_string(),
                        size: DISTRIBUTION_SIZE,
                    },
                    values: log.values,
                    bins: DISTRIBUTION_BINS,
                    color: DISTRIBUTION_COLOR.to_string(),
                    kde: true,
                })
            });
            out.push((unique_distribution_artifact(asset, &mut taken), figure));
        }

        let lines: Vec<TimeSeriesLine> = prices
            .iter()
            .map(|(asset, series)| (asset, cumulative_returns(series)))
            .filter(|(_, cum)| !cum.is_empty())
            .enumerate()
            .map(|(i, (asset, cum))| TimeSeriesLine {
                label: asset.to_string(),
                color: self.palette.color(i, prices.len()),
                dates: cum.dates,
                values: cum.values,
            })
            .collect();
        let cumulative = (!lines.is_empty()).then(|| {
            Figure::TimeSeries(TimeSeriesChart {
                frame: self.frame(),
                series: lines,
            })
        });
        out.push((self.artifact.to_string(), cumulative));

        out
    }

    fn category_chart(&self, grid: Grid, hue: Hue) -> CategoryChart {
        let hue_order: IndexMap<&str, ()> =
            grid.groups.iter().map(|g| (g.hue.as_str(), ())).collect();
        let style_order: IndexMap<&str, ()> = grid
            .groups
            .iter()
            .filter_map(|g| g.style.as_deref())
            .map(|s| (s, ()))
            .collect();

        let series = grid
            .groups
            .iter()
            .zip(grid.cells)
            .map(|(group, values)| {
                let hue_idx = hue_order.get_index_of(group.hue.as_str()).unwrap_or(0);
                let marker = group
                    .style
                    .as_deref()
                    .map(|s| Marker::nth(style_order.get_index_of(s).unwrap_or(0)));
                let label = match &group.style {
                    Some(style) => format!("{} / {}", group.hue, style),
                    None => group.hue.clone(),
                };
                CategorySeries {
                    label,
                    color: self.palette.color(hue_idx, hue_order.len()),
                    marker,
                    values,
                }
            })
            .collect();

        CategoryChart {
            frame: self.frame(),
            legend_title: hue.label().to_string(),
            categories: grid.categories,
            series,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GroupKey {
    pub hue: String,
    pub style: Option<String>,
}

/// Long rows spread over interval categories.
#[derive(Clone, Debug, PartialEq)]
pub struct Grid {
    /// Intervals in order of first appearance.
    pub categories: Vec<String>,
    /// Hue (and style) groups in order of first appearance.
    pub groups: Vec<GroupKey>,
    /// `cells[group][category]`: mean of the values landing there.
    pub cells: Vec<Vec<Option<f64>>>,
}

impl Grid {
    pub fn is_empty(&self) -> bool {
        self.categories.is_empty() || self.groups.is_empty()
    }
}

/// Groups rows by (hue, style) and interval. Several rows in the same cell
/// are averaged, e.g. CAGR across assets when the hue is the metric.
pub fn pivot(rows: &[&LongRow], hue: Hue, style: Option<Hue>) -> Grid {
    let mut categories: IndexMap<String, ()> = IndexMap::new();
    let mut groups: IndexMap<GroupKey, Vec<(f64, usize)>> = IndexMap::new();

    for row in rows {
        let (cat_idx, _) = categories.insert_full(row.interval.to_string(), ());
        let key = GroupKey {
            hue: hue.key(row),
            style: style.map(|s| s.key(row)),
        };
        let cells = groups.entry(key).or_default();
        if cells.len() <= cat_idx {
            cells.resize(cat_idx + 1, (0.0, 0));
        }
        cells[cat_idx].0 += row.value;
        cells[cat_idx].1 += 1;
    }

    let n_cats = categories.len();
    let (groups, cells): (Vec<GroupKey>, Vec<Vec<Option<f64>>>) = groups
        .into_iter()
        .map(|(key, mut sums)| {
            sums.resize(n_cats, (0.0, 0));
            let means = sums
                .into_iter()
                .map(|(sum, count)| (count > 0).then(|| sum / count as f64))
                .collect();
            (key, means)
        })
        .unzip();

    Grid {
        categories: categories.into_keys().collect(),
        groups,
        cells,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::{build_wide_rows, long_form, Metrics, StatsTable};
    use crate::utils::PriceSeries;
    use assert_approx_eq::assert_approx_eq;
    use chrono::NaiveDate;

    fn metrics(mean: f64, cagr: Option<f64>) -> Metrics {
        Metrics {
            mean_return: Some(mean),
            std_deviation: Some(mean.abs() * 10.0),
            var_95: Some(-mean * 3.0),
            es_95: Some(-mean * 4.0),
            cagr,
            max_drawdown: Some(-0.3),
        }
    }

    fn table() -> StatsTable {
        StatsTable::new()
            .with("1d", "BTC", metrics(0.002, Some(0.5)))
            .with("1d", "ETH", metrics(0.003, Some(0.7)))
            .with("1wk", "BTC", metrics(0.010, None))
            .with("1wk", "ETH", metrics(0.012, Some(0.9)))
    }

    fn prices(closes: &[f64]) -> PriceSeries {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let dates = (0..closes.len())
            .map(|i| start + chrono::Days::new(i as u64))
            .collect();
        PriceSeries::new(dates, closes.to_vec()).unwrap()
    }

    #[test]
    fn plan_is_fixed_and_ordered() {
        let names: Vec<&str> = CHART_PLAN.iter().map(|c| c.artifact).collect();
        assert_eq!(
            names,
            vec![
                "mean_return",
                "std_deviation",
                "var_es",
                "cagr_drawdown",
                "correlation_heatmap",
                "cumulative_returns",
            ]
        );
    }

    #[test]
    fn select_filters_by_metric() {
        let long = long_form(&build_wide_rows(&table()));
        let var_es = CHART_PLAN[2].select(&long);

        assert_eq!(var_es.len(), 8);
        assert!(var_es
            .iter()
            .all(|r| matches!(r.metric, Metric::Var95 | Metric::Es95)));
        assert_eq!(CHART_PLAN[4].select(&long).len(), long.len());
        assert!(CHART_PLAN[5].select(&long).is_empty());
    }

    #[test]
    fn bar_grid_is_asset_by_interval() {
        let long = long_form(&build_wide_rows(&table()));
        let rows = CHART_PLAN[0].select(&long);
        let grid = pivot(&rows, Hue::Asset, None);

        assert_eq!(grid.categories, vec!["1d", "1wk"]);
        let hues: Vec<&str> = grid.groups.iter().map(|g| g.hue.as_str()).collect();
        assert_eq!(hues, vec!["BTC", "ETH"]);
        assert_eq!(grid.cells[0], vec![Some(0.002), Some(0.010)]);
    }

    #[test]
    fn metric_hue_averages_across_assets() {
        let long = long_form(&build_wide_rows(&table()));
        let rows = CHART_PLAN[3].select(&long);
        let grid = pivot(&rows, Hue::Metric, None);

        let hues: Vec<&str> = grid.groups.iter().map(|g| g.hue.as_str()).collect();
        assert_eq!(hues, vec!["CAGR", "Max Drawdown"]);
        assert_approx_eq!(grid.cells[0][0].unwrap(), 0.6, 1e-12);
        // BTC has no weekly CAGR, so only ETH contributes.
        assert_approx_eq!(grid.cells[0][1].unwrap(), 0.9, 1e-12);
        assert_approx_eq!(grid.cells[1][1].unwrap(), -0.3, 1e-12);
    }

    #[test]
    fn pivot_leaves_gaps_for_missing_cells() {
        let table = StatsTable::new()
            .with("1d", "BTC", Metrics::default().with(Metric::MeanReturn, 0.1))
            .with("1wk", "ETH", Metrics::default().with(Metric::MeanReturn, 0.2));
        let long = long_form(&build_wide_rows(&table));
        let grid = pivot(&CHART_PLAN[0].select(&long), Hue::Asset, None);

        assert_eq!(grid.cells, vec![vec![Some(0.1), None], vec![None, Some(0.2)]]);
    }

    #[test]
    fn line_chart_colors_by_asset_and_marks_by_metric() {
        let wide = build_wide_rows(&table());
        let long = long_form(&wide);

        let Some(Figure::Lines(chart)) = CHART_PLAN[2].figure(&wide, &long) else {
            panic!("expected a line chart");
        };
        let labels: Vec<&str> = chart.series.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(
            labels,
            vec!["BTC / VaR 95%", "BTC / ES 95%", "ETH / VaR 95%", "ETH / ES 95%"]
        );
        assert_eq!(chart.series[0].color, chart.series[1].color);
        assert_ne!(chart.series[0].color, chart.series[2].color);
        assert_eq!(chart.series[0].marker, chart.series[2].marker);
        assert_ne!(chart.series[0].marker, chart.series[1].marker);
    }

    #[test]
    fn empty_tables_build_no_figures() {
        let wide = build_wide_rows(&StatsTable::new());
        let long = long_form(&wide);

        for spec in &CHART_PLAN {
            assert!(spec.figure(&wide, &long).is_none(), "{}", spec.artifact);
        }
        let built = CHART_PLAN[5].build(&wide, &long, &PriceData::new());
        assert_eq!(built, vec![("cumulative_returns".to_string(), None)]);
    }

    #[test]
    fn heatmap_carries_all_six_metrics() {
        let wide = build_wide_rows(&table());
        let long = long_form(&wide);

        let Some(Figure::Heatmap(chart)) = CHART_PLAN[4].figure(&wide, &long) else {
            panic!("expected a heatmap");
        };
        assert_eq!(chart.labels.len(), 6);
        assert_eq!(chart.labels[2], "VaR 95%");
        assert_approx_eq!(chart.cells[0][0].unwrap(), 1.0, 1e-12);
        // Max Drawdown is constant.
        assert_eq!(chart.cells[5][5], None);
    }

    #[test]
    fn return_figures_per_asset_then_combined() {
        let mut data = PriceData::new();
        data.insert(Asset::from("BTC"), prices(&[100.0, 110.0, 99.0]));
        data.insert(Asset::from("SOL"), prices(&[20.0]));
        data.insert(Asset::from("ETH/USD"), prices(&[10.0, 11.0]));

        let built = CHART_PLAN[5].build(&[], &[], &data);
        let names: Vec<&str> = built.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "BTC_log_return_distribution",
                "SOL_log_return_distribution",
                "ETH_USD_log_return_distribution",
                "cumulative_returns",
            ]
        );

        // A single close has no log return to plot.
        assert!(built[1].1.is_none());
        let Some(Figure::Histogram(hist)) = &built[0].1 else {
            panic!("expected a histogram");
        };
        assert_eq!(hist.values.len(), 2);
        assert_eq!(hist.bins, DISTRIBUTION_BINS);
        assert_eq!(hist.frame.title, "Distribution of Daily Log Returns - BTC");

        let Some(Figure::TimeSeries(cum)) = &built[3].1 else {
            panic!("expected a time series");
        };
        assert_eq!(cum.series.len(), 3);
        assert_eq!(cum.series[1].values, vec![0.0]);
    }

    #[test]
    fn colliding_asset_stems_get_distinct_artifacts() {
        let mut data = PriceData::new();
        data.insert(Asset::from("ETH/USD"), prices(&[10.0, 11.0]));
        data.insert(Asset::from("ETH_USD"), prices(&[20.0, 19.0]));
        data.insert(Asset::from("ETH\\USD"), prices(&[30.0, 33.0]));
        data.insert(Asset::from("ETH_USD_2"), prices(&[40.0, 41.0]));

        let built = CHART_PLAN[5].return_figures(&data);
        let names: Vec<&str> = built.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "ETH_USD_log_return_distribution",
                "ETH_USD_2_log_return_distribution",
                "ETH_USD_3_log_return_distribution",
                "ETH_USD_2_2_log_return_distribution",
                "cumulative_returns",
            ]
        );
    }
}

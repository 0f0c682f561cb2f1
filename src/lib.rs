mod plan;
mod plots;
mod reports;
mod returns;
mod stats;
mod utils;

pub use crate::plan::{
    distribution_artifact, pivot, ChartKind, ChartSpec, Grid, GroupKey, Hue, Slice, CHART_PLAN,
    DISTRIBUTION_BINS, DISTRIBUTION_SUFFIX,
};
pub use crate::plots::{
    CategoryChart, CategorySeries, Figure, FigureSize, Frame, HeatmapChart, HistogramChart,
    Marker, Palette, Renderer, SvgRenderer, Theme, TimeSeriesChart, TimeSeriesLine,
};
pub use crate::reports::{
    plot_statistics, plot_statistics_with, render_report_from_files, PlotError, PlotOptions,
    PlotOutput,
};
pub use crate::returns::{cumulative_returns, derive, log_returns, DerivedSeries};
pub use crate::stats::{
    build_wide_rows, correlation_matrix, long_form, melt, usable, CorrelationMatrix, LongRow,
    Metric, Metrics, StatsTable, WideRow,
};
pub use crate::utils::{
    load_prices_json, load_prices_reader, Asset, DataError, Interval, PriceData, PriceSeries,
    ReturnSeries,
};

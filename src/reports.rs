use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::plan::CHART_PLAN;
use crate::plots::{Renderer, SvgRenderer, Theme};
use crate::stats::{build_wide_rows, long_form, LongRow, StatsTable, WideRow};
use crate::utils::{load_prices_reader, DataError, PriceData};

const DEFAULT_OUTPUT_DIR: &str = "graphs";

#[derive(Debug, Error)]
pub enum PlotError {
    #[error("cannot create output directory {}: {source}", .path.display())]
    OutputPath { path: PathBuf, source: io::Error },

    #[error("data error: {0}")]
    Data(#[from] DataError),
}

#[derive(Clone, Debug)]
pub struct PlotOptions {
    pub output_dir: PathBuf,
    pub theme: Theme,
}

impl Default for PlotOptions {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            theme: Theme::default(),
        }
    }
}

impl PlotOptions {
    pub fn with_output_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.output_dir = path.as_ref().to_path_buf();
        self
    }

    pub fn with_theme(mut self, theme: Theme) -> Self {
        self.theme = theme;
        self
    }
}

/// Both intermediate tables plus what happened to each artifact.
#[derive(Debug)]
pub struct PlotOutput {
    pub wide: Vec<WideRow>,
    pub long: Vec<LongRow>,
    /// Written files, in plan order.
    pub artifacts: Vec<PathBuf>,
    /// Artifact names whose data slice was empty.
    pub skipped: Vec<String>,
    pub failed: Vec<(String, io::Error)>,
}

pub fn plot_statistics(
    stats: &StatsTable,
    prices: &PriceData,
    options: &PlotOptions,
) -> Result<PlotOutput, PlotError> {
    plot_statistics_with(stats, prices, options, &SvgRenderer)
}

/// Runs the whole chart plan with `renderer`. Only failing to create the
/// output directory is fatal; a chart that cannot be written is reported in
/// [`PlotOutput::failed`] and the rest carry on.
pub fn plot_statistics_with<R>(
    stats: &StatsTable,
    prices: &PriceData,
    options: &PlotOptions,
    renderer: &R,
) -> Result<PlotOutput, PlotError>
where
    R: Renderer + ?Sized,
{
    let dir = &options.output_dir;
    fs::create_dir_all(dir).map_err(|source| PlotError::OutputPath {
        path: dir.clone(),
        source,
    })?;

    let wide = build_wide_rows(stats);
    let long = long_form(&wide);
    info!(
        output_dir = %dir.display(),
        wide_rows = wide.len(),
        long_rows = long.len(),
        assets = prices.len(),
        "rendering chart plan"
    );

    let mut artifacts = Vec::new();
    let mut skipped = Vec::new();
    let mut failed = Vec::new();

    for spec in &CHART_PLAN {
        for (name, figure) in spec.build(&wide, &long, prices) {
            let Some(figure) = figure else {
                debug!(artifact = %name, "empty data slice, chart skipped");
                skipped.push(name);
                continue;
            };

            let path = dir.join(format!("{name}.{}", renderer.extension()));
            let document = renderer.render(&figure, &options.theme);
            match fs::write(&path, document) {
                Ok(()) => {
                    debug!(artifact = %name, path = %path.display(), "chart written");
                    artifacts.push(path);
                }
                Err(err) => {
                    warn!(
                        artifact = %name,
                        path = %path.display(),
                        error = %err,
                        "failed to write chart"
                    );
                    failed.push((name, err));
                }
            }
        }
    }

    info!(
        written = artifacts.len(),
        skipped = skipped.len(),
        failed = failed.len(),
        "chart plan finished"
    );

    Ok(PlotOutput {
        wide,
        long,
        artifacts,
        skipped,
        failed,
    })
}

/// Loads the statistics and price JSON files, then renders them.
pub fn render_report_from_files<P, Q>(
    stats_path: P,
    prices_path: Q,
    options: &PlotOptions,
) -> Result<PlotOutput, PlotError>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    let stats_file = File::open(stats_path.as_ref()).map_err(DataError::from)?;
    let stats = StatsTable::from_reader(BufReader::new(stats_file))?;

    let prices_file = File::open(prices_path.as_ref()).map_err(DataError::from)?;
    let prices = load_prices_reader(BufReader::new(prices_file))?;

    plot_statistics(&stats, &prices, options)
}

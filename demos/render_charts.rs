use chrono::NaiveDate;
use riskplots::{plot_statistics, Asset, Metrics, PlotOptions, PriceData, PriceSeries, StatsTable};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Precomputed stats as an upstream analysis step would hand them over.
    let mut stats = StatsTable::new();
    for (i, interval) in ["1d", "1wk", "1mo"].iter().enumerate() {
        let scale = (i + 1) as f64;
        for (j, asset) in ["BTC-USD", "ETH-USD", "SPY"].iter().enumerate() {
            let risk = 1.0 + j as f64 * 0.4;
            stats.insert(
                *interval,
                *asset,
                Metrics {
                    mean_return: Some(0.0008 * scale * risk),
                    std_deviation: Some(0.02 * scale.sqrt() * risk),
                    var_95: Some(-0.032 * scale.sqrt() * risk),
                    es_95: Some(-0.045 * scale.sqrt() * risk),
                    cagr: Some(0.12 * risk),
                    max_drawdown: Some(-0.25 * risk),
                },
            );
        }
    }

    let start = NaiveDate::from_ymd_opt(2024, 1, 1).expect("valid date");
    let mut prices = PriceData::new();
    for (j, (asset, base)) in [("BTC-USD", 42_000.0), ("ETH-USD", 2_300.0), ("SPY", 470.0)]
        .into_iter()
        .enumerate()
    {
        let mut dates = Vec::new();
        let mut closes = Vec::new();
        let mut close: f64 = base;
        for i in 0..250u64 {
            dates.push(start + chrono::Days::new(i));
            // Deterministic wiggle with a slight drift per asset.
            let shock = ((i as f64) * (0.37 + j as f64 * 0.11)).sin() * 0.015;
            close *= 1.0 + 0.0006 * (j as f64 + 1.0) + shock;
            closes.push(close);
        }
        prices.insert(Asset::from(asset), PriceSeries::new(dates, closes)?);
    }

    let options = PlotOptions::default().with_output_dir("graphs");
    let output = plot_statistics(&stats, &prices, &options)?;

    println!(
        "Rendered {} charts from {} wide / {} long rows into {}",
        output.artifacts.len(),
        output.wide.len(),
        output.long.len(),
        options.output_dir.display()
    );

    Ok(())
}

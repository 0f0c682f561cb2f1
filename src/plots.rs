use chrono::{Datelike, NaiveDate};

const TITLE_BAND: f64 = 34.0;
const LEFT_MARGIN: f64 = 72.0;
const RIGHT_MARGIN: f64 = 24.0;
const BOTTOM_MARGIN: f64 = 56.0;
const TICK_TARGET: usize = 6;
const DASH: &str = "4 3";

/// Explicit styling handed to the renderer instead of a process-wide style.
#[derive(Clone, Debug, PartialEq)]
pub struct Theme {
    pub pixels_per_inch: f64,
    pub font_family: String,
    pub font_size: f64,
    pub title_size: f64,
    pub background: String,
    pub grid_color: String,
    pub axis_color: String,
    pub text_color: String,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            pixels_per_inch: 80.0,
            font_family: "Arial,sans-serif".to_string(),
            font_size: 11.0,
            title_size: 14.0,
            background: "#ffffff".to_string(),
            grid_color: "#e5e5e5".to_string(),
            axis_color: "#333333".to_string(),
            text_color: "#262626".to_string(),
        }
    }
}

impl Theme {
    pub fn with_pixels_per_inch(mut self, ppi: f64) -> Self {
        self.pixels_per_inch = ppi;
        self
    }

    pub fn with_font<S: Into<String>>(mut self, family: S, size: f64) -> Self {
        self.font_family = family.into();
        self.font_size = size;
        self
    }

    pub fn with_background<S: Into<String>>(mut self, color: S) -> Self {
        self.background = color.into();
        self
    }

    pub fn with_grid_color<S: Into<String>>(mut self, color: S) -> Self {
        self.grid_color = color.into();
        self
    }

    fn pixels(&self, size: FigureSize) -> (f64, f64) {
        (
            (size.width * self.pixels_per_inch).round(),
            (size.height * self.pixels_per_inch).round(),
        )
    }
}

const SET2: [&str; 8] = [
    "#66c2a5", "#fc8d62", "#8da0cb", "#e78ac3", "#a6d854", "#ffd92f", "#e5c494", "#b3b3b3",
];
const TAB10: [&str; 10] = [
    "#1f77b4", "#ff7f0e", "#2ca02c", "#d62728", "#9467bd", "#8c564b", "#e377c2", "#7f7f7f",
    "#bcbd22", "#17becf",
];
const PAIRED: [&str; 12] = [
    "#a6cee3", "#1f78b4", "#b2df8a", "#33a02c", "#fb9a99", "#e31a1c", "#fdbf6f", "#ff7f00",
    "#cab2d6", "#6a3d9a", "#ffff99", "#b15928",
];
const COOL: (f64, f64, f64) = (59.0, 76.0, 192.0);
const NEUTRAL: (f64, f64, f64) = (221.0, 221.0, 221.0);
const WARM: (f64, f64, f64) = (180.0, 4.0, 38.0);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Palette {
    Set2,
    Coolwarm,
    Tab10,
    Paired,
}

impl Palette {
    /// Color for group `i` out of `n`. Qualitative palettes cycle; coolwarm
    /// spreads the groups across its ramp.
    pub fn color(self, i: usize, n: usize) -> String {
        match self {
            Palette::Set2 => SET2[i % SET2.len()].to_string(),
            Palette::Tab10 => TAB10[i % TAB10.len()].to_string(),
            Palette::Paired => PAIRED[i % PAIRED.len()].to_string(),
            Palette::Coolwarm => {
                let t = if n <= 1 {
                    -1.0
                } else {
                    -1.0 + 2.0 * i as f64 / (n - 1) as f64
                };
                Palette::diverging(t)
            }
        }
    }

    /// Coolwarm ramp: -1 is blue, 0 is light gray, +1 is red.
    pub fn diverging(t: f64) -> String {
        let t = if t.is_finite() { t.clamp(-1.0, 1.0) } else { 0.0 };
        let (from, to, w) = if t < 0.0 {
            (NEUTRAL, COOL, -t)
        } else {
            (NEUTRAL, WARM, t)
        };
        let mix = |a: f64, b: f64| a * (1.0 - w) + b * w;
        format!(
            "rgb({r:.0},{g:.0},{b:.0})",
            r = mix(from.0, to.0),
            g = mix(from.1, to.1),
            b = mix(from.2, to.2)
        )
    }
}

/// Figure size in inches.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FigureSize {
    pub width: f64,
    pub height: f64,
}

impl FigureSize {
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    pub size: FigureSize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Marker {
    Circle,
    Square,
    Diamond,
    Triangle,
}

impl Marker {
    pub fn nth(i: usize) -> Self {
        match i % 4 {
            0 => Marker::Circle,
            1 => Marker::Square,
            2 => Marker::Diamond,
            _ => Marker::Triangle,
        }
    }
}

/// One hue group over the category axis; `None` leaves a gap.
#[derive(Clone, Debug, PartialEq)]
pub struct CategorySeries {
    pub label: String,
    pub color: String,
    pub marker: Option<Marker>,
    pub values: Vec<Option<f64>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CategoryChart {
    pub frame: Frame,
    pub legend_title: String,
    pub categories: Vec<String>,
    pub series: Vec<CategorySeries>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct HeatmapChart {
    pub frame: Frame,
    pub labels: Vec<String>,
    /// Row-major, `labels.len()` square.
    pub cells: Vec<Vec<Option<f64>>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct HistogramChart {
    pub frame: Frame,
    pub values: Vec<f64>,
    pub bins: usize,
    pub color: String,
    pub kde: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TimeSeriesLine {
    pub label: String,
    pub color: String,
    pub dates: Vec<NaiveDate>,
    pub values: Vec<f64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TimeSeriesChart {
    pub frame: Frame,
    pub series: Vec<TimeSeriesLine>,
}

/// Renderer-ready description of one chart.
#[derive(Clone, Debug, PartialEq)]
pub enum Figure {
    Bars(CategoryChart),
    Lines(CategoryChart),
    Heatmap(HeatmapChart),
    Histogram(HistogramChart),
    TimeSeries(TimeSeriesChart),
}

impl Figure {
    pub fn frame(&self) -> &Frame {
        match self {
            Figure::Bars(chart) | Figure::Lines(chart) => &chart.frame,
            Figure::Heatmap(chart) => &chart.frame,
            Figure::Histogram(chart) => &chart.frame,
            Figure::TimeSeries(chart) => &chart.frame,
        }
    }
}

/// Draws a figure into a document. Persisting it is the caller's concern.
pub trait Renderer {
    fn extension(&self) -> &'static str;

    fn render(&self, figure: &Figure, theme: &Theme) -> String;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SvgRenderer;

impl Renderer for SvgRenderer {
    fn extension(&self) -> &'static str {
        "svg"
    }

    fn render(&self, figure: &Figure, theme: &Theme) -> String {
        let (width, height) = theme.pixels(figure.frame().size);
        let mut canvas = Canvas::new(width, height, theme);
        canvas.title(&figure.frame().title);

        match figure {
            Figure::Bars(chart) => draw_bars(&mut canvas, chart),
            Figure::Lines(chart) => draw_category_lines(&mut canvas, chart),
            Figure::Heatmap(chart) => draw_heatmap(&mut canvas, chart),
            Figure::Histogram(chart) => draw_histogram(&mut canvas, chart),
            Figure::TimeSeries(chart) => draw_time_series(&mut canvas, chart),
        }

        canvas.finish()
    }
}

struct Canvas<'a> {
    svg: String,
    width: f64,
    height: f64,
    theme: &'a Theme,
}

/// Pixel bounds of the data region.
#[derive(Clone, Copy)]
struct PlotArea {
    left: f64,
    top: f64,
    right: f64,
    bottom: f64,
}

impl PlotArea {
    fn width(&self) -> f64 {
        self.right - self.left
    }

    fn height(&self) -> f64 {
        self.bottom - self.top
    }

    fn y(&self, value: f64, (min_v, max_v): (f64, f64)) -> f64 {
        if (max_v - min_v).abs() < f64::EPSILON {
            return self.top + self.height() / 2.0;
        }
        let norm = (value - min_v) / (max_v - min_v);
        self.top + (1.0 - norm) * self.height()
    }

    fn x(&self, value: f64, (min_v, max_v): (f64, f64)) -> f64 {
        if (max_v - min_v).abs() < f64::EPSILON {
            return self.left + self.width() / 2.0;
        }
        let norm = (value - min_v) / (max_v - min_v);
        self.left + norm * self.width()
    }
}

impl<'a> Canvas<'a> {
    fn new(width: f64, height: f64, theme: &'a Theme) -> Self {
        let mut svg = String::new();
        svg.push_str(&format!(
            r##"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}"><style>text{{font-family:{font};font-size:{size}px;fill:{color}}}</style>"##,
            w = width,
            h = height,
            font = theme.font_family,
            size = theme.font_size,
            color = theme.text_color
        ));
        svg.push_str(&format!(
            r##"<rect x="0" y="0" width="{w}" height="{h}" fill="{bg}" />"##,
            w = width,
            h = height,
            bg = theme.background
        ));
        Self {
            svg,
            width,
            height,
            theme,
        }
    }

    fn area(&self) -> PlotArea {
        PlotArea {
            left: LEFT_MARGIN,
            top: TITLE_BAND + 10.0,
            right: self.width - RIGHT_MARGIN,
            bottom: self.height - BOTTOM_MARGIN,
        }
    }

    fn title(&mut self, title: &str) {
        self.svg.push_str(&format!(
            r##"<text x="{x:.2}" y="{y:.2}" text-anchor="middle" font-size="{size}" font-weight="bold">{title}</text>"##,
            x = self.width / 2.0,
            y = TITLE_BAND - 10.0,
            size = self.theme.title_size,
            title = escape(title)
        ));
    }

    fn axis_labels(&mut self, area: PlotArea, x_label: &str, y_label: &str) {
        if !x_label.is_empty() {
            self.svg.push_str(&format!(
                r##"<text x="{x:.2}" y="{y:.2}" text-anchor="middle">{label}</text>"##,
                x = area.left + area.width() / 2.0,
                y = self.height - 12.0,
                label = escape(x_label)
            ));
        }
        if !y_label.is_empty() {
            let x = 16.0;
            let y = area.top + area.height() / 2.0;
            self.svg.push_str(&format!(
                r##"<text x="{x:.2}" y="{y:.2}" text-anchor="middle" transform="rotate(-90 {x:.2} {y:.2})">{label}</text>"##,
                x = x,
                y = y,
                label = escape(y_label)
            ));
        }
    }

    /// Horizontal grid lines and labels for the value axis.
    fn y_grid(&mut self, area: PlotArea, extent: (f64, f64)) {
        let ticks = nice_ticks(extent.0, extent.1, TICK_TARGET);
        let decimals = tick_decimals(&ticks);
        for tick in ticks {
            let y = area.y(tick, extent);
            self.svg.push_str(&format!(
                r##"<line x1="{x1:.2}" y1="{y:.2}" x2="{x2:.2}" y2="{y:.2}" stroke="{color}" stroke-width="1" />"##,
                x1 = area.left,
                x2 = area.right,
                y = y,
                color = self.theme.grid_color
            ));
            self.svg.push_str(&format!(
                r##"<text x="{x:.2}" y="{y:.2}" text-anchor="end" dy="3">{label:.prec$}</text>"##,
                x = area.left - 6.0,
                y = y,
                label = tick,
                prec = decimals
            ));
        }
    }

    fn x_value_ticks(&mut self, area: PlotArea, extent: (f64, f64)) {
        let ticks = nice_ticks(extent.0, extent.1, TICK_TARGET);
        let decimals = tick_decimals(&ticks);
        for tick in ticks {
            let x = area.x(tick, extent);
            self.svg.push_str(&format!(
                r##"<line x1="{x:.2}" y1="{y1:.2}" x2="{x:.2}" y2="{y2:.2}" stroke="{color}" stroke-width="1" />"##,
                x = x,
                y1 = area.top,
                y2 = area.bottom,
                color = self.theme.grid_color
            ));
            self.svg.push_str(&format!(
                r##"<text x="{x:.2}" y="{y:.2}" text-anchor="middle">{label:.prec$}</text>"##,
                x = x,
                y = area.bottom + 16.0,
                label = tick,
                prec = decimals
            ));
        }
    }

    fn baseline(&mut self, area: PlotArea, y: f64) {
        self.svg.push_str(&format!(
            r##"<line x1="{x1:.2}" y1="{y:.2}" x2="{x2:.2}" y2="{y:.2}" stroke="{color}" stroke-width="1" />"##,
            x1 = area.left,
            x2 = area.right,
            y = y,
            color = self.theme.axis_color
        ));
    }

    fn category_axis(&mut self, area: PlotArea, categories: &[String]) {
        let band = area.width() / categories.len().max(1) as f64;
        for (i, label) in categories.iter().enumerate() {
            self.svg.push_str(&format!(
                r##"<text x="{x:.2}" y="{y:.2}" text-anchor="middle">{label}</text>"##,
                x = area.left + band * (i as f64 + 0.5),
                y = area.bottom + 16.0,
                label = escape(label)
            ));
        }
    }

    fn legend(&mut self, area: PlotArea, title: &str, entries: &[LegendEntry<'_>]) {
        if entries.is_empty() {
            return;
        }

        let x = area.right - 150.0;
        let mut y = area.top + 14.0;
        if !title.is_empty() {
            self.svg.push_str(&format!(
                r##"<text x="{x:.2}" y="{y:.2}" text-anchor="start" font-weight="bold">{title}</text>"##,
                x = x,
                y = y,
                title = escape(title)
            ));
            y += 16.0;
        }
        for entry in entries {
            let dash = if entry.dash { DASH } else { "0" };
            self.svg.push_str(&format!(
                r##"<line x1="{x1:.2}" y1="{y:.2}" x2="{x2:.2}" y2="{y:.2}" stroke="{color}" stroke-width="2" stroke-dasharray="{dash}" />"##,
                x1 = x,
                x2 = x + 20.0,
                y = y - 4.0,
                color = entry.color,
                dash = dash
            ));
            if let Some(marker) = entry.marker {
                self.marker(marker, x + 10.0, y - 4.0, entry.color);
            }
            self.svg.push_str(&format!(
                r##"<text x="{x:.2}" y="{y:.2}" text-anchor="start">{label}</text>"##,
                x = x + 26.0,
                y = y,
                label = escape(entry.label)
            ));
            y += 16.0;
        }
    }

    fn marker(&mut self, marker: Marker, x: f64, y: f64, color: &str) {
        let r = 3.5;
        let shape = match marker {
            Marker::Circle => format!(
                r##"<circle cx="{x:.2}" cy="{y:.2}" r="{r}" fill="{color}" />"##
            ),
            Marker::Square => format!(
                r##"<rect x="{x0:.2}" y="{y0:.2}" width="{s:.2}" height="{s:.2}" fill="{color}" />"##,
                x0 = x - r,
                y0 = y - r,
                s = 2.0 * r
            ),
            Marker::Diamond => format!(
                r##"<polygon points="{x:.2},{t:.2} {rr:.2},{y:.2} {x:.2},{b:.2} {l:.2},{y:.2}" fill="{color}" />"##,
                t = y - r - 1.0,
                b = y + r + 1.0,
                l = x - r,
                rr = x + r
            ),
            Marker::Triangle => format!(
                r##"<polygon points="{x:.2},{t:.2} {rr:.2},{b:.2} {l:.2},{b:.2}" fill="{color}" />"##,
                t = y - r - 1.0,
                b = y + r,
                l = x - r - 0.5,
                rr = x + r + 0.5
            ),
        };
        self.svg.push_str(&shape);
    }

    fn polyline(&mut self, points: &[(f64, f64)], color: &str, width: f64) {
        if points.is_empty() {
            return;
        }
        let coords = points
            .iter()
            .map(|(x, y)| format!("{x:.2},{y:.2}"))
            .collect::<Vec<_>>()
            .join(" ");
        self.svg.push_str(&format!(
            r##"<polyline fill="none" stroke="{color}" stroke-width="{width}" points="{coords}" />"##
        ));
    }

    fn empty_note(&mut self, area: PlotArea) {
        self.svg.push_str(&format!(
            r##"<text x="{x:.2}" y="{y:.2}" text-anchor="middle" fill="#999999">no data</text>"##,
            x = area.left + area.width() / 2.0,
            y = area.top + area.height() / 2.0
        ));
    }

    fn finish(mut self) -> String {
        self.svg.push_str("</svg>");
        self.svg
    }
}

struct LegendEntry<'a> {
    label: &'a str,
    color: &'a str,
    marker: Option<Marker>,
    dash: bool,
}

fn category_extent(chart: &CategoryChart, include_zero: bool) -> Option<(f64, f64)> {
    let values = chart
        .series
        .iter()
        .flat_map(|s| s.values.iter().flatten().copied());
    extent(values, include_zero)
}

/// Finite min/max, optionally stretched to include zero; flat ranges are
/// widened so they still scale.
fn extent<I: IntoIterator<Item = f64>>(values: I, include_zero: bool) -> Option<(f64, f64)> {
    let mut min_v = f64::INFINITY;
    let mut max_v = f64::NEG_INFINITY;
    for value in values {
        if value.is_finite() {
            min_v = min_v.min(value);
            max_v = max_v.max(value);
        }
    }

    if !min_v.is_finite() || !max_v.is_finite() {
        return None;
    }

    if include_zero {
        min_v = min_v.min(0.0);
        max_v = max_v.max(0.0);
    }

    if min_v == max_v {
        let adjust = if min_v == 0.0 { 1.0 } else { min_v.abs() * 0.1 };
        min_v -= adjust;
        max_v += adjust;
    }

    let pad = (max_v - min_v) * 0.05;
    Some((
        if min_v < 0.0 || !include_zero { min_v - pad } else { min_v },
        max_v + pad,
    ))
}

fn draw_bars(canvas: &mut Canvas<'_>, chart: &CategoryChart) {
    let area = canvas.area();
    canvas.axis_labels(area, &chart.frame.x_label, &chart.frame.y_label);

    let extent = match category_extent(chart, true) {
        Some(extent) if !chart.categories.is_empty() => extent,
        _ => return canvas.empty_note(area),
    };

    canvas.y_grid(area, extent);

    let band = area.width() / chart.categories.len() as f64;
    let groups = chart.series.len().max(1) as f64;
    let bar_width = band * 0.8 / groups;
    let zero = area.y(0.0, extent);

    for (s_idx, series) in chart.series.iter().enumerate() {
        for (c_idx, value) in series.values.iter().enumerate() {
            let Some(value) = value.filter(|v| v.is_finite()) else {
                continue;
            };
            let x = area.left + band * c_idx as f64 + band * 0.1 + bar_width * s_idx as f64;
            let y = area.y(value, extent);
            let (top, bottom) = if y < zero { (y, zero) } else { (zero, y) };
            canvas.svg.push_str(&format!(
                r##"<rect x="{x:.2}" y="{y:.2}" width="{w:.2}" height="{h:.2}" fill="{color}" />"##,
                x = x,
                y = top,
                w = bar_width,
                h = (bottom - top).abs(),
                color = series.color
            ));
        }
    }

    canvas.baseline(area, zero);
    canvas.category_axis(area, &chart.categories);

    let entries: Vec<LegendEntry<'_>> = chart
        .series
        .iter()
        .map(|s| LegendEntry {
            label: &s.label,
            color: &s.color,
            marker: None,
            dash: false,
        })
        .collect();
    canvas.legend(area, &chart.legend_title, &entries);
}

fn draw_category_lines(canvas: &mut Canvas<'_>, chart: &CategoryChart) {
    let area = canvas.area();
    canvas.axis_labels(area, &chart.frame.x_label, &chart.frame.y_label);

    let extent = match category_extent(chart, false) {
        Some(extent) if !chart.categories.is_empty() => extent,
        _ => return canvas.empty_note(area),
    };

    canvas.y_grid(area, extent);

    let band = area.width() / chart.categories.len() as f64;
    for series in &chart.series {
        let points: Vec<(f64, f64)> = series
            .values
            .iter()
            .enumerate()
            .filter_map(|(i, v)| {
                let v = v.filter(|v| v.is_finite())?;
                Some((area.left + band * (i as f64 + 0.5), area.y(v, extent)))
            })
            .collect();
        canvas.polyline(&points, &series.color, 1.8);
        if let Some(marker) = series.marker {
            for (x, y) in &points {
                canvas.marker(marker, *x, *y, &series.color);
            }
        }
    }

    canvas.category_axis(area, &chart.categories);

    let entries: Vec<LegendEntry<'_>> = chart
        .series
        .iter()
        .map(|s| LegendEntry {
            label: &s.label,
            color: &s.color,
            marker: s.marker,
            dash: false,
        })
        .collect();
    canvas.legend(area, &chart.legend_title, &entries);
}

fn draw_heatmap(canvas: &mut Canvas<'_>, chart: &HeatmapChart) {
    let n = chart.labels.len();
    let area = PlotArea {
        left: 130.0,
        top: TITLE_BAND + 10.0,
        right: canvas.width - 90.0,
        bottom: canvas.height - 80.0,
    };
    if n == 0 {
        return canvas.empty_note(area);
    }

    let cell_w = area.width() / n as f64;
    let cell_h = area.height() / n as f64;

    for (row, label) in chart.labels.iter().enumerate() {
        let y_center = area.top + (row as f64 + 0.5) * cell_h;
        canvas.svg.push_str(&format!(
            r##"<text x="{x:.2}" y="{y:.2}" text-anchor="end" dy="3">{label}</text>"##,
            x = area.left - 6.0,
            y = y_center,
            label = escape(label)
        ));

        for col in 0..n {
            let x_left = area.left + col as f64 * cell_w;
            let cell = chart
                .cells
                .get(row)
                .and_then(|r| r.get(col))
                .copied()
                .flatten()
                .filter(|v| v.is_finite());

            match cell {
                Some(v) => {
                    canvas.svg.push_str(&format!(
                        r##"<rect x="{x:.2}" y="{y:.2}" width="{w:.2}" height="{h:.2}" fill="{fill}" />"##,
                        x = x_left,
                        y = y_center - cell_h / 2.0,
                        w = cell_w,
                        h = cell_h,
                        fill = Palette::diverging(v)
                    ));
                    let text_color = if v.abs() > 0.6 { "#ffffff" } else { "#262626" };
                    canvas.svg.push_str(&format!(
                        r##"<text x="{x:.2}" y="{y:.2}" text-anchor="middle" dy="4" fill="{color}">{v:.2}</text>"##,
                        x = x_left + cell_w / 2.0,
                        y = y_center,
                        color = text_color,
                        v = v
                    ));
                }
                None => {
                    canvas.svg.push_str(&format!(
                        r##"<rect x="{x:.2}" y="{y:.2}" width="{w:.2}" height="{h:.2}" fill="{fill}" />"##,
                        x = x_left,
                        y = y_center - cell_h / 2.0,
                        w = cell_w,
                        h = cell_h,
                        fill = canvas.theme.background
                    ));
                }
            }
        }
    }

    for (col, label) in chart.labels.iter().enumerate() {
        let x = area.left + (col as f64 + 0.5) * cell_w;
        let y = area.bottom + 14.0;
        canvas.svg.push_str(&format!(
            r##"<text x="{x:.2}" y="{y:.2}" text-anchor="end" transform="rotate(-30 {x:.2} {y:.2})">{label}</text>"##,
            x = x,
            y = y,
            label = escape(label)
        ));
    }

    draw_colorbar(canvas, area);
}

fn draw_colorbar(canvas: &mut Canvas<'_>, area: PlotArea) {
    let steps = 20;
    let x = area.right + 24.0;
    let bar_w = 14.0;
    let step_h = area.height() / steps as f64;
    for i in 0..steps {
        // Top of the bar is +1.
        let t = 1.0 - 2.0 * (i as f64 + 0.5) / steps as f64;
        canvas.svg.push_str(&format!(
            r##"<rect x="{x:.2}" y="{y:.2}" width="{w:.2}" height="{h:.2}" fill="{fill}" />"##,
            x = x,
            y = area.top + i as f64 * step_h,
            w = bar_w,
            h = step_h + 0.5,
            fill = Palette::diverging(t)
        ));
    }
    for (value, y) in [
        (1.0, area.top),
        (0.0, area.top + area.height() / 2.0),
        (-1.0, area.bottom),
    ] {
        canvas.svg.push_str(&format!(
            r##"<text x="{x:.2}" y="{y:.2}" text-anchor="start" dy="3">{value:.1}</text>"##,
            x = x + bar_w + 4.0,
            y = y,
            value = value
        ));
    }
}

fn draw_histogram(canvas: &mut Canvas<'_>, chart: &HistogramChart) {
    let area = canvas.area();
    canvas.axis_labels(area, &chart.frame.x_label, &chart.frame.y_label);

    let values: Vec<f64> = chart.values.iter().copied().filter(|v| v.is_finite()).collect();
    let Some(hist) = Histogram::build(&values, chart.bins) else {
        return canvas.empty_note(area);
    };

    let max_count = hist.counts.iter().copied().max().unwrap_or(0) as f64;
    let y_extent = (0.0, (max_count * 1.08).max(1.0));
    let x_extent = (hist.min, hist.max);

    canvas.y_grid(area, y_extent);
    canvas.x_value_ticks(area, x_extent);

    for (i, count) in hist.counts.iter().enumerate() {
        if *count == 0 {
            continue;
        }
        let lo = hist.min + hist.width * i as f64;
        let x0 = area.x(lo, x_extent);
        let x1 = area.x(lo + hist.width, x_extent);
        let y = area.y(*count as f64, y_extent);
        canvas.svg.push_str(&format!(
            r##"<rect x="{x:.2}" y="{y:.2}" width="{w:.2}" height="{h:.2}" fill="{color}" fill-opacity="0.55" stroke="{bg}" stroke-width="0.5" />"##,
            x = x0,
            y = y,
            w = (x1 - x0).max(0.0),
            h = area.bottom - y,
            color = chart.color,
            bg = canvas.theme.background
        ));
    }

    if chart.kde {
        let scale = values.len() as f64 * hist.width;
        let points: Vec<(f64, f64)> = gaussian_kde(&values, hist.min, hist.max, 200)
            .into_iter()
            .map(|(x, density)| {
                let y = (density * scale).min(y_extent.1);
                (area.x(x, x_extent), area.y(y, y_extent))
            })
            .collect();
        canvas.polyline(&points, &chart.color, 2.0);
    }

    canvas.baseline(area, area.bottom);
}

fn draw_time_series(canvas: &mut Canvas<'_>, chart: &TimeSeriesChart) {
    let area = canvas.area();
    canvas.axis_labels(area, &chart.frame.x_label, &chart.frame.y_label);

    let first = chart.series.iter().filter_map(|s| s.dates.first()).min();
    let last = chart.series.iter().filter_map(|s| s.dates.last()).max();
    let values = chart.series.iter().flat_map(|s| s.values.iter().copied());
    let (first, last, extent) = match (first, last, extent(values, true)) {
        (Some(first), Some(last), Some(extent)) => (*first, *last, extent),
        _ => return canvas.empty_note(area),
    };

    canvas.y_grid(area, extent);

    let day_extent = (0.0, (last - first).num_days() as f64);
    let day_x = |date: NaiveDate| area.x((date - first).num_days() as f64, day_extent);

    add_time_axis(canvas, area, first, last, &day_x);

    let zero = area.y(0.0, extent);
    canvas.svg.push_str(&format!(
        r##"<line x1="{x1:.2}" y1="{y:.2}" x2="{x2:.2}" y2="{y:.2}" stroke="#bbbbbb" stroke-width="1" stroke-dasharray="{dash}" />"##,
        x1 = area.left,
        x2 = area.right,
        y = zero,
        dash = DASH
    ));

    for series in &chart.series {
        let points: Vec<(f64, f64)> = series
            .dates
            .iter()
            .zip(&series.values)
            .filter(|(_, v)| v.is_finite())
            .map(|(d, v)| (day_x(*d), area.y(*v, extent)))
            .collect();
        canvas.polyline(&points, &series.color, 1.5);
    }

    let entries: Vec<LegendEntry<'_>> = chart
        .series
        .iter()
        .map(|s| LegendEntry {
            label: &s.label,
            color: &s.color,
            marker: None,
            dash: false,
        })
        .collect();
    canvas.legend(area, "", &entries);
}

/// Month ticks between `first` and `last`, thinned so at most eight carry a label.
fn add_time_axis<F>(
    canvas: &mut Canvas<'_>,
    area: PlotArea,
    first: NaiveDate,
    last: NaiveDate,
    day_x: &F,
)
where
    F: Fn(NaiveDate) -> f64,
{
    canvas.baseline(area, area.bottom);

    let mut months = Vec::new();
    let mut cursor = NaiveDate::from_ymd_opt(first.year(), first.month(), 1);
    while let Some(month) = cursor {
        if month > last {
            break;
        }
        if month >= first {
            months.push(month);
        }
        cursor = month.checked_add_months(chrono::Months::new(1));
    }

    if months.is_empty() {
        months.push(first);
    }

    let step = months.len().div_ceil(8).max(1);
    for month in months.iter().step_by(step) {
        let x = day_x(*month);
        canvas.svg.push_str(&format!(
            r##"<line x1="{x:.2}" y1="{y1:.2}" x2="{x:.2}" y2="{y2:.2}" stroke="{color}" stroke-width="0.5" />"##,
            x = x,
            y1 = area.top,
            y2 = area.bottom,
            color = canvas.theme.grid_color
        ));
        canvas.svg.push_str(&format!(
            r##"<text x="{x:.2}" y="{y:.2}" text-anchor="middle">{label}</text>"##,
            x = x,
            y = area.bottom + 16.0,
            label = month.format("%Y-%m")
        ));
    }
}

struct Histogram {
    min: f64,
    max: f64,
    width: f64,
    counts: Vec<usize>,
}

impl Histogram {
    fn build(values: &[f64], bins: usize) -> Option<Self> {
        let (mut min, mut max) = values.iter().fold(
            (f64::INFINITY, f64::NEG_INFINITY),
            |(lo, hi), v| (lo.min(*v), hi.max(*v)),
        );
        if !min.is_finite() || !max.is_finite() {
            return None;
        }
        if min == max {
            let adjust = if min == 0.0 { 0.5 } else { min.abs() * 0.1 };
            min -= adjust;
            max += adjust;
        }

        let bins = bins.max(1);
        let width = (max - min) / bins as f64;
        let mut counts = vec![0usize; bins];
        for v in values {
            let idx = (((v - min) / width).floor() as usize).min(bins - 1);
            counts[idx] += 1;
        }

        Some(Self {
            min,
            max,
            width,
            counts,
        })
    }
}

/// Gaussian kernel density on `samples` evenly spaced points over `[lo, hi]`,
/// bandwidth by Scott's rule. Empty when the data has no spread.
fn gaussian_kde(values: &[f64], lo: f64, hi: f64, samples: usize) -> Vec<(f64, f64)> {
    let n = values.len();
    if n < 2 || samples < 2 {
        return Vec::new();
    }

    let mean = values.iter().sum::<f64>() / n as f64;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
    let bandwidth = var.sqrt() * (n as f64).powf(-0.2);
    if bandwidth.is_nan() || bandwidth <= 0.0 {
        return Vec::new();
    }

    let norm = 1.0 / (n as f64 * bandwidth * (2.0 * std::f64::consts::PI).sqrt());
    (0..samples)
        .map(|i| {
            let x = lo + (hi - lo) * i as f64 / (samples - 1) as f64;
            let density = values
                .iter()
                .map(|v| (-0.5 * ((x - v) / bandwidth).powi(2)).exp())
                .sum::<f64>()
                * norm;
            (x, density)
        })
        .collect()
}

/// Roughly `target` round-valued ticks covering `[min, max]`.
fn nice_ticks(min: f64, max: f64, target: usize) -> Vec<f64> {
    if !min.is_finite() || !max.is_finite() || max <= min {
        return Vec::new();
    }

    let raw = (max - min) / target.max(1) as f64;
    let magnitude = 10f64.powf(raw.log10().floor());
    let step = [1.0, 2.0, 2.5, 5.0, 10.0]
        .iter()
        .map(|m| m * magnitude)
        .find(|s| *s >= raw)
        .unwrap_or(10.0 * magnitude);

    let start = (min / step).ceil() as i64;
    let end = (max / step).floor() as i64;
    (start..=end)
        .map(|k| {
            let v = k as f64 * step;
            if v.abs() < step * 1e-9 {
                0.0
            } else {
                v
            }
        })
        .collect()
}

fn tick_decimals(ticks: &[f64]) -> usize {
    let step = match ticks {
        [a, b, ..] => (b - a).abs(),
        _ => return 2,
    };
    (0..=6)
        .find(|d: &usize| {
            let scaled = step * 10f64.powi(*d as i32);
            (scaled - scaled.round()).abs() < 1e-6
        })
        .unwrap_or(6)
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn frame(title: &str) -> Frame {
        Frame {
            title: title.to_string(),
            x_label: "Interval".to_string(),
            y_label: "Value".to_string(),
            size: FigureSize::new(12.0, 6.0),
        }
    }

    fn bar_chart(values: Vec<Option<f64>>) -> Figure {
        Figure::Bars(CategoryChart {
            frame: frame("VaR & ES <95%>"),
            legend_title: "Asset".to_string(),
            categories: vec!["1d".to_string(), "1wk".to_string()],
            series: vec![CategorySeries {
                label: "BTC".to_string(),
                color: Palette::Set2.color(0, 1),
                marker: None,
                values,
            }],
        })
    }

    #[test]
    fn svg_is_sized_from_theme_and_escaped() {
        let svg = SvgRenderer.render(&bar_chart(vec![Some(0.1), Some(-0.2)]), &Theme::default());

        assert!(svg.starts_with("<svg"));
        assert!(svg.ends_with("</svg>"));
        assert!(svg.contains(r#"width="960" height="480""#));
        assert!(svg.contains("VaR &amp; ES &lt;95%&gt;"));
        // background + two bars
        assert_eq!(svg.matches("<rect").count(), 3);
    }

    #[test]
    fn bars_skip_missing_cells() {
        let svg = SvgRenderer.render(&bar_chart(vec![None, Some(0.3)]), &Theme::default());
        // background + one bar
        assert_eq!(svg.matches("<rect").count(), 2);
    }

    #[test]
    fn empty_figures_render_a_frame() {
        let figure = Figure::TimeSeries(TimeSeriesChart {
            frame: frame("Cumulative Returns Over Time"),
            series: Vec::new(),
        });
        let svg = SvgRenderer.render(&figure, &Theme::default());
        assert!(svg.contains("no data"));
        assert!(svg.contains("Cumulative Returns Over Time"));
    }

    #[test]
    fn heatmap_annotates_cells_and_blanks_missing() {
        let figure = Figure::Heatmap(HeatmapChart {
            frame: frame("Correlation"),
            labels: vec!["A".to_string(), "B".to_string()],
            cells: vec![vec![Some(1.0), Some(-0.25)], vec![Some(-0.25), None]],
        });
        let svg = SvgRenderer.render(&figure, &Theme::default());

        assert!(svg.contains(">1.00<"));
        assert_eq!(svg.matches(">-0.25<").count(), 2);
    }

    #[test]
    fn histogram_counts_every_value() {
        let values = [0.0, 0.1, 0.1, 0.2, 0.9, 1.0];
        let hist = Histogram::build(&values, 5).unwrap();
        assert_eq!(hist.counts.iter().sum::<usize>(), values.len());
        assert_eq!(hist.counts, vec![3, 1, 0, 0, 2]);
    }

    #[test]
    fn histogram_of_constant_values_has_spread() {
        let hist = Histogram::build(&[2.0, 2.0, 2.0], 10).unwrap();
        assert!(hist.max > hist.min);
        assert_eq!(hist.counts.iter().sum::<usize>(), 3);
    }

    #[test]
    fn kde_integrates_to_about_one() {
        let values: Vec<f64> = (0..200).map(|i| ((i * 37) % 101) as f64 / 100.0 - 0.5).collect();
        let curve = gaussian_kde(&values, -2.0, 2.0, 801);
        let dx = 4.0 / 800.0;
        let area: f64 = curve.iter().map(|(_, d)| d * dx).sum();
        assert_approx_eq!(area, 1.0, 0.01);
        assert!(gaussian_kde(&[1.0, 1.0, 1.0], 0.0, 2.0, 10).is_empty());
    }

    #[test]
    fn ticks_are_round_and_inside_range() {
        let ticks = nice_ticks(-0.034, 0.12, 6);
        assert!(!ticks.is_empty());
        assert!(ticks.iter().all(|t| *t >= -0.034 && *t <= 0.12));
        assert!(ticks.contains(&0.0));
        assert!(nice_ticks(1.0, 1.0, 6).is_empty());
        assert_eq!(tick_decimals(&[0.0, 0.05, 0.1]), 2);
        assert_eq!(tick_decimals(&[-0.025, 0.0]), 3);
        assert_eq!(tick_decimals(&[0.0, 25.0, 50.0]), 0);
    }

    #[test]
    fn palettes_cycle_and_diverge() {
        assert_eq!(Palette::Tab10.color(0, 3), Palette::Tab10.color(10, 3));
        assert_eq!(Palette::diverging(-1.0), "rgb(59,76,192)");
        assert_eq!(Palette::diverging(0.0), "rgb(221,221,221)");
        assert_eq!(Palette::diverging(1.0), "rgb(180,4,38)");
        assert_eq!(Palette::Coolwarm.color(1, 2), Palette::diverging(1.0));
    }
}

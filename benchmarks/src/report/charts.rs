//! SVG charts rendered with plotters

use std::path::Path;

use plotters::prelude::*;
use tracing::debug;

use crate::dataset::Table;
use crate::engine::metric_columns;
use crate::error::{HarnessError, Result};
use crate::orchestrator::{BenchmarkSummary, SummaryRow};

pub const COMPARISON_SVG: &str = "comparison.svg";

const PANEL_COLORS: [RGBColor; 3] = [RGBColor(31, 119, 180), RGBColor(255, 127, 14), RGBColor(44, 160, 44)];

fn chart_err<E: std::fmt::Display>(e: E) -> HarnessError {
    HarnessError::Chart(e.to_string())
}

/// File name of the time-series chart for one partition
pub fn timeseries_file_name(key: &str) -> String {
    let safe: String = key
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    format!("timeseries_{}.svg", safe)
}

/// Three bar panels (time, CPU, memory), one bar per configuration.
/// Undefined averages draw no bar.
pub fn render_comparison<P: AsRef<Path>>(summary: &BenchmarkSummary, path: P) -> Result<()> {
    if summary.rows.is_empty() {
        return Err(HarnessError::Chart("summary has no rows".to_string()));
    }

    let labels: Vec<String> = summary.rows.iter().map(short_label).collect();
    let panels: [(&str, Vec<Option<f64>>); 3] = [
        (
            "Execution time (s)",
            summary.rows.iter().map(|r| Some(r.stats.total_elapsed_seconds)).collect(),
        ),
        (
            "Average CPU (%)",
            summary.rows.iter().map(|r| r.stats.avg_cpu_percent).collect(),
        ),
        (
            "Average memory (MB)",
            summary.rows.iter().map(|r| r.stats.avg_memory_mb).collect(),
        ),
    ];

    let root = SVGBackend::new(path.as_ref(), (1500, 500)).into_drawing_area();
    root.fill(&WHITE).map_err(chart_err)?;
    let areas = root.split_evenly((1, 3));

    for ((area, (title, values)), color) in areas.iter().zip(&panels).zip(PANEL_COLORS) {
        let top = values.iter().flatten().copied().fold(0.0, f64::max);
        let top = if top > 0.0 { top * 1.15 } else { 1.0 };
        let n = values.len() as f64;

        let mut chart = ChartBuilder::on(area)
            .caption(*title, ("sans-serif", 20))
            .margin(15)
            .x_label_area_size(60)
            .y_label_area_size(60)
            .build_cartesian_2d(0f64..n, 0f64..top)
            .map_err(chart_err)?;

        chart
            .configure_mesh()
            .disable_x_mesh()
            .x_labels(values.len() * 2 + 1)
            .x_label_formatter(&|x| {
                let slot = x.floor();
                if (x - slot - 0.5).abs() < 1e-6 {
                    labels.get(slot as usize).cloned().unwrap_or_default()
                } else {
                    String::new()
                }
            })
            .draw()
            .map_err(chart_err)?;

        chart
            .draw_series(values.iter().enumerate().filter_map(|(i, v)| {
                v.map(|v| {
                    let x = i as f64;
                    Rectangle::new([(x + 0.15, 0.0), (x + 0.85, v)], color.filled())
                })
            }))
            .map_err(chart_err)?;
    }

    root.present().map_err(chart_err)?;
    debug!(path = %path.as_ref().display(), "comparison chart written");
    Ok(())
}

fn short_label(row: &SummaryRow) -> String {
    let strategy = row.configuration.strategy.as_str().trim_end_matches("-parallel");
    format!("{}/{}", strategy, row.configuration.backend)
}

/// Price with its moving average, rolling volatility of returns, and
/// rolling Sharpe ratio for one partition, stacked vertically.
pub fn render_timeseries<P: AsRef<Path>>(table: &Table, column: &str, window: usize, path: P) -> Result<()> {
    if table.row_count() == 0 {
        return Err(HarnessError::Chart(format!("partition `{}` has no rows", table.key)));
    }

    let [ma, _, _, _, rets_std, sharpe] = metric_columns(column, window);
    let series = |name: &str| {
        table
            .column(name)
            .ok_or_else(|| HarnessError::Chart(format!("column `{}` not in table for `{}`", name, table.key)))
    };
    let price = series(column)?;
    let panels: [(String, Vec<(&str, &[Option<f64>])>); 3] = [
        (
            format!("{} {}", table.key, column),
            vec![(column, price), (ma.as_str(), series(&ma)?)],
        ),
        (
            format!("Rolling volatility ({})", window),
            vec![(rets_std.as_str(), series(&rets_std)?)],
        ),
        (
            format!("Rolling Sharpe ({})", window),
            vec![(sharpe.as_str(), series(&sharpe)?)],
        ),
    ];

    let timestamps = &table.timestamps;
    let n = timestamps.len();
    let root = SVGBackend::new(path.as_ref(), (1200, 900)).into_drawing_area();
    root.fill(&WHITE).map_err(chart_err)?;
    let areas = root.split_evenly((3, 1));

    for (area, (title, lines)) in areas.iter().zip(&panels) {
        let (lo, hi) = bounds(lines.iter().flat_map(|(_, v)| v.iter().flatten().copied()));

        let mut chart = ChartBuilder::on(area)
            .caption(title.as_str(), ("sans-serif", 18))
            .margin(10)
            .x_label_area_size(35)
            .y_label_area_size(70)
            .build_cartesian_2d(0f64..(n.max(2) - 1) as f64, lo..hi)
            .map_err(chart_err)?;

        chart
            .configure_mesh()
            .x_labels(6)
            .x_label_formatter(&|x| {
                timestamps
                    .get(x.round() as usize)
                    .map(|t| t.format("%m-%d %H:%M").to_string())
                    .unwrap_or_default()
            })
            .draw()
            .map_err(chart_err)?;

        for ((name, values), color) in lines.iter().zip(PANEL_COLORS) {
            chart
                .draw_series(LineSeries::new(
                    values
                        .iter()
                        .enumerate()
                        .filter_map(|(i, v)| v.map(|v| (i as f64, v))),
                    &color,
                ))
                .map_err(chart_err)?
                .label(*name)
                .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
        }

        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()
            .map_err(chart_err)?;
    }

    root.present().map_err(chart_err)?;
    debug!(key = %table.key, path = %path.as_ref().display(), "time-series chart written");
    Ok(())
}

fn bounds(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let (lo, hi) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if !lo.is_finite() {
        return (0.0, 1.0);
    }
    let pad = ((hi - lo) * 0.05).max(1e-9);
    (lo - pad, hi + pad)
}

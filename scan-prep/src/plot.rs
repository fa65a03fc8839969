//! Violin plots of per-cell annotations

use crate::stats::{gaussian_kde, median};
use anyhow::{format_err, Error};
use log::info;
use plotters::prelude::*;
use scan_types::AnnMatrix;
use std::path::Path;

const PANEL_WIDTH: u32 = 320;
const HEIGHT: u32 = 400;
const GRID_POINTS: usize = 200;
/// Half-width of the widest part of a violin, in x-axis units
const HALF_WIDTH: f64 = 0.4;

/// Outline of one violin: the density mirrored around x = 0.
fn violin_outline(values: &[f64], y_min: f64, y_max: f64) -> Vec<(f64, f64)> {
    let step = (y_max - y_min) / (GRID_POINTS - 1) as f64;
    let grid: Vec<f64> = (0..GRID_POINTS).map(|i| y_min + i as f64 * step).collect();
    let density = gaussian_kde(values, &grid);
    let peak = density.iter().cloned().fold(0.0, f64::max);
    let width = |d: f64| if peak > 0.0 { d / peak * HALF_WIDTH } else { 0.0 };

    let mut outline: Vec<(f64, f64)> = grid.iter().zip(&density).map(|(&y, &d)| (width(d), y)).collect();
    outline.extend(grid.iter().zip(&density).rev().map(|(&y, &d)| (-width(d), y)));
    outline
}

/// Draw one violin per obs column in `keys`, side by side, and save them as an SVG at `path`.
/// Non-finite values are left out.
pub fn violin_qc(adata: &AnnMatrix, keys: &[&str], path: &Path) -> Result<(), Error> {
    let mut series = Vec::with_capacity(keys.len());
    for key in keys {
        let values: Vec<f64> = adata
            .obs()
            .numeric(key)?
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .collect();
        series.push((*key, values));
    }

    let root = SVGBackend::new(path, (PANEL_WIDTH * keys.len().max(1) as u32, HEIGHT)).into_drawing_area();
    root.fill(&WHITE)?;
    let areas = root.split_evenly((1, keys.len().max(1)));

    for (area, (key, values)) in areas.iter().zip(&series) {
        let lo = values.iter().cloned().fold(f64::INFINITY, f64::min);
        let hi = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let (lo, hi) = match (lo.is_finite(), hi > lo) {
            (true, true) => {
                let pad = 0.05 * (hi - lo);
                (lo - pad, hi + pad)
            }
            (true, false) => (lo - 0.5, hi + 0.5),
            (false, _) => (0.0, 1.0),
        };

        let mut chart = ChartBuilder::on(area)
            .caption(*key, ("sans-serif", 18))
            .margin(10)
            .x_label_area_size(10)
            .y_label_area_size(50)
            .build_cartesian_2d(-0.5f64..0.5f64, lo..hi)?;
        chart
            .configure_mesh()
            .disable_x_mesh()
            .disable_x_axis()
            .y_label_formatter(&|y| format!("{:.3}", y))
            .draw()?;

        if values.is_empty() {
            continue;
        }
        let outline = violin_outline(values, lo, hi);
        chart.draw_series(std::iter::once(Polygon::new(outline.clone(), BLUE.mix(0.4))))?;
        chart.draw_series(std::iter::once(PathElement::new(outline, BLACK.stroke_width(1))))?;
        if let Some(m) = median(values) {
            chart.draw_series(std::iter::once(PathElement::new(
                vec![(-HALF_WIDTH / 2.0, m), (HALF_WIDTH / 2.0, m)],
                BLACK.stroke_width(2),
            )))?;
        }
    }

    root.present()
        .map_err(|e| format_err!("writing {}: {}", path.display(), e))?;
    info!("wrote violin plot of {:?} to {}", keys, path.display());
    Ok(())
}

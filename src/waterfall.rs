//! # Waterfall Explanation Plots
//!
//! Renders one patient's additive risk decomposition as a chain of chevron
//! shapes walking from the baseline expectation to the final predicted
//! probability. Positive contributions push right in crimson, negative ones
//! push left in blue, and each row is labeled with the patient's raw value
//! for that feature.
//!
//! Geometry is computed separately from drawing: [`layout_rows`] produces
//! the shape chain as plain data, and [`render_waterfall`] puts it on an SVG
//! canvas. Rendering has no internal recovery; any failure is fatal for the
//! patient being drawn.

use ndarray::ArrayView1;
use plotters::prelude::*;
use plotters::series::DashedLineSeries;
use plotters::style::text_anchor::{HPos, Pos, VPos};
use std::path::{Path, PathBuf};
use thiserror::Error;

const IMAGE_SIZE: (u32, u32) = (800, 600);
const X_MIN: f64 = 0.0;
const X_MAX: f64 = 1.0;
/// Vertical extent of one chevron row.
const ROW_HEIGHT: f64 = 0.05;
/// Vertical gap between consecutive rows.
const ROW_GAP: f64 = 0.01;
/// Padding added above and below the row stack.
const Y_MARGIN: f64 = 0.02;
/// Horizontal depth of the arrowhead notch.
const ARROW_NOTCH: f64 = 0.01;

const CRIMSON: RGBColor = RGBColor(220, 20, 60);
const DODGER_BLUE: RGBColor = RGBColor(30, 144, 255);
const WHITESMOKE: RGBColor = RGBColor(245, 245, 245);
const SILVER: RGBColor = RGBColor(192, 192, 192);
const LIGHT_GRAY: RGBColor = RGBColor(211, 211, 211);
const DIM_GRAY: RGBColor = RGBColor(105, 105, 105);

const X_AXIS_LABEL: &str = "16.8-year mortality probability";

#[derive(Error, Debug)]
pub enum WaterfallError {
    #[error("IO error preparing plot output: {0}")]
    Io(#[from] std::io::Error),
    #[error("Drawing '{path}' failed: {message}")]
    Draw { path: PathBuf, message: String },
    #[error(
        "Feature '{feature}' has a contribution exactly at the arrowhead notch width; its shape is undefined."
    )]
    DegenerateShape { feature: String },
    #[error("Cannot render a waterfall for an empty feature list.")]
    NoFeatures,
    #[error(
        "Feature names, raw values, and contributions must have equal length (got {names}, {raw}, {contributions})."
    )]
    LengthMismatch {
        names: usize,
        raw: usize,
        contributions: usize,
    },
}

/// One chevron row of the waterfall, in data coordinates.
#[derive(Debug, Clone)]
pub(crate) struct RowShape {
    /// Y-axis label: `<raw value> = <feature name>`.
    pub label: String,
    /// Signed value annotation drawn at the arrow tip.
    pub value_text: String,
    /// Polygon outline: 5 vertices for a full chevron, 3 for the collapsed
    /// triangle of a sub-notch contribution.
    pub vertices: Vec<(f64, f64)>,
    pub positive: bool,
    /// Vertical center of the row (arrow tip height).
    pub y_center: f64,
    /// Top edge of the row.
    pub y_top: f64,
    /// Cursor position after this contribution is applied.
    pub tip_x: f64,
}

/// The full shape chain for one patient.
#[derive(Debug, Clone)]
pub(crate) struct WaterfallLayout {
    pub rows: Vec<RowShape>,
    pub base_value: f64,
    /// Cursor position after all contributions: the predicted probability.
    pub final_x: f64,
    /// Top edge of the highest row.
    pub y_max: f64,
}

/// Builds the chevron chain: features sorted by absolute contribution
/// (ascending), cursor starting at the baseline, one row per feature.
pub(crate) fn layout_rows(
    features: &[String],
    raw_values: ArrayView1<f64>,
    contributions: ArrayView1<f64>,
    base_value: f64,
) -> Result<WaterfallLayout, WaterfallError> {
    if features.is_empty() {
        return Err(WaterfallError::NoFeatures);
    }
    if features.len() != raw_values.len() || features.len() != contributions.len() {
        return Err(WaterfallError::LengthMismatch {
            names: features.len(),
            raw: raw_values.len(),
            contributions: contributions.len(),
        });
    }

    let mut order: Vec<usize> = (0..features.len()).collect();
    order.sort_by(|&a, &b| contributions[a].abs().total_cmp(&contributions[b].abs()));

    let mut rows = Vec::with_capacity(order.len());
    let mut cursor = base_value;
    let mut y_start = 0.0;
    for &index in &order {
        let length = contributions[index];
        let (positive, notch) = if length > 0.0 {
            (true, ARROW_NOTCH)
        } else {
            (false, -ARROW_NOTCH)
        };

        let (x1, y1) = (cursor, y_start);
        let (x2, y2) = (cursor + length - notch, y_start + ROW_HEIGHT);
        let (x3, y3) = (cursor + length, y_start + ROW_HEIGHT / 2.0);

        // Shape selection. Contributions deeper than the notch get the full
        // five-vertex chevron; the two residual branches intentionally
        // produce the identical collapsed triangle, and an exact tie on the
        // notch width matches neither.
        let vertices = if length.abs() > notch.abs() {
            vec![(x1, y1), (x1, y2), (x2, y2), (x3, y3), (x2, y1)]
        } else if length < notch {
            vec![(x1, y1), (x1, y2), (x3, y3)]
        } else if length > notch {
            vec![(x1, y1), (x1, y2), (x3, y3)]
        } else {
            return Err(WaterfallError::DegenerateShape {
                feature: features[index].clone(),
            });
        };

        let value_text = if positive {
            format!("+{length:.3}")
        } else {
            format!("{length:.3}")
        };

        rows.push(RowShape {
            label: format!("{:.3} = {}", raw_values[index], features[index]),
            value_text,
            vertices,
            positive,
            y_center: y3,
            y_top: y2,
            tip_x: x3,
        });

        cursor += length;
        y_start += ROW_HEIGHT + ROW_GAP;
    }

    let y_max = rows.last().map(|row| row.y_top).unwrap_or(ROW_HEIGHT);
    Ok(WaterfallLayout {
        rows,
        base_value,
        final_x: cursor,
        y_max,
    })
}

/// Renders one patient's waterfall to `<output_dir>/<patient_id>.svg`,
/// creating the directory if needed. Returns the written path.
pub fn render_waterfall(
    output_dir: &Path,
    patient_id: &str,
    features: &[String],
    raw_values: ArrayView1<f64>,
    contributions: ArrayView1<f64>,
    base_value: f64,
) -> Result<PathBuf, WaterfallError> {
    let layout = layout_rows(features, raw_values, contributions, base_value)?;

    std::fs::create_dir_all(output_dir)?;
    let path = output_dir.join(format!("{patient_id}.svg"));
    draw(&path, &layout).map_err(|message| WaterfallError::Draw {
        path: path.clone(),
        message,
    })?;
    Ok(path)
}

/// The drawing pass proper. Plotters' error type is generic over the
/// backend, so failures are carried as rendered messages.
fn draw(path: &Path, layout: &WaterfallLayout) -> Result<(), String> {
    let stringify = |e: &dyn std::fmt::Display| e.to_string();

    let root = SVGBackend::new(path, IMAGE_SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(|e| stringify(&e))?;

    let y_lim = (-Y_MARGIN, layout.y_max + Y_MARGIN);
    let mut chart = ChartBuilder::on(&root)
        .margin(12)
        .x_label_area_size(48)
        .y_label_area_size(220)
        .build_cartesian_2d(X_MIN..X_MAX, y_lim.0..y_lim.1)
        .map_err(|e| stringify(&e))?;

    chart
        .configure_mesh()
        .disable_mesh()
        .y_labels(0)
        .x_labels(11)
        .x_label_formatter(&|x| format!("{x:.1}"))
        .x_desc(X_AXIS_LABEL)
        .axis_desc_style(("sans-serif", 20))
        .x_label_style(("sans-serif", 16))
        .draw()
        .map_err(|e| stringify(&e))?;

    let value_font = ("sans-serif", 14).into_font();
    let label_font = ("sans-serif", 16).into_font();

    for row in &layout.rows {
        // Faint horizontal guide across the row center, behind the shape.
        chart
            .draw_series(std::iter::once(PathElement::new(
                vec![(X_MIN, row.y_center), (X_MAX, row.y_center)],
                WHITESMOKE.stroke_width(1),
            )))
            .map_err(|e| stringify(&e))?;

        let fill = if row.positive { CRIMSON } else { DODGER_BLUE };
        chart
            .draw_series(std::iter::once(Polygon::new(
                row.vertices.clone(),
                fill.filled(),
            )))
            .map_err(|e| stringify(&e))?;

        // Value annotation at the arrow tip: negative values sit to the
        // left of the tip, positive ones to the right.
        let anchor = if row.positive {
            Pos::new(HPos::Left, VPos::Center)
        } else {
            Pos::new(HPos::Right, VPos::Center)
        };
        chart
            .draw_series(std::iter::once(Text::new(
                row.value_text.clone(),
                (row.tip_x, row.y_center),
                value_font.clone().color(&fill).pos(anchor),
            )))
            .map_err(|e| stringify(&e))?;

        // Row label in the reserved axis area, right-aligned to the plot.
        chart
            .draw_series(std::iter::once(Text::new(
                row.label.clone(),
                (X_MIN - 0.012, row.y_center),
                label_font
                    .clone()
                    .color(&BLACK)
                    .pos(Pos::new(HPos::Right, VPos::Center)),
            )))
            .map_err(|e| stringify(&e))?;

        // Dotted riser connecting this tip to the next row.
        chart
            .draw_series(DashedLineSeries::new(
                vec![(row.tip_x, row.y_center), (row.tip_x, row.y_top + ROW_GAP)],
                2,
                3,
                SILVER.stroke_width(1),
            ))
            .map_err(|e| stringify(&e))?;
    }

    // Baseline reference line and annotation.
    chart
        .draw_series(DashedLineSeries::new(
            vec![(layout.base_value, y_lim.0), (layout.base_value, y_lim.1)],
            8,
            6,
            LIGHT_GRAY.stroke_width(1),
        ))
        .map_err(|e| stringify(&e))?;
    chart
        .draw_series(std::iter::once(Text::new(
            format!("E[f(X)] = {:.3}", layout.base_value),
            (layout.base_value + 0.002, -0.015),
            value_font.clone().color(&DIM_GRAY),
        )))
        .map_err(|e| stringify(&e))?;

    // Final cumulative value: riser from the axis and annotation on top.
    chart
        .draw_series(DashedLineSeries::new(
            vec![
                (layout.final_x, y_lim.0),
                (layout.final_x, layout.rows.last().map(|r| r.y_center).unwrap_or(0.0)),
            ],
            2,
            3,
            SILVER.stroke_width(1),
        ))
        .map_err(|e| stringify(&e))?;
    chart
        .draw_series(std::iter::once(Text::new(
            format!("f(x) = {:.3}", layout.final_x),
            (layout.final_x, layout.y_max + Y_MARGIN),
            value_font.clone().color(&BLACK).pos(Pos::new(HPos::Left, VPos::Top)),
        )))
        .map_err(|e| stringify(&e))?;

    root.present().map_err(|e| stringify(&e))?;
    Ok(())
}

//! SVG bar and line charts.

use crate::error::{EtlError, EtlResult};
use crate::plan::{TOTAL_QUANTITY, TOTAL_SALES};
use crate::record::{display_key, Record, ID_FIELD};
use plotters::coord::ranged1d::SegmentValue;
use plotters::drawing::DrawingAreaErrorKind;
use plotters::prelude::*;
use plotters::style::FontTransform;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartKind {
    Bar,
    /// Line with a marker on every point
    Line,
}

/// What to draw for one gold collection.
#[derive(Debug, Clone)]
pub struct ChartSpec {
    pub kind: ChartKind,
    pub title: String,
    pub x_label: &'static str,
    pub y_label: &'static str,
    /// Numeric field plotted on the y axis; `_id` is always the x axis
    pub value_field: &'static str,
    pub file_name: &'static str,
}

impl ChartSpec {
    pub fn top_countries(top_n: usize) -> Self {
        Self {
            kind: ChartKind::Bar,
            title: format!("Top {} Countries by Sales", top_n),
            x_label: "Country",
            y_label: "Total Sales",
            value_field: TOTAL_SALES,
            file_name: "top_countries.svg",
        }
    }

    pub fn top_products(top_n: usize) -> Self {
        Self {
            kind: ChartKind::Bar,
            title: format!("Top {} Products by Quantity Sold", top_n),
            x_label: "Product",
            y_label: "Total Quantity Sold",
            value_field: TOTAL_QUANTITY,
            file_name: "top_products.svg",
        }
    }

    pub fn sales_by_month() -> Self {
        Self {
            kind: ChartKind::Line,
            title: "Sales Trend by Month".to_string(),
            x_label: "Month",
            y_label: "Total Sales",
            value_field: TOTAL_SALES,
            file_name: "sales_by_month.svg",
        }
    }
}

/// Render `records` (already in display order) as an SVG document.
///
/// An empty record list renders axes and title only.
pub fn render_svg(spec: &ChartSpec, records: &[Record], size: (u32, u32)) -> EtlResult<String> {
    let labels: Vec<String> = records
        .iter()
        .map(|r| display_key(r.get(ID_FIELD).unwrap_or(&serde_json::Value::Null)))
        .collect();
    let values: Vec<f64> = records
        .iter()
        .map(|r| r.get(spec.value_field).and_then(|v| v.as_f64()).unwrap_or(0.0))
        .collect();

    let mut svg = String::new();
    {
        let root = SVGBackend::with_string(&mut svg, size).into_drawing_area();
        let drawn = match spec.kind {
            ChartKind::Bar => draw_bars(&root, spec, &labels, &values),
            ChartKind::Line => draw_line(&root, spec, &labels, &values),
        };
        drawn
            .and_then(|_| root.present())
            .map_err(|e| EtlError::Render {
                chart: spec.title.clone(),
                reason: e.to_string(),
            })?;
    }
    Ok(svg)
}

type DrawResult = Result<(), DrawingAreaErrorKind<std::io::Error>>;

/// y range covering zero and every value, with headroom.
fn value_range(values: &[f64]) -> std::ops::Range<f64> {
    let min = values.iter().copied().fold(0.0_f64, f64::min);
    let max = values.iter().copied().fold(0.0_f64, f64::max);
    if max - min <= f64::EPSILON {
        return min..min + 1.0;
    }
    let pad = (max - min) * 0.1;
    let low = if min < 0.0 { min - pad } else { min };
    low..max + pad
}

fn draw_bars(
    root: &DrawingArea<SVGBackend<'_>, plotters::coord::Shift>,
    spec: &ChartSpec,
    labels: &[String],
    values: &[f64],
) -> DrawResult {
    root.fill(&WHITE)?;

    let slots = values.len().max(1);
    let mut chart = ChartBuilder::on(root)
        .caption(&spec.title, ("sans-serif", 24))
        .margin(20)
        .x_label_area_size(140)
        .y_label_area_size(90)
        .build_cartesian_2d((0..slots).into_segmented(), value_range(values))?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_desc(spec.x_label)
        .y_desc(spec.y_label)
        .x_labels(slots)
        .x_label_style(("sans-serif", 11).into_font().transform(FontTransform::Rotate90))
        .x_label_formatter(&|v: &SegmentValue<usize>| match v {
            SegmentValue::CenterOf(i) | SegmentValue::Exact(i) => labels.get(*i).cloned().unwrap_or_default(),
            SegmentValue::Last => String::new(),
        })
        .draw()?;

    chart.draw_series(values.iter().enumerate().map(|(i, v)| {
        let mut bar = Rectangle::new(
            [(SegmentValue::Exact(i), 0.0), (SegmentValue::Exact(i + 1), *v)],
            BLUE.mix(0.8).filled(),
        );
        bar.set_margin(0, 0, 6, 6);
        bar
    }))?;

    Ok(())
}

fn draw_line(
    root: &DrawingArea<SVGBackend<'_>, plotters::coord::Shift>,
    spec: &ChartSpec,
    labels: &[String],
    values: &[f64],
) -> DrawResult {
    root.fill(&WHITE)?;

    let x_max = values.len().saturating_sub(1).max(1);
    let mut chart = ChartBuilder::on(root)
        .caption(&spec.title, ("sans-serif", 24))
        .margin(20)
        .x_label_area_size(90)
        .y_label_area_size(90)
        .build_cartesian_2d(0usize..x_max, value_range(values))?;

    chart
        .configure_mesh()
        .x_desc(spec.x_label)
        .y_desc(spec.y_label)
        .x_labels(labels.len().max(1))
        .x_label_style(("sans-serif", 11).into_font().transform(FontTransform::Rotate90))
        .x_label_formatter(&|i: &usize| labels.get(*i).cloned().unwrap_or_default())
        .draw()?;

    let points: Vec<(usize, f64)> = values.iter().copied().enumerate().collect();
    chart.draw_series(LineSeries::new(points.iter().copied(), &BLUE))?;
    chart.draw_series(points.iter().map(|&(x, y)| Circle::new((x, y), 4, BLUE.filled())))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rec(value: serde_json::Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_bar_chart_contains_labels() {
        let records = vec![
            rec(json!({"_id": "Spain", "total_sales": 10.0})),
            rec(json!({"_id": "France", "total_sales": 7.0})),
        ];
        let svg = render_svg(&ChartSpec::top_countries(10), &records, (800, 500)).unwrap();

        assert!(svg.contains("<svg"));
        assert!(svg.contains("Top 10 Countries by Sales"));
        assert!(svg.contains("Spain"));
        assert!(svg.contains("France"));
    }

    #[test]
    fn test_line_chart_contains_months() {
        let records = vec![
            rec(json!({"_id": "2010-12", "total_sales": 6.0})),
            rec(json!({"_id": "2011-01", "total_sales": 2.0})),
            rec(json!({"_id": "2011-02", "total_sales": -1.5})),
        ];
        let svg = render_svg(&ChartSpec::sales_by_month(), &records, (800, 500)).unwrap();
        assert!(svg.contains("Sales Trend by Month"));
        assert!(svg.contains("2011-01"));
        assert!(svg.contains("<circle"));
    }

    #[test]
    fn test_empty_results_render_empty_chart() {
        for spec in [ChartSpec::top_products(10), ChartSpec::sales_by_month()] {
            let svg = render_svg(&spec, &[], (640, 480)).unwrap();
            assert!(svg.contains(&spec.title));
        }
    }

    #[test]
    fn test_value_range() {
        assert_eq!(value_range(&[]), 0.0..1.0);
        let r = value_range(&[10.0, 5.0]);
        assert_eq!(r.start, 0.0);
        assert!(r.end > 10.0);
        assert!(value_range(&[-4.0, 2.0]).start < -4.0);
    }
}

use std::io::Write;
use std::panic;

use anyhow::{anyhow, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use clap::ValueEnum;
use odometer::MileagePoint;
use plotters::prelude::*;

const CSV_HEADER: [&str; 2] = ["time", "mileage_in_past_month"];
const CHART_SIZE: (u32, u32) = (1800, 900);

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// `time,mileage_in_past_month` rows
    Csv,
    /// Standalone SVG line chart
    Chart,
}

impl OutputFormat {
    pub fn sink(self) -> Box<dyn MileageSink> {
        match self {
            OutputFormat::Csv => Box::new(CsvSink),
            OutputFormat::Chart => Box::new(ChartSink::default()),
        }
    }
}

/// Renders a finished mileage series.
pub trait MileageSink {
    fn write(&self, points: &[MileagePoint], out: &mut dyn Write) -> Result<()>;
}

pub struct CsvSink;

impl MileageSink for CsvSink {
    fn write(&self, points: &[MileagePoint], out: &mut dyn Write) -> Result<()> {
        let mut writer = csv::Writer::from_writer(out);
        writer.write_record(CSV_HEADER)?;
        for point in points {
            writer.write_record([
                point.time.to_rfc3339_opts(SecondsFormat::Secs, true),
                format!("{:.6}", point.miles),
            ])?;
        }
        writer.flush()?;
        Ok(())
    }
}

pub struct ChartSink {
    size: (u32, u32),
}

impl Default for ChartSink {
    fn default() -> Self {
        Self { size: CHART_SIZE }
    }
}

impl MileageSink for ChartSink {
    fn write(&self, points: &[MileagePoint], out: &mut dyn Write) -> Result<()> {
        let svg = render_chart_guard(points, self.size)?;
        out.write_all(svg.as_bytes())?;
        out.write_all(b"\n")?;
        out.flush()?;
        Ok(())
    }
}

fn render_chart_guard(points: &[MileagePoint], size: (u32, u32)) -> Result<String> {
    panic::catch_unwind(panic::AssertUnwindSafe(|| render_svg(points, size)))
        .map_err(|_| anyhow!("plotting backend panicked"))?
}

fn render_svg(points: &[MileagePoint], size: (u32, u32)) -> Result<String> {
    let xs: Vec<f64> = points.iter().map(|p| p.time.timestamp() as f64).collect();
    let x_min = xs.first().copied().unwrap_or(0.0);
    let x_max = xs.last().copied().unwrap_or(0.0).max(x_min + 1.0);
    let y_max = points
        .iter()
        .map(|p| p.miles)
        .fold(0.0_f64, f64::max)
        .max(1.0)
        * 1.05;

    let mut svg = String::new();
    {
        let root = SVGBackend::with_string(&mut svg, size).into_drawing_area();
        root.fill(&WHITE)?;
        let mut chart = ChartBuilder::on(&root)
            .margin(25)
            .caption("Mileage", ("sans-serif", 28))
            .set_label_area_size(LabelAreaPosition::Left, 60)
            .set_label_area_size(LabelAreaPosition::Bottom, 50)
            .build_cartesian_2d(x_min..x_max, 0.0..y_max)?;

        chart
            .configure_mesh()
            .light_line_style(&TRANSPARENT)
            .x_labels(12)
            .x_label_formatter(&|v| format_date(*v))
            .y_label_formatter(&|v| format!("{:.0}", v))
            .y_desc("miles")
            .label_style(("sans-serif", 18).into_font().color(&BLACK.mix(0.85)))
            .draw()?;

        let line_color = RGBColor(200, 0, 100);
        chart
            .draw_series(LineSeries::new(
                xs.iter().copied().zip(points.iter().map(|p| p.miles)),
                ShapeStyle {
                    color: line_color.to_rgba(),
                    filled: false,
                    stroke_width: 2,
                },
            ))?
            .label("Mileage")
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 30, y)], line_color));

        chart
            .configure_series_labels()
            .background_style(&WHITE.mix(0.7))
            .border_style(&BLACK.mix(0.3))
            .position(SeriesLabelPosition::UpperLeft)
            .draw()?;

        root.present()?;
    }
    Ok(svg)
}

fn format_date(timestamp: f64) -> String {
    DateTime::<Utc>::from_timestamp(timestamp as i64, 0)
        .map(|t| t.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn points() -> Vec<MileagePoint> {
        let start = Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap();
        [5.0, 7.0, 9.25]
            .iter()
            .enumerate()
            .map(|(i, &miles)| MileagePoint {
                time: start + Duration::days(i as i64),
                miles,
            })
            .collect()
    }

    #[test]
    fn csv_sink_writes_header_and_rows() {
        let mut out = Vec::new();
        OutputFormat::Csv.sink().write(&points(), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "time,mileage_in_past_month\n\
             2024-01-03T00:00:00Z,5.000000\n\
             2024-01-04T00:00:00Z,7.000000\n\
             2024-01-05T00:00:00Z,9.250000\n"
        );
    }

    #[test]
    fn csv_sink_handles_empty_series() {
        let mut out = Vec::new();
        CsvSink.write(&[], &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "time,mileage_in_past_month\n");
    }

    #[test]
    fn chart_sink_writes_svg_document() {
        let mut out = Vec::new();
        OutputFormat::Chart.sink().write(&points(), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("<svg"));
        assert!(text.trim_end().ends_with("</svg>"));
        assert!(text.contains("Mileage"));
    }

    #[test]
    fn format_date_uses_utc_calendar_day() {
        let t = Utc.with_ymd_and_hms(2024, 2, 29, 0, 0, 0).unwrap();
        assert_eq!(format_date(t.timestamp() as f64), "2024-02-29");
    }
}

use crate::config::DisplayConfig;
use crate::pipeline::Dashboard;
use crate::signal::TimeSeries;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Axis {
    pub label: Option<String>,
    pub range: Option<(f64, f64)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Style {
    pub width: f32,
    pub dash: Option<[f32; 2]>,
    pub color: Color,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color(pub u32);

impl Color {
    pub fn rgb(self) -> (u8, u8, u8) {
        (
            ((self.0 >> 16) & 0xFF) as u8,
            ((self.0 >> 8) & 0xFF) as u8,
            (self.0 & 0xFF) as u8,
        )
    }
}

/// Points are `[x, y]`; a `NaN` y breaks the line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineSeries {
    pub name: String,
    pub points: Vec<[f64; 2]>,
    pub style: Style,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Series {
    Line(LineSeries),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Figure {
    pub title: Option<String>,
    pub x: Axis,
    pub y: Axis,
    pub series: Vec<Series>,
}

impl Figure {
    pub fn new(title: impl Into<Option<String>>) -> Self {
        Self {
            title: title.into(),
            x: Axis {
                label: None,
                range: None,
            },
            y: Axis {
                label: None,
                range: None,
            },
            series: Vec::new(),
        }
    }

    pub fn add_series(&mut self, series: Series) {
        self.series.push(series);
    }

    /// Explicit x range, or the extent of every finite point.
    pub fn x_bounds(&self) -> (f64, f64) {
        self.x.range.unwrap_or_else(|| self.extent(|p| p[0]))
    }

    pub fn y_bounds(&self) -> (f64, f64) {
        self.y.range.unwrap_or_else(|| self.extent(|p| p[1]))
    }

    fn extent(&self, pick: impl Fn(&[f64; 2]) -> f64) -> (f64, f64) {
        let mut lo = f64::INFINITY;
        let mut hi = f64::NEG_INFINITY;
        for Series::Line(line) in &self.series {
            for p in line.points.iter().filter(|p| p[0].is_finite() && p[1].is_finite()) {
                lo = lo.min(pick(p));
                hi = hi.max(pick(p));
            }
        }
        if lo > hi {
            (0.0, 1.0)
        } else if lo == hi {
            (lo - 0.5, hi + 0.5)
        } else {
            (lo, hi)
        }
    }
}

pub trait PlotBackend {
    fn draw(&mut self, fig: &Figure) -> anyhow::Result<()>;
}

pub fn decimate_points(points: &[[f64; 2]], max_points: usize) -> Vec<[f64; 2]> {
    if points.len() <= max_points {
        return points.to_vec();
    }
    let bucket_size = points.len() as f64 / max_points as f64;
    let mut result = Vec::with_capacity(max_points);
    for i in 0..max_points {
        let start = (i as f64 * bucket_size).floor() as usize;
        if start >= points.len() {
            break;
        }
        result.push(points[start]);
    }
    result
}

/// `[hours since now, value]` for each sample.
pub fn hours_relative(series: &TimeSeries, now: NaiveDateTime) -> Vec<[f64; 2]> {
    series
        .timestamps()
        .zip(&series.data)
        .map(|(t, v)| [(t - now).num_seconds() as f64 / 3600.0, *v])
        .collect()
}

fn line(name: &str, series: &TimeSeries, now: NaiveDateTime, max_points: usize, style: Style) -> Series {
    Series::Line(LineSeries {
        name: name.into(),
        points: decimate_points(&hours_relative(series, now), max_points),
        style,
    })
}

/// The dashboard chart: raw fused, filtered, zigbee and forecast temperatures
/// over the display window, with the y axis pinned to the configured range.
pub fn figure_from_dashboard(dash: &Dashboard, display: &DisplayConfig) -> Figure {
    let mut fig = Figure::new(Some("Temperature".to_string()));
    fig.x.label = Some("hours from now".into());
    fig.y.label = Some("°C".into());
    fig.y.range = Some((display.y_min, display.y_max));

    let max_points = display.max_points.max(2);
    let solid = |width: f32, color: u32| Style {
        width,
        dash: None,
        color: Color(color),
    };
    fig.add_series(line("raw", &dash.raw, dash.now, max_points, solid(1.0, 0xB0B0B0)));
    fig.add_series(line("temp_filt", &dash.temp_filt, dash.now, max_points, solid(2.0, 0x1F77B4)));
    fig.add_series(line("temp_zb", &dash.temp_zb, dash.now, max_points, solid(1.2, 0x2CA02C)));

    let mut x_max = 0.0f64;
    if let Ok(forecast) = &dash.forecast {
        let style = Style {
            width: 2.0,
            dash: Some([6.0, 4.0]),
            color: Color(0xFF7F0E),
        };
        let series = line("forecast", forecast, dash.now, max_points, style);
        let Series::Line(l) = &series;
        x_max = l.points.iter().map(|p| p[0]).fold(x_max, f64::max);
        fig.add_series(series);
    }
    fig.x.range = Some((-(display.window_days as f64) * 24.0, x_max));
    fig
}

/// One line per sensor (corrected `temp_in`, `temp_out` and `temp_zb`) on the
/// same axes as the dashboard chart, without fusion or forecast.
pub fn figure_from_sensors(dash: &Dashboard, display: &DisplayConfig) -> Figure {
    let mut fig = Figure::new(Some("Sensors".to_string()));
    fig.x.label = Some("hours from now".into());
    fig.y.label = Some("°C".into());
    fig.y.range = Some((display.y_min, display.y_max));
    fig.x.range = Some((-(display.window_days as f64) * 24.0, 0.0));

    let max_points = display.max_points.max(2);
    for (name, series, color) in [
        ("temp_in", &dash.temp_in, 0xD62728),
        ("temp_out", &dash.temp_out, 0x9467BD),
        ("temp_zb", &dash.temp_zb, 0x2CA02C),
    ] {
        let style = Style {
            width: 1.2,
            dash: None,
            color: Color(color),
        };
        fig.add_series(line(name, series, dash.now, max_points, style));
    }
    fig
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditioning::GlitchReport;
    use crate::error::ForecastError;
    use chrono::{Duration, NaiveDate};

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 8)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .expect("time")
    }

    fn dash(forecast: Result<TimeSeries, ForecastError>) -> Dashboard {
        let history = TimeSeries::new(now() - Duration::hours(2), Duration::minutes(2), vec![25.0; 60]);
        Dashboard {
            now: now(),
            window_start: now() - Duration::days(7),
            temp_in: history.clone(),
            temp_out: history.clone(),
            raw: history.clone(),
            temp_filt: history.clone(),
            temp_zb: history.clone(),
            hum_zb: history,
            forecast,
            glitches: GlitchReport::default(),
            fusion: "mean",
        }
    }

    #[test]
    fn decimation_caps_points() {
        let points: Vec<[f64; 2]> = (0..1000).map(|i| [i as f64, 0.0]).collect();
        let out = decimate_points(&points, 100);
        assert_eq!(out.len(), 100);
        assert_eq!(out[1], [10.0, 0.0]);
        assert_eq!(decimate_points(&points[..10], 100).len(), 10);
    }

    #[test]
    fn dashboard_figure_uses_relative_hours_and_fixed_range() {
        let forecast = TimeSeries::new(now() + Duration::minutes(5), Duration::minutes(5), vec![25.5; 12]);
        let fig = figure_from_dashboard(&dash(Ok(forecast)), &DisplayConfig::default());
        assert_eq!(fig.series.len(), 4);
        assert_eq!(fig.y_bounds(), (21.0, 33.0));
        let (x_lo, x_hi) = fig.x_bounds();
        assert_eq!(x_lo, -168.0);
        assert!((x_hi - 1.0).abs() < 1e-9);
        let Series::Line(raw) = &fig.series[0];
        assert_eq!(raw.points[0], [-2.0, 25.0]);
    }

    #[test]
    fn missing_forecast_drops_series() {
        let fig = figure_from_dashboard(&dash(Err(ForecastError::Degenerate)), &DisplayConfig::default());
        assert_eq!(fig.series.len(), 3);
        assert_eq!(fig.x_bounds().1, 0.0);
    }

    #[test]
    fn sensor_figure_has_one_line_per_sensor() {
        let mut d = dash(Ok(TimeSeries::new(now(), Duration::minutes(5), vec![25.5; 12])));
        d.temp_out = TimeSeries::new(now() - Duration::hours(1), Duration::minutes(2), vec![26.0; 30]);
        let fig = figure_from_sensors(&d, &DisplayConfig::default());
        let names: Vec<&str> = fig
            .series
            .iter()
            .map(|Series::Line(l)| l.name.as_str())
            .collect();
        assert_eq!(names, ["temp_in", "temp_out", "temp_zb"]);
        assert_eq!(fig.x_bounds(), (-168.0, 0.0));
        assert_eq!(fig.y_bounds(), (21.0, 33.0));
        let Series::Line(out) = &fig.series[1];
        assert_eq!(out.points[0], [-1.0, 26.0]);
    }

    #[test]
    fn extent_ignores_missing_values() {
        let mut fig = Figure::new(None);
        fig.add_series(Series::Line(LineSeries {
            name: "t".into(),
            points: vec![[0.0, 1.0], [1.0, f64::NAN], [2.0, 3.0]],
            style: Style {
                width: 1.0,
                dash: None,
                color: Color(0),
            },
        }));
        assert_eq!(fig.x_bounds(), (0.0, 2.0));
        assert_eq!(fig.y_bounds(), (1.0, 3.0));
        assert_eq!(Color(0x1F77B4).rgb(), (0x1F, 0x77, 0xB4));
    }
}

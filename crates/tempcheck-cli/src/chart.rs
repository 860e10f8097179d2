use anyhow::{Context, Result};
use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::series::DashedLineSeries;
use std::path::PathBuf;
use tempcheck_lib::plot::{Figure, PlotBackend, Series};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ChartKind {
    Png,
    Svg,
}

/// Draws a [`Figure`] into an image file with plotters.
pub struct ChartFile {
    path: PathBuf,
    kind: ChartKind,
    size: (u32, u32),
}

impl ChartFile {
    pub fn new(path: impl Into<PathBuf>, kind: ChartKind) -> Self {
        Self {
            path: path.into(),
            kind,
            size: (1000, 500),
        }
    }
}

impl PlotBackend for ChartFile {
    fn draw(&mut self, fig: &Figure) -> Result<()> {
        match self.kind {
            ChartKind::Png => draw_figure(BitMapBackend::new(&self.path, self.size).into_drawing_area(), fig),
            ChartKind::Svg => draw_figure(SVGBackend::new(&self.path, self.size).into_drawing_area(), fig),
        }
        .with_context(|| format!("drawing chart to {}", self.path.display()))
    }
}

fn draw_figure<DB: DrawingBackend>(root: DrawingArea<DB, Shift>, fig: &Figure) -> Result<()>
where
    DB::ErrorType: 'static,
{
    root.fill(&WHITE)?;
    let (x_min, x_max) = fig.x_bounds();
    let (y_min, y_max) = fig.y_bounds();
    let mut chart = ChartBuilder::on(&root)
        .margin(10)
        .caption(
            fig.title.clone().unwrap_or_else(|| "Plot".into()),
            ("sans-serif", 22),
        )
        .x_label_area_size(35)
        .y_label_area_size(45)
        .build_cartesian_2d(x_min..x_max, y_min..y_max)?;
    chart
        .configure_mesh()
        .x_desc(fig.x.label.clone().unwrap_or_default())
        .y_desc(fig.y.label.clone().unwrap_or_default())
        .draw()?;

    for Series::Line(line) in &fig.series {
        let (r, g, b) = line.style.color.rgb();
        let style = RGBColor(r, g, b).stroke_width(line.style.width.round().max(1.0) as u32);
        for (k, segment) in segments(&line.points, y_min, y_max).into_iter().enumerate() {
            let anno = match line.style.dash {
                Some([on, off]) => chart.draw_series(DashedLineSeries::new(
                    segment,
                    on.round().max(1.0) as u32,
                    off.round().max(1.0) as u32,
                    style,
                ))?,
                None => chart.draw_series(LineSeries::new(segment, style))?,
            };
            if k == 0 {
                anno.label(line.name.clone())
                    .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 16, y)], style));
            }
        }
    }
    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;
    root.present()?;
    Ok(())
}

/// Runs of finite points inside `[y_min, y_max]`. A missing value ends the
/// current run; a line leaving the visible range is cut where it crosses the
/// edge and resumes where it comes back.
fn segments(points: &[[f64; 2]], y_min: f64, y_max: f64) -> Vec<Vec<(f64, f64)>> {
    let inside = |y: f64| y >= y_min && y <= y_max;
    let edge = |y: f64| if y > y_max { y_max } else { y_min };
    let mut out = Vec::new();
    let mut current = Vec::new();
    let mut prev: Option<(f64, f64)> = None;
    for p in points {
        if !(p[0].is_finite() && p[1].is_finite()) {
            if !current.is_empty() {
                out.push(std::mem::take(&mut current));
            }
            prev = None;
            continue;
        }
        let cur = (p[0], p[1]);
        if let Some(a) = prev.filter(|a| inside(a.1) != inside(cur.1)) {
            let bound = if inside(a.1) { edge(cur.1) } else { edge(a.1) };
            let t = (bound - a.1) / (cur.1 - a.1);
            current.push((a.0 + t * (cur.0 - a.0), bound));
            if inside(a.1) {
                out.push(std::mem::take(&mut current));
            }
        }
        if inside(cur.1) {
            current.push(cur);
        }
        prev = Some(cur);
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

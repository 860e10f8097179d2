//! Short-horizon forecast of the filtered temperature.
//!
//! The model is additive: a piecewise-linear trend whose slope may change at
//! evenly spaced changepoints, plus a daily Fourier seasonality once the
//! history is long enough to see one. Coefficients come from a ridge-penalised
//! least-squares fit on time normalized to `[0, 1]` over the history and values
//! scaled by their largest magnitude.

mod linalg;

use crate::conditioning::resample::rebucket;
use crate::config::ForecastConfig;
use crate::error::ForecastError;
use crate::signal::{finite_mean_std, to_epoch, TimeSeries};
use chrono::{Duration, NaiveDateTime};
use log::debug;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

const SECONDS_PER_DAY: f64 = 86_400.0;
const BASE_PENALTY: f64 = 1e-8;

/// Coefficients of a fitted trend + seasonality model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FittedModel {
    /// Epoch seconds of the first training point.
    origin: i64,
    /// Seconds spanned by the history; trend time is `(t - origin) / span`.
    span: f64,
    y_scale: f64,
    changepoints: Vec<f64>,
    fourier_order: usize,
    coef: Vec<f64>,
    last: NaiveDateTime,
    step_secs: i64,
}

impl FittedModel {
    pub fn last_timestamp(&self) -> NaiveDateTime {
        self.last
    }

    pub fn has_seasonality(&self) -> bool {
        self.fourier_order > 0
    }

    fn features(&self, t: NaiveDateTime) -> Vec<f64> {
        design_row(
            to_epoch(t),
            self.origin,
            self.span,
            &self.changepoints,
            self.fourier_order,
        )
    }

    pub fn predict_at(&self, t: NaiveDateTime) -> f64 {
        let x = self.features(t);
        x.iter().zip(&self.coef).map(|(a, b)| a * b).sum::<f64>() * self.y_scale
    }

    /// `horizon` points starting one step after the last training timestamp.
    pub fn forecast(&self, horizon: usize) -> TimeSeries {
        let step = Duration::seconds(self.step_secs);
        let start = self.last + step;
        let data = (0..horizon)
            .map(|k| self.predict_at(start + Duration::seconds(self.step_secs * k as i64)))
            .collect();
        TimeSeries::new(start, step, data)
    }
}

/// Fits the trend + seasonality model on a trailing window of history.
#[derive(Debug, Clone)]
pub struct Forecaster {
    config: ForecastConfig,
}

impl Forecaster {
    pub fn new(config: ForecastConfig) -> Self {
        Self { config }
    }

    /// Trailing `training_days` of `history`, averaged onto the forecast cadence.
    pub fn training_series(&self, history: &TimeSeries) -> TimeSeries {
        let cadence = self.config.cadence();
        let Some(last_valid) = history.data.iter().rposition(|v| v.is_finite()) else {
            return TimeSeries::empty(cadence);
        };
        let cutoff = history.timestamp(last_valid) - Duration::days(self.config.training_days);
        let window = history.since(cutoff);
        rebucket(&window, cadence)
    }

    /// Fit on a series that is already at the forecast cadence.
    pub fn fit(&self, training: &TimeSeries) -> Result<FittedModel, ForecastError> {
        let cfg = &self.config;
        if cfg.horizon == 0 {
            return Err(ForecastError::InvalidParameter {
                name: "horizon",
                reason: "must be positive".into(),
            });
        }
        let points: Vec<(i64, f64)> = training
            .timestamps()
            .zip(training.data.iter().copied())
            .filter(|(_, v)| v.is_finite())
            .map(|(t, v)| (to_epoch(t), v))
            .collect();
        let required = cfg.min_history.max(2);
        if points.len() < required {
            return Err(ForecastError::InsufficientData {
                required,
                actual: points.len(),
            });
        }
        let values: Vec<f64> = points.iter().map(|p| p.1).collect();
        let (mean, sd) = finite_mean_std(&values).ok_or(ForecastError::Degenerate)?;
        if sd <= 1e-9 * mean.abs().max(1.0) {
            return Err(ForecastError::Degenerate);
        }
        let y_scale = values.iter().fold(0.0f64, |m, v| m.max(v.abs()));

        let origin = points[0].0;
        let span = (points[points.len() - 1].0 - origin) as f64;
        let changepoints = place_changepoints(&points, origin, span, cfg);
        let fourier_order = if span >= cfg.min_seasonal_days * SECONDS_PER_DAY {
            cfg.daily_fourier_order
        } else {
            0
        };

        let rows: Vec<Vec<f64>> = points
            .iter()
            .map(|&(t, _)| design_row(t, origin, span, &changepoints, fourier_order))
            .collect();
        let y: Vec<f64> = values.iter().map(|v| v / y_scale).collect();
        let mut penalty = vec![BASE_PENALTY; 2];
        penalty.extend(std::iter::repeat(cfg.changepoint_penalty.max(BASE_PENALTY)).take(changepoints.len()));
        penalty.extend(std::iter::repeat(cfg.seasonal_penalty.max(BASE_PENALTY)).take(2 * fourier_order));

        let coef = linalg::ridge_solve(&rows, &y, &penalty).ok_or(ForecastError::Singular)?;
        if coef.iter().any(|c| !c.is_finite()) {
            return Err(ForecastError::Singular);
        }
        let last = training
            .data
            .iter()
            .rposition(|v| v.is_finite())
            .map(|i| training.timestamp(i))
            .unwrap_or(training.start);
        debug!(
            "forecast model: {} points, {} changepoints, fourier order {}",
            points.len(),
            changepoints.len(),
            fourier_order
        );
        Ok(FittedModel {
            origin,
            span,
            y_scale,
            changepoints,
            fourier_order,
            coef,
            last,
            step_secs: training.step_secs,
        })
    }

    /// Train on the trailing window of `history` and project `horizon` steps.
    pub fn forecast(&self, history: &TimeSeries) -> Result<TimeSeries, ForecastError> {
        let training = self.training_series(history);
        let model = self.fit(&training)?;
        Ok(model.forecast(self.config.horizon))
    }
}

/// Changepoints at evenly spaced sample positions within the first
/// `changepoint_range` of the history, in normalized time.
fn place_changepoints(points: &[(i64, f64)], origin: i64, span: f64, cfg: &ForecastConfig) -> Vec<f64> {
    let hist = ((points.len() as f64) * cfg.changepoint_range).floor() as usize;
    let count = cfg.changepoints.min(hist.saturating_sub(1));
    if count == 0 || span <= 0.0 {
        return Vec::new();
    }
    let last_idx = (hist - 1) as f64;
    (1..=count)
        .map(|j| {
            let idx = (j as f64 * last_idx / count as f64).round() as usize;
            (points[idx].0 - origin) as f64 / span
        })
        .collect()
}

fn design_row(t: i64, origin: i64, span: f64, changepoints: &[f64], fourier_order: usize) -> Vec<f64> {
    let s = if span > 0.0 {
        (t - origin) as f64 / span
    } else {
        0.0
    };
    let mut row = Vec::with_capacity(2 + changepoints.len() + 2 * fourier_order);
    row.push(1.0);
    row.push(s);
    row.extend(changepoints.iter().map(|&c| (s - c).max(0.0)));
    let day_phase = 2.0 * PI * (t as f64 / SECONDS_PER_DAY);
    for k in 1..=fourier_order {
        let arg = day_phase * k as f64;
        row.push(arg.sin());
        row.push(arg.cos());
    }
    row
}

use crate::conditioning::fusion::FusionKind;
use crate::error::ConfigError;
use anyhow::{Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Every tunable of the dashboard pipeline. Missing TOML keys fall back to the defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub resample: ResampleConfig,
    pub glitch: GlitchConfig,
    pub fusion: FusionConfig,
    pub filter: FilterConfig,
    pub forecast: ForecastConfig,
    pub display: DisplayConfig,
    pub ingest: IngestConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResampleConfig {
    /// Bucket width in seconds.
    pub cadence_secs: i64,
    /// Constant corrections added to probe columns after resampling.
    pub probe_offsets: BTreeMap<String, f64>,
    pub zigbee_offsets: BTreeMap<String, f64>,
}

impl Default for ResampleConfig {
    fn default() -> Self {
        Self {
            cadence_secs: 120,
            probe_offsets: [("temp_out".to_string(), 2.0), ("temp_in".to_string(), 0.75)]
                .into_iter()
                .collect(),
            zigbee_offsets: BTreeMap::new(),
        }
    }
}

impl ResampleConfig {
    pub fn cadence(&self) -> Duration {
        Duration::seconds(self.cadence_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GlitchConfig {
    /// Consecutive identical samples that count as a stuck sensor.
    pub window: usize,
}

impl Default for GlitchConfig {
    fn default() -> Self {
        Self { window: 6 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub strategy: FusionKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub order: usize,
    /// Cutoff as a fraction of the Nyquist frequency.
    pub cutoff: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            order: 4,
            cutoff: 0.025,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    pub enabled: bool,
    pub cadence_secs: i64,
    /// Number of future steps.
    pub horizon: usize,
    pub training_days: i64,
    pub min_history: usize,
    pub changepoints: usize,
    /// Fraction of the history in which trend changepoints may sit.
    pub changepoint_range: f64,
    /// Ridge penalty on changepoint slope deltas; larger means a stiffer trend.
    pub changepoint_penalty: f64,
    pub seasonal_penalty: f64,
    pub daily_fourier_order: usize,
    /// Daily seasonality is only fitted once the history spans this many days.
    pub min_seasonal_days: f64,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cadence_secs: 300,
            horizon: 60,
            training_days: 7,
            min_history: 24,
            changepoints: 25,
            changepoint_range: 0.8,
            changepoint_penalty: 10.0,
            seasonal_penalty: 0.01,
            daily_fourier_order: 4,
            min_seasonal_days: 2.0,
        }
    }
}

impl ForecastConfig {
    pub fn cadence(&self) -> Duration {
        Duration::seconds(self.cadence_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub window_days: i64,
    pub y_min: f64,
    pub y_max: f64,
    pub max_points: usize,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            window_days: 7,
            y_min: 21.0,
            y_max: 33.0,
            max_points: 6000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Minimum spacing between two stored readings of one source.
    pub min_interval_secs: i64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            min_interval_secs: 10,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |section: &'static str, field: &'static str, reason: &'static str| {
            ConfigError::Invalid {
                section,
                field,
                reason,
            }
        };
        if self.resample.cadence_secs <= 0 {
            return Err(invalid("resample", "cadence_secs", "must be positive"));
        }
        if self.glitch.window < 2 {
            return Err(invalid("glitch", "window", "must be at least 2"));
        }
        if self.filter.order == 0 {
            return Err(invalid("filter", "order", "must be at least 1"));
        }
        if !(self.filter.cutoff > 0.0 && self.filter.cutoff < 1.0) {
            return Err(invalid("filter", "cutoff", "must lie in (0, 1)"));
        }
        if self.forecast.cadence_secs <= 0 {
            return Err(invalid("forecast", "cadence_secs", "must be positive"));
        }
        if self.forecast.horizon == 0 {
            return Err(invalid("forecast", "horizon", "must be positive"));
        }
        if self.forecast.training_days <= 0 {
            return Err(invalid("forecast", "training_days", "must be positive"));
        }
        if !(0.0..=1.0).contains(&self.forecast.changepoint_range) {
            return Err(invalid("forecast", "changepoint_range", "must lie in [0, 1]"));
        }
        if self.display.window_days <= 0 {
            return Err(invalid("display", "window_days", "must be positive"));
        }
        if self.display.y_min >= self.display.y_max {
            return Err(invalid("display", "y_min", "must be below y_max"));
        }
        Ok(())
    }
}

pub fn parse_config(text: &str) -> Result<PipelineConfig> {
    let config: PipelineConfig = toml::from_str(text).context("parsing pipeline config")?;
    config.validate()?;
    Ok(config)
}

pub fn read_config(path: &Path) -> Result<PipelineConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    parse_config(&contents).with_context(|| format!("in config {}", path.display()))
}

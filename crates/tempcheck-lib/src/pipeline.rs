//! Request-scoped run of every stage, from stored tables to dashboard series.

use crate::conditioning::{condition_fused, lowpass_gap_free, Butterworth, GlitchCorrector, GlitchReport, Resampler};
use crate::config::PipelineConfig;
use crate::error::{FilterError, ForecastError};
use crate::forecast::Forecaster;
use crate::io::store::{ReadingStore, Source};
use crate::signal::{Frame, TimeSeries};
use anyhow::{Context, Result};
use chrono::{Duration, NaiveDateTime};
use log::{debug, info, warn};

/// Probe streams after glitch correction, fusion and smoothing. All series
/// share the frame's time index.
#[derive(Debug, Clone)]
pub struct ProbeConditioning {
    pub temp_in: TimeSeries,
    pub temp_out: TimeSeries,
    /// Fused stream before gap filling.
    pub raw: TimeSeries,
    pub temp_filt: TimeSeries,
    pub glitches: GlitchReport,
    pub fusion: &'static str,
}

/// Everything the dashboard shows for one request.
#[derive(Debug, Clone)]
pub struct Dashboard {
    pub now: NaiveDateTime,
    pub window_start: NaiveDateTime,
    pub temp_in: TimeSeries,
    pub temp_out: TimeSeries,
    pub raw: TimeSeries,
    pub temp_filt: TimeSeries,
    pub temp_zb: TimeSeries,
    pub hum_zb: TimeSeries,
    pub forecast: Result<TimeSeries, ForecastError>,
    pub glitches: GlitchReport,
    pub fusion: &'static str,
}

fn column(frame: &Frame, name: &str) -> TimeSeries {
    frame.series(name).unwrap_or_else(|| TimeSeries {
        start: frame.start,
        step_secs: frame.step_secs,
        data: vec![f64::NAN; frame.len],
    })
}

/// Glitch-correct, fuse and low-pass the resampled probe frame.
pub fn condition_probe(frame: &Frame, config: &PipelineConfig) -> Result<ProbeConditioning, FilterError> {
    let temp_in = column(frame, "temp_in");
    let temp_out = column(frame, "temp_out");

    let corrector = GlitchCorrector::new(config.glitch.window);
    let (fixed_in, fixed_out, glitches) = corrector.correct_observed(
        (&temp_in.data, frame.observed("temp_in").unwrap_or_default()),
        (&temp_out.data, frame.observed("temp_out").unwrap_or_default()),
    );

    let strategy = config.fusion.strategy.strategy();
    let raw = strategy.fuse(&fixed_out, &fixed_in);
    let gap_free = condition_fused(&raw);

    let filter = Butterworth::lowpass(config.filter.order, config.filter.cutoff)?;
    let smoothed = lowpass_gap_free(&filter, &gap_free)?;
    debug!(
        "conditioned {} probe samples with {} fusion, {} filter sections",
        frame.len,
        strategy.name(),
        filter.sections().len()
    );

    let step = Duration::seconds(frame.step_secs);
    Ok(ProbeConditioning {
        temp_in: TimeSeries::new(frame.start, step, fixed_in),
        temp_out: TimeSeries::new(frame.start, step, fixed_out),
        raw: TimeSeries::new(frame.start, step, raw),
        temp_filt: TimeSeries::new(frame.start, step, smoothed),
        glitches,
        fusion: strategy.name(),
    })
}

/// Load both tables and recompute every derived series for the window ending at `now`.
pub fn run_dashboard<S: ReadingStore + ?Sized>(
    store: &S,
    config: &PipelineConfig,
    now: NaiveDateTime,
) -> Result<Dashboard> {
    config.validate()?;
    let window_start = now - Duration::days(config.display.window_days);

    let probe_table = store.load(Source::Probe).context("loading probe readings")?;
    let zigbee_table = store.load(Source::Zigbee).context("loading zigbee readings")?;

    let cadence = config.resample.cadence();
    let probe = Resampler::new(cadence)
        .with_offsets(config.resample.probe_offsets.clone())
        .resample(&probe_table)
        .since(window_start);
    let zigbee = Resampler::new(cadence)
        .with_offsets(config.resample.zigbee_offsets.clone())
        .resample(&zigbee_table)
        .since(window_start);
    info!(
        "dashboard window {} .. {}: {} probe and {} zigbee buckets",
        window_start, now, probe.len, zigbee.len
    );

    let probe = condition_probe(&probe, config).context("conditioning probe readings")?;

    let forecast = if config.forecast.enabled {
        Forecaster::new(config.forecast.clone()).forecast(&probe.temp_filt)
    } else {
        Err(ForecastError::Disabled)
    };
    if let Err(e) = &forecast {
        warn!("forecast unavailable: {}", e);
    }

    Ok(Dashboard {
        now,
        window_start,
        temp_in: probe.temp_in,
        temp_out: probe.temp_out,
        raw: probe.raw,
        temp_filt: probe.temp_filt,
        temp_zb: column(&zigbee, "temp_zb"),
        hum_zb: column(&zigbee, "hum_zb"),
        forecast,
        glitches: probe.glitches,
        fusion: probe.fusion,
    })
}

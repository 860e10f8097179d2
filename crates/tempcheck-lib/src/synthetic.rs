use crate::io::store::{MemoryStore, ReadingStore, Row, Source, Table};
use anyhow::Result;
use chrono::{Duration, NaiveDateTime};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Parameters for a synthetic pair of reading tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntheticConfig {
    pub seed: u64,
    pub start: NaiveDateTime,
    pub hours: f64,
    /// Probe spacing in seconds.
    pub probe_cadence_secs: i64,
    /// Zigbee spacing in seconds (jittered by up to half a minute).
    pub zigbee_cadence_secs: i64,
    pub mean_temp: f64,
    pub daily_amplitude: f64,
    pub noise: f64,
    /// Biases the offsets configured for the dashboard are meant to undo.
    pub temp_in_bias: f64,
    pub temp_out_bias: f64,
    /// Hours after `start` at which `temp_out` gets stuck.
    pub glitch_hour: Option<f64>,
    /// Number of probe samples the stuck value lasts.
    pub glitch_samples: usize,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            seed: 7,
            start: NaiveDateTime::default(),
            hours: 48.0,
            probe_cadence_secs: 120,
            zigbee_cadence_secs: 300,
            mean_temp: 27.0,
            daily_amplitude: 2.0,
            noise: 0.05,
            temp_in_bias: -0.75,
            temp_out_bias: -2.0,
            glitch_hour: None,
            glitch_samples: 6,
        }
    }
}

impl SyntheticConfig {
    /// Noise-free room temperature at `t`; coldest around 05:00, warmest around 17:00.
    pub fn base_temperature(&self, t: NaiveDateTime) -> f64 {
        let hour_of_day = (t - t.date().and_hms_opt(0, 0, 0).unwrap_or(t)).num_seconds() as f64 / 3600.0;
        self.mean_temp - self.daily_amplitude * (2.0 * PI * (hour_of_day - 5.0) / 24.0).cos()
    }

    pub fn end(&self) -> NaiveDateTime {
        self.start + Duration::seconds((self.hours * 3600.0) as i64)
    }

    fn glitch_range(&self) -> Option<(NaiveDateTime, NaiveDateTime)> {
        self.glitch_hour.map(|h| {
            let from = self.start + Duration::seconds((h * 3600.0) as i64);
            let to = from + Duration::seconds(self.probe_cadence_secs * self.glitch_samples as i64);
            (from, to)
        })
    }
}

/// Probe and zigbee tables following a daily cycle with uniform noise.
pub fn generate(cfg: &SyntheticConfig) -> (Table, Table) {
    let mut rng = StdRng::seed_from_u64(cfg.seed);
    let end = cfg.end();
    let glitch = cfg.glitch_range();

    let mut probe = Vec::new();
    let mut stuck: Option<f64> = None;
    let mut t = cfg.start;
    while t < end {
        let base = cfg.base_temperature(t);
        let temp_in = base + cfg.temp_in_bias + rng.gen_range(-cfg.noise..=cfg.noise);
        let mut temp_out = base + cfg.temp_out_bias + rng.gen_range(-cfg.noise..=cfg.noise);
        match glitch {
            Some((from, to)) if t >= from && t < to => {
                temp_out = *stuck.get_or_insert(temp_out);
            }
            _ => stuck = None,
        }
        probe.push(Row::new(t, vec![Some(temp_in), Some(temp_out)]));
        t += Duration::seconds(cfg.probe_cadence_secs.max(1));
    }

    let mut zigbee = Vec::new();
    let mut t = cfg.start;
    while t < end {
        let jitter = Duration::milliseconds(rng.gen_range(0..30_000));
        let at = t + jitter;
        let base = cfg.base_temperature(at);
        let temp = base - 0.3 + rng.gen_range(-cfg.noise..=cfg.noise);
        let hum = 60.0 - 2.5 * (base - cfg.mean_temp) + rng.gen_range(-0.5..=0.5);
        zigbee.push(Row::new(at, vec![Some(temp), Some(hum)]));
        t += Duration::seconds(cfg.zigbee_cadence_secs.max(1));
    }

    (
        Table::new(Source::Probe, probe),
        Table::new(Source::Zigbee, zigbee),
    )
}

/// Write both generated tables into any store.
pub fn populate<S: ReadingStore + ?Sized>(store: &mut S, cfg: &SyntheticConfig) -> Result<(usize, usize)> {
    let (probe, zigbee) = generate(cfg);
    store.append_many(Source::Probe, &probe.rows)?;
    store.append_many(Source::Zigbee, &zigbee.rows)?;
    Ok((probe.len(), zigbee.len()))
}

pub fn memory_store(cfg: &SyntheticConfig) -> MemoryStore {
    let (probe, zigbee) = generate(cfg);
    MemoryStore::new().with_table(probe).with_table(zigbee)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditioning::glitch::longest_constant_run;

    #[test]
    fn seeded_generation_is_reproducible() {
        let cfg = SyntheticConfig {
            hours: 2.0,
            ..SyntheticConfig::default()
        };
        assert_eq!(generate(&cfg), generate(&cfg));
        let (probe, zigbee) = generate(&cfg);
        assert_eq!(probe.len(), 60);
        assert_eq!(zigbee.len(), 24);
    }

    #[test]
    fn glitch_injects_a_stuck_run() {
        let cfg = SyntheticConfig {
            hours: 24.0,
            glitch_hour: Some(10.0),
            ..SyntheticConfig::default()
        };
        let (probe, _) = generate(&cfg);
        let temp_out: Vec<f64> = probe.rows.iter().map(|r| r.values[1].unwrap_or(f64::NAN)).collect();
        let temp_in: Vec<f64> = probe.rows.iter().map(|r| r.values[0].unwrap_or(f64::NAN)).collect();
        assert_eq!(longest_constant_run(&temp_out), 6);
        assert!(longest_constant_run(&temp_in) < 6);
        assert_eq!(temp_out[300], temp_out[305]);
    }
}

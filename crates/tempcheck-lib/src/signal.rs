use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Regular-cadence time series. Missing samples are `NaN`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    /// Timestamp of the first sample
    pub start: NaiveDateTime,
    /// Fixed spacing between samples in seconds
    pub step_secs: i64,
    /// Samples
    pub data: Vec<f64>,
}

impl TimeSeries {
    pub fn new(start: NaiveDateTime, step: Duration, data: Vec<f64>) -> Self {
        Self {
            start,
            step_secs: step.num_seconds().max(1),
            data,
        }
    }

    pub fn empty(step: Duration) -> Self {
        Self::new(NaiveDateTime::default(), step, Vec::new())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn timestamp(&self, index: usize) -> NaiveDateTime {
        self.start + Duration::seconds(self.step_secs * index as i64)
    }

    pub fn timestamps(&self) -> impl Iterator<Item = NaiveDateTime> + '_ {
        (0..self.data.len()).map(move |i| self.timestamp(i))
    }

    pub fn last_timestamp(&self) -> Option<NaiveDateTime> {
        self.data.len().checked_sub(1).map(|i| self.timestamp(i))
    }

    /// Points strictly after `cutoff`.
    pub fn since(&self, cutoff: NaiveDateTime) -> TimeSeries {
        let skip = first_index_after(self.start, self.step_secs, self.data.len(), cutoff);
        TimeSeries {
            start: self.timestamp(skip),
            step_secs: self.step_secs,
            data: self.data[skip..].to_vec(),
        }
    }
}

fn first_index_after(start: NaiveDateTime, step_secs: i64, len: usize, cutoff: NaiveDateTime) -> usize {
    let offset = (cutoff - start).num_seconds();
    if offset < 0 {
        return 0;
    }
    ((offset / step_secs.max(1)) as usize + 1).min(len)
}

/// Columns of one resampled table, all sharing the same time index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub start: NaiveDateTime,
    pub step_secs: i64,
    pub len: usize,
    columns: BTreeMap<String, Vec<f64>>,
    /// Per column, whether each bucket holds at least one real reading rather
    /// than an interpolated value. Columns without a mask count as observed.
    observed: BTreeMap<String, Vec<bool>>,
}

impl Frame {
    pub fn empty(names: &[&str], step: Duration) -> Self {
        Self {
            start: NaiveDateTime::default(),
            step_secs: step.num_seconds().max(1),
            len: 0,
            columns: names.iter().map(|n| (n.to_string(), Vec::new())).collect(),
            observed: BTreeMap::new(),
        }
    }

    /// Build a frame from columns of equal length.
    pub fn from_columns(
        start: NaiveDateTime,
        step: Duration,
        columns: Vec<(String, Vec<f64>)>,
    ) -> anyhow::Result<Self> {
        let len = columns.first().map(|(_, c)| c.len()).unwrap_or(0);
        if let Some((name, col)) = columns.iter().find(|(_, c)| c.len() != len) {
            anyhow::bail!("column {} has {} samples, expected {}", name, col.len(), len);
        }
        Ok(Self {
            start,
            step_secs: step.num_seconds().max(1),
            len,
            columns: columns.into_iter().collect(),
            observed: BTreeMap::new(),
        })
    }

    /// Attach observation masks to existing columns.
    pub fn with_observed(mut self, masks: Vec<(String, Vec<bool>)>) -> anyhow::Result<Self> {
        for (name, mask) in masks {
            if !self.columns.contains_key(&name) {
                anyhow::bail!("no column {} to attach a mask to", name);
            }
            if mask.len() != self.len {
                anyhow::bail!("mask for {} has {} entries, expected {}", name, mask.len(), self.len);
            }
            self.observed.insert(name, mask);
        }
        Ok(self)
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn values(&self, name: &str) -> Option<&[f64]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    pub fn observed(&self, name: &str) -> Option<&[bool]> {
        self.observed.get(name).map(Vec::as_slice)
    }

    pub fn series(&self, name: &str) -> Option<TimeSeries> {
        self.columns.get(name).map(|data| TimeSeries {
            start: self.start,
            step_secs: self.step_secs,
            data: data.clone(),
        })
    }

    /// Points strictly after `cutoff`, across every column.
    pub fn since(&self, cutoff: NaiveDateTime) -> Frame {
        let skip = first_index_after(self.start, self.step_secs, self.len, cutoff);
        Frame {
            start: self.start + Duration::seconds(self.step_secs * skip as i64),
            step_secs: self.step_secs,
            len: self.len - skip,
            columns: self
                .columns
                .iter()
                .map(|(name, col)| (name.clone(), col[skip..].to_vec()))
                .collect(),
            observed: self
                .observed
                .iter()
                .map(|(name, mask)| (name.clone(), mask[skip..].to_vec()))
                .collect(),
        }
    }
}

pub(crate) fn to_epoch(t: NaiveDateTime) -> i64 {
    t.and_utc().timestamp()
}

/// Mean and population standard deviation over the finite samples.
pub fn finite_mean_std(data: &[f64]) -> Option<(f64, f64)> {
    let finite: Vec<f64> = data.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return None;
    }
    let n = finite.len() as f64;
    let mean = finite.iter().sum::<f64>() / n;
    let var = finite.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    Some((mean, var.sqrt()))
}

pub fn finite_min_max(data: &[f64]) -> Option<(f64, f64)> {
    data.iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

/// Linearly fill missing samples that sit between two finite samples.
/// Leading and trailing gaps are left untouched.
pub fn interpolate_interior(data: &mut [f64]) {
    let mut prev: Option<usize> = None;
    for i in 0..data.len() {
        if !data[i].is_finite() {
            continue;
        }
        if let Some(p) = prev {
            if i - p > 1 {
                let (y0, y1) = (data[p], data[i]);
                let span = (i - p) as f64;
                for (k, slot) in data.iter_mut().enumerate().take(i).skip(p + 1) {
                    let frac = (k - p) as f64 / span;
                    *slot = y0 + frac * (y1 - y0);
                }
            }
        }
        prev = Some(i);
    }
}

/// Fill leading missing samples with the first finite sample.
pub fn backfill_leading(data: &mut [f64]) {
    if let Some(first) = data.iter().position(|v| v.is_finite()) {
        let value = data[first];
        for slot in &mut data[..first] {
            *slot = value;
        }
    }
}

use log::debug;
use serde::{Deserialize, Serialize};

/// Counts from one correction pass over a sensor pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlitchReport {
    /// Samples of the first stream flagged as stuck.
    pub flagged_a: usize,
    /// Samples of the second stream flagged as stuck.
    pub flagged_b: usize,
    /// Missing samples (flagged or absent) recovered from the paired stream.
    pub cross_filled: usize,
    /// Timestamps where both streams are missing after correction.
    pub unrecoverable: usize,
}

/// Stuck-sensor detector for two co-located probes.
///
/// A run of at least `window` identical consecutive readings is a fault, not a
/// real constant temperature: every sample in the run becomes `NaN`, and the
/// gap is filled from the paired probe at the same timestamp. Samples that were
/// interpolated over an outage are never flagged and end any run.
#[derive(Debug, Clone, Copy)]
pub struct GlitchCorrector {
    window: usize,
}

impl GlitchCorrector {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(2),
        }
    }

    /// Indices covered by some window of `window` identical finite observed
    /// samples. `observed` entries past its end count as observed.
    pub fn stuck_mask(&self, data: &[f64], observed: &[bool]) -> Vec<bool> {
        let seen = |i: usize| observed.get(i).copied().unwrap_or(true);
        let mut mask = vec![false; data.len()];
        let mut start = 0;
        while start < data.len() {
            let value = data[start];
            let mut end = start + 1;
            if value.is_finite() && seen(start) {
                while end < data.len() && data[end] == value && seen(end) {
                    end += 1;
                }
                if end - start >= self.window {
                    mask[start..end].iter_mut().for_each(|m| *m = true);
                }
            }
            start = end;
        }
        mask
    }

    /// Replace stuck runs with `NaN`; returns the marked series and how many were flagged.
    pub fn mark(&self, data: &[f64], observed: &[bool]) -> (Vec<f64>, usize) {
        let mask = self.stuck_mask(data, observed);
        let flagged = mask.iter().filter(|&&m| m).count();
        let marked = data
            .iter()
            .zip(&mask)
            .map(|(&v, &stuck)| if stuck { f64::NAN } else { v })
            .collect();
        (marked, flagged)
    }

    /// Mark both streams, then fill each one's gaps with the other's value at the
    /// same index. Points missing in both stay missing.
    pub fn correct(&self, a: &[f64], b: &[f64]) -> (Vec<f64>, Vec<f64>, GlitchReport) {
        self.correct_observed((a, &[]), (b, &[]))
    }

    /// [`GlitchCorrector::correct`] for streams paired with observation masks.
    pub fn correct_observed(
        &self,
        (a, seen_a): (&[f64], &[bool]),
        (b, seen_b): (&[f64], &[bool]),
    ) -> (Vec<f64>, Vec<f64>, GlitchReport) {
        let (marked_a, flagged_a) = self.mark(a, seen_a);
        let (marked_b, flagged_b) = self.mark(b, seen_b);
        let mut report = GlitchReport {
            flagged_a,
            flagged_b,
            ..GlitchReport::default()
        };

        let len = marked_a.len().min(marked_b.len());
        let mut out_a = marked_a.clone();
        let mut out_b = marked_b.clone();
        for i in 0..len {
            let (va, vb) = (marked_a[i], marked_b[i]);
            match (va.is_finite(), vb.is_finite()) {
                (false, true) => {
                    out_a[i] = vb;
                    report.cross_filled += 1;
                }
                (true, false) => {
                    out_b[i] = va;
                    report.cross_filled += 1;
                }
                (false, false) => report.unrecoverable += 1,
                (true, true) => {}
            }
        }
        debug!(
            "glitch pass (window {}): flagged {}/{}, cross-filled {}, unrecoverable {}",
            self.window, report.flagged_a, report.flagged_b, report.cross_filled, report.unrecoverable
        );
        (out_a, out_b, report)
    }
}

/// Length of the longest run of identical finite values.
pub fn longest_constant_run(data: &[f64]) -> usize {
    let mut best = 0;
    let mut run = 0;
    let mut prev = f64::NAN;
    for &v in data {
        if v.is_finite() && v == prev {
            run += 1;
        } else {
            run = usize::from(v.is_finite());
        }
        prev = v;
        best = best.max(run);
    }
    best
}

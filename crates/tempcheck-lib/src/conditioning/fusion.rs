use crate::signal::{backfill_leading, finite_mean_std, finite_min_max, interpolate_interior};
use serde::{Deserialize, Serialize};

/// Merges two probes that measure the same temperature into one stream.
///
/// Inputs are index-aligned. `reference` sets the output scale where the
/// strategy needs one. A missing input at an index yields a missing output.
pub trait FusionStrategy {
    fn name(&self) -> &'static str;
    fn fuse(&self, other: &[f64], reference: &[f64]) -> Vec<f64>;
}

/// Pointwise average.
#[derive(Debug, Clone, Copy, Default)]
pub struct MeanFusion;

impl FusionStrategy for MeanFusion {
    fn name(&self) -> &'static str {
        "mean"
    }

    fn fuse(&self, other: &[f64], reference: &[f64]) -> Vec<f64> {
        other
            .iter()
            .zip(reference)
            .map(|(a, b)| (a + b) / 2.0)
            .collect()
    }
}

/// Gain/offset matching before averaging.
///
/// `other` is rescaled by `sd(reference) / sd(other)` and shifted onto the
/// reference mean; both are then min-max normalized and re-expanded into the
/// reference range before averaging, so neither probe's gain dominates.
#[derive(Debug, Clone, Copy, Default)]
pub struct CalibratedFusion;

impl CalibratedFusion {
    /// `other` mapped onto the reference's gain and offset, or `None` when the
    /// statistics are undefined.
    pub fn calibrate(&self, other: &[f64], reference: &[f64]) -> Option<Vec<f64>> {
        let (mean_o, sd_o) = finite_mean_std(other)?;
        let (mean_r, sd_r) = finite_mean_std(reference)?;
        if sd_o == 0.0 || !sd_r.is_finite() {
            return None;
        }
        let scale = sd_r / sd_o;
        let shift = mean_r - mean_o * scale;
        Some(other.iter().map(|v| v * scale + shift).collect())
    }
}

impl FusionStrategy for CalibratedFusion {
    fn name(&self) -> &'static str {
        "calibrated"
    }

    fn fuse(&self, other: &[f64], reference: &[f64]) -> Vec<f64> {
        let len = other.len().min(reference.len());
        let undefined = || vec![f64::NAN; len];
        let Some(shifted) = self.calibrate(other, reference) else {
            return undefined();
        };
        let (Some((lo_o, hi_o)), Some((lo_r, hi_r))) =
            (finite_min_max(&shifted), finite_min_max(reference))
        else {
            return undefined();
        };
        if hi_o == lo_o || hi_r == lo_r {
            return undefined();
        }
        let range = hi_r - lo_r;
        shifted
            .iter()
            .zip(reference)
            .map(|(o, r)| {
                let o = (o - lo_o) / (hi_o - lo_o) * range + lo_r;
                let r = (r - lo_r) / range * range + lo_r;
                (o + r) / 2.0
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FusionKind {
    #[default]
    Mean,
    Calibrated,
}

impl FusionKind {
    pub fn strategy(self) -> Box<dyn FusionStrategy> {
        match self {
            FusionKind::Mean => Box::new(MeanFusion),
            FusionKind::Calibrated => Box::new(CalibratedFusion),
        }
    }
}

/// Make the fused stream gap-free at its cadence: interior gaps are
/// interpolated, leading gaps back-filled from the first valid sample.
/// Trailing gaps are left missing.
pub fn condition_fused(raw: &[f64]) -> Vec<f64> {
    let mut out = raw.to_vec();
    interpolate_interior(&mut out);
    backfill_leading(&mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wave(n: usize, gain: f64, offset: f64) -> Vec<f64> {
        (0..n)
            .map(|i| offset + gain * (i as f64 * 0.21).sin())
            .collect()
    }

    fn bounds(a: &[f64], b: &[f64]) -> (f64, f64) {
        let lo = a.iter().chain(b).copied().fold(f64::INFINITY, f64::min);
        let hi = a.iter().chain(b).copied().fold(f64::NEG_INFINITY, f64::max);
        (lo, hi)
    }

    #[test]
    fn mean_fusion_averages_and_propagates_missing() {
        let fused = MeanFusion.fuse(&[1.0, f64::NAN, 3.0], &[3.0, 2.0, 5.0]);
        assert_eq!(fused[0], 2.0);
        assert!(fused[1].is_nan());
        assert_eq!(fused[2], 4.0);
    }

    #[test]
    fn calibrated_fusion_stays_within_input_bounds() {
        for (offset, gain) in [(0.5, 1.0), (-3.0, 1.0), (2.0, 2.5), (10.0, 0.3)] {
            let reference = wave(200, 1.0, 24.0);
            let other = wave(200, gain, 24.0 + offset);
            let fused = CalibratedFusion.fuse(&other, &reference);
            let (lo, hi) = bounds(&other, &reference);
            assert_eq!(fused.len(), 200);
            for v in fused {
                assert!(v.is_finite());
                assert!(v >= lo - 1e-9 && v <= hi + 1e-9, "{} outside [{}, {}]", v, lo, hi);
            }
        }
    }

    #[test]
    fn constant_offset_collapses_onto_reference() {
        let reference = wave(100, 1.2, 23.0);
        let other: Vec<f64> = reference.iter().map(|v| v + 1.5).collect();
        let fused = CalibratedFusion.fuse(&other, &reference);
        for (f, r) in fused.iter().zip(&reference) {
            assert!((f - r).abs() < 1e-9);
        }
    }

    #[test]
    fn degenerate_input_is_missing_not_zero() {
        let flat = vec![25.0; 10];
        let reference = wave(10, 1.0, 24.0);
        let fused = CalibratedFusion.fuse(&flat, &reference);
        assert_eq!(fused.len(), 10);
        assert!(fused.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn strategies_are_selectable() {
        assert_eq!(FusionKind::Mean.strategy().name(), "mean");
        assert_eq!(FusionKind::Calibrated.strategy().name(), "calibrated");
    }

    #[test]
    fn conditioning_backfills_but_never_forward_fills() {
        let out = condition_fused(&[f64::NAN, f64::NAN, 1.0, f64::NAN, 3.0, f64::NAN]);
        assert_eq!(&out[..5], &[1.0, 1.0, 1.0, 2.0, 3.0]);
        assert!(out[5].is_nan());
    }
}

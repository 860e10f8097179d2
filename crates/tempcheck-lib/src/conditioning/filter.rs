use crate::error::FilterError;
use std::f64::consts::PI;

/// One second-order section, `a[0] == 1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Biquad {
    pub b: [f64; 3],
    pub a: [f64; 3],
}

impl Biquad {
    fn dc_gain(&self) -> f64 {
        self.b.iter().sum::<f64>() / self.a.iter().sum::<f64>()
    }

    /// Direct form II transposed state for a constant input of 1.
    fn steady_state(&self) -> [f64; 2] {
        let g = self.dc_gain();
        let z1 = self.b[2] - self.a[2] * g;
        let z0 = self.b[1] - self.a[1] * g + z1;
        [z0, z1]
    }

    fn magnitude(&self, w: f64) -> f64 {
        let eval = |c: &[f64; 3]| {
            let re = c[0] + c[1] * w.cos() + c[2] * (2.0 * w).cos();
            let im = -(c[1] * w.sin() + c[2] * (2.0 * w).sin());
            (re * re + im * im).sqrt()
        };
        eval(&self.b) / eval(&self.a)
    }
}

/// Digital Butterworth low-pass as cascaded second-order sections.
#[derive(Debug, Clone, PartialEq)]
pub struct Butterworth {
    sections: Vec<Biquad>,
}

impl Butterworth {
    /// Design an `order`-pole low-pass with `cutoff` given as a fraction of Nyquist.
    /// Uses the bilinear transform with frequency pre-warping; every section has
    /// unit DC gain.
    pub fn lowpass(order: usize, cutoff: f64) -> Result<Self, FilterError> {
        if order == 0 {
            return Err(FilterError::InvalidOrder);
        }
        if !(cutoff > 0.0 && cutoff < 1.0) {
            return Err(FilterError::InvalidCutoff(cutoff));
        }
        // pre-warped analog cutoff for a sampling rate of 2 (Nyquist = 1)
        let wo = 4.0 * (PI * cutoff / 2.0).tan();
        let n = order as f64;
        let mut sections = Vec::with_capacity(order.div_ceil(2));

        for k in 0..order / 2 {
            let m = -(n - 1.0) + 2.0 * k as f64;
            let theta = PI * m / (2.0 * n);
            let (pr, pi) = (-theta.cos() * wo, -theta.sin() * wo);
            let (zr, zi) = bilinear(pr, pi);
            let a1 = -2.0 * zr;
            let a2 = zr * zr + zi * zi;
            let g = (1.0 + a1 + a2) / 4.0;
            sections.push(Biquad {
                b: [g, 2.0 * g, g],
                a: [1.0, a1, a2],
            });
        }
        if order % 2 == 1 {
            let (z, _) = bilinear(-wo, 0.0);
            let g = (1.0 - z) / 2.0;
            sections.push(Biquad {
                b: [g, g, 0.0],
                a: [1.0, -z, 0.0],
            });
        }
        Ok(Self { sections })
    }

    pub fn sections(&self) -> &[Biquad] {
        &self.sections
    }

    /// Samples of odd extension added on each side by `filtfilt`.
    pub fn pad_len(&self) -> usize {
        3 * (2 * self.sections.len() + 1)
    }

    /// Magnitude response at normalized frequency `f` (fraction of Nyquist).
    pub fn magnitude(&self, f: f64) -> f64 {
        let w = PI * f;
        self.sections.iter().map(|s| s.magnitude(w)).product()
    }

    /// Causal pass with every section started in steady state for `initial`.
    pub fn filter(&self, data: &[f64], initial: f64) -> Vec<f64> {
        let mut states: Vec<[f64; 2]> = Vec::with_capacity(self.sections.len());
        let mut level = initial;
        for section in &self.sections {
            let [z0, z1] = section.steady_state();
            states.push([z0 * level, z1 * level]);
            level *= section.dc_gain();
        }
        let mut out = Vec::with_capacity(data.len());
        for &x in data {
            let mut v = x;
            for (s, z) in self.sections.iter().zip(states.iter_mut()) {
                let y = s.b[0] * v + z[0];
                z[0] = s.b[1] * v - s.a[1] * y + z[1];
                z[1] = s.b[2] * v - s.a[2] * y;
                v = y;
            }
            out.push(v);
        }
        out
    }

    /// Zero-phase forward-backward filtering.
    ///
    /// The input is padded with an odd extension of `pad_len()` samples on each
    /// side. Inputs no longer than the padding produce an all-`NaN` output of
    /// the same length. Any missing sample is an error.
    pub fn filtfilt(&self, data: &[f64]) -> Result<Vec<f64>, FilterError> {
        if let Some(idx) = data.iter().position(|v| !v.is_finite()) {
            return Err(FilterError::MissingSample(idx));
        }
        let n = data.len();
        let edge = self.pad_len();
        if n <= edge {
            return Ok(vec![f64::NAN; n]);
        }
        let (first, last) = (data[0], data[n - 1]);
        let mut ext = Vec::with_capacity(n + 2 * edge);
        ext.extend((1..=edge).rev().map(|i| 2.0 * first - data[i]));
        ext.extend_from_slice(data);
        ext.extend((1..=edge).map(|i| 2.0 * last - data[n - 1 - i]));

        let forward = self.filter(&ext, ext[0]);
        let mut reversed: Vec<f64> = forward.into_iter().rev().collect();
        let backward = self.filter(&reversed, reversed[0]);
        reversed = backward.into_iter().rev().collect();
        Ok(reversed[edge..edge + n].to_vec())
    }
}

fn bilinear(pr: f64, pi: f64) -> (f64, f64) {
    // z = (4 + p) / (4 - p) for a sampling rate of 2
    let (nr, ni) = (4.0 + pr, pi);
    let (dr, di) = (4.0 - pr, -pi);
    let den = dr * dr + di * di;
    ((nr * dr + ni * di) / den, (ni * dr - nr * di) / den)
}

/// Filter the valid prefix of `data`; trailing missing samples stay missing.
pub fn lowpass_gap_free(filter: &Butterworth, data: &[f64]) -> Result<Vec<f64>, FilterError> {
    let valid_len = data
        .iter()
        .rposition(|v| v.is_finite())
        .map(|i| i + 1)
        .unwrap_or(0);
    let mut out = filter.filtfilt(&data[..valid_len])?;
    out.resize(data.len(), f64::NAN);
    Ok(out)
}

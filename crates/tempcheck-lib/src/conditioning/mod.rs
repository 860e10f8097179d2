pub mod filter;
pub mod fusion;
pub mod glitch;
pub mod resample;

pub use filter::{lowpass_gap_free, Butterworth};
pub use fusion::{condition_fused, CalibratedFusion, FusionKind, FusionStrategy, MeanFusion};
pub use glitch::{GlitchCorrector, GlitchReport};
pub use resample::Resampler;

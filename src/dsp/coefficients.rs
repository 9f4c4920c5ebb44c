//! Stage Coefficient Mapping
//!
//! Single source of truth for what Frequency and Shape mean. Given a center
//! frequency, a shape value and a stage count, produces one all-pass
//! coefficient per stage by spreading virtual corner frequencies around the
//! center on an octave scale.
//!
//! # Shape law
//! - Low shape: wide spread (up to ~5 octaves), gamma < 1, stages spread
//!   almost evenly in log frequency.
//! - High shape: narrow spread (0.12 octaves), gamma > 1, stages cluster on
//!   the center frequency.
//! - Low center frequencies get a stronger shape response (`low_comp`), since
//!   the same octave spread is far less audible down there.
//!
//! The mapping is pure: identical inputs produce bit-identical coefficients.

use crate::dsp::utils::{clamp_freq, lerp, max_freq, MIN_FREQ_HZ};
use std::f32::consts::PI;

// Exponent applied to the low-frequency compensation curve.
const LOW_COMP_EXP: f32 = 1.15;
// Extra shape sensitivity at the bottom of the range.
const LOW_COMP_SHAPE_GAIN: f32 = 0.95;
// Spread endpoints in octaves. Max grows with low_comp.
const SPREAD_MAX_OCT: f32 = 4.0;
const SPREAD_MAX_LOW_GAIN: f32 = 1.1;
const SPREAD_MIN_OCT: f32 = 0.12;
// Warp exponent endpoints. Max grows with low_comp.
const GAMMA_MIN: f32 = 0.45;
const GAMMA_MAX: f32 = 3.0;
const GAMMA_MAX_LOW_GAIN: f32 = 0.8;

// Coefficient cache quantization.
const FREQ_BINS_PER_DECADE: f32 = 1200.0;
const SHAPE_BINS: f32 = 1000.0;

/// Numerical stability bound on |a|.
pub const MAX_COEFF: f32 = 0.9999;

/// Bilinear-transform all-pass coefficient for corner `freq`:
/// `a = (1 - tan(pi f / sr)) / (1 + tan(pi f / sr))`.
///
/// Falls back to 0.0 if the tangent is not finite.
#[inline]
pub fn allpass_coefficient(freq: f32, sample_rate: f32) -> f32 {
    let f = clamp_freq(freq, sample_rate);
    let t = (PI * f / sample_rate).tan();
    if !t.is_finite() {
        return 0.0;
    }
    let a = (1.0 - t) / (1.0 + t);
    if !a.is_finite() {
        return 0.0;
    }
    a.clamp(-MAX_COEFF, MAX_COEFF)
}

/// Intermediate values of the shape law, exposed for inspection and tests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpreadLaw {
    pub low_comp: f32,
    pub shape_comp: f32,
    pub spread_oct: f32,
    pub gamma: f32,
}

impl SpreadLaw {
    pub fn new(center: f32, shape: f32, sample_rate: f32) -> Self {
        let hi = max_freq(sample_rate);
        let center = clamp_freq(center, sample_rate);
        let shape = if shape.is_finite() {
            shape.clamp(0.0, 1.0)
        } else {
            0.0
        };

        let range = (hi / MIN_FREQ_HZ).log2().max(1e-6);
        let log_pos = ((center / MIN_FREQ_HZ).log2() / range).clamp(0.0, 1.0);
        let low_comp = (1.0 - log_pos).clamp(0.0, 1.0).powf(LOW_COMP_EXP);

        let strength = 1.0 + LOW_COMP_SHAPE_GAIN * low_comp;
        let shape_comp = (0.5 + (shape - 0.5) * strength).clamp(0.0, 1.0);

        let spread_max = SPREAD_MAX_OCT + SPREAD_MAX_LOW_GAIN * low_comp;
        let spread_oct = lerp(spread_max, SPREAD_MIN_OCT, shape_comp);
        let gamma = lerp(GAMMA_MIN, GAMMA_MAX + GAMMA_MAX_LOW_GAIN * low_comp, shape_comp);

        Self {
            low_comp,
            shape_comp,
            spread_oct,
            gamma,
        }
    }

    /// Octave offset of stage `index` out of `stages`.
    #[inline]
    pub fn octave_offset(&self, index: usize, stages: usize) -> f32 {
        if stages <= 1 {
            return 0.0;
        }
        let u = 2.0 * (index as f32 / (stages - 1) as f32) - 1.0;
        let warped = u.abs().powf(self.gamma).copysign(u);
        0.5 * self.spread_oct * warped
    }
}

/// Corner frequency for each stage. `out.len()` is the stage count.
pub fn map_stage_frequencies(center: f32, shape: f32, sample_rate: f32, out: &mut [f32]) {
    let stages = out.len();
    if stages == 0 {
        return;
    }
    let center = clamp_freq(center, sample_rate);
    if stages == 1 {
        out[0] = center;
        return;
    }
    let law = SpreadLaw::new(center, shape, sample_rate);
    for (i, f) in out.iter_mut().enumerate() {
        let oct = law.octave_offset(i, stages);
        *f = clamp_freq(center * oct.exp2(), sample_rate);
    }
}

/// One coefficient per stage. `out.len()` is the stage count.
pub fn map_stage_coefficients(center: f32, shape: f32, sample_rate: f32, out: &mut [f32]) {
    let stages = out.len();
    if stages == 0 {
        return;
    }
    if stages == 1 {
        out[0] = allpass_coefficient(center, sample_rate);
        return;
    }
    let center = clamp_freq(center, sample_rate);
    let law = SpreadLaw::new(center, shape, sample_rate);
    for (i, a) in out.iter_mut().enumerate() {
        let oct = law.octave_offset(i, stages);
        let f = clamp_freq(center * oct.exp2(), sample_rate);
        *a = allpass_coefficient(f, sample_rate);
    }
}

/// Quantized key deciding when coefficients need recomputing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoefficientBins {
    pub freq_bin: i32,
    pub shape_bin: i32,
    pub stages: usize,
}

impl CoefficientBins {
    pub fn new(freq: f32, shape: f32, stages: usize, sample_rate: f32) -> Self {
        let f = clamp_freq(freq, sample_rate);
        let s = if shape.is_finite() {
            shape.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            freq_bin: ((f / MIN_FREQ_HZ).log10() * FREQ_BINS_PER_DECADE).round() as i32,
            shape_bin: (s * SHAPE_BINS).round() as i32,
            stages,
        }
    }
}

/// Coefficient vector plus the bins it was computed for.
///
/// Capacity is fixed at construction; `update` never allocates.
pub struct CoefficientCache {
    coeffs: Vec<f32>,
    len: usize,
    bins: Option<CoefficientBins>,
}

impl CoefficientCache {
    pub fn new(max_stages: usize) -> Self {
        Self {
            coeffs: vec![0.0; max_stages.max(1)],
            len: 0,
            bins: None,
        }
    }

    /// Recompute if any bin moved. Returns true when coefficients changed.
    pub fn update(&mut self, freq: f32, shape: f32, stages: usize, sample_rate: f32) -> bool {
        let stages = stages.min(self.coeffs.len());
        let bins = CoefficientBins::new(freq, shape, stages, sample_rate);
        if self.bins == Some(bins) {
            return false;
        }
        map_stage_coefficients(freq, shape, sample_rate, &mut self.coeffs[..stages]);
        self.len = stages;
        self.bins = Some(bins);
        true
    }

    /// Force the next `update` to recompute.
    pub fn invalidate(&mut self) {
        self.bins = None;
    }

    #[inline]
    pub fn coeffs(&self) -> &[f32] {
        &self.coeffs[..self.len]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

use std::f32::consts::PI;

/// Lowest corner frequency any stage may be tuned to.
pub const MIN_FREQ_HZ: f32 = 20.0;
/// Upper corner frequency limit as a fraction of the sample rate.
pub const MAX_FREQ_FRAC: f32 = 0.49;

pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t.clamp(0.0, 1.0)
}

/// Highest usable corner frequency for `sample_rate`.
#[inline]
pub fn max_freq(sample_rate: f32) -> f32 {
    (MAX_FREQ_FRAC * sample_rate).max(MIN_FREQ_HZ)
}

/// Clamp a frequency into the stable range `[20, 0.49 * sr]`.
/// Non-finite input falls back to the lower bound.
#[inline]
pub fn clamp_freq(freq: f32, sample_rate: f32) -> f32 {
    if !freq.is_finite() {
        return MIN_FREQ_HZ;
    }
    freq.clamp(MIN_FREQ_HZ, max_freq(sample_rate))
}

/// Symmetric square-root Hann window, written in place. Used as both analysis
/// and synthesis window so the product is a plain Hann.
pub fn fill_sqrt_hann_window(w: &mut [f32]) {
    let len = w.len();
    if len < 2 {
        w.fill(1.0);
        return;
    }
    let denom = (len - 1) as f32;
    for (i, v) in w.iter_mut().enumerate() {
        let hann = 0.5 * (1.0 - (2.0 * PI * i as f32 / denom).cos());
        *v = hann.max(0.0).sqrt();
    }
}

pub fn peak_abs(x: &[f32]) -> f32 {
    x.iter().fold(0.0f32, |m, &v| m.max(v.abs()))
}

pub fn frame_rms(x: &[f32]) -> f32 {
    let mut s = 0.0f32;
    for &v in x {
        s += v * v;
    }
    (s / (x.len().max(1) as f32)).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqrt_hann_is_symmetric_and_bounded() {
        let mut w = [0.0f32; 64];
        fill_sqrt_hann_window(&mut w);
        for i in 0..64 {
            assert!((w[i] - w[63 - i]).abs() < 1e-6);
            assert!(w[i] >= 0.0 && w[i] <= 1.0);
        }
        assert!(w[0].abs() < 1e-6);
    }

    #[test]
    fn squared_window_overlaps_to_near_unity() {
        let n = 1024;
        let mut w = vec![0.0f32; n];
        fill_sqrt_hann_window(&mut w);
        for i in 0..n / 2 {
            let sum = w[i] * w[i] + w[i + n / 2] * w[i + n / 2];
            assert!((sum - 1.0).abs() < 5e-3, "i={i} sum={sum}");
        }
    }

    #[test]
    fn clamp_freq_handles_nan_and_nyquist() {
        assert_eq!(clamp_freq(f32::NAN, 48000.0), MIN_FREQ_HZ);
        assert_eq!(clamp_freq(1.0, 48000.0), MIN_FREQ_HZ);
        assert!((clamp_freq(1.0e9, 48000.0) - 0.49 * 48000.0).abs() < 1e-3);
    }
}

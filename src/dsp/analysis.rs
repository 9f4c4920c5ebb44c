//! Offline Response Analysis
//!
//! FFT-based measurement of impulse responses: magnitude, unwrapped phase and
//! group delay. Used to verify the network stays all-pass and by the render
//! tool's report. Allocates freely; never call from the audio thread.

use rustfft::{num_complex::Complex, FftPlanner};
use std::f32::consts::PI;

/// Zero-pad (or truncate) `ir` to `fft_len` and return its spectrum bins
/// `0..=fft_len/2`.
pub fn spectrum(ir: &[f32], fft_len: usize) -> Vec<Complex<f32>> {
    let fft_len = fft_len.max(2);
    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(fft_len);

    let mut buf: Vec<Complex<f32>> = (0..fft_len)
        .map(|i| Complex::new(ir.get(i).copied().unwrap_or(0.0), 0.0))
        .collect();
    fft.process(&mut buf);
    buf.truncate(fft_len / 2 + 1);
    buf
}

/// Linear magnitude per bin.
pub fn magnitude_response(ir: &[f32], fft_len: usize) -> Vec<f32> {
    spectrum(ir, fft_len).iter().map(|c| c.norm()).collect()
}

/// Unwrapped phase in radians per bin.
pub fn phase_response(ir: &[f32], fft_len: usize) -> Vec<f32> {
    let bins = spectrum(ir, fft_len);
    let mut out = Vec::with_capacity(bins.len());
    let mut prev = 0.0f32;
    let mut offset = 0.0f32;
    for (k, c) in bins.iter().enumerate() {
        let p = c.arg();
        if k > 0 {
            let d = p - prev;
            if d > PI {
                offset -= 2.0 * PI;
            } else if d < -PI {
                offset += 2.0 * PI;
            }
        }
        prev = p;
        out.push(p + offset);
    }
    out
}

/// Group delay in samples per bin (negative phase derivative).
pub fn group_delay(ir: &[f32], fft_len: usize) -> Vec<f32> {
    let phase = phase_response(ir, fft_len);
    let bin_w = 2.0 * PI / fft_len.max(2) as f32;
    let mut gd = vec![0.0; phase.len()];
    for k in 1..phase.len() {
        gd[k] = -(phase[k] - phase[k - 1]) / bin_w;
    }
    if gd.len() > 1 {
        gd[0] = gd[1];
    }
    gd
}

/// Largest deviation from unity magnitude, in dB.
pub fn max_magnitude_deviation_db(ir: &[f32], fft_len: usize) -> f32 {
    magnitude_response(ir, fft_len)
        .iter()
        .map(|m| (20.0 * m.max(1e-12).log10()).abs())
        .fold(0.0, f32::max)
}

//! First-order All-pass Stage
//!
//! The single filter cell the whole dispersion network is built from.
//! Magnitude response is flat; only phase rotates, by 180 degrees across the
//! stage's corner frequency.
//!
//! # Design Notes
//! - Transposed form with a single delay register per stage
//! - Coefficient is owned by the network, not by the stage, so every channel
//!   and chain can share one coefficient vector
//! - No allocation, no branching beyond denormal flushing

/// Delay registers below this are flushed to zero.
const DENORMAL_FLUSH: f32 = 1e-30;

/// One first-order all-pass cell: `y = -a*x + z1`, `z1 = x + a*y`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllPassStage {
    z1: f32,
}

impl AllPassStage {
    pub fn new() -> Self {
        Self { z1: 0.0 }
    }

    /// Process a single sample with coefficient `a`.
    #[inline]
    pub fn process(&mut self, x: f32, a: f32) -> f32 {
        let y = -a * x + self.z1;
        let z = x + a * y;
        self.z1 = if z.abs() < DENORMAL_FLUSH { 0.0 } else { z };
        y
    }

    /// Explicitly clear the delay state.
    #[inline]
    pub fn reset(&mut self) {
        self.z1 = 0.0;
    }

    #[inline]
    #[allow(dead_code)]
    pub fn state(&self) -> f32 {
        self.z1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::analysis::magnitude_response;

    fn impulse_response(a: f32, len: usize) -> Vec<f32> {
        let mut stage = AllPassStage::new();
        (0..len)
            .map(|n| stage.process(if n == 0 { 1.0 } else { 0.0 }, a))
            .collect()
    }

    #[test]
    fn test_impulse_starts_at_minus_a() {
        let ir = impulse_response(0.6, 4);
        assert!((ir[0] + 0.6).abs() < 1e-7);
        // y[1] = 1 - a^2
        assert!((ir[1] - (1.0 - 0.36)).abs() < 1e-6);
        // y[2] = a * (1 - a^2)
        assert!((ir[2] - 0.6 * 0.64).abs() < 1e-6);
    }

    #[test]
    fn test_unit_energy_and_flat_magnitude() {
        for &a in &[-0.95f32, -0.5, 0.0, 0.3, 0.9] {
            let ir = impulse_response(a, 4096);
            let energy: f32 = ir.iter().map(|v| v * v).sum();
            assert!((energy - 1.0).abs() < 1e-3, "a={a} energy={energy}");

            let mags = magnitude_response(&ir, 4096);
            for (k, m) in mags.iter().enumerate() {
                assert!((m - 1.0).abs() < 1e-2, "a={a} bin={k} mag={m}");
            }
        }
    }

    #[test]
    fn test_reset_clears_state() {
        let mut stage = AllPassStage::new();
        stage.process(1.0, 0.5);
        assert!(stage.state() != 0.0);
        stage.reset();
        assert_eq!(stage.state(), 0.0);
        assert!((stage.process(0.0, 0.5)).abs() < 1e-12);
    }

    #[test]
    fn test_nan_propagates() {
        let mut stage = AllPassStage::new();
        assert!(stage.process(f32::NAN, 0.5).is_nan());
    }
}

//! Control Smoothing (Block Rate)
//!
//! Linear ramps for the continuous controls. Each new target restarts a ramp
//! of fixed duration from wherever the value currently is, so automation of
//! any speed ends up as a sequence of straight segments.
//!
//! This is a smoother for control values, NOT a filter for audio. It is
//! advanced once per block by the block length.
//!
//! Ramp times:
//! - stage count: 2 s (topology-ish, most disruptive)
//! - frequency: 1 s
//! - shape: 100 ms

pub const STAGE_RAMP_SEC: f32 = 2.0;
pub const FREQ_RAMP_SEC: f32 = 1.0;
pub const SHAPE_RAMP_SEC: f32 = 0.1;

/// Fixed-duration linear ramp toward a target.
#[derive(Clone, Copy, Debug)]
pub struct LinearSmoother {
    current: f32,
    target: f32,
    step: f32,
    remaining: usize,
    ramp_samples: usize,
}

impl Default for LinearSmoother {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl LinearSmoother {
    pub fn new(initial: f32) -> Self {
        Self {
            current: initial,
            target: initial,
            step: 0.0,
            remaining: 0,
            ramp_samples: 0,
        }
    }

    /// Set ramp duration. Does not restart a ramp in progress.
    pub fn set_ramp(&mut self, seconds: f32, sample_rate: f32) {
        let samples = (seconds * sample_rate).round();
        self.ramp_samples = if samples.is_finite() && samples > 0.0 {
            samples as usize
        } else {
            0
        };
    }

    /// Move toward `target`. Non-finite targets are ignored.
    pub fn set_target(&mut self, target: f32) {
        if !target.is_finite() || target == self.target {
            return;
        }
        self.target = target;
        if self.ramp_samples == 0 {
            self.current = target;
            self.remaining = 0;
            return;
        }
        self.remaining = self.ramp_samples;
        self.step = (self.target - self.current) / self.ramp_samples as f32;
    }

    /// Advance by `n` samples and return the new value.
    #[inline]
    pub fn skip(&mut self, n: usize) -> f32 {
        if self.remaining == 0 {
            return self.current;
        }
        if n >= self.remaining {
            self.current = self.target;
            self.remaining = 0;
        } else {
            self.current += self.step * n as f32;
            self.remaining -= n;
        }
        self.current
    }

    /// Advance by one sample.
    #[inline]
    #[allow(dead_code)]
    pub fn next(&mut self) -> f32 {
        self.skip(1)
    }

    /// Snap to `value` with no ramp.
    pub fn reset(&mut self, value: f32) {
        self.current = value;
        self.target = value;
        self.step = 0.0;
        self.remaining = 0;
    }

    #[inline]
    pub fn current(&self) -> f32 {
        self.current
    }

    #[inline]
    pub fn target(&self) -> f32 {
        self.target
    }

    #[inline]
    pub fn is_smoothing(&self) -> bool {
        self.remaining > 0
    }
}

/// The three smoothed controls, advanced together once per block.
#[derive(Clone, Copy, Debug, Default)]
pub struct ControlSmoothers {
    pub frequency: LinearSmoother,
    pub shape: LinearSmoother,
    pub stages: LinearSmoother,
    initialized: bool,
}

/// Smoothed control values for one block.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SmoothedControls {
    pub frequency: f32,
    pub shape: f32,
    pub stages: f32,
}

impl ControlSmoothers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prepare(&mut self, sample_rate: f32) {
        self.frequency.set_ramp(FREQ_RAMP_SEC, sample_rate);
        self.shape.set_ramp(SHAPE_RAMP_SEC, sample_rate);
        self.stages.set_ramp(STAGE_RAMP_SEC, sample_rate);
        self.initialized = false;
    }

    /// Feed targets and advance by `n` samples. The first call after
    /// `prepare`/`reset` snaps straight to the targets.
    pub fn process(&mut self, frequency: f32, shape: f32, stages: f32, n: usize) -> SmoothedControls {
        if !self.initialized {
            self.frequency.reset(frequency);
            self.shape.reset(shape);
            self.stages.reset(stages);
            self.initialized = true;
        } else {
            self.frequency.set_target(frequency);
            self.shape.set_target(shape);
            self.stages.set_target(stages);
        }
        SmoothedControls {
            frequency: self.frequency.skip(n),
            shape: self.shape.skip(n),
            stages: self.stages.skip(n),
        }
    }

    /// Values as of the last `process` call.
    pub fn current(&self) -> SmoothedControls {
        SmoothedControls {
            frequency: self.frequency.current(),
            shape: self.shape.current(),
            stages: self.stages.current(),
        }
    }

    pub fn reset(&mut self) {
        self.initialized = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reaches_target_after_ramp() {
        let mut s = LinearSmoother::new(0.0);
        s.set_ramp(0.01, 48000.0); // 480 samples
        s.set_target(1.0);
        assert!(s.is_smoothing());
        let half = s.skip(240);
        assert!((half - 0.5).abs() < 1e-4);
        let done = s.skip(240);
        assert_eq!(done, 1.0);
        assert!(!s.is_smoothing());
    }

    #[test]
    fn test_overshoot_clamped_to_target() {
        let mut s = LinearSmoother::new(10.0);
        s.set_ramp(0.01, 48000.0);
        s.set_target(2.0);
        assert_eq!(s.skip(100_000), 2.0);
    }

    #[test]
    fn test_retarget_restarts_from_current() {
        let mut s = LinearSmoother::new(0.0);
        s.set_ramp(0.01, 48000.0);
        s.set_target(1.0);
        s.skip(240);
        s.set_target(0.0);
        let v = s.skip(240);
        assert!((v - 0.25).abs() < 1e-4);
    }

    #[test]
    fn test_non_finite_target_ignored() {
        let mut s = LinearSmoother::new(3.0);
        s.set_ramp(0.01, 48000.0);
        s.set_target(f32::NAN);
        assert_eq!(s.skip(10), 3.0);
        assert_eq!(s.target(), 3.0);
    }

    #[test]
    fn test_first_block_snaps() {
        let mut c = ControlSmoothers::new();
        c.prepare(48000.0);
        let v = c.process(1000.0, 0.5, 32.0, 64);
        assert_eq!(v.frequency, 1000.0);
        assert_eq!(v.shape, 0.5);
        assert_eq!(v.stages, 32.0);

        let v = c.process(2000.0, 0.5, 32.0, 4800);
        assert!(v.frequency > 1000.0 && v.frequency < 2000.0);
        assert_eq!(c.current(), v);
    }

    #[test]
    fn test_stages_ramp_slower_than_shape() {
        let mut c = ControlSmoothers::new();
        c.prepare(48000.0);
        c.process(1000.0, 0.0, 0.0, 1);
        let v = c.process(1000.0, 1.0, 100.0, 4800);
        assert_eq!(v.shape, 1.0);
        assert!(v.stages < 100.0);
    }
}

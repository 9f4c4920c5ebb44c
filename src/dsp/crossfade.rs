//! Dual-Engine Crossfade Controller
//!
//! Bookkeeping for the A/B engine pair: which engine is active, whether a
//! transition is running, how far into the ramp it is, and at most one
//! queued topology request. The engines themselves live in the processor;
//! this type only moves role labels and ramp position.
//!
//! States: `Stable` (one engine audible) and `Transitioning` (both engines
//! run, output is `(1 - t) * active + t * standby`). The ramp position only
//! ever grows during a transition and is zeroed at start and completion.
//! The processor does not call `advance` while the incoming engine is still
//! filling its first frames, so the ramp can sit at 0 for a while.

use crate::dsp::engine::Topology;

/// Crossfade duration.
pub const CROSSFADE_SEC: f32 = 0.05;

/// Ramp length in samples for `sample_rate`, never zero.
pub fn crossfade_samples(sample_rate: f32) -> usize {
    let n = (CROSSFADE_SEC * sample_rate).round();
    if n.is_finite() && n >= 1.0 {
        n as usize
    } else {
        1
    }
}

#[derive(Debug, Clone)]
pub struct Crossfade {
    active: usize,
    transitioning: bool,
    position: usize,
    length: usize,
    pending: Option<Topology>,
}

impl Crossfade {
    pub fn new(length: usize) -> Self {
        Self {
            active: 0,
            transitioning: false,
            position: 0,
            length: length.max(1),
            pending: None,
        }
    }

    pub fn set_length(&mut self, length: usize) {
        self.length = length.max(1);
    }

    #[inline]
    pub fn length(&self) -> usize {
        self.length
    }

    /// Index of the audible engine.
    #[inline]
    pub fn active(&self) -> usize {
        self.active
    }

    /// Index of the engine being faded in (or idle).
    #[inline]
    pub fn standby(&self) -> usize {
        1 - self.active
    }

    #[inline]
    pub fn is_transitioning(&self) -> bool {
        self.transitioning
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.position
    }

    #[inline]
    pub fn pending(&self) -> Option<Topology> {
        self.pending
    }

    /// Offer a topology request.
    ///
    /// Returns true when the caller should configure the standby engine with
    /// `requested` and call [`Crossfade::start`]. While a transition runs the
    /// request is queued instead; a request equal to the incoming topology
    /// drops whatever was queued.
    pub fn request(&mut self, requested: Topology, active: Topology, incoming: Topology) -> bool {
        if self.transitioning {
            self.pending = if requested == incoming {
                None
            } else {
                Some(requested)
            };
            return false;
        }
        requested != active
    }

    pub fn start(&mut self) {
        self.transitioning = true;
        self.position = 0;
    }

    /// Weight of the incoming engine for sample `offset` of the current block.
    /// Reaches 1.0 at the end of the ramp and stays there.
    #[inline]
    pub fn weight(&self, offset: usize) -> f32 {
        if !self.transitioning {
            return 0.0;
        }
        let pos = self.position + offset;
        if pos >= self.length {
            1.0
        } else {
            pos as f32 / self.length as f32
        }
    }

    /// `(outgoing, incoming)` gains for sample `offset`.
    #[inline]
    pub fn gains(&self, offset: usize) -> (f32, f32) {
        let t = self.weight(offset);
        (1.0 - t, t)
    }

    /// Move the ramp forward by a block of `n` samples. Returns true when the
    /// transition completed, in which case the engines have already swapped
    /// roles.
    pub fn advance(&mut self, n: usize) -> bool {
        if !self.transitioning {
            return false;
        }
        self.position = self.position.saturating_add(n);
        if self.position < self.length {
            return false;
        }
        self.active = self.standby();
        self.transitioning = false;
        self.position = 0;
        true
    }

    pub fn take_pending(&mut self) -> Option<Topology> {
        self.pending.take()
    }

    /// Abandon any transition. The active index is kept.
    pub fn reset(&mut self) {
        self.transitioning = false;
        self.position = 0;
        self.pending = None;
    }
}

impl Default for Crossfade {
    fn default() -> Self {
        Self::new(crossfade_samples(48000.0))
    }
}

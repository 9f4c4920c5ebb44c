//! Dispersion Engine
//!
//! One complete, independently processable context: sample rate, topology,
//! coefficient cache, forward network and reverse OLA state. The processor
//! owns two of these and crossfades between them when the topology moves.
//!
//! # Topology vs. smoothed stages
//! The topology's stage count is the *target* integer count. It selects the
//! reverse analysis window. The stages actually run each block follow the
//! smoothed (possibly fractional) control value, so stage automation is
//! continuous inside one engine.
//!
//! # Real-time
//! `new` allocates everything at the maximum topology. `prepare`,
//! `set_topology`, `process`, `reset` and `release` never allocate.

use crate::dsp::coefficients::CoefficientCache;
use crate::dsp::network::{stages_needed, AllPassNetwork, MAX_CHAINS, MAX_STAGES};
use crate::dsp::reverse::{window_samples, ReverseOla};

/// Stage count, chain count and mode: the structure of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Topology {
    pub stages: usize,
    pub chains: usize,
    pub reverse: bool,
}

impl Topology {
    /// Clamps stage and chain counts into the supported range.
    pub fn new(stages: usize, chains: usize, reverse: bool) -> Self {
        Self {
            stages: stages.min(MAX_STAGES),
            chains: chains.clamp(1, MAX_CHAINS),
            reverse,
        }
    }
}

impl Default for Topology {
    fn default() -> Self {
        Self::new(32, 1, false)
    }
}

/// Per-block control values shared by both engines.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineControls {
    pub frequency: f32,
    pub shape: f32,
    /// Smoothed stage count, may be fractional.
    pub stages: f32,
}

impl Default for EngineControls {
    fn default() -> Self {
        Self {
            frequency: 1000.0,
            shape: 0.0,
            stages: 32.0,
        }
    }
}

pub struct Engine {
    sample_rate: f32,
    prepared: bool,
    topology: Topology,
    coeffs: CoefficientCache,
    network: AllPassNetwork,
    reverse: ReverseOla,
}

impl Engine {
    pub fn new() -> Self {
        Self {
            sample_rate: 48000.0,
            prepared: false,
            topology: Topology::default(),
            coeffs: CoefficientCache::new(MAX_STAGES),
            network: AllPassNetwork::with_capacity(MAX_STAGES),
            reverse: ReverseOla::new(),
        }
    }

    /// Set the sample rate and clear all state. A non-finite or
    /// non-positive rate leaves the engine unprepared.
    pub fn prepare(&mut self, sample_rate: f32) {
        self.prepared = sample_rate.is_finite() && sample_rate > 0.0;
        if self.prepared {
            self.sample_rate = sample_rate;
        }
        self.reset();
    }

    /// Reconfigure for `topology`. Clears filter and OLA state and computes
    /// initial coefficients from `controls`.
    pub fn set_topology(&mut self, topology: Topology, controls: &EngineControls) {
        let topology = Topology::new(topology.stages, topology.chains, topology.reverse);
        self.topology = topology;

        let needed = stages_needed(controls.stages, MAX_STAGES);
        self.network.reset();
        self.network.set_active(needed, topology.chains);
        self.reverse
            .configure(window_samples(topology.stages, topology.chains));
        self.reverse.set_active(needed, topology.chains);

        self.coeffs.invalidate();
        self.coeffs
            .update(controls.frequency, controls.shape, needed, self.sample_rate);
    }

    #[inline]
    pub fn topology(&self) -> Topology {
        self.topology
    }

    #[inline]
    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    #[allow(dead_code)]
    pub fn coefficients(&self) -> &[f32] {
        self.coeffs.coeffs()
    }

    /// Whether the output is at full level. Forward engines always are; a
    /// reverse engine only once its OLA frames overlap.
    #[inline]
    pub fn is_ready(&self) -> bool {
        !self.topology.reverse || self.reverse.frames_ready()
    }

    /// 0 in forward mode, one analysis window in reverse mode.
    #[inline]
    pub fn latency_samples(&self) -> usize {
        if self.topology.reverse {
            self.reverse.latency_samples()
        } else {
            0
        }
    }

    /// Process one block in place. `right` is `None` for mono.
    pub fn process(&mut self, left: &mut [f32], right: Option<&mut [f32]>, controls: &EngineControls) {
        if !self.prepared {
            return;
        }

        let needed = stages_needed(controls.stages, MAX_STAGES);
        let chains = self.topology.chains;
        self.coeffs
            .update(controls.frequency, controls.shape, needed, self.sample_rate);
        let coeffs = self.coeffs.coeffs();
        let stages = controls.stages;

        if self.topology.reverse {
            self.reverse.set_active(needed, chains);
            for x in left.iter_mut() {
                *x = self.reverse.process_sample(0, *x, coeffs, stages);
            }
            if let Some(right) = right {
                for x in right.iter_mut() {
                    *x = self.reverse.process_sample(1, *x, coeffs, stages);
                }
            }
        } else {
            self.network.set_active(needed, chains);
            for x in left.iter_mut() {
                *x = self.network.process_sample(0, *x, coeffs, stages);
            }
            if let Some(right) = right {
                for x in right.iter_mut() {
                    *x = self.network.process_sample(1, *x, coeffs, stages);
                }
            }
        }
    }

    /// Clear filter and OLA state, keep topology and sample rate.
    pub fn reset(&mut self) {
        self.network.reset();
        self.reverse.reset();
        self.coeffs.invalidate();
    }

    /// Zero everything and mark unprepared.
    pub fn release(&mut self) {
        self.prepared = false;
        self.reset();
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

//! All-pass Network
//!
//! A cascade of chains, each chain a cascade of [`AllPassStage`]s, for up to
//! two channels. Storage is sized once for the maximum topology; the active
//! stage and chain counts only select a prefix of it.
//!
//! Stages that become active again after being unused are cleared before
//! their first sample so stale delay state never leaks into the output.

use crate::dsp::allpass::AllPassStage;

pub const MAX_STAGES: usize = 128;
pub const MAX_CHAINS: usize = 4;
pub const MAX_CHANNELS: usize = 2;

/// Fractional stage contributions below this are skipped.
pub const FRACTION_EPS: f32 = 1e-4;

/// Split a (possibly fractional) stage count into whole stages and the blend
/// amount of the one extra stage.
#[inline]
pub fn split_stages(value: f32, max: usize) -> (usize, f32) {
    if !value.is_finite() || value <= 0.0 {
        return (0, 0.0);
    }
    let v = value.min(max as f32);
    let base = v.floor();
    let frac = v - base;
    let base = base as usize;
    if base >= max || frac <= FRACTION_EPS {
        (base.min(max), 0.0)
    } else {
        (base, frac)
    }
}

/// Number of stages that actually run for `value` (base plus a fractional one).
#[inline]
pub fn stages_needed(value: f32, max: usize) -> usize {
    let (base, frac) = split_stages(value, max);
    if frac > 0.0 {
        base + 1
    } else {
        base
    }
}

pub struct AllPassNetwork {
    stages: Vec<AllPassStage>,
    max_stages: usize,
    active_stages: usize,
    active_chains: usize,
}

impl AllPassNetwork {
    pub fn new() -> Self {
        Self::with_capacity(MAX_STAGES)
    }

    pub fn with_capacity(max_stages: usize) -> Self {
        let max_stages = max_stages.max(1);
        Self {
            stages: vec![AllPassStage::new(); MAX_CHANNELS * MAX_CHAINS * max_stages],
            max_stages,
            active_stages: 0,
            active_chains: 1,
        }
    }

    #[inline]
    fn offset(&self, channel: usize, chain: usize) -> usize {
        (channel * MAX_CHAINS + chain) * self.max_stages
    }

    #[inline]
    pub fn active_chains(&self) -> usize {
        self.active_chains
    }

    /// Declare how many stages and chains will run. Newly activated stages and
    /// chains are cleared first.
    pub fn set_active(&mut self, stages: usize, chains: usize) {
        let stages = stages.min(self.max_stages);
        let chains = chains.clamp(1, MAX_CHAINS);

        if chains > self.active_chains {
            for chain in self.active_chains..chains {
                self.reset_range(0, self.max_stages, chain..chain + 1);
            }
        }
        if stages > self.active_stages {
            self.reset_range(self.active_stages, stages, 0..chains.min(self.active_chains));
        }

        self.active_stages = stages;
        self.active_chains = chains;
    }

    /// Clear stages `from..to` of the given chains on every channel.
    pub fn reset_range(&mut self, from: usize, to: usize, chains: std::ops::Range<usize>) {
        let to = to.min(self.max_stages);
        if from >= to {
            return;
        }
        for channel in 0..MAX_CHANNELS {
            for chain in chains.clone() {
                let base = self.offset(channel, chain);
                for st in &mut self.stages[base + from..base + to] {
                    st.reset();
                }
            }
        }
    }

    /// Clear stages `0..stages` of every chain `0..chains` on one channel.
    pub fn reset_channel(&mut self, channel: usize, stages: usize, chains: usize) {
        let stages = stages.min(self.max_stages);
        for chain in 0..chains.min(MAX_CHAINS) {
            let base = self.offset(channel, chain);
            for st in &mut self.stages[base..base + stages] {
                st.reset();
            }
        }
    }

    /// Clear every delay register.
    pub fn reset(&mut self) {
        for st in self.stages.iter_mut() {
            st.reset();
        }
    }

    /// Run one sample of `channel` through all active chains.
    ///
    /// `coeffs` must hold at least `stages_needed(stages, ..)` entries; the
    /// last one is the fractional stage when `stages` is not whole.
    #[inline]
    pub fn process_sample(&mut self, channel: usize, x: f32, coeffs: &[f32], stages: f32) -> f32 {
        let (base, frac) = split_stages(stages, coeffs.len().min(self.max_stages));
        let chains = self.active_chains;
        let mut y = x;
        for chain in 0..chains {
            let off = self.offset(channel, chain);
            let cells = &mut self.stages[off..off + self.max_stages];
            for (cell, &a) in cells.iter_mut().zip(coeffs.iter()).take(base) {
                y = cell.process(y, a);
            }
            if frac > 0.0 {
                let full = cells[base].process(y, coeffs[base]);
                y += frac * (full - y);
            }
        }
        y
    }
}

impl Default for AllPassNetwork {
    fn default() -> Self {
        Self::new()
    }
}

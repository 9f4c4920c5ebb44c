//! Disperser Processor
//!
//! Real-time entry point of the effect. Owns the A/B engine pair, the
//! crossfade controller and the control smoothers, and turns one host buffer
//! plus plain control values into processed audio in place.
//!
//! # Per block
//! 1. Sanitize controls (clamp counts, clamp frequency and shape).
//! 2. Advance the smoothers by the block length.
//! 3. If the requested topology differs from the active engine's, configure
//!    the standby engine and start a crossfade (or queue the request when
//!    one is already running).
//! 4. Run the active engine in place; during a crossfade also run the
//!    standby engine on a scratch copy and blend. A reverse standby engine
//!    is run but not blended until its OLA output is at full level, so the
//!    ramp never fades into the silent start of a fresh window.
//! 5. Apply output polarity.
//!
//! Blocks larger than the prepared maximum are split into chunks so the
//! scratch buffers never need to grow on the audio thread.

use crate::dsp::crossfade::{crossfade_samples, Crossfade};
use crate::dsp::engine::{Engine, EngineControls, Topology};
use crate::dsp::network::{MAX_CHAINS, MAX_STAGES};
use crate::dsp::smoothing::ControlSmoothers;
use crate::dsp::utils::MIN_FREQ_HZ;

const DEFAULT_MAX_BLOCK: usize = 1024;

/// Plain control values from the host adapter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Controls {
    /// Center frequency in Hz.
    pub frequency: f32,
    /// 0 = wide spread, 1 = stages pinched onto the center.
    pub shape: f32,
    pub stages: i32,
    pub chains: i32,
    pub reverse: bool,
    /// Final polarity flip.
    pub invert: bool,
}

impl Default for Controls {
    fn default() -> Self {
        Self {
            frequency: 1000.0,
            shape: 0.0,
            stages: 32,
            chains: 1,
            reverse: false,
            invert: false,
        }
    }
}

impl Controls {
    /// Clamp every value into its supported range. Never fails.
    pub fn sanitized(&self) -> Self {
        let frequency = if self.frequency.is_finite() {
            self.frequency.max(MIN_FREQ_HZ)
        } else {
            1000.0
        };
        let shape = if self.shape.is_finite() {
            self.shape.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            frequency,
            shape,
            stages: self.stages.clamp(0, MAX_STAGES as i32),
            chains: self.chains.clamp(1, MAX_CHAINS as i32),
            reverse: self.reverse,
            invert: self.invert,
        }
    }

    pub fn topology(&self) -> Topology {
        Topology::new(self.stages.max(0) as usize, self.chains.max(1) as usize, self.reverse)
    }
}

pub struct DisperserProcessor {
    engines: [Engine; 2],
    crossfade: Crossfade,
    smoothers: ControlSmoothers,
    scratch_l: Vec<f32>,
    scratch_r: Vec<f32>,
    max_block: usize,
    prepared: bool,
    needs_topology: bool,
}

impl DisperserProcessor {
    /// Allocates both engines at the maximum topology. Not real-time safe.
    pub fn new() -> Self {
        Self {
            engines: [Engine::new(), Engine::new()],
            crossfade: Crossfade::default(),
            smoothers: ControlSmoothers::new(),
            scratch_l: vec![0.0; DEFAULT_MAX_BLOCK],
            scratch_r: vec![0.0; DEFAULT_MAX_BLOCK],
            max_block: DEFAULT_MAX_BLOCK,
            prepared: false,
            needs_topology: true,
        }
    }

    /// Size scratch buffers, reset smoothing and both engines.
    ///
    /// May allocate. A non-finite or non-positive sample rate leaves the
    /// processor unprepared and `process` becomes a no-op.
    pub fn prepare(&mut self, sample_rate: f32, max_block: usize) {
        if !sample_rate.is_finite() || sample_rate <= 0.0 {
            log::warn!("disperser: refusing to prepare at sample rate {sample_rate}");
            self.prepared = false;
            return;
        }

        self.max_block = max_block.max(1);
        if self.scratch_l.len() < self.max_block {
            self.scratch_l.resize(self.max_block, 0.0);
            self.scratch_r.resize(self.max_block, 0.0);
        }

        for engine in self.engines.iter_mut() {
            engine.prepare(sample_rate);
        }
        self.crossfade.set_length(crossfade_samples(sample_rate));
        self.crossfade.reset();
        self.smoothers.prepare(sample_rate);
        self.needs_topology = true;
        self.prepared = true;

        log::info!(
            "disperser: prepared sr={} max_block={} crossfade={} samples",
            sample_rate,
            self.max_block,
            self.crossfade.length()
        );
    }

    /// Zero all state. `prepare` must be called again before processing.
    pub fn release(&mut self) {
        for engine in self.engines.iter_mut() {
            engine.release();
        }
        self.crossfade.reset();
        self.smoothers.reset();
        self.scratch_l.fill(0.0);
        self.scratch_r.fill(0.0);
        self.prepared = false;
        self.needs_topology = true;
    }

    /// Clear audio state, keep the prepared configuration. The next block
    /// snaps smoothers and topology to their targets.
    pub fn reset(&mut self) {
        for engine in self.engines.iter_mut() {
            engine.reset();
        }
        self.crossfade.reset();
        self.smoothers.reset();
        self.needs_topology = true;
    }

    #[inline]
    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    #[inline]
    pub fn is_transitioning(&self) -> bool {
        self.crossfade.is_transitioning()
    }

    /// Latency of the audible engine.
    #[inline]
    pub fn latency_samples(&self) -> usize {
        self.engines[self.crossfade.active()].latency_samples()
    }

    #[inline]
    pub fn active_topology(&self) -> Topology {
        self.engines[self.crossfade.active()].topology()
    }

    /// Process `buffers` in place. Only the first two channels are touched;
    /// a single channel is processed as mono.
    pub fn process(&mut self, buffers: &mut [&mut [f32]], controls: &Controls) {
        if !self.prepared {
            return;
        }
        let num_samples = buffers.iter().take(2).map(|b| b.len()).min().unwrap_or(0);
        if num_samples == 0 {
            return;
        }

        let controls = controls.sanitized();
        let mut start = 0;
        while start < num_samples {
            let end = (start + self.max_block).min(num_samples);
            match &mut buffers[..] {
                [left] => self.process_chunk(&mut left[start..end], None, &controls),
                [left, right, ..] => {
                    self.process_chunk(&mut left[start..end], Some(&mut right[start..end]), &controls)
                }
                [] => return,
            }
            start = end;
        }
    }

    fn process_chunk(&mut self, left: &mut [f32], mut right: Option<&mut [f32]>, controls: &Controls) {
        let n = left.len();
        let smoothed = self.smoothers.process(
            controls.frequency,
            controls.shape,
            controls.stages as f32,
            n,
        );
        let engine_controls = EngineControls {
            frequency: smoothed.frequency,
            shape: smoothed.shape,
            stages: smoothed.stages,
        };

        let target = controls.topology();
        if self.needs_topology {
            let active = self.crossfade.active();
            self.engines[active].set_topology(target, &engine_controls);
            self.needs_topology = false;
        } else {
            self.request_topology(target, &engine_controls);
        }

        let active = self.crossfade.active();
        if !self.crossfade.is_transitioning() {
            self.engines[active].process(left, right.as_deref_mut(), &engine_controls);
        } else {
            let standby = self.crossfade.standby();
            let incoming_ready = self.engines[standby].is_ready();
            self.scratch_l[..n].copy_from_slice(left);
            if let Some(r) = right.as_deref() {
                self.scratch_r[..n].copy_from_slice(r);
            }

            self.engines[active].process(left, right.as_deref_mut(), &engine_controls);
            let incoming_right = if right.is_some() {
                Some(&mut self.scratch_r[..n])
            } else {
                None
            };
            self.engines[standby].process(&mut self.scratch_l[..n], incoming_right, &engine_controls);

            // Ramp held at position 0 until the incoming engine is ready.
            if !incoming_ready {
                apply_polarity(left, right, controls.invert);
                return;
            }

            for (i, x) in left.iter_mut().enumerate() {
                let (g_out, g_in) = self.crossfade.gains(i);
                *x = g_out * *x + g_in * self.scratch_l[i];
            }
            if let Some(r) = right.as_deref_mut() {
                for (i, x) in r.iter_mut().enumerate() {
                    let (g_out, g_in) = self.crossfade.gains(i);
                    *x = g_out * *x + g_in * self.scratch_r[i];
                }
            }

            if self.crossfade.advance(n) {
                let now_active = self.crossfade.active();
                crate::dz_log!(
                    "[XFADE] done -> engine {} stages={} chains={} reverse={}",
                    now_active,
                    self.engines[now_active].topology().stages,
                    self.engines[now_active].topology().chains,
                    self.engines[now_active].topology().reverse
                );
                if let Some(pending) = self.crossfade.take_pending() {
                    if pending != self.engines[now_active].topology() {
                        self.start_transition(pending, &engine_controls);
                    }
                }
            }
        }

        apply_polarity(left, right, controls.invert);
    }

    fn request_topology(&mut self, target: Topology, controls: &EngineControls) {
        let active = self.engines[self.crossfade.active()].topology();
        let incoming = self.engines[self.crossfade.standby()].topology();
        if self.crossfade.request(target, active, incoming) {
            self.start_transition(target, controls);
        }
    }

    fn start_transition(&mut self, target: Topology, controls: &EngineControls) {
        let standby = self.crossfade.standby();
        self.engines[standby].set_topology(target, controls);
        self.crossfade.start();
        crate::dz_log!(
            "[XFADE] start engine {} stages={} chains={} reverse={} latency={}",
            standby,
            target.stages,
            target.chains,
            target.reverse,
            self.engines[standby].latency_samples()
        );
    }
}

fn apply_polarity(left: &mut [f32], right: Option<&mut [f32]>, invert: bool) {
    if !invert {
        return;
    }
    for x in left.iter_mut() {
        *x = -*x;
    }
    if let Some(r) = right {
        for x in r.iter_mut() {
            *x = -*x;
        }
    }
}

impl Default for DisperserProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::reverse::window_samples;
    use crate::dsp::utils::peak_abs;

    const SR: f32 = 48000.0;
    const BLOCK: usize = 512;

    fn sine(len: usize, freq: f32, amp: f32, phase_offset: usize) -> Vec<f32> {
        (0..len)
            .map(|i| amp * (2.0 * std::f32::consts::PI * freq * (i + phase_offset) as f32 / SR).sin())
            .collect()
    }

    fn prepared(max_block: usize) -> DisperserProcessor {
        let mut p = DisperserProcessor::new();
        p.prepare(SR, max_block);
        p
    }

    fn run_stereo(p: &mut DisperserProcessor, left: &mut [f32], right: &mut [f32], c: &Controls) {
        let mut bufs: [&mut [f32]; 2] = [left, right];
        p.process(&mut bufs, c);
    }

    #[test]
    fn test_invert_is_exact_negation() {
        let c = Controls {
            stages: 12,
            chains: 2,
            frequency: 640.0,
            shape: 0.4,
            ..Controls::default()
        };
        let inv = Controls { invert: true, ..c };

        let mut a = prepared(BLOCK);
        let mut b = prepared(BLOCK);
        for block in 0..4 {
            let mut la = sine(BLOCK, 330.0, 0.5, block * BLOCK);
            let mut ra = sine(BLOCK, 440.0, 0.5, block * BLOCK);
            let mut lb = la.clone();
            let mut rb = ra.clone();
            run_stereo(&mut a, &mut la, &mut ra, &c);
            run_stereo(&mut b, &mut lb, &mut rb, &inv);
            for i in 0..BLOCK {
                assert_eq!(lb[i].to_bits(), (-la[i]).to_bits());
                assert_eq!(rb[i].to_bits(), (-ra[i]).to_bits());
            }
        }
    }

    #[test]
    fn test_topology_changes_do_not_click() {
        let mut p = prepared(BLOCK);
        let mut c = Controls {
            stages: 8,
            ..Controls::default()
        };

        let mut pre_peak = 0.0f32;
        let mut offset = 0;
        for _ in 0..40 {
            let mut l = sine(BLOCK, 220.0, 0.5, offset);
            let mut r = l.clone();
            run_stereo(&mut p, &mut l, &mut r, &c);
            pre_peak = pre_peak.max(peak_abs(&l));
            offset += BLOCK;
        }
        assert!(pre_peak > 0.1);

        for change in 0..3 {
            match change {
                0 => c.stages = 16,
                1 => c.chains = 2,
                _ => c.reverse = true,
            }
            for _ in 0..8 {
                let mut l = sine(BLOCK, 220.0, 0.5, offset);
                let mut r = l.clone();
                run_stereo(&mut p, &mut l, &mut r, &c);
                let peak = peak_abs(&l);
                assert!(peak <= 2.0 * pre_peak, "change={change} peak={peak} pre={pre_peak}");
                offset += BLOCK;
            }
        }
    }

    fn run_block(p: &mut DisperserProcessor, c: &Controls, offset: &mut usize) -> f32 {
        let mut l = sine(BLOCK, 220.0, 0.5, *offset);
        let mut r = l.clone();
        run_stereo(p, &mut l, &mut r, c);
        *offset += BLOCK;
        peak_abs(&l)
    }

    #[test]
    fn test_stepping_stages_in_reverse_never_drops_out() {
        let mut p = prepared(BLOCK);
        let mut c = Controls {
            stages: 64,
            reverse: true,
            ..Controls::default()
        };
        let mut offset = 0;

        let mut steady = 0.0f32;
        for block in 0..40 {
            let peak = run_block(&mut p, &c, &mut offset);
            if block >= 24 {
                steady = steady.max(peak);
            }
        }
        assert!(steady > 0.1, "steady={steady}");

        for block in 0..80 {
            if block % 8 == 0 && block <= 32 {
                c.stages = (72 + block as i32).min(100);
            }
            let peak = run_block(&mut p, &c, &mut offset);
            assert!(
                peak > 0.05 * steady,
                "block={block} stages={} peak={peak} steady={steady}",
                c.stages
            );
        }
        assert!(!p.is_transitioning());
        assert_eq!(p.active_topology(), Topology::new(100, 1, true));
    }

    #[test]
    fn test_switch_to_reverse_holds_until_frames_overlap() {
        let mut p = prepared(BLOCK);
        let mut c = Controls {
            stages: 64,
            ..Controls::default()
        };
        let mut offset = 0;

        let mut steady = 0.0f32;
        for _ in 0..20 {
            steady = steady.max(run_block(&mut p, &c, &mut offset));
        }
        assert!(steady > 0.1, "steady={steady}");

        c.reverse = true;
        let n = window_samples(64, 1);
        let hold_blocks = (n + n / 2) / BLOCK;
        for block in 0..30 {
            let peak = run_block(&mut p, &c, &mut offset);
            assert!(peak > 0.05 * steady, "block={block} peak={peak} steady={steady}");
            if block < hold_blocks {
                assert!(p.is_transitioning(), "block={block}");
                assert_eq!(p.latency_samples(), 0, "block={block}");
            }
        }
        assert!(!p.is_transitioning());
        assert_eq!(p.latency_samples(), n);
    }

    #[test]
    fn test_crossfade_runs_and_swaps() {
        let mut p = prepared(BLOCK);
        let mut c = Controls {
            stages: 8,
            ..Controls::default()
        };
        let mut l = vec![0.0f32; BLOCK];
        let mut r = vec![0.0f32; BLOCK];
        run_stereo(&mut p, &mut l, &mut r, &c);
        assert!(!p.is_transitioning());
        assert_eq!(p.active_topology(), Topology::new(8, 1, false));

        c.stages = 16;
        run_stereo(&mut p, &mut l, &mut r, &c);
        assert!(p.is_transitioning());
        // 2400-sample ramp at 48 kHz finishes within five 512-sample blocks.
        for _ in 0..4 {
            run_stereo(&mut p, &mut l, &mut r, &c);
        }
        assert!(!p.is_transitioning());
        assert_eq!(p.active_topology(), Topology::new(16, 1, false));
    }

    #[test]
    fn test_request_during_transition_is_queued() {
        let mut p = prepared(BLOCK);
        let mut c = Controls {
            stages: 8,
            ..Controls::default()
        };
        let mut l = vec![0.0f32; BLOCK];
        let mut r = vec![0.0f32; BLOCK];
        run_stereo(&mut p, &mut l, &mut r, &c);

        c.stages = 16;
        run_stereo(&mut p, &mut l, &mut r, &c);
        c.stages = 24;
        run_stereo(&mut p, &mut l, &mut r, &c);
        assert_eq!(p.active_topology().stages, 8);

        for _ in 0..3 {
            run_stereo(&mut p, &mut l, &mut r, &c);
        }
        // First ramp done, the queued request started a second one.
        assert_eq!(p.active_topology().stages, 16);
        assert!(p.is_transitioning());

        for _ in 0..5 {
            run_stereo(&mut p, &mut l, &mut r, &c);
        }
        assert!(!p.is_transitioning());
        assert_eq!(p.active_topology().stages, 24);
    }

    #[test]
    fn test_returning_to_incoming_topology_drops_queue() {
        let mut p = prepared(BLOCK);
        let mut c = Controls {
            stages: 8,
            ..Controls::default()
        };
        let mut l = vec![0.0f32; BLOCK];
        let mut r = vec![0.0f32; BLOCK];
        run_stereo(&mut p, &mut l, &mut r, &c);

        c.stages = 16;
        run_stereo(&mut p, &mut l, &mut r, &c);
        c.stages = 24;
        run_stereo(&mut p, &mut l, &mut r, &c);
        c.stages = 16;
        for _ in 0..3 {
            run_stereo(&mut p, &mut l, &mut r, &c);
        }
        assert!(!p.is_transitioning());
        assert_eq!(p.active_topology().stages, 16);
    }

    #[test]
    fn test_reverse_reports_latency_and_starts_silent() {
        let mut p = prepared(BLOCK);
        let c = Controls {
            stages: 16,
            reverse: true,
            ..Controls::default()
        };
        let n = window_samples(16, 1);
        let mut l = sine(2 * n, 300.0, 0.5, 0);
        let mut r = l.clone();
        run_stereo(&mut p, &mut l, &mut r, &c);
        assert_eq!(p.latency_samples(), n);
        assert!(l[..n].iter().all(|&v| v == 0.0));
        assert!(l[n..].iter().any(|&v| v != 0.0));
    }

    #[test]
    fn test_internal_chunking_matches_small_blocks() {
        let c = Controls {
            stages: 20,
            shape: 0.6,
            ..Controls::default()
        };
        let input = sine(1000, 523.0, 0.7, 0);

        let mut chunked = prepared(64);
        let mut out_a = input.clone();
        let mut tmp = input.clone();
        run_stereo(&mut chunked, &mut out_a, &mut tmp, &c);

        let mut stepped = prepared(64);
        let mut out_b = input.clone();
        let mut tmp_b = input.clone();
        for (l, r) in out_b.chunks_mut(64).zip(tmp_b.chunks_mut(64)) {
            run_stereo(&mut stepped, l, r, &c);
        }

        for i in 0..input.len() {
            assert_eq!(out_a[i].to_bits(), out_b[i].to_bits(), "i={i}");
        }
    }

    #[test]
    fn test_mono_matches_left_of_stereo() {
        let c = Controls {
            stages: 10,
            ..Controls::default()
        };
        let input = sine(BLOCK, 200.0, 0.5, 0);

        let mut mono = prepared(BLOCK);
        let mut m = input.clone();
        let mut bufs: [&mut [f32]; 1] = [&mut m];
        mono.process(&mut bufs, &c);

        let mut stereo = prepared(BLOCK);
        let mut l = input.clone();
        let mut r = vec![0.0f32; BLOCK];
        run_stereo(&mut stereo, &mut l, &mut r, &c);

        assert_eq!(m, l);
    }

    #[test]
    fn test_degenerate_inputs_are_noops() {
        let mut unprepared = DisperserProcessor::new();
        let mut l = vec![0.5f32; 16];
        let mut r = vec![0.5f32; 16];
        run_stereo(&mut unprepared, &mut l, &mut r, &Controls::default());
        assert!(l.iter().all(|&v| v == 0.5));

        let mut bad = DisperserProcessor::new();
        bad.prepare(f32::NAN, 512);
        assert!(!bad.is_prepared());
        bad.prepare(0.0, 512);
        assert!(!bad.is_prepared());

        let mut p = prepared(BLOCK);
        let mut empty: [&mut [f32]; 0] = [];
        p.process(&mut empty, &Controls::default());
        let mut zero_len: [&mut [f32]; 2] = [&mut [], &mut []];
        p.process(&mut zero_len, &Controls::default());
        assert!(!p.is_transitioning());
    }

    #[test]
    fn test_out_of_range_controls_are_clamped() {
        let c = Controls {
            frequency: f32::NAN,
            shape: 7.0,
            stages: 10_000,
            chains: -3,
            ..Controls::default()
        }
        .sanitized();
        assert_eq!(c.frequency, 1000.0);
        assert_eq!(c.shape, 1.0);
        assert_eq!(c.stages, MAX_STAGES as i32);
        assert_eq!(c.chains, 1);

        let mut p = prepared(BLOCK);
        let mut l = sine(BLOCK, 100.0, 0.5, 0);
        let mut r = l.clone();
        run_stereo(&mut p, &mut l, &mut r, &c);
        assert!(l.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_release_then_prepare() {
        let mut p = prepared(BLOCK);
        p.release();
        let mut l = vec![0.5f32; 8];
        let mut r = vec![0.5f32; 8];
        run_stereo(&mut p, &mut l, &mut r, &Controls::default());
        assert!(l.iter().all(|&v| v == 0.5));

        p.prepare(44100.0, 256);
        run_stereo(&mut p, &mut l, &mut r, &Controls::default());
        assert!(l.iter().any(|&v| v != 0.5));
    }

    #[test]
    fn test_process_does_not_allocate() {
        let mut p = prepared(BLOCK);
        let mut c = Controls::default();
        let mut l = sine(BLOCK, 100.0, 0.5, 0);
        let mut r = l.clone();
        assert_no_alloc::assert_no_alloc(|| {
            for step in 0..8 {
                c.stages = 8 + step * 4;
                c.reverse = step % 3 == 0;
                run_stereo(&mut p, &mut l, &mut r, &c);
            }
        });
    }
}

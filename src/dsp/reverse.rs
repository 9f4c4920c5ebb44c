//! Reverse Dispersion (Overlap-Add)
//!
//! Applies the all-pass network backwards in time, frame by frame, so the
//! dispersion smear lands *before* each transient instead of after it.
//!
//! # Pipeline (per channel)
//! 1. Every input sample is queued in a ring of `N` samples.
//! 2. Every output sample is popped from an accumulation ring and the slot is
//!    cleared immediately.
//! 3. Once `N` samples are queued (and then every `H = N/2` samples), the
//!    frame is windowed with a square-root Hann, run through a freshly cleared
//!    network from its last sample to its first, windowed again and summed
//!    into the accumulator `N` samples ahead of the read cursor.
//!
//! Analysis x synthesis window is a Hann at 50% overlap, so with zero stages
//! the output is the input delayed by exactly `N` samples.
//!
//! # Latency
//! Fixed at `N` samples for a given configuration. The first `N` outputs of a
//! cold engine are exact zeros.
//!
//! # Real-time
//! All buffers are allocated once at the maximum window size. `configure`
//! only changes the logical length and clears state.

use crate::dsp::network::{AllPassNetwork, MAX_CHANNELS, MAX_STAGES};
use crate::dsp::utils::fill_sqrt_hann_window;
use ringbuf::{Consumer, Producer, RingBuffer};

/// Smallest analysis window.
pub const MIN_WINDOW: usize = 512;
/// Largest analysis window. All buffers are sized for this.
pub const MAX_WINDOW: usize = 16384;
// Base window length before complexity scaling.
const WINDOW_BASE: usize = 256;
// Extra samples of window per stage per chain.
const WINDOW_PER_STAGE: usize = 32;
// Accumulator length relative to the window.
const ACCUM_MULT: usize = 2;
// Frames needed before every output sample is covered by two overlapping frames.
const READY_FRAMES: u8 = 2;

/// Analysis window length for a topology: longer for more stages and chains,
/// always a power of two in `[MIN_WINDOW, MAX_WINDOW]`.
pub fn window_samples(stages: usize, chains: usize) -> usize {
    let complexity = stages.saturating_mul(chains.max(1));
    let raw = WINDOW_BASE.saturating_add(complexity.saturating_mul(WINDOW_PER_STAGE));
    raw.checked_next_power_of_two()
        .unwrap_or(MAX_WINDOW)
        .clamp(MIN_WINDOW, MAX_WINDOW)
}

struct OlaChannel {
    input_producer: Producer<f32>,
    input_consumer: Consumer<f32>,
    accum: Vec<f32>,
    read_pos: usize,
    write_pos: usize,
    frames: u8,
}

impl OlaChannel {
    fn new() -> Self {
        let (input_producer, input_consumer) = RingBuffer::<f32>::new(MAX_WINDOW).split();
        Self {
            input_producer,
            input_consumer,
            accum: vec![0.0; MAX_WINDOW * ACCUM_MULT],
            read_pos: 0,
            write_pos: 0,
            frames: 0,
        }
    }

    fn reset(&mut self, win_size: usize) {
        while self.input_consumer.pop().is_some() {}
        let len = win_size * ACCUM_MULT;
        self.accum[..len].fill(0.0);
        self.read_pos = 0;
        self.write_pos = win_size;
        self.frames = 0;
    }
}

pub struct ReverseOla {
    channels: [OlaChannel; MAX_CHANNELS],
    network: AllPassNetwork,
    window: Vec<f32>,
    frame: Vec<f32>,
    reversed: Vec<f32>,
    win_size: usize,
    hop_size: usize,
    accum_len: usize,
}

impl ReverseOla {
    /// Allocates every buffer at [`MAX_WINDOW`]. Not real-time safe.
    pub fn new() -> Self {
        let mut ola = Self {
            channels: [OlaChannel::new(), OlaChannel::new()],
            network: AllPassNetwork::with_capacity(MAX_STAGES),
            window: vec![0.0; MAX_WINDOW],
            frame: vec![0.0; MAX_WINDOW],
            reversed: vec![0.0; MAX_WINDOW],
            win_size: MIN_WINDOW,
            hop_size: MIN_WINDOW / 2,
            accum_len: MIN_WINDOW * ACCUM_MULT,
        };
        ola.configure(MIN_WINDOW);
        ola
    }

    /// Set the window length and clear all state. No allocation.
    pub fn configure(&mut self, win_size: usize) {
        let win_size = win_size.clamp(MIN_WINDOW, MAX_WINDOW) & !1;
        self.win_size = win_size;
        self.hop_size = win_size / 2;
        self.accum_len = win_size * ACCUM_MULT;
        fill_sqrt_hann_window(&mut self.window[..win_size]);
        self.reset();
    }

    /// Clear rings and filter state, keeping the window length.
    pub fn reset(&mut self) {
        for ch in self.channels.iter_mut() {
            ch.reset(self.win_size);
        }
        self.network.reset();
        self.frame.fill(0.0);
        self.reversed.fill(0.0);
    }

    #[inline]
    pub fn window_size(&self) -> usize {
        self.win_size
    }

    #[inline]
    pub fn hop_size(&self) -> usize {
        self.hop_size
    }

    #[inline]
    pub fn latency_samples(&self) -> usize {
        self.win_size
    }

    /// True once two frames have landed on channel 0, i.e. every output sample
    /// from here on is fully overlapped. Before that the output is silent or
    /// still fading in.
    #[inline]
    pub fn frames_ready(&self) -> bool {
        self.channels[0].frames >= READY_FRAMES
    }

    /// Declare stage/chain counts for subsequent frames.
    pub fn set_active(&mut self, stages: usize, chains: usize) {
        self.network.set_active(stages, chains);
    }

    /// Push one input sample of `channel`, return one output sample.
    #[inline]
    pub fn process_sample(&mut self, channel: usize, x: f32, coeffs: &[f32], stages: f32) -> f32 {
        let accum_len = self.accum_len;
        let ch = &mut self.channels[channel];

        let _ = ch.input_producer.push(x);

        let y = ch.accum[ch.read_pos];
        ch.accum[ch.read_pos] = 0.0;
        ch.read_pos = (ch.read_pos + 1) % accum_len;

        if ch.input_consumer.len() >= self.win_size {
            self.process_frame(channel, coeffs, stages);
        }

        y
    }

    fn process_frame(&mut self, channel: usize, coeffs: &[f32], stages: f32) {
        let n = self.win_size;
        let hop = self.hop_size;
        let accum_len = self.accum_len;
        let chains = self.network.active_chains();

        // 1) Oldest-to-newest windowed frame
        {
            let ch = &self.channels[channel];
            for (i, &s) in ch.input_consumer.iter().take(n).enumerate() {
                self.frame[i] = s * self.window[i];
            }
        }

        // 2) Newest-to-oldest through a cleared network
        self.network.reset_channel(channel, coeffs.len(), chains);
        for m in 0..n {
            let x = self.frame[n - 1 - m];
            self.reversed[m] = self.network.process_sample(channel, x, coeffs, stages);
        }

        // 3) Back to natural order, synthesis window, overlap-add
        let ch = &mut self.channels[channel];
        let mut pos = ch.write_pos;
        for i in 0..n {
            ch.accum[pos] += self.reversed[n - 1 - i] * self.window[i];
            pos += 1;
            if pos == accum_len {
                pos = 0;
            }
        }
        ch.write_pos = (ch.write_pos + hop) % accum_len;

        // 4) Slide the input by one hop
        ch.input_consumer.discard(hop);
        ch.frames = ch.frames.saturating_add(1);
    }
}

impl Default for ReverseOla {
    fn default() -> Self {
        Self::new()
    }
}

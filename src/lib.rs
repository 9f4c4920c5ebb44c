mod debug;
pub mod dsp;
pub mod settings;

use crate::dsp::{Controls, DisperserProcessor, MAX_CHAINS, MAX_STAGES};
use crate::settings::resolve_shape;
use assert_no_alloc::permit_alloc;
use nih_plug::prelude::*;
use std::sync::Arc;

// -----------------------------------------------------------------------------
// PARAMETERS
// -----------------------------------------------------------------------------
#[derive(Params)]
pub struct DisperserParams {
    #[id = "stages"]
    pub stages: IntParam,

    #[id = "series"]
    pub series: IntParam,

    #[id = "freq"]
    pub frequency: FloatParam,

    #[id = "shape"]
    pub shape: FloatParam,

    #[id = "reverse"]
    pub reverse: BoolParam,

    #[id = "inv"]
    pub invert: BoolParam,

    // Diagnostic overrides: force shape to 0 / 1. S100 wins.
    #[id = "s0"]
    pub shape_zero: BoolParam,

    #[id = "s100"]
    pub shape_full: BoolParam,
}

fn format_hz(v: f32) -> String {
    if v >= 1000.0 {
        format!("{:.2} kHz", v / 1000.0)
    } else {
        format!("{:.0} Hz", v)
    }
}

fn format_percent(v: f32) -> String {
    format!("{:.0}%", v * 100.0)
}

impl Default for DisperserParams {
    fn default() -> Self {
        let defaults = Controls::default();
        Self {
            stages: IntParam::new(
                "Stages",
                defaults.stages,
                IntRange::Linear {
                    min: 0,
                    max: MAX_STAGES as i32,
                },
            ),

            series: IntParam::new(
                "Series",
                defaults.chains,
                IntRange::Linear {
                    min: 1,
                    max: MAX_CHAINS as i32,
                },
            ),

            frequency: FloatParam::new(
                "Frequency",
                defaults.frequency,
                FloatRange::Skewed {
                    min: 20.0,
                    max: 20000.0,
                    factor: FloatRange::skew_factor(-2.0),
                },
            )
            .with_value_to_string(Arc::new(format_hz))
            .with_string_to_value(formatters::s2v_f32_hz_then_khz()),

            shape: FloatParam::new(
                "Resonance",
                defaults.shape,
                FloatRange::Linear { min: 0.0, max: 1.0 },
            )
            .with_value_to_string(Arc::new(format_percent))
            .with_string_to_value(formatters::s2v_f32_percentage()),

            reverse: BoolParam::new("Reverse", defaults.reverse),
            invert: BoolParam::new("Inv", defaults.invert),
            shape_zero: BoolParam::new("S0", false),
            shape_full: BoolParam::new("S100", false),
        }
    }
}

impl DisperserParams {
    /// Snapshot of the current parameter values as core controls.
    pub fn controls(&self) -> Controls {
        Controls {
            frequency: self.frequency.value(),
            shape: resolve_shape(
                self.shape.value(),
                self.shape_zero.value(),
                self.shape_full.value(),
            ),
            stages: self.stages.value(),
            chains: self.series.value(),
            reverse: self.reverse.value(),
            invert: self.invert.value(),
        }
    }
}

// -----------------------------------------------------------------------------
// PLUGIN STRUCT
// -----------------------------------------------------------------------------
struct DisperserPlugin {
    params: Arc<DisperserParams>,
    processor: DisperserProcessor,
    reported_latency: u32,
}

impl Default for DisperserPlugin {
    fn default() -> Self {
        Self {
            params: Arc::new(DisperserParams::default()),
            processor: DisperserProcessor::new(),
            reported_latency: 0,
        }
    }
}

impl Plugin for DisperserPlugin {
    const NAME: &'static str = "Disperser";
    const VENDOR: &'static str = "Disperser";
    const URL: &'static str = "";
    const EMAIL: &'static str = "";
    const VERSION: &'static str = env!("CARGO_PKG_VERSION");

    const AUDIO_IO_LAYOUTS: &'static [AudioIOLayout] = &[
        AudioIOLayout {
            main_input_channels: NonZeroU32::new(2),
            main_output_channels: NonZeroU32::new(2),
            ..AudioIOLayout::const_default()
        },
        AudioIOLayout {
            main_input_channels: NonZeroU32::new(1),
            main_output_channels: NonZeroU32::new(1),
            ..AudioIOLayout::const_default()
        },
    ];

    const MIDI_INPUT: MidiConfig = MidiConfig::None;
    // Controls are read once per block.
    const SAMPLE_ACCURATE_AUTOMATION: bool = false;

    type SysExMessage = ();
    type BackgroundTask = ();

    fn params(&self) -> Arc<dyn Params> {
        self.params.clone()
    }

    fn initialize(
        &mut self,
        _audio_io_layout: &AudioIOLayout,
        buffer_config: &BufferConfig,
        context: &mut impl InitContext<Self>,
    ) -> bool {
        #[cfg(feature = "debug")]
        crate::debug::logger::init_logger();

        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let sample_rate = buffer_config.sample_rate;
            let max_block = buffer_config.max_buffer_size as usize;
            permit_alloc(|| self.processor.prepare(sample_rate, max_block));
            if !self.processor.is_prepared() {
                return false;
            }

            // Forward mode until the first block says otherwise.
            self.reported_latency = 0;
            context.set_latency_samples(0);

            #[cfg(feature = "debug")]
            crate::debug::logger::drain_to_file();

            true
        }))
        .unwrap_or(false)
    }

    fn process(
        &mut self,
        buffer: &mut Buffer,
        _aux: &mut AuxiliaryBuffers,
        context: &mut impl ProcessContext<Self>,
    ) -> ProcessStatus {
        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.process_internal(buffer, context)
        }))
        .unwrap_or(ProcessStatus::Normal)
    }

    fn reset(&mut self) {
        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.processor.reset();
        }))
        .unwrap_or(());
    }

    fn deactivate(&mut self) {
        self.processor.release();

        #[cfg(feature = "debug")]
        crate::debug::logger::drain_to_file();
    }
}

impl DisperserPlugin {
    fn process_internal(
        &mut self,
        buffer: &mut Buffer,
        context: &mut impl ProcessContext<Self>,
    ) -> ProcessStatus {
        let controls = self.params.controls();
        self.processor.process(buffer.as_slice(), &controls);

        let latency = self.processor.latency_samples() as u32;
        if latency != self.reported_latency {
            dz_log!(
                "[LATENCY] {} -> {} samples",
                self.reported_latency,
                latency
            );
            context.set_latency_samples(latency);
            self.reported_latency = latency;
        }

        ProcessStatus::Normal
    }
}

impl ClapPlugin for DisperserPlugin {
    const CLAP_ID: &'static str = "dev.disperser.disperser";
    const CLAP_DESCRIPTION: Option<&'static str> = Some("All-pass phase disperser");
    const CLAP_MANUAL_URL: Option<&'static str> = None;
    const CLAP_SUPPORT_URL: Option<&'static str> = None;
    const CLAP_FEATURES: &'static [ClapFeature] = &[
        ClapFeature::AudioEffect,
        ClapFeature::Phaser,
        ClapFeature::Filter,
        ClapFeature::Stereo,
        ClapFeature::Mono,
    ];
}

impl Vst3Plugin for DisperserPlugin {
    const VST3_CLASS_ID: [u8; 16] = *b"DisperserAllPas1";
    const VST3_SUBCATEGORIES: &'static [Vst3SubCategory] = &[
        Vst3SubCategory::Fx,
        Vst3SubCategory::Filter,
    ];
}

nih_export_clap!(DisperserPlugin);
nih_export_vst3!(DisperserPlugin);

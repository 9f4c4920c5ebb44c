pub mod allpass;
pub mod analysis;
pub mod coefficients;
pub mod crossfade;
pub mod engine;
pub mod network;
pub mod processor;
pub mod reverse;
pub mod smoothing;
pub mod utils;

pub use allpass::AllPassStage;
pub use coefficients::{allpass_coefficient, map_stage_coefficients, CoefficientCache};
pub use crossfade::Crossfade;
pub use engine::{Engine, EngineControls, Topology};
pub use network::{AllPassNetwork, MAX_CHAINS, MAX_CHANNELS, MAX_STAGES};
pub use processor::{Controls, DisperserProcessor};
pub use reverse::{window_samples, ReverseOla};
pub use smoothing::{ControlSmoothers, LinearSmoother};

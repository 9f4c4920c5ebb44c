//! Offline settings for the render tool and tests.
//!
//! Mirrors the plugin parameters as a flat JSON object. Missing fields take
//! the plugin defaults and out-of-range values are clamped when converted to
//! [`Controls`].

use crate::dsp::Controls;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Shape after the S0/S100 diagnostic overrides. S100 wins.
pub fn resolve_shape(shape: f32, force_zero: bool, force_full: bool) -> f32 {
    if force_full {
        1.0
    } else if force_zero {
        0.0
    } else {
        shape
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisperserSettings {
    pub frequency: f32,
    pub shape: f32,
    pub stages: i32,
    pub series: i32,
    pub reverse: bool,
    pub invert: bool,
    /// Force shape to 0.
    pub shape_zero: bool,
    /// Force shape to 1. Wins over `shape_zero`.
    pub shape_full: bool,
}

impl Default for DisperserSettings {
    fn default() -> Self {
        let c = Controls::default();
        Self {
            frequency: c.frequency,
            shape: c.shape,
            stages: c.stages,
            series: c.chains,
            reverse: c.reverse,
            invert: c.invert,
            shape_zero: false,
            shape_full: false,
        }
    }
}

impl DisperserSettings {
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("failed to parse disperser settings JSON")
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file '{}'", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("in '{}'", path.display()))
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("failed to serialize disperser settings")
    }

    pub fn effective_shape(&self) -> f32 {
        resolve_shape(self.shape, self.shape_zero, self.shape_full)
    }

    pub fn to_controls(&self) -> Controls {
        Controls {
            frequency: self.frequency,
            shape: self.effective_shape(),
            stages: self.stages,
            chains: self.series,
            reverse: self.reverse,
            invert: self.invert,
        }
        .sanitized()
    }
}

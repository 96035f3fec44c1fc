//! Processor configuration loaded from JSON.
//!
//! The plugin builds its configuration from host parameters; the render tool
//! and tests load it from a file. Missing fields take their defaults, so a
//! config only needs to name what differs from the stock 4-band layout.

use crate::dsp::compressor::CompressorSettings;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default crossover points (Hz) of the 4-band layout.
pub const DEFAULT_CROSSOVERS_HZ: [f32; 3] = [150.0, 1000.0, 5000.0];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    pub crossovers_hz: Vec<f32>,
    /// Cascade each crossover stage twice.
    pub linkwitz_riley: bool,
    pub bands: Vec<CompressorSettings>,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            crossovers_hz: DEFAULT_CROSSOVERS_HZ.to_vec(),
            linkwitz_riley: true,
            bands: vec![CompressorSettings::default(); DEFAULT_CROSSOVERS_HZ.len() + 1],
        }
    }
}

impl ProcessorConfig {
    pub fn num_bands(&self) -> usize {
        self.crossovers_hz.len() + 1
    }

    /// Structural checks only. Parameter values are clamped later.
    pub fn validate(&self) -> Result<()> {
        if self.crossovers_hz.iter().any(|hz| !hz.is_finite()) {
            return Err(Error::invalid("crossover frequencies must be finite"));
        }
        if self.bands.len() != self.num_bands() {
            return Err(Error::invalid(
                "band count must be one more than the crossover count",
            ));
        }
        if self.crossovers_hz.windows(2).any(|w| w[0] >= w[1]) {
            log::warn!(
                "crossovers are not ascending: {:?}; bands will overlap",
                self.crossovers_hz
            );
        }
        Ok(())
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&json)?;
        log::info!(
            "loaded {} band config from {}",
            config.num_bands(),
            path.display()
        );
        Ok(config)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

//! Thread-safe metering for real-time audio processing.
//!
//! Atomic float storage shared between the audio thread and any reader
//! (host GUI, render tool) without locks. Values are published once per block.

use std::sync::atomic::{AtomicU32, Ordering};

/// Per-block input/output peaks plus smoothed gain reduction per band.
#[derive(Debug, Default)]
pub struct Meters {
    input_peak: AtomicU32,
    output_peak: AtomicU32,
    gain_reduction_db: Vec<AtomicU32>,
}

impl Meters {
    pub fn new(bands: usize) -> Self {
        Self {
            input_peak: AtomicU32::new(0),
            output_peak: AtomicU32::new(0),
            gain_reduction_db: (0..bands).map(|_| AtomicU32::new(0)).collect(),
        }
    }

    pub fn num_bands(&self) -> usize {
        self.gain_reduction_db.len()
    }

    pub fn set_input_peak(&self, val: f32) {
        self.input_peak.store(val.to_bits(), Ordering::Relaxed);
    }

    pub fn set_output_peak(&self, val: f32) {
        self.output_peak.store(val.to_bits(), Ordering::Relaxed);
    }

    /// Out-of-range bands are ignored.
    pub fn set_gain_reduction_db(&self, band: usize, val: f32) {
        if let Some(slot) = self.gain_reduction_db.get(band) {
            slot.store(val.to_bits(), Ordering::Relaxed);
        }
    }

    pub fn get_input_peak(&self) -> f32 {
        f32::from_bits(self.input_peak.load(Ordering::Relaxed))
    }

    pub fn get_output_peak(&self) -> f32 {
        f32::from_bits(self.output_peak.load(Ordering::Relaxed))
    }

    /// Returns 0 dB for bands that do not exist.
    pub fn get_gain_reduction_db(&self, band: usize) -> f32 {
        self.gain_reduction_db
            .get(band)
            .map(|slot| f32::from_bits(slot.load(Ordering::Relaxed)))
            .unwrap_or(0.0)
    }

    pub fn reset(&self) {
        self.set_input_peak(0.0);
        self.set_output_peak(0.0);
        for slot in &self.gain_reduction_db {
            slot.store(0.0f32.to_bits(), Ordering::Relaxed);
        }
    }
}

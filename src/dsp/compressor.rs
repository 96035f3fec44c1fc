//! Band Compressor
//!
//! # Perceptual Contract
//! - **Target Source**: One frequency band out of the crossover.
//! - **Intended Effect**: Downward compression above threshold with a hard
//!   knee, then a fixed makeup gain.
//! - **Failure Modes**:
//!   - Audible pumping when release is short relative to the material.
//!   - Distortion of low bands when attack approaches the waveform period.
//! - **Will Not Do**:
//!   - Expansion (ratio is clamped to >= 1).
//!   - Look-ahead or RMS detection; the detector is instantaneous peak.
//!
//! # Lifecycle
//! - **Active**: Normal operation.
//! - **Bypassed**: Samples and envelope state are left untouched.
//!
//! # Signal Flow (per sample)
//! 1. Peak level in dB (`-120 dB` floor for near-silence).
//! 2. Static curve: `y_g = T + (x_g - T) / R` above threshold, unity below.
//! 3. Gain reduction `x_l = x_g - y_g`.
//! 4. One-pole ballistics against the previous smoothed value, attack
//!    coefficient when rising and release coefficient when falling.
//! 5. Control gain `10^((makeup - y_l) / 20)` applied to the sample.

use super::utils::{clamp_finite, db_to_lin, lin_to_db, time_constant_coeff};
use serde::{Deserialize, Serialize};

// Parameter limits. These mirror the ranges the host exposes; values outside
// are clamped rather than rejected.
pub const THRESHOLD_MIN_DB: f32 = -60.0;
pub const THRESHOLD_MAX_DB: f32 = 0.0;
pub const RATIO_MIN: f32 = 1.0;
pub const RATIO_MAX: f32 = 100.0;
pub const ATTACK_MIN_MS: f32 = 0.1;
pub const ATTACK_MAX_MS: f32 = 80.0;
pub const RELEASE_MIN_MS: f32 = 0.1;
pub const RELEASE_MAX_MS: f32 = 1000.0;
pub const MAKEUP_MIN_DB: f32 = 0.0;
pub const MAKEUP_MAX_DB: f32 = 40.0;

/// User-facing parameters of one band compressor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressorSettings {
    pub active: bool,
    pub threshold_db: f32,
    pub ratio: f32,
    pub attack_ms: f32,
    pub release_ms: f32,
    pub makeup_gain_db: f32,
}

impl Default for CompressorSettings {
    fn default() -> Self {
        Self {
            active: false,
            threshold_db: -20.0,
            ratio: 4.0,
            attack_ms: 10.0,
            release_ms: 100.0,
            makeup_gain_db: 0.0,
        }
    }
}

impl CompressorSettings {
    /// Copy with every field forced into its legal range.
    ///
    /// Non-finite values fall back to the gentlest setting available
    /// (unity ratio, 0 dB threshold and makeup) so a bad value leans towards
    /// pass-through rather than undefined math.
    pub fn sanitized(&self) -> Self {
        Self {
            active: self.active,
            threshold_db: clamp_finite(
                self.threshold_db,
                THRESHOLD_MIN_DB,
                THRESHOLD_MAX_DB,
                THRESHOLD_MAX_DB,
            ),
            ratio: clamp_finite(self.ratio, RATIO_MIN, RATIO_MAX, RATIO_MIN),
            attack_ms: clamp_finite(self.attack_ms, ATTACK_MIN_MS, ATTACK_MAX_MS, ATTACK_MIN_MS),
            release_ms: clamp_finite(
                self.release_ms,
                RELEASE_MIN_MS,
                RELEASE_MAX_MS,
                RELEASE_MIN_MS,
            ),
            makeup_gain_db: clamp_finite(
                self.makeup_gain_db,
                MAKEUP_MIN_DB,
                MAKEUP_MAX_DB,
                MAKEUP_MIN_DB,
            ),
        }
    }
}

/// Feed-forward peak compressor for a single band of a single channel.
#[derive(Debug, Clone)]
pub struct EnvelopeCompressor {
    settings: CompressorSettings,
    sample_rate: f32,
    alpha_attack: f32,
    alpha_release: f32,
    // Smoothed gain reduction (dB) of the previous sample, carried across blocks
    y_l_prev: f32,
    // Per-block control gains; sized once at construction
    control: Vec<f32>,
}

impl EnvelopeCompressor {
    /// Allocates the control scratch for `block_size` samples. Not for the
    /// audio thread.
    pub fn new(block_size: usize, sample_rate: f32) -> Self {
        let mut comp = Self {
            settings: CompressorSettings::default(),
            sample_rate,
            alpha_attack: 0.0,
            alpha_release: 0.0,
            y_l_prev: 0.0,
            control: vec![0.0; block_size.max(1)],
        };
        comp.update_coefficients();
        comp
    }

    /// Store (sanitised) parameters and derive the ballistics coefficients.
    pub fn configure(&mut self, sample_rate: f32, settings: CompressorSettings) {
        if sample_rate.is_finite() && sample_rate > 0.0 {
            self.sample_rate = sample_rate;
        }
        self.settings = settings.sanitized();
        self.update_coefficients();
    }

    pub fn set_active(&mut self, active: bool) {
        self.settings.active = active;
    }

    fn update_coefficients(&mut self) {
        self.alpha_attack = time_constant_coeff(self.settings.attack_ms, self.sample_rate);
        self.alpha_release = time_constant_coeff(self.settings.release_ms, self.sample_rate);
    }

    /// Advance the envelope by one sample and return the linear gain for it.
    #[inline]
    pub fn compute_gain(&mut self, sample: f32) -> f32 {
        if !sample.is_finite() {
            self.y_l_prev = 0.0;
            return 1.0;
        }
        let s = &self.settings;

        let x_g = lin_to_db(sample);
        let y_g = if x_g >= s.threshold_db {
            s.threshold_db + (x_g - s.threshold_db) / s.ratio
        } else {
            x_g
        };
        let x_l = x_g - y_g;

        let alpha = if x_l > self.y_l_prev {
            self.alpha_attack
        } else {
            self.alpha_release
        };
        let y_l = alpha * self.y_l_prev + (1.0 - alpha) * x_l;
        self.y_l_prev = y_l;

        db_to_lin(s.makeup_gain_db - y_l)
    }

    /// Compress a block in place. Bypassed compressors leave both the block
    /// and the envelope untouched.
    pub fn process(&mut self, samples: &mut [f32]) {
        if !self.settings.active {
            return;
        }
        let cap = self.control.len();
        for chunk in samples.chunks_mut(cap) {
            let n = chunk.len();
            for i in 0..n {
                self.control[i] = self.compute_gain(chunk[i]);
            }
            for (s, g) in chunk.iter_mut().zip(&self.control[..n]) {
                *s *= *g;
            }
        }
    }

    /// Zero the envelope without touching parameters or allocations.
    pub fn reset(&mut self) {
        self.y_l_prev = 0.0;
        self.control.fill(0.0);
    }

    /// Current smoothed gain reduction in dB (positive when compressing).
    pub fn gain_reduction_db(&self) -> f32 {
        self.y_l_prev
    }

    pub fn settings(&self) -> &CompressorSettings {
        &self.settings
    }

    pub fn is_active(&self) -> bool {
        self.settings.active
    }

    pub fn alpha_attack(&self) -> f32 {
        self.alpha_attack
    }

    pub fn alpha_release(&self) -> f32 {
        self.alpha_release
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f32 = 44100.0;

    fn active(threshold_db: f32, ratio: f32, attack_ms: f32, release_ms: f32, makeup: f32) -> CompressorSettings {
        CompressorSettings {
            active: true,
            threshold_db,
            ratio,
            attack_ms,
            release_ms,
            makeup_gain_db: makeup,
        }
    }

    fn test_signal(len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| {
                let t = i as f32 / SR;
                0.6 * (2.0 * std::f32::consts::PI * 220.0 * t).sin()
                    + 0.3 * (2.0 * std::f32::consts::PI * 3100.0 * t).sin()
            })
            .collect()
    }

    #[test]
    fn test_alpha_derivation() {
        let mut comp = EnvelopeCompressor::new(64, SR);
        comp.configure(SR, active(-20.0, 4.0, 10.0, 100.0, 0.0));
        let expected_attack = (-1.0f32 / (0.001 * SR * 10.0)).exp();
        let expected_release = (-1.0f32 / (0.001 * SR * 100.0)).exp();
        assert!((comp.alpha_attack() - expected_attack).abs() < 1e-7);
        assert!((comp.alpha_release() - expected_release).abs() < 1e-7);

        // Sample rate changes re-derive both
        comp.configure(48000.0, *comp.settings());
        assert!(comp.alpha_attack() > expected_attack);
    }

    #[test]
    fn test_transparent_below_threshold() {
        let mut comp = EnvelopeCompressor::new(256, SR);
        comp.configure(SR, active(-20.0, 4.0, 5.0, 50.0, 0.0));

        // -40 dBFS, well under threshold
        let input = vec![0.01f32; 4096];
        let mut out = input.clone();
        for block in out.chunks_mut(256) {
            comp.process(block);
        }
        for (o, i) in out.iter().zip(&input) {
            assert!((o - i).abs() < 1e-7);
        }
        assert_eq!(comp.gain_reduction_db(), 0.0);
    }

    #[test]
    fn test_steady_state_ratio_law() {
        let threshold = -20.0;
        let ratio = 4.0;
        let makeup = 6.0;
        let mut comp = EnvelopeCompressor::new(512, SR);
        comp.configure(SR, active(threshold, ratio, 5.0, 50.0, makeup));

        let mut buf = vec![0.5f32; 512];
        let input_db = lin_to_db(0.5);
        for _ in 0..200 {
            buf.fill(0.5);
            comp.process(&mut buf);
        }

        let out_db = lin_to_db(buf[511]);
        let expected = threshold + (input_db - threshold) / ratio + makeup;
        assert!(
            (out_db - expected).abs() < 0.05,
            "out {out_db} dB, expected {expected} dB"
        );
    }

    #[test]
    fn test_attack_faster_than_release() {
        let mut comp = EnvelopeCompressor::new(1, SR);
        comp.configure(SR, active(-20.0, 4.0, 1.0, 100.0, 0.0));

        // Final reduction for a 0.5 constant: (x_g - T) * (1 - 1/R)
        let target = (lin_to_db(0.5) + 20.0) * 0.75;

        let mut attack_samples = 0;
        let mut s = [0.0f32];
        while comp.gain_reduction_db() < 0.9 * target {
            s[0] = 0.5;
            comp.process(&mut s);
            attack_samples += 1;
            assert!(attack_samples < 100_000);
        }
        // Let it finish settling
        for _ in 0..2000 {
            s[0] = 0.5;
            comp.process(&mut s);
        }

        let peak = comp.gain_reduction_db();
        let mut release_samples = 0;
        while comp.gain_reduction_db() > 0.1 * peak {
            s[0] = 0.0;
            comp.process(&mut s);
            release_samples += 1;
            assert!(release_samples < 1_000_000);
        }

        assert!(
            release_samples > 10 * attack_samples,
            "attack {attack_samples}, release {release_samples}"
        );
    }

    #[test]
    fn test_bypass_is_bit_exact_and_keeps_envelope() {
        let mut comp = EnvelopeCompressor::new(128, SR);
        comp.configure(SR, active(-30.0, 8.0, 2.0, 200.0, 3.0));

        let mut warm = test_signal(1024);
        comp.process(&mut warm);
        let envelope = comp.gain_reduction_db();
        assert!(envelope > 0.0);

        comp.set_active(false);
        let input = test_signal(1024);
        let mut out = input.clone();
        comp.process(&mut out);
        comp.process(&mut out);

        assert_eq!(out, input);
        assert_eq!(comp.gain_reduction_db(), envelope);
    }

    #[test]
    fn test_settings_are_clamped() {
        let wild = CompressorSettings {
            active: true,
            threshold_db: 12.0,
            ratio: 0.25,
            attack_ms: 0.0,
            release_ms: -5.0,
            makeup_gain_db: 99.0,
        }
        .sanitized();
        assert_eq!(wild.threshold_db, THRESHOLD_MAX_DB);
        assert_eq!(wild.ratio, RATIO_MIN);
        assert_eq!(wild.attack_ms, ATTACK_MIN_MS);
        assert_eq!(wild.release_ms, RELEASE_MIN_MS);
        assert_eq!(wild.makeup_gain_db, MAKEUP_MAX_DB);

        let nan = CompressorSettings {
            ratio: f32::NAN,
            attack_ms: f32::INFINITY,
            ..CompressorSettings::default()
        }
        .sanitized();
        assert_eq!(nan.ratio, RATIO_MIN);
        assert_eq!(nan.attack_ms, ATTACK_MIN_MS);
    }

    #[test]
    fn test_unity_ratio_does_not_compress() {
        let mut comp = EnvelopeCompressor::new(256, SR);
        comp.configure(SR, active(-40.0, 0.0, 0.0, 0.0, 0.0));
        assert!(comp.alpha_attack().is_finite());

        let input = test_signal(256);
        let mut out = input.clone();
        comp.process(&mut out);
        for (o, i) in out.iter().zip(&input) {
            assert!((o - i).abs() < 1e-4);
        }
    }

    #[test]
    fn test_blocks_longer_than_scratch() {
        let settings = active(-24.0, 3.0, 3.0, 80.0, 2.0);
        let mut small = EnvelopeCompressor::new(64, SR);
        let mut large = EnvelopeCompressor::new(1000, SR);
        small.configure(SR, settings);
        large.configure(SR, settings);

        let mut a = test_signal(1000);
        let mut b = a.clone();
        small.process(&mut a);
        large.process(&mut b);
        assert_eq!(a, b);
    }

    #[test]
    fn test_reset_clears_envelope() {
        let mut comp = EnvelopeCompressor::new(256, SR);
        comp.configure(SR, active(-30.0, 6.0, 1.0, 300.0, 0.0));
        let mut buf = test_signal(256);
        comp.process(&mut buf);
        assert!(comp.gain_reduction_db() > 0.0);
        comp.reset();
        assert_eq!(comp.gain_reduction_db(), 0.0);
        assert!(comp.is_active());
    }

    #[test]
    fn test_non_finite_input_does_not_stick() {
        let mut comp = EnvelopeCompressor::new(256, SR);
        comp.configure(SR, active(-20.0, 4.0, 1.0, 50.0, 0.0));

        let mut buf = vec![0.5f32; 1024];
        buf[100] = f32::NAN;
        buf[101] = f32::INFINITY;
        buf[102] = f32::NEG_INFINITY;
        comp.process(&mut buf);

        assert!(comp.gain_reduction_db().is_finite());
        assert!(comp.gain_reduction_db() > 0.0);
        assert!(buf[103..].iter().all(|v| v.is_finite()));
        // Back at the steady state a clean run reaches
        let mut clean = EnvelopeCompressor::new(256, SR);
        clean.configure(SR, active(-20.0, 4.0, 1.0, 50.0, 0.0));
        let mut reference = vec![0.5f32; 1024];
        clean.process(&mut reference);
        assert!((buf[1023] - reference[1023]).abs() < 1e-4);
    }
}

//! Crossover Filter Stage (IIR 2nd Order)
//!
//! A second-order Butterworth section used as one half of a low/high crossover
//! pair. Coefficients come from a bilinear transform with the cutoff
//! pre-warped, Q fixed at sqrt(2) in the warped domain.
//!
//! # Design Notes
//! - Direct form I with explicit ring-buffer history, so the same loop works
//!   for any filter order by changing the tap count.
//! - Coefficients are kept in `f64`; audio enters and leaves as `f32`.
//! - A Linkwitz-Riley slope is obtained by running a second, independent stage
//!   with the same coefficients over the output. The stage only records the
//!   `cascade_twice` request; the band chain performs the second pass.
//! - Coefficient updates replace the whole set at once and never clear the
//!   delay lines.

use super::delay_line::DelayLine;
use std::f64::consts::{PI, SQRT_2};

/// Lowest crossover frequency accepted; lower requests are clamped.
pub const MIN_CROSSOVER_HZ: f32 = 20.0;
/// Highest crossover frequency accepted; higher requests are clamped.
pub const MAX_CROSSOVER_HZ: f32 = 20_000.0;
// Cutoff is also kept below this fraction of the sample rate so tan() stays finite.
const NYQUIST_GUARD: f32 = 0.49;
// Taps per delay line: one more than the filter order.
const TAPS: usize = 3;
// State magnitudes below this are flushed to zero (denormal guard).
const DENORMAL_FLOOR: f64 = 1e-30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    LowPass,
    HighPass,
}

/// Numerator `b` and denominator `a` of one recursive section.
///
/// `a[0]` is the normalisation factor. It is always 1 for the crossover
/// design but the difference equation still divides by it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterCoefficients {
    pub b: [f64; TAPS],
    pub a: [f64; TAPS],
}

impl Default for FilterCoefficients {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl FilterCoefficients {
    /// Pass-through section.
    pub const IDENTITY: Self = Self {
        b: [1.0, 0.0, 0.0],
        a: [1.0, 0.0, 0.0],
    };

    /// Butterworth crossover section at `cutoff_hz`.
    ///
    /// The cutoff is normalised by `sample_rate` before the tangent warp:
    /// `wd1 = 1 / tan(pi * fc / fs)`.
    pub fn crossover(cutoff_hz: f32, sample_rate: f32, kind: FilterKind) -> Self {
        let fc = clamp_cutoff(cutoff_hz, sample_rate) as f64;
        let wd1 = 1.0 / (PI * fc / sample_rate as f64).tan();
        let wd1_sq = wd1 * wd1;
        let q = SQRT_2;

        let norm = 1.0 / (1.0 + q * wd1 + wd1_sq);
        let a1 = 2.0 * (1.0 - wd1_sq) * norm;
        let a2 = (1.0 - q * wd1 + wd1_sq) * norm;

        let b = match kind {
            FilterKind::LowPass => [norm, 2.0 * norm, norm],
            FilterKind::HighPass => {
                let b0 = norm * wd1_sq;
                [b0, -2.0 * b0, b0]
            }
        };

        Self {
            b,
            a: [1.0, a1, a2],
        }
    }
}

/// Clamp a requested crossover frequency into the usable range for
/// `sample_rate`. Non-finite requests land on the lower bound.
pub fn clamp_cutoff(cutoff_hz: f32, sample_rate: f32) -> f32 {
    let upper = MAX_CROSSOVER_HZ.min(sample_rate * NYQUIST_GUARD);
    if !cutoff_hz.is_finite() {
        return MIN_CROSSOVER_HZ.min(upper);
    }
    cutoff_hz.clamp(MIN_CROSSOVER_HZ.min(upper), upper)
}

/// One crossover section with its own input/output history.
#[derive(Debug, Clone, Copy)]
pub struct RecursiveFilterStage {
    coeffs: FilterCoefficients,
    input: DelayLine<TAPS>,
    output: DelayLine<TAPS>,
    kind: FilterKind,
    cutoff_hz: f32,
    cascade_twice: bool,
}

impl RecursiveFilterStage {
    /// A pass-through stage of the given kind; call [`Self::configure`]
    /// before use.
    pub fn new(kind: FilterKind) -> Self {
        Self {
            coeffs: FilterCoefficients::IDENTITY,
            input: DelayLine::new(),
            output: DelayLine::new(),
            kind,
            cutoff_hz: 0.0,
            cascade_twice: false,
        }
    }

    /// Recompute coefficients for a new cutoff, sample rate, or response.
    pub fn configure(
        &mut self,
        cutoff_hz: f32,
        sample_rate: f32,
        kind: FilterKind,
        cascade_twice: bool,
    ) {
        self.kind = kind;
        self.cutoff_hz = clamp_cutoff(cutoff_hz, sample_rate);
        self.cascade_twice = cascade_twice;
        self.coeffs = FilterCoefficients::crossover(self.cutoff_hz, sample_rate, kind);
    }

    /// Replace the whole coefficient set in one assignment.
    #[inline]
    pub fn set_coefficients(&mut self, coeffs: FilterCoefficients) {
        self.coeffs = coeffs;
    }

    #[inline]
    pub fn set_cascade_twice(&mut self, cascade_twice: bool) {
        self.cascade_twice = cascade_twice;
    }

    /// Process a single sample
    #[inline]
    pub fn process_sample(&mut self, input: f32) -> f32 {
        let c = &self.coeffs;
        self.input.push(input as f64);

        let mut y = 0.0;
        for j in 0..TAPS {
            y += c.b[j] * self.input.tap(j);
        }
        // output.tap(0) is y[n-1] until the new value is pushed
        for j in 1..TAPS {
            y -= c.a[j] * self.output.tap(j - 1);
        }
        y /= c.a[0];

        // A non-finite result restarts the stage from silence
        if !y.is_finite() {
            self.reset_state();
            return 0.0;
        }
        if y.abs() < DENORMAL_FLOOR {
            y = 0.0;
        }
        self.output.push(y);
        y as f32
    }

    /// Filter a block in place.
    pub fn apply(&mut self, samples: &mut [f32]) {
        for s in samples.iter_mut() {
            *s = self.process_sample(*s);
        }
    }

    /// Clear the delay lines. Coefficients are kept.
    pub fn reset_state(&mut self) {
        self.input.clear();
        self.output.clear();
    }

    pub fn coefficients(&self) -> &FilterCoefficients {
        &self.coeffs
    }

    pub fn kind(&self) -> FilterKind {
        self.kind
    }

    pub fn cutoff_hz(&self) -> f32 {
        self.cutoff_hz
    }

    pub fn cascade_twice(&self) -> bool {
        self.cascade_twice
    }

    /// True when both delay lines hold nothing but zeros.
    pub fn is_silent(&self) -> bool {
        (0..TAPS).all(|j| self.input.tap(j) == 0.0 && self.output.tap(j) == 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f32 = 44100.0;

    fn dc_gain(c: &FilterCoefficients) -> f64 {
        c.b.iter().sum::<f64>() / c.a.iter().sum::<f64>()
    }

    fn nyquist_gain(c: &FilterCoefficients) -> f64 {
        (c.b[0] - c.b[1] + c.b[2]) / (c.a[0] - c.a[1] + c.a[2])
    }

    #[test]
    fn test_coefficient_shape() {
        let lp = FilterCoefficients::crossover(1000.0, SR, FilterKind::LowPass);
        assert_eq!(lp.a[0], 1.0);
        assert!((lp.b[1] - 2.0 * lp.b[0]).abs() < 1e-15);
        assert_eq!(lp.b[2], lp.b[0]);
        assert!((dc_gain(&lp) - 1.0).abs() < 1e-9);
        assert!(nyquist_gain(&lp).abs() < 1e-9);

        let hp = FilterCoefficients::crossover(1000.0, SR, FilterKind::HighPass);
        assert_eq!(hp.a, lp.a);
        assert!(dc_gain(&hp).abs() < 1e-9);
        assert!((nyquist_gain(&hp) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_cutoff_clamping() {
        assert_eq!(clamp_cutoff(5.0, SR), MIN_CROSSOVER_HZ);
        assert_eq!(clamp_cutoff(30_000.0, SR), MAX_CROSSOVER_HZ);
        assert_eq!(clamp_cutoff(f32::NAN, SR), MIN_CROSSOVER_HZ);
        // Upper bound follows Nyquist at low sample rates
        let upper = clamp_cutoff(20_000.0, 32_000.0);
        assert!((upper - 32_000.0 * NYQUIST_GUARD).abs() < 1e-3);
    }

    #[test]
    fn test_impulse_response_decays() {
        for &fc in &[20.0, 100.0, 1000.0, 10_000.0, 19_999.0] {
            for &kind in &[FilterKind::LowPass, FilterKind::HighPass] {
                let mut stage = RecursiveFilterStage::new(kind);
                stage.configure(fc, SR, kind, false);

                let mut buf = vec![0.0f32; 20_000];
                buf[0] = 1.0;
                stage.apply(&mut buf);

                assert!(buf.iter().all(|v| v.is_finite()), "{fc} Hz {kind:?}");
                assert!(buf.iter().all(|v| v.abs() <= 1.0), "{fc} Hz {kind:?}");
                let tail = buf[buf.len() - 100..]
                    .iter()
                    .fold(0.0f32, |m, v| m.max(v.abs()));
                assert!(tail < 1e-6, "{fc} Hz {kind:?} tail {tail}");
            }
        }
    }

    #[test]
    fn test_step_response_settles() {
        let mut lp = RecursiveFilterStage::new(FilterKind::LowPass);
        lp.configure(500.0, SR, FilterKind::LowPass, false);
        let mut hp = RecursiveFilterStage::new(FilterKind::HighPass);
        hp.configure(500.0, SR, FilterKind::HighPass, false);

        let mut low = vec![1.0f32; 4096];
        let mut high = low.clone();
        lp.apply(&mut low);
        hp.apply(&mut high);

        assert!((low[4095] - 1.0).abs() < 1e-4);
        assert!(high[4095].abs() < 1e-4);
    }

    #[test]
    fn test_block_and_sample_paths_agree() {
        let mut a = RecursiveFilterStage::new(FilterKind::LowPass);
        a.configure(2000.0, SR, FilterKind::LowPass, true);
        let mut b = a;

        let mut block: Vec<f32> = (0..256).map(|i| ((i as f32) * 0.37).sin()).collect();
        let per_sample: Vec<f32> = block.iter().map(|&x| b.process_sample(x)).collect();
        a.apply(&mut block);
        assert_eq!(block, per_sample);
    }

    #[test]
    fn test_reset_state_keeps_coefficients() {
        let mut stage = RecursiveFilterStage::new(FilterKind::HighPass);
        stage.configure(300.0, SR, FilterKind::HighPass, true);
        let coeffs = *stage.coefficients();

        let mut buf = vec![0.5f32; 64];
        stage.apply(&mut buf);
        assert!(!stage.is_silent());

        stage.reset_state();
        assert!(stage.is_silent());
        assert_eq!(*stage.coefficients(), coeffs);
        assert!(stage.cascade_twice());
    }

    #[test]
    fn test_non_finite_input_restarts_from_silence() {
        let mut stage = RecursiveFilterStage::new(FilterKind::LowPass);
        stage.configure(1000.0, SR, FilterKind::LowPass, false);
        let mut fresh = stage;

        let mut buf: Vec<f32> = (0..256).map(|i| (i as f32 * 0.07).sin()).collect();
        buf[10] = f32::NAN;
        buf[11] = f32::INFINITY;
        let tail = buf[12..].to_vec();
        stage.apply(&mut buf);

        assert!(buf.iter().all(|v| v.is_finite()));
        assert_eq!(buf[10], 0.0);
        assert_eq!(buf[11], 0.0);

        let mut expected = tail;
        fresh.apply(&mut expected);
        assert_eq!(&buf[12..], &expected[..]);
    }
}

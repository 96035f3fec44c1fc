//! Frequency Response Analysis
//!
//! Offline measurement of the crossover network: run a unit impulse through
//! a stage (or a whole bypassed chain) and take its spectrum. Used to check
//! the Hz-to-warp mapping against the analog Butterworth prototype and by the
//! render tool's `--response` report. Never runs on the audio thread.

use super::crossover::{FilterKind, RecursiveFilterStage};
use super::ChannelProcessor;
use crate::error::{Error, Result};
use rustfft::{num_complex::Complex, FftPlanner};

// Magnitudes below this are reported at the floor instead of -inf.
const MAGNITUDE_FLOOR: f64 = 1e-12;

/// One-sided spectrum of an impulse response.
#[derive(Debug, Clone)]
pub struct FrequencyResponse {
    sample_rate: f32,
    fft_len: usize,
    // Bins 0..=fft_len/2
    bins: Vec<Complex<f64>>,
}

impl FrequencyResponse {
    pub fn from_impulse(impulse: &[f32], sample_rate: f32) -> Result<Self> {
        if impulse.is_empty() {
            return Err(Error::invalid("impulse response is empty"));
        }
        if !sample_rate.is_finite() || sample_rate <= 0.0 {
            return Err(Error::invalid("sample rate must be positive and finite"));
        }

        let fft_len = impulse.len();
        let mut buf: Vec<Complex<f64>> = impulse
            .iter()
            .map(|&x| Complex::new(x as f64, 0.0))
            .collect();
        let mut planner = FftPlanner::<f64>::new();
        planner.plan_fft_forward(fft_len).process(&mut buf);
        buf.truncate(fft_len / 2 + 1);

        Ok(Self {
            sample_rate,
            fft_len,
            bins: buf,
        })
    }

    pub fn fft_len(&self) -> usize {
        self.fft_len
    }

    pub fn num_bins(&self) -> usize {
        self.bins.len()
    }

    pub fn bin_hz(&self, bin: usize) -> f32 {
        bin as f32 * self.sample_rate / self.fft_len as f32
    }

    /// Nearest bin to `hz`, limited to the one-sided range.
    pub fn bin_for_hz(&self, hz: f32) -> usize {
        let bin = (hz.max(0.0) * self.fft_len as f32 / self.sample_rate).round() as usize;
        bin.min(self.bins.len() - 1)
    }

    pub fn magnitude_db(&self, bin: usize) -> f64 {
        20.0 * self.bins[bin].norm().max(MAGNITUDE_FLOOR).log10()
    }

    pub fn magnitude_db_at(&self, hz: f32) -> f64 {
        self.magnitude_db(self.bin_for_hz(hz))
    }

    pub fn magnitudes_db(&self) -> Vec<f64> {
        (0..self.bins.len()).map(|k| self.magnitude_db(k)).collect()
    }
}

fn unit_impulse(len: usize) -> Vec<f32> {
    let mut impulse = vec![0.0; len];
    if let Some(first) = impulse.first_mut() {
        *first = 1.0;
    }
    impulse
}

/// Response of a single crossover stage, optionally followed by its twin.
pub fn stage_response(
    cutoff_hz: f32,
    sample_rate: f32,
    kind: FilterKind,
    cascade_twice: bool,
    fft_len: usize,
) -> Result<FrequencyResponse> {
    let mut stage = RecursiveFilterStage::new(kind);
    stage.configure(cutoff_hz, sample_rate, kind, cascade_twice);
    let mut twin = stage;

    let mut impulse = unit_impulse(fft_len);
    stage.apply(&mut impulse);
    if cascade_twice {
        twin.apply(&mut impulse);
    }
    FrequencyResponse::from_impulse(&impulse, sample_rate)
}

/// Response of the summed, bypassed band network for one channel.
pub fn crossover_response(
    crossovers_hz: &[f32],
    linkwitz_riley: bool,
    sample_rate: f32,
    fft_len: usize,
) -> Result<FrequencyResponse> {
    let mut proc = ChannelProcessor::new();
    proc.set_linkwitz_riley(linkwitz_riley);
    proc.prepare(1, fft_len, sample_rate, crossovers_hz)?;

    let mut impulse = unit_impulse(fft_len);
    proc.process_block(&mut [&mut impulse[..]])?;
    FrequencyResponse::from_impulse(&impulse, sample_rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f32 = 44100.0;
    const LEN: usize = 65_536;

    #[test]
    fn test_unit_impulse_is_flat() {
        let resp = FrequencyResponse::from_impulse(&unit_impulse(1024), SR).unwrap();
        assert_eq!(resp.num_bins(), 513);
        assert!(resp.magnitudes_db().iter().all(|db| db.abs() < 1e-9));
        assert!(FrequencyResponse::from_impulse(&[], SR).is_err());
    }

    #[test]
    fn test_bin_mapping() {
        let resp = FrequencyResponse::from_impulse(&unit_impulse(1024), 1024.0).unwrap();
        assert_eq!(resp.bin_for_hz(100.0), 100);
        assert_eq!(resp.bin_hz(100), 100.0);
        assert_eq!(resp.bin_for_hz(10_000.0), 512);
    }

    #[test]
    fn test_single_stage_is_3db_down_at_cutoff() {
        for &kind in &[FilterKind::LowPass, FilterKind::HighPass] {
            let resp = stage_response(1000.0, SR, kind, false, LEN).unwrap();
            let db = resp.magnitude_db_at(1000.0);
            assert!((db + 3.0103).abs() < 0.02, "{kind:?}: {db} dB");
        }
    }

    #[test]
    fn test_cascaded_stage_is_6db_down_at_cutoff() {
        for &fc in &[1000.0, 4000.0, 8000.0] {
            let resp = stage_response(fc, SR, FilterKind::LowPass, true, LEN).unwrap();
            let db = resp.magnitude_db_at(fc);
            assert!((db + 6.0206).abs() < 0.03, "{fc} Hz: {db} dB");
        }
    }

    #[test]
    fn test_passband_and_stopband() {
        let lp = stage_response(1000.0, SR, FilterKind::LowPass, false, LEN).unwrap();
        let hp = stage_response(1000.0, SR, FilterKind::HighPass, false, LEN).unwrap();
        assert!(lp.magnitude_db_at(100.0).abs() < 0.01);
        assert!(hp.magnitude_db_at(10_000.0).abs() < 0.05);
        // Second order: roughly 40 dB per decade
        assert!(hp.magnitude_db_at(100.0) < -35.0);
        assert!(lp.magnitude_db_at(10_000.0) < -35.0);
    }

    #[test]
    fn test_two_band_network_is_all_pass() {
        let resp = crossover_response(&[1000.0], true, SR, LEN).unwrap();
        let lo = resp.bin_for_hz(20.0);
        let hi = resp.bin_for_hz(20_000.0);
        for bin in lo..=hi {
            let db = resp.magnitude_db(bin);
            assert!(db.abs() < 0.05, "{} Hz: {db} dB", resp.bin_hz(bin));
        }
    }

    #[test]
    fn test_default_four_band_network_is_all_pass() {
        let resp = crossover_response(&[150.0, 1000.0, 5000.0], true, SR, LEN).unwrap();
        let lo = resp.bin_for_hz(20.0);
        let hi = resp.bin_for_hz(20_000.0);
        for bin in lo..=hi {
            let db = resp.magnitude_db(bin);
            assert!(db.abs() < 0.05, "{} Hz: {db} dB", resp.bin_hz(bin));
        }
    }

    #[test]
    fn test_five_band_network_is_all_pass() {
        let resp = crossover_response(&[100.0, 300.0, 1000.0, 3000.0], true, SR, LEN).unwrap();
        for &hz in &[60.0, 173.0, 300.0, 550.0, 1000.0, 1730.0, 3000.0, 10_000.0] {
            let db = resp.magnitude_db_at(hz);
            assert!(db.abs() < 0.05, "{hz} Hz: {db} dB");
        }
    }

    #[test]
    fn test_butterworth_sum_notches_at_crossover() {
        // Without the second pass the low and high halves cancel at fc
        let resp = crossover_response(&[1000.0], false, SR, LEN).unwrap();
        assert!(resp.magnitude_db_at(1000.0) < -40.0);
    }
}

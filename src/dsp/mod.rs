pub mod band_split;
pub mod compressor;
pub mod control;
pub mod crossover;
pub mod delay_line;
pub mod response;
pub mod utils;

pub use band_split::{BandSplitChain, BandTopology};
pub use compressor::{CompressorSettings, EnvelopeCompressor};
pub use control::{ControlMessage, ProcessorControl};
pub use crossover::{FilterCoefficients, FilterKind, RecursiveFilterStage};
pub use response::FrequencyResponse;

use crate::config::ProcessorConfig;
use crate::error::{Error, Result};
use crate::meters::Meters;
use crate::xd_log;
use control::{control_channel, ControlReceiver, CONTROL_QUEUE_CAPACITY};
use crossover::clamp_cutoff;
use std::sync::Arc;

/// Everything that only exists between `prepare` and teardown.
struct PreparedState {
    topology: BandTopology,
    chains: Vec<BandSplitChain>,
    crossovers_hz: Vec<f32>,
    band_settings: Vec<CompressorSettings>,
    sample_rate: f32,
    block_size: usize,
}

/// Multiband compressor for a set of channels: one band split chain per
/// channel, all sharing a single band topology and parameter set.
pub struct ChannelProcessor {
    state: Option<PreparedState>,
    linkwitz_riley: bool,
    meters: Arc<Meters>,
    control: Option<ProcessorControl>,
    // Lives as long as the processor so the control handle survives re-prepare
    receiver: ControlReceiver,
}

impl Default for ChannelProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelProcessor {
    pub fn new() -> Self {
        let (control, receiver) = control_channel(CONTROL_QUEUE_CAPACITY);
        Self {
            state: None,
            linkwitz_riley: true,
            meters: Arc::new(Meters::new(0)),
            control: Some(control),
            receiver,
        }
    }

    /// Build stages, compressors and buffers for `channels` channels of up to
    /// `block_size` samples. Allocates; call before audio starts.
    ///
    /// Compressor settings survive a re-prepare with the same band count.
    /// The control queue is untouched: a handle taken earlier keeps working
    /// and messages still queued are applied on the next block.
    pub fn prepare(
        &mut self,
        channels: usize,
        block_size: usize,
        sample_rate: f32,
        crossovers_hz: &[f32],
    ) -> Result<()> {
        if channels == 0 {
            return Err(Error::invalid("channel count must be positive"));
        }
        if block_size == 0 {
            return Err(Error::invalid("block size must be positive"));
        }
        if !sample_rate.is_finite() || sample_rate <= 0.0 {
            return Err(Error::invalid("sample rate must be positive and finite"));
        }
        if crossovers_hz.iter().any(|hz| !hz.is_finite()) {
            return Err(Error::invalid("crossover frequencies must be finite"));
        }

        let topology = BandTopology::new(crossovers_hz.len() + 1)?;
        let bands = topology.num_bands();

        let band_settings = match self.state.take() {
            Some(prev) if prev.band_settings.len() == bands => prev.band_settings,
            _ => vec![CompressorSettings::default(); bands],
        };
        if self.meters.num_bands() != bands {
            self.meters = Arc::new(Meters::new(bands));
        }

        let mut chains: Vec<_> = (0..channels)
            .map(|_| BandSplitChain::new(&topology, block_size, sample_rate))
            .collect();
        let crossovers_hz: Vec<f32> = crossovers_hz
            .iter()
            .map(|&hz| clamp_cutoff(hz, sample_rate))
            .collect();

        for chain in &mut chains {
            for (index, &hz) in crossovers_hz.iter().enumerate() {
                chain.configure_crossover(&topology, index, hz, sample_rate, self.linkwitz_riley);
            }
            for (band, &settings) in band_settings.iter().enumerate() {
                chain.configure_band(band, sample_rate, settings);
            }
        }

        log::info!(
            "prepared {channels} ch, {bands} bands, block {block_size}, {sample_rate} Hz, crossovers {crossovers_hz:?}"
        );

        self.state = Some(PreparedState {
            topology,
            chains,
            crossovers_hz,
            band_settings,
            sample_rate,
            block_size,
        });
        Ok(())
    }

    /// [`Self::prepare`] followed by the config's Linkwitz-Riley flag and
    /// per-band compressor settings.
    pub fn prepare_with_config(
        &mut self,
        channels: usize,
        block_size: usize,
        sample_rate: f32,
        config: &ProcessorConfig,
    ) -> Result<()> {
        config.validate()?;
        self.linkwitz_riley = config.linkwitz_riley;
        self.prepare(channels, block_size, sample_rate, &config.crossovers_hz)?;
        for (band, &settings) in config.bands.iter().enumerate() {
            self.set_compressor_params(band, settings)?;
        }
        Ok(())
    }

    /// Move crossover point `index`. The frequency is clamped into the
    /// usable range, never rejected.
    pub fn set_crossover_frequency(&mut self, index: usize, hz: f32) -> Result<()> {
        let cascade = self.linkwitz_riley;
        let state = self.state.as_mut().ok_or(Error::UninitializedChain)?;
        let crossovers = state.crossovers_hz.len();
        if index >= crossovers {
            return Err(Error::CrossoverOutOfRange { index, crossovers });
        }

        let clamped = clamp_cutoff(hz, state.sample_rate);
        if clamped != hz {
            xd_log!("crossover {index}: {hz} Hz clamped to {clamped} Hz");
        }
        state.crossovers_hz[index] = clamped;

        let PreparedState {
            topology,
            chains,
            sample_rate,
            ..
        } = state;
        for chain in chains.iter_mut() {
            chain.configure_crossover(topology, index, clamped, *sample_rate, cascade);
        }
        Ok(())
    }

    /// Replace one band's compressor parameters. Values are clamped.
    pub fn set_compressor_params(&mut self, band: usize, settings: CompressorSettings) -> Result<()> {
        let state = self.state.as_mut().ok_or(Error::UninitializedChain)?;
        let bands = state.band_settings.len();
        if band >= bands {
            return Err(Error::BandOutOfRange { band, bands });
        }

        let settings = settings.sanitized();
        state.band_settings[band] = settings;
        for chain in &mut state.chains {
            chain.configure_band(band, state.sample_rate, settings);
        }
        Ok(())
    }

    /// Cascade every crossover stage twice (Linkwitz-Riley) or once.
    /// Remembered across `prepare`.
    pub fn set_linkwitz_riley(&mut self, enabled: bool) {
        self.linkwitz_riley = enabled;
        if let Some(state) = self.state.as_mut() {
            for chain in &mut state.chains {
                chain.set_cascade_twice(enabled);
            }
        }
    }

    /// Process every channel in place.
    ///
    /// Pending control messages are applied first. Buffers beyond the
    /// prepared channel count are silenced.
    pub fn process_block(&mut self, channels: &mut [&mut [f32]]) -> Result<()> {
        if self.state.is_none() {
            return Err(Error::UninitializedChain);
        }
        self.drain_control();

        let state = self.state.as_mut().ok_or(Error::UninitializedChain)?;
        let PreparedState {
            topology, chains, ..
        } = state;

        let mut input_peak = 0.0f32;
        let mut output_peak = 0.0f32;
        for (ch, buf) in channels.iter_mut().enumerate() {
            match chains.get_mut(ch) {
                Some(chain) => {
                    input_peak = input_peak.max(utils::block_peak(buf));
                    chain.process(topology, buf);
                    output_peak = output_peak.max(utils::block_peak(buf));
                }
                None => buf.fill(0.0),
            }
        }

        self.meters.set_input_peak(input_peak);
        self.meters.set_output_peak(output_peak);
        for band in 0..topology.num_bands() {
            let gr = chains
                .iter()
                .map(|c| c.gain_reduction_db(band))
                .fold(0.0f32, f32::max);
            self.meters.set_gain_reduction_db(band, gr);
        }
        Ok(())
    }

    fn drain_control(&mut self) {
        while let Some(msg) = self.receiver.pop() {
            let applied = match msg {
                ControlMessage::SetCrossover { index, hz } => self.set_crossover_frequency(index, hz),
                ControlMessage::SetCompressor { band, settings } => {
                    self.set_compressor_params(band, settings)
                }
                ControlMessage::SetLinkwitzRiley(enabled) => {
                    self.set_linkwitz_riley(enabled);
                    Ok(())
                }
                ControlMessage::Reset => {
                    self.reset();
                    Ok(())
                }
            };
            if let Err(e) = applied {
                xd_log!("control message ignored: {e}");
            }
        }
    }

    /// Zero every delay line, envelope and meter. Nothing is reallocated and
    /// parameters are kept.
    pub fn reset(&mut self) {
        if let Some(state) = self.state.as_mut() {
            for chain in &mut state.chains {
                chain.reset();
            }
        }
        self.meters.reset();
    }

    /// Take the sending half of the control queue. There is one handle per
    /// processor; later calls return `None`.
    pub fn control(&mut self) -> Option<ProcessorControl> {
        self.control.take()
    }

    pub fn meters(&self) -> Arc<Meters> {
        self.meters.clone()
    }

    pub fn is_prepared(&self) -> bool {
        self.state.is_some()
    }

    pub fn linkwitz_riley(&self) -> bool {
        self.linkwitz_riley
    }

    pub fn num_channels(&self) -> usize {
        self.state.as_ref().map_or(0, |s| s.chains.len())
    }

    pub fn num_bands(&self) -> usize {
        self.state.as_ref().map_or(0, |s| s.topology.num_bands())
    }

    pub fn block_size(&self) -> usize {
        self.state.as_ref().map_or(0, |s| s.block_size)
    }

    pub fn sample_rate(&self) -> Option<f32> {
        self.state.as_ref().map(|s| s.sample_rate)
    }

    /// Current (clamped) crossover points.
    pub fn crossovers_hz(&self) -> &[f32] {
        match &self.state {
            Some(s) => &s.crossovers_hz,
            None => &[],
        }
    }

    /// Current (clamped) settings of `band`.
    pub fn compressor_settings(&self, band: usize) -> Option<&CompressorSettings> {
        self.state.as_ref().and_then(|s| s.band_settings.get(band))
    }
}

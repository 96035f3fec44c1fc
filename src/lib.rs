mod debug;
pub mod config;
pub mod dsp;
pub mod error;
pub mod meters;

pub use config::ProcessorConfig;
pub use dsp::{ChannelProcessor, CompressorSettings, ControlMessage, ProcessorControl};
pub use error::{Error, Result};

use crate::dsp::compressor::{
    ATTACK_MAX_MS, ATTACK_MIN_MS, MAKEUP_MAX_DB, MAKEUP_MIN_DB, RATIO_MAX, RATIO_MIN,
    RELEASE_MAX_MS, RELEASE_MIN_MS, THRESHOLD_MAX_DB, THRESHOLD_MIN_DB,
};
use crate::dsp::crossover::{MAX_CROSSOVER_HZ, MIN_CROSSOVER_HZ};
use assert_no_alloc::permit_alloc;
use nih_plug::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const NUM_BANDS: usize = 4;
const NUM_CROSSOVERS: usize = NUM_BANDS - 1;
// Channel count assumed when the host layout leaves outputs unspecified.
const DEFAULT_CHANNELS: usize = 2;

// -----------------------------------------------------------------------------
// DIRTY FLAGS
// -----------------------------------------------------------------------------

/// Set from parameter callbacks, cleared by the audio thread once the new
/// value has been pushed into the processor.
#[derive(Default)]
struct DirtyFlags {
    linkwitz_riley: Arc<AtomicBool>,
    crossovers: [Arc<AtomicBool>; NUM_CROSSOVERS],
    bands: [Arc<AtomicBool>; NUM_BANDS],
}

impl DirtyFlags {
    fn mark_all(&self) {
        self.linkwitz_riley.store(true, Ordering::Release);
        for flag in self.crossovers.iter().chain(self.bands.iter()) {
            flag.store(true, Ordering::Release);
        }
    }
}

fn take(flag: &AtomicBool) -> bool {
    flag.swap(false, Ordering::AcqRel)
}

fn mark_dirty<T: 'static>(flag: &Arc<AtomicBool>) -> Arc<dyn Fn(T) + Send + Sync> {
    let flag = flag.clone();
    Arc::new(move |_| flag.store(true, Ordering::Release))
}

// -----------------------------------------------------------------------------
// PARAMETERS
// -----------------------------------------------------------------------------
#[derive(Params)]
pub struct XoverDynParams {
    /// Run every crossover stage twice (4th order Linkwitz-Riley)
    #[id = "linkwitz_riley"]
    pub linkwitz_riley: BoolParam,

    #[nested(array, group = "Crossover")]
    pub crossovers: [CrossoverParams; NUM_CROSSOVERS],

    #[nested(array, group = "Band")]
    pub bands: [BandParams; NUM_BANDS],
}

#[derive(Params)]
pub struct CrossoverParams {
    #[id = "freq"]
    pub frequency: FloatParam,
}

#[derive(Params)]
pub struct BandParams {
    #[id = "active"]
    pub active: BoolParam,

    #[id = "threshold"]
    pub threshold: FloatParam,

    #[id = "ratio"]
    pub ratio: FloatParam,

    #[id = "attack"]
    pub attack: FloatParam,

    #[id = "release"]
    pub release: FloatParam,

    #[id = "makeup"]
    pub makeup: FloatParam,
}

// Helper to format gain in dB
fn format_db(v: f32) -> String {
    format!("{:.1} dB", v)
}

// Helper to format times in ms
fn format_ms(v: f32) -> String {
    format!("{:.1} ms", v)
}

impl CrossoverParams {
    fn new(index: usize, default_hz: f32, dirty: &Arc<AtomicBool>) -> Self {
        Self {
            frequency: FloatParam::new(
                format!("Crossover {}", index + 1),
                default_hz,
                FloatRange::Skewed {
                    min: MIN_CROSSOVER_HZ,
                    max: MAX_CROSSOVER_HZ,
                    factor: FloatRange::skew_factor(-2.0),
                },
            )
            .with_callback(mark_dirty(dirty))
            .with_value_to_string(formatters::v2s_f32_hz_then_khz(0))
            .with_string_to_value(formatters::s2v_f32_hz_then_khz()),
        }
    }
}

impl BandParams {
    fn new(band: usize, dirty: &Arc<AtomicBool>) -> Self {
        let d = CompressorSettings::default();
        let n = band + 1;
        Self {
            active: BoolParam::new(format!("Band {n} Active"), d.active)
                .with_callback(mark_dirty(dirty)),
            threshold: FloatParam::new(
                format!("Band {n} Threshold"),
                d.threshold_db,
                FloatRange::Linear {
                    min: THRESHOLD_MIN_DB,
                    max: THRESHOLD_MAX_DB,
                },
            )
            .with_callback(mark_dirty(dirty))
            .with_step_size(0.1)
            .with_value_to_string(Arc::new(format_db)),
            ratio: FloatParam::new(
                format!("Band {n} Ratio"),
                d.ratio,
                FloatRange::Skewed {
                    min: RATIO_MIN,
                    max: RATIO_MAX,
                    factor: FloatRange::skew_factor(-2.0),
                },
            )
            .with_callback(mark_dirty(dirty))
            .with_value_to_string(formatters::v2s_compression_ratio(1))
            .with_string_to_value(formatters::s2v_compression_ratio()),
            attack: FloatParam::new(
                format!("Band {n} Attack"),
                d.attack_ms,
                FloatRange::Skewed {
                    min: ATTACK_MIN_MS,
                    max: ATTACK_MAX_MS,
                    factor: FloatRange::skew_factor(-1.0),
                },
            )
            .with_callback(mark_dirty(dirty))
            .with_value_to_string(Arc::new(format_ms)),
            release: FloatParam::new(
                format!("Band {n} Release"),
                d.release_ms,
                FloatRange::Skewed {
                    min: RELEASE_MIN_MS,
                    max: RELEASE_MAX_MS,
                    factor: FloatRange::skew_factor(-2.0),
                },
            )
            .with_callback(mark_dirty(dirty))
            .with_value_to_string(Arc::new(format_ms)),
            makeup: FloatParam::new(
                format!("Band {n} Makeup"),
                d.makeup_gain_db,
                FloatRange::Linear {
                    min: MAKEUP_MIN_DB,
                    max: MAKEUP_MAX_DB,
                },
            )
            .with_callback(mark_dirty(dirty))
            .with_step_size(0.1)
            .with_value_to_string(Arc::new(format_db)),
        }
    }

    pub fn settings(&self) -> CompressorSettings {
        CompressorSettings {
            active: self.active.value(),
            threshold_db: self.threshold.value(),
            ratio: self.ratio.value(),
            attack_ms: self.attack.value(),
            release_ms: self.release.value(),
            makeup_gain_db: self.makeup.value(),
        }
    }
}

impl XoverDynParams {
    fn new(dirty: &DirtyFlags) -> Self {
        let defaults = config::DEFAULT_CROSSOVERS_HZ;
        Self {
            linkwitz_riley: BoolParam::new("Linkwitz-Riley", true)
                .with_callback(mark_dirty(&dirty.linkwitz_riley)),
            crossovers: std::array::from_fn(|i| {
                CrossoverParams::new(i, defaults[i], &dirty.crossovers[i])
            }),
            bands: std::array::from_fn(|b| BandParams::new(b, &dirty.bands[b])),
        }
    }

    pub fn crossover_frequencies(&self) -> [f32; NUM_CROSSOVERS] {
        std::array::from_fn(|i| self.crossovers[i].frequency.value())
    }

    /// Snapshot of every parameter as a processor configuration.
    pub fn processor_config(&self) -> ProcessorConfig {
        ProcessorConfig {
            crossovers_hz: self.crossover_frequencies().to_vec(),
            linkwitz_riley: self.linkwitz_riley.value(),
            bands: self.bands.iter().map(BandParams::settings).collect(),
        }
    }
}

// -----------------------------------------------------------------------------
// PLUGIN STRUCT
// -----------------------------------------------------------------------------
pub struct XoverDynPlugin {
    params: Arc<XoverDynParams>,
    dirty: DirtyFlags,
    processor: ChannelProcessor,
}

impl Default for XoverDynPlugin {
    fn default() -> Self {
        let dirty = DirtyFlags::default();
        dirty.mark_all();
        Self {
            params: Arc::new(XoverDynParams::new(&dirty)),
            dirty,
            processor: ChannelProcessor::new(),
        }
    }
}

impl Plugin for XoverDynPlugin {
    const NAME: &'static str = "XoverDyn";
    const VENDOR: &'static str = "Andrzej Marczewski";
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
    const SAMPLE_ACCURATE_AUTOMATION: bool = false;

    type SysExMessage = ();
    type BackgroundTask = ();

    fn params(&self) -> Arc<dyn Params> {
        self.params.clone()
    }

    fn initialize(
        &mut self,
        audio_io_layout: &AudioIOLayout,
        buffer_config: &BufferConfig,
        _context: &mut impl InitContext<Self>,
    ) -> bool {
        #[cfg(feature = "debug")]
        crate::debug::logger::init_logger();

        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let channels = audio_io_layout
                .main_output_channels
                .map_or(DEFAULT_CHANNELS, |n| n.get() as usize);
            let block_size = buffer_config.max_buffer_size as usize;
            let config = self.params.processor_config();

            let prepared = permit_alloc(|| {
                self.processor.prepare_with_config(
                    channels,
                    block_size,
                    buffer_config.sample_rate,
                    &config,
                )
            });
            // Everything was just applied from the current values
            for flag in self.dirty.crossovers.iter().chain(self.dirty.bands.iter()) {
                flag.store(false, Ordering::Release);
            }
            self.dirty.linkwitz_riley.store(false, Ordering::Release);

            #[cfg(feature = "debug")]
            crate::debug::logger::drain_to_file();

            match prepared {
                Ok(()) => true,
                Err(e) => {
                    log::error!("failed to prepare processor: {e}");
                    false
                }
            }
        }))
        .unwrap_or(false)
    }

    fn process(
        &mut self,
        buffer: &mut Buffer,
        _aux: &mut AuxiliaryBuffers,
        _context: &mut impl ProcessContext<Self>,
    ) -> ProcessStatus {
        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| self.process_internal(buffer)))
            .unwrap_or(ProcessStatus::Normal)
    }

    fn reset(&mut self) {
        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.processor.reset();
        }))
        .unwrap_or(());
    }

    fn deactivate(&mut self) {
        #[cfg(feature = "debug")]
        crate::debug::logger::drain_to_file();
    }
}

impl XoverDynPlugin {
    fn process_internal(&mut self, buffer: &mut Buffer) -> ProcessStatus {
        self.apply_dirty_params();
        match self.processor.process_block(buffer.as_slice()) {
            Ok(()) => ProcessStatus::Normal,
            Err(e) => {
                xd_log!("process_block failed: {e}");
                ProcessStatus::Error("processor is not prepared")
            }
        }
    }

    /// Push parameters whose callbacks fired since the last block.
    fn apply_dirty_params(&mut self) {
        if take(&self.dirty.linkwitz_riley) {
            self.processor
                .set_linkwitz_riley(self.params.linkwitz_riley.value());
        }
        for (index, flag) in self.dirty.crossovers.iter().enumerate() {
            if take(flag) {
                let hz = self.params.crossovers[index].frequency.value();
                if let Err(e) = self.processor.set_crossover_frequency(index, hz) {
                    xd_log!("crossover {index} not applied: {e}");
                }
            }
        }
        for (band, flag) in self.dirty.bands.iter().enumerate() {
            if take(flag) {
                let settings = self.params.bands[band].settings();
                if let Err(e) = self.processor.set_compressor_params(band, settings) {
                    xd_log!("band {band} not applied: {e}");
                }
            }
        }
    }
}

impl ClapPlugin for XoverDynPlugin {
    const CLAP_ID: &'static str = "com.andrzej.xoverdyn";
    const CLAP_DESCRIPTION: Option<&'static str> = Some("Multiband crossover compressor");
    const CLAP_MANUAL_URL: Option<&'static str> = None;
    const CLAP_SUPPORT_URL: Option<&'static str> = None;
    const CLAP_FEATURES: &'static [ClapFeature] = &[
        ClapFeature::AudioEffect,
        ClapFeature::Compressor,
        ClapFeature::Stereo,
        ClapFeature::Mono,
    ];
}

impl Vst3Plugin for XoverDynPlugin {
    const VST3_CLASS_ID: [u8; 16] = *b"XoverDynMultiBnd";
    const VST3_SUBCATEGORIES: &'static [Vst3SubCategory] =
        &[Vst3SubCategory::Fx, Vst3SubCategory::Dynamics];
}

nih_export_clap!(XoverDynPlugin);
nih_export_vst3!(XoverDynPlugin);

//! Band Split Chain
//!
//! Splits one channel into N adjacent bands, compresses each band on its own
//! and sums the results back into the channel buffer.
//!
//! # Topology
//! For N bands there are N-1 crossover points, each with a low-pass and a
//! high-pass response. Every band filters the same unmodified input through
//! its own stage instances:
//!
//! ```text
//! input ──┬── LP(f0) ── AP(f1) ── AP(f2) ──► band 0
//!         ├── HP(f0) ── LP(f1) ── AP(f2) ──► band 1
//!         ├── HP(f0) ── HP(f1) ── LP(f2) ──► band 2
//!         └── HP(f0) ── HP(f1) ── HP(f2) ──► band 3
//! ```
//!
//! `AP(f)` runs `LP(f)` and `HP(f)` side by side and adds them. With
//! Linkwitz-Riley cascading that sum is all-pass, so it gives a band the same
//! phase shift the higher bands see at that crossover point, and the bypassed
//! bands sum to an all-pass of the input for any N.
//!
//! With cascading enabled every stage is followed by an independent twin
//! carrying the same coefficients.
//!
//! Stages and compressors live in flat arenas indexed by [`StageId`] and band
//! index. The topology is built once at prepare time and shared read-only by
//! every channel.

use super::compressor::{CompressorSettings, EnvelopeCompressor};
use super::crossover::{FilterKind, RecursiveFilterStage};
use crate::error::{Error, Result};

/// Index of a stage instance inside a chain's stage arena.
pub type StageId = usize;

/// What a stage computes and which crossover point drives it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageRole {
    pub crossover: usize,
    pub kind: FilterKind,
}

/// One step along a band's filter path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathStep {
    Filter(StageId),
    /// Low-pass and high-pass of one crossover point, run in parallel and summed.
    AllPass { low: StageId, high: StageId },
}

/// Band layout: which stages, in which order, feed each band.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BandTopology {
    stages: Vec<StageRole>,
    bands: Vec<Vec<PathStep>>,
}

fn add_stage(stages: &mut Vec<StageRole>, crossover: usize, kind: FilterKind) -> StageId {
    stages.push(StageRole { crossover, kind });
    stages.len() - 1
}

impl BandTopology {
    pub fn new(band_count: usize) -> Result<Self> {
        if band_count == 0 {
            return Err(Error::invalid("at least one band is required"));
        }
        let crossovers = band_count - 1;

        let mut stages = Vec::new();
        let mut bands = Vec::with_capacity(band_count);
        for band in 0..band_count {
            let mut path = Vec::with_capacity(crossovers);
            for c in 0..band {
                path.push(PathStep::Filter(add_stage(&mut stages, c, FilterKind::HighPass)));
            }
            if band < crossovers {
                path.push(PathStep::Filter(add_stage(&mut stages, band, FilterKind::LowPass)));
            }
            for c in band + 1..crossovers {
                let low = add_stage(&mut stages, c, FilterKind::LowPass);
                let high = add_stage(&mut stages, c, FilterKind::HighPass);
                path.push(PathStep::AllPass { low, high });
            }
            bands.push(path);
        }

        Ok(Self { stages, bands })
    }

    pub fn num_bands(&self) -> usize {
        self.bands.len()
    }

    pub fn num_crossovers(&self) -> usize {
        self.bands.len() - 1
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub fn stage(&self, id: StageId) -> StageRole {
        self.stages[id]
    }

    /// Steps applied, in order, to produce `band`.
    pub fn band_path(&self, band: usize) -> &[PathStep] {
        &self.bands[band]
    }

    /// Stage ids driven by crossover point `crossover`.
    pub fn crossover_stages(&self, crossover: usize) -> impl Iterator<Item = StageId> + '_ {
        self.stages
            .iter()
            .enumerate()
            .filter(move |(_, s)| s.crossover == crossover)
            .map(|(id, _)| id)
    }
}

/// Per-channel crossover network plus one compressor per band.
#[derive(Debug, Clone)]
pub struct BandSplitChain {
    stages: Vec<RecursiveFilterStage>,
    // Second Linkwitz-Riley pass, one per stage
    twins: Vec<RecursiveFilterStage>,
    compressors: Vec<EnvelopeCompressor>,
    input: Vec<f32>,
    scratch: Vec<f32>,
    // High-pass half of an all-pass step
    aux: Vec<f32>,
}

impl BandSplitChain {
    /// Allocates every stage, compressor and working buffer. Not for the
    /// audio thread.
    pub fn new(topology: &BandTopology, block_size: usize, sample_rate: f32) -> Self {
        let block_size = block_size.max(1);
        let stages: Vec<_> = (0..topology.stage_count())
            .map(|id| RecursiveFilterStage::new(topology.stage(id).kind))
            .collect();

        Self {
            twins: stages.clone(),
            stages,
            compressors: (0..topology.num_bands())
                .map(|_| EnvelopeCompressor::new(block_size, sample_rate))
                .collect(),
            input: vec![0.0; block_size],
            scratch: vec![0.0; block_size],
            aux: vec![0.0; block_size],
        }
    }

    /// Retune every stage of one crossover point (and their twins).
    pub fn configure_crossover(
        &mut self,
        topology: &BandTopology,
        crossover: usize,
        cutoff_hz: f32,
        sample_rate: f32,
        cascade_twice: bool,
    ) {
        for id in topology.crossover_stages(crossover) {
            let kind = topology.stage(id).kind;
            self.stages[id].configure(cutoff_hz, sample_rate, kind, cascade_twice);
            let coeffs = *self.stages[id].coefficients();
            self.twins[id].configure(cutoff_hz, sample_rate, kind, false);
            self.twins[id].set_coefficients(coeffs);
        }
    }

    /// Toggle the Linkwitz-Riley second pass on every stage. Twins start
    /// from silence when the pass is switched on.
    pub fn set_cascade_twice(&mut self, cascade_twice: bool) {
        for (stage, twin) in self.stages.iter_mut().zip(self.twins.iter_mut()) {
            if cascade_twice && !stage.cascade_twice() {
                twin.reset_state();
            }
            stage.set_cascade_twice(cascade_twice);
        }
    }

    pub fn configure_band(&mut self, band: usize, sample_rate: f32, settings: CompressorSettings) {
        self.compressors[band].configure(sample_rate, settings);
    }

    /// Split, compress and re-sum `samples` in place.
    ///
    /// Blocks longer than the prepared size are handled in prepared-size
    /// chunks so the working buffers never grow.
    pub fn process(&mut self, topology: &BandTopology, samples: &mut [f32]) {
        let cap = self.input.len();
        for chunk in samples.chunks_mut(cap) {
            self.process_chunk(topology, chunk);
        }
    }

    #[inline]
    fn run_stage(stage: &mut RecursiveFilterStage, twin: &mut RecursiveFilterStage, buf: &mut [f32]) {
        stage.apply(buf);
        if stage.cascade_twice() {
            twin.apply(buf);
        }
    }

    fn process_chunk(&mut self, topology: &BandTopology, out: &mut [f32]) {
        let n = out.len();
        self.input[..n].copy_from_slice(out);
        out.fill(0.0);

        for band in 0..topology.num_bands() {
            let scratch = &mut self.scratch[..n];
            scratch.copy_from_slice(&self.input[..n]);

            for &step in topology.band_path(band) {
                match step {
                    PathStep::Filter(id) => {
                        Self::run_stage(&mut self.stages[id], &mut self.twins[id], scratch);
                    }
                    PathStep::AllPass { low, high } => {
                        let aux = &mut self.aux[..n];
                        aux.copy_from_slice(scratch);
                        Self::run_stage(&mut self.stages[low], &mut self.twins[low], scratch);
                        Self::run_stage(&mut self.stages[high], &mut self.twins[high], aux);
                        for (s, a) in scratch.iter_mut().zip(aux.iter()) {
                            *s += *a;
                        }
                    }
                }
            }

            self.compressors[band].process(scratch);

            for (o, s) in out.iter_mut().zip(scratch.iter()) {
                *o += *s;
            }
        }
    }

    /// Zero delay lines and envelopes. Nothing is reallocated.
    pub fn reset(&mut self) {
        for stage in self.stages.iter_mut().chain(self.twins.iter_mut()) {
            stage.reset_state();
        }
        for comp in &mut self.compressors {
            comp.reset();
        }
        self.input.fill(0.0);
        self.scratch.fill(0.0);
        self.aux.fill(0.0);
    }

    pub fn stage(&self, id: StageId) -> &RecursiveFilterStage {
        &self.stages[id]
    }

    pub fn twin(&self, id: StageId) -> &RecursiveFilterStage {
        &self.twins[id]
    }

    pub fn compressor(&self, band: usize) -> &EnvelopeCompressor {
        &self.compressors[band]
    }

    pub fn gain_reduction_db(&self, band: usize) -> f32 {
        self.compressors[band].gain_reduction_db()
    }

    pub fn block_size(&self) -> usize {
        self.input.len()
    }

    /// True when no stage or compressor carries state from earlier audio.
    pub fn is_cleared(&self) -> bool {
        self.stages.iter().chain(self.twins.iter()).all(|s| s.is_silent())
            && self.compressors.iter().all(|c| c.gain_reduction_db() == 0.0)
    }
}

//! Voice
//!
//! One sounding note. A voice owns a private [`ParamSet`] snapshot taken at
//! note start and all per-note DSP state: oscillator phases, sampler
//! positions, filter histories, humanizer values and the random generator.
//!
//! Every engine frame runs in a fixed order:
//!
//! 1. modulation matrix, reading last frame's source outputs
//! 2. filters, on the signal the matrix routed into them
//! 3. main oscillators, sub-oscillators, samplers
//! 4. mix (main, sub, sampler, filter; enabled and unmuted only)
//! 5. restore every modulated control from the live parameter set
//!
//! With oversampling the engine runs `N` frames per output frame at `N`
//! times the sample rate and keeps the last one.

use crate::config::EngineConfig;
use crate::filter::{Filter, FilterBank};
use crate::modulation::{self, ModulationSources, SourceTap};
use crate::oscillator::{MainOscBank, MainOscillator};
use crate::params::{
    FilterParam, MainParam, Param, ParamSet, SamplerParam, SubParam, FILTERS, HUMANIZERS,
    MAIN_OSCS, MATRIX_SLOTS, SAMPLERS, SUB_OSCS,
};
use crate::rng::Rng;
use crate::sampler::SamplerBank;
use crate::sub_osc::SubOscBank;
use crate::waves::WaveformStore;
use parking_lot::RwLock;
use std::sync::{Arc, Weak};

/// What the host knows about the note a voice plays
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteInfo {
    /// Hz
    pub frequency: f32,
    /// 0..=1
    pub velocity: f32,
    /// -1 (left) ..= 1 (right)
    pub panning: f32,
}

impl NoteInfo {
    pub fn new(frequency: f32) -> Self {
        Self {
            frequency,
            velocity: 1.0,
            panning: 0.0,
        }
    }

    pub fn with_velocity(mut self, velocity: f32) -> Self {
        self.velocity = velocity;
        self
    }

    pub fn with_panning(mut self, panning: f32) -> Self {
        self.panning = panning;
        self
    }

    /// Equal-tempered pitch of a MIDI note number, A4 = 440 Hz
    pub fn from_midi(note: u8, velocity: u8) -> Self {
        let frequency = 440.0 * libm::exp2f((note as f32 - 69.0) / 12.0);
        Self::new(frequency).with_velocity(velocity as f32 / 127.0)
    }
}

/// Signal values the modulation matrix reads, one frame behind
#[derive(Debug, Clone)]
struct VoiceSources {
    main: [SourceTap; MAIN_OSCS],
    sub: [SourceTap; SUB_OSCS],
    sampler: [SourceTap; SAMPLERS],
    filter: [[f32; 2]; FILTERS],
    velocity: f32,
    panning: f32,
    humanizer: [f32; HUMANIZERS],
}

impl VoiceSources {
    fn new(note: &NoteInfo, rng: &mut Rng) -> Self {
        let mut humanizer = [0.0; HUMANIZERS];
        for h in humanizer.iter_mut() {
            *h = rng.next_bipolar();
        }
        Self {
            main: [SourceTap::default(); MAIN_OSCS],
            sub: [SourceTap::default(); SUB_OSCS],
            sampler: [SourceTap::default(); SAMPLERS],
            filter: [[0.0; 2]; FILTERS],
            velocity: note.velocity.clamp(0.0, 1.0) * 2.0 - 1.0,
            panning: note.panning.clamp(-1.0, 1.0),
            humanizer,
        }
    }
}

impl ModulationSources for VoiceSources {
    fn main_osc(&self, index: usize, envelope: bool) -> [f32; 2] {
        self.main[index].read(envelope)
    }

    fn sub_osc(&self, index: usize, envelope: bool) -> [f32; 2] {
        self.sub[index].read(envelope)
    }

    fn sampler(&self, index: usize, envelope: bool) -> [f32; 2] {
        self.sampler[index].read(envelope)
    }

    fn filter(&self, index: usize) -> [f32; 2] {
        self.filter[index]
    }

    fn velocity(&self) -> f32 {
        self.velocity
    }

    fn panning(&self) -> f32 {
        self.panning
    }

    fn humanizer(&self, index: usize) -> f32 {
        self.humanizer[index]
    }
}

/// One note's synthesis state
pub struct Voice {
    note: NoteInfo,
    sample_rate: f32,
    oversample: u32,
    snapshot: ParamSet,
    /// Unmodulated values as last pushed by the instrument; restore source
    /// when the live set is gone
    baseline: ParamSet,
    live: Weak<RwLock<ParamSet>>,
    waves: Arc<RwLock<WaveformStore>>,
    rng: Rng,
    main: MainOscBank,
    sub: SubOscBank,
    samplers: SamplerBank,
    filters: FilterBank,
    sources: VoiceSources,
    filter_inputs: [[f32; 2]; FILTERS],
    touched: Vec<Param>,
    restore_warned: bool,
}

impl Voice {
    /// Start a note: snapshot the live parameters and draw all per-note
    /// random values from `rng`
    pub fn new(
        live: &Arc<RwLock<ParamSet>>,
        waves: Arc<RwLock<WaveformStore>>,
        note: NoteInfo,
        config: &EngineConfig,
        mut rng: Rng,
    ) -> Self {
        let snapshot = live.read().clone();
        let sample_rate = config.engine_rate();

        let sources = VoiceSources::new(&note, &mut rng);
        let mut main = MainOscBank::default();
        main.start(&snapshot.main, &mut rng);
        let mut sub = SubOscBank::default();
        sub.start(&snapshot.sub, &mut rng);
        let mut samplers = SamplerBank::default();
        samplers.start(&snapshot.sampler, &mut rng);

        log::debug!(
            "voice start: {:.2} Hz, velocity {:.2}, oversample {}",
            note.frequency,
            note.velocity,
            config.oversample
        );

        Self {
            note,
            sample_rate,
            oversample: config.oversample.max(1),
            baseline: snapshot.clone(),
            snapshot,
            live: Arc::downgrade(live),
            waves,
            rng,
            main,
            sub,
            samplers,
            filters: FilterBank::new(sample_rate),
            sources,
            filter_inputs: [[0.0; 2]; FILTERS],
            touched: Vec::with_capacity(MATRIX_SLOTS),
            restore_warned: false,
        }
    }

    pub fn note(&self) -> &NoteInfo {
        &self.note
    }

    /// The voice's private parameter values
    pub fn snapshot(&self) -> &ParamSet {
        &self.snapshot
    }

    /// Rate the voice computes frames at (host rate times oversampling)
    pub fn engine_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn main_osc(&self, index: usize) -> &MainOscillator {
        self.main.osc(index)
    }

    pub fn filter(&self, index: usize) -> &Filter {
        self.filters.filter(index)
    }

    /// Apply a live parameter change to this voice's snapshot. `param` must
    /// already be validated.
    pub(crate) fn refresh(&mut self, param: Param, value: f32) {
        self.snapshot.assign(param, value);
        self.baseline.assign(param, value);
        if value < 0.5 {
            match param {
                Param::Main(i, MainParam::Enabled) => self.sources.main[i].reset(),
                Param::Sub(i, SubParam::Enabled) => self.sources.sub[i].reset(),
                Param::Sampler(i, SamplerParam::Enabled) => self.sources.sampler[i].reset(),
                Param::Filter(i, FilterParam::Enabled) => self.sources.filter[i] = [0.0; 2],
                _ => {}
            }
        }
    }

    /// Replace the whole snapshot, e.g. after a preset load
    pub fn refresh_all(&mut self, live: &ParamSet) {
        self.snapshot.clone_from(live);
        self.baseline.clone_from(live);
        self.touched.clear();
    }

    /// Compute one output frame
    pub fn next_frame(&mut self) -> [f32; 2] {
        let mut frame = [[0.0; 2]; 1];
        self.render(&mut frame);
        frame[0]
    }

    /// Fill `out` with consecutive output frames. Shared state is locked once
    /// for the whole block.
    pub fn render(&mut self, out: &mut [[f32; 2]]) {
        let waves = Arc::clone(&self.waves);
        let waves = waves.read();
        let live = self.live.upgrade();
        let live_guard = live.as_ref().map(|l| l.read());
        let live = live_guard.as_deref();

        for frame in out.iter_mut() {
            let mut last = [0.0; 2];
            for _ in 0..self.oversample {
                last = self.tick(&waves, live);
            }
            *frame = last;
        }
    }

    /// One engine frame
    fn tick(&mut self, waves: &WaveformStore, live: Option<&ParamSet>) -> [f32; 2] {
        self.modulate();
        let out = self.synthesize(waves);
        self.restore(live);
        out
    }

    fn modulate(&mut self) {
        self.filter_inputs = [[0.0; 2]; FILTERS];
        modulation::evaluate(
            &mut self.snapshot,
            &self.sources,
            &mut self.filter_inputs,
            &mut self.touched,
        );
    }

    fn synthesize(&mut self, waves: &WaveformStore) -> [f32; 2] {
        let marks = self.snapshot.marks();
        let freq = self.note.frequency;
        let sr = self.sample_rate;

        // Filters first: their input was routed by the matrix this frame
        let mut filtered = [[0.0f32; 2]; FILTERS];
        for (i, out) in filtered.iter_mut().enumerate().take(marks.filter) {
            let p = &self.snapshot.filter[i];
            if !p.enabled() {
                continue;
            }
            *out = self.filters.process(i, p, self.filter_inputs[i], freq, sr);
            self.sources.filter[i] = *out;
        }

        let mut mix = [0.0f32; 2];
        let mut add = |value: [f32; 2], muted: bool| {
            if !muted {
                mix[0] += value[0];
                mix[1] += value[1];
            }
        };

        for i in 0..marks.main {
            let p = &self.snapshot.main[i];
            if !p.enabled() {
                continue;
            }
            let frame = self.main.process(i, p, waves, freq, sr);
            self.sources.main[i].update(frame.value, frame.wrapped);
            add(frame.value, p.muted);
        }

        for i in 0..marks.sub {
            let p = &self.snapshot.sub[i];
            if !p.enabled() {
                continue;
            }
            let frame = self.sub.process(i, p, waves, &mut self.rng, freq, sr);
            self.sources.sub[i].update(frame.value, frame.wrapped);
            add(frame.value, p.muted);
        }

        for i in 0..marks.sampler {
            let p = &self.snapshot.sampler[i];
            if !p.enabled() {
                continue;
            }
            let frame = self.samplers.process(i, p, waves, freq, sr);
            self.sources.sampler[i].update(frame.value, frame.wrapped);
            add(frame.value, p.muted);
        }

        for (i, out) in filtered.iter().enumerate().take(marks.filter) {
            let p = &self.snapshot.filter[i];
            if p.enabled() {
                add(*out, p.muted);
            }
        }

        mix
    }

    fn restore(&mut self, live: Option<&ParamSet>) {
        if self.touched.is_empty() {
            return;
        }
        match live {
            Some(live) => modulation::restore(&mut self.snapshot, live, &mut self.touched),
            None => {
                if !self.restore_warned {
                    log::warn!(
                        "instrument parameters are gone, restoring modulated values from the voice's own copy"
                    );
                    self.restore_warned = true;
                }
                modulation::restore(&mut self.snapshot, &self.baseline, &mut self.touched);
            }
        }
    }
}

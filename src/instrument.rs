//! Instrument
//!
//! Owns the live parameter set, the waveform store and a pool of voices.
//! Hosts drive it with note events and parameter changes and pull stereo
//! blocks from [`Instrument::render`].
//!
//! Voices are keyed by [`VoiceKey`]; a key stays valid until its voice has
//! finished its release fade or was stolen, and is never reused for another
//! voice.

use crate::config::EngineConfig;
use crate::error::SynthError;
use crate::params::{MatrixSlot, Param, ParamSet};
use crate::rng::Rng;
use crate::voice::{NoteInfo, Voice};
use crate::waves::WaveformStore;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use slotmap::{DefaultKey, SlotMap};
use std::sync::Arc;

/// Handle to a sounding voice
pub type VoiceKey = DefaultKey;

struct ActiveVoice {
    voice: Voice,
    /// Start order, used to pick steal victims
    age: u64,
    /// Frames left in the release fade, once released
    release: Option<usize>,
}

impl ActiveVoice {
    fn is_finished(&self) -> bool {
        self.release == Some(0)
    }
}

/// A polyphonic instrument
pub struct Instrument {
    config: EngineConfig,
    params: Arc<RwLock<ParamSet>>,
    waves: Arc<RwLock<WaveformStore>>,
    voices: SlotMap<VoiceKey, ActiveVoice>,
    rng: Rng,
    next_age: u64,
    scratch: Vec<[f32; 2]>,
}

impl Default for Instrument {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Instrument {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_params(config, ParamSet::new())
    }

    pub fn with_params(config: EngineConfig, params: ParamSet) -> Self {
        let config = config.validated();
        let rng = match config.seed {
            Some(seed) => Rng::from_seed(seed),
            None => Rng::from_entropy(),
        };
        let mut params = params;
        params.refresh_marks();

        Self {
            voices: SlotMap::with_capacity(config.max_voices),
            scratch: vec![[0.0; 2]; config.max_block],
            config,
            params: Arc::new(RwLock::new(params)),
            waves: Arc::new(RwLock::new(WaveformStore::new())),
            rng,
            next_age: 0,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Read access to the live parameters
    pub fn params(&self) -> RwLockReadGuard<'_, ParamSet> {
        self.params.read()
    }

    pub fn waves(&self) -> RwLockReadGuard<'_, WaveformStore> {
        self.waves.read()
    }

    /// Write access to the waveform store for table and sample loading
    pub fn waves_mut(&self) -> RwLockWriteGuard<'_, WaveformStore> {
        self.waves.write()
    }

    pub fn shared_params(&self) -> Arc<RwLock<ParamSet>> {
        Arc::clone(&self.params)
    }

    pub fn shared_waves(&self) -> Arc<RwLock<WaveformStore>> {
        Arc::clone(&self.waves)
    }

    /// Change one control and push the corrected value to every voice
    pub fn set_param(&mut self, param: Param, value: f32) -> Result<(), SynthError> {
        let value = {
            let mut live = self.params.write();
            live.set(param, value)?;
            live.value(param)
        };
        for active in self.voices.values_mut() {
            active.voice.refresh(param, value);
        }
        Ok(())
    }

    /// [`Instrument::set_param`] addressed by name, e.g. `filter0.cutoff`
    pub fn set_param_by_name(&mut self, name: &str, value: f32) -> Result<(), SynthError> {
        let param: Param = name.parse()?;
        self.set_param(param, value)
    }

    pub fn set_matrix_slot(&mut self, index: usize, slot: MatrixSlot) -> Result<(), SynthError> {
        self.params.write().set_matrix_slot(index, slot)?;
        self.refresh_voices();
        Ok(())
    }

    /// Replace every control at once, e.g. when a preset is loaded
    pub fn load_params(&mut self, params: ParamSet) {
        let mut params = params;
        params.refresh_marks();
        *self.params.write() = params;
        self.refresh_voices();
    }

    /// Replace every control from the flat numeric layout
    pub fn load_flat(&mut self, values: &[f32]) {
        self.load_params(ParamSet::from_flat(values));
    }

    fn refresh_voices(&mut self) {
        let live = self.params.read();
        for active in self.voices.values_mut() {
            active.voice.refresh_all(&live);
        }
    }

    /// Start a voice. At full polyphony the oldest voice is stolen. Returns
    /// `None` for notes that cannot be played.
    pub fn note_on(&mut self, note: NoteInfo) -> Option<VoiceKey> {
        if !(note.frequency.is_finite() && note.frequency > 0.0) {
            log::warn!("ignoring note with frequency {}", note.frequency);
            return None;
        }

        while self.voices.len() >= self.config.max_voices {
            let oldest = self
                .voices
                .iter()
                .min_by_key(|(_, active)| active.age)
                .map(|(key, _)| key)?;
            log::debug!("stealing voice {:?}", oldest);
            self.voices.remove(oldest);
        }

        let voice = Voice::new(
            &self.params,
            Arc::clone(&self.waves),
            note,
            &self.config,
            self.rng.fork(),
        );
        let age = self.next_age;
        self.next_age += 1;

        Some(self.voices.insert(ActiveVoice {
            voice,
            age,
            release: None,
        }))
    }

    /// Begin the release fade of a voice. Returns `false` if the key no
    /// longer refers to a voice.
    pub fn note_off(&mut self, key: VoiceKey) -> bool {
        let release_frames = self.config.release_frames;
        let Some(active) = self.voices.get_mut(key) else {
            return false;
        };
        if release_frames == 0 {
            self.voices.remove(key);
            log::debug!("voice {:?} released and destroyed", key);
        } else if active.release.is_none() {
            active.release = Some(release_frames);
            log::debug!("voice {:?} released", key);
        }
        true
    }

    /// Release every sounding voice
    pub fn release_all(&mut self) {
        let keys: Vec<VoiceKey> = self.voices.keys().collect();
        for key in keys {
            self.note_off(key);
        }
    }

    /// Drop all voices immediately
    pub fn panic(&mut self) {
        self.voices.clear();
    }

    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }

    pub fn is_active(&self, key: VoiceKey) -> bool {
        self.voices.contains_key(key)
    }

    pub fn voice(&self, key: VoiceKey) -> Option<&Voice> {
        self.voices.get(key).map(|active| &active.voice)
    }

    /// Overwrite `out` with the sum of all voices. Blocks longer than
    /// `max_block` are rendered in several passes.
    pub fn render(&mut self, out: &mut [[f32; 2]]) {
        out.fill([0.0; 2]);
        let pass = self.scratch.len().max(1);
        for chunk in out.chunks_mut(pass) {
            self.render_pass(chunk);
        }

        self.voices.retain(|key, active| {
            let keep = !active.is_finished();
            if !keep {
                log::debug!("voice {:?} finished", key);
            }
            keep
        });
    }

    /// Add every voice into `out`, which fits the scratch buffer
    fn render_pass(&mut self, out: &mut [[f32; 2]]) {
        let scratch = &mut self.scratch[..out.len()];
        let release_frames = self.config.release_frames.max(1) as f32;

        for active in self.voices.values_mut() {
            if active.is_finished() {
                continue;
            }
            active.voice.render(scratch);
            match active.release.as_mut() {
                None => {
                    for (o, s) in out.iter_mut().zip(scratch.iter()) {
                        o[0] += s[0];
                        o[1] += s[1];
                    }
                }
                Some(remaining) => {
                    // Linear fade to zero over the release tail
                    for (o, s) in out.iter_mut().zip(scratch.iter()) {
                        if *remaining == 0 {
                            break;
                        }
                        let gain = *remaining as f32 / release_frames;
                        o[0] += s[0] * gain;
                        o[1] += s[1] * gain;
                        *remaining -= 1;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modulation::{CombineMode, ModSource, ModTarget};
    use crate::params::{MainParam, MAIN_OSCS, TABLE_LEN};
    use approx::assert_abs_diff_eq;
    use core::f32::consts::TAU;

    fn instrument(config: EngineConfig) -> Instrument {
        let inst = Instrument::new(config);
        let sine: Vec<f32> = (0..TABLE_LEN)
            .map(|i| (TAU * i as f32 / TABLE_LEN as f32).sin())
            .collect();
        for osc in 0..MAIN_OSCS {
            inst.waves_mut().set_main_waveform(osc, 0, &sine).unwrap();
        }
        inst
    }

    fn block(inst: &mut Instrument, frames: usize) -> Vec<[f32; 2]> {
        let mut out = vec![[0.0; 2]; frames];
        inst.render(&mut out);
        out
    }

    fn peak(frames: &[[f32; 2]]) -> f32 {
        frames.iter().fold(0.0, |m, f| m.max(f[0].abs()))
    }

    #[test]
    fn test_note_on_renders() {
        let mut inst = instrument(EngineConfig::default());
        let key = inst.note_on(NoteInfo::new(440.0)).unwrap();
        assert!(inst.is_active(key));
        assert_eq!(inst.active_voices(), 1);
        assert!(peak(&block(&mut inst, 256)) > 0.9);
    }

    #[test]
    fn test_voices_sum() {
        let mut single = instrument(EngineConfig::default());
        single.note_on(NoteInfo::new(330.0));
        let one = block(&mut single, 128);

        let mut double = instrument(EngineConfig::default());
        double.note_on(NoteInfo::new(330.0));
        double.note_on(NoteInfo::new(330.0));
        let two = block(&mut double, 128);

        for (a, b) in one.iter().zip(&two) {
            assert_abs_diff_eq!(a[0] * 2.0, b[0], epsilon = 1e-5);
        }
    }

    #[test]
    fn test_steals_oldest_voice() {
        let mut inst = instrument(EngineConfig::default().with_max_voices(2));
        let a = inst.note_on(NoteInfo::new(220.0)).unwrap();
        let b = inst.note_on(NoteInfo::new(330.0)).unwrap();
        let c = inst.note_on(NoteInfo::new(440.0)).unwrap();
        assert_eq!(inst.active_voices(), 2);
        assert!(!inst.is_active(a));
        assert!(inst.is_active(b));
        assert!(inst.is_active(c));
        assert!(!inst.note_off(a));
    }

    #[test]
    fn test_release_fades_then_destroys() {
        let mut inst = instrument(EngineConfig::default().with_release_frames(64));
        let key = inst.note_on(NoteInfo::new(440.0)).unwrap();
        block(&mut inst, 100);

        assert!(inst.note_off(key));
        let tail = block(&mut inst, 128);
        assert!(!inst.is_active(key));
        assert_eq!(inst.active_voices(), 0);
        // Fade ends within the release tail
        assert!(tail[64..].iter().all(|f| *f == [0.0, 0.0]));
        assert!(peak(&tail[..16]) > peak(&tail[48..64]));
    }

    #[test]
    fn test_release_spans_blocks() {
        let mut inst = instrument(EngineConfig::default().with_release_frames(64));
        let key = inst.note_on(NoteInfo::new(440.0)).unwrap();
        inst.note_off(key);
        block(&mut inst, 32);
        assert!(inst.is_active(key));
        block(&mut inst, 32);
        assert!(!inst.is_active(key));
    }

    #[test]
    fn test_zero_release_removes_immediately() {
        let mut inst = instrument(EngineConfig::default().with_release_frames(0));
        let key = inst.note_on(NoteInfo::new(440.0)).unwrap();
        assert!(inst.note_off(key));
        assert_eq!(inst.active_voices(), 0);
    }

    #[test]
    fn test_rejects_unplayable_notes() {
        let mut inst = instrument(EngineConfig::default());
        assert!(inst.note_on(NoteInfo::new(0.0)).is_none());
        assert!(inst.note_on(NoteInfo::new(f32::NAN)).is_none());
        assert_eq!(inst.active_voices(), 0);
    }

    #[test]
    fn test_set_param_reaches_sounding_voice() {
        let mut inst = instrument(EngineConfig::default());
        let key = inst.note_on(NoteInfo::new(440.0)).unwrap();
        block(&mut inst, 64);
        inst.set_param(Param::Main(0, MainParam::Volume), 0.0).unwrap();
        assert_eq!(inst.voice(key).unwrap().snapshot().main[0].volume, 0.0);
        assert_eq!(peak(&block(&mut inst, 64)), 0.0);
    }

    #[test]
    fn test_set_param_by_name() {
        let mut inst = instrument(EngineConfig::default());
        inst.set_param_by_name("filter2.cutoff", 800.0).unwrap();
        assert_eq!(inst.params().filter[2].cutoff, 800.0);
        assert!(matches!(
            inst.set_param_by_name("filter2.wobble", 1.0),
            Err(SynthError::UnknownParam(_))
        ));
        assert!(inst.set_param_by_name("main9.morph", 1.0).is_err());
    }

    #[test]
    fn test_matrix_slot_reaches_voices() {
        let mut inst = instrument(EngineConfig::default());
        let key = inst.note_on(NoteInfo::new(440.0)).unwrap();
        inst.set_matrix_slot(
            3,
            MatrixSlot {
                enabled: true,
                source: ModSource::Velocity,
                combine: CombineMode::AddUnidirectional,
                target: ModTarget::Main(MainParam::Pan),
                ..MatrixSlot::default()
            },
        )
        .unwrap();
        let voice = inst.voice(key).unwrap();
        assert_eq!(voice.snapshot().marks().matrix, 4);
        assert_eq!(voice.snapshot().matrix[3].source, ModSource::Velocity);
    }

    #[test]
    fn test_load_params_refreshes_voices() {
        let mut inst = instrument(EngineConfig::default());
        let key = inst.note_on(NoteInfo::new(440.0)).unwrap();
        inst.load_params(ParamSet::silent());
        assert_eq!(inst.voice(key).unwrap().snapshot().marks().main, 0);
        assert_eq!(peak(&block(&mut inst, 64)), 0.0);
    }

    #[test]
    fn test_seeded_instruments_match() {
        let config = EngineConfig::default().with_seed(42);
        let mut params = ParamSet::new();
        params.set(Param::Main(0, MainParam::UnisonVoices), 5.0).unwrap();
        params.set(Param::Main(0, MainParam::UnisonDetune), 40.0).unwrap();
        params.set(Param::Main(0, MainParam::PhaseRand), 100.0).unwrap();

        let render = || {
            let mut inst = instrument(config.clone());
            inst.load_params(params.clone());
            inst.note_on(NoteInfo::new(220.0));
            inst.note_on(NoteInfo::new(277.0));
            block(&mut inst, 512)
        };
        assert_eq!(render(), render());
    }

    #[test]
    fn test_long_blocks_render_in_passes() {
        let render = |max_block: usize| {
            let config = EngineConfig::default().with_seed(5).with_max_block(max_block);
            let mut inst = instrument(config);
            let key = inst.note_on(NoteInfo::new(440.0)).unwrap();
            let head = block(&mut inst, 1000);
            inst.note_off(key);
            let tail = block(&mut inst, 100);
            let scratch_len = inst.scratch.len();
            (head, tail, scratch_len, inst.active_voices())
        };
        let (head, tail, scratch_len, active) = render(64);
        let (expected_head, expected_tail, _, _) = render(4096);
        assert_eq!(head, expected_head);
        assert_eq!(tail, expected_tail);
        assert_eq!(scratch_len, 64);
        assert_eq!(active, 0);
    }

    #[test]
    fn test_panic_and_release_all() {
        let mut inst = instrument(EngineConfig::default());
        for f in [220.0, 330.0, 440.0] {
            inst.note_on(NoteInfo::new(f));
        }
        inst.release_all();
        assert_eq!(inst.active_voices(), 3);
        inst.panic();
        assert_eq!(inst.active_voices(), 0);
        assert_eq!(peak(&block(&mut inst, 32)), 0.0);
    }
}

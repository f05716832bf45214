//! Sub-Oscillators
//!
//! Single-waveform oscillators used as extra audio layers, LFOs, step
//! sequencers or envelopes (through the matrix envelope flag). Each one either
//! follows the note, sits at 440 Hz, or is scaled to the project tempo. In
//! noise mode it reads random points of its waveform through a leaky
//! integrator instead of playing it in order.

use crate::oscillator::{apply_pan, detune_with_cents, OscFrame};
use crate::params::{SubOscParams, SUB_OSCS};
use crate::rng::Rng;
use crate::waves::WaveformStore;

/// Tempo in BPM that maps the frequency unchanged
const TEMPO_REFERENCE: f32 = 26400.0;

/// Phase and noise state of one sub-oscillator
#[derive(Debug, Clone, Copy, Default)]
pub struct SubOscillator {
    phase: f32,
    last_noise: f32,
}

impl SubOscillator {
    pub fn start(&mut self, params: &SubOscParams, rng: &mut Rng) {
        self.phase = rng.next_f32() * params.phase_rand * 0.01 * params.table_len() as f32;
        self.last_noise = 0.0;
    }

    pub fn phase(&self) -> f32 {
        self.phase
    }

    /// Playback frequency for a note
    pub fn frequency(params: &SubOscParams, note_frequency: f32) -> f32 {
        let base = if params.keytracking {
            note_frequency
        } else {
            440.0
        };
        let f = detune_with_cents(base, params.detune);
        if params.tempo != 0.0 {
            f * params.tempo / TEMPO_REFERENCE
        } else {
            f
        }
    }

    /// Render one frame and advance. `index` selects the waveform.
    pub fn process(
        &mut self,
        index: usize,
        params: &SubOscParams,
        store: &WaveformStore,
        rng: &mut Rng,
        note_frequency: f32,
        sample_rate: f32,
    ) -> OscFrame {
        let len = params.table_len();
        let lenf = len as f32;

        let sample = if params.noise {
            let point = rng.next_index(len) as f32;
            let raw = store.sub_sample(index, point, len);
            self.last_noise = ((self.last_noise + raw * 0.125) / 1.2).clamp(-1.0, 1.0);
            self.last_noise
        } else {
            let read = self.phase + params.phase * 0.01 * lenf;
            store.sub_sample(index, read, len)
        };

        // Advance phase
        let step = lenf * Self::frequency(params, note_frequency) / sample_rate;
        let next = self.phase + step;
        let wrapped = next >= lenf;
        self.phase = if wrapped { next.rem_euclid(lenf) } else { next };

        let gain = params.volume * 0.01;
        OscFrame {
            value: apply_pan([sample * gain, sample * gain], params.pan),
            wrapped,
        }
    }
}

/// All sub-oscillators of one voice
#[derive(Debug, Clone)]
pub struct SubOscBank {
    oscs: Vec<SubOscillator>,
}

impl Default for SubOscBank {
    fn default() -> Self {
        Self {
            oscs: vec![SubOscillator::default(); SUB_OSCS],
        }
    }
}

impl SubOscBank {
    pub fn start(&mut self, params: &[SubOscParams], rng: &mut Rng) {
        for (osc, p) in self.oscs.iter_mut().zip(params) {
            osc.start(p, rng);
        }
    }

    #[inline]
    pub fn process(
        &mut self,
        index: usize,
        params: &SubOscParams,
        store: &WaveformStore,
        rng: &mut Rng,
        note_frequency: f32,
        sample_rate: f32,
    ) -> OscFrame {
        self.oscs[index].process(index, params, store, rng, note_frequency, sample_rate)
    }
}

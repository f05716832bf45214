//! Samplers
//!
//! Each sampler plays the `[start, end)` region of its stereo buffer at a
//! rate set by the note (or fixed at 440 Hz), corrected for the buffer's own
//! sample rate. With the shape graph enabled the linear playback progress is
//! fed through the graph, which may reverse, hold or scrub the read position.

use crate::oscillator::{apply_pan, detune_with_cents, OscFrame};
use crate::params::{SamplerParams, GRAPH_POINTS, SAMPLERS};
use crate::rng::Rng;
use crate::waves::WaveformStore;

/// Playback state of one sampler
#[derive(Debug, Clone, Copy, Default)]
pub struct Sampler {
    /// Frames played since the region start, before phase offset
    progress: f32,
    /// Randomized start offset as a fraction of the region
    start_offset: f32,
    finished: bool,
}

impl Sampler {
    pub fn start(&mut self, params: &SamplerParams, rng: &mut Rng) {
        self.progress = 0.0;
        self.start_offset = rng.next_f32() * params.phase_rand * 0.01;
        self.finished = false;
    }

    pub fn progress(&self) -> f32 {
        self.progress
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Playback speed in buffer frames per engine frame
    pub fn rate(
        params: &SamplerParams,
        note_frequency: f32,
        buffer_rate: f32,
        sample_rate: f32,
    ) -> f32 {
        let pitch = if params.keytracking {
            detune_with_cents(note_frequency, params.detune) / 440.0
        } else {
            detune_with_cents(440.0, params.detune) / 440.0
        };
        pitch * buffer_rate / sample_rate
    }

    pub fn process(
        &mut self,
        index: usize,
        params: &SamplerParams,
        store: &WaveformStore,
        note_frequency: f32,
        sample_rate: f32,
    ) -> OscFrame {
        let Some(buffer) = store.sample(index) else {
            return OscFrame::default();
        };
        if self.finished {
            if !params.looped {
                return OscFrame::default();
            }
            // looping switched on after the region ran out
            self.finished = false;
        }

        let frames = buffer.frame_count() as f32;
        let start = params.start.clamp(0.0, 1.0) * frames;
        let end = params.end.clamp(0.0, 1.0) * frames;
        let span = end - start;
        if span <= 0.0 {
            return OscFrame::default();
        }

        // Position inside the region, in frames
        let offset = (params.phase * 0.01 + self.start_offset) * span;
        let mut local = self.progress + offset;
        if params.looped {
            local = local.rem_euclid(span);
        }

        let sample = if (0.0..span).contains(&local) {
            let read = if params.graph {
                let point = local / span * (GRAPH_POINTS - 1) as f32;
                store.graph_value(index, point) * span
            } else {
                local
            };
            buffer.frame((start + read).min(end - 1.0).max(start))
        } else {
            [0.0; 2]
        };

        // Advance. Wraps are judged on the offset position actually read.
        let rate = Self::rate(params, note_frequency, buffer.sample_rate(), sample_rate);
        let next = self.progress + rate;
        let wrapped = if params.looped {
            let next = next.rem_euclid(span);
            let wrapped = (next + offset).rem_euclid(span) < local;
            self.progress = next;
            wrapped
        } else {
            self.progress = next;
            let ended = next + offset >= span;
            self.finished = ended;
            ended
        };

        let gain = params.volume * 0.01;
        let value = apply_pan([sample[0] * gain, sample[1] * gain], params.pan);
        OscFrame { value, wrapped }
    }
}

/// All samplers of one voice
#[derive(Debug, Clone)]
pub struct SamplerBank {
    samplers: Vec<Sampler>,
}

impl Default for SamplerBank {
    fn default() -> Self {
        Self {
            samplers: vec![Sampler::default(); SAMPLERS],
        }
    }
}

impl SamplerBank {
    pub fn start(&mut self, params: &[SamplerParams], rng: &mut Rng) {
        for (s, p) in self.samplers.iter_mut().zip(params) {
            s.start(p, rng);
        }
    }

    #[inline]
    pub fn process(
        &mut self,
        index: usize,
        params: &SamplerParams,
        store: &WaveformStore,
        note_frequency: f32,
        sample_rate: f32,
    ) -> OscFrame {
        self.samplers[index].process(index, params, store, note_frequency, sample_rate)
    }
}

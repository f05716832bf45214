//! Main Wavetable Oscillators
//!
//! Each of the [`MAIN_OSCS`] oscillators plays a triangular cross-fade of
//! neighbouring waveforms from its wavetable (morph and range), warped by one
//! of the [`ModifyMode`] transforms, optionally thickened with up to
//! [`MAX_UNISON`] detuned copies spread across the stereo field.

use crate::params::{MainOscParams, MAIN_OSCS, MAX_UNISON, TABLE_LEN, WAVE_SLOTS};
use crate::rng::Rng;
use crate::waves::WaveformStore;
use core::f32::consts::{FRAC_PI_2, TAU};
use libm::{atanf, cosf, exp2f, powf, sinf};
use serde::{Deserialize, Serialize};

/// Shift a frequency by cents
#[inline]
pub fn detune_with_cents(frequency: f32, cents: f32) -> f32 {
    frequency * exp2f(cents / 1200.0)
}

/// Pan in [-100, 100]: positive values attenuate the left channel, negative
/// values the right. Never boosts.
#[inline]
pub fn apply_pan(frame: [f32; 2], pan: f32) -> [f32; 2] {
    let [mut left, mut right] = frame;
    if pan > 0.0 {
        left *= (1.0 - pan * 0.01).max(0.0);
    } else if pan < 0.0 {
        right *= (1.0 + pan * 0.01).max(0.0);
    }
    [left, right]
}

/// One frame from a periodic source
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OscFrame {
    pub value: [f32; 2],
    /// The source completed a cycle this frame
    pub wrapped: bool,
}

/// Timbre warp applied by the `modify` control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ModifyMode {
    #[default]
    None,
    /// Stretches the period by `modify` samples of silence
    PulseWidth,
    Weird1,
    Weird2,
    AsymToRight,
    AsymToLeft,
    SquishToCenter,
    StretchFromCenter,
    StretchAndSquish,
    CutOffRight,
    CutOffLeft,
    /// Blends in the inverted half-period read
    Squarify,
    /// Blends in an inverted read shifted by up to half a period
    Pulsify,
    Flip,
    Clip,
    InverseClip,
    Sine,
    Atan,
}

impl ModifyMode {
    pub const ALL: [ModifyMode; 18] = [
        ModifyMode::None,
        ModifyMode::PulseWidth,
        ModifyMode::Weird1,
        ModifyMode::Weird2,
        ModifyMode::AsymToRight,
        ModifyMode::AsymToLeft,
        ModifyMode::SquishToCenter,
        ModifyMode::StretchFromCenter,
        ModifyMode::StretchAndSquish,
        ModifyMode::CutOffRight,
        ModifyMode::CutOffLeft,
        ModifyMode::Squarify,
        ModifyMode::Pulsify,
        ModifyMode::Flip,
        ModifyMode::Clip,
        ModifyMode::InverseClip,
        ModifyMode::Sine,
        ModifyMode::Atan,
    ];

    pub fn ordinal(self) -> usize {
        self as usize
    }

    /// Unknown ordinals read as `None`
    pub fn from_ordinal(ordinal: usize) -> Self {
        Self::ALL.get(ordinal).copied().unwrap_or_default()
    }

    /// Remap a normalized read position `x` in [0, 1). `amount` is the
    /// modify control as a fraction of the played length.
    #[inline]
    pub fn warp_position(self, x: f32, amount: f32) -> f32 {
        let n = amount;
        let warped = match self {
            ModifyMode::Weird1 => fract(x + n * sinf(TAU * x) * 0.5),
            ModifyMode::Weird2 => fract(x * (1.0 + 3.0 * n) + n * cosf(TAU * x) * 0.25),
            ModifyMode::AsymToRight => powf(x, 1.0 + 10.0 * n),
            ModifyMode::AsymToLeft => 1.0 - powf(1.0 - x, 1.0 + 10.0 * n),
            ModifyMode::SquishToCenter => from_center(x, 1.0 / (1.0 + 4.0 * n)),
            ModifyMode::StretchFromCenter => from_center(x, 1.0 + 4.0 * n),
            ModifyMode::StretchAndSquish => {
                (from_center(x, 1.0 / (1.0 + 4.0 * n)) + from_center(x, 1.0 + 4.0 * n)) * 0.5
            }
            ModifyMode::CutOffRight => x * (1.0 - n),
            ModifyMode::CutOffLeft => n + x * (1.0 - n),
            ModifyMode::Flip if x < n => n - x,
            _ => x,
        };
        warped.clamp(0.0, 1.0)
    }

    /// Remap an output sample
    #[inline]
    pub fn shape_value(self, v: f32, amount: f32) -> f32 {
        let n = amount;
        match self {
            ModifyMode::Clip => {
                let t = (1.0 - n).max(1e-3);
                v.clamp(-t, t) / t
            }
            ModifyMode::InverseClip => {
                let t = (1.0 - n).max(1e-3);
                if v.abs() > t {
                    (2.0 * t - v.abs()).copysign(v)
                } else {
                    v
                }
            }
            ModifyMode::Sine => sinf(v * (1.0 + 7.0 * n) * FRAC_PI_2),
            ModifyMode::Atan => {
                let drive = 1.0 + 20.0 * n;
                atanf(v * drive) / atanf(drive)
            }
            _ => v,
        }
    }

    fn warps_position(self) -> bool {
        matches!(
            self,
            ModifyMode::Weird1
                | ModifyMode::Weird2
                | ModifyMode::AsymToRight
                | ModifyMode::AsymToLeft
                | ModifyMode::SquishToCenter
                | ModifyMode::StretchFromCenter
                | ModifyMode::StretchAndSquish
                | ModifyMode::CutOffRight
                | ModifyMode::CutOffLeft
                | ModifyMode::Flip
        )
    }
}

#[inline]
fn fract(x: f32) -> f32 {
    x - libm::floorf(x)
}

/// Power curve applied to the distance from the cycle's center
#[inline]
fn from_center(x: f32, exponent: f32) -> f32 {
    let d = 2.0 * x - 1.0;
    let curved = powf(d.abs(), exponent).copysign(d);
    (curved + 1.0) * 0.5
}

/// Where in the wavetable one read lands
#[derive(Debug, Clone, Copy)]
pub(crate) struct MorphRead {
    pub morph: f32,
    pub range: f32,
    pub morph_max: f32,
    pub mode: ModifyMode,
    /// Modify amount in samples
    pub modify: f32,
}

/// One sample of oscillator `osc` at read position `position` (already
/// inside the played cycle), with morph cross-fade and modify applied
pub(crate) fn read_morphed(
    store: &WaveformStore,
    osc: usize,
    read: &MorphRead,
    position: f32,
    len: usize,
) -> f32 {
    let lenf = len as f32;
    let n = (read.modify / lenf).clamp(0.0, 1.0);

    let position = if read.mode.warps_position() {
        read.mode.warp_position(position / lenf, n) * lenf
    } else {
        position
    };

    let range = read.range.max(1.0);
    let top = read.morph_max.clamp(0.0, (WAVE_SLOTS - 1) as f32);
    let morph = read.morph.clamp(0.0, top);
    let lo = libm::ceilf(morph - range).max(0.0) as usize;
    let hi = libm::floorf(morph + range).min(top) as usize;

    let mut acc = 0.0;
    for slot in lo..=hi {
        let weight = 1.0 - (morph - slot as f32).abs() / range;
        if weight <= 0.0 {
            continue;
        }
        let a = store.main_sample(osc, slot, position, len);
        let a = match read.mode {
            ModifyMode::Squarify => {
                let b = store.main_sample(osc, slot, position + lenf * 0.5, len);
                a * (1.0 - n) + n * 0.5 * (a - b)
            }
            ModifyMode::Pulsify => {
                let b = store.main_sample(osc, slot, position + n * lenf * 0.5, len);
                a * (1.0 - n) + n * 0.5 * (a - b)
            }
            _ => a,
        };
        acc += weight * a;
    }

    read.mode.shape_value(acc / range, n)
}

/// Phase state of one main oscillator
#[derive(Debug, Clone)]
pub struct MainOscillator {
    phases: [f32; MAX_UNISON],
    /// Per unison copy detune spread in [-1, 1], drawn at note start
    spread: [f32; MAX_UNISON],
}

impl Default for MainOscillator {
    fn default() -> Self {
        Self {
            phases: [0.0; MAX_UNISON],
            spread: [0.0; MAX_UNISON],
        }
    }
}

impl MainOscillator {
    /// Draw unison spread and randomized start phases
    pub fn start(&mut self, params: &MainOscParams, rng: &mut Rng) {
        let len = params.table_len() as f32;
        for u in 0..MAX_UNISON {
            self.spread[u] = rng.next_bipolar();
            self.phases[u] = rng.next_f32() * params.phase_rand * 0.01 * len;
        }
    }

    pub fn phase(&self, unison: usize) -> f32 {
        self.phases[unison]
    }

    /// Render one frame and advance. `osc` selects the wavetable.
    pub fn process(
        &mut self,
        osc: usize,
        params: &MainOscParams,
        store: &WaveformStore,
        note_frequency: f32,
        sample_rate: f32,
    ) -> OscFrame {
        let voices = params.voice_count();
        let len = params.table_len();
        let lenf = len as f32;
        let base = if params.keytracking {
            note_frequency
        } else {
            440.0
        };
        let offset = params.phase * 0.01 * lenf;

        let mut frame = [0.0f32; 2];
        let mut wrapped = false;

        for u in 0..voices {
            let (detune, morph, modify) = if voices > 1 {
                let t = u as f32 / (voices - 1) as f32;
                (
                    params.detune + self.spread[u] * params.unison_detune,
                    params.morph + params.unison_morph * t,
                    params.modify + params.unison_modify * t,
                )
            } else {
                (params.detune, params.morph, params.modify)
            };
            let modify = modify.clamp(0.0, TABLE_LEN as f32);

            let adjust = if params.modify_mode == ModifyMode::PulseWidth {
                modify
            } else {
                0.0
            };
            let period = lenf + adjust;

            let read = (self.phases[u] + offset).rem_euclid(period);
            let sample = if read >= lenf {
                0.0
            } else {
                let morph_read = MorphRead {
                    morph,
                    range: params.range,
                    morph_max: params.morph_max,
                    mode: params.modify_mode,
                    modify,
                };
                read_morphed(store, osc, &morph_read, read, len)
            };

            if voices > 1 {
                let spread = (voices - 1) as f32;
                frame[0] += sample * (voices - 1 - u) as f32 / spread;
                frame[1] += sample * u as f32 / spread;
            } else {
                frame = [sample, sample];
            }

            // Advance phase; the step ignores the pulse-width padding so a
            // wider period plays at a lower pitch
            let step = lenf * detune_with_cents(base, detune) / sample_rate;
            let next = self.phases[u] + step;
            if next >= period {
                self.phases[u] = next.rem_euclid(period);
                if u == 0 {
                    wrapped = true;
                }
            } else {
                self.phases[u] = next;
            }
        }

        if voices > 1 {
            let norm = 2.0 / voices as f32;
            frame[0] *= norm;
            frame[1] *= norm;
        }

        let gain = params.volume * 0.01;
        let value = apply_pan([frame[0] * gain, frame[1] * gain], params.pan);
        OscFrame { value, wrapped }
    }
}

/// All main oscillators of one voice
#[derive(Debug, Clone)]
pub struct MainOscBank {
    oscs: Vec<MainOscillator>,
}

impl Default for MainOscBank {
    fn default() -> Self {
        Self {
            oscs: vec![MainOscillator::default(); MAIN_OSCS],
        }
    }
}

impl MainOscBank {
    pub fn start(&mut self, params: &[MainOscParams], rng: &mut Rng) {
        for (osc, p) in self.oscs.iter_mut().zip(params) {
            osc.start(p, rng);
        }
    }

    pub fn osc(&self, index: usize) -> &MainOscillator {
        &self.oscs[index]
    }

    #[inline]
    pub fn process(
        &mut self,
        index: usize,
        params: &MainOscParams,
        store: &WaveformStore,
        note_frequency: f32,
        sample_rate: f32,
    ) -> OscFrame {
        self.oscs[index].process(index, params, store, note_frequency, sample_rate)
    }
}

//! Filters
//!
//! Each of the [`FILTERS`] filters takes the stereo signal the modulation
//! matrix routes into it, adds the output of a pitch-tracked feedback delay,
//! runs `slope + 1` cascaded stages of one filter form, saturates, and mixes
//! wet against dry with separate balance curves.
//!
//! The biquad forms use the RBJ "Audio EQ Cookbook" coefficients, recomputed
//! every frame so cutoff, resonance and gain can be modulated at audio rate.
//! The ladder form is the classic 4-pole Moog approximation with a cubic
//! soft clip on the last pole.

use crate::oscillator::detune_with_cents;
use crate::params::{FilterParams, FILTERS, FILTER_KINDS, MAX_SLOPE};
use core::f32::consts::TAU;
use libm::{cosf, expf, powf, sinf, sqrtf};
use serde::{Deserialize, Serialize};

/// Lowest pitch the feedback delay is sized for up front
const MIN_DELAY_FREQUENCY: f32 = 20.0;

/// Filter form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FilterKind {
    #[default]
    Lowpass,
    Highpass,
    Bandpass,
    LowShelf,
    HighShelf,
    Peak,
    Notch,
    Allpass,
    Moog,
}

impl FilterKind {
    pub const ALL: [FilterKind; FILTER_KINDS] = [
        FilterKind::Lowpass,
        FilterKind::Highpass,
        FilterKind::Bandpass,
        FilterKind::LowShelf,
        FilterKind::HighShelf,
        FilterKind::Peak,
        FilterKind::Notch,
        FilterKind::Allpass,
        FilterKind::Moog,
    ];

    /// Resolve the numeric `kind` control: floored, then bounded to the
    /// available forms
    pub fn from_value(value: f32) -> Self {
        let index = if value.is_finite() && value > 0.0 {
            (value as usize).min(FILTER_KINDS - 1)
        } else {
            0
        };
        Self::ALL[index]
    }
}

/// Normalized biquad coefficients (a0 = 1)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Biquad {
    pub b0: f32,
    pub b1: f32,
    pub b2: f32,
    pub a1: f32,
    pub a2: f32,
}

impl Biquad {
    /// Cookbook coefficients. `q` must be positive; cutoff is kept below
    /// Nyquist.
    pub fn new(kind: FilterKind, cutoff: f32, q: f32, gain_db: f32, sample_rate: f32) -> Self {
        let cutoff = cutoff.min(0.499 * sample_rate).max(1.0);
        let w0 = TAU * cutoff / sample_rate;
        let cos = cosf(w0);
        let sin = sinf(w0);
        let alpha = sin / (2.0 * q.max(0.0001));
        let a = powf(10.0, gain_db / 40.0);

        let (b0, b1, b2, a0, a1, a2) = match kind {
            FilterKind::Lowpass | FilterKind::Moog => {
                let b1 = 1.0 - cos;
                (b1 * 0.5, b1, b1 * 0.5, 1.0 + alpha, -2.0 * cos, 1.0 - alpha)
            }
            FilterKind::Highpass => {
                let b1 = -(1.0 + cos);
                (-b1 * 0.5, b1, -b1 * 0.5, 1.0 + alpha, -2.0 * cos, 1.0 - alpha)
            }
            FilterKind::Bandpass => (alpha, 0.0, -alpha, 1.0 + alpha, -2.0 * cos, 1.0 - alpha),
            FilterKind::Notch => (1.0, -2.0 * cos, 1.0, 1.0 + alpha, -2.0 * cos, 1.0 - alpha),
            FilterKind::Allpass => (
                1.0 - alpha,
                -2.0 * cos,
                1.0 + alpha,
                1.0 + alpha,
                -2.0 * cos,
                1.0 - alpha,
            ),
            FilterKind::Peak => (
                1.0 + alpha * a,
                -2.0 * cos,
                1.0 - alpha * a,
                1.0 + alpha / a,
                -2.0 * cos,
                1.0 - alpha / a,
            ),
            FilterKind::LowShelf => {
                let k = 2.0 * sqrtf(a) * alpha;
                (
                    a * ((a + 1.0) - (a - 1.0) * cos + k),
                    2.0 * a * ((a - 1.0) - (a + 1.0) * cos),
                    a * ((a + 1.0) - (a - 1.0) * cos - k),
                    (a + 1.0) + (a - 1.0) * cos + k,
                    -2.0 * ((a - 1.0) + (a + 1.0) * cos),
                    (a + 1.0) + (a - 1.0) * cos - k,
                )
            }
            FilterKind::HighShelf => {
                let k = 2.0 * sqrtf(a) * alpha;
                (
                    a * ((a + 1.0) + (a - 1.0) * cos + k),
                    -2.0 * a * ((a - 1.0) + (a + 1.0) * cos),
                    a * ((a + 1.0) + (a - 1.0) * cos - k),
                    (a + 1.0) - (a - 1.0) * cos + k,
                    2.0 * ((a - 1.0) - (a + 1.0) * cos),
                    (a + 1.0) - (a - 1.0) * cos - k,
                )
            }
        };

        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }
}

/// Ladder coefficients for one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoogCoefficients {
    k: f32,
    p: f32,
    feedback: f32,
}

impl MoogCoefficients {
    /// `resonance` uses the same Q scale as the biquads; Q 10 and above is
    /// full feedback
    pub fn new(cutoff: f32, resonance: f32, sample_rate: f32) -> Self {
        let cutoff = cutoff.min(0.499 * sample_rate).max(1.0);
        let f = 2.0 * cutoff / sample_rate;
        let k = 3.6 * f - 1.6 * f * f - 1.0;
        let p = (k + 1.0) * 0.5;
        let scale = expf((1.0 - p) * 1.386249);
        let res = (resonance * 0.1).clamp(0.0, 1.0);
        Self {
            k,
            p,
            feedback: res * scale,
        }
    }
}

/// History of one channel of one stage
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct ChannelHistory {
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
    /// Ladder poles
    poles: [f32; 4],
    /// Ladder pole inputs from the previous frame
    previous: [f32; 4],
}

impl ChannelHistory {
    #[inline]
    fn biquad(&mut self, c: &Biquad, x: f32) -> f32 {
        let y = c.b0 * x + c.b1 * self.x1 + c.b2 * self.x2 - c.a1 * self.y1 - c.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = x;
        self.y2 = self.y1;
        self.y1 = y;
        y
    }

    #[inline]
    fn ladder(&mut self, c: &MoogCoefficients, input: f32) -> f32 {
        let x = input - c.feedback * self.poles[3];
        let mut stage_in = x;
        for i in 0..4 {
            self.poles[i] = stage_in * c.p + self.previous[i] * c.p - c.k * self.poles[i];
            self.previous[i] = stage_in;
            stage_in = self.poles[i];
        }
        let y = self.poles[3];
        self.poles[3] = y - y * y * y / 6.0;
        self.poles[3]
    }
}

/// `sign(x) * |x|^(1 - amount/100)`
#[inline]
pub fn saturate(x: f32, amount: f32) -> f32 {
    if amount <= 0.0 || x == 0.0 {
        return x;
    }
    powf(x.abs(), 1.0 - amount.min(100.0) * 0.01).copysign(x)
}

/// Per-channel gains for the wet and dry paths at a given balance
#[inline]
pub fn balance_gains(balance: f32) -> ([f32; 2], [f32; 2]) {
    let b = balance * 0.01;
    let wet = [(1.0 - b).min(1.0), (1.0 + b).min(1.0)];
    let dry = [(1.0 + b).min(1.0), (1.0 - b).min(1.0)];
    (wet, dry)
}

/// State of one filter in one voice
#[derive(Debug, Clone)]
pub struct Filter {
    stages: [[ChannelHistory; 2]; MAX_SLOPE + 1],
    delay: Vec<[f32; 2]>,
    delay_len: usize,
    write: usize,
}

impl Filter {
    /// Reserves the feedback delay for pitches down to 20 Hz
    pub fn new(sample_rate: f32) -> Self {
        let capacity = (sample_rate / MIN_DELAY_FREQUENCY).ceil().max(1.0) as usize;
        Self {
            stages: [[ChannelHistory::default(); 2]; MAX_SLOPE + 1],
            delay: vec![[0.0; 2]; capacity],
            delay_len: 1,
            write: 0,
        }
    }

    /// Current feedback delay length in frames
    pub fn delay_len(&self) -> usize {
        self.delay_len
    }

    /// Pitch the feedback delay is tuned to
    pub fn delay_frequency(params: &FilterParams, note_frequency: f32) -> f32 {
        let base = if params.keytracking {
            note_frequency
        } else {
            440.0
        };
        detune_with_cents(base, params.detune)
    }

    fn retune_delay(&mut self, params: &FilterParams, note_frequency: f32, sample_rate: f32) {
        let frequency = Self::delay_frequency(params, note_frequency);
        let len = (sample_rate / frequency).round();
        let len = if len.is_finite() { len.max(1.0) as usize } else { 1 };
        if len > self.delay.len() {
            log::debug!("growing filter delay from {} to {} frames", self.delay.len(), len);
            self.delay.resize(len, [0.0; 2]);
        }
        self.delay_len = len;
    }

    pub fn reset(&mut self) {
        self.stages = [[ChannelHistory::default(); 2]; MAX_SLOPE + 1];
        self.delay.fill([0.0; 2]);
        self.write = 0;
    }

    /// Filter one frame of `input`
    pub fn process(
        &mut self,
        params: &FilterParams,
        input: [f32; 2],
        note_frequency: f32,
        sample_rate: f32,
    ) -> [f32; 2] {
        self.retune_delay(params, note_frequency, sample_rate);

        let cap = self.delay.len();
        let delayed = self.delay[(self.write + cap - self.delay_len) % cap];

        let in_gain = params.in_volume * 0.01;
        let feedback = params.feedback * 0.01;
        let dry = [
            input[0] * in_gain + feedback * delayed[0],
            input[1] * in_gain + feedback * delayed[1],
        ];

        let kind = FilterKind::from_value(params.kind);
        let stages = params.stages();
        let mut wet = dry;
        if kind == FilterKind::Moog {
            let c = MoogCoefficients::new(params.cutoff, params.resonance, sample_rate);
            for stage in &mut self.stages[..stages] {
                for ch in 0..2 {
                    wet[ch] = stage[ch].ladder(&c, wet[ch]);
                }
            }
        } else {
            let c = Biquad::new(kind, params.cutoff, params.resonance, params.gain, sample_rate);
            for stage in &mut self.stages[..stages] {
                for ch in 0..2 {
                    wet[ch] = stage[ch].biquad(&c, wet[ch]);
                }
            }
        }

        let mix = (params.wet_dry * 0.01).clamp(0.0, 1.0);
        let (wet_gain, dry_gain) = balance_gains(params.balance);
        let out_gain = params.out_volume * 0.01;
        let mut out = [0.0; 2];
        for ch in 0..2 {
            let w = saturate(wet[ch], params.saturation);
            out[ch] = (w * mix * wet_gain[ch] + dry[ch] * (1.0 - mix) * dry_gain[ch]) * out_gain;
        }

        self.delay[self.write] = out;
        self.write = (self.write + 1) % cap;
        out
    }
}

/// All filters of one voice
#[derive(Debug, Clone)]
pub struct FilterBank {
    filters: Vec<Filter>,
}

impl FilterBank {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            filters: vec![Filter::new(sample_rate); FILTERS],
        }
    }

    pub fn filter(&self, index: usize) -> &Filter {
        &self.filters[index]
    }

    #[inline]
    pub fn process(
        &mut self,
        index: usize,
        params: &FilterParams,
        input: [f32; 2],
        note_frequency: f32,
        sample_rate: f32,
    ) -> [f32; 2] {
        self.filters[index].process(params, input, note_frequency, sample_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    fn lowpass() -> FilterParams {
        FilterParams {
            enabled: true,
            cutoff: 2000.0,
            resonance: 0.707,
            slope: 1.0,
            ..FilterParams::default()
        }
    }

    fn settle(filter: &mut Filter, params: &FilterParams, input: f32, frames: usize) -> f32 {
        let mut out = 0.0;
        for _ in 0..frames {
            out = filter.process(params, [input; 2], 440.0, 44100.0)[0];
        }
        out
    }

    /// |H(e^jw)| of a biquad at `freq`
    fn magnitude(c: &Biquad, freq: f32, sample_rate: f32) -> f32 {
        let w = TAU * freq / sample_rate;
        let (c1, s1, c2, s2) = (w.cos(), w.sin(), (2.0 * w).cos(), (2.0 * w).sin());
        let num_re = c.b0 + c.b1 * c1 + c.b2 * c2;
        let num_im = -(c.b1 * s1 + c.b2 * s2);
        let den_re = 1.0 + c.a1 * c1 + c.a2 * c2;
        let den_im = -(c.a1 * s1 + c.a2 * s2);
        ((num_re * num_re + num_im * num_im) / (den_re * den_re + den_im * den_im)).sqrt()
    }

    #[test]
    fn test_biquad_responses() {
        let sr = 44100.0;
        let fc = 1000.0;
        let nyquist = sr * 0.5;
        let gain_db = 12.0;
        let boost = 10f32.powf(gain_db / 20.0);

        let bp = Biquad::new(FilterKind::Bandpass, fc, 0.707, 0.0, sr);
        assert_abs_diff_eq!(magnitude(&bp, 0.0, sr), 0.0, epsilon = 1e-4);
        assert_abs_diff_eq!(magnitude(&bp, fc, sr), 1.0, epsilon = 1e-3);
        assert_abs_diff_eq!(magnitude(&bp, nyquist, sr), 0.0, epsilon = 1e-4);

        let notch = Biquad::new(FilterKind::Notch, fc, 0.707, 0.0, sr);
        assert_abs_diff_eq!(magnitude(&notch, 0.0, sr), 1.0, epsilon = 1e-3);
        assert_abs_diff_eq!(magnitude(&notch, fc, sr), 0.0, epsilon = 1e-3);

        let allpass = Biquad::new(FilterKind::Allpass, fc, 0.707, 0.0, sr);
        for f in [0.0, 200.0, fc, 5000.0, nyquist] {
            assert_abs_diff_eq!(magnitude(&allpass, f, sr), 1.0, epsilon = 1e-3);
        }

        let peak = Biquad::new(FilterKind::Peak, fc, 0.707, gain_db, sr);
        assert_relative_eq!(magnitude(&peak, fc, sr), boost, epsilon = 1e-2);
        assert_abs_diff_eq!(magnitude(&peak, 0.0, sr), 1.0, epsilon = 1e-3);

        let high_shelf = Biquad::new(FilterKind::HighShelf, fc, 0.707, gain_db, sr);
        assert_abs_diff_eq!(magnitude(&high_shelf, 0.0, sr), 1.0, epsilon = 1e-3);
        assert_relative_eq!(magnitude(&high_shelf, nyquist, sr), boost, epsilon = 1e-2);

        let low_shelf = Biquad::new(FilterKind::LowShelf, fc, 0.707, gain_db, sr);
        assert_relative_eq!(magnitude(&low_shelf, 0.0, sr), boost, epsilon = 1e-2);
        assert_abs_diff_eq!(magnitude(&low_shelf, nyquist, sr), 1.0, epsilon = 1e-3);
    }

    #[test]
    fn test_kind_from_value() {
        assert_eq!(FilterKind::from_value(0.0), FilterKind::Lowpass);
        assert_eq!(FilterKind::from_value(2.9), FilterKind::Bandpass);
        assert_eq!(FilterKind::from_value(8.0), FilterKind::Moog);
        assert_eq!(FilterKind::from_value(40.0), FilterKind::Moog);
        assert_eq!(FilterKind::from_value(-3.0), FilterKind::Lowpass);
        assert_eq!(FilterKind::from_value(f32::NAN), FilterKind::Lowpass);
    }

    #[test]
    fn test_lowpass_impulse_is_stable() {
        let params = lowpass();
        let mut filter = Filter::new(44100.0);
        let mut peak = 0.0f32;
        let mut tail = 0.0f32;
        for k in 0..4410 {
            let x = if k == 0 { 1.0 } else { 0.0 };
            let y = filter.process(&params, [x, x], 440.0, 44100.0);
            assert!(y[0].is_finite() && y[1].is_finite());
            peak = peak.max(y[0].abs());
            if k > 4000 {
                tail = tail.max(y[0].abs());
            }
        }
        assert!(peak > 0.0 && peak <= 2.0, "peak {}", peak);
        assert!(tail < 1e-5, "tail {}", tail);
    }

    #[test]
    fn test_lowpass_passes_dc_highpass_blocks_it() {
        let mut filter = Filter::new(44100.0);
        assert_relative_eq!(settle(&mut filter, &lowpass(), 1.0, 4000), 1.0, epsilon = 1e-3);

        let highpass = FilterParams {
            kind: 1.0,
            ..lowpass()
        };
        let mut filter = Filter::new(44100.0);
        assert_abs_diff_eq!(settle(&mut filter, &highpass, 1.0, 4000), 0.0, epsilon = 1e-3);
    }

    #[test]
    fn test_shelf_gain_at_dc() {
        let shelf = FilterParams {
            kind: 3.0,
            gain: 6.0,
            slope: 0.0,
            ..lowpass()
        };
        let mut filter = Filter::new(44100.0);
        let expected = powf(10.0, 6.0 / 20.0);
        assert_relative_eq!(settle(&mut filter, &shelf, 1.0, 4000), expected, epsilon = 1e-2);
    }

    #[test]
    fn test_moog_is_stable_and_passes_dc() {
        let moog = FilterParams {
            kind: 8.0,
            resonance: 0.0001,
            slope: 0.0,
            ..lowpass()
        };
        let mut filter = Filter::new(44100.0);
        let out = settle(&mut filter, &moog, 0.5, 20000);
        assert!(out.is_finite());
        assert!(out > 0.3 && out < 0.6, "out {}", out);
    }

    #[test]
    fn test_delay_tracks_pitch() {
        let params = FilterParams {
            feedback: 50.0,
            ..lowpass()
        };
        let mut filter = Filter::new(44100.0);
        filter.process(&params, [0.0; 2], 440.0, 44100.0);
        assert_eq!(filter.delay_len(), 100);

        let detuned = FilterParams {
            detune: 1200.0,
            ..params.clone()
        };
        filter.process(&detuned, [0.0; 2], 440.0, 44100.0);
        assert_eq!(filter.delay_len(), 50);

        let untracked = FilterParams {
            keytracking: false,
            ..params
        };
        filter.process(&untracked, [0.0; 2], 220.0, 44100.0);
        assert_eq!(filter.delay_len(), 100);

        // below the reserved range the line grows
        filter.process(&untracked, [0.0; 2], 5.0, 44100.0);
        assert_eq!(filter.delay_len(), 100);
        let low = FilterParams {
            detune: -7200.0,
            ..untracked
        };
        filter.process(&low, [0.0; 2], 440.0, 44100.0);
        assert_eq!(filter.delay_len(), 6415);
    }

    #[test]
    fn test_feedback_echoes_at_period() {
        let params = FilterParams {
            wet_dry: 0.0,
            feedback: 50.0,
            ..lowpass()
        };
        let mut filter = Filter::new(44100.0);
        let out: Vec<f32> = (0..201)
            .map(|k| {
                let x = if k == 0 { 1.0 } else { 0.0 };
                filter.process(&params, [x, x], 440.0, 44100.0)[0]
            })
            .collect();
        assert_eq!(out[0], 1.0);
        assert_eq!(out[50], 0.0);
        assert_relative_eq!(out[100], 0.5);
        assert_relative_eq!(out[200], 0.25);
    }

    #[test]
    fn test_saturation_curve() {
        assert_eq!(saturate(0.25, 0.0), 0.25);
        assert_relative_eq!(saturate(0.25, 50.0), 0.5);
        assert_relative_eq!(saturate(-0.25, 50.0), -0.5);
        assert_eq!(saturate(0.0, 100.0), 0.0);
    }

    #[test]
    fn test_balance_gains() {
        assert_eq!(balance_gains(0.0), ([1.0, 1.0], [1.0, 1.0]));
        assert_eq!(balance_gains(100.0), ([0.0, 1.0], [1.0, 0.0]));
        assert_eq!(balance_gains(-50.0), ([1.0, 0.5], [0.5, 1.0]));
    }

    #[test]
    fn test_dry_path_and_volumes() {
        let params = FilterParams {
            wet_dry: 0.0,
            in_volume: 50.0,
            out_volume: 200.0,
            ..lowpass()
        };
        let mut filter = Filter::new(44100.0);
        let out = filter.process(&params, [0.3, -0.2], 440.0, 44100.0);
        assert_relative_eq!(out[0], 0.3);
        assert_relative_eq!(out[1], -0.2);
    }
}

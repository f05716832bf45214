//! Waveform Store
//!
//! Read-only audio material the voices play from:
//!
//! - main oscillator wavetables, [`WAVE_SLOTS`] waveforms of [`TABLE_LEN`]
//!   samples per oscillator
//! - one [`TABLE_LEN`] waveform per sub-oscillator
//! - one stereo [`SampleBuffer`] per sampler
//! - one [`GRAPH_POINTS`] shape graph per sampler
//!
//! Tables are allocated the first time something is written to them; an
//! unallocated table reads as silence. All reads take a fractional position
//! and interpolate linearly.

use crate::error::{check_index, SynthError};
use crate::params::{GRAPH_POINTS, MAIN_OSCS, SAMPLERS, SUB_OSCS, TABLE_LEN, WAVE_SLOTS};

/// Samples in one main oscillator's full wavetable
pub const MAIN_TABLE_LEN: usize = WAVE_SLOTS * TABLE_LEN;

#[inline]
fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Copy `src` into `dst`, zero-filling or truncating, and report a mismatch
fn fill_from(dst: &mut [f32], src: &[f32], what: &str) {
    if src.len() != dst.len() {
        log::warn!(
            "{} expects {} samples, got {}; {}",
            what,
            dst.len(),
            src.len(),
            if src.len() < dst.len() {
                "zero-filling the rest"
            } else {
                "truncating"
            }
        );
    }
    let n = src.len().min(dst.len());
    dst[..n].copy_from_slice(&src[..n]);
    dst[n..].fill(0.0);
}

/// Stereo audio played by a sampler
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SampleBuffer {
    left: Vec<f32>,
    right: Vec<f32>,
    sample_rate: f32,
}

impl SampleBuffer {
    /// Build from separate channels. A shorter channel is zero-filled to the
    /// length of the longer one.
    pub fn from_channels(
        mut left: Vec<f32>,
        mut right: Vec<f32>,
        sample_rate: f32,
    ) -> Result<Self, SynthError> {
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(SynthError::InvalidSampleData(format!(
                "sample rate {} is not positive",
                sample_rate
            )));
        }
        if left.len() != right.len() {
            log::warn!(
                "sample channels differ in length ({} vs {}), zero-filling the shorter one",
                left.len(),
                right.len()
            );
            let frames = left.len().max(right.len());
            left.resize(frames, 0.0);
            right.resize(frames, 0.0);
        }
        Ok(Self {
            left,
            right,
            sample_rate,
        })
    }

    /// Build from interleaved `L R L R ...` data. A trailing half frame is
    /// dropped.
    pub fn from_interleaved(data: &[f32], sample_rate: f32) -> Result<Self, SynthError> {
        if data.len() % 2 != 0 {
            log::warn!(
                "interleaved sample data holds an odd number of values ({}), dropping the last",
                data.len()
            );
        }
        let left = data.chunks_exact(2).map(|f| f[0]).collect();
        let right = data.chunks_exact(2).map(|f| f[1]).collect();
        Self::from_channels(left, right, sample_rate)
    }

    /// Same data on both channels
    pub fn mono(data: Vec<f32>, sample_rate: f32) -> Result<Self, SynthError> {
        let right = data.clone();
        Self::from_channels(data, right, sample_rate)
    }

    /// Channel 0 is left, anything else right
    pub fn channel(&self, channel: usize) -> &[f32] {
        if channel == 0 {
            &self.left
        } else {
            &self.right
        }
    }

    pub fn frame_count(&self) -> usize {
        self.left.len()
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn is_empty(&self) -> bool {
        self.left.is_empty()
    }

    /// Interpolated stereo frame at a fractional position; out-of-range
    /// positions read as silence.
    #[inline]
    pub fn frame(&self, position: f32) -> [f32; 2] {
        let frames = self.frame_count();
        if !(position >= 0.0) || position >= frames as f32 {
            return [0.0; 2];
        }
        let i0 = position as usize;
        let i1 = (i0 + 1).min(frames - 1);
        let t = position - i0 as f32;
        [
            lerp(self.left[i0], self.left[i1], t),
            lerp(self.right[i0], self.right[i1], t),
        ]
    }
}

/// Every table the synthesis core reads from
#[derive(Debug, Clone)]
pub struct WaveformStore {
    main: Vec<Vec<f32>>,
    sub: Vec<Vec<f32>>,
    samples: Vec<SampleBuffer>,
    graphs: Vec<[f32; GRAPH_POINTS]>,
}

impl Default for WaveformStore {
    fn default() -> Self {
        Self::new()
    }
}

impl WaveformStore {
    /// Empty tables; every shape graph starts as a straight ramp so graph
    /// playback matches plain playback until a graph is drawn.
    pub fn new() -> Self {
        let mut ramp = [0.0; GRAPH_POINTS];
        for (i, v) in ramp.iter_mut().enumerate() {
            *v = i as f32 / (GRAPH_POINTS - 1) as f32;
        }
        Self {
            main: vec![Vec::new(); MAIN_OSCS],
            sub: vec![Vec::new(); SUB_OSCS],
            samples: vec![SampleBuffer::default(); SAMPLERS],
            graphs: vec![ramp; SAMPLERS],
        }
    }

    /// Replace one oscillator's whole table (all slots, slot-major)
    pub fn load_main_table(&mut self, osc: usize, data: &[f32]) -> Result<(), SynthError> {
        check_index("main", osc, MAIN_OSCS)?;
        let table = &mut self.main[osc];
        table.resize(MAIN_TABLE_LEN, 0.0);
        fill_from(table, data, "main wavetable");
        Ok(())
    }

    /// Replace one waveform slot of a main oscillator
    pub fn set_main_waveform(
        &mut self,
        osc: usize,
        slot: usize,
        data: &[f32],
    ) -> Result<(), SynthError> {
        check_index("main", osc, MAIN_OSCS)?;
        check_index("wave slot", slot, WAVE_SLOTS)?;
        let table = &mut self.main[osc];
        if table.is_empty() {
            table.resize(MAIN_TABLE_LEN, 0.0);
        }
        let start = slot * TABLE_LEN;
        fill_from(&mut table[start..start + TABLE_LEN], data, "waveform");
        Ok(())
    }

    pub fn set_sub_waveform(&mut self, sub: usize, data: &[f32]) -> Result<(), SynthError> {
        check_index("sub", sub, SUB_OSCS)?;
        let table = &mut self.sub[sub];
        table.resize(TABLE_LEN, 0.0);
        fill_from(table, data, "sub waveform");
        Ok(())
    }

    /// Replace a sampler's shape graph. Points are clamped to [0, 1].
    pub fn set_graph(&mut self, sampler: usize, points: &[f32]) -> Result<(), SynthError> {
        check_index("sampler", sampler, SAMPLERS)?;
        let graph = &mut self.graphs[sampler];
        fill_from(graph, points, "shape graph");
        for p in graph.iter_mut() {
            *p = if p.is_finite() { p.clamp(0.0, 1.0) } else { 0.0 };
        }
        Ok(())
    }

    pub fn set_sample(&mut self, sampler: usize, buffer: SampleBuffer) -> Result<(), SynthError> {
        check_index("sampler", sampler, SAMPLERS)?;
        self.samples[sampler] = buffer;
        Ok(())
    }

    pub fn clear_sample(&mut self, sampler: usize) -> Result<(), SynthError> {
        self.set_sample(sampler, SampleBuffer::default())
    }

    /// Raw stored value, for inspection
    pub fn main_value(&self, osc: usize, slot: usize, index: usize) -> f32 {
        self.main
            .get(osc)
            .and_then(|t| t.get(slot * TABLE_LEN + index))
            .copied()
            .unwrap_or(0.0)
    }

    /// Interpolated read of one main waveform, wrapping at `len`
    #[inline]
    pub fn main_sample(&self, osc: usize, slot: usize, position: f32, len: usize) -> f32 {
        match self.main.get(osc) {
            Some(table) if !table.is_empty() && slot < WAVE_SLOTS => {
                let start = slot * TABLE_LEN;
                read_wrapped(&table[start..start + TABLE_LEN], position, len)
            }
            _ => 0.0,
        }
    }

    /// Interpolated read of a sub-oscillator waveform, wrapping at `len`
    #[inline]
    pub fn sub_sample(&self, sub: usize, position: f32, len: usize) -> f32 {
        match self.sub.get(sub) {
            Some(table) if !table.is_empty() => read_wrapped(table, position, len),
            _ => 0.0,
        }
    }

    /// Shape graph value at a fractional point index, clamped at both ends
    #[inline]
    pub fn graph_value(&self, sampler: usize, position: f32) -> f32 {
        let Some(graph) = self.graphs.get(sampler) else {
            return 0.0;
        };
        let last = (GRAPH_POINTS - 1) as f32;
        let position = if position.is_finite() {
            position.clamp(0.0, last)
        } else {
            0.0
        };
        let i0 = position as usize;
        let i1 = (i0 + 1).min(GRAPH_POINTS - 1);
        lerp(graph[i0], graph[i1], position - i0 as f32)
    }

    /// The sampler's buffer, if one is loaded
    pub fn sample(&self, sampler: usize) -> Option<&SampleBuffer> {
        self.samples.get(sampler).filter(|b| !b.is_empty())
    }
}

/// Linear interpolation over the first `len` samples of `table`, treating
/// them as one cycle
#[inline]
fn read_wrapped(table: &[f32], position: f32, len: usize) -> f32 {
    let len = len.clamp(1, table.len());
    let lenf = len as f32;
    let position = if position.is_finite() {
        position.rem_euclid(lenf)
    } else {
        0.0
    };
    let i0 = (position as usize).min(len - 1);
    let i1 = if i0 + 1 >= len { 0 } else { i0 + 1 };
    lerp(table[i0], table[i1], position - i0 as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_unloaded_tables_are_silent() {
        let store = WaveformStore::new();
        assert_eq!(store.main_sample(0, 0, 10.5, TABLE_LEN), 0.0);
        assert_eq!(store.sub_sample(3, 10.5, TABLE_LEN), 0.0);
        assert!(store.sample(0).is_none());
    }

    #[test]
    fn test_main_waveform_interpolates_and_wraps() {
        let mut store = WaveformStore::new();
        let ramp: Vec<f32> = (0..TABLE_LEN).map(|i| i as f32).collect();
        store.set_main_waveform(1, 3, &ramp).unwrap();

        assert_eq!(store.main_value(1, 3, 7), 7.0);
        assert_relative_eq!(store.main_sample(1, 3, 7.25, TABLE_LEN), 7.25);
        assert_relative_eq!(store.main_sample(1, 3, 7.25 + TABLE_LEN as f32, TABLE_LEN), 7.25);
        // last sample interpolates back towards the first
        assert_relative_eq!(store.main_sample(1, 3, 3.5, 4), 1.5);
        // other slots of the same oscillator stay silent
        assert_eq!(store.main_sample(1, 2, 7.0, TABLE_LEN), 0.0);
    }

    #[test]
    fn test_short_waveform_is_zero_filled() {
        let mut store = WaveformStore::new();
        store.set_sub_waveform(0, &[1.0, 1.0]).unwrap();
        assert_eq!(store.sub_sample(0, 1.0, TABLE_LEN), 1.0);
        assert_eq!(store.sub_sample(0, 5.0, TABLE_LEN), 0.0);
    }

    #[test]
    fn test_load_main_table_truncates() {
        let mut store = WaveformStore::new();
        let data = vec![0.5; MAIN_TABLE_LEN + 10];
        store.load_main_table(0, &data).unwrap();
        assert_eq!(store.main_value(0, WAVE_SLOTS - 1, TABLE_LEN - 1), 0.5);
    }

    #[test]
    fn test_bad_indices_are_errors() {
        let mut store = WaveformStore::new();
        assert!(store.set_main_waveform(MAIN_OSCS, 0, &[]).is_err());
        assert!(store.set_main_waveform(0, WAVE_SLOTS, &[]).is_err());
        assert!(store.set_graph(SAMPLERS, &[]).is_err());
    }

    #[test]
    fn test_default_graph_is_identity_ramp() {
        let store = WaveformStore::new();
        assert_relative_eq!(store.graph_value(0, 0.0), 0.0);
        assert_relative_eq!(store.graph_value(0, (GRAPH_POINTS - 1) as f32), 1.0);
        assert_relative_eq!(store.graph_value(0, 1000.0), 1.0);
    }

    #[test]
    fn test_graph_points_are_clamped() {
        let mut store = WaveformStore::new();
        store.set_graph(2, &[2.0, -1.0]).unwrap();
        assert_eq!(store.graph_value(2, 0.0), 1.0);
        assert_eq!(store.graph_value(2, 1.0), 0.0);
        assert_relative_eq!(store.graph_value(2, 0.5), 0.5);
    }

    #[test]
    fn test_sample_buffer_from_interleaved() {
        let buffer = SampleBuffer::from_interleaved(&[0.1, 0.2, 0.3, 0.4, 0.5], 48000.0).unwrap();
        assert_eq!(buffer.frame_count(), 2);
        assert_eq!(buffer.channel(0), &[0.1, 0.3]);
        assert_eq!(buffer.channel(1), &[0.2, 0.4]);
        assert_eq!(buffer.sample_rate(), 48000.0);
    }

    #[test]
    fn test_sample_buffer_pads_short_channel() {
        let buffer = SampleBuffer::from_channels(vec![1.0, 1.0, 1.0], vec![1.0], 44100.0).unwrap();
        assert_eq!(buffer.channel(1), &[1.0, 0.0, 0.0]);
        assert!(SampleBuffer::from_channels(vec![], vec![], 0.0).is_err());
    }

    #[test]
    fn test_sample_buffer_frame() {
        let buffer = SampleBuffer::mono(vec![0.0, 1.0], 44100.0).unwrap();
        assert_eq!(buffer.frame(0.5), [0.5, 0.5]);
        assert_eq!(buffer.frame(2.0), [0.0, 0.0]);
        assert_eq!(buffer.frame(-0.1), [0.0, 0.0]);
    }
}

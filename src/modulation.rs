//! Modulation Matrix
//!
//! Each enabled [`MatrixSlot`] reads up to two signal sources, shapes and
//! combines them, and adds the result to one target control in the voice's
//! parameter snapshot. Every write is recorded so the voice can put the
//! authored value back at the end of the frame; modulation therefore never
//! accumulates from one frame to the next.
//!
//! Sources come from the voice through [`ModulationSources`]. Oscillator-like
//! sources are read through a [`SourceTap`], which also implements the
//! "envelope" behaviour: after the source completes its first cycle the tap
//! keeps reporting the value captured just before the wrap.

use crate::params::{
    FilterParam, MainParam, MatrixParam, MatrixSlot, Param, ParamSet, SamplerParam, SubParam,
    FILTERS, HUMANIZERS, MACROS, MAIN_OSCS, MATRIX_SLOTS, MAX_SLOPE, MAX_UNISON, SAMPLERS,
    SUB_OSCS, TABLE_LEN, WAVE_SLOTS,
};
use libm::powf;
use serde::{Deserialize, Serialize};

/// Kind of signal a matrix slot reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ModSource {
    #[default]
    None,
    MainOsc,
    SubOsc,
    Sampler,
    Filter,
    Velocity,
    Panning,
    Humanizer,
    Macro,
}

impl ModSource {
    const ALL: [ModSource; 9] = [
        ModSource::None,
        ModSource::MainOsc,
        ModSource::SubOsc,
        ModSource::Sampler,
        ModSource::Filter,
        ModSource::Velocity,
        ModSource::Panning,
        ModSource::Humanizer,
        ModSource::Macro,
    ];

    pub fn ordinal(self) -> usize {
        self as usize
    }

    /// Unknown ordinals read as `None`
    pub fn from_ordinal(ordinal: usize) -> Self {
        Self::ALL.get(ordinal).copied().unwrap_or_default()
    }
}

/// How the primary and secondary source are merged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CombineMode {
    /// `a + b - 1` on sources remapped to [0, 1]
    #[default]
    AddBidirectional,
    /// `a * b - 1` on sources remapped to [0, 1]
    MultiplyBidirectional,
    /// `a + b`
    AddUnidirectional,
    /// `a * b`
    MultiplyUnidirectional,
}

impl CombineMode {
    const ALL: [CombineMode; 4] = [
        CombineMode::AddBidirectional,
        CombineMode::MultiplyBidirectional,
        CombineMode::AddUnidirectional,
        CombineMode::MultiplyUnidirectional,
    ];

    pub fn ordinal(self) -> usize {
        self as usize
    }

    pub fn from_ordinal(ordinal: usize) -> Self {
        Self::ALL.get(ordinal).copied().unwrap_or_default()
    }

    pub fn is_bidirectional(self) -> bool {
        matches!(
            self,
            CombineMode::AddBidirectional | CombineMode::MultiplyBidirectional
        )
    }

    #[inline]
    fn combine(self, a: f32, b: f32) -> f32 {
        match self {
            CombineMode::AddBidirectional => a + b - 1.0,
            CombineMode::MultiplyBidirectional => a * b - 1.0,
            CombineMode::AddUnidirectional => a + b,
            CombineMode::MultiplyUnidirectional => a * b,
        }
    }
}

/// Where a matrix slot writes. The bank index lives in the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ModTarget {
    #[default]
    None,
    Main(MainParam),
    Sub(SubParam),
    Sampler(SamplerParam),
    Matrix(MatrixParam),
    /// Adds the stereo signal to a filter's input
    FilterInput,
    Filter(FilterParam),
    Macro,
}

impl ModTarget {
    /// Section number in the flat layout
    pub fn section_code(self) -> usize {
        match self {
            ModTarget::None => 0,
            ModTarget::Main(_) => 1,
            ModTarget::Sub(_) => 2,
            ModTarget::Sampler(_) => 3,
            ModTarget::Matrix(_) => 4,
            ModTarget::FilterInput => 5,
            ModTarget::Filter(_) => 6,
            ModTarget::Macro => 7,
        }
    }

    /// Signal number within the section
    pub fn signal_code(self) -> usize {
        match self {
            ModTarget::Main(p) => p.ordinal(),
            ModTarget::Sub(p) => p.ordinal(),
            ModTarget::Sampler(p) => p.ordinal(),
            ModTarget::Matrix(p) => p.ordinal(),
            ModTarget::Filter(p) => p.ordinal(),
            ModTarget::None | ModTarget::FilterInput | ModTarget::Macro => 0,
        }
    }

    /// Inverse of the two codes; anything unknown becomes `None`
    pub fn from_codes(section: usize, signal: usize) -> Self {
        let target = match section {
            1 => MainParam::from_ordinal(signal).map(ModTarget::Main),
            2 => SubParam::from_ordinal(signal).map(ModTarget::Sub),
            3 => SamplerParam::from_ordinal(signal).map(ModTarget::Sampler),
            4 => MatrixParam::from_ordinal(signal).map(ModTarget::Matrix),
            5 => Some(ModTarget::FilterInput),
            6 => FilterParam::from_ordinal(signal).map(ModTarget::Filter),
            7 => Some(ModTarget::Macro),
            _ => None,
        };
        target.unwrap_or_default()
    }

    /// The control addressed at `index`, if it exists
    pub fn param(self, index: usize) -> Option<Param> {
        let (param, len) = match self {
            ModTarget::Main(p) => (Param::Main(index, p), MAIN_OSCS),
            ModTarget::Sub(p) => (Param::Sub(index, p), SUB_OSCS),
            ModTarget::Sampler(p) => (Param::Sampler(index, p), SAMPLERS),
            ModTarget::Matrix(p) => (Param::Matrix(index, p), MATRIX_SLOTS),
            ModTarget::Filter(p) => (Param::Filter(index, p), FILTERS),
            ModTarget::Macro => (Param::Macro(index), MACROS),
            ModTarget::None | ModTarget::FilterInput => return None,
        };
        (index < len).then_some(param)
    }
}

/// Scale and bounds applied when modulating one control
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModRange {
    /// Control units per unit of modulation
    pub scale: f32,
    pub min: f32,
    pub max: f32,
}

impl ModRange {
    const fn new(scale: f32, min: f32, max: f32) -> Self {
        Self { scale, min, max }
    }

    const fn unbounded(scale: f32) -> Self {
        Self::new(scale, f32::NEG_INFINITY, f32::INFINITY)
    }

    #[inline]
    pub fn apply(&self, base: f32, amount: f32) -> f32 {
        (base + amount * self.scale).clamp(self.min, self.max)
    }
}

/// How a control responds to modulation; `None` for controls that cannot be
/// modulated (flags, modes, routing).
pub fn modulation_range(param: Param, snapshot: &ParamSet) -> Option<ModRange> {
    let table = TABLE_LEN as f32;
    let range = match param {
        Param::Main(i, p) => {
            let morph_max = snapshot.main[i].morph_max.clamp(0.0, (WAVE_SLOTS - 1) as f32);
            match p {
                MainParam::Morph | MainParam::UnisonMorph => {
                    ModRange::new(morph_max, 0.0, morph_max)
                }
                MainParam::Range => ModRange::new(WAVE_SLOTS as f32, 1.0, WAVE_SLOTS as f32),
                MainParam::Modify | MainParam::UnisonModify => ModRange::new(table, 0.0, table),
                MainParam::Detune => ModRange::unbounded(4800.0),
                MainParam::Phase | MainParam::Volume => ModRange::unbounded(100.0),
                MainParam::Pan => ModRange::new(200.0, -100.0, 100.0),
                MainParam::UnisonVoices => ModRange::new(MAX_UNISON as f32, 1.0, MAX_UNISON as f32),
                MainParam::UnisonDetune => ModRange::new(100.0, 0.0, f32::INFINITY),
                _ => return None,
            }
        }
        Param::Sub(_, p) => match p {
            SubParam::Detune => ModRange::unbounded(4800.0),
            SubParam::Phase | SubParam::Volume => ModRange::unbounded(100.0),
            SubParam::Pan => ModRange::new(200.0, -100.0, 100.0),
            SubParam::Length => ModRange::new(table, 1.0, table),
            _ => return None,
        },
        Param::Sampler(_, p) => match p {
            SamplerParam::Detune => ModRange::unbounded(4800.0),
            SamplerParam::Phase | SamplerParam::Volume => ModRange::unbounded(100.0),
            _ => return None,
        },
        Param::Matrix(_, p) => match p {
            MatrixParam::Amount | MatrixParam::Amount2 => ModRange::new(100.0, -100.0, 100.0),
            MatrixParam::Curve | MatrixParam::Curve2 => ModRange::new(100.0, 1.0, 1000.0),
            _ => return None,
        },
        Param::Filter(_, p) => match p {
            FilterParam::Cutoff => ModRange::new(19980.0, 20.0, 21999.0),
            FilterParam::Resonance => ModRange::new(10.0, 0.0001, f32::INFINITY),
            FilterParam::Gain => ModRange::unbounded(30.0),
            FilterParam::Kind => ModRange::new(9.0, 0.0, f32::INFINITY),
            FilterParam::Slope => ModRange::new((MAX_SLOPE + 1) as f32, 0.0, f32::INFINITY),
            FilterParam::InVolume | FilterParam::OutVolume => ModRange::unbounded(100.0),
            FilterParam::WetDry | FilterParam::Saturation => ModRange::new(100.0, 0.0, 100.0),
            FilterParam::Balance | FilterParam::Feedback => ModRange::new(100.0, -100.0, 100.0),
            FilterParam::Detune => ModRange::unbounded(4800.0),
            _ => return None,
        },
        Param::Macro(_) => ModRange::new(100.0, -100.0, 100.0),
    };
    Some(range)
}

/// Last output of an oscillator-like source, with its envelope hold
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SourceTap {
    value: [f32; 2],
    held: [f32; 2],
    cycle_done: bool,
}

impl SourceTap {
    /// Record this frame's output. `wrapped` marks the frame in which the
    /// source completed a cycle; each such frame samples the value from the
    /// frame before it into the hold.
    #[inline]
    pub fn update(&mut self, value: [f32; 2], wrapped: bool) {
        if wrapped {
            self.held = self.value;
            self.cycle_done = true;
        }
        self.value = value;
    }

    /// Output as seen by a slot in LFO (`envelope == false`) or envelope mode
    #[inline]
    pub fn read(&self, envelope: bool) -> [f32; 2] {
        if envelope && self.cycle_done {
            self.held
        } else {
            self.value
        }
    }

    pub fn cycle_done(&self) -> bool {
        self.cycle_done
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Per-voice signal values the matrix can read
pub trait ModulationSources {
    fn main_osc(&self, index: usize, envelope: bool) -> [f32; 2];
    fn sub_osc(&self, index: usize, envelope: bool) -> [f32; 2];
    fn sampler(&self, index: usize, envelope: bool) -> [f32; 2];
    fn filter(&self, index: usize) -> [f32; 2];
    /// Note velocity mapped to [-1, 1]
    fn velocity(&self) -> f32;
    /// Note panning in [-1, 1]
    fn panning(&self) -> f32;
    /// Per-voice random value in [-1, 1], fixed for the note's lifetime
    fn humanizer(&self, index: usize) -> f32;
}

fn source_pair(
    source: ModSource,
    index: usize,
    envelope: bool,
    snapshot: &ParamSet,
    sources: &impl ModulationSources,
) -> [f32; 2] {
    match source {
        ModSource::None => [0.0; 2],
        ModSource::MainOsc if index < MAIN_OSCS => sources.main_osc(index, envelope),
        ModSource::SubOsc if index < SUB_OSCS => sources.sub_osc(index, envelope),
        ModSource::Sampler if index < SAMPLERS => sources.sampler(index, envelope),
        ModSource::Filter if index < FILTERS => sources.filter(index),
        ModSource::Velocity => [sources.velocity(); 2],
        ModSource::Panning => [sources.panning(); 2],
        ModSource::Humanizer if index < HUMANIZERS => [sources.humanizer(index); 2],
        ModSource::Macro if index < MACROS => [snapshot.macros[index] * 0.01; 2],
        _ => [0.0; 2],
    }
}

/// Amount scaling plus curve for one source
#[inline]
fn shape(pair: [f32; 2], amount: f32, curve: f32, bidirectional: bool) -> [f32; 2] {
    let gain = amount * 0.01;
    pair.map(|x| {
        if bidirectional {
            let unit = (x * gain + 1.0) * 0.5;
            if curve != 100.0 {
                powf(unit.max(0.0), 100.0 / curve)
            } else {
                unit
            }
        } else {
            let scaled = x * gain;
            if curve != 100.0 {
                powf(scaled.abs(), 100.0 / curve).copysign(scaled)
            } else {
                scaled
            }
        }
    })
}

/// Shaped and combined stereo value of one slot, before dispatch
pub fn slot_value(
    slot: &MatrixSlot,
    snapshot: &ParamSet,
    sources: &impl ModulationSources,
) -> [f32; 2] {
    let bidirectional = slot.combine.is_bidirectional();

    let primary = source_pair(slot.source, slot.source_index, slot.envelope, snapshot, sources);
    let secondary = source_pair(slot.source2, slot.source2_index, slot.envelope, snapshot, sources);

    let a = shape(primary, slot.amount, slot.curve, bidirectional);
    // The bidirectional branch curves the secondary source with the primary
    // curve; kept as-is so existing presets keep sounding the same.
    let secondary_curve = if bidirectional { slot.curve } else { slot.curve2 };
    let b = shape(secondary, slot.amount2, secondary_curve, bidirectional);

    [
        slot.combine.combine(a[0], b[0]),
        slot.combine.combine(a[1], b[1]),
    ]
}

/// Run every enabled slot up to the matrix high-water mark.
///
/// Controls written are appended to `touched`; stereo signals routed to
/// filter inputs are summed into `filter_inputs`.
pub fn evaluate(
    snapshot: &mut ParamSet,
    sources: &impl ModulationSources,
    filter_inputs: &mut [[f32; 2]],
    touched: &mut Vec<Param>,
) {
    for i in 0..snapshot.marks().matrix {
        if !snapshot.matrix[i].enabled() {
            continue;
        }
        let slot = snapshot.matrix[i].clone();
        if slot.target == ModTarget::None {
            continue;
        }

        let value = slot_value(&slot, snapshot, sources);

        if slot.target == ModTarget::FilterInput {
            if let Some(input) = filter_inputs.get_mut(slot.target_index) {
                input[0] += value[0];
                input[1] += value[1];
            }
            continue;
        }

        let mono = (value[0] + value[1]) * 0.5;
        let Some(param) = slot.target.param(slot.target_index) else {
            continue;
        };
        let Some(range) = modulation_range(param, snapshot) else {
            continue;
        };

        let modulated = range.apply(snapshot.value(param), mono);
        snapshot.assign(param, modulated);
        touched.push(param);
    }
}

/// Put every touched control back to its live value, newest write first
pub fn restore(snapshot: &mut ParamSet, live: &ParamSet, touched: &mut Vec<Param>) {
    for &param in touched.iter().rev() {
        snapshot.assign(param, live.value(param));
    }
    touched.clear();
}

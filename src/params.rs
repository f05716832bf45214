//! Instrument Parameters and Voice Snapshots
//!
//! [`ParamSet`] holds every scalar control of the instrument: main
//! oscillators, sub-oscillators, samplers, filters, modulation matrix slots and
//! macros. The instrument owns one live copy; each voice clones it at note
//! start and lets the modulation matrix scribble over its private copy.
//!
//! Every control has a stable identity, [`Param`], which doubles as
//!
//! - a getter/setter key ([`ParamSet::get`], [`ParamSet::set`]),
//! - a human-readable name (`main0.morph`, `filter3.cutoff`, `macro1`),
//! - a slot in the flat numeric layout ([`ParamSet::to_flat`]) used to
//!   rebuild a snapshot from stored presets.

use crate::error::{check_index, SynthError};
use crate::modulation::{CombineMode, ModSource, ModTarget};
use crate::oscillator::ModifyMode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Main wavetable oscillators per instrument
pub const MAIN_OSCS: usize = 8;
/// Stored waveforms per main oscillator
pub const WAVE_SLOTS: usize = 256;
/// Samples per stored waveform
pub const TABLE_LEN: usize = 2048;
/// Sub-oscillators per instrument
pub const SUB_OSCS: usize = 64;
/// Sample players per instrument
pub const SAMPLERS: usize = 8;
/// Points in a sampler shape graph
pub const GRAPH_POINTS: usize = 128;
/// Filters per instrument
pub const FILTERS: usize = 8;
/// Modulation matrix slots
pub const MATRIX_SLOTS: usize = 64;
/// Macro knobs
pub const MACROS: usize = 8;
/// Per-voice random humanizer values
pub const HUMANIZERS: usize = 8;
/// Unison copies per main oscillator
pub const MAX_UNISON: usize = 32;
/// Highest filter slope setting; a filter runs `slope + 1` stages
pub const MAX_SLOPE: usize = 7;
/// Number of filter forms
pub const FILTER_KINDS: usize = 9;

/// Declares a per-section parameter enum with its canonical order and names.
/// The declaration order is the flat layout order; never reorder variants.
macro_rules! param_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $label:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            /// Every variant in flat layout order
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn name(self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }

            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $($label => Some($name::$variant),)+
                    _ => None,
                }
            }

            /// Position within the section
            pub fn ordinal(self) -> usize {
                self as usize
            }

            pub fn from_ordinal(ordinal: usize) -> Option<Self> {
                Self::ALL.get(ordinal).copied()
            }
        }
    };
}

param_enum! {
    /// Controls of one main oscillator
    MainParam {
        Enabled => "enabled",
        Muted => "muted",
        Morph => "morph",
        Range => "range",
        Modify => "modify",
        ModifyMode => "modify_mode",
        Detune => "detune",
        Phase => "phase",
        PhaseRand => "phase_rand",
        Volume => "volume",
        Pan => "pan",
        SampleLen => "sample_len",
        MorphMax => "morph_max",
        UnisonVoices => "unison_voices",
        UnisonDetune => "unison_detune",
        UnisonMorph => "unison_morph",
        UnisonModify => "unison_modify",
        Keytracking => "keytracking",
    }
}

param_enum! {
    /// Controls of one sub-oscillator
    SubParam {
        Enabled => "enabled",
        Muted => "muted",
        Keytracking => "keytracking",
        Noise => "noise",
        Detune => "detune",
        Phase => "phase",
        PhaseRand => "phase_rand",
        Volume => "volume",
        Pan => "pan",
        Length => "length",
        Tempo => "tempo",
    }
}

param_enum! {
    /// Controls of one sample player
    SamplerParam {
        Enabled => "enabled",
        Muted => "muted",
        Keytracking => "keytracking",
        Loop => "loop",
        Start => "start",
        End => "end",
        Detune => "detune",
        Phase => "phase",
        PhaseRand => "phase_rand",
        Volume => "volume",
        Pan => "pan",
        Graph => "graph",
    }
}

param_enum! {
    /// Controls of one filter
    FilterParam {
        Enabled => "enabled",
        Muted => "muted",
        Kind => "kind",
        Cutoff => "cutoff",
        Resonance => "resonance",
        Gain => "gain",
        Slope => "slope",
        InVolume => "in_volume",
        OutVolume => "out_volume",
        WetDry => "wet_dry",
        Balance => "balance",
        Saturation => "saturation",
        Feedback => "feedback",
        Detune => "detune",
        Keytracking => "keytracking",
    }
}

param_enum! {
    /// Controls of one modulation matrix slot
    MatrixParam {
        Enabled => "enabled",
        Source => "source",
        SourceIndex => "source_index",
        Source2 => "source2",
        Source2Index => "source2_index",
        Amount => "amount",
        Curve => "curve",
        Amount2 => "amount2",
        Curve2 => "curve2",
        Combine => "combine",
        TargetSection => "target_section",
        TargetSignal => "target_signal",
        TargetIndex => "target_index",
        Envelope => "envelope",
    }
}

/// Identity of a single scalar control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Param {
    Main(usize, MainParam),
    Sub(usize, SubParam),
    Sampler(usize, SamplerParam),
    Filter(usize, FilterParam),
    Matrix(usize, MatrixParam),
    Macro(usize),
}

const MAIN_BASE: usize = 0;
const SUB_BASE: usize = MAIN_BASE + MAIN_OSCS * MainParam::ALL.len();
const SAMPLER_BASE: usize = SUB_BASE + SUB_OSCS * SubParam::ALL.len();
const FILTER_BASE: usize = SAMPLER_BASE + SAMPLERS * SamplerParam::ALL.len();
const MATRIX_BASE: usize = FILTER_BASE + FILTERS * FilterParam::ALL.len();
const MACRO_BASE: usize = MATRIX_BASE + MATRIX_SLOTS * MatrixParam::ALL.len();

/// Number of values in the flat parameter layout
pub const FLAT_LEN: usize = MACRO_BASE + MACROS;

impl Param {
    /// Position in the flat layout
    pub fn flat_index(self) -> usize {
        match self {
            Param::Main(i, p) => MAIN_BASE + i * MainParam::ALL.len() + p.ordinal(),
            Param::Sub(i, p) => SUB_BASE + i * SubParam::ALL.len() + p.ordinal(),
            Param::Sampler(i, p) => SAMPLER_BASE + i * SamplerParam::ALL.len() + p.ordinal(),
            Param::Filter(i, p) => FILTER_BASE + i * FilterParam::ALL.len() + p.ordinal(),
            Param::Matrix(i, p) => MATRIX_BASE + i * MatrixParam::ALL.len() + p.ordinal(),
            Param::Macro(i) => MACRO_BASE + i,
        }
    }

    /// Inverse of [`Param::flat_index`]
    pub fn from_flat_index(index: usize) -> Result<Param, SynthError> {
        fn split(offset: usize, width: usize) -> (usize, usize) {
            (offset / width, offset % width)
        }

        let param = if index < SUB_BASE {
            let (i, p) = split(index - MAIN_BASE, MainParam::ALL.len());
            MainParam::from_ordinal(p).map(|p| Param::Main(i, p))
        } else if index < SAMPLER_BASE {
            let (i, p) = split(index - SUB_BASE, SubParam::ALL.len());
            SubParam::from_ordinal(p).map(|p| Param::Sub(i, p))
        } else if index < FILTER_BASE {
            let (i, p) = split(index - SAMPLER_BASE, SamplerParam::ALL.len());
            SamplerParam::from_ordinal(p).map(|p| Param::Sampler(i, p))
        } else if index < MATRIX_BASE {
            let (i, p) = split(index - FILTER_BASE, FilterParam::ALL.len());
            FilterParam::from_ordinal(p).map(|p| Param::Filter(i, p))
        } else if index < MACRO_BASE {
            let (i, p) = split(index - MATRIX_BASE, MatrixParam::ALL.len());
            MatrixParam::from_ordinal(p).map(|p| Param::Matrix(i, p))
        } else if index < FLAT_LEN {
            Some(Param::Macro(index - MACRO_BASE))
        } else {
            None
        };

        param.ok_or(SynthError::FlatIndexOutOfRange(index))
    }

    /// Every control in flat layout order
    pub fn all() -> impl Iterator<Item = Param> {
        (0..FLAT_LEN).filter_map(|i| Param::from_flat_index(i).ok())
    }

    /// Fail if the bank index is past the end of its section
    pub fn validate(self) -> Result<Param, SynthError> {
        match self {
            Param::Main(i, _) => check_index("main", i, MAIN_OSCS),
            Param::Sub(i, _) => check_index("sub", i, SUB_OSCS),
            Param::Sampler(i, _) => check_index("sampler", i, SAMPLERS),
            Param::Filter(i, _) => check_index("filter", i, FILTERS),
            Param::Matrix(i, _) => check_index("matrix", i, MATRIX_SLOTS),
            Param::Macro(i) => check_index("macro", i, MACROS),
        }?;
        Ok(self)
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Param::Main(i, p) => write!(f, "main{}.{}", i, p.name()),
            Param::Sub(i, p) => write!(f, "sub{}.{}", i, p.name()),
            Param::Sampler(i, p) => write!(f, "sampler{}.{}", i, p.name()),
            Param::Filter(i, p) => write!(f, "filter{}.{}", i, p.name()),
            Param::Matrix(i, p) => write!(f, "matrix{}.{}", i, p.name()),
            Param::Macro(i) => write!(f, "macro{}", i),
        }
    }
}

impl FromStr for Param {
    type Err = SynthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || SynthError::UnknownParam(s.to_string());

        let (head, signal) = match s.split_once('.') {
            Some((head, signal)) => (head, Some(signal)),
            None => (s, None),
        };
        let digits = head.find(|c: char| c.is_ascii_digit()).ok_or_else(unknown)?;
        let (section, index) = head.split_at(digits);
        let index: usize = index.parse().map_err(|_| unknown())?;

        let param = match (section, signal) {
            ("main", Some(sig)) => Param::Main(index, MainParam::from_name(sig).ok_or_else(unknown)?),
            ("sub", Some(sig)) => Param::Sub(index, SubParam::from_name(sig).ok_or_else(unknown)?),
            ("sampler", Some(sig)) => {
                Param::Sampler(index, SamplerParam::from_name(sig).ok_or_else(unknown)?)
            }
            ("filter", Some(sig)) => {
                Param::Filter(index, FilterParam::from_name(sig).ok_or_else(unknown)?)
            }
            ("matrix", Some(sig)) => {
                Param::Matrix(index, MatrixParam::from_name(sig).ok_or_else(unknown)?)
            }
            ("macro", None) => Param::Macro(index),
            _ => return Err(unknown()),
        };
        param.validate()
    }
}

/// One main wavetable oscillator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MainOscParams {
    pub(crate) enabled: bool,
    pub muted: bool,
    /// Waveform slot position, fractional values blend neighbours
    pub morph: f32,
    /// Width of the morph cross-fade window, at least 1
    pub range: f32,
    pub modify: f32,
    pub modify_mode: ModifyMode,
    /// Cents
    pub detune: f32,
    /// Percent of a cycle
    pub phase: f32,
    /// Percent of a cycle randomized at note start
    pub phase_rand: f32,
    pub volume: f32,
    /// -100 (left) .. 100 (right)
    pub pan: f32,
    /// Samples of each waveform actually played
    pub sample_len: f32,
    /// Upper bound for morph and unison morph
    pub morph_max: f32,
    pub unison_voices: f32,
    /// Cents of random spread per unison voice
    pub unison_detune: f32,
    pub unison_morph: f32,
    pub unison_modify: f32,
    pub keytracking: bool,
}

impl Default for MainOscParams {
    fn default() -> Self {
        Self {
            enabled: false,
            muted: false,
            morph: 0.0,
            range: 1.0,
            modify: 0.0,
            modify_mode: ModifyMode::None,
            detune: 0.0,
            phase: 0.0,
            phase_rand: 0.0,
            volume: 100.0,
            pan: 0.0,
            sample_len: TABLE_LEN as f32,
            morph_max: (WAVE_SLOTS - 1) as f32,
            unison_voices: 1.0,
            unison_detune: 0.0,
            unison_morph: 0.0,
            unison_modify: 0.0,
            keytracking: true,
        }
    }
}

impl MainOscParams {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Unison voice count as used by the oscillator bank
    pub fn voice_count(&self) -> usize {
        (self.unison_voices.round() as usize).clamp(1, MAX_UNISON)
    }

    /// Played waveform length in samples
    pub fn table_len(&self) -> usize {
        (self.sample_len as usize).clamp(1, TABLE_LEN)
    }
}

/// One sub-oscillator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubOscParams {
    pub(crate) enabled: bool,
    pub muted: bool,
    pub keytracking: bool,
    pub noise: bool,
    pub detune: f32,
    pub phase: f32,
    pub phase_rand: f32,
    pub volume: f32,
    pub pan: f32,
    /// Samples of the waveform played, 1..=2048
    pub length: f32,
    /// Tempo sync in BPM, 0 disables
    pub tempo: f32,
}

impl Default for SubOscParams {
    fn default() -> Self {
        Self {
            enabled: false,
            muted: false,
            keytracking: true,
            noise: false,
            detune: 0.0,
            phase: 0.0,
            phase_rand: 0.0,
            volume: 100.0,
            pan: 0.0,
            length: TABLE_LEN as f32,
            tempo: 0.0,
        }
    }
}

impl SubOscParams {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn table_len(&self) -> usize {
        (self.length as usize).clamp(1, TABLE_LEN)
    }
}

/// One sample player
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplerParams {
    pub(crate) enabled: bool,
    pub muted: bool,
    pub keytracking: bool,
    pub looped: bool,
    /// Fraction of the buffer where playback starts
    pub start: f32,
    /// Fraction of the buffer where playback ends
    pub end: f32,
    pub detune: f32,
    pub phase: f32,
    pub phase_rand: f32,
    pub volume: f32,
    pub pan: f32,
    /// Read position goes through the shape graph
    pub graph: bool,
}

impl Default for SamplerParams {
    fn default() -> Self {
        Self {
            enabled: false,
            muted: false,
            keytracking: true,
            looped: false,
            start: 0.0,
            end: 1.0,
            detune: 0.0,
            phase: 0.0,
            phase_rand: 0.0,
            volume: 100.0,
            pan: 0.0,
            graph: false,
        }
    }
}

impl SamplerParams {
    pub fn enabled(&self) -> bool {
        self.enabled
    }
}

/// One filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterParams {
    pub(crate) enabled: bool,
    pub muted: bool,
    /// Filter form index, see [`crate::filter::FilterKind`]
    pub kind: f32,
    /// Hz
    pub cutoff: f32,
    /// Q
    pub resonance: f32,
    /// dB, shelf and peak forms only
    pub gain: f32,
    /// Extra cascade stages
    pub slope: f32,
    pub in_volume: f32,
    pub out_volume: f32,
    /// Percent wet
    pub wet_dry: f32,
    pub balance: f32,
    pub saturation: f32,
    /// Percent of the delayed output fed back into the input
    pub feedback: f32,
    /// Cents, shifts the feedback delay pitch
    pub detune: f32,
    pub keytracking: bool,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            enabled: false,
            muted: false,
            kind: 0.0,
            cutoff: 2000.0,
            resonance: 0.707,
            gain: 0.0,
            slope: 0.0,
            in_volume: 100.0,
            out_volume: 100.0,
            wet_dry: 100.0,
            balance: 0.0,
            saturation: 0.0,
            feedback: 0.0,
            detune: 0.0,
            keytracking: true,
        }
    }
}

impl FilterParams {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Cascade stage count, 1..=MAX_SLOPE + 1
    pub fn stages(&self) -> usize {
        (self.slope.max(0.0).floor() as usize).min(MAX_SLOPE) + 1
    }
}

/// One modulation matrix routing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixSlot {
    pub(crate) enabled: bool,
    pub source: ModSource,
    pub source_index: usize,
    pub source2: ModSource,
    pub source2_index: usize,
    /// Percent applied to the primary source
    pub amount: f32,
    pub curve: f32,
    /// Percent applied to the secondary source
    pub amount2: f32,
    pub curve2: f32,
    pub combine: CombineMode,
    pub target: ModTarget,
    pub target_index: usize,
    /// Hold oscillator-like sources after their first cycle
    pub envelope: bool,
}

impl Default for MatrixSlot {
    fn default() -> Self {
        Self {
            enabled: false,
            source: ModSource::None,
            source_index: 0,
            source2: ModSource::None,
            source2_index: 0,
            amount: 100.0,
            curve: 100.0,
            amount2: 100.0,
            curve2: 100.0,
            combine: CombineMode::AddBidirectional,
            target: ModTarget::None,
            target_index: 0,
            envelope: false,
        }
    }
}

impl MatrixSlot {
    pub fn enabled(&self) -> bool {
        self.enabled
    }
}

/// Iteration bounds: one past the highest enabled index of each section
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnabledMarks {
    pub main: usize,
    pub sub: usize,
    pub sampler: usize,
    pub filter: usize,
    pub matrix: usize,
}

fn mark<T>(items: &[T], enabled: impl Fn(&T) -> bool) -> usize {
    items.iter().rposition(enabled).map_or(0, |i| i + 1)
}

/// Every scalar control of the instrument
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSet {
    pub main: Vec<MainOscParams>,
    pub sub: Vec<SubOscParams>,
    pub sampler: Vec<SamplerParams>,
    pub filter: Vec<FilterParams>,
    pub matrix: Vec<MatrixSlot>,
    pub macros: Vec<f32>,
    marks: EnabledMarks,
}

impl Default for ParamSet {
    fn default() -> Self {
        Self::new()
    }
}

fn as_bool(value: f32) -> bool {
    value >= 0.5
}

fn from_bool(value: bool) -> f32 {
    if value {
        1.0
    } else {
        0.0
    }
}

fn as_ordinal(value: f32) -> usize {
    if value.is_finite() && value > 0.0 {
        value.round() as usize
    } else {
        0
    }
}

impl ParamSet {
    /// Factory state: only main oscillator 0 enabled
    pub fn new() -> Self {
        let mut set = Self {
            main: vec![MainOscParams::default(); MAIN_OSCS],
            sub: vec![SubOscParams::default(); SUB_OSCS],
            sampler: vec![SamplerParams::default(); SAMPLERS],
            filter: vec![FilterParams::default(); FILTERS],
            matrix: vec![MatrixSlot::default(); MATRIX_SLOTS],
            macros: vec![0.0; MACROS],
            marks: EnabledMarks::default(),
        };
        set.main[0].enabled = true;
        set.refresh_marks();
        set
    }

    /// Everything disabled
    pub fn silent() -> Self {
        let mut set = Self::new();
        set.main[0].enabled = false;
        set.refresh_marks();
        set
    }

    pub fn marks(&self) -> EnabledMarks {
        self.marks
    }

    /// Recompute every iteration bound from the enabled flags
    pub fn refresh_marks(&mut self) {
        self.marks = EnabledMarks {
            main: mark(&self.main, |p| p.enabled),
            sub: mark(&self.sub, |p| p.enabled),
            sampler: mark(&self.sampler, |p| p.enabled),
            filter: mark(&self.filter, |p| p.enabled),
            matrix: mark(&self.matrix, |p| p.enabled),
        };
    }

    /// Current value of a control as a plain number.
    /// Flags read as 0/1, enumerations as their ordinal.
    pub fn get(&self, param: Param) -> Result<f32, SynthError> {
        let param = param.validate()?;
        Ok(self.value(param))
    }

    /// Unchecked read for controls whose index is already known to be valid
    pub(crate) fn value(&self, param: Param) -> f32 {
        match param {
            Param::Main(i, p) => {
                let o = &self.main[i];
                match p {
                    MainParam::Enabled => from_bool(o.enabled),
                    MainParam::Muted => from_bool(o.muted),
                    MainParam::Morph => o.morph,
                    MainParam::Range => o.range,
                    MainParam::Modify => o.modify,
                    MainParam::ModifyMode => o.modify_mode.ordinal() as f32,
                    MainParam::Detune => o.detune,
                    MainParam::Phase => o.phase,
                    MainParam::PhaseRand => o.phase_rand,
                    MainParam::Volume => o.volume,
                    MainParam::Pan => o.pan,
                    MainParam::SampleLen => o.sample_len,
                    MainParam::MorphMax => o.morph_max,
                    MainParam::UnisonVoices => o.unison_voices,
                    MainParam::UnisonDetune => o.unison_detune,
                    MainParam::UnisonMorph => o.unison_morph,
                    MainParam::UnisonModify => o.unison_modify,
                    MainParam::Keytracking => from_bool(o.keytracking),
                }
            }
            Param::Sub(i, p) => {
                let o = &self.sub[i];
                match p {
                    SubParam::Enabled => from_bool(o.enabled),
                    SubParam::Muted => from_bool(o.muted),
                    SubParam::Keytracking => from_bool(o.keytracking),
                    SubParam::Noise => from_bool(o.noise),
                    SubParam::Detune => o.detune,
                    SubParam::Phase => o.phase,
                    SubParam::PhaseRand => o.phase_rand,
                    SubParam::Volume => o.volume,
                    SubParam::Pan => o.pan,
                    SubParam::Length => o.length,
                    SubParam::Tempo => o.tempo,
                }
            }
            Param::Sampler(i, p) => {
                let s = &self.sampler[i];
                match p {
                    SamplerParam::Enabled => from_bool(s.enabled),
                    SamplerParam::Muted => from_bool(s.muted),
                    SamplerParam::Keytracking => from_bool(s.keytracking),
                    SamplerParam::Loop => from_bool(s.looped),
                    SamplerParam::Start => s.start,
                    SamplerParam::End => s.end,
                    SamplerParam::Detune => s.detune,
                    SamplerParam::Phase => s.phase,
                    SamplerParam::PhaseRand => s.phase_rand,
                    SamplerParam::Volume => s.volume,
                    SamplerParam::Pan => s.pan,
                    SamplerParam::Graph => from_bool(s.graph),
                }
            }
            Param::Filter(i, p) => {
                let f = &self.filter[i];
                match p {
                    FilterParam::Enabled => from_bool(f.enabled),
                    FilterParam::Muted => from_bool(f.muted),
                    FilterParam::Kind => f.kind,
                    FilterParam::Cutoff => f.cutoff,
                    FilterParam::Resonance => f.resonance,
                    FilterParam::Gain => f.gain,
                    FilterParam::Slope => f.slope,
                    FilterParam::InVolume => f.in_volume,
                    FilterParam::OutVolume => f.out_volume,
                    FilterParam::WetDry => f.wet_dry,
                    FilterParam::Balance => f.balance,
                    FilterParam::Saturation => f.saturation,
                    FilterParam::Feedback => f.feedback,
                    FilterParam::Detune => f.detune,
                    FilterParam::Keytracking => from_bool(f.keytracking),
                }
            }
            Param::Matrix(i, p) => {
                let m = &self.matrix[i];
                match p {
                    MatrixParam::Enabled => from_bool(m.enabled),
                    MatrixParam::Source => m.source.ordinal() as f32,
                    MatrixParam::SourceIndex => m.source_index as f32,
                    MatrixParam::Source2 => m.source2.ordinal() as f32,
                    MatrixParam::Source2Index => m.source2_index as f32,
                    MatrixParam::Amount => m.amount,
                    MatrixParam::Curve => m.curve,
                    MatrixParam::Amount2 => m.amount2,
                    MatrixParam::Curve2 => m.curve2,
                    MatrixParam::Combine => m.combine.ordinal() as f32,
                    MatrixParam::TargetSection => m.target.section_code() as f32,
                    MatrixParam::TargetSignal => m.target.signal_code() as f32,
                    MatrixParam::TargetIndex => m.target_index as f32,
                    MatrixParam::Envelope => from_bool(m.envelope),
                }
            }
            Param::Macro(i) => self.macros[i],
        }
    }

    /// Host-side write: validates the value, corrects and warns about values
    /// outside the control's domain, then stores it.
    pub fn set(&mut self, param: Param, value: f32) -> Result<(), SynthError> {
        let param = param.validate()?;
        let value = sanitize(param, value);
        self.assign(param, value);
        Ok(())
    }

    /// Raw write used by modulation and restore. No validation beyond the
    /// representation conversion; enabled flags still refresh the marks.
    pub(crate) fn assign(&mut self, param: Param, value: f32) {
        match param {
            Param::Main(i, p) => {
                let o = &mut self.main[i];
                match p {
                    MainParam::Enabled => {
                        o.enabled = as_bool(value);
                        self.marks.main = mark(&self.main, |p| p.enabled);
                    }
                    MainParam::Muted => o.muted = as_bool(value),
                    MainParam::Morph => o.morph = value,
                    MainParam::Range => o.range = value,
                    MainParam::Modify => o.modify = value,
                    MainParam::ModifyMode => o.modify_mode = ModifyMode::from_ordinal(as_ordinal(value)),
                    MainParam::Detune => o.detune = value,
                    MainParam::Phase => o.phase = value,
                    MainParam::PhaseRand => o.phase_rand = value,
                    MainParam::Volume => o.volume = value,
                    MainParam::Pan => o.pan = value,
                    MainParam::SampleLen => o.sample_len = value,
                    MainParam::MorphMax => o.morph_max = value,
                    MainParam::UnisonVoices => o.unison_voices = value,
                    MainParam::UnisonDetune => o.unison_detune = value,
                    MainParam::UnisonMorph => o.unison_morph = value,
                    MainParam::UnisonModify => o.unison_modify = value,
                    MainParam::Keytracking => o.keytracking = as_bool(value),
                }
            }
            Param::Sub(i, p) => {
                let o = &mut self.sub[i];
                match p {
                    SubParam::Enabled => {
                        o.enabled = as_bool(value);
                        self.marks.sub = mark(&self.sub, |p| p.enabled);
                    }
                    SubParam::Muted => o.muted = as_bool(value),
                    SubParam::Keytracking => o.keytracking = as_bool(value),
                    SubParam::Noise => o.noise = as_bool(value),
                    SubParam::Detune => o.detune = value,
                    SubParam::Phase => o.phase = value,
                    SubParam::PhaseRand => o.phase_rand = value,
                    SubParam::Volume => o.volume = value,
                    SubParam::Pan => o.pan = value,
                    SubParam::Length => o.length = value,
                    SubParam::Tempo => o.tempo = value,
                }
            }
            Param::Sampler(i, p) => {
                let s = &mut self.sampler[i];
                match p {
                    SamplerParam::Enabled => {
                        s.enabled = as_bool(value);
                        self.marks.sampler = mark(&self.sampler, |p| p.enabled);
                    }
                    SamplerParam::Muted => s.muted = as_bool(value),
                    SamplerParam::Keytracking => s.keytracking = as_bool(value),
                    SamplerParam::Loop => s.looped = as_bool(value),
                    SamplerParam::Start => s.start = value,
                    SamplerParam::End => s.end = value,
                    SamplerParam::Detune => s.detune = value,
                    SamplerParam::Phase => s.phase = value,
                    SamplerParam::PhaseRand => s.phase_rand = value,
                    SamplerParam::Volume => s.volume = value,
                    SamplerParam::Pan => s.pan = value,
                    SamplerParam::Graph => s.graph = as_bool(value),
                }
            }
            Param::Filter(i, p) => {
                let f = &mut self.filter[i];
                match p {
                    FilterParam::Enabled => {
                        f.enabled = as_bool(value);
                        self.marks.filter = mark(&self.filter, |p| p.enabled);
                    }
                    FilterParam::Muted => f.muted = as_bool(value),
                    FilterParam::Kind => f.kind = value,
                    FilterParam::Cutoff => f.cutoff = value,
                    FilterParam::Resonance => f.resonance = value,
                    FilterParam::Gain => f.gain = value,
                    FilterParam::Slope => f.slope = value,
                    FilterParam::InVolume => f.in_volume = value,
                    FilterParam::OutVolume => f.out_volume = value,
                    FilterParam::WetDry => f.wet_dry = value,
                    FilterParam::Balance => f.balance = value,
                    FilterParam::Saturation => f.saturation = value,
                    FilterParam::Feedback => f.feedback = value,
                    FilterParam::Detune => f.detune = value,
                    FilterParam::Keytracking => f.keytracking = as_bool(value),
                }
            }
            Param::Matrix(i, p) => {
                let m = &mut self.matrix[i];
                match p {
                    MatrixParam::Enabled => {
                        m.enabled = as_bool(value);
                        self.marks.matrix = mark(&self.matrix, |p| p.enabled);
                    }
                    MatrixParam::Source => m.source = ModSource::from_ordinal(as_ordinal(value)),
                    MatrixParam::SourceIndex => m.source_index = as_ordinal(value),
                    MatrixParam::Source2 => m.source2 = ModSource::from_ordinal(as_ordinal(value)),
                    MatrixParam::Source2Index => m.source2_index = as_ordinal(value),
                    MatrixParam::Amount => m.amount = value,
                    MatrixParam::Curve => m.curve = value,
                    MatrixParam::Amount2 => m.amount2 = value,
                    MatrixParam::Curve2 => m.curve2 = value,
                    MatrixParam::Combine => m.combine = CombineMode::from_ordinal(as_ordinal(value)),
                    MatrixParam::TargetSection => {
                        m.target = ModTarget::from_codes(as_ordinal(value), m.target.signal_code())
                    }
                    MatrixParam::TargetSignal => {
                        m.target = ModTarget::from_codes(m.target.section_code(), as_ordinal(value))
                    }
                    MatrixParam::TargetIndex => m.target_index = as_ordinal(value),
                    MatrixParam::Envelope => m.envelope = as_bool(value),
                }
            }
            Param::Macro(i) => self.macros[i] = value,
        }
    }

    /// Enable or disable a whole bank entry, keeping the marks current
    pub fn set_enabled(&mut self, param: Param, enabled: bool) -> Result<(), SynthError> {
        let target = match param {
            Param::Main(i, _) => Param::Main(i, MainParam::Enabled),
            Param::Sub(i, _) => Param::Sub(i, SubParam::Enabled),
            Param::Sampler(i, _) => Param::Sampler(i, SamplerParam::Enabled),
            Param::Filter(i, _) => Param::Filter(i, FilterParam::Enabled),
            Param::Matrix(i, _) => Param::Matrix(i, MatrixParam::Enabled),
            Param::Macro(_) => return Ok(()),
        };
        self.set(target, from_bool(enabled))
    }

    /// Install a complete routing into a matrix slot
    pub fn set_matrix_slot(&mut self, index: usize, slot: MatrixSlot) -> Result<(), SynthError> {
        check_index("matrix", index, MATRIX_SLOTS)?;
        let mut slot = slot;
        slot.curve = sanitize(Param::Matrix(index, MatrixParam::Curve), slot.curve);
        slot.curve2 = sanitize(Param::Matrix(index, MatrixParam::Curve2), slot.curve2);
        self.matrix[index] = slot;
        self.marks.matrix = mark(&self.matrix, |p| p.enabled);
        Ok(())
    }

    /// Flatten into the canonical numeric layout
    pub fn to_flat(&self) -> Vec<f32> {
        Param::all().map(|p| self.value(p)).collect()
    }

    /// Rebuild from the canonical numeric layout. Short input leaves the
    /// remaining controls at their factory values, long input is truncated;
    /// both are reported as warnings.
    pub fn from_flat(values: &[f32]) -> Self {
        if values.len() != FLAT_LEN {
            log::warn!(
                "flat parameter data holds {} values, expected {}; {}",
                values.len(),
                FLAT_LEN,
                if values.len() < FLAT_LEN {
                    "missing controls keep factory values"
                } else {
                    "extra values ignored"
                }
            );
        }

        let mut set = Self::new();
        for (param, &value) in Param::all().zip(values) {
            let value = sanitize(param, value);
            set.assign(param, value);
        }
        set.refresh_marks();
        set
    }
}

/// Fold a host-supplied value into the control's valid domain
fn sanitize(param: Param, value: f32) -> f32 {
    let value = if value.is_finite() {
        value
    } else {
        log::warn!("{} received non-finite value {}, using 0", param, value);
        0.0
    };

    let corrected = match param {
        Param::Main(_, MainParam::SampleLen) if value < 1.0 => {
            log::warn!(
                "{} of {} is below 1 sample, using the table length {}",
                param,
                value,
                TABLE_LEN
            );
            return TABLE_LEN as f32;
        }
        Param::Main(_, MainParam::SampleLen) | Param::Sub(_, SubParam::Length) => {
            value.clamp(1.0, TABLE_LEN as f32)
        }
        Param::Main(_, MainParam::Range) => value.clamp(1.0, WAVE_SLOTS as f32),
        Param::Main(_, MainParam::Morph | MainParam::MorphMax | MainParam::UnisonMorph) => {
            value.clamp(0.0, (WAVE_SLOTS - 1) as f32)
        }
        Param::Main(_, MainParam::Modify | MainParam::UnisonModify) => {
            value.clamp(0.0, TABLE_LEN as f32)
        }
        Param::Main(_, MainParam::UnisonVoices) => value.clamp(1.0, MAX_UNISON as f32),
        Param::Main(_, MainParam::Pan)
        | Param::Sub(_, SubParam::Pan)
        | Param::Sampler(_, SamplerParam::Pan)
        | Param::Filter(_, FilterParam::Balance)
        | Param::Matrix(_, MatrixParam::Amount | MatrixParam::Amount2) => {
            value.clamp(-100.0, 100.0)
        }
        Param::Sampler(_, SamplerParam::Start | SamplerParam::End) => value.clamp(0.0, 1.0),
        Param::Filter(_, FilterParam::Resonance) => value.max(0.0001),
        Param::Filter(_, FilterParam::Cutoff) => value.clamp(20.0, 21999.0),
        Param::Filter(_, FilterParam::Kind) => value.clamp(0.0, (FILTER_KINDS - 1) as f32),
        Param::Filter(_, FilterParam::Slope) => value.clamp(0.0, MAX_SLOPE as f32),
        Param::Filter(_, FilterParam::WetDry | FilterParam::Saturation) => value.clamp(0.0, 100.0),
        Param::Filter(_, FilterParam::Feedback) => value.clamp(-100.0, 100.0),
        Param::Matrix(_, MatrixParam::Curve | MatrixParam::Curve2) => value.clamp(1.0, 1000.0),
        Param::Sub(_, SubParam::Tempo) => value.max(0.0),
        _ => value,
    };

    if corrected != value {
        log::warn!("{} value {} clamped to {}", param, value, corrected);
    }
    corrected
}

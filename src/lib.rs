//! # Microwave: Per-Voice Wavetable Synthesis
//!
//! `microwave` renders the notes of a wavetable instrument. Each voice mixes
//! morphing main oscillators, sub-oscillators and samplers, runs them
//! through a bank of filters and lets a modulation matrix rewrite any of
//! their controls frame by frame.
//!
//! ## Architecture
//!
//! - **Parameters** - [`params::ParamSet`] holds every control of the
//!   instrument; each voice works on its own copy
//! - **Waveforms** - [`waves::WaveformStore`] holds wavetables, sample buffers
//!   and sampler shape graphs, read-only while rendering
//! - **Voice** - [`voice::Voice`] owns per-note DSP state and renders stereo
//!   frames
//! - **Instrument** - [`instrument::Instrument`] shares parameters and
//!   waveforms with a pool of voices
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use microwave::prelude::*;
//!
//! let mut synth = Instrument::new(EngineConfig::new(48000.0).with_oversample(2));
//!
//! // One cycle of a saw in slot 0 of main oscillator 0
//! let saw: Vec<f32> = (0..TABLE_LEN)
//!     .map(|i| 2.0 * i as f32 / TABLE_LEN as f32 - 1.0)
//!     .collect();
//! synth.waves_mut().set_main_waveform(0, 0, &saw).unwrap();
//! synth.set_param_by_name("main0.unison_voices", 4.0).unwrap();
//!
//! let key = synth.note_on(NoteInfo::from_midi(57, 100)).unwrap();
//! let mut block = [[0.0f32; 2]; 256];
//! synth.render(&mut block);
//! synth.note_off(key);
//! ```

pub mod config;
pub mod error;
pub mod filter;
pub mod instrument;
pub mod modulation;
pub mod oscillator;
pub mod params;
pub mod rng;
pub mod sampler;
pub mod sub_osc;
pub mod voice;
pub mod waves;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{EngineConfig, MAX_OVERSAMPLE};
    pub use crate::error::SynthError;

    // Controls
    pub use crate::params::{
        FilterParam, FilterParams, MainOscParams, MainParam, MatrixParam, MatrixSlot, Param,
        ParamSet, SamplerParam, SamplerParams, SubOscParams, SubParam, FILTERS, MACROS, MAIN_OSCS,
        MATRIX_SLOTS, SAMPLERS, SUB_OSCS, TABLE_LEN, WAVE_SLOTS,
    };
    pub use crate::modulation::{CombineMode, ModSource, ModTarget};
    pub use crate::oscillator::ModifyMode;
    pub use crate::filter::FilterKind;

    // Data
    pub use crate::waves::{SampleBuffer, WaveformStore};

    // Rendering
    pub use crate::instrument::{Instrument, VoiceKey};
    pub use crate::rng::Rng;
    pub use crate::voice::{NoteInfo, Voice};
}

pub use prelude::*;

//! Voice Performance Benchmarks
//!
//! Render cost of single voices and of the full instrument at loads a preset
//! actually reaches: stacked unison, filter chains with a busy modulation
//! matrix, and oversampling.
//!
//! ```text
//! time_budget = buffer_size / sample_rate
//! ```
//!
//! At 48 kHz a 256 frame block leaves 5.33 ms for every sounding voice.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use microwave::prelude::*;
use std::f32::consts::TAU;

const BUFFER_SIZE: usize = 256;
const UNISON_COUNTS: [f32; 4] = [1.0, 4.0, 8.0, 32.0];
const OVERSAMPLE_FACTORS: [u32; 4] = [1, 2, 4, 8];
const VOICE_COUNTS: [usize; 4] = [1, 4, 8, 16];

// ============================================================================
// Helper Functions
// ============================================================================

fn load_tables(synth: &Instrument) {
    let mut waves = synth.waves_mut();
    for osc in 0..MAIN_OSCS {
        for slot in 0..4 {
            let table: Vec<f32> = (0..TABLE_LEN)
                .map(|i| {
                    let x = TAU * i as f32 / TABLE_LEN as f32;
                    (x.sin() + (x * (slot + 2) as f32).sin() / (slot + 2) as f32) * 0.5
                })
                .collect();
            waves.set_main_waveform(osc, slot, &table).unwrap();
        }
    }
    let sine: Vec<f32> = (0..TABLE_LEN)
        .map(|i| (TAU * i as f32 / TABLE_LEN as f32).sin())
        .collect();
    waves.set_sub_waveform(0, &sine).unwrap();
}

/// Main oscillators morphing across four slots with the given unison
fn unison_params(voices: f32) -> ParamSet {
    let mut params = ParamSet::new();
    for osc in 0..2 {
        params.set(Param::Main(osc, MainParam::Enabled), 1.0).unwrap();
        params.set(Param::Main(osc, MainParam::Morph), 1.5).unwrap();
        params.set(Param::Main(osc, MainParam::Range), 2.0).unwrap();
        params.set(Param::Main(osc, MainParam::UnisonVoices), voices).unwrap();
        params.set(Param::Main(osc, MainParam::UnisonDetune), 25.0).unwrap();
    }
    params
}

/// Two oscillators into a two-stage filter, swept by an LFO sub-oscillator
fn filtered_params() -> ParamSet {
    let mut params = unison_params(4.0);
    for osc in 0..2 {
        params.set(Param::Main(osc, MainParam::Muted), 1.0).unwrap();
    }
    params.set(Param::Sub(0, SubParam::Enabled), 1.0).unwrap();
    params.set(Param::Sub(0, SubParam::Muted), 1.0).unwrap();
    params.set(Param::Sub(0, SubParam::Keytracking), 0.0).unwrap();
    params.set(Param::Sub(0, SubParam::Detune), -7200.0).unwrap();
    params.set(Param::Filter(0, FilterParam::Enabled), 1.0).unwrap();
    params.set(Param::Filter(0, FilterParam::Slope), 1.0).unwrap();
    params.set(Param::Filter(0, FilterParam::Feedback), 20.0).unwrap();

    let routes = [
        (ModSource::MainOsc, 0, ModTarget::FilterInput),
        (ModSource::MainOsc, 1, ModTarget::FilterInput),
        (ModSource::SubOsc, 0, ModTarget::Filter(FilterParam::Cutoff)),
        (ModSource::Velocity, 0, ModTarget::Main(MainParam::Morph)),
    ];
    for (slot, (source, source_index, target)) in routes.into_iter().enumerate() {
        let mut routing = MatrixSlot::default();
        routing.source = source;
        routing.source_index = source_index;
        routing.target = target;
        routing.combine = CombineMode::AddUnidirectional;
        params.set_matrix_slot(slot, routing).unwrap();
        params
            .set(Param::Matrix(slot, MatrixParam::Enabled), 1.0)
            .unwrap();
    }
    params
}

fn instrument(config: EngineConfig, params: ParamSet) -> Instrument {
    let synth = Instrument::with_params(config.with_seed(1), params);
    load_tables(&synth);
    synth
}

// ============================================================================
// Single Voice Benchmarks
// ============================================================================

fn bench_unison(c: &mut Criterion) {
    let mut group = c.benchmark_group("voice/unison");
    group.throughput(Throughput::Elements(BUFFER_SIZE as u64));

    for voices in UNISON_COUNTS {
        group.bench_with_input(
            BenchmarkId::new("render", voices as u32),
            &voices,
            |b, &voices| {
                let mut synth = instrument(EngineConfig::new(48000.0), unison_params(voices));
                synth.note_on(NoteInfo::new(220.0));
                let mut block = [[0.0f32; 2]; BUFFER_SIZE];
                b.iter(|| {
                    synth.render(&mut block);
                    black_box(&block);
                });
            },
        );
    }

    group.finish();
}

fn bench_filtered(c: &mut Criterion) {
    let mut group = c.benchmark_group("voice/filtered");
    group.throughput(Throughput::Elements(BUFFER_SIZE as u64));

    group.bench_function("matrix_and_filter", |b| {
        let mut synth = instrument(EngineConfig::new(48000.0), filtered_params());
        synth.note_on(NoteInfo::new(110.0).with_velocity(0.8));
        let mut block = [[0.0f32; 2]; BUFFER_SIZE];
        b.iter(|| {
            synth.render(&mut block);
            black_box(&block);
        });
    });

    group.finish();
}

fn bench_oversampling(c: &mut Criterion) {
    let mut group = c.benchmark_group("voice/oversampling");
    group.throughput(Throughput::Elements(BUFFER_SIZE as u64));

    for factor in OVERSAMPLE_FACTORS {
        group.bench_with_input(BenchmarkId::new("render", factor), &factor, |b, &factor| {
            let config = EngineConfig::new(48000.0).with_oversample(factor);
            let mut synth = instrument(config, filtered_params());
            synth.note_on(NoteInfo::new(220.0));
            let mut block = [[0.0f32; 2]; BUFFER_SIZE];
            b.iter(|| {
                synth.render(&mut block);
                black_box(&block);
            });
        });
    }

    group.finish();
}

// ============================================================================
// Polyphony Benchmarks
// ============================================================================

fn bench_polyphony(c: &mut Criterion) {
    let mut group = c.benchmark_group("instrument/polyphony");

    for voices in VOICE_COUNTS {
        group.throughput(Throughput::Elements((BUFFER_SIZE * voices) as u64));
        group.bench_with_input(BenchmarkId::new("render", voices), &voices, |b, &voices| {
            let mut synth = instrument(EngineConfig::new(48000.0), unison_params(4.0));
            for n in 0..voices {
                synth.note_on(NoteInfo::from_midi(48 + n as u8, 100));
            }
            let mut block = [[0.0f32; 2]; BUFFER_SIZE];
            b.iter(|| {
                synth.render(&mut block);
                black_box(&block);
            });
        });
    }

    group.finish();
}

fn bench_note_churn(c: &mut Criterion) {
    let config = EngineConfig::new(48000.0).with_max_voices(8);
    let mut synth = instrument(config, unison_params(8.0));
    let mut note = 0u8;

    c.bench_function("instrument/note_on_with_steal", |b| {
        b.iter(|| {
            note = note.wrapping_add(7) % 64;
            black_box(synth.note_on(NoteInfo::from_midi(36 + note, 90)));
        });
    });
}

criterion_group!(voice_benches, bench_unison, bench_filtered, bench_oversampling);

criterion_group!(instrument_benches, bench_polyphony, bench_note_churn);

criterion_main!(voice_benches, instrument_benches);

//! Render Benchmarks
//!
//! Cost of one render callback for empty, serial and parallel chains.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use gainstage::dsp::{EqUnit, GainUnit, Limiter, Passthrough};
use gainstage::engine::{AudioBuffer, ChannelLayout};
use gainstage::gain::SafetyLimiter;
use gainstage::{ChainMode, Engine, EngineConfig};

const BLOCK: usize = 512;

fn benchmark_empty_chain(c: &mut Criterion) {
    let (engine, mut renderer) = Engine::init(EngineConfig::default()).unwrap();
    engine.play();
    let input = AudioBuffer::sine(440.0, 0.5, BLOCK, ChannelLayout::Stereo, 48000);
    let mut output = AudioBuffer::new(BLOCK, ChannelLayout::Stereo);

    c.bench_function("render_empty_512", |b| {
        b.iter(|| renderer.render(black_box(&input), &mut output))
    });
}

fn benchmark_serial_chain(c: &mut Criterion) {
    let (mut engine, mut renderer) = Engine::init(EngineConfig::default()).unwrap();
    engine
        .connect_unit(Box::new(GainUnit::new(-3.0)), ChainMode::Serial)
        .unwrap();
    engine
        .connect_unit(Box::new(EqUnit::default()), ChainMode::Serial)
        .unwrap();
    engine
        .connect_unit(Box::new(Limiter::default()), ChainMode::Serial)
        .unwrap();
    for point in ["preProcess", "postProcess", "masterLimiter"] {
        engine.create_metering_point(point).unwrap();
    }
    engine.play();
    let input = AudioBuffer::sine(440.0, 0.9, BLOCK, ChannelLayout::Stereo, 48000);
    let mut output = AudioBuffer::new(BLOCK, ChannelLayout::Stereo);

    c.bench_function("render_serial_3_metered_512", |b| {
        b.iter(|| renderer.render(black_box(&input), &mut output))
    });
}

fn benchmark_parallel_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("render_parallel_512");
    for branches in [1, 4, 8] {
        let (mut engine, mut renderer) = Engine::init(EngineConfig::default()).unwrap();
        for _ in 0..branches {
            engine
                .connect_unit(Box::new(Passthrough), ChainMode::Parallel)
                .unwrap();
        }
        engine.play();
        let input = AudioBuffer::sine(440.0, 0.5, BLOCK, ChannelLayout::Stereo, 48000);
        let mut output = AudioBuffer::new(BLOCK, ChannelLayout::Stereo);

        group.bench_with_input(BenchmarkId::from_parameter(branches), &branches, |b, _| {
            b.iter(|| renderer.render(black_box(&input), &mut output))
        });
    }
    group.finish();
}

fn benchmark_safety_limiter(c: &mut Criterion) {
    let limiter = SafetyLimiter::new(-0.3, 0.9);
    let hot = AudioBuffer::sine(440.0, 1.4, BLOCK, ChannelLayout::Stereo, 48000);

    c.bench_function("safety_limiter_hot_512", |b| {
        b.iter(|| {
            let mut buffer = hot.clone();
            limiter.process(black_box(&mut buffer))
        })
    });
}

criterion_group!(
    benches,
    benchmark_empty_chain,
    benchmark_serial_chain,
    benchmark_parallel_chain,
    benchmark_safety_limiter
);
criterion_main!(benches);

//! Integration Tests
//!
//! End-to-end tests for the engine: chain edits, rendering, gain staging,
//! parameter delivery, metering and transport.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use gainstage::dsp::{EqUnit, GainUnit, Limiter, ParamDescriptor, ParamUnit, Passthrough, ProcessingUnit};
use gainstage::engine::buffer::{linear_to_db, ChannelLayout};
use gainstage::engine::AudioBuffer;
use gainstage::{ChainMode, Engine, EngineConfig, EngineEvent, Renderer, WriteState};

const SAMPLE_RATE: u32 = 48000;

fn engine() -> (Engine, Renderer) {
    let (engine, renderer) = Engine::init(EngineConfig::default()).unwrap();
    engine.play();
    (engine, renderer)
}

/// Render `input` in 512-frame callbacks and return the full output
fn render_all(renderer: &mut Renderer, input: &AudioBuffer) -> AudioBuffer {
    let layout = ChannelLayout::from_count(input.num_channels()).unwrap();
    let mut output = AudioBuffer::new(input.len(), layout);
    let mut chunk_in = AudioBuffer::with_capacity(layout, 512, SAMPLE_RATE);
    let mut chunk_out = AudioBuffer::with_capacity(layout, 512, SAMPLE_RATE);
    let mut offset = 0;
    while offset < input.len() {
        let n = 512.min(input.len() - offset);
        chunk_in.copy_range_from(input, offset, n);
        chunk_out.set_frames(n);
        renderer.render(&chunk_in, &mut chunk_out);
        chunk_out.write_range_to(&mut output, offset);
        offset += n;
    }
    output
}

fn noise(frames: usize, amplitude: f32, seed: u64) -> AudioBuffer {
    let mut rng = StdRng::seed_from_u64(seed);
    let channels = (0..2)
        .map(|_| (0..frames).map(|_| rng.gen_range(-amplitude..amplitude)).collect())
        .collect();
    AudioBuffer::from_channels(channels, SAMPLE_RATE).unwrap()
}

fn rms_db(buffer: &AudioBuffer) -> f32 {
    linear_to_db(buffer.rms())
}

/// Unit that records every parameter value it is handed
struct Recorder {
    seen: Arc<Mutex<Vec<f32>>>,
}

impl ProcessingUnit for Recorder {
    fn process(&mut self, _buffer: &mut AudioBuffer) {}

    fn set_bypass(&mut self, _bypassed: bool) {}

    fn describe_parameters(&self) -> Vec<ParamDescriptor> {
        vec![ParamDescriptor::continuous("amount", 0.0, 10.0, ParamUnit::None)]
    }

    fn set_parameter(&mut self, _key: &str, value: f32) {
        self.seen.lock().push(value);
    }

    fn display_kind(&self) -> &str {
        "recorder"
    }
}

/// Unit whose gain report is unusable
struct BrokenTrim;

impl ProcessingUnit for BrokenTrim {
    fn process(&mut self, _buffer: &mut AudioBuffer) {}

    fn set_bypass(&mut self, _bypassed: bool) {}

    fn reported_gain_trim_db(&self) -> f32 {
        f32::NAN
    }

    fn describe_parameters(&self) -> Vec<ParamDescriptor> {
        Vec::new()
    }

    fn set_parameter(&mut self, _key: &str, _value: f32) {}

    fn display_kind(&self) -> &str {
        "broken"
    }
}

// === Gain Staging ===

#[test]
fn test_empty_chain_is_bit_identical() {
    let (_engine, mut renderer) = engine();
    let input = AudioBuffer::sine(440.0, 0.5, 4800, ChannelLayout::Stereo, SAMPLE_RATE);

    let output = render_all(&mut renderer, &input);
    assert_eq!(output, input);
}

#[test]
fn test_unity_at_rest() {
    let (mut engine, mut renderer) = engine();
    engine
        .connect_unit(Box::new(GainUnit::new(-6.0)), ChainMode::Serial)
        .unwrap();
    engine
        .connect_unit(Box::new(GainUnit::new(9.0)), ChainMode::Serial)
        .unwrap();
    engine
        .connect_unit(Box::new(Passthrough), ChainMode::Serial)
        .unwrap();

    let input = AudioBuffer::sine(1000.0, 0.5, 9600, ChannelLayout::Stereo, SAMPLE_RATE);
    let output = render_all(&mut renderer, &input);

    let delta = (rms_db(&output) - rms_db(&input)).abs();
    assert!(delta < 0.05, "level moved by {delta:.3} dB");
}

#[test]
fn test_compensation_recorded_on_descriptor() {
    let (mut engine, _renderer) = engine();
    let id = engine
        .connect_unit(Box::new(GainUnit::new(-6.0)), ChainMode::Serial)
        .unwrap();
    let descriptor = engine
        .descriptors()
        .into_iter()
        .find(|d| d.id == id)
        .unwrap();
    assert!((descriptor.compensation_db - 6.0).abs() < 1e-6);
}

#[test]
fn test_parallel_passthroughs_sum_to_unity() {
    for branches in [1, 2, 4] {
        let (mut engine, mut renderer) = engine();
        for _ in 0..branches {
            engine
                .connect_unit(Box::new(Passthrough), ChainMode::Parallel)
                .unwrap();
        }

        let input = AudioBuffer::sine(220.0, 0.5, 2048, ChannelLayout::Stereo, SAMPLE_RATE);
        let output = render_all(&mut renderer, &input);
        for ch in 0..2 {
            for (a, b) in input.channel(ch).iter().zip(output.channel(ch)) {
                assert!((a - b).abs() < 1e-5, "{branches} branches: {a} vs {b}");
            }
        }
    }
}

#[test]
fn test_parallel_noise_within_tenth_db() {
    let (mut engine, mut renderer) = engine();
    engine
        .connect_unit(Box::new(Passthrough), ChainMode::Parallel)
        .unwrap();
    engine
        .connect_unit(Box::new(Passthrough), ChainMode::Parallel)
        .unwrap();

    let input = noise(SAMPLE_RATE as usize / 2, 0.25, 7);
    let output = render_all(&mut renderer, &input);
    assert!((rms_db(&output) - rms_db(&input)).abs() < 0.1);
}

#[test]
fn test_full_scale_burst_is_contained() {
    let (mut engine, mut renderer) = engine();
    engine
        .connect_unit(Box::new(EqUnit::default()), ChainMode::Serial)
        .unwrap();
    engine
        .connect_unit(Box::new(Limiter::default()), ChainMode::Serial)
        .unwrap();
    engine.create_metering_point("masterLimiter").unwrap();
    engine.set_input_trim_db(6.0).unwrap();

    let input = AudioBuffer::sine(100.0, 1.0, 9600, ChannelLayout::Stereo, SAMPLE_RATE);
    let output = render_all(&mut renderer, &input);

    assert!(linear_to_db(output.peak()) <= -0.3 + 1e-4);
    engine.tick_metering();
    let snapshot = engine.sample("masterLimiter").unwrap();
    assert!(snapshot.gain_reduction_db >= 0.0);
    let metered = engine.sample("output").unwrap();
    let safety_margin = engine.headroom_policy().safety_margin;
    assert!(metered.peak_db() > -6.0, "output tap saw no window");
    assert!(metered.peak_db() <= safety_margin + 1e-4);
    assert!(output.samples.iter().flatten().all(|s| s.is_finite()));
}

#[test]
fn test_bypassed_unit_lifts_compensation() {
    let (mut engine, mut renderer) = engine();
    let id = engine
        .connect_unit(Box::new(GainUnit::new(-12.0)), ChainMode::Serial)
        .unwrap();
    engine.set_bypass(id, true).unwrap();

    let input = AudioBuffer::sine(440.0, 0.25, 4800, ChannelLayout::Stereo, SAMPLE_RATE);
    let output = render_all(&mut renderer, &input);
    for (a, b) in output.channel(0)[4000..].iter().zip(&input.channel(0)[4000..]) {
        assert!((a - b).abs() < 1e-4);
    }
}

#[test]
fn test_headroom_warning_threshold() {
    let (mut engine, _renderer) = engine();
    assert!(!engine.check_headroom().exceeds_headroom);
    engine.set_input_trim_db(12.0).unwrap();
    assert!(!engine.check_headroom().exceeds_headroom);
    engine.set_output_trim_db(0.5).unwrap();
    assert!(engine.check_headroom().exceeds_headroom);
}

#[test]
fn test_trim_out_of_range_refused() {
    let (mut engine, _renderer) = engine();
    let err = engine.set_output_trim_db(30.0).unwrap_err();
    assert_eq!(err.error_code(), "INVALID_PARAMETER");
    assert_eq!(engine.output_trim_db(), 0.0);
}

// === Parameter Delivery ===

#[test]
fn test_writes_coalesce_to_last() {
    let (mut engine, mut renderer) = engine();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let id = engine
        .connect_unit(
            Box::new(Recorder {
                seen: Arc::clone(&seen),
            }),
            ChainMode::Serial,
        )
        .unwrap();

    let tickets: Vec<_> = [1.0, 2.0, 3.0]
        .iter()
        .map(|&v| engine.set_parameter(id, "amount", v).unwrap())
        .collect();
    assert_eq!(engine.write_state(&tickets[2]), Some(WriteState::Pending));

    let input = AudioBuffer::new(256, ChannelLayout::Stereo);
    render_all(&mut renderer, &input);
    assert_eq!(*seen.lock(), vec![3.0]);

    let events = engine.poll_events();
    assert!(events.iter().any(|e| matches!(
        e,
        EngineEvent::ParameterApplied { seq: 3, coalesced: 2, .. }
    )));
    assert_eq!(engine.write_state(&tickets[0]), Some(WriteState::Coalesced));
    assert_eq!(engine.write_state(&tickets[1]), Some(WriteState::Coalesced));
    assert_eq!(engine.write_state(&tickets[2]), Some(WriteState::Applied));
}

#[test]
fn test_out_of_range_parameter_refused() {
    let (mut engine, _renderer) = engine();
    let id = engine
        .connect_unit(Box::new(GainUnit::default()), ChainMode::Serial)
        .unwrap();
    let err = engine.set_parameter(id, "gain_db", 40.0).unwrap_err();
    assert_eq!(err.error_code(), "INVALID_PARAMETER");
    let err = engine.set_parameter(id, "nonexistent", 1.0).unwrap_err();
    assert_eq!(err.error_code(), "INVALID_PARAMETER");
}

// === Chain Edits ===

#[test]
fn test_failed_rebuild_keeps_previous_topology() {
    let (mut engine, mut renderer) = engine();
    engine
        .connect_unit(Box::new(Passthrough), ChainMode::Serial)
        .unwrap();
    let generation = engine.generation();

    let err = engine
        .connect_unit(Box::new(BrokenTrim), ChainMode::Serial)
        .unwrap_err();
    assert_eq!(err.error_code(), "TOPOLOGY_REBUILD_FAILED");
    assert_eq!(engine.generation(), generation);
    assert_eq!(engine.descriptors().len(), 1);

    let input = AudioBuffer::new(128, ChannelLayout::Stereo);
    let mut output = AudioBuffer::new(128, ChannelLayout::Stereo);
    let outcome = renderer.render(&input, &mut output);
    assert_eq!(outcome.generation, generation);
    assert_eq!(outcome.active_units, 1);
}

#[test]
fn test_capacity_exceeded() {
    let config = EngineConfig {
        max_units: 2,
        ..EngineConfig::default()
    };
    let (mut engine, _renderer) = Engine::init(config).unwrap();
    engine.connect_unit(Box::new(Passthrough), ChainMode::Serial).unwrap();
    engine.connect_unit(Box::new(Passthrough), ChainMode::Parallel).unwrap();

    let err = engine
        .connect_unit(Box::new(Passthrough), ChainMode::Serial)
        .unwrap_err();
    assert_eq!(err.error_code(), "CAPACITY_EXCEEDED");
    assert_eq!(engine.descriptors().len(), 2);
}

#[test]
fn test_disconnect_is_idempotent() {
    let (mut engine, _renderer) = engine();
    let first = engine.connect_unit(Box::new(Passthrough), ChainMode::Serial).unwrap();
    let second = engine.connect_unit(Box::new(Passthrough), ChainMode::Serial).unwrap();

    engine.disconnect_unit(first).unwrap();
    let generation = engine.generation();
    engine.disconnect_unit(first).unwrap();
    assert_eq!(engine.generation(), generation);

    let descriptors = engine.descriptors();
    assert_eq!(descriptors.len(), 1);
    assert_eq!(descriptors[0].id, second);
    assert_eq!(descriptors[0].order, 0);
}

#[test]
fn test_reorder_and_disable() {
    let (mut engine, mut renderer) = engine();
    let a = engine.connect_unit(Box::new(Passthrough), ChainMode::Serial).unwrap();
    let b = engine.connect_unit(Box::new(Passthrough), ChainMode::Serial).unwrap();

    engine.set_order(a, 2).unwrap();
    let ids: Vec<_> = engine.descriptors().iter().map(|d| d.id).collect();
    assert_eq!(ids, vec![b, a]);

    engine.set_enabled(a, false).unwrap();
    let input = AudioBuffer::new(64, ChannelLayout::Stereo);
    let mut output = AudioBuffer::new(64, ChannelLayout::Stereo);
    assert_eq!(renderer.render(&input, &mut output).active_units, 1);
}

#[test]
fn test_unknown_unit_errors() {
    let (mut engine, _renderer) = engine();
    let ghost = gainstage::UnitId::new();
    assert_eq!(engine.set_bypass(ghost, true).unwrap_err().error_code(), "UNIT_NOT_FOUND");
    assert_eq!(engine.set_order(ghost, 1).unwrap_err().error_code(), "UNIT_NOT_FOUND");
    assert_eq!(
        engine
            .create_metering_point(&format!("unit:{ghost}"))
            .unwrap_err()
            .error_code(),
        "UNIT_NOT_FOUND"
    );
}

// === Metering ===

#[test]
fn test_metering_points_and_subscriptions() {
    let (mut engine, mut renderer) = engine();
    let id = engine.connect_unit(Box::new(Passthrough), ChainMode::Serial).unwrap();
    engine.create_metering_point(&format!("unit:{id}")).unwrap();
    engine.create_metering_point("preProcess").unwrap();

    let points = engine.metering_points();
    assert!(points.contains(&"preProcess".to_string()));
    assert!(points.contains(&format!("unit:{id}")));

    let delivered = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&delivered);
    let subscription = engine.subscribe_metering(move |_| {
        counter.fetch_add(1, Ordering::Relaxed);
    });

    let input = AudioBuffer::sine(440.0, 0.5, 4800, ChannelLayout::Stereo, SAMPLE_RATE);
    render_all(&mut renderer, &input);
    assert!(engine.tick_metering() > 0);
    assert!(delivered.load(Ordering::Relaxed) > 0);

    let snapshot = engine.sample(&format!("unit:{id}")).unwrap();
    assert!((snapshot.peak_left_db - linear_to_db(0.5)).abs() < 0.1);

    assert!(engine.unsubscribe_metering(subscription));
    assert!(!engine.unsubscribe_metering(subscription));

    engine.disconnect_unit(id).unwrap();
    assert_eq!(
        engine.sample(&format!("unit:{id}")).unwrap_err().error_code(),
        "UNKNOWN_METERING_POINT"
    );
}

#[test]
fn test_sample_unknown_point() {
    let (engine, _renderer) = engine();
    assert_eq!(
        engine.sample("postProcess").unwrap_err().error_code(),
        "UNKNOWN_METERING_POINT"
    );
    assert_eq!(
        engine.sample("sidechain").unwrap_err().error_code(),
        "UNKNOWN_METERING_POINT"
    );
}

// === Transport ===

#[test]
fn test_paused_transport_renders_silence() {
    let (engine, mut renderer) = engine();
    engine.pause();

    let input = AudioBuffer::sine(440.0, 0.5, 512, ChannelLayout::Stereo, SAMPLE_RATE);
    let mut output = AudioBuffer::sine(440.0, 0.5, 512, ChannelLayout::Stereo, SAMPLE_RATE);
    renderer.render(&input, &mut output);
    assert_eq!(output.peak(), 0.0);
    assert_eq!(engine.transport().position_frames(), 0);

    engine.play();
    renderer.render(&input, &mut output);
    assert_eq!(engine.transport().position_frames(), 512);
}

#[test]
fn test_short_input_pads_with_silence() {
    let (_engine, mut renderer) = engine();
    let input = AudioBuffer::sine(440.0, 0.5, 256, ChannelLayout::Stereo, SAMPLE_RATE);
    let mut output = AudioBuffer::sine(440.0, 0.5, 1024, ChannelLayout::Stereo, SAMPLE_RATE);

    let outcome = renderer.render(&input, &mut output);
    assert_eq!(outcome.frames, 1024);
    for ch in 0..2 {
        assert_eq!(&output.channel(ch)[..256], input.channel(ch));
        assert!(output.channel(ch)[256..].iter().all(|&s| s == 0.0));
    }
}

#[test]
fn test_render_interleaved_matches_planar() {
    let (_engine, mut renderer) = engine();
    let planar = AudioBuffer::sine(440.0, 0.5, 1000, ChannelLayout::Stereo, SAMPLE_RATE);
    let input = planar.to_interleaved();
    let mut output = vec![1.0_f32; input.len() + 3];

    let outcome = renderer.render_interleaved(&input, &mut output);
    assert_eq!(outcome.frames, 1000);
    assert_eq!(&output[..input.len()], &input[..]);
    assert!(output[input.len()..].iter().all(|&s| s == 0.0));
}

#[test]
fn test_render_on_another_thread() {
    let (mut engine, mut renderer) = engine();
    let handle = std::thread::spawn(move || {
        let input = AudioBuffer::sine(440.0, 0.5, 512, ChannelLayout::Stereo, SAMPLE_RATE);
        let mut output = AudioBuffer::new(512, ChannelLayout::Stereo);
        for _ in 0..50 {
            renderer.render(&input, &mut output);
        }
        output
    });
    for _ in 0..5 {
        let id = engine.connect_unit(Box::new(Passthrough), ChainMode::Parallel).unwrap();
        engine.disconnect_unit(id).unwrap();
    }
    let output = handle.join().unwrap();
    assert!(output.samples.iter().flatten().all(|s| s.is_finite()));
    engine.poll_events();
}

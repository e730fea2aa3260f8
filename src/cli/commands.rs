//! CLI command implementations

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use crate::chain::ChainMode;
use crate::channel::EngineEvent;
use crate::config::EngineConfig;
use crate::dsp::create_unit;
use crate::engine::io::{read_wav, write_wav};
use crate::engine::{AudioBuffer, Engine};
use crate::error::{EngineError, Result};
use crate::gain::{compute_soft_clip_curve, HEADROOM_POLICY};
use crate::metering::MeteringSnapshot;

/// Metering points reported by `process`, besides the configured defaults
const REPORTED_POINTS: [&str; 5] = ["input", "preProcess", "postProcess", "masterLimiter", "output"];

/// Parsed `--unit` argument
#[derive(Debug, Clone, PartialEq)]
pub struct UnitSpec {
    pub kind: String,
    pub params: Vec<(String, f32)>,
    pub mode: ChainMode,
}

/// Parse `kind[:key=value,...][@parallel|@serial]`
pub fn parse_unit_spec(spec: &str) -> Result<UnitSpec> {
    let invalid = |reason: &str| EngineError::InvalidConfig {
        reason: format!("unit spec '{spec}': {reason}"),
    };

    let (body, mode) = match spec.rsplit_once('@') {
        Some((body, "parallel")) => (body, ChainMode::Parallel),
        Some((body, "serial")) => (body, ChainMode::Serial),
        Some(_) => return Err(invalid("mode must be @serial or @parallel")),
        None => (spec, ChainMode::Serial),
    };

    let (kind, params) = match body.split_once(':') {
        Some((kind, list)) => {
            let params = list
                .split(',')
                .filter(|pair| !pair.is_empty())
                .map(|pair| {
                    let (key, value) = pair
                        .split_once('=')
                        .ok_or_else(|| invalid("parameters must be key=value"))?;
                    let value = value
                        .trim()
                        .parse::<f32>()
                        .map_err(|_| invalid("parameter value is not a number"))?;
                    Ok((key.trim().to_string(), value))
                })
                .collect::<Result<Vec<_>>>()?;
            (kind, params)
        }
        None => (body, Vec::new()),
    };

    if kind.is_empty() {
        return Err(invalid("missing unit kind"));
    }
    Ok(UnitSpec {
        kind: kind.to_string(),
        params,
        mode,
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProcessReport {
    input: PathBuf,
    output: PathBuf,
    frames: usize,
    sample_rate: u32,
    units: usize,
    underruns: u64,
    /// Loudest windowed peak seen at each point over the whole render
    max_peak_db: BTreeMap<String, f32>,
    /// Largest master limiter gain reduction over the whole render
    max_gain_reduction_db: f32,
    final_snapshots: Vec<MeteringSnapshot>,
}

/// Render `input` through the engine and write `output`
#[allow(clippy::too_many_arguments)]
pub fn process_audio(
    input: &Path,
    output: &Path,
    units: &[String],
    config_path: Option<&Path>,
    input_trim_db: f32,
    output_trim_db: f32,
    bit_depth: u16,
) -> Result<()> {
    let source = read_wav(input)?;
    let layout = source
        .channel_layout()
        .ok_or_else(|| EngineError::InvalidConfig {
            reason: "input must be mono or stereo".to_string(),
        })?;

    let mut config = match config_path {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };
    config.sample_rate = source.sample_rate;
    config.channels = layout.num_channels();

    let (mut engine, mut renderer) = Engine::init(config)?;
    for spec in units {
        let spec = parse_unit_spec(spec)?;
        let unit = create_unit(&spec.kind).ok_or_else(|| EngineError::InvalidConfig {
            reason: format!("unknown unit kind '{}'", spec.kind),
        })?;
        let id = engine.connect_unit(unit, spec.mode)?;
        for (key, value) in &spec.params {
            engine.set_parameter(id, key, *value)?;
        }
        info!(unit = %id, kind = %spec.kind, mode = %spec.mode, "unit added");
    }
    engine.set_input_trim_db(input_trim_db)?;
    engine.set_output_trim_db(output_trim_db)?;
    for name in REPORTED_POINTS {
        engine.create_metering_point(name)?;
    }
    engine.check_headroom();

    let block = engine.config().max_block_size;
    let mut rendered = AudioBuffer::new(source.len(), layout);
    rendered.sample_rate = source.sample_rate;
    let mut chunk_in = AudioBuffer::with_capacity(layout, block, source.sample_rate);
    let mut chunk_out = AudioBuffer::with_capacity(layout, block, source.sample_rate);

    engine.play();
    let mut history = Vec::new();
    let mut offset = 0;
    while offset < source.len() {
        let n = block.min(source.len() - offset);
        chunk_in.copy_range_from(&source, offset, n);
        chunk_out.set_frames(n);
        renderer.render(&chunk_in, &mut chunk_out);
        chunk_out.write_range_to(&mut rendered, offset);
        offset += n;

        engine.tick_metering();
        history.extend(engine.drain_metering());
    }
    engine.stop();

    for event in engine.poll_events() {
        if let EngineEvent::EventsDropped { count } = event {
            warn!(count, "render events dropped");
        }
    }

    write_wav(&rendered, output, bit_depth)?;

    let mut max_peak_db: BTreeMap<String, f32> = BTreeMap::new();
    let mut max_gain_reduction_db = 0.0_f32;
    for snapshot in &history {
        let peak = max_peak_db
            .entry(snapshot.point.clone())
            .or_insert(crate::engine::buffer::FLOOR_DB);
        *peak = peak.max(snapshot.peak_db());
        max_gain_reduction_db = max_gain_reduction_db.max(snapshot.gain_reduction_db);
    }

    let final_snapshots = engine
        .metering_points()
        .iter()
        .map(|name| engine.sample(name))
        .collect::<Result<Vec<_>>>()?;

    let report = ProcessReport {
        input: input.to_path_buf(),
        output: output.to_path_buf(),
        frames: rendered.len(),
        sample_rate: rendered.sample_rate,
        units: engine.descriptors().len(),
        underruns: engine.underrun_count(),
        max_peak_db,
        max_gain_reduction_db,
        final_snapshots,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Print the soft-clip transfer curve
pub fn print_curve(knee: f32, points: usize) -> Result<()> {
    let curve = compute_soft_clip_curve(knee, points);
    let last = (curve.len() - 1).max(1) as f32;
    let pairs: Vec<[f32; 2]> = curve
        .iter()
        .enumerate()
        .map(|(i, &y)| [-1.5 + 3.0 * i as f32 / last, y])
        .collect();
    println!("{}", serde_json::to_string_pretty(&pairs)?);
    Ok(())
}

/// Print the headroom policy
pub fn print_policy() -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&HEADROOM_POLICY)?);
    Ok(())
}

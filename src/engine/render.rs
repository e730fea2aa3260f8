//! Render path
//!
//! The [`Renderer`] is the render-context half of the engine. Each callback
//! it loads the published topology once, applies pending control writes,
//! runs the chain in blocks of at most `max_block_size` frames and feeds the
//! metering taps. It never blocks, allocates or logs: contention and missed
//! deadlines are reported as [`RenderEvent`]s instead.
//!
//! Per block:
//!
//! ```text
//! input -> [input tap] -> master input trim -> pre gain -> [preProcess tap]
//!       -> serial units -> parallel section -> post gain -> [postProcess tap]
//!       -> master output trim -> master limiter -> [masterLimiter tap]
//!       -> true-peak stage -> [output tap] -> output
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;

use super::buffer::{AudioBuffer, ChannelLayout};
use super::transport::Transport;
use crate::chain::topology::AtomicF32;
use crate::chain::{Stage, Topology};
use crate::channel::{EventSender, RenderEvent};
use crate::gain::{GainNode, GainStageController, SafetyLimiter};

/// Master trims written by the control plane (linear)
#[derive(Debug)]
pub(crate) struct MasterControls {
    pub(crate) input_trim: AtomicF32,
    pub(crate) output_trim: AtomicF32,
}

impl Default for MasterControls {
    fn default() -> Self {
        Self {
            input_trim: AtomicF32::new(1.0),
            output_trim: AtomicF32::new(1.0),
        }
    }
}

/// What a render call rendered against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderOutcome {
    /// Topology generation used for the whole call
    pub generation: u64,
    /// Units wired in that topology
    pub active_units: usize,
    /// Frames written
    pub frames: usize,
}

/// Handles the renderer shares with the engine
pub(crate) struct RenderLinks {
    pub(crate) topology: Arc<ArcSwap<Topology>>,
    pub(crate) observed: Arc<AtomicU64>,
    pub(crate) master: Arc<MasterControls>,
    pub(crate) transport: Transport,
    pub(crate) events: EventSender,
    pub(crate) underruns: Arc<AtomicU64>,
}

/// Render-context half of the engine
///
/// Move it to the audio thread and call [`Renderer::render`] from the device
/// callback.
pub struct Renderer {
    links: RenderLinks,
    last_generation: Option<u64>,
    sample_rate: u32,
    channels: usize,
    max_block: usize,

    input_trim: GainNode,
    pre_gain: GainNode,
    post_gain: GainNode,
    output_trim: GainNode,
    master_limiter: SafetyLimiter,
    true_peak: SafetyLimiter,

    work: AudioBuffer,
    branch: AudioBuffer,
    sum: AudioBuffer,
    dry: AudioBuffer,
    io_in: AudioBuffer,
    io_out: AudioBuffer,
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("last_generation", &self.last_generation)
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .field("max_block", &self.max_block)
            .finish_non_exhaustive()
    }
}

impl Renderer {
    pub(crate) fn new(
        links: RenderLinks,
        gain: &GainStageController,
        layout: ChannelLayout,
        sample_rate: u32,
        max_block: usize,
    ) -> Self {
        let scratch = || AudioBuffer::with_capacity(layout, max_block, sample_rate);
        Self {
            links,
            last_generation: None,
            sample_rate,
            channels: layout.num_channels(),
            max_block,
            input_trim: gain.gain_node(1.0),
            pre_gain: gain.gain_node(1.0),
            post_gain: gain.gain_node(1.0),
            output_trim: gain.gain_node(1.0),
            master_limiter: gain.master_limiter(),
            true_peak: gain.true_peak_limiter(),
            work: scratch(),
            branch: scratch(),
            sum: scratch(),
            dry: scratch(),
            io_in: scratch(),
            io_out: scratch(),
        }
    }

    /// Render one callback from planar buffers
    ///
    /// `output.len()` frames are produced; missing input frames read as
    /// silence. Mono input feeding a stereo engine is duplicated to both
    /// channels. While the transport is paused the output is silent and the
    /// playhead does not move.
    pub fn render(&mut self, input: &AudioBuffer, output: &mut AudioBuffer) -> RenderOutcome {
        let started = Instant::now();
        let topology = self.links.topology.load_full();
        self.observe(&topology);

        let frames = output.len();
        match self.links.transport.begin_block() {
            None => output.silence(),
            Some(mut position) => {
                let mut offset = 0;
                while offset < frames {
                    let n = self.max_block.min(frames - offset);
                    self.render_block(&topology, input, offset, n, position);
                    self.work.write_range_to(output, offset);
                    offset += n;
                    position += n as u64;
                }
                self.links.transport.advance(frames as u64);
            }
        }

        self.check_deadline(started, frames);
        RenderOutcome {
            generation: topology.generation,
            active_units: topology.active_units(),
            frames,
        }
    }

    /// Render one callback from interleaved buffers
    ///
    /// Frames are `min(input, output)` whole frames at the engine's channel
    /// count; any trailing output samples are zeroed.
    pub fn render_interleaved(&mut self, input: &[f32], output: &mut [f32]) -> RenderOutcome {
        let channels = self.channels;
        let frames = input.len().min(output.len()) / channels;
        let (empty_in, empty_out) = (self.empty_buffer(), self.empty_buffer());
        let mut io_in = std::mem::replace(&mut self.io_in, empty_in);
        let mut io_out = std::mem::replace(&mut self.io_out, empty_out);

        let mut outcome = RenderOutcome {
            generation: self.last_generation.unwrap_or_default(),
            active_units: 0,
            frames: 0,
        };
        let mut offset = 0;
        while offset < frames {
            let n = self.max_block.min(frames - offset);
            io_in.set_frames(n);
            io_out.set_frames(n);
            for i in 0..n {
                for ch in 0..channels {
                    io_in.samples[ch][i] = input[(offset + i) * channels + ch];
                }
            }

            outcome = self.render(&io_in, &mut io_out);

            for i in 0..n {
                for ch in 0..channels {
                    output[(offset + i) * channels + ch] = io_out.samples[ch][i];
                }
            }
            offset += n;
        }
        output[frames * channels..].fill(0.0);

        self.io_in = io_in;
        self.io_out = io_out;
        outcome.frames = frames;
        outcome
    }

    /// Deadline misses counted so far
    pub fn underrun_count(&self) -> u64 {
        self.links.underruns.load(Ordering::Relaxed)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn empty_buffer(&self) -> AudioBuffer {
        AudioBuffer {
            samples: Vec::new(),
            sample_rate: self.sample_rate,
        }
    }

    fn observe(&mut self, topology: &Topology) {
        if self.last_generation != Some(topology.generation) {
            self.last_generation = Some(topology.generation);
            self.links.events.post(RenderEvent::TopologyObserved {
                generation: topology.generation,
            });
        }
        self.links
            .observed
            .store(topology.generation, Ordering::Release);
    }

    fn check_deadline(&mut self, started: Instant, frames: usize) {
        let budget = frames as f64 / self.sample_rate as f64;
        if started.elapsed().as_secs_f64() > budget {
            let total = self.links.underruns.fetch_add(1, Ordering::Relaxed) + 1;
            self.links.events.post(RenderEvent::Underrun { total });
        }
    }

    fn render_block(
        &mut self,
        topology: &Topology,
        input: &AudioBuffer,
        offset: usize,
        frames: usize,
        position: u64,
    ) {
        let taps = &topology.taps;
        self.work.copy_range_from(input, offset, frames);
        if let Some(tap) = &taps.input {
            tap.feed(&self.work, position);
        }

        self.input_trim
            .set_target(self.links.master.input_trim.load());
        self.input_trim.process(&mut self.work);
        self.pre_gain.process(&mut self.work);
        if let Some(tap) = &taps.pre_process {
            tap.feed(&self.work, position);
        }

        for stage in &topology.serial {
            run_stage(stage, &mut self.work, &mut self.dry, &mut self.links.events, position);
        }

        if !topology.parallel.is_empty() {
            let g = topology.summing_gain;
            self.sum.copy_from(&self.work);
            self.sum.scale(g);
            for stage in &topology.parallel {
                self.branch.copy_from(&self.work);
                run_stage(stage, &mut self.branch, &mut self.dry, &mut self.links.events, position);
                self.sum.add_scaled(&self.branch, g);
            }
            std::mem::swap(&mut self.work, &mut self.sum);
        }

        self.post_gain.process(&mut self.work);
        if let Some(tap) = &taps.post_process {
            tap.feed(&self.work, position);
        }

        self.output_trim
            .set_target(self.links.master.output_trim.load());
        self.output_trim.process(&mut self.work);

        let reduction = self.master_limiter.process(&mut self.work);
        if let Some(tap) = &taps.master_limiter {
            tap.feed_with_reduction(&self.work, position, reduction);
        }

        self.true_peak.process(&mut self.work);
        if let Some(tap) = &taps.output {
            tap.feed(&self.work, position);
        }
    }
}

/// Run one wired unit over `buffer`
///
/// If the unit is locked elsewhere it is passed through for this block.
fn run_stage(
    stage: &Stage,
    buffer: &mut AudioBuffer,
    dry: &mut AudioBuffer,
    events: &mut EventSender,
    position: u64,
) {
    let cell = &stage.cell;
    let Some(mut guard) = cell.try_runtime() else {
        events.post(RenderEvent::UnitBusy { unit: cell.id() });
        if let Some(tap) = &stage.tap {
            tap.feed(buffer, position);
        }
        return;
    };
    let rt = &mut *guard;
    let controls = cell.controls();

    for (index, slot) in controls.params().iter().enumerate() {
        let (seq, value) = slot.read();
        let applied = slot.applied();
        if seq > applied {
            rt.unit.set_parameter(&cell.params()[index].key, value);
            slot.mark_applied(seq);
            events.post(RenderEvent::ParameterApplied {
                unit: cell.id(),
                param: index,
                first_seq: applied + 1,
                seq,
            });
        }
    }

    let bypassed = controls.bypassed();
    if bypassed != rt.bypass_seen {
        rt.unit.set_bypass(bypassed);
        rt.bypass_seen = bypassed;
        events.post(RenderEvent::BypassApplied {
            unit: cell.id(),
            bypassed,
        });
    }

    let mix = controls.mix();
    let output_target = controls.output_target();
    if rt.primed {
        rt.wet_gain.set_target(mix);
        rt.dry_gain.set_target(1.0 - mix);
        rt.output_gain.set_target(output_target);
    } else {
        rt.wet_gain.jump_to(mix);
        rt.dry_gain.jump_to(1.0 - mix);
        rt.output_gain.jump_to(output_target);
        rt.primed = true;
    }

    rt.input_gain.process(buffer);
    if !bypassed {
        let fully_wet = rt.wet_gain.is_settled()
            && rt.wet_gain.current() == 1.0
            && rt.dry_gain.is_settled();
        if fully_wet {
            rt.unit.process(buffer);
        } else {
            dry.copy_from(buffer);
            rt.unit.process(buffer);
            rt.wet_gain.process(buffer);
            rt.dry_gain.process(dry);
            buffer.add_scaled(dry, 1.0);
        }
    }
    rt.output_gain.process(buffer);
    drop(guard);

    if let Some(tap) = &stage.tap {
        tap.feed(buffer, position);
    }
}

//! Engine Facade
//!
//! [`Engine::init`] builds one engine and hands back its two halves:
//!
//! - [`Engine`], the control-plane API (chain edits, parameters, trims,
//!   metering, transport, events). It may allocate, lock and log.
//! - [`Renderer`], to be moved to the audio thread. It shares only atomics,
//!   the published topology and a lock-free event ring with the engine.
//!
//! There is no global instance; drop the engine (or call
//! [`Engine::shutdown`]) to stop its metering clock.

pub mod buffer;
pub mod io;
pub mod render;
pub mod transport;

pub use buffer::{AudioBuffer, ChannelLayout};
pub use render::{RenderOutcome, Renderer};
pub use transport::{Transport, TransportState};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::chain::{ChainMode, SignalChain, UnitDescriptor, UnitId};
use crate::channel::{event_queue, EngineEvent, ParameterChannel, WriteState, WriteTicket};
use crate::config::EngineConfig;
use crate::dsp::{ParamDescriptor, ProcessingUnit};
use crate::error::{EngineError, Result};
use crate::gain::{GainStageController, HeadroomPolicy, HeadroomStatus, HEADROOM_POLICY};
use crate::metering::{MeterClock, MeterHub, MeterPoint, MeteringSnapshot, SubscriptionId};
use render::{MasterControls, RenderLinks};

/// Target name used in errors about the master trims
const MASTER: &str = "master";

/// Control-plane half of the engine
pub struct Engine {
    config: EngineConfig,
    gain: GainStageController,
    chain: SignalChain,
    channel: ParameterChannel,
    meters: Arc<MeterHub>,
    clock: Option<MeterClock>,
    master: Arc<MasterControls>,
    transport: Transport,
    underruns: Arc<AtomicU64>,
    reported_underruns: u64,
    input_trim_db: f32,
    output_trim_db: f32,
    shut_down: bool,
}

impl Engine {
    /// Create an engine and its renderer
    ///
    /// Validates the configuration, creates the configured default metering
    /// points and publishes the empty (identity) topology. The transport
    /// starts paused and the metering clock is not running; see
    /// [`Engine::start_metering_clock`].
    pub fn init(config: EngineConfig) -> Result<(Engine, Renderer)> {
        config.validate()?;

        let gain = GainStageController::new(
            HEADROOM_POLICY,
            config.gain_smoothing_ms,
            config.sample_rate,
        );
        let meters = Arc::new(MeterHub::new(config.meter_window_frames()));
        for name in &config.default_metering_points {
            let point: MeterPoint = name.parse()?;
            if matches!(point, MeterPoint::Unit(_)) {
                return Err(EngineError::InvalidConfig {
                    reason: format!("unit metering point '{name}' cannot exist at init"),
                });
            }
            meters.bank().create(point);
        }

        let chain = SignalChain::new(config.max_units, gain.clone(), meters.bank());
        let (sender, receiver) = event_queue(config.event_queue_capacity);
        let master = Arc::new(MasterControls::default());
        let transport = Transport::new(config.sample_rate);
        let underruns = Arc::new(AtomicU64::new(0));

        let layout = ChannelLayout::from_count(config.channels).ok_or_else(|| {
            EngineError::InvalidConfig {
                reason: format!("channels must be 1 or 2, got {}", config.channels),
            }
        })?;
        let renderer = Renderer::new(
            RenderLinks {
                topology: chain.shared_topology(),
                observed: chain.observed_generation(),
                master: Arc::clone(&master),
                transport: transport.clone(),
                events: sender,
                underruns: Arc::clone(&underruns),
            },
            &gain,
            layout,
            config.sample_rate,
            config.max_block_size,
        );

        info!(
            sample_rate = config.sample_rate,
            channels = config.channels,
            max_block_size = config.max_block_size,
            max_units = config.max_units,
            "engine initialized"
        );

        let engine = Engine {
            config,
            gain,
            chain,
            channel: ParameterChannel::new(receiver),
            meters,
            clock: None,
            master,
            transport,
            underruns,
            reported_underruns: 0,
            input_trim_db: 0.0,
            output_trim_db: 0.0,
            shut_down: false,
        };
        Ok((engine, renderer))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ========================================================================
    // Chain
    // ========================================================================

    /// Prepare a unit for the stream and append it to the chain
    pub fn connect_unit(&mut self, mut unit: Box<dyn ProcessingUnit>, mode: ChainMode) -> Result<UnitId> {
        unit.prepare(self.config.sample_rate, self.config.max_block_size);
        let cell = self.chain.connect(unit, mode, self.meters.bank())?;
        let keys = cell.params().iter().map(|p| p.key.clone()).collect();
        self.channel.register_unit(cell.id(), keys);
        Ok(cell.id())
    }

    /// Remove a unit; succeeds without effect if it is not connected
    pub fn disconnect_unit(&mut self, id: UnitId) -> Result<()> {
        if self.chain.disconnect(id, self.meters.bank())? {
            self.channel.forget_unit(id);
            self.meters.bank().remove(&MeterPoint::Unit(id));
        }
        Ok(())
    }

    /// Move a unit within the chain
    pub fn set_order(&mut self, id: UnitId, order: usize) -> Result<()> {
        self.chain.set_order(id, order, self.meters.bank())
    }

    /// Include or omit a unit from processing without disconnecting it
    pub fn set_enabled(&mut self, id: UnitId, enabled: bool) -> Result<()> {
        self.chain.set_enabled(id, enabled, self.meters.bank())
    }

    /// Descriptors of every connected unit, in chain order
    pub fn descriptors(&self) -> Vec<UnitDescriptor> {
        self.chain.descriptors()
    }

    /// Declared parameters of a unit
    pub fn parameters(&self, id: UnitId) -> Result<Vec<ParamDescriptor>> {
        Ok(self.chain.cell(id)?.params().to_vec())
    }

    /// Generation of the published topology
    pub fn generation(&self) -> u64 {
        self.chain.generation()
    }

    /// Clear a unit's internal state (filter history, envelopes)
    ///
    /// Holds the unit for the duration of the call; the renderer passes it
    /// through meanwhile and reports it busy.
    pub fn reset_unit(&mut self, id: UnitId) -> Result<()> {
        let cell = self.chain.cell(id)?;
        cell.lock_runtime().unit.reset();
        debug!(unit = %id, "unit reset");
        Ok(())
    }

    // ========================================================================
    // Parameters and gain
    // ========================================================================

    /// Bypass or re-engage a unit; visible to the very next callback
    pub fn set_bypass(&mut self, id: UnitId, bypassed: bool) -> Result<()> {
        let cell = self.chain.cell(id)?;
        cell.controls().set_bypassed(bypassed);
        self.chain.descriptor_mut(id)?.bypassed = bypassed;
        debug!(unit = %id, bypassed, "bypass set");
        Ok(())
    }

    /// Set a unit's dry/wet blend in [0, 1]
    pub fn set_mix(&mut self, id: UnitId, mix: f32) -> Result<()> {
        let cell = self.chain.cell(id)?;
        if !(mix.is_finite() && (0.0..=1.0).contains(&mix)) {
            return Err(EngineError::InvalidParameter {
                target: id.to_string(),
                key: "mix".to_string(),
                value: mix,
                reason: "mix must be within 0..=1".to_string(),
            });
        }
        cell.controls().set_mix(mix);
        self.chain.descriptor_mut(id)?.mix = mix;
        Ok(())
    }

    /// Queue a parameter write
    ///
    /// The value is validated against the unit's declared descriptor and
    /// refused (never clamped) if it does not fit. Writes to the same key are
    /// last-writer-wins; track a write with [`Engine::write_state`].
    pub fn set_parameter(&mut self, id: UnitId, key: &str, value: f32) -> Result<WriteTicket> {
        let cell = self.chain.cell(id)?;
        let invalid = |reason: String| EngineError::InvalidParameter {
            target: id.to_string(),
            key: key.to_string(),
            value,
            reason,
        };
        let index = cell
            .param_index(key)
            .ok_or_else(|| invalid(format!("unit '{}' has no such parameter", cell.kind())))?;
        cell.params()[index].check(value).map_err(&invalid)?;

        let slot = cell
            .controls()
            .param(index)
            .ok_or_else(|| invalid("parameter slot missing".to_string()))?;
        let seq = slot.write(value);
        Ok(self.channel.submit(id, index, seq))
    }

    /// State of a parameter write as of the last [`Engine::poll_events`]
    pub fn write_state(&self, ticket: &WriteTicket) -> Option<WriteState> {
        self.channel.state(ticket)
    }

    /// Set a unit's output trim in dB, in [-24, +24]
    pub fn set_unit_trim_db(&mut self, id: UnitId, trim_db: f32) -> Result<()> {
        let cell = self.chain.cell(id)?;
        let linear = self
            .gain
            .trim_to_linear(trim_db)
            .map_err(|reason| EngineError::InvalidParameter {
                target: id.to_string(),
                key: "trim_db".to_string(),
                value: trim_db,
                reason,
            })?;
        cell.controls().set_trim(linear);
        self.chain.descriptor_mut(id)?.trim_db = trim_db;
        self.check_headroom();
        Ok(())
    }

    /// Set the master input trim in dB, in [-24, +24]
    pub fn set_input_trim_db(&mut self, trim_db: f32) -> Result<()> {
        let linear = self.master_trim(trim_db, "input_trim_db")?;
        self.master.input_trim.store(linear);
        self.input_trim_db = trim_db;
        self.check_headroom();
        Ok(())
    }

    /// Set the master output trim in dB, in [-24, +24]
    pub fn set_output_trim_db(&mut self, trim_db: f32) -> Result<()> {
        let linear = self.master_trim(trim_db, "output_trim_db")?;
        self.master.output_trim.store(linear);
        self.output_trim_db = trim_db;
        self.check_headroom();
        Ok(())
    }

    pub fn input_trim_db(&self) -> f32 {
        self.input_trim_db
    }

    pub fn output_trim_db(&self) -> f32 {
        self.output_trim_db
    }

    /// The engine's fixed headroom policy
    pub fn headroom_policy(&self) -> HeadroomPolicy {
        self.gain.policy()
    }

    /// Project nominal level through the static gain of trims
    ///
    /// Unit gain is compensated at wiring time, so only the master trims and
    /// the trims of wired serial units count. Logs a warning when the
    /// projection exceeds peak headroom.
    pub fn check_headroom(&self) -> HeadroomStatus {
        let unit_trims: f32 = self
            .chain
            .descriptors()
            .iter()
            .filter(|d| d.enabled && d.mode == ChainMode::Serial)
            .map(|d| d.trim_db)
            .sum();
        self.gain
            .check_headroom(self.input_trim_db + unit_trims + self.output_trim_db)
    }

    fn master_trim(&self, trim_db: f32, key: &str) -> Result<f32> {
        self.gain
            .trim_to_linear(trim_db)
            .map_err(|reason| EngineError::InvalidParameter {
                target: MASTER.to_string(),
                key: key.to_string(),
                value: trim_db,
                reason,
            })
    }

    // ========================================================================
    // Metering
    // ========================================================================

    /// Create (or replace) the tap at a named point
    ///
    /// Names: `input`, `preProcess`, `postProcess`, `unit:<id>`,
    /// `masterLimiter`, `output`.
    pub fn create_metering_point(&mut self, name: &str) -> Result<()> {
        let point: MeterPoint = name.parse()?;
        if let MeterPoint::Unit(id) = point {
            if !self.chain.contains(id) {
                return Err(EngineError::UnitNotFound { id });
            }
        }
        self.meters.bank().create(point);
        self.chain.rebuild(self.meters.bank())?;
        debug!(point = name, "metering point created");
        Ok(())
    }

    /// Names of the existing metering points, in chain order
    pub fn metering_points(&self) -> Vec<String> {
        self.meters
            .bank()
            .points()
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    /// Latest complete window at a point
    pub fn sample(&self, name: &str) -> Result<MeteringSnapshot> {
        let point: MeterPoint = name.parse()?;
        self.meters.sample(&point)
    }

    /// Snapshots produced by the metering clock since the last drain
    pub fn drain_metering(&self) -> Vec<MeteringSnapshot> {
        self.meters.drain()
    }

    /// Pull every tap once, as the metering clock would
    pub fn tick_metering(&self) -> usize {
        self.meters.tick()
    }

    /// Start pulling taps at `metering_rate_hz` on a background thread
    pub fn start_metering_clock(&mut self) -> Result<()> {
        if self.clock.as_ref().is_some_and(MeterClock::is_running) {
            return Ok(());
        }
        self.clock = Some(MeterClock::start(
            Arc::clone(&self.meters),
            self.config.metering_rate_hz,
        )?);
        Ok(())
    }

    pub fn stop_metering_clock(&mut self) {
        if let Some(mut clock) = self.clock.take() {
            clock.stop();
        }
    }

    /// Call `callback` with every new snapshot
    ///
    /// Callbacks run on the metering clock thread (or in
    /// [`Engine::tick_metering`]) and must not call back into the engine.
    pub fn subscribe_metering(
        &self,
        callback: impl FnMut(&MeteringSnapshot) + Send + 'static,
    ) -> SubscriptionId {
        self.meters.subscribe(callback)
    }

    pub fn unsubscribe_metering(&self, id: SubscriptionId) -> bool {
        self.meters.unsubscribe(id)
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Drain render events and free topologies the renderer has moved past
    ///
    /// When the renderer had to drop events, writes still Pending are settled
    /// from each slot's applied sequence.
    pub fn poll_events(&mut self) -> Vec<EngineEvent> {
        self.chain.collect_retired();
        let events = self.channel.poll();
        if events
            .iter()
            .any(|e| matches!(e, EngineEvent::EventsDropped { .. }))
        {
            self.settle_lost_writes();
        }
        events
    }

    fn settle_lost_writes(&mut self) {
        for (unit, param) in self.channel.pending_fields() {
            let Ok(cell) = self.chain.cell(unit) else {
                continue;
            };
            if let Some(slot) = cell.controls().param(param) {
                debug!(%unit, param, applied = slot.applied(), "settling writes after dropped events");
                self.channel.settle_applied(unit, param, slot.applied());
            }
        }
    }

    /// Deadline misses reported by the renderer
    pub fn underrun_count(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    /// Fail if new underruns occurred since the previous check
    pub fn check_underruns(&mut self) -> Result<()> {
        let count = self.underrun_count();
        if count > self.reported_underruns {
            let new = count - self.reported_underruns;
            self.reported_underruns = count;
            warn!(new, total = count, "render deadline missed");
            return Err(EngineError::UnderrunDetected { count: new });
        }
        Ok(())
    }

    // ========================================================================
    // Transport
    // ========================================================================

    /// Shared transport handle
    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn play(&self) {
        self.transport.play();
    }

    pub fn pause(&self) {
        self.transport.pause();
    }

    pub fn stop(&self) {
        self.transport.stop();
    }

    /// Move the playhead to `position` seconds
    pub fn seek(&self, position: f64) {
        self.transport.seek(position);
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Pause the transport and stop the metering clock
    ///
    /// Idempotent; also run on drop.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        self.transport.pause();
        self.stop_metering_clock();
        self.chain.collect_retired();
        info!(units = self.chain.len(), underruns = self.underrun_count(), "engine shut down");
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("chain", &self.chain)
            .field("transport", &self.transport.state())
            .finish()
    }
}

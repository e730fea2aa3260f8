//! Wired topology shared with the render context
//!
//! A [`Topology`] is an immutable snapshot: rebuilding the chain produces a
//! new one and publishes it with a single atomic store. Everything the render
//! context may mutate lives behind the [`UnitCell`]s it references:
//!
//! - control-plane writes land in lock-free atomics ([`UnitControls`])
//! - the unit itself and its gain nodes sit behind a `parking_lot::Mutex`
//!   that only the render context locks, with `try_lock`

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use super::UnitId;
use crate::dsp::{ParamDescriptor, ProcessingUnit};
use crate::gain::GainNode;
use crate::metering::MeterTap;

// ============================================================================
// Atomic slots
// ============================================================================

/// f32 stored as its bit pattern
#[derive(Debug)]
pub(crate) struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub(crate) fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    #[inline]
    pub(crate) fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Acquire))
    }

    #[inline]
    pub(crate) fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Release);
    }
}

/// Latest value written to one parameter field, plus its write sequence
///
/// Single writer (control context), single reader (render context). A newer
/// write simply overwrites the value, which is what makes coalescing
/// last-writer-wins. Sequence and value share one word (sequence in the high
/// 32 bits, value bits in the low 32) so a reader never pairs a sequence with
/// another write's value.
#[derive(Debug)]
pub struct ParamSlot {
    state: AtomicU64,
    /// Newest sequence handed to the unit; written by the render context only
    applied: AtomicU64,
}

impl ParamSlot {
    fn new() -> Self {
        Self {
            state: AtomicU64::new(0),
            applied: AtomicU64::new(0),
        }
    }

    /// Store a value and return its sequence number (starting at 1)
    pub fn write(&self, value: f32) -> u64 {
        let seq = (self.state.load(Ordering::Relaxed) >> 32) + 1;
        self.state
            .store(seq << 32 | u64::from(value.to_bits()), Ordering::Release);
        seq
    }

    /// Sequence and value of the latest write, observed together
    #[inline]
    pub fn read(&self) -> (u64, f32) {
        let state = self.state.load(Ordering::Acquire);
        (state >> 32, f32::from_bits(state as u32))
    }

    /// Sequence of the latest write; 0 if never written
    #[inline]
    pub fn sequence(&self) -> u64 {
        self.read().0
    }

    /// Latest value
    #[inline]
    pub fn value(&self) -> f32 {
        self.read().1
    }

    /// Sequence of the newest write the unit has received; 0 if none
    #[inline]
    pub fn applied(&self) -> u64 {
        self.applied.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn mark_applied(&self, seq: u64) {
        self.applied.store(seq, Ordering::Release);
    }
}

/// Control-plane state of a unit, readable without locking
#[derive(Debug)]
pub struct UnitControls {
    bypassed: AtomicBool,
    mix: AtomicF32,
    trim: AtomicF32,
    compensation: AtomicF32,
    params: Vec<ParamSlot>,
}

impl UnitControls {
    fn new(param_count: usize) -> Self {
        Self {
            bypassed: AtomicBool::new(false),
            mix: AtomicF32::new(1.0),
            trim: AtomicF32::new(1.0),
            compensation: AtomicF32::new(1.0),
            params: (0..param_count).map(|_| ParamSlot::new()).collect(),
        }
    }

    pub fn set_bypassed(&self, bypassed: bool) {
        self.bypassed.store(bypassed, Ordering::Release);
    }

    pub fn bypassed(&self) -> bool {
        self.bypassed.load(Ordering::Acquire)
    }

    pub fn set_mix(&self, mix: f32) {
        self.mix.store(mix);
    }

    pub fn mix(&self) -> f32 {
        self.mix.load()
    }

    /// Linear user trim at the unit's output
    pub fn set_trim(&self, gain: f32) {
        self.trim.store(gain);
    }

    pub fn trim(&self) -> f32 {
        self.trim.load()
    }

    /// Linear compensation wired at the unit's output
    pub fn set_compensation(&self, gain: f32) {
        self.compensation.store(gain);
    }

    pub fn compensation(&self) -> f32 {
        self.compensation.load()
    }

    /// Target of the unit's output gain node
    ///
    /// Compensation is lifted while bypassed; only the user trim remains.
    #[inline]
    pub fn output_target(&self) -> f32 {
        if self.bypassed() {
            self.trim()
        } else {
            self.compensation() * self.trim()
        }
    }

    pub fn param(&self, index: usize) -> Option<&ParamSlot> {
        self.params.get(index)
    }

    pub fn params(&self) -> &[ParamSlot] {
        &self.params
    }
}

// ============================================================================
// Unit Cell
// ============================================================================

/// Render-owned state of a unit
pub(crate) struct UnitRuntime {
    pub(crate) unit: Box<dyn ProcessingUnit>,
    pub(crate) input_gain: GainNode,
    pub(crate) output_gain: GainNode,
    pub(crate) wet_gain: GainNode,
    pub(crate) dry_gain: GainNode,
    /// Bypass state last forwarded to the unit
    pub(crate) bypass_seen: bool,
    /// Whether the output node has been placed at its first target
    pub(crate) primed: bool,
}

/// A connected unit shared between control and render contexts
pub struct UnitCell {
    id: UnitId,
    kind: String,
    params: Vec<ParamDescriptor>,
    reported_trim_db: f32,
    controls: UnitControls,
    runtime: Mutex<UnitRuntime>,
}

impl UnitCell {
    /// Wrap a prepared unit
    ///
    /// Queries the unit's parameters and reported trim once, on the control
    /// side; the render context never calls them.
    pub fn new(
        id: UnitId,
        unit: Box<dyn ProcessingUnit>,
        gain_node: impl Fn(f32) -> GainNode,
    ) -> Self {
        let params = unit.describe_parameters();
        let reported_trim_db = unit.reported_gain_trim_db();
        let kind = unit.display_kind().to_string();
        let runtime = UnitRuntime {
            unit,
            input_gain: gain_node(1.0),
            output_gain: gain_node(1.0),
            wet_gain: gain_node(1.0),
            dry_gain: gain_node(0.0),
            bypass_seen: false,
            primed: false,
        };
        Self {
            id,
            kind,
            controls: UnitControls::new(params.len()),
            params,
            reported_trim_db,
            runtime: Mutex::new(runtime),
        }
    }

    pub fn id(&self) -> UnitId {
        self.id
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Parameters the unit declared when it was connected
    pub fn params(&self) -> &[ParamDescriptor] {
        &self.params
    }

    /// Index of a parameter key
    pub fn param_index(&self, key: &str) -> Option<usize> {
        self.params.iter().position(|p| p.key == key)
    }

    /// Gain change the unit reported when it was connected
    pub fn reported_trim_db(&self) -> f32 {
        self.reported_trim_db
    }

    pub fn controls(&self) -> &UnitControls {
        &self.controls
    }

    /// Render-side access; never blocks
    pub(crate) fn try_runtime(&self) -> Option<MutexGuard<'_, UnitRuntime>> {
        self.runtime.try_lock()
    }

    /// Control-side access; the render context passes the unit through
    /// while this guard is held
    pub(crate) fn lock_runtime(&self) -> MutexGuard<'_, UnitRuntime> {
        self.runtime.lock()
    }
}

impl std::fmt::Debug for UnitCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitCell")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("controls", &self.controls)
            .finish()
    }
}

// ============================================================================
// Topology
// ============================================================================

/// One wired unit plus its optional metering tap
#[derive(Debug, Clone)]
pub struct Stage {
    pub cell: Arc<UnitCell>,
    pub tap: Option<Arc<MeterTap>>,
}

/// Fixed metering taps of the master section
#[derive(Debug, Clone, Default)]
pub struct Taps {
    pub input: Option<Arc<MeterTap>>,
    pub pre_process: Option<Arc<MeterTap>>,
    pub post_process: Option<Arc<MeterTap>>,
    pub master_limiter: Option<Arc<MeterTap>>,
    pub output: Option<Arc<MeterTap>>,
}

/// Immutable, generation-stamped wiring of the chain
#[derive(Debug, Clone, Default)]
pub struct Topology {
    pub generation: u64,
    /// Chained end-to-end, in order
    pub serial: Vec<Stage>,
    /// Each fed the serial tail, then summed with it
    pub parallel: Vec<Stage>,
    /// `1 / (parallel.len() + 1)`; 1.0 without parallel units
    pub summing_gain: f32,
    pub taps: Taps,
}

impl Topology {
    /// Empty chain: pre-process feeds post-process directly
    pub fn identity(generation: u64, taps: Taps) -> Self {
        Self {
            generation,
            serial: Vec::new(),
            parallel: Vec::new(),
            summing_gain: 1.0,
            taps,
        }
    }

    /// Number of wired units
    pub fn active_units(&self) -> usize {
        self.serial.len() + self.parallel.len()
    }

    /// Ids of wired units in processing order
    pub fn unit_ids(&self) -> Vec<UnitId> {
        self.serial
            .iter()
            .chain(&self.parallel)
            .map(|stage| stage.cell.id())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::{GainUnit, Passthrough};

    #[test]
    fn test_param_slot_sequences() {
        let slot = ParamSlot::new();
        assert_eq!(slot.sequence(), 0);
        assert_eq!(slot.write(1.0), 1);
        assert_eq!(slot.write(2.0), 2);
        assert_eq!(slot.write(3.0), 3);
        assert_eq!(slot.value(), 3.0);
    }

    #[test]
    fn test_param_slot_reads_pair_together() {
        let slot = Arc::new(ParamSlot::new());
        let writer = {
            let slot = Arc::clone(&slot);
            std::thread::spawn(move || {
                for i in 1..=20_000u32 {
                    slot.write(i as f32);
                }
            })
        };
        let mut last = 0;
        while last < 20_000 {
            let (seq, value) = slot.read();
            assert!(seq >= last);
            if seq > 0 {
                assert_eq!(value, seq as f32);
            }
            last = seq;
        }
        writer.join().unwrap();
        assert_eq!(slot.read(), (20_000, 20_000.0));
    }

    #[test]
    fn test_output_target_lifts_compensation_when_bypassed() {
        let controls = UnitControls::new(0);
        controls.set_compensation(0.5);
        controls.set_trim(2.0);
        assert_eq!(controls.output_target(), 1.0);
        controls.set_bypassed(true);
        assert_eq!(controls.output_target(), 2.0);
    }

    #[test]
    fn test_cell_captures_unit_metadata() {
        let cell = UnitCell::new(UnitId::new(), Box::new(GainUnit::new(6.0)), |g| {
            GainNode::new(g, 0.0, 48000)
        });
        assert_eq!(cell.kind(), "gain");
        assert_eq!(cell.reported_trim_db(), 6.0);
        assert_eq!(cell.param_index("gain_db"), Some(0));
        assert!(cell.param_index("missing").is_none());
        assert_eq!(cell.controls().params().len(), 1);
    }

    #[test]
    fn test_identity_topology() {
        let topo = Topology::identity(3, Taps::default());
        assert_eq!(topo.active_units(), 0);
        assert_eq!(topo.summing_gain, 1.0);

        let cell = Arc::new(UnitCell::new(UnitId::new(), Box::new(Passthrough), |g| {
            GainNode::new(g, 0.0, 48000)
        }));
        let topo = Topology {
            serial: vec![Stage { cell, tap: None }],
            ..topo
        };
        assert_eq!(topo.active_units(), 1);
    }
}

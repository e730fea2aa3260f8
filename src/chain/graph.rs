//! Chain graph: descriptors, wiring and topology publication
//!
//! Every structural change goes through one transactional path: snapshot the
//! descriptor list, mutate it, build and publish a new topology. If the build
//! fails, the snapshot is restored and the previously published topology
//! stays in place, so the render context never observes a half-built chain.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::{debug, info, warn};

use super::descriptor::{ChainMode, UnitDescriptor};
use super::topology::{Stage, Topology, UnitCell};
use super::UnitId;
use crate::dsp::ProcessingUnit;
use crate::error::{EngineError, Result};
use crate::gain::GainStageController;
use crate::metering::{MeterBank, MeterPoint};

#[derive(Clone)]
struct ChainEntry {
    descriptor: UnitDescriptor,
    cell: Arc<UnitCell>,
}

/// Ordered units of one engine and the topology wired from them
pub struct SignalChain {
    max_units: usize,
    gain: GainStageController,
    entries: Vec<ChainEntry>,
    next_sequence: u64,
    generation: u64,
    current: Arc<ArcSwap<Topology>>,
    /// Newest generation the render context has rendered against
    observed: Arc<AtomicU64>,
    /// Replaced topologies, freed once `observed` reaches the paired generation
    retired: Vec<(u64, Arc<Topology>)>,
}

impl SignalChain {
    /// Create an empty chain and publish its identity topology
    pub fn new(max_units: usize, gain: GainStageController, bank: &MeterBank) -> Self {
        let identity = Topology::identity(0, bank.master_taps());
        Self {
            max_units,
            gain,
            entries: Vec::new(),
            next_sequence: 0,
            generation: 0,
            current: Arc::new(ArcSwap::from_pointee(identity)),
            observed: Arc::new(AtomicU64::new(0)),
            retired: Vec::new(),
        }
    }

    /// Handle the render context loads topologies from
    pub fn shared_topology(&self) -> Arc<ArcSwap<Topology>> {
        Arc::clone(&self.current)
    }

    /// Counter the render context stores observed generations into
    pub fn observed_generation(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.observed)
    }

    /// Generation of the published topology
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Currently published topology
    pub fn topology(&self) -> Arc<Topology> {
        self.current.load_full()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_units(&self) -> usize {
        self.max_units
    }

    pub fn contains(&self, id: UnitId) -> bool {
        self.position(id).is_some()
    }

    /// Descriptors in wiring order
    pub fn descriptors(&self) -> Vec<UnitDescriptor> {
        let mut descriptors: Vec<UnitDescriptor> =
            self.entries.iter().map(|e| e.descriptor.clone()).collect();
        descriptors.sort_by_key(UnitDescriptor::sort_key);
        descriptors
    }

    pub fn descriptor(&self, id: UnitId) -> Result<&UnitDescriptor> {
        self.position(id)
            .map(|i| &self.entries[i].descriptor)
            .ok_or(EngineError::UnitNotFound { id })
    }

    /// Mutable descriptor, for changes that do not affect wiring
    pub fn descriptor_mut(&mut self, id: UnitId) -> Result<&mut UnitDescriptor> {
        let i = self.position(id).ok_or(EngineError::UnitNotFound { id })?;
        Ok(&mut self.entries[i].descriptor)
    }

    pub fn cell(&self, id: UnitId) -> Result<Arc<UnitCell>> {
        self.position(id)
            .map(|i| Arc::clone(&self.entries[i].cell))
            .ok_or(EngineError::UnitNotFound { id })
    }

    // ========================================================================
    // Structural operations
    // ========================================================================

    /// Append a unit with `order = chain length` and rebuild
    ///
    /// The unit should already be prepared for the stream.
    pub fn connect(
        &mut self,
        unit: Box<dyn ProcessingUnit>,
        mode: ChainMode,
        bank: &MeterBank,
    ) -> Result<Arc<UnitCell>> {
        if self.entries.len() >= self.max_units {
            return Err(EngineError::CapacityExceeded {
                max_units: self.max_units,
            });
        }

        let id = UnitId::new();
        let gain = &self.gain;
        let cell = Arc::new(UnitCell::new(id, unit, |g| gain.gain_node(g)));
        let mut descriptor =
            UnitDescriptor::new(id, cell.kind(), mode, self.entries.len(), self.next_sequence);
        descriptor.compensation_db = -cell.reported_trim_db();

        let entry = ChainEntry {
            descriptor,
            cell: Arc::clone(&cell),
        };
        self.transact(bank, |entries| {
            entries.push(entry);
            Ok(())
        })?;
        self.next_sequence += 1;

        info!(unit = %id, kind = cell.kind(), %mode, generation = self.generation, "unit connected");
        Ok(cell)
    }

    /// Remove a unit, renumber the rest contiguously and rebuild
    ///
    /// Returns `false` without rebuilding if the unit is not connected.
    pub fn disconnect(&mut self, id: UnitId, bank: &MeterBank) -> Result<bool> {
        if !self.contains(id) {
            return Ok(false);
        }
        self.transact(bank, |entries| {
            entries.retain(|e| e.descriptor.id != id);
            entries.sort_by_key(|e| e.descriptor.sort_key());
            for (order, entry) in entries.iter_mut().enumerate() {
                entry.descriptor.order = order;
            }
            Ok(())
        })?;
        info!(unit = %id, generation = self.generation, "unit disconnected");
        Ok(true)
    }

    /// Move a unit to `order`; equal orders fall back to insertion sequence
    pub fn set_order(&mut self, id: UnitId, order: usize, bank: &MeterBank) -> Result<()> {
        let i = self.position(id).ok_or(EngineError::UnitNotFound { id })?;
        if self.entries[i].descriptor.order == order {
            return Ok(());
        }
        self.transact(bank, |entries| {
            entries[i].descriptor.order = order;
            Ok(())
        })?;
        debug!(unit = %id, order, "unit reordered");
        Ok(())
    }

    /// Include or omit a unit from the wired topology
    pub fn set_enabled(&mut self, id: UnitId, enabled: bool, bank: &MeterBank) -> Result<()> {
        let i = self.position(id).ok_or(EngineError::UnitNotFound { id })?;
        if self.entries[i].descriptor.enabled == enabled {
            return Ok(());
        }
        self.transact(bank, |entries| {
            entries[i].descriptor.enabled = enabled;
            Ok(())
        })?;
        debug!(unit = %id, enabled, "unit enablement changed");
        Ok(())
    }

    /// Rebuild from the current descriptors, e.g. after taps changed
    pub fn rebuild(&mut self, bank: &MeterBank) -> Result<()> {
        self.transact(bank, |_| Ok(()))
    }

    // ========================================================================
    // Reclamation
    // ========================================================================

    /// Free retired topologies the render context has moved past
    ///
    /// Returns how many retired topologies are still held.
    pub fn collect_retired(&mut self) -> usize {
        let observed = self.observed.load(Ordering::Acquire);
        self.retired.retain(|(generation, _)| *generation > observed);
        self.retired.len()
    }

    /// Drop every retired topology; only valid once rendering has stopped
    pub fn release_all(&mut self) {
        self.retired.clear();
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn position(&self, id: UnitId) -> Option<usize> {
        self.entries.iter().position(|e| e.descriptor.id == id)
    }

    fn transact<F>(&mut self, bank: &MeterBank, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut Vec<ChainEntry>) -> Result<()>,
    {
        let snapshot = self.entries.clone();
        let outcome = mutate(&mut self.entries).and_then(|_| self.publish(bank));
        if let Err(err) = outcome {
            self.entries = snapshot;
            warn!(error = %err, generation = self.generation, "chain change rolled back");
            return Err(err);
        }
        self.collect_retired();
        Ok(())
    }

    fn publish(&mut self, bank: &MeterBank) -> Result<()> {
        let mut wired: Vec<usize> = (0..self.entries.len())
            .filter(|&i| self.entries[i].descriptor.enabled)
            .collect();
        wired.sort_by_key(|&i| self.entries[i].descriptor.sort_key());

        // Validate every unit before touching any shared state
        let mut compensations = Vec::with_capacity(wired.len());
        for &i in &wired {
            let cell = &self.entries[i].cell;
            let comp = self
                .gain
                .apply_unity_compensation(cell.reported_trim_db())
                .map_err(|reason| EngineError::TopologyRebuildFailed {
                    reason: format!("unit {} ({}): {reason}", cell.id(), cell.kind()),
                })?;
            compensations.push(comp);
        }

        let mut serial = Vec::new();
        let mut parallel = Vec::new();
        for (&i, comp) in wired.iter().zip(&compensations) {
            let entry = &mut self.entries[i];
            entry.cell.controls().set_compensation(comp.linear);
            entry.descriptor.compensation_db = comp.db;

            let stage = Stage {
                cell: Arc::clone(&entry.cell),
                tap: bank.get(&MeterPoint::Unit(entry.descriptor.id)),
            };
            match entry.descriptor.mode {
                ChainMode::Serial => serial.push(stage),
                ChainMode::Parallel => parallel.push(stage),
            }
        }

        let generation = self.generation + 1;
        let summing_gain = 1.0 / (parallel.len() as f32 + 1.0);
        let topology = Topology {
            generation,
            serial,
            parallel,
            summing_gain,
            taps: bank.master_taps(),
        };
        debug!(
            generation,
            serial = topology.serial.len(),
            parallel = topology.parallel.len(),
            "topology published"
        );

        let previous = self.current.swap(Arc::new(topology));
        self.retired.push((generation, previous));
        self.generation = generation;
        Ok(())
    }
}

impl std::fmt::Debug for SignalChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalChain")
            .field("units", &self.entries.len())
            .field("generation", &self.generation)
            .field("retired", &self.retired.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::{GainUnit, ParamDescriptor, Passthrough};
    use crate::engine::AudioBuffer;
    use crate::gain::HEADROOM_POLICY;

    struct NanTrim;

    impl ProcessingUnit for NanTrim {
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
            "nan"
        }
    }

    fn chain(max_units: usize) -> (SignalChain, MeterBank) {
        let bank = MeterBank::new(480);
        let gain = GainStageController::new(HEADROOM_POLICY, 0.0, 48000);
        (SignalChain::new(max_units, gain, &bank), bank)
    }

    fn connect(chain: &mut SignalChain, bank: &MeterBank, mode: ChainMode) -> UnitId {
        chain.connect(Box::new(Passthrough), mode, bank).unwrap().id()
    }

    #[test]
    fn test_connect_appends_in_order() {
        let (mut chain, bank) = chain(8);
        let a = connect(&mut chain, &bank, ChainMode::Serial);
        let b = connect(&mut chain, &bank, ChainMode::Serial);
        let c = connect(&mut chain, &bank, ChainMode::Parallel);

        let orders: Vec<_> = chain.descriptors().iter().map(|d| (d.id, d.order)).collect();
        assert_eq!(orders, vec![(a, 0), (b, 1), (c, 2)]);

        let topo = chain.topology();
        assert_eq!(topo.generation, 3);
        assert_eq!(topo.unit_ids(), vec![a, b, c]);
        assert_eq!(topo.summing_gain, 0.5);
    }

    #[test]
    fn test_capacity_exceeded() {
        let (mut chain, bank) = chain(2);
        connect(&mut chain, &bank, ChainMode::Serial);
        connect(&mut chain, &bank, ChainMode::Serial);
        let err = chain
            .connect(Box::new(Passthrough), ChainMode::Serial, &bank)
            .unwrap_err();
        assert!(matches!(err, EngineError::CapacityExceeded { max_units: 2 }));
        assert_eq!(chain.generation(), 2);
    }

    #[test]
    fn test_disconnect_renumbers_and_is_idempotent() {
        let (mut chain, bank) = chain(8);
        let a = connect(&mut chain, &bank, ChainMode::Serial);
        let b = connect(&mut chain, &bank, ChainMode::Serial);
        let c = connect(&mut chain, &bank, ChainMode::Serial);

        assert!(chain.disconnect(b, &bank).unwrap());
        let orders: Vec<_> = chain.descriptors().iter().map(|d| (d.id, d.order)).collect();
        assert_eq!(orders, vec![(a, 0), (c, 1)]);

        let generation = chain.generation();
        assert!(!chain.disconnect(b, &bank).unwrap());
        assert_eq!(chain.generation(), generation);
    }

    #[test]
    fn test_set_order_ties_use_insertion_sequence() {
        let (mut chain, bank) = chain(8);
        let a = connect(&mut chain, &bank, ChainMode::Serial);
        let b = connect(&mut chain, &bank, ChainMode::Serial);
        let c = connect(&mut chain, &bank, ChainMode::Serial);

        chain.set_order(c, 0, &bank).unwrap();
        assert_eq!(chain.topology().unit_ids(), vec![a, c, b]);

        let err = chain.set_order(UnitId::new(), 0, &bank).unwrap_err();
        assert_eq!(err.error_code(), "UNIT_NOT_FOUND");
    }

    #[test]
    fn test_disabled_units_are_not_wired() {
        let (mut chain, bank) = chain(8);
        let a = connect(&mut chain, &bank, ChainMode::Serial);
        let b = connect(&mut chain, &bank, ChainMode::Parallel);
        chain.set_enabled(b, false, &bank).unwrap();

        let topo = chain.topology();
        assert_eq!(topo.unit_ids(), vec![a]);
        assert_eq!(topo.summing_gain, 1.0);
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn test_failed_rebuild_rolls_back() {
        let (mut chain, bank) = chain(8);
        let a = connect(&mut chain, &bank, ChainMode::Serial);
        let before = chain.topology();

        let err = chain
            .connect(Box::new(NanTrim), ChainMode::Serial, &bank)
            .unwrap_err();
        assert_eq!(err.error_code(), "TOPOLOGY_REBUILD_FAILED");
        assert_eq!(chain.len(), 1);
        assert!(Arc::ptr_eq(&chain.topology(), &before));
        assert_eq!(chain.descriptors()[0].id, a);
    }

    #[test]
    fn test_compensation_wired_from_reported_trim() {
        let (mut chain, bank) = chain(8);
        let cell = chain
            .connect(Box::new(GainUnit::new(6.0)), ChainMode::Serial, &bank)
            .unwrap();
        assert_eq!(chain.descriptor(cell.id()).unwrap().compensation_db, -6.0);
        assert!((cell.controls().compensation() - 0.501187).abs() < 1e-5);
    }

    #[test]
    fn test_retired_topologies_wait_for_render() {
        let (mut chain, bank) = chain(8);
        let observed = chain.observed_generation();
        connect(&mut chain, &bank, ChainMode::Serial);
        connect(&mut chain, &bank, ChainMode::Serial);
        assert_eq!(chain.collect_retired(), 2);

        observed.store(1, Ordering::Release);
        assert_eq!(chain.collect_retired(), 1);
        observed.store(chain.generation(), Ordering::Release);
        assert_eq!(chain.collect_retired(), 0);
    }

    #[test]
    fn test_unit_tap_wired_on_rebuild() {
        let (mut chain, bank) = chain(8);
        let a = connect(&mut chain, &bank, ChainMode::Serial);
        assert!(chain.topology().serial[0].tap.is_none());

        bank.create(MeterPoint::Unit(a));
        chain.rebuild(&bank).unwrap();
        assert!(chain.topology().serial[0].tap.is_some());
    }
}

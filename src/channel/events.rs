//! Typed messages from the render context back to the control plane

use serde::Serialize;

use crate::chain::UnitId;

/// Event posted by the render context
///
/// Plain `Copy` data so posting never allocates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RenderEvent {
    /// A parameter slot was applied to its unit
    ///
    /// Writes `first_seq..seq` were folded into this application; all but
    /// `seq` are coalesced.
    ParameterApplied {
        unit: UnitId,
        param: usize,
        first_seq: u64,
        seq: u64,
    },
    /// A bypass change reached its unit
    BypassApplied { unit: UnitId, bypassed: bool },
    /// First callback rendered against a new topology
    TopologyObserved { generation: u64 },
    /// A callback overran its deadline
    Underrun { total: u64 },
    /// A unit was locked elsewhere and passed through for one block
    UnitBusy { unit: UnitId },
}

/// Event as delivered by `Engine::poll_events`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EngineEvent {
    /// The write with ticket `seq` reached the unit
    #[serde(rename_all = "camelCase")]
    ParameterApplied {
        unit: UnitId,
        key: String,
        seq: u64,
        /// Earlier writes superseded by this one
        coalesced: u64,
    },
    #[serde(rename_all = "camelCase")]
    BypassApplied { unit: UnitId, bypassed: bool },
    #[serde(rename_all = "camelCase")]
    TopologyObserved { generation: u64 },
    #[serde(rename_all = "camelCase")]
    Underrun { total: u64 },
    #[serde(rename_all = "camelCase")]
    UnitBusy { unit: UnitId },
    /// The event ring overflowed; `count` events were lost in total
    #[serde(rename_all = "camelCase")]
    EventsDropped { count: u64 },
}

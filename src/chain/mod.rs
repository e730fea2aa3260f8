//! Signal Chain Graph
//!
//! Owns the ordered collection of units, wires them into immutable
//! [`Topology`] snapshots and publishes those to the render context.

pub mod descriptor;
pub mod graph;
pub mod topology;

pub use descriptor::{ChainMode, UnitDescriptor};
pub use graph::SignalChain;
pub use topology::{ParamSlot, Stage, Taps, Topology, UnitCell, UnitControls};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier of a connected unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(Uuid);

impl UnitId {
    /// Allocate a fresh identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UnitId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for UnitId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

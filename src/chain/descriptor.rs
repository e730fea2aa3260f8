//! Unit descriptors
//!
//! The control-side record of a connected unit. Descriptors are cheap to
//! clone; the render context never sees them.

use serde::{Deserialize, Serialize};

use super::UnitId;

/// How a unit is wired into the chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainMode {
    /// Chained end-to-end with the other serial units
    #[default]
    Serial,
    /// Fed the serial tail and summed back with the dry path
    Parallel,
}

impl std::fmt::Display for ChainMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainMode::Serial => write!(f, "serial"),
            ChainMode::Parallel => write!(f, "parallel"),
        }
    }
}

/// Control-side state of one connected unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitDescriptor {
    pub id: UnitId,
    pub display_kind: String,
    pub mode: ChainMode,
    /// Position in the chain; equal values fall back to `sequence`
    pub order: usize,
    pub bypassed: bool,
    /// Disabled units keep their descriptor but are left out of the topology
    pub enabled: bool,
    /// Dry/wet blend in [0, 1]
    pub mix: f32,
    /// Insertion counter, used as the ordering tie-break
    pub sequence: u64,
    /// Output gain wired after the unit to cancel its reported trim
    pub compensation_db: f32,
    /// User-facing output trim
    pub trim_db: f32,
}

impl UnitDescriptor {
    /// Descriptor for a freshly connected unit
    pub fn new(id: UnitId, display_kind: &str, mode: ChainMode, order: usize, sequence: u64) -> Self {
        Self {
            id,
            display_kind: display_kind.to_string(),
            mode,
            order,
            bypassed: false,
            enabled: true,
            mix: 1.0,
            sequence,
            compensation_db: 0.0,
            trim_db: 0.0,
        }
    }

    /// Key used to sort units into wiring order
    #[inline]
    pub fn sort_key(&self) -> (usize, u64) {
        (self.order, self.sequence)
    }
}

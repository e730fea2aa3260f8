//! Parameter / Metering Channel
//!
//! Control-plane writes travel to the render context through per-field
//! atomic slots (see [`ParamSlot`](crate::chain::ParamSlot)); the render
//! context answers through a lock-free event ring. This module keeps the
//! control-side ledger that turns those answers into per-write states:
//!
//! ```text
//! Pending --> Applied      (the render context applied this exact write)
//!         \-> Coalesced    (a later write to the same field won)
//! ```

pub mod events;
pub mod queue;

pub use events::{EngineEvent, RenderEvent};
pub use queue::{event_queue, EventReceiver, EventSender};

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::chain::UnitId;

/// Writes remembered per field; older states are forgotten
pub const LEDGER_DEPTH: usize = 256;

/// Receipt for one accepted `set_parameter` call
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteTicket {
    pub unit: UnitId,
    pub key: String,
    /// Position of the write within its field (starts at 1)
    pub seq: u64,
    #[serde(skip)]
    pub(crate) param: usize,
}

/// Lifecycle of a parameter write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum WriteState {
    /// Queued; not yet seen by the render context
    Pending,
    /// Applied to the unit
    Applied,
    /// Superseded by a later write to the same field before it was applied
    Coalesced,
}

/// Control-side half of the channel
pub struct ParameterChannel {
    receiver: EventReceiver,
    ledger: HashMap<(UnitId, usize), BTreeMap<u64, WriteState>>,
    keys: HashMap<UnitId, Vec<String>>,
    reported_dropped: u64,
}

impl ParameterChannel {
    pub fn new(receiver: EventReceiver) -> Self {
        Self {
            receiver,
            ledger: HashMap::new(),
            keys: HashMap::new(),
            reported_dropped: 0,
        }
    }

    /// Make a unit's parameter keys known for event translation
    pub fn register_unit(&mut self, unit: UnitId, keys: Vec<String>) {
        self.keys.insert(unit, keys);
    }

    /// Drop everything recorded about a unit
    pub fn forget_unit(&mut self, unit: UnitId) {
        self.keys.remove(&unit);
        self.ledger.retain(|(id, _), _| *id != unit);
    }

    /// Record a write the control plane just stored in its slot
    pub fn submit(&mut self, unit: UnitId, param: usize, seq: u64) -> WriteTicket {
        let field = self.ledger.entry((unit, param)).or_default();
        field.insert(seq, WriteState::Pending);
        while field.len() > LEDGER_DEPTH {
            field.pop_first();
        }
        WriteTicket {
            unit,
            key: self.key_name(unit, param),
            seq,
            param,
        }
    }

    /// State of a write, as of the last [`ParameterChannel::poll`]
    ///
    /// `None` once the ticket has aged out of the ledger or its unit is gone.
    pub fn state(&self, ticket: &WriteTicket) -> Option<WriteState> {
        self.ledger
            .get(&(ticket.unit, ticket.param))
            .and_then(|field| field.get(&ticket.seq))
            .copied()
    }

    /// Drain render events, settle the ledger and translate for the caller
    pub fn poll(&mut self) -> Vec<EngineEvent> {
        let mut out = Vec::new();
        for event in self.receiver.drain() {
            out.push(match event {
                RenderEvent::ParameterApplied {
                    unit,
                    param,
                    first_seq,
                    seq,
                } => {
                    self.settle(unit, param, first_seq, seq);
                    EngineEvent::ParameterApplied {
                        unit,
                        key: self.key_name(unit, param),
                        seq,
                        coalesced: seq.saturating_sub(first_seq),
                    }
                }
                RenderEvent::BypassApplied { unit, bypassed } => {
                    EngineEvent::BypassApplied { unit, bypassed }
                }
                RenderEvent::TopologyObserved { generation } => {
                    EngineEvent::TopologyObserved { generation }
                }
                RenderEvent::Underrun { total } => EngineEvent::Underrun { total },
                RenderEvent::UnitBusy { unit } => EngineEvent::UnitBusy { unit },
            });
        }

        let dropped = self.receiver.dropped();
        if dropped > self.reported_dropped {
            self.reported_dropped = dropped;
            out.push(EngineEvent::EventsDropped { count: dropped });
        }
        out
    }

    /// Fields with at least one write still Pending
    pub fn pending_fields(&self) -> Vec<(UnitId, usize)> {
        self.ledger
            .iter()
            .filter(|(_, field)| field.values().any(|s| *s == WriteState::Pending))
            .map(|(&field, _)| field)
            .collect()
    }

    /// Settle a field from the newest sequence its unit has received
    ///
    /// For use once events were lost: `applied` resolves as Applied and older
    /// Pending writes as Coalesced, since which of them reached the unit on
    /// its own is no longer known.
    pub fn settle_applied(&mut self, unit: UnitId, param: usize, applied: u64) {
        if applied > 0 {
            self.settle(unit, param, 1, applied);
        }
    }

    fn settle(&mut self, unit: UnitId, param: usize, first_seq: u64, seq: u64) {
        let Some(field) = self.ledger.get_mut(&(unit, param)) else {
            return;
        };
        for (&s, state) in field.range_mut(first_seq..=seq) {
            if *state == WriteState::Pending {
                *state = if s == seq {
                    WriteState::Applied
                } else {
                    WriteState::Coalesced
                };
            }
        }
    }

    fn key_name(&self, unit: UnitId, param: usize) -> String {
        self.keys
            .get(&unit)
            .and_then(|keys| keys.get(param))
            .cloned()
            .unwrap_or_else(|| format!("#{param}"))
    }
}

//! Metering Subsystem
//!
//! Passive taps at fixed points of the chain, a registry of the points that
//! exist, and the control-side hub that turns tap windows into
//! [`MeteringSnapshot`]s at a fixed cadence, independent of the render
//! callback rate.

pub mod clock;
pub mod snapshot;
pub mod tap;

pub use clock::MeterClock;
pub use snapshot::MeteringSnapshot;
pub use tap::{MeterTap, WindowReading};

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::chain::{Taps, UnitId};
use crate::error::{EngineError, Result};

/// Snapshots kept for `drain_metering` before the oldest are dropped
pub const OUTBOX_CAPACITY: usize = 256;

// ============================================================================
// Metering Points
// ============================================================================

/// Where in the chain a tap sits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MeterPoint {
    /// Engine input, before any gain
    Input,
    /// After the master input trim
    PreProcess,
    /// After the chain, before the master output trim
    PostProcess,
    /// After one unit's output gain
    Unit(UnitId),
    /// After the master limiter; also reports its gain reduction
    MasterLimiter,
    /// Final output
    Output,
}

impl fmt::Display for MeterPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeterPoint::Input => write!(f, "input"),
            MeterPoint::PreProcess => write!(f, "preProcess"),
            MeterPoint::PostProcess => write!(f, "postProcess"),
            MeterPoint::Unit(id) => write!(f, "unit:{id}"),
            MeterPoint::MasterLimiter => write!(f, "masterLimiter"),
            MeterPoint::Output => write!(f, "output"),
        }
    }
}

impl FromStr for MeterPoint {
    type Err = EngineError;

    fn from_str(name: &str) -> Result<Self> {
        let unknown = || EngineError::UnknownMeteringPoint {
            name: name.to_string(),
        };
        match name {
            "input" => Ok(MeterPoint::Input),
            "preProcess" => Ok(MeterPoint::PreProcess),
            "postProcess" => Ok(MeterPoint::PostProcess),
            "masterLimiter" => Ok(MeterPoint::MasterLimiter),
            "output" => Ok(MeterPoint::Output),
            _ => {
                let id = name.strip_prefix("unit:").ok_or_else(unknown)?;
                id.parse().map(MeterPoint::Unit).map_err(|_| unknown())
            }
        }
    }
}

// ============================================================================
// Meter Bank
// ============================================================================

/// Registry of the taps that currently exist
#[derive(Debug)]
pub struct MeterBank {
    window_frames: usize,
    taps: RwLock<BTreeMap<MeterPoint, Arc<MeterTap>>>,
}

impl MeterBank {
    pub fn new(window_frames: usize) -> Self {
        Self {
            window_frames,
            taps: RwLock::new(BTreeMap::new()),
        }
    }

    /// Create a tap at `point`, replacing any existing one
    pub fn create(&self, point: MeterPoint) -> Arc<MeterTap> {
        let tap = Arc::new(MeterTap::new(self.window_frames));
        self.taps.write().insert(point, Arc::clone(&tap));
        tap
    }

    /// Remove a tap; returns whether it existed
    pub fn remove(&self, point: &MeterPoint) -> bool {
        self.taps.write().remove(point).is_some()
    }

    pub fn get(&self, point: &MeterPoint) -> Option<Arc<MeterTap>> {
        self.taps.read().get(point).cloned()
    }

    /// Points with a tap, in chain order
    pub fn points(&self) -> Vec<MeterPoint> {
        self.taps.read().keys().copied().collect()
    }

    /// Taps of the master section, for wiring into a topology
    pub fn master_taps(&self) -> Taps {
        let taps = self.taps.read();
        Taps {
            input: taps.get(&MeterPoint::Input).cloned(),
            pre_process: taps.get(&MeterPoint::PreProcess).cloned(),
            post_process: taps.get(&MeterPoint::PostProcess).cloned(),
            master_limiter: taps.get(&MeterPoint::MasterLimiter).cloned(),
            output: taps.get(&MeterPoint::Output).cloned(),
        }
    }

    fn entries(&self) -> Vec<(MeterPoint, Arc<MeterTap>)> {
        self.taps
            .read()
            .iter()
            .map(|(point, tap)| (*point, Arc::clone(tap)))
            .collect()
    }
}

// ============================================================================
// Meter Hub
// ============================================================================

/// Handle returned by [`MeterHub::subscribe`]
pub type SubscriptionId = u64;

type Subscriber = Box<dyn FnMut(&MeteringSnapshot) + Send>;

/// Control-side collection point for metering
///
/// Owned by the engine and shared with the [`MeterClock`] thread. Subscribers
/// are called from whichever thread runs [`MeterHub::tick`] and must not call
/// back into the hub.
pub struct MeterHub {
    bank: MeterBank,
    outbox: Mutex<VecDeque<MeteringSnapshot>>,
    subscribers: Mutex<Vec<(SubscriptionId, Subscriber)>>,
    next_subscription: AtomicU64,
}

impl MeterHub {
    pub fn new(window_frames: usize) -> Self {
        Self {
            bank: MeterBank::new(window_frames),
            outbox: Mutex::new(VecDeque::with_capacity(OUTBOX_CAPACITY)),
            subscribers: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
        }
    }

    pub fn bank(&self) -> &MeterBank {
        &self.bank
    }

    /// Latest complete window at `point`
    pub fn sample(&self, point: &MeterPoint) -> Result<MeteringSnapshot> {
        let tap = self
            .bank
            .get(point)
            .ok_or_else(|| EngineError::UnknownMeteringPoint {
                name: point.to_string(),
            })?;
        Ok(match tap.latest() {
            Some(reading) => MeteringSnapshot::from_reading(point.to_string(), &reading),
            None => MeteringSnapshot::silent(point.to_string()),
        })
    }

    /// Pull every tap's newest unseen window
    ///
    /// Snapshots go to the outbox and to every subscriber. Returns the number
    /// of snapshots produced.
    pub fn tick(&self) -> usize {
        let fresh: Vec<MeteringSnapshot> = self
            .bank
            .entries()
            .into_iter()
            .filter_map(|(point, tap)| {
                tap.take_new()
                    .map(|reading| MeteringSnapshot::from_reading(point.to_string(), &reading))
            })
            .collect();
        if fresh.is_empty() {
            return 0;
        }

        {
            let mut outbox = self.outbox.lock();
            for snapshot in &fresh {
                if outbox.len() == OUTBOX_CAPACITY {
                    outbox.pop_front();
                }
                outbox.push_back(snapshot.clone());
            }
        }

        let mut subscribers = self.subscribers.lock();
        for (_, subscriber) in subscribers.iter_mut() {
            for snapshot in &fresh {
                subscriber(snapshot);
            }
        }
        fresh.len()
    }

    /// Take every snapshot produced since the last drain
    pub fn drain(&self) -> Vec<MeteringSnapshot> {
        self.outbox.lock().drain(..).collect()
    }

    /// Register a callback for every new snapshot
    pub fn subscribe(&self, callback: impl FnMut(&MeteringSnapshot) + Send + 'static) -> SubscriptionId {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().push((id, Box::new(callback)));
        debug!(subscription = id, "metering subscriber added");
        id
    }

    /// Remove a subscription; returns whether it existed
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }
}

impl fmt::Debug for MeterHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeterHub")
            .field("bank", &self.bank)
            .field("subscribers", &self.subscribers.lock().len())
            .finish()
    }
}

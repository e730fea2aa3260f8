//! Fixed-rate metering clock
//!
//! A control-side thread that calls [`MeterHub::tick`] at the configured
//! rate. It never touches the render context; it only reads tap slots.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info};

use super::MeterHub;
use crate::error::Result;

/// Running metering clock; stops when dropped
#[derive(Debug)]
pub struct MeterClock {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl MeterClock {
    /// Spawn the clock thread
    ///
    /// # Arguments
    /// * `hub` - Hub to tick
    /// * `rate_hz` - Ticks per second
    pub fn start(hub: Arc<MeterHub>, rate_hz: f32) -> Result<Self> {
        let period = Duration::from_secs_f32(1.0 / rate_hz);
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);

        let handle = thread::Builder::new()
            .name("gainstage-meter-clock".to_string())
            .spawn(move || {
                let mut ticks = 0u64;
                loop {
                    thread::park_timeout(period);
                    if flag.load(Ordering::Acquire) {
                        break;
                    }
                    hub.tick();
                    ticks += 1;
                }
                debug!(ticks, "metering clock exited");
            })?;

        info!(rate_hz, "metering clock started");
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Whether the clock thread is still running
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the thread and wait for it
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.stop.store(true, Ordering::Release);
        handle.thread().unpark();
        let _ = handle.join();
        info!("metering clock stopped");
    }
}

impl Drop for MeterClock {
    fn drop(&mut self) {
        self.stop();
    }
}

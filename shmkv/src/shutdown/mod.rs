//! Drain-and-exit coordination.
//!
//! Two states, Running and Stopping, transitioning once and never back.
//! The transition clears the shared running flag and broadcasts the ring's
//! conditions so every parked consumer returns the stop result and every
//! parked producer is rejected. The termination signal is routed through
//! an explicit handle rather than a global pointer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use log::{error, info};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;

use crate::errors::ShmKvError;
use crate::queue::RequestQueue;

pub struct ShutdownCoordinator {
    stopping: AtomicBool,
}

impl ShutdownCoordinator {
    pub fn new() -> ShutdownCoordinator {
        ShutdownCoordinator {
            stopping: AtomicBool::new(false),
        }
    }

    /// Performs the Running→Stopping transition exactly once; later calls
    /// are no-ops.
    pub fn trigger(&self, queue: &RequestQueue) -> Result<(), ShmKvError> {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("shutdown signaled; waking blocked consumers and producers");
        queue.signal_shutdown()
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Spawns a thread that turns the first SIGINT/SIGTERM into one
    /// `trigger` call. The core registers no OS handler beyond this
    /// iterator thread, which dies with the process.
    pub fn install_signal_handler(
        self: Arc<Self>,
        queue: Arc<RequestQueue>,
    ) -> Result<(), ShmKvError> {
        let coordinator = self;
        let mut signals = Signals::new(&[SIGINT, SIGTERM])?;
        thread::spawn(move || {
            for signal in signals.forever() {
                info!("received signal {}", signal);
                if let Err(e) = coordinator.trigger(&queue) {
                    error!("shutdown transition failed: {}", e);
                }
                break;
            }
        });
        Ok(())
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        ShutdownCoordinator::new()
    }
}

//! Background refill worker.
//!
//! One thread per controller drains the refill queue, issuing the blocking
//! READ BUFFER per node. Scheduling is coalescing: `kick` while a pass is
//! pending or running is a no-op, and the running pass picks up nodes
//! queued behind it before sleeping.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::Engine;

/// Wakeup and lifecycle flags shared between the controller, the response
/// processor, and the worker thread.
pub(crate) struct WorkSignal {
    pending: Mutex<bool>,
    wakeup: Condvar,
    shutdown: AtomicBool,
    suspended: AtomicBool,
}

impl WorkSignal {
    pub(crate) fn new() -> Self {
        Self {
            pending: Mutex::new(false),
            wakeup: Condvar::new(),
            shutdown: AtomicBool::new(false),
            suspended: AtomicBool::new(false),
        }
    }

    /// Request a drain pass. Idempotent.
    pub(crate) fn kick(&self) {
        let mut pending = self.pending.lock();
        if !*pending {
            *pending = true;
            self.wakeup.notify_one();
        }
    }

    /// Flag shutdown and wake the worker so it can exit.
    pub(crate) fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let _pending = self.pending.lock();
        self.wakeup.notify_one();
    }

    pub(crate) fn set_suspended(&self, value: bool) {
        self.suspended.store(value, Ordering::SeqCst);
    }

    pub(crate) fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst)
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Block until work is requested. Returns `false` on shutdown.
    fn wait_for_work(&self) -> bool {
        let mut pending = self.pending.lock();
        while !*pending && !self.is_shutdown() {
            self.wakeup.wait(&mut pending);
        }
        *pending = false;
        !self.is_shutdown()
    }
}

/// Spawn the refill thread for an engine.
pub(crate) fn spawn_refill_thread(engine: Arc<Engine>) -> JoinHandle<()> {
    std::thread::spawn(move || {
        while engine.signal.wait_for_work() {
            engine.drain_refills();
        }
        tracing::debug!("refill worker exiting");
    })
}

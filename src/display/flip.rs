//! Flip handshake between the render task and the vblank interrupt.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Binary semaphore: any number of signals before a wait count as one
#[derive(Debug, Default)]
pub struct FlipSync {
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl FlipSync {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) {
        let mut signaled = self.signaled.lock().unwrap_or_else(|e| e.into_inner());
        *signaled = true;
        self.cond.notify_one();
    }

    /// Drop a signal nobody waited for
    pub fn reset(&self) {
        *self.signaled.lock().unwrap_or_else(|e| e.into_inner()) = false;
    }

    /// Block until signalled; false when `timeout` ran out first
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let signaled = self.signaled.lock().unwrap_or_else(|e| e.into_inner());
        let (mut signaled, _) = self
            .cond
            .wait_timeout_while(signaled, timeout, |s| !*s)
            .unwrap_or_else(|e| e.into_inner());
        let got = *signaled;
        *signaled = false;
        got
    }
}

/// State shared with the vblank handler
#[derive(Debug)]
pub struct FlipState {
    pub sync: FlipSync,
    flip_done: AtomicBool,
}

impl FlipState {
    pub fn new() -> Self {
        Self {
            sync: FlipSync::new(),
            flip_done: AtomicBool::new(true),
        }
    }

    pub fn is_done(&self) -> bool {
        self.flip_done.load(Ordering::Acquire)
    }

    /// Arm before handing a new frame to the controller
    pub fn begin(&self) {
        self.sync.reset();
        self.flip_done.store(false, Ordering::Release);
    }

    pub fn finish(&self) {
        self.flip_done.store(true, Ordering::Release);
    }

    /// Vblank side: release the waiter once per armed flip
    pub fn on_vblank(&self) {
        if !self.flip_done.swap(true, Ordering::AcqRel) {
            self.sync.signal();
        }
    }
}

impl Default for FlipState {
    fn default() -> Self {
        Self::new()
    }
}

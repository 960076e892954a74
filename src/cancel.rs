//! Cooperative cancellation.
//!
//! A [`StopSource`] is held by whoever owns a build or test run (normally the
//! UI). Every coordinator and task receives a [`StopToken`] and polls it between
//! units of work. The flag is level-triggered: once a stop is requested it stays
//! requested for the remainder of the run.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Owner side of the stop flag. Only the holder can request a stop.
#[derive(Debug, Default)]
pub struct StopSource {
    flag: Arc<AtomicBool>,
}

impl StopSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out a read-only view of the flag.
    pub fn token(&self) -> StopToken {
        StopToken {
            flag: Arc::clone(&self.flag),
        }
    }

    pub fn request_stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Read-only, cheaply clonable view of a [`StopSource`].
#[derive(Debug, Clone)]
pub struct StopToken {
    flag: Arc<AtomicBool>,
}

impl StopToken {
    /// A token that can never be triggered.
    pub fn never() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

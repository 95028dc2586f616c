//! A manually-advanced clock for TTL/expiration tests.
//!
//! Ported from the reference crate's `FakeTimeSource` (`src/image/cache/tests.rs`).

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::RwLock;

use crate::clock::TimeSource;

#[derive(Clone)]
pub struct FakeTimeSource(Arc<RwLock<SystemTime>>);

impl FakeTimeSource {
    pub fn new(start: SystemTime) -> Self {
        Self(Arc::new(RwLock::new(start)))
    }

    pub fn advance(&self, delta: Duration) {
        *self.0.write() += delta;
    }
}

impl Default for FakeTimeSource {
    fn default() -> Self {
        Self::new(SystemTime::UNIX_EPOCH)
    }
}

impl TimeSource for FakeTimeSource {
    fn now(&self) -> SystemTime {
        *self.0.read()
    }
}

/// Wall-clock abstraction
///
/// Every expiry, lockout window and snapshot boundary is computed from an
/// injected clock so tests can move time without sleeping. All times are UTC.
use chrono::{DateTime, Utc};
use std::fmt;

/// Source of the current time
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the system time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

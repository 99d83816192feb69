use chrono::{DateTime, Utc};
#[cfg(test)] use mockall::automock;

/// Source of the current UTC time, introduced to make timestamp-dependent receive logic
///  testable without waiting for the wall clock
#[cfg_attr(test, automock)]
pub trait UtcClock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemUtcClock;

impl UtcClock for SystemUtcClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A shared cancellation flag. Units poll it at every wake-up - it never interrupts a
///  pending operation, so every blocking wait in a unit must be bounded by a timeout.
#[derive(Clone, Debug, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
}
impl StopSignal {
    pub fn new() -> StopSignal {
        StopSignal::default()
    }

    pub fn request_stop(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_is_shared_between_clones() {
        let signal = StopSignal::new();
        let other = signal.clone();
        assert!(!other.is_stop_requested());

        signal.request_stop();
        assert!(other.is_stop_requested());
        assert!(signal.is_stop_requested());
    }
}

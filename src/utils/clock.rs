use std::sync::Arc;
use std::time::Instant;
#[cfg(test)]
use std::sync::Mutex;
#[cfg(test)]
use std::time::Duration;

// ============================================================================
// Clock Abstraction
// ============================================================================
//
// Visibility timeouts, archive retention and alarm windows all read time
// through this trait so tests can drive them deterministically.
//
// ============================================================================

/// A source of monotonic time
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Shared handle passed into every time-aware component
pub type SharedClock = Arc<dyn Clock>;

/// Real system clock
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn shared() -> SharedClock {
        Arc::new(SystemClock)
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually advanced clock for tests
#[cfg(test)]
#[derive(Clone, Debug)]
pub struct FakeClock {
    current: Arc<Mutex<Instant>>,
}

#[cfg(test)]
impl FakeClock {
    pub fn new() -> Self {
        Self {
            current: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn advance(&self, duration: Duration) {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        *current += duration;
    }

    pub fn shared(&self) -> SharedClock {
        Arc::new(self.clone())
    }
}

#[cfg(test)]
impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
impl Clock for FakeClock {
    fn now(&self) -> Instant {
        *self.current.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fake_clock_advances_shared_handles() {
        let clock = FakeClock::new();
        let shared = clock.shared();
        let start = shared.now();

        clock.advance(Duration::from_secs(30));

        assert_eq!(shared.now().duration_since(start), Duration::from_secs(30));
    }

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock;
        let t1 = clock.now();
        let t2 = clock.now();
        assert!(t2 >= t1);
    }
}

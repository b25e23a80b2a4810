//! Injectable time and id generation, per SPEC_FULL.md §6
//! (`Clock::now()`, `IdGen::new()`). Production code uses [`SystemClock`] and
//! [`UuidGen`]; tests substitute a controllable clock to exercise debounce
//! and expiry windows deterministically.

use chrono::{DateTime, Utc};
use uuid::Uuid;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

pub trait IdGen: Send + Sync {
    fn new_id(&self) -> Uuid;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct UuidGen;

impl IdGen for UuidGen {
    fn new_id(&self) -> Uuid {
        Uuid::new_v4()
    }
}

#[cfg(test)]
pub mod test_support {
    use super::{Clock, IdGen};
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;
    use uuid::Uuid;

    /// A clock whose `now()` is set explicitly by the test and advanced with
    /// [`FixedClock::advance`]. Lets tests hit debounce/expiry boundaries
    /// exactly instead of racing real wall-clock time.
    pub struct FixedClock {
        current: Mutex<DateTime<Utc>>,
    }

    impl FixedClock {
        #[must_use]
        pub fn new(start: DateTime<Utc>) -> Self {
            Self {
                current: Mutex::new(start),
            }
        }

        pub fn advance(&self, duration: chrono::Duration) {
            let mut guard = self.current.lock().expect("clock mutex poisoned");
            *guard += duration;
        }

        pub fn set(&self, at: DateTime<Utc>) {
            *self.current.lock().expect("clock mutex poisoned") = at;
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            *self.current.lock().expect("clock mutex poisoned")
        }
    }

    /// Deterministic, monotonically increasing id generator for snapshot
    /// assertions in tests.
    #[derive(Default)]
    pub struct SequentialIdGen {
        counter: AtomicU64,
    }

    impl IdGen for SequentialIdGen {
        fn new_id(&self) -> Uuid {
            let n = self.counter.fetch_add(1, Ordering::SeqCst);
            Uuid::from_u128(u128::from(n) + 1)
        }
    }
}

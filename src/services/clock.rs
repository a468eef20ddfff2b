//! Virtual clock for deterministic schedule/timeout tests (§9 "Cron
//! state" design note).
//!
//! Grounded on [`crate::domain::ports::Clock`]: production code takes
//! `&dyn Clock` and is handed [`crate::domain::ports::SystemClock`];
//! tests hand it a [`VirtualClock`] and advance it explicitly instead of
//! sleeping real wall-clock time.

use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::domain::ports::Clock;

pub struct VirtualClock {
    now: Mutex<DateTime<Utc>>,
}

impl VirtualClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, delta: chrono::Duration) {
        let mut now = self.now.lock().expect("virtual clock mutex poisoned");
        *now += delta;
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().expect("virtual clock mutex poisoned") = now;
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("virtual clock mutex poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn advance_moves_now_forward() {
        let clock = VirtualClock::at(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
        clock.advance(chrono::Duration::hours(2));
        assert_eq!(clock.now(), Utc.with_ymd_and_hms(2026, 1, 1, 2, 0, 0).unwrap());
    }
}

use std::sync::{Arc, Mutex};

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Utc};

/// Source of the current instant, injected so time-gated rules can be exercised in tests.
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

/// Manually driven clock.
#[derive(Debug, Clone)]
pub struct FixedClock {
    instant: Arc<Mutex<DateTime<Utc>>>,
}

impl FixedClock {
    pub fn new(instant: DateTime<Utc>) -> Self {
        Self {
            instant: Arc::new(Mutex::new(instant)),
        }
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        let mut guard = self
            .instant
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = instant;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut guard = self
            .instant
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self
            .instant
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Clock paired with the school's UTC offset. Slot dates and times are wall-clock values
/// at the school, so every past/live/future check goes through `local_now`.
#[derive(Clone)]
pub struct SchoolClock {
    clock: Arc<dyn Clock>,
    offset: FixedOffset,
}

impl SchoolClock {
    pub fn new(clock: Arc<dyn Clock>, offset: FixedOffset) -> Self {
        Self { clock, offset }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn local_now(&self) -> NaiveDateTime {
        self.clock.now().with_timezone(&self.offset).naive_local()
    }

    pub fn local_today(&self) -> NaiveDate {
        self.local_now().date()
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }
}

impl std::fmt::Debug for SchoolClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchoolClock")
            .field("offset", &self.offset)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn local_now_applies_school_offset() {
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2026, 11, 2, 3, 30, 0).unwrap());
        let offset = FixedOffset::east_opt(330 * 60).expect("valid offset");
        let school = SchoolClock::new(Arc::new(clock.clone()), offset);

        assert_eq!(school.local_now().to_string(), "2026-11-02 09:00:00");

        clock.advance(chrono::Duration::hours(15));
        assert_eq!(school.local_today().to_string(), "2026-11-03");
    }
}

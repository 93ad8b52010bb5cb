use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::clock::SchoolClock;
use super::domain::{Slot, SlotId, SlotStatus, SlotView};
use super::error::SchedulingError;
use super::ledger::SlotLedger;
use super::policy::SchedulingPolicy;
use super::store::{retry_on_conflict, AdmissionsStore, ChangeSet, Guard};

const MAX_BULK_DAYS: i64 = 366;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotRequest {
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    #[serde(default)]
    pub capacity: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

/// Generates slots of `duration_minutes` inside each window on every day of the range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkSlotRequest {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub windows: Vec<TimeWindow>,
    pub duration_minutes: u32,
    #[serde(default)]
    pub gap_minutes: u32,
    /// Cap on slots per day, counting slots that already exist on that day.
    #[serde(default)]
    pub max_per_day: Option<u32>,
    #[serde(default)]
    pub capacity: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Overlap,
    InPast,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedSlot {
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BulkOutcome {
    pub created: Vec<SlotView>,
    pub skipped: Vec<SkippedSlot>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotUpdate {
    #[serde(default)]
    pub status: Option<SlotStatus>,
    #[serde(default)]
    pub capacity: Option<u32>,
}

/// Administrative slot maintenance.
pub struct SlotPlanner<S> {
    store: Arc<S>,
    clock: SchoolClock,
    policy: SchedulingPolicy,
}

impl<S> SlotPlanner<S>
where
    S: AdmissionsStore + 'static,
{
    pub fn new(store: Arc<S>, clock: SchoolClock, policy: SchedulingPolicy) -> Self {
        Self {
            store,
            clock,
            policy,
        }
    }

    fn validate_window(&self, start: NaiveTime, end: NaiveTime) -> Result<(), SchedulingError> {
        if end <= start {
            return Err(SchedulingError::InvalidTimeRange { start, end });
        }
        let minutes = (end - start).num_minutes();
        if minutes < i64::from(self.policy.min_slot_minutes) {
            return Err(SchedulingError::DurationTooShort {
                minimum: self.policy.min_slot_minutes,
                requested: minutes,
            });
        }
        Ok(())
    }

    fn capacity_or_default(&self, capacity: Option<u32>) -> Result<u32, SchedulingError> {
        match capacity {
            Some(0) => Err(SchedulingError::Validation(
                "capacity must be a positive integer".to_string(),
            )),
            Some(capacity) => Ok(capacity),
            None => Ok(self.policy.default_slot_capacity.max(1)),
        }
    }

    fn new_slot(&self, date: NaiveDate, start: NaiveTime, end: NaiveTime, capacity: u32) -> Slot {
        Slot {
            id: SlotId::next(),
            date,
            start_time: start,
            end_time: end,
            capacity,
            booked_count: 0,
            status: SlotStatus::Available,
            created_at: self.clock.now(),
            version: 0,
        }
    }

    pub fn create(&self, request: SlotRequest) -> Result<SlotView, SchedulingError> {
        let start = truncate_to_minute(request.start_time);
        let end = truncate_to_minute(request.end_time);
        self.validate_window(start, end)?;
        let capacity = self.capacity_or_default(request.capacity)?;
        if request.date.and_time(start) <= self.clock.local_now() {
            return Err(SchedulingError::StartsInPast {
                date: request.date,
                start,
            });
        }

        let slot = retry_on_conflict(self.policy.max_commit_attempts, || {
            if let Some(existing) = self
                .store
                .slots()?
                .into_iter()
                .find(|slot| slot.overlaps(request.date, start, end))
            {
                return Err(SchedulingError::SlotOverlap {
                    date: request.date,
                    start,
                    end,
                    existing: existing.id,
                });
            }

            let slot = self.new_slot(request.date, start, end, capacity);
            let mut changes = ChangeSet::new();
            changes.put_slot(slot.clone()).guard(Guard::NoOverlap {
                date: slot.date,
                start,
                end,
            });
            self.store.commit(changes)?;
            Ok(slot)
        })?;

        info!(slot = %slot.id, date = %slot.date, start = %slot.start_time, capacity, "slot created");
        Ok(slot.view())
    }

    pub fn generate(&self, request: BulkSlotRequest) -> Result<BulkOutcome, SchedulingError> {
        if request.end_date < request.start_date {
            return Err(SchedulingError::Validation(
                "end_date must not precede start_date".to_string(),
            ));
        }
        if (request.end_date - request.start_date).num_days() >= MAX_BULK_DAYS {
            return Err(SchedulingError::Validation(format!(
                "bulk generation is limited to {MAX_BULK_DAYS} days"
            )));
        }
        if request.windows.is_empty() {
            return Err(SchedulingError::Validation(
                "at least one time window is required".to_string(),
            ));
        }
        if request.duration_minutes < self.policy.min_slot_minutes {
            return Err(SchedulingError::DurationTooShort {
                minimum: self.policy.min_slot_minutes,
                requested: i64::from(request.duration_minutes),
            });
        }
        for window in &request.windows {
            if window.end <= window.start {
                return Err(SchedulingError::InvalidTimeRange {
                    start: window.start,
                    end: window.end,
                });
            }
        }
        let capacity = self.capacity_or_default(request.capacity)?;

        let outcome = retry_on_conflict(self.policy.max_commit_attempts, || {
            self.try_generate(&request, capacity)
        })?;

        info!(
            created = outcome.created.len(),
            skipped = outcome.skipped.len(),
            from = %request.start_date,
            to = %request.end_date,
            "bulk slot generation finished"
        );
        Ok(outcome)
    }

    fn try_generate(
        &self,
        request: &BulkSlotRequest,
        capacity: u32,
    ) -> Result<BulkOutcome, SchedulingError> {
        let existing = self.store.slots()?;
        let local_now = self.clock.local_now();
        let duration = Duration::minutes(i64::from(request.duration_minutes));
        let step = duration + Duration::minutes(i64::from(request.gap_minutes));

        let mut windows = request.windows.clone();
        windows.sort_by_key(|window| window.start);

        let mut outcome = BulkOutcome::default();
        let mut created: Vec<Slot> = Vec::new();
        let mut changes = ChangeSet::new();

        let mut date = request.start_date;
        while date <= request.end_date {
            let mut per_day = existing.iter().filter(|slot| slot.date == date).count() as u32;

            'windows: for window in &windows {
                let mut cursor = truncate_to_minute(window.start);
                loop {
                    let (end, wrapped) = cursor.overflowing_add_signed(duration);
                    if wrapped != 0 || end > window.end {
                        break;
                    }
                    if request.max_per_day.is_some_and(|max| per_day >= max) {
                        break 'windows;
                    }

                    let skip = if date.and_time(cursor) <= local_now {
                        Some(SkipReason::InPast)
                    } else if existing
                        .iter()
                        .chain(created.iter())
                        .any(|slot| slot.overlaps(date, cursor, end))
                    {
                        Some(SkipReason::Overlap)
                    } else {
                        None
                    };

                    match skip {
                        Some(reason) => outcome.skipped.push(SkippedSlot {
                            date,
                            start_time: cursor,
                            end_time: end,
                            reason,
                        }),
                        None => {
                            let slot = self.new_slot(date, cursor, end, capacity);
                            changes.put_slot(slot.clone()).guard(Guard::NoOverlap {
                                date,
                                start: cursor,
                                end,
                            });
                            created.push(slot);
                            per_day += 1;
                        }
                    }

                    let (next, wrapped) = cursor.overflowing_add_signed(step);
                    if wrapped != 0 || next <= cursor {
                        break;
                    }
                    cursor = next;
                }
            }

            match date.succ_opt() {
                Some(next) => date = next,
                None => break,
            }
        }

        if !changes.is_empty() {
            self.store.commit(changes)?;
        }
        outcome.created = created.iter().map(Slot::view).collect();
        Ok(outcome)
    }

    /// Resize or enable/disable a slot, subject to the ledger guards.
    pub fn update(&self, slot_id: &SlotId, update: SlotUpdate) -> Result<SlotView, SchedulingError> {
        if update.status.is_none() && update.capacity.is_none() {
            return Err(SchedulingError::Validation(
                "expected a status or capacity change".to_string(),
            ));
        }

        let slot = retry_on_conflict(self.policy.max_commit_attempts, || {
            let mut slot = self
                .store
                .slot(slot_id)?
                .ok_or_else(|| SchedulingError::SlotNotFound(slot_id.clone()))?;
            if let Some(capacity) = update.capacity {
                SlotLedger::set_capacity(&mut slot, capacity)?;
            }
            if let Some(status) = update.status {
                SlotLedger::set_status(&mut slot, status)?;
            }
            let mut changes = ChangeSet::new();
            changes.put_slot(slot.clone());
            self.store.commit(changes)?;
            Ok(slot)
        })?;

        info!(slot = %slot.id, status = slot.status.label(), capacity = slot.capacity, "slot updated");
        Ok(slot.view())
    }

    /// Physically remove a slot. Only allowed while nothing is booked on it.
    pub fn delete(&self, slot_id: &SlotId) -> Result<SlotView, SchedulingError> {
        let slot = retry_on_conflict(self.policy.max_commit_attempts, || {
            let slot = self
                .store
                .slot(slot_id)?
                .ok_or_else(|| SchedulingError::SlotNotFound(slot_id.clone()))?;
            if slot.booked_count > 0 {
                return Err(SchedulingError::HasActiveBookings { slot: slot.view() });
            }
            let mut changes = ChangeSet::new();
            changes.delete_slot(&slot).guard(Guard::SlotBookings {
                slot_id: slot_id.clone(),
                expected: Default::default(),
            });
            self.store.commit(changes)?;
            Ok(slot)
        })?;

        info!(slot = %slot.id, "slot deleted");
        Ok(slot.view())
    }

    pub fn list(&self, date: Option<NaiveDate>) -> Result<Vec<SlotView>, SchedulingError> {
        let mut slots = self
            .store
            .slots()?
            .into_iter()
            .filter(|slot| date.map_or(true, |date| slot.date == date))
            .collect::<Vec<_>>();
        slots.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        Ok(slots.iter().map(Slot::view).collect())
    }

    pub fn get(&self, slot_id: &SlotId) -> Result<SlotView, SchedulingError> {
        self.store
            .slot(slot_id)?
            .map(|slot| slot.view())
            .ok_or_else(|| SchedulingError::SlotNotFound(slot_id.clone()))
    }
}

/// Slots are minute-granular.
fn truncate_to_minute(time: NaiveTime) -> NaiveTime {
    time.with_second(0)
        .and_then(|time| time.with_nanosecond(0))
        .unwrap_or(time)
}

use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;

use chrono::{NaiveDate, NaiveTime};
use tracing::debug;

use super::domain::{
    family_key, Admission, AdmissionId, Booking, BookingId, Slot, SlotId, TokenId,
};
use super::error::SchedulingError;

/// Storage abstraction for slots, bookings and admissions.
///
/// Every record carries a `version`. Writers read, decide, and submit a [`ChangeSet`];
/// `commit` applies the whole set or nothing and rejects it when any record or guard moved
/// underneath the writer.
pub trait AdmissionsStore: Send + Sync {
    fn slot(&self, id: &SlotId) -> Result<Option<Slot>, StoreError>;
    fn slots(&self) -> Result<Vec<Slot>, StoreError>;
    fn booking(&self, id: &BookingId) -> Result<Option<Booking>, StoreError>;
    fn bookings(&self) -> Result<Vec<Booking>, StoreError>;
    fn bookings_for_slot(&self, slot_id: &SlotId) -> Result<Vec<Booking>, StoreError>;
    fn bookings_for_parent(&self, parent_email: &str) -> Result<Vec<Booking>, StoreError>;
    fn bookings_for_token(&self, token_id: &TokenId) -> Result<Vec<Booking>, StoreError>;
    fn booking_for_admission(
        &self,
        admission_id: &AdmissionId,
    ) -> Result<Option<Booking>, StoreError>;
    fn admission(&self, id: &AdmissionId) -> Result<Option<Admission>, StoreError>;
    fn admissions_for_grade(&self, grade: &str) -> Result<Vec<Admission>, StoreError>;
    fn commit(&self, changes: ChangeSet) -> Result<(), StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{record} changed since it was read")]
    VersionConflict { record: String },
    #[error("change set rejected: {0}")]
    InvalidChangeSet(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone)]
pub enum Change {
    /// Insert when `version == 0`, otherwise update guarded by the version.
    PutSlot(Slot),
    DeleteSlot { id: SlotId, version: u64 },
    PutBooking(Booking),
    DeleteBooking { id: BookingId, version: u64 },
    PutAdmission(Admission),
}

/// Read-set assertions, checked against the state the commit starts from.
#[derive(Debug, Clone)]
pub enum Guard {
    /// The slot holds exactly these bookings.
    SlotBookings {
        slot_id: SlotId,
        expected: BTreeSet<BookingId>,
    },
    /// The family (keyed by parent e-mail) holds exactly these bookings.
    FamilyBookings {
        parent_email: String,
        expected: BTreeSet<BookingId>,
    },
    /// No slot other than the ones inserted by this change set overlaps the window.
    NoOverlap {
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
    },
}

#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    changes: Vec<Change>,
    guards: Vec<Guard>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_slot(&mut self, slot: Slot) -> &mut Self {
        self.changes.push(Change::PutSlot(slot));
        self
    }

    pub fn delete_slot(&mut self, slot: &Slot) -> &mut Self {
        self.changes.push(Change::DeleteSlot {
            id: slot.id.clone(),
            version: slot.version,
        });
        self
    }

    pub fn put_booking(&mut self, booking: Booking) -> &mut Self {
        self.changes.push(Change::PutBooking(booking));
        self
    }

    pub fn delete_booking(&mut self, booking: &Booking) -> &mut Self {
        self.changes.push(Change::DeleteBooking {
            id: booking.id.clone(),
            version: booking.version,
        });
        self
    }

    pub fn put_admission(&mut self, admission: Admission) -> &mut Self {
        self.changes.push(Change::PutAdmission(admission));
        self
    }

    pub fn guard(&mut self, guard: Guard) -> &mut Self {
        self.guards.push(guard);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    pub fn guards(&self) -> &[Guard] {
        &self.guards
    }
}

/// Runs `attempt` until it commits without a version conflict.
pub(crate) fn retry_on_conflict<T>(
    max_attempts: u32,
    mut attempt: impl FnMut() -> Result<T, SchedulingError>,
) -> Result<T, SchedulingError> {
    let attempts = max_attempts.max(1);
    for round in 1..=attempts {
        match attempt() {
            Err(SchedulingError::Store(StoreError::VersionConflict { record })) => {
                debug!(round, %record, "optimistic commit lost a race, re-reading");
            }
            other => return other,
        }
    }
    Err(SchedulingError::Contention { attempts })
}

#[derive(Debug, Clone, Default)]
struct StoreState {
    slots: BTreeMap<SlotId, Slot>,
    bookings: BTreeMap<BookingId, Booking>,
    admissions: BTreeMap<AdmissionId, Admission>,
}

/// Process-local store. A single lock makes every commit atomic with respect to readers.
#[derive(Debug, Default)]
pub struct InMemoryAdmissionsStore {
    state: RwLock<StoreState>,
}

impl InMemoryAdmissionsStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(&self, f: impl FnOnce(&StoreState) -> T) -> Result<T, StoreError> {
        let guard = self
            .state
            .read()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))?;
        Ok(f(&guard))
    }
}

fn expect_version(
    record: String,
    current: Option<u64>,
    expected: u64,
) -> Result<(), StoreError> {
    match (current, expected) {
        (None, 0) => Ok(()),
        (Some(found), expected) if expected != 0 && found == expected => Ok(()),
        _ => Err(StoreError::VersionConflict { record }),
    }
}

impl StoreState {
    fn check(&self, changes: &ChangeSet) -> Result<(), StoreError> {
        let mut touched = BTreeSet::new();
        for change in changes.changes() {
            let (key, current, expected) = match change {
                Change::PutSlot(slot) => (
                    format!("slot {}", slot.id),
                    self.slots.get(&slot.id).map(|s| s.version),
                    slot.version,
                ),
                Change::DeleteSlot { id, version } => (
                    format!("slot {id}"),
                    self.slots.get(id).map(|s| s.version),
                    *version,
                ),
                Change::PutBooking(booking) => (
                    format!("booking {}", booking.id),
                    self.bookings.get(&booking.id).map(|b| b.version),
                    booking.version,
                ),
                Change::DeleteBooking { id, version } => (
                    format!("booking {id}"),
                    self.bookings.get(id).map(|b| b.version),
                    *version,
                ),
                Change::PutAdmission(admission) => (
                    format!("admission {}", admission.id),
                    self.admissions.get(&admission.id).map(|a| a.version),
                    admission.version,
                ),
            };
            if !touched.insert(key.clone()) {
                return Err(StoreError::InvalidChangeSet(format!(
                    "{key} appears more than once"
                )));
            }
            expect_version(key, current, expected)?;
        }
        Ok(())
    }

    fn apply(&mut self, changes: ChangeSet) {
        for change in changes.changes {
            match change {
                Change::PutSlot(mut slot) => {
                    slot.version += 1;
                    self.slots.insert(slot.id.clone(), slot);
                }
                Change::DeleteSlot { id, .. } => {
                    self.slots.remove(&id);
                }
                Change::PutBooking(mut booking) => {
                    booking.version += 1;
                    self.bookings.insert(booking.id.clone(), booking);
                }
                Change::DeleteBooking { id, .. } => {
                    self.bookings.remove(&id);
                }
                Change::PutAdmission(mut admission) => {
                    admission.version += 1;
                    self.admissions.insert(admission.id.clone(), admission);
                }
            }
        }
    }

    fn verify_guards(
        &self,
        guards: &[Guard],
        inserted: &BTreeSet<SlotId>,
    ) -> Result<(), StoreError> {
        for guard in guards {
            match guard {
                Guard::SlotBookings { slot_id, expected } => {
                    let actual = self
                        .bookings
                        .values()
                        .filter(|b| &b.slot_id == slot_id)
                        .map(|b| b.id.clone())
                        .collect::<BTreeSet<_>>();
                    if &actual != expected {
                        return Err(StoreError::VersionConflict {
                            record: format!("bookings of slot {slot_id}"),
                        });
                    }
                }
                Guard::FamilyBookings {
                    parent_email,
                    expected,
                } => {
                    let family = family_key(parent_email);
                    let actual = self
                        .bookings
                        .values()
                        .filter(|b| family_key(&b.parent_email) == family)
                        .map(|b| b.id.clone())
                        .collect::<BTreeSet<_>>();
                    if &actual != expected {
                        return Err(StoreError::VersionConflict {
                            record: format!("bookings of family {family}"),
                        });
                    }
                }
                Guard::NoOverlap { date, start, end } => {
                    if let Some(existing) = self
                        .slots
                        .values()
                        .find(|s| !inserted.contains(&s.id) && s.overlaps(*date, *start, *end))
                    {
                        return Err(StoreError::VersionConflict {
                            record: format!("schedule around slot {}", existing.id),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Booked counts must equal the bookings that reference each touched slot.
    fn verify_counts(&self, slots: &BTreeSet<SlotId>) -> Result<(), StoreError> {
        for slot_id in slots {
            let Some(slot) = self.slots.get(slot_id) else {
                if self.bookings.values().any(|b| &b.slot_id == slot_id) {
                    return Err(StoreError::InvalidChangeSet(format!(
                        "slot {slot_id} removed while bookings still reference it"
                    )));
                }
                continue;
            };
            let actual = self
                .bookings
                .values()
                .filter(|b| &b.slot_id == slot_id)
                .count() as u32;
            if slot.booked_count != actual {
                return Err(StoreError::InvalidChangeSet(format!(
                    "slot {slot_id} would record {} bookings but holds {actual}",
                    slot.booked_count
                )));
            }
            if slot.booked_count > slot.capacity {
                return Err(StoreError::InvalidChangeSet(format!(
                    "slot {slot_id} would exceed capacity {}",
                    slot.capacity
                )));
            }
        }
        Ok(())
    }
}

fn inserted_slots(changes: &ChangeSet) -> BTreeSet<SlotId> {
    changes
        .changes()
        .iter()
        .filter_map(|change| match change {
            Change::PutSlot(slot) if slot.version == 0 => Some(slot.id.clone()),
            _ => None,
        })
        .collect()
}

fn touched_slots(state: &StoreState, changes: &ChangeSet) -> BTreeSet<SlotId> {
    let mut slots = BTreeSet::new();
    for change in changes.changes() {
        match change {
            Change::PutSlot(slot) => {
                slots.insert(slot.id.clone());
            }
            Change::DeleteSlot { id, .. } => {
                slots.insert(id.clone());
            }
            Change::PutBooking(booking) => {
                slots.insert(booking.slot_id.clone());
                if let Some(previous) = state.bookings.get(&booking.id) {
                    slots.insert(previous.slot_id.clone());
                }
            }
            Change::DeleteBooking { id, .. } => {
                if let Some(previous) = state.bookings.get(id) {
                    slots.insert(previous.slot_id.clone());
                }
            }
            Change::PutAdmission(_) => {}
        }
    }
    slots
}

impl AdmissionsStore for InMemoryAdmissionsStore {
    fn slot(&self, id: &SlotId) -> Result<Option<Slot>, StoreError> {
        self.read(|state| state.slots.get(id).cloned())
    }

    fn slots(&self) -> Result<Vec<Slot>, StoreError> {
        self.read(|state| state.slots.values().cloned().collect())
    }

    fn booking(&self, id: &BookingId) -> Result<Option<Booking>, StoreError> {
        self.read(|state| state.bookings.get(id).cloned())
    }

    fn bookings(&self) -> Result<Vec<Booking>, StoreError> {
        self.read(|state| state.bookings.values().cloned().collect())
    }

    fn bookings_for_slot(&self, slot_id: &SlotId) -> Result<Vec<Booking>, StoreError> {
        self.read(|state| {
            state
                .bookings
                .values()
                .filter(|b| &b.slot_id == slot_id)
                .cloned()
                .collect()
        })
    }

    fn bookings_for_parent(&self, parent_email: &str) -> Result<Vec<Booking>, StoreError> {
        let family = family_key(parent_email);
        self.read(|state| {
            state
                .bookings
                .values()
                .filter(|b| family_key(&b.parent_email) == family)
                .cloned()
                .collect()
        })
    }

    fn bookings_for_token(&self, token_id: &TokenId) -> Result<Vec<Booking>, StoreError> {
        self.read(|state| {
            state
                .bookings
                .values()
                .filter(|b| &b.token_id == token_id)
                .cloned()
                .collect()
        })
    }

    fn booking_for_admission(
        &self,
        admission_id: &AdmissionId,
    ) -> Result<Option<Booking>, StoreError> {
        self.read(|state| {
            state
                .bookings
                .values()
                .find(|b| &b.admission_id == admission_id)
                .cloned()
        })
    }

    fn admission(&self, id: &AdmissionId) -> Result<Option<Admission>, StoreError> {
        self.read(|state| state.admissions.get(id).cloned())
    }

    fn admissions_for_grade(&self, grade: &str) -> Result<Vec<Admission>, StoreError> {
        let grade = grade.trim();
        self.read(|state| {
            state
                .admissions
                .values()
                .filter(|a| a.grade.trim().eq_ignore_ascii_case(grade))
                .cloned()
                .collect()
        })
    }

    fn commit(&self, changes: ChangeSet) -> Result<(), StoreError> {
        let mut guard = self
            .state
            .write()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))?;

        guard.check(&changes)?;
        guard.verify_guards(changes.guards(), &inserted_slots(&changes))?;

        let slots = touched_slots(&guard, &changes);
        let mut next = guard.clone();
        next.apply(changes);
        next.verify_counts(&slots)?;

        *guard = next;
        Ok(())
    }
}

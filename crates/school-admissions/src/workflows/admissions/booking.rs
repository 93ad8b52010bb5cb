use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use super::clock::SchoolClock;
use super::domain::{
    Admission, AdmissionId, AdmissionStatus, Booking, BookingId, Slot, SlotId, SlotStatus,
    SlotView,
};
use super::error::SchedulingError;
use super::ledger::SlotLedger;
use super::notify::{delivered, NotificationDispatcher, RescheduleReason};
use super::seats::SeatAllocator;
use super::store::{retry_on_conflict, AdmissionsStore, ChangeSet, Guard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingOutcome {
    Created,
    /// Same admission, same slot: nothing changed.
    Unchanged,
    Rescheduled,
}

#[derive(Debug, Clone, Serialize)]
pub struct BookingReceipt {
    pub booking: Booking,
    pub slot: SlotView,
    pub outcome: BookingOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_slot: Option<SlotId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelledBooking {
    pub booking_id: BookingId,
    pub admission_id: AdmissionId,
    pub slot: SlotView,
}

/// Working copy of every record one commit touches. Each slot is loaded once so that
/// several bookings leaving the same slot decrement the same copy.
#[derive(Debug, Default)]
pub(crate) struct BookingPlan {
    slots: BTreeMap<SlotId, Slot>,
    bookings: BTreeMap<BookingId, Booking>,
    deleted: BTreeMap<BookingId, Booking>,
    admissions: BTreeMap<AdmissionId, Admission>,
    guards: Vec<Guard>,
}

impl BookingPlan {
    pub(crate) fn slot<S: AdmissionsStore + ?Sized>(
        &mut self,
        store: &S,
        id: &SlotId,
    ) -> Result<&mut Slot, SchedulingError> {
        if !self.slots.contains_key(id) {
            let slot = store
                .slot(id)?
                .ok_or_else(|| SchedulingError::SlotNotFound(id.clone()))?;
            self.slots.insert(id.clone(), slot);
        }
        self.slots
            .get_mut(id)
            .ok_or_else(|| SchedulingError::SlotNotFound(id.clone()))
    }

    pub(crate) fn adopt_slot(&mut self, slot: Slot) -> &mut Slot {
        self.slots.entry(slot.id.clone()).or_insert(slot)
    }

    /// Vacate the booking's current seat and point it at `destination`. The caller
    /// accounts for the seat on the destination side.
    pub(crate) fn move_booking<S: AdmissionsStore + ?Sized>(
        &mut self,
        store: &S,
        mut booking: Booking,
        destination: &SlotId,
        at: DateTime<Utc>,
    ) -> Result<(), SchedulingError> {
        SlotLedger::decrement(self.slot(store, &booking.slot_id)?);
        booking.relocate(destination.clone(), at);
        self.bookings.insert(booking.id.clone(), booking);
        Ok(())
    }

    /// Vacate the booking's seat and delete it.
    pub(crate) fn release_booking<S: AdmissionsStore + ?Sized>(
        &mut self,
        store: &S,
        booking: Booking,
    ) -> Result<(), SchedulingError> {
        SlotLedger::decrement(self.slot(store, &booking.slot_id)?);
        self.deleted.insert(booking.id.clone(), booking);
        Ok(())
    }

    pub(crate) fn put_booking(&mut self, booking: Booking) {
        self.bookings.insert(booking.id.clone(), booking);
    }

    pub(crate) fn put_admission(&mut self, admission: Admission) {
        self.admissions.insert(admission.id.clone(), admission);
    }

    pub(crate) fn guard(&mut self, guard: Guard) {
        self.guards.push(guard);
    }

    pub(crate) fn staged_slot(&self, id: &SlotId) -> Option<&Slot> {
        self.slots.get(id)
    }

    pub(crate) fn into_change_set(self) -> ChangeSet {
        let mut changes = ChangeSet::new();
        for slot in self.slots.into_values() {
            changes.put_slot(slot);
        }
        for booking in self.bookings.into_values() {
            changes.put_booking(booking);
        }
        for booking in self.deleted.values() {
            changes.delete_booking(booking);
        }
        for admission in self.admissions.into_values() {
            changes.put_admission(admission);
        }
        for guard in self.guards {
            changes.guard(guard);
        }
        changes
    }
}

/// The only path by which bookings are created, moved, or removed.
pub struct BookingCoordinator<S, N> {
    store: Arc<S>,
    notifier: Arc<N>,
    seats: SeatAllocator<S>,
    clock: SchoolClock,
    max_commit_attempts: u32,
}

impl<S, N> Clone for BookingCoordinator<S, N> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            notifier: self.notifier.clone(),
            seats: self.seats.clone(),
            clock: self.clock.clone(),
            max_commit_attempts: self.max_commit_attempts,
        }
    }
}

impl<S, N> BookingCoordinator<S, N>
where
    S: AdmissionsStore + 'static,
    N: NotificationDispatcher + 'static,
{
    pub fn new(
        store: Arc<S>,
        notifier: Arc<N>,
        seats: SeatAllocator<S>,
        clock: SchoolClock,
        max_commit_attempts: u32,
    ) -> Self {
        Self {
            store,
            notifier,
            seats,
            clock,
            max_commit_attempts,
        }
    }

    pub(crate) fn store(&self) -> &S {
        &self.store
    }

    pub(crate) fn notifier(&self) -> &N {
        &self.notifier
    }

    pub(crate) fn clock(&self) -> &SchoolClock {
        &self.clock
    }

    pub(crate) fn max_commit_attempts(&self) -> u32 {
        self.max_commit_attempts
    }

    /// Book an admission into a slot. A booking elsewhere is moved rather than duplicated.
    pub fn book(
        &self,
        admission_id: &AdmissionId,
        slot_id: &SlotId,
    ) -> Result<BookingReceipt, SchedulingError> {
        let receipt = retry_on_conflict(self.max_commit_attempts, || {
            self.try_book(admission_id, slot_id)
        })?;

        match receipt.outcome {
            BookingOutcome::Created => {
                info!(booking = %receipt.booking.id, slot = %receipt.slot.id, admission = %admission_id, "booking created");
                self.announce(&receipt.booking.id, None);
            }
            BookingOutcome::Rescheduled => {
                info!(booking = %receipt.booking.id, slot = %receipt.slot.id, from = ?receipt.previous_slot, "booking moved");
                self.announce(&receipt.booking.id, Some(RescheduleReason::AdminReassignment));
            }
            BookingOutcome::Unchanged => {
                debug!(booking = %receipt.booking.id, slot = %receipt.slot.id, "booking already in place");
            }
        }

        Ok(receipt)
    }

    fn try_book(
        &self,
        admission_id: &AdmissionId,
        slot_id: &SlotId,
    ) -> Result<BookingReceipt, SchedulingError> {
        let mut admission = self
            .store
            .admission(admission_id)?
            .ok_or_else(|| SchedulingError::AdmissionNotFound(admission_id.clone()))?;
        if !admission.status.is_bookable() {
            return Err(SchedulingError::AdmissionNotBookable {
                admission_id: admission.id,
                status: admission.status,
            });
        }

        let target = self
            .store
            .slot(slot_id)?
            .ok_or_else(|| SchedulingError::SlotNotFound(slot_id.clone()))?;
        let existing = self.store.booking_for_admission(admission_id)?;

        if let Some(booking) = existing.as_ref().filter(|b| &b.slot_id == slot_id) {
            return Ok(BookingReceipt {
                booking: booking.clone(),
                slot: target.view(),
                outcome: BookingOutcome::Unchanged,
                previous_slot: None,
            });
        }

        if target.starts_at() <= self.clock.local_now() {
            return Err(SchedulingError::SlotInPast {
                slot: target.view(),
            });
        }
        if !target.accepts_booking() {
            return Err(SchedulingError::SlotUnavailable {
                slot: target.view(),
            });
        }

        let now = self.clock.now();
        let mut plan = BookingPlan::default();
        SlotLedger::increment(plan.adopt_slot(target))?;

        let (booking, outcome, previous_slot) = match existing {
            Some(booking) => {
                let previous = booking.slot_id.clone();
                let id = booking.id.clone();
                plan.move_booking(self.store.as_ref(), booking, slot_id, now)?;
                let moved = plan
                    .bookings
                    .get(&id)
                    .cloned()
                    .ok_or_else(|| SchedulingError::BookingNotFound(id))?;
                (moved, BookingOutcome::Rescheduled, Some(previous))
            }
            None => {
                let booking = Booking {
                    id: BookingId::next(),
                    slot_id: slot_id.clone(),
                    admission_id: admission.id.clone(),
                    token_id: admission.token_id.clone(),
                    parent_email: admission.parent_email.clone(),
                    booked_at: now,
                    reminders_sent: Default::default(),
                    calendar_invite_sent: false,
                    principal_invite_sent: false,
                    version: 0,
                };
                if admission.status == AdmissionStatus::Waitlisted {
                    // Leaving the waitlist needs a free seat in the grade.
                    self.seats.evaluate(&admission.grade, false)?;
                    admission.leave_waitlist(AdmissionStatus::Submitted);
                }
                admission.slot_booking_id = Some(booking.id.clone());
                plan.put_booking(booking.clone());
                plan.put_admission(admission);
                (booking, BookingOutcome::Created, None)
            }
        };

        let slot = plan
            .staged_slot(slot_id)
            .map(Slot::view)
            .ok_or_else(|| SchedulingError::SlotNotFound(slot_id.clone()))?;
        self.store.commit(plan.into_change_set())?;

        Ok(BookingReceipt {
            booking,
            slot,
            outcome,
            previous_slot,
        })
    }

    /// Cancel a booking outright. Only allowed until the slot ends.
    pub fn cancel(&self, booking_id: &BookingId) -> Result<CancelledBooking, SchedulingError> {
        let cancelled =
            retry_on_conflict(self.max_commit_attempts, || self.try_cancel(booking_id))?;
        info!(booking = %cancelled.booking_id, slot = %cancelled.slot.id, "booking cancelled");
        Ok(cancelled)
    }

    fn try_cancel(&self, booking_id: &BookingId) -> Result<CancelledBooking, SchedulingError> {
        let booking = self
            .store
            .booking(booking_id)?
            .ok_or_else(|| SchedulingError::BookingNotFound(booking_id.clone()))?;
        let slot = self
            .store
            .slot(&booking.slot_id)?
            .ok_or_else(|| SchedulingError::SlotNotFound(booking.slot_id.clone()))?;
        if slot.ends_at() <= self.clock.local_now() {
            return Err(SchedulingError::SlotEnded { slot: slot.view() });
        }

        let mut plan = BookingPlan::default();
        plan.adopt_slot(slot);
        self.stage_release(&mut plan, booking.clone())?;

        let slot = plan
            .staged_slot(&booking.slot_id)
            .map(Slot::view)
            .ok_or_else(|| SchedulingError::SlotNotFound(booking.slot_id.clone()))?;
        self.store.commit(plan.into_change_set())?;

        Ok(CancelledBooking {
            booking_id: booking.id,
            admission_id: booking.admission_id,
            slot,
        })
    }

    /// Stage the removal of a booking along with its admission back-reference.
    pub(crate) fn stage_release(
        &self,
        plan: &mut BookingPlan,
        booking: Booking,
    ) -> Result<(), SchedulingError> {
        if let Some(mut admission) = self.store.admission(&booking.admission_id)? {
            if admission.slot_booking_id.as_ref() == Some(&booking.id) {
                admission.slot_booking_id = None;
                plan.put_admission(admission);
            }
        }
        plan.release_booking(self.store.as_ref(), booking)
    }

    /// Earliest slot, after now, that is open for bookings. Ordered by date then start.
    pub(crate) fn next_open_slot(
        &self,
        excluding: &SlotId,
    ) -> Result<Option<Slot>, SchedulingError> {
        let local_now = self.clock.local_now();
        let slot = self
            .store
            .slots()?
            .into_iter()
            .filter(|slot| {
                &slot.id != excluding
                    && slot.status == SlotStatus::Available
                    && slot.starts_at() > local_now
            })
            .min_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        Ok(slot)
    }

    /// Send the confirmation (or reschedule notice) for a committed booking and record
    /// which invites went out. Failures are logged only.
    pub(crate) fn announce(&self, booking_id: &BookingId, reason: Option<RescheduleReason>) {
        let Ok(Some(booking)) = self.store.booking(booking_id) else {
            debug!(booking = %booking_id, "booking vanished before notification");
            return;
        };
        let Ok(Some(slot)) = self.store.slot(&booking.slot_id) else {
            return;
        };

        let result = match reason {
            None => self.notifier.send_confirmation(&booking, &slot),
            Some(reason) => self.notifier.send_reschedule(&booking, &slot, reason),
        };
        let notice = match reason {
            None => "confirmation",
            Some(_) => "reschedule",
        };
        let Some(delivery) = delivered(result, notice, &booking.id.0) else {
            return;
        };
        if !delivery.calendar_invite && !delivery.principal_invite {
            return;
        }

        let mut updated = booking;
        updated.calendar_invite_sent |= delivery.calendar_invite;
        updated.principal_invite_sent |= delivery.principal_invite;
        let mut changes = ChangeSet::new();
        changes.put_booking(updated);
        if let Err(err) = self.store.commit(changes) {
            debug!(booking = %booking_id, error = %err, "invite flags not recorded");
        }
    }
}

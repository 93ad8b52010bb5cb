use std::collections::BTreeMap;

use serde::Serialize;
use tracing::info;

use super::booking::{BookingCoordinator, BookingPlan};
use super::domain::{family_key, Booking, BookingId, Slot, SlotId, SlotStatus, SlotView, TokenId};
use super::error::SchedulingError;
use super::ledger::SlotLedger;
use super::notify::{NotificationDispatcher, RescheduleReason};
use super::store::{retry_on_conflict, AdmissionsStore, Guard};

#[derive(Debug, Clone, Serialize)]
pub struct ParentRescheduleOutcome {
    pub parent_email: String,
    pub destination: SlotView,
    pub moved_bookings: Vec<BookingId>,
    pub vacated_slots: Vec<SlotView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FamilyMove {
    pub parent_email: String,
    pub bookings: Vec<BookingId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancellationOutcome {
    pub cancelled: SlotView,
    /// Absent when the slot had no bookings to move.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<SlotView>,
    pub families: Vec<FamilyMove>,
}

/// Parent-initiated earlier moves and school-initiated slot cancellation cascades.
pub struct RescheduleEngine<S, N> {
    coordinator: BookingCoordinator<S, N>,
}

/// The booking a parent token refers to, with its family and current slot.
struct ParentAnchor {
    anchor: Booking,
    current: Slot,
    family: Vec<Booking>,
}

impl<S, N> RescheduleEngine<S, N>
where
    S: AdmissionsStore + 'static,
    N: NotificationDispatcher + 'static,
{
    pub fn new(coordinator: BookingCoordinator<S, N>) -> Self {
        Self { coordinator }
    }

    fn anchor(&self, token_id: &TokenId) -> Result<ParentAnchor, SchedulingError> {
        let store = self.coordinator.store();
        let anchor = store
            .bookings_for_token(token_id)?
            .into_iter()
            .min_by_key(|booking| booking.booked_at)
            .ok_or_else(|| SchedulingError::TokenNotFound(token_id.clone()))?;
        let current = store
            .slot(&anchor.slot_id)?
            .ok_or_else(|| SchedulingError::SlotNotFound(anchor.slot_id.clone()))?;
        let family = store.bookings_for_parent(&anchor.parent_email)?;
        Ok(ParentAnchor {
            anchor,
            current,
            family,
        })
    }

    /// Check a target slot against the parent rules. The order of checks decides which
    /// error a parent sees when several rules fail.
    fn check_target(
        &self,
        anchor: &ParentAnchor,
        target: &Slot,
        seats_needed: u32,
    ) -> Result<(), SchedulingError> {
        let open = target.status == SlotStatus::Available
            && target.starts_at() > self.coordinator.clock().local_now()
            && target.remaining() >= seats_needed;
        if !open {
            return Err(SchedulingError::SlotNoLongerAvailable {
                slot: target.view(),
            });
        }
        if target.created_at <= anchor.anchor.booked_at {
            return Err(SchedulingError::ReleasedBeforeBooking {
                slot: target.view(),
            });
        }
        if !target.is_earlier_than(&anchor.current) {
            return Err(SchedulingError::NotEarlier {
                slot: target.view(),
            });
        }
        Ok(())
    }

    /// Slots a parent may move the family into, earliest first.
    pub fn options(&self, token_id: &TokenId) -> Result<Vec<SlotView>, SchedulingError> {
        let anchor = self.anchor(token_id)?;
        let mut slots = self
            .coordinator
            .store()
            .slots()?
            .into_iter()
            .filter(|slot| {
                let seats_needed = movers_for(&anchor.family, &slot.id);
                self.check_target(&anchor, slot, seats_needed).is_ok()
            })
            .collect::<Vec<_>>();
        slots.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        Ok(slots.iter().map(Slot::view).collect())
    }

    /// Move every booking of the token holder's family into an earlier slot.
    pub fn reschedule_for_parent(
        &self,
        token_id: &TokenId,
        slot_id: &SlotId,
    ) -> Result<ParentRescheduleOutcome, SchedulingError> {
        let outcome = retry_on_conflict(self.coordinator.max_commit_attempts(), || {
            self.try_reschedule_for_parent(token_id, slot_id)
        })?;

        info!(
            family = %outcome.parent_email,
            slot = %outcome.destination.id,
            moved = outcome.moved_bookings.len(),
            "parent moved family to an earlier slot"
        );
        for booking_id in &outcome.moved_bookings {
            self.coordinator
                .announce(booking_id, Some(RescheduleReason::ParentRequest));
        }
        Ok(outcome)
    }

    fn try_reschedule_for_parent(
        &self,
        token_id: &TokenId,
        slot_id: &SlotId,
    ) -> Result<ParentRescheduleOutcome, SchedulingError> {
        let store = self.coordinator.store();
        let anchor = self.anchor(token_id)?;
        let target = store
            .slot(slot_id)?
            .ok_or_else(|| SchedulingError::SlotNotFound(slot_id.clone()))?;
        let seats_needed = movers_for(&anchor.family, slot_id);
        self.check_target(&anchor, &target, seats_needed)?;

        let now = self.coordinator.clock().now();
        let mut plan = BookingPlan::default();
        plan.guard(Guard::FamilyBookings {
            parent_email: anchor.anchor.parent_email.clone(),
            expected: anchor.family.iter().map(|b| b.id.clone()).collect(),
        });
        plan.adopt_slot(target);

        let mut moved = Vec::new();
        let mut vacated = Vec::new();
        for booking in anchor.family {
            if &booking.slot_id == slot_id {
                continue;
            }
            moved.push(booking.id.clone());
            if !vacated.contains(&booking.slot_id) {
                vacated.push(booking.slot_id.clone());
            }
            plan.move_booking(store, booking, slot_id, now)?;
            SlotLedger::increment(plan.slot(store, slot_id)?)?;
        }

        let destination = plan
            .staged_slot(slot_id)
            .map(Slot::view)
            .ok_or_else(|| SchedulingError::SlotNotFound(slot_id.clone()))?;
        let vacated_slots = vacated
            .iter()
            .filter_map(|id| plan.staged_slot(id).map(Slot::view))
            .collect();
        store.commit(plan.into_change_set())?;

        Ok(ParentRescheduleOutcome {
            parent_email: family_key(&anchor.anchor.parent_email),
            destination,
            moved_bookings: moved,
            vacated_slots,
        })
    }

    /// Cancel a slot, moving every booking on it to the earliest open future slot.
    ///
    /// Fails with `NoFutureSlotAvailable` and leaves everything untouched when there is
    /// nowhere to send the affected families.
    pub fn cancel_slot(&self, slot_id: &SlotId) -> Result<CancellationOutcome, SchedulingError> {
        let outcome = retry_on_conflict(self.coordinator.max_commit_attempts(), || {
            self.try_cancel_slot(slot_id)
        })?;

        info!(
            slot = %outcome.cancelled.id,
            destination = ?outcome.destination.as_ref().map(|slot| &slot.id),
            families = outcome.families.len(),
            "slot cancelled"
        );
        for family in &outcome.families {
            for booking_id in &family.bookings {
                self.coordinator
                    .announce(booking_id, Some(RescheduleReason::SlotCancelled));
            }
        }
        Ok(outcome)
    }

    fn try_cancel_slot(&self, slot_id: &SlotId) -> Result<CancellationOutcome, SchedulingError> {
        let store = self.coordinator.store();
        let slot = store
            .slot(slot_id)?
            .ok_or_else(|| SchedulingError::SlotNotFound(slot_id.clone()))?;
        if slot.status == SlotStatus::Disabled {
            return Err(SchedulingError::SlotUnavailable { slot: slot.view() });
        }
        if slot.ends_at() <= self.coordinator.clock().local_now() {
            return Err(SchedulingError::SlotEnded { slot: slot.view() });
        }

        let bookings = store.bookings_for_slot(slot_id)?;
        let mut plan = BookingPlan::default();
        plan.guard(Guard::SlotBookings {
            slot_id: slot_id.clone(),
            expected: bookings.iter().map(|b| b.id.clone()).collect(),
        });

        if bookings.is_empty() {
            let cancelled = plan.adopt_slot(slot);
            SlotLedger::set_status(cancelled, SlotStatus::Disabled)?;
            let cancelled = cancelled.view();
            store.commit(plan.into_change_set())?;
            return Ok(CancellationOutcome {
                cancelled,
                destination: None,
                families: Vec::new(),
            });
        }

        let destination = self
            .coordinator
            .next_open_slot(slot_id)?
            .ok_or(SchedulingError::NoFutureSlotAvailable)?;
        let destination_id = destination.id.clone();
        plan.adopt_slot(slot);
        plan.adopt_slot(destination);

        let mut families: BTreeMap<String, Vec<BookingId>> = BTreeMap::new();
        let now = self.coordinator.clock().now();
        let arrivals = bookings.len() as u32;
        for booking in bookings {
            families
                .entry(family_key(&booking.parent_email))
                .or_default()
                .push(booking.id.clone());
            plan.move_booking(store, booking, &destination_id, now)?;
        }

        SlotLedger::grow_to_fit(plan.slot(store, &destination_id)?, arrivals);
        SlotLedger::retire(plan.slot(store, slot_id)?);

        let cancelled = plan
            .staged_slot(slot_id)
            .map(Slot::view)
            .ok_or_else(|| SchedulingError::SlotNotFound(slot_id.clone()))?;
        let destination = plan.staged_slot(&destination_id).map(Slot::view);
        store.commit(plan.into_change_set())?;

        Ok(CancellationOutcome {
            cancelled,
            destination,
            families: families
                .into_iter()
                .map(|(parent_email, bookings)| FamilyMove {
                    parent_email,
                    bookings,
                })
                .collect(),
        })
    }
}

fn movers_for(family: &[Booking], target: &SlotId) -> u32 {
    family.iter().filter(|b| &b.slot_id != target).count() as u32
}

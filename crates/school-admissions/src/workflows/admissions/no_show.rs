use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::info;

use super::booking::{BookingCoordinator, BookingPlan};
use super::domain::{
    family_key, Admission, AdmissionId, Booking, BookingId, NoShowStrike, Slot, SlotId, SlotView,
    WaitlistType,
};
use super::error::SchedulingError;
use super::ledger::SlotLedger;
use super::notify::{delivered, NotificationDispatcher, RescheduleReason};
use super::store::{retry_on_conflict, AdmissionsStore, Guard};

#[derive(Debug, Clone, Serialize)]
pub struct NoShowOutcome {
    pub strike: NoShowStrike,
    pub parent_email: String,
    pub affected_admissions: Vec<AdmissionId>,
    /// Present for a first strike: where the family was moved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<SlotView>,
    pub vacated_slots: Vec<SlotView>,
}

/// Two-strike escalation applied to every booking of the family that missed a session.
pub struct NoShowPolicyEngine<S, N> {
    coordinator: BookingCoordinator<S, N>,
}

impl<S, N> NoShowPolicyEngine<S, N>
where
    S: AdmissionsStore + 'static,
    N: NotificationDispatcher + 'static,
{
    pub fn new(coordinator: BookingCoordinator<S, N>) -> Self {
        Self { coordinator }
    }

    /// Record a no-show against a booking while its slot is in session.
    ///
    /// The first strike moves the whole family to the earliest open future slot; the
    /// second deletes the family's bookings and waitlists every linked admission. Either
    /// all linked records change together or none do.
    pub fn record(&self, booking_id: &BookingId) -> Result<NoShowOutcome, SchedulingError> {
        let (outcome, moved, admissions) = retry_on_conflict(
            self.coordinator.max_commit_attempts(),
            || self.try_record(booking_id),
        )?;

        info!(
            booking = %booking_id,
            strike = outcome.strike.count(),
            family = %outcome.parent_email,
            affected = outcome.affected_admissions.len(),
            destination = ?outcome.destination.as_ref().map(|slot| &slot.id),
            "no-show recorded"
        );

        let notifier = self.coordinator.notifier();
        for admission in &admissions {
            delivered(
                notifier.send_no_show_notice(admission, outcome.strike),
                "no_show",
                &admission.id.0,
            );
        }
        for booking_id in &moved {
            self.coordinator
                .announce(booking_id, Some(RescheduleReason::NoShow));
        }

        Ok(outcome)
    }

    #[allow(clippy::type_complexity)]
    fn try_record(
        &self,
        booking_id: &BookingId,
    ) -> Result<(NoShowOutcome, Vec<BookingId>, Vec<Admission>), SchedulingError> {
        let store = self.coordinator.store();
        let clock = self.coordinator.clock();

        let booking = store
            .booking(booking_id)?
            .ok_or_else(|| SchedulingError::BookingNotFound(booking_id.clone()))?;
        let missed = store
            .slot(&booking.slot_id)?
            .ok_or_else(|| SchedulingError::SlotNotFound(booking.slot_id.clone()))?;
        if !missed.is_live_at(clock.local_now()) {
            return Err(SchedulingError::NotDuringSlot {
                slot: missed.view(),
            });
        }

        let family = store.bookings_for_parent(&booking.parent_email)?;
        let mut admissions = BTreeMap::new();
        for member in &family {
            let admission = store
                .admission(&member.admission_id)?
                .ok_or_else(|| SchedulingError::AdmissionNotFound(member.admission_id.clone()))?;
            admissions.insert(admission.id.clone(), admission);
        }

        let strike = admissions
            .values()
            .map(|admission| admission.no_show)
            .max()
            .unwrap_or_default()
            .escalate();

        let mut plan = BookingPlan::default();
        plan.guard(Guard::FamilyBookings {
            parent_email: booking.parent_email.clone(),
            expected: family.iter().map(|b| b.id.clone()).collect(),
        });
        let vacated = family
            .iter()
            .map(|b| b.slot_id.clone())
            .collect::<BTreeSet<_>>();

        let now = clock.now();
        let (destination, moved) = match strike {
            NoShowStrike::First => {
                let destination = self.stage_first_strike(&mut plan, &missed, family)?;
                for admission in admissions.values_mut() {
                    admission.no_show = admission.no_show.max(NoShowStrike::First);
                }
                destination
            }
            NoShowStrike::Second | NoShowStrike::Clear => {
                for member in family {
                    plan.release_booking(store, member)?;
                }
                for admission in admissions.values_mut() {
                    admission.move_to_waitlist(WaitlistType::System, now);
                    admission.no_show = NoShowStrike::Second;
                    admission.notes.push(format!(
                        "Moved to waitlist after a second missed counselling session on {}",
                        missed.date
                    ));
                }
                (None, Vec::new())
            }
        };

        for admission in admissions.values() {
            plan.put_admission(admission.clone());
        }
        let destination_id = destination.as_ref().map(|slot| slot.id.clone());
        let vacated_slots = vacated
            .iter()
            .filter(|id| destination_id.as_ref() != Some(*id))
            .filter_map(|id| plan.staged_slot(id).map(Slot::view))
            .collect();

        store.commit(plan.into_change_set())?;

        let outcome = NoShowOutcome {
            strike,
            parent_email: family_key(&booking.parent_email),
            affected_admissions: admissions.keys().cloned().collect(),
            destination,
            vacated_slots,
        };
        Ok((outcome, moved, admissions.into_values().collect()))
    }

    /// Move every family booking to the earliest open future slot, growing it so nobody
    /// already booked there is displaced.
    fn stage_first_strike(
        &self,
        plan: &mut BookingPlan,
        missed: &Slot,
        family: Vec<Booking>,
    ) -> Result<(Option<SlotView>, Vec<BookingId>), SchedulingError> {
        let store = self.coordinator.store();
        let now = self.coordinator.clock().now();
        let destination = self
            .coordinator
            .next_open_slot(&missed.id)?
            .ok_or(SchedulingError::NoFutureSlotAvailable)?;
        let destination_id: SlotId = destination.id.clone();
        plan.adopt_slot(destination);

        let movers: Vec<Booking> = family
            .into_iter()
            .filter(|b| b.slot_id != destination_id)
            .collect();
        let moved = movers.iter().map(|b| b.id.clone()).collect::<Vec<_>>();

        for booking in movers {
            plan.move_booking(store, booking, &destination_id, now)?;
        }
        let arrivals = moved.len() as u32;
        let slot = plan.slot(store, &destination_id)?;
        SlotLedger::grow_by(slot, arrivals);

        Ok((Some(slot.view()), moved))
    }
}

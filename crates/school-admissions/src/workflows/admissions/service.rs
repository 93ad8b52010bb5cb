use std::sync::Arc;

use chrono::NaiveDate;

use super::booking::{BookingCoordinator, BookingReceipt, CancelledBooking};
use super::clock::{Clock, SchoolClock};
use super::domain::{
    Admission, AdmissionId, AdmissionStatus, Booking, BookingId, SlotId, SlotView, TokenId,
};
use super::error::SchedulingError;
use super::intake::{AdmissionIntake, EnquiryConversion, IntakeOutcome};
use super::no_show::{NoShowOutcome, NoShowPolicyEngine};
use super::notify::NotificationDispatcher;
use super::planner::{BulkOutcome, BulkSlotRequest, SlotPlanner, SlotRequest, SlotUpdate};
use super::policy::SchedulingPolicy;
use super::reminders::{ReminderReport, ReminderSweep};
use super::reschedule::{CancellationOutcome, ParentRescheduleOutcome, RescheduleEngine};
use super::seats::{GradeOccupancy, SeatAllocator, SeatRuleLookup};
use super::store::AdmissionsStore;

/// Service composing the slot planner, booking coordinator and the engines built on it.
pub struct AdmissionsService<S, N> {
    store: Arc<S>,
    planner: SlotPlanner<S>,
    coordinator: BookingCoordinator<S, N>,
    intake: AdmissionIntake<S, N>,
    no_shows: NoShowPolicyEngine<S, N>,
    reschedules: RescheduleEngine<S, N>,
    reminders: ReminderSweep<S, N>,
    policy: SchedulingPolicy,
}

impl<S, N> AdmissionsService<S, N>
where
    S: AdmissionsStore + 'static,
    N: NotificationDispatcher + 'static,
{
    pub fn new(
        store: Arc<S>,
        notifier: Arc<N>,
        rules: Arc<dyn SeatRuleLookup>,
        clock: Arc<dyn Clock>,
        policy: SchedulingPolicy,
    ) -> Self {
        let clock = SchoolClock::new(clock, policy.school_offset());
        let seats = SeatAllocator::new(store.clone(), rules, policy.default_grade_seats);
        let coordinator = BookingCoordinator::new(
            store.clone(),
            notifier,
            seats.clone(),
            clock.clone(),
            policy.max_commit_attempts,
        );

        Self {
            planner: SlotPlanner::new(store.clone(), clock, policy.clone()),
            intake: AdmissionIntake::new(seats, coordinator.clone()),
            no_shows: NoShowPolicyEngine::new(coordinator.clone()),
            reschedules: RescheduleEngine::new(coordinator.clone()),
            reminders: ReminderSweep::new(coordinator.clone(), policy.reminder_days.clone()),
            coordinator,
            store,
            policy,
        }
    }

    pub fn policy(&self) -> &SchedulingPolicy {
        &self.policy
    }

    pub fn create_slot(&self, request: SlotRequest) -> Result<SlotView, SchedulingError> {
        self.planner.create(request)
    }

    pub fn generate_slots(
        &self,
        request: BulkSlotRequest,
    ) -> Result<BulkOutcome, SchedulingError> {
        self.planner.generate(request)
    }

    pub fn update_slot(
        &self,
        slot_id: &SlotId,
        update: SlotUpdate,
    ) -> Result<SlotView, SchedulingError> {
        self.planner.update(slot_id, update)
    }

    pub fn delete_slot(&self, slot_id: &SlotId) -> Result<SlotView, SchedulingError> {
        self.planner.delete(slot_id)
    }

    pub fn slots(&self, date: Option<NaiveDate>) -> Result<Vec<SlotView>, SchedulingError> {
        self.planner.list(date)
    }

    pub fn slot(&self, slot_id: &SlotId) -> Result<SlotView, SchedulingError> {
        self.planner.get(slot_id)
    }

    pub fn book(
        &self,
        admission_id: &AdmissionId,
        slot_id: &SlotId,
    ) -> Result<BookingReceipt, SchedulingError> {
        self.coordinator.book(admission_id, slot_id)
    }

    pub fn cancel_booking(
        &self,
        booking_id: &BookingId,
    ) -> Result<CancelledBooking, SchedulingError> {
        self.coordinator.cancel(booking_id)
    }

    pub fn booking(&self, booking_id: &BookingId) -> Result<Booking, SchedulingError> {
        self.store
            .booking(booking_id)?
            .ok_or_else(|| SchedulingError::BookingNotFound(booking_id.clone()))
    }

    pub fn bookings_for_slot(&self, slot_id: &SlotId) -> Result<Vec<Booking>, SchedulingError> {
        self.planner.get(slot_id)?;
        Ok(self.store.bookings_for_slot(slot_id)?)
    }

    pub fn record_no_show(
        &self,
        booking_id: &BookingId,
    ) -> Result<NoShowOutcome, SchedulingError> {
        self.no_shows.record(booking_id)
    }

    pub fn reschedule_options(
        &self,
        token_id: &TokenId,
    ) -> Result<Vec<SlotView>, SchedulingError> {
        self.reschedules.options(token_id)
    }

    pub fn reschedule_for_parent(
        &self,
        token_id: &TokenId,
        slot_id: &SlotId,
    ) -> Result<ParentRescheduleOutcome, SchedulingError> {
        self.reschedules.reschedule_for_parent(token_id, slot_id)
    }

    pub fn cancel_slot(&self, slot_id: &SlotId) -> Result<CancellationOutcome, SchedulingError> {
        self.reschedules.cancel_slot(slot_id)
    }

    pub fn convert_enquiry(
        &self,
        request: EnquiryConversion,
    ) -> Result<IntakeOutcome, SchedulingError> {
        self.intake.convert(request)
    }

    pub fn admission(&self, admission_id: &AdmissionId) -> Result<Admission, SchedulingError> {
        self.intake.admission(admission_id)
    }

    pub fn decide(
        &self,
        admission_id: &AdmissionId,
        status: AdmissionStatus,
    ) -> Result<Admission, SchedulingError> {
        self.intake.decide(admission_id, status)
    }

    pub fn grade_occupancy(&self, grade: &str) -> Result<GradeOccupancy, SchedulingError> {
        self.intake.occupancy(grade)
    }

    pub fn send_reminders(&self) -> Result<ReminderReport, SchedulingError> {
        self.reminders.run()
    }
}

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::booking::{BookingCoordinator, BookingPlan, BookingReceipt};
use super::domain::{
    family_key, Admission, AdmissionId, AdmissionStatus, EnquiryId, NoShowStrike, SlotId, TokenId,
    WaitlistType,
};
use super::error::SchedulingError;
use super::notify::NotificationDispatcher;
use super::seats::{GradeOccupancy, SeatAllocator, SeatDecision};
use super::store::{retry_on_conflict, AdmissionsStore, ChangeSet};

/// Request to turn an enquiry into an admission application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnquiryConversion {
    pub enquiry_id: EnquiryId,
    #[serde(default)]
    pub token_id: Option<TokenId>,
    pub parent_email: String,
    pub student_name: String,
    pub grade: String,
    /// Create as `submitted` rather than `draft`.
    #[serde(default)]
    pub submit: bool,
    #[serde(default)]
    pub request_waitlist: bool,
    #[serde(default)]
    pub slot_id: Option<SlotId>,
    #[serde(default)]
    pub additional_fields: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IntakeOutcome {
    pub admission: Admission,
    pub seat: SeatDecision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub booking: Option<BookingReceipt>,
    /// Booking failures do not undo the admission; the reason is reported here.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub booking_error: Option<String>,
}

/// Enquiry conversion and administrative status decisions.
pub struct AdmissionIntake<S, N> {
    seats: SeatAllocator<S>,
    coordinator: BookingCoordinator<S, N>,
}

impl<S, N> AdmissionIntake<S, N>
where
    S: AdmissionsStore + 'static,
    N: NotificationDispatcher + 'static,
{
    pub fn new(seats: SeatAllocator<S>, coordinator: BookingCoordinator<S, N>) -> Self {
        Self { seats, coordinator }
    }

    pub fn convert(&self, request: EnquiryConversion) -> Result<IntakeOutcome, SchedulingError> {
        let parent_email = family_key(&request.parent_email);
        if parent_email.is_empty() || !parent_email.contains('@') {
            return Err(SchedulingError::Validation(
                "parent_email must be a valid e-mail address".to_string(),
            ));
        }
        let grade = request.grade.trim().to_string();
        if grade.is_empty() {
            return Err(SchedulingError::Validation("grade is required".to_string()));
        }
        if request.enquiry_id.0.trim().is_empty() {
            return Err(SchedulingError::Validation(
                "enquiry_id is required".to_string(),
            ));
        }

        let seat = self.seats.evaluate(&grade, request.request_waitlist)?;
        let now = self.coordinator.clock().now();

        let mut admission = Admission {
            id: AdmissionId::next(),
            enquiry_id: request.enquiry_id,
            token_id: request.token_id.unwrap_or_else(TokenId::next),
            parent_email,
            student_name: request.student_name.trim().to_string(),
            grade,
            status: if request.submit {
                AdmissionStatus::Submitted
            } else {
                AdmissionStatus::Draft
            },
            no_show: NoShowStrike::Clear,
            waitlist_date: None,
            waitlist_type: None,
            slot_booking_id: None,
            notes: Vec::new(),
            additional_fields: request.additional_fields,
            created_at: now,
            version: 0,
        };
        if seat.is_waitlisted() {
            admission.move_to_waitlist(WaitlistType::Parent, now);
        }

        let mut changes = ChangeSet::new();
        changes.put_admission(admission.clone());
        self.coordinator.store().commit(changes)?;

        info!(
            admission = %admission.id,
            grade = %admission.grade,
            status = admission.status.label(),
            occupied = seat.occupancy().occupied,
            total_seats = seat.occupancy().total_seats,
            "enquiry converted"
        );

        let (booking, booking_error) = match (&request.slot_id, seat.is_waitlisted()) {
            (Some(slot_id), false) => match self.coordinator.book(&admission.id, slot_id) {
                Ok(receipt) => (Some(receipt), None),
                Err(err) => {
                    warn!(admission = %admission.id, slot = %slot_id, error = %err, "intake booking failed");
                    (None, Some(err.to_string()))
                }
            },
            _ => (None, None),
        };

        let admission = self.admission(&admission.id)?;
        Ok(IntakeOutcome {
            admission,
            seat,
            booking,
            booking_error,
        })
    }

    pub fn admission(&self, admission_id: &AdmissionId) -> Result<Admission, SchedulingError> {
        self.coordinator
            .store()
            .admission(admission_id)?
            .ok_or_else(|| SchedulingError::AdmissionNotFound(admission_id.clone()))
    }

    pub fn occupancy(&self, grade: &str) -> Result<GradeOccupancy, SchedulingError> {
        self.seats.occupancy(grade)
    }

    /// Administrative status change. Rejecting or waitlisting releases any booking in the
    /// same commit; moving out of the waitlist is the explicit promotion path.
    pub fn decide(
        &self,
        admission_id: &AdmissionId,
        next: AdmissionStatus,
    ) -> Result<Admission, SchedulingError> {
        let admission = retry_on_conflict(self.coordinator.max_commit_attempts(), || {
            self.try_decide(admission_id, next)
        })?;
        info!(admission = %admission.id, status = admission.status.label(), "admission status decided");
        Ok(admission)
    }

    fn try_decide(
        &self,
        admission_id: &AdmissionId,
        next: AdmissionStatus,
    ) -> Result<Admission, SchedulingError> {
        let mut admission = self.admission(admission_id)?;
        if admission.status == next {
            return Ok(admission);
        }
        if !admission.status.can_transition_to(next) {
            return Err(SchedulingError::InvalidTransition {
                from: admission.status,
                to: next,
            });
        }

        let now = self.coordinator.clock().now();
        let mut plan = BookingPlan::default();
        match next {
            AdmissionStatus::Rejected | AdmissionStatus::Waitlisted => {
                let store = self.coordinator.store();
                if let Some(booking) = store.booking_for_admission(admission_id)? {
                    plan.release_booking(store, booking)?;
                }
                if next == AdmissionStatus::Waitlisted {
                    admission.move_to_waitlist(WaitlistType::System, now);
                } else {
                    admission.status = AdmissionStatus::Rejected;
                    admission.slot_booking_id = None;
                }
            }
            _ if admission.status == AdmissionStatus::Waitlisted => {
                admission.leave_waitlist(next);
            }
            _ => admission.status = next,
        }

        plan.put_admission(admission);
        self.coordinator.store().commit(plan.into_change_set())?;
        self.admission(admission_id)
    }
}

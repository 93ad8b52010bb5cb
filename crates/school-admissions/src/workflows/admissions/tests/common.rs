use std::sync::{Arc, Mutex};

use axum::response::Response;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use serde_json::Value;

use crate::workflows::admissions::domain::{
    Admission, AdmissionId, Booking, EnquiryId, GradeSeatRule, NoShowStrike, Slot, SlotView,
};
use crate::workflows::admissions::notify::{
    InviteDelivery, NotificationDispatcher, NotificationError, RescheduleReason,
};
use crate::workflows::admissions::{
    admissions_router, AdmissionsService, AdmissionsStore, Clock, EnquiryConversion, FixedClock,
    InMemoryAdmissionsStore, SchedulingPolicy, SlotRequest, StaticSeatRules,
};

pub(super) const OFFSET_MINUTES: i64 = 330;

/// 2026-11-02 10:00 at the school.
pub(super) fn start_of_day() -> DateTime<Utc> {
    at_local(day(0), 10, 0)
}

/// Calendar day relative to 2026-11-02.
pub(super) fn day(offset: i64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 11, 2).expect("valid date") + Duration::days(offset)
}

pub(super) fn time(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).expect("valid time")
}

/// UTC instant for a school wall-clock time.
pub(super) fn at_local(date: NaiveDate, hour: u32, minute: u32) -> DateTime<Utc> {
    let local = date.and_time(time(hour, minute));
    Utc.from_utc_datetime(&(local - Duration::minutes(OFFSET_MINUTES)))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum Notice {
    Confirmation { booking: String, slot: String },
    Reschedule { booking: String, slot: String, reason: RescheduleReason },
    NoShow { admission: String, strike: NoShowStrike },
    Reminder { booking: String, days_before: u32 },
}

#[derive(Default, Clone)]
pub(super) struct RecordingDispatcher {
    notices: Arc<Mutex<Vec<Notice>>>,
}

impl RecordingDispatcher {
    pub(super) fn notices(&self) -> Vec<Notice> {
        self.notices.lock().expect("dispatcher mutex poisoned").clone()
    }

    fn push(&self, notice: Notice) {
        self.notices
            .lock()
            .expect("dispatcher mutex poisoned")
            .push(notice);
    }
}

impl NotificationDispatcher for RecordingDispatcher {
    fn send_confirmation(
        &self,
        booking: &Booking,
        slot: &Slot,
    ) -> Result<InviteDelivery, NotificationError> {
        self.push(Notice::Confirmation {
            booking: booking.id.0.clone(),
            slot: slot.id.0.clone(),
        });
        Ok(InviteDelivery {
            calendar_invite: true,
            principal_invite: true,
        })
    }

    fn send_reschedule(
        &self,
        booking: &Booking,
        slot: &Slot,
        reason: RescheduleReason,
    ) -> Result<InviteDelivery, NotificationError> {
        self.push(Notice::Reschedule {
            booking: booking.id.0.clone(),
            slot: slot.id.0.clone(),
            reason,
        });
        Ok(InviteDelivery {
            calendar_invite: true,
            principal_invite: false,
        })
    }

    fn send_no_show_notice(
        &self,
        admission: &Admission,
        strike: NoShowStrike,
    ) -> Result<(), NotificationError> {
        self.push(Notice::NoShow {
            admission: admission.id.0.clone(),
            strike,
        });
        Ok(())
    }

    fn send_reminder(
        &self,
        booking: &Booking,
        _slot: &Slot,
        days_before: u32,
    ) -> Result<(), NotificationError> {
        self.push(Notice::Reminder {
            booking: booking.id.0.clone(),
            days_before,
        });
        Ok(())
    }
}

/// Every delivery fails; used to show that committed changes stand regardless.
pub(super) struct FailingDispatcher;

impl NotificationDispatcher for FailingDispatcher {
    fn send_confirmation(
        &self,
        _booking: &Booking,
        _slot: &Slot,
    ) -> Result<InviteDelivery, NotificationError> {
        Err(NotificationError::Transport("smtp offline".to_string()))
    }

    fn send_reschedule(
        &self,
        _booking: &Booking,
        _slot: &Slot,
        _reason: RescheduleReason,
    ) -> Result<InviteDelivery, NotificationError> {
        Err(NotificationError::Transport("smtp offline".to_string()))
    }

    fn send_no_show_notice(
        &self,
        _admission: &Admission,
        _strike: NoShowStrike,
    ) -> Result<(), NotificationError> {
        Err(NotificationError::Rejected("mailbox full".to_string()))
    }

    fn send_reminder(
        &self,
        _booking: &Booking,
        _slot: &Slot,
        _days_before: u32,
    ) -> Result<(), NotificationError> {
        Err(NotificationError::Transport("smtp offline".to_string()))
    }
}

pub(super) struct Harness<N = RecordingDispatcher> {
    pub(super) service: Arc<AdmissionsService<InMemoryAdmissionsStore, N>>,
    pub(super) store: Arc<InMemoryAdmissionsStore>,
    pub(super) notifier: Arc<N>,
    pub(super) clock: FixedClock,
}

pub(super) fn seat_rules() -> StaticSeatRules {
    StaticSeatRules::new([
        GradeSeatRule {
            grade: "Class 5".to_string(),
            total_seats: 50,
            min_age: Some(9),
            order: 6,
        },
        GradeSeatRule {
            grade: "Nursery".to_string(),
            total_seats: 2,
            min_age: Some(3),
            order: 1,
        },
    ])
}

pub(super) fn harness() -> Harness {
    harness_with(RecordingDispatcher::default())
}

pub(super) fn harness_with<N>(notifier: N) -> Harness<N>
where
    N: NotificationDispatcher + 'static,
{
    let store = Arc::new(InMemoryAdmissionsStore::new());
    let notifier = Arc::new(notifier);
    let clock = FixedClock::new(start_of_day());
    let service = Arc::new(AdmissionsService::new(
        store.clone(),
        notifier.clone(),
        Arc::new(seat_rules()),
        Arc::new(clock.clone()),
        SchedulingPolicy::default(),
    ));
    Harness {
        service,
        store,
        notifier,
        clock,
    }
}

impl<N> Harness<N>
where
    N: NotificationDispatcher + 'static,
{
    pub(super) fn slot(
        &self,
        date: NaiveDate,
        start: (u32, u32),
        end: (u32, u32),
        capacity: u32,
    ) -> SlotView {
        self.service
            .create_slot(SlotRequest {
                date,
                start_time: time(start.0, start.1),
                end_time: time(end.0, end.1),
                capacity: Some(capacity),
            })
            .expect("slot created")
    }

    /// Submitted admission for `student`, without a booking.
    pub(super) fn admit(&self, parent_email: &str, student: &str, grade: &str) -> Admission {
        self.service
            .convert_enquiry(enquiry(parent_email, student, grade))
            .expect("enquiry converted")
            .admission
    }

    pub(super) fn admit_and_book(
        &self,
        parent_email: &str,
        student: &str,
        slot: &SlotView,
    ) -> Admission {
        let admission = self.admit(parent_email, student, "Class 5");
        self.service
            .book(&admission.id, &slot.id)
            .expect("booking succeeds");
        self.stored_admission(&admission.id)
    }

    pub(super) fn clock_now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub(super) fn stored_slot(&self, view: &SlotView) -> Slot {
        self.store
            .slot(&view.id)
            .expect("store readable")
            .expect("slot present")
    }

    pub(super) fn stored_admission(&self, id: &AdmissionId) -> Admission {
        self.store
            .admission(id)
            .expect("store readable")
            .expect("admission present")
    }

    pub(super) fn booking_of(&self, id: &AdmissionId) -> Option<Booking> {
        self.store.booking_for_admission(id).expect("store readable")
    }

    /// Every slot's booked count matches the bookings that reference it.
    pub(super) fn assert_counts_consistent(&self) {
        for slot in self.store.slots().expect("store readable") {
            let held = self
                .store
                .bookings_for_slot(&slot.id)
                .expect("store readable")
                .len() as u32;
            assert_eq!(slot.booked_count, held, "slot {} count drifted", slot.id);
            assert!(slot.booked_count <= slot.capacity, "slot {} overbooked", slot.id);
        }
    }

    pub(super) fn router(&self) -> axum::Router {
        admissions_router(self.service.clone())
    }
}

pub(super) fn enquiry(parent_email: &str, student: &str, grade: &str) -> EnquiryConversion {
    EnquiryConversion {
        enquiry_id: EnquiryId(format!("enq-{}", student.to_ascii_lowercase())),
        token_id: None,
        parent_email: parent_email.to_string(),
        student_name: student.to_string(),
        grade: grade.to_string(),
        submit: true,
        request_waitlist: false,
        slot_id: None,
        additional_fields: Default::default(),
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}

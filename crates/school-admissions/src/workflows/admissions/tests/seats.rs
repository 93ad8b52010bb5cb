use std::sync::Arc;

use super::common::*;
use crate::workflows::admissions::{
    AdmissionStatus, InMemoryAdmissionsStore, SchedulingError, SeatAllocator, SeatDecision,
    WaitlistType,
};

#[test]
fn full_grade_rejects_submissions_unless_the_parent_opts_into_the_waitlist() {
    let h = harness();
    let slot = h.slot(day(1), (9, 0), (9, 30), 5);
    for n in 0..50 {
        h.admit(&format!("parent{n}@example.com"), &format!("Child{n}"), "Class 5");
    }
    let occupancy = h.service.grade_occupancy("class 5").expect("occupancy");
    assert_eq!(occupancy.occupied, 50);
    assert!(occupancy.is_full());

    match h.service.convert_enquiry(enquiry("late@example.com", "Late", "Class 5")) {
        Err(SchedulingError::GradeFull {
            occupied,
            total_seats,
            ..
        }) => {
            assert_eq!(occupied, 50);
            assert_eq!(total_seats, 50);
        }
        other => panic!("expected grade full, got {other:?}"),
    }

    let mut request = enquiry("late@example.com", "Late", "Class 5");
    request.request_waitlist = true;
    request.slot_id = Some(slot.id.clone());
    let outcome = h.service.convert_enquiry(request).expect("waitlisted");

    assert!(matches!(outcome.seat, SeatDecision::Waitlisted(_)));
    assert_eq!(outcome.admission.status, AdmissionStatus::Waitlisted);
    assert_eq!(outcome.admission.waitlist_type, Some(WaitlistType::Parent));
    assert!(outcome.admission.waitlist_date.is_some());
    assert!(outcome.booking.is_none());
    assert!(h.booking_of(&outcome.admission.id).is_none());
    assert_eq!(h.stored_slot(&slot).booked_count, 0);
}

#[test]
fn drafts_hold_seats_while_rejected_and_waitlisted_do_not() {
    let h = harness();
    let mut draft = enquiry("a@example.com", "Asha", "Nursery");
    draft.submit = false;
    let draft = h.service.convert_enquiry(draft).expect("draft").admission;
    assert_eq!(draft.status, AdmissionStatus::Draft);
    let submitted = h.admit("b@example.com", "Bina", "Nursery");

    let err = h
        .service
        .convert_enquiry(enquiry("c@example.com", "Chetan", "Nursery"))
        .expect_err("two nursery seats taken");
    assert_eq!(err.code(), "grade_full");

    h.service
        .decide(&submitted.id, AdmissionStatus::Rejected)
        .expect("rejected");
    let occupancy = h.service.grade_occupancy("Nursery").expect("occupancy");
    assert_eq!(occupancy.occupied, 1);
    assert_eq!(occupancy.total_seats, 2);

    h.admit("c@example.com", "Chetan", "Nursery");
}

#[test]
fn grades_without_a_rule_fall_back_to_the_default_seat_total() {
    let store = Arc::new(InMemoryAdmissionsStore::new());
    let allocator = SeatAllocator::new(store, Arc::new(seat_rules()), 50);

    let decision = allocator.evaluate("Class 9", false).expect("seated");
    assert_eq!(decision.occupancy().total_seats, 50);
    assert_eq!(decision.occupancy().occupied, 0);
    assert!(!decision.is_waitlisted());
}

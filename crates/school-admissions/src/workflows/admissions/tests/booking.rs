use super::common::*;
use crate::workflows::admissions::{
    AdmissionStatus, BookingOutcome, RescheduleReason, SchedulingError, SlotStatus, SlotUpdate,
};

#[test]
fn booking_takes_a_seat_and_links_the_admission() {
    let h = harness();
    let slot = h.slot(day(1), (9, 0), (9, 30), 2);
    let admission = h.admit("priya@example.com", "Aarav", "Class 5");

    let receipt = h.service.book(&admission.id, &slot.id).expect("booking succeeds");

    assert_eq!(receipt.outcome, BookingOutcome::Created);
    assert_eq!(receipt.slot.booked_count, 1);
    assert_eq!(receipt.slot.status, SlotStatus::Available);
    assert_eq!(
        h.stored_admission(&admission.id).slot_booking_id,
        Some(receipt.booking.id.clone())
    );

    let stored = h.booking_of(&admission.id).expect("booking stored");
    assert!(stored.calendar_invite_sent);
    assert!(stored.principal_invite_sent);
    assert_eq!(
        h.notifier.notices(),
        vec![Notice::Confirmation {
            booking: receipt.booking.id.0.clone(),
            slot: slot.id.0.clone(),
        }]
    );
    h.assert_counts_consistent();
}

#[test]
fn booking_the_same_slot_twice_is_a_no_op() {
    let h = harness();
    let slot = h.slot(day(1), (9, 0), (9, 30), 2);
    let admission = h.admit("priya@example.com", "Aarav", "Class 5");

    let first = h.service.book(&admission.id, &slot.id).expect("first booking");
    let second = h.service.book(&admission.id, &slot.id).expect("second booking");

    assert_eq!(second.outcome, BookingOutcome::Unchanged);
    assert_eq!(second.booking.id, first.booking.id);
    assert_eq!(h.stored_slot(&slot).booked_count, 1);
    assert_eq!(h.notifier.notices().len(), 1);
}

#[test]
fn booking_elsewhere_moves_the_existing_booking() {
    let h = harness();
    let first = h.slot(day(1), (9, 0), (9, 30), 1);
    let second = h.slot(day(2), (9, 0), (9, 30), 1);
    let admission = h.admit("priya@example.com", "Aarav", "Class 5");
    let original = h.service.book(&admission.id, &first.id).expect("booked");
    assert_eq!(h.stored_slot(&first).status, SlotStatus::Full);

    h.clock.advance(chrono::Duration::minutes(5));
    let moved = h.service.book(&admission.id, &second.id).expect("moved");

    assert_eq!(moved.outcome, BookingOutcome::Rescheduled);
    assert_eq!(moved.previous_slot, Some(first.id.clone()));
    assert_eq!(moved.booking.id, original.booking.id);
    assert_eq!(moved.booking.booked_at, h.clock_now());

    let vacated = h.stored_slot(&first);
    assert_eq!(vacated.booked_count, 0);
    assert_eq!(vacated.status, SlotStatus::Available);
    assert_eq!(h.stored_slot(&second).booked_count, 1);

    // Invite flags were reset by the move and only the calendar invite went out again.
    let stored = h.booking_of(&admission.id).expect("booking stored");
    assert!(stored.calendar_invite_sent);
    assert!(!stored.principal_invite_sent);
    assert!(h.notifier.notices().contains(&Notice::Reschedule {
        booking: original.booking.id.0.clone(),
        slot: second.id.0.clone(),
        reason: RescheduleReason::AdminReassignment,
    }));
    h.assert_counts_consistent();
}

#[test]
fn booking_rejects_slots_that_have_started() {
    let h = harness();
    let slot = h.slot(day(0), (11, 0), (11, 30), 2);
    let admission = h.admit("priya@example.com", "Aarav", "Class 5");
    h.clock.set(at_local(day(0), 11, 5));

    match h.service.book(&admission.id, &slot.id) {
        Err(SchedulingError::SlotInPast { slot: view }) => assert_eq!(view.id, slot.id),
        other => panic!("expected slot in past, got {other:?}"),
    }
    assert_eq!(h.stored_slot(&slot).booked_count, 0);
}

#[test]
fn booking_rejects_full_and_disabled_slots() {
    let h = harness();
    let full = h.slot(day(1), (9, 0), (9, 30), 1);
    let disabled = h.slot(day(1), (10, 0), (10, 30), 1);
    let first = h.admit("priya@example.com", "Aarav", "Class 5");
    let second = h.admit("dev@example.com", "Kabir", "Class 5");
    h.service.book(&first.id, &full.id).expect("booked");
    h.service
        .update_slot(
            &disabled.id,
            SlotUpdate {
                status: Some(SlotStatus::Disabled),
                capacity: None,
            },
        )
        .expect("disabled");

    let err = h.service.book(&second.id, &full.id).expect_err("slot is full");
    assert_eq!(err.code(), "slot_unavailable");
    assert_eq!(err.slot().map(|slot| slot.booked_count), Some(1));

    let err = h
        .service
        .book(&second.id, &disabled.id)
        .expect_err("slot is disabled");
    assert!(matches!(err, SchedulingError::SlotUnavailable { .. }));
    assert!(h.booking_of(&second.id).is_none());
}

#[test]
fn rejected_admissions_cannot_book() {
    let h = harness();
    let slot = h.slot(day(1), (9, 0), (9, 30), 1);
    let admission = h.admit("priya@example.com", "Aarav", "Class 5");
    h.service
        .decide(&admission.id, AdmissionStatus::Rejected)
        .expect("rejected");

    match h.service.book(&admission.id, &slot.id) {
        Err(SchedulingError::AdmissionNotBookable { status, .. }) => {
            assert_eq!(status, AdmissionStatus::Rejected)
        }
        other => panic!("expected not bookable, got {other:?}"),
    }
}

#[test]
fn cancel_frees_the_seat_until_the_slot_ends() {
    let h = harness();
    let slot = h.slot(day(1), (9, 0), (9, 30), 1);
    let kept = h.slot(day(1), (10, 0), (10, 30), 1);
    let admission = h.admit("priya@example.com", "Aarav", "Class 5");
    let other = h.admit("dev@example.com", "Kabir", "Class 5");
    let receipt = h.service.book(&admission.id, &slot.id).expect("booked");
    let late = h.service.book(&other.id, &kept.id).expect("booked");

    let cancelled = h
        .service
        .cancel_booking(&receipt.booking.id)
        .expect("cancelled");
    assert_eq!(cancelled.slot.booked_count, 0);
    assert_eq!(cancelled.slot.status, SlotStatus::Available);
    assert!(h.stored_admission(&admission.id).slot_booking_id.is_none());

    h.clock.set(at_local(day(1), 10, 30));
    let err = h
        .service
        .cancel_booking(&late.booking.id)
        .expect_err("slot has ended");
    assert!(matches!(err, SchedulingError::SlotEnded { .. }));
    assert_eq!(h.stored_slot(&kept).booked_count, 1);
    h.assert_counts_consistent();
}

#[test]
fn failed_notifications_never_undo_a_booking() {
    let h = harness_with(FailingDispatcher);
    let slot = h.slot(day(1), (9, 0), (9, 30), 1);
    let admission = h.admit("priya@example.com", "Aarav", "Class 5");

    let receipt = h.service.book(&admission.id, &slot.id).expect("booking stands");

    assert_eq!(receipt.outcome, BookingOutcome::Created);
    let stored = h.booking_of(&admission.id).expect("booking stored");
    assert!(!stored.calendar_invite_sent);
    assert_eq!(h.stored_slot(&slot).booked_count, 1);
}

#[test]
fn concurrent_bookings_never_overshoot_capacity() {
    let h = harness();
    let slot = h.slot(day(1), (9, 0), (9, 30), 3);
    let admissions = (0..10)
        .map(|n| h.admit(&format!("parent{n}@example.com"), &format!("Child{n}"), "Class 5"))
        .collect::<Vec<_>>();

    let results = std::thread::scope(|scope| {
        let handles = admissions
            .iter()
            .map(|admission| {
                let service = &h.service;
                let slot_id = &slot.id;
                scope.spawn(move || service.book(&admission.id, slot_id))
            })
            .collect::<Vec<_>>();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("booking thread panicked"))
            .collect::<Vec<_>>()
    });

    let booked = results.iter().filter(|result| result.is_ok()).count();
    assert_eq!(booked, 3);
    assert!(results.iter().filter_map(|result| result.as_ref().err()).all(
        |err| matches!(err, SchedulingError::SlotUnavailable { .. })
    ));

    let stored = h.stored_slot(&slot);
    assert_eq!(stored.booked_count, 3);
    assert_eq!(stored.status, SlotStatus::Full);
    h.assert_counts_consistent();
}

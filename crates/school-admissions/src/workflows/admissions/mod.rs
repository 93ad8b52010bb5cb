//! Counselling-slot scheduling and admission progression.
//!
//! Slots, bookings and admissions live behind [`AdmissionsStore`]. Every mutation is a
//! read-decide-commit cycle against versioned records, so concurrent bookings, no-shows
//! and cancellations either apply in full or retry on a fresh read.

pub mod booking;
pub mod clock;
pub mod domain;
pub mod error;
pub mod intake;
pub(crate) mod ledger;
pub mod no_show;
pub mod notify;
pub mod planner;
pub mod policy;
pub mod reminders;
pub mod reschedule;
pub mod router;
pub mod seats;
pub mod service;
pub mod store;

#[cfg(test)]
mod tests;

pub use booking::{BookingCoordinator, BookingOutcome, BookingReceipt, CancelledBooking};
pub use clock::{Clock, FixedClock, SchoolClock, SystemClock};
pub use domain::{
    family_key, Admission, AdmissionId, AdmissionStatus, AdmissionView, Booking, BookingId,
    EnquiryId, GradeSeatRule, NoShowStrike, Slot, SlotId, SlotStatus, SlotView, TokenId,
    WaitlistType,
};
pub use error::{ErrorKind, SchedulingError};
pub use intake::{AdmissionIntake, EnquiryConversion, IntakeOutcome};
pub use no_show::{NoShowOutcome, NoShowPolicyEngine};
pub use notify::{InviteDelivery, NotificationDispatcher, NotificationError, RescheduleReason};
pub use planner::{
    BulkOutcome, BulkSlotRequest, SkipReason, SkippedSlot, SlotPlanner, SlotRequest, SlotUpdate,
    TimeWindow,
};
pub use policy::SchedulingPolicy;
pub use reminders::{ReminderReport, ReminderSweep};
pub use reschedule::{CancellationOutcome, FamilyMove, ParentRescheduleOutcome, RescheduleEngine};
pub use router::admissions_router;
pub use seats::{GradeOccupancy, SeatAllocator, SeatDecision, SeatRuleLookup, StaticSeatRules};
pub use service::AdmissionsService;
pub use store::{AdmissionsStore, Change, ChangeSet, Guard, InMemoryAdmissionsStore, StoreError};

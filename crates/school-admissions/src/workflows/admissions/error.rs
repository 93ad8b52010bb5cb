use chrono::{NaiveDate, NaiveTime};
use serde::Serialize;

use super::domain::{AdmissionId, AdmissionStatus, BookingId, SlotId, SlotView, TokenId};
use super::store::StoreError;

/// Coarse classification used to map engine failures onto transport responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed input, rejected before any read-modify-write.
    Validation,
    /// The current record state forbids the change; the state is returned alongside.
    Conflict,
    /// A business rule rejects the transition. Not retried.
    State,
    NotFound,
    /// No destination slot exists for a cascade; needs manual resolution.
    Exhaustion,
    Infrastructure,
}

/// Error raised by the scheduling and admission-progression engine.
#[derive(Debug, thiserror::Error)]
pub enum SchedulingError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("slot end time {end} must be after start time {start}")]
    InvalidTimeRange { start: NaiveTime, end: NaiveTime },
    #[error("slot must last at least {minimum} minutes (requested {requested})")]
    DurationTooShort { minimum: u32, requested: i64 },
    #[error("slot on {date} starting {start} is in the past")]
    StartsInPast { date: NaiveDate, start: NaiveTime },

    #[error("slot on {date} {start}-{end} overlaps slot {existing}")]
    SlotOverlap {
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
        existing: SlotId,
    },
    #[error("slot {} is not accepting bookings (status {}, {}/{} booked)", .slot.id, .slot.status.label(), .slot.booked_count, .slot.capacity)]
    SlotUnavailable { slot: SlotView },
    #[error("slot {} is already at capacity {}", .slot.id, .slot.capacity)]
    CapacityExceeded { slot: SlotView },
    #[error("capacity {requested} is invalid for slot {} with {} bookings", .slot.id, .slot.booked_count)]
    InvalidCapacity { requested: u32, slot: SlotView },
    #[error("slot {} still has {} active bookings", .slot.id, .slot.booked_count)]
    HasActiveBookings { slot: SlotView },
    #[error("slot {} is full and cannot be re-opened", .slot.id)]
    SlotFull { slot: SlotView },
    #[error("slot {} has already started", .slot.id)]
    SlotInPast { slot: SlotView },
    #[error("slot {} has already ended", .slot.id)]
    SlotEnded { slot: SlotView },
    #[error("grade {grade} is full ({occupied}/{total_seats} seats occupied)")]
    GradeFull {
        grade: String,
        occupied: u32,
        total_seats: u32,
    },

    #[error("admission {admission_id} with status {status} cannot hold a booking")]
    AdmissionNotBookable {
        admission_id: AdmissionId,
        status: AdmissionStatus,
    },
    #[error("admission cannot move from {from} to {to}")]
    InvalidTransition {
        from: AdmissionStatus,
        to: AdmissionStatus,
    },
    #[error("no-show can only be recorded while slot {} is in session", .slot.id)]
    NotDuringSlot { slot: SlotView },
    #[error("slot {} is no longer available", .slot.id)]
    SlotNoLongerAvailable { slot: SlotView },
    #[error("slot {} was released before the original booking", .slot.id)]
    ReleasedBeforeBooking { slot: SlotView },
    #[error("slot {} is not earlier than the current booking", .slot.id)]
    NotEarlier { slot: SlotView },

    #[error("slot {0} not found")]
    SlotNotFound(SlotId),
    #[error("booking {0} not found")]
    BookingNotFound(BookingId),
    #[error("admission {0} not found")]
    AdmissionNotFound(AdmissionId),
    #[error("no booking found for token {0}")]
    TokenNotFound(TokenId),

    #[error("no future slot is available to receive the affected bookings")]
    NoFutureSlotAvailable,

    #[error("gave up after {attempts} conflicting commit attempts")]
    Contention { attempts: u32 },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SchedulingError {
    pub fn kind(&self) -> ErrorKind {
        use SchedulingError::*;
        match self {
            Validation(_)
            | InvalidTimeRange { .. }
            | DurationTooShort { .. }
            | StartsInPast { .. } => ErrorKind::Validation,
            SlotOverlap { .. }
            | SlotUnavailable { .. }
            | CapacityExceeded { .. }
            | InvalidCapacity { .. }
            | HasActiveBookings { .. }
            | SlotFull { .. }
            | SlotInPast { .. }
            | SlotEnded { .. }
            | GradeFull { .. } => ErrorKind::Conflict,
            AdmissionNotBookable { .. }
            | InvalidTransition { .. }
            | NotDuringSlot { .. }
            | SlotNoLongerAvailable { .. }
            | ReleasedBeforeBooking { .. }
            | NotEarlier { .. } => ErrorKind::State,
            SlotNotFound(_) | BookingNotFound(_) | AdmissionNotFound(_) | TokenNotFound(_) => {
                ErrorKind::NotFound
            }
            NoFutureSlotAvailable => ErrorKind::Exhaustion,
            Contention { .. } | Store(_) => ErrorKind::Infrastructure,
        }
    }

    /// Stable machine-readable code for API payloads.
    pub fn code(&self) -> &'static str {
        use SchedulingError::*;
        match self {
            Validation(_) => "validation",
            InvalidTimeRange { .. } => "invalid_time_range",
            DurationTooShort { .. } => "duration_too_short",
            StartsInPast { .. } => "starts_in_past",
            SlotOverlap { .. } => "slot_overlap",
            SlotUnavailable { .. } => "slot_unavailable",
            CapacityExceeded { .. } => "capacity_exceeded",
            InvalidCapacity { .. } => "invalid_capacity",
            HasActiveBookings { .. } => "has_active_bookings",
            SlotFull { .. } => "slot_full",
            SlotInPast { .. } => "slot_in_past",
            SlotEnded { .. } => "slot_ended",
            GradeFull { .. } => "grade_full",
            AdmissionNotBookable { .. } => "admission_not_bookable",
            InvalidTransition { .. } => "invalid_transition",
            NotDuringSlot { .. } => "not_during_slot",
            SlotNoLongerAvailable { .. } => "slot_no_longer_available",
            ReleasedBeforeBooking { .. } => "released_before_booking",
            NotEarlier { .. } => "not_earlier",
            SlotNotFound(_) => "slot_not_found",
            BookingNotFound(_) => "booking_not_found",
            AdmissionNotFound(_) => "admission_not_found",
            TokenNotFound(_) => "token_not_found",
            NoFutureSlotAvailable => "no_future_slot_available",
            Contention { .. } => "contention",
            Store(_) => "store",
        }
    }

    /// Slot state attached to conflict and state errors.
    pub fn slot(&self) -> Option<&SlotView> {
        use SchedulingError::*;
        match self {
            SlotUnavailable { slot }
            | CapacityExceeded { slot }
            | InvalidCapacity { slot, .. }
            | HasActiveBookings { slot }
            | SlotFull { slot }
            | SlotInPast { slot }
            | SlotEnded { slot }
            | NotDuringSlot { slot }
            | SlotNoLongerAvailable { slot }
            | ReleasedBeforeBooking { slot }
            | NotEarlier { slot } => Some(slot),
            _ => None,
        }
    }
}

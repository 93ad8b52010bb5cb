use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! sequential_id {
    ($name:ident, $sequence:ident, $prefix:literal) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        static $sequence: AtomicU64 = AtomicU64::new(1);

        impl $name {
            pub(crate) fn next() -> Self {
                let id = $sequence.fetch_add(1, Ordering::Relaxed);
                Self(format!(concat!($prefix, "-{:06}"), id))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

sequential_id!(SlotId, SLOT_SEQUENCE, "slot");
sequential_id!(BookingId, BOOKING_SEQUENCE, "bkg");
sequential_id!(AdmissionId, ADMISSION_SEQUENCE, "adm");
sequential_id!(TokenId, TOKEN_SEQUENCE, "tok");

/// Enquiry identifiers are minted by the intake front office, never by this engine.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EnquiryId(pub String);

/// Canonical family key: parents are matched on a trimmed, lower-cased e-mail address.
pub fn family_key(parent_email: &str) -> String {
    parent_email.trim().to_ascii_lowercase()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Available,
    Full,
    Disabled,
}

impl SlotStatus {
    pub fn label(&self) -> &'static str {
        match self {
            SlotStatus::Available => "available",
            SlotStatus::Full => "full",
            SlotStatus::Disabled => "disabled",
        }
    }
}

/// A counselling time window on a single calendar day.
///
/// `date`, `start_time` and `end_time` are school wall-clock values; `created_at` is an
/// absolute instant used when comparing against booking times.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub id: SlotId,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub capacity: u32,
    pub booked_count: u32,
    pub status: SlotStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
}

impl Slot {
    pub fn starts_at(&self) -> NaiveDateTime {
        self.date.and_time(self.start_time)
    }

    pub fn ends_at(&self) -> NaiveDateTime {
        self.date.and_time(self.end_time)
    }

    pub fn remaining(&self) -> u32 {
        self.capacity.saturating_sub(self.booked_count)
    }

    /// True when a fresh booking may be placed here, ignoring wall-clock checks.
    pub fn accepts_booking(&self) -> bool {
        self.status == SlotStatus::Available && self.booked_count < self.capacity
    }

    pub fn is_live_at(&self, local_now: NaiveDateTime) -> bool {
        self.starts_at() <= local_now && local_now < self.ends_at()
    }

    /// Ordering used everywhere a slot is called "earlier" or "earliest".
    pub fn sort_key(&self) -> (NaiveDate, NaiveTime, &SlotId) {
        (self.date, self.start_time, &self.id)
    }

    pub fn is_earlier_than(&self, other: &Slot) -> bool {
        self.date < other.date || (self.date == other.date && self.start_time < other.start_time)
    }

    pub fn overlaps(&self, date: NaiveDate, start: NaiveTime, end: NaiveTime) -> bool {
        self.date == date && windows_overlap(self.start_time, self.end_time, start, end)
    }

    pub fn view(&self) -> SlotView {
        SlotView {
            id: self.id.clone(),
            date: self.date,
            start_time: self.start_time,
            end_time: self.end_time,
            capacity: self.capacity,
            booked_count: self.booked_count,
            remaining: self.remaining(),
            status: self.status,
        }
    }
}

/// Half-open interval overlap on a single day.
pub fn windows_overlap(
    start_a: NaiveTime,
    end_a: NaiveTime,
    start_b: NaiveTime,
    end_b: NaiveTime,
) -> bool {
    start_a < end_b && end_a > start_b
}

/// Externally visible slot state, also attached to conflict errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotView {
    pub id: SlotId,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub capacity: u32,
    pub booked_count: u32,
    pub remaining: u32,
    pub status: SlotStatus,
}

/// Reservation linking one admission to one slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub slot_id: SlotId,
    pub admission_id: AdmissionId,
    pub token_id: TokenId,
    pub parent_email: String,
    pub booked_at: DateTime<Utc>,
    #[serde(default)]
    pub reminders_sent: BTreeSet<u32>,
    #[serde(default)]
    pub calendar_invite_sent: bool,
    #[serde(default)]
    pub principal_invite_sent: bool,
    #[serde(default)]
    pub version: u64,
}

impl Booking {
    /// Point the booking at a new slot and clear every notification guard so the
    /// family is told about the new time.
    pub(crate) fn relocate(&mut self, slot_id: SlotId, booked_at: DateTime<Utc>) {
        self.slot_id = slot_id;
        self.booked_at = booked_at;
        self.reminders_sent.clear();
        self.calendar_invite_sent = false;
        self.principal_invite_sent = false;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionStatus {
    Draft,
    Submitted,
    Approved,
    Rejected,
    Waitlisted,
    Confirmed,
}

impl AdmissionStatus {
    pub fn label(&self) -> &'static str {
        match self {
            AdmissionStatus::Draft => "draft",
            AdmissionStatus::Submitted => "submitted",
            AdmissionStatus::Approved => "approved",
            AdmissionStatus::Rejected => "rejected",
            AdmissionStatus::Waitlisted => "waitlisted",
            AdmissionStatus::Confirmed => "confirmed",
        }
    }

    /// Statuses allowed to hold a counselling booking.
    pub fn is_bookable(&self) -> bool {
        match self {
            AdmissionStatus::Draft
            | AdmissionStatus::Submitted
            | AdmissionStatus::Approved
            | AdmissionStatus::Confirmed
            | AdmissionStatus::Waitlisted => true,
            AdmissionStatus::Rejected => false,
        }
    }

    /// Statuses counted against a grade's seat total. Draft is included on every path.
    pub fn occupies_seat(&self) -> bool {
        match self {
            AdmissionStatus::Draft
            | AdmissionStatus::Submitted
            | AdmissionStatus::Approved
            | AdmissionStatus::Confirmed => true,
            AdmissionStatus::Rejected | AdmissionStatus::Waitlisted => false,
        }
    }

    /// Administrative transition table. Same-status requests are handled by the caller.
    pub fn can_transition_to(&self, next: AdmissionStatus) -> bool {
        use AdmissionStatus::*;
        matches!(
            (self, next),
            (Draft, Submitted)
                | (Draft, Rejected)
                | (Draft, Waitlisted)
                | (Submitted, Approved)
                | (Submitted, Rejected)
                | (Submitted, Waitlisted)
                | (Approved, Confirmed)
                | (Approved, Rejected)
                | (Approved, Waitlisted)
                | (Waitlisted, Submitted)
                | (Waitlisted, Approved)
                | (Waitlisted, Rejected)
        )
    }
}

impl fmt::Display for AdmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Two-strike no-show counter. Serialized as the plain count (0, 1 or 2).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum NoShowStrike {
    #[default]
    Clear,
    First,
    Second,
}

impl NoShowStrike {
    pub fn count(&self) -> u8 {
        match self {
            NoShowStrike::Clear => 0,
            NoShowStrike::First => 1,
            NoShowStrike::Second => 2,
        }
    }

    /// The strike a further missed session escalates to. Capped at `Second`.
    pub fn escalate(&self) -> NoShowStrike {
        match self {
            NoShowStrike::Clear => NoShowStrike::First,
            NoShowStrike::First | NoShowStrike::Second => NoShowStrike::Second,
        }
    }
}

impl From<NoShowStrike> for u8 {
    fn from(value: NoShowStrike) -> Self {
        value.count()
    }
}

impl TryFrom<u8> for NoShowStrike {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(NoShowStrike::Clear),
            1 => Ok(NoShowStrike::First),
            2 => Ok(NoShowStrike::Second),
            other => Err(format!("no-show count must be 0, 1 or 2 (found {other})")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitlistType {
    Parent,
    System,
}

/// The evolving application record created when an enquiry is converted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Admission {
    pub id: AdmissionId,
    pub enquiry_id: EnquiryId,
    pub token_id: TokenId,
    pub parent_email: String,
    pub student_name: String,
    pub grade: String,
    pub status: AdmissionStatus,
    #[serde(default)]
    pub no_show: NoShowStrike,
    pub waitlist_date: Option<DateTime<Utc>>,
    pub waitlist_type: Option<WaitlistType>,
    pub slot_booking_id: Option<BookingId>,
    #[serde(default)]
    pub notes: Vec<String>,
    /// Opaque form payload carried through unchanged.
    #[serde(default)]
    pub additional_fields: BTreeMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
}

impl Admission {
    pub(crate) fn move_to_waitlist(&mut self, kind: WaitlistType, at: DateTime<Utc>) {
        self.status = AdmissionStatus::Waitlisted;
        self.waitlist_date = Some(at);
        self.waitlist_type = Some(kind);
        self.slot_booking_id = None;
    }

    pub(crate) fn leave_waitlist(&mut self, status: AdmissionStatus) {
        self.status = status;
        self.waitlist_date = None;
        self.waitlist_type = None;
    }

    pub fn view(&self) -> AdmissionView {
        AdmissionView {
            admission_id: self.id.clone(),
            enquiry_id: self.enquiry_id.clone(),
            grade: self.grade.clone(),
            status: self.status.label(),
            no_show_count: self.no_show.count(),
            waitlist_date: self.waitlist_date,
            waitlist_type: self.waitlist_type,
            slot_booking_id: self.slot_booking_id.clone(),
        }
    }
}

/// Sanitized admission state for API responses.
#[derive(Debug, Clone, Serialize)]
pub struct AdmissionView {
    pub admission_id: AdmissionId,
    pub enquiry_id: EnquiryId,
    pub grade: String,
    pub status: &'static str,
    pub no_show_count: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub waitlist_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub waitlist_type: Option<WaitlistType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot_booking_id: Option<BookingId>,
}

/// Per-grade seat ceiling owned by configuration management.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradeSeatRule {
    pub grade: String,
    pub total_seats: u32,
    #[serde(default)]
    pub min_age: Option<u8>,
    #[serde(default)]
    pub order: u32,
}

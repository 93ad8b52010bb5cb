use serde::{Deserialize, Serialize};
use tracing::warn;

use super::domain::{Admission, Booking, NoShowStrike, Slot};

/// Outbound notice hooks (message, e-mail, calendar adapters).
///
/// Delivery is best effort: the engine logs failures and never reverses a committed
/// slot or booking change because of them.
pub trait NotificationDispatcher: Send + Sync {
    fn send_confirmation(
        &self,
        booking: &Booking,
        slot: &Slot,
    ) -> Result<InviteDelivery, NotificationError>;

    fn send_reschedule(
        &self,
        booking: &Booking,
        slot: &Slot,
        reason: RescheduleReason,
    ) -> Result<InviteDelivery, NotificationError>;

    fn send_no_show_notice(
        &self,
        admission: &Admission,
        strike: NoShowStrike,
    ) -> Result<(), NotificationError>;

    fn send_reminder(
        &self,
        booking: &Booking,
        slot: &Slot,
        days_before: u32,
    ) -> Result<(), NotificationError>;
}

/// Which calendar invites went out with a confirmation or reschedule notice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InviteDelivery {
    pub calendar_invite: bool,
    pub principal_invite: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RescheduleReason {
    AdminReassignment,
    ParentRequest,
    NoShow,
    SlotCancelled,
}

impl RescheduleReason {
    pub fn label(&self) -> &'static str {
        match self {
            RescheduleReason::AdminReassignment => "admin_reassignment",
            RescheduleReason::ParentRequest => "parent_request",
            RescheduleReason::NoShow => "no_show",
            RescheduleReason::SlotCancelled => "slot_cancelled",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("notification transport unavailable: {0}")]
    Transport(String),
    #[error("notification rejected: {0}")]
    Rejected(String),
}

/// Log a failed delivery and hand back whatever succeeded.
pub(crate) fn delivered<T>(
    result: Result<T, NotificationError>,
    notice: &'static str,
    subject: &str,
) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(notice, subject, error = %err, "notification delivery failed");
            None
        }
    }
}

use serde::Serialize;
use tracing::{debug, info};

use super::booking::BookingCoordinator;
use super::domain::SlotStatus;
use super::error::SchedulingError;
use super::notify::{delivered, NotificationDispatcher};
use super::store::{AdmissionsStore, ChangeSet};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReminderReport {
    pub sent: usize,
    pub failed: usize,
}

/// Dispatches day-before style reminders once per configured offset per booking.
pub struct ReminderSweep<S, N> {
    coordinator: BookingCoordinator<S, N>,
    reminder_days: Vec<u32>,
}

impl<S, N> ReminderSweep<S, N>
where
    S: AdmissionsStore + 'static,
    N: NotificationDispatcher + 'static,
{
    pub fn new(coordinator: BookingCoordinator<S, N>, reminder_days: Vec<u32>) -> Self {
        Self {
            coordinator,
            reminder_days,
        }
    }

    pub fn run(&self) -> Result<ReminderReport, SchedulingError> {
        let store = self.coordinator.store();
        let today = self.coordinator.clock().local_today();
        let mut report = ReminderReport::default();

        for booking in store.bookings()? {
            let Some(slot) = store.slot(&booking.slot_id)? else {
                continue;
            };
            if slot.status == SlotStatus::Disabled {
                continue;
            }
            let days_before = (slot.date - today).num_days();
            let Ok(days_before) = u32::try_from(days_before) else {
                continue;
            };
            if !self.reminder_days.contains(&days_before)
                || booking.reminders_sent.contains(&days_before)
            {
                continue;
            }

            let result = self
                .coordinator
                .notifier()
                .send_reminder(&booking, &slot, days_before);
            if delivered(result, "reminder", &booking.id.0).is_none() {
                report.failed += 1;
                continue;
            }

            report.sent += 1;
            let mut updated = booking;
            updated.reminders_sent.insert(days_before);
            let id = updated.id.clone();
            let mut changes = ChangeSet::new();
            changes.put_booking(updated);
            if let Err(err) = store.commit(changes) {
                debug!(booking = %id, error = %err, "reminder sent but not recorded");
            }
        }

        info!(sent = report.sent, failed = report.failed, "reminder sweep finished");
        Ok(report)
    }
}

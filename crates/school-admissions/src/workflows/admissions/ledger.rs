//! Capacity and status arithmetic for counselling slots.
//!
//! Nothing here touches bookings. Callers pair every mutation with the matching booking
//! change in one [`ChangeSet`](super::store::ChangeSet).

use super::domain::{Slot, SlotStatus};
use super::error::SchedulingError;

pub struct SlotLedger;

impl SlotLedger {
    /// Take one seat. Fails when the slot is already at capacity.
    pub fn increment(slot: &mut Slot) -> Result<(), SchedulingError> {
        if slot.booked_count >= slot.capacity {
            return Err(SchedulingError::CapacityExceeded { slot: slot.view() });
        }
        slot.booked_count += 1;
        Self::refresh_status(slot);
        Ok(())
    }

    /// Release one seat. Never drops below zero and never re-opens a disabled slot.
    pub fn decrement(slot: &mut Slot) {
        slot.booked_count = slot.booked_count.saturating_sub(1);
        Self::refresh_status(slot);
    }

    /// Admit `arrivals` displaced bookings by growing capacity by the same amount, so no
    /// unrelated booking loses its place.
    pub fn grow_by(slot: &mut Slot, arrivals: u32) {
        slot.capacity = slot.capacity.saturating_add(arrivals);
        slot.booked_count = slot.booked_count.saturating_add(arrivals);
        Self::refresh_status(slot);
    }

    /// Admit `arrivals` displaced bookings, raising capacity only as far as needed to hold
    /// them on top of the current bookings.
    pub fn grow_to_fit(slot: &mut Slot, arrivals: u32) {
        let required = slot.booked_count.saturating_add(arrivals);
        slot.capacity = slot.capacity.max(required);
        slot.booked_count = required;
        Self::refresh_status(slot);
    }

    pub fn set_capacity(slot: &mut Slot, capacity: u32) -> Result<(), SchedulingError> {
        if capacity == 0 || capacity < slot.booked_count {
            return Err(SchedulingError::InvalidCapacity {
                requested: capacity,
                slot: slot.view(),
            });
        }
        slot.capacity = capacity;
        Self::refresh_status(slot);
        Ok(())
    }

    /// Administrative enable/disable. `Full` is derived and cannot be requested.
    pub fn set_status(slot: &mut Slot, status: SlotStatus) -> Result<(), SchedulingError> {
        match status {
            SlotStatus::Disabled => {
                if slot.booked_count > 0 {
                    return Err(SchedulingError::HasActiveBookings { slot: slot.view() });
                }
                slot.status = SlotStatus::Disabled;
            }
            SlotStatus::Available => {
                if slot.booked_count >= slot.capacity {
                    return Err(SchedulingError::SlotFull { slot: slot.view() });
                }
                slot.status = SlotStatus::Available;
            }
            SlotStatus::Full => {
                return Err(SchedulingError::Validation(
                    "slot status 'full' is derived from bookings and cannot be set".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Close a slot whose bookings have all been moved elsewhere.
    pub fn retire(slot: &mut Slot) {
        slot.booked_count = 0;
        slot.status = SlotStatus::Disabled;
    }

    fn refresh_status(slot: &mut Slot) {
        slot.status = match slot.status {
            SlotStatus::Disabled => SlotStatus::Disabled,
            _ if slot.booked_count >= slot.capacity => SlotStatus::Full,
            _ => SlotStatus::Available,
        };
    }
}

use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_UTC_OFFSET_MINUTES: i32 = 330;
pub const DEFAULT_MIN_SLOT_MINUTES: u32 = 30;
pub const DEFAULT_SLOT_CAPACITY: u32 = 1;
pub const DEFAULT_GRADE_SEATS: u32 = 50;
pub const DEFAULT_MAX_COMMIT_ATTEMPTS: u32 = 32;

/// School-specific scheduling dials shared by every engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulingPolicy {
    pub utc_offset_minutes: i32,
    pub min_slot_minutes: u32,
    pub default_slot_capacity: u32,
    pub default_grade_seats: u32,
    pub reminder_days: Vec<u32>,
    pub max_commit_attempts: u32,
}

impl SchedulingPolicy {
    /// Falls back to UTC when the configured offset is outside +/- 24h.
    pub fn school_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes.saturating_mul(60))
            .unwrap_or_else(|| Utc.fix())
    }
}

impl Default for SchedulingPolicy {
    fn default() -> Self {
        Self {
            utc_offset_minutes: DEFAULT_UTC_OFFSET_MINUTES,
            min_slot_minutes: DEFAULT_MIN_SLOT_MINUTES,
            default_slot_capacity: DEFAULT_SLOT_CAPACITY,
            default_grade_seats: DEFAULT_GRADE_SEATS,
            reminder_days: vec![1, 3],
            max_commit_attempts: DEFAULT_MAX_COMMIT_ATTEMPTS,
        }
    }
}

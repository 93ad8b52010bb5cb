use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use super::domain::GradeSeatRule;
use super::error::SchedulingError;
use super::store::AdmissionsStore;

/// Read-only view over the per-grade seat configuration.
pub trait SeatRuleLookup: Send + Sync {
    fn rule_for(&self, grade: &str) -> Option<GradeSeatRule>;
}

/// Seat rules held in memory, keyed case-insensitively by grade name.
#[derive(Debug, Clone, Default)]
pub struct StaticSeatRules {
    rules: BTreeMap<String, GradeSeatRule>,
}

impl StaticSeatRules {
    pub fn new(rules: impl IntoIterator<Item = GradeSeatRule>) -> Self {
        Self {
            rules: rules
                .into_iter()
                .map(|rule| (grade_key(&rule.grade), rule))
                .collect(),
        }
    }

    pub fn rules(&self) -> impl Iterator<Item = &GradeSeatRule> {
        self.rules.values()
    }
}

impl SeatRuleLookup for StaticSeatRules {
    fn rule_for(&self, grade: &str) -> Option<GradeSeatRule> {
        self.rules.get(&grade_key(grade)).cloned()
    }
}

fn grade_key(grade: &str) -> String {
    grade.trim().to_ascii_lowercase()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GradeOccupancy {
    pub grade: String,
    pub occupied: u32,
    pub total_seats: u32,
}

impl GradeOccupancy {
    pub fn is_full(&self) -> bool {
        self.occupied >= self.total_seats
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum SeatDecision {
    Seated(GradeOccupancy),
    /// The parent asked for the waitlist; honored even when seats remain.
    Waitlisted(GradeOccupancy),
}

impl SeatDecision {
    pub fn is_waitlisted(&self) -> bool {
        matches!(self, SeatDecision::Waitlisted(_))
    }

    pub fn occupancy(&self) -> &GradeOccupancy {
        match self {
            SeatDecision::Seated(occupancy) | SeatDecision::Waitlisted(occupancy) => occupancy,
        }
    }
}

/// Decides at conversion time whether a grade can take another applicant.
///
/// Occupancy is recomputed from the store on every call. The evaluation is never re-run
/// for existing admissions, so freed seats do not promote anyone automatically.
pub struct SeatAllocator<S> {
    store: Arc<S>,
    rules: Arc<dyn SeatRuleLookup>,
    default_total_seats: u32,
}

impl<S> Clone for SeatAllocator<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            rules: self.rules.clone(),
            default_total_seats: self.default_total_seats,
        }
    }
}

impl<S> SeatAllocator<S>
where
    S: AdmissionsStore + 'static,
{
    pub fn new(store: Arc<S>, rules: Arc<dyn SeatRuleLookup>, default_total_seats: u32) -> Self {
        Self {
            store,
            rules,
            default_total_seats,
        }
    }

    pub fn occupancy(&self, grade: &str) -> Result<GradeOccupancy, SchedulingError> {
        let occupied = self
            .store
            .admissions_for_grade(grade)?
            .iter()
            .filter(|admission| admission.status.occupies_seat())
            .count() as u32;
        let total_seats = self
            .rules
            .rule_for(grade)
            .map(|rule| rule.total_seats)
            .unwrap_or(self.default_total_seats);

        Ok(GradeOccupancy {
            grade: grade.trim().to_string(),
            occupied,
            total_seats,
        })
    }

    pub fn evaluate(
        &self,
        grade: &str,
        requested_waitlist: bool,
    ) -> Result<SeatDecision, SchedulingError> {
        let occupancy = self.occupancy(grade)?;

        if requested_waitlist {
            return Ok(SeatDecision::Waitlisted(occupancy));
        }

        if occupancy.is_full() {
            return Err(SchedulingError::GradeFull {
                grade: occupancy.grade,
                occupied: occupancy.occupied,
                total_seats: occupancy.total_seats,
            });
        }

        Ok(SeatDecision::Seated(occupancy))
    }
}

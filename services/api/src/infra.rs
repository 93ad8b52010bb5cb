use chrono::NaiveDate;
use metrics_exporter_prometheus::PrometheusHandle;
use school_admissions::config::AdmissionsConfig;
use school_admissions::workflows::admissions::{
    Admission, Booking, GradeSeatRule, InviteDelivery, NoShowStrike, NotificationDispatcher,
    NotificationError, RescheduleReason, Slot, StaticSeatRules,
};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Dispatcher for deployments without a mail or calendar adapter: every notice becomes a
/// structured log line. No calendar invites are reported as sent.
#[derive(Debug, Default, Clone)]
pub(crate) struct LoggingNotificationDispatcher;

impl NotificationDispatcher for LoggingNotificationDispatcher {
    fn send_confirmation(
        &self,
        booking: &Booking,
        slot: &Slot,
    ) -> Result<InviteDelivery, NotificationError> {
        info!(
            booking = %booking.id,
            slot = %slot.id,
            parent = %booking.parent_email,
            date = %slot.date,
            start = %slot.start_time,
            "booking confirmation"
        );
        Ok(InviteDelivery::default())
    }

    fn send_reschedule(
        &self,
        booking: &Booking,
        slot: &Slot,
        reason: RescheduleReason,
    ) -> Result<InviteDelivery, NotificationError> {
        info!(
            booking = %booking.id,
            slot = %slot.id,
            parent = %booking.parent_email,
            reason = reason.label(),
            "booking rescheduled"
        );
        Ok(InviteDelivery::default())
    }

    fn send_no_show_notice(
        &self,
        admission: &Admission,
        strike: NoShowStrike,
    ) -> Result<(), NotificationError> {
        info!(
            admission = %admission.id,
            parent = %admission.parent_email,
            strike = strike.count(),
            "no-show notice"
        );
        Ok(())
    }

    fn send_reminder(
        &self,
        booking: &Booking,
        slot: &Slot,
        days_before: u32,
    ) -> Result<(), NotificationError> {
        info!(
            booking = %booking.id,
            slot = %slot.id,
            days_before,
            "counselling reminder"
        );
        Ok(())
    }
}

/// Seat table from configuration, or a small primary-school table when none is set.
pub(crate) fn seat_rules(config: &AdmissionsConfig) -> StaticSeatRules {
    if !config.grade_seats.is_empty() {
        return StaticSeatRules::new(config.grade_seats.iter().cloned());
    }

    let seats = config.scheduling.default_grade_seats;
    StaticSeatRules::new(
        ["Nursery", "LKG", "UKG", "Class 1", "Class 2", "Class 3", "Class 4", "Class 5"]
            .into_iter()
            .zip(0u32..)
            .map(|(grade, order)| GradeSeatRule {
                grade: grade.to_string(),
                total_seats: seats,
                min_age: u8::try_from(order + 2).ok(),
                order,
            }),
    )
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("failed to parse '{raw}' as YYYY-MM-DD ({err})"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use school_admissions::workflows::admissions::{SchedulingPolicy, SeatRuleLookup};

    #[test]
    fn configured_grades_replace_the_default_table() {
        let config = AdmissionsConfig {
            scheduling: SchedulingPolicy::default(),
            grade_seats: vec![GradeSeatRule {
                grade: "Class 9".to_string(),
                total_seats: 30,
                min_age: None,
                order: 0,
            }],
        };

        let rules = seat_rules(&config);
        assert_eq!(rules.rule_for("class 9").map(|rule| rule.total_seats), Some(30));
        assert!(rules.rule_for("Nursery").is_none());
    }

    #[test]
    fn default_table_uses_the_default_seat_count() {
        let config = AdmissionsConfig {
            scheduling: SchedulingPolicy::default(),
            grade_seats: Vec::new(),
        };

        let rules = seat_rules(&config);
        let ukg = rules.rule_for("UKG").expect("default grade present");
        assert_eq!(ukg.total_seats, 50);
        assert_eq!(ukg.order, 2);
    }

    #[test]
    fn parse_date_reports_the_bad_input() {
        assert!(parse_date(" 2026-11-02 ").is_ok());
        let err = parse_date("02/11/2026").expect_err("wrong format");
        assert!(err.contains("02/11/2026"));
    }
}

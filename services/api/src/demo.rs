use chrono::{DateTime, Duration, Local, NaiveDate, NaiveTime, TimeZone, Utc};
use clap::Args;
use school_admissions::config::AdmissionsConfig;
use school_admissions::error::AppError;
use school_admissions::workflows::admissions::{
    Admission, AdmissionsService, Booking, BulkSlotRequest, EnquiryConversion, EnquiryId,
    FixedClock, InMemoryAdmissionsStore, InviteDelivery, NoShowStrike, NotificationDispatcher,
    NotificationError, RescheduleReason, SchedulingPolicy, Slot, SlotView, StaticSeatRules,
    TimeWindow,
};
use serde::Serialize;
use std::sync::{Arc, Mutex};

use crate::infra::seat_rules;

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// First counselling day (YYYY-MM-DD). Defaults to tomorrow.
    #[arg(long, value_parser = crate::infra::parse_date)]
    pub(crate) start: Option<NaiveDate>,
    /// Print the walkthrough summary as JSON.
    #[arg(long)]
    pub(crate) json: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct DemoSummary {
    pub(crate) slots_created: usize,
    pub(crate) cancelled_slot: SlotView,
    pub(crate) cascade_destination: Option<SlotView>,
    pub(crate) no_show_strike: u8,
    pub(crate) no_show_destination: Option<SlotView>,
    pub(crate) reminders_sent: usize,
    pub(crate) class_one_occupied: u32,
    pub(crate) notices: Vec<String>,
}

/// Collects every notice so the walkthrough can print what families would receive.
#[derive(Debug, Default)]
struct DemoOutbox {
    notices: Mutex<Vec<String>>,
}

impl DemoOutbox {
    fn push(&self, notice: String) {
        if let Ok(mut notices) = self.notices.lock() {
            notices.push(notice);
        }
    }

    fn drain(&self) -> Vec<String> {
        self.notices
            .lock()
            .map(|mut notices| std::mem::take(&mut *notices))
            .unwrap_or_default()
    }
}

impl NotificationDispatcher for DemoOutbox {
    fn send_confirmation(
        &self,
        booking: &Booking,
        slot: &Slot,
    ) -> Result<InviteDelivery, NotificationError> {
        self.push(format!(
            "confirmation to {} for {} {}",
            booking.parent_email, slot.date, slot.start_time
        ));
        Ok(InviteDelivery {
            calendar_invite: true,
            principal_invite: true,
        })
    }

    fn send_reschedule(
        &self,
        booking: &Booking,
        slot: &Slot,
        reason: RescheduleReason,
    ) -> Result<InviteDelivery, NotificationError> {
        self.push(format!(
            "reschedule ({}) to {} for {} {}",
            reason.label(),
            booking.parent_email,
            slot.date,
            slot.start_time
        ));
        Ok(InviteDelivery {
            calendar_invite: true,
            principal_invite: true,
        })
    }

    fn send_no_show_notice(
        &self,
        admission: &Admission,
        strike: NoShowStrike,
    ) -> Result<(), NotificationError> {
        self.push(format!(
            "no-show strike {} for {}",
            strike.count(),
            admission.student_name
        ));
        Ok(())
    }

    fn send_reminder(
        &self,
        booking: &Booking,
        slot: &Slot,
        days_before: u32,
    ) -> Result<(), NotificationError> {
        self.push(format!(
            "reminder to {} ({} day(s) before {})",
            booking.parent_email, days_before, slot.date
        ));
        Ok(())
    }
}

fn school_instant(policy: &SchedulingPolicy, date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    let offset = Duration::seconds(i64::from(policy.school_offset().local_minus_utc()));
    Utc.from_utc_datetime(&(date.and_time(time) - offset))
}

fn at(hour: u32, minute: u32) -> Option<NaiveTime> {
    NaiveTime::from_hms_opt(hour, minute, 0)
}

fn enquiry(parent_email: &str, student: &str, slot: &SlotView) -> EnquiryConversion {
    EnquiryConversion {
        enquiry_id: EnquiryId(format!("demo-{}", student.to_ascii_lowercase())),
        token_id: None,
        parent_email: parent_email.to_string(),
        student_name: student.to_string(),
        grade: "Class 1".to_string(),
        submit: true,
        request_waitlist: false,
        slot_id: Some(slot.id.clone()),
        additional_fields: Default::default(),
    }
}

fn describe(slot: &SlotView) -> String {
    format!(
        "{} {}-{} ({}/{} booked, {})",
        slot.date,
        slot.start_time.format("%H:%M"),
        slot.end_time.format("%H:%M"),
        slot.booked_count,
        slot.capacity,
        slot.status.label()
    )
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs { start, json } = args;
    let start = start.unwrap_or_else(|| Local::now().date_naive() + Duration::days(1));

    let policy = SchedulingPolicy::default();
    let (Some(ten_am), Some(open), Some(close)) = (at(10, 0), at(9, 0), at(11, 0)) else {
        return Ok(());
    };
    let clock = FixedClock::new(school_instant(
        &policy,
        start - Duration::days(1),
        ten_am,
    ));
    let outbox = Arc::new(DemoOutbox::default());
    let rules: StaticSeatRules = seat_rules(&AdmissionsConfig {
        scheduling: policy.clone(),
        grade_seats: Vec::new(),
    });
    let service = AdmissionsService::new(
        Arc::new(InMemoryAdmissionsStore::new()),
        outbox.clone(),
        Arc::new(rules),
        Arc::new(clock.clone()),
        policy.clone(),
    );

    let generated = service.generate_slots(BulkSlotRequest {
        start_date: start,
        end_date: start + Duration::days(2),
        windows: vec![TimeWindow {
            start: open,
            end: close,
        }],
        duration_minutes: 30,
        gap_minutes: 0,
        max_per_day: Some(4),
        capacity: Some(2),
    })?;
    let (Some(first), Some(second)) = (generated.created.first(), generated.created.get(1))
    else {
        println!("No counselling slots could be generated from {start}");
        return Ok(());
    };

    for student in ["Ira", "Vihaan"] {
        service.convert_enquiry(enquiry("joshi@example.com", student, first))?;
    }
    service.convert_enquiry(enquiry("pillai@example.com", "Meera", second))?;
    let reminders = service.send_reminders()?;
    let booked = outbox.drain();

    // The principal is unavailable for the first session; everyone on it moves.
    let cancellation = service.cancel_slot(&first.id)?;
    let destination = cancellation.destination.clone();

    let mut no_show_strike = 0;
    let mut no_show_destination = None;
    if let Some(target) = &destination {
        let ten_past = target.start_time + Duration::minutes(10);
        clock.set(school_instant(&policy, target.date, ten_past));
        if let Some(booking) = service.bookings_for_slot(&target.id)?.into_iter().next() {
            let outcome = service.record_no_show(&booking.id)?;
            no_show_strike = outcome.strike.count();
            no_show_destination = outcome.destination;
        }
    }

    let occupancy = service.grade_occupancy("Class 1")?;

    let mut notices = booked;
    notices.extend(outbox.drain());
    let summary = DemoSummary {
        slots_created: generated.created.len(),
        cancelled_slot: cancellation.cancelled,
        cascade_destination: destination,
        no_show_strike,
        no_show_destination,
        reminders_sent: reminders.sent,
        class_one_occupied: occupancy.occupied,
        notices,
    };

    if json {
        let rendered = serde_json::to_string_pretty(&summary).map_err(std::io::Error::from)?;
        println!("{rendered}");
    } else {
        render_summary(&summary);
    }
    Ok(())
}

fn render_summary(summary: &DemoSummary) {
    println!("Admissions scheduling demo");
    println!("- {} counselling slots generated", summary.slots_created);
    println!("- cancelled {}", describe(&summary.cancelled_slot));
    match &summary.cascade_destination {
        Some(slot) => println!("  families moved to {}", describe(slot)),
        None => println!("  no families needed to move"),
    }
    if summary.no_show_strike > 0 {
        println!("- no-show recorded (strike {})", summary.no_show_strike);
        if let Some(slot) = &summary.no_show_destination {
            println!("  family moved to {}", describe(slot));
        }
    }
    println!("- {} reminder(s) sent", summary.reminders_sent);
    println!("- Class 1 seats occupied: {}", summary.class_one_occupied);
    println!("Notices:");
    for notice in &summary.notices {
        println!("  - {notice}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn school_instant_applies_the_policy_offset() {
        let policy = SchedulingPolicy::default();
        let date = NaiveDate::from_ymd_opt(2026, 11, 2).expect("valid date");
        let time = NaiveTime::from_hms_opt(10, 0, 0).expect("valid time");

        let instant = school_instant(&policy, date, time);

        assert_eq!(
            instant,
            Utc.with_ymd_and_hms(2026, 11, 2, 4, 30, 0).single().expect("valid instant")
        );
    }

    #[test]
    fn demo_runs_end_to_end() {
        run_demo(DemoArgs {
            start: NaiveDate::from_ymd_opt(2026, 11, 2),
            json: true,
        })
        .expect("demo completes");
    }
}

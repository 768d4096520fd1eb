use crate::infra::{demo_roster, seed_roster};
use chrono::{Duration, Local, NaiveDate};
use clap::Args;
use std::sync::Arc;
use vaxdrive::config::DEFAULT_DRIVE_LEAD_DAYS;
use vaxdrive::drives::{
    BatchResult, DoseRequest, DriveDraft, DriveService, DriveStatus, DriveUpdate, FixedClock,
    MemoryStore, StudentId,
};
use vaxdrive::error::AppError;

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Date the walkthrough starts from (YYYY-MM-DD). Defaults to today.
    #[arg(long, value_parser = crate::infra::parse_date)]
    pub(crate) today: Option<NaiveDate>,
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let today = args.today.unwrap_or_else(|| Local::now().date_naive());
    for line in walkthrough(today)? {
        println!("{line}");
    }
    Ok(())
}

fn drive_draft(name: &str, start: NaiveDate, days: i64) -> DriveDraft {
    DriveDraft {
        name: name.to_string(),
        vaccine_name: "MMR".to_string(),
        start_date: start,
        end_date: start + Duration::days(days),
        target_classes: vec!["5A".to_string(), "5B".to_string()],
        total_doses: 40,
        doses_per_student: 2,
        location: "Main hall".to_string(),
        notes: None,
    }
}

fn render_batch(lines: &mut Vec<String>, label: &str, result: &BatchResult) {
    lines.push(format!(
        "{label}: dose {} for {} students -> {} recorded, {} failed",
        result.dose_number, result.total, result.succeeded_count, result.failed_count
    ));
    if let Some(rejection) = &result.rejection {
        lines.push(format!("  batch rejected [{}] {}", rejection.code(), rejection));
        return;
    }
    for failure in &result.failed {
        lines.push(format!(
            "  - student {}: [{}] {}",
            failure.student_id,
            failure.reason.code(),
            failure.reason
        ));
    }
    if let Some(statistics) = &result.statistics {
        lines.push(format!(
            "  statistics: {}/{} students vaccinated, {} doses given",
            statistics.vaccinated_students,
            statistics.total_targeted,
            statistics.doses_administered
        ));
    }
}

/// Scripted run against a fresh in-memory store, returned as printable lines.
pub(crate) fn walkthrough(today: NaiveDate) -> Result<Vec<String>, AppError> {
    let store = Arc::new(MemoryStore::new());
    let seeded = seed_roster(store.as_ref())?;
    let clock = Arc::new(FixedClock::new(today));
    let service = DriveService::new(store, clock.clone(), DEFAULT_DRIVE_LEAD_DAYS);

    let mut lines = vec![
        "School vaccination drive demo".to_string(),
        format!(
            "Roster: {seeded} students loaded; today is {today}; drives need {} days notice",
            service.validator().lead_days()
        ),
    ];

    match service.create_drive(drive_draft("Rushed clinic", today + Duration::days(3), 2)) {
        Ok(drive) => lines.push(format!("Unexpectedly scheduled drive {}", drive.id)),
        Err(err) => lines.push(format!("Rushed clinic refused: [{}] {}", err.code(), err)),
    }

    let start = service.validator().earliest_start(today) + Duration::days(5);
    let drive = service.create_drive(drive_draft("Spring MMR", start, 6))?;
    lines.push(format!(
        "Scheduled drive {} '{}' from {} to {} for {} targeted students",
        drive.id, drive.name, drive.start_date, drive.end_date, drive.statistics.total_targeted
    ));

    match service.create_drive(drive_draft("Second MMR", start + Duration::days(2), 4)) {
        Ok(other) => lines.push(format!("Unexpectedly scheduled drive {}", other.id)),
        Err(err) => lines.push(format!("Second MMR refused: [{}] {}", err.code(), err)),
    }

    clock.set(start);
    service.update_drive(
        drive.id,
        DriveUpdate {
            status: Some(DriveStatus::InProgress),
            ..DriveUpdate::default()
        },
    )?;
    lines.push(format!("{start}: drive {} is now in progress", drive.id));

    let everyone: Vec<StudentId> = demo_roster().iter().map(|student| student.id).collect();
    let first = service.mark_vaccinated(
        drive.id,
        DoseRequest {
            dose_number: 1,
            administered_by: "Nurse Okafor".to_string(),
            notes: None,
            student_ids: everyone,
        },
    )?;
    render_batch(&mut lines, "First batch", &first);

    let repeat = service.mark_vaccinated(
        drive.id,
        DoseRequest {
            dose_number: 1,
            administered_by: "Nurse Okafor".to_string(),
            notes: Some("late arrivals".to_string()),
            student_ids: vec![StudentId(2), StudentId(3)],
        },
    )?;
    render_batch(&mut lines, "Repeat batch", &repeat);

    let over = service.mark_vaccinated(
        drive.id,
        DoseRequest {
            dose_number: 3,
            administered_by: "Nurse Okafor".to_string(),
            notes: None,
            student_ids: vec![StudentId(1)],
        },
    )?;
    render_batch(&mut lines, "Third dose attempt", &over);

    let statistics = service.refresh_statistics(drive.id)?;
    lines.push(format!(
        "Final statistics: {} targeted, {} vaccinated, {} doses administered",
        statistics.total_targeted, statistics.vaccinated_students, statistics.doses_administered
    ));
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walkthrough_covers_rejections_and_batches() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 1).expect("valid date");
        let lines = walkthrough(today).expect("demo runs");
        let output = lines.join("\n");

        assert!(output.contains("[VALIDATION_LEAD_TIME]"));
        assert!(output.contains("[VALIDATION_OVERLAP]"));
        assert!(output.contains("First batch: dose 1 for 6 students -> 4 recorded, 2 failed"));
        assert!(output.contains("[STUDENT_NOT_FOUND]"));
        assert!(output.contains("[STUDENT_NOT_TARGETED]"));
        assert!(output.contains("[DUPLICATE_DOSE]"));
        assert!(output.contains("batch rejected [DOSE_LIMIT_EXCEEDED]"));
        assert!(output.ends_with("Final statistics: 4 targeted, 4 vaccinated, 4 doses administered"));
    }
}

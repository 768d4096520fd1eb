use std::sync::Arc;

use super::common::*;
use crate::drives::domain::{DriveStatus, StudentId};
use crate::drives::dosing::{batch_rejection, DoseFailure, DoseRecorder};
use crate::drives::repository::{DriveRepository, VaccinationLedger};
use crate::drives::statistics::StatisticsAggregator;

fn recorder<S>(store: &Arc<S>) -> DoseRecorder<S>
where
    S: crate::drives::repository::VaccinationStore + 'static,
{
    DoseRecorder::new(store.clone(), StatisticsAggregator::new(store.clone()))
}

#[test]
fn dose_above_limit_rejects_every_student_without_records() {
    let store = seeded_store();
    let drive = insert_drive(store.as_ref(), &april_draft());

    let result = recorder(&store).record(&drive, &dose_request(3, &[1, 2]), date(2024, 4, 2));

    assert!(result.is_rejected());
    assert!(result.succeeded.is_empty());
    assert_eq!(result.failed_count, 2);
    assert!(result.failed.iter().all(|failure| failure.reason
        == DoseFailure::DoseLimitExceeded {
            requested: 3,
            limit: 2
        }));
    assert!(store.records_for_drive(drive.id).expect("records").is_empty());
}

#[test]
fn dose_zero_is_outside_the_allowed_range() {
    let store = seeded_store();
    let drive = insert_drive(store.as_ref(), &april_draft());

    let result = recorder(&store).record(&drive, &dose_request(0, &[1]), date(2024, 4, 2));

    assert_eq!(
        result.rejection.as_ref().map(DoseFailure::code),
        Some("DOSE_LIMIT_EXCEEDED")
    );
    assert!(store.records_for_drive(drive.id).expect("records").is_empty());
}

#[test]
fn mixed_batch_keeps_input_order_and_creates_one_record() {
    let store = seeded_store();
    let drive = insert_drive(store.as_ref(), &april_draft());
    store
        .append_if_absent(drive_dose(2, drive.id, 1))
        .expect("prior dose");

    // 3 is inactive, 2 already has dose 1, 1 is eligible.
    let result = recorder(&store).record(&drive, &dose_request(1, &[3, 2, 1]), date(2024, 4, 2));

    assert_eq!(result.total, 3);
    assert_eq!(result.succeeded, vec![StudentId(1)]);
    assert_eq!(result.succeeded_count, 1);
    let failures: Vec<_> = result
        .failed
        .iter()
        .map(|failure| (failure.student_id, failure.reason.code()))
        .collect();
    assert_eq!(
        failures,
        vec![
            (StudentId(3), "STUDENT_NOT_FOUND"),
            (StudentId(2), "DUPLICATE_DOSE"),
        ]
    );
    assert_eq!(store.records_for_drive(drive.id).expect("records").len(), 2);
}

#[test]
fn closed_drive_rejects_the_whole_batch() {
    let store = seeded_store();
    let mut drive = insert_drive(store.as_ref(), &april_draft());
    drive.status = DriveStatus::Completed;
    store.update_drive_exclusive(&drive).expect("complete drive");

    let result = recorder(&store).record(&drive, &dose_request(1, &[1, 2]), date(2024, 4, 2));

    assert_eq!(
        result.rejection,
        Some(DoseFailure::DriveClosed {
            status: DriveStatus::Completed
        })
    );
    assert_eq!(result.failed_count, 2);
    assert!(store.records_for_drive(drive.id).expect("records").is_empty());
}

#[test]
fn closed_status_wins_over_dose_limit() {
    let mut drive = stored_drive(1, date(2024, 4, 1), date(2024, 4, 10), DriveStatus::Cancelled);
    drive.doses_per_student = 1;

    assert_eq!(
        batch_rejection(&drive, 5).map(|failure| failure.code()),
        Some("DRIVE_CLOSED")
    );
}

#[test]
fn students_outside_target_classes_are_refused() {
    let store = seeded_store();
    let drive = insert_drive(store.as_ref(), &april_draft());

    let result = recorder(&store).record(&drive, &dose_request(1, &[4, 99]), date(2024, 4, 2));

    assert_eq!(
        result.failed[0].reason,
        DoseFailure::StudentNotTargeted {
            class_name: "6A".to_string()
        }
    );
    assert_eq!(result.failed[1].reason, DoseFailure::StudentNotFound);
    assert!(result.succeeded.is_empty());
}

#[test]
fn repeated_student_in_one_batch_is_a_duplicate() {
    let store = seeded_store();
    let drive = insert_drive(store.as_ref(), &april_draft());

    let result = recorder(&store).record(&drive, &dose_request(1, &[1, 1]), date(2024, 4, 2));

    assert_eq!(result.succeeded, vec![StudentId(1)]);
    assert_eq!(result.failed[0].reason.code(), "DUPLICATE_DOSE");
}

#[test]
fn records_carry_drive_vaccine_and_today() {
    let store = seeded_store();
    let drive = insert_drive(store.as_ref(), &april_draft());
    let mut request = dose_request(2, &[1]);
    request.administered_by = "  Dr. Mensah ".to_string();
    request.notes = Some("left arm".to_string());

    recorder(&store).record(&drive, &request, date(2024, 4, 3));

    let records = store.records_for_drive(drive.id).expect("records");
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.vaccine_name, "MMR");
    assert_eq!(record.date, date(2024, 4, 3));
    assert_eq!(record.dose_number, 2);
    assert_eq!(record.administered_by, "Dr. Mensah");
    assert_eq!(record.notes.as_deref(), Some("left arm"));
}

#[test]
fn storage_fault_on_one_student_does_not_abort_the_batch() {
    let store = Arc::new(FaultyStore::default());
    seed_roster(&store.inner);
    let drive = insert_drive(&store.inner, &april_draft());
    store.fail_appends_for(StudentId(1));

    let result = recorder(&store).record(&drive, &dose_request(1, &[1, 2]), date(2024, 4, 2));

    assert_eq!(result.succeeded, vec![StudentId(2)]);
    assert!(matches!(
        result.failed[0].reason,
        DoseFailure::Persistence(_)
    ));
    assert_eq!(result.failed[0].reason.code(), "PERSISTENCE_FAILURE");
    let statistics = result.statistics.expect("statistics refreshed");
    assert_eq!(statistics.doses_administered, 1);
}

#[test]
fn statistics_are_absent_when_the_recompute_fails() {
    let store = Arc::new(FaultyStore::default());
    seed_roster(&store.inner);
    let drive = insert_drive(&store.inner, &april_draft());
    store.take_statistics_offline();

    let result = recorder(&store).record(&drive, &dose_request(1, &[1]), date(2024, 4, 2));

    assert_eq!(result.succeeded, vec![StudentId(1)]);
    assert!(result.statistics.is_none());
}

#[test]
fn batch_result_serializes_reasons_with_codes() {
    let store = seeded_store();
    let drive = insert_drive(store.as_ref(), &april_draft());

    let result = recorder(&store).record(&drive, &dose_request(1, &[1, 3]), date(2024, 4, 2));
    let json = serde_json::to_value(&result).expect("serializable");

    assert_eq!(json["succeeded"], serde_json::json!([1]));
    assert_eq!(json["failed"][0]["student_id"], 3);
    assert_eq!(json["failed"][0]["reason"]["code"], "STUDENT_NOT_FOUND");
    assert!(json.get("rejection").is_none());
    assert_eq!(json["statistics"]["vaccinated_students"], 1);
}

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use axum::response::Response;
use chrono::NaiveDate;
use serde_json::Value;

use crate::drives::clock::FixedClock;
use crate::drives::domain::{
    DriveDraft, DriveFilter, DriveId, DriveStatistics, DriveStatus, Gender, GuardianContact,
    NewVaccinationRecord, RecordId, Student, StudentId, VaccinationDrive, VaccinationRecord,
};
use crate::drives::dosing::DoseRequest;
use crate::drives::memory::MemoryStore;
use crate::drives::repository::{
    AppendOutcome, DriveRepository, DriveWrite, RepositoryError, StudentDirectory,
    VaccinationLedger,
};
use crate::drives::service::DriveService;

pub(super) const LEAD_DAYS: i64 = 15;

pub(super) fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

/// Every scenario runs with "today" fixed at 2024-03-01.
pub(super) fn today() -> NaiveDate {
    date(2024, 3, 1)
}

pub(super) fn draft(name: &str, start: NaiveDate, end: NaiveDate) -> DriveDraft {
    DriveDraft {
        name: name.to_string(),
        vaccine_name: "MMR".to_string(),
        start_date: start,
        end_date: end,
        target_classes: vec!["5A".to_string(), "5B".to_string()],
        total_doses: 100,
        doses_per_student: 2,
        location: "Main hall".to_string(),
        notes: None,
    }
}

pub(super) fn april_draft() -> DriveDraft {
    draft("Spring MMR", date(2024, 4, 1), date(2024, 4, 10))
}

pub(super) fn stored_drive(
    id: i64,
    start: NaiveDate,
    end: NaiveDate,
    status: DriveStatus,
) -> VaccinationDrive {
    let mut drive = VaccinationDrive::from_draft(DriveId(id), &draft("Stored", start, end));
    drive.status = status;
    drive
}

pub(super) fn student(id: i64, class_name: &str, active: bool) -> Student {
    Student {
        id: StudentId(id),
        student_number: format!("S-{id:04}"),
        first_name: "Sam".to_string(),
        last_name: format!("Pupil{id}"),
        class_name: class_name.to_string(),
        date_of_birth: date(2013, 9, 2),
        gender: Gender::Other,
        active,
        guardian: GuardianContact {
            name: "Pat Guardian".to_string(),
            phone: "555-0142".to_string(),
            email: "pat@example.org".to_string(),
        },
        school_id: 7,
    }
}

/// Roster: 1 and 2 are active in targeted classes, 3 is inactive, 4 is in an untargeted class.
pub(super) fn seed_roster<S: StudentDirectory>(store: &S) {
    for student in [
        student(1, "5A", true),
        student(2, "5B", true),
        student(3, "5A", false),
        student(4, "6A", true),
    ] {
        store.save_student(student).expect("seed student");
    }
}

pub(super) fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    seed_roster(store.as_ref());
    store
}

pub(super) fn build_service() -> (
    DriveService<MemoryStore, FixedClock>,
    Arc<MemoryStore>,
    Arc<FixedClock>,
) {
    let store = seeded_store();
    let clock = Arc::new(FixedClock::new(today()));
    let service = DriveService::new(store.clone(), clock.clone(), LEAD_DAYS);
    (service, store, clock)
}

pub(super) fn dose_request(dose_number: u32, students: &[i64]) -> DoseRequest {
    DoseRequest {
        dose_number,
        administered_by: "Nurse Okafor".to_string(),
        notes: None,
        student_ids: students.iter().copied().map(StudentId).collect(),
    }
}

pub(super) fn drive_dose(student: i64, drive: DriveId, dose_number: u32) -> NewVaccinationRecord {
    NewVaccinationRecord {
        student_id: StudentId(student),
        vaccine_name: "MMR".to_string(),
        date: date(2024, 4, 2),
        dose_number,
        administered_by: "Nurse Okafor".to_string(),
        drive_id: Some(drive),
        notes: None,
    }
}

pub(super) fn insert_drive<S: DriveRepository>(store: &S, draft: &DriveDraft) -> VaccinationDrive {
    match store.insert_drive_exclusive(draft).expect("insert drive") {
        DriveWrite::Stored(drive) => drive,
        DriveWrite::Overlaps(other) => panic!("unexpected overlap with drive {}", other.id),
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}

/// Delegates to a `MemoryStore` but fails selected operations.
#[derive(Default)]
pub(super) struct FaultyStore {
    pub(super) inner: MemoryStore,
    failing_students: Mutex<BTreeSet<StudentId>>,
    statistics_offline: Mutex<bool>,
}

impl FaultyStore {
    pub(super) fn fail_appends_for(&self, student: StudentId) {
        self.failing_students
            .lock()
            .expect("fault mutex poisoned")
            .insert(student);
    }

    pub(super) fn take_statistics_offline(&self) {
        *self.statistics_offline.lock().expect("fault mutex poisoned") = true;
    }
}

impl StudentDirectory for FaultyStore {
    fn find_student(&self, id: StudentId) -> Result<Option<Student>, RepositoryError> {
        self.inner.find_student(id)
    }

    fn count_active_in_classes(&self, classes: &BTreeSet<String>) -> Result<u32, RepositoryError> {
        self.inner.count_active_in_classes(classes)
    }

    fn save_student(&self, student: Student) -> Result<Student, RepositoryError> {
        self.inner.save_student(student)
    }
}

impl VaccinationLedger for FaultyStore {
    fn append_if_absent(
        &self,
        record: NewVaccinationRecord,
    ) -> Result<AppendOutcome, RepositoryError> {
        let failing = self
            .failing_students
            .lock()
            .expect("fault mutex poisoned")
            .contains(&record.student_id);
        if failing {
            return Err(RepositoryError::Unavailable("disk full".to_string()));
        }
        self.inner.append_if_absent(record)
    }

    fn fetch_record(&self, id: RecordId) -> Result<Option<VaccinationRecord>, RepositoryError> {
        self.inner.fetch_record(id)
    }

    fn update_record(&self, record: &VaccinationRecord) -> Result<(), RepositoryError> {
        self.inner.update_record(record)
    }

    fn delete_record(&self, id: RecordId) -> Result<VaccinationRecord, RepositoryError> {
        self.inner.delete_record(id)
    }

    fn records_for_drive(&self, drive: DriveId) -> Result<Vec<VaccinationRecord>, RepositoryError> {
        self.inner.records_for_drive(drive)
    }

    fn records_for_student(
        &self,
        student: StudentId,
    ) -> Result<Vec<VaccinationRecord>, RepositoryError> {
        self.inner.records_for_student(student)
    }
}

impl DriveRepository for FaultyStore {
    fn fetch_drive(&self, id: DriveId) -> Result<Option<VaccinationDrive>, RepositoryError> {
        self.inner.fetch_drive(id)
    }

    fn list_drives(&self, filter: &DriveFilter) -> Result<Vec<VaccinationDrive>, RepositoryError> {
        self.inner.list_drives(filter)
    }

    fn insert_drive_exclusive(&self, draft: &DriveDraft) -> Result<DriveWrite, RepositoryError> {
        self.inner.insert_drive_exclusive(draft)
    }

    fn update_drive_exclusive(
        &self,
        drive: &VaccinationDrive,
    ) -> Result<DriveWrite, RepositoryError> {
        self.inner.update_drive_exclusive(drive)
    }

    fn delete_drive(&self, id: DriveId) -> Result<(), RepositoryError> {
        self.inner.delete_drive(id)
    }

    fn save_statistics(
        &self,
        id: DriveId,
        statistics: &DriveStatistics,
    ) -> Result<(), RepositoryError> {
        if *self.statistics_offline.lock().expect("fault mutex poisoned") {
            return Err(RepositoryError::Unavailable("statistics table locked".to_string()));
        }
        self.inner.save_statistics(id, statistics)
    }
}

/// Every call fails as if the database were down.
pub(super) struct UnavailableStore;

fn offline<T>() -> Result<T, RepositoryError> {
    Err(RepositoryError::Unavailable("database offline".to_string()))
}

impl StudentDirectory for UnavailableStore {
    fn find_student(&self, _id: StudentId) -> Result<Option<Student>, RepositoryError> {
        offline()
    }

    fn count_active_in_classes(&self, _classes: &BTreeSet<String>) -> Result<u32, RepositoryError> {
        offline()
    }

    fn save_student(&self, _student: Student) -> Result<Student, RepositoryError> {
        offline()
    }
}

impl VaccinationLedger for UnavailableStore {
    fn append_if_absent(
        &self,
        _record: NewVaccinationRecord,
    ) -> Result<AppendOutcome, RepositoryError> {
        offline()
    }

    fn fetch_record(&self, _id: RecordId) -> Result<Option<VaccinationRecord>, RepositoryError> {
        offline()
    }

    fn update_record(&self, _record: &VaccinationRecord) -> Result<(), RepositoryError> {
        offline()
    }

    fn delete_record(&self, _id: RecordId) -> Result<VaccinationRecord, RepositoryError> {
        offline()
    }

    fn records_for_drive(&self, _drive: DriveId) -> Result<Vec<VaccinationRecord>, RepositoryError> {
        offline()
    }

    fn records_for_student(
        &self,
        _student: StudentId,
    ) -> Result<Vec<VaccinationRecord>, RepositoryError> {
        offline()
    }
}

impl DriveRepository for UnavailableStore {
    fn fetch_drive(&self, _id: DriveId) -> Result<Option<VaccinationDrive>, RepositoryError> {
        offline()
    }

    fn list_drives(&self, _filter: &DriveFilter) -> Result<Vec<VaccinationDrive>, RepositoryError> {
        offline()
    }

    fn insert_drive_exclusive(&self, _draft: &DriveDraft) -> Result<DriveWrite, RepositoryError> {
        offline()
    }

    fn update_drive_exclusive(
        &self,
        _drive: &VaccinationDrive,
    ) -> Result<DriveWrite, RepositoryError> {
        offline()
    }

    fn delete_drive(&self, _id: DriveId) -> Result<(), RepositoryError> {
        offline()
    }

    fn save_statistics(
        &self,
        _id: DriveId,
        _statistics: &DriveStatistics,
    ) -> Result<(), RepositoryError> {
        offline()
    }
}

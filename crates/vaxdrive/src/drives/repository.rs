use std::collections::BTreeSet;

use super::domain::{
    DriveDraft, DriveFilter, DriveId, DriveStatistics, NewVaccinationRecord, RecordId, Student,
    StudentId, VaccinationDrive, VaccinationRecord,
};

/// Read access to the roster, plus the minimal write needed to seed it.
pub trait StudentDirectory: Send + Sync {
    fn find_student(&self, id: StudentId) -> Result<Option<Student>, RepositoryError>;
    fn count_active_in_classes(&self, classes: &BTreeSet<String>) -> Result<u32, RepositoryError>;
    fn save_student(&self, student: Student) -> Result<Student, RepositoryError>;
}

/// Outcome of the atomic duplicate-check-and-insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    Inserted(VaccinationRecord),
    Duplicate,
}

/// Storage for administered doses.
pub trait VaccinationLedger: Send + Sync {
    /// Insert unless a record already exists for the same (student, drive, dose).
    /// The check and the insert must be one atomic step.
    fn append_if_absent(
        &self,
        record: NewVaccinationRecord,
    ) -> Result<AppendOutcome, RepositoryError>;
    fn fetch_record(&self, id: RecordId) -> Result<Option<VaccinationRecord>, RepositoryError>;
    fn update_record(&self, record: &VaccinationRecord) -> Result<(), RepositoryError>;
    fn delete_record(&self, id: RecordId) -> Result<VaccinationRecord, RepositoryError>;
    fn records_for_drive(&self, drive: DriveId) -> Result<Vec<VaccinationRecord>, RepositoryError>;
    /// Ordered by date, then record id.
    fn records_for_student(
        &self,
        student: StudentId,
    ) -> Result<Vec<VaccinationRecord>, RepositoryError>;
}

/// Result of a drive write guarded by the store's own overlap check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriveWrite {
    Stored(VaccinationDrive),
    Overlaps(VaccinationDrive),
}

pub trait DriveRepository: Send + Sync {
    fn fetch_drive(&self, id: DriveId) -> Result<Option<VaccinationDrive>, RepositoryError>;
    /// Ordered by start date, then id.
    fn list_drives(&self, filter: &DriveFilter) -> Result<Vec<VaccinationDrive>, RepositoryError>;
    /// Insert a scheduled drive unless a non-terminal drive overlaps it at write time.
    fn insert_drive_exclusive(&self, draft: &DriveDraft) -> Result<DriveWrite, RepositoryError>;
    /// Replace a drive, re-checking overlap when the drive stays non-terminal.
    fn update_drive_exclusive(
        &self,
        drive: &VaccinationDrive,
    ) -> Result<DriveWrite, RepositoryError>;
    /// Fails with `Conflict` while records still reference the drive.
    fn delete_drive(&self, id: DriveId) -> Result<(), RepositoryError>;
    fn save_statistics(
        &self,
        id: DriveId,
        statistics: &DriveStatistics,
    ) -> Result<(), RepositoryError>;
}

/// Everything the drive service needs from a backing store.
pub trait VaccinationStore: DriveRepository + StudentDirectory + VaccinationLedger {}

impl<T> VaccinationStore for T where T: DriveRepository + StudentDirectory + VaccinationLedger {}

/// Error enumeration for repository failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("conflicting record: {0}")]
    Conflict(String),
    #[error("record not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

impl From<rusqlite::Error> for RepositoryError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::QueryReturnedNoRows => RepositoryError::NotFound,
            rusqlite::Error::SqliteFailure(code, message)
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                RepositoryError::Conflict(message.unwrap_or_else(|| code.to_string()))
            }
            other => RepositoryError::Unavailable(other.to_string()),
        }
    }
}

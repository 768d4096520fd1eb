//! Vaccination drive scheduling, batch dose recording, and drive statistics.
//!
//! `DriveService` is the entry point; the validator, recorder, and aggregator are usable on
//! their own against any `VaccinationStore`.

pub mod clock;
pub mod domain;
pub mod dosing;
pub mod memory;
pub mod repository;
pub mod router;
pub mod service;
pub mod sqlite;
pub mod statistics;
pub mod validator;

#[cfg(test)]
mod tests;

pub use clock::{Clock, FixedClock, SystemClock};
pub use domain::{
    DriveDraft, DriveFilter, DriveId, DriveStatistics, DriveStatus, DriveUpdate, Gender,
    GuardianContact, ManualRecordRequest, RecordCorrection, RecordId, Student, StudentId,
    VaccinationDrive, VaccinationRecord,
};
pub use dosing::{BatchResult, DoseFailure, DoseRecorder, DoseRequest, FailedDose};
pub use memory::MemoryStore;
pub use repository::{
    AppendOutcome, DriveRepository, DriveWrite, RepositoryError, StudentDirectory,
    VaccinationLedger, VaccinationStore,
};
pub use router::drive_router;
pub use service::{DriveService, DriveServiceError};
pub use sqlite::SqliteStore;
pub use statistics::StatisticsAggregator;
pub use validator::{DriveRejection, DriveValidator};

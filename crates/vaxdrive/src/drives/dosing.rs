use std::sync::Arc;

use chrono::NaiveDate;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use tracing::{info, warn};

use super::domain::{
    DriveId, DriveStatistics, DriveStatus, NewVaccinationRecord, StudentId, VaccinationDrive,
    VaccinationRecord,
};
use super::repository::{AppendOutcome, RepositoryError, VaccinationStore};
use super::statistics::StatisticsAggregator;

/// Batch request to mark students as vaccinated within a drive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoseRequest {
    pub dose_number: u32,
    pub administered_by: String,
    #[serde(default)]
    pub notes: Option<String>,
    pub student_ids: Vec<StudentId>,
}

/// Why a dose could not be recorded for a student (or for the whole batch).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DoseFailure {
    #[error("drive is {} and no longer accepts doses", .status.label())]
    DriveClosed { status: DriveStatus },
    #[error("dose {requested} is outside the allowed range 1..={limit}")]
    DoseLimitExceeded { requested: u32, limit: u32 },
    #[error("student not found or inactive")]
    StudentNotFound,
    #[error("student's class {class_name} is not targeted by this drive")]
    StudentNotTargeted { class_name: String },
    #[error("student already received dose {dose_number} in this drive")]
    DuplicateDose { dose_number: u32 },
    #[error("storage failure: {0}")]
    Persistence(String),
}

impl DoseFailure {
    pub const fn code(&self) -> &'static str {
        match self {
            DoseFailure::DriveClosed { .. } => "DRIVE_CLOSED",
            DoseFailure::DoseLimitExceeded { .. } => "DOSE_LIMIT_EXCEEDED",
            DoseFailure::StudentNotFound => "STUDENT_NOT_FOUND",
            DoseFailure::StudentNotTargeted { .. } => "STUDENT_NOT_TARGETED",
            DoseFailure::DuplicateDose { .. } => "DUPLICATE_DOSE",
            DoseFailure::Persistence(_) => "PERSISTENCE_FAILURE",
        }
    }
}

impl From<RepositoryError> for DoseFailure {
    fn from(err: RepositoryError) -> Self {
        DoseFailure::Persistence(err.to_string())
    }
}

impl Serialize for DoseFailure {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("DoseFailure", 2)?;
        state.serialize_field("code", self.code())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedDose {
    pub student_id: StudentId,
    pub reason: DoseFailure,
}

/// Outcome of a batch. Failures never abort the rest of the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchResult {
    pub drive_id: DriveId,
    pub dose_number: u32,
    pub total: usize,
    pub succeeded_count: usize,
    pub failed_count: usize,
    pub succeeded: Vec<StudentId>,
    pub failed: Vec<FailedDose>,
    /// Set when the drive or dose number disqualified the entire batch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection: Option<DoseFailure>,
    /// Counters after the post-batch recompute; absent if the recompute failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statistics: Option<DriveStatistics>,
}

impl BatchResult {
    fn new(drive_id: DriveId, request: &DoseRequest) -> Self {
        Self {
            drive_id,
            dose_number: request.dose_number,
            total: request.student_ids.len(),
            succeeded_count: 0,
            failed_count: 0,
            succeeded: Vec::with_capacity(request.student_ids.len()),
            failed: Vec::new(),
            rejection: None,
            statistics: None,
        }
    }

    fn push_success(&mut self, student_id: StudentId) {
        self.succeeded.push(student_id);
        self.succeeded_count += 1;
    }

    fn push_failure(&mut self, student_id: StudentId, reason: DoseFailure) {
        self.failed.push(FailedDose { student_id, reason });
        self.failed_count += 1;
    }

    fn reject_all(&mut self, reason: DoseFailure, student_ids: &[StudentId]) {
        for student_id in student_ids {
            self.push_failure(*student_id, reason.clone());
        }
        self.rejection = Some(reason);
    }

    pub fn is_rejected(&self) -> bool {
        self.rejection.is_some()
    }
}

/// Applies a batch of doses, one student at a time, against a drive.
pub struct DoseRecorder<S> {
    store: Arc<S>,
    statistics: StatisticsAggregator<S>,
}

impl<S> DoseRecorder<S>
where
    S: VaccinationStore + 'static,
{
    pub fn new(store: Arc<S>, statistics: StatisticsAggregator<S>) -> Self {
        Self { store, statistics }
    }

    pub fn record(
        &self,
        drive: &VaccinationDrive,
        request: &DoseRequest,
        today: NaiveDate,
    ) -> BatchResult {
        let mut result = BatchResult::new(drive.id, request);

        if let Some(reason) = batch_rejection(drive, request.dose_number) {
            result.reject_all(reason, &request.student_ids);
        } else {
            for student_id in &request.student_ids {
                match self.record_one(drive, request, *student_id, today) {
                    Ok(_) => result.push_success(*student_id),
                    Err(reason) => {
                        if let DoseFailure::Persistence(detail) = &reason {
                            warn!(drive = %drive.id, student = %student_id, %detail, "dose not persisted");
                        }
                        result.push_failure(*student_id, reason);
                    }
                }
            }
        }

        result.statistics = match self.statistics.recompute(drive) {
            Ok(statistics) => Some(statistics),
            Err(err) => {
                warn!(drive = %drive.id, error = %err, "statistics recompute failed after batch");
                None
            }
        };

        info!(
            drive = %drive.id,
            dose = request.dose_number,
            total = result.total,
            succeeded = result.succeeded_count,
            failed = result.failed_count,
            "dose batch processed"
        );
        result
    }

    fn record_one(
        &self,
        drive: &VaccinationDrive,
        request: &DoseRequest,
        student_id: StudentId,
        today: NaiveDate,
    ) -> Result<VaccinationRecord, DoseFailure> {
        let student = self
            .store
            .find_student(student_id)?
            .filter(|student| student.active)
            .ok_or(DoseFailure::StudentNotFound)?;

        if !drive.targets(&student.class_name) {
            return Err(DoseFailure::StudentNotTargeted {
                class_name: student.class_name,
            });
        }

        let record = NewVaccinationRecord {
            student_id,
            vaccine_name: drive.vaccine_name.clone(),
            date: today,
            dose_number: request.dose_number,
            administered_by: request.administered_by.trim().to_string(),
            drive_id: Some(drive.id),
            notes: request.notes.clone(),
        };

        match self.store.append_if_absent(record)? {
            AppendOutcome::Inserted(record) => Ok(record),
            AppendOutcome::Duplicate => Err(DoseFailure::DuplicateDose {
                dose_number: request.dose_number,
            }),
        }
    }
}

/// Drive-level conditions that disqualify every student in a batch.
pub fn batch_rejection(drive: &VaccinationDrive, dose_number: u32) -> Option<DoseFailure> {
    if drive.status.is_terminal() {
        return Some(DoseFailure::DriveClosed {
            status: drive.status,
        });
    }
    check_dose_number(drive, dose_number).err()
}

pub(crate) fn check_dose_number(drive: &VaccinationDrive, dose_number: u32) -> Result<(), DoseFailure> {
    if dose_number == 0 || dose_number > drive.doses_per_student {
        return Err(DoseFailure::DoseLimitExceeded {
            requested: dose_number,
            limit: drive.doses_per_student,
        });
    }
    Ok(())
}

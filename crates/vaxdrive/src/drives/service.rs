use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, info, warn};

use super::clock::Clock;
use super::domain::{
    DriveDraft, DriveFilter, DriveId, DriveStatistics, DriveUpdate, ManualRecordRequest,
    NewVaccinationRecord, RecordCorrection, RecordId, StudentId, VaccinationDrive,
    VaccinationRecord,
};
use super::dosing::{check_dose_number, BatchResult, DoseFailure, DoseRecorder, DoseRequest};
use super::repository::{AppendOutcome, DriveWrite, RepositoryError, VaccinationStore};
use super::statistics::StatisticsAggregator;
use super::validator::{DriveRejection, DriveValidator};

/// Facade composing the validator, dose recorder, and statistics aggregator over one store.
pub struct DriveService<S, C> {
    store: Arc<S>,
    clock: Arc<C>,
    validator: DriveValidator,
    recorder: DoseRecorder<S>,
    statistics: StatisticsAggregator<S>,
}

impl<S, C> DriveService<S, C>
where
    S: VaccinationStore + 'static,
    C: Clock + 'static,
{
    pub fn new(store: Arc<S>, clock: Arc<C>, lead_days: i64) -> Self {
        let statistics = StatisticsAggregator::new(Arc::clone(&store));
        let recorder = DoseRecorder::new(Arc::clone(&store), statistics.clone());
        Self {
            store,
            clock,
            validator: DriveValidator::new(lead_days),
            recorder,
            statistics,
        }
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    pub fn validator(&self) -> &DriveValidator {
        &self.validator
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Run the creation checks for `draft` without storing anything.
    pub fn check_drive(&self, draft: &DriveDraft) -> Result<(), DriveServiceError> {
        let existing = self.store.list_drives(&DriveFilter::default())?;
        self.validator
            .validate_new(draft, &existing, self.today())
            .map_err(|rejection| {
                debug!(code = rejection.code(), %rejection, "drive candidate rejected");
                DriveServiceError::from(rejection)
            })
    }

    /// Validate and store a new drive with its initial statistics.
    pub fn create_drive(&self, draft: DriveDraft) -> Result<VaccinationDrive, DriveServiceError> {
        self.check_drive(&draft)?;

        let mut drive = match self.store.insert_drive_exclusive(&draft)? {
            DriveWrite::Stored(drive) => drive,
            DriveWrite::Overlaps(conflict) => {
                debug!(conflicting = %conflict.id, "overlap detected at write time");
                return Err(DriveRejection::overlap_with(&conflict).into());
            }
        };
        self.refresh_counters(&mut drive);

        info!(
            drive = %drive.id,
            name = %drive.name,
            start = %drive.start_date,
            end = %drive.end_date,
            "vaccination drive scheduled"
        );
        Ok(drive)
    }

    pub fn get_drive(&self, id: DriveId) -> Result<VaccinationDrive, DriveServiceError> {
        self.store
            .fetch_drive(id)?
            .ok_or(DriveServiceError::DriveNotFound(id))
    }

    pub fn list_drives(
        &self,
        filter: &DriveFilter,
    ) -> Result<Vec<VaccinationDrive>, DriveServiceError> {
        Ok(self.store.list_drives(filter)?)
    }

    /// Apply a partial update after re-validating the resulting drive.
    pub fn update_drive(
        &self,
        id: DriveId,
        update: DriveUpdate,
    ) -> Result<VaccinationDrive, DriveServiceError> {
        let current = self.get_drive(id)?;
        let patched = current.patched(&update);
        let existing = self.store.list_drives(&DriveFilter::default())?;

        if let Err(rejection) =
            self.validator
                .validate_update(&current, &patched, &existing, self.today())
        {
            debug!(drive = %id, code = rejection.code(), %rejection, "drive update rejected");
            return Err(rejection.into());
        }

        let mut drive = match self.store.update_drive_exclusive(&patched) {
            Ok(DriveWrite::Stored(drive)) => drive,
            Ok(DriveWrite::Overlaps(conflict)) => {
                return Err(DriveRejection::overlap_with(&conflict).into())
            }
            Err(RepositoryError::NotFound) => return Err(DriveServiceError::DriveNotFound(id)),
            Err(err) => return Err(err.into()),
        };
        self.refresh_counters(&mut drive);

        info!(drive = %drive.id, status = drive.status.label(), "vaccination drive updated");
        Ok(drive)
    }

    /// Remove a drive that has not ended and has no administered doses.
    pub fn delete_drive(&self, id: DriveId) -> Result<(), DriveServiceError> {
        let current = self.get_drive(id)?;
        self.validator.validate_delete(&current, self.today())?;

        match self.store.delete_drive(id) {
            Ok(()) => {
                info!(drive = %id, "vaccination drive deleted");
                Ok(())
            }
            Err(RepositoryError::Conflict(_)) => Err(DriveServiceError::DriveHasRecords(id)),
            Err(RepositoryError::NotFound) => Err(DriveServiceError::DriveNotFound(id)),
            Err(err) => Err(err.into()),
        }
    }

    /// Record one dose for each listed student. Per-student failures land in the result.
    pub fn mark_vaccinated(
        &self,
        id: DriveId,
        request: DoseRequest,
    ) -> Result<BatchResult, DriveServiceError> {
        if request.student_ids.is_empty() {
            return Err(DriveServiceError::InvalidRequest(
                "student_ids must list at least one student".to_string(),
            ));
        }
        if request.administered_by.trim().is_empty() {
            return Err(DriveServiceError::InvalidRequest(
                "administered_by must not be empty".to_string(),
            ));
        }

        let drive = self.get_drive(id)?;
        Ok(self.recorder.record(&drive, &request, self.today()))
    }

    /// Recompute and persist the drive's counters. Allowed on past drives.
    pub fn refresh_statistics(&self, id: DriveId) -> Result<DriveStatistics, DriveServiceError> {
        let drive = self.get_drive(id)?;
        Ok(self.statistics.recompute(&drive)?)
    }

    pub fn drive_records(&self, id: DriveId) -> Result<Vec<VaccinationRecord>, DriveServiceError> {
        self.get_drive(id)?;
        Ok(self.store.records_for_drive(id)?)
    }

    /// A student's full vaccination history, oldest first.
    pub fn student_history(
        &self,
        student_id: StudentId,
    ) -> Result<Vec<VaccinationRecord>, DriveServiceError> {
        if self.store.find_student(student_id)?.is_none() {
            return Err(DriveServiceError::StudentNotFound(student_id));
        }
        Ok(self.store.records_for_student(student_id)?)
    }

    /// Enter a single dose outside of a batch.
    ///
    /// When the record references a drive, the drive's vaccine and dose limit apply and the
    /// same (student, drive, dose) uniqueness holds as for batches.
    pub fn record_manual(
        &self,
        request: ManualRecordRequest,
    ) -> Result<VaccinationRecord, DriveServiceError> {
        if request.administered_by.trim().is_empty() {
            return Err(DriveServiceError::InvalidRequest(
                "administered_by must not be empty".to_string(),
            ));
        }
        if self.store.find_student(request.student_id)?.is_none() {
            return Err(DriveServiceError::StudentNotFound(request.student_id));
        }

        let drive = match request.drive_id {
            Some(drive_id) => {
                let drive = self.get_drive(drive_id)?;
                check_dose_number(&drive, request.dose_number)?;
                Some(drive)
            }
            None if request.dose_number == 0 => {
                return Err(DriveServiceError::InvalidRequest(
                    "dose_number must be at least 1".to_string(),
                ))
            }
            None => None,
        };

        let vaccine_name = match (&drive, request.vaccine_name.as_deref().map(str::trim)) {
            (_, Some(name)) if !name.is_empty() => name.to_string(),
            (Some(drive), _) => drive.vaccine_name.clone(),
            (None, _) => {
                return Err(DriveServiceError::InvalidRequest(
                    "vaccine_name is required when no drive is referenced".to_string(),
                ))
            }
        };

        let record = NewVaccinationRecord {
            student_id: request.student_id,
            vaccine_name,
            date: request.date.unwrap_or_else(|| self.today()),
            dose_number: request.dose_number,
            administered_by: request.administered_by.trim().to_string(),
            drive_id: request.drive_id,
            notes: request.notes,
        };

        let stored = match self.store.append_if_absent(record)? {
            AppendOutcome::Inserted(stored) => stored,
            AppendOutcome::Duplicate => {
                return Err(DoseFailure::DuplicateDose {
                    dose_number: request.dose_number,
                }
                .into())
            }
        };

        if let Some(drive) = drive {
            self.recompute_after_change(&drive);
        }
        info!(record = %stored.id, student = %stored.student_id, "manual vaccination recorded");
        Ok(stored)
    }

    pub fn get_record(&self, id: RecordId) -> Result<VaccinationRecord, DriveServiceError> {
        self.store
            .fetch_record(id)?
            .ok_or(DriveServiceError::RecordNotFound(id))
    }

    /// Adjust who administered a dose or its notes. Identity fields never change.
    pub fn correct_record(
        &self,
        id: RecordId,
        correction: RecordCorrection,
    ) -> Result<VaccinationRecord, DriveServiceError> {
        let mut record = self.get_record(id)?;

        if let Some(administered_by) = correction.administered_by {
            let administered_by = administered_by.trim();
            if administered_by.is_empty() {
                return Err(DriveServiceError::InvalidRequest(
                    "administered_by must not be empty".to_string(),
                ));
            }
            record.administered_by = administered_by.to_string();
        }
        if let Some(notes) = correction.notes {
            record.notes = Some(notes);
        }

        match self.store.update_record(&record) {
            Ok(()) => Ok(record),
            Err(RepositoryError::NotFound) => Err(DriveServiceError::RecordNotFound(id)),
            Err(err) => Err(err.into()),
        }
    }

    /// Hard-delete a record and refresh its drive's counters.
    pub fn delete_record(&self, id: RecordId) -> Result<VaccinationRecord, DriveServiceError> {
        let record = match self.store.delete_record(id) {
            Ok(record) => record,
            Err(RepositoryError::NotFound) => return Err(DriveServiceError::RecordNotFound(id)),
            Err(err) => return Err(err.into()),
        };

        if let Some(drive_id) = record.drive_id {
            match self.store.fetch_drive(drive_id) {
                Ok(Some(drive)) => self.recompute_after_change(&drive),
                Ok(None) => {}
                Err(err) => {
                    warn!(drive = %drive_id, error = %err, "could not load drive after record delete")
                }
            }
        }
        info!(record = %id, student = %record.student_id, "vaccination record deleted");
        Ok(record)
    }

    fn refresh_counters(&self, drive: &mut VaccinationDrive) {
        match self.statistics.recompute(drive) {
            Ok(statistics) => drive.statistics = statistics,
            Err(err) => warn!(drive = %drive.id, error = %err, "statistics recompute failed"),
        }
    }

    fn recompute_after_change(&self, drive: &VaccinationDrive) {
        if let Err(err) = self.statistics.recompute(drive) {
            warn!(drive = %drive.id, error = %err, "statistics recompute failed");
        }
    }
}

/// Error raised by the drive service.
#[derive(Debug, thiserror::Error)]
pub enum DriveServiceError {
    #[error(transparent)]
    Rejected(#[from] DriveRejection),
    #[error(transparent)]
    Dose(#[from] DoseFailure),
    #[error("drive {0} not found")]
    DriveNotFound(DriveId),
    #[error("vaccination record {0} not found")]
    RecordNotFound(RecordId),
    #[error("student {0} not found")]
    StudentNotFound(StudentId),
    #[error("drive {0} still has vaccination records")]
    DriveHasRecords(DriveId),
    #[error("{0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl DriveServiceError {
    pub fn code(&self) -> &'static str {
        match self {
            DriveServiceError::Rejected(rejection) => rejection.code(),
            DriveServiceError::Dose(failure) => failure.code(),
            DriveServiceError::DriveNotFound(_) => "DRIVE_NOT_FOUND",
            DriveServiceError::RecordNotFound(_) => "RECORD_NOT_FOUND",
            DriveServiceError::StudentNotFound(_) => "STUDENT_NOT_FOUND",
            DriveServiceError::DriveHasRecords(_) => "DRIVE_HAS_RECORDS",
            DriveServiceError::InvalidRequest(_) => "VALIDATION_FIELDS",
            DriveServiceError::Repository(_) => "PERSISTENCE_FAILURE",
        }
    }
}

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use super::domain::{
    first_overlap, DriveDraft, DriveFilter, DriveId, DriveStatistics, NewVaccinationRecord,
    RecordId, Student, StudentId, VaccinationDrive, VaccinationRecord,
};
use super::repository::{
    AppendOutcome, DriveRepository, DriveWrite, RepositoryError, StudentDirectory,
    VaccinationLedger,
};

#[derive(Debug, Default)]
struct MemoryState {
    drives: BTreeMap<DriveId, VaccinationDrive>,
    students: BTreeMap<StudentId, Student>,
    records: BTreeMap<RecordId, VaccinationRecord>,
    next_drive: i64,
    next_record: i64,
}

impl MemoryState {
    fn allocate_drive(&mut self) -> DriveId {
        self.next_drive += 1;
        DriveId(self.next_drive)
    }

    fn allocate_record(&mut self) -> RecordId {
        self.next_record += 1;
        RecordId(self.next_record)
    }
}

/// Process-local store. A single lock covers every table, so each trait call is atomic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, RepositoryError> {
        self.state
            .lock()
            .map_err(|_| RepositoryError::Unavailable("memory store lock poisoned".to_string()))
    }
}

impl StudentDirectory for MemoryStore {
    fn find_student(&self, id: StudentId) -> Result<Option<Student>, RepositoryError> {
        Ok(self.lock()?.students.get(&id).cloned())
    }

    fn count_active_in_classes(&self, classes: &BTreeSet<String>) -> Result<u32, RepositoryError> {
        let state = self.lock()?;
        let count = state
            .students
            .values()
            .filter(|student| student.active && classes.contains(student.class_name.trim()))
            .count();
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    fn save_student(&self, student: Student) -> Result<Student, RepositoryError> {
        let mut state = self.lock()?;
        let taken = state
            .students
            .values()
            .any(|other| other.id != student.id && other.student_number == student.student_number);
        if taken {
            return Err(RepositoryError::Conflict(format!(
                "student number {} already enrolled",
                student.student_number
            )));
        }
        state.students.insert(student.id, student.clone());
        Ok(student)
    }
}

impl VaccinationLedger for MemoryStore {
    fn append_if_absent(
        &self,
        record: NewVaccinationRecord,
    ) -> Result<AppendOutcome, RepositoryError> {
        let mut state = self.lock()?;
        if state
            .records
            .values()
            .any(|existing| record.collides_with(existing))
        {
            return Ok(AppendOutcome::Duplicate);
        }
        let id = state.allocate_record();
        let stored = record.with_id(id);
        state.records.insert(id, stored.clone());
        Ok(AppendOutcome::Inserted(stored))
    }

    fn fetch_record(&self, id: RecordId) -> Result<Option<VaccinationRecord>, RepositoryError> {
        Ok(self.lock()?.records.get(&id).cloned())
    }

    fn update_record(&self, record: &VaccinationRecord) -> Result<(), RepositoryError> {
        let mut state = self.lock()?;
        match state.records.get_mut(&record.id) {
            Some(slot) => {
                *slot = record.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }

    fn delete_record(&self, id: RecordId) -> Result<VaccinationRecord, RepositoryError> {
        self.lock()?
            .records
            .remove(&id)
            .ok_or(RepositoryError::NotFound)
    }

    fn records_for_drive(&self, drive: DriveId) -> Result<Vec<VaccinationRecord>, RepositoryError> {
        let state = self.lock()?;
        Ok(state
            .records
            .values()
            .filter(|record| record.drive_id == Some(drive))
            .cloned()
            .collect())
    }

    fn records_for_student(
        &self,
        student: StudentId,
    ) -> Result<Vec<VaccinationRecord>, RepositoryError> {
        let state = self.lock()?;
        let mut records: Vec<_> = state
            .records
            .values()
            .filter(|record| record.student_id == student)
            .cloned()
            .collect();
        records.sort_by_key(|record| (record.date, record.id));
        Ok(records)
    }
}

impl DriveRepository for MemoryStore {
    fn fetch_drive(&self, id: DriveId) -> Result<Option<VaccinationDrive>, RepositoryError> {
        Ok(self.lock()?.drives.get(&id).cloned())
    }

    fn list_drives(&self, filter: &DriveFilter) -> Result<Vec<VaccinationDrive>, RepositoryError> {
        let state = self.lock()?;
        let mut drives: Vec<_> = state
            .drives
            .values()
            .filter(|drive| filter.matches(drive))
            .cloned()
            .collect();
        drives.sort_by_key(|drive| (drive.start_date, drive.id));
        Ok(drives)
    }

    fn insert_drive_exclusive(&self, draft: &DriveDraft) -> Result<DriveWrite, RepositoryError> {
        let mut state = self.lock()?;
        if let Some(conflict) =
            first_overlap(state.drives.values(), draft.start_date, draft.end_date, None)
        {
            return Ok(DriveWrite::Overlaps(conflict.clone()));
        }
        let id = state.allocate_drive();
        let drive = VaccinationDrive::from_draft(id, draft);
        state.drives.insert(id, drive.clone());
        Ok(DriveWrite::Stored(drive))
    }

    fn update_drive_exclusive(
        &self,
        drive: &VaccinationDrive,
    ) -> Result<DriveWrite, RepositoryError> {
        let mut state = self.lock()?;
        if !state.drives.contains_key(&drive.id) {
            return Err(RepositoryError::NotFound);
        }
        if !drive.status.is_terminal() {
            if let Some(conflict) = first_overlap(
                state.drives.values(),
                drive.start_date,
                drive.end_date,
                Some(drive.id),
            ) {
                return Ok(DriveWrite::Overlaps(conflict.clone()));
            }
        }
        state.drives.insert(drive.id, drive.clone());
        Ok(DriveWrite::Stored(drive.clone()))
    }

    fn delete_drive(&self, id: DriveId) -> Result<(), RepositoryError> {
        let mut state = self.lock()?;
        if !state.drives.contains_key(&id) {
            return Err(RepositoryError::NotFound);
        }
        let referenced = state
            .records
            .values()
            .filter(|record| record.drive_id == Some(id))
            .count();
        if referenced > 0 {
            return Err(RepositoryError::Conflict(format!(
                "{referenced} vaccination records reference drive {id}"
            )));
        }
        state.drives.remove(&id);
        Ok(())
    }

    fn save_statistics(
        &self,
        id: DriveId,
        statistics: &DriveStatistics,
    ) -> Result<(), RepositoryError> {
        let mut state = self.lock()?;
        let drive = state.drives.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        drive.statistics = *statistics;
        Ok(())
    }
}

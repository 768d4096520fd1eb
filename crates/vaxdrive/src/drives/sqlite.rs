use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::types::Type;
use rusqlite::{
    params, params_from_iter, Connection, OptionalExtension, Row, TransactionBehavior,
};

use super::domain::{
    DriveDraft, DriveFilter, DriveId, DriveStatistics, DriveStatus, GuardianContact,
    NewVaccinationRecord, RecordId, Student, StudentId, VaccinationDrive, VaccinationRecord,
};
use super::repository::{
    AppendOutcome, DriveRepository, DriveWrite, RepositoryError, StudentDirectory,
    VaccinationLedger,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS students (
    id              INTEGER PRIMARY KEY,
    student_number  TEXT NOT NULL UNIQUE,
    first_name      TEXT NOT NULL,
    last_name       TEXT NOT NULL,
    class_name      TEXT NOT NULL,
    date_of_birth   TEXT NOT NULL,
    gender          TEXT NOT NULL,
    active          INTEGER NOT NULL DEFAULT 1,
    guardian_name   TEXT NOT NULL,
    guardian_phone  TEXT NOT NULL,
    guardian_email  TEXT NOT NULL,
    school_id       INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_students_class ON students (class_name, active);

CREATE TABLE IF NOT EXISTS vaccination_drives (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    name                TEXT NOT NULL,
    vaccine_name        TEXT NOT NULL,
    start_date          TEXT NOT NULL,
    end_date            TEXT NOT NULL,
    target_classes      TEXT NOT NULL,
    total_doses         INTEGER NOT NULL,
    doses_per_student   INTEGER NOT NULL,
    location            TEXT NOT NULL,
    notes               TEXT,
    status              TEXT NOT NULL,
    total_targeted      INTEGER NOT NULL DEFAULT 0,
    vaccinated_students INTEGER NOT NULL DEFAULT 0,
    doses_administered  INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_drives_window ON vaccination_drives (status, start_date, end_date);

CREATE TABLE IF NOT EXISTS vaccination_records (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    student_id      INTEGER NOT NULL REFERENCES students (id),
    vaccine_name    TEXT NOT NULL,
    date            TEXT NOT NULL,
    dose_number     INTEGER NOT NULL,
    administered_by TEXT NOT NULL,
    drive_id        INTEGER REFERENCES vaccination_drives (id),
    notes           TEXT
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_records_drive_dose
    ON vaccination_records (student_id, drive_id, dose_number);
CREATE INDEX IF NOT EXISTS idx_records_drive ON vaccination_records (drive_id);
"#;

const DRIVE_COLUMNS: &str = "id, name, vaccine_name, start_date, end_date, target_classes, \
     total_doses, doses_per_student, location, notes, status, total_targeted, \
     vaccinated_students, doses_administered";

const RECORD_COLUMNS: &str =
    "id, student_id, vaccine_name, date, dose_number, administered_by, drive_id, notes";

const STUDENT_COLUMNS: &str = "id, student_number, first_name, last_name, class_name, \
     date_of_birth, gender, active, guardian_name, guardian_phone, guardian_email, school_id";

/// SQLite-backed store. Overlap and duplicate-dose guards run inside `IMMEDIATE`
/// transactions so concurrent writers on the same file are serialized too.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RepositoryError> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self, RepositoryError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, RepositoryError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn connection(&self) -> Result<MutexGuard<'_, Connection>, RepositoryError> {
        self.conn
            .lock()
            .map_err(|_| RepositoryError::Unavailable("sqlite connection lock poisoned".to_string()))
    }
}

fn conversion_error<E>(index: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(err))
}

fn drive_from_row(row: &Row<'_>) -> rusqlite::Result<VaccinationDrive> {
    let classes: String = row.get(5)?;
    let target_classes: BTreeSet<String> =
        serde_json::from_str(&classes).map_err(|err| conversion_error(5, err))?;
    let status: String = row.get(10)?;
    let status: DriveStatus = status.parse().map_err(|err| conversion_error(10, err))?;

    Ok(VaccinationDrive {
        id: DriveId(row.get(0)?),
        name: row.get(1)?,
        vaccine_name: row.get(2)?,
        start_date: row.get(3)?,
        end_date: row.get(4)?,
        target_classes,
        total_doses: row.get(6)?,
        doses_per_student: row.get(7)?,
        location: row.get(8)?,
        notes: row.get(9)?,
        status,
        statistics: DriveStatistics {
            total_targeted: row.get(11)?,
            vaccinated_students: row.get(12)?,
            doses_administered: row.get(13)?,
        },
    })
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<VaccinationRecord> {
    Ok(VaccinationRecord {
        id: RecordId(row.get(0)?),
        student_id: StudentId(row.get(1)?),
        vaccine_name: row.get(2)?,
        date: row.get(3)?,
        dose_number: row.get(4)?,
        administered_by: row.get(5)?,
        drive_id: row.get::<_, Option<i64>>(6)?.map(DriveId),
        notes: row.get(7)?,
    })
}

fn student_from_row(row: &Row<'_>) -> rusqlite::Result<Student> {
    let gender: String = row.get(6)?;
    Ok(Student {
        id: StudentId(row.get(0)?),
        student_number: row.get(1)?,
        first_name: row.get(2)?,
        last_name: row.get(3)?,
        class_name: row.get(4)?,
        date_of_birth: row.get(5)?,
        gender: gender.parse().map_err(|err| conversion_error(6, err))?,
        active: row.get(7)?,
        guardian: GuardianContact {
            name: row.get(8)?,
            phone: row.get(9)?,
            email: row.get(10)?,
        },
        school_id: row.get(11)?,
    })
}

fn encode_classes(classes: &BTreeSet<String>) -> Result<String, RepositoryError> {
    serde_json::to_string(classes)
        .map_err(|err| RepositoryError::Unavailable(format!("encode target classes: {err}")))
}

fn fetch_drive_with(conn: &Connection, id: DriveId) -> Result<Option<VaccinationDrive>, RepositoryError> {
    let sql = format!("SELECT {DRIVE_COLUMNS} FROM vaccination_drives WHERE id = ?1");
    let drive = conn
        .query_row(&sql, params![id.0], drive_from_row)
        .optional()?;
    Ok(drive)
}

fn overlapping_drive(
    conn: &Connection,
    drive: &VaccinationDrive,
    exclude: Option<DriveId>,
) -> Result<Option<VaccinationDrive>, RepositoryError> {
    let sql = format!(
        "SELECT {DRIVE_COLUMNS} FROM vaccination_drives \
         WHERE status IN (?1, ?2) AND start_date <= ?3 AND end_date >= ?4 \
           AND (?5 IS NULL OR id <> ?5) \
         ORDER BY start_date, id LIMIT 1"
    );
    let conflict = conn
        .query_row(
            &sql,
            params![
                DriveStatus::Scheduled.label(),
                DriveStatus::InProgress.label(),
                drive.end_date,
                drive.start_date,
                exclude.map(|id| id.0),
            ],
            drive_from_row,
        )
        .optional()?;
    Ok(conflict)
}

impl StudentDirectory for SqliteStore {
    fn find_student(&self, id: StudentId) -> Result<Option<Student>, RepositoryError> {
        let conn = self.connection()?;
        let sql = format!("SELECT {STUDENT_COLUMNS} FROM students WHERE id = ?1");
        let student = conn
            .query_row(&sql, params![id.0], student_from_row)
            .optional()?;
        Ok(student)
    }

    fn count_active_in_classes(&self, classes: &BTreeSet<String>) -> Result<u32, RepositoryError> {
        if classes.is_empty() {
            return Ok(0);
        }
        let conn = self.connection()?;
        let placeholders = vec!["?"; classes.len()].join(", ");
        let sql = format!(
            "SELECT COUNT(*) FROM students WHERE active = 1 AND TRIM(class_name) IN ({placeholders})"
        );
        let count: u32 = conn.query_row(&sql, params_from_iter(classes.iter()), |row| row.get(0))?;
        Ok(count)
    }

    fn save_student(&self, student: Student) -> Result<Student, RepositoryError> {
        let conn = self.connection()?;
        conn.execute(
            r#"
            INSERT INTO students (
                id, student_number, first_name, last_name, class_name, date_of_birth,
                gender, active, guardian_name, guardian_phone, guardian_email, school_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT (id) DO UPDATE SET
                student_number = excluded.student_number,
                first_name = excluded.first_name,
                last_name = excluded.last_name,
                class_name = excluded.class_name,
                date_of_birth = excluded.date_of_birth,
                gender = excluded.gender,
                active = excluded.active,
                guardian_name = excluded.guardian_name,
                guardian_phone = excluded.guardian_phone,
                guardian_email = excluded.guardian_email,
                school_id = excluded.school_id
            "#,
            params![
                student.id.0,
                student.student_number,
                student.first_name,
                student.last_name,
                student.class_name,
                student.date_of_birth,
                student.gender.label(),
                student.active,
                student.guardian.name,
                student.guardian.phone,
                student.guardian.email,
                student.school_id,
            ],
        )?;
        Ok(student)
    }
}

impl VaccinationLedger for SqliteStore {
    fn append_if_absent(
        &self,
        record: NewVaccinationRecord,
    ) -> Result<AppendOutcome, RepositoryError> {
        let mut conn = self.connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let inserted = tx.execute(
            r#"
            INSERT INTO vaccination_records (
                student_id, vaccine_name, date, dose_number, administered_by, drive_id, notes
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT (student_id, drive_id, dose_number) DO NOTHING
            "#,
            params![
                record.student_id.0,
                record.vaccine_name,
                record.date,
                record.dose_number,
                record.administered_by,
                record.drive_id.map(|id| id.0),
                record.notes,
            ],
        )?;
        if inserted == 0 {
            return Ok(AppendOutcome::Duplicate);
        }
        let id = RecordId(tx.last_insert_rowid());
        tx.commit()?;
        Ok(AppendOutcome::Inserted(record.with_id(id)))
    }

    fn fetch_record(&self, id: RecordId) -> Result<Option<VaccinationRecord>, RepositoryError> {
        let conn = self.connection()?;
        let sql = format!("SELECT {RECORD_COLUMNS} FROM vaccination_records WHERE id = ?1");
        let record = conn
            .query_row(&sql, params![id.0], record_from_row)
            .optional()?;
        Ok(record)
    }

    fn update_record(&self, record: &VaccinationRecord) -> Result<(), RepositoryError> {
        let conn = self.connection()?;
        let changed = conn.execute(
            "UPDATE vaccination_records SET administered_by = ?2, notes = ?3 WHERE id = ?1",
            params![record.id.0, record.administered_by, record.notes],
        )?;
        if changed == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    fn delete_record(&self, id: RecordId) -> Result<VaccinationRecord, RepositoryError> {
        let mut conn = self.connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let sql = format!("SELECT {RECORD_COLUMNS} FROM vaccination_records WHERE id = ?1");
        let record = tx
            .query_row(&sql, params![id.0], record_from_row)
            .optional()?
            .ok_or(RepositoryError::NotFound)?;
        tx.execute("DELETE FROM vaccination_records WHERE id = ?1", params![id.0])?;
        tx.commit()?;
        Ok(record)
    }

    fn records_for_drive(&self, drive: DriveId) -> Result<Vec<VaccinationRecord>, RepositoryError> {
        let conn = self.connection()?;
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM vaccination_records WHERE drive_id = ?1 ORDER BY id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(params![drive.0], record_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn records_for_student(
        &self,
        student: StudentId,
    ) -> Result<Vec<VaccinationRecord>, RepositoryError> {
        let conn = self.connection()?;
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM vaccination_records WHERE student_id = ?1 ORDER BY date, id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(params![student.0], record_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }
}

impl DriveRepository for SqliteStore {
    fn fetch_drive(&self, id: DriveId) -> Result<Option<VaccinationDrive>, RepositoryError> {
        let conn = self.connection()?;
        fetch_drive_with(&conn, id)
    }

    fn list_drives(&self, filter: &DriveFilter) -> Result<Vec<VaccinationDrive>, RepositoryError> {
        let conn = self.connection()?;
        let sql = format!(
            "SELECT {DRIVE_COLUMNS} FROM vaccination_drives \
             WHERE (?1 IS NULL OR status = ?1) \
               AND (?2 IS NULL OR start_date >= ?2) \
               AND (?3 IS NULL OR start_date <= ?3) \
             ORDER BY start_date, id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let drives = stmt
            .query_map(
                params![filter.status.map(DriveStatus::label), filter.from, filter.to],
                drive_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(drives)
    }

    fn insert_drive_exclusive(&self, draft: &DriveDraft) -> Result<DriveWrite, RepositoryError> {
        let drive = VaccinationDrive::from_draft(DriveId(0), draft);
        let classes = encode_classes(&drive.target_classes)?;

        let mut conn = self.connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        if let Some(conflict) = overlapping_drive(&tx, &drive, None)? {
            return Ok(DriveWrite::Overlaps(conflict));
        }

        tx.execute(
            r#"
            INSERT INTO vaccination_drives (
                name, vaccine_name, start_date, end_date, target_classes, total_doses,
                doses_per_student, location, notes, status
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                drive.name,
                drive.vaccine_name,
                drive.start_date,
                drive.end_date,
                classes,
                drive.total_doses,
                drive.doses_per_student,
                drive.location,
                drive.notes,
                drive.status.label(),
            ],
        )?;
        let id = DriveId(tx.last_insert_rowid());
        tx.commit()?;

        Ok(DriveWrite::Stored(VaccinationDrive { id, ..drive }))
    }

    fn update_drive_exclusive(
        &self,
        drive: &VaccinationDrive,
    ) -> Result<DriveWrite, RepositoryError> {
        let classes = encode_classes(&drive.target_classes)?;

        let mut conn = self.connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        if !drive.status.is_terminal() {
            if let Some(conflict) = overlapping_drive(&tx, drive, Some(drive.id))? {
                return Ok(DriveWrite::Overlaps(conflict));
            }
        }

        let changed = tx.execute(
            r#"
            UPDATE vaccination_drives SET
                name = ?2, vaccine_name = ?3, start_date = ?4, end_date = ?5,
                target_classes = ?6, total_doses = ?7, doses_per_student = ?8,
                location = ?9, notes = ?10, status = ?11
            WHERE id = ?1
            "#,
            params![
                drive.id.0,
                drive.name,
                drive.vaccine_name,
                drive.start_date,
                drive.end_date,
                classes,
                drive.total_doses,
                drive.doses_per_student,
                drive.location,
                drive.notes,
                drive.status.label(),
            ],
        )?;
        if changed == 0 {
            return Err(RepositoryError::NotFound);
        }
        let stored = fetch_drive_with(&tx, drive.id)?.ok_or(RepositoryError::NotFound)?;
        tx.commit()?;
        Ok(DriveWrite::Stored(stored))
    }

    fn delete_drive(&self, id: DriveId) -> Result<(), RepositoryError> {
        let mut conn = self.connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let referenced: i64 = tx.query_row(
            "SELECT COUNT(*) FROM vaccination_records WHERE drive_id = ?1",
            params![id.0],
            |row| row.get(0),
        )?;
        if referenced > 0 {
            return Err(RepositoryError::Conflict(format!(
                "{referenced} vaccination records reference drive {id}"
            )));
        }
        let removed = tx.execute("DELETE FROM vaccination_drives WHERE id = ?1", params![id.0])?;
        if removed == 0 {
            return Err(RepositoryError::NotFound);
        }
        tx.commit()?;
        Ok(())
    }

    fn save_statistics(
        &self,
        id: DriveId,
        statistics: &DriveStatistics,
    ) -> Result<(), RepositoryError> {
        let conn = self.connection()?;
        let changed = conn.execute(
            r#"
            UPDATE vaccination_drives
            SET total_targeted = ?2, vaccinated_students = ?3, doses_administered = ?4
            WHERE id = ?1
            "#,
            params![
                id.0,
                statistics.total_targeted,
                statistics.vaccinated_students,
                statistics.doses_administered,
            ],
        )?;
        if changed == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }
}

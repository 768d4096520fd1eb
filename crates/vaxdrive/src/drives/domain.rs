use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Identifier for a scheduled vaccination drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DriveId(pub i64);

/// Internal identifier for an enrolled student.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StudentId(pub i64);

/// Identifier for a single administered dose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub i64);

impl fmt::Display for DriveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for StudentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a drive. Only `Scheduled` and `InProgress` block other drives' windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriveStatus {
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
}

impl DriveStatus {
    pub const fn label(self) -> &'static str {
        match self {
            DriveStatus::Scheduled => "scheduled",
            DriveStatus::InProgress => "in_progress",
            DriveStatus::Completed => "completed",
            DriveStatus::Cancelled => "cancelled",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, DriveStatus::Completed | DriveStatus::Cancelled)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown drive status '{0}'")]
pub struct UnknownDriveStatus(pub String);

impl FromStr for DriveStatus {
    type Err = UnknownDriveStatus;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "scheduled" => Ok(Self::Scheduled),
            "in_progress" | "in-progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(UnknownDriveStatus(raw.to_string())),
        }
    }
}

/// Derived counters. Never authoritative; always recomputed from records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveStatistics {
    pub total_targeted: u32,
    pub vaccinated_students: u32,
    pub doses_administered: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaccinationDrive {
    pub id: DriveId,
    pub name: String,
    pub vaccine_name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub target_classes: BTreeSet<String>,
    pub total_doses: u32,
    pub doses_per_student: u32,
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub status: DriveStatus,
    #[serde(default)]
    pub statistics: DriveStatistics,
}

impl VaccinationDrive {
    pub fn from_draft(id: DriveId, draft: &DriveDraft) -> Self {
        Self {
            id,
            name: draft.name.trim().to_string(),
            vaccine_name: draft.vaccine_name.trim().to_string(),
            start_date: draft.start_date,
            end_date: draft.end_date,
            target_classes: normalize_classes(&draft.target_classes),
            total_doses: draft.total_doses,
            doses_per_student: draft.doses_per_student,
            location: draft.location.trim().to_string(),
            notes: draft.notes.clone(),
            status: DriveStatus::Scheduled,
            statistics: DriveStatistics::default(),
        }
    }

    /// Closed-interval overlap against another window.
    pub fn overlaps(&self, start: NaiveDate, end: NaiveDate) -> bool {
        self.start_date <= end && self.end_date >= start
    }

    pub fn is_past(&self, today: NaiveDate) -> bool {
        self.end_date < today
    }

    pub fn targets(&self, class_name: &str) -> bool {
        self.target_classes.contains(class_name.trim())
    }

    /// Apply a partial update, returning the drive as it would be stored.
    pub fn patched(&self, update: &DriveUpdate) -> Self {
        let mut drive = self.clone();
        if let Some(name) = &update.name {
            drive.name = name.trim().to_string();
        }
        if let Some(vaccine_name) = &update.vaccine_name {
            drive.vaccine_name = vaccine_name.trim().to_string();
        }
        if let Some(start_date) = update.start_date {
            drive.start_date = start_date;
        }
        if let Some(end_date) = update.end_date {
            drive.end_date = end_date;
        }
        if let Some(classes) = &update.target_classes {
            drive.target_classes = normalize_classes(classes);
        }
        if let Some(total_doses) = update.total_doses {
            drive.total_doses = total_doses;
        }
        if let Some(doses_per_student) = update.doses_per_student {
            drive.doses_per_student = doses_per_student;
        }
        if let Some(location) = &update.location {
            drive.location = location.trim().to_string();
        }
        if let Some(notes) = &update.notes {
            drive.notes = Some(notes.clone());
        }
        if let Some(status) = update.status {
            drive.status = status;
        }
        drive
    }
}

/// First non-terminal drive (other than `exclude`) whose window overlaps `[start, end]`.
pub fn first_overlap<'a, I>(
    drives: I,
    start: NaiveDate,
    end: NaiveDate,
    exclude: Option<DriveId>,
) -> Option<&'a VaccinationDrive>
where
    I: IntoIterator<Item = &'a VaccinationDrive>,
{
    drives
        .into_iter()
        .filter(|drive| !drive.status.is_terminal())
        .filter(|drive| Some(drive.id) != exclude)
        .filter(|drive| drive.overlaps(start, end))
        .min_by_key(|drive| (drive.start_date, drive.id))
}

fn normalize_classes<'a, I>(classes: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a String>,
{
    classes
        .into_iter()
        .map(|class| class.trim())
        .filter(|class| !class.is_empty())
        .map(str::to_string)
        .collect()
}

/// Inbound payload for scheduling a new drive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveDraft {
    pub name: String,
    pub vaccine_name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub target_classes: Vec<String>,
    pub total_doses: u32,
    pub doses_per_student: u32,
    pub location: String,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Partial update; absent fields keep their stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub vaccine_name: Option<String>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub target_classes: Option<Vec<String>>,
    #[serde(default)]
    pub total_doses: Option<u32>,
    #[serde(default)]
    pub doses_per_student: Option<u32>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub status: Option<DriveStatus>,
}

/// Listing filter. `from`/`to` bound the drive's start date, inclusive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct DriveFilter {
    #[serde(default)]
    pub status: Option<DriveStatus>,
    #[serde(default)]
    pub from: Option<NaiveDate>,
    #[serde(default)]
    pub to: Option<NaiveDate>,
}

impl DriveFilter {
    pub fn matches(&self, drive: &VaccinationDrive) -> bool {
        self.status.map_or(true, |status| drive.status == status)
            && self.from.map_or(true, |from| drive.start_date >= from)
            && self.to.map_or(true, |to| drive.start_date <= to)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl Gender {
    pub const fn label(self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::Other => "other",
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown gender '{0}'")]
pub struct UnknownGender(pub String);

impl FromStr for Gender {
    type Err = UnknownGender;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "male" => Ok(Self::Male),
            "female" => Ok(Self::Female),
            "other" => Ok(Self::Other),
            _ => Err(UnknownGender(raw.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardianContact {
    pub name: String,
    pub phone: String,
    pub email: String,
}

/// Enrolled student as seen by the dosing engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub id: StudentId,
    /// School-issued student number, unique across the roster.
    pub student_number: String,
    pub first_name: String,
    pub last_name: String,
    pub class_name: String,
    pub date_of_birth: NaiveDate,
    pub gender: Gender,
    pub active: bool,
    pub guardian: GuardianContact,
    pub school_id: i64,
}

impl Student {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaccinationRecord {
    pub id: RecordId,
    pub student_id: StudentId,
    pub vaccine_name: String,
    pub date: NaiveDate,
    pub dose_number: u32,
    pub administered_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drive_id: Option<DriveId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// A record that has not been assigned an id by the ledger yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewVaccinationRecord {
    pub student_id: StudentId,
    pub vaccine_name: String,
    pub date: NaiveDate,
    pub dose_number: u32,
    pub administered_by: String,
    pub drive_id: Option<DriveId>,
    pub notes: Option<String>,
}

impl NewVaccinationRecord {
    pub fn with_id(self, id: RecordId) -> VaccinationRecord {
        VaccinationRecord {
            id,
            student_id: self.student_id,
            vaccine_name: self.vaccine_name,
            date: self.date,
            dose_number: self.dose_number,
            administered_by: self.administered_by,
            drive_id: self.drive_id,
            notes: self.notes,
        }
    }

    /// Whether `existing` already covers the same (student, drive, dose) slot.
    pub fn collides_with(&self, existing: &VaccinationRecord) -> bool {
        self.drive_id.is_some()
            && existing.drive_id == self.drive_id
            && existing.student_id == self.student_id
            && existing.dose_number == self.dose_number
    }
}

/// Manual entry outside of a batch, e.g. a dose given at a clinic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualRecordRequest {
    pub student_id: StudentId,
    #[serde(default)]
    pub vaccine_name: Option<String>,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    pub dose_number: u32,
    pub administered_by: String,
    #[serde(default)]
    pub drive_id: Option<DriveId>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Soft correction; the identity of a dose (student, drive, number) never changes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordCorrection {
    #[serde(default)]
    pub administered_by: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

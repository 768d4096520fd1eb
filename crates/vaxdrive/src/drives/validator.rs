use std::collections::BTreeSet;

use chrono::{Duration, NaiveDate};

use super::domain::{first_overlap, DriveDraft, DriveId, VaccinationDrive};
use crate::config::{DEFAULT_DRIVE_LEAD_DAYS, MAX_DRIVE_LEAD_DAYS};

/// Structured reason a drive was refused. Each variant maps to a stable code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DriveRejection {
    #[error("drive ended on {end_date} and can no longer be edited")]
    ImmutablePastDrive { end_date: NaiveDate },
    #[error("start date {start_date} must be on or after {earliest_start} ({lead_days} days from today)")]
    LeadTime {
        start_date: NaiveDate,
        earliest_start: NaiveDate,
        lead_days: i64,
    },
    #[error("end date {end_date} must be after start date {start_date}")]
    DateOrder {
        start_date: NaiveDate,
        end_date: NaiveDate,
    },
    #[error("window overlaps drive {conflicting} ({conflicting_start} to {conflicting_end})")]
    Overlap {
        conflicting: DriveId,
        conflicting_start: NaiveDate,
        conflicting_end: NaiveDate,
    },
    #[error("doses per student ({doses_per_student}) and total doses ({total_doses}) must both be at least 1")]
    DoseCount {
        doses_per_student: u32,
        total_doses: u32,
    },
    #[error("{field} must not be empty")]
    MissingField { field: &'static str },
}

impl DriveRejection {
    pub const fn code(&self) -> &'static str {
        match self {
            DriveRejection::ImmutablePastDrive { .. } => "IMMUTABLE_PAST_DRIVE",
            DriveRejection::LeadTime { .. } => "VALIDATION_LEAD_TIME",
            DriveRejection::DateOrder { .. } => "VALIDATION_DATE_ORDER",
            DriveRejection::Overlap { .. } => "VALIDATION_OVERLAP",
            DriveRejection::DoseCount { .. } => "VALIDATION_DOSE_COUNT",
            DriveRejection::MissingField { .. } => "VALIDATION_FIELDS",
        }
    }

    pub(crate) fn overlap_with(drive: &VaccinationDrive) -> Self {
        DriveRejection::Overlap {
            conflicting: drive.id,
            conflicting_start: drive.start_date,
            conflicting_end: drive.end_date,
        }
    }
}

/// Borrowed view shared by drafts and stored drives.
struct Candidate<'a> {
    id: Option<DriveId>,
    name: &'a str,
    vaccine_name: &'a str,
    location: &'a str,
    start_date: NaiveDate,
    end_date: NaiveDate,
    has_classes: bool,
    doses_per_student: u32,
    total_doses: u32,
}

impl<'a> From<&'a DriveDraft> for Candidate<'a> {
    fn from(draft: &'a DriveDraft) -> Self {
        Self {
            id: None,
            name: &draft.name,
            vaccine_name: &draft.vaccine_name,
            location: &draft.location,
            start_date: draft.start_date,
            end_date: draft.end_date,
            has_classes: draft.target_classes.iter().any(|c| !c.trim().is_empty()),
            doses_per_student: draft.doses_per_student,
            total_doses: draft.total_doses,
        }
    }
}

impl<'a> From<&'a VaccinationDrive> for Candidate<'a> {
    fn from(drive: &'a VaccinationDrive) -> Self {
        Self {
            id: Some(drive.id),
            name: &drive.name,
            vaccine_name: &drive.vaccine_name,
            location: &drive.location,
            start_date: drive.start_date,
            end_date: drive.end_date,
            has_classes: has_classes(&drive.target_classes),
            doses_per_student: drive.doses_per_student,
            total_doses: drive.total_doses,
        }
    }
}

fn has_classes(classes: &BTreeSet<String>) -> bool {
    classes.iter().any(|c| !c.trim().is_empty())
}

/// Pure checks for drive creation and updates against a snapshot of existing drives.
#[derive(Debug, Clone, Copy)]
pub struct DriveValidator {
    lead_days: i64,
}

impl Default for DriveValidator {
    fn default() -> Self {
        Self::new(DEFAULT_DRIVE_LEAD_DAYS)
    }
}

impl DriveValidator {
    pub fn new(lead_days: i64) -> Self {
        Self {
            lead_days: lead_days.clamp(0, MAX_DRIVE_LEAD_DAYS),
        }
    }

    pub fn lead_days(&self) -> i64 {
        self.lead_days
    }

    /// Saturates at the calendar's last representable day.
    pub fn earliest_start(&self, today: NaiveDate) -> NaiveDate {
        today
            .checked_add_signed(Duration::days(self.lead_days))
            .unwrap_or(NaiveDate::MAX)
    }

    /// Validate a brand-new drive. `existing` may contain any drives; terminal ones are ignored.
    pub fn validate_new(
        &self,
        draft: &DriveDraft,
        existing: &[VaccinationDrive],
        today: NaiveDate,
    ) -> Result<(), DriveRejection> {
        let candidate = Candidate::from(draft);
        self.check_schedule(&candidate, today)?;
        check_overlap(&candidate, existing)?;
        check_doses(&candidate)?;
        check_fields(&candidate)
    }

    /// Validate `patched` as the replacement for `current`.
    ///
    /// Date rules only re-apply when the window moves. Overlap is also re-checked when a
    /// cancelled or completed drive is brought back to a non-terminal status.
    pub fn validate_update(
        &self,
        current: &VaccinationDrive,
        patched: &VaccinationDrive,
        existing: &[VaccinationDrive],
        today: NaiveDate,
    ) -> Result<(), DriveRejection> {
        if current.is_past(today) {
            return Err(DriveRejection::ImmutablePastDrive {
                end_date: current.end_date,
            });
        }

        let candidate = Candidate::from(patched);
        let dates_changed =
            current.start_date != patched.start_date || current.end_date != patched.end_date;
        let reactivated = current.status.is_terminal() && !patched.status.is_terminal();

        if dates_changed {
            self.check_schedule(&candidate, today)?;
        }
        if (dates_changed || reactivated) && !patched.status.is_terminal() {
            check_overlap(&candidate, existing)?;
        }
        check_doses(&candidate)?;
        check_fields(&candidate)
    }

    /// Deleting follows the same immutability rule as editing.
    pub fn validate_delete(
        &self,
        current: &VaccinationDrive,
        today: NaiveDate,
    ) -> Result<(), DriveRejection> {
        if current.is_past(today) {
            return Err(DriveRejection::ImmutablePastDrive {
                end_date: current.end_date,
            });
        }
        Ok(())
    }

    fn check_schedule(&self, candidate: &Candidate<'_>, today: NaiveDate) -> Result<(), DriveRejection> {
        let earliest_start = self.earliest_start(today);
        if candidate.start_date < earliest_start {
            return Err(DriveRejection::LeadTime {
                start_date: candidate.start_date,
                earliest_start,
                lead_days: self.lead_days,
            });
        }
        if candidate.end_date <= candidate.start_date {
            return Err(DriveRejection::DateOrder {
                start_date: candidate.start_date,
                end_date: candidate.end_date,
            });
        }
        Ok(())
    }
}

fn check_overlap(candidate: &Candidate<'_>, existing: &[VaccinationDrive]) -> Result<(), DriveRejection> {
    match first_overlap(existing, candidate.start_date, candidate.end_date, candidate.id) {
        Some(conflict) => Err(DriveRejection::overlap_with(conflict)),
        None => Ok(()),
    }
}

fn check_doses(candidate: &Candidate<'_>) -> Result<(), DriveRejection> {
    if candidate.doses_per_student < 1 || candidate.total_doses < 1 {
        return Err(DriveRejection::DoseCount {
            doses_per_student: candidate.doses_per_student,
            total_doses: candidate.total_doses,
        });
    }
    Ok(())
}

fn check_fields(candidate: &Candidate<'_>) -> Result<(), DriveRejection> {
    let required = [
        ("name", candidate.name),
        ("vaccine_name", candidate.vaccine_name),
        ("location", candidate.location),
    ];
    if let Some(&(field, _)) = required.iter().find(|(_, value)| value.trim().is_empty()) {
        return Err(DriveRejection::MissingField { field });
    }
    if !candidate.has_classes {
        return Err(DriveRejection::MissingField {
            field: "target_classes",
        });
    }
    Ok(())
}

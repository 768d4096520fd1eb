use std::collections::BTreeSet;
use std::sync::Arc;

use super::domain::{DriveStatistics, VaccinationDrive};
use super::repository::{RepositoryError, VaccinationStore};

/// Recomputes drive counters from the roster and the ledger, never incrementally.
pub struct StatisticsAggregator<S> {
    store: Arc<S>,
}

impl<S> Clone for StatisticsAggregator<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S> StatisticsAggregator<S>
where
    S: VaccinationStore + 'static,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Derive the counters without writing them back.
    pub fn compute(&self, drive: &VaccinationDrive) -> Result<DriveStatistics, RepositoryError> {
        let total_targeted = self.store.count_active_in_classes(&drive.target_classes)?;
        let records = self.store.records_for_drive(drive.id)?;
        let vaccinated: BTreeSet<_> = records.iter().map(|record| record.student_id).collect();

        Ok(DriveStatistics {
            total_targeted,
            vaccinated_students: saturating_u32(vaccinated.len()),
            doses_administered: saturating_u32(records.len()),
        })
    }

    /// Derive the counters and persist them onto the drive.
    pub fn recompute(&self, drive: &VaccinationDrive) -> Result<DriveStatistics, RepositoryError> {
        let statistics = self.compute(drive)?;
        self.store.save_statistics(drive.id, &statistics)?;
        Ok(statistics)
    }
}

fn saturating_u32(value: usize) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

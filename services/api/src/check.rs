use chrono::NaiveDate;
use clap::Args;
use std::sync::Arc;
use vaxdrive::config::AppConfig;
use vaxdrive::drives::{
    Clock, DriveDraft, DriveService, FixedClock, MemoryStore, SqliteStore, SystemClock,
    VaccinationStore,
};
use vaxdrive::error::AppError;

#[derive(Args, Debug)]
pub(crate) struct CheckArgs {
    /// First day of the candidate drive (YYYY-MM-DD)
    #[arg(long, value_parser = crate::infra::parse_date)]
    pub(crate) start: NaiveDate,
    /// Last day of the candidate drive (YYYY-MM-DD)
    #[arg(long, value_parser = crate::infra::parse_date)]
    pub(crate) end: NaiveDate,
    /// Evaluate as of this date instead of today
    #[arg(long, value_parser = crate::infra::parse_date)]
    pub(crate) today: Option<NaiveDate>,
    /// Target classes for the candidate (repeatable)
    #[arg(long, default_value = "all")]
    pub(crate) classes: Vec<String>,
    /// Doses each student would receive
    #[arg(long, default_value_t = 1)]
    pub(crate) doses_per_student: u32,
    /// Doses available for the whole drive
    #[arg(long, default_value_t = 1)]
    pub(crate) total_doses: u32,
}

impl CheckArgs {
    fn draft(&self) -> DriveDraft {
        DriveDraft {
            name: "candidate window".to_string(),
            vaccine_name: "unspecified".to_string(),
            start_date: self.start,
            end_date: self.end,
            target_classes: self.classes.clone(),
            total_doses: self.total_doses,
            doses_per_student: self.doses_per_student,
            location: "unspecified".to_string(),
            notes: None,
        }
    }
}

/// Validate a candidate window without scheduling it. A rejection becomes the exit error.
pub(crate) fn run_check(args: CheckArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    let lead_days = config.scheduling.lead_days;

    match config.storage.database_path {
        Some(path) => check_against(Arc::new(SqliteStore::open(path)?), &args, lead_days),
        None => check_against(Arc::new(MemoryStore::new()), &args, lead_days),
    }
}

fn check_against<S>(store: Arc<S>, args: &CheckArgs, lead_days: i64) -> Result<(), AppError>
where
    S: VaccinationStore + 'static,
{
    match args.today {
        Some(today) => evaluate(
            &DriveService::new(store, Arc::new(FixedClock::new(today)), lead_days),
            args,
        ),
        None => evaluate(
            &DriveService::new(store, Arc::new(SystemClock), lead_days),
            args,
        ),
    }
}

fn evaluate<S, C>(service: &DriveService<S, C>, args: &CheckArgs) -> Result<(), AppError>
where
    S: VaccinationStore + 'static,
    C: Clock + 'static,
{
    let earliest = service.validator().earliest_start(service.today());
    println!(
        "Checking {} to {} (today {}, earliest start {})",
        args.start,
        args.end,
        service.today(),
        earliest
    );

    service.check_drive(&args.draft())?;
    println!("Window is available.");
    Ok(())
}

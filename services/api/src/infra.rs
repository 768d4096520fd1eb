use chrono::NaiveDate;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use vaxdrive::drives::{
    Gender, GuardianContact, RepositoryError, Student, StudentDirectory, StudentId,
};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("failed to parse '{raw}' as YYYY-MM-DD ({err})"))
}

fn roster_entry(
    id: i64,
    first_name: &str,
    last_name: &str,
    class_name: &str,
    gender: Gender,
    active: bool,
) -> Student {
    Student {
        id: StudentId(id),
        student_number: format!("GHS-{id:04}"),
        first_name: first_name.to_string(),
        last_name: last_name.to_string(),
        class_name: class_name.to_string(),
        date_of_birth: NaiveDate::from_ymd_opt(2013, 1, 1)
            .map(|base| base + chrono::Duration::days(id * 37))
            .unwrap_or(NaiveDate::MIN),
        gender,
        active,
        guardian: GuardianContact {
            name: format!("Guardian of {first_name}"),
            phone: format!("555-01{id:02}"),
            email: format!("{}.family@example.org", last_name.to_ascii_lowercase()),
        },
        school_id: 1,
    }
}

/// Small fixed roster used by `demo` and `serve --seed-demo`.
pub(crate) fn demo_roster() -> Vec<Student> {
    vec![
        roster_entry(1, "Amara", "Okafor", "5A", Gender::Female, true),
        roster_entry(2, "Bilal", "Haddad", "5A", Gender::Male, true),
        roster_entry(3, "Chen", "Wei", "5B", Gender::Male, true),
        roster_entry(4, "Dalia", "Mensah", "5B", Gender::Female, true),
        roster_entry(5, "Eli", "Novak", "5B", Gender::Other, false),
        roster_entry(6, "Farah", "Nasser", "6A", Gender::Female, true),
    ]
}

pub(crate) fn seed_roster<S>(store: &S) -> Result<usize, RepositoryError>
where
    S: StudentDirectory + ?Sized,
{
    let roster = demo_roster();
    let count = roster.len();
    for student in roster {
        store.save_student(student)?;
    }
    Ok(count)
}

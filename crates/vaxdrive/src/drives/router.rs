use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use serde_json::json;

use super::clock::Clock;
use super::domain::{
    DriveDraft, DriveFilter, DriveId, DriveUpdate, ManualRecordRequest, RecordCorrection,
    RecordId, StudentId,
};
use super::dosing::{DoseFailure, DoseRequest};
use super::repository::{RepositoryError, VaccinationStore};
use super::service::{DriveService, DriveServiceError};

type SharedService<S, C> = State<Arc<DriveService<S, C>>>;

/// Router exposing drive scheduling, dose batches, and record maintenance.
pub fn drive_router<S, C>(service: Arc<DriveService<S, C>>) -> Router
where
    S: VaccinationStore + 'static,
    C: Clock + 'static,
{
    Router::new()
        .route(
            "/api/v1/drives",
            get(list_drives_handler::<S, C>).post(create_drive_handler::<S, C>),
        )
        .route(
            "/api/v1/drives/:drive_id",
            get(get_drive_handler::<S, C>)
                .put(update_drive_handler::<S, C>)
                .delete(delete_drive_handler::<S, C>),
        )
        .route(
            "/api/v1/drives/:drive_id/mark-vaccinated",
            post(mark_vaccinated_handler::<S, C>),
        )
        .route(
            "/api/v1/drives/:drive_id/statistics",
            post(statistics_handler::<S, C>),
        )
        .route(
            "/api/v1/drives/:drive_id/vaccinations",
            get(drive_records_handler::<S, C>),
        )
        .route(
            "/api/v1/students/:student_id/vaccinations",
            get(student_history_handler::<S, C>),
        )
        .route("/api/v1/vaccinations", post(manual_record_handler::<S, C>))
        .route(
            "/api/v1/vaccinations/:record_id",
            get(get_record_handler::<S, C>)
                .patch(correct_record_handler::<S, C>)
                .delete(delete_record_handler::<S, C>),
        )
        .with_state(service)
}

pub(crate) fn status_for(error: &DriveServiceError) -> StatusCode {
    match error {
        DriveServiceError::DriveNotFound(_)
        | DriveServiceError::RecordNotFound(_)
        | DriveServiceError::StudentNotFound(_) => StatusCode::NOT_FOUND,
        DriveServiceError::DriveHasRecords(_)
        | DriveServiceError::Dose(DoseFailure::DuplicateDose { .. }) => StatusCode::CONFLICT,
        DriveServiceError::Dose(DoseFailure::Persistence(_))
        | DriveServiceError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
        DriveServiceError::Rejected(_)
        | DriveServiceError::Dose(_)
        | DriveServiceError::InvalidRequest(_) => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

pub(crate) fn error_response(error: DriveServiceError) -> Response {
    let payload = json!({
        "error": error.code(),
        "message": error.to_string(),
    });
    (status_for(&error), Json(payload)).into_response()
}

/// Store calls may block on SQLite locks, so they leave the async worker threads.
async fn run_blocking<S, C, T, F>(
    service: Arc<DriveService<S, C>>,
    work: F,
) -> Result<T, DriveServiceError>
where
    S: VaccinationStore + 'static,
    C: Clock + 'static,
    T: Send + 'static,
    F: FnOnce(&DriveService<S, C>) -> Result<T, DriveServiceError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || work(&service))
        .await
        .unwrap_or_else(|err| {
            Err(DriveServiceError::Repository(RepositoryError::Unavailable(
                format!("store task failed: {err}"),
            )))
        })
}

fn respond<T: serde::Serialize>(status: StatusCode, result: Result<T, DriveServiceError>) -> Response {
    match result {
        Ok(body) => (status, Json(body)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn list_drives_handler<S, C>(
    State(service): SharedService<S, C>,
    Query(filter): Query<DriveFilter>,
) -> Response
where
    S: VaccinationStore + 'static,
    C: Clock + 'static,
{
    let result = run_blocking(service, move |service| {
        service.list_drives(&filter)
    })
    .await;
    respond(StatusCode::OK, result)
}

pub(crate) async fn create_drive_handler<S, C>(
    State(service): SharedService<S, C>,
    Json(draft): Json<DriveDraft>,
) -> Response
where
    S: VaccinationStore + 'static,
    C: Clock + 'static,
{
    let result = run_blocking(service, move |service| {
        service.create_drive(draft)
    })
    .await;
    respond(StatusCode::CREATED, result)
}

pub(crate) async fn get_drive_handler<S, C>(
    State(service): SharedService<S, C>,
    Path(drive_id): Path<i64>,
) -> Response
where
    S: VaccinationStore + 'static,
    C: Clock + 'static,
{
    let result = run_blocking(service, move |service| {
        service.get_drive(DriveId(drive_id))
    })
    .await;
    respond(StatusCode::OK, result)
}

pub(crate) async fn update_drive_handler<S, C>(
    State(service): SharedService<S, C>,
    Path(drive_id): Path<i64>,
    Json(update): Json<DriveUpdate>,
) -> Response
where
    S: VaccinationStore + 'static,
    C: Clock + 'static,
{
    let result = run_blocking(service, move |service| {
        service.update_drive(DriveId(drive_id), update)
    })
    .await;
    respond(StatusCode::OK, result)
}

pub(crate) async fn delete_drive_handler<S, C>(
    State(service): SharedService<S, C>,
    Path(drive_id): Path<i64>,
) -> Response
where
    S: VaccinationStore + 'static,
    C: Clock + 'static,
{
    let result = run_blocking(service, move |service| {
        service.delete_drive(DriveId(drive_id))
    })
    .await;
    match result {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(error) => error_response(error),
    }
}

/// A batch rejected as a whole answers 422 but still carries the full per-student result.
pub(crate) async fn mark_vaccinated_handler<S, C>(
    State(service): SharedService<S, C>,
    Path(drive_id): Path<i64>,
    Json(request): Json<DoseRequest>,
) -> Response
where
    S: VaccinationStore + 'static,
    C: Clock + 'static,
{
    let result = run_blocking(service, move |service| {
        service.mark_vaccinated(DriveId(drive_id), request)
    })
    .await;
    match result {
        Ok(result) if result.is_rejected() => {
            (StatusCode::UNPROCESSABLE_ENTITY, Json(result)).into_response()
        }
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn statistics_handler<S, C>(
    State(service): SharedService<S, C>,
    Path(drive_id): Path<i64>,
) -> Response
where
    S: VaccinationStore + 'static,
    C: Clock + 'static,
{
    let result = run_blocking(service, move |service| {
        service.refresh_statistics(DriveId(drive_id))
    })
    .await;
    respond(StatusCode::OK, result)
}

pub(crate) async fn drive_records_handler<S, C>(
    State(service): SharedService<S, C>,
    Path(drive_id): Path<i64>,
) -> Response
where
    S: VaccinationStore + 'static,
    C: Clock + 'static,
{
    let result = run_blocking(service, move |service| {
        service.drive_records(DriveId(drive_id))
    })
    .await;
    respond(StatusCode::OK, result)
}

pub(crate) async fn student_history_handler<S, C>(
    State(service): SharedService<S, C>,
    Path(student_id): Path<i64>,
) -> Response
where
    S: VaccinationStore + 'static,
    C: Clock + 'static,
{
    let result = run_blocking(service, move |service| {
        service.student_history(StudentId(student_id))
    })
    .await;
    respond(StatusCode::OK, result)
}

pub(crate) async fn manual_record_handler<S, C>(
    State(service): SharedService<S, C>,
    Json(request): Json<ManualRecordRequest>,
) -> Response
where
    S: VaccinationStore + 'static,
    C: Clock + 'static,
{
    let result = run_blocking(service, move |service| {
        service.record_manual(request)
    })
    .await;
    respond(StatusCode::CREATED, result)
}

pub(crate) async fn get_record_handler<S, C>(
    State(service): SharedService<S, C>,
    Path(record_id): Path<i64>,
) -> Response
where
    S: VaccinationStore + 'static,
    C: Clock + 'static,
{
    let result = run_blocking(service, move |service| service.get_record(RecordId(record_id)))
        .await;
    respond(StatusCode::OK, result)
}

pub(crate) async fn correct_record_handler<S, C>(
    State(service): SharedService<S, C>,
    Path(record_id): Path<i64>,
    Json(correction): Json<RecordCorrection>,
) -> Response
where
    S: VaccinationStore + 'static,
    C: Clock + 'static,
{
    let result = run_blocking(service, move |service| {
        service.correct_record(RecordId(record_id), correction)
    })
    .await;
    respond(StatusCode::OK, result)
}

pub(crate) async fn delete_record_handler<S, C>(
    State(service): SharedService<S, C>,
    Path(record_id): Path<i64>,
) -> Response
where
    S: VaccinationStore + 'static,
    C: Clock + 'static,
{
    let result = run_blocking(service, move |service| {
        service.delete_record(RecordId(record_id))
    })
    .await;
    respond(StatusCode::OK, result)
}

use crate::error::{ApiError, ErrorResponse};
use crate::models::{AttendanceRecord, AttendanceUpdate, DeleteResponse, NewAttendance};
use crate::routes;
use crate::state::AppState;
use crate::store::{Filter, OrderBy, RecordId, Table};
use anyhow::Context;
use axum::{extract::Path, extract::State, http::StatusCode, Json};

/// Message returned when a session for the same date, group and day is already recorded
pub const DUPLICATE_ATTENDANCE: &str = "attendance for this group today already exists";

/// GET /attendanceHistory handler - List all attendance sessions by id
#[utoipa::path(
    get,
    path = routes::ATTENDANCE,
    responses(
        (status = 200, description = "All attendance records", body = Vec<AttendanceRecord>),
        (status = 500, description = "Store error", body = ErrorResponse)
    ),
    tag = "attendance"
)]
pub async fn list_attendance(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<Vec<AttendanceRecord>>), ApiError> {
    let rows = state
        .store
        .select(
            Table::AttendanceHistory,
            &Filter::all(),
            Some(&OrderBy::asc("id")),
            None,
        )
        .await
        .context("Failed to list attendance history")?;

    let records = rows
        .into_iter()
        .map(AttendanceRecord::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    tracing::info!("Listed {} attendance records", records.len());
    Ok((StatusCode::OK, Json(records)))
}

/// POST /attendanceHistory handler - Record one attendance session
///
/// Rejected with 400 when a record with the same `date`, `group` and `day`
/// already exists. The check and the insert are separate store calls.
#[utoipa::path(
    post,
    path = routes::ATTENDANCE,
    request_body = NewAttendance,
    responses(
        (status = 201, description = "Attendance recorded", body = AttendanceRecord),
        (status = 400, description = "Attendance for this group and day already exists", body = ErrorResponse),
        (status = 500, description = "Store error", body = ErrorResponse)
    ),
    tag = "attendance"
)]
pub async fn create_attendance(
    State(state): State<AppState>,
    Json(body): Json<NewAttendance>,
) -> Result<(StatusCode, Json<AttendanceRecord>), ApiError> {
    let session = Filter::all()
        .eq("date", body.date.clone())
        .eq("group", body.group.clone())
        .eq("day", body.day.clone());

    let existing = state
        .store
        .select(Table::AttendanceHistory, &session, None, Some(1))
        .await
        .context("Failed to check for existing attendance")?;

    if !existing.is_empty() {
        tracing::info!(
            "Rejected duplicate attendance (date: {}, group: {}, day: {})",
            body.date,
            body.group,
            body.day
        );
        return Err(ApiError::Validation(DUPLICATE_ATTENDANCE.to_string()));
    }

    let row = state
        .store
        .insert(Table::AttendanceHistory, body.into_row())
        .await
        .context("Failed to insert attendance")?;
    let record = AttendanceRecord::try_from(row)?;

    tracing::info!("Recorded attendance {} for group {}", record.id, record.group);
    Ok((StatusCode::CREATED, Json(record)))
}

/// PUT /attendanceHistory/{id} handler - Write the supplied fields of a record
///
/// The duplicate check is not repeated here.
#[utoipa::path(
    put,
    path = routes::ATTENDANCE_ITEM,
    params(
        ("id" = String, Path, description = "Attendance record identifier")
    ),
    request_body = AttendanceUpdate,
    responses(
        (status = 200, description = "Attendance updated", body = AttendanceRecord),
        (status = 500, description = "Unknown record or store error", body = ErrorResponse)
    ),
    tag = "attendance"
)]
pub async fn replace_attendance(
    State(state): State<AppState>,
    Path(id_str): Path<String>,
    Json(body): Json<AttendanceUpdate>,
) -> Result<(StatusCode, Json<AttendanceRecord>), ApiError> {
    let id = RecordId::parse(&id_str);

    let row = state
        .store
        .update(Table::AttendanceHistory, body.into_row(), &Filter::by_id(&id))
        .await
        .with_context(|| format!("Failed to update attendance {}", id))?;
    let record = AttendanceRecord::try_from(row)?;

    tracing::info!("Updated attendance {}", id);
    Ok((StatusCode::OK, Json(record)))
}

/// DELETE /attendanceHistory/{id} handler
#[utoipa::path(
    delete,
    path = routes::ATTENDANCE_ITEM,
    params(
        ("id" = String, Path, description = "Attendance record identifier")
    ),
    responses(
        (status = 200, description = "Attendance deleted", body = DeleteResponse),
        (status = 500, description = "Unknown record or store error", body = ErrorResponse)
    ),
    tag = "attendance"
)]
pub async fn delete_attendance(
    State(state): State<AppState>,
    Path(id_str): Path<String>,
) -> Result<(StatusCode, Json<DeleteResponse>), ApiError> {
    let id = RecordId::parse(&id_str);

    state
        .store
        .delete(Table::AttendanceHistory, &Filter::by_id(&id))
        .await
        .with_context(|| format!("Failed to delete attendance {}", id))?;

    tracing::info!("Deleted attendance {}", id);
    Ok((StatusCode::OK, Json(DeleteResponse { success: true })))
}

//! Course and batch handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde_json::{json, Value};

use crate::auth::CurrentUser;
use crate::db::models::{BatchInput, BatchView, CourseInput, CourseView, TransferRequest, TransferResponse};
use crate::error::AppResult;
use crate::services::courses::{DeleteOutcome, EnrolledStudents};
use crate::services::CourseService;

/// `204` for a real delete, `200 {"message"}` when the row was kept.
fn delete_response(outcome: DeleteOutcome) -> Response {
    match outcome {
        DeleteOutcome::Deleted => StatusCode::NO_CONTENT.into_response(),
        DeleteOutcome::Retained(message) => {
            (StatusCode::OK, Json(json!({ "message": message }))).into_response()
        }
    }
}

/// `GET /api/courses/`
pub async fn list_courses(
    State(service): State<CourseService>,
    Extension(user): Extension<CurrentUser>,
) -> AppResult<Json<Vec<CourseView>>> {
    Ok(Json(service.list_courses(&user).await?))
}

/// `POST /api/courses/` (staff)
pub async fn create_course(
    State(service): State<CourseService>,
    Extension(user): Extension<CurrentUser>,
    Json(input): Json<CourseInput>,
) -> AppResult<(StatusCode, Json<CourseView>)> {
    let course = service.create_course(&user, input).await?;
    Ok((StatusCode::CREATED, Json(course)))
}

/// `GET /api/courses/{id}/`
pub async fn get_course(
    State(service): State<CourseService>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> AppResult<Json<CourseView>> {
    Ok(Json(service.get_course(&user, id).await?))
}

/// `PUT|PATCH /api/courses/{id}/` (staff)
pub async fn update_course(
    State(service): State<CourseService>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Json(input): Json<CourseInput>,
) -> AppResult<Json<CourseView>> {
    Ok(Json(service.update_course(&user, id, input).await?))
}

/// `DELETE /api/courses/{id}/` (staff)
///
/// A course with batches or active enrollments is deactivated instead.
pub async fn delete_course(
    State(service): State<CourseService>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> AppResult<Response> {
    Ok(delete_response(service.delete_course(&user, id).await?))
}

/// `GET /api/courses/check_permissions/`
pub async fn check_permissions(Extension(user): Extension<CurrentUser>) -> Json<Value> {
    let user = user.0;
    Json(json!({
        "username": user.phone,
        "is_staff": user.is_staff,
        "is_admin": user.is_admin,
        "is_superuser": user.is_superuser,
        "can_create_course": user.is_staff,
        "permissions": Vec::<String>::new(),
    }))
}

/// `GET /api/batches/`
pub async fn list_batches(
    State(service): State<CourseService>,
    Extension(user): Extension<CurrentUser>,
) -> AppResult<Json<Vec<BatchView>>> {
    Ok(Json(service.list_batches(&user).await?))
}

/// `POST /api/batches/` (staff)
pub async fn create_batch(
    State(service): State<CourseService>,
    Extension(user): Extension<CurrentUser>,
    Json(input): Json<BatchInput>,
) -> AppResult<(StatusCode, Json<BatchView>)> {
    let batch = service.create_batch(&user, input).await?;
    Ok((StatusCode::CREATED, Json(batch)))
}

/// `GET /api/batches/{id}/`
pub async fn get_batch(
    State(service): State<CourseService>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> AppResult<Json<BatchView>> {
    Ok(Json(service.get_batch(&user, id).await?))
}

/// `PUT|PATCH /api/batches/{id}/` (staff)
pub async fn update_batch(
    State(service): State<CourseService>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Json(input): Json<BatchInput>,
) -> AppResult<Json<BatchView>> {
    Ok(Json(service.update_batch(&user, id, input).await?))
}

/// `DELETE /api/batches/{id}/` (staff)
pub async fn delete_batch(
    State(service): State<CourseService>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> AppResult<Response> {
    Ok(delete_response(service.delete_batch(&user, id).await?))
}

/// `GET /api/batches/{id}/enrolled_students/`
pub async fn enrolled_students(
    State(service): State<CourseService>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> AppResult<Json<Value>> {
    let students = match service.enrolled_students(&user, id).await? {
        EnrolledStudents::Full(students) => serde_json::to_value(students)?,
        EnrolledStudents::Summary(students) => serde_json::to_value(students)?,
    };
    Ok(Json(students))
}

/// `POST /api/batches/{id}/transfer_students/` (staff)
///
/// ```json
/// {"destination_batch_id": 4, "student_ids": [12, 15]}
/// ```
pub async fn transfer_students(
    State(service): State<CourseService>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Json(request): Json<TransferRequest>,
) -> AppResult<Json<TransferResponse>> {
    Ok(Json(service.transfer_students(&user, id, request).await?))
}

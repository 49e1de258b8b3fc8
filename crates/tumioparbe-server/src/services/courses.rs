//! Course and batch management.

use rust_decimal::Decimal;
use serde_json::json;

use crate::auth::CurrentUser;
use crate::db::models::{
    ActionType, Batch, BatchInput, BatchView, Course, CourseInput, CourseView, NamedRef, Student,
    StudentSummary, TransferRequest, TransferResponse,
};
use crate::db::queries::{account, common, course as queries, enrollment};
use crate::db::DbPool;
use crate::error::{AppError, AppResult, FieldErrors};

/// Result of a delete request on a course or batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// Kept but hidden; the message explains why
    Retained(String),
}

/// Students of a batch, at the detail level the caller may see.
#[derive(Debug, Clone)]
pub enum EnrolledStudents {
    Full(Vec<Student>),
    Summary(Vec<StudentSummary>),
}

/// Service for course and batch operations.
#[derive(Clone)]
pub struct CourseService {
    pool: DbPool,
}

impl CourseService {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn course_view(&self, course: Course) -> AppResult<CourseView> {
        let batches = queries::list_batches_for_course(&self.pool, course.id).await?;
        let student_count = queries::count_active_enrollments_for_course(&self.pool, course.id).await?;

        Ok(CourseView {
            batch_count: batches.len() as i64,
            student_count,
            batches,
            course,
        })
    }

    /// Courses visible to the caller; non-staff only see active ones.
    pub async fn list_courses(&self, user: &CurrentUser) -> AppResult<Vec<CourseView>> {
        let courses = queries::list_courses(&self.pool, !user.is_staff()).await?;
        let mut views = Vec::with_capacity(courses.len());
        for course in courses {
            views.push(self.course_view(course).await?);
        }
        Ok(views)
    }

    async fn visible_course(&self, user: &CurrentUser, id: i64) -> AppResult<Course> {
        queries::get_course(&self.pool, id)
            .await?
            .filter(|c| user.is_staff() || c.is_active)
            .ok_or_else(|| AppError::NotFound("No Course matches the given query.".to_string()))
    }

    pub async fn get_course(&self, user: &CurrentUser, id: i64) -> AppResult<CourseView> {
        let course = self.visible_course(user, id).await?;
        self.course_view(course).await
    }

    pub async fn create_course(&self, user: &CurrentUser, input: CourseInput) -> AppResult<CourseView> {
        user.require_staff()?;

        let mut errors = FieldErrors::new();
        let name = input.name.as_deref().map(str::trim).unwrap_or("");
        if name.is_empty() {
            errors.insert("name".to_string(), vec!["This field is required.".to_string()]);
        }
        validate_fee(&mut errors, "admission_fee", input.admission_fee, true);
        validate_fee(&mut errors, "monthly_fee", input.monthly_fee, true);
        if !errors.is_empty() {
            return Err(AppError::Fields(errors));
        }

        let course = queries::insert_course(
            &self.pool,
            name,
            input.description.as_deref().unwrap_or_default(),
            input.image.as_deref().unwrap_or_default(),
            input.admission_fee.unwrap_or_default(),
            input.monthly_fee.unwrap_or_default(),
            input.is_active.unwrap_or(true),
        )
        .await?;

        common::insert_activity(
            &self.pool,
            user.id(),
            ActionType::CourseModification,
            &json!({ "course_id": course.id, "action": "created", "name": course.name }),
        )
        .await?;

        tracing::info!(course_id = course.id, "Course created");
        self.course_view(course).await
    }

    pub async fn update_course(
        &self,
        user: &CurrentUser,
        id: i64,
        input: CourseInput,
    ) -> AppResult<CourseView> {
        user.require_staff()?;
        let existing = self.visible_course(user, id).await?;

        let mut errors = FieldErrors::new();
        if let Some(name) = input.name.as_deref() {
            if name.trim().is_empty() {
                errors.insert("name".to_string(), vec!["This field may not be blank.".to_string()]);
            }
        }
        validate_fee(&mut errors, "admission_fee", input.admission_fee, false);
        validate_fee(&mut errors, "monthly_fee", input.monthly_fee, false);
        if !errors.is_empty() {
            return Err(AppError::Fields(errors));
        }

        let course = queries::update_course(
            &self.pool,
            id,
            input.name.as_deref().map(str::trim),
            input.description.as_deref(),
            input.image.as_deref(),
            input.admission_fee,
            input.monthly_fee,
            input.is_active,
        )
        .await?;

        let fee_changed = course.admission_fee != existing.admission_fee
            || course.monthly_fee != existing.monthly_fee;
        let action = if fee_changed {
            ActionType::FeeModification
        } else {
            ActionType::CourseModification
        };
        common::insert_activity(
            &self.pool,
            user.id(),
            action,
            &json!({
                "course_id": course.id,
                "action": "updated",
                "old_admission_fee": existing.admission_fee,
                "new_admission_fee": course.admission_fee,
                "old_monthly_fee": existing.monthly_fee,
                "new_monthly_fee": course.monthly_fee,
            }),
        )
        .await?;

        self.course_view(course).await
    }

    /// Delete a course, or deactivate it while it still has batches or
    /// active enrollments.
    pub async fn delete_course(&self, user: &CurrentUser, id: i64) -> AppResult<DeleteOutcome> {
        user.require_staff()?;
        let course = self.visible_course(user, id).await?;

        let has_batches = queries::count_batches_for_course(&self.pool, course.id).await? > 0;
        let has_enrollments =
            queries::count_active_enrollments_for_course(&self.pool, course.id).await? > 0;

        if has_batches || has_enrollments {
            queries::deactivate_course(&self.pool, course.id).await?;
            tracing::info!(course_id = course.id, "Course deactivated instead of deleted");
            return Ok(DeleteOutcome::Retained(retained_course_message(
                has_batches,
                has_enrollments,
            )));
        }

        queries::delete_course(&self.pool, course.id).await?;
        tracing::info!(course_id = course.id, "Course deleted");
        Ok(DeleteOutcome::Deleted)
    }

    pub async fn list_batches(&self, user: &CurrentUser) -> AppResult<Vec<BatchView>> {
        match user.parent_scope() {
            None => queries::list_all_batches(&self.pool).await,
            Some(parent_id) => queries::list_batches_for_parent(&self.pool, parent_id).await,
        }
    }

    /// A batch the caller may see.
    pub async fn get_batch(&self, user: &CurrentUser, id: i64) -> AppResult<BatchView> {
        let batch = match user.parent_scope() {
            None => queries::get_batch_view(&self.pool, id).await?,
            Some(parent_id) => queries::list_batches_for_parent(&self.pool, parent_id)
                .await?
                .into_iter()
                .find(|b| b.batch.id == id),
        };
        batch.ok_or_else(|| AppError::NotFound("No Batch matches the given query.".to_string()))
    }

    pub async fn create_batch(&self, user: &CurrentUser, input: BatchInput) -> AppResult<BatchView> {
        user.require_staff()?;

        let mut errors = FieldErrors::new();
        let name = input.name.as_deref().map(str::trim).unwrap_or("");
        if name.is_empty() {
            errors.insert("name".to_string(), vec!["This field is required.".to_string()]);
        }
        let course_id = match input.course {
            Some(id) => {
                if queries::get_course(&self.pool, id).await?.is_none() {
                    errors.insert(
                        "course".to_string(),
                        vec![format!("Invalid pk \"{}\" - object does not exist.", id)],
                    );
                }
                id
            }
            None => {
                errors.insert("course".to_string(), vec!["This field is required.".to_string()]);
                0
            }
        };
        let tuition_fee = input.tuition_fee.flatten();
        validate_fee(&mut errors, "tuition_fee", tuition_fee, false);
        if !errors.is_empty() {
            return Err(AppError::Fields(errors));
        }

        let batch = queries::insert_batch(
            &self.pool,
            course_id,
            name,
            input.timing.as_deref().unwrap_or_default(),
            input.group_link.as_deref().unwrap_or_default(),
            input.class_link.as_deref().unwrap_or_default(),
            tuition_fee,
            input.is_visible.unwrap_or(true),
        )
        .await?;

        common::insert_activity(
            &self.pool,
            user.id(),
            ActionType::BatchModification,
            &json!({ "batch_id": batch.id, "course_id": batch.course_id, "action": "created" }),
        )
        .await?;

        tracing::info!(batch_id = batch.id, course_id = batch.course_id, "Batch created");
        self.batch_view(batch.id).await
    }

    pub async fn update_batch(
        &self,
        user: &CurrentUser,
        id: i64,
        input: BatchInput,
    ) -> AppResult<BatchView> {
        user.require_staff()?;
        let existing = self.existing_batch(id).await?;

        let mut errors = FieldErrors::new();
        if let Some(course_id) = input.course {
            if queries::get_course(&self.pool, course_id).await?.is_none() {
                errors.insert(
                    "course".to_string(),
                    vec![format!("Invalid pk \"{}\" - object does not exist.", course_id)],
                );
            }
        }
        let tuition_fee = match input.tuition_fee {
            Some(fee) => fee,
            None => existing.tuition_fee,
        };
        validate_fee(&mut errors, "tuition_fee", tuition_fee, false);
        if !errors.is_empty() {
            return Err(AppError::Fields(errors));
        }

        let batch = queries::update_batch(
            &self.pool,
            id,
            input.course,
            input.name.as_deref().map(str::trim),
            input.timing.as_deref(),
            input.group_link.as_deref(),
            input.class_link.as_deref(),
            tuition_fee,
            input.is_visible,
        )
        .await?;

        let action = if batch.tuition_fee != existing.tuition_fee {
            ActionType::FeeModification
        } else {
            ActionType::BatchModification
        };
        common::insert_activity(
            &self.pool,
            user.id(),
            action,
            &json!({
                "batch_id": batch.id,
                "action": "updated",
                "old_tuition_fee": existing.tuition_fee,
                "new_tuition_fee": batch.tuition_fee,
            }),
        )
        .await?;

        self.batch_view(batch.id).await
    }

    /// Delete a batch, or hide it while it has active enrollments.
    pub async fn delete_batch(&self, user: &CurrentUser, id: i64) -> AppResult<DeleteOutcome> {
        user.require_staff()?;
        let batch = self.existing_batch(id).await?;

        if queries::count_active_enrollments_for_batch(&self.pool, batch.id).await? > 0 {
            queries::hide_batch(&self.pool, batch.id).await?;
            tracing::info!(batch_id = batch.id, "Batch hidden instead of deleted");
            return Ok(DeleteOutcome::Retained(
                "Batch has active enrollments. Marked as invisible instead of deleted.".to_string(),
            ));
        }

        queries::delete_batch(&self.pool, batch.id).await?;
        tracing::info!(batch_id = batch.id, "Batch deleted");
        Ok(DeleteOutcome::Deleted)
    }

    /// Staff see full student records; parents with a child in the batch see
    /// ids and names.
    pub async fn enrolled_students(&self, user: &CurrentUser, id: i64) -> AppResult<EnrolledStudents> {
        let batch = self.get_batch(user, id).await?;
        let students = account::list_enrolled_students(&self.pool, batch.batch.id).await?;

        if user.is_staff() {
            return Ok(EnrolledStudents::Full(students));
        }

        if enrollment::parent_has_child_in_batch(&self.pool, batch.batch.id, user.id()).await? {
            return Ok(EnrolledStudents::Summary(
                students
                    .into_iter()
                    .map(|s| StudentSummary { id: s.id, name: s.name })
                    .collect(),
            ));
        }

        Err(AppError::Forbidden(
            "You do not have permission to view this information".to_string(),
        ))
    }

    /// Move students' active enrollments to another batch of the same course.
    ///
    /// Students already active in the destination are skipped.
    pub async fn transfer_students(
        &self,
        user: &CurrentUser,
        source_id: i64,
        request: TransferRequest,
    ) -> AppResult<TransferResponse> {
        user.require_staff()?;
        let source = self.existing_batch(source_id).await?;

        let destination_id = request
            .destination_batch_id
            .ok_or_else(|| AppError::BadRequest("Destination batch ID is required".to_string()))?;
        if request.student_ids.is_empty() {
            return Err(AppError::BadRequest(
                "At least one student ID is required".to_string(),
            ));
        }

        let destination = queries::get_batch(&self.pool, destination_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Destination batch not found".to_string()))?;

        if source.course_id != destination.course_id {
            return Err(AppError::BadRequest(
                "Cannot transfer students to a batch from a different course".to_string(),
            ));
        }

        let enrollments = enrollment::list_active_in_batch_for_students(
            &self.pool,
            source.id,
            &request.student_ids,
        )
        .await?;
        if enrollments.is_empty() {
            return Err(AppError::NotFound(
                "No active enrollments found for the given students in this batch".to_string(),
            ));
        }

        let mut transferred = Vec::new();
        for enrolled in enrollments {
            if enrollment::active_enrollment_exists(&self.pool, enrolled.student_id, destination.id)
                .await?
            {
                tracing::debug!(
                    student_id = enrolled.student_id,
                    "Student already in destination batch, skipping"
                );
                continue;
            }

            enrollment::move_enrollment(&self.pool, enrolled.id, destination.id).await?;
            let name = account::get_student(&self.pool, enrolled.student_id)
                .await?
                .map(|s| s.name)
                .unwrap_or_default();
            transferred.push(NamedRef {
                id: enrolled.student_id,
                name,
            });
        }

        common::insert_activity(
            &self.pool,
            user.id(),
            ActionType::BatchTransfer,
            &json!({
                "source_batch_id": source.id,
                "destination_batch_id": destination.id,
                "student_ids": transferred.iter().map(|s| s.id).collect::<Vec<_>>(),
            }),
        )
        .await?;

        tracing::info!(
            source_batch_id = source.id,
            destination_batch_id = destination.id,
            count = transferred.len(),
            "Students transferred"
        );

        Ok(TransferResponse {
            source_batch: NamedRef {
                id: source.id,
                name: source.name,
            },
            destination_batch: NamedRef {
                id: destination.id,
                name: destination.name,
            },
            count: transferred.len(),
            transferred_students: transferred,
        })
    }

    async fn existing_batch(&self, id: i64) -> AppResult<Batch> {
        queries::get_batch(&self.pool, id)
            .await?
            .ok_or_else(|| AppError::NotFound("No Batch matches the given query.".to_string()))
    }

    async fn batch_view(&self, id: i64) -> AppResult<BatchView> {
        queries::get_batch_view(&self.pool, id)
            .await?
            .ok_or_else(|| AppError::NotFound("No Batch matches the given query.".to_string()))
    }
}

fn validate_fee(errors: &mut FieldErrors, field: &str, fee: Option<Decimal>, required: bool) {
    match fee {
        None if required => {
            errors.insert(field.to_string(), vec!["This field is required.".to_string()]);
        }
        Some(fee) if fee.is_sign_negative() => {
            errors.insert(
                field.to_string(),
                vec!["Ensure this value is greater than or equal to 0.".to_string()],
            );
        }
        _ => {}
    }
}

fn retained_course_message(has_batches: bool, has_enrollments: bool) -> String {
    let mut message = "Course marked as inactive instead of being deleted.".to_string();
    if has_batches {
        message = format!("Course has batches. {}", message);
    }
    if has_enrollments {
        message = format!("Course has active enrollments. {}", message);
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    use crate::db::test_support::{self as fixture, date};

    #[test]
    fn test_retained_course_message() {
        assert_eq!(
            retained_course_message(true, false),
            "Course has batches. Course marked as inactive instead of being deleted."
        );
        assert_eq!(
            retained_course_message(true, true),
            "Course has active enrollments. Course has batches. \
             Course marked as inactive instead of being deleted."
        );
    }

    #[test]
    fn test_validate_fee() {
        let mut errors = FieldErrors::new();
        validate_fee(&mut errors, "monthly_fee", None, true);
        validate_fee(&mut errors, "tuition_fee", Some(dec!(-1)), false);
        validate_fee(&mut errors, "admission_fee", Some(dec!(0)), true);
        assert!(errors.contains_key("monthly_fee"));
        assert!(errors.contains_key("tuition_fee"));
        assert!(!errors.contains_key("admission_fee"));
    }

    #[tokio::test]
    async fn test_delete_keeps_courses_and_batches_in_use() {
        let Some(pool) = fixture::test_pool().await else { return };
        let staff = fixture::user(&pool, "01733333331", true).await;
        let parent = fixture::user(&pool, "01733333332", false).await;
        let student = fixture::student(&pool, parent.id(), "Rafi").await;
        let course = fixture::course(&pool, dec!(1500)).await;
        let busy = fixture::batch(&pool, course, "Morning", None).await;
        let empty = fixture::batch(&pool, course, "Evening", None).await;
        fixture::enrollment(&pool, student, busy, date(2025, 5, 1), None).await;
        let service = CourseService::new(pool.clone());

        assert!(matches!(
            service.delete_batch(&parent, empty).await,
            Err(AppError::Forbidden(_))
        ));
        assert_eq!(service.delete_batch(&staff, empty).await.unwrap(), DeleteOutcome::Deleted);
        assert_eq!(
            service.delete_batch(&staff, busy).await.unwrap(),
            DeleteOutcome::Retained(
                "Batch has active enrollments. Marked as invisible instead of deleted.".to_string()
            )
        );
        let hidden = queries::get_batch(&pool, busy).await.unwrap().unwrap();
        assert!(!hidden.is_visible);

        assert_eq!(
            service.delete_course(&staff, course).await.unwrap(),
            DeleteOutcome::Retained(retained_course_message(true, true))
        );
        let inactive = queries::get_course(&pool, course).await.unwrap().unwrap();
        assert!(!inactive.is_active);

        let unused = fixture::course(&pool, dec!(900)).await;
        assert_eq!(service.delete_course(&staff, unused).await.unwrap(), DeleteOutcome::Deleted);
        assert!(queries::get_course(&pool, unused).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_transfer_skips_students_already_in_destination() {
        let Some(pool) = fixture::test_pool().await else { return };
        let staff = fixture::user(&pool, "01733333333", true).await;
        let parent = fixture::user(&pool, "01733333334", false).await;
        let rafi = fixture::student(&pool, parent.id(), "Rafi").await;
        let nila = fixture::student(&pool, parent.id(), "Nila").await;
        let course = fixture::course(&pool, dec!(1500)).await;
        let source = fixture::batch(&pool, course, "Morning", None).await;
        let destination = fixture::batch(&pool, course, "Evening", None).await;
        let rafi_source = fixture::enrollment(&pool, rafi, source, date(2025, 5, 1), None).await;
        let nila_source = fixture::enrollment(&pool, nila, source, date(2025, 5, 1), None).await;
        fixture::enrollment(&pool, nila, destination, date(2025, 6, 1), None).await;
        let service = CourseService::new(pool.clone());

        let response = service
            .transfer_students(
                &staff,
                source,
                TransferRequest {
                    destination_batch_id: Some(destination),
                    student_ids: vec![rafi, nila],
                },
            )
            .await
            .unwrap();
        assert_eq!(response.count, 1);
        assert_eq!(response.transferred_students[0].id, rafi);
        assert_eq!(response.transferred_students[0].name, "Rafi");
        assert_eq!(response.destination_batch.name, "Evening");

        let moved = enrollment::get_enrollment(&pool, rafi_source).await.unwrap().unwrap();
        assert_eq!(moved.batch_id, destination);
        let stayed = enrollment::get_enrollment(&pool, nila_source).await.unwrap().unwrap();
        assert_eq!(stayed.batch_id, source);

        let other_course = fixture::course(&pool, dec!(900)).await;
        let elsewhere = fixture::batch(&pool, other_course, "Weekend", None).await;
        let crossed = service
            .transfer_students(
                &staff,
                destination,
                TransferRequest {
                    destination_batch_id: Some(elsewhere),
                    student_ids: vec![rafi],
                },
            )
            .await;
        assert!(matches!(crossed, Err(AppError::BadRequest(_))));
    }
}

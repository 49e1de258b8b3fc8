//! Course and batch queries.

use rust_decimal::Decimal;

use crate::db::models::{Batch, BatchView, Course};
use crate::db::DbPool;
use crate::error::AppResult;

const COURSE_COLUMNS: &str = "id, name, description, image, admission_fee, monthly_fee, \
     is_active, created_at, updated_at";

const BATCH_COLUMNS: &str = "id, course_id, name, timing, group_link, class_link, tuition_fee, \
     is_visible, created_at, updated_at";

/// Batch rows joined with course name and active enrollment count.
const BATCH_VIEW_SELECT: &str = r#"
    SELECT b.id, b.course_id, b.name, b.timing, b.group_link, b.class_link, b.tuition_fee,
           b.is_visible, b.created_at, b.updated_at,
           c.name AS course_name,
           (SELECT COUNT(*) FROM enrollments e WHERE e.batch_id = b.id AND e.is_active)
               AS student_count
    FROM batches b
    JOIN courses c ON c.id = b.course_id
"#;

pub async fn list_courses(pool: &DbPool, active_only: bool) -> AppResult<Vec<Course>> {
    let courses = sqlx::query_as::<_, Course>(&format!(
        "SELECT {} FROM courses WHERE ($1 = FALSE OR is_active) ORDER BY id",
        COURSE_COLUMNS
    ))
    .bind(active_only)
    .fetch_all(pool)
    .await?;

    Ok(courses)
}

pub async fn get_course(pool: &DbPool, id: i64) -> AppResult<Option<Course>> {
    let course = sqlx::query_as::<_, Course>(&format!(
        "SELECT {} FROM courses WHERE id = $1",
        COURSE_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(course)
}

pub async fn insert_course(
    pool: &DbPool,
    name: &str,
    description: &str,
    image: &str,
    admission_fee: Decimal,
    monthly_fee: Decimal,
    is_active: bool,
) -> AppResult<Course> {
    let course = sqlx::query_as::<_, Course>(&format!(
        r#"
        INSERT INTO courses (name, description, image, admission_fee, monthly_fee, is_active)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING {}
        "#,
        COURSE_COLUMNS
    ))
    .bind(name)
    .bind(description)
    .bind(image)
    .bind(admission_fee)
    .bind(monthly_fee)
    .bind(is_active)
    .fetch_one(pool)
    .await?;

    Ok(course)
}

#[allow(clippy::too_many_arguments)]
pub async fn update_course(
    pool: &DbPool,
    id: i64,
    name: Option<&str>,
    description: Option<&str>,
    image: Option<&str>,
    admission_fee: Option<Decimal>,
    monthly_fee: Option<Decimal>,
    is_active: Option<bool>,
) -> AppResult<Course> {
    let course = sqlx::query_as::<_, Course>(&format!(
        r#"
        UPDATE courses SET
            name = COALESCE($2, name),
            description = COALESCE($3, description),
            image = COALESCE($4, image),
            admission_fee = COALESCE($5, admission_fee),
            monthly_fee = COALESCE($6, monthly_fee),
            is_active = COALESCE($7, is_active),
            updated_at = NOW()
        WHERE id = $1
        RETURNING {}
        "#,
        COURSE_COLUMNS
    ))
    .bind(id)
    .bind(name)
    .bind(description)
    .bind(image)
    .bind(admission_fee)
    .bind(monthly_fee)
    .bind(is_active)
    .fetch_one(pool)
    .await?;

    Ok(course)
}

pub async fn deactivate_course(pool: &DbPool, id: i64) -> AppResult<()> {
    sqlx::query("UPDATE courses SET is_active = FALSE, updated_at = NOW() WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn delete_course(pool: &DbPool, id: i64) -> AppResult<bool> {
    let result = sqlx::query("DELETE FROM courses WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn count_batches_for_course(pool: &DbPool, course_id: i64) -> AppResult<i64> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM batches WHERE course_id = $1")
        .bind(course_id)
        .fetch_one(pool)
        .await?;

    Ok(count)
}

pub async fn count_active_enrollments_for_course(pool: &DbPool, course_id: i64) -> AppResult<i64> {
    let (count,): (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*)
        FROM enrollments e
        JOIN batches b ON b.id = e.batch_id
        WHERE b.course_id = $1 AND e.is_active
        "#,
    )
    .bind(course_id)
    .fetch_one(pool)
    .await?;

    Ok(count)
}

pub async fn count_active_enrollments_for_batch(pool: &DbPool, batch_id: i64) -> AppResult<i64> {
    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM enrollments WHERE batch_id = $1 AND is_active")
            .bind(batch_id)
            .fetch_one(pool)
            .await?;

    Ok(count)
}

pub async fn get_batch(pool: &DbPool, id: i64) -> AppResult<Option<Batch>> {
    let batch = sqlx::query_as::<_, Batch>(&format!(
        "SELECT {} FROM batches WHERE id = $1",
        BATCH_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(batch)
}

pub async fn get_batch_view(pool: &DbPool, id: i64) -> AppResult<Option<BatchView>> {
    let batch = sqlx::query_as::<_, BatchView>(&format!("{} WHERE b.id = $1", BATCH_VIEW_SELECT))
        .bind(id)
        .fetch_optional(pool)
        .await?;

    Ok(batch)
}

pub async fn list_all_batches(pool: &DbPool) -> AppResult<Vec<BatchView>> {
    let batches = sqlx::query_as::<_, BatchView>(&format!("{} ORDER BY b.id", BATCH_VIEW_SELECT))
        .fetch_all(pool)
        .await?;

    Ok(batches)
}

pub async fn list_batches_for_course(pool: &DbPool, course_id: i64) -> AppResult<Vec<BatchView>> {
    let batches = sqlx::query_as::<_, BatchView>(&format!(
        "{} WHERE b.course_id = $1 ORDER BY b.id",
        BATCH_VIEW_SELECT
    ))
    .bind(course_id)
    .fetch_all(pool)
    .await?;

    Ok(batches)
}

/// Batches a parent may see: visible batches of active courses, plus any
/// batch one of their children is actively enrolled in.
pub async fn list_batches_for_parent(pool: &DbPool, parent_id: i64) -> AppResult<Vec<BatchView>> {
    let batches = sqlx::query_as::<_, BatchView>(&format!(
        r#"
        {}
        WHERE (b.is_visible AND c.is_active)
           OR b.id IN (
                SELECT e.batch_id FROM enrollments e
                JOIN students s ON s.id = e.student_id
                WHERE s.parent_id = $1 AND e.is_active
           )
        ORDER BY b.id
        "#,
        BATCH_VIEW_SELECT
    ))
    .bind(parent_id)
    .fetch_all(pool)
    .await?;

    Ok(batches)
}

#[allow(clippy::too_many_arguments)]
pub async fn insert_batch(
    pool: &DbPool,
    course_id: i64,
    name: &str,
    timing: &str,
    group_link: &str,
    class_link: &str,
    tuition_fee: Option<Decimal>,
    is_visible: bool,
) -> AppResult<Batch> {
    let batch = sqlx::query_as::<_, Batch>(&format!(
        r#"
        INSERT INTO batches (course_id, name, timing, group_link, class_link, tuition_fee, is_visible)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING {}
        "#,
        BATCH_COLUMNS
    ))
    .bind(course_id)
    .bind(name)
    .bind(timing)
    .bind(group_link)
    .bind(class_link)
    .bind(tuition_fee)
    .bind(is_visible)
    .fetch_one(pool)
    .await?;

    Ok(batch)
}

/// Apply a partial batch update. The tuition fee is written as given
/// (callers resolve "unchanged" before calling).
#[allow(clippy::too_many_arguments)]
pub async fn update_batch(
    pool: &DbPool,
    id: i64,
    course_id: Option<i64>,
    name: Option<&str>,
    timing: Option<&str>,
    group_link: Option<&str>,
    class_link: Option<&str>,
    tuition_fee: Option<Decimal>,
    is_visible: Option<bool>,
) -> AppResult<Batch> {
    let batch = sqlx::query_as::<_, Batch>(&format!(
        r#"
        UPDATE batches SET
            course_id = COALESCE($2, course_id),
            name = COALESCE($3, name),
            timing = COALESCE($4, timing),
            group_link = COALESCE($5, group_link),
            class_link = COALESCE($6, class_link),
            tuition_fee = $7,
            is_visible = COALESCE($8, is_visible),
            updated_at = NOW()
        WHERE id = $1
        RETURNING {}
        "#,
        BATCH_COLUMNS
    ))
    .bind(id)
    .bind(course_id)
    .bind(name)
    .bind(timing)
    .bind(group_link)
    .bind(class_link)
    .bind(tuition_fee)
    .bind(is_visible)
    .fetch_one(pool)
    .await?;

    Ok(batch)
}

pub async fn hide_batch(pool: &DbPool, id: i64) -> AppResult<()> {
    sqlx::query("UPDATE batches SET is_visible = FALSE, updated_at = NOW() WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn delete_batch(pool: &DbPool, id: i64) -> AppResult<bool> {
    let result = sqlx::query("DELETE FROM batches WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

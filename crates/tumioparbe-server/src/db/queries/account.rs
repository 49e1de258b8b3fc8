//! User and student queries.

use chrono::NaiveDate;

use crate::db::models::{Student, User};
use crate::db::DbPool;
use crate::error::AppResult;

const USER_COLUMNS: &str = "id, phone, name, address, facebook_profile, email, password, \
     is_admin, is_staff, is_superuser, is_active, last_login, created_at, updated_at";

const STUDENT_COLUMNS: &str = "id, parent_id, name, date_of_birth, school, current_class, \
     father_name, mother_name, created_at, updated_at";

/// Fields for a new user row.
#[derive(Debug, Clone)]
pub struct NewUser<'a> {
    pub phone: &'a str,
    pub name: &'a str,
    pub address: &'a str,
    pub facebook_profile: &'a str,
    pub email: &'a str,
    pub password_hash: &'a str,
    pub is_admin: bool,
}

pub async fn get_user_by_id(pool: &DbPool, id: i64) -> AppResult<Option<User>> {
    let user = sqlx::query_as::<_, User>(&format!(
        "SELECT {} FROM users WHERE id = $1",
        USER_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(user)
}

pub async fn get_user_by_phone(pool: &DbPool, phone: &str) -> AppResult<Option<User>> {
    let user = sqlx::query_as::<_, User>(&format!(
        "SELECT {} FROM users WHERE phone = $1",
        USER_COLUMNS
    ))
    .bind(phone)
    .fetch_optional(pool)
    .await?;

    Ok(user)
}

pub async fn phone_exists(pool: &DbPool, phone: &str) -> AppResult<bool> {
    let (exists,): (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM users WHERE phone = $1)")
        .bind(phone)
        .fetch_one(pool)
        .await?;

    Ok(exists)
}

/// Insert a user. Admin users are also staff and superusers.
pub async fn insert_user(pool: &DbPool, user: &NewUser<'_>) -> AppResult<User> {
    let created = sqlx::query_as::<_, User>(&format!(
        r#"
        INSERT INTO users (phone, name, address, facebook_profile, email, password,
                           is_admin, is_staff, is_superuser)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $7, $7)
        RETURNING {}
        "#,
        USER_COLUMNS
    ))
    .bind(user.phone)
    .bind(user.name)
    .bind(user.address)
    .bind(user.facebook_profile)
    .bind(user.email)
    .bind(user.password_hash)
    .bind(user.is_admin)
    .fetch_one(pool)
    .await?;

    Ok(created)
}

/// Apply a partial profile update. `None` keeps the stored value.
#[allow(clippy::too_many_arguments)]
pub async fn update_user_profile(
    pool: &DbPool,
    id: i64,
    name: Option<&str>,
    address: Option<&str>,
    facebook_profile: Option<&str>,
    email: Option<&str>,
    password_hash: Option<&str>,
) -> AppResult<User> {
    let user = sqlx::query_as::<_, User>(&format!(
        r#"
        UPDATE users SET
            name = COALESCE($2, name),
            address = COALESCE($3, address),
            facebook_profile = COALESCE($4, facebook_profile),
            email = COALESCE($5, email),
            password = COALESCE($6, password),
            updated_at = NOW()
        WHERE id = $1
        RETURNING {}
        "#,
        USER_COLUMNS
    ))
    .bind(id)
    .bind(name)
    .bind(address)
    .bind(facebook_profile)
    .bind(email)
    .bind(password_hash)
    .fetch_one(pool)
    .await?;

    Ok(user)
}

/// Grant admin, staff, and superuser flags and reset the password.
pub async fn promote_user(pool: &DbPool, id: i64, password_hash: &str) -> AppResult<User> {
    let user = sqlx::query_as::<_, User>(&format!(
        r#"
        UPDATE users SET
            is_admin = TRUE, is_staff = TRUE, is_superuser = TRUE, is_active = TRUE,
            password = $2, updated_at = NOW()
        WHERE id = $1
        RETURNING {}
        "#,
        USER_COLUMNS
    ))
    .bind(id)
    .bind(password_hash)
    .fetch_one(pool)
    .await?;

    Ok(user)
}

pub async fn touch_last_login(pool: &DbPool, id: i64) -> AppResult<()> {
    sqlx::query("UPDATE users SET last_login = NOW() WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn list_students_for_parent(pool: &DbPool, parent_id: i64) -> AppResult<Vec<Student>> {
    let students = sqlx::query_as::<_, Student>(&format!(
        "SELECT {} FROM students WHERE parent_id = $1 ORDER BY id",
        STUDENT_COLUMNS
    ))
    .bind(parent_id)
    .fetch_all(pool)
    .await?;

    Ok(students)
}

pub async fn get_student(pool: &DbPool, id: i64) -> AppResult<Option<Student>> {
    let student = sqlx::query_as::<_, Student>(&format!(
        "SELECT {} FROM students WHERE id = $1",
        STUDENT_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(student)
}

#[allow(clippy::too_many_arguments)]
pub async fn insert_student(
    pool: &DbPool,
    parent_id: i64,
    name: &str,
    date_of_birth: NaiveDate,
    school: &str,
    current_class: &str,
    father_name: &str,
    mother_name: &str,
) -> AppResult<Student> {
    let student = sqlx::query_as::<_, Student>(&format!(
        r#"
        INSERT INTO students (parent_id, name, date_of_birth, school, current_class,
                              father_name, mother_name)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING {}
        "#,
        STUDENT_COLUMNS
    ))
    .bind(parent_id)
    .bind(name)
    .bind(date_of_birth)
    .bind(school)
    .bind(current_class)
    .bind(father_name)
    .bind(mother_name)
    .fetch_one(pool)
    .await?;

    Ok(student)
}

#[allow(clippy::too_many_arguments)]
pub async fn update_student(
    pool: &DbPool,
    id: i64,
    name: Option<&str>,
    date_of_birth: Option<NaiveDate>,
    school: Option<&str>,
    current_class: Option<&str>,
    father_name: Option<&str>,
    mother_name: Option<&str>,
) -> AppResult<Student> {
    let student = sqlx::query_as::<_, Student>(&format!(
        r#"
        UPDATE students SET
            name = COALESCE($2, name),
            date_of_birth = COALESCE($3, date_of_birth),
            school = COALESCE($4, school),
            current_class = COALESCE($5, current_class),
            father_name = COALESCE($6, father_name),
            mother_name = COALESCE($7, mother_name),
            updated_at = NOW()
        WHERE id = $1
        RETURNING {}
        "#,
        STUDENT_COLUMNS
    ))
    .bind(id)
    .bind(name)
    .bind(date_of_birth)
    .bind(school)
    .bind(current_class)
    .bind(father_name)
    .bind(mother_name)
    .fetch_one(pool)
    .await?;

    Ok(student)
}

pub async fn delete_student(pool: &DbPool, id: i64) -> AppResult<bool> {
    let result = sqlx::query("DELETE FROM students WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Students with an active enrollment in `batch_id`.
pub async fn list_enrolled_students(pool: &DbPool, batch_id: i64) -> AppResult<Vec<Student>> {
    let students = sqlx::query_as::<_, Student>(
        r#"
        SELECT s.id, s.parent_id, s.name, s.date_of_birth, s.school, s.current_class,
               s.father_name, s.mother_name, s.created_at, s.updated_at
        FROM students s
        JOIN enrollments e ON e.student_id = s.id
        WHERE e.batch_id = $1 AND e.is_active
        ORDER BY s.name
        "#,
    )
    .bind(batch_id)
    .fetch_all(pool)
    .await?;

    Ok(students)
}

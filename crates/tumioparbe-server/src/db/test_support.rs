//! Database fixtures for the tests that need a live PostgreSQL server.
//!
//! Set `TEST_DATABASE_URL` to run them. Each call to [`test_pool`] migrates a
//! fresh schema of its own, so tests never see each other's rows. Without the
//! variable the tests return early and pass.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use crate::auth::CurrentUser;
use crate::db::models::{Invoice, NewPayment, Payment, PaymentMethod, PaymentStatus};
use crate::db::queries::{account, payment, payment::NewInvoice};
use crate::db::{schema, DbPool};

/// Pool bound to a freshly migrated schema, or `None` without a database.
pub(crate) async fn test_pool() -> Option<DbPool> {
    let Some(url) = std::env::var("TEST_DATABASE_URL").ok().filter(|u| !u.is_empty()) else {
        eprintln!("TEST_DATABASE_URL is not set, skipping database test");
        return None;
    };
    let schema_name = format!("tp_test_{}", Uuid::new_v4().simple());

    let admin = PgPoolOptions::new()
        .max_connections(1)
        .connect(&url)
        .await
        .expect("connect to TEST_DATABASE_URL");
    sqlx::query(&format!("CREATE SCHEMA {}", schema_name))
        .execute(&admin)
        .await
        .expect("create test schema");
    admin.close().await;

    let search_path = format!("SET search_path TO {}", schema_name);
    let pool = PgPoolOptions::new()
        .max_connections(4)
        .after_connect(move |conn, _meta| {
            let search_path = search_path.clone();
            Box::pin(async move {
                sqlx::query(&search_path).execute(&mut *conn).await?;
                Ok(())
            })
        })
        .connect(&url)
        .await
        .expect("connect test pool");
    schema::migrate(&pool).await.expect("migrate test schema");
    schema::create_cache_table(&pool).await.expect("create cache table");
    Some(pool)
}

pub(crate) fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub(crate) async fn user(pool: &DbPool, phone: &str, is_staff: bool) -> CurrentUser {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO users (phone, name, password, is_staff, is_admin) VALUES ($1, $2, '!', $3, $3) RETURNING id",
    )
    .bind(phone)
    .bind(if is_staff { "Staff" } else { "Parent" })
    .bind(is_staff)
    .fetch_one(pool)
    .await
    .expect("insert user");
    CurrentUser(account::get_user_by_id(pool, id).await.unwrap().unwrap())
}

pub(crate) async fn student(pool: &DbPool, parent_id: i64, name: &str) -> i64 {
    sqlx::query_scalar(
        r#"
        INSERT INTO students (parent_id, name, date_of_birth, father_name, mother_name)
        VALUES ($1, $2, '2014-05-02', 'Karim', 'Salma')
        RETURNING id
        "#,
    )
    .bind(parent_id)
    .bind(name)
    .fetch_one(pool)
    .await
    .expect("insert student")
}

pub(crate) async fn course(pool: &DbPool, monthly_fee: Decimal) -> i64 {
    sqlx::query_scalar(
        "INSERT INTO courses (name, admission_fee, monthly_fee) VALUES ('Math', 500, $1) RETURNING id",
    )
    .bind(monthly_fee)
    .fetch_one(pool)
    .await
    .expect("insert course")
}

pub(crate) async fn batch(pool: &DbPool, course_id: i64, name: &str, tuition_fee: Option<Decimal>) -> i64 {
    sqlx::query_scalar("INSERT INTO batches (course_id, name, tuition_fee) VALUES ($1, $2, $3) RETURNING id")
        .bind(course_id)
        .bind(name)
        .bind(tuition_fee)
        .fetch_one(pool)
        .await
        .expect("insert batch")
}

pub(crate) async fn enrollment(
    pool: &DbPool,
    student_id: i64,
    batch_id: i64,
    start_month: NaiveDate,
    tuition_fee: Option<Decimal>,
) -> i64 {
    sqlx::query_scalar(
        r#"
        INSERT INTO enrollments (student_id, batch_id, start_month, tuition_fee)
        VALUES ($1, $2, $3, $4)
        RETURNING id
        "#,
    )
    .bind(student_id)
    .bind(batch_id)
    .bind(start_month)
    .bind(tuition_fee)
    .fetch_one(pool)
    .await
    .expect("insert enrollment")
}

/// Unpaid invoice; `temp_data` makes it a temporary invoice.
pub(crate) async fn invoice(
    pool: &DbPool,
    enrollment_id: Option<i64>,
    month: NaiveDate,
    amount: Decimal,
    temp_data: Option<&serde_json::Value>,
) -> Invoice {
    payment::insert_invoice(
        pool,
        &NewInvoice {
            enrollment_id,
            month,
            amount,
            is_paid: false,
            coupon_id: None,
            temp_invoice_data: temp_data,
        },
    )
    .await
    .expect("insert invoice")
}

/// bKash payment against `invoice_id` carrying the bKash id `bkash_id`.
pub(crate) async fn bkash_payment(
    pool: &DbPool,
    invoice_id: i64,
    transaction_id: &str,
    amount: Decimal,
    status: PaymentStatus,
    bkash_id: &str,
) -> Payment {
    payment::insert_payment(
        pool,
        &NewPayment {
            invoice_id,
            transaction_id,
            amount,
            method: PaymentMethod::Bkash,
            status,
            payment_id: Some(bkash_id),
            payer_reference: Some("01712345678"),
            payment_create_time: None,
            payment_execute_time: None,
        },
    )
    .await
    .expect("insert payment")
}

pub(crate) async fn count(pool: &DbPool, sql: &str) -> i64 {
    sqlx::query_scalar(sql).fetch_one(pool).await.expect("count query")
}

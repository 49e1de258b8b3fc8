//! Schema management for `migrate` and `setup-cache`.
//!
//! Every statement is idempotent so both commands can be re-run against an
//! existing database.

use crate::db::DbPool;
use crate::error::AppResult;

/// Application tables, in dependency order.
const APP_SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id BIGSERIAL PRIMARY KEY,
        phone VARCHAR(11) NOT NULL UNIQUE,
        name VARCHAR(150) NOT NULL DEFAULT '',
        address TEXT NOT NULL DEFAULT '',
        facebook_profile VARCHAR(200) NOT NULL DEFAULT '',
        email VARCHAR(254) NOT NULL DEFAULT '',
        password VARCHAR(128) NOT NULL,
        is_admin BOOLEAN NOT NULL DEFAULT FALSE,
        is_staff BOOLEAN NOT NULL DEFAULT FALSE,
        is_superuser BOOLEAN NOT NULL DEFAULT FALSE,
        is_active BOOLEAN NOT NULL DEFAULT TRUE,
        last_login TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS students (
        id BIGSERIAL PRIMARY KEY,
        parent_id BIGINT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        name VARCHAR(100) NOT NULL,
        date_of_birth DATE NOT NULL,
        school VARCHAR(100) NOT NULL DEFAULT '',
        current_class VARCHAR(20) NOT NULL DEFAULT '',
        father_name VARCHAR(100) NOT NULL,
        mother_name VARCHAR(100) NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_students_parent ON students(parent_id)",
    r#"
    CREATE TABLE IF NOT EXISTS courses (
        id BIGSERIAL PRIMARY KEY,
        name VARCHAR(100) NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        image VARCHAR(255) NOT NULL DEFAULT '',
        admission_fee NUMERIC(10, 2) NOT NULL,
        monthly_fee NUMERIC(10, 2) NOT NULL,
        is_active BOOLEAN NOT NULL DEFAULT TRUE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS batches (
        id BIGSERIAL PRIMARY KEY,
        course_id BIGINT NOT NULL REFERENCES courses(id) ON DELETE CASCADE,
        name VARCHAR(100) NOT NULL,
        timing VARCHAR(100) NOT NULL DEFAULT '',
        group_link VARCHAR(200) NOT NULL DEFAULT '',
        class_link VARCHAR(200) NOT NULL DEFAULT '',
        tuition_fee NUMERIC(10, 2),
        is_visible BOOLEAN NOT NULL DEFAULT TRUE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_batches_course ON batches(course_id)",
    r#"
    CREATE TABLE IF NOT EXISTS enrollments (
        id BIGSERIAL PRIMARY KEY,
        student_id BIGINT NOT NULL REFERENCES students(id) ON DELETE CASCADE,
        batch_id BIGINT NOT NULL REFERENCES batches(id) ON DELETE CASCADE,
        start_month DATE NOT NULL,
        tuition_fee NUMERIC(10, 2),
        is_active BOOLEAN NOT NULL DEFAULT TRUE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS uniq_enrollments_active
        ON enrollments(student_id, batch_id) WHERE is_active
    "#,
    "CREATE INDEX IF NOT EXISTS idx_enrollments_batch ON enrollments(batch_id)",
    r#"
    CREATE TABLE IF NOT EXISTS coupons (
        id BIGSERIAL PRIMARY KEY,
        code VARCHAR(20) NOT NULL UNIQUE,
        name VARCHAR(100) NOT NULL,
        discount_types JSONB NOT NULL DEFAULT '[]'::jsonb,
        discount_value NUMERIC(5, 2),
        expires_at TIMESTAMPTZ NOT NULL,
        is_active BOOLEAN NOT NULL DEFAULT TRUE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS invoices (
        id BIGSERIAL PRIMARY KEY,
        enrollment_id BIGINT REFERENCES enrollments(id) ON DELETE CASCADE,
        month DATE NOT NULL,
        amount NUMERIC(10, 2) NOT NULL,
        is_paid BOOLEAN NOT NULL DEFAULT FALSE,
        coupon_id BIGINT REFERENCES coupons(id) ON DELETE SET NULL,
        temp_invoice BOOLEAN NOT NULL DEFAULT FALSE,
        temp_invoice_data JSONB,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        UNIQUE (enrollment_id, month)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_invoices_unpaid ON invoices(month) WHERE NOT is_paid",
    r#"
    CREATE TABLE IF NOT EXISTS payments (
        id BIGSERIAL PRIMARY KEY,
        invoice_id BIGINT NOT NULL REFERENCES invoices(id) ON DELETE CASCADE,
        transaction_id VARCHAR(100) NOT NULL UNIQUE,
        amount NUMERIC(10, 2) NOT NULL,
        payment_method VARCHAR(20) NOT NULL DEFAULT 'bKash',
        status VARCHAR(20) NOT NULL DEFAULT 'Initiated',
        payment_id VARCHAR(100),
        payer_reference VARCHAR(50),
        payment_create_time TIMESTAMPTZ,
        payment_execute_time TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_payments_payment_id ON payments(payment_id)",
    r#"
    CREATE TABLE IF NOT EXISTS activity_logs (
        id BIGSERIAL PRIMARY KEY,
        user_id BIGINT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        action_type VARCHAR(50) NOT NULL,
        metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sms_logs (
        id BIGSERIAL PRIMARY KEY,
        phone_number TEXT NOT NULL,
        message TEXT NOT NULL,
        message_type VARCHAR(20) NOT NULL,
        status VARCHAR(20) NOT NULL DEFAULT 'PENDING',
        sent_by BIGINT REFERENCES users(id) ON DELETE SET NULL,
        recipient_count INTEGER NOT NULL DEFAULT 1,
        successful_count INTEGER NOT NULL DEFAULT 0,
        failed_count INTEGER NOT NULL DEFAULT 0,
        provider_response JSONB,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_sms_logs_created ON sms_logs(created_at DESC)",
    r#"
    CREATE TABLE IF NOT EXISTS system_settings (
        id BIGINT PRIMARY KEY DEFAULT 1 CHECK (id = 1),
        payment_reminder_days VARCHAR(50) NOT NULL DEFAULT '3,7',
        invoice_generation_days INTEGER NOT NULL DEFAULT 7
            CHECK (invoice_generation_days BETWEEN 1 AND 15),
        auto_generate_invoices BOOLEAN NOT NULL DEFAULT TRUE,
        auto_send_reminders BOOLEAN NOT NULL DEFAULT TRUE,
        created_by BIGINT REFERENCES users(id) ON DELETE SET NULL,
        updated_by BIGINT REFERENCES users(id) ON DELETE SET NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
];

/// Database cache table. Values are JSON documents with an absolute expiry.
const CACHE_SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS cache_entries (
        cache_key VARCHAR(255) PRIMARY KEY,
        value JSONB NOT NULL,
        expires TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_cache_entries_expires ON cache_entries(expires)",
];

async fn apply(pool: &DbPool, statements: &[&str]) -> AppResult<()> {
    for statement in statements {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

/// Create or upgrade all application tables.
pub async fn migrate(pool: &DbPool) -> AppResult<()> {
    apply(pool, APP_SCHEMA).await?;
    tracing::info!(statements = APP_SCHEMA.len(), "Schema migration applied");
    Ok(())
}

/// Create the database cache table.
pub async fn create_cache_table(pool: &DbPool) -> AppResult<()> {
    apply(pool, CACHE_SCHEMA).await?;
    tracing::info!("Cache table 'cache_entries' is ready");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_is_idempotent() {
        for statement in APP_SCHEMA.iter().chain(CACHE_SCHEMA) {
            let s = statement.trim_start();
            assert!(
                s.starts_with("CREATE TABLE IF NOT EXISTS")
                    || s.starts_with("CREATE INDEX IF NOT EXISTS")
                    || s.starts_with("CREATE UNIQUE INDEX IF NOT EXISTS"),
                "non-idempotent statement: {}",
                s
            );
        }
    }

    #[test]
    fn test_tables_created_before_references() {
        let position = |table: &str| {
            APP_SCHEMA
                .iter()
                .position(|s| s.contains(&format!("CREATE TABLE IF NOT EXISTS {} (", table)))
                .unwrap()
        };
        assert!(position("users") < position("students"));
        assert!(position("batches") < position("enrollments"));
        assert!(position("coupons") < position("invoices"));
        assert!(position("invoices") < position("payments"));
    }
}

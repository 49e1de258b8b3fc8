use crate::auth::CurrentUser;
use crate::db::models::{SettingsUpdate, SystemSettings};
use crate::db::queries::common as queries;
use crate::db::DbPool;
use crate::error::{AppError, AppResult, FieldErrors};

const GENERATION_DAYS: std::ops::RangeInclusive<i32> = 1..=15;

/// Service for the singleton automation settings row.
#[derive(Clone)]
pub struct SettingsService {
    pool: DbPool,
}

impl SettingsService {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Current settings, created with defaults on first read.
    pub async fn get(&self) -> AppResult<SystemSettings> {
        queries::get_or_create_settings(&self.pool).await
    }

    pub async fn update(&self, user: &CurrentUser, update: SettingsUpdate) -> AppResult<SystemSettings> {
        user.require_staff()?;

        let reminder_days = update
            .payment_reminder_days
            .as_deref()
            .map(normalize_reminder_days)
            .transpose();

        let mut errors = FieldErrors::new();
        let reminder_days = match reminder_days {
            Ok(days) => days,
            Err(message) => {
                errors.insert("payment_reminder_days".to_string(), vec![message]);
                None
            }
        };
        if let Some(days) = update.invoice_generation_days {
            if !GENERATION_DAYS.contains(&days) {
                errors.insert(
                    "invoice_generation_days".to_string(),
                    vec![format!(
                        "Ensure this value is between {} and {}.",
                        GENERATION_DAYS.start(),
                        GENERATION_DAYS.end()
                    )],
                );
            }
        }
        if !errors.is_empty() {
            return Err(AppError::Fields(errors));
        }

        let settings = queries::update_settings(
            &self.pool,
            reminder_days.as_deref(),
            update.invoice_generation_days,
            update.auto_generate_invoices,
            update.auto_send_reminders,
            user.id(),
        )
        .await?;

        tracing::info!(
            updated_by = user.id(),
            reminder_days = %settings.payment_reminder_days,
            generation_days = settings.invoice_generation_days,
            "System settings updated"
        );
        Ok(settings)
    }
}

/// Parse a comma list of days of month into its canonical sorted form.
fn normalize_reminder_days(raw: &str) -> Result<String, String> {
    let mut days = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match part.parse::<u32>() {
            Ok(day) if (1..=31).contains(&day) => days.push(day),
            _ => return Err(format!("Invalid reminder day: {}. Days must be between 1 and 31.", part)),
        }
    }
    if days.is_empty() {
        return Err("At least one reminder day is required.".to_string());
    }
    days.sort_unstable();
    days.dedup();
    Ok(days.iter().map(u32::to_string).collect::<Vec<_>>().join(","))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reminder_days_normalized() {
        assert_eq!(normalize_reminder_days(" 7, 3,7 ,").unwrap(), "3,7");
    }

    #[test]
    fn test_reminder_days_rejected() {
        assert!(normalize_reminder_days("").is_err());
        assert_eq!(
            normalize_reminder_days("3,32").unwrap_err(),
            "Invalid reminder day: 32. Days must be between 1 and 31."
        );
    }
}

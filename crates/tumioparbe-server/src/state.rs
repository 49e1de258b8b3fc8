//! Application state for the TumioParbe server.
//!
//! Holds the pool, configuration and one instance of every service. The
//! router hands each group of routes the service it needs.

use std::sync::Arc;
use std::time::Instant;

use crate::auth::{Authenticator, JwtKeys};
use crate::cache::DbCache;
use crate::clients::{BkashClient, SmsClient};
use crate::config::{AppConfig, BkashConfig, SmsConfig};
use crate::db::DbPool;
use crate::error::AppResult;
use crate::services::{
    AccountService, CouponService, CourseService, EnrollmentService, PaymentService,
    ReportService, SettingsService, SmsService,
};
use crate::tasks::Automation;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: DbPool,

    /// Application configuration
    pub config: Arc<AppConfig>,

    /// Server start time for uptime calculation
    pub start_time: Instant,

    pub auth: Authenticator,
    pub accounts: AccountService,
    pub courses: CourseService,
    pub enrollments: EnrollmentService,
    pub coupons: CouponService,
    pub payments: PaymentService,
    pub sms: SmsService,
    pub reports: ReportService,
    pub settings: SettingsService,
    pub automation: Automation,
}

impl AppState {
    /// Build every service on top of one pool.
    ///
    /// Fails when no signing key is available or a message template does
    /// not parse.
    pub fn new(
        db: DbPool,
        config: AppConfig,
        sms_config: SmsConfig,
        bkash_config: BkashConfig,
    ) -> AppResult<Self> {
        let config = Arc::new(config);
        let keys = Arc::new(JwtKeys::new(
            &config.signing_key()?,
            chrono::Duration::minutes(config.access_token_lifetime_minutes),
            chrono::Duration::days(config.refresh_token_lifetime_days),
        ));

        if !bkash_config.is_configured() {
            tracing::warn!("bKash credentials are incomplete; payments and webhooks will be rejected");
        }

        let cache = DbCache::new(db.clone());
        let bkash = BkashClient::new(bkash_config);
        let sms = SmsService::new(db.clone(), SmsClient::new(sms_config))?;
        let enrollments = EnrollmentService::new(db.clone(), bkash.clone());

        Ok(Self {
            auth: Authenticator::new(db.clone(), keys.clone()),
            accounts: AccountService::new(db.clone(), cache.clone(), sms.clone(), config.clone(), keys),
            courses: CourseService::new(db.clone()),
            coupons: CouponService::new(db.clone()),
            payments: PaymentService::new(db.clone(), bkash, enrollments.clone(), config.clone()),
            reports: ReportService::new(db.clone()),
            settings: SettingsService::new(db.clone()),
            automation: Automation::new(db.clone(), sms.clone(), cache),
            enrollments,
            sms,
            db,
            config,
            start_time: Instant::now(),
        })
    }

    /// Get the server uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

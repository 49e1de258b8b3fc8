//! Service layer for the TumioParbe backend.
//!
//! Services hold the business rules and coordinate between
//! handlers, database queries and the external clients.

pub mod accounts;
pub mod coupons;
pub mod courses;
pub mod enrollments;
pub mod payments;
pub mod reports;
pub mod settings;
pub mod sms;

pub use accounts::AccountService;
pub use coupons::CouponService;
pub use courses::CourseService;
pub use enrollments::EnrollmentService;
pub use payments::PaymentService;
pub use reports::ReportService;
pub use settings::SettingsService;
pub use sms::SmsService;

//! HTTP handlers for the TumioParbe API, organized by domain.

pub mod accounts;
pub mod automation;
pub mod courses;
pub mod enrollments;
pub mod health;
pub mod payments;
pub mod reports;
pub mod sms;

pub use automation::AutomationState;
pub use health::{api_health, health_check};

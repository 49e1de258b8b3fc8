//! TumioParbe LMS backend.
//!
//! This crate provides the HTTP API and background automation for a
//! tuition-center learning management system:
//!
//! - **Accounts**: OTP phone verification, registration, JWT login, students
//! - **Courses**: Courses and their batches, student transfers
//! - **Enrollments**: Fee quotes with coupons, enrollment with or without payment
//! - **Payments**: Monthly invoices paid through bKash, manual invoices, webhooks
//! - **SMS**: OTPs, payment reminders and admin broadcasts with delivery logs
//! - **Automation**: Scheduled invoice generation and payment reminders
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading from environment variables
//! - [`db`]: Database connectivity, schema, models and queries
//! - [`error`]: Custom error types with Axum integration
//! - [`handlers`]: HTTP route handlers
//! - [`routes`]: Router assembly
//! - [`state`]: Shared application state
//!
//! ## Example
//!
//! ```ignore
//! use tumioparbe_server::{
//!     config::{AppConfig, BkashConfig, DatabaseConfig, SmsConfig},
//!     db::create_pool,
//!     routes::build_router,
//!     state::AppState,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let db_pool = create_pool(&DatabaseConfig::from_env()?).await?;
//!     let state = AppState::new(
//!         db_pool,
//!         AppConfig::from_env()?,
//!         SmsConfig::from_env()?,
//!         BkashConfig::from_env()?,
//!     )?;
//!     let app = build_router(state);
//!     // ... bind and serve
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod billing;
pub mod cache;
pub mod clients;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod result_ext;
pub mod routes;
pub mod services;
pub mod state;
pub mod tasks;

pub use error::{AppError, AppResult};
pub use result_ext::ResultExt;

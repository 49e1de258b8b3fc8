//! Database module for the TumioParbe server.
//!
//! This module provides database connectivity, schema management, models,
//! and queries for PostgreSQL using SQLx.

pub mod models;
pub mod pool;
pub mod queries;
pub mod schema;

#[cfg(test)]
pub(crate) mod test_support;

pub use pool::{create_pool, health_check, DbPool};

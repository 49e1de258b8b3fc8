//! Database queries for TumioParbe.
//!
//! This module contains database query functions organized by domain.

pub mod account;
pub mod common;
pub mod course;
pub mod enrollment;
pub mod payment;
pub mod reports;

//! Database models for TumioParbe.
//!
//! This module contains SQLx-compatible model definitions for all database
//! tables, along with the request payloads that write them.

pub mod account;
pub mod common;
pub mod course;
pub mod enrollment;
pub mod payment;

pub use account::*;
pub use common::*;
pub use course::*;
pub use enrollment::*;
pub use payment::*;

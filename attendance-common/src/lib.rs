//! # Attendance Common Library
//!
//! Shared code for the attendance service crates:
//! - Database schema and persisted models
//! - Attendance event types (AttendanceEvent enum) and the EventBus
//! - Bootstrap configuration loading
//! - Timestamp helpers

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};

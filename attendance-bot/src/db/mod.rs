//! Store query functions
//!
//! Every conditional write is a single statement so that concurrent requests
//! are serialised by SQLite rather than by in-process locks.

pub mod attendances;
pub mod lectures;
pub mod settings;
pub mod users;

//! Relational storage: users, roles, documents, and the audit log
//!
//! SQLite sits behind an r2d2 pool; search candidates never touch this layer,
//! only identity lookups, document metadata, and per-search audit records.

mod database;

pub use database::{Database, DbStats};

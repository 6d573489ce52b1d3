//! Subscription store: SQLite pool bootstrap and transactional repositories.
//!
//! Entities live in `crate::model`; this module only holds SQL. Every
//! multi-step write runs in one transaction, and an uncommitted transaction is
//! rolled back when dropped, so an early `?` never leaves a partial write.

pub mod repo;

pub use repo::*;

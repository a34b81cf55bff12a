//! Persistence layer: domain models and the SQL operations behind the
//! upsert pipeline and the change tracker.

pub mod change_log;
pub mod courses;
pub mod models;
pub mod reference;
pub mod semesters;
pub mod upsert;

pub use change_log::ChangeTracker;

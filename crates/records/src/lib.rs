//! Call record and appointment stores for voxline.
//!
//! Both stores implement [`CallRecords`](voxline_core::CallRecords) and
//! [`AppointmentBook`](voxline_core::AppointmentBook), so one value can back
//! the tool dispatcher and the scheduler at once.

pub mod in_memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use in_memory::InMemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

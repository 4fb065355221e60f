//! Call tools for voxline.
//!
//! The model can end the call, save lead details, look up appointment
//! availability, and book an appointment. [`definitions`] describes them
//! to the model; [`ToolDispatcher`] runs them.

pub mod definitions;
pub mod dispatcher;
pub mod scheduling;

pub use definitions::{all_definitions, definition};
pub use dispatcher::ToolDispatcher;
pub use scheduling::{AvailabilityRules, LocalScheduler, Slot};

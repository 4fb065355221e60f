//! # voxline Core
//!
//! Domain types, traits, and error definitions for the voxline voice-call
//! agent. This crate has **zero framework dependencies**: it defines the
//! domain model that all other crates implement against.
//!
//! ## Layout
//!
//! Every collaborator the turn engine talks to is a trait here. Implementations
//! live in their respective crates:
//! - [`Provider`]: streaming model backends (`voxline-providers`)
//! - [`Transport`]: the duplex channel frames are written to (`voxline-gateway`)
//! - [`CallRecords`] / [`AppointmentBook`]: call bookkeeping (`voxline-records`)
//! - [`Scheduler`]: appointment availability and booking (`voxline-tools`)

pub mod error;
pub mod event;
pub mod frame;
pub mod message;
pub mod provider;
pub mod records;
pub mod tool;
pub mod turn;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ProviderError, RecordsError, Result, ToolError, TransportError, TurnError};
pub use event::{DomainEvent, EventBus};
pub use frame::{ResponseFrame, Transport};
pub use message::{Message, MessageHistory, MessageToolCall, Role};
pub use provider::{
    EventStream, GenerationEvent, ModelRoute, Provider, ProviderRequest, ToolCallDelta,
    ToolDefinition,
};
pub use records::{
    Appointment, AppointmentBook, AppointmentStatus, CallCategory, CallRecord, CallRecords,
    CallStatus, LeadDetails, Scheduler,
};
pub use tool::{ToolCall, ToolKind};
pub use turn::{InteractionKind, Speaker, TranscriptEntry, TurnRequest};

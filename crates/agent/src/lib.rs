//! Turn orchestration for a voice call.
//!
//! Each call session owns one [`TurnController`]. A turn goes:
//!
//! 1. **Receive** the caller's new transcript lines
//! 2. **Stream** a reply from the primary model
//! 3. **Demultiplex** the stream into speakable text and at most one tool call
//! 4. **Fall back** to a second model when the primary is not trusted for
//!    plain text
//! 5. **Dispatch** the tool and stream a follow-up
//! 6. **Close** the turn with exactly one terminal frame

pub mod controller;
pub mod demux;
pub mod fallback;
pub mod runtime;

#[cfg(test)]
mod test_helpers;

pub use controller::{TurnController, TurnOutcome, TurnPath, TurnSettings};
pub use demux::{DeltaDemultiplexer, Demuxed};
pub use fallback::ModelFallbackPolicy;
pub use runtime::AgentRuntime;

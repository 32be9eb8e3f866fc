//! Checkpoint Module
//!
//! ## Responsibilities
//! - Enforce barrier ordering for one write task
//! - Buffer emitted committables until their checkpoint completes
//! - Encode and restore the operator state blob

mod protocol;
mod state;

pub use protocol::{BarrierPhase, CheckpointBarrierProtocol};
pub use state::OperatorState;

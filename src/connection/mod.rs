//! Per-connection state and the read/write pumps
//!
//! This module provides:
//! - `ConnectionHandle`: identity, bounded outbound queue, heartbeat and close state
//! - `read_pump` / `write_pump`: the two tasks driving each socket

mod handle;
mod pump;

pub use handle::{CloseReason, ConnectionHandle, ConnectionId, EnqueueOutcome};
pub use pump::{read_pump, write_pump, InboundHandler, CLOSE_HEARTBEAT_TIMEOUT};

//! ring-daemon library: the tokio side of a ring node.
//!
//! Exposed as a library so end-to-end tests can start several nodes in one
//! process.

pub mod config;
pub mod connection;
pub mod control;
pub mod outgoing;
pub mod push;
pub mod runtime;
pub mod server;

pub use config::{Args, NodeSettings, load_ring_config};
pub use connection::{ConnectionEvent, MAX_MESSAGE_SIZE};
pub use control::{ControlReply, ControlRequest, VariableRequest};
pub use outgoing::{OutgoingLink, SuccessorEvent};
pub use push::HttpPusher;
pub use runtime::{RingHandle, RuntimeEvent};
pub use server::{AppState, InboundRegistry};

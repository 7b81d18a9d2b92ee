//! ring-core: protocol engine for a self-healing leader ring.
//!
//! This crate provides:
//! - Node identities with a total, collision-free order
//! - The wire envelope for the nine ring actions
//! - The per-node state machine: Chang–Roberts election, leader health checks,
//!   failure repair, sign-in/sign-out
//! - Leader-coordinated shared-variable propagation with rollback
//!
//! Nothing here opens sockets or sleeps. Handlers return [`Effect`]s and the
//! driver (the daemon, or a test harness) performs them.

pub mod clock;
pub mod config;
pub mod effect;
pub mod envelope;
pub mod identity;
pub mod link;
pub mod node;
pub mod snapshot;
pub mod topology;
pub mod variable;

pub use clock::LamportClock;
pub use config::RingConfig;
pub use effect::{Effect, Timer, TimerKind};
pub use envelope::{Action, Envelope, EnvelopeError};
pub use identity::{NodeId, NodeIdError};
pub use link::{LinkState, PeerLink};
pub use node::{ControlError, Node};
pub use snapshot::NodeSnapshot;
pub use topology::{RingTopology, TopologyError};
pub use variable::{PushError, VariableError, VariablePush, VariableWrite, propagate};

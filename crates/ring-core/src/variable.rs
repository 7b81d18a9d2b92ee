//! Leader-coordinated shared variable.
//!
//! The leader pushes a new value to every slave in registry order. The first
//! rejection aborts the write: every slave is then pushed the previous value
//! (best effort) and the caller gets [`VariableError::PropagationFailed`].
//! Only when all slaves accept does the leader commit the value locally.
//!
//! The push transport sits behind [`VariablePush`] so the daemon can use HTTP
//! and tests can script slave behavior.

use crate::identity::NodeId;
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::{error, info, warn};

/// Why a variable write was refused.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VariableError {
    #[error("I am not leader")]
    NotLeader,
    #[error("Not healthy")]
    NotHealthy,
    #[error("Not from leader")]
    NotFromLeader,
    #[error("Propagation failed")]
    PropagationFailed,
}

impl VariableError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            VariableError::NotLeader => "NOT_LEADER",
            VariableError::NotHealthy => "NOT_HEALTHY",
            VariableError::NotFromLeader => "NOT_FROM_LEADER",
            VariableError::PropagationFailed => "PROPAGATION_FAILED",
        }
    }
}

/// A single push that did not land.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PushError {
    #[error("Slave {slave} rejected the variable: {reason}")]
    Rejected { slave: NodeId, reason: String },
    #[error("Slave {slave} is unreachable: {reason}")]
    Unreachable { slave: NodeId, reason: String },
}

/// Delivers a value to one slave on behalf of the leader.
#[async_trait]
pub trait VariablePush: Send + Sync {
    async fn push(
        &self,
        slave: &NodeId,
        value: Option<&Value>,
        from: &NodeId,
    ) -> Result<(), PushError>;
}

/// A write that passed the leader's preconditions.
///
/// Produced by [`Node::begin_variable_write`](crate::Node::begin_variable_write);
/// the caller runs [`propagate`] and, on success, commits `value` back into
/// the node.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableWrite {
    pub leader: NodeId,
    pub value: Option<Value>,
    pub previous: Option<Value>,
    pub slaves: Vec<NodeId>,
}

/// Push `write.value` to every slave, rolling back on the first failure.
pub async fn propagate<P: VariablePush + ?Sized>(
    pusher: &P,
    write: &VariableWrite,
) -> Result<(), VariableError> {
    for slave in &write.slaves {
        match pusher.push(slave, write.value.as_ref(), &write.leader).await {
            Ok(()) => info!("Propagated variable to {}", slave),
            Err(e) => {
                error!("{}", e);
                warn!("Variable propagation failed. Recovering...");
                rollback(pusher, write).await;
                return Err(VariableError::PropagationFailed);
            }
        }
    }
    Ok(())
}

/// Restore the previous value on every slave, continuing past failures.
async fn rollback<P: VariablePush + ?Sized>(pusher: &P, write: &VariableWrite) {
    for slave in &write.slaves {
        if let Err(e) = pusher.push(slave, write.previous.as_ref(), &write.leader).await {
            error!("Rollback to {} failed: {}", slave, e);
        }
    }
}

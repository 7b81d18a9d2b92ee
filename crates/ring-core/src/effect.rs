//! Side effects requested by the protocol engine.
//!
//! [`Node`](crate::Node) never touches the network or the clock. Every handler
//! returns a list of [`Effect`]s for the driver to carry out in order:
//! dial, send, close, or post a [`Timer`] back after a delay.

use crate::envelope::Envelope;
use crate::identity::NodeId;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Dial `peer` as the successor link of `generation`.
    Connect { peer: NodeId, generation: u64 },
    /// Send over the successor link of `generation`.
    Send {
        to: NodeId,
        generation: u64,
        envelope: Envelope,
    },
    /// Close the successor link of `generation`. No close is reported back.
    CloseSuccessor { generation: u64 },
    /// Close every inbound connection.
    CloseInbound,
    /// Deliver `timer` to [`Node::on_timer`](crate::Node::on_timer) after `after`.
    Schedule { timer: Timer, after: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Leader re-sends its HEALTHY probe.
    HealthCheck,
    /// Watcher sends its ELECTION after the start delay.
    ElectionStart,
    /// Initiator re-sends ELECTION if the round has not closed.
    ElectionRetry,
    /// Next dial attempt to the successor.
    Reconnect,
}

/// One armed timer. Only the most recently armed timer of each kind is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timer {
    pub kind: TimerKind,
    pub seq: u64,
}

/// Per-kind arming counters.
///
/// Arming a kind supersedes any earlier timer of that kind; cancelling simply
/// bumps the counter so the pending one fires as a no-op.
#[derive(Debug, Default)]
pub struct TimerSet {
    current: HashMap<TimerKind, u64>,
}

impl TimerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&mut self, kind: TimerKind, after: Duration) -> Effect {
        let seq = self.bump(kind);
        Effect::Schedule {
            timer: Timer { kind, seq },
            after,
        }
    }

    pub fn cancel(&mut self, kind: TimerKind) {
        self.bump(kind);
    }

    /// Whether `timer` is the latest one armed for its kind.
    pub fn is_current(&self, timer: Timer) -> bool {
        self.current.get(&timer.kind) == Some(&timer.seq)
    }

    fn bump(&mut self, kind: TimerKind) -> u64 {
        let seq = self.current.entry(kind).or_insert(0);
        *seq += 1;
        *seq
    }
}

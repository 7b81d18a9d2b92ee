//! Per-node ring protocol engine.
//!
//! A [`Node`] owns the protocol state of one ring member and nothing else.
//! Each entry point (a parsed message, a closed inbound connection, a link
//! event reported by the driver, a fired timer, an operator request) runs to
//! completion and returns the [`Effect`]s the driver must carry out.
//!
//! # Link events
//!
//! The driver reports what happened to the dial it was asked to make, tagged
//! with the link generation from the [`Effect::Connect`]:
//!
//! - `on_successor_connected` once the WebSocket is open,
//! - `on_successor_error` when the dial fails or a write on a live link fails,
//! - `on_successor_closed` when the peer closes the link.
//!
//! Errors are retried after the reconnect backoff; closes are not. Events for
//! a generation that is no longer current are ignored.

mod election;
mod health;
mod repair;

use crate::clock::LamportClock;
use crate::config::RingConfig;
use crate::effect::{Effect, Timer, TimerKind, TimerSet};
use crate::envelope::{Action, Envelope, HelloPayload, LeavingPayload, TimestampPayload};
use crate::identity::NodeId;
use crate::link::{LinkState, PeerLink};
use crate::snapshot::NodeSnapshot;
use crate::variable::{VariableError, VariableWrite};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Forwarding limit for HEALTHY, REPORT and TIMESTAMP. A message still
/// travelling after this many hops lost its origin and is dropped.
pub const MAX_RING_HOPS: u32 = 1024;

/// Why a sign-in or sign-out request was refused.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ControlError {
    #[error("Already signed-out")]
    AlreadySignedOut,
    #[error("Already signed-in")]
    AlreadySignedIn,
}

impl ControlError {
    pub fn code(&self) -> &'static str {
        match self {
            ControlError::AlreadySignedOut => "ALREADY_SIGNED_OUT",
            ControlError::AlreadySignedIn => "ALREADY_SIGNED_IN",
        }
    }
}

pub struct Node {
    id: NodeId,
    config: RingConfig,
    successor: PeerLink,
    /// Generation handed to the next replacement successor link.
    next_generation: u64,
    timers: TimerSet,
    clock: LamportClock,

    signed_in: bool,
    leader: bool,
    leader_id: Option<NodeId>,
    /// This node's predecessor is the leader; losing it starts an election.
    watching_leader: bool,
    election_participant: bool,
    ring_healthy: bool,
    /// Leader only. HEALTHY came back but the REPORT round has not.
    awaiting_report: bool,
    /// The predecessor announced LEAVING; its next close is not a failure.
    suppress_next_disconnect: bool,
    /// Leader only. Ordered from the leader's successor round to its predecessor.
    slaves: Vec<PeerLink>,
    variable: Option<Value>,
}

impl Node {
    pub fn new(id: NodeId, successor: NodeId, is_leader: bool, config: RingConfig) -> Self {
        let leader_id = is_leader.then(|| id.clone());
        Self {
            id,
            config,
            successor: PeerLink::new(successor, 1),
            next_generation: 2,
            timers: TimerSet::new(),
            clock: LamportClock::new(),
            signed_in: true,
            leader: is_leader,
            leader_id,
            watching_leader: false,
            election_participant: false,
            ring_healthy: false,
            awaiting_report: false,
            suppress_next_disconnect: false,
            slaves: Vec::new(),
            variable: None,
        }
    }

    /// Dial the successor and, when starting as leader, begin health checks.
    pub fn start(&mut self) -> Vec<Effect> {
        let mut fx = Vec::new();
        info!(
            "Starting node {} (successor {}, leader: {})",
            self.id,
            self.successor.id(),
            self.leader
        );
        self.connect_successor(&mut fx);
        if self.leader {
            self.restart_health_check(&mut fx);
        }
        fx
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn successor(&self) -> &PeerLink {
        &self.successor
    }

    pub fn is_signed_in(&self) -> bool {
        self.signed_in
    }

    pub fn is_leader(&self) -> bool {
        self.leader
    }

    pub fn leader_id(&self) -> Option<&NodeId> {
        self.leader_id.as_ref()
    }

    pub fn is_watching_leader(&self) -> bool {
        self.watching_leader
    }

    pub fn is_election_participant(&self) -> bool {
        self.election_participant
    }

    pub fn is_ring_healthy(&self) -> bool {
        self.ring_healthy
    }

    pub fn slaves(&self) -> &[PeerLink] {
        &self.slaves
    }

    pub fn variable(&self) -> Option<&Value> {
        self.variable.as_ref()
    }

    pub fn logical_time(&self) -> u64 {
        self.clock.time()
    }

    // ---- Message dispatch ----

    /// Parse and handle one wire frame. Unreadable frames are logged and dropped.
    pub fn handle_frame(&mut self, data: &[u8]) -> Vec<Effect> {
        match Envelope::parse(data) {
            Ok(envelope) => self.handle_message(envelope),
            Err(e) => {
                warn!("[{}] Dropping unreadable message: {}", self.id, e);
                Vec::new()
            }
        }
    }

    pub fn handle_message(&mut self, envelope: Envelope) -> Vec<Effect> {
        let mut fx = Vec::new();
        let action = envelope.action();
        if !self.signed_in {
            debug!("[{}] Signed out, discarding {}", self.id, action);
            return fx;
        }
        debug!(
            "[{}] Received {} from {}",
            self.id,
            action,
            envelope.from_id()
        );

        match envelope {
            Envelope::Hello(p) => self.on_hello(p, &mut fx),
            Envelope::Healthy(p) => self.on_healthy(p, &mut fx),
            Envelope::Report(p) => self.on_report(p, &mut fx),
            Envelope::Fail(p) => self.on_fail(p, &mut fx),
            Envelope::Election(p) => self.on_election(p, &mut fx),
            Envelope::Elected(p) => self.on_elected(p, &mut fx),
            Envelope::Reconnect(p) => self.on_reconnect(p, &mut fx),
            Envelope::Leaving(_) => self.suppress_next_disconnect = true,
            Envelope::Timestamp(p) => self.on_timestamp(p, &mut fx),
        }

        if action != Action::Timestamp && self.config.logical_clock {
            self.emit_timestamp(&mut fx);
        }
        fx
    }

    fn on_timestamp(&mut self, mut payload: TimestampPayload, fx: &mut Vec<Effect>) {
        let time = self.clock.observe(payload.time_stamp);
        if payload.for_id == self.id {
            debug!("[{}] Timestamp wave complete at {}", self.id, time);
            return;
        }
        payload.time_stamp = time;
        self.forward(Envelope::Timestamp(payload), fx);
    }

    fn emit_timestamp(&mut self, fx: &mut Vec<Effect>) {
        let time_stamp = self.clock.tick();
        let envelope = Envelope::Timestamp(TimestampPayload {
            time_stamp,
            for_id: self.id.clone(),
            from_id: self.id.clone(),
            hops: 0,
        });
        self.send(envelope, fx);
    }

    /// Send to the successor. Without a live link the message is dropped.
    fn send(&mut self, envelope: Envelope, fx: &mut Vec<Effect>) {
        if !self.successor.is_connected() {
            debug!(
                "[{}] No live link to {}, dropping {}",
                self.id,
                self.successor.id(),
                envelope.action()
            );
            return;
        }
        debug!(
            "[{}] Sending {} to {}",
            self.id,
            envelope.action(),
            self.successor.id()
        );
        fx.push(Effect::Send {
            to: self.successor.id().clone(),
            generation: self.successor.generation(),
            envelope,
        });
    }

    /// Pass a message on with this node as the sender.
    fn forward(&mut self, mut envelope: Envelope, fx: &mut Vec<Effect>) {
        let exhausted = envelope.hops_mut().is_some_and(|hops| {
            *hops += 1;
            *hops > MAX_RING_HOPS
        });
        if exhausted {
            warn!(
                "[{}] Dropping {} after {} hops, its origin is gone",
                self.id,
                envelope.action(),
                MAX_RING_HOPS
            );
            return;
        }
        envelope.stamp_sender(&self.id);
        self.send(envelope, fx);
    }

    // ---- Successor link ----

    /// Dial the successor unless a link is live or a dial is already pending.
    fn connect_successor(&mut self, fx: &mut Vec<Effect>) {
        if !self.successor.needs_dial() {
            debug!(
                "[{}] Link to {} already {:?}",
                self.id,
                self.successor.id(),
                self.successor.state()
            );
            return;
        }
        self.successor.set_state(LinkState::Connecting);
        fx.push(Effect::Connect {
            peer: self.successor.id().clone(),
            generation: self.successor.generation(),
        });
    }

    /// Point the successor link at `peer` and dial it.
    fn adopt_successor(&mut self, peer: NodeId, fx: &mut Vec<Effect>) {
        info!("[{}] New successor {}", self.id, peer);
        self.timers.cancel(TimerKind::Reconnect);
        self.successor = PeerLink::new(peer, self.next_generation);
        self.next_generation += 1;
        self.connect_successor(fx);
    }

    /// Tell the successor we are leaving, then close the link.
    fn leave_successor(&mut self, fx: &mut Vec<Effect>) {
        if self.successor.is_connected() {
            let leaving = Envelope::Leaving(LeavingPayload {
                from_id: self.id.clone(),
            });
            self.send(leaving, fx);
            fx.push(Effect::CloseSuccessor {
                generation: self.successor.generation(),
            });
        }
        self.timers.cancel(TimerKind::Reconnect);
        self.successor.set_state(LinkState::Closed);
    }

    pub fn on_successor_connected(&mut self, peer: &NodeId, generation: u64) -> Vec<Effect> {
        let mut fx = Vec::new();
        let current = generation == self.successor.generation()
            && self.successor.state() == LinkState::Connecting
            && self.signed_in;
        if !current {
            // A dial we no longer want; leave cleanly so the peer does not
            // report us as failed.
            debug!("[{}] Discarding stale link to {}", self.id, peer);
            fx.push(Effect::Send {
                to: peer.clone(),
                generation,
                envelope: Envelope::Leaving(LeavingPayload {
                    from_id: self.id.clone(),
                }),
            });
            fx.push(Effect::CloseSuccessor { generation });
            return fx;
        }

        info!("[{}] Connected to successor {}", self.id, peer);
        self.successor.set_state(LinkState::Connected);
        let hello = Envelope::Hello(HelloPayload {
            from_id: self.id.clone(),
            watch_me: self.leader,
            reconnect: self.successor.take_announce_reconnect(),
        });
        self.send(hello, &mut fx);
        fx
    }

    pub fn on_successor_error(&mut self, generation: u64) -> Vec<Effect> {
        let mut fx = Vec::new();
        if generation != self.successor.generation()
            || !matches!(
                self.successor.state(),
                LinkState::Connecting | LinkState::Connected
            )
        {
            return fx;
        }
        warn!(
            "[{}] Error connecting to {}, retrying in {:?}",
            self.id,
            self.successor.id(),
            self.config.reconnect_backoff()
        );
        self.successor.set_state(LinkState::Connecting);
        fx.push(
            self.timers
                .arm(TimerKind::Reconnect, self.config.reconnect_backoff()),
        );
        fx
    }

    pub fn on_successor_closed(&mut self, generation: u64) -> Vec<Effect> {
        if generation == self.successor.generation() && self.successor.is_connected() {
            info!("[{}] Successor {} closed the link", self.id, self.successor.id());
            self.successor.set_state(LinkState::Closed);
        }
        Vec::new()
    }

    // ---- Timers ----

    pub fn on_timer(&mut self, timer: Timer) -> Vec<Effect> {
        let mut fx = Vec::new();
        if !self.timers.is_current(timer) || !self.signed_in {
            return fx;
        }
        match timer.kind {
            TimerKind::HealthCheck => self.restart_health_check(&mut fx),
            TimerKind::ElectionStart => self.send_election(&mut fx),
            TimerKind::ElectionRetry => {
                if self.election_participant {
                    debug!("[{}] Election round still open, re-sending", self.id);
                    self.send_election(&mut fx);
                }
            }
            TimerKind::Reconnect => {
                if self.successor.state() == LinkState::Connecting {
                    fx.push(Effect::Connect {
                        peer: self.successor.id().clone(),
                        generation: self.successor.generation(),
                    });
                }
            }
        }
        fx
    }

    // ---- Shared variable ----

    /// Check the leader's preconditions and capture what to propagate.
    pub fn begin_variable_write(
        &self,
        value: Option<Value>,
    ) -> Result<VariableWrite, VariableError> {
        if !self.leader {
            return Err(VariableError::NotLeader);
        }
        if !self.ring_healthy || self.awaiting_report {
            return Err(VariableError::NotHealthy);
        }
        Ok(VariableWrite {
            leader: self.id.clone(),
            value,
            previous: self.variable.clone(),
            slaves: self.slaves.iter().map(|s| s.id().clone()).collect(),
        })
    }

    /// Store a value that every slave accepted.
    pub fn commit_variable(&mut self, value: Option<Value>) {
        info!("[{}] Variable set to {:?}", self.id, value);
        self.variable = value;
    }

    /// Slave side of a push: only the known leader may write.
    pub fn accept_pushed_variable(
        &mut self,
        value: Option<Value>,
        from: &NodeId,
    ) -> Result<(), VariableError> {
        if self.leader_id.as_ref() != Some(from) {
            warn!("[{}] Rejecting variable from non-leader {}", self.id, from);
            return Err(VariableError::NotFromLeader);
        }
        debug!("[{}] Variable pushed by leader {}", self.id, from);
        self.variable = value;
        Ok(())
    }

    pub fn snapshot(&self) -> NodeSnapshot {
        NodeSnapshot {
            node: self.id.clone(),
            successor: self.successor.to_string(),
            successor_state: self.successor.state(),
            signed_in: self.signed_in,
            leader: self.leader,
            leader_id: self.leader_id.clone(),
            watching_leader: self.watching_leader,
            election_participant: self.election_participant,
            variable: self.variable.clone(),
            logical_clock: self.clock.time(),
            ring_healthy: self.leader.then_some(self.ring_healthy),
            slaves: self
                .leader
                .then(|| self.slaves.iter().map(|s| s.id().to_string()).collect()),
        }
    }
}

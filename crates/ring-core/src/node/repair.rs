//! Failure detection, ring repair, and sign-in/sign-out.
//!
//! A node notices a failure when its inbound link closes without a LEAVING
//! notice. It sends FAIL naming itself as the origin; the node whose
//! successor link is down adopts the origin as its new successor, closing the
//! gap. A returning node announces itself with a reconnecting HELLO, and the
//! resulting RECONNECT makes its old predecessor point at it again.

use super::{ControlError, Node};
use crate::effect::{Effect, TimerKind};
use crate::envelope::{Envelope, FailPayload, HelloPayload, ReconnectPayload};
use crate::link::LinkState;
use tracing::{debug, info, warn};

impl Node {
    pub(super) fn on_hello(&mut self, payload: HelloPayload, fx: &mut Vec<Effect>) {
        if payload.reconnect && self.leader {
            self.set_health_corrupted(fx);
        } else if self.leader {
            self.restart_health_check(fx);
        }

        if payload.watch_me {
            info!("[{}] Watching leader {}", self.id, payload.from_id);
            self.watching_leader = true;
        }

        if payload.reconnect {
            info!("[{}] {} is back, announcing it", self.id, payload.from_id);
            let reconnect = Envelope::Reconnect(ReconnectPayload {
                from_id: self.id.clone(),
                origin_node_id: self.id.clone(),
                reconnected_node: payload.from_id,
            });
            self.send(reconnect, fx);
        }
    }

    pub(super) fn on_fail(&mut self, payload: FailPayload, fx: &mut Vec<Effect>) {
        if self.leader {
            self.set_health_corrupted(fx);
        }
        if payload.origin_node == self.id {
            debug!("[{}] FAIL came full circle, dropping", self.id);
            return;
        }

        if payload.reconnect && self.successor.is_connected() {
            self.leave_successor(fx);
        }
        if self.successor.is_connected() {
            self.forward(Envelope::Fail(payload), fx);
        } else {
            self.adopt_successor(payload.origin_node, fx);
        }
    }

    pub(super) fn on_reconnect(&mut self, payload: ReconnectPayload, fx: &mut Vec<Effect>) {
        if self.leader {
            self.set_health_corrupted(fx);
        }
        if payload.origin_node_id == self.id {
            debug!("[{}] RECONNECT came full circle, dropping", self.id);
            return;
        }

        if &payload.origin_node_id == self.successor.id() {
            self.leave_successor(fx);
            self.adopt_successor(payload.reconnected_node, fx);
        } else {
            self.forward(Envelope::Reconnect(payload), fx);
        }
    }

    /// The predecessor's link to us closed.
    pub fn on_inbound_closed(&mut self) -> Vec<Effect> {
        let mut fx = Vec::new();
        if !self.signed_in {
            return fx;
        }
        if self.suppress_next_disconnect {
            self.suppress_next_disconnect = false;
            info!("[{}] Predecessor left", self.id);
            return fx;
        }

        warn!("[{}] Lost connection from predecessor", self.id);
        if self.leader {
            self.set_health_corrupted(&mut fx);
        }
        let fail = Envelope::Fail(FailPayload {
            from_id: self.id.clone(),
            origin_node: self.id.clone(),
            reconnect: false,
        });
        self.send(fail, &mut fx);

        if self.watching_leader {
            self.schedule_election(&mut fx);
        }
        fx
    }

    /// Drop out of the ring: close every link and forget leadership.
    ///
    /// No LEAVING is sent, so the successor reports the gap and the ring
    /// closes around this node.
    pub fn sign_out(&mut self) -> Result<Vec<Effect>, ControlError> {
        if !self.signed_in {
            return Err(ControlError::AlreadySignedOut);
        }
        info!("[{}] Signing out", self.id);

        self.signed_in = false;
        self.leader = false;
        self.leader_id = None;
        self.watching_leader = false;
        self.election_participant = false;
        self.ring_healthy = false;
        self.awaiting_report = false;
        self.suppress_next_disconnect = false;
        self.slaves.clear();
        for kind in [
            TimerKind::HealthCheck,
            TimerKind::ElectionStart,
            TimerKind::ElectionRetry,
            TimerKind::Reconnect,
        ] {
            self.timers.cancel(kind);
        }

        let mut fx = vec![Effect::CloseInbound];
        if self.successor.is_connected() {
            fx.push(Effect::CloseSuccessor {
                generation: self.successor.generation(),
            });
        }
        self.successor.set_state(LinkState::Closed);
        Ok(fx)
    }

    /// Rejoin through the old successor, announcing the return.
    pub fn sign_in(&mut self) -> Result<Vec<Effect>, ControlError> {
        if self.signed_in {
            return Err(ControlError::AlreadySignedIn);
        }
        info!("[{}] Signing in via {}", self.id, self.successor.id());

        self.signed_in = true;
        self.successor.set_announce_reconnect(true);
        let mut fx = Vec::new();
        self.connect_successor(&mut fx);
        Ok(fx)
    }
}

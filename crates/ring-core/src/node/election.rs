//! Chang–Roberts leader election.
//!
//! An ELECTION message carries the best candidate seen so far. Each node
//! forwards a better candidate, replaces a worse one with itself (once per
//! round), and recognizes its own id coming back as having won. The winner
//! then sends ELECTED around the ring so everyone learns the new leader.

use super::Node;
use crate::effect::{Effect, TimerKind};
use crate::envelope::{ElectedPayload, ElectionPayload, Envelope};
use rand::Rng;
use std::cmp::Ordering;
use std::time::Duration;
use tracing::{debug, info, warn};

impl Node {
    /// Start an election round now, as the initiator.
    pub fn start_election(&mut self) -> Vec<Effect> {
        let mut fx = Vec::new();
        if self.signed_in {
            self.send_election(&mut fx);
        }
        fx
    }

    /// Start an election after a random delay, so watchers that notice the
    /// same failure rarely start rounds at once.
    pub(super) fn schedule_election(&mut self, fx: &mut Vec<Effect>) {
        let delay = rand::rng().random_range(self.config.election_delay_range());
        info!(
            "[{}] LEADER ELECTION STARTED, sending in {}ms",
            self.id, delay
        );
        fx.push(
            self.timers
                .arm(TimerKind::ElectionStart, Duration::from_millis(delay)),
        );
    }

    pub(super) fn send_election(&mut self, fx: &mut Vec<Effect>) {
        self.election_participant = true;
        let election = Envelope::Election(ElectionPayload {
            to_be_elected_id: self.id.clone(),
            from_id: self.id.clone(),
        });
        self.send(election, fx);
        fx.push(
            self.timers
                .arm(TimerKind::ElectionRetry, self.config.election_retry()),
        );
    }

    pub(super) fn on_election(&mut self, mut payload: ElectionPayload, fx: &mut Vec<Effect>) {
        match payload.to_be_elected_id.cmp(&self.id) {
            Ordering::Greater => self.forward(Envelope::Election(payload), fx),
            Ordering::Less if !self.election_participant => {
                self.election_participant = true;
                payload.to_be_elected_id = self.id.clone();
                self.forward(Envelope::Election(payload), fx);
            }
            Ordering::Less => {
                debug!(
                    "[{}] Already participating, dropping candidate {}",
                    self.id, payload.to_be_elected_id
                );
            }
            Ordering::Equal => self.become_leader(fx),
        }
    }

    fn become_leader(&mut self, fx: &mut Vec<Effect>) {
        info!("[{}] I WAS ELECTED AS LEADER", self.id);
        self.leader = true;
        self.leader_id = Some(self.id.clone());
        self.election_participant = false;
        self.watching_leader = false;
        self.timers.cancel(TimerKind::ElectionStart);
        self.timers.cancel(TimerKind::ElectionRetry);

        let elected = Envelope::Elected(ElectedPayload {
            new_leader_id: self.id.clone(),
            watch_me: true,
            from_id: self.id.clone(),
        });
        self.send(elected, fx);
        self.set_health_corrupted(fx);
    }

    pub(super) fn on_elected(&mut self, mut payload: ElectedPayload, fx: &mut Vec<Effect>) {
        if payload.new_leader_id == self.id {
            debug!("[{}] ELECTED went full circle", self.id);
            return;
        }

        // Only the leader's successor sees watchMe set; it clears the flag
        // for everyone downstream.
        self.watching_leader = payload.watch_me;
        if payload.watch_me {
            info!("[{}] Watching leader {}", self.id, payload.new_leader_id);
        }
        payload.watch_me = false;

        self.election_participant = false;
        self.timers.cancel(TimerKind::ElectionStart);
        self.timers.cancel(TimerKind::ElectionRetry);
        if self.leader {
            warn!(
                "[{}] Stepping down in favor of {}",
                self.id, payload.new_leader_id
            );
            self.leader = false;
            self.ring_healthy = false;
            self.awaiting_report = false;
            self.slaves.clear();
            self.timers.cancel(TimerKind::HealthCheck);
        }
        info!("[{}] New leader is {}", self.id, payload.new_leader_id);
        self.leader_id = Some(payload.new_leader_id.clone());
        self.forward(Envelope::Elected(payload), fx);
    }
}

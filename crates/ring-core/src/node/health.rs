//! Leader health-check cycle.
//!
//! The leader sends HEALTHY round the ring. When it comes back the ring is
//! whole; the leader then sends REPORT round to collect the slave list.
//! Until that REPORT is back the leader refuses variable writes. If either
//! round has not come back when the health timer fires, the probe is sent
//! again.

use super::Node;
use crate::effect::{Effect, TimerKind};
use crate::envelope::{Envelope, HealthyPayload, ReportPayload};
use crate::identity::NodeId;
use crate::link::PeerLink;
use tracing::{debug, info, warn};

impl Node {
    /// Send a probe and re-arm the health timer. Leader only, and only while
    /// the slave list is not settled.
    pub(super) fn restart_health_check(&mut self, fx: &mut Vec<Effect>) {
        if !self.leader || (self.ring_healthy && !self.awaiting_report) {
            return;
        }
        let check = Envelope::Healthy(HealthyPayload {
            for_id: self.id.clone(),
            from_id: self.id.clone(),
            hops: 0,
        });
        self.send(check, fx);
        fx.push(
            self.timers
                .arm(TimerKind::HealthCheck, self.config.health_check_timeout()),
        );
    }

    /// Forget the slave list and start probing again.
    pub(super) fn set_health_corrupted(&mut self, fx: &mut Vec<Effect>) {
        if self.ring_healthy {
            warn!("[{}] HEALTH OF RING IS CORRUPTED", self.id);
        }
        self.ring_healthy = false;
        self.awaiting_report = false;
        self.slaves.clear();
        self.restart_health_check(fx);
    }

    /// A round started by someone other than the leader we know of. Its
    /// origin has been replaced, so relaying it would only keep it alive.
    fn is_orphaned_round(&self, for_id: &NodeId) -> bool {
        for_id != &self.id && self.leader_id.as_ref().is_some_and(|known| known != for_id)
    }

    pub(super) fn on_healthy(&mut self, payload: HealthyPayload, fx: &mut Vec<Effect>) {
        if self.is_orphaned_round(&payload.for_id) {
            debug!("[{}] Dropping health check for former leader {}", self.id, payload.for_id);
            return;
        }
        if payload.for_id != self.id {
            self.forward(Envelope::Healthy(payload), fx);
            return;
        }
        if !self.leader {
            debug!("[{}] Probe came back after stepping down", self.id);
            return;
        }

        if self.ring_healthy && !self.awaiting_report {
            debug!("[{}] Duplicate HEALTHY, slave list already settled", self.id);
            return;
        }

        info!("[{}] RING IS HEALTHY", self.id);
        self.ring_healthy = true;
        self.awaiting_report = true;
        let report = Envelope::Report(ReportPayload {
            from_id: self.id.clone(),
            for_id: self.id.clone(),
            leader_id: Some(self.id.clone()),
            slaves: Vec::new(),
            hops: 0,
        });
        self.send(report, fx);
    }

    pub(super) fn on_report(&mut self, mut payload: ReportPayload, fx: &mut Vec<Effect>) {
        if self.is_orphaned_round(&payload.for_id) {
            debug!("[{}] Dropping REPORT for former leader {}", self.id, payload.for_id);
            return;
        }
        if let Some(leader_id) = &payload.leader_id {
            self.leader_id = Some(leader_id.clone());
        }

        if payload.for_id != self.id {
            payload.slaves.push(self.id.clone());
            self.forward(Envelope::Report(payload), fx);
            return;
        }
        if !self.leader || !self.awaiting_report {
            debug!("[{}] Ignoring REPORT from an earlier round", self.id);
            return;
        }

        self.awaiting_report = false;
        self.timers.cancel(TimerKind::HealthCheck);
        self.slaves = payload
            .slaves
            .into_iter()
            .map(|id| PeerLink::new(id, 0))
            .collect();
        info!(
            "[{}] EVERYONE REPORTED: {} slave(s)",
            self.id,
            self.slaves.len()
        );
    }
}

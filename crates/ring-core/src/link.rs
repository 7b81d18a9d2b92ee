//! Directed link to one neighbor.
//!
//! The engine never holds sockets. A [`PeerLink`] records which peer the link
//! points at and what the driver last reported about the connection; the
//! driver keeps the actual handle, keyed by the link's generation.

use crate::identity::NodeId;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// Connection state of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LinkState {
    /// Never dialed.
    Idle,
    /// Dial in flight, or waiting out the backoff before the next attempt.
    Connecting,
    /// Live and usable for sends.
    Connected,
    /// Was connected, then closed. Not retried until something asks for it.
    Closed,
}

/// Link to a neighbor plus its connection state.
#[derive(Debug, Clone)]
pub struct PeerLink {
    id: NodeId,
    state: LinkState,
    generation: u64,
    /// Announce `reconnect` in the HELLO of the next successful dial.
    announce_reconnect: bool,
}

impl PeerLink {
    pub fn new(id: NodeId, generation: u64) -> Self {
        Self {
            id,
            state: LinkState::Idle,
            generation,
            announce_reconnect: false,
        }
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Distinguishes this link from earlier links, even to the same peer.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_connected(&self) -> bool {
        self.state == LinkState::Connected
    }

    /// A dial is needed before anything can be sent.
    pub fn needs_dial(&self) -> bool {
        matches!(self.state, LinkState::Idle | LinkState::Closed)
    }

    pub(crate) fn set_state(&mut self, state: LinkState) {
        self.state = state;
    }

    pub(crate) fn set_announce_reconnect(&mut self, reconnect: bool) {
        self.announce_reconnect = reconnect;
    }

    pub(crate) fn take_announce_reconnect(&mut self) -> bool {
        std::mem::take(&mut self.announce_reconnect)
    }
}

impl Display for PeerLink {
    /// `"10.0.0.2:3000 CONNECTED"` style, as shown on the status page.
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let state = if self.is_connected() {
            "CONNECTED"
        } else {
            "DISCONNECTED"
        };
        write!(f, "{} {}", self.id, state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_link_is_idle() {
        let link = PeerLink::new(NodeId::new("127.0.0.1", 3000), 7);
        assert_eq!(link.state(), LinkState::Idle);
        assert_eq!(link.generation(), 7);
        assert!(link.needs_dial());
        assert!(!link.is_connected());
    }

    #[test]
    fn test_needs_dial_by_state() {
        let mut link = PeerLink::new(NodeId::new("127.0.0.1", 3000), 0);

        link.set_state(LinkState::Connecting);
        assert!(!link.needs_dial());

        link.set_state(LinkState::Connected);
        assert!(!link.needs_dial());
        assert!(link.is_connected());

        link.set_state(LinkState::Closed);
        assert!(link.needs_dial());
    }

    #[test]
    fn test_reconnect_announcement_is_consumed_once() {
        let mut link = PeerLink::new(NodeId::new("127.0.0.1", 3000), 0);
        link.set_announce_reconnect(true);
        assert!(link.take_announce_reconnect());
        assert!(!link.take_announce_reconnect());
    }

    #[test]
    fn test_display() {
        let mut link = PeerLink::new(NodeId::new("10.0.0.2", 3000), 0);
        assert_eq!(link.to_string(), "10.0.0.2:3000 DISCONNECTED");
        link.set_state(LinkState::Connected);
        assert_eq!(link.to_string(), "10.0.0.2:3000 CONNECTED");
    }
}

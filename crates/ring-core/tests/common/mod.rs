//! Deterministic in-memory ring for driving several `Node`s together.
//!
//! Links are entries in a map keyed by `(dialer, generation)`. Frames travel
//! through a single FIFO queue and are encoded to JSON and parsed back on the
//! way. Timers fire in virtual time, so a run is fully reproducible.

#![allow(dead_code)]

use ring_core::{Action, Effect, Envelope, Node, NodeId, RingConfig, RingTopology, Timer};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::time::Duration;

const MAX_STEPS: usize = 500_000;

pub fn id(port: u16) -> NodeId {
    NodeId::new("127.0.0.1", port)
}

/// Short timings with a fixed election delay.
pub fn fast_config() -> RingConfig {
    RingConfig {
        reconnect_backoff_ms: 100,
        health_check_timeout_ms: 200,
        election_retry_ms: 500,
        election_delay_min_ms: 50,
        election_delay_max_ms: 50,
        push_timeout_ms: 1000,
        logical_clock: false,
    }
}

enum Event {
    Dial { peer: NodeId, generation: u64 },
    Deliver { frame: String },
    InboundClosed,
    SuccessorClosed { generation: u64 },
}

struct PendingTimer {
    at: Duration,
    order: u64,
    node: NodeId,
    timer: Timer,
}

pub struct Sim {
    pub nodes: BTreeMap<NodeId, Node>,
    alive: BTreeSet<NodeId>,
    links: BTreeMap<(NodeId, u64), NodeId>,
    events: VecDeque<(NodeId, Event)>,
    timers: Vec<PendingTimer>,
    next_order: u64,
    now: Duration,
    steps: usize,
    /// Every frame a live node received, in order.
    pub delivered: Vec<(NodeId, Action)>,
}

impl Sim {
    /// Lay out a ring in the given order. `leader` starts as leader.
    pub fn ring(ports: &[u16], leader: Option<u16>, config: RingConfig) -> Self {
        let topology =
            RingTopology::new(ports.iter().map(|&p| id(p)).collect()).expect("valid ring");
        let nodes = topology
            .assignments()
            .map(|(node, successor)| {
                let is_leader = leader == Some(node.port());
                (
                    node.clone(),
                    Node::new(node.clone(), successor.clone(), is_leader, config.clone()),
                )
            })
            .collect();

        Self {
            nodes,
            alive: BTreeSet::new(),
            links: BTreeMap::new(),
            events: VecDeque::new(),
            timers: Vec::new(),
            next_order: 0,
            now: Duration::ZERO,
            steps: 0,
            delivered: Vec::new(),
        }
    }

    /// Bring every node up at once, then settle.
    pub fn start_all(&mut self) {
        let ids: Vec<_> = self.nodes.keys().cloned().collect();
        self.alive.extend(ids.iter().cloned());
        for node in ids {
            let fx = self.node_mut(&node).start();
            self.apply(&node, fx);
        }
        self.drain();
    }

    pub fn start(&mut self, port: u16) {
        let node = id(port);
        self.alive.insert(node.clone());
        let fx = self.node_mut(&node).start();
        self.apply(&node, fx);
        self.drain();
    }

    pub fn node(&self, port: u16) -> &Node {
        &self.nodes[&id(port)]
    }

    fn node_mut(&mut self, node: &NodeId) -> &mut Node {
        self.nodes.get_mut(node).expect("node is part of the ring")
    }

    /// Kill a node without warning. Its links drop from both ends.
    pub fn crash(&mut self, port: u16) {
        let dead = id(port);
        self.alive.remove(&dead);
        let keys: Vec<_> = self.links.keys().cloned().collect();
        for key in keys {
            let (from, generation) = key.clone();
            let to = self.links[&key].clone();
            if from == dead {
                self.links.remove(&key);
                self.events.push_back((to, Event::InboundClosed));
            } else if to == dead {
                self.links.remove(&key);
                self.events
                    .push_back((from, Event::SuccessorClosed { generation }));
            }
        }
        self.drain();
    }

    pub fn sign_out(&mut self, port: u16) {
        let node = id(port);
        let fx = self.node_mut(&node).sign_out().expect("was signed in");
        self.apply(&node, fx);
        self.drain();
    }

    pub fn sign_in(&mut self, port: u16) {
        let node = id(port);
        let fx = self.node_mut(&node).sign_in().expect("was signed out");
        self.apply(&node, fx);
        self.drain();
    }

    pub fn start_election(&mut self, port: u16) {
        let node = id(port);
        let fx = self.node_mut(&node).start_election();
        self.apply(&node, fx);
        self.drain();
    }

    /// Advance virtual time, firing due timers in order.
    pub fn run_for(&mut self, duration: Duration) {
        let deadline = self.now + duration;
        self.drain();
        while let Some(index) = self.next_due(deadline) {
            let pending = self.timers.remove(index);
            self.now = pending.at;
            if self.alive.contains(&pending.node) {
                let fx = self.node_mut(&pending.node).on_timer(pending.timer);
                self.apply(&pending.node, fx);
            }
            self.drain();
        }
        self.now = deadline;
    }

    /// Hand `envelope` to a node as if its predecessor had sent it.
    pub fn deliver(&mut self, port: u16, envelope: Envelope) {
        let frame = envelope.to_text();
        self.events.push_back((id(port), Event::Deliver { frame }));
        self.drain();
    }

    pub fn hellos_received(&self, port: u16) -> usize {
        let node = id(port);
        self.delivered
            .iter()
            .filter(|(to, action)| *to == node && *action == Action::Hello)
            .count()
    }

    fn next_due(&self, deadline: Duration) -> Option<usize> {
        self.timers
            .iter()
            .enumerate()
            .filter(|(_, t)| t.at <= deadline)
            .min_by_key(|(_, t)| (t.at, t.order))
            .map(|(index, _)| index)
    }

    fn apply(&mut self, from: &NodeId, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Connect { peer, generation } => {
                    self.events
                        .push_back((from.clone(), Event::Dial { peer, generation }));
                }
                Effect::Send {
                    generation,
                    envelope,
                    ..
                } => {
                    if let Some(to) = self.links.get(&(from.clone(), generation)) {
                        let frame = envelope.to_text();
                        self.events.push_back((to.clone(), Event::Deliver { frame }));
                    }
                }
                Effect::CloseSuccessor { generation } => {
                    if let Some(to) = self.links.remove(&(from.clone(), generation)) {
                        self.events.push_back((to, Event::InboundClosed));
                    }
                }
                Effect::CloseInbound => {
                    let incoming: Vec<_> = self
                        .links
                        .iter()
                        .filter(|(_, to)| *to == from)
                        .map(|(key, _)| key.clone())
                        .collect();
                    for key in incoming {
                        self.links.remove(&key);
                        let (dialer, generation) = key;
                        self.events
                            .push_back((dialer, Event::SuccessorClosed { generation }));
                    }
                }
                Effect::Schedule { timer, after } => {
                    self.timers.push(PendingTimer {
                        at: self.now + after,
                        order: self.next_order,
                        node: from.clone(),
                        timer,
                    });
                    self.next_order += 1;
                }
            }
        }
    }

    fn drain(&mut self) {
        while let Some((target, event)) = self.events.pop_front() {
            self.steps += 1;
            assert!(self.steps < MAX_STEPS, "ring never went quiet");
            if !self.alive.contains(&target) {
                continue;
            }

            let node = self.nodes.get_mut(&target).expect("node is part of the ring");
            let fx = match event {
                Event::Dial { peer, generation } => {
                    if self.alive.contains(&peer) {
                        self.links.insert((target.clone(), generation), peer.clone());
                        node.on_successor_connected(&peer, generation)
                    } else {
                        node.on_successor_error(generation)
                    }
                }
                Event::Deliver { frame } => {
                    if let Some(envelope) = Envelope::from_json(frame.as_bytes()) {
                        self.delivered.push((target.clone(), envelope.action()));
                    }
                    node.handle_frame(frame.as_bytes())
                }
                Event::InboundClosed => node.on_inbound_closed(),
                Event::SuccessorClosed { generation } => node.on_successor_closed(generation),
            };
            self.apply(&target, fx);
        }
    }
}

//! The node's event loop.
//!
//! One task owns the [`Node`]. Inbound connections, outgoing dials, timers,
//! control requests and finished variable propagations all post
//! [`RuntimeEvent`]s to it, and it carries out whatever [`Effect`]s the node
//! returns. No locks are held anywhere; every handler runs to completion
//! before the next event is looked at.

use crate::config::NodeSettings;
use crate::connection::ConnectionEvent;
use crate::control::ControlRequest;
use crate::outgoing::{self, OutgoingLink, SuccessorEvent};
use crate::push::HttpPusher;
use crate::server::{AppState, InboundRegistry, router};
use anyhow::{Context, Result};
use ring_core::{Effect, Node, NodeSnapshot, Timer, VariableError, VariablePush, VariableWrite};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How long [`RingHandle::shutdown`] waits for the HTTP server to drain.
const SERVER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything the runtime task reacts to.
#[derive(Debug)]
pub enum RuntimeEvent {
    Connection(ConnectionEvent),
    Successor(SuccessorEvent),
    Timer(Timer),
    Control(ControlRequest),
    /// A variable write finished propagating to the slaves
    Propagated {
        write: VariableWrite,
        result: Result<(), VariableError>,
    },
    /// Close every link and stop. The sender is fired once done.
    Shutdown(oneshot::Sender<()>),
}

type VariableReply = oneshot::Sender<Result<(), VariableError>>;

struct PendingWrite {
    value: Option<Value>,
    reply: VariableReply,
}

struct Runtime {
    node: Node,
    events: mpsc::UnboundedSender<RuntimeEvent>,
    inbound: InboundRegistry,
    /// Live successor links by generation
    links: HashMap<u64, OutgoingLink>,
    /// Dials in flight: dial id to link generation
    dials: HashMap<u64, u64>,
    next_dial: u64,
    pusher: Arc<dyn VariablePush>,
    /// Writes wait here while another one is propagating
    queued_writes: VecDeque<PendingWrite>,
    in_flight: Option<VariableReply>,
}

impl Runtime {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<RuntimeEvent>) {
        info!("Ring node {} starting", self.node.id());
        let fx = self.node.start();
        self.apply(fx);

        while let Some(event) = rx.recv().await {
            match event {
                RuntimeEvent::Connection(event) => self.on_connection(event),
                RuntimeEvent::Successor(event) => self.on_successor(event),
                RuntimeEvent::Timer(timer) => {
                    let fx = self.node.on_timer(timer);
                    self.apply(fx);
                }
                RuntimeEvent::Control(request) => self.on_control(request),
                RuntimeEvent::Propagated { write, result } => self.on_propagated(write, result),
                RuntimeEvent::Shutdown(done) => {
                    self.close_everything();
                    let _ = done.send(());
                    break;
                }
            }
        }
        info!("Ring node {} stopped", self.node.id());
    }

    fn on_connection(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Opened { conn_id, close } => {
                debug!("Inbound connection {} opened", conn_id);
                self.inbound.insert(conn_id, close);
            }
            ConnectionEvent::Message { conn_id, data } => {
                debug!("Frame on connection {} ({} bytes)", conn_id, data.len());
                let fx = self.node.handle_frame(&data);
                self.apply(fx);
            }
            ConnectionEvent::Closed { conn_id } => {
                // Connections we closed ourselves were already forgotten.
                if self.inbound.remove(conn_id) {
                    info!("Inbound connection {} closed", conn_id);
                    let fx = self.node.on_inbound_closed();
                    self.apply(fx);
                }
            }
        }
    }

    fn on_successor(&mut self, event: SuccessorEvent) {
        match event {
            SuccessorEvent::Connected { dial, link } => {
                let Some(generation) = self.dials.remove(&dial) else {
                    debug!("Dropping link from abandoned dial {}", dial);
                    link.close();
                    return;
                };
                let peer = link.peer().clone();
                if let Some(old) = self.links.insert(generation, link) {
                    old.close();
                }
                let fx = self.node.on_successor_connected(&peer, generation);
                self.apply(fx);
            }
            SuccessorEvent::Failed { dial, error } => {
                let generation = match self.dials.remove(&dial) {
                    Some(generation) => generation,
                    None => match self.take_link_by_dial(dial) {
                        Some(generation) => generation,
                        None => return,
                    },
                };
                debug!("Successor link (generation {}) failed: {}", generation, error);
                let fx = self.node.on_successor_error(generation);
                self.apply(fx);
            }
            SuccessorEvent::Closed { dial } => {
                if let Some(generation) = self.take_link_by_dial(dial) {
                    let fx = self.node.on_successor_closed(generation);
                    self.apply(fx);
                }
            }
        }
    }

    /// Forget the live link opened by `dial`, returning its generation.
    fn take_link_by_dial(&mut self, dial: u64) -> Option<u64> {
        let generation = self
            .links
            .iter()
            .find(|(_, link)| link.dial() == dial)
            .map(|(generation, _)| *generation)?;
        self.links.remove(&generation);
        Some(generation)
    }

    fn on_control(&mut self, request: ControlRequest) {
        match request {
            ControlRequest::Snapshot(reply) => {
                let _ = reply.send(self.node.snapshot());
            }
            ControlRequest::GetVariable(reply) => {
                let _ = reply.send(self.node.variable().cloned());
            }
            ControlRequest::SetVariable {
                value,
                from: Some(from),
                reply,
            } => {
                let _ = reply.send(self.node.accept_pushed_variable(value, &from));
            }
            ControlRequest::SetVariable {
                value,
                from: None,
                reply,
            } => {
                self.queued_writes.push_back(PendingWrite { value, reply });
                self.start_next_write();
            }
            ControlRequest::SignOut(reply) => {
                let result = self.node.sign_out().map(|fx| self.apply(fx));
                let _ = reply.send(result);
            }
            ControlRequest::SignIn(reply) => {
                let result = self.node.sign_in().map(|fx| self.apply(fx));
                let _ = reply.send(result);
            }
            ControlRequest::StartElection(reply) => {
                let fx = self.node.start_election();
                self.apply(fx);
                let _ = reply.send(());
            }
        }
    }

    /// Start propagating the oldest queued write, unless one is running.
    fn start_next_write(&mut self) {
        while self.in_flight.is_none() {
            let Some(pending) = self.queued_writes.pop_front() else {
                return;
            };
            let write = match self.node.begin_variable_write(pending.value) {
                Ok(write) => write,
                Err(e) => {
                    debug!("Variable write refused: {}", e);
                    let _ = pending.reply.send(Err(e));
                    continue;
                }
            };

            info!("Propagating variable to {} slave(s)", write.slaves.len());
            self.in_flight = Some(pending.reply);
            let pusher = self.pusher.clone();
            let events = self.events.clone();
            tokio::spawn(async move {
                let result = ring_core::propagate(&*pusher, &write).await;
                let _ = events.send(RuntimeEvent::Propagated { write, result });
            });
        }
    }

    fn on_propagated(&mut self, write: VariableWrite, result: Result<(), VariableError>) {
        if result.is_ok() {
            self.node.commit_variable(write.value);
        }
        if let Some(reply) = self.in_flight.take() {
            let _ = reply.send(result);
        }
        self.start_next_write();
    }

    fn apply(&mut self, fx: Vec<Effect>) {
        for effect in fx {
            match effect {
                Effect::Connect { peer, generation } => {
                    let dial = self.next_dial;
                    self.next_dial += 1;
                    self.dials.insert(dial, generation);
                    outgoing::dial(peer, dial, self.events.clone());
                }
                Effect::Send {
                    to,
                    generation,
                    envelope,
                } => match self.links.get(&generation) {
                    Some(link) if link.send(envelope.to_text()) => {
                        debug!("Sent {} to {}", envelope.action(), to);
                    }
                    _ => warn!("No live link to {} for {}, dropping", to, envelope.action()),
                },
                Effect::CloseSuccessor { generation } => {
                    if let Some(link) = self.links.remove(&generation) {
                        link.close();
                    }
                }
                Effect::CloseInbound => {
                    debug!("Closing {} inbound connection(s)", self.inbound.len());
                    self.inbound.close_all();
                }
                Effect::Schedule { timer, after } => {
                    let events = self.events.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(after).await;
                        let _ = events.send(RuntimeEvent::Timer(timer));
                    });
                }
            }
        }
    }

    fn close_everything(&mut self) {
        self.inbound.close_all();
        for (_, link) in self.links.drain() {
            link.close();
        }
        self.dials.clear();
        // Queued writers see the runtime as stopped.
        self.queued_writes.clear();
        self.in_flight = None;
    }
}

/// A running ring node: its runtime task plus the HTTP server in front of it.
pub struct RingHandle {
    local_addr: SocketAddr,
    events: mpsc::UnboundedSender<RuntimeEvent>,
    runtime: JoinHandle<()>,
    server: JoinHandle<std::io::Result<()>>,
    stop_server: Option<oneshot::Sender<()>>,
}

impl RingHandle {
    /// Start a node on an already bound listener.
    pub fn spawn(listener: TcpListener, settings: NodeSettings) -> Result<Self> {
        let pusher = HttpPusher::new(settings.ring.push_timeout())?;
        Self::spawn_with_pusher(listener, settings, Arc::new(pusher))
    }

    /// Like [`RingHandle::spawn`], delivering variable writes through `pusher`.
    pub fn spawn_with_pusher(
        listener: TcpListener,
        settings: NodeSettings,
        pusher: Arc<dyn VariablePush>,
    ) -> Result<Self> {
        let local_addr = listener
            .local_addr()
            .context("Failed to read listener address")?;
        let (events, rx) = mpsc::unbounded_channel();

        let node = Node::new(settings.id, settings.successor, settings.leader, settings.ring);
        let runtime = Runtime {
            node,
            events: events.clone(),
            inbound: InboundRegistry::new(),
            links: HashMap::new(),
            dials: HashMap::new(),
            next_dial: 1,
            pusher,
            queued_writes: VecDeque::new(),
            in_flight: None,
        };
        let runtime = tokio::spawn(runtime.run(rx));

        let app = router(Arc::new(AppState::new(events.clone())));
        let (stop_server, stopped) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = stopped.await;
                })
                .await
        });

        Ok(Self {
            local_addr,
            events,
            runtime,
            server,
            stop_server: Some(stop_server),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Current node state, or `None` once the runtime has stopped.
    pub async fn snapshot(&self) -> Option<NodeSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.events
            .send(RuntimeEvent::Control(ControlRequest::Snapshot(tx)))
            .ok()?;
        rx.await.ok()
    }

    /// Close every ring link, then stop serving HTTP.
    pub async fn shutdown(mut self) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        if self.events.send(RuntimeEvent::Shutdown(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
        let _ = (&mut self.runtime).await;

        if let Some(stop) = self.stop_server.take() {
            let _ = stop.send(());
        }
        match tokio::time::timeout(SERVER_DRAIN_TIMEOUT, &mut self.server).await {
            Ok(joined) => joined
                .context("HTTP server task panicked")?
                .context("HTTP server failed")?,
            Err(_) => {
                warn!("HTTP server did not drain in {:?}, aborting", SERVER_DRAIN_TIMEOUT);
                self.server.abort();
            }
        }
        info!("Ring node on {} shut down", self.local_addr);
        Ok(())
    }
}

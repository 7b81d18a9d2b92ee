//! Outgoing link to the successor.
//!
//! Each dial runs in its own task and reports back to the runtime, tagged
//! with a dial id so results of superseded dials can be told apart. A live
//! link is split into a writer task fed by an unbounded channel and a reader
//! task that only watches for the remote end going away.

use crate::runtime::RuntimeEvent;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use ring_core::NodeId;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{Error as WsError, Message},
};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Event emitted by a dial or a live outgoing link.
#[derive(Debug)]
pub enum SuccessorEvent {
    /// Dial succeeded
    Connected { dial: u64, link: OutgoingLink },
    /// Dial failed, or a write on the live link failed
    Failed { dial: u64, error: String },
    /// The successor closed the link
    Closed { dial: u64 },
}

#[derive(Debug)]
enum Outbound {
    Frame(String),
    Close,
}

/// Handle to a live outgoing link.
#[derive(Debug)]
pub struct OutgoingLink {
    peer: NodeId,
    dial: u64,
    tx: mpsc::UnboundedSender<Outbound>,
    read_task: Option<JoinHandle<()>>,
}

impl OutgoingLink {
    pub fn peer(&self) -> &NodeId {
        &self.peer
    }

    pub fn dial(&self) -> u64 {
        self.dial
    }

    /// Queue a text frame. Returns false if the writer has already stopped.
    pub fn send(&self, text: String) -> bool {
        self.tx.send(Outbound::Frame(text)).is_ok()
    }

    /// Send a close frame after any queued frames, then stop.
    pub fn close(self) {
        debug!("Closing link to {}", self.peer);
        let _ = self.tx.send(Outbound::Close);
    }
}

impl Drop for OutgoingLink {
    fn drop(&mut self) {
        if let Some(task) = self.read_task.take() {
            task.abort();
        }
    }
}

/// Dial `peer`'s ring endpoint in the background.
pub fn dial(peer: NodeId, dial: u64, events: mpsc::UnboundedSender<RuntimeEvent>) {
    tokio::spawn(async move {
        let url = peer.ring_url();
        debug!("Dialing {} (dial {})", url, dial);

        let ws = match connect_async(&url).await {
            Ok((ws, _)) => ws,
            Err(e) => {
                let _ = events.send(RuntimeEvent::Successor(SuccessorEvent::Failed {
                    dial,
                    error: e.to_string(),
                }));
                return;
            }
        };
        info!("Opened link to {}", peer);

        let (write, read) = ws.split();
        let (tx, rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        tokio::spawn(write_loop(peer.clone(), dial, write, rx, events.clone()));
        let read_task = tokio::spawn(read_loop(peer.clone(), dial, read, ready_rx, events.clone()));

        let link = OutgoingLink {
            peer,
            dial,
            tx,
            read_task: Some(read_task),
        };
        let _ = events.send(RuntimeEvent::Successor(SuccessorEvent::Connected {
            dial,
            link,
        }));
        // The reader may only report a close once Connected is queued.
        let _ = ready_tx.send(());
    });
}

async fn write_loop(
    peer: NodeId,
    dial: u64,
    mut write: SplitSink<WsStream, Message>,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    events: mpsc::UnboundedSender<RuntimeEvent>,
) {
    while let Some(outbound) = rx.recv().await {
        match outbound {
            Outbound::Frame(text) => {
                if let Err(e) = write.send(Message::Text(text.into())).await {
                    warn!("Failed to send to {}: {}", peer, e);
                    let _ = events.send(RuntimeEvent::Successor(SuccessorEvent::Failed {
                        dial,
                        error: e.to_string(),
                    }));
                    return;
                }
            }
            Outbound::Close => break,
        }
    }
    let _ = write.send(Message::Close(None)).await;
    let _ = write.close().await;
}

/// The successor never sends anything meaningful; watch for the link ending.
async fn read_loop(
    peer: NodeId,
    dial: u64,
    mut read: SplitStream<WsStream>,
    ready: oneshot::Receiver<()>,
    events: mpsc::UnboundedSender<RuntimeEvent>,
) {
    let _ = ready.await;
    loop {
        match read.next().await {
            Some(Ok(Message::Close(_))) => {
                debug!("Received close frame from {}", peer);
                break;
            }
            Some(Ok(_)) => continue,
            Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => {
                debug!("Link to {} closed", peer);
                break;
            }
            Some(Err(e)) => {
                debug!("Link to {} errored: {}", peer, e);
                break;
            }
            None => {
                debug!("Link to {} stream ended", peer);
                break;
            }
        }
    }
    let _ = events.send(RuntimeEvent::Successor(SuccessorEvent::Closed { dial }));
}

//! Inbound ring connections.
//!
//! Our predecessor dials the `/ring` endpoint and streams envelopes at us.
//! Each upgraded socket runs a read loop that forwards frames to the runtime
//! and reports when the socket goes away. The runtime closes a connection by
//! firing (or dropping) its [`CloseHandle`].

use crate::runtime::RuntimeEvent;
use axum::extract::ws::{Message, WebSocket};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Maximum accepted frame size (1MB). Ring envelopes are tiny.
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Event emitted by an inbound connection.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// A predecessor connected
    Opened { conn_id: u64, close: CloseHandle },
    /// Raw frame received
    Message { conn_id: u64, data: Vec<u8> },
    /// The socket closed, from either side
    Closed { conn_id: u64 },
}

/// Asks an inbound connection's read loop to send a close frame and stop.
#[derive(Debug)]
pub struct CloseHandle(oneshot::Sender<()>);

impl CloseHandle {
    pub fn close(self) {
        let _ = self.0.send(());
    }
}

/// Drive one inbound socket until it closes.
pub async fn run_connection(
    conn_id: u64,
    mut socket: WebSocket,
    events: mpsc::UnboundedSender<RuntimeEvent>,
) {
    let (close_tx, mut close_rx) = oneshot::channel();
    let opened = ConnectionEvent::Opened {
        conn_id,
        close: CloseHandle(close_tx),
    };
    if events.send(RuntimeEvent::Connection(opened)).is_err() {
        debug!("Runtime gone, dropping connection {}", conn_id);
        return;
    }

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let data = match msg {
                    Some(Ok(Message::Text(text))) => text.as_str().as_bytes().to_vec(),
                    Some(Ok(Message::Binary(data))) => data.to_vec(),
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(_))) => {
                        debug!("Received close frame on connection {}", conn_id);
                        break;
                    }
                    Some(Err(e)) => {
                        debug!("Connection {} errored: {}", conn_id, e);
                        break;
                    }
                    None => {
                        debug!("Connection {} stream ended", conn_id);
                        break;
                    }
                };

                if data.len() > MAX_MESSAGE_SIZE {
                    warn!(
                        "Message on connection {} exceeds max size ({} > {}), dropping",
                        conn_id,
                        data.len(),
                        MAX_MESSAGE_SIZE
                    );
                    continue;
                }
                let _ = events.send(RuntimeEvent::Connection(ConnectionEvent::Message {
                    conn_id,
                    data,
                }));
            }
            _ = &mut close_rx => {
                debug!("Closing connection {}", conn_id);
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
        }
    }

    let _ = events.send(RuntimeEvent::Connection(ConnectionEvent::Closed { conn_id }));
}

//! HTTP/WebSocket server for a ring node.
//!
//! One listener serves both the `/ring` WebSocket endpoint our predecessor
//! dials and the control routes. Accepted sockets are tracked in an
//! [`InboundRegistry`] owned by the runtime, so sign-out and shutdown can
//! close them all.

use crate::connection::{CloseHandle, MAX_MESSAGE_SIZE, run_connection};
use crate::control;
use crate::runtime::RuntimeEvent;
use anyhow::{Context, Result};
use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::Response,
    routing::get,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

/// Shared state for every route.
pub struct AppState {
    pub events: mpsc::UnboundedSender<RuntimeEvent>,
    next_conn_id: AtomicU64,
}

impl AppState {
    pub fn new(events: mpsc::UnboundedSender<RuntimeEvent>) -> Self {
        Self {
            events,
            next_conn_id: AtomicU64::new(1),
        }
    }
}

/// Bind the node's listener.
pub async fn bind(listen_addr: SocketAddr) -> Result<TcpListener> {
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", listen_addr))?;
    info!("Ring node listening on {}", listen_addr);
    Ok(listener)
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ring", get(ring_socket))
        .merge(control::routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn ring_socket(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    let conn_id = state.next_conn_id.fetch_add(1, Ordering::Relaxed);
    let events = state.events.clone();
    debug!("Upgrading ring connection {}", conn_id);
    ws.max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| run_connection(conn_id, socket, events))
}

/// Open inbound connections, by connection id.
#[derive(Debug, Default)]
pub struct InboundRegistry {
    connections: HashMap<u64, CloseHandle>,
}

impl InboundRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, conn_id: u64, close: CloseHandle) {
        self.connections.insert(conn_id, close);
    }

    /// Forget a connection that closed. Returns whether it was still tracked.
    pub fn remove(&mut self, conn_id: u64) -> bool {
        self.connections.remove(&conn_id).is_some()
    }

    /// Close every connection. Their close events will not be tracked.
    pub fn close_all(&mut self) {
        for (conn_id, close) in self.connections.drain() {
            debug!("Closing inbound connection {}", conn_id);
            close.close();
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

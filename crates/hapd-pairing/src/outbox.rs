//! Owned outbound actions waiting for the transport.

use std::collections::VecDeque;

use hapd_core::error::Result;

use crate::event::ConnectionId;
use crate::traits::Transport;

/// Something the connection layer must do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Handshake response body (a TLV chain).
    Response { conn: ConnectionId, body: Vec<u8> },
    /// Encrypted session frames.
    Frame { conn: ConnectionId, bytes: Vec<u8> },
    Close(ConnectionId),
}

impl Outbound {
    pub fn conn(&self) -> ConnectionId {
        match self {
            Outbound::Response { conn, .. } | Outbound::Frame { conn, .. } => *conn,
            Outbound::Close(conn) => *conn,
        }
    }
}

/// FIFO of outbound actions.
#[derive(Debug, Default)]
pub struct Outbox {
    queue: VecDeque<Outbound>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, action: Outbound) {
        self.queue.push_back(action);
    }

    /// Drop queued data for `conn`, keeping a pending close.
    pub fn discard(&mut self, conn: ConnectionId) {
        self.queue
            .retain(|action| action.conn() != conn || matches!(action, Outbound::Close(_)));
    }

    /// Drop everything queued for `conn`.
    pub fn forget(&mut self, conn: ConnectionId) {
        self.queue.retain(|action| action.conn() != conn);
    }

    pub fn drain(&mut self) -> Vec<Outbound> {
        self.queue.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Outbound> {
        self.queue.iter()
    }
}

/// Hand every action to `transport` in order.
///
/// Stops at the first transport error; actions not yet delivered are
/// returned to the front of the outbox.
pub async fn flush<T: Transport + ?Sized>(outbox: &mut Outbox, transport: &mut T) -> Result<usize> {
    let mut sent = 0;
    while let Some(action) = outbox.queue.pop_front() {
        let result = match &action {
            Outbound::Response { conn, body } => transport.respond(*conn, body).await,
            Outbound::Frame { conn, bytes } => transport.send(*conn, bytes).await,
            Outbound::Close(conn) => transport.close(*conn).await,
        };
        if let Err(e) = result {
            tracing::warn!(conn = %action.conn(), error = %e, "Transport rejected outbound action");
            outbox.queue.push_front(action);
            return Err(e);
        }
        sent += 1;
    }
    Ok(sent)
}

//! Connection handle and related types

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::auth::Identity;
use crate::metrics::ConnectionMetrics;
use crate::websocket::{OutboundMessage, ServerMessage};

pub type ConnectionId = Uuid;

/// Why a connection was torn down. The first teardown wins and its reason
/// is the one reported to the client in the close frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Client sent a close frame or the stream ended
    ClientClosed,
    /// Socket read or write failed
    TransportError,
    /// No inbound frame within the heartbeat timeout
    HeartbeatTimeout,
    /// Still connected when the drain timeout elapsed
    DrainTimeout,
    /// Removed through `Hub::unregister`
    ServerClosed,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClientClosed => "client_closed",
            Self::TransportError => "transport_error",
            Self::HeartbeatTimeout => "heartbeat_timeout",
            Self::DrainTimeout => "drain_timeout",
            Self::ServerClosed => "server_closed",
        }
    }
}

/// Result of a non-blocking enqueue onto a connection's outbound queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// Queue full; the message was dropped and the connection marked slow
    Dropped,
    /// Connection already torn down
    Closed,
}

/// Handle for a single client session.
///
/// The hub holds one `Arc` per active connection; the read and write pumps
/// hold the others. Only the write pump owns the socket sink, everything
/// else reaches the client through [`ConnectionHandle::try_enqueue`].
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub user_id: String,
    pub session_id: String,
    pub connected_at: DateTime<Utc>,
    sender: mpsc::Sender<OutboundMessage>,
    /// Last inbound frame (Unix millis)
    last_heartbeat: AtomicI64,
    closed: AtomicBool,
    slow: AtomicBool,
    dropped: AtomicU64,
    close_tx: watch::Sender<Option<CloseReason>>,
}

impl ConnectionHandle {
    pub fn new(identity: &Identity, sender: mpsc::Sender<OutboundMessage>) -> Self {
        let now = Utc::now();
        let (close_tx, _) = watch::channel(None);
        Self {
            id: Uuid::new_v4(),
            user_id: identity.user_id.clone(),
            session_id: identity.session_id.clone(),
            connected_at: now,
            sender,
            last_heartbeat: AtomicI64::new(now.timestamp_millis()),
            closed: AtomicBool::new(false),
            slow: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
            close_tx,
        }
    }

    /// Build a handle together with its bounded outbound queue
    pub fn with_queue(
        identity: &Identity,
        capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Arc::new(Self::new(identity, tx)), rx)
    }

    /// Enqueue without waiting. A full queue drops the message and marks the
    /// connection slow; publishers are never blocked by one client.
    pub fn try_enqueue(&self, message: OutboundMessage) -> EnqueueOutcome {
        if self.is_closed() {
            return EnqueueOutcome::Closed;
        }

        match self.sender.try_send(message) {
            Ok(()) => EnqueueOutcome::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                if !self.slow.swap(true, Ordering::Relaxed) {
                    ConnectionMetrics::record_slow();
                    tracing::warn!(
                        connection_id = %self.id,
                        user_id = %self.user_id,
                        "Outbound queue full, connection marked slow"
                    );
                }
                EnqueueOutcome::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => EnqueueOutcome::Closed,
        }
    }

    pub fn send(&self, message: ServerMessage) -> EnqueueOutcome {
        self.try_enqueue(OutboundMessage::Raw(message))
    }

    pub fn touch(&self) {
        self.last_heartbeat
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn last_heartbeat(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.last_heartbeat.load(Ordering::Relaxed))
            .unwrap_or_else(Utc::now)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn is_slow(&self) -> bool {
        self.slow.load(Ordering::Relaxed)
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Flip the closed flag. Returns true for exactly one caller, which then
    /// owns the rest of the teardown; the pumps observe the close signal.
    pub fn mark_closed(&self, reason: CloseReason) -> bool {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.close_tx.send_replace(Some(reason));
        true
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        *self.close_tx.borrow()
    }

    pub fn close_signal(&self) -> watch::Receiver<Option<CloseReason>> {
        self.close_tx.subscribe()
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("session_id", &self.session_id)
            .field("closed", &self.is_closed())
            .field("slow", &self.is_slow())
            .finish()
    }
}

/// Resolve once the handle has been marked closed
pub(crate) async fn wait_closed(signal: &mut watch::Receiver<Option<CloseReason>>) {
    let _ = signal.wait_for(|reason| reason.is_some()).await;
}

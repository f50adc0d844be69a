//! Read and write pumps: the two tasks that run for every connection.
//!
//! The write pump is the only writer to the socket. The read pump decodes
//! client frames and hands them to an [`InboundHandler`]. Both stop as soon
//! as the handle is marked closed, whoever closed it.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{close_code, CloseFrame, Message};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;

use crate::metrics::{ConnectionMetrics, WsMessageMetrics};
use crate::websocket::{ClientMessage, OutboundMessage, ServerMessage};

use super::handle::{wait_closed, CloseReason, ConnectionHandle};

/// Application close code for heartbeat timeouts
pub const CLOSE_HEARTBEAT_TIMEOUT: u16 = 4000;

/// Receives decoded client intents from a read pump
#[async_trait]
pub trait InboundHandler: Send + Sync {
    async fn on_client_message(&self, handle: &Arc<ConnectionHandle>, message: ClientMessage);
}

fn close_frame(reason: CloseReason) -> CloseFrame {
    let code = match reason {
        CloseReason::ClientClosed => close_code::NORMAL,
        CloseReason::TransportError => close_code::ERROR,
        CloseReason::HeartbeatTimeout => CLOSE_HEARTBEAT_TIMEOUT,
        CloseReason::DrainTimeout | CloseReason::ServerClosed => close_code::AWAY,
    };
    CloseFrame {
        code,
        reason: reason.as_str().into(),
    }
}

/// Drain the outbound queue into the socket until the connection closes.
///
/// Returns `Err` only when the socket rejected a write; the caller treats
/// that as a transport error and tears the connection down.
pub async fn write_pump<W>(
    mut sink: W,
    mut queue: mpsc::Receiver<OutboundMessage>,
    handle: Arc<ConnectionHandle>,
) -> Result<(), String>
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    let mut closed = handle.close_signal();

    loop {
        tokio::select! {
            biased;
            _ = wait_closed(&mut closed) => break,
            next = queue.recv() => {
                let Some(message) = next else { break };

                let text = match message.to_json() {
                    Ok(t) => t,
                    Err(e) => {
                        tracing::error!(connection_id = %handle.id, error = %e, "Failed to serialize message");
                        continue;
                    }
                };

                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    return Err(e.to_string());
                }
            }
        }
    }

    // Pending queue entries are released with the receiver
    queue.close();

    if let Some(reason) = handle.close_reason() {
        let _ = sink.send(Message::Close(Some(close_frame(reason)))).await;
    }
    let _ = sink.close().await;

    Ok(())
}

/// Read client frames until the client leaves, the socket fails, the
/// heartbeat deadline passes, or someone else closes the connection.
///
/// Every inbound frame resets the heartbeat deadline.
pub async fn read_pump<R, E>(
    mut stream: R,
    handle: Arc<ConnectionHandle>,
    heartbeat_timeout: Duration,
    handler: Arc<dyn InboundHandler>,
) -> CloseReason
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let mut closed = handle.close_signal();

    loop {
        let next = tokio::select! {
            biased;
            _ = wait_closed(&mut closed) => {
                return handle.close_reason().unwrap_or(CloseReason::ServerClosed);
            }
            next = tokio::time::timeout(heartbeat_timeout, stream.next()) => next,
        };

        let message = match next {
            Err(_) => {
                ConnectionMetrics::record_heartbeat_timeout();
                tracing::info!(
                    connection_id = %handle.id,
                    user_id = %handle.user_id,
                    timeout_ms = heartbeat_timeout.as_millis() as u64,
                    "Heartbeat timeout"
                );
                return CloseReason::HeartbeatTimeout;
            }
            Ok(None) => return CloseReason::ClientClosed,
            Ok(Some(Err(e))) => {
                tracing::warn!(connection_id = %handle.id, error = %e, "WebSocket receive error");
                return CloseReason::TransportError;
            }
            Ok(Some(Ok(message))) => message,
        };

        handle.touch();

        match message {
            Message::Text(text) => {
                let client_msg: ClientMessage = match serde_json::from_str(text.as_str()) {
                    Ok(m) => m,
                    Err(e) => {
                        tracing::debug!(connection_id = %handle.id, error = %e, "Failed to parse client message");
                        handle.send(ServerMessage::error("INVALID_MESSAGE", e.to_string()));
                        continue;
                    }
                };
                WsMessageMetrics::record(client_msg.kind());
                handler.on_client_message(&handle, client_msg).await;
            }
            Message::Binary(_) => {
                handle.send(ServerMessage::error(
                    "UNSUPPORTED_FORMAT",
                    "Binary messages are not supported",
                ));
            }
            // Liveness only; pongs to client pings are sent by the transport
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Close(_) => {
                tracing::debug!(connection_id = %handle.id, "Received close frame");
                return CloseReason::ClientClosed;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Identity;
    use futures::channel::mpsc as fmpsc;
    use std::convert::Infallible;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingHandler {
        seen: Mutex<Vec<ClientMessage>>,
    }

    #[async_trait]
    impl InboundHandler for RecordingHandler {
        async fn on_client_message(&self, _handle: &Arc<ConnectionHandle>, message: ClientMessage) {
            self.seen.lock().await.push(message);
        }
    }

    fn handle(capacity: usize) -> (Arc<ConnectionHandle>, mpsc::Receiver<OutboundMessage>) {
        ConnectionHandle::with_queue(&Identity::new("u1", "s1"), capacity)
    }

    #[tokio::test]
    async fn test_write_pump_preserves_order_and_sends_close_frame() {
        let (handle, queue) = handle(8);
        let (sink, mut socket) = fmpsc::unbounded::<Message>();

        handle.send(ServerMessage::Heartbeat);
        handle.send(ServerMessage::HeartbeatAck);

        let pump = tokio::spawn(write_pump(sink, queue, handle.clone()));

        let first = socket.next().await.unwrap();
        let second = socket.next().await.unwrap();
        assert_eq!(first, Message::Text(r#"{"type":"heartbeat"}"#.into()));
        assert_eq!(second, Message::Text(r#"{"type":"heartbeat_ack"}"#.into()));

        handle.mark_closed(CloseReason::DrainTimeout);
        pump.await.unwrap().unwrap();

        match socket.next().await {
            Some(Message::Close(Some(frame))) => assert_eq!(frame.code, close_code::AWAY),
            other => panic!("expected close frame, got {:?}", other),
        }
        assert!(socket.next().await.is_none());
    }

    #[tokio::test]
    async fn test_write_pump_reports_transport_error() {
        let (handle, queue) = handle(8);
        let (sink, socket) = fmpsc::unbounded::<Message>();
        drop(socket);

        handle.send(ServerMessage::Heartbeat);
        let result = write_pump(sink, queue, handle).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_read_pump_dispatches_and_stops_on_close_frame() {
        let (handle, mut queue) = handle(8);
        let handler = Arc::new(RecordingHandler::default());
        let frames = futures::stream::iter(vec![
            Ok::<_, Infallible>(Message::Text(r#"{"type":"heartbeat"}"#.into())),
            Ok(Message::Text("not json".into())),
            Ok(Message::Binary(vec![1, 2, 3].into())),
            Ok(Message::Close(None)),
            Ok(Message::Text(r#"{"type":"heartbeat"}"#.into())),
        ]);

        let reason = read_pump(frames, handle, Duration::from_secs(5), handler.clone()).await;

        assert_eq!(reason, CloseReason::ClientClosed);
        assert_eq!(handler.seen.lock().await.len(), 1);

        let invalid = queue.recv().await.unwrap();
        assert!(matches!(
            invalid,
            OutboundMessage::Raw(ServerMessage::Error { ref code, .. }) if code == "INVALID_MESSAGE"
        ));
        let binary = queue.recv().await.unwrap();
        assert!(matches!(
            binary,
            OutboundMessage::Raw(ServerMessage::Error { ref code, .. }) if code == "UNSUPPORTED_FORMAT"
        ));
    }

    #[tokio::test]
    async fn test_read_pump_heartbeat_timeout() {
        let (handle, _queue) = handle(8);
        let handler = Arc::new(RecordingHandler::default());
        let silent = futures::stream::pending::<Result<Message, Infallible>>();

        let reason = read_pump(silent, handle, Duration::from_millis(30), handler).await;
        assert_eq!(reason, CloseReason::HeartbeatTimeout);
    }

    #[tokio::test]
    async fn test_read_pump_stops_when_closed_elsewhere() {
        let (handle, _queue) = handle(8);
        let handler = Arc::new(RecordingHandler::default());
        let silent = futures::stream::pending::<Result<Message, Infallible>>();

        let pump = tokio::spawn(read_pump(
            silent,
            handle.clone(),
            Duration::from_secs(60),
            handler,
        ));
        handle.mark_closed(CloseReason::DrainTimeout);

        let reason = tokio::time::timeout(Duration::from_secs(1), pump)
            .await
            .expect("read pump should stop")
            .unwrap();
        assert_eq!(reason, CloseReason::DrainTimeout);
    }

    #[tokio::test]
    async fn test_read_pump_end_of_stream_is_client_close() {
        let (handle, _queue) = handle(8);
        let handler = Arc::new(RecordingHandler::default());
        let empty = futures::stream::empty::<Result<Message, Infallible>>();

        let reason = read_pump(empty, handle, Duration::from_secs(5), handler).await;
        assert_eq!(reason, CloseReason::ClientClosed);
    }
}

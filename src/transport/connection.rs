//! Connection capability and its WebSocket implementation
//!
//! The registry only needs to send text to a client and to close it. The
//! WebSocket sink is owned by a writer task fed through an unbounded channel,
//! so `send` never waits on the network and fails only once the writer is gone.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::extract::ws::Message;
use futures::{Sink, SinkExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{ChatError, Result};
use crate::protocol::{ConnectionId, Frame};

/// A bidirectional channel to one client, as seen by the registry
pub trait Connection: Send + Sync {
    /// Unique connection id
    fn id(&self) -> &str;

    /// Queue a text frame for delivery
    fn send(&self, text: Arc<str>) -> Result<()>;

    /// Close the connection. Best effort, never fails.
    fn close(&self);

    /// Encode and send a frame
    fn send_frame(&self, frame: &Frame) -> Result<()> {
        self.send(frame.encode()?)
    }
}

impl fmt::Debug for dyn Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection").field("id", &self.id()).finish()
    }
}

/// Item queued for the writer task
#[derive(Debug)]
enum Outbound {
    Text(Arc<str>),
    Close,
}

/// WebSocket-backed connection
pub struct WsConnection {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<Outbound>,
    closed: AtomicBool,
}

impl WsConnection {
    /// Wrap the sending half of a WebSocket and spawn its writer task
    pub fn spawn<S>(sink: S) -> (Arc<Self>, JoinHandle<()>)
    where
        S: Sink<Message> + Unpin + Send + 'static,
        S::Error: fmt::Display,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = Arc::new(Self {
            id: uuid::Uuid::new_v4().to_string(),
            tx,
            closed: AtomicBool::new(false),
        });

        let writer = tokio::spawn(write_loop(connection.id.clone(), sink, rx));
        (connection, writer)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.tx.is_closed()
    }
}

impl Connection for WsConnection {
    fn id(&self) -> &str {
        &self.id
    }

    fn send(&self, text: Arc<str>) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ChatError::transport(format!("Connection {} closed", self.id)));
        }
        self.tx
            .send(Outbound::Text(text))
            .map_err(|_| ChatError::transport(format!("Connection {} writer gone", self.id)))
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.tx.send(Outbound::Close);
        }
    }
}

/// Drain queued frames into the socket until closed or a write fails
async fn write_loop<S>(conn_id: ConnectionId, mut sink: S, mut rx: mpsc::UnboundedReceiver<Outbound>)
where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: fmt::Display,
{
    while let Some(outbound) = rx.recv().await {
        match outbound {
            Outbound::Text(text) => {
                if let Err(e) = sink.send(Message::Text(text.to_string().into())).await {
                    debug!(conn_id = %conn_id, error = %e, "websocket write failed");
                    break;
                }
            }
            Outbound::Close => {
                let _ = sink.send(Message::Close(None)).await;
                let _ = sink.close().await;
                break;
            }
        }
    }
    debug!(conn_id = %conn_id, "writer task exiting");
}

/// In-memory connection for tests
#[cfg(test)]
pub struct MockConnection {
    id: ConnectionId,
    sent: parking_lot::Mutex<Vec<String>>,
    failing: AtomicBool,
    closed: AtomicBool,
}

#[cfg(test)]
impl MockConnection {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            sent: parking_lot::Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    pub fn failing(id: &str) -> Arc<Self> {
        let conn = Self::new(id);
        conn.set_failing(true);
        conn
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn frames(&self) -> Vec<Frame> {
        self.sent
            .lock()
            .iter()
            .map(|text| Frame::decode(text).expect("mock received invalid frame"))
            .collect()
    }
}

#[cfg(test)]
impl Connection for MockConnection {
    fn id(&self) -> &str {
        &self.id
    }

    fn send(&self, text: Arc<str>) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) || self.closed.load(Ordering::SeqCst) {
            return Err(ChatError::transport(format!("mock {} unavailable", self.id)));
        }
        self.sent.lock().push(text.to_string());
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc as fmpsc;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_ws_connection_writes_frames_in_order() {
        let (sink, mut written) = fmpsc::unbounded::<Message>();
        let (conn, _writer) = WsConnection::spawn(sink);

        conn.send(Arc::from("one")).unwrap();
        conn.send(Arc::from("two")).unwrap();

        assert_eq!(written.next().await, Some(Message::Text("one".to_string().into())));
        assert_eq!(written.next().await, Some(Message::Text("two".to_string().into())));
    }

    #[tokio::test]
    async fn test_ws_connection_close_rejects_sends() {
        let (sink, mut written) = fmpsc::unbounded::<Message>();
        let (conn, writer) = WsConnection::spawn(sink);

        conn.close();
        assert!(conn.is_closed());
        assert!(conn.send(Arc::from("late")).is_err());

        assert!(matches!(written.next().await, Some(Message::Close(None))));
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_ws_connection_send_fails_after_peer_gone() {
        let (sink, written) = fmpsc::unbounded::<Message>();
        let (conn, writer) = WsConnection::spawn(sink);
        drop(written);

        // First send fails inside the writer, which then exits
        conn.send(Arc::from("lost")).unwrap();
        writer.await.unwrap();
        assert!(conn.send(Arc::from("after")).is_err());
    }

    #[test]
    fn test_mock_connection_records_and_fails() {
        let conn = MockConnection::new("c1");
        conn.send_frame(&Frame::system("hi")).unwrap();
        assert_eq!(conn.frames().len(), 1);

        conn.set_failing(true);
        assert!(conn.send_frame(&Frame::system("again")).is_err());
        assert_eq!(conn.frames().len(), 1);
    }
}

//! SSE sessions and the session registry
//!
//! A [`Session`] owns the long-lived outbound connection of one `GET /sse`
//! stream and knows how to encode and transmit a single SSE frame. The
//! [`SessionRegistry`] correlates session ids from `/messages/` POSTs back to
//! their stream.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

/// Byte stream of one accepted client connection, plain or TLS-wrapped
pub trait Connection: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Connection for T {}

/// Owned, type-erased client connection
pub type BoxedConnection = Box<dyn Connection>;

/// One active SSE stream
pub struct Session {
    pub id: String,
    pub peer_addr: SocketAddr,
    pub created_at: DateTime<Utc>,
    last_ping: std::sync::Mutex<DateTime<Utc>>,
    active: AtomicBool,
    // Dispatcher frames and keep-alive pings share this writer; the mutex
    // keeps concurrent frames from interleaving on the wire.
    connection: Mutex<BoxedConnection>,
}

impl Session {
    fn new(connection: BoxedConnection, peer_addr: SocketAddr) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().simple().to_string(),
            peer_addr,
            created_at: now,
            last_ping: std::sync::Mutex::new(now),
            active: AtomicBool::new(true),
            connection: Mutex::new(connection),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn last_ping(&self) -> DateTime<Utc> {
        *self.last_ping.lock().expect("last_ping lock poisoned")
    }

    /// Encode and transmit one SSE frame.
    ///
    /// Returns `false` on write failure, after marking the session inactive.
    /// Callers must treat failure as "stop sending to this session"; removal
    /// from the registry is the caller's responsibility.
    pub async fn send_message(&self, event_type: &str, data: Option<&Value>) -> bool {
        let frame = encode_frame(event_type, data, Utc::now());
        let sent = self.send_raw(frame.as_bytes()).await;
        if sent && event_type == "ping" {
            *self.last_ping.lock().expect("last_ping lock poisoned") = Utc::now();
        }
        sent
    }

    /// Write raw bytes to the stream (response headers, pre-encoded frames)
    pub async fn send_raw(&self, bytes: &[u8]) -> bool {
        let mut connection = self.connection.lock().await;
        let result = async {
            connection.write_all(bytes).await?;
            connection.flush().await
        }
        .await;

        match result {
            Ok(()) => {
                debug!("SSE write to {}: {} bytes", self.peer_addr, bytes.len());
                true
            }
            Err(e) => {
                warn!("Failed to send SSE frame to {}: {}", self.peer_addr, e);
                self.active.store(false, Ordering::SeqCst);
                false
            }
        }
    }

    /// Tear down the connection, swallowing close errors
    async fn close(&self) {
        self.active.store(false, Ordering::SeqCst);
        let mut connection = self.connection.lock().await;
        if let Err(e) = connection.shutdown().await {
            debug!("Ignoring close error for {}: {}", self.peer_addr, e);
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("created_at", &self.created_at)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

/// Encode one SSE frame.
///
/// `ping` frames are comment lines that keep the stream alive without firing
/// client event listeners. For everything else the `event:` line is emitted
/// only for non-default event types; object payloads become one-line JSON and
/// string payloads pass through verbatim.
pub fn encode_frame(event_type: &str, data: Option<&Value>, now: DateTime<Utc>) -> String {
    if event_type == "ping" {
        return format!(
            ": ping - {}+00:00\r\n\r\n",
            now.format("%Y-%m-%dT%H:%M:%S%.6f")
        );
    }

    let mut frame = String::new();
    if event_type != "message" {
        frame.push_str("event: ");
        frame.push_str(event_type);
        frame.push_str("\r\n");
    }

    let payload = match data {
        Some(Value::String(s)) => s.clone(),
        Some(value) => value.to_string(),
        None => String::new(),
    };
    frame.push_str("data: ");
    frame.push_str(&payload);
    frame.push_str("\r\n\r\n");
    frame
}

/// Concurrent-safe mapping from session id to [`Session`]
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, Arc<Session>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a session for a freshly accepted SSE connection
    pub async fn create(
        &self,
        connection: BoxedConnection,
        peer_addr: SocketAddr,
    ) -> Arc<Session> {
        let session = Arc::new(Session::new(connection, peer_addr));
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session.clone());
        debug!("Session {} created for {}", session.id, peer_addr);
        session
    }

    pub async fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// Remove a session and close its connection. Removing an absent id is a
    /// no-op.
    pub async fn remove(&self, session_id: &str) {
        let removed = self.sessions.write().await.remove(session_id);
        if let Some(session) = removed {
            session.close().await;
            debug!("Session {} removed", session_id);
        }
    }

    /// Remove every session; used at shutdown
    pub async fn remove_all(&self) {
        let drained: Vec<Arc<Session>> =
            self.sessions.write().await.drain().map(|(_, s)| s).collect();
        for session in drained {
            session.close().await;
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[test]
    fn ping_frame_is_a_comment_with_timestamp() {
        let now = "2024-01-02T03:04:05.000006Z".parse::<DateTime<Utc>>().unwrap();
        let frame = encode_frame("ping", None, now);
        assert_eq!(frame, ": ping - 2024-01-02T03:04:05.000006+00:00\r\n\r\n");
    }

    #[test]
    fn message_frame_omits_event_line() {
        let frame = encode_frame("message", Some(&json!({"a": 1})), Utc::now());
        assert_eq!(frame, "data: {\"a\":1}\r\n\r\n");
    }

    #[test]
    fn named_event_carries_event_line_and_verbatim_string() {
        let frame = encode_frame(
            "endpoint",
            Some(&Value::String("/messages/?session_id=abc".to_string())),
            Utc::now(),
        );
        assert_eq!(
            frame,
            "event: endpoint\r\ndata: /messages/?session_id=abc\r\n\r\n"
        );
    }

    #[test]
    fn object_payload_serializes_to_single_line() {
        let payload = json!({"jsonrpc":"2.0","id":1,"result":{"tools":[]}});
        let frame = encode_frame("message", Some(&payload), Utc::now());
        assert!(!frame.trim_end().contains('\n'));
        assert!(frame.starts_with("data: {"));
        assert!(frame.ends_with("\r\n\r\n"));
    }

    #[tokio::test]
    async fn registry_create_get_remove() {
        let registry = SessionRegistry::new();
        let (client, server) = tokio::io::duplex(1024);
        drop(client);

        let session = registry.create(Box::new(server), test_addr()).await;
        assert_eq!(session.id.len(), 32);
        assert!(session.id.chars().all(|c| c.is_ascii_hexdigit()));

        assert!(registry.get(&session.id).await.is_some());
        assert_eq!(registry.len().await, 1);

        registry.remove(&session.id).await;
        assert!(registry.get(&session.id).await.is_none());

        // Idempotent: removing again is a no-op
        registry.remove(&session.id).await;
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn send_failure_marks_session_inactive() {
        let registry = SessionRegistry::new();
        let (client, server) = tokio::io::duplex(64);
        drop(client);

        let session = registry.create(Box::new(server), test_addr()).await;
        assert!(session.is_active());

        // Peer is gone: the write fails and the session flips inactive, but
        // the registry entry is untouched until a caller removes it.
        let sent = session.send_message("message", Some(&json!({"x": 1}))).await;
        assert!(!sent);
        assert!(!session.is_active());
        assert!(registry.get(&session.id).await.is_some());
    }

    #[tokio::test]
    async fn frames_arrive_on_the_peer_side() {
        use tokio::io::AsyncReadExt;

        let registry = SessionRegistry::new();
        let (mut client, server) = tokio::io::duplex(4096);

        let session = registry.create(Box::new(server), test_addr()).await;
        assert!(session.send_message("message", Some(&json!({"ok": true}))).await);

        let mut buf = vec![0u8; 256];
        let n = client.read(&mut buf).await.unwrap();
        let text = String::from_utf8_lossy(&buf[..n]).to_string();
        assert_eq!(text, "data: {\"ok\":true}\r\n\r\n");
    }

    #[tokio::test]
    async fn remove_all_clears_registry() {
        let registry = SessionRegistry::new();
        for _ in 0..3 {
            let (_client, server) = tokio::io::duplex(64);
            registry.create(Box::new(server), test_addr()).await;
        }
        assert_eq!(registry.len().await, 3);

        registry.remove_all().await;
        assert!(registry.is_empty().await);
    }
}

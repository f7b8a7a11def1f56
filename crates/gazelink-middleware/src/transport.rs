//! Pub/sub transport seam and its rosbridge WebSocket implementation.
//!
//! The listener never speaks WebSocket directly.  It talks to a
//! [`Transport`], which owns the connection and invokes registered
//! [`MessageCallback`]s on a thread of its own, the producer side of the
//! listener's producer/consumer split.
//!
//! [`RosbridgeTransport`] runs a single-threaded Tokio runtime on a dedicated
//! `rosbridge-io` thread.  The synchronous [`Transport`] methods talk to that
//! thread over an unbounded channel, so none of them wait on network I/O
//! except [`Transport::connect`], which is bounded by its timeout.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self as std_mpsc, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use gazelink_types::SpatialError;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::rosbridge::{self, InboundFrame};

/// Invoked on the transport's thread with the `msg` of every frame published
/// on the subscribed topic.
pub type MessageCallback = Arc<dyn Fn(&Value) + Send + Sync>;

/// Invoked on the transport's thread, with a reason, when an established
/// connection is lost without [`Transport::close`] having been called.
pub type DisconnectCallback = Arc<dyn Fn(String) + Send + Sync>;

/// A publish/subscribe client.
///
/// # Contract
///
/// * `connect` blocks for at most `timeout`.  It may be called again after a
///   failure or a dropped link.
/// * Callbacks run on a thread owned by the transport and must return
///   promptly.
/// * `unsubscribe` and `close` never invoke callbacks synchronously.
/// * After `close`, `connect` fails with [`SpatialError::Closed`].
pub trait Transport: Send {
    /// Endpoint this transport connects to.
    fn url(&self) -> &str;

    fn connect(&mut self, timeout: Duration, on_disconnect: DisconnectCallback) -> Result<(), SpatialError>;

    fn is_connected(&self) -> bool;

    fn subscribe(
        &mut self,
        topic: &str,
        message_type: &str,
        callback: MessageCallback,
    ) -> Result<(), SpatialError>;

    fn unsubscribe(&mut self, topic: &str) -> Result<(), SpatialError>;

    fn close(&mut self) -> Result<(), SpatialError>;
}

/// Extra time granted to the I/O thread to report back after its own
/// connect timeout fires.
const READY_GRACE: Duration = Duration::from_millis(500);

enum Outbound {
    Frame(String),
    Close,
}

type Handlers = Arc<Mutex<HashMap<String, MessageCallback>>>;

/// [`Transport`] speaking the rosbridge v2 protocol over a WebSocket.
pub struct RosbridgeTransport {
    url: String,
    connected: Arc<AtomicBool>,
    handlers: Handlers,
    /// topic -> rosbridge subscription id
    subscription_ids: HashMap<String, String>,
    outbound: Option<mpsc::UnboundedSender<Outbound>>,
    io_thread: Option<JoinHandle<()>>,
    closed: bool,
}

impl RosbridgeTransport {
    /// Create a transport for `url` (e.g. `"ws://localhost:9090"`).  Nothing
    /// is opened until [`Transport::connect`].
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connected: Arc::new(AtomicBool::new(false)),
            handlers: Arc::new(Mutex::new(HashMap::new())),
            subscription_ids: HashMap::new(),
            outbound: None,
            io_thread: None,
            closed: false,
        }
    }

    fn send(&self, frame: String) -> Result<(), String> {
        let outbound = self.outbound.as_ref().ok_or("not connected")?;
        outbound
            .send(Outbound::Frame(frame))
            .map_err(|_| "I/O thread has stopped".to_string())
    }

    /// Stop the I/O thread, if any.  Joins only when the thread has already
    /// finished or the caller is not the I/O thread itself.
    fn shutdown_io(&mut self) {
        if let Some(outbound) = self.outbound.take() {
            let _ = outbound.send(Outbound::Close);
        }
        self.connected.store(false, Ordering::SeqCst);
        if let Some(handle) = self.io_thread.take() {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.is_finished() {
                let _ = handle.join();
            }
        }
    }
}

impl Transport for RosbridgeTransport {
    fn url(&self) -> &str {
        &self.url
    }

    fn connect(&mut self, timeout: Duration, on_disconnect: DisconnectCallback) -> Result<(), SpatialError> {
        if self.closed {
            return Err(SpatialError::Closed);
        }
        if self.is_connected() {
            return Ok(());
        }
        self.shutdown_io();
        // Fresh shared state so a previous I/O thread that is still winding
        // down cannot flip the flag or reach the new handlers.
        self.connected = Arc::new(AtomicBool::new(false));
        self.handlers = Arc::new(Mutex::new(HashMap::new()));
        self.subscription_ids.clear();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| SpatialError::TransportUnavailable(format!("tokio runtime: {e}")))?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = std_mpsc::sync_channel(1);
        let io = IoTask {
            url: self.url.clone(),
            timeout,
            connected: Arc::clone(&self.connected),
            handlers: Arc::clone(&self.handlers),
            on_disconnect,
        };

        let handle = thread::Builder::new()
            .name("rosbridge-io".to_string())
            .spawn(move || runtime.block_on(io.run(outbound_rx, ready_tx)))
            .map_err(|e| SpatialError::TransportUnavailable(format!("spawn I/O thread: {e}")))?;

        match ready_rx.recv_timeout(timeout + READY_GRACE) {
            Ok(Ok(())) => {
                self.outbound = Some(outbound_tx);
                self.io_thread = Some(handle);
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(RecvTimeoutError::Timeout) => Err(SpatialError::ConnectionFailed(format!(
                "{}: no response within {timeout:?}",
                self.url
            ))),
            Err(RecvTimeoutError::Disconnected) => Err(SpatialError::TransportUnavailable(
                "I/O thread exited before connecting".to_string(),
            )),
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn subscribe(
        &mut self,
        topic: &str,
        message_type: &str,
        callback: MessageCallback,
    ) -> Result<(), SpatialError> {
        let fail = |reason: String| SpatialError::Subscription {
            topic: topic.to_string(),
            reason,
        };
        if !self.is_connected() {
            return Err(fail("not connected".to_string()));
        }

        lock(&self.handlers).insert(topic.to_string(), callback);
        let id = rosbridge::subscription_id(topic);
        if let Err(reason) = self.send(rosbridge::subscribe_frame(&id, topic, message_type)) {
            lock(&self.handlers).remove(topic);
            return Err(fail(reason));
        }
        debug!(topic = %topic, message_type = %message_type, id = %id, "subscribed");
        self.subscription_ids.insert(topic.to_string(), id);
        Ok(())
    }

    fn unsubscribe(&mut self, topic: &str) -> Result<(), SpatialError> {
        lock(&self.handlers).remove(topic);
        let Some(id) = self.subscription_ids.remove(topic) else {
            return Ok(());
        };
        if !self.is_connected() {
            return Ok(());
        }
        self.send(rosbridge::unsubscribe_frame(&id, topic))
            .map_err(|reason| SpatialError::Subscription {
                topic: topic.to_string(),
                reason,
            })
    }

    fn close(&mut self) -> Result<(), SpatialError> {
        self.closed = true;
        lock(&self.handlers).clear();
        self.subscription_ids.clear();
        self.shutdown_io();
        Ok(())
    }
}

impl Drop for RosbridgeTransport {
    fn drop(&mut self) {
        if let Some(outbound) = self.outbound.take() {
            let _ = outbound.send(Outbound::Close);
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// I/O thread
// ────────────────────────────────────────────────────────────────────────────

struct IoTask {
    url: String,
    timeout: Duration,
    connected: Arc<AtomicBool>,
    handlers: Handlers,
    on_disconnect: DisconnectCallback,
}

impl IoTask {
    async fn run(
        self,
        mut outbound: mpsc::UnboundedReceiver<Outbound>,
        ready: std_mpsc::SyncSender<Result<(), SpatialError>>,
    ) {
        let stream = match tokio::time::timeout(self.timeout, connect_async(self.url.as_str())).await {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(e)) => {
                let _ = ready.send(Err(SpatialError::ConnectionFailed(format!("{}: {e}", self.url))));
                return;
            }
            Err(_) => {
                let _ = ready.send(Err(SpatialError::ConnectionFailed(format!(
                    "{}: timed out after {:?}",
                    self.url, self.timeout
                ))));
                return;
            }
        };

        self.connected.store(true, Ordering::SeqCst);
        if ready.send(Ok(())).is_err() {
            // The caller gave up waiting; nobody will ever use this link.
            self.connected.store(false, Ordering::SeqCst);
            return;
        }
        info!(url = %self.url, "connected to rosbridge");

        let (mut ws_tx, mut ws_rx) = stream.split();
        let lost = loop {
            tokio::select! {
                cmd = outbound.recv() => {
                    match cmd {
                        Some(Outbound::Frame(text)) => {
                            if let Err(e) = ws_tx.send(Message::Text(text.into())).await {
                                break Some(format!("send failed: {e}"));
                            }
                        }
                        Some(Outbound::Close) | None => {
                            let _ = ws_tx.send(Message::Close(None)).await;
                            break None;
                        }
                    }
                }
                frame = ws_rx.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => self.dispatch(text.as_str()),
                        Some(Ok(Message::Close(_))) | None => {
                            break Some("connection closed by bridge".to_string());
                        }
                        Some(Err(e)) => break Some(format!("websocket error: {e}")),
                        Some(Ok(_)) => {}
                    }
                }
            }
        };

        self.connected.store(false, Ordering::SeqCst);
        match lost {
            Some(reason) => {
                warn!(url = %self.url, reason = %reason, "rosbridge link lost");
                (self.on_disconnect)(reason);
            }
            None => debug!(url = %self.url, "rosbridge link closed"),
        }
    }

    fn dispatch(&self, text: &str) {
        match rosbridge::parse_inbound(text) {
            InboundFrame::Publish { topic, msg } => {
                // Clone the handler out so the map is not locked while it runs.
                let handler = lock(&self.handlers).get(&topic).cloned();
                match handler {
                    Some(handler) => handler(&msg),
                    None => debug!(topic = %topic, "publish on unsubscribed topic"),
                }
            }
            InboundFrame::Status { level, msg } => {
                warn!(level = %level, status = %msg, "rosbridge status");
            }
            InboundFrame::Ignored(reason) => debug!(reason = %reason, "ignored frame"),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Instant;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    const WAIT: Duration = Duration::from_secs(5);

    /// Spawn a one-connection rosbridge stand-in.  Every text frame the
    /// client sends is forwarded to the returned receiver; each `subscribe`
    /// is answered with one publish of `reply` on the same topic.  The server
    /// hangs up after `unsubscribe`, or immediately when `reply` is `None`.
    fn spawn_bridge(reply: Option<Value>) -> (u16, std_mpsc::Receiver<Value>, JoinHandle<()>) {
        let (port_tx, port_rx) = std_mpsc::channel();
        let (frames_tx, frames_rx) = std_mpsc::channel();
        let server = thread::spawn(move || {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            rt.block_on(async move {
                let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
                port_tx.send(listener.local_addr().unwrap().port()).unwrap();
                let (stream, _) = listener.accept().await.unwrap();
                let mut ws = accept_async(stream).await.unwrap();
                let Some(reply) = reply else {
                    let _ = ws.close(None).await;
                    return;
                };
                while let Some(Ok(msg)) = ws.next().await {
                    let Message::Text(text) = msg else { continue };
                    let frame: Value = serde_json::from_str(text.as_str()).unwrap();
                    let _ = frames_tx.send(frame.clone());
                    match frame["op"].as_str() {
                        Some("subscribe") => {
                            let topic = frame["topic"].as_str().unwrap().to_string();
                            let out = rosbridge::publish_frame(&topic, &reply);
                            ws.send(Message::Text(out.into())).await.unwrap();
                        }
                        Some("unsubscribe") => break,
                        _ => {}
                    }
                }
            });
        });
        let port = port_rx.recv_timeout(WAIT).unwrap();
        (port, frames_rx, server)
    }

    fn no_op_disconnect() -> DisconnectCallback {
        Arc::new(|_| {})
    }

    #[test]
    fn subscribe_dispatches_published_messages() {
        let (port, frames, server) = spawn_bridge(Some(json!({ "data": "dynamic_002" })));
        let mut transport = RosbridgeTransport::new(format!("ws://127.0.0.1:{port}"));
        transport.connect(WAIT, no_op_disconnect()).unwrap();
        assert!(transport.is_connected());

        let (got_tx, got_rx) = std_mpsc::channel();
        transport
            .subscribe(
                "/ar/gaze_target",
                "std_msgs/String",
                Arc::new(move |msg: &Value| {
                    let _ = got_tx.send(msg.clone());
                }),
            )
            .unwrap();

        let sub = frames.recv_timeout(WAIT).unwrap();
        assert_eq!(sub["op"], "subscribe");
        assert_eq!(sub["topic"], "/ar/gaze_target");
        assert_eq!(sub["type"], "std_msgs/String");

        let msg = got_rx.recv_timeout(WAIT).unwrap();
        assert_eq!(msg["data"], "dynamic_002");

        transport.unsubscribe("/ar/gaze_target").unwrap();
        let unsub = frames.recv_timeout(WAIT).unwrap();
        assert_eq!(unsub["op"], "unsubscribe");
        assert_eq!(unsub["id"], sub["id"]);

        transport.close().unwrap();
        assert!(!transport.is_connected());
        server.join().unwrap();
    }

    #[test]
    fn dropped_link_fires_disconnect_callback() {
        let (port, _frames, server) = spawn_bridge(None);
        let mut transport = RosbridgeTransport::new(format!("ws://127.0.0.1:{port}"));
        let (lost_tx, lost_rx) = std_mpsc::channel();
        transport
            .connect(
                WAIT,
                Arc::new(move |reason| {
                    let _ = lost_tx.send(reason);
                }),
            )
            .unwrap();

        let reason = lost_rx.recv_timeout(WAIT).unwrap();
        assert!(!reason.is_empty());
        assert!(!transport.is_connected());
        server.join().unwrap();
    }

    #[test]
    fn connect_refused_is_connection_failed() {
        // Bind then release a port so nothing is listening on it.
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let mut transport = RosbridgeTransport::new(format!("ws://127.0.0.1:{port}"));
        let result = transport.connect(Duration::from_secs(2), no_op_disconnect());
        assert!(matches!(result, Err(SpatialError::ConnectionFailed(_))), "got {result:?}");
        assert!(!transport.is_connected());
    }

    #[test]
    fn connect_times_out_on_silent_peer() {
        // Accepts TCP (via the backlog) but never answers the handshake.
        let silent = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = silent.local_addr().unwrap().port();
        let mut transport = RosbridgeTransport::new(format!("ws://127.0.0.1:{port}"));

        let started = Instant::now();
        let result = transport.connect(Duration::from_millis(200), no_op_disconnect());
        assert!(matches!(result, Err(SpatialError::ConnectionFailed(_))), "got {result:?}");
        assert!(started.elapsed() < Duration::from_secs(2));
        drop(silent);
    }

    #[test]
    fn subscribe_without_connection_fails() {
        let mut transport = RosbridgeTransport::new("ws://127.0.0.1:1");
        let result = transport.subscribe("/t", "std_msgs/String", Arc::new(|_: &Value| {}));
        assert!(matches!(result, Err(SpatialError::Subscription { .. })));
    }

    #[test]
    fn close_and_unsubscribe_are_safe_when_never_connected() {
        let mut transport = RosbridgeTransport::new("ws://127.0.0.1:1");
        assert!(transport.unsubscribe("/t").is_ok());
        assert!(transport.close().is_ok());
        assert!(transport.close().is_ok());
    }

    #[test]
    fn connect_after_close_is_rejected() {
        let mut transport = RosbridgeTransport::new("ws://127.0.0.1:1");
        transport.close().unwrap();
        let result = transport.connect(Duration::from_millis(100), no_op_disconnect());
        assert_eq!(result, Err(SpatialError::Closed));
    }
}

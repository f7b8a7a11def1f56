//! [`SpatialPerceptionListener`] – gaze and pose state served to the design
//! agents.
//!
//! # Threads and locks
//!
//! | Lock | Held by | Protects |
//! |---|---|---|
//! | `link` | caller threads only | transport handle, lifecycle state |
//! | `perception` | callbacks and queries | gaze history, pose map |
//!
//! Callbacks run on the transport's thread and never touch `link`, so
//! [`cleanup`](SpatialPerceptionListener::cleanup) can take the transport out
//! of `link`, drop the lock, and unsubscribe without ever waiting on an
//! in-flight callback.  The `accepting` flag is read under `perception`, so
//! once cleanup has flipped it and passed through that lock no callback can
//! mutate state again.
//!
//! Snapshots are pushed to the output queue while `perception` is held, which
//! keeps queue order identical to the order batches were applied.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use gazelink_perception::gaze::{DEFAULT_MAX_EVENTS, DEFAULT_RETENTION};
use gazelink_perception::message::{parse_gaze, parse_pose_batch};
use gazelink_perception::{GazeHistory, PoseTracker};
use gazelink_types::{ConnectionState, ConnectionStatus, GazeSummary, Pose, PoseMap, SpatialError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::queue::PoseQueue;
use crate::transport::{DisconnectCallback, MessageCallback, RosbridgeTransport, Transport};

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    9090
}

fn default_gaze_topic() -> String {
    "/ar/gaze_target".to_string()
}

fn default_gaze_type() -> String {
    "std_msgs/String".to_string()
}

fn default_pose_topic() -> String {
    "/ar/object_poses".to_string()
}

fn default_pose_type() -> String {
    "ar_msgs/NamedPoseArray".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    3_000
}

fn default_retention_secs() -> f64 {
    DEFAULT_RETENTION.as_secs_f64()
}

fn default_max_history() -> usize {
    DEFAULT_MAX_EVENTS
}

fn default_gaze_window_secs() -> f64 {
    3.0
}

fn default_summary_window_secs() -> f64 {
    10.0
}

fn default_gaze_clear_sentinels() -> Vec<String> {
    vec!["None".to_string(), "none".to_string(), "null".to_string()]
}

/// Where to connect and how to interpret what arrives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListenerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_gaze_topic")]
    pub gaze_topic: String,
    #[serde(default = "default_gaze_type")]
    pub gaze_type: String,
    #[serde(default = "default_pose_topic")]
    pub pose_topic: String,
    #[serde(default = "default_pose_type")]
    pub pose_type: String,
    /// Upper bound on a single connection attempt.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Gaze events older than this (relative to the newest) are evicted.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: f64,
    #[serde(default = "default_max_history")]
    pub max_history: usize,
    /// Window used by [`SpatialPerceptionListener::recent_gaze`].
    #[serde(default = "default_gaze_window_secs")]
    pub gaze_window_secs: f64,
    /// Window used by [`SpatialPerceptionListener::gaze_summary`].
    #[serde(default = "default_summary_window_secs")]
    pub summary_window_secs: f64,
    /// Gaze payloads meaning "no element gazed", besides the empty string.
    #[serde(default = "default_gaze_clear_sentinels")]
    pub gaze_clear_sentinels: Vec<String>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            gaze_topic: default_gaze_topic(),
            gaze_type: default_gaze_type(),
            pose_topic: default_pose_topic(),
            pose_type: default_pose_type(),
            connect_timeout_ms: default_connect_timeout_ms(),
            retention_secs: default_retention_secs(),
            max_history: default_max_history(),
            gaze_window_secs: default_gaze_window_secs(),
            summary_window_secs: default_summary_window_secs(),
            gaze_clear_sentinels: default_gaze_clear_sentinels(),
        }
    }
}

impl ListenerConfig {
    /// WebSocket URL of the bridge.
    pub fn url(&self) -> String {
        format!("ws://{}:{}", self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn retention(&self) -> Duration {
        secs_or(self.retention_secs, DEFAULT_RETENTION)
    }

    pub fn gaze_window(&self) -> Duration {
        secs_or(self.gaze_window_secs, Duration::from_secs(3))
    }

    pub fn summary_window(&self) -> Duration {
        secs_or(self.summary_window_secs, Duration::from_secs(10))
    }
}

/// Negative, NaN and overflowing values fall back to `fallback`.
fn secs_or(value: f64, fallback: Duration) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(fallback)
}

// ────────────────────────────────────────────────────────────────────────────
// Shared state (reached from callbacks)
// ────────────────────────────────────────────────────────────────────────────

struct Perception {
    gaze: GazeHistory,
    poses: PoseTracker,
}

struct Shared {
    perception: Mutex<Perception>,
    output: Arc<PoseQueue>,
    /// Cleared by cleanup and on link loss; callbacks are no-ops while false.
    accepting: AtomicBool,
    /// Bumped on every connection attempt.  A disconnect callback only acts
    /// if it belongs to the current attempt.
    generation: AtomicU64,
    /// Reason reported by the transport for the last dropped link.
    link_lost: Mutex<Option<String>>,
    clear_sentinels: Vec<String>,
}

impl Shared {
    fn handle_gaze(&self, msg: &Value) {
        let received = Instant::now();
        let element = match parse_gaze(msg, &self.clear_sentinels) {
            Ok(element) => element,
            Err(e) => {
                warn!(error = %e, "dropping gaze message");
                return;
            }
        };

        let mut perception = lock(&self.perception);
        if !self.accepting.load(Ordering::SeqCst) {
            return;
        }
        debug!(element = ?element, "gaze");
        perception.gaze.record(element, received);
    }

    fn handle_poses(&self, msg: &Value) {
        let batch = match parse_pose_batch(msg) {
            Ok(batch) => batch,
            Err(e) => {
                warn!(error = %e, "dropping pose batch");
                return;
            }
        };

        let mut perception = lock(&self.perception);
        if !self.accepting.load(Ordering::SeqCst) {
            return;
        }
        match perception.poses.apply(&batch) {
            Ok(Some(snapshot)) => {
                debug!(updated = batch.len(), tracked = snapshot.len(), "pose batch applied");
                self.output.push(snapshot);
            }
            Ok(None) => debug!("empty pose batch"),
            Err(e) => warn!(error = %e, "dropping pose batch"),
        }
    }

    fn on_link_lost(&self, generation: u64, reason: String) {
        let mut perception = lock(&self.perception);
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!(generation, reason = %reason, "ignoring disconnect from a superseded connection");
            return;
        }
        info!(reason = %reason, "bridge link lost; perception state cleared");
        self.accepting.store(false, Ordering::SeqCst);
        perception.gaze.clear();
        perception.poses.clear();
        *lock(&self.link_lost) = Some(reason);
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Lifecycle state (caller threads only)
// ────────────────────────────────────────────────────────────────────────────

struct Link {
    /// `None` while a connection attempt is in flight and after cleanup.
    transport: Option<Box<dyn Transport>>,
    state: ConnectionState,
    transport_available: bool,
    connect_attempted: bool,
    gaze_subscribed: bool,
    pose_subscribed: bool,
    last_error: Option<String>,
    closed: bool,
}

/// Result of one connect + subscribe pass, folded back into [`Link`].
struct Attempt {
    connected: bool,
    transport_available: bool,
    gaze_subscribed: bool,
    pose_subscribed: bool,
    error: Option<String>,
}

// ────────────────────────────────────────────────────────────────────────────
// Listener
// ────────────────────────────────────────────────────────────────────────────

/// Subscribes to the headset's gaze and pose channels and answers "what is
/// the user looking at" and "where is everything" for the design agents.
///
/// Construction never fails: an unreachable bridge leaves the listener in a
/// degraded, disconnected state where every query returns empty results.
/// Inspect [`connection_status`](Self::connection_status) to find out why.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use gazelink_middleware::{ListenerConfig, PoseQueue, SpatialPerceptionListener};
///
/// let queue = Arc::new(PoseQueue::new());
/// let listener = SpatialPerceptionListener::new(ListenerConfig::default(), Arc::clone(&queue));
/// if let Some(element) = listener.recent_gaze() {
///     println!("user is looking at {element}");
/// }
/// while let Some(snapshot) = queue.pop() {
///     println!("{} elements tracked", snapshot.len());
/// }
/// listener.cleanup();
/// ```
pub struct SpatialPerceptionListener {
    config: ListenerConfig,
    url: String,
    shared: Arc<Shared>,
    link: Mutex<Link>,
}

impl SpatialPerceptionListener {
    /// Connect to the rosbridge endpoint in `config`, pushing pose snapshots
    /// to `output`.  Blocks for at most `config.connect_timeout()`.
    pub fn new(config: ListenerConfig, output: Arc<PoseQueue>) -> Self {
        let transport = Box::new(RosbridgeTransport::new(config.url()));
        Self::with_transport(config, output, transport)
    }

    /// Like [`new`](Self::new), over a caller-supplied transport.
    pub fn with_transport(config: ListenerConfig, output: Arc<PoseQueue>, transport: Box<dyn Transport>) -> Self {
        let url = transport.url().to_string();
        let shared = Arc::new(Shared {
            perception: Mutex::new(Perception {
                gaze: GazeHistory::new(config.retention(), config.max_history),
                poses: PoseTracker::new(),
            }),
            output,
            accepting: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            link_lost: Mutex::new(None),
            clear_sentinels: config.gaze_clear_sentinels.clone(),
        });
        let listener = Self {
            config,
            url,
            shared,
            link: Mutex::new(Link {
                transport: Some(transport),
                state: ConnectionState::Disconnected,
                transport_available: true,
                connect_attempted: false,
                gaze_subscribed: false,
                pose_subscribed: false,
                last_error: None,
                closed: false,
            }),
        };
        listener.establish();
        listener
    }

    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// The queue pose snapshots are pushed to.
    pub fn output_queue(&self) -> Arc<PoseQueue> {
        Arc::clone(&self.shared.output)
    }

    pub fn is_connected(&self) -> bool {
        let mut link = self.lock_link();
        self.refresh(&mut link);
        link.state == ConnectionState::Connected
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        let mut link = self.lock_link();
        self.refresh(&mut link);
        ConnectionStatus {
            transport_available: link.transport_available,
            connect_attempted: link.connect_attempted,
            client_exists: link.transport.is_some(),
            is_connected: link.state == ConnectionState::Connected,
            gaze_subscription_active: link.gaze_subscribed,
            pose_subscription_active: link.pose_subscribed,
            state: link.state,
            last_error: link.last_error.clone(),
            url: self.url.clone(),
        }
    }

    /// Element of the newest gaze event, however old.
    pub fn current_element(&self) -> Option<String> {
        self.perception().gaze.current_element().map(str::to_string)
    }

    /// Element of the newest gaze event if it is no older than `window`.
    pub fn most_recent_gaze(&self, window: Duration) -> Option<String> {
        let now = Instant::now();
        self.perception()
            .gaze
            .most_recent_within(window, now)
            .map(str::to_string)
    }

    /// [`most_recent_gaze`](Self::most_recent_gaze) over the configured gaze
    /// window (3 s by default).
    pub fn recent_gaze(&self) -> Option<String> {
        self.most_recent_gaze(self.config.gaze_window())
    }

    pub fn gaze_history_summary(&self, window: Duration) -> GazeSummary {
        let now = Instant::now();
        self.perception().gaze.summary(window, now)
    }

    /// [`gaze_history_summary`](Self::gaze_history_summary) over the
    /// configured summary window (10 s by default).
    pub fn gaze_summary(&self) -> GazeSummary {
        self.gaze_history_summary(self.config.summary_window())
    }

    /// Copy of the latest pose of every tracked element.
    pub fn latest_poses(&self) -> PoseMap {
        self.perception().poses.snapshot()
    }

    pub fn pose_of(&self, name: &str) -> Option<Pose> {
        self.perception().poses.get(name)
    }

    /// Forget all gaze history and poses.  Does not touch the output queue.
    pub fn reset(&self) {
        let mut perception = self.perception();
        perception.gaze.clear();
        perception.poses.clear();
        info!("perception state reset");
    }

    /// Retry the connect + subscribe sequence.  Returns whether the listener
    /// is connected afterwards; always `false` once cleaned up.
    pub fn reconnect(&self) -> bool {
        {
            let mut link = self.lock_link();
            if link.closed {
                debug!("reconnect ignored after cleanup");
                return false;
            }
            self.refresh(&mut link);
            if link.state == ConnectionState::Connected && link.gaze_subscribed && link.pose_subscribed {
                return true;
            }
        }
        self.establish();
        self.is_connected()
    }

    /// Unsubscribe both channels and close the transport.  Idempotent, and
    /// safe on a listener that never connected.  Errors are logged.
    pub fn cleanup(&self) {
        let transport = {
            let mut link = self.lock_link();
            if link.closed {
                return;
            }
            link.closed = true;
            link.state = ConnectionState::Disconnected;
            link.gaze_subscribed = false;
            link.pose_subscribed = false;
            self.shared.accepting.store(false, Ordering::SeqCst);
            link.transport.take()
        };

        {
            // Waits out any callback that read `accepting` before the flip.
            let mut perception = self.perception();
            perception.gaze.clear();
            perception.poses.clear();
        }

        if let Some(transport) = transport {
            self.release(transport);
        }
        info!(url = %self.url, "listener cleaned up");
    }

    // ── internals ──────────────────────────────────────────────────────────

    /// Connect and subscribe whatever is not yet subscribed.  The transport
    /// is taken out of `link` for the duration so a slow connect never holds
    /// the lock.
    fn establish(&self) {
        let (mut transport, generation, need_gaze, need_pose) = {
            let mut link = self.lock_link();
            if link.closed {
                return;
            }
            let Some(transport) = link.transport.take() else {
                debug!("connection attempt already in progress");
                return;
            };
            if !transport.is_connected() {
                link.gaze_subscribed = false;
                link.pose_subscribed = false;
            }
            link.state = ConnectionState::Connecting;
            link.connect_attempted = true;
            // Under `perception` so a disconnect callback for the previous
            // connection either finishes first or sees the new generation.
            let generation = {
                let _perception = self.perception();
                let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
                *lock(&self.shared.link_lost) = None;
                self.shared.accepting.store(true, Ordering::SeqCst);
                generation
            };
            (transport, generation, !link.gaze_subscribed, !link.pose_subscribed)
        };

        let attempt = self.connect_and_subscribe(transport.as_mut(), generation, need_gaze, need_pose);

        let mut link = self.lock_link();
        if link.closed {
            drop(link);
            self.release(transport);
            return;
        }
        link.transport_available = attempt.transport_available;
        link.gaze_subscribed |= attempt.gaze_subscribed;
        link.pose_subscribed |= attempt.pose_subscribed;
        link.last_error = attempt.error;
        link.state = if attempt.connected {
            ConnectionState::Connected
        } else {
            self.shared.accepting.store(false, Ordering::SeqCst);
            ConnectionState::Disconnected
        };
        link.transport = Some(transport);
    }

    fn connect_and_subscribe(
        &self,
        transport: &mut dyn Transport,
        generation: u64,
        need_gaze: bool,
        need_pose: bool,
    ) -> Attempt {
        let on_disconnect: DisconnectCallback = {
            let shared = Arc::clone(&self.shared);
            Arc::new(move |reason| shared.on_link_lost(generation, reason))
        };

        if let Err(e) = transport.connect(self.config.connect_timeout(), on_disconnect) {
            warn!(url = %self.url, error = %e, "could not connect to bridge; perception data unavailable");
            return Attempt {
                connected: false,
                transport_available: !matches!(e, SpatialError::TransportUnavailable(_)),
                gaze_subscribed: false,
                pose_subscribed: false,
                error: Some(e.to_string()),
            };
        }
        info!(url = %self.url, "connected");

        let mut errors = Vec::new();
        let mut subscribe = |topic: &str, message_type: &str, callback: MessageCallback| {
            match transport.subscribe(topic, message_type, callback) {
                Ok(()) => {
                    info!(topic = %topic, message_type = %message_type, "subscribed");
                    true
                }
                Err(e) => {
                    warn!(topic = %topic, error = %e, "subscription failed");
                    errors.push(e.to_string());
                    false
                }
            }
        };

        let gaze_subscribed = need_gaze && {
            let shared = Arc::clone(&self.shared);
            let callback: MessageCallback = Arc::new(move |msg: &Value| shared.handle_gaze(msg));
            subscribe(&self.config.gaze_topic, &self.config.gaze_type, callback)
        };
        let pose_subscribed = need_pose && {
            let shared = Arc::clone(&self.shared);
            let callback: MessageCallback = Arc::new(move |msg: &Value| shared.handle_poses(msg));
            subscribe(&self.config.pose_topic, &self.config.pose_type, callback)
        };

        Attempt {
            connected: true,
            transport_available: true,
            gaze_subscribed,
            pose_subscribed,
            error: (!errors.is_empty()).then(|| errors.join("; ")),
        }
    }

    fn release(&self, mut transport: Box<dyn Transport>) {
        for topic in [&self.config.gaze_topic, &self.config.pose_topic] {
            if let Err(e) = transport.unsubscribe(topic) {
                warn!(topic = %topic, error = %e, "unsubscribe failed");
            }
        }
        if let Err(e) = transport.close() {
            warn!(url = %self.url, error = %e, "closing transport failed");
        }
    }

    /// Fold a link loss reported by the transport into the lifecycle state.
    fn refresh(&self, link: &mut Link) {
        if link.state != ConnectionState::Connected {
            return;
        }
        let alive = link.transport.as_ref().is_some_and(|t| t.is_connected());
        if alive {
            return;
        }
        link.state = ConnectionState::Disconnected;
        link.gaze_subscribed = false;
        link.pose_subscribed = false;
        let reason = lock(&self.shared.link_lost).take();
        link.last_error = Some(reason.unwrap_or_else(|| "connection lost".to_string()));
    }

    fn lock_link(&self) -> MutexGuard<'_, Link> {
        lock(&self.link)
    }

    fn perception(&self) -> MutexGuard<'_, Perception> {
        lock(&self.shared.perception)
    }
}

impl Drop for SpatialPerceptionListener {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

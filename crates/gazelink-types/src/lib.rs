use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Placement of one tracked element, expressed in the host (CAD) convention.
///
/// Serialises exactly as the design-agent loop consumes it:
/// `{"position": [x, y, z], "quaternion": [w, x, y, z]}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: [f64; 3],
    pub quaternion: [f64; 4],
}

impl Pose {
    pub fn new(position: [f64; 3], quaternion: [f64; 4]) -> Self {
        Self {
            position,
            quaternion,
        }
    }
}

/// Latest known pose per element name.  A snapshot handed to the design-agent
/// loop is a fully owned clone of this map.
pub type PoseMap = HashMap<String, Pose>;

/// Lifecycle of the connection to the pub/sub bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// Diagnostic snapshot of the listener's connection, for callers and tests.
///
/// This is the only place connectivity problems surface; the query API just
/// returns "no data" while disconnected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    /// The transport client could be initialised at all.
    pub transport_available: bool,
    /// At least one connection attempt has been made.
    pub connect_attempted: bool,
    /// A transport client object is currently held.
    pub client_exists: bool,
    pub is_connected: bool,
    pub gaze_subscription_active: bool,
    pub pose_subscription_active: bool,
    pub state: ConnectionState,
    /// Most recent connection or subscription error, if any.
    pub last_error: Option<String>,
    /// Bridge endpoint, e.g. `ws://localhost:9090`.
    pub url: String,
}

/// Aggregate statistics over the gaze events inside a query window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GazeSummary {
    /// Every event in the window, "gaze cleared" events included.
    pub total_count: usize,
    /// Distinct element ids in the window.
    pub unique_element_count: usize,
    pub most_frequent_element: Option<String>,
    pub most_frequent_count: usize,
    /// Element ids in chronological order (oldest first), cleared events
    /// omitted.
    pub recent_sequence: Vec<String>,
}

/// Errors raised while ingesting or serving spatial perception data.
///
/// None of these cross from the producer thread to the consumer: the
/// listener logs them and resolves to "no update".
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SpatialError {
    #[error("Transport Unavailable: {0}")]
    TransportUnavailable(String),

    #[error("Connection Failed: {0}")]
    ConnectionFailed(String),

    #[error("Malformed Pose: {0}")]
    MalformedPose(String),

    #[error("Malformed Batch: {0}")]
    MalformedBatch(String),

    #[error("Malformed Gaze Message: {0}")]
    MalformedGaze(String),

    #[error("Subscription to {topic} failed: {reason}")]
    Subscription { topic: String, reason: String },

    #[error("Listener has been cleaned up")]
    Closed,

    #[error("Configuration Error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pose_serialises_in_output_queue_shape() {
        let pose = Pose::new([-0.5, 1.0, 0.0], [1.0, 0.0, 0.0, 0.0]);
        let json = serde_json::to_value(pose).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "position": [-0.5, 1.0, 0.0],
                "quaternion": [1.0, 0.0, 0.0, 0.0]
            })
        );
    }

    #[test]
    fn pose_map_snapshot_is_independent_copy() {
        let mut map = PoseMap::new();
        map.insert("dynamic_001".to_string(), Pose::new([1.0, 2.0, 3.0], [1.0, 0.0, 0.0, 0.0]));
        let mut snapshot = map.clone();
        snapshot.get_mut("dynamic_001").unwrap().position[0] = 99.0;
        assert!((map["dynamic_001"].position[0] - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn connection_state_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(ConnectionState::Disconnected.to_string(), "disconnected");
    }

    #[test]
    fn spatial_error_display() {
        let err = SpatialError::Subscription {
            topic: "/ar/gaze_target".to_string(),
            reason: "not connected".to_string(),
        };
        assert!(err.to_string().contains("/ar/gaze_target"));
        assert!(err.to_string().contains("not connected"));

        let err = SpatialError::MalformedBatch("2 names, 1 poses".to_string());
        assert!(err.to_string().contains("Malformed Batch"));
    }
}

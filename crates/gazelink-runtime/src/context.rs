//! [`ContextFeed`] – turns listener state into agent-ready spatial context.
//!
//! Each [`poll`](ContextFeed::poll) drains every pose snapshot queued since
//! the previous poll, keeps the newest, reads the gaze state and returns a
//! [`SpatialContext`].  Its [`Display`](std::fmt::Display) rendering is the
//! text block handed to the design agents:
//!
//! ```text
//! Spatial context at 2026-10-19T09:30:00.000Z (bridge connected)
//! Gazing at: dynamic_001 (seen within 3.0 s)
//!   position [-0.500, 1.000, 0.000] facing [1.000, 0.000, 0.000]
//! Gaze over last 10.0 s: 4 events, 2 elements, most frequent dynamic_001 (3x)
//!   sequence: dynamic_001 -> dynamic_002 -> dynamic_001 -> dynamic_001
//! Tracked elements (2, 1 new batch):
//!   dynamic_001 position [-0.500, 1.000, 0.000] quaternion [1.000, 0.000, 0.000, 0.000]
//!   dynamic_002 position [-1.000, 2.000, 0.000] quaternion [1.000, 0.000, 0.000, 0.000]
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use gazelink_middleware::{PoseQueue, SpatialPerceptionListener};
use gazelink_perception::Quaternion;
use gazelink_perception::convert::direction_from_quaternion;
use gazelink_types::{GazeSummary, Pose};
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Everything the design agents need to know about the user's attention and
/// the scene at one instant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpatialContext {
    pub generated_at: DateTime<Utc>,
    pub connected: bool,
    /// Newest gaze target, however old.
    pub current_element: Option<String>,
    /// Gaze target seen within `gaze_window_secs`.
    pub recent_gaze: Option<String>,
    pub gaze_window_secs: f64,
    pub summary: GazeSummary,
    pub summary_window_secs: f64,
    /// Pose of `recent_gaze`, when it is tracked.
    pub gazed_pose: Option<Pose>,
    /// Unit forward vector of `gazed_pose`.
    pub gazed_facing: Option<[f64; 3]>,
    /// Sorted by name so renderings are stable.
    pub poses: BTreeMap<String, Pose>,
    /// Pose snapshots drained from the queue for this context.
    pub drained_batches: usize,
}

impl SpatialContext {
    /// Structured form for agents that consume JSON.
    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}

fn vec3(v: &[f64; 3]) -> String {
    format!("[{:.3}, {:.3}, {:.3}]", v[0], v[1], v[2])
}

fn quat(q: &[f64; 4]) -> String {
    format!("[{:.3}, {:.3}, {:.3}, {:.3}]", q[0], q[1], q[2], q[3])
}

impl fmt::Display for SpatialContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Spatial context at {} (bridge {})",
            self.generated_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            if self.connected { "connected" } else { "disconnected" }
        )?;

        match &self.recent_gaze {
            Some(element) => {
                writeln!(f, "Gazing at: {element} (seen within {:.1} s)", self.gaze_window_secs)?;
                if let Some(pose) = &self.gazed_pose {
                    write!(f, "  position {}", vec3(&pose.position))?;
                    if let Some(facing) = &self.gazed_facing {
                        write!(f, " facing {}", vec3(facing))?;
                    }
                    writeln!(f)?;
                }
            }
            None => writeln!(f, "Gazing at: nothing (within {:.1} s)", self.gaze_window_secs)?,
        }

        let s = &self.summary;
        write!(
            f,
            "Gaze over last {:.1} s: {} events, {} elements",
            self.summary_window_secs, s.total_count, s.unique_element_count
        )?;
        match &s.most_frequent_element {
            Some(element) => writeln!(f, ", most frequent {element} ({}x)", s.most_frequent_count)?,
            None => writeln!(f)?,
        }
        if !s.recent_sequence.is_empty() {
            writeln!(f, "  sequence: {}", s.recent_sequence.join(" -> "))?;
        }

        writeln!(
            f,
            "Tracked elements ({}, {} new batch{}):",
            self.poses.len(),
            self.drained_batches,
            if self.drained_batches == 1 { "" } else { "es" }
        )?;
        for (name, pose) in &self.poses {
            writeln!(f, "  {name} position {} quaternion {}", vec3(&pose.position), quat(&pose.quaternion))?;
        }
        Ok(())
    }
}

/// Builds [`SpatialContext`] values from an injected listener and the queue
/// it pushes pose snapshots to.
pub struct ContextFeed {
    listener: Arc<SpatialPerceptionListener>,
    queue: Arc<PoseQueue>,
}

impl ContextFeed {
    pub fn new(listener: Arc<SpatialPerceptionListener>, queue: Arc<PoseQueue>) -> Self {
        Self { listener, queue }
    }

    pub fn listener(&self) -> &Arc<SpatialPerceptionListener> {
        &self.listener
    }

    /// Drain pending snapshots and assemble a context.
    ///
    /// The newest drained snapshot supplies the pose table.  With nothing
    /// queued, the listener's current map is used instead.
    pub fn poll(&self) -> SpatialContext {
        let drained = self.queue.drain();
        let drained_batches = drained.len();
        let poses: BTreeMap<String, Pose> = match drained.into_iter().last() {
            Some(newest) => newest.into_iter().collect(),
            None => self.listener.latest_poses().into_iter().collect(),
        };

        let config = self.listener.config();
        let recent_gaze = self.listener.recent_gaze();
        let gazed_pose = recent_gaze.as_deref().and_then(|e| poses.get(e).copied());
        let gazed_facing = gazed_pose.and_then(|p| {
            let [w, x, y, z] = p.quaternion;
            direction_from_quaternion(Quaternion::new(w, x, y, z))
                .ok()
                .map(|d| d.to_array())
        });

        let context = SpatialContext {
            generated_at: Utc::now(),
            connected: self.listener.is_connected(),
            current_element: self.listener.current_element(),
            recent_gaze,
            gaze_window_secs: config.gaze_window().as_secs_f64(),
            summary: self.listener.gaze_summary(),
            summary_window_secs: config.summary_window().as_secs_f64(),
            gazed_pose,
            gazed_facing,
            poses,
            drained_batches,
        };
        debug!(
            gaze = ?context.recent_gaze,
            tracked = context.poses.len(),
            drained = drained_batches,
            "context assembled"
        );
        context
    }

    /// Poll every `period` and hand each context to `sink` until `shutdown`
    /// is set.  Returns the number of contexts produced.
    pub async fn run<F>(&self, period: Duration, shutdown: Arc<AtomicBool>, mut sink: F) -> usize
    where
        F: FnMut(SpatialContext),
    {
        let mut ticker = tokio::time::interval(period.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut produced = 0;
        loop {
            ticker.tick().await;
            if shutdown.load(Ordering::SeqCst) {
                break;
            }
            sink(self.poll());
            produced += 1;
        }
        info!(produced, "context feed stopped");
        produced
    }
}

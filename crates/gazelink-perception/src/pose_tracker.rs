//! [`PoseTracker`] – latest known pose per tracked element.
//!
//! Batches are applied all-or-nothing: every pose in a batch is converted to
//! the host convention first, and the map is only touched once the whole
//! batch has converted cleanly.  An update for an existing element replaces
//! its entry wholesale.

use gazelink_types::{Pose, PoseMap, SpatialError};

use crate::convert::sensor_to_host;
use crate::message::PoseBatch;

#[derive(Debug, Default)]
pub struct PoseTracker {
    poses: PoseMap,
}

impl PoseTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convert and apply `batch`, returning a snapshot of the full updated
    /// map.  An empty batch changes nothing and yields `None`.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError::MalformedPose`] if any pose fails conversion;
    /// the map is left untouched in that case.
    pub fn apply(&mut self, batch: &PoseBatch) -> Result<Option<PoseMap>, SpatialError> {
        if batch.is_empty() {
            return Ok(None);
        }
        let converted = batch
            .entries
            .iter()
            .map(|(name, pose)| {
                sensor_to_host(*pose)
                    .map(|host| (name.clone(), host))
                    .map_err(|e| SpatialError::MalformedPose(format!("'{name}': {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        for (name, pose) in converted {
            self.poses.insert(name, pose);
        }
        Ok(Some(self.poses.clone()))
    }

    /// Owned copy of the map.
    pub fn snapshot(&self) -> PoseMap {
        self.poses.clone()
    }

    pub fn get(&self, name: &str) -> Option<Pose> {
        self.poses.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.poses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.poses.is_empty()
    }

    pub fn clear(&mut self) {
        self.poses.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::{Quaternion, SensorPose, Vec3};

    fn batch(entries: &[(&str, SensorPose)]) -> PoseBatch {
        PoseBatch {
            entries: entries.iter().map(|(n, p)| (n.to_string(), *p)).collect(),
        }
    }

    fn pose(x: f64, y: f64, z: f64) -> SensorPose {
        SensorPose::new(Vec3::new(x, y, z), Quaternion::identity())
    }

    #[test]
    fn apply_converts_and_snapshots_whole_map() {
        let mut tracker = PoseTracker::new();
        let snapshot = tracker
            .apply(&batch(&[("dynamic_001", pose(1.0, 0.5, 0.0)), ("dynamic_002", pose(2.0, 1.0, 0.0))]))
            .unwrap()
            .unwrap();

        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot["dynamic_001"], Pose::new([-0.5, 1.0, 0.0], [1.0, 0.0, 0.0, 0.0]));
        assert_eq!(snapshot["dynamic_002"], Pose::new([-1.0, 2.0, 0.0], [1.0, 0.0, 0.0, 0.0]));
    }

    #[test]
    fn update_replaces_not_merges() {
        let mut tracker = PoseTracker::new();
        let a = SensorPose::new(Vec3::new(1.0, 2.0, 3.0), Quaternion::new(0.5, 0.5, 0.5, 0.5));
        let b = pose(4.0, 5.0, 6.0);
        tracker.apply(&batch(&[("e", a)])).unwrap();
        tracker.apply(&batch(&[("e", b)])).unwrap();

        let expected = sensor_to_host(b).unwrap();
        assert_eq!(tracker.get("e"), Some(expected));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn snapshots_include_untouched_elements() {
        let mut tracker = PoseTracker::new();
        tracker.apply(&batch(&[("a", pose(1.0, 0.0, 0.0))])).unwrap();
        let snapshot = tracker.apply(&batch(&[("b", pose(0.0, 1.0, 0.0))])).unwrap().unwrap();
        assert!(snapshot.contains_key("a"));
        assert!(snapshot.contains_key("b"));
    }

    #[test]
    fn failed_conversion_leaves_map_untouched() {
        let mut tracker = PoseTracker::new();
        tracker.apply(&batch(&[("a", pose(1.0, 0.0, 0.0))])).unwrap();
        let before = tracker.snapshot();

        let result = tracker.apply(&batch(&[
            ("a", pose(9.0, 9.0, 9.0)),
            ("bad", pose(f64::NAN, 0.0, 0.0)),
        ]));
        assert!(matches!(result, Err(SpatialError::MalformedPose(_))));
        assert_eq!(tracker.snapshot(), before);
    }

    #[test]
    fn snapshot_is_independent_of_tracker() {
        let mut tracker = PoseTracker::new();
        tracker.apply(&batch(&[("a", pose(1.0, 0.0, 0.0))])).unwrap();
        let mut copy = tracker.snapshot();
        copy.clear();
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn empty_batch_yields_no_snapshot() {
        let mut tracker = PoseTracker::new();
        tracker.apply(&batch(&[("a", pose(1.0, 0.0, 0.0))])).unwrap();
        assert_eq!(tracker.apply(&batch(&[])).unwrap(), None);
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn clear_empties_map() {
        let mut tracker = PoseTracker::new();
        tracker.apply(&batch(&[("a", pose(1.0, 0.0, 0.0))])).unwrap();
        tracker.clear();
        assert!(tracker.is_empty());
        assert_eq!(tracker.get("a"), None);
    }
}

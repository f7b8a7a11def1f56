//! Typed parsing of inbound bridge payloads.
//!
//! Payloads arrive as untyped JSON (`msg` of a rosbridge `publish` frame).
//! They are parsed here, once, into typed values so nothing downstream
//! handles raw `serde_json::Value`s.
//!
//! | Channel | Payload |
//! |---|---|
//! | gaze | `{"data": "<element id>"}` (`std_msgs/String`) |
//! | poses | `{"names": [..], "poses": [{"position": {x,y,z}, "orientation": {x,y,z,w}}, ..]}` |

use gazelink_types::SpatialError;
use serde::Deserialize;
use serde_json::Value;

use crate::convert::{Quaternion, SensorPose, Vec3};

#[derive(Debug, Deserialize)]
struct WireVector {
    x: f64,
    y: f64,
    z: f64,
}

#[derive(Debug, Deserialize)]
struct WireQuaternion {
    x: f64,
    y: f64,
    z: f64,
    w: f64,
}

#[derive(Debug, Deserialize)]
struct WirePose {
    position: WireVector,
    orientation: WireQuaternion,
}

#[derive(Debug, Deserialize)]
struct WireBatch {
    names: Vec<String>,
    poses: Vec<Value>,
}

/// A validated pose batch: one sensor-convention pose per element name.
#[derive(Debug, Clone, PartialEq)]
pub struct PoseBatch {
    pub entries: Vec<(String, SensorPose)>,
}

impl PoseBatch {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Parse a pose-batch payload.
///
/// # Errors
///
/// * [`SpatialError::MalformedBatch`] – the payload is not a batch object, or
///   `names` and `poses` differ in length.
/// * [`SpatialError::MalformedPose`] – one pose record is missing a field or
///   carries a non-numeric value.  The whole batch is rejected.
pub fn parse_pose_batch(msg: &Value) -> Result<PoseBatch, SpatialError> {
    let batch: WireBatch = serde_json::from_value(msg.clone())
        .map_err(|e| SpatialError::MalformedBatch(format!("invalid batch payload: {e}")))?;

    if batch.names.len() != batch.poses.len() {
        return Err(SpatialError::MalformedBatch(format!(
            "{} names but {} poses",
            batch.names.len(),
            batch.poses.len()
        )));
    }

    let entries = batch
        .names
        .into_iter()
        .zip(batch.poses)
        .map(|(name, raw)| {
            let pose = parse_pose(&raw)
                .map_err(|e| SpatialError::MalformedPose(format!("pose for '{name}': {e}")))?;
            Ok((name, pose))
        })
        .collect::<Result<Vec<_>, SpatialError>>()?;

    Ok(PoseBatch { entries })
}

/// Parse a single `{position, orientation}` record.  The wire orientation
/// order (x, y, z, w) is reordered to (w, x, y, z) here.
pub fn parse_pose(raw: &Value) -> Result<SensorPose, SpatialError> {
    let wire: WirePose = serde_json::from_value(raw.clone())
        .map_err(|e| SpatialError::MalformedPose(e.to_string()))?;
    let WirePose {
        position,
        orientation,
    } = wire;
    Ok(SensorPose::new(
        Vec3::new(position.x, position.y, position.z),
        Quaternion::from_xyzw(orientation.x, orientation.y, orientation.z, orientation.w),
    ))
}

/// Parse a gaze payload into an element id.
///
/// Returns `Ok(None)` when the payload is empty or matches one of
/// `clear_sentinels` ("no object currently gazed").
///
/// # Errors
///
/// Returns [`SpatialError::MalformedGaze`] if `data` is missing or is not a
/// string.
pub fn parse_gaze(msg: &Value, clear_sentinels: &[String]) -> Result<Option<String>, SpatialError> {
    let data = msg
        .get("data")
        .and_then(Value::as_str)
        .ok_or_else(|| SpatialError::MalformedGaze(format!("expected string 'data' in {msg}")))?;

    let element = data.trim();
    if element.is_empty() || clear_sentinels.iter().any(|s| s == element) {
        return Ok(None);
    }
    Ok(Some(element.to_string()))
}

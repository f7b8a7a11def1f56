//! Sensor → host coordinate and rotation conversion.
//!
//! The AR headset reports positions and orientations in its own axis
//! convention; the CAD host expects a different one.  The two differ by an
//! axis remap:
//!
//! ```text
//! position:    host = (-sensor.y, sensor.x, sensor.z)
//! orientation: host = (sensor.w, -sensor.z, sensor.x, sensor.y)   // (w, x, y, z)
//! ```
//!
//! Both mappings are exact permutations with one sign flip, so they preserve
//! vector length and quaternion norm, and each has an algebraic inverse
//! ([`host_to_sensor_position`], [`host_to_sensor_orientation`]).
//!
//! # Example
//!
//! ```rust
//! use gazelink_perception::convert::{sensor_to_host_position, Vec3};
//!
//! let host = sensor_to_host_position(Vec3::new(1.0, 0.5, 0.0));
//! assert_eq!(host, Vec3::new(-0.5, 1.0, 0.0));
//! ```

use gazelink_types::{Pose, SpatialError};

// ────────────────────────────────────────────────────────────────────────────
// Primitive types
// ────────────────────────────────────────────────────────────────────────────

/// A 3-D vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    pub fn norm(self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    pub fn to_array(self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }
}

/// A quaternion in (w, x, y, z) order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quaternion {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Quaternion {
    /// Create a quaternion.  Rotation helpers expect |q| = 1; use
    /// [`Quaternion::normalized`] when the source is not trusted.
    pub fn new(w: f64, x: f64, y: f64, z: f64) -> Self {
        Self { w, x, y, z }
    }

    /// The identity rotation.
    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0)
    }

    /// Build from the wire field order (x, y, z, w).
    pub fn from_xyzw(x: f64, y: f64, z: f64, w: f64) -> Self {
        Self::new(w, x, y, z)
    }

    pub fn norm(self) -> f64 {
        (self.w * self.w + self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    pub fn is_finite(self) -> bool {
        self.w.is_finite() && self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    /// Scale to unit norm.  Returns `None` for a zero or non-finite
    /// quaternion, which encodes no rotation at all.
    pub fn normalized(self) -> Option<Self> {
        let n = self.norm();
        if !n.is_finite() || n < f64::EPSILON {
            return None;
        }
        Some(Self::new(self.w / n, self.x / n, self.y / n, self.z / n))
    }

    /// Hamilton product: compose two rotations.
    pub fn mul(self, rhs: Self) -> Self {
        Self::new(
            self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
            self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
        )
    }

    /// Conjugate (== inverse for a unit quaternion).
    pub fn conjugate(self) -> Self {
        Self::new(self.w, -self.x, -self.y, -self.z)
    }

    /// Rotate a vector by this quaternion: p' = q * p * q*.
    pub fn rotate(self, v: Vec3) -> Vec3 {
        let p = Self::new(0.0, v.x, v.y, v.z);
        let rotated = self.mul(p).mul(self.conjugate());
        Vec3::new(rotated.x, rotated.y, rotated.z)
    }

    pub fn to_array(self) -> [f64; 4] {
        [self.w, self.x, self.y, self.z]
    }
}

/// A pose as received from the headset, still in the sensor convention.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorPose {
    pub position: Vec3,
    pub orientation: Quaternion,
}

impl SensorPose {
    pub fn new(position: Vec3, orientation: Quaternion) -> Self {
        Self {
            position,
            orientation,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Convention conversion
// ────────────────────────────────────────────────────────────────────────────

/// Sensor position → host position: swap X/Y, negate the new X.
pub fn sensor_to_host_position(p: Vec3) -> Vec3 {
    Vec3::new(-p.y, p.x, p.z)
}

/// Inverse of [`sensor_to_host_position`].
pub fn host_to_sensor_position(p: Vec3) -> Vec3 {
    Vec3::new(p.y, -p.x, p.z)
}

/// Sensor orientation → host orientation.  The scalar part is unchanged.
pub fn sensor_to_host_orientation(q: Quaternion) -> Quaternion {
    Quaternion::new(q.w, -q.z, q.x, q.y)
}

/// Inverse of [`sensor_to_host_orientation`].
pub fn host_to_sensor_orientation(q: Quaternion) -> Quaternion {
    Quaternion::new(q.w, q.y, q.z, -q.x)
}

/// Convert a full sensor pose into the host [`Pose`].
///
/// # Errors
///
/// Returns [`SpatialError::MalformedPose`] if any component is not finite.
pub fn sensor_to_host(pose: SensorPose) -> Result<Pose, SpatialError> {
    if !pose.position.is_finite() || !pose.orientation.is_finite() {
        return Err(SpatialError::MalformedPose(format!(
            "non-finite component in {pose:?}"
        )));
    }
    let position = sensor_to_host_position(pose.position);
    let orientation = sensor_to_host_orientation(pose.orientation);
    Ok(Pose::new(position.to_array(), orientation.to_array()))
}

// ────────────────────────────────────────────────────────────────────────────
// Direction from quaternion
// ────────────────────────────────────────────────────────────────────────────

/// Reference axis rotated by [`direction_from_quaternion`]: local +X, the
/// "forward" axis of the ROS REP-103 body frame.
pub const FORWARD_AXIS: Vec3 = Vec3 {
    x: 1.0,
    y: 0.0,
    z: 0.0,
};

/// Unit direction obtained by rotating [`FORWARD_AXIS`] by `q`.
///
/// `q` is normalised first so slightly drifted sensor quaternions still give
/// a unit vector.
///
/// # Errors
///
/// Returns [`SpatialError::MalformedPose`] for a zero or non-finite
/// quaternion.
pub fn direction_from_quaternion(q: Quaternion) -> Result<Vec3, SpatialError> {
    let unit = q.normalized().ok_or_else(|| {
        SpatialError::MalformedPose(format!("quaternion {q:?} has no defined rotation"))
    })?;
    Ok(unit.rotate(FORWARD_AXIS))
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::{FRAC_1_SQRT_2, FRAC_PI_8};

    fn sample_unit_quaternions() -> Vec<Quaternion> {
        let raw = [
            (1.0, 0.0, 0.0, 0.0),
            (FRAC_1_SQRT_2, 0.0, 0.0, FRAC_1_SQRT_2),
            (0.5, 0.5, 0.5, 0.5),
            (0.1, -0.7, 0.3, 0.2),
            (-0.3, 0.2, -0.9, 0.05),
            (0.0, 0.0, 1.0, 0.0),
        ];
        raw.iter()
            .map(|&(w, x, y, z)| Quaternion::new(w, x, y, z).normalized().unwrap())
            .collect()
    }

    // ── Position ────────────────────────────────────────────────────────────

    #[test]
    fn position_axis_remap() {
        let host = sensor_to_host_position(Vec3::new(1.0, 0.5, 0.0));
        assert_eq!(host, Vec3::new(-0.5, 1.0, 0.0));

        let host = sensor_to_host_position(Vec3::new(2.0, 1.0, 3.0));
        assert_eq!(host, Vec3::new(-1.0, 2.0, 3.0));
    }

    #[test]
    fn position_inverse_round_trip() {
        let samples = [
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.25, -3.5, 7.0),
            Vec3::new(-1e6, 2e-6, 42.0),
            Vec3::new(0.333, 0.666, -0.999),
        ];
        for v in samples {
            let back = host_to_sensor_position(sensor_to_host_position(v));
            assert!((back.x - v.x).abs() < 1e-9);
            assert!((back.y - v.y).abs() < 1e-9);
            assert!((back.z - v.z).abs() < 1e-9);
        }
    }

    #[test]
    fn position_conversion_preserves_length() {
        let v = Vec3::new(3.0, -4.0, 12.0);
        assert!((sensor_to_host_position(v).norm() - 13.0).abs() < 1e-12);
    }

    // ── Orientation ─────────────────────────────────────────────────────────

    #[test]
    fn orientation_component_permutation() {
        let q = Quaternion::new(0.1, 0.2, 0.3, 0.4);
        let host = sensor_to_host_orientation(q);
        assert_eq!(host, Quaternion::new(0.1, -0.4, 0.2, 0.3));
    }

    #[test]
    fn orientation_identity_stays_identity() {
        let host = sensor_to_host_orientation(Quaternion::identity());
        assert_eq!(host.to_array(), [1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn orientation_conversion_preserves_unit_norm() {
        for q in sample_unit_quaternions() {
            let host = sensor_to_host_orientation(q);
            assert!((host.norm() - 1.0).abs() < 1e-6, "norm drifted for {q:?}");
        }
    }

    #[test]
    fn orientation_inverse_round_trip() {
        for q in sample_unit_quaternions() {
            let back = host_to_sensor_orientation(sensor_to_host_orientation(q));
            assert!((back.w - q.w).abs() < 1e-12);
            assert!((back.x - q.x).abs() < 1e-12);
            assert!((back.y - q.y).abs() < 1e-12);
            assert!((back.z - q.z).abs() < 1e-12);
        }
    }

    #[test]
    fn from_xyzw_reorders_wire_fields() {
        let q = Quaternion::from_xyzw(0.1, 0.2, 0.3, 0.9);
        assert_eq!(q.to_array(), [0.9, 0.1, 0.2, 0.3]);
    }

    #[test]
    fn sensor_to_host_builds_pose() {
        let pose = sensor_to_host(SensorPose::new(
            Vec3::new(1.0, 0.5, 0.0),
            Quaternion::identity(),
        ))
        .unwrap();
        assert_eq!(pose.position, [-0.5, 1.0, 0.0]);
        assert_eq!(pose.quaternion, [1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn sensor_to_host_rejects_non_finite() {
        let result = sensor_to_host(SensorPose::new(
            Vec3::new(f64::NAN, 0.0, 0.0),
            Quaternion::identity(),
        ));
        assert!(matches!(result, Err(SpatialError::MalformedPose(_))));

        let result = sensor_to_host(SensorPose::new(
            Vec3::zero(),
            Quaternion::new(f64::INFINITY, 0.0, 0.0, 0.0),
        ));
        assert!(matches!(result, Err(SpatialError::MalformedPose(_))));
    }

    // ── Quaternion algebra ──────────────────────────────────────────────────

    #[test]
    fn quaternion_conjugate_is_inverse() {
        let q = Quaternion::new(FRAC_1_SQRT_2, 0.0, 0.0, FRAC_1_SQRT_2);
        let prod = q.mul(q.conjugate());
        assert!((prod.w - 1.0).abs() < 1e-12);
        assert!(prod.x.abs() < 1e-12);
        assert!(prod.y.abs() < 1e-12);
        assert!(prod.z.abs() < 1e-12);
    }

    #[test]
    fn normalized_rejects_zero_quaternion() {
        assert!(Quaternion::new(0.0, 0.0, 0.0, 0.0).normalized().is_none());
    }

    // ── Direction ───────────────────────────────────────────────────────────

    #[test]
    fn direction_identity_is_forward_axis() {
        let d = direction_from_quaternion(Quaternion::identity()).unwrap();
        assert!((d.x - 1.0).abs() < 1e-12);
        assert!(d.y.abs() < 1e-12);
        assert!(d.z.abs() < 1e-12);
    }

    #[test]
    fn direction_has_unit_magnitude() {
        for q in sample_unit_quaternions() {
            let d = direction_from_quaternion(q).unwrap();
            assert!((d.norm() - 1.0).abs() < 1e-6, "|d| != 1 for {q:?}");
        }
    }

    #[test]
    fn direction_normalises_drifted_input() {
        let d = direction_from_quaternion(Quaternion::new(2.0, 0.0, 0.0, 0.0)).unwrap();
        assert!((d.norm() - 1.0).abs() < 1e-9);
    }

    /// Pinned sample: 45° yaw about +Z, as streamed by the headset in
    /// (x, y, z, w) order.  Guards the +X reference-axis choice.
    #[test]
    fn direction_pinned_yaw_sample() {
        let q = Quaternion::from_xyzw(0.0, 0.0, FRAC_PI_8.sin(), FRAC_PI_8.cos());
        let d = direction_from_quaternion(q).unwrap();
        assert!((d.x - FRAC_1_SQRT_2).abs() < 1e-9, "x={}", d.x);
        assert!((d.y - FRAC_1_SQRT_2).abs() < 1e-9, "y={}", d.y);
        assert!(d.z.abs() < 1e-9, "z={}", d.z);
    }

    #[test]
    fn direction_rejects_zero_quaternion() {
        let result = direction_from_quaternion(Quaternion::new(0.0, 0.0, 0.0, 0.0));
        assert!(matches!(result, Err(SpatialError::MalformedPose(_))));
    }
}

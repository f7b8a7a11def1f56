//! `gazelink-perception` – spatial math and state for AR perception data.
//!
//! Everything here is transport-agnostic and single-threaded; the listener in
//! `gazelink-middleware` wraps it in locks and feeds it from the bridge.
//!
//! # Modules
//!
//! - [`convert`] – [`Vec3`][convert::Vec3] / [`Quaternion`][convert::Quaternion]
//!   and the pure sensor → host convention conversions.
//! - [`message`] – typed parsing of inbound gaze and pose-batch payloads.
//! - [`gaze`] – [`GazeHistory`][gaze::GazeHistory]: bounded, time-windowed
//!   record of gaze events.
//! - [`pose_tracker`] – [`PoseTracker`][pose_tracker::PoseTracker]: the
//!   latest-pose map with all-or-nothing batch application.

pub mod convert;
pub mod gaze;
pub mod message;
pub mod pose_tracker;

pub use convert::{Quaternion, SensorPose, Vec3};
pub use gaze::{GazeEvent, GazeHistory};
pub use message::PoseBatch;
pub use pose_tracker::PoseTracker;

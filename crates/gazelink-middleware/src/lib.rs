//! `gazelink-middleware` – the bridge between the AR headset and the host.
//!
//! Ingests gaze and pose traffic from a `rosbridge_server` WebSocket, runs it
//! through `gazelink-perception`, and serves the resulting state to the
//! design-agent loop.
//!
//! # Modules
//!
//! - [`rosbridge`] – rosbridge v2 JSON framing (subscribe / unsubscribe /
//!   publish).
//! - [`transport`] – the [`Transport`] seam and [`RosbridgeTransport`], a
//!   WebSocket client whose callbacks run on its own I/O thread.
//! - [`queue`] – [`PoseQueue`], the thread-safe FIFO of pose-map snapshots
//!   shared with the consumer.
//! - [`listener`] – [`SpatialPerceptionListener`], the object the rest of the
//!   system talks to.

pub mod listener;
pub mod queue;
pub mod rosbridge;
pub mod transport;

pub use listener::{ListenerConfig, SpatialPerceptionListener};
pub use queue::PoseQueue;
pub use transport::{DisconnectCallback, MessageCallback, RosbridgeTransport, Transport};

//! `gazelink-runtime` – the consumer side of the perception pipeline.
//!
//! # Modules
//!
//! - [`context`] – [`ContextFeed`][context::ContextFeed]: drains pose
//!   snapshots from the shared queue, queries the listener's gaze state, and
//!   assembles a [`SpatialContext`][context::SpatialContext] ready to be
//!   rendered into a design-agent prompt.  Runs on demand
//!   ([`poll`][context::ContextFeed::poll]) or as a Tokio loop
//!   ([`run`][context::ContextFeed::run]).
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: installs the
//!   global `tracing` subscriber with an optional OTLP span exporter.  Set
//!   `OTEL_EXPORTER_OTLP_ENDPOINT` to ship spans to any OTLP collector.

pub mod context;
pub mod telemetry;

pub use context::{ContextFeed, SpatialContext};
pub use telemetry::{LogFormat, TracerProviderGuard, init_tracing};

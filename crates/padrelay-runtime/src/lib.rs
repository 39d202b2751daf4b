//! `padrelay-runtime` – the relay pipelines.
//!
//! # Modules
//!
//! - [`debounce`] – [`DebounceRegistry`][debounce::DebounceRegistry] and
//!   [`KeyedDebouncer`][debounce::KeyedDebouncer]: one debounce worker per
//!   controller key, emitting the last value of each burst after a quiet
//!   period.
//! - [`producer`] – [`ProducerPipeline`][producer::ProducerPipeline]: reads
//!   the controller and feeds the registry.
//! - [`consumer`] – [`ConsumerPipeline`][consumer::ConsumerPipeline]: pulls
//!   display grids from a subscription, applies them, acknowledges them.
//! - [`applier`] – [`StateApplier`][applier::StateApplier]: reset-then-paint
//!   application of one grid.
//! - [`forwarder`] – [`HitForwarder`][forwarder::HitForwarder]: publishes
//!   grid button presses immediately.
//! - [`grid_publisher`] – [`GridPublisher`][grid_publisher::GridPublisher]:
//!   publishes a grid only when it differs from the previous one.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: `tracing`
//!   subscriber set-up with optional OTLP export.
//!
//! # Delivery semantics
//!
//! Publishing and acknowledging are fire-and-forget.  Neither pipeline waits
//! for the bus to confirm anything, and nothing lost on the way is retried
//! by the pipelines themselves: the bus's at-least-once redelivery and the
//! idempotent grid application make the system converge.

pub mod applier;
pub mod consumer;
pub mod debounce;
pub mod forwarder;
pub mod grid_publisher;
pub mod producer;
pub mod telemetry;

pub use applier::{ApplyReport, StateApplier};
pub use consumer::{BatchReport, ConsumerPipeline, ConsumerState, resolve_subscription};
pub use debounce::{DebounceRegistry, DebounceState, EventSink, KeyedDebouncer};
pub use forwarder::HitForwarder;
pub use grid_publisher::GridPublisher;
pub use producer::ProducerPipeline;
pub use telemetry::{LogFormat, TelemetryConfig, TracerProviderGuard, init_tracing, init_tracing_with};

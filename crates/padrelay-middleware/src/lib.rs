//! `padrelay-middleware` – the message bus boundary.
//!
//! Moves opaque byte payloads between the producer and consumer agents
//! without caring about their meaning.
//!
//! # Modules
//!
//! - [`adapter`] – the [`MessageBus`] trait: publish / pull / acknowledge
//!   with at-least-once semantics.
//! - [`bus`] – [`InMemoryBus`], an in-process topic/subscription bus with
//!   ack deadlines and redelivery.
//! - [`publisher`] – [`Publisher`], the fire-and-forget serialize-and-publish
//!   adapter bound to one topic.

pub mod adapter;
pub mod bus;
pub mod publisher;

pub use adapter::MessageBus;
pub use bus::InMemoryBus;
pub use publisher::Publisher;

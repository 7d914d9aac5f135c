//! A thread based pub/sub subscription core
//!
//! This crate implements the subscription half of a messaging client: the
//! state machine that buffers inbound messages for a subject and delivers
//! them either asynchronously, via a handler running on a dedicated worker
//! thread, or synchronously, via a blocking fetch. It enforces bounded-buffer
//! backpressure, auto-unsubscribe delivery caps and cooperative teardown
//! across connection closure.
//!
//! Wire I/O to an actual server — framing, authentication, reconnection — is
//! out of scope; it is represented by the [`Transport`] trait so the core
//! can be exercised on its own.

pub use ripple_proto as proto;

mod connection;
mod subscription;
mod timer;

pub mod error;

pub use crate::connection::{
    Connection, ConnectionBuilder, ConnectionOptions, LoopbackTransport, Transport,
};
pub use crate::subscription::Subscription;

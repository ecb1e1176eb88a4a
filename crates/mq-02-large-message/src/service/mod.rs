//! Service Layer
//!
//! Producer-side sending under a credit window, broker-side receiving and
//! spooling, and reading bodies back out for consumers.

pub mod consumer;
pub mod producer;
pub mod receiver;
pub mod streamer;
pub mod window;

#[cfg(test)]
mod tests;

pub use consumer::LargeMessageConsumer;
pub use producer::{LargeMessageProducer, SendReceipt};
pub use receiver::ChunkReceiver;
pub use streamer::{BodyFrames, BodyStreamer};
pub use window::CreditWindow;

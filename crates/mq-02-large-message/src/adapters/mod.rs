//! Adapters Layer
//!
//! - `in_vm` - producer and broker in the same process

pub mod in_vm;

pub use in_vm::InVmChunkSink;

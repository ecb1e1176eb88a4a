//! Domain Layer
//!
//! Chunk frames, body segmentation and consumer-side reassembly. Nothing
//! here touches the paging layer or suspends.

pub mod buffer;
pub mod config;
pub mod errors;
pub mod frame;
pub mod splitter;

pub use buffer::{BufferProgress, LargeMessageBuffer};
pub use config::{
    LargeMessageConfig, DEFAULT_CONFIRMATION_WINDOW_SIZE, DEFAULT_CONSUMER_BUFFER_LIMIT,
    DEFAULT_MIN_LARGE_MESSAGE_SIZE,
};
pub use errors::{LargeMessageError, LargeMessageResult};
pub use frame::{ChunkFrame, LargeMessageHeader, TransferId};
pub use splitter::ChunkSplitter;

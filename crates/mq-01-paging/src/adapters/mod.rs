//! Adapters Layer
//!
//! - `file` - paging directory on the local filesystem
//! - `memory` - in-process directories with fault injection, for tests
//! - `lock` - exclusive ownership of a paging directory (feature `locking`)

pub mod file;
#[cfg(feature = "locking")]
pub mod lock;
pub mod memory;

pub use file::{FilePagingStoreFactory, FileSequentialFile, FileSequentialFileFactory};
#[cfg(feature = "locking")]
pub use lock::{DirectoryLock, LockError};
pub use memory::{
    FaultInjector, InMemoryPagingStoreFactory, InMemorySequentialFile,
    InMemorySequentialFileFactory,
};

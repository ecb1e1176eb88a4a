//! # Outbound Ports (Driven Ports)
//!
//! Storage abstractions the paging subsystem depends on. Production uses the
//! filesystem adapters; tests use the in-memory adapters with fault injection.

use shared_types::Address;
use std::io;
use std::sync::Arc;

/// An append-only file with positional reads.
///
/// A file must be opened before reads or writes. Opening an already open
/// file is a no-op.
pub trait SequentialFile: Send + Sync {
    /// File name within its directory.
    fn name(&self) -> &str;

    fn open(&mut self) -> io::Result<()>;

    fn is_open(&self) -> bool;

    fn close(&mut self) -> io::Result<()>;

    /// Close and remove the file. Deleting a missing file succeeds.
    fn delete(&mut self) -> io::Result<()>;

    /// Append `bytes`, returning the offset they were written at.
    fn write(&mut self, bytes: &[u8], sync: bool) -> io::Result<u64>;

    /// Read exactly `len` bytes starting at `position`.
    fn read(&mut self, position: u64, len: usize) -> io::Result<Vec<u8>>;

    /// Read the whole file.
    fn read_all(&mut self) -> io::Result<Vec<u8>> {
        let size = self.size()?;
        self.read(0, size as usize)
    }

    fn size(&self) -> io::Result<u64>;

    /// Cut the file down to `len` bytes.
    fn truncate(&mut self, len: u64) -> io::Result<()>;

    fn sync(&mut self) -> io::Result<()>;
}

/// Creates and enumerates files within one directory.
pub trait SequentialFileFactory: Send + Sync {
    /// Handle for `name`. The file is created on first `open`.
    fn create_file(&self, name: &str) -> Box<dyn SequentialFile>;

    /// Names of files with the given extension (without the dot), sorted.
    fn list_files(&self, extension: &str) -> io::Result<Vec<String>>;

    fn exists(&self, name: &str) -> bool;

    /// Atomically replace `to` with `from`.
    fn rename(&self, from: &str, to: &str) -> io::Result<()>;

    /// Human-readable location for logs.
    fn directory(&self) -> String;
}

/// Provides the directories a paging manager works in.
///
/// One directory per address holds that address's page files and cursor
/// checkpoints; two shared directories hold transaction records and large
/// message bodies.
pub trait PagingStoreFactory: Send + Sync {
    /// File factory for an address, creating its directory if needed.
    fn new_file_factory(&self, address: &Address) -> io::Result<Arc<dyn SequentialFileFactory>>;

    /// Addresses that have a directory.
    fn list_addresses(&self) -> io::Result<Vec<Address>>;

    /// Remove an address directory and everything in it.
    fn remove_address(&self, address: &Address) -> io::Result<()>;

    fn transaction_file_factory(&self) -> io::Result<Arc<dyn SequentialFileFactory>>;

    fn large_message_file_factory(&self) -> io::Result<Arc<dyn SequentialFileFactory>>;

    /// Release anything held for the lifetime of the factory.
    fn stop(&self) {}
}

/// Directory name for an address: `addr-<hex>`.
pub fn address_directory_name(address: &Address) -> String {
    format!("addr-{}", hex::encode(address.as_str()))
}

/// Inverse of [`address_directory_name`].
pub fn address_from_directory_name(name: &str) -> Option<Address> {
    let encoded = name.strip_prefix("addr-")?;
    let bytes = hex::decode(encoded).ok()?;
    let text = String::from_utf8(bytes).ok()?;
    Address::new(text).ok()
}

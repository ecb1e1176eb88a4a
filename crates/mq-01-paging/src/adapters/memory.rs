//! # In-Memory Adapters
//!
//! Volatile implementations of the file ports for tests. Contents outlive
//! any single manager as long as the factory is kept, so a test can stop a
//! manager and reload from the same "disk".
//!
//! [`FaultInjector`] makes writes, syncs or reads fail on demand.

use parking_lot::Mutex;
use shared_types::Address;
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::ports::outbound::{
    address_directory_name, address_from_directory_name, PagingStoreFactory, SequentialFile,
    SequentialFileFactory,
};

type Contents = Arc<Mutex<Vec<u8>>>;

/// Switchable failures shared by every file of a factory.
#[derive(Debug, Default)]
pub struct FaultInjector {
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
    writes: AtomicU64,
}

impl FaultInjector {
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    fn check_write(&self, name: &str) -> io::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("injected write failure on {}", name),
            ));
        }
        Ok(())
    }

    fn check_read(&self, name: &str) -> io::Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("injected read failure on {}", name),
            ));
        }
        Ok(())
    }
}

pub struct InMemorySequentialFile {
    name: String,
    files: Arc<Mutex<BTreeMap<String, Contents>>>,
    contents: Option<Contents>,
    faults: Arc<FaultInjector>,
}

impl InMemorySequentialFile {
    fn contents(&self) -> io::Result<&Contents> {
        self.contents.as_ref().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotConnected,
                format!("{} is not open", self.name),
            )
        })
    }
}

impl SequentialFile for InMemorySequentialFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self) -> io::Result<()> {
        if self.contents.is_some() {
            return Ok(());
        }
        let contents = self
            .files
            .lock()
            .entry(self.name.clone())
            .or_default()
            .clone();
        self.contents = Some(contents);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.contents.is_some()
    }

    fn close(&mut self) -> io::Result<()> {
        self.contents = None;
        Ok(())
    }

    fn delete(&mut self) -> io::Result<()> {
        self.faults.check_write(&self.name)?;
        self.contents = None;
        self.files.lock().remove(&self.name);
        Ok(())
    }

    fn write(&mut self, bytes: &[u8], _sync: bool) -> io::Result<u64> {
        self.faults.check_write(&self.name)?;
        let mut data = self.contents()?.lock();
        let offset = data.len() as u64;
        data.extend_from_slice(bytes);
        self.faults.writes.fetch_add(1, Ordering::SeqCst);
        Ok(offset)
    }

    fn read(&mut self, position: u64, len: usize) -> io::Result<Vec<u8>> {
        self.faults.check_read(&self.name)?;
        let data = self.contents()?.lock();
        let start = position as usize;
        let end = start.checked_add(len).filter(|end| *end <= data.len());
        match end {
            Some(end) => Ok(data[start..end].to_vec()),
            None => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("read past end of {}", self.name),
            )),
        }
    }

    fn size(&self) -> io::Result<u64> {
        match &self.contents {
            Some(contents) => Ok(contents.lock().len() as u64),
            None => Ok(self
                .files
                .lock()
                .get(&self.name)
                .map(|c| c.lock().len() as u64)
                .unwrap_or(0)),
        }
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.faults.check_write(&self.name)?;
        self.contents()?.lock().truncate(len as usize);
        Ok(())
    }

    fn sync(&mut self) -> io::Result<()> {
        self.faults.check_write(&self.name)?;
        self.contents().map(|_| ())
    }
}

/// One in-memory directory.
#[derive(Default)]
pub struct InMemorySequentialFileFactory {
    name: String,
    files: Arc<Mutex<BTreeMap<String, Contents>>>,
    faults: Arc<FaultInjector>,
}

impl InMemorySequentialFileFactory {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_faults(name, Arc::new(FaultInjector::default()))
    }

    pub fn with_faults(name: impl Into<String>, faults: Arc<FaultInjector>) -> Self {
        Self {
            name: name.into(),
            files: Arc::default(),
            faults,
        }
    }

    pub fn faults(&self) -> &Arc<FaultInjector> {
        &self.faults
    }

    /// Raw contents of a file, for tests that corrupt data on purpose.
    pub fn raw(&self, name: &str) -> Option<Vec<u8>> {
        self.files.lock().get(name).map(|c| c.lock().clone())
    }

    pub fn set_raw(&self, name: &str, bytes: Vec<u8>) {
        let mut files = self.files.lock();
        let contents = files.entry(name.to_string()).or_default();
        *contents.lock() = bytes;
    }

    pub fn file_names(&self) -> Vec<String> {
        self.files.lock().keys().cloned().collect()
    }
}

impl SequentialFileFactory for InMemorySequentialFileFactory {
    fn create_file(&self, name: &str) -> Box<dyn SequentialFile> {
        Box::new(InMemorySequentialFile {
            name: name.to_string(),
            files: self.files.clone(),
            contents: None,
            faults: self.faults.clone(),
        })
    }

    fn list_files(&self, extension: &str) -> io::Result<Vec<String>> {
        let suffix = format!(".{}", extension);
        Ok(self
            .files
            .lock()
            .keys()
            .filter(|name| name.ends_with(&suffix))
            .cloned()
            .collect())
    }

    fn exists(&self, name: &str) -> bool {
        self.files.lock().contains_key(name)
    }

    fn rename(&self, from: &str, to: &str) -> io::Result<()> {
        self.faults.check_write(from)?;
        let mut files = self.files.lock();
        let contents = files.remove(from).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("{} not found", from))
        })?;
        files.insert(to.to_string(), contents);
        Ok(())
    }

    fn directory(&self) -> String {
        format!("mem://{}", self.name)
    }
}

/// In-memory paging directories. Clone the `Arc` to "restart" on the same data.
#[derive(Default)]
pub struct InMemoryPagingStoreFactory {
    directories: Mutex<HashMap<String, Arc<InMemorySequentialFileFactory>>>,
    faults: Arc<FaultInjector>,
}

impl InMemoryPagingStoreFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn faults(&self) -> &Arc<FaultInjector> {
        &self.faults
    }

    /// Directory for `name`, created on first use.
    pub fn directory(&self, name: &str) -> Arc<InMemorySequentialFileFactory> {
        self.directories
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(InMemorySequentialFileFactory::with_faults(
                    name,
                    self.faults.clone(),
                ))
            })
            .clone()
    }

    pub fn address_directory(&self, address: &Address) -> Arc<InMemorySequentialFileFactory> {
        self.directory(&address_directory_name(address))
    }
}

impl PagingStoreFactory for InMemoryPagingStoreFactory {
    fn new_file_factory(&self, address: &Address) -> io::Result<Arc<dyn SequentialFileFactory>> {
        Ok(self.address_directory(address))
    }

    fn list_addresses(&self) -> io::Result<Vec<Address>> {
        let mut addresses: Vec<Address> = self
            .directories
            .lock()
            .keys()
            .filter_map(|name| address_from_directory_name(name))
            .collect();
        addresses.sort();
        Ok(addresses)
    }

    fn remove_address(&self, address: &Address) -> io::Result<()> {
        self.directories
            .lock()
            .remove(&address_directory_name(address));
        Ok(())
    }

    fn transaction_file_factory(&self) -> io::Result<Arc<dyn SequentialFileFactory>> {
        Ok(self.directory(super::file::TRANSACTIONS_DIR))
    }

    fn large_message_file_factory(&self) -> io::Result<Arc<dyn SequentialFileFactory>> {
        Ok(self.directory(super::file::LARGE_MESSAGES_DIR))
    }
}

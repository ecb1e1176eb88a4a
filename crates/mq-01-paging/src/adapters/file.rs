//! # Filesystem Adapters
//!
//! `std::fs` implementations of the file ports.
//!
//! ```text
//! <root>/
//!   LOCK
//!   addr-<hex>/0000000001.page, cursors as <hex>.cursor
//!   transactions/<id>.tx
//!   large-messages/<id>.msg
//! ```

use shared_types::Address;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::ports::outbound::{
    address_directory_name, address_from_directory_name, PagingStoreFactory, SequentialFile,
    SequentialFileFactory,
};

#[cfg(feature = "locking")]
use super::lock::DirectoryLock;

/// Directory holding transaction records.
pub const TRANSACTIONS_DIR: &str = "transactions";

/// Directory holding large message bodies.
pub const LARGE_MESSAGES_DIR: &str = "large-messages";

/// A file on disk accessed through a single handle.
pub struct FileSequentialFile {
    path: PathBuf,
    name: String,
    file: Option<File>,
}

impl FileSequentialFile {
    fn new(dir: &Path, name: &str) -> Self {
        Self {
            path: dir.join(name),
            name: name.to_string(),
            file: None,
        }
    }

    fn handle(&mut self) -> io::Result<&mut File> {
        let name = &self.name;
        self.file.as_mut().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, format!("{} is not open", name))
        })
    }
}

impl SequentialFile for FileSequentialFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self) -> io::Result<()> {
        if self.file.is_some() {
            return Ok(());
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)?;
        self.file = Some(file);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.file.is_some()
    }

    fn close(&mut self) -> io::Result<()> {
        if let Some(file) = self.file.take() {
            file.sync_data()?;
        }
        Ok(())
    }

    fn delete(&mut self) -> io::Result<()> {
        self.file = None;
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    fn write(&mut self, bytes: &[u8], sync: bool) -> io::Result<u64> {
        let file = self.handle()?;
        let offset = file.seek(SeekFrom::End(0))?;
        file.write_all(bytes)?;
        if sync {
            file.sync_data()?;
        }
        Ok(offset)
    }

    fn read(&mut self, position: u64, len: usize) -> io::Result<Vec<u8>> {
        let file = self.handle()?;
        file.seek(SeekFrom::Start(position))?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn size(&self) -> io::Result<u64> {
        match &self.file {
            Some(file) => Ok(file.metadata()?.len()),
            None => match fs::metadata(&self.path) {
                Ok(meta) => Ok(meta.len()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
                Err(e) => Err(e),
            },
        }
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        let file = self.handle()?;
        file.set_len(len)?;
        file.sync_all()
    }

    fn sync(&mut self) -> io::Result<()> {
        self.handle()?.sync_data()
    }
}

/// Files in one directory on disk.
pub struct FileSequentialFileFactory {
    dir: PathBuf,
}

impl FileSequentialFileFactory {
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }
}

impl SequentialFileFactory for FileSequentialFileFactory {
    fn create_file(&self, name: &str) -> Box<dyn SequentialFile> {
        Box::new(FileSequentialFile::new(&self.dir, name))
    }

    fn list_files(&self, extension: &str) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(extension) {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn exists(&self, name: &str) -> bool {
        self.dir.join(name).exists()
    }

    fn rename(&self, from: &str, to: &str) -> io::Result<()> {
        fs::rename(self.dir.join(from), self.dir.join(to))
    }

    fn directory(&self) -> String {
        self.dir.display().to_string()
    }
}

/// Paging directories rooted at one path on disk.
pub struct FilePagingStoreFactory {
    root: PathBuf,
    #[cfg(feature = "locking")]
    lock: parking_lot::Mutex<Option<DirectoryLock>>,
}

impl FilePagingStoreFactory {
    /// Create the root directory and take the process lock on it.
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;

        #[cfg(feature = "locking")]
        let lock = DirectoryLock::acquire(&root)
            .map_err(|e| io::Error::new(io::ErrorKind::WouldBlock, e.to_string()))?;

        tracing::info!("[mq-01] 📁 Paging directory {}", root.display());
        Ok(Self {
            root,
            #[cfg(feature = "locking")]
            lock: parking_lot::Mutex::new(Some(lock)),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl PagingStoreFactory for FilePagingStoreFactory {
    fn new_file_factory(&self, address: &Address) -> io::Result<Arc<dyn SequentialFileFactory>> {
        let dir = self.root.join(address_directory_name(address));
        Ok(Arc::new(FileSequentialFileFactory::new(dir)?))
    }

    fn list_addresses(&self) -> io::Result<Vec<Address>> {
        let mut addresses = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            if let Some(address) = name.to_str().and_then(address_from_directory_name) {
                addresses.push(address);
            }
        }
        addresses.sort();
        Ok(addresses)
    }

    fn remove_address(&self, address: &Address) -> io::Result<()> {
        match fs::remove_dir_all(self.root.join(address_directory_name(address))) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    fn transaction_file_factory(&self) -> io::Result<Arc<dyn SequentialFileFactory>> {
        Ok(Arc::new(FileSequentialFileFactory::new(
            self.root.join(TRANSACTIONS_DIR),
        )?))
    }

    fn large_message_file_factory(&self) -> io::Result<Arc<dyn SequentialFileFactory>> {
        Ok(Arc::new(FileSequentialFileFactory::new(
            self.root.join(LARGE_MESSAGES_DIR),
        )?))
    }

    fn stop(&self) {
        #[cfg(feature = "locking")]
        self.lock.lock().take();
    }
}

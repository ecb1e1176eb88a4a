//! # Large Message Body Files
//!
//! Bodies too big to travel inline are spooled to `large-messages/<id>.msg`
//! and referenced from the message by id. A body file lives until the last
//! reference to its message is acknowledged, its page is reclaimed, or its
//! transaction rolls back.

use shared_types::MessageId;
use std::collections::HashSet;
use std::sync::Arc;

use crate::domain::errors::{PagingError, PagingResult};
use crate::ports::outbound::{SequentialFile, SequentialFileFactory};

pub const BODY_EXTENSION: &str = "msg";

pub struct LargeBodyStore {
    files: Arc<dyn SequentialFileFactory>,
}

impl LargeBodyStore {
    pub fn new(files: Arc<dyn SequentialFileFactory>) -> Self {
        Self { files }
    }

    pub fn file_name(id: MessageId) -> String {
        format!("{:020}.{}", id.0, BODY_EXTENSION)
    }

    fn parse_file_name(name: &str) -> Option<MessageId> {
        name.strip_suffix(".msg")?.parse().ok().map(MessageId)
    }

    /// Create an empty body file, replacing any leftover with the same id.
    pub fn create(&self, id: MessageId) -> PagingResult<Box<dyn SequentialFile>> {
        let name = Self::file_name(id);
        let mut file = self.files.create_file(&name);
        file.open().map_err(|e| PagingError::io(&name, e))?;
        if file.size().map_err(|e| PagingError::io(&name, e))? > 0 {
            file.truncate(0).map_err(|e| PagingError::io(&name, e))?;
        }
        Ok(file)
    }

    /// Open an existing body for reading.
    pub fn open(&self, id: MessageId) -> PagingResult<Box<dyn SequentialFile>> {
        let name = Self::file_name(id);
        if !self.files.exists(&name) {
            return Err(PagingError::corruption(&name, "large message body is missing"));
        }
        let mut file = self.files.create_file(&name);
        file.open().map_err(|e| PagingError::io(&name, e))?;
        Ok(file)
    }

    pub fn exists(&self, id: MessageId) -> bool {
        self.files.exists(&Self::file_name(id))
    }

    pub fn delete(&self, id: MessageId) -> PagingResult<()> {
        let name = Self::file_name(id);
        self.files
            .create_file(&name)
            .delete()
            .map_err(|e| PagingError::io(&name, e))
    }

    /// Delete, logging instead of failing. Used on release paths.
    pub fn delete_quietly(&self, id: MessageId) {
        if let Err(e) = self.delete(id) {
            tracing::warn!("[mq-01] Failed to delete large message body {}: {}", id, e);
        }
    }

    pub fn list(&self) -> PagingResult<Vec<MessageId>> {
        let names = self
            .files
            .list_files(BODY_EXTENSION)
            .map_err(|e| PagingError::io(self.files.directory(), e))?;
        Ok(names
            .iter()
            .filter_map(|n| Self::parse_file_name(n))
            .collect())
    }

    /// Remove body files that nothing references. Returns the removed ids.
    pub fn sweep_orphans(&self, referenced: &HashSet<MessageId>) -> PagingResult<Vec<MessageId>> {
        let mut removed = Vec::new();
        for id in self.list()? {
            if !referenced.contains(&id) {
                self.delete(id)?;
                removed.push(id);
            }
        }
        if !removed.is_empty() {
            tracing::info!(
                "[mq-01] 🧹 Removed {} orphaned large message bodies",
                removed.len()
            );
        }
        Ok(removed)
    }
}

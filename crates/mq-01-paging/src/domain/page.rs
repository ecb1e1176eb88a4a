//! # Page
//!
//! One append-only page file of an address. Records are addressed by their
//! ordinal (`message_nr`) within the page.
//!
//! Reloading a page reads record headers only. A record cut short by a
//! crash is truncated away; only the tail of a file can be torn because
//! writes are appends. A header that fails its checksum is corruption,
//! wherever it sits.

use shared_types::{MessageId, TransactionId};

use super::errors::{PagingError, PagingResult};
use super::record::{
    decode_page_record, PagedMessage, RecordHeader, MAX_RECORD_LEN, PAGE_MAGIC,
    RECORD_HEADER_LEN,
};
use crate::ports::outbound::{SequentialFile, SequentialFileFactory};

/// Extension of page files.
pub const PAGE_EXTENSION: &str = "page";

/// Where a record sits in its page file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryMeta {
    pub offset: u64,
    pub record_len: u64,
    pub message_id: MessageId,
    pub tx_id: Option<TransactionId>,
    pub large_body: Option<MessageId>,
}

pub struct Page {
    number: u64,
    file: Box<dyn SequentialFile>,
    entries: Vec<EntryMeta>,
    size: u64,
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("number", &self.number)
            .field("messages", &self.entries.len())
            .field("size", &self.size)
            .finish()
    }
}

impl Page {
    /// `0000000042.page`
    pub fn file_name(number: u64) -> String {
        format!("{:010}.{}", number, PAGE_EXTENSION)
    }

    pub fn parse_file_name(name: &str) -> Option<u64> {
        name.strip_suffix(".page")?.parse().ok()
    }

    /// Create a new, empty page file.
    pub fn create(number: u64, factory: &dyn SequentialFileFactory) -> PagingResult<Self> {
        let name = Self::file_name(number);
        let mut file = factory.create_file(&name);
        file.open().map_err(|e| PagingError::io(&name, e))?;
        if file.size().map_err(|e| PagingError::io(&name, e))? > 0 {
            file.truncate(0).map_err(|e| PagingError::io(&name, e))?;
        }
        file.write(PAGE_MAGIC, false)
            .map_err(|e| PagingError::io(&name, e))?;
        Ok(Self {
            number,
            file,
            entries: Vec::new(),
            size: PAGE_MAGIC.len() as u64,
        })
    }

    /// Open an existing page file and index its records.
    ///
    /// Returns the page and the number of torn bytes cut from its tail. The
    /// tail is torn when fewer bytes than a header remain, or when an intact
    /// header describes a record that runs past the end of the file.
    pub fn load(number: u64, factory: &dyn SequentialFileFactory) -> PagingResult<(Self, u64)> {
        let name = Self::file_name(number);
        let mut file = factory.create_file(&name);
        file.open().map_err(|e| PagingError::io(&name, e))?;
        let file_size = file.size().map_err(|e| PagingError::io(&name, e))?;

        if file_size < PAGE_MAGIC.len() as u64 {
            file.truncate(0).map_err(|e| PagingError::io(&name, e))?;
            file.write(PAGE_MAGIC, true)
                .map_err(|e| PagingError::io(&name, e))?;
            let page = Self {
                number,
                file,
                entries: Vec::new(),
                size: PAGE_MAGIC.len() as u64,
            };
            return Ok((page, file_size));
        }

        let magic = file
            .read(0, PAGE_MAGIC.len())
            .map_err(|e| PagingError::io(&name, e))?;
        if magic.as_slice() != PAGE_MAGIC {
            return Err(PagingError::corruption(&name, "invalid page magic"));
        }

        let mut entries = Vec::new();
        let mut at = PAGE_MAGIC.len() as u64;
        while at + RECORD_HEADER_LEN as u64 <= file_size {
            let bytes = file
                .read(at, RECORD_HEADER_LEN)
                .map_err(|e| PagingError::io(&name, e))?;
            let Some(header) = RecordHeader::decode(&bytes) else {
                return Err(PagingError::corruption(
                    &name,
                    format!("record header checksum mismatch at offset {}", at),
                ));
            };
            if header.payload_len > MAX_RECORD_LEN {
                return Err(PagingError::corruption(
                    &name,
                    format!(
                        "record of {} bytes at offset {} exceeds the maximum",
                        header.payload_len, at
                    ),
                ));
            }
            if at + header.record_len() > file_size {
                break;
            }
            entries.push(EntryMeta {
                offset: at,
                record_len: header.record_len(),
                message_id: header.message_id,
                tx_id: header.tx_id,
                large_body: header.large_body,
            });
            at += header.record_len();
        }

        let torn = file_size - at;
        if torn > 0 {
            tracing::warn!(
                "[mq-01] Truncating {} torn bytes from {} in {}",
                torn,
                name,
                factory.directory()
            );
            file.truncate(at).map_err(|e| PagingError::io(&name, e))?;
        }

        Ok((
            Self {
                number,
                file,
                entries,
                size: at,
            },
            torn,
        ))
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn message_count(&self) -> u32 {
        self.entries.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bytes on disk, including the magic header.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn entry(&self, message_nr: u32) -> Option<&EntryMeta> {
        self.entries.get(message_nr as usize)
    }

    pub fn entries(&self) -> &[EntryMeta] {
        &self.entries
    }

    /// Whether appending `record_len` more bytes should roll to a new page.
    ///
    /// An empty page always takes the record, so oversize records get a
    /// page of their own.
    pub fn is_full_for(&self, record_len: u64, page_size: u64) -> bool {
        !self.entries.is_empty() && self.size + record_len > page_size
    }

    /// Append `record`, the encoding of `entry`; returns its ordinal.
    pub fn append(
        &mut self,
        record: &[u8],
        entry: &PagedMessage,
        sync: bool,
    ) -> PagingResult<u32> {
        let offset = self
            .file
            .write(record, sync)
            .map_err(|e| PagingError::io(self.file.name(), e))?;
        let message_nr = self.entries.len() as u32;
        self.entries.push(EntryMeta {
            offset,
            record_len: record.len() as u64,
            message_id: entry.message.id,
            tx_id: entry.tx_id,
            large_body: entry.message.body.large_ref().map(|b| b.id),
        });
        self.size += record.len() as u64;
        Ok(message_nr)
    }

    /// Read and verify one record.
    pub fn read(&mut self, message_nr: u32) -> PagingResult<PagedMessage> {
        let meta = *self.entry(message_nr).ok_or_else(|| {
            PagingError::corruption(
                self.file.name(),
                format!("no message {} in page {}", message_nr, self.number),
            )
        })?;
        let record = self
            .file
            .read(meta.offset, meta.record_len as usize)
            .map_err(|e| PagingError::io(self.file.name(), e))?;
        decode_page_record(self.file.name(), &record)
    }

    #[cfg(test)]
    pub fn read_all(&mut self) -> PagingResult<Vec<PagedMessage>> {
        (0..self.message_count()).map(|nr| self.read(nr)).collect()
    }

    pub fn sync(&mut self) -> PagingResult<()> {
        self.file
            .sync()
            .map_err(|e| PagingError::io(self.file.name(), e))
    }

    pub fn close(&mut self) -> PagingResult<()> {
        self.file
            .close()
            .map_err(|e| PagingError::io(self.file.name(), e))
    }

    /// Reopen after [`close`](Self::close).
    pub fn reopen(&mut self) -> PagingResult<()> {
        if self.file.is_open() {
            return Ok(());
        }
        self.file
            .open()
            .map_err(|e| PagingError::io(self.file.name(), e))
    }

    pub fn delete(&mut self) -> PagingResult<()> {
        self.file
            .delete()
            .map_err(|e| PagingError::io(self.file.name(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemorySequentialFileFactory;
    use crate::domain::record::encode_page_record;
    use shared_types::{Address, Message};

    fn entry(id: u64, body: usize) -> PagedMessage {
        PagedMessage {
            message: Message::new(MessageId(id), Address::new("a").unwrap(), vec![1; body]),
            tx_id: None,
        }
    }

    fn append(page: &mut Page, entry: &PagedMessage) -> u32 {
        let record = encode_page_record(entry).unwrap();
        page.append(&record, entry, false).unwrap()
    }

    #[test]
    fn test_file_names_sort_numerically() {
        assert_eq!(Page::file_name(7), "0000000007.page");
        assert_eq!(Page::parse_file_name("0000000007.page"), Some(7));
        assert_eq!(Page::parse_file_name("x.cursor"), None);
        assert!(Page::file_name(9) < Page::file_name(10));
    }

    #[test]
    fn test_append_then_read_by_ordinal() {
        let factory = InMemorySequentialFileFactory::new("p");
        let mut page = Page::create(1, &factory).unwrap();
        assert_eq!(append(&mut page, &entry(10, 20)), 0);
        assert_eq!(append(&mut page, &entry(11, 20)), 1);

        assert_eq!(page.read(1).unwrap().message.id, MessageId(11));
        assert_eq!(page.message_count(), 2);
        assert!(page.read(2).is_err());
    }

    #[test]
    fn test_reload_indexes_headers() {
        let factory = InMemorySequentialFileFactory::new("p");
        let mut page = Page::create(4, &factory).unwrap();
        let mut tagged = entry(2, 8);
        tagged.tx_id = Some(TransactionId(77));
        append(&mut page, &entry(1, 8));
        append(&mut page, &tagged);
        let size = page.size();
        drop(page);

        let (mut reloaded, torn) = Page::load(4, &factory).unwrap();
        assert_eq!(torn, 0);
        assert_eq!(reloaded.size(), size);
        assert_eq!(reloaded.entry(1).unwrap().tx_id, Some(TransactionId(77)));
        assert_eq!(reloaded.read_all().unwrap().len(), 2);
    }

    #[test]
    fn test_torn_tail_is_truncated() {
        let factory = InMemorySequentialFileFactory::new("p");
        let mut page = Page::create(1, &factory).unwrap();
        append(&mut page, &entry(1, 50));
        let good = page.size();
        drop(page);

        let name = Page::file_name(1);
        let mut bytes = factory.raw(&name).unwrap();
        let partial = encode_page_record(&entry(2, 50)).unwrap();
        bytes.extend_from_slice(&partial[..partial.len() / 2]);
        factory.set_raw(&name, bytes);

        let (page, torn) = Page::load(1, &factory).unwrap();
        assert!(torn > 0);
        assert_eq!(page.message_count(), 1);
        assert_eq!(factory.raw(&name).unwrap().len() as u64, good);
    }

    #[test]
    fn test_rollover_only_when_page_has_content() {
        let factory = InMemorySequentialFileFactory::new("p");
        let mut page = Page::create(1, &factory).unwrap();
        assert!(!page.is_full_for(10_000, 400));
        append(&mut page, &entry(1, 300));
        assert!(page.is_full_for(340, 400));
    }

    #[test]
    fn test_damaged_header_mid_file_is_corruption() {
        let factory = InMemorySequentialFileFactory::new("p");
        let mut page = Page::create(1, &factory).unwrap();
        let first = append(&mut page, &entry(1, 30));
        append(&mut page, &entry(2, 30));
        append(&mut page, &entry(3, 30));
        let second_at = page.entry(first + 1).unwrap().offset as usize;
        drop(page);

        let name = Page::file_name(1);
        let mut bytes = factory.raw(&name).unwrap();
        let size = bytes.len();
        bytes[second_at..second_at + 4].copy_from_slice(&1_000_000u32.to_le_bytes());
        factory.set_raw(&name, bytes);

        assert!(matches!(
            Page::load(1, &factory),
            Err(PagingError::Corruption { .. })
        ));
        assert_eq!(factory.raw(&name).unwrap().len(), size);
    }

    #[test]
    fn test_short_header_at_tail_is_torn() {
        let factory = InMemorySequentialFileFactory::new("p");
        let mut page = Page::create(1, &factory).unwrap();
        append(&mut page, &entry(1, 30));
        let good = page.size();
        drop(page);

        let name = Page::file_name(1);
        let mut bytes = factory.raw(&name).unwrap();
        let next = encode_page_record(&entry(2, 30)).unwrap();
        bytes.extend_from_slice(&next[..RECORD_HEADER_LEN - 1]);
        factory.set_raw(&name, bytes);

        let (page, torn) = Page::load(1, &factory).unwrap();
        assert_eq!(torn, RECORD_HEADER_LEN as u64 - 1);
        assert_eq!(page.size(), good);
    }
}

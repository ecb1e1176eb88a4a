//! # Record Formats
//!
//! Binary layouts for page files and transaction/cursor logs.
//!
//! ## Page File
//!
//! ```text
//! [MAGIC:8] [RECORD]...
//! RECORD = [len:u32][crc:u32][message_id:u64][tx_id:u64][large_id:u64][header_crc:u32][payload:len]
//! ```
//!
//! `crc` covers the ids and the payload. `header_crc` covers the 32 bytes
//! before it, so a damaged length is told apart from a torn tail. `tx_id`
//! and `large_id` are zero when absent, which lets a reload build page
//! metadata by reading headers only.
//!
//! ## Framed Log
//!
//! ```text
//! [MAGIC:8] [FRAME]...
//! FRAME = [len:u32][crc:u32][payload:len]
//! ```

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use shared_types::{Message, MessageId, TransactionId};

use super::errors::{PagingError, PagingResult};

/// Magic bytes at the start of every page file.
pub const PAGE_MAGIC: &[u8; 8] = b"MQPAGE\x00\x01";

/// Magic bytes at the start of every framed log file.
pub const LOG_MAGIC: &[u8; 8] = b"MQLOG\x00\x00\x01";

/// Fixed size of a page record header.
pub const RECORD_HEADER_LEN: usize = 36;

/// Bytes of the header covered by `header_crc`.
const HEADER_CRC_AT: usize = 32;

/// Fixed size of a log frame header.
pub const FRAME_HEADER_LEN: usize = 8;

/// Upper bound on a single record payload.
pub const MAX_RECORD_LEN: u32 = 256 * 1024 * 1024;

/// A message as it is stored in a page, with its provisional transaction tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PagedMessage {
    pub message: Message,
    pub tx_id: Option<TransactionId>,
}

/// Header of a page record, readable without touching the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub payload_len: u32,
    pub crc: u32,
    pub message_id: MessageId,
    pub tx_id: Option<TransactionId>,
    pub large_body: Option<MessageId>,
}

impl RecordHeader {
    /// Decode a header. `None` if `bytes` is short or the header checksum
    /// does not match.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < RECORD_HEADER_LEN {
            return None;
        }
        let u32_at = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
        let u64_at = |at: usize| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&bytes[at..at + 8]);
            u64::from_le_bytes(buf)
        };
        let nonzero = |v: u64| (v != 0).then_some(v);
        if crc32fast::hash(&bytes[..HEADER_CRC_AT]) != u32_at(HEADER_CRC_AT) {
            return None;
        }

        Some(Self {
            payload_len: u32_at(0),
            crc: u32_at(4),
            message_id: MessageId(u64_at(8)),
            tx_id: nonzero(u64_at(16)).map(TransactionId),
            large_body: nonzero(u64_at(24)).map(MessageId),
        })
    }

    /// Total on-disk size of the record this header starts.
    pub fn record_len(&self) -> u64 {
        RECORD_HEADER_LEN as u64 + self.payload_len as u64
    }
}

/// Encode a paged message as a complete record.
pub fn encode_page_record(entry: &PagedMessage) -> PagingResult<Vec<u8>> {
    let payload = bincode::serialize(entry)
        .map_err(|e| PagingError::corruption("page record", e.to_string()))?;

    let mut buf = Vec::with_capacity(RECORD_HEADER_LEN + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(&[0u8; 4]);
    buf.extend_from_slice(&entry.message.id.0.to_le_bytes());
    buf.extend_from_slice(&entry.tx_id.map(|t| t.0).unwrap_or(0).to_le_bytes());
    let large = entry.message.body.large_ref().map(|b| b.id.0).unwrap_or(0);
    buf.extend_from_slice(&large.to_le_bytes());
    buf.extend_from_slice(&[0u8; 4]);
    buf.extend_from_slice(&payload);

    let crc = record_crc(&buf);
    buf[4..8].copy_from_slice(&crc.to_le_bytes());
    let header_crc = crc32fast::hash(&buf[..HEADER_CRC_AT]);
    buf[HEADER_CRC_AT..RECORD_HEADER_LEN].copy_from_slice(&header_crc.to_le_bytes());
    Ok(buf)
}

fn record_crc(record: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&record[8..HEADER_CRC_AT]);
    hasher.update(&record[RECORD_HEADER_LEN..]);
    hasher.finalize()
}

/// Decode a full record (header + payload), verifying its checksum.
pub fn decode_page_record(file: &str, record: &[u8]) -> PagingResult<PagedMessage> {
    let header = RecordHeader::decode(record)
        .ok_or_else(|| PagingError::corruption(file, "record header damaged or short"))?;
    if record.len() as u64 != header.record_len() {
        return Err(PagingError::corruption(
            file,
            format!(
                "record length {} does not match header {}",
                record.len(),
                header.record_len()
            ),
        ));
    }
    if record_crc(record) != header.crc {
        return Err(PagingError::corruption(
            file,
            format!("checksum mismatch for message {}", header.message_id),
        ));
    }
    bincode::deserialize(&record[RECORD_HEADER_LEN..])
        .map_err(|e| PagingError::corruption(file, e.to_string()))
}

/// Encode a serializable value as a framed log entry.
pub fn encode_frame<T: Serialize>(value: &T) -> PagingResult<Vec<u8>> {
    let payload =
        bincode::serialize(value).map_err(|e| PagingError::corruption("log frame", e.to_string()))?;
    let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Result of scanning a framed log.
#[derive(Debug)]
pub struct FrameScan<T> {
    pub entries: Vec<T>,
    /// Bytes (including magic) covered by intact frames.
    pub valid_len: u64,
    /// True when trailing bytes did not form a complete frame.
    pub torn: bool,
}

/// Decode every intact frame in `bytes`.
///
/// A trailing incomplete frame is reported as torn. A complete frame whose
/// checksum or payload is bad is corruption, not a torn tail.
pub fn scan_frames<T: DeserializeOwned>(file: &str, bytes: &[u8]) -> PagingResult<FrameScan<T>> {
    if bytes.len() < LOG_MAGIC.len() {
        return Ok(FrameScan {
            entries: Vec::new(),
            valid_len: 0,
            torn: !bytes.is_empty(),
        });
    }
    if &bytes[..LOG_MAGIC.len()] != LOG_MAGIC {
        return Err(PagingError::corruption(file, "invalid log magic"));
    }

    let mut entries = Vec::new();
    let mut at = LOG_MAGIC.len();
    loop {
        if at == bytes.len() {
            break;
        }
        if at + FRAME_HEADER_LEN > bytes.len() {
            return Ok(FrameScan {
                entries,
                valid_len: at as u64,
                torn: true,
            });
        }
        let len = u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]) as usize;
        let crc = u32::from_le_bytes([bytes[at + 4], bytes[at + 5], bytes[at + 6], bytes[at + 7]]);
        let start = at + FRAME_HEADER_LEN;
        if start + len > bytes.len() {
            return Ok(FrameScan {
                entries,
                valid_len: at as u64,
                torn: true,
            });
        }
        let payload = &bytes[start..start + len];
        if crc32fast::hash(payload) != crc {
            return Err(PagingError::corruption(
                file,
                format!("frame checksum mismatch at offset {}", at),
            ));
        }
        let entry = bincode::deserialize(payload)
            .map_err(|e| PagingError::corruption(file, e.to_string()))?;
        entries.push(entry);
        at = start + len;
    }

    Ok(FrameScan {
        entries,
        valid_len: at as u64,
        torn: false,
    })
}

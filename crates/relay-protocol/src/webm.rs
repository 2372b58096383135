//! WebM container header extraction.
//!
//! A late joiner to a live WebM stream needs the bytes that precede the first
//! `Cluster` (EBML header, `Segment` start, `Info`, `Tracks`, ...) before any
//! cluster it receives can be decoded. [`WebmHeaderExtractor`] walks the EBML
//! element tree of the first bytes of a stream and returns that prefix.

use tracing::trace;

const EBML_ID: u32 = 0x1A45_DFA3;
const SEGMENT_ID: u32 = 0x1853_8067;
const INFO_ID: u32 = 0x1549_A966;
const CLUSTER_ID: u32 = 0x1F43_B675;
const WRITING_APP_ID: u32 = 0x5741;

/// Chrome and Opera end each recorder chunk with the first byte of the next
/// cluster ID, so a header cut before the cluster is missing that byte.
const CHROME_WRITING_APP: &str = "Chrome";
const CLUSTER_LEAD_BYTE: u8 = 0x1F;

/// Error type for container parsing
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WebmError {
    #[error("Unexpected end of data at offset {offset}")]
    Truncated { offset: usize },

    #[error("Invalid element ID at offset {offset}")]
    InvalidId { offset: usize },

    #[error("Invalid element size at offset {offset}")]
    InvalidSize { offset: usize },

    #[error("Data does not start with an EBML header")]
    NotEbml,

    #[error("Expected Segment element, found ID {found:#x}")]
    MissingSegment { found: u32 },
}

/// Extracts a playable header from the first bytes of a media stream.
pub trait HeaderExtractor: Send + Sync {
    /// Return the header prefix of `data`.
    ///
    /// # Errors
    ///
    /// Returns [`WebmError`] if `data` is not a well-formed container start.
    fn extract_header(&self, data: &[u8]) -> Result<Vec<u8>, WebmError>;
}

/// [`HeaderExtractor`] for WebM (Matroska) streams.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebmHeaderExtractor;

impl HeaderExtractor for WebmHeaderExtractor {
    fn extract_header(&self, data: &[u8]) -> Result<Vec<u8>, WebmError> {
        let mut reader = EbmlReader::new(data);

        if reader.read_id()? != EBML_ID {
            return Err(WebmError::NotEbml);
        }
        let ebml_size = reader.read_size()?;
        reader.skip(ebml_size)?;

        let segment = reader.read_id()?;
        if segment != SEGMENT_ID {
            return Err(WebmError::MissingSegment { found: segment });
        }
        // Live streams write an unknown Segment size; descend without using it.
        reader.read_size()?;

        let mut writing_app = None;
        loop {
            let element_start = reader.position();
            let id = reader.read_id()?;
            let size = reader.read_size()?;

            if id == CLUSTER_ID {
                let mut header = data
                    .get(..element_start)
                    .ok_or(WebmError::Truncated {
                        offset: element_start,
                    })?
                    .to_vec();
                if writing_app.as_deref() == Some(CHROME_WRITING_APP) {
                    header.push(CLUSTER_LEAD_BYTE);
                }
                trace!(
                    target: "hub.media",
                    header_len = header.len(),
                    writing_app = ?writing_app,
                    "WebM header extracted"
                );
                return Ok(header);
            }

            if id == INFO_ID {
                writing_app = parse_writing_app(reader.take(size)?)?;
            } else {
                reader.skip(size)?;
            }
        }
    }
}

/// Find the `WritingApp` string inside an `Info` element body.
fn parse_writing_app(info: &[u8]) -> Result<Option<String>, WebmError> {
    let mut reader = EbmlReader::new(info);
    while !reader.is_at_end() {
        let id = reader.read_id()?;
        let size = reader.read_size()?;
        let body = reader.take(size)?;
        if id == WRITING_APP_ID {
            return Ok(Some(String::from_utf8_lossy(body).into_owned()));
        }
    }
    Ok(None)
}

/// Cursor over EBML-encoded bytes. Every read is bounds-checked.
struct EbmlReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> EbmlReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn position(&self) -> usize {
        self.pos
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn first_byte(&self) -> Result<u8, WebmError> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or(WebmError::Truncated { offset: self.pos })
    }

    /// Read `len` bytes as a big-endian integer after masking the first byte.
    fn read_vint(&mut self, len: usize, first_mask: u8) -> Result<u64, WebmError> {
        let end = self.pos + len;
        let bytes = self
            .data
            .get(self.pos..end)
            .ok_or(WebmError::Truncated { offset: self.pos })?;
        let mut value = 0u64;
        for (i, byte) in bytes.iter().enumerate() {
            let byte = if i == 0 { byte & first_mask } else { *byte };
            value = (value << 8) | u64::from(byte);
        }
        self.pos = end;
        Ok(value)
    }

    /// Element IDs keep their length marker bits and are at most 4 bytes.
    fn read_id(&mut self) -> Result<u32, WebmError> {
        let first = self.first_byte()?;
        let len = first.leading_zeros() as usize + 1;
        if len > 4 {
            return Err(WebmError::InvalidId { offset: self.pos });
        }
        let value = self.read_vint(len, 0xFF)?;
        u32::try_from(value).map_err(|_| WebmError::InvalidId { offset: self.pos })
    }

    /// Data sizes drop their length marker bit and are at most 8 bytes.
    fn read_size(&mut self) -> Result<u64, WebmError> {
        let first = self.first_byte()?;
        let len = first.leading_zeros() as usize + 1;
        if len > 8 {
            return Err(WebmError::InvalidSize { offset: self.pos });
        }
        let mask = 0xFFu8.checked_shr(len as u32).unwrap_or(0);
        self.read_vint(len, mask)
    }

    fn take(&mut self, size: u64) -> Result<&'a [u8], WebmError> {
        let offset = self.pos;
        let size = usize::try_from(size).map_err(|_| WebmError::InvalidSize { offset })?;
        let end = offset
            .checked_add(size)
            .ok_or(WebmError::InvalidSize { offset })?;
        let body = self
            .data
            .get(offset..end)
            .ok_or(WebmError::Truncated { offset })?;
        self.pos = end;
        Ok(body)
    }

    fn skip(&mut self, size: u64) -> Result<(), WebmError> {
        self.take(size).map(|_| ())
    }
}

//! Synthetic WebM streams.
//!
//! Builds the minimal element sequence a browser recorder emits: EBML header,
//! an unknown-size Segment, Info (with `WritingApp`), Tracks, then one or more
//! unknown-size Clusters with a single SimpleBlock each.

const EBML: [u8; 4] = [0x1A, 0x45, 0xDF, 0xA3];
const SEGMENT: [u8; 4] = [0x18, 0x53, 0x80, 0x67];
const INFO: [u8; 4] = [0x15, 0x49, 0xA9, 0x66];
const TIMECODE_SCALE: [u8; 3] = [0x2A, 0xD7, 0xB1];
const WRITING_APP: [u8; 2] = [0x57, 0x41];
const TRACKS: [u8; 4] = [0x16, 0x54, 0xAE, 0x6B];
const CLUSTER: [u8; 4] = [0x1F, 0x43, 0xB6, 0x75];
const SIMPLE_BLOCK: u8 = 0xA3;
const UNKNOWN_SIZE: [u8; 8] = [0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];

/// A built stream and the length of its header prefix.
#[derive(Debug, Clone)]
pub struct WebmStream {
    pub bytes: Vec<u8>,
    /// Bytes before the first Cluster.
    pub header_len: usize,
}

impl WebmStream {
    /// The bytes before the first Cluster.
    #[must_use]
    pub fn header(&self) -> &[u8] {
        &self.bytes[..self.header_len]
    }
}

/// Builder for [`WebmStream`].
#[derive(Debug, Clone)]
pub struct WebmStreamBuilder {
    writing_app: String,
    clusters: usize,
    block_len: usize,
}

impl Default for WebmStreamBuilder {
    fn default() -> Self {
        Self {
            writing_app: "Firefox".to_string(),
            clusters: 1,
            block_len: 64,
        }
    }
}

impl WebmStreamBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn writing_app(mut self, app: impl Into<String>) -> Self {
        self.writing_app = app.into();
        self
    }

    #[must_use]
    pub fn clusters(mut self, count: usize) -> Self {
        self.clusters = count;
        self
    }

    /// Payload length of each SimpleBlock.
    #[must_use]
    pub fn block_len(mut self, len: usize) -> Self {
        self.block_len = len;
        self
    }

    #[must_use]
    pub fn build(self) -> WebmStream {
        let mut bytes = element(&EBML, &[0x42, 0x86, 0x81, 0x01]);
        bytes.extend_from_slice(&SEGMENT);
        bytes.extend_from_slice(&UNKNOWN_SIZE);

        let mut info = element(&TIMECODE_SCALE, &[0x0F, 0x42, 0x40]);
        info.extend(element(&WRITING_APP, self.writing_app.as_bytes()));
        bytes.extend(element(&INFO, &info));
        bytes.extend(element(&TRACKS, &[0xAE, 0x80]));
        let header_len = bytes.len();

        for _ in 0..self.clusters {
            bytes.extend_from_slice(&CLUSTER);
            bytes.extend_from_slice(&UNKNOWN_SIZE);
            bytes.extend(element(&[SIMPLE_BLOCK], &vec![0x55; self.block_len]));
        }

        WebmStream { bytes, header_len }
    }
}

/// Encode one element with a 1- or 2-byte size.
fn element(id: &[u8], body: &[u8]) -> Vec<u8> {
    let len = body.len();
    assert!(len < 0x3FFF, "element body too long for the fixture encoder");
    let mut out = id.to_vec();
    if len < 0x7F {
        out.push(0x80 | len as u8);
    } else {
        out.push(0x40 | (len >> 8) as u8);
        out.push((len & 0xFF) as u8);
    }
    out.extend_from_slice(body);
    out
}

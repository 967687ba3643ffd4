//! Record identifiers and the newline-delimited record line format.
//!
//! Every stored record is a single line `<record-id> <payload>\n`. The record id
//! is a UUIDv7 rendered as 32 lowercase hex characters, so comparing ids as
//! strings (or as [`RecordId`]) orders records by arrival time.

use std::fmt;
use std::str::FromStr;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::{Builder, Uuid};

/// Length in bytes of the hex-encoded record id at the start of each line.
pub const RECORD_ID_LEN: usize = 32;

const MAX_SEQUENCE: u16 = 0x0fff;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId(Uuid);

impl RecordId {
    /// Build an id from a millisecond timestamp and a 12-bit sequence number.
    ///
    /// The remaining random bits are zero, which keeps ids built this way
    /// deterministic.
    pub fn from_parts(timestamp_ms: u64, sequence: u16) -> Self {
        Self::from_parts_with_entropy(timestamp_ms, sequence, [0u8; 8])
    }

    fn from_parts_with_entropy(timestamp_ms: u64, sequence: u16, entropy: [u8; 8]) -> Self {
        let sequence = sequence.min(MAX_SEQUENCE);
        let mut random = [0u8; 10];
        random[..2].copy_from_slice(&sequence.to_be_bytes());
        random[2..].copy_from_slice(&entropy);
        RecordId(Builder::from_unix_timestamp_millis(timestamp_ms, &random).into_uuid())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Arrival time carried in the top 48 bits of the id.
    pub fn timestamp_ms(&self) -> u64 {
        uuid_timestamp_ms(&self.0)
    }

    pub fn parse_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != RECORD_ID_LEN {
            return None;
        }
        let text = std::str::from_utf8(bytes).ok()?;
        text.parse().ok()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl FromStr for RecordId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::try_parse(s).map(RecordId)
    }
}

/// Monotonic record id source for one process.
///
/// Within one millisecond a 12-bit counter orders ids; when the counter is
/// exhausted the generator borrows the next millisecond so ids never go
/// backwards.
pub struct RecordIdGenerator {
    state: Mutex<(u64, u16)>,
}

impl Default for RecordIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordIdGenerator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new((0, 0)),
        }
    }

    pub fn next_id(&self) -> RecordId {
        self.next_id_at(now_ms())
    }

    pub fn next_id_at(&self, timestamp_ms: u64) -> RecordId {
        let mut state = self.state.lock();
        let (last_ms, last_seq) = *state;
        let (ms, seq) = if timestamp_ms > last_ms {
            (timestamp_ms, 0)
        } else if last_seq < MAX_SEQUENCE {
            (last_ms, last_seq + 1)
        } else {
            (last_ms + 1, 0)
        };
        *state = (ms, seq);
        drop(state);
        RecordId::from_parts_with_entropy(ms, seq, rand::random())
    }
}

/// Unix milliseconds stored in the top 48 bits of a UUIDv7.
pub fn uuid_timestamp_ms(uuid: &Uuid) -> u64 {
    let bytes = uuid.as_bytes();
    let mut millis = [0u8; 8];
    millis[2..].copy_from_slice(&bytes[..6]);
    u64::from_be_bytes(millis)
}

pub fn now_ms() -> u64 {
    let ms = chrono::Utc::now().timestamp_millis();
    if ms < 0 { 0 } else { ms as u64 }
}

/// A borrowed view of one record line (without the trailing newline).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLine<'a> {
    pub id: RecordId,
    pub line: &'a [u8],
}

impl<'a> RecordLine<'a> {
    /// Parse a line of the form `<record-id> <payload>`. A trailing newline is
    /// tolerated and excluded from [`RecordLine::line`].
    pub fn parse(line: &'a [u8]) -> Option<Self> {
        let line = line.strip_suffix(b"\n").unwrap_or(line);
        if line.len() <= RECORD_ID_LEN || line[RECORD_ID_LEN] != b' ' {
            return None;
        }
        let id = RecordId::parse_bytes(&line[..RECORD_ID_LEN])?;
        Some(RecordLine { id, line })
    }

    pub fn payload(&self) -> &'a [u8] {
        &self.line[RECORD_ID_LEN + 1..]
    }
}

/// Append one record line (`<id> <payload>\n`) to `buf`.
pub fn encode_record(buf: &mut Vec<u8>, id: RecordId, payload: &[u8]) {
    buf.extend_from_slice(id.to_string().as_bytes());
    buf.push(b' ');
    buf.extend_from_slice(payload);
    buf.push(b'\n');
}

/// Split a segment body into record lines, validating every line.
///
/// The body must be newline terminated; an empty body yields no records.
pub fn parse_records(body: &[u8]) -> Result<Vec<RecordLine<'_>>, String> {
    if body.is_empty() {
        return Ok(Vec::new());
    }
    if !body.ends_with(b"\n") {
        return Err("segment body does not end with a newline".to_string());
    }
    body[..body.len() - 1]
        .split(|b| *b == b'\n')
        .enumerate()
        .map(|(index, line)| {
            RecordLine::parse(line).ok_or_else(|| format!("malformed record at line {index}"))
        })
        .collect()
}

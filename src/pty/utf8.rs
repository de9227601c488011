//! UTF-8 reassembly across PTY reads
//!
//! A fixed-size read can end in the middle of a multi-byte character. The
//! trailing bytes are held back and prepended to the next read so that output
//! chunks are always whole strings.

/// Longest possible UTF-8 sequence
const MAX_SEQUENCE: usize = 4;

/// Buffers an incomplete trailing UTF-8 sequence between reads
#[derive(Debug, Default)]
pub struct Utf8Accumulator {
    pending: Vec<u8>,
}

impl Utf8Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `data`, holding back an incomplete trailing sequence.
    ///
    /// Bytes that can never become valid UTF-8 are replaced with U+FFFD.
    pub fn push(&mut self, data: &[u8]) -> String {
        let mut bytes = std::mem::take(&mut self.pending);
        bytes.extend_from_slice(data);

        let valid_up_to = match std::str::from_utf8(&bytes) {
            Ok(_) => return String::from_utf8(bytes).unwrap_or_default(),
            Err(e) => e.valid_up_to(),
        };

        let trailing = &bytes[valid_up_to..];
        if trailing.len() < MAX_SEQUENCE && is_truncated_sequence(trailing) {
            self.pending = trailing.to_vec();
            return String::from_utf8_lossy(&bytes[..valid_up_to]).into_owned();
        }

        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Flush whatever is held back, lossily
    pub fn finish(&mut self) -> String {
        let pending = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&pending).into_owned()
    }
}

/// True when `bytes` is the valid beginning of a longer sequence
fn is_truncated_sequence(bytes: &[u8]) -> bool {
    let Some(&lead) = bytes.first() else {
        return false;
    };
    let expected = match lead {
        0xC2..=0xDF => 2,
        0xE0..=0xEF => 3,
        0xF0..=0xF4 => 4,
        _ => return false,
    };
    bytes.len() < expected && bytes[1..].iter().all(|b| (0x80..=0xBF).contains(b))
}

//! Frame decoder for the temperature wire format.
//!
//! A frame is the marker `000` followed by a two-digit decimal field:
//!
//! ```text
//!  0   1   2   3   4
//! '0' '0' '0' 'd' 'd'
//! └─ marker ─┘└field┘
//! ```
//!
//! Bytes from successive reads are accumulated, so a frame split across two
//! reads or preceded by line noise is still found.

use std::collections::VecDeque;
use std::fmt;

/// Literal bytes that start a frame.
pub const FRAME_MARKER: &[u8] = b"000";

/// Width of the numeric field following the marker.
pub const FIELD_LEN: usize = 2;

/// Total frame length.
pub const FRAME_LEN: usize = FRAME_MARKER.len() + FIELD_LEN;

/// Upper bound on buffered bytes. Older bytes are dropped past this.
pub const MAX_PENDING_BYTES: usize = 1024;

/// Error decoding the numeric field of a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Field bytes are not a decimal integer.
    InvalidField(String),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::InvalidField(raw) => write!(f, "invalid frame field {:?}", raw),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Accumulates serial bytes and yields decoded frame values.
///
/// A read that begins with the marker marks a frame boundary. A marker match
/// overlapping that boundary gives way to it when the frame at the boundary
/// has a numeric field, so a kept-over `'0'` cannot shift the next field.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    pending: Vec<u8>,
    /// Offsets in `pending` where a pushed chunk began with the marker.
    boundaries: VecDeque<usize>,
    discarded: u64,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends freshly read bytes.
    pub fn push(&mut self, bytes: &[u8]) {
        if bytes.starts_with(FRAME_MARKER) && !self.pending.is_empty() {
            self.boundaries.push_back(self.pending.len());
        }
        self.pending.extend_from_slice(bytes);
        if self.pending.len() > MAX_PENDING_BYTES {
            let excess = self.pending.len() - MAX_PENDING_BYTES;
            self.discard(excess);
        }
    }

    /// Returns the next complete frame, if any.
    ///
    /// `None` means more bytes are needed. Bytes preceding a marker are
    /// dropped, and a returned frame (valid or not) is consumed.
    pub fn next_frame(&mut self) -> Option<Result<i64, DecodeError>> {
        let Some(start) = find_marker(&self.pending) else {
            // Keep a tail that may hold the beginning of a marker.
            let keep = FRAME_MARKER.len() - 1;
            let excess = self.pending.len().saturating_sub(keep);
            self.discard(excess);
            return None;
        };

        let mut start = start;
        if let Some(boundary) = self.boundary_within(start) {
            if self.pending.len() < boundary + FRAME_LEN {
                self.discard(start);
                return None;
            }
            // Prefer the read-aligned frame unless its field is garbage.
            if self.field_at(boundary).is_ok() {
                start = boundary;
            }
        }

        self.discard(start);
        if self.pending.len() < FRAME_LEN {
            return None;
        }

        let value = self.field_at(0);
        self.consume(FRAME_LEN);
        Some(value)
    }

    /// Drops all buffered bytes.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.boundaries.clear();
    }

    #[cfg(test)]
    fn pending(&self) -> &[u8] {
        &self.pending
    }

    /// Total bytes dropped as noise since creation.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    fn discard(&mut self, count: usize) {
        if count > 0 {
            self.consume(count);
            self.discarded += count as u64;
        }
    }

    fn consume(&mut self, count: usize) {
        self.pending.drain(..count);
        while self.boundaries.front().is_some_and(|&b| b <= count) {
            self.boundaries.pop_front();
        }
        for boundary in &mut self.boundaries {
            *boundary -= count;
        }
    }

    /// Parses the field of the complete frame starting at `start`.
    fn field_at(&self, start: usize) -> Result<i64, DecodeError> {
        let field = &self.pending[start + FRAME_MARKER.len()..start + FRAME_LEN];
        std::str::from_utf8(field)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| DecodeError::InvalidField(String::from_utf8_lossy(field).into_owned()))
    }

    /// First chunk boundary falling inside a frame starting at `start`.
    fn boundary_within(&self, start: usize) -> Option<usize> {
        self.boundaries
            .iter()
            .copied()
            .find(|&b| b > start && b < start + FRAME_LEN)
    }
}

fn find_marker(haystack: &[u8]) -> Option<usize> {
    haystack
        .windows(FRAME_MARKER.len())
        .position(|window| window == FRAME_MARKER)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(decoder: &mut FrameDecoder) -> Vec<Result<i64, DecodeError>> {
        std::iter::from_fn(|| decoder.next_frame()).collect()
    }

    #[test]
    fn test_frame_at_start() {
        let mut decoder = FrameDecoder::new();
        decoder.push(b"00007xyz");
        assert_eq!(decode_all(&mut decoder), vec![Ok(7)]);
        // Trailing noise trimmed to a possible marker prefix.
        assert_eq!(decoder.pending(), b"yz");
    }

    #[test]
    fn test_marker_after_noise() {
        let mut decoder = FrameDecoder::new();
        decoder.push(b"\r\nAB00042");
        assert_eq!(decode_all(&mut decoder), vec![Ok(42)]);
        assert_eq!(decoder.discarded(), 4);
    }

    #[test]
    fn test_frame_split_across_reads() {
        let mut decoder = FrameDecoder::new();
        decoder.push(b"xx00");
        assert!(decoder.next_frame().is_none());
        decoder.push(b"02");
        assert!(decoder.next_frame().is_none());
        decoder.push(b"3");
        assert_eq!(decoder.next_frame(), Some(Ok(23)));
    }

    #[test]
    fn test_multiple_frames_in_one_read() {
        let mut decoder = FrameDecoder::new();
        decoder.push(b"00021\n00022\n");
        assert_eq!(decode_all(&mut decoder), vec![Ok(21), Ok(22)]);
    }

    #[test]
    fn test_no_marker_yields_nothing() {
        let mut decoder = FrameDecoder::new();
        decoder.push(b"hello world");
        assert!(decoder.next_frame().is_none());
        assert_eq!(decoder.pending(), b"ld");
        assert_eq!(decoder.discarded(), 9);
    }

    #[test]
    fn test_invalid_field_is_error_and_consumed() {
        let mut decoder = FrameDecoder::new();
        decoder.push(b"0004x00019");
        assert_eq!(
            decode_all(&mut decoder),
            vec![Err(DecodeError::InvalidField("4x".to_string())), Ok(19)]
        );
    }

    #[test]
    fn test_pending_bytes_capped() {
        let mut decoder = FrameDecoder::new();
        decoder.push(&vec![b'x'; MAX_PENDING_BYTES + 10]);
        assert_eq!(decoder.pending().len(), MAX_PENDING_BYTES);
        assert_eq!(decoder.discarded(), 10);
    }

    #[test]
    fn test_marker_preceded_by_zero() {
        // Zero run at the start of a read: marker then a zero field.
        let mut decoder = FrameDecoder::new();
        decoder.push(b"00000\r\n00001");
        assert_eq!(decode_all(&mut decoder), vec![Ok(0), Ok(1)]);

        // A kept-over '0' must not shift the next read's frame.
        let mut decoder = FrameDecoder::new();
        decoder.push(b"T=10");
        assert!(decoder.next_frame().is_none());
        assert_eq!(decoder.pending(), b"10");
        decoder.push(b"00023garbage");
        assert_eq!(decoder.next_frame(), Some(Ok(23)));
        assert_eq!(decoder.discarded(), 4);

        // Same with a kept-over "00".
        let mut decoder = FrameDecoder::new();
        decoder.push(b"x00");
        decoder.push(b"00042");
        assert_eq!(decode_all(&mut decoder), vec![Ok(42)]);
    }

    #[test]
    fn test_new_frame_overrides_incomplete_one() {
        let mut decoder = FrameDecoder::new();
        decoder.push(b"0001");
        assert!(decoder.next_frame().is_none());
        decoder.push(b"00042\r\n");
        assert_eq!(decode_all(&mut decoder), vec![Ok(42)]);
    }

    #[test]
    fn test_split_frame_not_mistaken_for_boundary() {
        let mut decoder = FrameDecoder::new();
        decoder.push(b"00");
        decoder.push(b"017\r\n");
        assert_eq!(decode_all(&mut decoder), vec![Ok(17)]);

        // "00000" split after two bytes: the second read starts with the
        // marker but its field is not a number.
        let mut decoder = FrameDecoder::new();
        decoder.push(b"00");
        decoder.push(b"000\r\n");
        assert_eq!(decode_all(&mut decoder), vec![Ok(0)]);
    }

    #[test]
    fn test_waits_for_read_aligned_frame() {
        let mut decoder = FrameDecoder::new();
        decoder.push(b"T=10");
        assert!(decoder.next_frame().is_none());
        decoder.push(b"000");
        assert!(decoder.next_frame().is_none());
        decoder.push(b"56\r\n");
        assert_eq!(decode_all(&mut decoder), vec![Ok(56)]);
    }

    #[test]
    fn test_clear_drops_partial_frame() {
        let mut decoder = FrameDecoder::new();
        decoder.push(b"0001");
        decoder.clear();
        decoder.push(b"5");
        assert!(decoder.next_frame().is_none());
    }
}

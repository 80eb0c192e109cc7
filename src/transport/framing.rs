//! Length-prefixed framing for the browser channel.
//!
//! Each frame is a 4-byte little-endian payload length followed by exactly
//! that many payload bytes:
//!
//! ```text
//! ┌──────────────┬───────────────────────────────┐
//! │ len: u32 LE  │ payload: [u8; len] (JSON)     │
//! └──────────────┴───────────────────────────────┘
//! ```
//!
//! [`FrameCodec`] encodes outbound frames and refuses oversized payloads
//! before anything is written. [`FrameBuffer`] reassembles inbound chunks
//! into whole payloads, in arrival order, and bounds how many unframed bytes
//! it will hold.

// ============================================================================
// Imports
// ============================================================================

use tracing::trace;

use crate::config::{BridgeConfig, LENGTH_PREFIX_SIZE};
use crate::error::{Error, Result};
use crate::protocol::Envelope;

// ============================================================================
// FrameCodec
// ============================================================================

/// Encoder for outbound frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCodec {
    /// Largest payload accepted.
    max_payload: usize,
}

impl FrameCodec {
    /// Creates a codec with the given payload limit.
    #[inline]
    #[must_use]
    pub const fn new(max_payload: usize) -> Self {
        Self { max_payload }
    }

    /// Creates a codec from bridge configuration.
    #[inline]
    #[must_use]
    pub const fn from_config(config: &BridgeConfig) -> Self {
        Self::new(config.max_payload_size)
    }

    /// Returns the payload limit.
    #[inline]
    #[must_use]
    pub const fn max_payload(&self) -> usize {
        self.max_payload
    }

    /// Prefixes `payload` with its length.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PayloadTooLarge`] if the payload exceeds the limit.
    pub fn encode(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let size = payload.len();
        if size > self.max_payload {
            return Err(Error::PayloadTooLarge {
                size,
                limit: self.max_payload,
            });
        }

        let len = u32::try_from(size).map_err(|_| Error::PayloadTooLarge {
            size,
            limit: u32::MAX as usize,
        })?;

        let mut frame = Vec::with_capacity(LENGTH_PREFIX_SIZE + size);
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(payload);
        Ok(frame)
    }

    /// Serializes and frames an envelope.
    ///
    /// # Errors
    ///
    /// - [`Error::Json`] if serialization fails
    /// - [`Error::PayloadTooLarge`] if the payload exceeds the limit
    pub fn encode_envelope(&self, envelope: &Envelope) -> Result<Vec<u8>> {
        self.encode(&envelope.to_payload()?)
    }
}

// ============================================================================
// FrameBuffer
// ============================================================================

/// Reassembly buffer for inbound frames.
///
/// Owned by exactly one reader task.
#[derive(Debug)]
pub struct FrameBuffer {
    /// Bytes received. Everything before `start` is already framed.
    buf: Vec<u8>,
    /// Read offset into `buf`.
    start: usize,
    /// Largest payload a header may declare.
    max_payload: usize,
    /// Cap on `buf.len()`.
    max_buffer: usize,
}

impl FrameBuffer {
    /// Creates an empty buffer.
    #[inline]
    #[must_use]
    pub fn new(max_payload: usize, max_buffer: usize) -> Self {
        Self {
            buf: Vec::new(),
            start: 0,
            max_payload,
            max_buffer,
        }
    }

    /// Creates a buffer from bridge configuration.
    #[inline]
    #[must_use]
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::new(config.max_payload_size, config.max_buffer_size)
    }

    /// Returns the number of buffered, unframed bytes.
    #[inline]
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buf.len() - self.start
    }

    /// Returns `true` if no partial frame is pending.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffered() == 0
    }

    /// Appends a chunk without extracting frames.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BufferOverflow`] if the cap would be exceeded.
    pub fn extend(&mut self, chunk: &[u8]) -> Result<()> {
        let buffered = self.buffered() + chunk.len();
        if buffered > self.max_buffer {
            return Err(Error::BufferOverflow {
                buffered,
                limit: self.max_buffer,
            });
        }
        self.compact();
        self.buf.extend_from_slice(chunk);
        Ok(())
    }

    /// Pops the next complete payload, if one is buffered.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if a header declares more than the
    /// payload limit. The stream is misaligned or hostile at that point.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        let pending = &self.buf[self.start..];
        let Some(header) = pending.first_chunk::<LENGTH_PREFIX_SIZE>() else {
            return Ok(None);
        };

        let len = u32::from_le_bytes(*header) as usize;
        if len > self.max_payload {
            return Err(Error::protocol(format!(
                "frame declares {len} bytes, limit is {}",
                self.max_payload
            )));
        }

        let end = LENGTH_PREFIX_SIZE + len;
        if pending.len() < end {
            return Ok(None);
        }

        let payload = pending[LENGTH_PREFIX_SIZE..end].to_vec();
        self.start += end;
        if self.start == self.buf.len() {
            self.buf.clear();
            self.start = 0;
        }

        trace!(len, remaining = self.buffered(), "Frame reassembled");
        Ok(Some(payload))
    }

    /// Feeds a chunk of any size and returns every payload it completes.
    ///
    /// Complete frames are drained as soon as they are available, so the cap
    /// only trips when it cannot hold one partial frame.
    ///
    /// # Errors
    ///
    /// - [`Error::Protocol`] on an oversized header
    /// - [`Error::BufferOverflow`] if the cap is reached with no frame to drain
    pub fn feed(&mut self, mut chunk: &[u8]) -> Result<Vec<Vec<u8>>> {
        let mut frames = Vec::new();

        while !chunk.is_empty() {
            let room = self.max_buffer.saturating_sub(self.buffered());
            if room == 0 {
                return Err(Error::BufferOverflow {
                    buffered: self.buffered() + chunk.len(),
                    limit: self.max_buffer,
                });
            }

            let take = room.min(chunk.len());
            self.extend(&chunk[..take])?;
            chunk = &chunk[take..];

            while let Some(frame) = self.next_frame()? {
                frames.push(frame);
            }
        }

        self.compact();
        Ok(frames)
    }

    /// Drops already-framed bytes from the front of the buffer.
    fn compact(&mut self) {
        if self.start > 0 {
            self.buf.drain(..self.start);
            self.start = 0;
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    use crate::identifiers::CallId;

    fn buffer() -> FrameBuffer {
        FrameBuffer::new(1024, 4096)
    }

    #[test]
    fn test_encode_prefix() {
        let frame = FrameCodec::new(16).encode(b"hello").expect("encode");
        assert_eq!(&frame[..4], &5u32.to_le_bytes());
        assert_eq!(&frame[4..], b"hello");
    }

    #[test]
    fn test_encode_rejects_oversized() {
        let err = FrameCodec::new(4).encode(b"hello").unwrap_err();
        assert!(matches!(err, Error::PayloadTooLarge { size: 5, limit: 4 }));
    }

    #[test]
    fn test_encode_at_limit() {
        assert!(FrameCodec::new(5).encode(b"hello").is_ok());
    }

    #[test]
    fn test_partial_header_waits() {
        let mut buf = buffer();
        let frames = buf.feed(&[3, 0]).expect("feed");
        assert!(frames.is_empty());
        assert_eq!(buf.buffered(), 2);
    }

    #[test]
    fn test_multiple_frames_in_one_chunk() {
        let codec = FrameCodec::new(64);
        let mut chunk = codec.encode(b"one").expect("encode");
        chunk.extend(codec.encode(b"two").expect("encode"));
        chunk.extend(codec.encode(b"three").expect("encode"));

        let mut buf = buffer();
        let frames = buf.feed(&chunk).expect("feed");
        assert_eq!(frames, vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_empty_payload_frame() {
        let mut buf = buffer();
        let frames = buf.feed(&0u32.to_le_bytes()).expect("feed");
        assert_eq!(frames, vec![Vec::<u8>::new()]);
    }

    #[test]
    fn test_oversized_header_is_protocol_violation() {
        let mut buf = FrameBuffer::new(8, 64);
        let err = buf.feed(&100u32.to_le_bytes()).unwrap_err();
        assert!(err.tears_down_connection());
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[test]
    fn test_extend_over_cap_overflows() {
        let mut buf = FrameBuffer::new(8, 6);
        let err = buf.extend(&[0; 7]).unwrap_err();
        assert!(matches!(err, Error::BufferOverflow { buffered: 7, limit: 6 }));
    }

    #[test]
    fn test_feed_overflows_when_cap_below_frame() {
        // Cap smaller than one whole frame: nothing can ever drain.
        let mut buf = FrameBuffer::new(32, 8);
        let frame = FrameCodec::new(32).encode(&[7; 20]).expect("encode");
        let err = buf.feed(&frame).unwrap_err();
        assert!(matches!(err, Error::BufferOverflow { .. }));
    }

    #[test]
    fn test_many_small_frames_do_not_trip_cap() {
        let codec = FrameCodec::new(8);
        let mut chunk = Vec::new();
        for _ in 0..100 {
            chunk.extend(codec.encode(b"abcd").expect("encode"));
        }

        let mut buf = FrameBuffer::new(8, 24);
        let frames = buf.feed(&chunk).expect("feed");
        assert_eq!(frames.len(), 100);
    }

    #[test]
    fn test_tail_survives_after_framed_bytes_are_dropped() {
        let codec = FrameCodec::new(64);
        let mut chunk = Vec::new();
        for payload in [&b"one"[..], b"two", b"three"] {
            chunk.extend(codec.encode(payload).expect("encode"));
        }
        let last = codec.encode(b"fourth").expect("encode");
        chunk.extend_from_slice(&last[..5]);

        let mut buf = buffer();
        let frames = buf.feed(&chunk).expect("feed");
        assert_eq!(frames.len(), 3);
        assert_eq!(buf.buffered(), 5);
        assert!(buf.next_frame().expect("next").is_none());

        let frames = buf.feed(&last[5..]).expect("feed");
        assert_eq!(frames, vec![b"fourth".to_vec()]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_envelope_frame() {
        let codec = FrameCodec::new(1024);
        let envelope = Envelope::error(CallId::new(1), "nope");
        let frame = codec.encode_envelope(&envelope).expect("encode");

        let mut buf = buffer();
        let frames = buf.feed(&frame).expect("feed");
        assert_eq!(Envelope::from_payload(&frames[0]).expect("parse"), envelope);
    }

    proptest! {
        #[test]
        fn prop_split_frame_reassembles(
            payload in proptest::collection::vec(any::<u8>(), 0..512),
            cuts in proptest::collection::vec(any::<usize>(), 0..16),
        ) {
            let frame = FrameCodec::new(1024).encode(&payload).expect("encode");

            let mut points: Vec<usize> = cuts.iter().map(|c| c % (frame.len() + 1)).collect();
            points.push(0);
            points.push(frame.len());
            points.sort_unstable();
            points.dedup();

            let mut buf = buffer();
            let mut frames = Vec::new();
            for window in points.windows(2) {
                frames.extend(buf.feed(&frame[window[0]..window[1]]).expect("feed"));
            }

            prop_assert_eq!(frames.len(), 1);
            prop_assert_eq!(&frames[0], &payload);
            prop_assert!(buf.is_empty());
        }

        #[test]
        fn prop_frames_keep_order(
            payloads in proptest::collection::vec(
                proptest::collection::vec(any::<u8>(), 0..64), 1..12),
            chunk_size in 1usize..40,
        ) {
            let codec = FrameCodec::new(1024);
            let stream: Vec<u8> = payloads
                .iter()
                .flat_map(|p| codec.encode(p).expect("encode"))
                .collect();

            let mut buf = buffer();
            let mut frames = Vec::new();
            for chunk in stream.chunks(chunk_size) {
                frames.extend(buf.feed(chunk).expect("feed"));
            }

            prop_assert_eq!(frames, payloads);
        }
    }
}

//! Length-prefixed binary codec for protocol frames.
//!
//! Frame format: `[length:4][payload:N]`
//!
//! - **length**: payload size in bytes, excluding the header (little-endian u32)
//! - **payload**: fields written in call order by a [`FrameWriter`]
//!
//! The payload is positional: a [`FrameReader`] must read fields in the
//! order they were written. Field encodings:
//!
//! | Field | Encoding |
//! |-------|----------|
//! | byte | 1 raw byte |
//! | boolean | 1 byte, `1` = true, `0` = false (any nonzero reads as true) |
//! | u32 / u64 | little-endian |
//! | utf | `u32` byte length + UTF-8 bytes, or [`NULL_STRING_MARKER`] for `None` |
//!
//! # Example
//!
//! ```
//! use hopper_core::{FrameReader, FrameWriter};
//!
//! let mut writer = FrameWriter::new();
//! writer.write_byte(1);
//! writer.write_utf(Some("hello"));
//! writer.write_utf(None);
//! let frame = writer.complete().expect("complete");
//!
//! let mut reader = FrameReader::new(frame.as_bytes()).expect("header");
//! assert_eq!(reader.read_byte().expect("byte"), 1);
//! assert_eq!(reader.read_utf().expect("utf").as_deref(), Some("hello"));
//! assert_eq!(reader.read_utf().expect("utf"), None);
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of the length header preceding every payload.
pub const LENGTH_HEADER_SIZE: usize = 4;

/// Maximum payload size (1MB).
///
/// Frames larger than this are rejected on both sides so that a corrupted
/// or hostile length header cannot make a reader buffer unbounded data.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Length value marking an absent string.
pub const NULL_STRING_MARKER: u32 = u32::MAX;

/// Codec error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// A read needed more bytes than the frame holds.
    #[error("unexpected end of frame: need {needed} bytes, have {remaining}")]
    UnexpectedEof {
        /// Bytes the read required.
        needed: usize,
        /// Bytes left in the frame.
        remaining: usize,
    },

    /// A string length prefix points past the end of the frame.
    #[error("invalid string length {length}: only {remaining} bytes remain")]
    InvalidStringLength {
        /// Length read from the prefix.
        length: u32,
        /// Bytes left in the frame after the prefix.
        remaining: usize,
    },

    /// String bytes are not valid UTF-8.
    #[error("string is not valid UTF-8")]
    InvalidUtf8,

    /// Payload exceeds [`MAX_FRAME_SIZE`].
    #[error("frame too large: {size} bytes (max {MAX_FRAME_SIZE})")]
    FrameTooLarge {
        /// Payload size in bytes.
        size: usize,
    },

    /// The length header disagrees with the bytes actually present.
    #[error("frame length mismatch: header says {declared} bytes, got {actual}")]
    LengthMismatch {
        /// Payload length from the header.
        declared: usize,
        /// Payload bytes present.
        actual: usize,
    },

    /// Bytes were left over after the last expected field.
    #[error("{remaining} trailing bytes after last field")]
    TrailingBytes {
        /// Unread bytes.
        remaining: usize,
    },

    /// A required string field carried the null marker.
    #[error("required string field is null")]
    UnexpectedNull,

    /// The message tag byte names no known message.
    #[error("unknown message tag {tag:#04x}")]
    UnknownTag {
        /// The tag that was read.
        tag: u8,
    },
}

/// A completed, immutable frame: length header followed by payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame(Bytes);

impl Frame {
    /// Wrap raw bytes received from the network, validating the header.
    ///
    /// # Errors
    ///
    /// Fails when the header is missing, the frame is oversized, or the
    /// header length does not match the payload exactly.
    pub fn from_bytes(bytes: Bytes) -> Result<Self, CodecError> {
        check_header(&bytes)?;
        Ok(Self(bytes))
    }

    /// The full frame, header included.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The payload without the length header.
    pub fn payload(&self) -> &[u8] {
        &self.0[LENGTH_HEADER_SIZE..]
    }

    /// Total size in bytes, header included.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.0.len() == LENGTH_HEADER_SIZE
    }

    /// Consume the frame and return its bytes for transmission.
    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

/// Validate a length header against the bytes that follow it.
fn check_header(data: &[u8]) -> Result<usize, CodecError> {
    if data.len() < LENGTH_HEADER_SIZE {
        return Err(CodecError::UnexpectedEof {
            needed: LENGTH_HEADER_SIZE,
            remaining: data.len(),
        });
    }
    let declared = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
    if declared > MAX_FRAME_SIZE {
        return Err(CodecError::FrameTooLarge { size: declared });
    }
    let actual = data.len() - LENGTH_HEADER_SIZE;
    if declared != actual {
        return Err(CodecError::LengthMismatch { declared, actual });
    }
    Ok(declared)
}

/// Appends fields to a growable buffer and seals them into a [`Frame`].
///
/// The first four bytes are reserved for the length header, which
/// [`complete`](FrameWriter::complete) fills in.
#[derive(Debug)]
pub struct FrameWriter {
    buf: BytesMut,
}

impl Default for FrameWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameWriter {
    /// Create a writer with a small default capacity.
    pub fn new() -> Self {
        Self::with_capacity(64)
    }

    /// Create a writer able to hold `capacity` payload bytes without growing.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut buf = BytesMut::with_capacity(LENGTH_HEADER_SIZE + capacity);
        buf.put_u32_le(0);
        Self { buf }
    }

    /// Append one raw byte.
    pub fn write_byte(&mut self, b: u8) {
        self.buf.put_u8(b);
    }

    /// Append a boolean as one byte.
    pub fn write_boolean(&mut self, v: bool) {
        self.buf.put_u8(u8::from(v));
    }

    /// Append a little-endian `u32`.
    pub fn write_u32(&mut self, v: u32) {
        self.buf.put_u32_le(v);
    }

    /// Append a little-endian `u64`.
    pub fn write_u64(&mut self, v: u64) {
        self.buf.put_u64_le(v);
    }

    /// Append a nullable string.
    ///
    /// Strings of `u32::MAX` bytes or more cannot be represented; such a
    /// payload is far above [`MAX_FRAME_SIZE`] and is rejected by
    /// [`complete`](FrameWriter::complete) anyway.
    pub fn write_utf(&mut self, s: Option<&str>) {
        match s {
            None => self.buf.put_u32_le(NULL_STRING_MARKER),
            Some(s) => {
                let len = u32::try_from(s.len()).unwrap_or(NULL_STRING_MARKER - 1);
                self.buf.put_u32_le(len);
                self.buf.put_slice(s.as_bytes());
            }
        }
    }

    /// Payload bytes written so far.
    pub fn payload_len(&self) -> usize {
        self.buf.len() - LENGTH_HEADER_SIZE
    }

    /// Fix up the length header and seal the frame.
    ///
    /// # Errors
    ///
    /// Returns `FrameTooLarge` if the payload exceeds [`MAX_FRAME_SIZE`].
    pub fn complete(mut self) -> Result<Frame, CodecError> {
        let size = self.payload_len();
        if size > MAX_FRAME_SIZE {
            return Err(CodecError::FrameTooLarge { size });
        }
        self.buf[..LENGTH_HEADER_SIZE].copy_from_slice(&(size as u32).to_le_bytes());
        Ok(Frame(self.buf.freeze()))
    }
}

/// Reads fields back from a frame payload, in write order.
#[derive(Debug)]
pub struct FrameReader<'a> {
    buf: &'a [u8],
}

impl<'a> FrameReader<'a> {
    /// Read a complete frame, header included.
    ///
    /// # Errors
    ///
    /// Fails when the header is missing or malformed, or when the frame was
    /// truncated or padded.
    pub fn new(frame: &'a [u8]) -> Result<Self, CodecError> {
        check_header(frame)?;
        Ok(Self {
            buf: &frame[LENGTH_HEADER_SIZE..],
        })
    }

    /// Read a bare payload whose boundaries are already known.
    pub fn from_payload(payload: &'a [u8]) -> Self {
        Self { buf: payload }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    fn take(&mut self, needed: usize) -> Result<&'a [u8], CodecError> {
        if self.buf.len() < needed {
            return Err(CodecError::UnexpectedEof {
                needed,
                remaining: self.buf.len(),
            });
        }
        let (head, tail) = self.buf.split_at(needed);
        self.buf = tail;
        Ok(head)
    }

    /// Read one raw byte.
    pub fn read_byte(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    /// Read a boolean; any nonzero byte is `true`.
    pub fn read_boolean(&mut self) -> Result<bool, CodecError> {
        Ok(self.read_byte()? != 0)
    }

    /// Read a little-endian `u32`.
    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        let mut bytes = self.take(4)?;
        Ok(bytes.get_u32_le())
    }

    /// Read a little-endian `u64`.
    pub fn read_u64(&mut self) -> Result<u64, CodecError> {
        let mut bytes = self.take(8)?;
        Ok(bytes.get_u64_le())
    }

    /// Read a nullable string.
    pub fn read_utf(&mut self) -> Result<Option<String>, CodecError> {
        let length = self.read_u32()?;
        if length == NULL_STRING_MARKER {
            return Ok(None);
        }
        if length as usize > self.buf.len() {
            return Err(CodecError::InvalidStringLength {
                length,
                remaining: self.buf.len(),
            });
        }
        let bytes = self.take(length as usize)?;
        let s = std::str::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)?;
        Ok(Some(s.to_owned()))
    }

    /// Read a string that must be present.
    ///
    /// # Errors
    ///
    /// Returns `UnexpectedNull` on the null marker, otherwise as [`FrameReader::read_utf`].
    pub fn read_required_utf(&mut self) -> Result<String, CodecError> {
        self.read_utf()?.ok_or(CodecError::UnexpectedNull)
    }

    /// Assert every byte was consumed.
    ///
    /// # Errors
    ///
    /// Returns `TrailingBytes` if unread data remains.
    pub fn finish(self) -> Result<(), CodecError> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(CodecError::TrailingBytes {
                remaining: self.buf.len(),
            })
        }
    }
}

/// Try to split one frame off the front of a byte stream.
///
/// # Returns
///
/// - `Ok(Some((frame, consumed)))` if a complete frame is buffered
/// - `Ok(None)` if more data is needed (not an error condition)
/// - `Err` if the length header is oversized
pub fn try_split_frame(data: &[u8]) -> Result<Option<(Frame, usize)>, CodecError> {
    if data.len() < LENGTH_HEADER_SIZE {
        return Ok(None);
    }
    let declared = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
    if declared > MAX_FRAME_SIZE {
        return Err(CodecError::FrameTooLarge { size: declared });
    }
    let total = LENGTH_HEADER_SIZE + declared;
    if data.len() < total {
        return Ok(None);
    }
    let frame = Frame(Bytes::copy_from_slice(&data[..total]));
    Ok(Some((frame, total)))
}

/// Incremental frame splitter for a continuous byte stream.
///
/// Bytes are pushed as they arrive from a connection; complete frames are
/// popped in order.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer bytes read from the stream.
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes buffered but not yet returned as frames.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Pop the next complete frame, if one is buffered.
    ///
    /// # Errors
    ///
    /// Returns `FrameTooLarge` on an oversized header; the stream cannot be
    /// resynchronized after that and should be closed.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, CodecError> {
        if self.buf.len() < LENGTH_HEADER_SIZE {
            return Ok(None);
        }
        let declared =
            u32::from_le_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize;
        if declared > MAX_FRAME_SIZE {
            return Err(CodecError::FrameTooLarge { size: declared });
        }
        let total = LENGTH_HEADER_SIZE + declared;
        if self.buf.len() < total {
            self.buf.reserve(total - self.buf.len());
            return Ok(None);
        }
        Ok(Some(Frame(self.buf.split_to(total).freeze())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_frame() -> Frame {
        let mut writer = FrameWriter::new();
        writer.write_byte(1);
        writer.write_boolean(false);
        writer.write_boolean(true);
        writer.write_utf(Some("hello你好"));
        writer.write_utf(None);
        writer.complete().expect("complete")
    }

    #[test]
    fn test_mixed_fields_roundtrip() {
        let frame = sample_frame();
        let mut reader = FrameReader::new(frame.as_bytes()).expect("header");

        assert_eq!(reader.read_byte().expect("byte"), 1);
        assert!(!reader.read_boolean().expect("bool"));
        assert!(reader.read_boolean().expect("bool"));
        assert_eq!(
            reader.read_utf().expect("utf").as_deref(),
            Some("hello你好")
        );
        assert_eq!(reader.read_utf().expect("utf"), None);
        reader.finish().expect("fully consumed");
    }

    #[test]
    fn test_length_header_counts_payload() {
        let frame = sample_frame();
        let declared = u32::from_le_bytes(frame.as_bytes()[..4].try_into().expect("slice"));
        assert_eq!(declared as usize, frame.payload().len());
        assert_eq!(frame.len(), LENGTH_HEADER_SIZE + frame.payload().len());
    }

    #[test]
    fn test_utf_byte_length_not_char_count() {
        let mut writer = FrameWriter::new();
        writer.write_utf(Some("你好"));
        let frame = writer.complete().expect("complete");

        let prefix = u32::from_le_bytes(frame.payload()[..4].try_into().expect("slice"));
        assert_eq!(prefix, 6);
    }

    #[test]
    fn test_empty_string_is_not_null() {
        let mut writer = FrameWriter::new();
        writer.write_utf(Some(""));
        writer.write_utf(None);
        let frame = writer.complete().expect("complete");

        let mut reader = FrameReader::new(frame.as_bytes()).expect("header");
        assert_eq!(reader.read_utf().expect("utf").as_deref(), Some(""));
        assert_eq!(reader.read_utf().expect("utf"), None);
    }

    #[test]
    fn test_required_utf_rejects_null() {
        let mut writer = FrameWriter::new();
        writer.write_utf(Some("x"));
        writer.write_utf(None);
        let frame = writer.complete().expect("complete");

        let mut reader = FrameReader::new(frame.as_bytes()).expect("header");
        assert_eq!(reader.read_required_utf().expect("utf"), "x");
        assert_eq!(reader.read_required_utf(), Err(CodecError::UnexpectedNull));
    }

    #[test]
    fn test_boolean_nonzero_reads_true() {
        let mut reader = FrameReader::from_payload(&[0, 1, 7]);
        assert!(!reader.read_boolean().expect("bool"));
        assert!(reader.read_boolean().expect("bool"));
        assert!(reader.read_boolean().expect("bool"));
    }

    #[test]
    fn test_integers_roundtrip() {
        let mut writer = FrameWriter::new();
        writer.write_u32(0xDEAD_BEEF);
        writer.write_u64(u64::MAX - 1);
        let frame = writer.complete().expect("complete");

        let mut reader = FrameReader::new(frame.as_bytes()).expect("header");
        assert_eq!(reader.read_u32().expect("u32"), 0xDEAD_BEEF);
        assert_eq!(reader.read_u64().expect("u64"), u64::MAX - 1);
    }

    #[test]
    fn test_truncated_frame_rejected() {
        let frame = sample_frame();
        let truncated = &frame.as_bytes()[..frame.len() - 1];

        let result = FrameReader::new(truncated);
        assert!(matches!(result, Err(CodecError::LengthMismatch { .. })));
    }

    #[test]
    fn test_truncated_payload_fails_on_read() {
        let frame = sample_frame();
        let payload = frame.payload();
        let mut reader = FrameReader::from_payload(&payload[..payload.len() - 1]);

        assert_eq!(reader.read_byte().expect("byte"), 1);
        reader.read_boolean().expect("bool");
        reader.read_boolean().expect("bool");
        reader.read_utf().expect("utf");
        // The null marker lost its last byte.
        assert_eq!(
            reader.read_utf(),
            Err(CodecError::UnexpectedEof {
                needed: 4,
                remaining: 3,
            })
        );
    }

    #[test]
    fn test_read_byte_past_end() {
        let mut reader = FrameReader::from_payload(&[]);
        assert!(matches!(
            reader.read_byte(),
            Err(CodecError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn test_string_length_past_end() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&10u32.to_le_bytes());
        payload.extend_from_slice(b"abc");

        let mut reader = FrameReader::from_payload(&payload);
        assert_eq!(
            reader.read_utf(),
            Err(CodecError::InvalidStringLength {
                length: 10,
                remaining: 3,
            })
        );
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&2u32.to_le_bytes());
        payload.extend_from_slice(&[0xC3, 0x28]);

        let mut reader = FrameReader::from_payload(&payload);
        assert_eq!(reader.read_utf(), Err(CodecError::InvalidUtf8));
    }

    #[test]
    fn test_trailing_bytes_detected() {
        let reader = FrameReader::from_payload(&[1, 2]);
        assert_eq!(
            reader.finish(),
            Err(CodecError::TrailingBytes { remaining: 2 })
        );
    }

    #[test]
    fn test_header_missing() {
        assert!(matches!(
            FrameReader::new(&[1, 0]),
            Err(CodecError::UnexpectedEof {
                needed: 4,
                remaining: 2,
            })
        ));
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut writer = FrameWriter::new();
        let big = "x".repeat(MAX_FRAME_SIZE);
        writer.write_utf(Some(&big));
        assert!(matches!(
            writer.complete(),
            Err(CodecError::FrameTooLarge { .. })
        ));

        let mut header = ((MAX_FRAME_SIZE + 1) as u32).to_le_bytes().to_vec();
        header.push(0);
        assert!(matches!(
            try_split_frame(&header),
            Err(CodecError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_frame_from_bytes_validates() {
        let frame = sample_frame();
        let copy = Frame::from_bytes(frame.clone().into_bytes()).expect("valid");
        assert_eq!(copy, frame);

        let mut padded = frame.as_bytes().to_vec();
        padded.push(0);
        assert!(Frame::from_bytes(Bytes::from(padded)).is_err());
    }

    #[test]
    fn test_try_split_partial_and_complete() {
        let frame = sample_frame();
        let bytes = frame.as_bytes();

        assert!(try_split_frame(&bytes[..2]).expect("partial").is_none());
        assert!(try_split_frame(&bytes[..bytes.len() - 1])
            .expect("partial")
            .is_none());

        let mut stream = bytes.to_vec();
        stream.extend_from_slice(b"next");
        let (split, consumed) = try_split_frame(&stream).expect("ok").expect("complete");
        assert_eq!(split, frame);
        assert_eq!(consumed, frame.len());
    }

    #[test]
    fn test_decoder_splits_byte_by_byte() {
        let first = sample_frame();
        let mut writer = FrameWriter::new();
        writer.write_u64(42);
        let second = writer.complete().expect("complete");

        let mut stream = first.as_bytes().to_vec();
        stream.extend_from_slice(second.as_bytes());

        let mut decoder = FrameDecoder::new();
        let mut frames = Vec::new();
        for byte in stream {
            decoder.extend(&[byte]);
            if let Some(frame) = decoder.next_frame().expect("decode") {
                frames.push(frame);
            }
        }

        assert_eq!(frames, vec![first, second]);
        assert_eq!(decoder.buffered(), 0);
    }
}

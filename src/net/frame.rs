//! Length-delimited framing.
//!
//! ```text
//! frame = MAGIC (1..=30 bytes) | payload length (u32 LE) | payload
//! ```
//!
//! [`FrameParser`] turns an arbitrarily chunked byte stream back into
//! payloads. [`FrameBuilder`] writes frames and [`FrameReader`] reads the
//! little-endian fields of a payload.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{FrameError, ProtocolError};

/// Longest supported magic.
pub const MAX_MAGIC_SIZE: usize = 30;

const LENGTH_SIZE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Magic,
    Length,
    Payload,
}

/// Incremental frame parser.
///
/// # Examples
///
/// ```
/// use bytes::BytesMut;
/// use appfw::net::{FrameBuilder, FrameParser};
///
/// let mut stream = BytesMut::new();
/// let mut frame = FrameBuilder::begin(&mut stream, b"ECON01");
/// frame.put_u8(1);
/// frame.put_str("status");
/// frame.finish();
///
/// let mut parser = FrameParser::new(b"ECON01", 16 * 1024);
/// let mut payloads = Vec::new();
/// for chunk in stream.chunks(3) {
///     parser.parse_data(chunk, |p| payloads.push(p.to_vec())).unwrap();
/// }
/// assert_eq!(payloads.len(), 1);
/// assert_eq!(payloads[0][0], 1);
/// ```
#[derive(Debug, Clone)]
pub struct FrameParser {
    magic: Vec<u8>,
    max_payload: usize,
    stage: Stage,
    /// Bytes of the current stage collected so far.
    buf: Vec<u8>,
    payload_len: usize,
}

impl FrameParser {
    pub fn new(magic: &[u8], max_payload: usize) -> Self {
        crate::afw_assert_rel!(
            !magic.is_empty() && magic.len() <= MAX_MAGIC_SIZE,
            "magic must be 1..={MAX_MAGIC_SIZE} bytes, got {}",
            magic.len()
        );

        Self {
            magic: magic.to_vec(),
            max_payload,
            stage: Stage::Magic,
            buf: Vec::with_capacity(magic.len().max(LENGTH_SIZE)),
            payload_len: 0,
        }
    }

    #[inline]
    pub fn magic(&self) -> &[u8] {
        &self.magic
    }

    #[inline]
    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    /// Size of magic plus length field.
    #[inline]
    pub fn header_size(&self) -> usize {
        self.magic.len() + LENGTH_SIZE
    }

    /// Drop any partial frame and wait for a magic.
    pub fn reset(&mut self) {
        self.stage = Stage::Magic;
        self.buf.clear();
        self.payload_len = 0;
    }

    /// Feed bytes, calling `on_payload` for every completed frame.
    ///
    /// All of `data` is consumed on success; an incomplete frame is kept for
    /// the next call. After an error the parser must be [`reset`](Self::reset)
    /// before it is used again.
    pub fn parse_data(
        &mut self,
        data: &[u8],
        mut on_payload: impl FnMut(&[u8]),
    ) -> Result<usize, FrameError> {
        let mut rest = data;

        while !rest.is_empty() {
            match self.stage {
                Stage::Magic => {
                    if !self.fill(&mut rest, self.magic.len()) {
                        break;
                    }
                    if self.buf != self.magic {
                        return Err(FrameError::InvalidMagic);
                    }
                    self.buf.clear();
                    self.stage = Stage::Length;
                }

                Stage::Length => {
                    if !self.fill(&mut rest, LENGTH_SIZE) {
                        break;
                    }
                    let mut raw = &self.buf[..];
                    let len = raw.get_u32_le() as usize;
                    self.buf.clear();

                    if len > self.max_payload {
                        return Err(FrameError::PayloadTooLarge {
                            size: len,
                            max: self.max_payload,
                        });
                    }

                    if len == 0 {
                        on_payload(&[]);
                        self.reset();
                    } else {
                        self.payload_len = len;
                        self.stage = Stage::Payload;
                    }
                }

                Stage::Payload => {
                    // Whole payload in the input: no copy.
                    if self.buf.is_empty() && rest.len() >= self.payload_len {
                        let (payload, tail) = rest.split_at(self.payload_len);
                        rest = tail;
                        on_payload(payload);
                        self.reset();
                        continue;
                    }

                    if !self.fill(&mut rest, self.payload_len) {
                        break;
                    }
                    on_payload(&self.buf);
                    self.reset();
                }
            }
        }

        Ok(data.len())
    }

    /// Move bytes from `rest` into `buf` until it holds `target` bytes.
    /// Returns whether it is complete.
    fn fill(&mut self, rest: &mut &[u8], target: usize) -> bool {
        let take = (target - self.buf.len()).min(rest.len());
        self.buf.extend_from_slice(&rest[..take]);
        *rest = &rest[take..];
        self.buf.len() == target
    }
}

/// Writes one frame into a buffer. The length field is patched by
/// [`finish`](Self::finish).
pub struct FrameBuilder<'a> {
    out: &'a mut BytesMut,
    len_pos: usize,
}

impl<'a> FrameBuilder<'a> {
    /// Write the header and start the payload.
    pub fn begin(out: &'a mut BytesMut, magic: &[u8]) -> Self {
        out.put_slice(magic);
        let len_pos = out.len();
        out.put_u32_le(0);
        Self { out, len_pos }
    }

    /// Bytes written to the payload so far.
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.out.len() - self.len_pos - LENGTH_SIZE
    }

    pub fn put_u8(&mut self, v: u8) {
        self.out.put_u8(v);
    }

    pub fn put_u32(&mut self, v: u32) {
        self.out.put_u32_le(v);
    }

    pub fn put_i64(&mut self, v: i64) {
        self.out.put_i64_le(v);
    }

    pub fn put_slice(&mut self, v: &[u8]) {
        self.out.put_slice(v);
    }

    /// Length-prefixed string.
    pub fn put_str(&mut self, s: &str) {
        self.out.put_u32_le(s.len() as u32);
        self.out.put_slice(s.as_bytes());
    }

    /// Patch the length field. Returns the payload size.
    pub fn finish(self) -> usize {
        let len = self.payload_len();
        self.out[self.len_pos..self.len_pos + LENGTH_SIZE].copy_from_slice(&(len as u32).to_le_bytes());
        len
    }
}

/// Reads little-endian fields from a payload.
#[derive(Debug, Clone, Copy)]
pub struct FrameReader<'a> {
    buf: &'a [u8],
}

impl<'a> FrameReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn need(&self, n: usize) -> Result<(), ProtocolError> {
        if self.buf.remaining() < n {
            Err(ProtocolError::Truncated)
        } else {
            Ok(())
        }
    }

    pub fn get_u8(&mut self) -> Result<u8, ProtocolError> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn get_u32(&mut self) -> Result<u32, ProtocolError> {
        self.need(4)?;
        Ok(self.buf.get_u32_le())
    }

    pub fn get_i64(&mut self) -> Result<i64, ProtocolError> {
        self.need(8)?;
        Ok(self.buf.get_i64_le())
    }

    pub fn get_bytes(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        self.need(n)?;
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    /// Length-prefixed UTF-8 string.
    pub fn get_str(&mut self) -> Result<&'a str, ProtocolError> {
        let len = self.get_u32()? as usize;
        let bytes = self.get_bytes(len)?;
        std::str::from_utf8(bytes).map_err(|_| ProtocolError::InvalidUtf8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAGIC: &[u8] = b"ECON01";
    const MAX: usize = 16 * 1024;

    fn frame(payload: &[u8]) -> BytesMut {
        let mut out = BytesMut::new();
        let mut b = FrameBuilder::begin(&mut out, MAGIC);
        b.put_slice(payload);
        b.finish();
        out
    }

    fn collect(parser: &mut FrameParser, stream: &[u8], chunk: usize) -> Vec<Vec<u8>> {
        let mut payloads = Vec::new();
        for c in stream.chunks(chunk) {
            let n = parser.parse_data(c, |p| payloads.push(p.to_vec())).unwrap();
            assert_eq!(n, c.len());
        }
        payloads
    }

    #[test]
    fn test_byte_at_a_time() {
        let p1: Vec<u8> = [&[0x01u8][..], b"hello"].concat();
        let p2: Vec<u8> = std::iter::once(0xCFu8).chain(std::iter::repeat(0xAB).take(511)).collect();
        assert_eq!(p1.len(), 6);
        assert_eq!(p2.len(), 512);

        let mut stream = frame(&p1);
        stream.extend_from_slice(&frame(&p2));

        let mut parser = FrameParser::new(MAGIC, MAX);
        assert_eq!(collect(&mut parser, &stream, 1), vec![p1, p2]);
    }

    #[test]
    fn test_any_chunking() {
        let payloads: Vec<Vec<u8>> = (0..20u8).map(|i| vec![i; i as usize * 37 + 1]).collect();
        let mut stream = BytesMut::new();
        for p in &payloads {
            stream.extend_from_slice(&frame(p));
        }

        for chunk in [1, 2, 3, 7, 64, 1000, stream.len()] {
            let mut parser = FrameParser::new(MAGIC, MAX);
            assert_eq!(collect(&mut parser, &stream, chunk), payloads, "chunk {chunk}");
        }
    }

    #[test]
    fn test_zero_length_payload() {
        let mut stream = frame(&[]);
        stream.extend_from_slice(&frame(&[9]));

        let mut parser = FrameParser::new(MAGIC, MAX);
        assert_eq!(collect(&mut parser, &stream, 1), vec![vec![], vec![9]]);
    }

    #[test]
    fn test_invalid_magic() {
        let mut parser = FrameParser::new(MAGIC, MAX);
        let result = parser.parse_data(b"ECON02\x00\x00\x00\x00", |_| panic!("no payload"));
        assert_eq!(result, Err(FrameError::InvalidMagic));

        parser.reset();
        let good = frame(&[1, 2]);
        assert_eq!(collect(&mut parser, &good, 4), vec![vec![1, 2]]);
    }

    #[test]
    fn test_payload_too_large() {
        let mut parser = FrameParser::new(MAGIC, 8);
        let mut stream = BytesMut::new();
        stream.put_slice(MAGIC);
        stream.put_u32_le(9);

        let result = parser.parse_data(&stream, |_| {});
        assert_eq!(result, Err(FrameError::PayloadTooLarge { size: 9, max: 8 }));

        // Exactly the maximum is fine.
        parser.reset();
        let ok = frame(&[0; 8]);
        assert_eq!(collect(&mut parser, &ok, 5), vec![vec![0; 8]]);
    }

    #[test]
    fn test_builder_and_reader() {
        let mut out = BytesMut::new();
        let mut b = FrameBuilder::begin(&mut out, MAGIC);
        b.put_u8(101);
        b.put_i64(-5);
        b.put_str("héllo");
        assert_eq!(b.payload_len(), 1 + 8 + 4 + 6);
        assert_eq!(b.finish(), 19);

        let payload = &out[MAGIC.len() + 4..];
        assert_eq!(&out[MAGIC.len()..MAGIC.len() + 4], &19u32.to_le_bytes());

        let mut r = FrameReader::new(payload);
        assert_eq!(r.get_u8(), Ok(101));
        assert_eq!(r.get_i64(), Ok(-5));
        assert_eq!(r.get_str(), Ok("héllo"));
        assert_eq!(r.remaining(), 0);
        assert_eq!(r.get_u8(), Err(ProtocolError::Truncated));
    }

    #[test]
    fn test_reader_rejects_bad_strings() {
        let mut r = FrameReader::new(&[10, 0, 0, 0, b'a']);
        assert_eq!(r.get_str(), Err(ProtocolError::Truncated));

        let mut r = FrameReader::new(&[2, 0, 0, 0, 0xFF, 0xFE]);
        assert_eq!(r.get_str(), Err(ProtocolError::InvalidUtf8));
    }
}

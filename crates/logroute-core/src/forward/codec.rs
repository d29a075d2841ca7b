//! Delimiter framing.
//!
//! A frame is `payload || delimiter`. The payload is not escaped, so a
//! payload containing the delimiter splits into two frames on the
//! receiving side.

use std::io;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::DEFAULT_DELIMITER;

/// Splits a byte stream on a fixed delimiter
#[derive(Debug, Clone)]
pub struct DelimiterCodec {
    delimiter: Vec<u8>,
    /// Where the next delimiter search starts, so bytes already scanned
    /// are not scanned again on the next read
    next_index: usize,
}

impl Default for DelimiterCodec {
    fn default() -> Self {
        Self::new(DEFAULT_DELIMITER.as_bytes().to_vec())
    }
}

impl DelimiterCodec {
    /// An empty delimiter falls back to the default one.
    pub fn new(delimiter: Vec<u8>) -> Self {
        let delimiter = if delimiter.is_empty() {
            DEFAULT_DELIMITER.as_bytes().to_vec()
        } else {
            delimiter
        };
        Self {
            delimiter,
            next_index: 0,
        }
    }

    pub fn delimiter(&self) -> &[u8] {
        &self.delimiter
    }

    fn find(&self, buf: &[u8]) -> Option<usize> {
        let start = self.next_index.min(buf.len());
        buf[start..]
            .windows(self.delimiter.len())
            .position(|window| window == self.delimiter.as_slice())
            .map(|pos| start + pos)
    }
}

impl Decoder for DelimiterCodec {
    type Item = Bytes;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>, io::Error> {
        loop {
            match self.find(buf) {
                Some(at) => {
                    let frame = buf.split_to(at).freeze();
                    buf.advance(self.delimiter.len());
                    self.next_index = 0;
                    // Back-to-back delimiters carry nothing
                    if frame.is_empty() {
                        continue;
                    }
                    return Ok(Some(frame));
                }
                None => {
                    // A delimiter may straddle the end of what we have so far
                    self.next_index = buf.len().saturating_sub(self.delimiter.len() - 1);
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>, io::Error> {
        if let Some(frame) = self.decode(buf)? {
            return Ok(Some(frame));
        }
        self.next_index = 0;
        if buf.is_empty() {
            Ok(None)
        } else {
            Ok(Some(buf.split().freeze()))
        }
    }
}

impl Encoder<Bytes> for DelimiterCodec {
    type Error = io::Error;

    fn encode(&mut self, payload: Bytes, dst: &mut BytesMut) -> Result<(), io::Error> {
        dst.reserve(payload.len() + self.delimiter.len());
        dst.put(payload);
        dst.put_slice(&self.delimiter);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(codec: &mut DelimiterCodec, buf: &mut BytesMut) -> Vec<String> {
        let mut frames = Vec::new();
        while let Some(frame) = codec.decode(buf).unwrap() {
            frames.push(String::from_utf8(frame.to_vec()).unwrap());
        }
        frames
    }

    #[test]
    fn test_split_frame_reassembly() {
        let mut codec = DelimiterCodec::default();
        let mut buf = BytesMut::from(&b"{\"a\":1}__LOG4JS__{\"b\""[..]);
        assert_eq!(decode_all(&mut codec, &mut buf), vec!["{\"a\":1}"]);

        buf.extend_from_slice(b":2}__LOG");
        assert!(decode_all(&mut codec, &mut buf).is_empty());

        buf.extend_from_slice(b"4JS__");
        assert_eq!(decode_all(&mut codec, &mut buf), vec!["{\"b\":2}"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_empty_frames_skipped() {
        let mut codec = DelimiterCodec::new(b"|".to_vec());
        let mut buf = BytesMut::from(&b"||one|||two|"[..]);
        assert_eq!(decode_all(&mut codec, &mut buf), vec!["one", "two"]);
    }

    #[test]
    fn test_eof_returns_trailing_bytes() {
        let mut codec = DelimiterCodec::new(b"|".to_vec());
        let mut buf = BytesMut::from(&b"one|partial"[..]);
        assert_eq!(codec.decode_eof(&mut buf).unwrap().unwrap(), "one");
        assert_eq!(codec.decode_eof(&mut buf).unwrap().unwrap(), "partial");
        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_encode_appends_delimiter() {
        let mut codec = DelimiterCodec::default();
        let mut dst = BytesMut::new();
        codec.encode(Bytes::from_static(b"{}"), &mut dst).unwrap();
        codec.encode(Bytes::from_static(b"[]"), &mut dst).unwrap();
        assert_eq!(&dst[..], b"{}__LOG4JS__[]__LOG4JS__");
    }

    #[test]
    fn test_empty_delimiter_uses_default() {
        assert_eq!(DelimiterCodec::new(Vec::new()).delimiter(), b"__LOG4JS__");
    }
}

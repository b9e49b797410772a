//! CBOR encoding and length-prefixed framing.
//!
//! Each message on a stream is a 4-byte big-endian length followed by the
//! CBOR body.

use crate::error::{ProtocolError, ProtocolResult};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Largest frame body accepted by [`FrameDecoder`].
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

const HEADER_LEN: usize = 4;

/// Encodes a value to CBOR bytes.
pub fn encode_cbor<T: Serialize + ?Sized>(value: &T) -> ProtocolResult<Vec<u8>> {
    let mut out = Vec::new();
    ciborium::ser::into_writer(value, &mut out)
        .map_err(|e| ProtocolError::Encode(e.to_string()))?;
    Ok(out)
}

/// Decodes a value from CBOR bytes.
pub fn decode_cbor<T: DeserializeOwned>(bytes: &[u8]) -> ProtocolResult<T> {
    ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::Decode(e.to_string()))
}

/// Wraps `payload` in a length-prefixed frame.
pub fn encode_frame(payload: &[u8]) -> ProtocolResult<Bytes> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge {
            len: payload.len(),
            max: MAX_FRAME_LEN,
        });
    }
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Incremental decoder for length-prefixed frames.
///
/// Bytes may arrive in arbitrary chunks; complete frames are returned in
/// order by [`FrameDecoder::next_frame`].
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    /// Creates an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds received bytes.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Returns the next complete frame, or `None` if more bytes are needed.
    pub fn next_frame(&mut self) -> ProtocolResult<Option<Bytes>> {
        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }
        let len = u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize;
        if len > MAX_FRAME_LEN {
            return Err(ProtocolError::FrameTooLarge {
                len,
                max: MAX_FRAME_LEN,
            });
        }
        if self.buf.len() < HEADER_LEN + len {
            return Ok(None);
        }
        self.buf.advance(HEADER_LEN);
        Ok(Some(self.buf.split_to(len).freeze()))
    }

    /// Checks that no partial frame is left once the stream has ended.
    pub fn finish(&self) -> ProtocolResult<()> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::TruncatedFrame)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_split_across_chunks() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&encode_frame(b"hello").unwrap());
        wire.extend_from_slice(&encode_frame(b"").unwrap());
        wire.extend_from_slice(&encode_frame(b"world!").unwrap());

        let mut decoder = FrameDecoder::new();
        let mut frames = Vec::new();
        for chunk in wire.chunks(3) {
            decoder.push(chunk);
            while let Some(frame) = decoder.next_frame().unwrap() {
                frames.push(frame);
            }
        }
        decoder.finish().unwrap();

        assert_eq!(frames.len(), 3);
        assert_eq!(&frames[0][..], b"hello");
        assert!(frames[1].is_empty());
        assert_eq!(&frames[2][..], b"world!");
    }

    #[test]
    fn truncated_frame_detected() {
        let frame = encode_frame(b"abcdef").unwrap();
        let mut decoder = FrameDecoder::new();
        decoder.push(&frame[..frame.len() - 2]);

        assert!(decoder.next_frame().unwrap().is_none());
        assert_eq!(decoder.finish(), Err(ProtocolError::TruncatedFrame));
    }

    #[test]
    fn oversized_header_rejected() {
        let mut decoder = FrameDecoder::new();
        decoder.push(&u32::MAX.to_be_bytes());
        assert!(matches!(
            decoder.next_frame(),
            Err(ProtocolError::FrameTooLarge { .. })
        ));
    }

    proptest::proptest! {
        #[test]
        fn any_chunking_yields_same_frames(
            payloads in proptest::collection::vec(proptest::collection::vec(proptest::num::u8::ANY, 0..64), 0..8),
            chunk in 1usize..17,
        ) {
            let mut wire = Vec::new();
            for payload in &payloads {
                wire.extend_from_slice(&encode_frame(payload).unwrap());
            }

            let mut decoder = FrameDecoder::new();
            let mut frames = Vec::new();
            for piece in wire.chunks(chunk) {
                decoder.push(piece);
                while let Some(frame) = decoder.next_frame().unwrap() {
                    frames.push(frame.to_vec());
                }
            }

            proptest::prop_assert!(decoder.finish().is_ok());
            proptest::prop_assert_eq!(frames, payloads);
        }
    }

    #[test]
    fn cbor_decode_error_reported() {
        let result: ProtocolResult<String> = decode_cbor(&[0xff, 0x00]);
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }
}

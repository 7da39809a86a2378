use std::marker::PhantomData;

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::CodecError;

const LENGTH_PREFIX: usize = 4;

/// Largest frame accepted by default (100MB)
pub const DEFAULT_MAX_FRAME_LEN: usize = 100 * 1024 * 1024;

/// Bincode codec with length-prefix framing
///
/// Each packet is sent as a 4-byte big-endian length followed by its bincode
/// body.
#[derive(Debug)]
pub struct BincodeCodec<P> {
    max_frame_len: usize,
    _packet: PhantomData<fn() -> P>,
}

impl<P> BincodeCodec<P> {
    pub fn new() -> Self {
        Self::with_max_frame_len(DEFAULT_MAX_FRAME_LEN)
    }

    /// Frames larger than `max_frame_len` are rejected in both directions
    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            max_frame_len,
            _packet: PhantomData,
        }
    }

    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }
}

impl<P> Default for BincodeCodec<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> Clone for BincodeCodec<P> {
    fn clone(&self) -> Self {
        Self::with_max_frame_len(self.max_frame_len)
    }
}

impl<P> Decoder for BincodeCodec<P>
where
    P: for<'de> Deserialize<'de>,
{
    type Item = P;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<P>, CodecError> {
        if src.len() < LENGTH_PREFIX {
            return Ok(None);
        }

        let mut prefix = [0u8; LENGTH_PREFIX];
        prefix.copy_from_slice(&src[..LENGTH_PREFIX]);
        let len = u32::from_be_bytes(prefix) as usize;

        if len > self.max_frame_len {
            return Err(CodecError::FrameTooLarge {
                size: len,
                max: self.max_frame_len,
            });
        }

        if src.len() < LENGTH_PREFIX + len {
            src.reserve(LENGTH_PREFIX + len - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX);
        let body = src.split_to(len);
        Ok(Some(::bincode::deserialize(&body)?))
    }
}

impl<P> Encoder<P> for BincodeCodec<P>
where
    P: Serialize,
{
    type Error = CodecError;

    fn encode(&mut self, packet: P, dst: &mut BytesMut) -> Result<(), CodecError> {
        let body = ::bincode::serialize(&packet)?;

        if body.len() > self.max_frame_len || body.len() > u32::MAX as usize {
            return Err(CodecError::FrameTooLarge {
                size: body.len(),
                max: self.max_frame_len,
            });
        }

        dst.reserve(LENGTH_PREFIX + body.len());
        dst.put_u32(body.len() as u32);
        dst.put_slice(&body);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Job {
        handle: String,
        payload: Vec<u8>,
    }

    fn job(handle: &str) -> Job {
        Job {
            handle: handle.to_string(),
            payload: vec![1, 2, 3],
        }
    }

    #[test]
    fn frame_is_length_prefixed() {
        let mut codec = BincodeCodec::<Job>::new();
        let mut buf = BytesMut::new();
        codec.encode(job("H:1"), &mut buf).unwrap();

        let body = ::bincode::serialize(&job("H:1")).unwrap();
        assert_eq!(&buf[..4], (body.len() as u32).to_be_bytes());
        assert_eq!(&buf[4..], &body[..]);
    }

    #[test]
    fn partial_frames_wait_for_more_input() {
        let mut codec = BincodeCodec::<Job>::new();
        let mut frame = BytesMut::new();
        codec.encode(job("H:2"), &mut frame).unwrap();

        let mut src = BytesMut::from(&frame[..2]);
        assert!(codec.decode(&mut src).unwrap().is_none());

        src.extend_from_slice(&frame[2..frame.len() - 1]);
        assert!(codec.decode(&mut src).unwrap().is_none());

        src.extend_from_slice(&frame[frame.len() - 1..]);
        assert_eq!(codec.decode(&mut src).unwrap(), Some(job("H:2")));
        assert!(src.is_empty());
    }

    #[test]
    fn consecutive_frames_decode_in_order() {
        let mut codec = BincodeCodec::<Job>::new();
        let mut src = BytesMut::new();
        codec.encode(job("first"), &mut src).unwrap();
        codec.encode(job("second"), &mut src).unwrap();

        assert_eq!(codec.decode(&mut src).unwrap(), Some(job("first")));
        assert_eq!(codec.decode(&mut src).unwrap(), Some(job("second")));
        assert_eq!(codec.decode(&mut src).unwrap(), None);
    }

    #[test]
    fn rejects_oversized_inbound_frame() {
        let mut codec = BincodeCodec::<Job>::with_max_frame_len(16);
        let mut src = BytesMut::new();
        src.put_u32(200 * 1024 * 1024);

        match codec.decode(&mut src) {
            Err(CodecError::FrameTooLarge { size, max }) => {
                assert_eq!(size, 200 * 1024 * 1024);
                assert_eq!(max, 16);
            }
            other => panic!("expected FrameTooLarge, got {other:?}"),
        }
    }

    #[test]
    fn rejects_oversized_outbound_packet() {
        let mut codec = BincodeCodec::<Job>::with_max_frame_len(8);
        let mut dst = BytesMut::new();

        let result = codec.encode(job("too-long-handle"), &mut dst);
        assert!(matches!(result, Err(CodecError::FrameTooLarge { .. })));
        assert!(dst.is_empty());
    }
}

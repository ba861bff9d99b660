use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::message::Frame;
use super::MAX_FRAME_SIZE;
use crate::core::Error;

/// Frame codec encoding/decoding link messages.
///
/// Stand-in for the real wire codec: u32 big-endian length prefix followed by
/// a bincode body. The connection layer only sees `encode`/`decode`, so
/// swapping in a genuine MAVLink codec touches this module alone.
#[derive(Clone, Default)]
pub struct FrameCodec;

impl FrameCodec {
    /// Creates a new frame codec
    pub fn new() -> Self {
        FrameCodec
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 4 {
            // Need more data to read the frame length
            return Ok(None);
        }

        let mut length_bytes = [0u8; 4];
        length_bytes.copy_from_slice(&src[..4]);
        let length = u32::from_be_bytes(length_bytes) as usize;

        if length > MAX_FRAME_SIZE {
            return Err(Error::protocol(format!(
                "frame length {} exceeds maximum {}",
                length, MAX_FRAME_SIZE
            )));
        }

        if src.len() < 4 + length {
            // Need more data to read the full frame
            return Ok(None);
        }

        src.advance(4);
        let frame_bytes = src.split_to(length);

        match bincode::deserialize(&frame_bytes) {
            Ok(frame) => Ok(Some(frame)),
            Err(e) => Err(Error::protocol(format!("failed to deserialize frame: {}", e))),
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let bytes = bincode::serialize(&item)
            .map_err(|e| Error::protocol(format!("failed to serialize frame: {}", e)))?;

        if bytes.len() > MAX_FRAME_SIZE {
            return Err(Error::protocol(format!(
                "frame length {} exceeds maximum {}",
                bytes.len(),
                MAX_FRAME_SIZE
            )));
        }

        dst.reserve(4 + bytes.len());
        dst.put_u32(bytes.len() as u32);
        dst.put_slice(&bytes);
        Ok(())
    }
}

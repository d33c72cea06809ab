//! Length-prefixed framing for bus messages.
//!
//! Every JSON-RPC message exchanged between an attachment and the router is
//! framed with a 4-byte big-endian length prefix:
//! ```text
//! +----------------+------------------+
//! |  4 bytes       |  N bytes         |
//! |  (length BE)   |  (JSON payload)  |
//! +----------------+------------------+
//! ```

use bytes::{Buf, BufMut, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

use crate::protocol::Message;

/// Largest payload accepted on either side of the bus (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

const LENGTH_PREFIX_SIZE: usize = 4;

/// Codec turning a byte stream into [`Message`]s and back.
#[derive(Debug, Default)]
pub struct FrameCodec {
    pending_len: Option<usize>,
}

impl FrameCodec {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for FrameCodec {
    type Item = Message;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let len = match self.pending_len {
            Some(len) => len,
            None => {
                if src.len() < LENGTH_PREFIX_SIZE {
                    return Ok(None);
                }
                let len = src.get_u32() as usize;
                if len > MAX_FRAME_SIZE {
                    return Err(CodecError::FrameTooLarge(len));
                }
                self.pending_len = Some(len);
                len
            }
        };

        if src.len() < len {
            src.reserve(len - src.len());
            return Ok(None);
        }

        let payload = src.split_to(len);
        self.pending_len = None;

        let text = std::str::from_utf8(&payload)?;
        Ok(Some(serde_json::from_str(text)?))
    }
}

impl Encoder<Message> for FrameCodec {
    type Error = CodecError;

    // Frame size is checked against MAX_FRAME_SIZE, which fits in u32
    #[allow(clippy::cast_possible_truncation)]
    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = serde_json::to_vec(&item)?;

        if payload.len() > MAX_FRAME_SIZE {
            return Err(CodecError::FrameTooLarge(payload.len()));
        }

        dst.reserve(LENGTH_PREFIX_SIZE + payload.len());
        dst.put_u32(payload.len() as u32);
        dst.put_slice(&payload);

        Ok(())
    }
}

/// Errors raised while framing or parsing bus traffic
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("Frame too large: {0} bytes (max: {MAX_FRAME_SIZE})")]
    FrameTooLarge(usize),
}

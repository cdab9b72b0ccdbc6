//! Tokio codec for line-delimited JSON frames

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;
use crate::frame::{RpcFrame, MAX_LINE_LENGTH};

/// Codec for encoding/decoding remote-call frames, one per line
#[derive(Debug, Default)]
pub struct RpcCodec {
    /// Bytes of the buffer already scanned for a newline
    scanned: usize,
}

impl RpcCodec {
    /// Create a new codec
    pub fn new() -> Self {
        Self { scanned: 0 }
    }
}

impl Decoder for RpcCodec {
    type Item = RpcFrame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let newline = src[self.scanned..].iter().position(|b| *b == b'\n');

            let Some(offset) = newline else {
                if src.len() > MAX_LINE_LENGTH {
                    return Err(ProtocolError::FrameTooLarge {
                        size: src.len(),
                        max: MAX_LINE_LENGTH,
                    });
                }
                self.scanned = src.len();
                return Ok(None);
            };

            let line_len = self.scanned + offset;
            self.scanned = 0;

            if line_len > MAX_LINE_LENGTH {
                return Err(ProtocolError::FrameTooLarge {
                    size: line_len,
                    max: MAX_LINE_LENGTH,
                });
            }

            let line = src.split_to(line_len + 1);
            let line = line[..line_len].trim_ascii();
            if line.is_empty() {
                continue;
            }

            return Ok(Some(serde_json::from_slice(line)?));
        }
    }
}

impl Encoder<RpcFrame> for RpcCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: RpcFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = serde_json::to_vec(&frame)?;

        if payload.len() > MAX_LINE_LENGTH {
            return Err(ProtocolError::FrameTooLarge {
                size: payload.len(),
                max: MAX_LINE_LENGTH,
            });
        }

        dst.reserve(payload.len() + 1);
        dst.extend_from_slice(&payload);
        dst.put_u8(b'\n');

        Ok(())
    }
}

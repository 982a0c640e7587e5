//! Outbound frame encoding.
//!
//! Image pixel data is not copied through the codec: the encoder emits the
//! prefix, image header and name, and the caller streams the raw bytes
//! right after.

use bytes::{BufMut, BytesMut};
use tokio_util::codec::Encoder;

use crate::error::PicoError;
use crate::wire::{
    FramePrefix, IMAGE_HEADER_SIZE, ImageHeader, MarkerRecord, PREFIX_SIZE, PayloadType, put_string,
};

/// A frame the client sends to the viewer.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    /// Client identification, sent once per connection.
    Handshake { client_id: String },
    /// Everything of an image frame up to the pixel data.
    Image { header: ImageHeader, name: String },
    /// Full marker table publication.
    MarkerSync(Vec<MarkerRecord>),
}

impl OutboundFrame {
    /// Encode into a fresh buffer.
    pub fn to_bytes(self) -> Result<BytesMut, PicoError> {
        let mut dst = BytesMut::new();
        PicoCodec.encode(self, &mut dst)?;
        Ok(dst)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PicoCodec;

impl Encoder<OutboundFrame> for PicoCodec {
    type Error = PicoError;

    fn encode(&mut self, item: OutboundFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            OutboundFrame::Handshake { client_id } => {
                FramePrefix::new(PayloadType::Handshake).encode_into(dst);
                put_string(dst, &client_id);
            }
            OutboundFrame::Image { header, name } => {
                dst.reserve(PREFIX_SIZE + IMAGE_HEADER_SIZE + 4 + name.len() + 1);
                FramePrefix::new(PayloadType::Image).encode_into(dst);
                header.encode_into(dst);
                put_string(dst, &name);
            }
            OutboundFrame::MarkerSync(records) => {
                let count = u32::try_from(records.len())
                    .map_err(|_| PicoError::InvalidArgument("too many markers"))?;
                FramePrefix::new(PayloadType::MarkerSync).encode_into(dst);
                dst.put_u32_le(count);
                for record in &records {
                    record.encode_into(dst);
                }
            }
        }
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────

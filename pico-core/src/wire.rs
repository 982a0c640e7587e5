//! Wire format of the Pico Pixel protocol.
//!
//! Every frame starts with a 16-byte prefix:
//!
//! ```text
//! magic:          u32  (4)   0x5049434F ('P','I','C','O')
//! payload_type:   u32  (4)   see PayloadType
//! version:        u32  (4)   1
//! is_big_endian:  u32  (4)   0 = little-endian body
//! ```
//!
//! followed by a payload-specific body:
//!
//! ```text
//! Handshake:   id_length u32, id bytes + NUL      (id_length counts the NUL)
//! Image:       width, height, pitch, pixel_format, srgb, upside_down  (u32 each)
//!              name_length u32, name + NUL, pitch * height raw bytes
//! MarkerSync:  marker_count u32, then per marker:
//!              index u32, use_count u32, color u32, name_length u32, name + NUL
//! ```
//!
//! Outbound frames are always little-endian. Inbound frames are decoded in
//! the byte order their prefix declares.

use bytes::{BufMut, BytesMut};

use crate::error::PicoError;

// ── Constants ────────────────────────────────────────────────────

/// Frame signature, `'P','I','C','O'` read as a big-endian word.
pub const SIGNATURE: u32 = 0x5049_434F;

/// Protocol version written into every prefix.
pub const PROTOCOL_VERSION: u32 = 1;

/// Port the viewer listens on by default.
pub const DEFAULT_PORT: u16 = 2001;

/// Ports up to and including this value are refused.
pub const RESERVED_PORT_MAX: u16 = 1024;

/// Display colour given to markers created without one.
pub const DEFAULT_MARKER_COLOR: u32 = 0xFF66_FF00;

/// Prefix for names generated for anonymous images.
pub const AUTO_IMAGE_PREFIX: &str = "Pixel-PrintF-Image";

/// Encoded size of [`FramePrefix`].
pub const PREFIX_SIZE: usize = 16;

/// Encoded size of the image body header (after the prefix).
pub const IMAGE_HEADER_SIZE: usize = 24;

/// Fixed part of a marker record before its name bytes.
pub const MARKER_RECORD_FIXED_SIZE: usize = 16;

/// Upper bound accepted for an inbound length-prefixed string.
pub const MAX_NAME_LEN: u32 = 64 * 1024;

// ── ByteOrder ────────────────────────────────────────────────────

/// Byte order of a frame body, as declared by its sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    #[default]
    Little,
    Big,
}

impl ByteOrder {
    pub fn word(self, bytes: [u8; 4]) -> u32 {
        match self {
            ByteOrder::Little => u32::from_le_bytes(bytes),
            ByteOrder::Big => u32::from_be_bytes(bytes),
        }
    }

    /// Word at `offset`; `bytes` must hold at least `offset + 4` bytes.
    pub fn word_at(self, bytes: &[u8], offset: usize) -> u32 {
        let mut word = [0u8; 4];
        word.copy_from_slice(&bytes[offset..offset + 4]);
        self.word(word)
    }
}

// ── PayloadType ──────────────────────────────────────────────────

/// Payload kinds carried after the prefix.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadType {
    Unknown = 0,
    Handshake = 1,
    Image = 2,
    MarkerSync = 3,
}

impl TryFrom<u32> for PayloadType {
    type Error = PicoError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PayloadType::Unknown),
            1 => Ok(PayloadType::Handshake),
            2 => Ok(PayloadType::Image),
            3 => Ok(PayloadType::MarkerSync),
            _ => Err(PicoError::UnknownVariant {
                type_name: "PayloadType",
                value,
            }),
        }
    }
}

// ── PixelFormat ──────────────────────────────────────────────────

/// Pixel layout of an image buffer, as understood by the viewer.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PixelFormat {
    #[default]
    Unknown = 0,
    Rgba8 = 1,
    Bgra8 = 2,
    Argb8 = 3,
    Abgr8 = 4,
    Rgb8 = 5,
    Bgr8 = 6,
    R5g6b5 = 7,
    /// 32-bit float depth values.
    Depth = 8,
}

impl PixelFormat {
    /// Bytes consumed by a single pixel, `None` when unknown.
    pub const fn bytes_per_pixel(self) -> Option<usize> {
        match self {
            PixelFormat::Unknown => None,
            PixelFormat::Rgba8
            | PixelFormat::Bgra8
            | PixelFormat::Argb8
            | PixelFormat::Abgr8
            | PixelFormat::Depth => Some(4),
            PixelFormat::Rgb8 | PixelFormat::Bgr8 => Some(3),
            PixelFormat::R5g6b5 => Some(2),
        }
    }
}

impl TryFrom<u32> for PixelFormat {
    type Error = PicoError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PixelFormat::Unknown),
            1 => Ok(PixelFormat::Rgba8),
            2 => Ok(PixelFormat::Bgra8),
            3 => Ok(PixelFormat::Argb8),
            4 => Ok(PixelFormat::Abgr8),
            5 => Ok(PixelFormat::Rgb8),
            6 => Ok(PixelFormat::Bgr8),
            7 => Ok(PixelFormat::R5g6b5),
            8 => Ok(PixelFormat::Depth),
            _ => Err(PicoError::UnknownVariant {
                type_name: "PixelFormat",
                value,
            }),
        }
    }
}

// ── FramePrefix ──────────────────────────────────────────────────

/// Common prefix of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramePrefix {
    pub payload_type: u32,
    pub version: u32,
    pub order: ByteOrder,
}

impl FramePrefix {
    /// Prefix for an outbound frame of the given kind.
    pub fn new(payload_type: PayloadType) -> Self {
        Self {
            payload_type: payload_type as u32,
            version: PROTOCOL_VERSION,
            order: ByteOrder::Little,
        }
    }

    /// Payload kind, if recognised.
    pub fn kind(&self) -> Result<PayloadType, PicoError> {
        PayloadType::try_from(self.payload_type)
    }

    /// Serialize (always little-endian).
    pub fn encode_into(&self, dst: &mut BytesMut) {
        dst.put_u32_le(SIGNATURE);
        dst.put_u32_le(self.payload_type);
        dst.put_u32_le(self.version);
        dst.put_u32_le((self.order == ByteOrder::Big) as u32);
    }

    /// Deserialize, honoring the declared endianness flag.
    ///
    /// The flag is 0 or 1 in either byte order, so any non-zero byte in
    /// its slot marks a big-endian body.
    pub fn decode(bytes: &[u8]) -> Result<Self, PicoError> {
        if bytes.len() < PREFIX_SIZE {
            return Err(PicoError::ProtocolDesync("frame prefix too short"));
        }
        let order = if bytes[12..16].iter().any(|&b| b != 0) {
            ByteOrder::Big
        } else {
            ByteOrder::Little
        };
        let magic = order.word_at(bytes, 0);
        if magic != SIGNATURE {
            return Err(PicoError::InvalidMagic(magic));
        }
        Ok(Self {
            payload_type: order.word_at(bytes, 4),
            version: order.word_at(bytes, 8),
            order,
        })
    }
}

// ── ImageHeader ──────────────────────────────────────────────────

/// Body header of an image frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageHeader {
    pub width: u32,
    pub height: u32,
    pub pitch: u32,
    pub pixel_format: PixelFormat,
    pub srgb: bool,
    pub upside_down: bool,
}

impl ImageHeader {
    /// Bytes of pixel data following the name.
    pub fn data_len(&self) -> usize {
        self.pitch as usize * self.height as usize
    }

    pub fn encode_into(&self, dst: &mut BytesMut) {
        dst.put_u32_le(self.width);
        dst.put_u32_le(self.height);
        dst.put_u32_le(self.pitch);
        dst.put_u32_le(self.pixel_format as u32);
        dst.put_u32_le(self.srgb as u32);
        dst.put_u32_le(self.upside_down as u32);
    }
}

// ── MarkerRecord ─────────────────────────────────────────────────

/// One marker entry of a marker-sync frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerRecord {
    pub index: u32,
    pub use_count: u32,
    pub color: u32,
    pub name: String,
}

impl MarkerRecord {
    pub fn encode_into(&self, dst: &mut BytesMut) {
        dst.put_u32_le(self.index);
        dst.put_u32_le(self.use_count);
        dst.put_u32_le(self.color);
        put_string(dst, &self.name);
    }
}

// ── Strings ──────────────────────────────────────────────────────

/// Write `len + 1`, the bytes, and a NUL terminator.
pub fn put_string(dst: &mut BytesMut, s: &str) {
    dst.reserve(4 + s.len() + 1);
    dst.put_u32_le(s.len() as u32 + 1);
    dst.put_slice(s.as_bytes());
    dst.put_u8(0);
}

/// Validate an inbound string length field.
pub fn check_name_len(len: u32) -> Result<usize, PicoError> {
    if len == 0 || len > MAX_NAME_LEN {
        return Err(PicoError::ProtocolDesync("string length out of range"));
    }
    Ok(len as usize)
}

/// Decode a NUL-terminated string body.
pub fn decode_name(bytes: &[u8]) -> Result<String, PicoError> {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8(bytes[..end].to_vec())
        .map_err(|_| PicoError::ProtocolDesync("string is not valid utf-8"))
}

/// Signed wire count to an unsigned trigger count; negatives become zero.
pub fn clamp_count(raw: u32) -> u32 {
    (raw as i32).max(0) as u32
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_layout_is_little_endian() {
        let mut buf = BytesMut::new();
        FramePrefix::new(PayloadType::Image).encode_into(&mut buf);

        assert_eq!(buf.len(), PREFIX_SIZE);
        assert_eq!(&buf[0..4], &SIGNATURE.to_le_bytes());
        assert_eq!(&buf[4..8], &2u32.to_le_bytes());
        assert_eq!(&buf[8..12], &1u32.to_le_bytes());
        assert_eq!(&buf[12..16], &[0, 0, 0, 0]);

        let prefix = FramePrefix::decode(&buf).unwrap();
        assert_eq!(prefix.kind().unwrap(), PayloadType::Image);
        assert_eq!(prefix.order, ByteOrder::Little);
    }

    #[test]
    fn big_endian_prefix_is_honored() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&SIGNATURE.to_be_bytes());
        raw.extend_from_slice(&3u32.to_be_bytes());
        raw.extend_from_slice(&1u32.to_be_bytes());
        raw.extend_from_slice(&1u32.to_be_bytes());

        let prefix = FramePrefix::decode(&raw).unwrap();
        assert_eq!(prefix.order, ByteOrder::Big);
        assert_eq!(prefix.kind().unwrap(), PayloadType::MarkerSync);
        assert_eq!(prefix.version, 1);
    }

    #[test]
    fn bad_magic_rejected() {
        let raw = [0u8; PREFIX_SIZE];
        assert!(matches!(
            FramePrefix::decode(&raw),
            Err(PicoError::InvalidMagic(0))
        ));
    }

    #[test]
    fn short_prefix_is_desync() {
        assert!(matches!(
            FramePrefix::decode(&[0x4F, 0x43]),
            Err(PicoError::ProtocolDesync(_))
        ));
    }

    #[test]
    fn unknown_payload_type() {
        assert!(PayloadType::try_from(9).is_err());
        assert!(PixelFormat::try_from(0x7fff_ffff).is_err());
    }

    #[test]
    fn image_header_layout() {
        let hdr = ImageHeader {
            width: 640,
            height: 480,
            pitch: 2560,
            pixel_format: PixelFormat::Bgra8,
            srgb: true,
            upside_down: false,
        };
        let mut buf = BytesMut::new();
        hdr.encode_into(&mut buf);
        assert_eq!(buf.len(), IMAGE_HEADER_SIZE);
        assert_eq!(ByteOrder::Little.word_at(&buf, 12), PixelFormat::Bgra8 as u32);
        assert_eq!(ByteOrder::Little.word_at(&buf, 16), 1);
        assert_eq!(hdr.data_len(), 2560 * 480);
    }

    #[test]
    fn string_has_length_and_terminator() {
        let mut buf = BytesMut::new();
        put_string(&mut buf, "gbuffer");
        assert_eq!(&buf[0..4], &8u32.to_le_bytes());
        assert_eq!(&buf[4..11], b"gbuffer");
        assert_eq!(buf[11], 0);
        assert_eq!(decode_name(&buf[4..]).unwrap(), "gbuffer");
    }

    #[test]
    fn name_length_bounds() {
        assert!(check_name_len(0).is_err());
        assert!(check_name_len(MAX_NAME_LEN + 1).is_err());
        assert_eq!(check_name_len(5).unwrap(), 5);
    }

    #[test]
    fn negative_counts_clamp_to_zero() {
        assert_eq!(clamp_count((-4i32) as u32), 0);
        assert_eq!(clamp_count(12), 12);
    }

    #[test]
    fn pixel_sizes() {
        assert_eq!(PixelFormat::Rgba8.bytes_per_pixel(), Some(4));
        assert_eq!(PixelFormat::Bgr8.bytes_per_pixel(), Some(3));
        assert_eq!(PixelFormat::R5g6b5.bytes_per_pixel(), Some(2));
        assert_eq!(PixelFormat::Unknown.bytes_per_pixel(), None);
    }
}

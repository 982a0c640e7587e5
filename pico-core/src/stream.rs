//! Image streaming, gated or not by a marker.

use tracing::{debug, warn};

use crate::client::PicoClient;
use crate::codec::OutboundFrame;
use crate::error::PicoError;
use crate::wire::{ImageHeader, PixelFormat};

/// Description of an image buffer about to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    /// Display name. An empty name gets a generated one.
    pub name: String,
    pub pixel_format: PixelFormat,
    pub width: u32,
    pub height: u32,
    /// Bytes per row, padding included.
    pub pitch: u32,
    pub srgb: bool,
    pub upside_down: bool,
}

impl ImageInfo {
    pub fn new(pixel_format: PixelFormat, width: u32, height: u32, pitch: u32) -> Self {
        Self {
            name: String::new(),
            pixel_format,
            width,
            height,
            pitch,
            srgb: false,
            upside_down: false,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn srgb(mut self, srgb: bool) -> Self {
        self.srgb = srgb;
        self
    }

    pub fn upside_down(mut self, upside_down: bool) -> Self {
        self.upside_down = upside_down;
        self
    }

    /// Check dimensions against `data` and build the wire header.
    ///
    /// Width, height and pitch must be positive and fit a signed 32-bit
    /// field, a row of a known pixel format must fit in `pitch`, and `data`
    /// must hold at least `pitch * height` bytes.
    pub fn validate(&self, data: &[u8]) -> Result<ImageHeader, PicoError> {
        const MAX_DIM: u32 = i32::MAX as u32;
        if self.width == 0 || self.height == 0 || self.pitch == 0 {
            return Err(PicoError::InvalidArgument("image dimensions must be positive"));
        }
        if self.width > MAX_DIM || self.height > MAX_DIM || self.pitch > MAX_DIM {
            return Err(PicoError::InvalidArgument("image dimension out of range"));
        }
        if let Some(bpp) = self.pixel_format.bytes_per_pixel() {
            if (self.width as usize).saturating_mul(bpp) > self.pitch as usize {
                return Err(PicoError::InvalidArgument("pitch shorter than one row of pixels"));
            }
        }
        if data.is_empty() {
            return Err(PicoError::InvalidArgument("image buffer is empty"));
        }
        let needed = (self.pitch as usize)
            .checked_mul(self.height as usize)
            .ok_or(PicoError::InvalidArgument("image size overflows"))?;
        if data.len() < needed {
            return Err(PicoError::InvalidArgument("image buffer shorter than pitch * height"));
        }
        Ok(ImageHeader {
            width: self.width,
            height: self.height,
            pitch: self.pitch,
            pixel_format: self.pixel_format,
            srgb: self.srgb,
            upside_down: self.upside_down,
        })
    }
}

impl PicoClient {
    /// Send an image frame: header, name, then exactly `pitch * height`
    /// bytes of `data`.
    ///
    /// Nothing is queued while disconnected. After a transport error the
    /// link may be unusable; check [`is_connected`](Self::is_connected).
    pub async fn send_image(&self, info: &ImageInfo, data: &[u8]) -> Result<(), PicoError> {
        let header = info.validate(data)?;
        if !self.is_connected() {
            return Err(PicoError::NotConnected);
        }
        self.write_image(info, header, data).await
    }

    /// Send an image only if the marker at `marker` has triggers left,
    /// consuming one.
    ///
    /// Arguments and the link are checked first, so a rejected call never
    /// spends a trigger. An exhausted marker fails with
    /// [`PicoError::MarkerExhausted`] and writes nothing.
    pub async fn send_image_gated(&self, marker: u32, info: &ImageInfo, data: &[u8]) -> Result<(), PicoError> {
        let header = info.validate(data)?;
        if !self.is_connected() {
            return Err(PicoError::NotConnected);
        }
        let remaining = self.shared.markers().take_trigger(marker)?;
        debug!(marker, remaining, "marker trigger consumed");
        self.write_image(info, header, data).await
    }

    async fn write_image(&self, info: &ImageInfo, header: ImageHeader, data: &[u8]) -> Result<(), PicoError> {
        let name = if info.name.is_empty() {
            self.shared.next_image_name()
        } else {
            info.name.clone()
        };
        let head = OutboundFrame::Image { header, name }.to_bytes()?;
        let pixels = &data[..header.data_len()];

        if let Err(e) = self.shared.send_parts(&[&head, pixels]).await {
            warn!(width = header.width, height = header.height, "image send failed: {e}");
            return Err(e);
        }
        debug!(bytes = head.len() + pixels.len(), "image sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn rgba(width: u32, height: u32) -> ImageInfo {
        ImageInfo::new(PixelFormat::Rgba8, width, height, width * 4)
    }

    #[test]
    fn zero_dimensions_rejected() {
        let data = vec![0u8; 64];
        for info in [rgba(0, 4), rgba(4, 0), ImageInfo::new(PixelFormat::Rgba8, 4, 4, 0)] {
            let err = info.validate(&data).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        }
    }

    #[test]
    fn pitch_must_cover_a_row() {
        let data = vec![0u8; 64];
        assert!(ImageInfo::new(PixelFormat::Rgba8, 4, 2, 15).validate(&data).is_err());
        assert!(ImageInfo::new(PixelFormat::Rgb8, 4, 2, 12).validate(&data).is_ok());
        // Padded rows are fine.
        assert!(ImageInfo::new(PixelFormat::R5g6b5, 4, 2, 16).validate(&data).is_ok());
        // Unknown formats carry no row size to check.
        assert!(ImageInfo::new(PixelFormat::Unknown, 64, 2, 1).validate(&data).is_ok());
    }

    #[test]
    fn short_or_empty_buffer_rejected() {
        assert!(rgba(4, 4).validate(&[]).is_err());
        assert!(rgba(4, 4).validate(&[0u8; 63]).is_err());
        assert!(ImageInfo::new(PixelFormat::Rgba8, 1, 1, u32::MAX).validate(&[0u8; 4]).is_err());
    }

    #[test]
    fn validate_builds_header() {
        let info = rgba(4, 2).srgb(true).upside_down(true).with_name("lighting");
        // Extra trailing bytes are allowed; only pitch * height are sent.
        let header = info.validate(&[0u8; 40]).unwrap();
        assert_eq!(header.data_len(), 32);
        assert!(header.srgb);
        assert!(header.upside_down);
        assert_eq!(info.name, "lighting");
    }

    #[tokio::test]
    async fn send_without_connection_fails() {
        let client = PicoClient::with_client_id("test");
        let data = vec![0u8; 16];
        assert!(matches!(
            client.send_image(&rgba(2, 2), &data).await,
            Err(PicoError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn gated_send_offline_keeps_trigger() {
        let client = PicoClient::with_client_id("test");
        let marker = client.add_marker("depth", 1).unwrap();
        let data = vec![0u8; 16];

        assert!(client.send_image_gated(marker, &rgba(2, 2), &data).await.is_err());
        assert_eq!(client.marker_use_count(marker), Some(1));

        assert!(matches!(
            client.send_image_gated(marker, &rgba(0, 2), &data).await,
            Err(PicoError::InvalidArgument(_))
        ));
        assert_eq!(client.marker_use_count(marker), Some(1));
    }
}

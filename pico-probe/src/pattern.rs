//! Synthetic test images.

/// Fill an RGBA8 buffer with a gradient that scrolls with `frame`.
///
/// Rows are tightly packed, so the pitch is `width * 4`.
pub fn gradient_rgba(width: u32, height: u32, frame: u32) -> Vec<u8> {
    let (w, h) = (width as usize, height as usize);
    let shift = frame as usize;
    let mut pixels = Vec::with_capacity(w * h * 4);
    for y in 0..h {
        for x in 0..w {
            pixels.push(((x + shift) * 255 / w.max(1)) as u8);
            pixels.push((y * 255 / h.max(1)) as u8);
            pixels.push((shift * 4) as u8);
            pixels.push(0xFF);
        }
    }
    pixels
}

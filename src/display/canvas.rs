use crate::lcdc::LcdFormat;
use embedded_graphics_core::pixelcolor::{Rgb565, Rgb888};
use embedded_graphics_core::prelude::*;

/// `DrawTarget` over a framebuffer in the controller's native pixel layout.
///
/// Pixels are stored little-endian: RGB565 as one `u16`, RGB888 as B, G, R
/// and ARGB8888 as B, G, R, A with opaque alpha.
pub struct Canvas<'a> {
    buf: &'a mut [u8],
    width: u32,
    height: u32,
    format: LcdFormat,
}

impl<'a> Canvas<'a> {
    /// `None` when `buf` is too small for `width * height` pixels
    pub fn new(buf: &'a mut [u8], width: u32, height: u32, format: LcdFormat) -> Option<Self> {
        let needed = width as usize * height as usize * format.bytes_per_pixel();
        if buf.len() < needed {
            return None;
        }
        Some(Self {
            buf,
            width,
            height,
            format,
        })
    }

    pub fn format(&self) -> LcdFormat {
        self.format
    }

    fn put(&mut self, x: u32, y: u32, color: Rgb888) {
        let bpp = self.format.bytes_per_pixel();
        let offset = (y as usize * self.width as usize + x as usize) * bpp;
        let px = &mut self.buf[offset..offset + bpp];
        match self.format {
            LcdFormat::Rgb565 => {
                let raw = Rgb565::from(color).into_storage();
                px.copy_from_slice(&raw.to_le_bytes());
            }
            LcdFormat::Rgb888 => {
                px.copy_from_slice(&[color.b(), color.g(), color.r()]);
            }
            LcdFormat::Argb8888 => {
                px.copy_from_slice(&[color.b(), color.g(), color.r(), 0xFF]);
            }
        }
    }
}

impl OriginDimensions for Canvas<'_> {
    fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

impl DrawTarget for Canvas<'_> {
    type Color = Rgb888;
    type Error = core::convert::Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(point, color) in pixels {
            if point.x < 0 || point.y < 0 {
                continue;
            }
            let (x, y) = (point.x as u32, point.y as u32);
            if x < self.width && y < self.height {
                self.put(x, y, color);
            }
        }
        Ok(())
    }

    fn clear(&mut self, color: Rgb888) -> Result<(), Self::Error> {
        for y in 0..self.height {
            for x in 0..self.width {
                self.put(x, y, color);
            }
        }
        Ok(())
    }
}

//! Ameba LVGL port - board support for an LVGL-style renderer on the Ameba SoC
//!
//! Drivers for the RGB LCD controller, the JPEG/PP codec, the PPE blitter,
//! the GT911 touch controller and the ST7701S panel, plus the read-only
//! ROMFS that serves UI assets. Hardware access goes through traits so
//! everything but `hal::ameba` runs on the host.

pub mod config;
pub mod display;
pub mod gt911;
pub mod hal;
pub mod jpeg;
pub mod lcdc;
pub mod logging;
pub mod port;
pub mod ppe;
pub mod romfs;
pub mod st7701s;

#[cfg(test)]
mod tests;

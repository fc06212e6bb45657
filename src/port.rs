//! Renderer HAL bring-up: tick source, display, framebuffers and the flush
//! callback, in the order the renderer expects them.

use crate::config::PortConfig;
use crate::display::{Area, DisplayManager, FlushContext, LvDisplayHandle};
use crate::hal::LcdcHw;
use crate::jpeg;
use crate::lcdc::SharedLcdc;
use crate::logging;
use anyhow::{anyhow, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
    /// Renderer draws in place into the framebuffers
    #[default]
    Direct,
    /// Every flush is a complete frame
    Full,
}

/// The rendering library, seen from the port
pub trait LvglBackend {
    fn set_tick_cb(&mut self, tick: fn() -> u32);
    fn register_image_decoder(&mut self, name: &'static str) -> Result<()>;
    fn create_display(&mut self, width: u32, height: u32) -> Result<LvDisplayHandle>;
    /// `size` is in bytes
    fn set_buffers(&mut self, display: LvDisplayHandle, buf1: usize, buf2: usize, size: usize, mode: RenderMode);
    /// Route the display's flush callback to [`UiPort::flush`]
    fn set_flush_mode(&mut self, display: LvDisplayHandle, mode: RenderMode);
}

/// Milliseconds since boot, wrapping
pub fn tick_ms() -> u32 {
    logging::uptime().as_millis() as u32
}

pub struct UiPort<H: LcdcHw> {
    display: DisplayManager<H>,
    lv_display: LvDisplayHandle,
    mode: RenderMode,
}

impl<H: LcdcHw> UiPort<H> {
    pub fn init<B: LvglBackend>(config: &PortConfig, lcdc: SharedLcdc<H>, backend: &mut B) -> Result<Self> {
        config.validate()?;
        if !logging::set_max_level_from_str(&config.log_level) {
            warn!("Unknown log level '{}'", config.log_level);
        }

        if config.hw_jpeg {
            backend.register_image_decoder(jpeg::DECODER_NAME)?;
        }

        backend.set_tick_cb(tick_ms);

        let mut display = DisplayManager::new(lcdc, config.color_depth, config.width, config.height)?
            .with_flip_timeout(Duration::from_millis(config.flip_timeout_ms))
            .with_buffer_check(config.buffer_check);

        let buf1 = display.buffer_addr(0).ok_or_else(|| anyhow!("no framebuffer 0"))?;
        let buf2 = display.buffer_addr(1).ok_or_else(|| anyhow!("no framebuffer 1"))?;

        let lv_display = backend.create_display(config.width, config.height)?;
        display.set_lv_display(lv_display);

        backend.set_buffers(lv_display, buf1, buf2, config.buffer_size(), config.render_mode);
        backend.set_flush_mode(lv_display, config.render_mode);

        info!(
            "UI port ready: {}x{} @ {}bpp, {:?} mode",
            config.width, config.height, config.color_depth, config.render_mode
        );
        Ok(Self {
            display,
            lv_display,
            mode: config.render_mode,
        })
    }

    /// Flush callback body, dispatched on the configured render mode
    pub fn flush<C: FlushContext>(&mut self, ctx: &mut C, area: &Area, px_map: usize) {
        match self.mode {
            RenderMode::Direct => self.display.flush_direct(ctx, area, px_map),
            RenderMode::Full => self.display.flush_full(ctx, area, px_map),
        }
    }

    pub fn render_mode(&self) -> RenderMode {
        self.mode
    }

    pub fn lv_display(&self) -> LvDisplayHandle {
        self.lv_display
    }

    pub fn display(&self) -> &DisplayManager<H> {
        &self.display
    }

    pub fn display_mut(&mut self) -> &mut DisplayManager<H> {
        &mut self.display
    }
}

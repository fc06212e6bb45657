//! Double-buffered display manager on top of the LCDC.
//!
//! Two full-screen framebuffers are handed to the renderer. A flush hands
//! the finished frame to the controller and blocks the render task until
//! the vblank interrupt confirms the controller has picked it up.

pub mod canvas;
pub mod flip;

pub use canvas::Canvas;
pub use flip::{FlipState, FlipSync};

use crate::hal::LcdcHw;
use crate::lcdc::{LcdFormat, LcdcEvents, SharedLcdc};
use anyhow::{anyhow, Result};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_FLIP_TIMEOUT: Duration = Duration::from_millis(100);

/// Opaque handle of the renderer's display object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LvDisplayHandle(pub usize);

/// Inclusive dirty rectangle reported with a flush
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Area {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

/// What the renderer exposes to a flush callback
pub trait FlushContext {
    /// True for the final chunk of the current frame
    fn flush_is_last(&self) -> bool;
    /// Hand the buffer back to the renderer
    fn flush_ready(&mut self);
}

pub struct DisplayManager<H: LcdcHw> {
    lcdc: SharedLcdc<H>,
    width: u32,
    height: u32,
    format: LcdFormat,
    buffers: [Vec<u8>; 2],
    lv_disp: Option<LvDisplayHandle>,
    active_buffer_id: usize,
    rendering_buffer_id: usize,
    flip: Arc<FlipState>,
    flip_timeout: Duration,
    check_flip_buffer: bool,
    flush_count: u32,
}

impl<H: LcdcHw> DisplayManager<H> {
    pub fn new(lcdc: SharedLcdc<H>, bpp: u16, width: u32, height: u32) -> Result<Self> {
        let format = LcdFormat::from_bpp(bpp)
            .ok_or_else(|| anyhow!("Unsupported color depth: {}", bpp))?;

        let buffer_size = width as usize * height as usize * bpp as usize / 8;
        let buffers = [vec![0u8; buffer_size], vec![0u8; buffer_size]];
        info!(
            "buf1: 0x{:x}, buf2: 0x{:x}",
            buffers[0].as_ptr() as usize,
            buffers[1].as_ptr() as usize
        );

        let flip = Arc::new(FlipState::new());
        {
            let mut guard = lcdc
                .lock()
                .map_err(|_| anyhow!("LCDC lock poisoned"))?;
            guard
                .init_default(format, width, height)
                .map_err(|e| anyhow!("Failed to initialize LCD controller: {}", e))?;

            let state = flip.clone();
            guard.register_event_callback(LcdcEvents {
                vblank: Some(Box::new(move || state.on_vblank())),
                page_flip: None,
            });
        }

        info!(
            "Display manager initialized: {}x{}, buffer size: {}",
            width, height, buffer_size
        );

        Ok(Self {
            lcdc,
            width,
            height,
            format,
            buffers,
            lv_disp: None,
            active_buffer_id: 1,
            rendering_buffer_id: 0,
            flip,
            flip_timeout: DEFAULT_FLIP_TIMEOUT,
            check_flip_buffer: false,
            flush_count: 0,
        })
    }

    pub fn with_flip_timeout(mut self, timeout: Duration) -> Self {
        self.flip_timeout = timeout;
        self
    }

    /// Reject full-mode flushes of anything but the drawing buffer and
    /// swap drawing/active buffers after each flip
    pub fn with_buffer_check(mut self, enabled: bool) -> Self {
        self.check_flip_buffer = enabled;
        self
    }

    pub fn set_lv_display(&mut self, display: LvDisplayHandle) {
        self.lv_disp = Some(display);
    }

    pub fn lv_display(&self) -> Option<LvDisplayHandle> {
        self.lv_disp
    }

    /// (width, height)
    pub fn info(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn format(&self) -> LcdFormat {
        self.format
    }

    pub fn buffer_size(&self) -> usize {
        self.buffers[0].len()
    }

    /// One of the two framebuffers; any other id is `None`
    pub fn buffer(&mut self, id: usize) -> Option<&mut [u8]> {
        self.buffers.get_mut(id).map(|b| b.as_mut_slice())
    }

    pub fn buffer_addr(&self, id: usize) -> Option<usize> {
        self.buffers.get(id).map(|b| b.as_ptr() as usize)
    }

    pub fn canvas(&mut self, id: usize) -> Option<Canvas<'_>> {
        let (width, height, format) = (self.width, self.height, self.format);
        let buf = self.buffers.get_mut(id)?;
        Canvas::new(buf, width, height, format)
    }

    pub fn drawing_buffer_id(&self) -> usize {
        self.rendering_buffer_id
    }

    pub fn active_buffer_id(&self) -> usize {
        self.active_buffer_id
    }

    pub fn flush_count(&self) -> u32 {
        self.flush_count
    }

    /// Vblank-side state, for callers that service the interrupt themselves
    pub fn flip_state(&self) -> Arc<FlipState> {
        self.flip.clone()
    }

    /// Direct mode: the renderer draws straight into the framebuffers and
    /// only the last chunk of a frame triggers a flip
    pub fn flush_direct<C: FlushContext>(&mut self, ctx: &mut C, area: &Area, px_map: usize) {
        let last_flush = ctx.flush_is_last();
        self.log_flush(last_flush, area, px_map);

        if last_flush {
            self.flip_and_wait(px_map);
        }

        ctx.flush_ready();
    }

    /// Full mode: every flush is a whole frame
    pub fn flush_full<C: FlushContext>(&mut self, ctx: &mut C, area: &Area, px_map: usize) {
        if self.check_flip_buffer && Some(px_map) != self.buffer_addr(self.rendering_buffer_id) {
            warn!("px_map 0x{:x} doesn't match the drawing buffer", px_map);
            return;
        }

        let last_flush = ctx.flush_is_last();
        self.log_flush(last_flush, area, px_map);

        self.flip_and_wait(px_map);

        if self.check_flip_buffer {
            std::mem::swap(&mut self.active_buffer_id, &mut self.rendering_buffer_id);
        }

        ctx.flush_ready();
    }

    fn log_flush(&mut self, last_flush: bool, area: &Area, px_map: usize) {
        debug!(
            "Flush #{} {}: Buffer=0x{:x}, Area=({},{})-({},{})",
            self.flush_count,
            if last_flush { "last" } else { "int" },
            px_map,
            area.x1,
            area.y1,
            area.x2,
            area.y2
        );
        self.flush_count = self.flush_count.wrapping_add(1);
    }

    fn flip_and_wait(&mut self, px_map: usize) {
        self.flip.begin();
        match self.lcdc.lock() {
            Ok(mut lcdc) => lcdc.page_flip(px_map),
            Err(_) => {
                error!("LCDC lock poisoned, frame 0x{:x} dropped", px_map);
                self.flip.finish();
                return;
            }
        }

        if !self.flip.sync.wait_timeout(self.flip_timeout) {
            warn!("Flip to 0x{:x} not confirmed within {:?}", px_map, self.flip_timeout);
        }
        self.flip.finish();
    }
}

/// Service one LCDC interrupt from the shared driver.
///
/// Uses `try_lock` so an interrupt landing while the render task holds the
/// driver is skipped instead of deadlocking.
pub fn service_interrupt<H: LcdcHw>(lcdc: &SharedLcdc<H>) {
    match lcdc.try_lock() {
        Ok(mut guard) => {
            guard.on_interrupt();
        }
        Err(_) => debug!("LCDC busy, interrupt deferred"),
    }
}

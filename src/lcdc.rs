//! Generic RGB-interface LCD controller driver.
//!
//! Owns the controller's timing, the frame address register and the
//! interrupt fan-out. The controller is programmed at init but only starts
//! scanning out on the first [`Lcdc::page_flip`], so no garbage frame is
//! shown before the renderer has produced one.

use crate::hal::{InterfaceWidth, IrqStatus, LcdcHw, RgbPanelConfig, RgbPolarity};
use anyhow::{bail, Result};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

const DMA_BURST_SIZE: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LcdFormat {
    Rgb565,
    Rgb888,
    Argb8888,
}

impl LcdFormat {
    /// Map a renderer colour depth onto a controller input format
    pub fn from_bpp(bpp: u16) -> Option<Self> {
        match bpp {
            16 => Some(LcdFormat::Rgb565),
            24 => Some(LcdFormat::Rgb888),
            32 => Some(LcdFormat::Argb8888),
            _ => None,
        }
    }

    pub fn bits_per_pixel(&self) -> u16 {
        match self {
            LcdFormat::Rgb565 => 16,
            LcdFormat::Rgb888 => 24,
            LcdFormat::Argb8888 => 32,
        }
    }

    pub fn bytes_per_pixel(&self) -> usize {
        self.bits_per_pixel() as usize / 8
    }
}

/// Panel geometry and sync timing. `refresh_hz` is the target frame rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LcdTiming {
    pub width: u32,
    pub height: u32,
    pub hsync_front_porch: u32,
    pub hsync_back_porch: u32,
    pub hsync_pulse_width: u32,
    pub vsync_front_porch: u32,
    pub vsync_back_porch: u32,
    pub vsync_pulse_width: u32,
    pub refresh_hz: u32,
}

impl LcdTiming {
    pub const WVGA_800X480: LcdTiming = LcdTiming {
        width: 800,
        height: 480,
        hsync_front_porch: 40,
        hsync_back_porch: 40,
        hsync_pulse_width: 4,
        vsync_front_porch: 6,
        vsync_back_porch: 4,
        vsync_pulse_width: 1,
        refresh_hz: 60,
    };

    pub const WQVGA_480X272: LcdTiming = LcdTiming {
        width: 480,
        height: 272,
        hsync_front_porch: 2,
        hsync_back_porch: 2,
        hsync_pulse_width: 41,
        vsync_front_porch: 2,
        vsync_back_porch: 2,
        vsync_pulse_width: 10,
        refresh_hz: 60,
    };

    /// Preset timing for a known panel size; anything else gets the 800x480 porches
    pub fn for_resolution(width: u32, height: u32) -> Self {
        match (width, height) {
            (800, 480) => Self::WVGA_800X480,
            (480, 272) => Self::WQVGA_480X272,
            _ => LcdTiming {
                width,
                height,
                ..Self::WVGA_800X480
            },
        }
    }

    /// Line that raises the vblank interrupt, 5/6 of the way down the frame
    pub fn line_interrupt_position(&self) -> u32 {
        self.height * 5 / 6
    }
}

impl Default for LcdTiming {
    fn default() -> Self {
        Self::WVGA_800X480
    }
}

pub type EventHandler = Box<dyn FnMut() + Send>;

/// Handlers run from interrupt context, with the driver locked.
/// They must not call back into the [`Lcdc`].
#[derive(Default)]
pub struct LcdcEvents {
    pub vblank: Option<EventHandler>,
    pub page_flip: Option<EventHandler>,
}

pub struct Lcdc<H: LcdcHw> {
    hw: H,
    events: LcdcEvents,
    format: LcdFormat,
    timing: LcdTiming,
    current_buffer: Option<usize>,
    initialized: bool,
    enabled: bool,
}

/// Driver shared between the render task and the interrupt trampoline
pub type SharedLcdc<H> = Arc<Mutex<Lcdc<H>>>;

impl<H: LcdcHw> Lcdc<H> {
    pub fn new(hw: H) -> Self {
        Self {
            hw,
            events: LcdcEvents::default(),
            format: LcdFormat::Rgb888,
            timing: LcdTiming::default(),
            current_buffer: None,
            initialized: false,
            enabled: false,
        }
    }

    pub fn into_shared(self) -> SharedLcdc<H> {
        Arc::new(Mutex::new(self))
    }

    pub fn init(&mut self, format: LcdFormat, timing: &LcdTiming) -> Result<()> {
        if self.initialized {
            warn!("LCDC already initialized");
            return Ok(());
        }
        if timing.width == 0 || timing.height == 0 {
            bail!("invalid LCDC timing: {}x{}", timing.width, timing.height);
        }

        self.format = format;
        self.timing = *timing;

        info!("Configuring LCDC pins");
        self.hw.configure_pins();
        self.hw.enable_clock();
        self.program_controller(timing);

        self.hw.register_irq();
        self.hw
            .set_line_interrupt_position(timing.line_interrupt_position());
        self.hw.set_interrupts(
            IrqStatus::FRAME_DONE | IrqStatus::DMA_UNDERFLOW | IrqStatus::LINE_HIT,
            true,
        );

        self.enabled = false;
        self.initialized = true;

        info!(
            "LCDC initialized: {}x{}, format: {:?}",
            timing.width, timing.height, format
        );
        Ok(())
    }

    pub fn init_default(&mut self, format: LcdFormat, width: u32, height: u32) -> Result<()> {
        let timing = LcdTiming::for_resolution(width, height);
        self.init(format, &timing)
    }

    pub fn deinit(&mut self) {
        if !self.initialized {
            return;
        }

        self.hw.set_enabled(false);
        self.hw.unregister_irq();

        self.events = LcdcEvents::default();
        self.timing = LcdTiming::default();
        self.current_buffer = None;
        self.initialized = false;
        self.enabled = false;

        info!("LCDC deinitialized");
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn format(&self) -> LcdFormat {
        self.format
    }

    pub fn timing(&self) -> &LcdTiming {
        &self.timing
    }

    /// (width, height) of the programmed timing
    pub fn resolution(&self) -> (u32, u32) {
        (self.timing.width, self.timing.height)
    }

    /// Frame address most recently handed to the controller
    pub fn current_buffer(&self) -> Option<usize> {
        self.current_buffer
    }

    /// Reprogram a running controller with new timing
    pub fn set_timing(&mut self, timing: &LcdTiming) -> Result<()> {
        if !self.initialized {
            bail!("LCDC not initialized");
        }

        self.timing = *timing;
        self.hw.set_enabled(false);
        self.program_controller(timing);
        self.hw
            .set_line_interrupt_position(timing.line_interrupt_position());
        self.hw.set_enabled(true);
        self.enabled = true;

        info!("LCDC timing updated: {}x{}", timing.width, timing.height);
        Ok(())
    }

    /// Point scan-out at a new frame. Takes effect at the next frame boundary.
    pub fn page_flip(&mut self, addr: usize) {
        if !self.initialized {
            return;
        }

        self.hw.clean_invalidate_dcache(None);
        self.hw.set_frame_address(addr);
        self.hw.reload_shadow();
        self.current_buffer = Some(addr);

        if !self.enabled {
            self.hw.set_enabled(true);
            self.enabled = true;
        }
    }

    pub fn register_event_callback(&mut self, events: LcdcEvents) {
        self.events = events;
    }

    /// Interrupt service: read and clear status, then fan out to handlers
    pub fn on_interrupt(&mut self) -> IrqStatus {
        let status = self.hw.take_interrupt_status();
        debug!("irq 0x{:x}", status.0);

        if status.contains(IrqStatus::FRAME_DONE) {
            debug!("irq: frame done");
            if let Some(handler) = self.events.page_flip.as_mut() {
                handler();
            }
        }

        if status.contains(IrqStatus::LINE_HIT) {
            debug!("irq: line hit");
            if let Some(handler) = self.events.vblank.as_mut() {
                handler();
            }
        }

        if status.contains(IrqStatus::DMA_UNDERFLOW) {
            error!("irq: dma underflow");
        }

        status
    }

    pub fn hw(&self) -> &H {
        &self.hw
    }

    pub fn hw_mut(&mut self) -> &mut H {
        &mut self.hw
    }

    fn program_controller(&mut self, timing: &LcdTiming) {
        self.hw.set_enabled(false);
        let config = RgbPanelConfig {
            timing: *timing,
            interface: InterfaceWidth::Bits24,
            input_format: self.format,
            output_format: LcdFormat::Rgb888,
            polarity: RgbPolarity::default(),
        };
        self.hw.apply_rgb_config(&config);
        self.hw.set_dma_burst_size(DMA_BURST_SIZE);
    }
}

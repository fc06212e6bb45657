//! Register-level view of the SoC display controller.
//!
//! Drivers in this crate talk to the LCDC only through [`LcdcHw`], so the
//! same code runs against the vendor SDK on target (`hal::ameba`) and
//! against recording mocks on the host.

#[cfg(feature = "ameba")]
pub mod ameba;

use crate::lcdc::{LcdFormat, LcdTiming};

/// LCDC interrupt status / enable bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IrqStatus(pub u32);

impl IrqStatus {
    pub const NONE: IrqStatus = IrqStatus(0);
    pub const DMA_UNDERFLOW: IrqStatus = IrqStatus(1 << 0);
    pub const FRAME_DONE: IrqStatus = IrqStatus(1 << 1);
    pub const LINE_HIT: IrqStatus = IrqStatus(1 << 2);

    pub fn contains(&self, other: IrqStatus) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for IrqStatus {
    type Output = IrqStatus;

    fn bitor(self, rhs: IrqStatus) -> IrqStatus {
        IrqStatus(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceWidth {
    Bits16,
    Bits24,
}

/// Signal polarity and sampling edge of the RGB interface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RgbPolarity {
    pub de_active_high: bool,
    pub dclk_falling_edge: bool,
    pub hsync_active_high: bool,
    pub vsync_active_high: bool,
}

impl Default for RgbPolarity {
    /// DE high, data fetched on DCLK falling edge, HS/VS low-level sync
    fn default() -> Self {
        Self {
            de_active_high: true,
            dclk_falling_edge: true,
            hsync_active_high: false,
            vsync_active_high: false,
        }
    }
}

/// Everything the controller needs for one RGB panel mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RgbPanelConfig {
    pub timing: LcdTiming,
    pub interface: InterfaceWidth,
    pub input_format: LcdFormat,
    pub output_format: LcdFormat,
    pub polarity: RgbPolarity,
}

pub trait LcdcHw: Send {
    /// Route the RGB data/sync pins (and panel power/backlight GPIOs)
    fn configure_pins(&mut self);
    fn enable_clock(&mut self);
    fn set_enabled(&mut self, enabled: bool);
    fn apply_rgb_config(&mut self, config: &RgbPanelConfig);
    fn set_dma_burst_size(&mut self, size: u32);
    fn set_line_interrupt_position(&mut self, line: u32);
    fn set_interrupts(&mut self, mask: IrqStatus, enabled: bool);
    /// Read the interrupt status and clear what was read
    fn take_interrupt_status(&mut self) -> IrqStatus;
    fn set_frame_address(&mut self, addr: usize);
    /// Latch shadow registers at the next frame boundary
    fn reload_shadow(&mut self);
    /// Clean and invalidate the data cache; `None` means the whole cache
    fn clean_invalidate_dcache(&mut self, region: Option<(usize, usize)>);
    /// Write back a data-cache region without invalidating it
    fn clean_dcache(&mut self, addr: usize, len: usize);
    fn register_irq(&mut self);
    fn unregister_irq(&mut self);
}

impl<H: LcdcHw + ?Sized> LcdcHw for Box<H> {
    fn configure_pins(&mut self) {
        (**self).configure_pins()
    }
    fn enable_clock(&mut self) {
        (**self).enable_clock()
    }
    fn set_enabled(&mut self, enabled: bool) {
        (**self).set_enabled(enabled)
    }
    fn apply_rgb_config(&mut self, config: &RgbPanelConfig) {
        (**self).apply_rgb_config(config)
    }
    fn set_dma_burst_size(&mut self, size: u32) {
        (**self).set_dma_burst_size(size)
    }
    fn set_line_interrupt_position(&mut self, line: u32) {
        (**self).set_line_interrupt_position(line)
    }
    fn set_interrupts(&mut self, mask: IrqStatus, enabled: bool) {
        (**self).set_interrupts(mask, enabled)
    }
    fn take_interrupt_status(&mut self) -> IrqStatus {
        (**self).take_interrupt_status()
    }
    fn set_frame_address(&mut self, addr: usize) {
        (**self).set_frame_address(addr)
    }
    fn reload_shadow(&mut self) {
        (**self).reload_shadow()
    }
    fn clean_invalidate_dcache(&mut self, region: Option<(usize, usize)>) {
        (**self).clean_invalidate_dcache(region)
    }
    fn clean_dcache(&mut self, addr: usize, len: usize) {
        (**self).clean_dcache(addr, len)
    }
    fn register_irq(&mut self) {
        (**self).register_irq()
    }
    fn unregister_irq(&mut self) {
        (**self).unregister_irq()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_irq_status_bits() {
        let status = IrqStatus::FRAME_DONE | IrqStatus::LINE_HIT;
        assert!(status.contains(IrqStatus::LINE_HIT));
        assert!(status.contains(IrqStatus::FRAME_DONE));
        assert!(!status.contains(IrqStatus::DMA_UNDERFLOW));
        assert!(!status.contains(IrqStatus::NONE));
    }
}

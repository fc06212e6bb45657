//! ST7701S 480x480 RGB panel.
//!
//! The panel's registers are written once over a 3-wire 9-bit SPI link
//! (bit 8 is the D/C flag); pixels then stream over the 16-bit RGB
//! interface of the LCDC. A new frame is latched on the line interrupt,
//! halfway down the scan.

use crate::hal::{InterfaceWidth, IrqStatus, LcdcHw, RgbPanelConfig, RgbPolarity};
use crate::lcdc::{EventHandler, LcdFormat, LcdTiming};
use anyhow::{anyhow, bail, Result};
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::{Mode, SpiBus, MODE_0};
use log::{debug, error, info, warn};

pub const WIDTH: u32 = 480;
pub const HEIGHT: u32 = 480;
/// One RGB565 frame
pub const FRAME_BYTES: usize = (WIDTH * HEIGHT * 2) as usize;
pub const LINE_INTERRUPT_POSITION: u32 = WIDTH / 2;

pub const SPI_MODE: Mode = MODE_0;
/// 100 MHz SSI clock divided by 500
pub const SPI_CLOCK_HZ: u32 = 200_000;
pub const SPI_WORD_BITS: u8 = 9;

const DATA_FLAG: u16 = 0x100;
const COMMAND_GAP_US: u32 = 200;
const DMA_BURST_SIZE: u32 = 2;

pub const PANEL_TIMING: LcdTiming = LcdTiming {
    width: WIDTH,
    height: HEIGHT,
    hsync_front_porch: 38,
    hsync_back_porch: 10,
    hsync_pulse_width: 10,
    vsync_front_porch: 8,
    vsync_back_porch: 4,
    vsync_pulse_width: 4,
    refresh_hz: 60,
};

/// One register write of the bring-up sequence
#[derive(Debug, Clone, Copy)]
pub struct InitCommand {
    pub cmd: u8,
    pub data: &'static [u8],
    pub delay_ms: u32,
}

const fn cmd(cmd: u8, data: &'static [u8]) -> InitCommand {
    InitCommand { cmd, data, delay_ms: 0 }
}

const fn cmd_wait(cmd: u8, data: &'static [u8], delay_ms: u32) -> InitCommand {
    InitCommand { cmd, data, delay_ms }
}

pub const INIT_SEQUENCE: &[InitCommand] = &[
    // command bank 2, page 0
    cmd(0xFF, &[0x77, 0x01, 0x00, 0x00, 0x10]),
    cmd(0xC0, &[0x3B, 0x00]),
    cmd(0xC1, &[0x0D, 0x02]),
    cmd(0xC2, &[0x31, 0x05]),
    cmd(0xCD, &[0x08]),
    // positive / negative gamma
    cmd(0xB0, &[0x00, 0x11, 0x18, 0x0E, 0x11, 0x06, 0x07, 0x08, 0x07, 0x22, 0x04, 0x12, 0x0F, 0xAA, 0x31, 0x18]),
    cmd(0xB1, &[0x00, 0x11, 0x19, 0x0E, 0x12, 0x07, 0x08, 0x08, 0x08, 0x22, 0x04, 0x11, 0x11, 0xA9, 0x32, 0x18]),
    // command bank 2, page 1: power
    cmd(0xFF, &[0x77, 0x01, 0x00, 0x00, 0x11]),
    cmd(0xB0, &[0x60]),
    cmd(0xB1, &[0x32]),
    cmd(0xB2, &[0x07]),
    cmd(0xB3, &[0x80]),
    cmd(0xB5, &[0x49]),
    cmd(0xB7, &[0x85]),
    cmd(0xB8, &[0x21]),
    cmd(0xC1, &[0x78]),
    cmd_wait(0xC2, &[0x78], 20),
    // gate timing
    cmd(0xE0, &[0x00, 0x1B, 0x02]),
    cmd(0xE1, &[0x08, 0xA0, 0x00, 0x00, 0x07, 0xA0, 0x00, 0x00, 0x00, 0x44, 0x44]),
    cmd(0xE2, &[0x11, 0x11, 0x44, 0x44, 0xED, 0xA0, 0x00, 0x00, 0xEC, 0xA0, 0x00, 0x00]),
    cmd(0xE3, &[0x00, 0x00, 0x11, 0x11]),
    cmd(0xE4, &[0x44, 0x44]),
    cmd(0xE5, &[0x0A, 0xE9, 0xD8, 0xA0, 0x0C, 0xEB, 0xD8, 0xA0, 0x0E, 0xED, 0xD8, 0xA0, 0x10, 0xEF, 0xD8, 0xA0]),
    cmd(0xE6, &[0x00, 0x00, 0x11, 0x11]),
    cmd(0xE7, &[0x44, 0x44]),
    cmd(0xE8, &[0x09, 0xE8, 0xD8, 0xA0, 0x0B, 0xEA, 0xD8, 0xA0, 0x0D, 0xEC, 0xD8, 0xA0, 0x0F, 0xEE, 0xD8, 0xA0]),
    cmd(0xEB, &[0x02, 0x00, 0xE4, 0xE4, 0x88, 0x00, 0x40]),
    cmd(0xEC, &[0x3C, 0x00]),
    cmd(0xED, &[0xAB, 0x89, 0x76, 0x54, 0x02, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x20, 0x45, 0x67, 0x98, 0xBA]),
    // back to the user command set
    cmd(0xFF, &[0x77, 0x01, 0x00, 0x00, 0x00]),
    // COLMOD: 16 bit
    cmd(0x3A, &[0x55]),
    cmd(0x36, &[0x00]),
    // sleep out, display on
    cmd_wait(0x11, &[], 120),
    cmd_wait(0x29, &[], 20),
];

pub struct St7701s<SPI, RST, BL, D, H>
where
    H: LcdcHw,
{
    spi: SPI,
    rst: RST,
    backlight: BL,
    delay: D,
    hw: H,
    format: Option<LcdFormat>,
    pending: Option<usize>,
    callback: Option<EventHandler>,
}

impl<SPI, RST, BL, D, H> St7701s<SPI, RST, BL, D, H>
where
    SPI: SpiBus<u16>,
    RST: OutputPin,
    BL: OutputPin,
    D: DelayNs,
    H: LcdcHw,
{
    /// `spi` must already run in [`SPI_MODE`] at [`SPI_CLOCK_HZ`] with
    /// [`SPI_WORD_BITS`]-bit frames.
    pub fn new(spi: SPI, rst: RST, backlight: BL, delay: D, hw: H) -> Self {
        Self {
            spi,
            rst,
            backlight,
            delay,
            hw,
            format: None,
            pending: None,
            callback: None,
        }
    }

    pub fn init(&mut self, format: LcdFormat) -> Result<()> {
        if format != LcdFormat::Rgb565 {
            bail!("ST7701S: {:?} not supported", format);
        }
        self.format = Some(format);

        info!("ST7701S: configuring LCDC pins");
        self.hw.configure_pins();
        self.backlight
            .set_high()
            .map_err(|e| anyhow!("ST7701S backlight: {:?}", e))?;

        self.hw.enable_clock();
        self.hw.register_irq();
        self.program_controller();

        self.hw.set_line_interrupt_position(LINE_INTERRUPT_POSITION);
        self.hw.set_interrupts(
            IrqStatus::FRAME_DONE | IrqStatus::DMA_UNDERFLOW | IrqStatus::LINE_HIT,
            true,
        );

        self.reset()?;
        self.send_init_sequence()?;

        self.hw.set_enabled(true);
        info!("ST7701S initialized: {}x{}", WIDTH, HEIGHT);
        Ok(())
    }

    fn program_controller(&mut self) {
        self.hw.set_enabled(false);
        self.hw.apply_rgb_config(&RgbPanelConfig {
            timing: PANEL_TIMING,
            interface: InterfaceWidth::Bits16,
            input_format: LcdFormat::Rgb565,
            output_format: LcdFormat::Rgb565,
            polarity: RgbPolarity::default(),
        });
        self.hw.set_dma_burst_size(DMA_BURST_SIZE);
    }

    pub fn reset(&mut self) -> Result<()> {
        debug!("ST7701S: panel reset");
        let pin_err = |e: RST::Error| anyhow!("ST7701S reset pin: {:?}", e);
        self.rst.set_high().map_err(pin_err)?;
        self.delay.delay_ms(4);
        self.rst.set_low().map_err(pin_err)?;
        self.delay.delay_ms(30);
        self.rst.set_high().map_err(pin_err)?;
        self.delay.delay_ms(120);
        Ok(())
    }

    pub fn write_command(&mut self, cmd: u8) -> Result<()> {
        self.delay.delay_us(COMMAND_GAP_US);
        self.spi
            .write(&[cmd as u16])
            .map_err(|e| anyhow!("ST7701S SPI command 0x{:02x}: {:?}", cmd, e))
    }

    pub fn write_data(&mut self, data: u8) -> Result<()> {
        self.spi
            .write(&[data as u16 | DATA_FLAG])
            .map_err(|e| anyhow!("ST7701S SPI data: {:?}", e))
    }

    pub fn send_init_sequence(&mut self) -> Result<()> {
        info!("ST7701S: sending init sequence");
        for step in INIT_SEQUENCE {
            self.write_command(step.cmd)?;
            for &b in step.data {
                self.write_data(b)?;
            }
            if step.delay_ms > 0 {
                self.delay.delay_ms(step.delay_ms);
            }
        }
        self.spi
            .flush()
            .map_err(|e| anyhow!("ST7701S SPI flush: {:?}", e))
    }

    /// Queue `buf` for scan-out and write it back from the data cache
    pub fn clean_invalidate_buffer(&mut self, buf: usize) {
        if self.format != Some(LcdFormat::Rgb565) {
            warn!("ST7701S: buffer handoff without RGB565 init");
            return;
        }
        self.pending = Some(buf);
        self.hw.clean_dcache(buf, FRAME_BYTES);
    }

    pub fn info(&self) -> (u32, u32) {
        (WIDTH, HEIGHT)
    }

    pub fn register_callback(&mut self, callback: impl FnMut() + Send + 'static) {
        self.callback = Some(Box::new(callback));
    }

    /// Line-hit: latch the queued frame, then signal vblank
    pub fn on_interrupt(&mut self) -> IrqStatus {
        let status = self.hw.take_interrupt_status();
        debug!("irq 0x{:x}", status.0);

        if status.contains(IrqStatus::FRAME_DONE) {
            debug!("irq: frame done");
        }

        if status.contains(IrqStatus::LINE_HIT) {
            debug!("irq: line hit");
            if let Some(addr) = self.pending {
                self.hw.set_frame_address(addr);
                self.hw.reload_shadow();
            }
            if let Some(callback) = self.callback.as_mut() {
                callback();
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::mock_hw::{Event, EventLog, LcdcCall, MockDelay, MockLcdc, MockPin, MockSpi};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    type Panel = St7701s<MockSpi, MockPin, MockPin, MockDelay, MockLcdc>;

    fn panel() -> (MockSpi, EventLog, MockLcdc, Panel) {
        let spi = MockSpi::new();
        let log = EventLog::new();
        let hw = MockLcdc::new();
        let panel = St7701s::new(spi.clone(), log.pin("rst"), log.pin("bl"), log.delay(), hw.clone());
        (spi, log, hw, panel)
    }

    #[test]
    fn test_rejects_non_rgb565() {
        let (spi, _, hw, mut panel) = panel();
        assert!(panel.init(LcdFormat::Argb8888).is_err());
        assert!(hw.calls().is_empty());
        assert!(spi.words().is_empty());
    }

    #[test]
    fn test_nine_bit_framing() {
        let (spi, log, _, mut panel) = panel();
        panel.write_command(0x3A).unwrap();
        panel.write_data(0x55).unwrap();
        assert_eq!(spi.words(), vec![0x003A, 0x0155]);
        assert_eq!(log.events(), vec![Event::DelayUs(200)]);
    }

    #[test]
    fn test_init_sequence_words() {
        let (spi, log, _, mut panel) = panel();
        panel.send_init_sequence().unwrap();
        let words = spi.words();

        let expected: usize = INIT_SEQUENCE.iter().map(|c| 1 + c.data.len()).sum();
        assert_eq!(words.len(), expected);
        assert_eq!(&words[..6], &[0x0FF, 0x177, 0x101, 0x100, 0x100, 0x110]);
        assert_eq!(words.last(), Some(&0x029));

        let gaps = log.events().iter().filter(|e| **e == Event::DelayUs(200)).count();
        assert_eq!(gaps, INIT_SEQUENCE.len());
        assert!(log.events().ends_with(&[Event::DelayUs(200), Event::DelayMs(20)]));
    }

    #[test]
    fn test_init_order() {
        let (_, log, hw, mut panel) = panel();
        panel.init(LcdFormat::Rgb565).unwrap();

        let calls = hw.calls();
        assert_eq!(calls[0], LcdcCall::ConfigurePins);
        assert_eq!(calls[1], LcdcCall::EnableClock);
        assert_eq!(calls[2], LcdcCall::RegisterIrq);
        assert_eq!(calls[3], LcdcCall::Enable(false));
        assert_eq!(calls.last(), Some(&LcdcCall::Enable(true)));
        assert!(calls.contains(&LcdcCall::LinePosition(240)));
        assert!(calls.contains(&LcdcCall::DmaBurst(2)));

        let config = hw.last_rgb_config().unwrap();
        assert_eq!(config.interface, InterfaceWidth::Bits16);
        assert_eq!(config.output_format, LcdFormat::Rgb565);
        assert_eq!(config.timing, PANEL_TIMING);

        let events = log.events();
        assert_eq!(events[0], Event::Pin("bl", true));
        assert_eq!(
            &events[1..7],
            &[
                Event::Pin("rst", true),
                Event::DelayMs(4),
                Event::Pin("rst", false),
                Event::DelayMs(30),
                Event::Pin("rst", true),
                Event::DelayMs(120),
            ]
        );
    }

    #[test]
    fn test_line_hit_latches_pending_buffer() {
        let (_, _, hw, mut panel) = panel();
        panel.init(LcdFormat::Rgb565).unwrap();
        let hits = Arc::new(AtomicU32::new(0));
        let h = hits.clone();
        panel.register_callback(move || {
            h.fetch_add(1, Ordering::SeqCst);
        });

        panel.clean_invalidate_buffer(0x6000_0000);
        assert!(hw.calls().contains(&LcdcCall::Clean(0x6000_0000, FRAME_BYTES)));

        hw.clear();
        hw.raise(IrqStatus::FRAME_DONE);
        panel.on_interrupt();
        assert!(hw.frame_addresses().is_empty());
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        hw.raise(IrqStatus::LINE_HIT);
        panel.on_interrupt();
        assert_eq!(hw.calls(), vec![LcdcCall::FrameAddress(0x6000_0000), LcdcCall::ReloadShadow]);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_buffer_before_init_is_ignored() {
        let (_, _, hw, mut panel) = panel();
        panel.clean_invalidate_buffer(0x6000_0000);
        assert!(hw.calls().is_empty());
        assert_eq!(panel.info(), (480, 480));
    }
}

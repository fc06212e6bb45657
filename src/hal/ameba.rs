//! Vendor SDK bindings for the on-chip LCDC, caches and interrupt controller.
//!
//! Simple-signature SDK calls are linked directly. Calls that take SDK
//! structs (RGB mode setup, the JPEG/PP codec) and the interrupt bit
//! mapping go through the flat wrappers in `ffi/ameba_shim.c`, compiled by
//! the SDK build, so no SDK struct layout crosses the FFI boundary.

use super::{InterfaceWidth, IrqStatus, LcdcHw, RgbPanelConfig};
use crate::jpeg::{DecodeStatus, HwOutputFormat, JpegHw, JpegImageInfo, PpConfig, PpPixelFormat, RgbTransform};
use crate::lcdc::LcdFormat;
use anyhow::{bail, Result};
use core::ffi::c_void;
use std::sync::OnceLock;

// LCDC register block and interrupt line
const LCDC_BASE: usize = 0x4101_0000;
const LCDC_IRQ: u32 = 49;
const INT_PRI_MIDDLE: u32 = 5;

const ENABLE: u32 = 1;
const DISABLE: u32 = 0;

// Input/output format selectors understood by ameba_lcdc_rgb_setup
const LCDC_INPUT_FORMAT_ARGB8888: u32 = 0;
const LCDC_INPUT_FORMAT_RGB888: u32 = 1;
const LCDC_INPUT_FORMAT_RGB565: u32 = 2;
const LCDC_OUTPUT_FORMAT_RGB888: u32 = 0;
const LCDC_OUTPUT_FORMAT_RGB565: u32 = 1;

// I2C0 block and its IC_FILTER register
const I2C0_BASE: usize = 0x4100_8000;
const I2C_IC_FILTER: usize = 0xEC;
const I2C_FILTER_MASK: u32 = 0x1FF;
const I2C_FILTER_LCD_NOISE: u32 = 0x108;

#[repr(C)]
struct RgbSetup {
    width: u32,
    height: u32,
    vsw: u32,
    vbp: u32,
    vfp: u32,
    hsw: u32,
    hbp: u32,
    hfp: u32,
    if_width_24: u32,
    input_format: u32,
    output_format: u32,
    de_active_high: u32,
    dclk_falling_edge: u32,
    hs_active_high: u32,
    vs_active_high: u32,
    refresh_hz: u32,
}

type IrqFun = extern "C" fn(*mut c_void) -> u32;

extern "C" {
    fn LCDC_Cmd(lcdc: *mut c_void, new_state: u32);
    fn LCDC_RccEnable();
    fn LCDC_DMABurstSizeConfig(lcdc: *mut c_void, burst: u32);
    fn LCDC_LineINTPosConfig(lcdc: *mut c_void, line: u32);
    fn LCDC_DMAImgCfg(lcdc: *mut c_void, addr: u32);
    fn LCDC_ShadowReloadConfig(lcdc: *mut c_void);
    fn DCache_CleanInvalidate(addr: u32, len: u32);
    fn DCache_Clean(addr: u32, len: u32);
    fn InterruptRegister(handler: IrqFun, irq: u32, data: u32, priority: u32) -> u32;
    fn InterruptUnRegister(irq: u32);
    fn InterruptEn(irq: u32, priority: u32);
    fn InterruptDis(irq: u32);
    fn I2C_Cmd(i2c: *mut c_void, new_state: u32);

    fn ameba_lcdc_rgb_setup(lcdc: *mut c_void, setup: *const RgbSetup);
    fn ameba_lcdc_pinmux_config();
    /// `mask` uses [`IrqStatus`] bits
    fn ameba_lcdc_int_config(lcdc: *mut c_void, mask: u32, new_state: u32);
    /// Read and clear; returns [`IrqStatus`] bits
    fn ameba_lcdc_take_int_status(lcdc: *mut c_void) -> u32;

    fn ameba_jpeg_engine_enable();
    fn ameba_jpeg_engine_disable();
    fn ameba_jpeg_dec_init(inst: *mut *mut c_void) -> i32;
    fn ameba_jpeg_dec_release(inst: *mut c_void);
    fn ameba_pp_init(inst: *mut *mut c_void) -> i32;
    fn ameba_pp_release(inst: *mut c_void);
    fn ameba_jpeg_image_info(inst: *mut c_void, stream: *const u8, len: u32, info: *mut JpegInfoRaw) -> i32;
    fn ameba_pp_combined_enable(pp: *mut c_void, dec: *mut c_void) -> i32;
    fn ameba_pp_combined_disable(pp: *mut c_void, dec: *mut c_void);
    fn ameba_pp_set_config(pp: *mut c_void, setup: *const PpSetup) -> i32;
    /// 1 when a frame is ready, otherwise the decoder's return code
    fn ameba_jpeg_decode(inst: *mut c_void, stream: *const u8, len: u32) -> i32;
}

// Format selectors shared with the shim
const JPEG_OUT_YCBCR420_SP: u32 = 0;
const JPEG_OUT_YCBCR422_SP: u32 = 1;
const PP_FMT_YCBCR420_SP: u32 = 0;
const PP_FMT_YCBCR422_SP: u32 = 1;
const PP_FMT_RGB565: u32 = 2;
const PP_FMT_RGB32: u32 = 3;
const JPEG_FRAME_READY: i32 = 1;

#[repr(C)]
#[derive(Default)]
struct JpegInfoRaw {
    output_width: u32,
    output_height: u32,
    output_format: u32,
}

#[repr(C)]
struct PpSetup {
    in_width: u32,
    in_height: u32,
    in_format: u32,
    video_range: u32,
    bt709: u32,
    out_width: u32,
    out_height: u32,
    out_format: u32,
    out_bus_addr: u32,
}

static LCDC_IRQ_HANDLER: OnceLock<Box<dyn Fn() + Send + Sync>> = OnceLock::new();

/// Install the Rust side of the LCDC interrupt. Only the first call wins.
pub fn set_lcdc_irq_handler(handler: impl Fn() + Send + Sync + 'static) -> bool {
    LCDC_IRQ_HANDLER.set(Box::new(handler)).is_ok()
}

extern "C" fn lcdc_irq_trampoline(_data: *mut c_void) -> u32 {
    if let Some(handler) = LCDC_IRQ_HANDLER.get() {
        handler();
    }
    0
}

fn lcdc() -> *mut c_void {
    LCDC_BASE as *mut c_void
}

fn input_format(format: LcdFormat) -> u32 {
    match format {
        LcdFormat::Rgb565 => LCDC_INPUT_FORMAT_RGB565,
        LcdFormat::Argb8888 => LCDC_INPUT_FORMAT_ARGB8888,
        LcdFormat::Rgb888 => LCDC_INPUT_FORMAT_RGB888,
    }
}

fn output_format(format: LcdFormat) -> u32 {
    match format {
        LcdFormat::Rgb565 => LCDC_OUTPUT_FORMAT_RGB565,
        _ => LCDC_OUTPUT_FORMAT_RGB888,
    }
}

/// The SoC's LCDC, driven through the vendor SDK
pub struct AmebaLcdc {
    _private: (),
}

impl AmebaLcdc {
    /// # Safety
    /// Only one instance may exist; it owns the LCDC block and its IRQ line.
    pub unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl LcdcHw for AmebaLcdc {
    fn configure_pins(&mut self) {
        unsafe { ameba_lcdc_pinmux_config() }
    }

    fn enable_clock(&mut self) {
        unsafe { LCDC_RccEnable() }
    }

    fn set_enabled(&mut self, enabled: bool) {
        unsafe { LCDC_Cmd(lcdc(), if enabled { ENABLE } else { DISABLE }) }
    }

    fn apply_rgb_config(&mut self, config: &RgbPanelConfig) {
        let t = &config.timing;
        let setup = RgbSetup {
            width: t.width,
            height: t.height,
            vsw: t.vsync_pulse_width,
            vbp: t.vsync_back_porch,
            vfp: t.vsync_front_porch,
            hsw: t.hsync_pulse_width,
            hbp: t.hsync_back_porch,
            hfp: t.hsync_front_porch,
            if_width_24: (config.interface == InterfaceWidth::Bits24) as u32,
            input_format: input_format(config.input_format),
            output_format: output_format(config.output_format),
            de_active_high: config.polarity.de_active_high as u32,
            dclk_falling_edge: config.polarity.dclk_falling_edge as u32,
            hs_active_high: config.polarity.hsync_active_high as u32,
            vs_active_high: config.polarity.vsync_active_high as u32,
            refresh_hz: t.refresh_hz,
        };
        unsafe { ameba_lcdc_rgb_setup(lcdc(), &setup) }
    }

    fn set_dma_burst_size(&mut self, size: u32) {
        unsafe { LCDC_DMABurstSizeConfig(lcdc(), size) }
    }

    fn set_line_interrupt_position(&mut self, line: u32) {
        unsafe { LCDC_LineINTPosConfig(lcdc(), line) }
    }

    fn set_interrupts(&mut self, mask: IrqStatus, enabled: bool) {
        unsafe { ameba_lcdc_int_config(lcdc(), mask.0, if enabled { ENABLE } else { DISABLE }) }
    }

    fn take_interrupt_status(&mut self) -> IrqStatus {
        IrqStatus(unsafe { ameba_lcdc_take_int_status(lcdc()) })
    }

    fn set_frame_address(&mut self, addr: usize) {
        unsafe { LCDC_DMAImgCfg(lcdc(), addr as u32) }
    }

    fn reload_shadow(&mut self) {
        unsafe { LCDC_ShadowReloadConfig(lcdc()) }
    }

    fn clean_invalidate_dcache(&mut self, region: Option<(usize, usize)>) {
        let (addr, len) = match region {
            Some((addr, len)) => (addr as u32, len as u32),
            None => (0xFFFF_FFFF, 0xFFFF_FFFF),
        };
        unsafe { DCache_CleanInvalidate(addr, len) }
    }

    fn clean_dcache(&mut self, addr: usize, len: usize) {
        unsafe { DCache_Clean(addr as u32, len as u32) }
    }

    fn register_irq(&mut self) {
        unsafe {
            InterruptRegister(lcdc_irq_trampoline, LCDC_IRQ, LCDC_BASE as u32, INT_PRI_MIDDLE);
            InterruptEn(LCDC_IRQ, INT_PRI_MIDDLE);
        }
    }

    fn unregister_irq(&mut self) {
        unsafe {
            InterruptDis(LCDC_IRQ);
            InterruptUnRegister(LCDC_IRQ);
        }
    }
}

/// Raise the I2C0 spike filter so LCD switching noise is not read as SCL/SDA edges.
/// The SDK's i2c_api has no knob for IC_FILTER, so the register is patched with
/// the controller briefly disabled.
///
/// # Safety
/// I2C0 must be initialised and idle.
pub unsafe fn apply_touch_i2c_noise_filter() {
    let i2c = I2C0_BASE as *mut c_void;
    let filter = (I2C0_BASE + I2C_IC_FILTER) as *mut u32;

    I2C_Cmd(i2c, DISABLE);
    let mut val = filter.read_volatile();
    val &= !I2C_FILTER_MASK;
    val |= I2C_FILTER_LCD_NOISE;
    filter.write_volatile(val);
    I2C_Cmd(i2c, ENABLE);
}

fn pp_format(format: PpPixelFormat) -> u32 {
    match format {
        PpPixelFormat::YCbCr420SemiPlanar => PP_FMT_YCBCR420_SP,
        PpPixelFormat::YCbCr422SemiPlanar => PP_FMT_YCBCR422_SP,
        PpPixelFormat::Rgb16_565 => PP_FMT_RGB565,
        PpPixelFormat::Rgb32 => PP_FMT_RGB32,
    }
}

/// Decoder or PP instance handed out by the codec library
pub struct CodecHandle(*mut c_void);

/// The MJPEG decoder core and its post-processor
pub struct AmebaJpeg {
    _private: (),
}

impl AmebaJpeg {
    /// # Safety
    /// Only one instance may exist; it owns the MJPEG block.
    pub unsafe fn new() -> Self {
        Self { _private: () }
    }
}

fn new_instance(init: unsafe extern "C" fn(*mut *mut c_void) -> i32, what: &str) -> Result<CodecHandle> {
    let mut inst: *mut c_void = core::ptr::null_mut();
    let ret = unsafe { init(&mut inst) };
    if ret != 0 || inst.is_null() {
        bail!("{} returned {}", what, ret);
    }
    Ok(CodecHandle(inst))
}

impl JpegHw for AmebaJpeg {
    type Decoder = CodecHandle;
    type Pp = CodecHandle;

    fn enable_engine(&mut self) -> Result<()> {
        unsafe { ameba_jpeg_engine_enable() };
        Ok(())
    }

    fn disable_engine(&mut self) {
        unsafe { ameba_jpeg_engine_disable() }
    }

    fn decoder_init(&mut self) -> Result<CodecHandle> {
        new_instance(ameba_jpeg_dec_init, "JpegDecInit")
    }

    fn decoder_release(&mut self, dec: CodecHandle) {
        unsafe { ameba_jpeg_dec_release(dec.0) }
    }

    fn pp_init(&mut self) -> Result<CodecHandle> {
        new_instance(ameba_pp_init, "PPInit")
    }

    fn pp_release(&mut self, pp: CodecHandle) {
        unsafe { ameba_pp_release(pp.0) }
    }

    fn image_info(&mut self, dec: &CodecHandle, stream: &[u8]) -> Result<JpegImageInfo> {
        let mut raw = JpegInfoRaw::default();
        let ret = unsafe { ameba_jpeg_image_info(dec.0, stream.as_ptr(), stream.len() as u32, &mut raw) };
        if ret != 0 {
            bail!("JpegDecGetImageInfo returned {}", ret);
        }
        let output_format = match raw.output_format {
            JPEG_OUT_YCBCR420_SP => HwOutputFormat::YCbCr420SemiPlanar,
            JPEG_OUT_YCBCR422_SP => HwOutputFormat::YCbCr422SemiPlanar,
            other => HwOutputFormat::Other(other),
        };
        Ok(JpegImageInfo {
            output_width: raw.output_width,
            output_height: raw.output_height,
            output_format,
        })
    }

    fn combined_mode_enable(&mut self, pp: &CodecHandle, dec: &CodecHandle) -> Result<()> {
        let ret = unsafe { ameba_pp_combined_enable(pp.0, dec.0) };
        if ret != 0 {
            bail!("returned {}", ret);
        }
        Ok(())
    }

    fn combined_mode_disable(&mut self, pp: &CodecHandle, dec: &CodecHandle) {
        unsafe { ameba_pp_combined_disable(pp.0, dec.0) }
    }

    fn pp_set_config(&mut self, pp: &CodecHandle, config: &PpConfig) -> Result<()> {
        let setup = PpSetup {
            in_width: config.in_width,
            in_height: config.in_height,
            in_format: pp_format(config.in_format),
            video_range: config.video_range as u32,
            bt709: (config.rgb_transform == RgbTransform::Bt709) as u32,
            out_width: config.out_width,
            out_height: config.out_height,
            out_format: pp_format(config.out_format),
            out_bus_addr: config.out_buffer_addr as u32,
        };
        let ret = unsafe { ameba_pp_set_config(pp.0, &setup) };
        if ret != 0 {
            bail!("returned {}", ret);
        }
        Ok(())
    }

    fn decode(&mut self, dec: &CodecHandle, stream: &[u8]) -> Result<DecodeStatus> {
        let ret = unsafe { ameba_jpeg_decode(dec.0, stream.as_ptr(), stream.len() as u32) };
        Ok(match ret {
            JPEG_FRAME_READY => DecodeStatus::FrameReady,
            code => DecodeStatus::Incomplete(code),
        })
    }

    fn clean_dcache(&mut self, addr: usize, len: usize) {
        unsafe { DCache_Clean(addr as u32, len as u32) }
    }

    fn clean_invalidate_dcache(&mut self, addr: usize, len: usize) {
        unsafe { DCache_CleanInvalidate(addr as u32, len as u32) }
    }
}

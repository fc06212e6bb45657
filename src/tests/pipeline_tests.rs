// Asset image -> config -> port -> JPEG decode -> framebuffer -> flip

use crate::config::{self, CONFIG_PATH};
use crate::display::{Area, FlushContext, LvDisplayHandle};
use crate::jpeg::{
    ColorFormat, DecodeStatus, HwOutputFormat, ImageSource, JpegDecoder, JpegHw, JpegImageInfo, PpConfig,
    PpPixelFormat,
};
use crate::lcdc::Lcdc;
use crate::port::{LvglBackend, RenderMode, UiPort};
use crate::romfs::{Romfs, RomfsBuilder, RomfsVfs};
use crate::tests::mock_hw::{MockLcdc, Vsync};
use anyhow::Result;
use embedded_graphics::image::{Image, ImageRaw};
use embedded_graphics::pixelcolor::raw::LittleEndian;
use embedded_graphics::pixelcolor::Rgb565;
use embedded_graphics::prelude::*;

const BASE: u32 = 0x0070_3000;
const LOGO: [u8; 8] = [0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F'];
const RED_565: u16 = 0xF800;

/// Codec stand-in whose "PP" paints the output buffer red, as the DMA would
#[derive(Default)]
struct PaintingCodec {
    out: Option<(usize, usize)>,
}

impl JpegHw for PaintingCodec {
    type Decoder = ();
    type Pp = ();

    fn enable_engine(&mut self) -> Result<()> {
        Ok(())
    }
    fn disable_engine(&mut self) {}
    fn decoder_init(&mut self) -> Result<()> {
        Ok(())
    }
    fn decoder_release(&mut self, _dec: ()) {}
    fn pp_init(&mut self) -> Result<()> {
        Ok(())
    }
    fn pp_release(&mut self, _pp: ()) {}
    fn image_info(&mut self, _dec: &(), _stream: &[u8]) -> Result<JpegImageInfo> {
        Ok(JpegImageInfo {
            output_width: 4,
            output_height: 2,
            output_format: HwOutputFormat::YCbCr420SemiPlanar,
        })
    }
    fn combined_mode_enable(&mut self, _pp: &(), _dec: &()) -> Result<()> {
        Ok(())
    }
    fn combined_mode_disable(&mut self, _pp: &(), _dec: &()) {}
    fn pp_set_config(&mut self, _pp: &(), config: &PpConfig) -> Result<()> {
        assert_eq!(config.out_format, PpPixelFormat::Rgb16_565);
        let len = (config.out_width * config.out_height * 2) as usize;
        self.out = Some((config.out_buffer_addr, len));
        Ok(())
    }
    fn decode(&mut self, _dec: &(), _stream: &[u8]) -> Result<DecodeStatus> {
        if let Some((addr, len)) = self.out.take() {
            // the output buffer is alive and unborrowed for the whole decode call
            let out = unsafe { std::slice::from_raw_parts_mut(addr as *mut u8, len) };
            for px in out.chunks_exact_mut(2) {
                px.copy_from_slice(&RED_565.to_le_bytes());
            }
        }
        Ok(DecodeStatus::FrameReady)
    }
    fn clean_dcache(&mut self, _addr: usize, _len: usize) {}
    fn clean_invalidate_dcache(&mut self, _addr: usize, _len: usize) {}
}

#[derive(Default)]
struct Backend {
    decoders: Vec<&'static str>,
    buffer_size: usize,
}

impl LvglBackend for Backend {
    fn set_tick_cb(&mut self, _tick: fn() -> u32) {}
    fn register_image_decoder(&mut self, name: &'static str) -> Result<()> {
        self.decoders.push(name);
        Ok(())
    }
    fn create_display(&mut self, _width: u32, _height: u32) -> Result<LvDisplayHandle> {
        Ok(LvDisplayHandle(1))
    }
    fn set_buffers(&mut self, _display: LvDisplayHandle, _buf1: usize, _buf2: usize, size: usize, _mode: RenderMode) {
        self.buffer_size = size;
    }
    fn set_flush_mode(&mut self, _display: LvDisplayHandle, _mode: RenderMode) {}
}

struct LastChunk {
    ready: bool,
}

impl FlushContext for LastChunk {
    fn flush_is_last(&self) -> bool {
        true
    }
    fn flush_ready(&mut self) {
        self.ready = true;
    }
}

fn asset_image() -> Vec<u8> {
    let mut builder = RomfsBuilder::new(BASE);
    builder
        .add_file(
            CONFIG_PATH,
            r#"{"width": 16, "height": 8, "hw_jpeg": true, "flip_timeout_ms": 2000}"#,
        )
        .unwrap();
    builder.add_file("/img/logo.jpg", LOGO.to_vec()).unwrap();
    builder.build().unwrap()
}

#[test]
fn test_logo_reaches_the_screen() {
    let image = asset_image();
    let mut vfs = RomfsVfs::new(Romfs::mount(&image, BASE).unwrap());
    let config = config::load_or_default(&mut vfs);
    assert_eq!((config.width, config.height), (16, 8));

    let mock = MockLcdc::new();
    let lcdc = Lcdc::new(mock.clone()).into_shared();
    let mut backend = Backend::default();
    let mut port = UiPort::init(&config, lcdc.clone(), &mut backend).unwrap();
    assert_eq!(backend.decoders, vec!["JPEG_RTK"]);
    assert_eq!(backend.buffer_size, 16 * 8 * 2);

    let mut decoder = JpegDecoder::init(PaintingCodec::default(), vfs, config.color_depth).unwrap();
    let header = decoder.info(ImageSource::File("/img/logo.jpg")).unwrap();
    assert_eq!(header.cf, ColorFormat::I420);
    let logo = decoder.open(ImageSource::File("/img/logo.jpg"), &header).unwrap();
    assert_eq!(logo.header.cf, ColorFormat::Rgb565);
    assert_eq!(decoder.assets_mut().open_count(), 0);

    let buf = port.display().buffer_addr(0).unwrap();
    {
        let raw = ImageRaw::<Rgb565, LittleEndian>::new(&logo.data, logo.header.w);
        let mut canvas = port.display_mut().canvas(0).unwrap();
        Image::new(&raw, Point::new(2, 1))
            .draw(&mut canvas.color_converted())
            .unwrap();
    }
    decoder.close(logo);

    let fb = port.display_mut().buffer(0).unwrap();
    let pixel = |x: usize, y: usize| u16::from_le_bytes([fb[(y * 16 + x) * 2], fb[(y * 16 + x) * 2 + 1]]);
    assert_eq!(pixel(2, 1), RED_565);
    assert_eq!(pixel(5, 2), RED_565);
    assert_eq!(pixel(6, 2), 0);
    assert_eq!(pixel(1, 1), 0);

    let _vsync = Vsync::start(lcdc, mock.clone());
    let mut ctx = LastChunk { ready: false };
    port.flush(&mut ctx, &Area { x1: 0, y1: 0, x2: 15, y2: 7 }, buf);
    assert!(ctx.ready);
    assert_eq!(mock.frame_addresses(), vec![buf]);
    assert!(port.display().flip_state().is_done());
}

//! Hardware JPEG decoder shim.
//!
//! The decoder core writes YCbCr semi-planar output straight into the
//! post-processor (PP) in combined mode; the PP converts to the renderer's
//! colour format and writes the final image into a draw buffer.

use crate::romfs::RomfsVfs;
use anyhow::{anyhow, bail, Result};
use log::{debug, info, warn};
use std::borrow::Cow;

pub const DECODER_NAME: &str = "JPEG_RTK";

/// JPEG start-of-image marker followed by the first segment's 0xFF
const JPEG_SOI: [u8; 3] = [0xFF, 0xD8, 0xFF];

/// Output layout reported by the decoder core
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HwOutputFormat {
    YCbCr420SemiPlanar,
    YCbCr422SemiPlanar,
    Other(u32),
}

/// Renderer-side colour formats this decoder produces or consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorFormat {
    Unknown,
    I420,
    I422,
    Rgb565,
    Xrgb8888,
}

impl ColorFormat {
    pub fn bits_per_pixel(&self) -> u32 {
        match self {
            ColorFormat::Unknown => 0,
            ColorFormat::I420 => 12,
            ColorFormat::I422 => 16,
            ColorFormat::Rgb565 => 16,
            ColorFormat::Xrgb8888 => 32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PpPixelFormat {
    YCbCr420SemiPlanar,
    YCbCr422SemiPlanar,
    Rgb16_565,
    Rgb32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RgbTransform {
    Bt601,
    Bt709,
}

pub fn format_hw_to_sw(format: HwOutputFormat) -> ColorFormat {
    match format {
        HwOutputFormat::YCbCr420SemiPlanar => ColorFormat::I420,
        HwOutputFormat::YCbCr422SemiPlanar => ColorFormat::I422,
        HwOutputFormat::Other(raw) => {
            warn!("Image decode-type 0x{:x} invalid", raw);
            ColorFormat::Unknown
        }
    }
}

pub fn format_sw_to_pp(format: ColorFormat) -> Option<PpPixelFormat> {
    match format {
        ColorFormat::I420 => Some(PpPixelFormat::YCbCr420SemiPlanar),
        ColorFormat::I422 => Some(PpPixelFormat::YCbCr422SemiPlanar),
        _ => {
            warn!("Image pp-type {:?} invalid", format);
            None
        }
    }
}

/// PP output and renderer format for a display colour depth.
/// The PP has no 24-bit output, so 24-bit displays get 32-bit images.
pub fn output_formats(color_depth: u16) -> Option<(PpPixelFormat, ColorFormat)> {
    match color_depth {
        16 => Some((PpPixelFormat::Rgb16_565, ColorFormat::Rgb565)),
        24 => {
            warn!("PP does not support RGB888, decoding to 32-bit");
            Some((PpPixelFormat::Rgb32, ColorFormat::Xrgb8888))
        }
        32 => Some((PpPixelFormat::Rgb32, ColorFormat::Xrgb8888)),
        _ => None,
    }
}

/// Where an image comes from, as the renderer describes it
#[derive(Debug, Clone, Copy)]
pub enum ImageSource<'a> {
    /// A path resolved through the asset source
    File(&'a str),
    /// An in-memory encoded image
    Variable(&'a [u8]),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageHeader {
    pub w: u32,
    pub h: u32,
    pub cf: ColorFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JpegImageInfo {
    pub output_width: u32,
    pub output_height: u32,
    pub output_format: HwOutputFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStatus {
    FrameReady,
    /// Anything short of a finished frame, with the core's raw code
    Incomplete(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PpConfig {
    pub in_width: u32,
    pub in_height: u32,
    pub in_format: PpPixelFormat,
    pub video_range: u8,
    pub rgb_transform: RgbTransform,
    pub out_width: u32,
    pub out_height: u32,
    pub out_format: PpPixelFormat,
    pub out_buffer_addr: usize,
}

/// A decoded image owned by the caller until [`JpegDecoder::close`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub header: ImageHeader,
    pub stride: u32,
    pub data: Vec<u8>,
}

/// Decoder core + post-processor, as exposed by the vendor codec library
pub trait JpegHw {
    type Decoder;
    type Pp;

    /// Clock the codec block and reset its driver
    fn enable_engine(&mut self) -> Result<()>;
    fn disable_engine(&mut self);

    fn decoder_init(&mut self) -> Result<Self::Decoder>;
    fn decoder_release(&mut self, dec: Self::Decoder);
    fn pp_init(&mut self) -> Result<Self::Pp>;
    fn pp_release(&mut self, pp: Self::Pp);

    fn image_info(&mut self, dec: &Self::Decoder, stream: &[u8]) -> Result<JpegImageInfo>;
    fn combined_mode_enable(&mut self, pp: &Self::Pp, dec: &Self::Decoder) -> Result<()>;
    fn combined_mode_disable(&mut self, pp: &Self::Pp, dec: &Self::Decoder);
    fn pp_set_config(&mut self, pp: &Self::Pp, config: &PpConfig) -> Result<()>;
    fn decode(&mut self, dec: &Self::Decoder, stream: &[u8]) -> Result<DecodeStatus>;

    fn clean_dcache(&mut self, addr: usize, len: usize);
    fn clean_invalidate_dcache(&mut self, addr: usize, len: usize);
}

/// Loads encoded files for [`ImageSource::File`]
pub trait AssetSource {
    fn load(&mut self, path: &str) -> Result<Vec<u8>>;
}

impl AssetSource for RomfsVfs<'_> {
    fn load(&mut self, path: &str) -> Result<Vec<u8>> {
        self.read_to_vec(path)
            .map_err(|e| anyhow!("can't open {}: {}", path, e))
    }
}

/// Decoder and PP instances, released in reverse order on drop
struct Session<'h, H: JpegHw> {
    hw: &'h mut H,
    dec: Option<H::Decoder>,
    pp: Option<H::Pp>,
    combined: bool,
}

impl<'h, H: JpegHw> Session<'h, H> {
    fn open(hw: &'h mut H) -> Result<Self> {
        let dec = hw
            .decoder_init()
            .map_err(|e| anyhow!("JpegDecInit failed: {}", e))?;
        let mut session = Session {
            hw,
            dec: Some(dec),
            pp: None,
            combined: false,
        };
        let pp = session
            .hw
            .pp_init()
            .map_err(|e| anyhow!("PPInit failed: {}", e))?;
        session.pp = Some(pp);
        Ok(session)
    }

    fn parts(&mut self) -> Result<(&mut H, &H::Decoder, &H::Pp)> {
        match (self.dec.as_ref(), self.pp.as_ref()) {
            (Some(dec), Some(pp)) => Ok((&mut *self.hw, dec, pp)),
            _ => bail!("codec session already released"),
        }
    }

    fn image_info(&mut self, stream: &[u8]) -> Result<JpegImageInfo> {
        let (hw, dec, _) = self.parts()?;
        hw.image_info(dec, stream)
    }

    fn enable_combined_mode(&mut self) -> Result<()> {
        let (hw, dec, pp) = self.parts()?;
        hw.combined_mode_enable(pp, dec)
            .map_err(|e| anyhow!("PPDecCombinedModeEnable failed: {}", e))?;
        self.combined = true;
        Ok(())
    }

    fn configure_pp(&mut self, config: &PpConfig) -> Result<()> {
        let (hw, _, pp) = self.parts()?;
        hw.pp_set_config(pp, config)
            .map_err(|e| anyhow!("PPSetConfig failed: {}", e))
    }

    fn decode(&mut self, stream: &[u8]) -> Result<DecodeStatus> {
        let (hw, dec, _) = self.parts()?;
        hw.decode(dec, stream)
    }
}

impl<H: JpegHw> Drop for Session<'_, H> {
    fn drop(&mut self) {
        if let (true, Some(pp), Some(dec)) = (self.combined, self.pp.as_ref(), self.dec.as_ref()) {
            self.hw.combined_mode_disable(pp, dec);
        }
        if let Some(pp) = self.pp.take() {
            self.hw.pp_release(pp);
        }
        if let Some(dec) = self.dec.take() {
            self.hw.decoder_release(dec);
        }
    }
}

pub struct JpegDecoder<H: JpegHw, S: AssetSource> {
    hw: H,
    assets: S,
    pp_format: PpPixelFormat,
    out_format: ColorFormat,
    color_depth: u16,
    running: bool,
}

impl<H: JpegHw, S: AssetSource> JpegDecoder<H, S> {
    /// Register the decoder for a display of `color_depth` bits and start the codec
    pub fn init(mut hw: H, assets: S, color_depth: u16) -> Result<Self> {
        let (pp_format, out_format) = output_formats(color_depth)
            .ok_or_else(|| anyhow!("Purpose pp-type invalid for {}-bit color", color_depth))?;
        hw.enable_engine()?;
        info!("{} decoder registered, output {:?}", DECODER_NAME, out_format);
        Ok(Self {
            hw,
            assets,
            pp_format,
            out_format,
            color_depth,
            running: true,
        })
    }

    pub fn name(&self) -> &'static str {
        DECODER_NAME
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn assets_mut(&mut self) -> &mut S {
        &mut self.assets
    }

    pub fn hw(&self) -> &H {
        &self.hw
    }

    /// Probe size and decoded format without decoding
    pub fn info(&mut self, src: ImageSource<'_>) -> Result<ImageHeader> {
        let stream = match src {
            ImageSource::File(path) => Cow::Owned(self.load_file(path)?),
            ImageSource::Variable(data) => {
                if data.len() < 4 || data[..3] != JPEG_SOI {
                    bail!("not a JPEG stream");
                }
                Cow::Borrowed(data)
            }
        };

        let mut session = Session::open(&mut self.hw)?;
        let info = session.image_info(&stream)?;
        Ok(ImageHeader {
            w: info.output_width,
            h: info.output_height,
            cf: format_hw_to_sw(info.output_format),
        })
    }

    /// Decode into a fresh buffer in the display's colour format
    pub fn open(&mut self, src: ImageSource<'_>, header: &ImageHeader) -> Result<DecodedImage> {
        let stream = match src {
            ImageSource::File(path) => Cow::Owned(self.load_file(path)?),
            ImageSource::Variable(data) => Cow::Borrowed(data),
        };
        let in_format = format_sw_to_pp(header.cf)
            .ok_or_else(|| anyhow!("unsupported source format {:?}", header.cf))?;

        let bytes_per_pixel = self.out_format.bits_per_pixel() / 8;
        let stride = header.w * bytes_per_pixel;
        let mut data = vec![0u8; stride as usize * header.h as usize];

        let config = PpConfig {
            in_width: header.w,
            in_height: header.h,
            in_format,
            video_range: 1,
            rgb_transform: RgbTransform::Bt709,
            out_width: header.w,
            out_height: header.h,
            out_format: self.pp_format,
            out_buffer_addr: data.as_mut_ptr() as usize,
        };
        let out_len = header.w as usize * header.h as usize * self.color_depth as usize / 8;

        let mut session = Session::open(&mut self.hw)?;
        session.enable_combined_mode()?;
        session.hw.clean_invalidate_dcache(config.out_buffer_addr, out_len.min(data.len()));
        session.configure_pp(&config)?;

        match session.decode(&stream)? {
            DecodeStatus::FrameReady => {
                debug!("decoded {}x{} {:?}", header.w, header.h, self.out_format);
                Ok(DecodedImage {
                    // format changes in the PP stage
                    header: ImageHeader {
                        cf: self.out_format,
                        ..*header
                    },
                    stride,
                    data,
                })
            }
            DecodeStatus::Incomplete(code) => bail!("JpegDecDecode returned {}", code),
        }
    }

    pub fn close(&mut self, decoded: DecodedImage) {
        drop(decoded);
    }

    /// Stop the codec. Safe to call more than once.
    pub fn deinit(&mut self) {
        if self.running {
            self.hw.disable_engine();
            self.running = false;
            info!("{} decoder stopped", DECODER_NAME);
        }
    }

    fn load_file(&mut self, path: &str) -> Result<Vec<u8>> {
        let data = self.assets.load(path).map_err(|e| {
            warn!("can't load file {}", path);
            e
        })?;
        self.hw.clean_dcache(data.as_ptr() as usize, data.len());
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::romfs::{Romfs, RomfsBuilder};
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Step {
        Enable,
        Disable,
        DecInit(u32),
        DecRelease(u32),
        PpInit(u32),
        PpRelease(u32),
        Info,
        CombinedOn,
        CombinedOff,
        SetConfig(PpConfig),
        Decode(usize),
        Clean(usize),
        CleanInvalidate(usize),
    }

    #[derive(Clone, Default)]
    struct MockCodec {
        steps: Arc<Mutex<Vec<Step>>>,
        next_id: u32,
        fail_pp_init: bool,
        fail_set_config: bool,
        decode_status: Option<DecodeStatus>,
        info: Option<JpegImageInfo>,
    }

    impl MockCodec {
        fn steps(&self) -> Vec<Step> {
            self.steps.lock().unwrap().clone()
        }
        fn push(&self, step: Step) {
            self.steps.lock().unwrap().push(step);
        }
    }

    impl JpegHw for MockCodec {
        type Decoder = u32;
        type Pp = u32;

        fn enable_engine(&mut self) -> Result<()> {
            self.push(Step::Enable);
            Ok(())
        }
        fn disable_engine(&mut self) {
            self.push(Step::Disable);
        }
        fn decoder_init(&mut self) -> Result<u32> {
            self.next_id += 1;
            self.push(Step::DecInit(self.next_id));
            Ok(self.next_id)
        }
        fn decoder_release(&mut self, dec: u32) {
            self.push(Step::DecRelease(dec));
        }
        fn pp_init(&mut self) -> Result<u32> {
            if self.fail_pp_init {
                bail!("no PP");
            }
            self.next_id += 1;
            self.push(Step::PpInit(self.next_id));
            Ok(self.next_id)
        }
        fn pp_release(&mut self, pp: u32) {
            self.push(Step::PpRelease(pp));
        }
        fn image_info(&mut self, _dec: &u32, _stream: &[u8]) -> Result<JpegImageInfo> {
            self.push(Step::Info);
            self.info.ok_or_else(|| anyhow!("bad stream"))
        }
        fn combined_mode_enable(&mut self, _pp: &u32, _dec: &u32) -> Result<()> {
            self.push(Step::CombinedOn);
            Ok(())
        }
        fn combined_mode_disable(&mut self, _pp: &u32, _dec: &u32) {
            self.push(Step::CombinedOff);
        }
        fn pp_set_config(&mut self, _pp: &u32, config: &PpConfig) -> Result<()> {
            self.push(Step::SetConfig(*config));
            if self.fail_set_config {
                bail!("bad config");
            }
            Ok(())
        }
        fn decode(&mut self, _dec: &u32, stream: &[u8]) -> Result<DecodeStatus> {
            self.push(Step::Decode(stream.len()));
            Ok(self.decode_status.unwrap_or(DecodeStatus::FrameReady))
        }
        fn clean_dcache(&mut self, _addr: usize, len: usize) {
            self.push(Step::Clean(len));
        }
        fn clean_invalidate_dcache(&mut self, _addr: usize, len: usize) {
            self.push(Step::CleanInvalidate(len));
        }
    }

    struct NoAssets;

    impl AssetSource for NoAssets {
        fn load(&mut self, path: &str) -> Result<Vec<u8>> {
            bail!("{} missing", path)
        }
    }

    const JPEG: [u8; 6] = [0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10];

    fn codec() -> MockCodec {
        MockCodec {
            info: Some(JpegImageInfo {
                output_width: 8,
                output_height: 4,
                output_format: HwOutputFormat::YCbCr420SemiPlanar,
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_format_maps() {
        assert_eq!(format_hw_to_sw(HwOutputFormat::YCbCr422SemiPlanar), ColorFormat::I422);
        assert_eq!(format_hw_to_sw(HwOutputFormat::Other(7)), ColorFormat::Unknown);
        assert_eq!(format_sw_to_pp(ColorFormat::I420), Some(PpPixelFormat::YCbCr420SemiPlanar));
        assert_eq!(format_sw_to_pp(ColorFormat::Rgb565), None);
        assert_eq!(
            output_formats(24),
            Some((PpPixelFormat::Rgb32, ColorFormat::Xrgb8888))
        );
        assert_eq!(output_formats(8), None);
    }

    #[test]
    fn test_info_from_variable_source() {
        let hw = codec();
        let mut decoder = JpegDecoder::init(hw.clone(), NoAssets, 16).unwrap();
        assert_eq!(decoder.name(), "JPEG_RTK");

        let header = decoder.info(ImageSource::Variable(&JPEG)).unwrap();
        assert_eq!(header, ImageHeader { w: 8, h: 4, cf: ColorFormat::I420 });
        assert_eq!(
            hw.steps(),
            vec![
                Step::Enable,
                Step::DecInit(1),
                Step::PpInit(2),
                Step::Info,
                Step::PpRelease(2),
                Step::DecRelease(1),
            ]
        );
    }

    #[test]
    fn test_info_rejects_non_jpeg() {
        let hw = codec();
        let mut decoder = JpegDecoder::init(hw.clone(), NoAssets, 16).unwrap();
        assert!(decoder.info(ImageSource::Variable(&[0xFF, 0xD8, 0xFF])).is_err());
        assert!(decoder.info(ImageSource::Variable(&[0x89, b'P', b'N', b'G'])).is_err());
        assert!(decoder.info(ImageSource::File("/nope.jpg")).is_err());
        // nothing was touched past the engine enable
        assert_eq!(hw.steps(), vec![Step::Enable]);
    }

    #[test]
    fn test_info_from_romfs_file() {
        let mut builder = RomfsBuilder::new(0);
        builder.add_file("img/logo.jpg", JPEG.to_vec()).unwrap();
        let image = builder.build().unwrap();
        let vfs = RomfsVfs::new(Romfs::mount(&image, 0).unwrap());

        let hw = codec();
        let mut decoder = JpegDecoder::init(hw.clone(), vfs, 32).unwrap();
        let header = decoder.info(ImageSource::File("/img/logo.jpg")).unwrap();
        assert_eq!(header.w, 8);
        assert!(hw.steps().contains(&Step::Clean(JPEG.len())));
        assert_eq!(decoder.assets_mut().open_count(), 0);
    }

    #[test]
    fn test_open_decodes_and_releases() {
        let hw = codec();
        let mut decoder = JpegDecoder::init(hw.clone(), NoAssets, 16).unwrap();
        let header = ImageHeader { w: 8, h: 4, cf: ColorFormat::I420 };

        let decoded = decoder.open(ImageSource::Variable(&JPEG), &header).unwrap();
        assert_eq!(decoded.header.cf, ColorFormat::Rgb565);
        assert_eq!(decoded.stride, 16);
        assert_eq!(decoded.data.len(), 64);

        let steps = hw.steps();
        let config = steps
            .iter()
            .find_map(|s| match s {
                Step::SetConfig(c) => Some(*c),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.in_format, PpPixelFormat::YCbCr420SemiPlanar);
        assert_eq!(config.out_format, PpPixelFormat::Rgb16_565);
        assert_eq!(config.video_range, 1);
        assert_eq!(config.rgb_transform, RgbTransform::Bt709);
        assert!(steps.contains(&Step::CleanInvalidate(64)));
        assert_eq!(
            &steps[steps.len() - 3..],
            &[Step::CombinedOff, Step::PpRelease(2), Step::DecRelease(1)]
        );
        decoder.close(decoded);
    }

    #[test]
    fn test_open_failure_paths_release() {
        let header = ImageHeader { w: 8, h: 4, cf: ColorFormat::I422 };

        let hw = MockCodec { fail_pp_init: true, ..codec() };
        let mut decoder = JpegDecoder::init(hw.clone(), NoAssets, 16).unwrap();
        assert!(decoder.open(ImageSource::Variable(&JPEG), &header).is_err());
        assert_eq!(hw.steps().last(), Some(&Step::DecRelease(1)));

        let hw = MockCodec { fail_set_config: true, ..codec() };
        let mut decoder = JpegDecoder::init(hw.clone(), NoAssets, 16).unwrap();
        assert!(decoder.open(ImageSource::Variable(&JPEG), &header).is_err());
        let steps = hw.steps();
        assert!(!steps.iter().any(|s| matches!(s, Step::Decode(_))));
        assert_eq!(
            &steps[steps.len() - 3..],
            &[Step::CombinedOff, Step::PpRelease(2), Step::DecRelease(1)]
        );

        let hw = MockCodec {
            decode_status: Some(DecodeStatus::Incomplete(-2)),
            ..codec()
        };
        let mut decoder = JpegDecoder::init(hw, NoAssets, 16).unwrap();
        assert!(decoder.open(ImageSource::Variable(&JPEG), &header).is_err());
    }

    #[test]
    fn test_open_rejects_unknown_source_format() {
        let hw = codec();
        let mut decoder = JpegDecoder::init(hw.clone(), NoAssets, 16).unwrap();
        let header = ImageHeader { w: 8, h: 4, cf: ColorFormat::Unknown };
        assert!(decoder.open(ImageSource::Variable(&JPEG), &header).is_err());
        assert_eq!(hw.steps(), vec![Step::Enable]);
    }

    #[test]
    fn test_deinit_once() {
        let hw = codec();
        let mut decoder = JpegDecoder::init(hw.clone(), NoAssets, 32).unwrap();
        decoder.deinit();
        decoder.deinit();
        assert!(!decoder.is_running());
        assert_eq!(hw.steps(), vec![Step::Enable, Step::Disable]);
    }

    #[test]
    fn test_unsupported_depth() {
        assert!(JpegDecoder::init(codec(), NoAssets, 8).is_err());
    }
}

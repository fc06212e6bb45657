//! PPE (pixel processing engine) draw unit.
//!
//! The engine blits one buffer into another with scaling, rotation and
//! opacity. This module holds the job description and validates it before
//! it reaches the engine.

use anyhow::{bail, Result};
use log::{debug, info, warn};

/// Largest divisor `n` of a `16/n` scale step
pub const SCALE_DIVISOR_MAX: u32 = 65535;

/// Buffer geometry as the engine sees it. Field widths match the packed
/// hardware header (cf 8 bits, geometry 16 bits, colour 32 bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PpeHeader {
    /// Renderer colour format id
    pub cf: u8,
    pub w: u16,
    pub h: u16,
    pub min_x: u16,
    pub min_y: u16,
    /// Bytes per row
    pub stride: u16,
    pub color: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PpeConfiguration {
    pub src_buf: usize,
    pub dest_buf: usize,
    pub src_header: PpeHeader,
    pub dest_header: PpeHeader,
    /// 16/1, 16/2, ... 16/65535
    pub scale_x: f32,
    pub scale_y: f32,
    /// 0, 90, 180 or 270
    pub angle: u32,
    pub opa: u32,
}

impl PpeConfiguration {
    /// `n` such that `scale == 16 / n`, if there is one
    pub fn scale_divisor(scale: f32) -> Option<u32> {
        if !scale.is_finite() || scale <= 0.0 {
            return None;
        }
        let n = (16.0 / scale as f64).round();
        if n < 1.0 || n > SCALE_DIVISOR_MAX as f64 {
            return None;
        }
        let exact = 16.0 / n;
        if ((scale as f64) - exact).abs() > exact * 1e-4 {
            return None;
        }
        Some(n as u32)
    }

    pub fn validate(&self) -> Result<()> {
        if self.src_buf == 0 || self.dest_buf == 0 {
            bail!("PPE buffers must be set");
        }
        if Self::scale_divisor(self.scale_x).is_none() || Self::scale_divisor(self.scale_y).is_none() {
            bail!("PPE scale {}x{} is not a 16/n step", self.scale_x, self.scale_y);
        }
        if !matches!(self.angle, 0 | 90 | 180 | 270) {
            bail!("PPE angle {} not supported", self.angle);
        }
        if self.opa > 255 {
            bail!("PPE opacity {} out of range", self.opa);
        }
        for (name, header) in [("src", &self.src_header), ("dest", &self.dest_header)] {
            if header.w == 0 || header.h == 0 {
                bail!("PPE {} is empty", name);
            }
            if header.stride < header.w {
                bail!("PPE {} stride {} shorter than width {}", name, header.stride, header.w);
            }
        }
        Ok(())
    }
}

/// The blit engine itself
pub trait PpeEngine {
    fn init(&mut self) -> Result<()>;
    fn configure_and_start_transfer(&mut self, conf: &PpeConfiguration) -> Result<()>;
    fn deinit(&mut self);
}

pub struct Ppe<E: PpeEngine> {
    engine: E,
    initialized: bool,
    transfers: u32,
}

impl<E: PpeEngine> Ppe<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            initialized: false,
            transfers: 0,
        }
    }

    pub fn init(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }
        self.engine.init()?;
        self.initialized = true;
        info!("PPE draw unit initialized");
        Ok(())
    }

    pub fn configure_and_start_transfer(&mut self, conf: &PpeConfiguration) -> Result<()> {
        if !self.initialized {
            bail!("PPE draw unit not initialized");
        }
        if let Err(e) = conf.validate() {
            warn!("PPE job rejected: {}", e);
            return Err(e);
        }
        debug!(
            "PPE {}x{} -> {}x{}, angle {}, opa {}",
            conf.src_header.w, conf.src_header.h, conf.dest_header.w, conf.dest_header.h, conf.angle, conf.opa
        );
        self.engine.configure_and_start_transfer(conf)?;
        self.transfers = self.transfers.wrapping_add(1);
        Ok(())
    }

    pub fn deinit(&mut self) {
        if self.initialized {
            self.engine.deinit();
            self.initialized = false;
        }
    }

    pub fn transfers(&self) -> u32 {
        self.transfers
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }
}

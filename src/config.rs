use crate::port::RenderMode;
use crate::romfs::RomfsVfs;
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

pub const CONFIG_PATH: &str = "/config/port.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortConfig {
    // Screen
    pub width: u32,
    pub height: u32,
    pub color_depth: u16,

    // Renderer
    pub render_mode: RenderMode,
    pub hw_jpeg: bool,

    // Flip handshake
    pub flip_timeout_ms: u64,
    pub buffer_check: bool,

    pub log_level: String,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 480,
            color_depth: 16,
            render_mode: RenderMode::Direct,
            hw_jpeg: false,
            flip_timeout_ms: 100,
            buffer_check: false,
            log_level: "info".to_string(),
        }
    }
}

impl PortConfig {
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let config: PortConfig = serde_json::from_slice(bytes)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            bail!("invalid screen size {}x{}", self.width, self.height);
        }
        if !matches!(self.color_depth, 16 | 24 | 32) {
            bail!("unsupported color depth {}", self.color_depth);
        }
        Ok(())
    }

    /// Bytes in one framebuffer
    pub fn buffer_size(&self) -> usize {
        self.width as usize * self.height as usize * self.color_depth as usize / 8
    }
}

pub fn load_or_default(vfs: &mut RomfsVfs<'_>) -> PortConfig {
    match load_from_romfs(vfs) {
        Ok(config) => {
            log::info!("Loaded configuration from {}", CONFIG_PATH);
            config
        }
        Err(e) => {
            log::warn!("Failed to load {}: {}, using defaults", CONFIG_PATH, e);
            PortConfig::default()
        }
    }
}

fn load_from_romfs(vfs: &mut RomfsVfs<'_>) -> Result<PortConfig> {
    let data = vfs.read_to_vec(CONFIG_PATH)?;
    PortConfig::from_json(&data)
}

// SPDX-License-Identifier: CEPL-1.0
use std::fs;
use std::path::Path;

use kiln_render::{BackendConfig, VsyncMode};
use serde::Deserialize;
use tracing::{info, warn};

#[derive(Debug, Deserialize, Default)]
pub struct KilnCfg {
    #[serde(default)]
    pub app: AppCfg,
    #[serde(default)]
    pub render: RenderCfg,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AppCfg {
    pub name: String,
    pub width: u32,
    pub height: u32,
}

impl Default for AppCfg {
    fn default() -> Self {
        AppCfg {
            name: "kiln".to_owned(),
            width: 1280,
            height: 720,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct RenderCfg {
    pub clear_color: [f32; 4],
    pub vsync_mode: VsyncModeCfg,
    pub validation: bool,
    pub discrete_gpu_only: bool,
    /// Milliseconds; 0 waits forever.
    pub frame_timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VsyncModeCfg {
    #[default]
    Fifo,
    Mailbox,
    Immediate,
}

impl Default for RenderCfg {
    fn default() -> Self {
        let backend = BackendConfig::default();
        RenderCfg {
            clear_color: backend.clear_color,
            vsync_mode: VsyncModeCfg::Fifo,
            validation: backend.validation,
            discrete_gpu_only: backend.discrete_gpu_only,
            frame_timeout_ms: 0,
        }
    }
}

impl RenderCfg {
    pub fn backend_config(&self, force_validation: bool) -> BackendConfig {
        let vsync_mode = match self.vsync_mode {
            VsyncModeCfg::Fifo => VsyncMode::Fifo,
            VsyncModeCfg::Mailbox => VsyncMode::Mailbox,
            VsyncModeCfg::Immediate => VsyncMode::Immediate,
        };
        let frame_timeout_ns = match self.frame_timeout_ms {
            0 => u64::MAX,
            ms => ms.saturating_mul(1_000_000),
        };
        BackendConfig {
            clear_color: self.clear_color,
            vsync_mode,
            validation: self.validation || force_validation,
            discrete_gpu_only: self.discrete_gpu_only,
            frame_timeout_ns,
        }
    }
}

pub fn parse_cfg(text: &str) -> Result<KilnCfg, toml::de::Error> {
    toml::from_str(text)
}

pub fn load_cfg(path: &Path) -> KilnCfg {
    match fs::read_to_string(path) {
        Ok(s) => match parse_cfg(&s) {
            Ok(cfg) => {
                info!("loaded config from {}", path.display());
                cfg
            }
            Err(e) => {
                warn!("ignoring malformed {}: {e}", path.display());
                KilnCfg::default()
            }
        },
        Err(_) => {
            info!("no {} found, using defaults", path.display());
            KilnCfg::default()
        }
    }
}

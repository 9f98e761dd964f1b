// SPDX-License-Identifier: CEPL-1.0
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result};
use chopper_platform::WindowSettings;
use chopper_render::RendererConfig;
use serde::Deserialize;

pub const DEFAULT_CONFIG_PATH: &str = "chopper.toml";

/// Contents of `chopper.toml`. Every table and key is optional.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Used as the tracing filter when `RUST_LOG` is unset.
    pub log_level: String,
    pub window: WindowSettings,
    pub render: RendererConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            window: WindowSettings::default(),
            render: RendererConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn from_toml(src: &str) -> Result<Self> {
        Ok(toml::from_str(src)?)
    }

    /// A missing file yields the defaults; an unreadable or malformed one is an error.
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(src) => Self::from_toml(&src).with_context(|| format!("parsing {}", path.display())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chopper_render::RendererBackendType;

    #[test]
    fn empty_file_is_all_defaults() {
        assert_eq!(AppConfig::from_toml("").unwrap(), AppConfig::default());
    }

    #[test]
    fn tables_are_read() {
        let cfg = AppConfig::from_toml(
            r#"
            log_level = "debug,chopper_render_vk=trace"

            [window]
            title = "testbed"
            width = 640

            [render]
            backend = "direct_x"
            vsync = false
            clear_color = [1.0, 0.0, 1.0, 1.0]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.log_level, "debug,chopper_render_vk=trace");
        assert_eq!(cfg.window.title, "testbed");
        assert_eq!(cfg.window.width, 640);
        assert_eq!(cfg.window.height, 720);
        assert_eq!(cfg.render.backend, RendererBackendType::DirectX);
        assert!(!cfg.render.vsync);
        assert_eq!(cfg.render.clear_color, [1.0, 0.0, 1.0, 1.0]);
        assert!(cfg.render.depth_attachment);
    }

    #[test]
    fn malformed_file_is_an_error() {
        assert!(AppConfig::from_toml("[render]\nvsync = \"sometimes\"").is_err());
        assert!(AppConfig::from_toml("[window").is_err());
    }

    #[test]
    fn missing_file_gives_defaults() {
        let cfg = AppConfig::load(Path::new("does/not/exist/chopper.toml")).unwrap();
        assert_eq!(cfg, AppConfig::default());
    }
}

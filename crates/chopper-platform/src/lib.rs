// SPDX-License-Identifier: CEPL-1.0
pub use winit;

use serde::Deserialize;
use winit::dpi::LogicalSize;
use winit::window::{Window, WindowAttributes};

/// `[window]` table of the app config.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WindowSettings {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub resizable: bool,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            title: "Chopper".to_owned(),
            width: 1280,
            height: 720,
            resizable: true,
        }
    }
}

impl WindowSettings {
    pub fn attributes(&self) -> WindowAttributes {
        Window::default_attributes()
            .with_title(self.title.clone())
            .with_inner_size(LogicalSize::new(self.width.max(1), self.height.max(1)))
            .with_resizable(self.resizable)
    }
}

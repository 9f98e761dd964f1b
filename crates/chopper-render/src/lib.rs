// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use serde::Deserialize;
use std::fmt;
use thiserror::Error;
use tracing::{error, info};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Minimized windows report a zero width or height.
    pub const fn is_zero_area(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for RenderSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RendererBackendType {
    #[default]
    Vulkan,
    DirectX,
    OpenGl,
}

impl fmt::Display for RendererBackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RendererBackendType::Vulkan => "Vulkan",
            RendererBackendType::DirectX => "DirectX",
            RendererBackendType::OpenGl => "OpenGL",
        })
    }
}

/// `[render]` table of the app config. Every key is optional.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct RendererConfig {
    pub backend: RendererBackendType,
    pub app_name: String,
    /// Best effort; the present mode is still picked from what the surface offers.
    pub vsync: bool,
    pub clear_color: [f32; 4],
    pub clear_depth: f32,
    pub clear_stencil: u32,
    pub depth_attachment: bool,
    pub require_discrete_gpu: bool,
    pub require_sampler_anisotropy: bool,
    /// Rebuild the chain when present reports a suboptimal (but usable) surface.
    pub recreate_on_suboptimal: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            backend: RendererBackendType::Vulkan,
            app_name: "Chopper Engine Testbed".to_owned(),
            vsync: true,
            clear_color: [0.02, 0.02, 0.04, 1.0],
            clear_depth: 1.0,
            clear_stencil: 0,
            depth_attachment: true,
            require_discrete_gpu: true,
            require_sampler_anisotropy: true,
            recreate_on_suboptimal: true,
        }
    }
}

/// What an overlay gets to record into, once per frame, inside the main render pass.
#[derive(Clone, Copy, Debug)]
pub struct OverlayTarget {
    /// Raw API handle of the command buffer being recorded.
    pub command_buffer: u64,
    pub image_index: u32,
    pub frame_index: usize,
    pub size: RenderSize,
    pub delta_time: f32,
}

/// Draw-data producer layered on top of the scene (debug UI and the like).
pub trait Overlay {
    fn record(&mut self, target: &OverlayTarget);
}

#[derive(Default)]
pub struct RenderData<'a> {
    pub delta_time: f32,
    pub overlay: Option<&'a mut dyn Overlay>,
}

impl<'a> RenderData<'a> {
    pub fn new(delta_time: f32) -> Self {
        Self {
            delta_time,
            overlay: None,
        }
    }

    pub fn with_overlay(mut self, overlay: &'a mut dyn Overlay) -> Self {
        self.overlay = Some(overlay);
        self
    }
}

pub trait RendererBackend {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        cfg: &RendererConfig,
    ) -> Result<Self>
    where
        Self: Sized;

    fn backend_type(&self) -> RendererBackendType;

    /// `false` means the frame was skipped and `end_frame` must not be called.
    fn begin_frame(&mut self, data: &mut RenderData<'_>) -> bool;
    fn end_frame(&mut self, data: &mut RenderData<'_>) -> bool;
    fn on_resize(&mut self, size: RenderSize);
    /// Takes effect from the next frame.
    fn set_clear_color(&mut self, rgba: [f32; 4]);
    fn shutdown(&mut self);
}

#[derive(Debug, Error)]
pub enum RendererError {
    #[error("{0} backend is not implemented")]
    NotImplemented(RendererBackendType),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Owns the backend picked at startup and drives it one frame at a time.
pub struct Renderer {
    backend: Box<dyn RendererBackend>,
}

impl Renderer {
    pub fn new(backend: Box<dyn RendererBackend>) -> Self {
        info!("renderer: {} backend ready", backend.backend_type());
        Self { backend }
    }

    pub fn backend_type(&self) -> RendererBackendType {
        self.backend.backend_type()
    }

    pub fn begin_frame(&mut self, data: &mut RenderData<'_>) -> bool {
        self.backend.begin_frame(data)
    }

    pub fn end_frame(&mut self, data: &mut RenderData<'_>) -> bool {
        self.backend.end_frame(data)
    }

    /// A skipped frame is not a failure; only a frame that began and then failed to end is.
    pub fn draw_frame(&mut self, data: &mut RenderData<'_>) -> bool {
        if !self.backend.begin_frame(data) {
            return true;
        }
        if !self.backend.end_frame(data) {
            error!("renderer: failed to end drawing frame");
            return false;
        }
        true
    }

    pub fn on_window_resize(&mut self, size: RenderSize) {
        self.backend.on_resize(size);
    }

    pub fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.backend.set_clear_color(rgba);
    }

    pub fn shutdown(&mut self) {
        self.backend.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Debug, Deserialize)]
    struct Wrapper {
        #[serde(default)]
        render: RendererConfig,
    }

    #[test]
    fn empty_table_gives_defaults() {
        let w: Wrapper = toml::from_str("").unwrap();
        assert_eq!(w.render, RendererConfig::default());
        assert_eq!(w.render.backend, RendererBackendType::Vulkan);
        assert!(w.render.require_discrete_gpu);
        assert!(w.render.require_sampler_anisotropy);
    }

    #[test]
    fn partial_table_keeps_other_defaults() {
        let w: Wrapper = toml::from_str(
            r#"
            [render]
            backend = "open_gl"
            vsync = false
            recreate_on_suboptimal = false
            "#,
        )
        .unwrap();
        assert_eq!(w.render.backend, RendererBackendType::OpenGl);
        assert!(!w.render.vsync);
        assert!(!w.render.recreate_on_suboptimal);
        assert_eq!(w.render.clear_color, [0.02, 0.02, 0.04, 1.0]);
    }

    #[test]
    fn unknown_backend_is_rejected() {
        assert!(toml::from_str::<Wrapper>("[render]\nbackend = \"metal\"").is_err());
    }

    #[test]
    fn zero_area() {
        assert!(RenderSize::new(0, 10).is_zero_area());
        assert!(RenderSize::new(10, 0).is_zero_area());
        assert!(!RenderSize::new(1, 1).is_zero_area());
    }

    struct Scripted {
        begin: bool,
        end: bool,
        calls: Rc<RefCell<Vec<&'static str>>>,
    }

    impl RendererBackend for Scripted {
        fn new(
            _window: &dyn HasWindowHandle,
            _display: &dyn HasDisplayHandle,
            _size: RenderSize,
            _cfg: &RendererConfig,
        ) -> Result<Self> {
            unreachable!("constructed directly in tests")
        }

        fn backend_type(&self) -> RendererBackendType {
            RendererBackendType::Vulkan
        }

        fn begin_frame(&mut self, _data: &mut RenderData<'_>) -> bool {
            self.calls.borrow_mut().push("begin");
            self.begin
        }

        fn end_frame(&mut self, _data: &mut RenderData<'_>) -> bool {
            self.calls.borrow_mut().push("end");
            self.end
        }

        fn on_resize(&mut self, _size: RenderSize) {
            self.calls.borrow_mut().push("resize");
        }

        fn set_clear_color(&mut self, _rgba: [f32; 4]) {
            self.calls.borrow_mut().push("clear_color");
        }

        fn shutdown(&mut self) {
            self.calls.borrow_mut().push("shutdown");
        }
    }

    fn renderer(begin: bool, end: bool) -> (Renderer, Rc<RefCell<Vec<&'static str>>>) {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let backend = Scripted {
            begin,
            end,
            calls: calls.clone(),
        };
        (Renderer::new(Box::new(backend)), calls)
    }

    #[test]
    fn skipped_frame_does_not_end() {
        let (mut r, calls) = renderer(false, true);
        assert!(r.draw_frame(&mut RenderData::new(0.016)));
        assert_eq!(*calls.borrow(), ["begin"]);
    }

    #[test]
    fn failed_end_is_reported() {
        let (mut r, calls) = renderer(true, false);
        assert!(!r.draw_frame(&mut RenderData::new(0.016)));
        assert_eq!(*calls.borrow(), ["begin", "end"]);
    }

    #[test]
    fn resize_clear_color_and_shutdown_forward() {
        let (mut r, calls) = renderer(true, true);
        assert!(r.draw_frame(&mut RenderData::default()));
        r.on_window_resize(RenderSize::new(800, 600));
        r.set_clear_color([0.0, 0.0, 0.0, 1.0]);
        r.shutdown();
        assert_eq!(
            *calls.borrow(),
            ["begin", "end", "resize", "clear_color", "shutdown"]
        );
    }
}

// SPDX-License-Identifier: CEPL-1.0
use chopper_platform::winit::raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use chopper_render::{RenderSize, RendererBackend, RendererBackendType, RendererConfig, RendererError};
use chopper_render_vk::VulkanBackend;
use tracing::error;

/// Builds the backend named by `cfg.backend`. Only Vulkan exists; the others fail here.
pub fn create_backend(
    cfg: &RendererConfig,
    window: &dyn HasWindowHandle,
    display: &dyn HasDisplayHandle,
    size: RenderSize,
) -> Result<Box<dyn RendererBackend>, RendererError> {
    match cfg.backend {
        RendererBackendType::Vulkan => {
            let backend = VulkanBackend::new(window, display, size, cfg)?;
            Ok(Box::new(backend))
        }
        other @ (RendererBackendType::DirectX | RendererBackendType::OpenGl) => {
            error!("critical: {} renderer backend is not implemented", other);
            Err(RendererError::NotImplemented(other))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chopper_platform::winit::raw_window_handle::{DisplayHandle, HandleError, WindowHandle};

    struct NoWindow;

    impl HasWindowHandle for NoWindow {
        fn window_handle(&self) -> Result<WindowHandle<'_>, HandleError> {
            Err(HandleError::Unavailable)
        }
    }

    impl HasDisplayHandle for NoWindow {
        fn display_handle(&self) -> Result<DisplayHandle<'_>, HandleError> {
            Err(HandleError::Unavailable)
        }
    }

    fn create(backend: RendererBackendType) -> Result<Box<dyn RendererBackend>, RendererError> {
        let cfg = RendererConfig {
            backend,
            ..RendererConfig::default()
        };
        create_backend(&cfg, &NoWindow, &NoWindow, RenderSize::new(640, 480))
    }

    #[test]
    fn unimplemented_backends_fail_construction() {
        for backend in [RendererBackendType::DirectX, RendererBackendType::OpenGl] {
            match create(backend) {
                Err(RendererError::NotImplemented(b)) => assert_eq!(b, backend),
                Err(e) => panic!("unexpected error: {e}"),
                Ok(_) => panic!("{backend} should not construct"),
            }
        }
    }

    #[test]
    fn vulkan_without_a_window_is_a_backend_error() {
        assert!(matches!(
            create(RendererBackendType::Vulkan),
            Err(RendererError::Backend(_))
        ));
    }
}

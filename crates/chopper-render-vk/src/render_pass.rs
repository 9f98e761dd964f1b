// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use tracing::debug;

use crate::error::{VkResultExt, VulkanError};

/// Color: clear/store, ends present-ready. Depth: clear/don't-care.
pub fn attachment_descriptions(
    color_format: vk::Format,
    depth_format: Option<vk::Format>,
) -> Vec<vk::AttachmentDescription> {
    let mut out = vec![vk::AttachmentDescription {
        format: color_format,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::STORE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        ..Default::default()
    }];
    if let Some(format) = depth_format {
        out.push(vk::AttachmentDescription {
            format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::DONT_CARE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            ..Default::default()
        });
    }
    out
}

/// Color writes wait on the color-attachment-output stage. Depth ordering is not
/// part of the dependency.
pub fn external_dependency() -> vk::SubpassDependency {
    vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        src_access_mask: vk::AccessFlags::empty(),
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        dependency_flags: vk::DependencyFlags::empty(),
    }
}

/// Single-subpass pass covering the whole framebuffer.
#[derive(Debug)]
pub struct RenderPass {
    handle: vk::RenderPass,
    color_format: vk::Format,
    depth_format: Option<vk::Format>,
    render_area: vk::Rect2D,
    clear_color: [f32; 4],
    depth: f32,
    stencil: u32,
    begun: bool,
}

impl RenderPass {
    pub(crate) unsafe fn create(
        device: &ash::Device,
        color_format: vk::Format,
        depth_format: Option<vk::Format>,
        render_area: vk::Rect2D,
        clear_color: [f32; 4],
        depth: f32,
        stencil: u32,
    ) -> Result<Self, VulkanError> {
        let attachments = attachment_descriptions(color_format, depth_format);
        let color_ref = vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        };
        let depth_ref = vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };
        let subpass = vk::SubpassDescription {
            pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
            color_attachment_count: 1,
            p_color_attachments: &color_ref,
            p_depth_stencil_attachment: if depth_format.is_some() {
                &depth_ref
            } else {
                std::ptr::null()
            },
            ..Default::default()
        };
        let dependency = external_dependency();

        let rp_info = vk::RenderPassCreateInfo {
            s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
            attachment_count: attachments.len() as u32,
            p_attachments: attachments.as_ptr(),
            subpass_count: 1,
            p_subpasses: &subpass,
            dependency_count: 1,
            p_dependencies: &dependency,
            ..Default::default()
        };
        let handle =
            unsafe { device.create_render_pass(&rp_info, None) }.call("vkCreateRenderPass")?;
        debug!(
            "vk: render pass created (color {:?}, depth {:?})",
            color_format, depth_format
        );

        Ok(Self {
            handle,
            color_format,
            depth_format,
            render_area,
            clear_color,
            depth,
            stencil,
            begun: false,
        })
    }

    pub(crate) unsafe fn release(self, device: &ash::Device) {
        debug_assert!(!self.begun, "render pass released while begun");
        unsafe { device.destroy_render_pass(self.handle, None) };
        debug!("vk: render pass released");
    }

    pub(crate) unsafe fn begin(
        &mut self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        framebuffer: vk::Framebuffer,
    ) {
        self.enter();
        let clear_values = self.clear_values();
        let begin_info = vk::RenderPassBeginInfo {
            s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
            render_pass: self.handle,
            framebuffer,
            render_area: self.render_area,
            clear_value_count: clear_values.len() as u32,
            p_clear_values: clear_values.as_ptr(),
            ..Default::default()
        };
        unsafe { device.cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE) };
    }

    pub(crate) unsafe fn end(&mut self, device: &ash::Device, cmd: vk::CommandBuffer) {
        self.leave();
        unsafe { device.cmd_end_render_pass(cmd) };
    }

    fn enter(&mut self) {
        debug_assert!(!self.begun, "render pass begun twice");
        self.begun = true;
    }

    fn leave(&mut self) {
        debug_assert!(self.begun, "render pass ended without a begin");
        self.begun = false;
    }

    /// Color first, then depth/stencil when the pass has a depth attachment.
    pub fn clear_values(&self) -> Vec<vk::ClearValue> {
        let mut out = vec![vk::ClearValue {
            color: vk::ClearColorValue {
                float32: self.clear_color,
            },
        }];
        if self.depth_format.is_some() {
            out.push(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: self.depth,
                    stencil: self.stencil,
                },
            });
        }
        out
    }

    pub fn handle(&self) -> vk::RenderPass {
        self.handle
    }

    pub fn color_format(&self) -> vk::Format {
        self.color_format
    }

    pub fn depth_format(&self) -> Option<vk::Format> {
        self.depth_format
    }

    pub fn set_render_area(&mut self, area: vk::Rect2D) {
        self.render_area = area;
    }

    pub fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.clear_color = rgba;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detached(depth: Option<vk::Format>) -> RenderPass {
        RenderPass {
            handle: vk::RenderPass::null(),
            color_format: vk::Format::B8G8R8A8_UNORM,
            depth_format: depth,
            render_area: vk::Rect2D::default(),
            clear_color: [0.1, 0.2, 0.3, 1.0],
            depth: 1.0,
            stencil: 0,
            begun: false,
        }
    }

    #[test]
    fn color_is_cleared_stored_and_presentable() {
        let a = attachment_descriptions(vk::Format::B8G8R8A8_UNORM, None);
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(a[0].store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(a[0].final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
    }

    #[test]
    fn depth_is_cleared_and_discarded() {
        let a = attachment_descriptions(vk::Format::B8G8R8A8_UNORM, Some(vk::Format::D32_SFLOAT));
        assert_eq!(a.len(), 2);
        assert_eq!(a[1].format, vk::Format::D32_SFLOAT);
        assert_eq!(a[1].load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(a[1].store_op, vk::AttachmentStoreOp::DONT_CARE);
        assert_eq!(a[1].final_layout, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
    }

    #[test]
    fn dependency_covers_color_output_only() {
        let d = external_dependency();
        assert_eq!(d.src_subpass, vk::SUBPASS_EXTERNAL);
        assert_eq!(d.dst_subpass, 0);
        assert_eq!(d.src_stage_mask, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
        assert_eq!(d.dst_stage_mask, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
        assert_eq!(d.dst_access_mask, vk::AccessFlags::COLOR_ATTACHMENT_WRITE);
        assert!(!d.dst_stage_mask.contains(vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS));
    }

    #[test]
    fn clear_values_follow_attachments() {
        let mut rp = detached(Some(vk::Format::D32_SFLOAT));
        rp.set_clear_color([1.0, 0.0, 0.0, 1.0]);
        let v = rp.clear_values();
        assert_eq!(v.len(), 2);
        // SAFETY: reading the union members that were written.
        unsafe {
            assert_eq!(v[0].color.float32, [1.0, 0.0, 0.0, 1.0]);
            assert_eq!(v[1].depth_stencil.depth, 1.0);
        }
        assert_eq!(detached(None).clear_values().len(), 1);
    }

    #[test]
    fn begin_end_pairs() {
        let mut rp = detached(None);
        rp.enter();
        rp.leave();
        rp.enter();
        rp.leave();
        assert!(!rp.begun);
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "begun twice")]
    fn double_begin_is_trapped() {
        let mut rp = detached(None);
        rp.enter();
        rp.enter();
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "without a begin")]
    fn end_without_begin_is_trapped() {
        detached(None).leave();
    }
}

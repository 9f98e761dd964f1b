// SPDX-License-Identifier: CEPL-1.0
//! Per-frame protocol: wait, acquire, record, submit, present.
//!
//! [`FrameDriver`] owns the frame bookkeeping (sync slot, acquired image, which
//! slot last used each image, minimization) and talks to the GPU only through
//! [`FrameContext`].

use chopper_render::{OverlayTarget, RenderData, RenderSize};
use tracing::{debug, error, info, trace, warn};

use crate::error::VulkanError;
use crate::sync::MAX_FRAMES_IN_FLIGHT;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acquire {
    Image(u32),
    /// The surface changed; the chain must be rebuilt before the next frame.
    OutOfDate,
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Present {
    Presented,
    Suboptimal,
    OutOfDate,
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rebuild {
    Ready(RenderSize),
    /// The surface has no area right now (minimized); nothing was rebuilt.
    ZeroArea,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    Acquiring,
    Recording,
    Submitted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TeardownStep {
    SyncObjects,
    RenderPass,
    Chain,
    Device,
    Surface,
    DebugMessenger,
    Instance,
}

/// Reverse of creation.
pub const TEARDOWN_ORDER: [TeardownStep; 7] = [
    TeardownStep::SyncObjects,
    TeardownStep::RenderPass,
    TeardownStep::Chain,
    TeardownStep::Device,
    TeardownStep::Surface,
    TeardownStep::DebugMessenger,
    TeardownStep::Instance,
];

/// GPU-side operations the frame driver sequences. `slot` is a sync slot in
/// `0..MAX_FRAMES_IN_FLIGHT`, `image` a chain image index.
pub trait FrameContext {
    fn is_recreating(&self) -> bool;
    fn wait_idle(&mut self);

    /// Blocks until the slot's in-flight fence signals. No timeout.
    fn wait_for_slot(&mut self, slot: usize) -> Result<(), VulkanError>;
    fn reset_slot(&mut self, slot: usize) -> Result<(), VulkanError>;
    /// Recreates the slot's semaphores and fence (signaled) after a dropped frame.
    fn rebuild_slot(&mut self, slot: usize) -> Result<(), VulkanError>;

    fn acquire(&mut self, slot: usize) -> Acquire;

    /// Resets and begins the command buffer bound to `image`.
    fn begin_commands(&mut self, image: u32) -> Result<(), VulkanError>;
    /// Full-framebuffer viewport (Y flipped) and scissor.
    fn set_viewport(&mut self, image: u32, extent: RenderSize) -> Result<(), VulkanError>;
    fn begin_render_pass(&mut self, image: u32, extent: RenderSize) -> Result<(), VulkanError>;
    /// Raw handle of the command buffer bound to `image`.
    fn command_stream(&self, image: u32) -> u64;
    fn end_render_pass(&mut self, image: u32);
    fn end_commands(&mut self, image: u32) -> Result<(), VulkanError>;

    /// Waits on the slot's image-available semaphore at color output, signals its
    /// render-finished semaphore and in-flight fence.
    fn submit(&mut self, slot: usize, image: u32) -> Result<(), VulkanError>;
    fn present(&mut self, slot: usize, image: u32) -> Present;

    /// Rebuilds the chain and everything sized by it. The device must be idle and
    /// no command buffer may be recording.
    fn recreate_chain(&mut self, size: RenderSize) -> Result<Rebuild, VulkanError>;
    fn image_count(&self) -> usize;

    fn teardown(&mut self, step: TeardownStep);
}

pub struct FrameDriver<C: FrameContext> {
    ctx: C,
    state: FrameState,
    current_frame: usize,
    image_index: u32,
    extent: RenderSize,
    suspended: bool,
    needs_recreate: bool,
    /// Resize that arrived while a frame was recording.
    pending_size: Option<RenderSize>,
    /// Sync slot whose submission last used each chain image.
    images_in_flight: Vec<Option<usize>>,
    recreate_on_suboptimal: bool,
    shut_down: bool,
}

impl<C: FrameContext> FrameDriver<C> {
    pub fn new(ctx: C, extent: RenderSize, recreate_on_suboptimal: bool) -> Self {
        let images = ctx.image_count();
        Self {
            ctx,
            state: FrameState::Idle,
            current_frame: 0,
            image_index: 0,
            extent,
            suspended: extent.is_zero_area(),
            needs_recreate: false,
            pending_size: None,
            images_in_flight: vec![None; images],
            recreate_on_suboptimal,
            shut_down: false,
        }
    }

    pub fn context(&self) -> &C {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut C {
        &mut self.ctx
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    pub fn extent(&self) -> RenderSize {
        self.extent
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    pub fn begin_frame(&mut self, _data: &mut RenderData<'_>) -> bool {
        if self.shut_down {
            return false;
        }
        if self.state != FrameState::Idle {
            error!("vk: begin_frame while a frame is {:?}", self.state);
            return false;
        }
        if self.suspended {
            trace!("vk: minimized, frame skipped");
            return false;
        }
        if self.ctx.is_recreating() || self.needs_recreate {
            self.recreate(self.extent);
            return false;
        }

        let slot = self.current_frame;
        self.state = FrameState::Acquiring;

        if let Err(e) = self.ctx.wait_for_slot(slot) {
            error!("vk: waiting on frame slot {} failed: {e}", slot);
            self.state = FrameState::Idle;
            return false;
        }

        let image = match self.ctx.acquire(slot) {
            Acquire::Image(i) => i,
            Acquire::OutOfDate => {
                debug!("vk: chain out of date on acquire");
                self.state = FrameState::Idle;
                self.recreate(self.extent);
                return false;
            }
            Acquire::Failed => {
                self.state = FrameState::Idle;
                return false;
            }
        };

        // The image may still be in use by the other slot's submission.
        if let Some(owner) = self.image_owner(image) {
            if owner != slot {
                if let Err(e) = self.ctx.wait_for_slot(owner) {
                    error!("vk: waiting on frame slot {} failed: {e}", owner);
                    self.drop_frame(slot, image);
                    return false;
                }
            }
        }
        self.set_image_owner(image, Some(slot));

        if let Err(e) = self.ctx.reset_slot(slot) {
            error!("vk: {e}");
            self.drop_frame(slot, image);
            return false;
        }
        if let Err(e) = self.ctx.begin_commands(image) {
            error!("vk: {e}");
            self.drop_frame(slot, image);
            return false;
        }
        if let Err(e) = self.ctx.set_viewport(image, self.extent) {
            error!("vk: {e}");
            self.drop_frame(slot, image);
            return false;
        }
        if let Err(e) = self.ctx.begin_render_pass(image, self.extent) {
            error!("vk: {e}");
            self.drop_frame(slot, image);
            return false;
        }

        self.image_index = image;
        self.state = FrameState::Recording;
        true
    }

    pub fn end_frame(&mut self, data: &mut RenderData<'_>) -> bool {
        if self.state != FrameState::Recording {
            error!("vk: end_frame without a matching begin_frame ({:?})", self.state);
            return false;
        }
        let slot = self.current_frame;
        let image = self.image_index;

        if let Some(overlay) = data.overlay.as_deref_mut() {
            overlay.record(&OverlayTarget {
                command_buffer: self.ctx.command_stream(image),
                image_index: image,
                frame_index: slot,
                size: self.extent,
                delta_time: data.delta_time,
            });
        }

        self.ctx.end_render_pass(image);
        if let Err(e) = self.ctx.end_commands(image) {
            error!("vk: {e}");
            self.drop_frame(slot, image);
            return false;
        }
        if let Err(e) = self.ctx.submit(slot, image) {
            error!("vk: frame dropped: {e}");
            self.drop_frame(slot, image);
            return false;
        }
        self.state = FrameState::Submitted;

        let presented = self.ctx.present(slot, image);
        self.current_frame = (self.current_frame + 1) % MAX_FRAMES_IN_FLIGHT;
        self.state = FrameState::Idle;

        let ok = match presented {
            Present::Presented => true,
            Present::Suboptimal => {
                if self.recreate_on_suboptimal {
                    self.needs_recreate = true;
                }
                true
            }
            Present::OutOfDate => {
                self.needs_recreate = true;
                true
            }
            Present::Failed => false,
        };

        self.take_pending_size();
        if self.needs_recreate && !self.suspended {
            self.recreate(self.extent);
        }
        ok
    }

    /// Zero area suspends frames until a non-zero size arrives. A resize during a
    /// recording frame is applied once that frame has been submitted.
    pub fn on_resize(&mut self, size: RenderSize) {
        if self.shut_down {
            return;
        }
        if self.state != FrameState::Idle {
            debug!("vk: resize to {} deferred to the end of the frame", size);
            if size.is_zero_area() {
                self.suspended = true;
                self.pending_size = None;
            } else {
                self.suspended = false;
                self.pending_size = Some(size);
            }
            return;
        }
        if size.is_zero_area() {
            if !self.suspended {
                info!("vk: resize to {} → paused", size);
            }
            self.suspended = true;
            return;
        }
        if self.suspended {
            info!("vk: resize to {} → resumed", size);
        }
        self.suspended = false;
        self.extent = size;
        self.recreate(size);
    }

    /// Idles the device, then releases everything in reverse creation order.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        if self.state != FrameState::Idle {
            warn!("vk: shutdown during a {:?} frame", self.state);
        }
        self.ctx.wait_idle();
        for step in TEARDOWN_ORDER {
            self.ctx.teardown(step);
        }
        self.state = FrameState::Idle;
        self.shut_down = true;
        info!("vk: backend shut down");
    }

    fn recreate(&mut self, size: RenderSize) -> bool {
        self.ctx.wait_idle();
        match self.ctx.recreate_chain(size) {
            Ok(Rebuild::ZeroArea) => {
                info!("vk: surface has zero area → paused");
                self.suspended = true;
                self.needs_recreate = true;
                false
            }
            Ok(Rebuild::Ready(extent)) => {
                self.extent = extent;
                self.images_in_flight = vec![None; self.ctx.image_count()];
                self.current_frame = 0;
                self.needs_recreate = false;
                debug!("vk: chain recreated at {}", extent);
                true
            }
            Err(e) => {
                error!("vk: chain recreation failed: {e}");
                self.needs_recreate = true;
                false
            }
        }
    }

    /// Recovers a slot whose fence was reset but never submitted.
    fn drop_frame(&mut self, slot: usize, image: u32) {
        self.ctx.wait_idle();
        if let Err(e) = self.ctx.rebuild_slot(slot) {
            error!("vk: could not rebuild frame slot {}: {e}", slot);
        }
        self.set_image_owner(image, None);
        // The acquired image is never presented; a fresh chain releases it.
        self.needs_recreate = true;
        self.take_pending_size();
        self.state = FrameState::Idle;
    }

    fn take_pending_size(&mut self) {
        if let Some(size) = self.pending_size.take() {
            self.extent = size;
            self.needs_recreate = true;
        }
    }

    fn image_owner(&self, image: u32) -> Option<usize> {
        self.images_in_flight.get(image as usize).copied().flatten()
    }

    fn set_image_owner(&mut self, image: u32, owner: Option<usize>) {
        let i = image as usize;
        if i >= self.images_in_flight.len() {
            self.images_in_flight.resize(i + 1, None);
        }
        self.images_in_flight[i] = owner;
    }
}

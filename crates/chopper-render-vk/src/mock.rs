// SPDX-License-Identifier: CEPL-1.0
//! In-memory [`FrameContext`] with a lazy GPU: a submission only completes when
//! its fence is waited on or the device is idled.

use std::collections::VecDeque;

use ash::vk;
use chopper_render::RenderSize;

use crate::error::VulkanError;
use crate::frame::{Acquire, FrameContext, Present, Rebuild, TeardownStep};
use crate::sync::MAX_FRAMES_IN_FLIGHT;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Call {
    WaitIdle,
    WaitSlot(usize),
    ResetSlot(usize),
    RebuildSlot(usize),
    Acquire(usize),
    BeginCommands(u32),
    SetViewport(u32),
    BeginRenderPass(u32),
    EndRenderPass(u32),
    EndCommands(u32),
    Submit { slot: usize, image: u32 },
    Present { slot: usize, image: u32 },
    RecreateChain(RenderSize),
    Teardown(TeardownStep),
}

pub struct MockContext {
    calls: Vec<Call>,
    images: usize,
    next_image: u32,
    acquire_script: VecDeque<Acquire>,
    present_script: VecDeque<Present>,
    signaled: [bool; MAX_FRAMES_IN_FLIGHT],
    pending: [Option<u32>; MAX_FRAMES_IN_FLIGHT],
    max_unsignaled: usize,
    recording: Option<u32>,
    recreating: bool,
    recreations: usize,
    fail_submit: bool,
    fail_recreate: bool,
    fail_render_pass: bool,
    zero_surface: bool,
}

impl MockContext {
    pub fn new(images: usize) -> Self {
        Self {
            calls: Vec::new(),
            images,
            next_image: 0,
            acquire_script: VecDeque::new(),
            present_script: VecDeque::new(),
            signaled: [true; MAX_FRAMES_IN_FLIGHT],
            pending: [None; MAX_FRAMES_IN_FLIGHT],
            max_unsignaled: 0,
            recording: None,
            recreating: false,
            recreations: 0,
            fail_submit: false,
            fail_recreate: false,
            fail_render_pass: false,
            zero_surface: false,
        }
    }

    pub fn stream_handle(image: u32) -> u64 {
        0x1000 + image as u64
    }

    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    pub fn script_acquire(&mut self, results: impl IntoIterator<Item = Acquire>) {
        self.acquire_script.extend(results);
    }

    pub fn script_present(&mut self, results: impl IntoIterator<Item = Present>) {
        self.present_script.extend(results);
    }

    pub fn fail_next_submit(&mut self) {
        self.fail_submit = true;
    }

    pub fn fail_next_recreate(&mut self) {
        self.fail_recreate = true;
    }

    pub fn fail_next_render_pass(&mut self) {
        self.fail_render_pass = true;
    }

    /// The surface reports a 0x0 extent until turned off again.
    pub fn set_zero_surface(&mut self, on: bool) {
        self.zero_surface = on;
    }

    pub fn set_recreating(&mut self, on: bool) {
        self.recreating = on;
    }

    pub fn recreations(&self) -> usize {
        self.recreations
    }

    pub fn unsignaled_fences(&self) -> usize {
        self.signaled.iter().filter(|s| !**s).count()
    }

    pub fn max_unsignaled(&self) -> usize {
        self.max_unsignaled
    }

    fn complete(&mut self, slot: usize) {
        self.pending[slot] = None;
        self.signaled[slot] = true;
    }
}

impl FrameContext for MockContext {
    fn is_recreating(&self) -> bool {
        self.recreating
    }

    fn wait_idle(&mut self) {
        self.calls.push(Call::WaitIdle);
        for slot in 0..MAX_FRAMES_IN_FLIGHT {
            if self.pending[slot].is_some() {
                self.complete(slot);
            }
        }
    }

    fn wait_for_slot(&mut self, slot: usize) -> Result<(), VulkanError> {
        self.calls.push(Call::WaitSlot(slot));
        if !self.signaled[slot] {
            assert!(
                self.pending[slot].is_some(),
                "waiting on slot {slot} whose fence was reset but never submitted"
            );
        }
        self.complete(slot);
        Ok(())
    }

    fn reset_slot(&mut self, slot: usize) -> Result<(), VulkanError> {
        self.calls.push(Call::ResetSlot(slot));
        assert!(self.pending[slot].is_none(), "reset of a pending fence");
        self.signaled[slot] = false;
        self.max_unsignaled = self.max_unsignaled.max(self.unsignaled_fences());
        Ok(())
    }

    fn rebuild_slot(&mut self, slot: usize) -> Result<(), VulkanError> {
        self.calls.push(Call::RebuildSlot(slot));
        assert!(self.pending[slot].is_none(), "rebuild of a slot still in use");
        self.signaled[slot] = true;
        // A dropped frame's commands are never submitted.
        self.recording = None;
        Ok(())
    }

    fn acquire(&mut self, slot: usize) -> Acquire {
        self.calls.push(Call::Acquire(slot));
        if let Some(result) = self.acquire_script.pop_front() {
            return result;
        }
        let image = self.next_image;
        self.next_image = (self.next_image + 1) % self.images as u32;
        Acquire::Image(image)
    }

    fn begin_commands(&mut self, image: u32) -> Result<(), VulkanError> {
        self.calls.push(Call::BeginCommands(image));
        assert!(
            !self.pending.contains(&Some(image)),
            "recording into image {image} while its previous submission is in flight"
        );
        assert!(self.recording.is_none(), "two command buffers recording");
        self.recording = Some(image);
        Ok(())
    }

    fn set_viewport(&mut self, image: u32, _extent: RenderSize) -> Result<(), VulkanError> {
        self.calls.push(Call::SetViewport(image));
        assert_eq!(self.recording, Some(image), "viewport set outside recording");
        Ok(())
    }

    fn begin_render_pass(&mut self, image: u32, _extent: RenderSize) -> Result<(), VulkanError> {
        self.calls.push(Call::BeginRenderPass(image));
        if std::mem::take(&mut self.fail_render_pass) {
            return Err(VulkanError::Missing("framebuffer"));
        }
        Ok(())
    }

    fn command_stream(&self, image: u32) -> u64 {
        Self::stream_handle(image)
    }

    fn end_render_pass(&mut self, image: u32) {
        self.calls.push(Call::EndRenderPass(image));
    }

    fn end_commands(&mut self, image: u32) -> Result<(), VulkanError> {
        self.calls.push(Call::EndCommands(image));
        assert_eq!(self.recording.take(), Some(image));
        Ok(())
    }

    fn submit(&mut self, slot: usize, image: u32) -> Result<(), VulkanError> {
        self.calls.push(Call::Submit { slot, image });
        if std::mem::take(&mut self.fail_submit) {
            return Err(VulkanError::Call {
                call: "vkQueueSubmit",
                result: vk::Result::ERROR_DEVICE_LOST,
            });
        }
        assert!(!self.signaled[slot], "submit with a signaled fence");
        assert!(self.pending[slot].is_none(), "two submissions on slot {slot}");
        self.pending[slot] = Some(image);
        Ok(())
    }

    fn present(&mut self, slot: usize, image: u32) -> Present {
        self.calls.push(Call::Present { slot, image });
        self.present_script.pop_front().unwrap_or(Present::Presented)
    }

    fn recreate_chain(&mut self, size: RenderSize) -> Result<Rebuild, VulkanError> {
        self.calls.push(Call::RecreateChain(size));
        assert!(self.pending.iter().all(Option::is_none), "recreate with work in flight");
        assert!(self.recording.is_none(), "recreate while recording");
        if self.zero_surface {
            return Ok(Rebuild::ZeroArea);
        }
        if std::mem::take(&mut self.fail_recreate) {
            self.recreating = true;
            return Err(VulkanError::NoSurfaceFormat);
        }
        self.recreating = false;
        self.recreations += 1;
        self.next_image = 0;
        Ok(Rebuild::Ready(size))
    }

    fn image_count(&self) -> usize {
        self.images
    }

    fn teardown(&mut self, step: TeardownStep) {
        self.calls.push(Call::Teardown(step));
    }
}

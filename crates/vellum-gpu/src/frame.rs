//! Frame pipelining over a swapchain.
//!
//! A [`FrameSynchronizer`] owns a ring of frame slots, each with a render fence, a
//! present semaphore, a render semaphore and a command list. Per frame:
//!
//! 1. wait for and reset the slot's fence;
//! 2. acquire a swapchain image, recreating the swapchain and retrying once if it is
//!    out of date;
//! 3. begin the slot's command list;
//! 4. (caller records and ends the list);
//! 5. submit, waiting on the present semaphore and signaling the render semaphore;
//! 6. present, recreating the swapchain on out-of-date or suboptimal results;
//! 7. advance to the next slot.

use std::sync::Arc;
use std::time::Duration;

use ash::vk;

use crate::command::CommandList;
use crate::device::{RenderDevice, DEFAULT_TIMEOUT};
use crate::error::{fatal, GpuError, Result};
use crate::image::{Image, ImageDesc, ImageView, ImageViewDesc};
use crate::queue::Submission;
use crate::render_pass::{
    ClearValue, ColorAttachmentDesc, DepthAttachmentDesc, RenderPass, RenderPassBeginInfo,
    RenderPassDesc, RenderPassSource,
};
use crate::state::{CommandType, ResourceState};
use crate::surface::{AcquireOutcome, RawSurface, WindowSurface};
use crate::swapchain::Swapchain;
use crate::sync::{Fence, Semaphore};

/// Upper bound on frames in flight.
pub const MAX_FRAMES_IN_FLIGHT: usize = 3;

/// Frame pipeline configuration.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    pub(crate) frames_in_flight: usize,
    pub(crate) vsync: bool,
    pub(crate) clear_color: [f32; 4],
    pub(crate) depth_format: Option<vk::Format>,
    pub(crate) timeout: Duration,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            vsync: true,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            depth_format: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl FrameConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of frame slots, clamped to `1..=MAX_FRAMES_IN_FLIGHT`.
    pub fn frames_in_flight(mut self, count: usize) -> Self {
        self.frames_in_flight = count.clamp(1, MAX_FRAMES_IN_FLIGHT);
        self
    }

    pub fn vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    /// Color the swapchain image is cleared to at the start of its pass.
    pub fn clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }

    /// Add a depth attachment of this format to every swapchain pass.
    pub fn depth_format(mut self, format: vk::Format) -> Self {
        self.depth_format = Some(format);
        self
    }

    /// Bound on fence waits and image acquisition.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn frame_count(&self) -> usize {
        self.frames_in_flight
    }
}

struct FrameSlot {
    render_fence: Fence,
    present_semaphore: Semaphore,
    render_semaphore: Semaphore,
    commands: CommandList,
}

impl FrameSlot {
    fn new(device: &Arc<RenderDevice>) -> Result<Self> {
        Ok(Self {
            // Signaled so the first wait on each slot returns immediately.
            render_fence: Fence::create(device, true)?,
            present_semaphore: Semaphore::create(device)?,
            render_semaphore: Semaphore::create(device)?,
            commands: CommandList::new(device, CommandType::Graphics)?,
        })
    }

    fn rebuild_semaphores(&mut self, device: &Arc<RenderDevice>) -> Result<()> {
        self.present_semaphore = Semaphore::create(device)?;
        self.render_semaphore = Semaphore::create(device)?;
        Ok(())
    }
}

/// What the caller records into for one frame.
pub struct FrameInfo<'a> {
    /// Begin info for the acquired image's swapchain pass.
    pub render_pass_begin_info: RenderPassBeginInfo<'a>,
    /// Slot in the frame ring.
    pub buffering_index: usize,
    /// Acquired swapchain image.
    pub image_index: u32,
    /// Already begun; the caller ends it before [`FrameSynchronizer::end_frame`].
    pub command_list: &'a mut CommandList,
}

/// Drives the per-frame acquire, submit and present cycle.
pub struct FrameSynchronizer {
    device: Arc<RenderDevice>,
    window: Arc<dyn WindowSurface>,
    config: FrameConfig,
    // Passes reference the swapchain views and the depth image: dropped first.
    render_passes: Vec<RenderPass>,
    depth_image: Option<Arc<Image>>,
    swapchain: Swapchain,
    slots: Vec<FrameSlot>,
    current: usize,
    image_index: Option<u32>,
    needs_recreate: bool,
    frame_number: u64,
}

impl FrameSynchronizer {
    /// Create the swapchain, its passes and the frame ring.
    pub fn new(
        device: &Arc<RenderDevice>,
        surface: Arc<dyn RawSurface>,
        window: Arc<dyn WindowSurface>,
        config: FrameConfig,
    ) -> Result<Self> {
        let (width, height) = wait_for_nonzero_size(window.as_ref());
        let swapchain = Swapchain::new(device, surface, width, height, config.vsync)?;
        let depth_image = create_depth_image(device, &swapchain, config.depth_format)?;
        let render_passes = create_render_passes(device, &swapchain, depth_image.as_ref())?;

        let slots = (0..config.frames_in_flight)
            .map(|_| FrameSlot::new(device))
            .collect::<Result<Vec<_>>>()?;

        tracing::info!(
            "Frame pipeline ready: {} frames in flight, {} swapchain images",
            slots.len(),
            swapchain.image_count()
        );

        Ok(Self {
            device: device.clone(),
            window,
            config,
            render_passes,
            depth_image,
            swapchain,
            slots,
            current: 0,
            image_index: None,
            needs_recreate: false,
            frame_number: 0,
        })
    }

    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    /// Swapchain pass of one image.
    pub fn render_pass(&self, image_index: u32) -> Option<&RenderPass> {
        self.render_passes.get(image_index as usize)
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    /// Current slot in the frame ring.
    pub fn buffering_index(&self) -> usize {
        self.current
    }

    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    /// Frames presented or dropped so far.
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    pub fn set_clear_color(&mut self, color: [f32; 4]) {
        self.config.clear_color = color;
    }

    fn timeout_ns(&self) -> u64 {
        u64::try_from(self.config.timeout.as_nanos()).unwrap_or(u64::MAX)
    }

    /// Wait for the current slot, acquire an image and begin the slot's command list.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn begin_frame(&mut self) -> Result<FrameInfo<'_>> {
        if self.image_index.is_some() {
            return Err(GpuError::InvalidState(
                "begin_frame called twice without end_frame".to_string(),
            ));
        }

        {
            let _span = tracing::trace_span!("frame.wait_fence").entered();
            let fence = &self.slots[self.current].render_fence;
            if let Err(e) = fence.wait_timeout(self.config.timeout) {
                fatal(format!("frame slot {} fence wait failed: {e}", self.current));
            }
        }

        // The fence stays signaled until an image is acquired, so a failed acquire
        // leaves the slot ready for the next call.
        let image_index = {
            let _span = tracing::trace_span!("frame.acquire").entered();
            match self.acquire()? {
                Some(index) => index,
                None => {
                    self.recreate()?;
                    match self.acquire() {
                        Ok(Some(index)) => index,
                        Ok(None) => fatal("swapchain out of date again after recreation"),
                        Err(e) => fatal(format!("acquire failed after recreation: {e}")),
                    }
                }
            }
        };

        if let Err(e) = self.slots[self.current].render_fence.reset() {
            fatal(format!("frame slot {} fence reset failed: {e}", self.current));
        }
        if let Err(e) = self.slots[self.current].commands.begin() {
            tracing::warn!("Frame command list begin failed: {e}, dropping frame");
            self.reset_slot()?;
            return Err(e);
        }
        self.image_index = Some(image_index);

        let clear_values = self.clear_values();
        let Self {
            render_passes,
            slots,
            current,
            ..
        } = self;
        let render_pass = render_passes.get(image_index as usize).ok_or_else(|| {
            GpuError::InvalidState(format!("no swapchain pass for image {image_index}"))
        })?;

        Ok(FrameInfo {
            render_pass_begin_info: render_pass.begin_info(clear_values),
            buffering_index: *current,
            image_index,
            command_list: &mut slots[*current].commands,
        })
    }

    /// `None` when the swapchain is out of date.
    fn acquire(&mut self) -> Result<Option<u32>> {
        let semaphore = self.slots[self.current].present_semaphore.handle();
        match self
            .swapchain
            .acquire_next_image(semaphore, self.timeout_ns())?
        {
            AcquireOutcome::Acquired { index, suboptimal } => {
                if suboptimal {
                    tracing::debug!("Acquired suboptimal swapchain image {index}");
                    self.needs_recreate = true;
                }
                Ok(Some(index))
            }
            AcquireOutcome::OutOfDate => {
                tracing::debug!("Swapchain out of date on acquire");
                Ok(None)
            }
        }
    }

    fn clear_values(&self) -> Vec<ClearValue> {
        let mut values = vec![ClearValue::Color(self.config.clear_color)];
        if self.depth_image.is_some() {
            values.push(ClearValue::DepthStencil {
                depth: 1.0,
                stencil: 0,
            });
        }
        values
    }

    /// Submit the current slot's commands and present the acquired image.
    ///
    /// The command list must have been ended. A failed present drops the frame and
    /// recreates the swapchain without reporting an error. A present timeout is
    /// reported after the ring advances. A failed submit leaves the slot idle so the
    /// next [`FrameSynchronizer::begin_frame`] can run.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn end_frame(&mut self) -> Result<()> {
        let image_index = self.image_index.ok_or_else(|| {
            GpuError::InvalidState("end_frame called without begin_frame".to_string())
        })?;
        let slot = &self.slots[self.current];
        if slot.commands.is_recording() {
            return Err(GpuError::InvalidState(
                "frame command list was not ended".to_string(),
            ));
        }

        let queue = self.device.graphics_queue();
        let command_buffers = [slot.commands.handle()];
        let wait_semaphores = [slot.present_semaphore.handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [slot.render_semaphore.handle()];
        self.image_index = None;
        let submitted = {
            let _span = tracing::trace_span!("frame.submit").entered();
            queue.submit(
                &Submission {
                    command_buffers: &command_buffers,
                    wait_semaphores: &wait_semaphores,
                    wait_stages: &wait_stages,
                    signal_semaphores: &signal_semaphores,
                },
                slot.render_fence.handle(),
            )
        };
        if let Err(e) = submitted {
            tracing::warn!("Frame submit failed: {e}, dropping frame");
            self.reset_slot()?;
            return Err(e);
        }

        let presented = {
            let _span = tracing::trace_span!("frame.present").entered();
            self.swapchain.present(queue, image_index, &signal_semaphores)
        };

        let recreate = match presented {
            Ok(outcome) => {
                if outcome.needs_recreate() {
                    tracing::debug!("Present returned {outcome:?}, dropping frame");
                }
                outcome.needs_recreate() || self.needs_recreate
            }
            Err(GpuError::Timeout(what)) => {
                // The submit went through: the fence will signal, the semaphores may not.
                self.device.wait_idle()?;
                self.slots[self.current].rebuild_semaphores(&self.device)?;
                self.advance();
                return Err(GpuError::Timeout(what));
            }
            Err(e) => {
                tracing::warn!("Present failed: {e}, dropping frame");
                true
            }
        };

        if recreate {
            self.recreate()?;
        }

        self.advance();
        Ok(())
    }

    fn advance(&mut self) {
        self.current = (self.current + 1) % self.slots.len();
        self.frame_number += 1;
    }

    /// Return the current slot to its idle state after a frame was abandoned before
    /// submission: a fresh signaled fence and semaphores without pending signals.
    fn reset_slot(&mut self) -> Result<()> {
        self.device.wait_idle()?;
        let slot = &mut self.slots[self.current];
        slot.render_fence = Fence::create(&self.device, true)?;
        slot.rebuild_semaphores(&self.device)
    }

    /// Rebuild the swapchain, its passes and the slot semaphores for the window's size.
    ///
    /// Blocks on window events while the framebuffer has zero area, then waits for the
    /// device to go idle.
    pub fn recreate(&mut self) -> Result<()> {
        let (width, height) = wait_for_nonzero_size(self.window.as_ref());
        self.device.wait_idle()?;

        self.render_passes.clear();
        self.depth_image = None;
        self.swapchain.recreate(width, height)?;
        self.depth_image =
            create_depth_image(&self.device, &self.swapchain, self.config.depth_format)?;
        self.render_passes =
            create_render_passes(&self.device, &self.swapchain, self.depth_image.as_ref())?;

        // A dropped present may leave a semaphore with a pending wait.
        for slot in &mut self.slots {
            slot.rebuild_semaphores(&self.device)?;
        }

        self.needs_recreate = false;
        let extent = self.swapchain.extent();
        tracing::info!(
            "Frame pipeline recreated at {}x{}",
            extent.width,
            extent.height
        );
        Ok(())
    }
}

impl Drop for FrameSynchronizer {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            tracing::error!("Wait idle before frame pipeline teardown failed: {e}");
        }
    }
}

/// Spin on window events until the framebuffer has nonzero area.
pub fn wait_for_nonzero_size(window: &dyn WindowSurface) -> (u32, u32) {
    let mut size = window.framebuffer_size();
    while size.0 == 0 || size.1 == 0 {
        window.wait_events();
        size = window.framebuffer_size();
    }
    size
}

fn create_depth_image(
    device: &Arc<RenderDevice>,
    swapchain: &Swapchain,
    format: Option<vk::Format>,
) -> Result<Option<Arc<Image>>> {
    let Some(format) = format else {
        return Ok(None);
    };
    let extent = swapchain.extent();
    let desc = ImageDesc::depth_stencil(extent.width, extent.height, format)
        .with_name("swapchain depth");
    Ok(Some(Arc::new(Image::create(device, desc)?)))
}

fn create_render_passes(
    device: &Arc<RenderDevice>,
    swapchain: &Swapchain,
    depth_image: Option<&Arc<Image>>,
) -> Result<Vec<RenderPass>> {
    // One depth view shared by every image's pass.
    let depth_view = depth_image
        .map(|image| ImageView::create(device, ImageViewDesc::attachment(image.clone())))
        .transpose()?
        .map(Arc::new);

    swapchain
        .views()
        .iter()
        .enumerate()
        .map(|(i, view)| {
            let depth_stencil = depth_view.as_ref().map(|_| DepthAttachmentDesc {
                depth_store_op: vk::AttachmentStoreOp::DONT_CARE,
                stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
                ..DepthAttachmentDesc::clear()
            });
            RenderPass::create(
                device,
                RenderPassDesc {
                    source: RenderPassSource::Views {
                        render_targets: vec![view.clone()],
                        depth_stencil: depth_view.clone(),
                    },
                    render_targets: vec![ColorAttachmentDesc::clear(ResourceState::Present)],
                    depth_stencil,
                    name: format!("swapchain pass {i}"),
                },
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn frames_in_flight_is_clamped() {
        assert_eq!(FrameConfig::new().frame_count(), 2);
        assert_eq!(FrameConfig::new().frames_in_flight(0).frame_count(), 1);
        assert_eq!(
            FrameConfig::new().frames_in_flight(8).frame_count(),
            MAX_FRAMES_IN_FLIGHT
        );
    }

    struct Minimized {
        polls: AtomicU32,
    }

    impl WindowSurface for Minimized {
        fn framebuffer_size(&self) -> (u32, u32) {
            if self.polls.load(Ordering::Relaxed) < 3 {
                (0, 600)
            } else {
                (800, 600)
            }
        }

        fn wait_events(&self) {
            self.polls.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn zero_area_spins_until_restored() {
        let window = Minimized {
            polls: AtomicU32::new(0),
        };
        assert_eq!(wait_for_nonzero_size(&window), (800, 600));
        assert_eq!(window.polls.load(Ordering::Relaxed), 3);
    }
}

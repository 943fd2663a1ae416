//! Command pools and the command recorder.
//!
//! A [`CommandList`] records into one primary command buffer and tracks which kind of
//! render pass is active. Beginning a pass while another is active, or ending the wrong
//! kind, is fatal. Image transitions are elided when they would not change anything;
//! see [`CommandList::transition_images`].

use std::collections::HashMap;
use std::sync::Arc;

use ash::vk;

use crate::barrier::{self, BufferTransition, ImageTransition};
use crate::buffer::Buffer;
use crate::descriptor::{DescriptorScratch, DescriptorSet, WriteDescriptor};
use crate::device::RenderDevice;
use crate::error::{fatal, GpuError, Result};
use crate::image::{Image, ImageView};
use crate::object::{DeviceObject, Native};
use crate::pipeline::{ComputePipeline, GraphicsPipeline, PipelineLayout};
use crate::query::QueryPool;
use crate::render_pass::{ClearFlags, RenderPassBeginInfo, RenderingInfo};
use crate::state::{self, BarrierFeatures, CommandType, ResourceState};

/// Command pool creation parameters.
#[derive(Debug, Clone, Copy)]
pub struct CommandPoolDesc {
    pub command_type: CommandType,
    pub flags: vk::CommandPoolCreateFlags,
}

impl CommandPoolDesc {
    /// Pool whose buffers can be reset individually.
    pub fn resettable(command_type: CommandType) -> Self {
        Self {
            command_type,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        }
    }
}

/// Command pool for allocating command buffers.
pub struct CommandPool {
    device: Arc<RenderDevice>,
    handle: Native<vk::CommandPool>,
    command_type: CommandType,
    queue_family: u32,
}

impl CommandPool {
    pub fn create(device: &Arc<RenderDevice>, desc: CommandPoolDesc) -> Result<Self> {
        crate::object::create(device, desc)
    }

    /// Get the raw pool handle.
    pub fn handle(&self) -> vk::CommandPool {
        self.handle.raw()
    }

    pub fn command_type(&self) -> CommandType {
        self.command_type
    }

    /// Get the queue family index.
    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Allocate command buffers.
    pub fn allocate(
        &self,
        level: vk::CommandBufferLevel,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>> {
        // SAFETY: the pool is owned here and not used from another thread
        unsafe {
            self.device
                .raw()
                .allocate_command_buffers(self.handle(), level, count)
        }
    }

    /// Return command buffers to the pool.
    ///
    /// # Safety
    /// The buffers must come from this pool and no longer be pending.
    pub unsafe fn free(&self, buffers: &[vk::CommandBuffer]) {
        // SAFETY: forwarded from the caller
        unsafe { self.device.raw().free_command_buffers(self.handle(), buffers) };
    }
}

impl DeviceObject for CommandPool {
    type Desc = CommandPoolDesc;
    const KIND: &'static str = "CommandPool";

    fn validate(_device: &RenderDevice, _desc: &CommandPoolDesc) -> Result<()> {
        Ok(())
    }

    unsafe fn create_api_objects(device: &Arc<RenderDevice>, desc: CommandPoolDesc) -> Result<Self> {
        let queue_family = device.queue(desc.command_type).family();
        // SAFETY: forwarded from the caller
        let pool = unsafe { device.raw().create_command_pool(queue_family, desc.flags)? };
        Ok(Self {
            device: device.clone(),
            handle: Native::Owned(pool),
            command_type: desc.command_type,
            queue_family,
        })
    }

    unsafe fn destroy_api_objects(&mut self) {
        if let Some(pool) = self.handle.destroyable() {
            // SAFETY: forwarded from the caller
            unsafe { self.device.raw().destroy_command_pool(pool) };
        }
        self.handle = Native::Borrowed(vk::CommandPool::null());
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        // SAFETY: the owner guarantees no buffer of this pool is pending
        unsafe { self.destroy_api_objects() };
        self.device.registry().release(Self::KIND);
    }
}

/// Which render pass, if any, a command list is inside of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
    Idle,
    Regular,
    Dynamic,
}

#[derive(Debug, Clone, Copy)]
struct TrackedAttachment {
    image: vk::Image,
    range: vk::ImageSubresourceRange,
    /// State the image is left in once the pass ends.
    final_state: ResourceState,
}

#[derive(Debug)]
enum PassState {
    Idle,
    Regular {
        render_targets: Vec<vk::ImageView>,
        depth_stencil: Option<vk::ImageView>,
        extent: vk::Extent2D,
        attachments: Vec<TrackedAttachment>,
    },
    Dynamic {
        render_targets: Vec<vk::ImageView>,
        depth_stencil: Option<vk::ImageView>,
        extent: vk::Extent2D,
    },
}

impl PassState {
    fn kind(&self) -> PassKind {
        match self {
            Self::Idle => PassKind::Idle,
            Self::Regular { .. } => PassKind::Regular,
            Self::Dynamic { .. } => PassKind::Dynamic,
        }
    }

    fn attachments(&self) -> Option<(&[vk::ImageView], Option<vk::ImageView>, vk::Extent2D)> {
        match self {
            Self::Idle => None,
            Self::Regular {
                render_targets,
                depth_stencil,
                extent,
                ..
            }
            | Self::Dynamic {
                render_targets,
                depth_stencil,
                extent,
            } => Some((render_targets, *depth_stencil, *extent)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct SubresourceKey {
    image: vk::Image,
    aspect: vk::ImageAspectFlags,
    mips: (u32, u32),
    layers: (u32, u32),
}

impl SubresourceKey {
    fn new(image: vk::Image, range: &vk::ImageSubresourceRange) -> Self {
        Self {
            image,
            aspect: range.aspect_mask,
            mips: (
                range.base_mip_level,
                range.base_mip_level.saturating_add(range.level_count),
            ),
            layers: (
                range.base_array_layer,
                range.base_array_layer.saturating_add(range.layer_count),
            ),
        }
    }

    fn overlaps(&self, other: &Self) -> bool {
        self.image == other.image
            && self.aspect.intersects(other.aspect)
            && self.mips.0 < other.mips.1
            && other.mips.0 < self.mips.1
            && self.layers.0 < other.layers.1
            && other.layers.0 < self.layers.1
    }
}

/// Last state this command list set per image subresource range.
#[derive(Debug, Default)]
pub(crate) struct SubresourceTracker {
    states: HashMap<SubresourceKey, ResourceState>,
}

impl SubresourceTracker {
    /// State of exactly this range, if it was set as a whole.
    pub(crate) fn get(
        &self,
        image: vk::Image,
        range: &vk::ImageSubresourceRange,
    ) -> Option<ResourceState> {
        self.states.get(&SubresourceKey::new(image, range)).copied()
    }

    pub(crate) fn set(
        &mut self,
        image: vk::Image,
        range: &vk::ImageSubresourceRange,
        state: ResourceState,
    ) {
        let key = SubresourceKey::new(image, range);
        self.states.retain(|other, _| !other.overlaps(&key));
        self.states.insert(key, state);
    }

    pub(crate) fn forget(&mut self, image: vk::Image, range: &vk::ImageSubresourceRange) {
        let key = SubresourceKey::new(image, range);
        self.states.retain(|other, _| !other.overlaps(&key));
    }

    pub(crate) fn clear(&mut self) {
        self.states.clear();
    }
}

/// Split sorted set indices into runs of consecutive indices, as `(start, len)`
/// positions into the input.
pub fn contiguous_runs(sorted_indices: &[u32]) -> Vec<(usize, usize)> {
    let mut runs = Vec::new();
    let mut start = 0;
    for i in 1..=sorted_indices.len() {
        let breaks = i == sorted_indices.len() || sorted_indices[i] != sorted_indices[i - 1] + 1;
        if breaks {
            runs.push((start, i - start));
            start = i;
        }
    }
    runs
}

/// A primary command buffer with its own pool.
pub struct CommandList {
    device: Arc<RenderDevice>,
    cmd: vk::CommandBuffer,
    command_type: CommandType,
    features: BarrierFeatures,
    recording: bool,
    pass: PassState,
    tracker: SubresourceTracker,
    scratch: DescriptorScratch,
    // Dropped last: the buffer above belongs to it.
    pool: CommandPool,
}

impl CommandList {
    pub fn new(device: &Arc<RenderDevice>, command_type: CommandType) -> Result<Self> {
        let pool = CommandPool::create(device, CommandPoolDesc::resettable(command_type))?;
        let cmd = pool
            .allocate(vk::CommandBufferLevel::PRIMARY, 1)?
            .into_iter()
            .next()
            .ok_or_else(|| GpuError::Other("no command buffer allocated".to_string()))?;

        Ok(Self {
            device: device.clone(),
            cmd,
            command_type,
            features: device.barrier_features(),
            recording: false,
            pass: PassState::Idle,
            tracker: SubresourceTracker::default(),
            scratch: DescriptorScratch::default(),
            pool,
        })
    }

    /// Native command buffer.
    pub fn handle(&self) -> vk::CommandBuffer {
        self.cmd
    }

    pub fn command_type(&self) -> CommandType {
        self.command_type
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn pass_kind(&self) -> PassKind {
        self.pass.kind()
    }

    /// State this list last set for exactly `range` of `image`.
    pub fn tracked_state(
        &self,
        image: vk::Image,
        range: &vk::ImageSubresourceRange,
    ) -> Option<ResourceState> {
        self.tracker.get(image, range)
    }

    /// Reset the buffer and start recording.
    ///
    /// The caller guarantees the previous recording is no longer pending.
    pub fn begin(&mut self) -> Result<()> {
        let raw = self.device.raw();
        // SAFETY: the buffer is not pending, per the caller
        unsafe {
            raw.reset_command_buffer(self.cmd)?;
            raw.begin_command_buffer(self.cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
        }
        self.recording = true;
        self.pass = PassState::Idle;
        self.tracker.clear();
        Ok(())
    }

    /// Finish recording.
    pub fn end(&mut self) -> Result<()> {
        if self.pass.kind() != PassKind::Idle {
            fatal(format!(
                "command list ended inside a {:?} render pass",
                self.pass.kind()
            ));
        }
        // SAFETY: the buffer is recording
        unsafe { self.device.raw().end_command_buffer(self.cmd)? };
        self.recording = false;
        Ok(())
    }

    fn check_idle(&self, what: &str) {
        if self.pass.kind() != PassKind::Idle {
            fatal(format!(
                "{what} inside an active {:?} render pass",
                self.pass.kind()
            ));
        }
    }

    // Render passes

    pub fn begin_render_pass(&mut self, info: &RenderPassBeginInfo<'_>) -> Result<()> {
        self.check_idle("begin_render_pass");

        let render_pass = info.render_pass;
        if info.clear_values.len() < render_pass.clear_value_count() {
            return Err(GpuError::InvalidConfig(format!(
                "render pass {} needs {} clear values, got {}",
                render_pass.name(),
                render_pass.clear_value_count(),
                info.clear_values.len()
            )));
        }

        let clear_values: Vec<vk::ClearValue> =
            info.clear_values.iter().map(|v| v.to_vk()).collect();
        let begin = vk::RenderPassBeginInfo::default()
            .render_pass(render_pass.handle())
            .framebuffer(render_pass.framebuffer())
            .render_area(info.render_area)
            .clear_values(&clear_values);
        // SAFETY: the buffer is recording outside any pass
        unsafe {
            self.device
                .raw()
                .cmd_begin_render_pass(self.cmd, &begin, vk::SubpassContents::INLINE);
        }

        let attachments = render_pass.attachments();
        let mut tracked = Vec::with_capacity(render_pass.render_target_count() + 1);
        for (view, ops) in attachments.render_targets().iter().zip(render_pass.color_ops()) {
            tracked.push(TrackedAttachment {
                image: view.image().handle(),
                range: view.range(),
                final_state: ops.final_state,
            });
        }
        if let (Some(view), Some(ops)) = (attachments.depth_stencil(), render_pass.depth_ops()) {
            tracked.push(TrackedAttachment {
                image: view.image().handle(),
                range: view.range(),
                final_state: ops.final_state,
            });
        }
        for attachment in &tracked {
            self.tracker.forget(attachment.image, &attachment.range);
        }

        self.pass = PassState::Regular {
            render_targets: attachments.render_targets().iter().map(|v| v.handle()).collect(),
            depth_stencil: attachments.depth_stencil().map(|v| v.handle()),
            extent: render_pass.extent(),
            attachments: tracked,
        };
        Ok(())
    }

    pub fn end_render_pass(&mut self) {
        if self.pass.kind() != PassKind::Regular {
            fatal(format!(
                "end_render_pass without an active regular render pass ({:?})",
                self.pass.kind()
            ));
        }
        let PassState::Regular { attachments, .. } =
            std::mem::replace(&mut self.pass, PassState::Idle)
        else {
            return;
        };
        // SAFETY: a regular pass is active
        unsafe { self.device.raw().cmd_end_render_pass(self.cmd) };
        for attachment in attachments {
            self.tracker
                .set(attachment.image, &attachment.range, attachment.final_state);
        }
    }

    /// Begin a dynamic rendering scope. Attachments must already be in their states.
    pub fn begin_rendering(&mut self, info: &RenderingInfo<'_>) -> Result<()> {
        self.check_idle("begin_rendering");
        info.validate(&self.device)?;

        let colors: Vec<vk::RenderingAttachmentInfo<'static>> =
            info.render_targets.iter().map(|a| a.native()).collect();
        let depth = info.depth_stencil.as_ref().map(|a| a.native());

        let mut rendering = vk::RenderingInfo::default()
            .render_area(info.render_area)
            .layer_count(1)
            .color_attachments(&colors);
        if let Some(depth) = depth.as_ref() {
            rendering = rendering.depth_attachment(depth);
            if info.has_stencil() {
                rendering = rendering.stencil_attachment(depth);
            }
        }
        // SAFETY: the buffer is recording outside any pass
        unsafe { self.device.raw().cmd_begin_rendering(self.cmd, &rendering) };

        for attachment in info.render_targets.iter().chain(info.depth_stencil.iter()) {
            self.tracker.set(
                attachment.view.image().handle(),
                &attachment.view.range(),
                attachment.state,
            );
        }

        self.pass = PassState::Dynamic {
            render_targets: info.render_targets.iter().map(|a| a.view.handle()).collect(),
            depth_stencil: info.depth_stencil.as_ref().map(|a| a.view.handle()),
            extent: info.render_area.extent,
        };
        Ok(())
    }

    pub fn end_rendering(&mut self) {
        if self.pass.kind() != PassKind::Dynamic {
            fatal(format!(
                "end_rendering without an active dynamic render pass ({:?})",
                self.pass.kind()
            ));
        }
        // SAFETY: a dynamic pass is active
        unsafe { self.device.raw().cmd_end_rendering(self.cmd) };
        self.pass = PassState::Idle;
    }

    /// Clear one render target of the active pass.
    ///
    /// Without an active pass this logs a warning and records nothing.
    pub fn clear_render_target(&mut self, view: &ImageView, color: [f32; 4]) -> Result<()> {
        let Some((render_targets, _, extent)) = self.pass.attachments() else {
            tracing::warn!("clear_render_target outside a render pass ignored");
            return Ok(());
        };
        let index = render_targets
            .iter()
            .position(|&v| v == view.handle())
            .ok_or_else(|| {
                GpuError::InvalidConfig("view is not a render target of the active pass".to_string())
            })?;

        let attachment = vk::ClearAttachment {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            color_attachment: index as u32,
            clear_value: vk::ClearValue {
                color: vk::ClearColorValue { float32: color },
            },
        };
        let rect = full_rect(extent);
        // SAFETY: a pass is active and the attachment index belongs to it
        unsafe {
            self.device
                .raw()
                .cmd_clear_attachments(self.cmd, &[attachment], &[rect]);
        }
        Ok(())
    }

    /// Clear the depth and/or stencil aspects of the active pass's depth attachment.
    ///
    /// Without an active pass this logs a warning and records nothing.
    pub fn clear_depth_stencil(&mut self, flags: ClearFlags, depth: f32, stencil: u32) -> Result<()> {
        let Some((_, depth_stencil, extent)) = self.pass.attachments() else {
            tracing::warn!("clear_depth_stencil outside a render pass ignored");
            return Ok(());
        };
        if depth_stencil.is_none() {
            return Err(GpuError::InvalidConfig(
                "active pass has no depth/stencil attachment".to_string(),
            ));
        }

        let mut aspect_mask = vk::ImageAspectFlags::empty();
        if flags.contains(ClearFlags::DEPTH) {
            aspect_mask |= vk::ImageAspectFlags::DEPTH;
        }
        if flags.contains(ClearFlags::STENCIL) {
            aspect_mask |= vk::ImageAspectFlags::STENCIL;
        }
        if aspect_mask.is_empty() {
            return Ok(());
        }

        let attachment = vk::ClearAttachment {
            aspect_mask,
            color_attachment: 0,
            clear_value: vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth, stencil },
            },
        };
        // SAFETY: a pass with a depth attachment is active
        unsafe {
            self.device
                .raw()
                .cmd_clear_attachments(self.cmd, &[attachment], &[full_rect(extent)]);
        }
        Ok(())
    }

    // Barriers

    /// Record image transitions, returning how many barriers were emitted.
    ///
    /// An `Undefined` source resolves to the state this list last set for the same
    /// range. Transitions that change neither state nor queue family are dropped.
    pub fn transition_images(&mut self, transitions: &[ImageTransition]) -> Result<usize> {
        let mut barriers = Vec::with_capacity(transitions.len());
        let mut updates = Vec::with_capacity(transitions.len());

        for transition in transitions {
            let mut transition = *transition;
            if transition.before == ResourceState::Undefined {
                if let Some(tracked) = self.tracker.get(transition.image, &transition.range) {
                    transition.before = tracked;
                }
            }
            if state::is_noop_transition(
                transition.before,
                transition.after,
                transition.src_queue_family,
                transition.dst_queue_family,
            ) {
                continue;
            }
            barriers.push(barrier::image_barrier(
                &transition,
                self.command_type,
                self.features,
            )?);
            updates.push(transition);
        }

        if !barriers.is_empty() {
            let dependency = vk::DependencyInfo::default().image_memory_barriers(&barriers);
            // SAFETY: the buffer is recording
            unsafe { self.device.raw().cmd_pipeline_barrier2(self.cmd, &dependency) };
        }
        for transition in &updates {
            self.tracker
                .set(transition.image, &transition.range, transition.after);
        }
        Ok(barriers.len())
    }

    /// Transition every subresource of an image. Returns whether a barrier was recorded.
    pub fn transition_image_layout(
        &mut self,
        image: &Image,
        before: ResourceState,
        after: ResourceState,
    ) -> Result<bool> {
        let transition = ImageTransition::new(image.handle(), image.full_range(), before, after);
        Ok(self.transition_images(&[transition])? > 0)
    }

    /// Transition a mip and layer range, optionally transferring queue ownership.
    #[allow(clippy::too_many_arguments)]
    pub fn transition_image_range(
        &mut self,
        image: &Image,
        mips: (u32, u32),
        layers: (u32, u32),
        before: ResourceState,
        after: ResourceState,
        src_queue_family: Option<u32>,
        dst_queue_family: Option<u32>,
    ) -> Result<bool> {
        let range = vk::ImageSubresourceRange {
            aspect_mask: image.aspect(),
            base_mip_level: mips.0,
            level_count: mips.1,
            base_array_layer: layers.0,
            layer_count: layers.1,
        };
        let mut transition = ImageTransition::new(image.handle(), range, before, after);
        transition.src_queue_family = src_queue_family;
        transition.dst_queue_family = dst_queue_family;
        Ok(self.transition_images(&[transition])? > 0)
    }

    /// Record buffer transitions, returning how many barriers were emitted.
    pub fn buffer_transitions(&mut self, transitions: &[BufferTransition]) -> Result<usize> {
        let barriers = transitions
            .iter()
            .filter(|t| {
                !state::is_noop_transition(t.before, t.after, t.src_queue_family, t.dst_queue_family)
            })
            .map(|t| barrier::buffer_barrier(t, self.command_type, self.features))
            .collect::<Result<Vec<_>>>()?;

        if !barriers.is_empty() {
            let dependency = vk::DependencyInfo::default().buffer_memory_barriers(&barriers);
            // SAFETY: the buffer is recording
            unsafe { self.device.raw().cmd_pipeline_barrier2(self.cmd, &dependency) };
        }
        Ok(barriers.len())
    }

    /// Barrier over a whole buffer. Returns whether a barrier was recorded.
    pub fn buffer_barrier(
        &mut self,
        buffer: &Buffer,
        before: ResourceState,
        after: ResourceState,
    ) -> Result<bool> {
        let transition = BufferTransition::new(buffer.handle(), buffer.size(), before, after);
        Ok(self.buffer_transitions(&[transition])? > 0)
    }

    /// Global memory barrier between two states. Always recorded.
    pub fn memory_barrier(&mut self, before: ResourceState, after: ResourceState) -> Result<()> {
        let src = state::to_barrier_src(before, self.command_type, self.features)?;
        let dst = state::to_barrier_dst(after, self.command_type, self.features)?;
        let barriers = [vk::MemoryBarrier2::default()
            .src_stage_mask(src.stage)
            .src_access_mask(src.access)
            .dst_stage_mask(dst.stage)
            .dst_access_mask(dst.access)];
        let dependency = vk::DependencyInfo::default().memory_barriers(&barriers);
        // SAFETY: the buffer is recording
        unsafe { self.device.raw().cmd_pipeline_barrier2(self.cmd, &dependency) };
        Ok(())
    }

    // Pipelines and descriptors

    pub fn bind_graphics_pipeline(&mut self, pipeline: &GraphicsPipeline) {
        // SAFETY: the buffer is recording
        unsafe {
            self.device.raw().cmd_bind_pipeline(
                self.cmd,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline.handle(),
            );
        }
    }

    pub fn bind_compute_pipeline(&mut self, pipeline: &ComputePipeline) {
        // SAFETY: the buffer is recording
        unsafe {
            self.device.raw().cmd_bind_pipeline(
                self.cmd,
                vk::PipelineBindPoint::COMPUTE,
                pipeline.handle(),
            );
        }
    }

    /// Bind pool-allocated sets at their indices.
    ///
    /// Consecutive indices are bound in one native call. Dynamic offsets are consumed
    /// in set-index order, as many per set as its layout has dynamic bindings.
    pub fn bind_descriptor_sets(
        &mut self,
        bind_point: vk::PipelineBindPoint,
        layout: &PipelineLayout,
        sets: &[(u32, &DescriptorSet)],
        dynamic_offsets: &[u32],
    ) -> Result<()> {
        let mut sorted: Vec<(u32, &DescriptorSet)> = sets.to_vec();
        sorted.sort_by_key(|(index, _)| *index);

        for pair in sorted.windows(2) {
            if pair[0].0 == pair[1].0 {
                return Err(GpuError::InvalidConfig(format!(
                    "descriptor set {} bound twice",
                    pair[0].0
                )));
            }
        }
        for (index, set) in &sorted {
            let expected = layout.set_layout(*index).ok_or_else(|| {
                GpuError::InvalidConfig(format!("pipeline layout has no set {index}"))
            })?;
            if expected.handle() != set.layout().handle() {
                return Err(GpuError::InvalidConfig(format!(
                    "set {index} does not match the pipeline layout"
                )));
            }
        }
        let dynamic_total: usize = sorted.iter().map(|(_, s)| s.layout().dynamic_count()).sum();
        if dynamic_total != dynamic_offsets.len() {
            return Err(GpuError::InvalidConfig(format!(
                "{} dynamic offsets for {dynamic_total} dynamic bindings",
                dynamic_offsets.len()
            )));
        }

        let indices: Vec<u32> = sorted.iter().map(|(index, _)| *index).collect();
        let mut offset_cursor = 0;
        for (start, len) in contiguous_runs(&indices) {
            let run = &sorted[start..start + len];
            let handles: Vec<vk::DescriptorSet> = run.iter().map(|(_, s)| s.handle()).collect();
            let dynamic_count: usize = run.iter().map(|(_, s)| s.layout().dynamic_count()).sum();
            let offsets = &dynamic_offsets[offset_cursor..offset_cursor + dynamic_count];
            offset_cursor += dynamic_count;

            // SAFETY: the sets match the layout, checked above
            unsafe {
                self.device.raw().cmd_bind_descriptor_sets(
                    self.cmd,
                    bind_point,
                    layout.handle(),
                    run[0].0,
                    &handles,
                    offsets,
                );
            }
        }
        Ok(())
    }

    /// Push one descriptor write into a pushable set slot.
    pub fn push_descriptor(
        &mut self,
        bind_point: vk::PipelineBindPoint,
        layout: &PipelineLayout,
        set: u32,
        write: &WriteDescriptor<'_>,
    ) -> Result<()> {
        if !self.device.info().features.push_descriptor {
            return Err(GpuError::ExtensionNotSupported(
                "VK_KHR_push_descriptor".to_string(),
            ));
        }
        let set_layout = layout
            .set_layout(set)
            .ok_or_else(|| GpuError::InvalidConfig(format!("pipeline layout has no set {set}")))?;
        if !set_layout.is_pushable() {
            return Err(GpuError::InvalidConfig(format!(
                "set {set} is not pushable"
            )));
        }

        self.scratch
            .stage(&self.device, set_layout, std::slice::from_ref(write))?;
        let writes = self.scratch.native_writes(vk::DescriptorSet::null());
        // SAFETY: the layout is pushable and the buffer is recording
        unsafe {
            self.device.raw().cmd_push_descriptor_set(
                self.cmd,
                bind_point,
                layout.handle(),
                set,
                &writes,
            );
        }
        Ok(())
    }

    pub fn push_constants<T: bytemuck::Pod>(
        &mut self,
        layout: &PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[T],
    ) {
        // SAFETY: the buffer is recording
        unsafe {
            self.device.raw().cmd_push_constants(
                self.cmd,
                layout.handle(),
                stages,
                offset,
                bytemuck::cast_slice(data),
            );
        }
    }

    // Input assembly and drawing

    pub fn bind_vertex_buffers(&mut self, first_binding: u32, buffers: &[(&Buffer, vk::DeviceSize)]) {
        let handles: Vec<vk::Buffer> = buffers.iter().map(|(b, _)| b.handle()).collect();
        let offsets: Vec<vk::DeviceSize> = buffers.iter().map(|(_, o)| *o).collect();
        // SAFETY: the buffer is recording
        unsafe {
            self.device
                .raw()
                .cmd_bind_vertex_buffers(self.cmd, first_binding, &handles, &offsets);
        }
    }

    pub fn bind_index_buffer(
        &mut self,
        buffer: &Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    ) {
        // SAFETY: the buffer is recording
        unsafe {
            self.device
                .raw()
                .cmd_bind_index_buffer(self.cmd, buffer.handle(), offset, index_type);
        }
    }

    pub fn set_viewport(&mut self, viewport: vk::Viewport) {
        // SAFETY: the buffer is recording
        unsafe { self.device.raw().cmd_set_viewport(self.cmd, &[viewport]) };
    }

    pub fn set_scissor(&mut self, scissor: vk::Rect2D) {
        // SAFETY: the buffer is recording
        unsafe { self.device.raw().cmd_set_scissor(self.cmd, &[scissor]) };
    }

    /// Viewport and scissor covering `extent`.
    pub fn set_viewport_and_scissor(&mut self, extent: vk::Extent2D) {
        self.set_viewport(vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        });
        self.set_scissor(full_rect(extent).rect);
    }

    pub fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        // SAFETY: the buffer is recording
        unsafe {
            self.device.raw().cmd_draw(
                self.cmd,
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            );
        }
    }

    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        // SAFETY: the buffer is recording
        unsafe {
            self.device.raw().cmd_draw_indexed(
                self.cmd,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            );
        }
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        // SAFETY: the buffer is recording
        unsafe { self.device.raw().cmd_dispatch(self.cmd, x, y, z) };
    }

    // Copies

    pub fn copy_buffer(&mut self, src: &Buffer, dst: &Buffer, regions: &[vk::BufferCopy]) {
        // SAFETY: the buffer is recording
        unsafe {
            self.device
                .raw()
                .cmd_copy_buffer(self.cmd, src.handle(), dst.handle(), regions);
        }
    }

    /// Copy into an image already in `CopyDst` or `General`.
    pub fn copy_buffer_to_image(
        &mut self,
        src: &Buffer,
        dst: &Image,
        dst_state: ResourceState,
        regions: &[vk::BufferImageCopy],
    ) {
        // SAFETY: the buffer is recording
        unsafe {
            self.device.raw().cmd_copy_buffer_to_image(
                self.cmd,
                src.handle(),
                dst.handle(),
                dst_state.image_layout(),
                regions,
            );
        }
    }

    /// Copy from an image already in `CopySrc` or `General`.
    pub fn copy_image_to_buffer(
        &mut self,
        src: &Image,
        src_state: ResourceState,
        dst: &Buffer,
        regions: &[vk::BufferImageCopy],
    ) {
        // SAFETY: the buffer is recording
        unsafe {
            self.device.raw().cmd_copy_image_to_buffer(
                self.cmd,
                src.handle(),
                src_state.image_layout(),
                dst.handle(),
                regions,
            );
        }
    }

    // Queries

    pub fn reset_query_pool(&mut self, pool: &QueryPool, first: u32, count: u32) {
        // SAFETY: the buffer is recording
        unsafe {
            self.device
                .raw()
                .cmd_reset_query_pool(self.cmd, pool.handle(), first, count);
        }
    }

    pub fn begin_query(&mut self, pool: &QueryPool, query: u32, precise: bool) {
        let flags = if precise {
            vk::QueryControlFlags::PRECISE
        } else {
            vk::QueryControlFlags::empty()
        };
        // SAFETY: the buffer is recording
        unsafe {
            self.device
                .raw()
                .cmd_begin_query(self.cmd, pool.handle(), query, flags);
        }
    }

    pub fn end_query(&mut self, pool: &QueryPool, query: u32) {
        // SAFETY: the buffer is recording
        unsafe { self.device.raw().cmd_end_query(self.cmd, pool.handle(), query) };
    }

    pub fn write_timestamp(&mut self, pool: &QueryPool, query: u32, stage: vk::PipelineStageFlags2) {
        // SAFETY: the buffer is recording
        unsafe {
            self.device
                .raw()
                .cmd_write_timestamp2(self.cmd, stage, pool.handle(), query);
        }
    }
}

impl Drop for CommandList {
    fn drop(&mut self) {
        // SAFETY: the owner guarantees the buffer is not pending
        unsafe { self.pool.free(&[self.cmd]) };
    }
}

fn full_rect(extent: vk::Extent2D) -> vk::ClearRect {
    vk::ClearRect {
        rect: vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent,
        },
        base_array_layer: 0,
        layer_count: 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn range(mips: (u32, u32), layers: (u32, u32)) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: mips.0,
            level_count: mips.1,
            base_array_layer: layers.0,
            layer_count: layers.1,
        }
    }

    #[test]
    fn contiguous_indices_form_one_run() {
        assert_eq!(contiguous_runs(&[0, 1, 2]), vec![(0, 3)]);
    }

    #[test]
    fn gaps_split_runs() {
        assert_eq!(contiguous_runs(&[0, 2, 3, 5]), vec![(0, 1), (1, 2), (3, 1)]);
        assert_eq!(contiguous_runs(&[1]), vec![(0, 1)]);
        assert!(contiguous_runs(&[]).is_empty());
    }

    #[test]
    fn tracker_matches_exact_ranges_only() {
        let image = vk::Image::from_raw(1);
        let mut tracker = SubresourceTracker::default();
        tracker.set(image, &range((0, 4), (0, 1)), ResourceState::ShaderResource);

        assert_eq!(
            tracker.get(image, &range((0, 4), (0, 1))),
            Some(ResourceState::ShaderResource)
        );
        assert_eq!(tracker.get(image, &range((0, 1), (0, 1))), None);
        assert_eq!(tracker.get(vk::Image::from_raw(2), &range((0, 4), (0, 1))), None);
    }

    #[test]
    fn overlapping_transition_invalidates() {
        let image = vk::Image::from_raw(1);
        let mut tracker = SubresourceTracker::default();
        tracker.set(image, &range((0, 4), (0, 1)), ResourceState::ShaderResource);
        tracker.set(image, &range((4, 4), (0, 1)), ResourceState::CopyDst);

        tracker.set(image, &range((2, 1), (0, 1)), ResourceState::CopySrc);
        assert_eq!(tracker.get(image, &range((0, 4), (0, 1))), None);
        assert_eq!(
            tracker.get(image, &range((4, 4), (0, 1))),
            Some(ResourceState::CopyDst)
        );
    }

    #[test]
    fn remaining_counts_overlap_everything_above() {
        let image = vk::Image::from_raw(7);
        let mut tracker = SubresourceTracker::default();
        tracker.set(image, &range((3, 1), (2, 1)), ResourceState::CopyDst);
        tracker.forget(
            image,
            &range(
                (0, vk::REMAINING_MIP_LEVELS),
                (0, vk::REMAINING_ARRAY_LAYERS),
            ),
        );
        assert_eq!(tracker.get(image, &range((3, 1), (2, 1))), None);
    }
}

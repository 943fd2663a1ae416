//! Queues: guarded submission and blocking one-shot operations.
//!
//! A [`Queue`] serializes submissions behind one lock and transient command pool use
//! behind another, so threads can record independent one-shot work while another
//! thread submits frame batches. Every blocking helper follows the same recipe:
//! allocate a transient command buffer, record transition-in, the operation and
//! transition-out, submit with a fence, wait with the device timeout, free.

use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use parking_lot::Mutex;

use crate::barrier::{self, BufferTransition, ImageTransition};
use crate::device::RawDevice;
use crate::error::Result;
use crate::state::{BarrierFeatures, CommandType, ResourceState};
use crate::surface::{PresentOutcome, RawSurface};

/// Work handed to [`Queue::submit`].
#[derive(Debug, Default, Clone, Copy)]
pub struct Submission<'a> {
    pub command_buffers: &'a [vk::CommandBuffer],
    pub wait_semaphores: &'a [vk::Semaphore],
    /// One stage per wait semaphore.
    pub wait_stages: &'a [vk::PipelineStageFlags],
    pub signal_semaphores: &'a [vk::Semaphore],
}

/// Image side of a queue copy.
#[derive(Debug, Clone, Copy)]
pub struct ImageCopyTarget {
    pub image: vk::Image,
    pub aspect: vk::ImageAspectFlags,
    pub mip_level: u32,
    pub base_array_layer: u32,
    pub layer_count: u32,
    pub extent: vk::Extent3D,
    /// State the image is in before the copy and is returned to afterwards.
    pub state: ResourceState,
}

impl ImageCopyTarget {
    fn subresource_layers(&self) -> vk::ImageSubresourceLayers {
        vk::ImageSubresourceLayers {
            aspect_mask: self.aspect,
            mip_level: self.mip_level,
            base_array_layer: self.base_array_layer,
            layer_count: self.layer_count,
        }
    }

    fn subresource_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: self.aspect,
            base_mip_level: self.mip_level,
            level_count: 1,
            base_array_layer: self.base_array_layer,
            layer_count: self.layer_count,
        }
    }

    fn region(&self, buffer_offset: vk::DeviceSize) -> vk::BufferImageCopy {
        vk::BufferImageCopy {
            buffer_offset,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: self.subresource_layers(),
            image_offset: vk::Offset3D::default(),
            image_extent: self.extent,
        }
    }
}

/// A device queue.
pub struct Queue {
    raw: Arc<dyn RawDevice>,
    handle: vk::Queue,
    family: u32,
    command_type: CommandType,
    features: BarrierFeatures,
    submit_lock: Mutex<()>,
    transient_pool: Mutex<vk::CommandPool>,
    timeout: Duration,
}

impl Queue {
    pub(crate) fn new(
        raw: Arc<dyn RawDevice>,
        command_type: CommandType,
        family: u32,
        timeout: Duration,
    ) -> Result<Self> {
        let features = raw.info().features;
        let features = BarrierFeatures {
            geometry_shader: features.geometry_shader,
            tessellation_shader: features.tessellation_shader,
        };

        // SAFETY: the family index comes from the device's own queue selection
        let (handle, pool) = unsafe {
            let handle = raw.get_queue(family, 0);
            let pool = raw.create_command_pool(
                family,
                vk::CommandPoolCreateFlags::TRANSIENT
                    | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            )?;
            (handle, pool)
        };

        tracing::debug!("Created {command_type:?} queue on family {family}");

        Ok(Self {
            raw,
            handle,
            family,
            command_type,
            features,
            submit_lock: Mutex::new(()),
            transient_pool: Mutex::new(pool),
            timeout,
        })
    }

    /// Native queue handle.
    pub fn handle(&self) -> vk::Queue {
        self.handle
    }

    /// Queue family index.
    pub fn family(&self) -> u32 {
        self.family
    }

    /// Command type recorded for this queue.
    pub fn command_type(&self) -> CommandType {
        self.command_type
    }

    fn timeout_ns(&self) -> u64 {
        u64::try_from(self.timeout.as_nanos()).unwrap_or(u64::MAX)
    }

    /// Submit a batch.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn submit(&self, submission: &Submission<'_>, fence: vk::Fence) -> Result<()> {
        let info = vk::SubmitInfo::default()
            .command_buffers(submission.command_buffers)
            .wait_semaphores(submission.wait_semaphores)
            .wait_dst_stage_mask(submission.wait_stages)
            .signal_semaphores(submission.signal_semaphores);

        let _guard = self.submit_lock.lock();
        // SAFETY: the caller provides valid handles; the lock serializes queue access
        unsafe { self.raw.queue_submit(self.handle, &[info], fence) }
    }

    /// Queue a swapchain image for presentation.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn present(
        &self,
        surface: &dyn RawSurface,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<PresentOutcome> {
        let _guard = self.submit_lock.lock();
        // SAFETY: the lock serializes queue access; the swapchain belongs to `surface`
        unsafe { surface.queue_present(self.handle, swapchain, image_index, wait_semaphores) }
    }

    /// Block until all work submitted so far has finished, bounded by the device timeout.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn wait_idle(&self) -> Result<()> {
        // SAFETY: the fence is created, waited on and destroyed locally
        unsafe {
            let fence = self.raw.create_fence(false)?;
            let result = {
                let _guard = self.submit_lock.lock();
                self.raw.queue_submit(self.handle, &[], fence)
            }
            .and_then(|()| self.raw.wait_for_fences(&[fence], self.timeout_ns()));
            self.raw.destroy_fence(fence);
            result
        }
    }

    /// Record and synchronously execute a one-shot command buffer.
    ///
    /// The transient pool stays locked while recording since the pool is externally
    /// synchronized. Submission takes the submit lock only.
    pub fn run_one_shot<F>(&self, record: F) -> Result<()>
    where
        F: FnOnce(&dyn RawDevice, vk::CommandBuffer) -> Result<()>,
    {
        let raw = self.raw.as_ref();

        let cmd = {
            let pool = self.transient_pool.lock();
            // SAFETY: the pool lock is held for allocation and recording
            unsafe {
                let cmd = raw
                    .allocate_command_buffers(*pool, vk::CommandBufferLevel::PRIMARY, 1)?
                    .into_iter()
                    .next()
                    .ok_or_else(|| {
                        crate::GpuError::Other("no command buffer allocated".to_string())
                    })?;

                let recorded = raw
                    .begin_command_buffer(cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)
                    .and_then(|()| record(raw, cmd))
                    .and_then(|()| raw.end_command_buffer(cmd));
                if let Err(e) = recorded {
                    raw.free_command_buffers(*pool, &[cmd]);
                    return Err(e);
                }
                cmd
            }
        };

        let cmds = [cmd];
        // SAFETY: the fence is local; the command buffer is freed only after the wait
        let result = unsafe {
            match raw.create_fence(false) {
                Ok(fence) => {
                    let result = self
                        .submit(
                            &Submission {
                                command_buffers: &cmds,
                                ..Default::default()
                            },
                            fence,
                        )
                        .and_then(|()| raw.wait_for_fences(&[fence], self.timeout_ns()));
                    if result.is_ok() {
                        raw.destroy_fence(fence);
                    }
                    // A timed-out fence may still be signaled later; leak it instead.
                    result
                }
                Err(e) => Err(e),
            }
        };

        if result.is_ok() {
            let pool = self.transient_pool.lock();
            // SAFETY: the work has completed
            unsafe { raw.free_command_buffers(*pool, &cmds) };
        } else {
            tracing::error!("One-shot submission on {:?} queue failed", self.command_type);
        }

        result
    }

    fn record_image_barriers(
        &self,
        raw: &dyn RawDevice,
        cmd: vk::CommandBuffer,
        transitions: &[ImageTransition],
    ) -> Result<()> {
        let barriers = transitions
            .iter()
            .filter(|t| t.before != t.after)
            .map(|t| barrier::image_barrier(t, self.command_type, self.features))
            .collect::<Result<Vec<_>>>()?;
        if !barriers.is_empty() {
            let dependency = vk::DependencyInfo::default().image_memory_barriers(&barriers);
            // SAFETY: cmd is in the recording state
            unsafe { raw.cmd_pipeline_barrier2(cmd, &dependency) };
        }
        Ok(())
    }

    /// Transition an image outside any command list.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn transition_image_layout(
        &self,
        image: vk::Image,
        range: vk::ImageSubresourceRange,
        before: ResourceState,
        after: ResourceState,
    ) -> Result<()> {
        if before == after {
            return Ok(());
        }
        let transition = ImageTransition::new(image, range, before, after);
        // Validate before touching the pool.
        barrier::image_barrier(&transition, self.command_type, self.features)?;

        self.run_one_shot(|raw, cmd| self.record_image_barriers(raw, cmd, &[transition]))
    }

    /// Issue a buffer barrier outside any command list.
    pub fn buffer_barrier(
        &self,
        buffer: vk::Buffer,
        size: vk::DeviceSize,
        before: ResourceState,
        after: ResourceState,
    ) -> Result<()> {
        if before == after {
            return Ok(());
        }
        let transition = BufferTransition::new(buffer, size, before, after);
        let native = barrier::buffer_barrier(&transition, self.command_type, self.features)?;

        self.run_one_shot(|raw, cmd| {
            let barriers = [native];
            let dependency = vk::DependencyInfo::default().buffer_memory_barriers(&barriers);
            // SAFETY: cmd is in the recording state
            unsafe { raw.cmd_pipeline_barrier2(cmd, &dependency) };
            Ok(())
        })
    }

    /// Copy between two buffers, blocking until done.
    ///
    /// Each buffer is moved to its copy state and back to the given state.
    pub fn copy_buffer(
        &self,
        src: vk::Buffer,
        src_state: ResourceState,
        dst: vk::Buffer,
        dst_state: ResourceState,
        size: vk::DeviceSize,
    ) -> Result<()> {
        let transitions_in = [
            BufferTransition::new(src, size, src_state, ResourceState::CopySrc),
            BufferTransition::new(dst, size, dst_state, ResourceState::CopyDst),
        ];
        let transitions_out = [
            BufferTransition::new(src, size, ResourceState::CopySrc, src_state),
            BufferTransition::new(dst, size, ResourceState::CopyDst, dst_state),
        ];
        let barriers_in = self.buffer_barriers(&transitions_in)?;
        let barriers_out = self.buffer_barriers(&transitions_out)?;

        self.run_one_shot(|raw, cmd| {
            // SAFETY: cmd is in the recording state
            unsafe {
                self.emit_buffer_barriers(raw, cmd, &barriers_in);
                raw.cmd_copy_buffer(
                    cmd,
                    src,
                    dst,
                    &[vk::BufferCopy {
                        src_offset: 0,
                        dst_offset: 0,
                        size,
                    }],
                );
                self.emit_buffer_barriers(raw, cmd, &barriers_out);
            }
            Ok(())
        })
    }

    /// Upload buffer contents into an image, blocking until done.
    pub fn copy_buffer_to_image(
        &self,
        src: vk::Buffer,
        src_offset: vk::DeviceSize,
        dst: &ImageCopyTarget,
    ) -> Result<()> {
        let range = dst.subresource_range();
        let transition_in = ImageTransition::new(dst.image, range, dst.state, ResourceState::CopyDst);
        let transition_out = ImageTransition::new(dst.image, range, ResourceState::CopyDst, dst.state);
        let region = dst.region(src_offset);

        self.run_one_shot(|raw, cmd| {
            self.record_image_barriers(raw, cmd, &[transition_in])?;
            // SAFETY: cmd is in the recording state
            unsafe {
                raw.cmd_copy_buffer_to_image(
                    cmd,
                    src,
                    dst.image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                );
            }
            if dst.state != ResourceState::Undefined {
                self.record_image_barriers(raw, cmd, &[transition_out])?;
            }
            Ok(())
        })
    }

    /// Read an image back into a buffer, blocking until the data is host visible.
    pub fn copy_image_to_buffer(
        &self,
        src: &ImageCopyTarget,
        dst: vk::Buffer,
        dst_offset: vk::DeviceSize,
    ) -> Result<()> {
        let range = src.subresource_range();
        let transition_in = ImageTransition::new(src.image, range, src.state, ResourceState::CopySrc);
        let transition_out = ImageTransition::new(src.image, range, ResourceState::CopySrc, src.state);
        let region = src.region(dst_offset);

        self.run_one_shot(|raw, cmd| {
            self.record_image_barriers(raw, cmd, &[transition_in])?;
            let host_visible = [vk::BufferMemoryBarrier2::default()
                .src_stage_mask(vk::PipelineStageFlags2::TRANSFER)
                .src_access_mask(vk::AccessFlags2::TRANSFER_WRITE)
                .dst_stage_mask(vk::PipelineStageFlags2::HOST)
                .dst_access_mask(vk::AccessFlags2::HOST_READ)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .buffer(dst)
                .offset(0)
                .size(vk::WHOLE_SIZE)];
            // SAFETY: cmd is in the recording state
            unsafe {
                raw.cmd_copy_image_to_buffer(
                    cmd,
                    src.image,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    dst,
                    &[region],
                );
                raw.cmd_pipeline_barrier2(
                    cmd,
                    &vk::DependencyInfo::default().buffer_memory_barriers(&host_visible),
                );
            }
            if src.state != ResourceState::Undefined {
                self.record_image_barriers(raw, cmd, &[transition_out])?;
            }
            Ok(())
        })
    }

    fn buffer_barriers(
        &self,
        transitions: &[BufferTransition],
    ) -> Result<Vec<vk::BufferMemoryBarrier2<'static>>> {
        transitions
            .iter()
            .filter(|t| t.before != t.after && t.after != ResourceState::Undefined)
            .map(|t| barrier::buffer_barrier(t, self.command_type, self.features))
            .collect()
    }

    unsafe fn emit_buffer_barriers(
        &self,
        raw: &dyn RawDevice,
        cmd: vk::CommandBuffer,
        barriers: &[vk::BufferMemoryBarrier2<'static>],
    ) {
        if !barriers.is_empty() {
            let dependency = vk::DependencyInfo::default().buffer_memory_barriers(barriers);
            // SAFETY: forwarded from the caller
            unsafe { raw.cmd_pipeline_barrier2(cmd, &dependency) };
        }
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        let pool = *self.transient_pool.get_mut();
        // SAFETY: the owning device waits idle before its queues drop
        unsafe { self.raw.destroy_command_pool(pool) };
    }
}

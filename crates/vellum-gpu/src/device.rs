//! Render device context and the native backend seam.
//!
//! [`RenderDevice`] is the explicit context every object is created against. It owns the
//! queues, the object registry and the device-wide default sampler, and forwards native
//! calls to a [`RawDevice`] implementation.

use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use gpu_allocator::MemoryLocation;
use parking_lot::Mutex;

use crate::error::Result;
use crate::object::{self, DeviceObject};
use crate::queue::Queue;
use crate::state::{BarrierFeatures, CommandType};

/// Default bound on blocking waits.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Queue family indices used by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub compute: u32,
    pub transfer: u32,
}

/// Optional features the layer reacts to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceFeatures {
    /// `VK_KHR_push_descriptor` is enabled.
    pub push_descriptor: bool,
    pub geometry_shader: bool,
    pub tessellation_shader: bool,
    /// Dynamic rendering (Vulkan 1.3 core).
    pub dynamic_rendering: bool,
}

/// Device limits the layer validates against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceLimits {
    pub max_color_attachments: u32,
    pub max_image_dimension_2d: u32,
    pub max_bound_descriptor_sets: u32,
    pub max_push_constants_size: u32,
    /// Nanoseconds per timestamp tick.
    pub timestamp_period: f32,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            max_color_attachments: 8,
            max_image_dimension_2d: 16384,
            max_bound_descriptor_sets: 8,
            max_push_constants_size: 128,
            timestamp_period: 1.0,
        }
    }
}

/// Static description of an opened device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub queue_families: QueueFamilies,
    pub features: DeviceFeatures,
    pub limits: DeviceLimits,
}

/// Native device entry points.
///
/// Handles and create-info structures are the raw `ash::vk` types. Implementations own
/// memory binding for buffers and images: `create_buffer`/`create_image` return a handle
/// already bound to memory and `destroy_*` releases both.
///
/// # Safety
/// Every `unsafe` method has the validity requirements of the Vulkan command it wraps.
#[allow(clippy::too_many_arguments)]
pub trait RawDevice: Send + Sync {
    /// Description of the device.
    fn info(&self) -> &DeviceInfo;

    // Memory-backed resources

    unsafe fn create_buffer(
        &self,
        info: &vk::BufferCreateInfo<'_>,
        location: MemoryLocation,
        name: &str,
    ) -> Result<vk::Buffer>;
    unsafe fn destroy_buffer(&self, buffer: vk::Buffer);
    /// Host pointer of a mapped buffer, if its memory is host visible.
    fn mapped_ptr(&self, buffer: vk::Buffer) -> Option<NonNull<u8>>;
    unsafe fn create_buffer_view(&self, info: &vk::BufferViewCreateInfo<'_>)
        -> Result<vk::BufferView>;
    unsafe fn destroy_buffer_view(&self, view: vk::BufferView);

    unsafe fn create_image(
        &self,
        info: &vk::ImageCreateInfo<'_>,
        location: MemoryLocation,
        name: &str,
    ) -> Result<vk::Image>;
    unsafe fn destroy_image(&self, image: vk::Image);
    unsafe fn create_image_view(&self, info: &vk::ImageViewCreateInfo<'_>)
        -> Result<vk::ImageView>;
    unsafe fn destroy_image_view(&self, view: vk::ImageView);
    unsafe fn create_sampler(&self, info: &vk::SamplerCreateInfo<'_>) -> Result<vk::Sampler>;
    unsafe fn destroy_sampler(&self, sampler: vk::Sampler);

    // Shaders and pipelines

    unsafe fn create_shader_module(&self, code: &[u32]) -> Result<vk::ShaderModule>;
    unsafe fn destroy_shader_module(&self, module: vk::ShaderModule);
    unsafe fn create_pipeline_layout(
        &self,
        info: &vk::PipelineLayoutCreateInfo<'_>,
    ) -> Result<vk::PipelineLayout>;
    unsafe fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout);
    unsafe fn create_graphics_pipeline(
        &self,
        info: &vk::GraphicsPipelineCreateInfo<'_>,
    ) -> Result<vk::Pipeline>;
    unsafe fn create_compute_pipeline(
        &self,
        info: &vk::ComputePipelineCreateInfo<'_>,
    ) -> Result<vk::Pipeline>;
    unsafe fn destroy_pipeline(&self, pipeline: vk::Pipeline);

    // Descriptors

    unsafe fn create_descriptor_set_layout(
        &self,
        info: &vk::DescriptorSetLayoutCreateInfo<'_>,
    ) -> Result<vk::DescriptorSetLayout>;
    unsafe fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);
    unsafe fn create_descriptor_pool(
        &self,
        info: &vk::DescriptorPoolCreateInfo<'_>,
    ) -> Result<vk::DescriptorPool>;
    unsafe fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);
    unsafe fn allocate_descriptor_sets(
        &self,
        info: &vk::DescriptorSetAllocateInfo<'_>,
    ) -> Result<Vec<vk::DescriptorSet>>;
    unsafe fn free_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        sets: &[vk::DescriptorSet],
    ) -> Result<()>;
    unsafe fn update_descriptor_sets(&self, writes: &[vk::WriteDescriptorSet<'_>]);

    // Render passes

    unsafe fn create_render_pass(&self, info: &vk::RenderPassCreateInfo<'_>)
        -> Result<vk::RenderPass>;
    unsafe fn destroy_render_pass(&self, render_pass: vk::RenderPass);
    unsafe fn create_framebuffer(
        &self,
        info: &vk::FramebufferCreateInfo<'_>,
    ) -> Result<vk::Framebuffer>;
    unsafe fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);

    // Synchronization and queries

    unsafe fn create_fence(&self, signaled: bool) -> Result<vk::Fence>;
    unsafe fn destroy_fence(&self, fence: vk::Fence);
    /// Wait for all fences; expiry of `timeout_ns` is [`GpuError::Timeout`](crate::GpuError::Timeout).
    unsafe fn wait_for_fences(&self, fences: &[vk::Fence], timeout_ns: u64) -> Result<()>;
    unsafe fn reset_fences(&self, fences: &[vk::Fence]) -> Result<()>;
    unsafe fn fence_signaled(&self, fence: vk::Fence) -> Result<bool>;
    unsafe fn create_semaphore(&self) -> Result<vk::Semaphore>;
    unsafe fn destroy_semaphore(&self, semaphore: vk::Semaphore);
    unsafe fn create_query_pool(&self, info: &vk::QueryPoolCreateInfo<'_>)
        -> Result<vk::QueryPool>;
    unsafe fn destroy_query_pool(&self, pool: vk::QueryPool);
    /// Read 64-bit results of `query_count` queries packed into `data`; `Ok(false)`
    /// when some results are not yet available.
    unsafe fn query_pool_results(
        &self,
        pool: vk::QueryPool,
        first_query: u32,
        query_count: u32,
        data: &mut [u64],
        flags: vk::QueryResultFlags,
    ) -> Result<bool>;

    // Command pools and queues

    unsafe fn create_command_pool(
        &self,
        queue_family: u32,
        flags: vk::CommandPoolCreateFlags,
    ) -> Result<vk::CommandPool>;
    unsafe fn destroy_command_pool(&self, pool: vk::CommandPool);
    unsafe fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        level: vk::CommandBufferLevel,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>>;
    unsafe fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]);
    unsafe fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()>;
    unsafe fn begin_command_buffer(
        &self,
        cmd: vk::CommandBuffer,
        flags: vk::CommandBufferUsageFlags,
    ) -> Result<()>;
    unsafe fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()>;
    unsafe fn get_queue(&self, queue_family: u32, index: u32) -> vk::Queue;
    unsafe fn queue_submit(
        &self,
        queue: vk::Queue,
        submits: &[vk::SubmitInfo<'_>],
        fence: vk::Fence,
    ) -> Result<()>;
    unsafe fn queue_wait_idle(&self, queue: vk::Queue) -> Result<()>;
    unsafe fn device_wait_idle(&self) -> Result<()>;

    // Command recording

    unsafe fn cmd_pipeline_barrier2(&self, cmd: vk::CommandBuffer, dependency: &vk::DependencyInfo<'_>);
    unsafe fn cmd_begin_render_pass(
        &self,
        cmd: vk::CommandBuffer,
        info: &vk::RenderPassBeginInfo<'_>,
        contents: vk::SubpassContents,
    );
    unsafe fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer);
    unsafe fn cmd_begin_rendering(&self, cmd: vk::CommandBuffer, info: &vk::RenderingInfo<'_>);
    unsafe fn cmd_end_rendering(&self, cmd: vk::CommandBuffer);
    unsafe fn cmd_bind_pipeline(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    );
    unsafe fn cmd_bind_descriptor_sets(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
        dynamic_offsets: &[u32],
    );
    unsafe fn cmd_push_descriptor_set(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        set: u32,
        writes: &[vk::WriteDescriptorSet<'_>],
    );
    unsafe fn cmd_push_constants(
        &self,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    );
    unsafe fn cmd_bind_vertex_buffers(
        &self,
        cmd: vk::CommandBuffer,
        first_binding: u32,
        buffers: &[vk::Buffer],
        offsets: &[vk::DeviceSize],
    );
    unsafe fn cmd_bind_index_buffer(
        &self,
        cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    );
    unsafe fn cmd_set_viewport(&self, cmd: vk::CommandBuffer, viewports: &[vk::Viewport]);
    unsafe fn cmd_set_scissor(&self, cmd: vk::CommandBuffer, scissors: &[vk::Rect2D]);
    unsafe fn cmd_draw(
        &self,
        cmd: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    );
    unsafe fn cmd_draw_indexed(
        &self,
        cmd: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    );
    unsafe fn cmd_dispatch(&self, cmd: vk::CommandBuffer, x: u32, y: u32, z: u32);
    unsafe fn cmd_copy_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    );
    unsafe fn cmd_copy_buffer_to_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    );
    unsafe fn cmd_copy_image_to_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Buffer,
        regions: &[vk::BufferImageCopy],
    );
    unsafe fn cmd_clear_attachments(
        &self,
        cmd: vk::CommandBuffer,
        attachments: &[vk::ClearAttachment],
        rects: &[vk::ClearRect],
    );
    unsafe fn cmd_reset_query_pool(
        &self,
        cmd: vk::CommandBuffer,
        pool: vk::QueryPool,
        first_query: u32,
        count: u32,
    );
    unsafe fn cmd_begin_query(
        &self,
        cmd: vk::CommandBuffer,
        pool: vk::QueryPool,
        query: u32,
        flags: vk::QueryControlFlags,
    );
    unsafe fn cmd_end_query(&self, cmd: vk::CommandBuffer, pool: vk::QueryPool, query: u32);
    unsafe fn cmd_write_timestamp2(
        &self,
        cmd: vk::CommandBuffer,
        stage: vk::PipelineStageFlags2,
        pool: vk::QueryPool,
        query: u32,
    );
}

/// Configuration for opening a device.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub(crate) app_name: String,
    pub(crate) enable_validation: bool,
    pub(crate) headless: bool,
    pub(crate) push_descriptors: bool,
    pub(crate) timeout: Duration,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            app_name: "Vellum".to_string(),
            enable_validation: cfg!(debug_assertions),
            headless: false,
            push_descriptors: true,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl DeviceConfig {
    /// Create a new config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Enable or disable validation layers.
    pub fn validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    /// Skip window-system extensions.
    pub fn headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    /// Request `VK_KHR_push_descriptor` when the device exposes it.
    pub fn push_descriptors(mut self, enable: bool) -> Self {
        self.push_descriptors = enable;
        self
    }

    /// Bound on every blocking wait issued through the device.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Live object counts per kind.
#[derive(Debug, Default)]
pub struct ObjectRegistry {
    live: Mutex<HashMap<&'static str, usize>>,
}

impl ObjectRegistry {
    pub(crate) fn register(&self, kind: &'static str) {
        *self.live.lock().entry(kind).or_default() += 1;
    }

    pub(crate) fn release(&self, kind: &'static str) {
        let mut live = self.live.lock();
        match live.get_mut(kind) {
            Some(count) if *count > 0 => *count -= 1,
            _ => tracing::warn!("Released untracked {kind}"),
        }
    }

    /// Number of live objects of one kind.
    pub fn live(&self, kind: &str) -> usize {
        self.live.lock().get(kind).copied().unwrap_or(0)
    }

    /// Number of live objects of every kind.
    pub fn total(&self) -> usize {
        self.live.lock().values().sum()
    }
}

/// The device context every object is created against.
pub struct RenderDevice {
    raw: Arc<dyn RawDevice>,
    graphics_queue: Arc<Queue>,
    compute_queue: Arc<Queue>,
    transfer_queue: Arc<Queue>,
    registry: ObjectRegistry,
    default_sampler: vk::Sampler,
    timeout: Duration,
}

impl RenderDevice {
    /// Wrap a native device.
    ///
    /// Queues sharing a family share one [`Queue`] so their submissions are serialized
    /// by the same lock.
    pub fn new(raw: Arc<dyn RawDevice>, config: &DeviceConfig) -> Result<Arc<Self>> {
        let info = raw.info().clone();
        let families = info.queue_families;
        let timeout = config.timeout;

        let graphics_queue = Arc::new(Queue::new(
            raw.clone(),
            CommandType::Graphics,
            families.graphics,
            timeout,
        )?);

        let compute_queue = if families.compute == families.graphics {
            graphics_queue.clone()
        } else {
            Arc::new(Queue::new(
                raw.clone(),
                CommandType::Compute,
                families.compute,
                timeout,
            )?)
        };

        let transfer_queue = if families.transfer == families.graphics {
            graphics_queue.clone()
        } else if families.transfer == families.compute {
            compute_queue.clone()
        } else {
            Arc::new(Queue::new(
                raw.clone(),
                CommandType::Transfer,
                families.transfer,
                timeout,
            )?)
        };

        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .max_lod(vk::LOD_CLAMP_NONE);
        // SAFETY: the raw device is valid for the lifetime of this context
        let default_sampler = unsafe { raw.create_sampler(&sampler_info)? };

        tracing::info!(
            "Render device ready: {} (graphics family {}, compute {}, transfer {})",
            info.name,
            families.graphics,
            families.compute,
            families.transfer
        );

        Ok(Arc::new(Self {
            raw,
            graphics_queue,
            compute_queue,
            transfer_queue,
            registry: ObjectRegistry::default(),
            default_sampler,
            timeout,
        }))
    }

    /// Native entry points.
    pub fn raw(&self) -> &Arc<dyn RawDevice> {
        &self.raw
    }

    /// Device description.
    pub fn info(&self) -> &DeviceInfo {
        self.raw.info()
    }

    /// Shader stages available to barrier translation.
    pub fn barrier_features(&self) -> BarrierFeatures {
        let features = self.raw.info().features;
        BarrierFeatures {
            geometry_shader: features.geometry_shader,
            tessellation_shader: features.tessellation_shader,
        }
    }

    /// The graphics queue.
    pub fn graphics_queue(&self) -> &Arc<Queue> {
        &self.graphics_queue
    }

    /// The compute queue (the graphics queue when no dedicated family exists).
    pub fn compute_queue(&self) -> &Arc<Queue> {
        &self.compute_queue
    }

    /// The transfer queue (falls back to compute, then graphics).
    pub fn transfer_queue(&self) -> &Arc<Queue> {
        &self.transfer_queue
    }

    /// Queue for a command type.
    pub fn queue(&self, command_type: CommandType) -> &Arc<Queue> {
        match command_type {
            CommandType::Graphics => &self.graphics_queue,
            CommandType::Compute => &self.compute_queue,
            CommandType::Transfer => &self.transfer_queue,
        }
    }

    /// Live object bookkeeping.
    pub fn registry(&self) -> &ObjectRegistry {
        &self.registry
    }

    /// Live objects of one kind, e.g. `"Image"`.
    pub fn live_objects(&self, kind: &str) -> usize {
        self.registry.live(kind)
    }

    /// Live objects of every kind.
    pub fn total_live_objects(&self) -> usize {
        self.registry.total()
    }

    /// Device-wide linear/repeat sampler.
    pub fn default_sampler(&self) -> vk::Sampler {
        self.default_sampler
    }

    /// Bound applied to blocking waits.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Timeout in nanoseconds, for native waits.
    pub fn timeout_ns(&self) -> u64 {
        u64::try_from(self.timeout.as_nanos()).unwrap_or(u64::MAX)
    }

    /// Create any device object.
    pub fn create<T: DeviceObject>(self: &Arc<Self>, desc: T::Desc) -> Result<T> {
        object::create(self, desc)
    }

    /// Wait for device to be idle.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn wait_idle(&self) -> Result<()> {
        // SAFETY: the raw device is valid for the lifetime of this context
        unsafe { self.raw.device_wait_idle() }
    }
}

impl Drop for RenderDevice {
    fn drop(&mut self) {
        // SAFETY: no object holds this context anymore, so nothing is in flight
        // once the device is idle
        unsafe {
            let _ = self.raw.device_wait_idle();
            self.raw.destroy_sampler(self.default_sampler);
        }
    }
}

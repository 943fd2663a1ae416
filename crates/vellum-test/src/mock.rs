//! Recording mock backend.
//!
//! [`MockDevice`] implements [`RawDevice`] without a GPU: every entry point appends a
//! [`Call`] to a log, handles come from a counter, submitted work completes
//! immediately and fences track their signaled state. [`MockSurface`] and
//! [`MockWindow`] script the presentation side.

use std::collections::{HashMap, VecDeque};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use ash::vk::{self, Handle};
use gpu_allocator::MemoryLocation;
use parking_lot::Mutex;
use vellum_gpu::{
    AcquireOutcome, DeviceConfig, DeviceFeatures, DeviceInfo, DeviceLimits, GpuError,
    PresentOutcome, QueueFamilies, RawDevice, RawSurface, RenderDevice, Result,
    SurfaceCapabilities, WindowSurface,
};

/// One recorded native call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Call {
    pub name: &'static str,
    /// Handle the call acted on, or 0.
    pub handle: u64,
    /// Call-specific detail, e.g. the number of barriers in a dependency.
    pub detail: u64,
}

/// A device that records calls instead of executing them.
pub struct MockDevice {
    info: DeviceInfo,
    next_handle: AtomicU64,
    calls: Mutex<Vec<Call>>,
    fences: Mutex<HashMap<u64, bool>>,
    mapped: Mutex<HashMap<u64, Box<[u8]>>>,
    pool_capacity: Mutex<HashMap<u64, u32>>,
    submit_errors: Mutex<VecDeque<vk::Result>>,
}

impl MockDevice {
    /// A single-family device with dynamic rendering and default limits.
    pub fn new() -> Arc<Self> {
        Self::with_info(DeviceInfo {
            name: "mock device".to_string(),
            queue_families: QueueFamilies {
                graphics: 0,
                compute: 0,
                transfer: 0,
            },
            features: DeviceFeatures {
                dynamic_rendering: true,
                ..Default::default()
            },
            limits: DeviceLimits::default(),
        })
    }

    pub fn with_info(info: DeviceInfo) -> Arc<Self> {
        Arc::new(Self {
            info,
            next_handle: AtomicU64::new(1),
            calls: Mutex::new(Vec::new()),
            fences: Mutex::new(HashMap::new()),
            mapped: Mutex::new(HashMap::new()),
            pool_capacity: Mutex::new(HashMap::new()),
            submit_errors: Mutex::new(VecDeque::new()),
        })
    }

    /// Wrap this device in a render device with default configuration.
    pub fn render_device(self: &Arc<Self>) -> Result<Arc<RenderDevice>> {
        self.render_device_with(&DeviceConfig::new())
    }

    pub fn render_device_with(self: &Arc<Self>, config: &DeviceConfig) -> Result<Arc<RenderDevice>> {
        let raw: Arc<dyn RawDevice> = self.clone();
        RenderDevice::new(raw, config)
    }

    /// A fresh nonzero handle value.
    pub fn next_handle(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::Relaxed)
    }

    fn handle<H: Handle>(&self) -> H {
        H::from_raw(self.next_handle())
    }

    pub fn record(&self, name: &'static str, handle: u64, detail: u64) {
        self.calls.lock().push(Call {
            name,
            handle,
            detail,
        });
    }

    /// Make the next queue submission fail with a native error.
    pub fn fail_next_submit(&self, error: vk::Result) {
        self.submit_errors.lock().push_back(error);
    }

    /// Every call recorded so far.
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Calls with this name, in order.
    pub fn calls_named(&self, name: &str) -> Vec<Call> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.name == name)
            .copied()
            .collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.name == name).count()
    }

    /// Forget recorded calls, keeping handle and fence state.
    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Log position of the first call matching `name` and `handle`.
    pub fn position(&self, name: &str, handle: u64) -> Option<usize> {
        self.calls
            .lock()
            .iter()
            .position(|c| c.name == name && c.handle == handle)
    }

    /// Log positions of every call matching `name` and `handle`.
    pub fn positions(&self, name: &str, handle: u64) -> Vec<usize> {
        self.calls
            .lock()
            .iter()
            .enumerate()
            .filter(|(_, c)| c.name == name && c.handle == handle)
            .map(|(i, _)| i)
            .collect()
    }

    /// Signaled state of a live fence.
    pub fn fence_state(&self, fence: vk::Fence) -> Option<bool> {
        self.fences.lock().get(&fence.as_raw()).copied()
    }

    /// Force a fence's state, e.g. to simulate work that never completes.
    pub fn set_fence_signaled(&self, fence: vk::Fence, signaled: bool) {
        self.fences.lock().insert(fence.as_raw(), signaled);
    }

    pub fn live_fences(&self) -> usize {
        self.fences.lock().len()
    }
}

fn barrier_total(dependency: &vk::DependencyInfo<'_>) -> u64 {
    u64::from(
        dependency.memory_barrier_count
            + dependency.buffer_memory_barrier_count
            + dependency.image_memory_barrier_count,
    )
}

#[allow(clippy::too_many_arguments)]
impl RawDevice for MockDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    unsafe fn create_buffer(
        &self,
        info: &vk::BufferCreateInfo<'_>,
        location: MemoryLocation,
        _name: &str,
    ) -> Result<vk::Buffer> {
        let buffer: vk::Buffer = self.handle();
        if matches!(location, MemoryLocation::CpuToGpu | MemoryLocation::GpuToCpu) {
            let size = usize::try_from(info.size)
                .map_err(|_| GpuError::AllocationFailed("buffer too large".to_string()))?;
            self.mapped
                .lock()
                .insert(buffer.as_raw(), vec![0u8; size].into_boxed_slice());
        }
        self.record("create_buffer", buffer.as_raw(), info.size);
        Ok(buffer)
    }

    unsafe fn destroy_buffer(&self, buffer: vk::Buffer) {
        self.mapped.lock().remove(&buffer.as_raw());
        self.record("destroy_buffer", buffer.as_raw(), 0);
    }

    fn mapped_ptr(&self, buffer: vk::Buffer) -> Option<NonNull<u8>> {
        self.mapped
            .lock()
            .get_mut(&buffer.as_raw())
            .and_then(|memory| NonNull::new(memory.as_mut_ptr()))
    }

    unsafe fn create_buffer_view(
        &self,
        info: &vk::BufferViewCreateInfo<'_>,
    ) -> Result<vk::BufferView> {
        let view: vk::BufferView = self.handle();
        self.record("create_buffer_view", view.as_raw(), info.buffer.as_raw());
        Ok(view)
    }

    unsafe fn destroy_buffer_view(&self, view: vk::BufferView) {
        self.record("destroy_buffer_view", view.as_raw(), 0);
    }

    unsafe fn create_image(
        &self,
        info: &vk::ImageCreateInfo<'_>,
        _location: MemoryLocation,
        _name: &str,
    ) -> Result<vk::Image> {
        let image: vk::Image = self.handle();
        self.record("create_image", image.as_raw(), u64::from(info.format.as_raw() as u32));
        Ok(image)
    }

    unsafe fn destroy_image(&self, image: vk::Image) {
        self.record("destroy_image", image.as_raw(), 0);
    }

    unsafe fn create_image_view(
        &self,
        info: &vk::ImageViewCreateInfo<'_>,
    ) -> Result<vk::ImageView> {
        let view: vk::ImageView = self.handle();
        self.record("create_image_view", view.as_raw(), info.image.as_raw());
        Ok(view)
    }

    unsafe fn destroy_image_view(&self, view: vk::ImageView) {
        self.record("destroy_image_view", view.as_raw(), 0);
    }

    unsafe fn create_sampler(&self, _info: &vk::SamplerCreateInfo<'_>) -> Result<vk::Sampler> {
        let sampler: vk::Sampler = self.handle();
        self.record("create_sampler", sampler.as_raw(), 0);
        Ok(sampler)
    }

    unsafe fn destroy_sampler(&self, sampler: vk::Sampler) {
        self.record("destroy_sampler", sampler.as_raw(), 0);
    }

    unsafe fn create_shader_module(&self, code: &[u32]) -> Result<vk::ShaderModule> {
        let module: vk::ShaderModule = self.handle();
        self.record("create_shader_module", module.as_raw(), code.len() as u64);
        Ok(module)
    }

    unsafe fn destroy_shader_module(&self, module: vk::ShaderModule) {
        self.record("destroy_shader_module", module.as_raw(), 0);
    }

    unsafe fn create_pipeline_layout(
        &self,
        info: &vk::PipelineLayoutCreateInfo<'_>,
    ) -> Result<vk::PipelineLayout> {
        let layout: vk::PipelineLayout = self.handle();
        self.record(
            "create_pipeline_layout",
            layout.as_raw(),
            u64::from(info.set_layout_count),
        );
        Ok(layout)
    }

    unsafe fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        self.record("destroy_pipeline_layout", layout.as_raw(), 0);
    }

    unsafe fn create_graphics_pipeline(
        &self,
        info: &vk::GraphicsPipelineCreateInfo<'_>,
    ) -> Result<vk::Pipeline> {
        let pipeline: vk::Pipeline = self.handle();
        self.record(
            "create_graphics_pipeline",
            pipeline.as_raw(),
            info.render_pass.as_raw(),
        );
        Ok(pipeline)
    }

    unsafe fn create_compute_pipeline(
        &self,
        info: &vk::ComputePipelineCreateInfo<'_>,
    ) -> Result<vk::Pipeline> {
        let pipeline: vk::Pipeline = self.handle();
        self.record(
            "create_compute_pipeline",
            pipeline.as_raw(),
            info.layout.as_raw(),
        );
        Ok(pipeline)
    }

    unsafe fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        self.record("destroy_pipeline", pipeline.as_raw(), 0);
    }

    unsafe fn create_descriptor_set_layout(
        &self,
        info: &vk::DescriptorSetLayoutCreateInfo<'_>,
    ) -> Result<vk::DescriptorSetLayout> {
        let layout: vk::DescriptorSetLayout = self.handle();
        self.record(
            "create_descriptor_set_layout",
            layout.as_raw(),
            u64::from(info.binding_count),
        );
        Ok(layout)
    }

    unsafe fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        self.record("destroy_descriptor_set_layout", layout.as_raw(), 0);
    }

    unsafe fn create_descriptor_pool(
        &self,
        info: &vk::DescriptorPoolCreateInfo<'_>,
    ) -> Result<vk::DescriptorPool> {
        let pool: vk::DescriptorPool = self.handle();
        self.pool_capacity.lock().insert(pool.as_raw(), info.max_sets);
        self.record("create_descriptor_pool", pool.as_raw(), u64::from(info.max_sets));
        Ok(pool)
    }

    unsafe fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        self.pool_capacity.lock().remove(&pool.as_raw());
        self.record("destroy_descriptor_pool", pool.as_raw(), 0);
    }

    unsafe fn allocate_descriptor_sets(
        &self,
        info: &vk::DescriptorSetAllocateInfo<'_>,
    ) -> Result<Vec<vk::DescriptorSet>> {
        let pool = info.descriptor_pool.as_raw();
        let count = info.descriptor_set_count;
        {
            let mut capacity = self.pool_capacity.lock();
            let remaining = capacity.entry(pool).or_insert(0);
            if *remaining < count {
                self.record("allocate_descriptor_sets_failed", pool, u64::from(count));
                return Err(GpuError::Vulkan(vk::Result::ERROR_OUT_OF_POOL_MEMORY));
            }
            *remaining -= count;
        }
        self.record("allocate_descriptor_sets", pool, u64::from(count));
        Ok((0..count).map(|_| self.handle()).collect())
    }

    unsafe fn free_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        sets: &[vk::DescriptorSet],
    ) -> Result<()> {
        if let Some(remaining) = self.pool_capacity.lock().get_mut(&pool.as_raw()) {
            *remaining += sets.len() as u32;
        }
        self.record("free_descriptor_sets", pool.as_raw(), sets.len() as u64);
        Ok(())
    }

    unsafe fn update_descriptor_sets(&self, writes: &[vk::WriteDescriptorSet<'_>]) {
        let set = writes.first().map_or(0, |w| w.dst_set.as_raw());
        self.record("update_descriptor_sets", set, writes.len() as u64);
    }

    unsafe fn create_render_pass(
        &self,
        info: &vk::RenderPassCreateInfo<'_>,
    ) -> Result<vk::RenderPass> {
        let render_pass: vk::RenderPass = self.handle();
        self.record(
            "create_render_pass",
            render_pass.as_raw(),
            u64::from(info.attachment_count),
        );
        Ok(render_pass)
    }

    unsafe fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.record("destroy_render_pass", render_pass.as_raw(), 0);
    }

    unsafe fn create_framebuffer(
        &self,
        info: &vk::FramebufferCreateInfo<'_>,
    ) -> Result<vk::Framebuffer> {
        let framebuffer: vk::Framebuffer = self.handle();
        self.record(
            "create_framebuffer",
            framebuffer.as_raw(),
            info.render_pass.as_raw(),
        );
        Ok(framebuffer)
    }

    unsafe fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.record("destroy_framebuffer", framebuffer.as_raw(), 0);
    }

    unsafe fn create_fence(&self, signaled: bool) -> Result<vk::Fence> {
        let fence: vk::Fence = self.handle();
        self.fences.lock().insert(fence.as_raw(), signaled);
        self.record("create_fence", fence.as_raw(), u64::from(signaled));
        Ok(fence)
    }

    unsafe fn destroy_fence(&self, fence: vk::Fence) {
        self.fences.lock().remove(&fence.as_raw());
        self.record("destroy_fence", fence.as_raw(), 0);
    }

    unsafe fn wait_for_fences(&self, fences: &[vk::Fence], timeout_ns: u64) -> Result<()> {
        for fence in fences {
            self.record("wait_for_fences", fence.as_raw(), timeout_ns);
        }
        let states = self.fences.lock();
        if fences
            .iter()
            .all(|f| states.get(&f.as_raw()).copied().unwrap_or(false))
        {
            Ok(())
        } else {
            Err(GpuError::Timeout("fence"))
        }
    }

    unsafe fn reset_fences(&self, fences: &[vk::Fence]) -> Result<()> {
        let mut states = self.fences.lock();
        for fence in fences {
            states.insert(fence.as_raw(), false);
            self.record("reset_fences", fence.as_raw(), 0);
        }
        Ok(())
    }

    unsafe fn fence_signaled(&self, fence: vk::Fence) -> Result<bool> {
        Ok(self.fences.lock().get(&fence.as_raw()).copied().unwrap_or(false))
    }

    unsafe fn create_semaphore(&self) -> Result<vk::Semaphore> {
        let semaphore: vk::Semaphore = self.handle();
        self.record("create_semaphore", semaphore.as_raw(), 0);
        Ok(semaphore)
    }

    unsafe fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.record("destroy_semaphore", semaphore.as_raw(), 0);
    }

    unsafe fn create_query_pool(
        &self,
        info: &vk::QueryPoolCreateInfo<'_>,
    ) -> Result<vk::QueryPool> {
        let pool: vk::QueryPool = self.handle();
        self.record("create_query_pool", pool.as_raw(), u64::from(info.query_count));
        Ok(pool)
    }

    unsafe fn destroy_query_pool(&self, pool: vk::QueryPool) {
        self.record("destroy_query_pool", pool.as_raw(), 0);
    }

    unsafe fn query_pool_results(
        &self,
        pool: vk::QueryPool,
        _first_query: u32,
        query_count: u32,
        data: &mut [u64],
        _flags: vk::QueryResultFlags,
    ) -> Result<bool> {
        data.fill(0);
        self.record("query_pool_results", pool.as_raw(), u64::from(query_count));
        Ok(true)
    }

    unsafe fn create_command_pool(
        &self,
        queue_family: u32,
        _flags: vk::CommandPoolCreateFlags,
    ) -> Result<vk::CommandPool> {
        let pool: vk::CommandPool = self.handle();
        self.record("create_command_pool", pool.as_raw(), u64::from(queue_family));
        Ok(pool)
    }

    unsafe fn destroy_command_pool(&self, pool: vk::CommandPool) {
        self.record("destroy_command_pool", pool.as_raw(), 0);
    }

    unsafe fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        _level: vk::CommandBufferLevel,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>> {
        self.record("allocate_command_buffers", pool.as_raw(), u64::from(count));
        Ok((0..count).map(|_| self.handle()).collect())
    }

    unsafe fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        self.record("free_command_buffers", pool.as_raw(), buffers.len() as u64);
    }

    unsafe fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()> {
        self.record("reset_command_buffer", cmd.as_raw(), 0);
        Ok(())
    }

    unsafe fn begin_command_buffer(
        &self,
        cmd: vk::CommandBuffer,
        flags: vk::CommandBufferUsageFlags,
    ) -> Result<()> {
        self.record("begin_command_buffer", cmd.as_raw(), u64::from(flags.as_raw()));
        Ok(())
    }

    unsafe fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()> {
        self.record("end_command_buffer", cmd.as_raw(), 0);
        Ok(())
    }

    unsafe fn get_queue(&self, queue_family: u32, _index: u32) -> vk::Queue {
        vk::Queue::from_raw(0x1000 + u64::from(queue_family))
    }

    unsafe fn queue_submit(
        &self,
        queue: vk::Queue,
        submits: &[vk::SubmitInfo<'_>],
        fence: vk::Fence,
    ) -> Result<()> {
        let command_buffers: u32 = submits.iter().map(|s| s.command_buffer_count).sum();
        self.record("queue_submit", queue.as_raw(), u64::from(command_buffers));
        if let Some(error) = self.submit_errors.lock().pop_front() {
            return Err(GpuError::Vulkan(error));
        }
        // Work completes as soon as it is submitted.
        if fence != vk::Fence::null() {
            self.fences.lock().insert(fence.as_raw(), true);
        }
        Ok(())
    }

    unsafe fn queue_wait_idle(&self, queue: vk::Queue) -> Result<()> {
        self.record("queue_wait_idle", queue.as_raw(), 0);
        Ok(())
    }

    unsafe fn device_wait_idle(&self) -> Result<()> {
        self.record("device_wait_idle", 0, 0);
        Ok(())
    }

    unsafe fn cmd_pipeline_barrier2(
        &self,
        cmd: vk::CommandBuffer,
        dependency: &vk::DependencyInfo<'_>,
    ) {
        self.record("cmd_pipeline_barrier2", cmd.as_raw(), barrier_total(dependency));
    }

    unsafe fn cmd_begin_render_pass(
        &self,
        cmd: vk::CommandBuffer,
        info: &vk::RenderPassBeginInfo<'_>,
        _contents: vk::SubpassContents,
    ) {
        self.record("cmd_begin_render_pass", cmd.as_raw(), info.render_pass.as_raw());
    }

    unsafe fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer) {
        self.record("cmd_end_render_pass", cmd.as_raw(), 0);
    }

    unsafe fn cmd_begin_rendering(&self, cmd: vk::CommandBuffer, info: &vk::RenderingInfo<'_>) {
        self.record(
            "cmd_begin_rendering",
            cmd.as_raw(),
            u64::from(info.color_attachment_count),
        );
    }

    unsafe fn cmd_end_rendering(&self, cmd: vk::CommandBuffer) {
        self.record("cmd_end_rendering", cmd.as_raw(), 0);
    }

    unsafe fn cmd_bind_pipeline(
        &self,
        cmd: vk::CommandBuffer,
        _bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    ) {
        self.record("cmd_bind_pipeline", cmd.as_raw(), pipeline.as_raw());
    }

    unsafe fn cmd_bind_descriptor_sets(
        &self,
        cmd: vk::CommandBuffer,
        _bind_point: vk::PipelineBindPoint,
        _layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
        _dynamic_offsets: &[u32],
    ) {
        // first set in the high half, count in the low half
        self.record(
            "cmd_bind_descriptor_sets",
            cmd.as_raw(),
            (u64::from(first_set) << 32) | sets.len() as u64,
        );
    }

    unsafe fn cmd_push_descriptor_set(
        &self,
        cmd: vk::CommandBuffer,
        _bind_point: vk::PipelineBindPoint,
        _layout: vk::PipelineLayout,
        set: u32,
        writes: &[vk::WriteDescriptorSet<'_>],
    ) {
        self.record(
            "cmd_push_descriptor_set",
            cmd.as_raw(),
            (u64::from(set) << 32) | writes.len() as u64,
        );
    }

    unsafe fn cmd_push_constants(
        &self,
        cmd: vk::CommandBuffer,
        _layout: vk::PipelineLayout,
        _stages: vk::ShaderStageFlags,
        _offset: u32,
        data: &[u8],
    ) {
        self.record("cmd_push_constants", cmd.as_raw(), data.len() as u64);
    }

    unsafe fn cmd_bind_vertex_buffers(
        &self,
        cmd: vk::CommandBuffer,
        _first_binding: u32,
        buffers: &[vk::Buffer],
        _offsets: &[vk::DeviceSize],
    ) {
        self.record("cmd_bind_vertex_buffers", cmd.as_raw(), buffers.len() as u64);
    }

    unsafe fn cmd_bind_index_buffer(
        &self,
        cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        _offset: vk::DeviceSize,
        _index_type: vk::IndexType,
    ) {
        self.record("cmd_bind_index_buffer", cmd.as_raw(), buffer.as_raw());
    }

    unsafe fn cmd_set_viewport(&self, cmd: vk::CommandBuffer, viewports: &[vk::Viewport]) {
        self.record("cmd_set_viewport", cmd.as_raw(), viewports.len() as u64);
    }

    unsafe fn cmd_set_scissor(&self, cmd: vk::CommandBuffer, scissors: &[vk::Rect2D]) {
        // Detail packs the first scissor's extent as `width << 32 | height`.
        let extent = scissors.first().map_or(0, |s| {
            (u64::from(s.extent.width) << 32) | u64::from(s.extent.height)
        });
        self.record("cmd_set_scissor", cmd.as_raw(), extent);
    }

    unsafe fn cmd_draw(
        &self,
        cmd: vk::CommandBuffer,
        vertex_count: u32,
        _instance_count: u32,
        _first_vertex: u32,
        _first_instance: u32,
    ) {
        self.record("cmd_draw", cmd.as_raw(), u64::from(vertex_count));
    }

    unsafe fn cmd_draw_indexed(
        &self,
        cmd: vk::CommandBuffer,
        index_count: u32,
        _instance_count: u32,
        _first_index: u32,
        _vertex_offset: i32,
        _first_instance: u32,
    ) {
        self.record("cmd_draw_indexed", cmd.as_raw(), u64::from(index_count));
    }

    unsafe fn cmd_dispatch(&self, cmd: vk::CommandBuffer, x: u32, y: u32, z: u32) {
        self.record(
            "cmd_dispatch",
            cmd.as_raw(),
            u64::from(x) * u64::from(y) * u64::from(z),
        );
    }

    unsafe fn cmd_copy_buffer(
        &self,
        cmd: vk::CommandBuffer,
        _src: vk::Buffer,
        _dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    ) {
        self.record("cmd_copy_buffer", cmd.as_raw(), regions.len() as u64);
    }

    unsafe fn cmd_copy_buffer_to_image(
        &self,
        cmd: vk::CommandBuffer,
        _src: vk::Buffer,
        dst: vk::Image,
        _dst_layout: vk::ImageLayout,
        _regions: &[vk::BufferImageCopy],
    ) {
        self.record("cmd_copy_buffer_to_image", cmd.as_raw(), dst.as_raw());
    }

    unsafe fn cmd_copy_image_to_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Image,
        _src_layout: vk::ImageLayout,
        _dst: vk::Buffer,
        _regions: &[vk::BufferImageCopy],
    ) {
        self.record("cmd_copy_image_to_buffer", cmd.as_raw(), src.as_raw());
    }

    unsafe fn cmd_clear_attachments(
        &self,
        cmd: vk::CommandBuffer,
        attachments: &[vk::ClearAttachment],
        _rects: &[vk::ClearRect],
    ) {
        self.record("cmd_clear_attachments", cmd.as_raw(), attachments.len() as u64);
    }

    unsafe fn cmd_reset_query_pool(
        &self,
        cmd: vk::CommandBuffer,
        _pool: vk::QueryPool,
        _first_query: u32,
        count: u32,
    ) {
        self.record("cmd_reset_query_pool", cmd.as_raw(), u64::from(count));
    }

    unsafe fn cmd_begin_query(
        &self,
        cmd: vk::CommandBuffer,
        _pool: vk::QueryPool,
        query: u32,
        _flags: vk::QueryControlFlags,
    ) {
        self.record("cmd_begin_query", cmd.as_raw(), u64::from(query));
    }

    unsafe fn cmd_end_query(&self, cmd: vk::CommandBuffer, _pool: vk::QueryPool, query: u32) {
        self.record("cmd_end_query", cmd.as_raw(), u64::from(query));
    }

    unsafe fn cmd_write_timestamp2(
        &self,
        cmd: vk::CommandBuffer,
        _stage: vk::PipelineStageFlags2,
        _pool: vk::QueryPool,
        query: u32,
    ) {
        self.record("cmd_write_timestamp2", cmd.as_raw(), u64::from(query));
    }
}

/// A surface whose acquire and present results are scripted.
///
/// Unscripted acquires hand out images round-robin and unscripted presents succeed.
pub struct MockSurface {
    device: Arc<MockDevice>,
    handle: vk::SurfaceKHR,
    capabilities: Mutex<vk::SurfaceCapabilitiesKHR>,
    formats: Vec<vk::SurfaceFormatKHR>,
    present_modes: Vec<vk::PresentModeKHR>,
    swapchains: Mutex<HashMap<u64, u32>>,
    acquires: Mutex<VecDeque<std::result::Result<AcquireOutcome, vk::Result>>>,
    presents: Mutex<VecDeque<std::result::Result<PresentOutcome, vk::Result>>>,
    next_image: AtomicUsize,
}

impl MockSurface {
    /// Extent follows the window, 2 to 4 images, BGRA sRGB, FIFO and mailbox.
    pub fn new(device: &Arc<MockDevice>) -> Arc<Self> {
        Arc::new(Self {
            handle: vk::SurfaceKHR::from_raw(device.next_handle()),
            device: device.clone(),
            capabilities: Mutex::new(vk::SurfaceCapabilitiesKHR {
                min_image_count: 2,
                max_image_count: 4,
                current_extent: vk::Extent2D {
                    width: u32::MAX,
                    height: u32::MAX,
                },
                min_image_extent: vk::Extent2D {
                    width: 1,
                    height: 1,
                },
                max_image_extent: vk::Extent2D {
                    width: 4096,
                    height: 4096,
                },
                max_image_array_layers: 1,
                supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
                current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
                supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
                supported_usage_flags: vk::ImageUsageFlags::COLOR_ATTACHMENT
                    | vk::ImageUsageFlags::TRANSFER_DST,
                ..Default::default()
            }),
            formats: vec![vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
            swapchains: Mutex::new(HashMap::new()),
            acquires: Mutex::new(VecDeque::new()),
            presents: Mutex::new(VecDeque::new()),
            next_image: AtomicUsize::new(0),
        })
    }

    /// Script the next acquire.
    pub fn push_acquire(&self, outcome: AcquireOutcome) {
        self.acquires.lock().push_back(Ok(outcome));
    }

    /// Make the next acquire fail with a native error.
    pub fn push_acquire_error(&self, error: vk::Result) {
        self.acquires.lock().push_back(Err(error));
    }

    /// Script the next present.
    pub fn push_present(&self, outcome: PresentOutcome) {
        self.presents.lock().push_back(Ok(outcome));
    }

    /// Make the next present fail with a native error.
    pub fn push_present_error(&self, error: vk::Result) {
        self.presents.lock().push_back(Err(error));
    }

    pub fn set_capabilities(&self, capabilities: vk::SurfaceCapabilitiesKHR) {
        *self.capabilities.lock() = capabilities;
    }

    pub fn live_swapchains(&self) -> usize {
        self.swapchains.lock().len()
    }
}

impl RawSurface for MockSurface {
    fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    fn capabilities(&self) -> Result<SurfaceCapabilities> {
        Ok(SurfaceCapabilities {
            capabilities: *self.capabilities.lock(),
            formats: self.formats.clone(),
            present_modes: self.present_modes.clone(),
        })
    }

    unsafe fn create_swapchain(
        &self,
        info: &vk::SwapchainCreateInfoKHR<'_>,
    ) -> Result<vk::SwapchainKHR> {
        let swapchain = vk::SwapchainKHR::from_raw(self.device.next_handle());
        self.swapchains
            .lock()
            .insert(swapchain.as_raw(), info.min_image_count);
        self.device.record(
            "create_swapchain",
            swapchain.as_raw(),
            info.old_swapchain.as_raw(),
        );
        Ok(swapchain)
    }

    unsafe fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        self.swapchains.lock().remove(&swapchain.as_raw());
        self.device
            .record("destroy_swapchain", swapchain.as_raw(), 0);
    }

    unsafe fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> Result<Vec<vk::Image>> {
        let count = self
            .swapchains
            .lock()
            .get(&swapchain.as_raw())
            .copied()
            .ok_or(GpuError::Vulkan(vk::Result::ERROR_SURFACE_LOST_KHR))?;
        Ok((0..count)
            .map(|_| vk::Image::from_raw(self.device.next_handle()))
            .collect())
    }

    unsafe fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        _timeout_ns: u64,
        semaphore: vk::Semaphore,
    ) -> Result<AcquireOutcome> {
        self.device
            .record("acquire_next_image", swapchain.as_raw(), semaphore.as_raw());
        match self.acquires.lock().pop_front() {
            Some(Ok(outcome)) => return Ok(outcome),
            Some(Err(vk::Result::TIMEOUT)) => return Err(GpuError::Timeout("swapchain image")),
            Some(Err(e)) => return Err(GpuError::Vulkan(e)),
            None => {}
        }
        let count = self
            .swapchains
            .lock()
            .get(&swapchain.as_raw())
            .copied()
            .unwrap_or(1)
            .max(1) as usize;
        let index = self.next_image.fetch_add(1, Ordering::Relaxed) % count;
        Ok(AcquireOutcome::Acquired {
            index: index as u32,
            suboptimal: false,
        })
    }

    unsafe fn queue_present(
        &self,
        _queue: vk::Queue,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        _wait_semaphores: &[vk::Semaphore],
    ) -> Result<PresentOutcome> {
        self.device
            .record("queue_present", swapchain.as_raw(), u64::from(image_index));
        match self.presents.lock().pop_front() {
            None => Ok(PresentOutcome::Presented),
            Some(Ok(outcome)) => Ok(outcome),
            Some(Err(vk::Result::TIMEOUT)) => Err(GpuError::Timeout("present")),
            Some(Err(e)) => Err(GpuError::Vulkan(e)),
        }
    }
}

/// A window with a settable size that can report zero area for a number of polls.
pub struct MockWindow {
    size: Mutex<(u32, u32)>,
    zero_polls: AtomicUsize,
    waits: AtomicUsize,
}

impl MockWindow {
    pub fn new(width: u32, height: u32) -> Arc<Self> {
        Arc::new(Self {
            size: Mutex::new((width, height)),
            zero_polls: AtomicUsize::new(0),
            waits: AtomicUsize::new(0),
        })
    }

    pub fn resize(&self, width: u32, height: u32) {
        *self.size.lock() = (width, height);
    }

    /// Report a zero-area framebuffer for the next `polls` size queries.
    pub fn minimize_for(&self, polls: usize) {
        self.zero_polls.store(polls, Ordering::SeqCst);
    }

    /// How many times the caller blocked on window events.
    pub fn wait_count(&self) -> usize {
        self.waits.load(Ordering::SeqCst)
    }
}

impl WindowSurface for MockWindow {
    fn framebuffer_size(&self) -> (u32, u32) {
        let minimized = self
            .zero_polls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if minimized {
            (0, 0)
        } else {
            *self.size.lock()
        }
    }

    fn wait_events(&self) {
        self.waits.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_signals_fence() {
        let device = MockDevice::new();
        unsafe {
            let fence = device.create_fence(false).unwrap();
            assert!(device.wait_for_fences(&[fence], 0).is_err());
            device
                .queue_submit(vk::Queue::from_raw(1), &[], fence)
                .unwrap();
            assert!(device.wait_for_fences(&[fence], 0).is_ok());
            device.reset_fences(&[fence]).unwrap();
            assert_eq!(device.fence_state(fence), Some(false));
        }
    }

    #[test]
    fn host_visible_buffers_are_mapped() {
        let device = MockDevice::new();
        let info = vk::BufferCreateInfo::default()
            .size(64)
            .usage(vk::BufferUsageFlags::TRANSFER_DST);
        unsafe {
            let mapped = device
                .create_buffer(&info, MemoryLocation::GpuToCpu, "readback")
                .unwrap();
            let local = device
                .create_buffer(&info, MemoryLocation::GpuOnly, "local")
                .unwrap();
            assert!(device.mapped_ptr(mapped).is_some());
            assert!(device.mapped_ptr(local).is_none());
        }
    }

    #[test]
    fn window_reports_zero_area_then_recovers() {
        let window = MockWindow::new(640, 480);
        window.minimize_for(2);
        assert_eq!(window.framebuffer_size(), (0, 0));
        assert_eq!(window.framebuffer_size(), (0, 0));
        assert_eq!(window.framebuffer_size(), (640, 480));
    }

    #[test]
    fn pool_capacity_is_enforced() {
        let device = MockDevice::new();
        let info = vk::DescriptorPoolCreateInfo::default().max_sets(1);
        unsafe {
            let pool = device.create_descriptor_pool(&info).unwrap();
            let layouts = [vk::DescriptorSetLayout::from_raw(9)];
            let alloc = vk::DescriptorSetAllocateInfo::default()
                .descriptor_pool(pool)
                .set_layouts(&layouts);
            assert!(device.allocate_descriptor_sets(&alloc).is_ok());
            assert!(matches!(
                device.allocate_descriptor_sets(&alloc),
                Err(GpuError::Vulkan(vk::Result::ERROR_OUT_OF_POOL_MEMORY))
            ));
        }
    }
}

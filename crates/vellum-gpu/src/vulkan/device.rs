//! [`RawDevice`] over `ash`.

use std::ptr::NonNull;

use ash::vk;
use gpu_allocator::MemoryLocation;

use super::VulkanDevice;
use crate::device::{DeviceInfo, RawDevice};
use crate::error::{api_failure, GpuError, Result};

#[allow(clippy::too_many_arguments)]
impl RawDevice for VulkanDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    // Memory-backed resources

    unsafe fn create_buffer(
        &self,
        info: &vk::BufferCreateInfo<'_>,
        location: MemoryLocation,
        name: &str,
    ) -> Result<vk::Buffer> {
        // SAFETY: forwarded from the caller
        unsafe { self.allocator().lock().create_buffer(info, location, name) }
    }

    unsafe fn destroy_buffer(&self, buffer: vk::Buffer) {
        // SAFETY: forwarded from the caller
        unsafe { self.allocator().lock().destroy_buffer(buffer) }
    }

    fn mapped_ptr(&self, buffer: vk::Buffer) -> Option<NonNull<u8>> {
        self.allocator().lock().mapped_ptr(buffer)
    }

    unsafe fn create_buffer_view(
        &self,
        info: &vk::BufferViewCreateInfo<'_>,
    ) -> Result<vk::BufferView> {
        // SAFETY: forwarded from the caller
        unsafe { self.device.create_buffer_view(info, None) }
            .map_err(|e| api_failure("vkCreateBufferView", e))
    }

    unsafe fn destroy_buffer_view(&self, view: vk::BufferView) {
        // SAFETY: forwarded from the caller
        unsafe { self.device.destroy_buffer_view(view, None) }
    }

    unsafe fn create_image(
        &self,
        info: &vk::ImageCreateInfo<'_>,
        location: MemoryLocation,
        name: &str,
    ) -> Result<vk::Image> {
        // SAFETY: forwarded from the caller
        unsafe { self.allocator().lock().create_image(info, location, name) }
    }

    unsafe fn destroy_image(&self, image: vk::Image) {
        // SAFETY: forwarded from the caller
        unsafe { self.allocator().lock().destroy_image(image) }
    }

    unsafe fn create_image_view(
        &self,
        info: &vk::ImageViewCreateInfo<'_>,
    ) -> Result<vk::ImageView> {
        // SAFETY: forwarded from the caller
        unsafe { self.device.create_image_view(info, None) }
            .map_err(|e| api_failure("vkCreateImageView", e))
    }

    unsafe fn destroy_image_view(&self, view: vk::ImageView) {
        // SAFETY: forwarded from the caller
        unsafe { self.device.destroy_image_view(view, None) }
    }

    unsafe fn create_sampler(&self, info: &vk::SamplerCreateInfo<'_>) -> Result<vk::Sampler> {
        // SAFETY: forwarded from the caller
        unsafe { self.device.create_sampler(info, None) }
            .map_err(|e| api_failure("vkCreateSampler", e))
    }

    unsafe fn destroy_sampler(&self, sampler: vk::Sampler) {
        // SAFETY: forwarded from the caller
        unsafe { self.device.destroy_sampler(sampler, None) }
    }

    // Shaders and pipelines

    unsafe fn create_shader_module(&self, code: &[u32]) -> Result<vk::ShaderModule> {
        let info = vk::ShaderModuleCreateInfo::default().code(code);
        // SAFETY: forwarded from the caller
        unsafe { self.device.create_shader_module(&info, None) }
            .map_err(|e| api_failure("vkCreateShaderModule", e))
    }

    unsafe fn destroy_shader_module(&self, module: vk::ShaderModule) {
        // SAFETY: forwarded from the caller
        unsafe { self.device.destroy_shader_module(module, None) }
    }

    unsafe fn create_pipeline_layout(
        &self,
        info: &vk::PipelineLayoutCreateInfo<'_>,
    ) -> Result<vk::PipelineLayout> {
        // SAFETY: forwarded from the caller
        unsafe { self.device.create_pipeline_layout(info, None) }
            .map_err(|e| api_failure("vkCreatePipelineLayout", e))
    }

    unsafe fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        // SAFETY: forwarded from the caller
        unsafe { self.device.destroy_pipeline_layout(layout, None) }
    }

    unsafe fn create_graphics_pipeline(
        &self,
        info: &vk::GraphicsPipelineCreateInfo<'_>,
    ) -> Result<vk::Pipeline> {
        // SAFETY: forwarded from the caller
        let pipelines = unsafe {
            self.device
                .create_graphics_pipelines(vk::PipelineCache::null(), std::slice::from_ref(info), None)
        }
        .map_err(|(_, e)| api_failure("vkCreateGraphicsPipelines", e))?;
        pipelines
            .into_iter()
            .next()
            .ok_or_else(|| GpuError::Other("no graphics pipeline created".to_string()))
    }

    unsafe fn create_compute_pipeline(
        &self,
        info: &vk::ComputePipelineCreateInfo<'_>,
    ) -> Result<vk::Pipeline> {
        // SAFETY: forwarded from the caller
        let pipelines = unsafe {
            self.device
                .create_compute_pipelines(vk::PipelineCache::null(), std::slice::from_ref(info), None)
        }
        .map_err(|(_, e)| api_failure("vkCreateComputePipelines", e))?;
        pipelines
            .into_iter()
            .next()
            .ok_or_else(|| GpuError::Other("no compute pipeline created".to_string()))
    }

    unsafe fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        // SAFETY: forwarded from the caller
        unsafe { self.device.destroy_pipeline(pipeline, None) }
    }

    // Descriptors

    unsafe fn create_descriptor_set_layout(
        &self,
        info: &vk::DescriptorSetLayoutCreateInfo<'_>,
    ) -> Result<vk::DescriptorSetLayout> {
        // SAFETY: forwarded from the caller
        unsafe { self.device.create_descriptor_set_layout(info, None) }
            .map_err(|e| api_failure("vkCreateDescriptorSetLayout", e))
    }

    unsafe fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        // SAFETY: forwarded from the caller
        unsafe { self.device.destroy_descriptor_set_layout(layout, None) }
    }

    unsafe fn create_descriptor_pool(
        &self,
        info: &vk::DescriptorPoolCreateInfo<'_>,
    ) -> Result<vk::DescriptorPool> {
        // SAFETY: forwarded from the caller
        unsafe { self.device.create_descriptor_pool(info, None) }
            .map_err(|e| api_failure("vkCreateDescriptorPool", e))
    }

    unsafe fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        // SAFETY: forwarded from the caller
        unsafe { self.device.destroy_descriptor_pool(pool, None) }
    }

    unsafe fn allocate_descriptor_sets(
        &self,
        info: &vk::DescriptorSetAllocateInfo<'_>,
    ) -> Result<Vec<vk::DescriptorSet>> {
        // SAFETY: forwarded from the caller
        unsafe { self.device.allocate_descriptor_sets(info) }.map_err(|e| match e {
            // Pool exhaustion is recoverable; not worth an error log.
            vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL => {
                GpuError::Vulkan(e)
            }
            e => api_failure("vkAllocateDescriptorSets", e),
        })
    }

    unsafe fn free_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        sets: &[vk::DescriptorSet],
    ) -> Result<()> {
        // SAFETY: forwarded from the caller
        unsafe { self.device.free_descriptor_sets(pool, sets) }
            .map_err(|e| api_failure("vkFreeDescriptorSets", e))
    }

    unsafe fn update_descriptor_sets(&self, writes: &[vk::WriteDescriptorSet<'_>]) {
        // SAFETY: forwarded from the caller
        unsafe { self.device.update_descriptor_sets(writes, &[]) }
    }

    // Render passes

    unsafe fn create_render_pass(
        &self,
        info: &vk::RenderPassCreateInfo<'_>,
    ) -> Result<vk::RenderPass> {
        // SAFETY: forwarded from the caller
        unsafe { self.device.create_render_pass(info, None) }
            .map_err(|e| api_failure("vkCreateRenderPass", e))
    }

    unsafe fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        // SAFETY: forwarded from the caller
        unsafe { self.device.destroy_render_pass(render_pass, None) }
    }

    unsafe fn create_framebuffer(
        &self,
        info: &vk::FramebufferCreateInfo<'_>,
    ) -> Result<vk::Framebuffer> {
        // SAFETY: forwarded from the caller
        unsafe { self.device.create_framebuffer(info, None) }
            .map_err(|e| api_failure("vkCreateFramebuffer", e))
    }

    unsafe fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        // SAFETY: forwarded from the caller
        unsafe { self.device.destroy_framebuffer(framebuffer, None) }
    }

    // Synchronization and queries

    unsafe fn create_fence(&self, signaled: bool) -> Result<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let info = vk::FenceCreateInfo::default().flags(flags);
        // SAFETY: forwarded from the caller
        unsafe { self.device.create_fence(&info, None) }.map_err(|e| api_failure("vkCreateFence", e))
    }

    unsafe fn destroy_fence(&self, fence: vk::Fence) {
        // SAFETY: forwarded from the caller
        unsafe { self.device.destroy_fence(fence, None) }
    }

    unsafe fn wait_for_fences(&self, fences: &[vk::Fence], timeout_ns: u64) -> Result<()> {
        // SAFETY: forwarded from the caller
        match unsafe { self.device.wait_for_fences(fences, true, timeout_ns) } {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => {
                tracing::error!("Fence wait timed out after {timeout_ns} ns");
                Err(GpuError::Timeout("fence"))
            }
            Err(e) => Err(api_failure("vkWaitForFences", e)),
        }
    }

    unsafe fn reset_fences(&self, fences: &[vk::Fence]) -> Result<()> {
        // SAFETY: forwarded from the caller
        unsafe { self.device.reset_fences(fences) }.map_err(|e| api_failure("vkResetFences", e))
    }

    unsafe fn fence_signaled(&self, fence: vk::Fence) -> Result<bool> {
        // SAFETY: forwarded from the caller
        unsafe { self.device.get_fence_status(fence) }
            .map_err(|e| api_failure("vkGetFenceStatus", e))
    }

    unsafe fn create_semaphore(&self) -> Result<vk::Semaphore> {
        let info = vk::SemaphoreCreateInfo::default();
        // SAFETY: forwarded from the caller
        unsafe { self.device.create_semaphore(&info, None) }
            .map_err(|e| api_failure("vkCreateSemaphore", e))
    }

    unsafe fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        // SAFETY: forwarded from the caller
        unsafe { self.device.destroy_semaphore(semaphore, None) }
    }

    unsafe fn create_query_pool(
        &self,
        info: &vk::QueryPoolCreateInfo<'_>,
    ) -> Result<vk::QueryPool> {
        // SAFETY: forwarded from the caller
        unsafe { self.device.create_query_pool(info, None) }
            .map_err(|e| api_failure("vkCreateQueryPool", e))
    }

    unsafe fn destroy_query_pool(&self, pool: vk::QueryPool) {
        // SAFETY: forwarded from the caller
        unsafe { self.device.destroy_query_pool(pool, None) }
    }

    unsafe fn query_pool_results(
        &self,
        pool: vk::QueryPool,
        first_query: u32,
        query_count: u32,
        data: &mut [u64],
        flags: vk::QueryResultFlags,
    ) -> Result<bool> {
        if query_count == 0 {
            return Ok(true);
        }
        // ash's wrapper assumes one value per query; statistics pools pack several.
        let values_per_query = data.len() / query_count as usize;
        let stride = (values_per_query * std::mem::size_of::<u64>()) as vk::DeviceSize;
        // SAFETY: data holds query_count strides of 64-bit values
        let result = unsafe {
            (self.device.fp_v1_0().get_query_pool_results)(
                self.device.handle(),
                pool,
                first_query,
                query_count,
                std::mem::size_of_val(data),
                data.as_mut_ptr().cast(),
                stride,
                flags | vk::QueryResultFlags::TYPE_64,
            )
        };
        match result {
            vk::Result::SUCCESS => Ok(true),
            vk::Result::NOT_READY => Ok(false),
            e => Err(api_failure("vkGetQueryPoolResults", e)),
        }
    }

    // Command pools and queues

    unsafe fn create_command_pool(
        &self,
        queue_family: u32,
        flags: vk::CommandPoolCreateFlags,
    ) -> Result<vk::CommandPool> {
        let info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(flags);
        // SAFETY: forwarded from the caller
        unsafe { self.device.create_command_pool(&info, None) }
            .map_err(|e| api_failure("vkCreateCommandPool", e))
    }

    unsafe fn destroy_command_pool(&self, pool: vk::CommandPool) {
        // SAFETY: forwarded from the caller
        unsafe { self.device.destroy_command_pool(pool, None) }
    }

    unsafe fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        level: vk::CommandBufferLevel,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>> {
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(level)
            .command_buffer_count(count);
        // SAFETY: forwarded from the caller
        unsafe { self.device.allocate_command_buffers(&info) }
            .map_err(|e| api_failure("vkAllocateCommandBuffers", e))
    }

    unsafe fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        // SAFETY: forwarded from the caller
        unsafe { self.device.free_command_buffers(pool, buffers) }
    }

    unsafe fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()> {
        // SAFETY: forwarded from the caller
        unsafe {
            self.device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
        }
        .map_err(|e| api_failure("vkResetCommandBuffer", e))
    }

    unsafe fn begin_command_buffer(
        &self,
        cmd: vk::CommandBuffer,
        flags: vk::CommandBufferUsageFlags,
    ) -> Result<()> {
        let info = vk::CommandBufferBeginInfo::default().flags(flags);
        // SAFETY: forwarded from the caller
        unsafe { self.device.begin_command_buffer(cmd, &info) }
            .map_err(|e| api_failure("vkBeginCommandBuffer", e))
    }

    unsafe fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()> {
        // SAFETY: forwarded from the caller
        unsafe { self.device.end_command_buffer(cmd) }
            .map_err(|e| api_failure("vkEndCommandBuffer", e))
    }

    unsafe fn get_queue(&self, queue_family: u32, index: u32) -> vk::Queue {
        // SAFETY: forwarded from the caller
        unsafe { self.device.get_device_queue(queue_family, index) }
    }

    unsafe fn queue_submit(
        &self,
        queue: vk::Queue,
        submits: &[vk::SubmitInfo<'_>],
        fence: vk::Fence,
    ) -> Result<()> {
        // SAFETY: forwarded from the caller
        unsafe { self.device.queue_submit(queue, submits, fence) }
            .map_err(|e| api_failure("vkQueueSubmit", e))
    }

    unsafe fn queue_wait_idle(&self, queue: vk::Queue) -> Result<()> {
        // SAFETY: forwarded from the caller
        unsafe { self.device.queue_wait_idle(queue) }
            .map_err(|e| api_failure("vkQueueWaitIdle", e))
    }

    unsafe fn device_wait_idle(&self) -> Result<()> {
        // SAFETY: forwarded from the caller
        unsafe { self.device.device_wait_idle() }
            .map_err(|e| api_failure("vkDeviceWaitIdle", e))
    }

    // Command recording

    unsafe fn cmd_pipeline_barrier2(
        &self,
        cmd: vk::CommandBuffer,
        dependency: &vk::DependencyInfo<'_>,
    ) {
        // SAFETY: forwarded from the caller
        unsafe { self.device.cmd_pipeline_barrier2(cmd, dependency) }
    }

    unsafe fn cmd_begin_render_pass(
        &self,
        cmd: vk::CommandBuffer,
        info: &vk::RenderPassBeginInfo<'_>,
        contents: vk::SubpassContents,
    ) {
        // SAFETY: forwarded from the caller
        unsafe { self.device.cmd_begin_render_pass(cmd, info, contents) }
    }

    unsafe fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer) {
        // SAFETY: forwarded from the caller
        unsafe { self.device.cmd_end_render_pass(cmd) }
    }

    unsafe fn cmd_begin_rendering(&self, cmd: vk::CommandBuffer, info: &vk::RenderingInfo<'_>) {
        // SAFETY: forwarded from the caller
        unsafe { self.device.cmd_begin_rendering(cmd, info) }
    }

    unsafe fn cmd_end_rendering(&self, cmd: vk::CommandBuffer) {
        // SAFETY: forwarded from the caller
        unsafe { self.device.cmd_end_rendering(cmd) }
    }

    unsafe fn cmd_bind_pipeline(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    ) {
        // SAFETY: forwarded from the caller
        unsafe { self.device.cmd_bind_pipeline(cmd, bind_point, pipeline) }
    }

    unsafe fn cmd_bind_descriptor_sets(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
        dynamic_offsets: &[u32],
    ) {
        // SAFETY: forwarded from the caller
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                cmd,
                bind_point,
                layout,
                first_set,
                sets,
                dynamic_offsets,
            );
        }
    }

    unsafe fn cmd_push_descriptor_set(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        set: u32,
        writes: &[vk::WriteDescriptorSet<'_>],
    ) {
        match self.push_descriptor_loader() {
            // SAFETY: forwarded from the caller
            Some(loader) => unsafe {
                loader.cmd_push_descriptor_set(cmd, bind_point, layout, set, writes);
            },
            None => tracing::error!("Push descriptor recorded without VK_KHR_push_descriptor"),
        }
    }

    unsafe fn cmd_push_constants(
        &self,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) {
        // SAFETY: forwarded from the caller
        unsafe { self.device.cmd_push_constants(cmd, layout, stages, offset, data) }
    }

    unsafe fn cmd_bind_vertex_buffers(
        &self,
        cmd: vk::CommandBuffer,
        first_binding: u32,
        buffers: &[vk::Buffer],
        offsets: &[vk::DeviceSize],
    ) {
        // SAFETY: forwarded from the caller
        unsafe {
            self.device
                .cmd_bind_vertex_buffers(cmd, first_binding, buffers, offsets);
        }
    }

    unsafe fn cmd_bind_index_buffer(
        &self,
        cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    ) {
        // SAFETY: forwarded from the caller
        unsafe {
            self.device
                .cmd_bind_index_buffer(cmd, buffer, offset, index_type);
        }
    }

    unsafe fn cmd_set_viewport(&self, cmd: vk::CommandBuffer, viewports: &[vk::Viewport]) {
        // SAFETY: forwarded from the caller
        unsafe { self.device.cmd_set_viewport(cmd, 0, viewports) }
    }

    unsafe fn cmd_set_scissor(&self, cmd: vk::CommandBuffer, scissors: &[vk::Rect2D]) {
        // SAFETY: forwarded from the caller
        unsafe { self.device.cmd_set_scissor(cmd, 0, scissors) }
    }

    unsafe fn cmd_draw(
        &self,
        cmd: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        // SAFETY: forwarded from the caller
        unsafe {
            self.device
                .cmd_draw(cmd, vertex_count, instance_count, first_vertex, first_instance);
        }
    }

    unsafe fn cmd_draw_indexed(
        &self,
        cmd: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        // SAFETY: forwarded from the caller
        unsafe {
            self.device.cmd_draw_indexed(
                cmd,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            );
        }
    }

    unsafe fn cmd_dispatch(&self, cmd: vk::CommandBuffer, x: u32, y: u32, z: u32) {
        // SAFETY: forwarded from the caller
        unsafe { self.device.cmd_dispatch(cmd, x, y, z) }
    }

    unsafe fn cmd_copy_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    ) {
        // SAFETY: forwarded from the caller
        unsafe { self.device.cmd_copy_buffer(cmd, src, dst, regions) }
    }

    unsafe fn cmd_copy_buffer_to_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    ) {
        // SAFETY: forwarded from the caller
        unsafe {
            self.device
                .cmd_copy_buffer_to_image(cmd, src, dst, dst_layout, regions);
        }
    }

    unsafe fn cmd_copy_image_to_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Buffer,
        regions: &[vk::BufferImageCopy],
    ) {
        // SAFETY: forwarded from the caller
        unsafe {
            self.device
                .cmd_copy_image_to_buffer(cmd, src, src_layout, dst, regions);
        }
    }

    unsafe fn cmd_clear_attachments(
        &self,
        cmd: vk::CommandBuffer,
        attachments: &[vk::ClearAttachment],
        rects: &[vk::ClearRect],
    ) {
        // SAFETY: forwarded from the caller
        unsafe { self.device.cmd_clear_attachments(cmd, attachments, rects) }
    }

    unsafe fn cmd_reset_query_pool(
        &self,
        cmd: vk::CommandBuffer,
        pool: vk::QueryPool,
        first_query: u32,
        count: u32,
    ) {
        // SAFETY: forwarded from the caller
        unsafe { self.device.cmd_reset_query_pool(cmd, pool, first_query, count) }
    }

    unsafe fn cmd_begin_query(
        &self,
        cmd: vk::CommandBuffer,
        pool: vk::QueryPool,
        query: u32,
        flags: vk::QueryControlFlags,
    ) {
        // SAFETY: forwarded from the caller
        unsafe { self.device.cmd_begin_query(cmd, pool, query, flags) }
    }

    unsafe fn cmd_end_query(&self, cmd: vk::CommandBuffer, pool: vk::QueryPool, query: u32) {
        // SAFETY: forwarded from the caller
        unsafe { self.device.cmd_end_query(cmd, pool, query) }
    }

    unsafe fn cmd_write_timestamp2(
        &self,
        cmd: vk::CommandBuffer,
        stage: vk::PipelineStageFlags2,
        pool: vk::QueryPool,
        query: u32,
    ) {
        // SAFETY: forwarded from the caller
        unsafe { self.device.cmd_write_timestamp2(cmd, stage, pool, query) }
    }
}

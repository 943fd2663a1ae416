//! Shader modules, pipeline layouts and pipelines.

use std::ffi::CStr;
use std::sync::Arc;

use ash::vk;

use crate::descriptor::DescriptorSetLayout;
use crate::device::RenderDevice;
use crate::error::{GpuError, Result};
use crate::object::{DeviceObject, Native};
use crate::render_pass::{RenderPass, MAX_RENDER_TARGETS};

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// A SPIR-V shader module.
pub struct ShaderModule {
    device: Arc<RenderDevice>,
    handle: Native<vk::ShaderModule>,
}

impl ShaderModule {
    /// Create from SPIR-V words.
    pub fn create(device: &Arc<RenderDevice>, code: Vec<u32>) -> Result<Arc<Self>> {
        crate::object::create::<Self>(device, code).map(Arc::new)
    }

    /// Create from SPIR-V bytes, e.g. an `include_bytes!` blob.
    pub fn from_bytes(device: &Arc<RenderDevice>, bytes: &[u8]) -> Result<Arc<Self>> {
        let code = ash::util::read_spv(&mut std::io::Cursor::new(bytes))
            .map_err(|e| GpuError::InvalidConfig(format!("invalid SPIR-V: {e}")))?;
        Self::create(device, code)
    }

    pub fn handle(&self) -> vk::ShaderModule {
        self.handle.raw()
    }
}

impl DeviceObject for ShaderModule {
    type Desc = Vec<u32>;
    const KIND: &'static str = "ShaderModule";

    fn validate(_device: &RenderDevice, code: &Vec<u32>) -> Result<()> {
        if code.first() != Some(&SPIRV_MAGIC) {
            return Err(GpuError::InvalidConfig(
                "shader code is missing the SPIR-V magic number".to_string(),
            ));
        }
        Ok(())
    }

    unsafe fn create_api_objects(device: &Arc<RenderDevice>, code: Vec<u32>) -> Result<Self> {
        // SAFETY: forwarded from the caller
        let module = unsafe { device.raw().create_shader_module(&code)? };
        Ok(Self {
            device: device.clone(),
            handle: Native::Owned(module),
        })
    }

    unsafe fn destroy_api_objects(&mut self) {
        if let Some(module) = self.handle.destroyable() {
            // SAFETY: forwarded from the caller
            unsafe { self.device.raw().destroy_shader_module(module) };
        }
        self.handle = Native::Borrowed(vk::ShaderModule::null());
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        // SAFETY: pipelines do not reference modules after creation
        unsafe { self.destroy_api_objects() };
        self.device.registry().release(Self::KIND);
    }
}

/// Pipeline layout creation parameters.
#[derive(Clone, Default)]
pub struct PipelineLayoutDesc {
    /// Set layouts by set index.
    pub set_layouts: Vec<Arc<DescriptorSetLayout>>,
    pub push_constant_ranges: Vec<vk::PushConstantRange>,
}

/// The interface between pipelines and bound resources.
pub struct PipelineLayout {
    device: Arc<RenderDevice>,
    handle: Native<vk::PipelineLayout>,
    set_layouts: Vec<Arc<DescriptorSetLayout>>,
    push_constant_ranges: Vec<vk::PushConstantRange>,
}

impl PipelineLayout {
    pub fn create(device: &Arc<RenderDevice>, desc: PipelineLayoutDesc) -> Result<Arc<Self>> {
        crate::object::create::<Self>(device, desc).map(Arc::new)
    }

    pub fn handle(&self) -> vk::PipelineLayout {
        self.handle.raw()
    }

    /// Set layout at a set index.
    pub fn set_layout(&self, set: u32) -> Option<&Arc<DescriptorSetLayout>> {
        self.set_layouts.get(set as usize)
    }

    pub fn set_count(&self) -> u32 {
        self.set_layouts.len() as u32
    }

    pub fn push_constant_ranges(&self) -> &[vk::PushConstantRange] {
        &self.push_constant_ranges
    }
}

impl DeviceObject for PipelineLayout {
    type Desc = PipelineLayoutDesc;
    const KIND: &'static str = "PipelineLayout";

    fn validate(device: &RenderDevice, desc: &PipelineLayoutDesc) -> Result<()> {
        let limits = device.info().limits;

        if desc.set_layouts.len() > limits.max_bound_descriptor_sets as usize {
            return Err(GpuError::LimitExceeded(format!(
                "{} descriptor sets, device binds at most {}",
                desc.set_layouts.len(),
                limits.max_bound_descriptor_sets
            )));
        }
        if desc.set_layouts.iter().filter(|l| l.is_pushable()).count() > 1 {
            return Err(GpuError::InvalidConfig(
                "a pipeline layout may hold one pushable set layout".to_string(),
            ));
        }
        for range in &desc.push_constant_ranges {
            if range.offset % 4 != 0 || range.size == 0 || range.size % 4 != 0 {
                return Err(GpuError::InvalidConfig(format!(
                    "push constant range {}+{} not 4-byte aligned",
                    range.offset, range.size
                )));
            }
            if range.offset + range.size > limits.max_push_constants_size {
                return Err(GpuError::LimitExceeded(format!(
                    "push constants end at {}, device allows {}",
                    range.offset + range.size,
                    limits.max_push_constants_size
                )));
            }
        }
        Ok(())
    }

    unsafe fn create_api_objects(device: &Arc<RenderDevice>, desc: PipelineLayoutDesc) -> Result<Self> {
        let set_layouts: Vec<vk::DescriptorSetLayout> =
            desc.set_layouts.iter().map(|l| l.handle()).collect();
        let info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&desc.push_constant_ranges);
        // SAFETY: forwarded from the caller
        let layout = unsafe { device.raw().create_pipeline_layout(&info)? };

        Ok(Self {
            device: device.clone(),
            handle: Native::Owned(layout),
            set_layouts: desc.set_layouts,
            push_constant_ranges: desc.push_constant_ranges,
        })
    }

    unsafe fn destroy_api_objects(&mut self) {
        if let Some(layout) = self.handle.destroyable() {
            // SAFETY: forwarded from the caller
            unsafe { self.device.raw().destroy_pipeline_layout(layout) };
        }
        self.handle = Native::Borrowed(vk::PipelineLayout::null());
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        // SAFETY: pipelines hold an Arc to their layout
        unsafe { self.destroy_api_objects() };
        self.device.registry().release(Self::KIND);
    }
}

/// What a graphics pipeline renders into.
#[derive(Debug, Clone)]
pub enum PipelineTarget {
    /// Subpass 0 of a compatible render pass.
    RenderPass {
        render_pass: vk::RenderPass,
        color_count: u32,
        samples: vk::SampleCountFlags,
    },
    /// Dynamic rendering with the given attachment formats.
    Dynamic {
        color_formats: Vec<vk::Format>,
        depth_format: Option<vk::Format>,
        stencil_format: Option<vk::Format>,
        samples: vk::SampleCountFlags,
    },
}

impl PipelineTarget {
    /// Target a render pass.
    pub fn render_pass(render_pass: &RenderPass) -> Self {
        Self::RenderPass {
            render_pass: render_pass.handle(),
            color_count: render_pass.render_target_count() as u32,
            samples: render_pass.samples(),
        }
    }

    fn color_count(&self) -> usize {
        match self {
            Self::RenderPass { color_count, .. } => *color_count as usize,
            Self::Dynamic { color_formats, .. } => color_formats.len(),
        }
    }

    fn samples(&self) -> vk::SampleCountFlags {
        match self {
            Self::RenderPass { samples, .. } | Self::Dynamic { samples, .. } => *samples,
        }
    }
}

/// Graphics pipeline configuration.
#[derive(Clone)]
pub struct GraphicsPipelineDesc {
    pub layout: Arc<PipelineLayout>,
    pub vertex_shader: Arc<ShaderModule>,
    pub fragment_shader: Option<Arc<ShaderModule>>,
    pub entry_point: &'static CStr,
    pub vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    pub vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    pub topology: vk::PrimitiveTopology,
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare_op: vk::CompareOp,
    pub alpha_blend: bool,
    pub target: PipelineTarget,
}

impl GraphicsPipelineDesc {
    /// Opaque triangles with back-face culling and depth testing.
    pub fn new(
        layout: Arc<PipelineLayout>,
        vertex_shader: Arc<ShaderModule>,
        fragment_shader: Option<Arc<ShaderModule>>,
        target: PipelineTarget,
    ) -> Self {
        Self {
            layout,
            vertex_shader,
            fragment_shader,
            entry_point: c"main",
            vertex_bindings: Vec::new(),
            vertex_attributes: Vec::new(),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            depth_test: true,
            depth_write: true,
            depth_compare_op: vk::CompareOp::LESS,
            alpha_blend: false,
            target,
        }
    }
}

/// Graphics pipeline wrapper.
pub struct GraphicsPipeline {
    device: Arc<RenderDevice>,
    handle: Native<vk::Pipeline>,
    layout: Arc<PipelineLayout>,
}

impl GraphicsPipeline {
    pub fn create(device: &Arc<RenderDevice>, desc: GraphicsPipelineDesc) -> Result<Self> {
        crate::object::create(device, desc)
    }

    pub fn handle(&self) -> vk::Pipeline {
        self.handle.raw()
    }

    pub fn layout(&self) -> &Arc<PipelineLayout> {
        &self.layout
    }
}

impl DeviceObject for GraphicsPipeline {
    type Desc = GraphicsPipelineDesc;
    const KIND: &'static str = "GraphicsPipeline";

    fn validate(device: &RenderDevice, desc: &GraphicsPipelineDesc) -> Result<()> {
        if desc.target.color_count() > MAX_RENDER_TARGETS {
            return Err(GpuError::LimitExceeded(format!(
                "{} color targets, at most {MAX_RENDER_TARGETS}",
                desc.target.color_count()
            )));
        }
        if let PipelineTarget::Dynamic { .. } = desc.target {
            if !device.info().features.dynamic_rendering {
                return Err(GpuError::ExtensionNotSupported(
                    "dynamic rendering".to_string(),
                ));
            }
        }
        for attribute in &desc.vertex_attributes {
            if !desc
                .vertex_bindings
                .iter()
                .any(|b| b.binding == attribute.binding)
            {
                return Err(GpuError::InvalidConfig(format!(
                    "vertex attribute {} reads undeclared binding {}",
                    attribute.location, attribute.binding
                )));
            }
        }
        Ok(())
    }

    unsafe fn create_api_objects(device: &Arc<RenderDevice>, desc: GraphicsPipelineDesc) -> Result<Self> {
        let mut shader_stages = vec![vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(desc.vertex_shader.handle())
            .name(desc.entry_point)];
        if let Some(fragment) = &desc.fragment_shader {
            shader_stages.push(
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(vk::ShaderStageFlags::FRAGMENT)
                    .module(fragment.handle())
                    .name(desc.entry_point),
            );
        }

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&desc.vertex_bindings)
            .vertex_attribute_descriptions(&desc.vertex_attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(desc.topology)
            .primitive_restart_enable(false);

        // Viewport and scissor are dynamic
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(desc.polygon_mode)
            .cull_mode(desc.cull_mode)
            .front_face(desc.front_face)
            .line_width(1.0);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(desc.target.samples());

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(desc.depth_test)
            .depth_write_enable(desc.depth_write)
            .depth_compare_op(desc.depth_compare_op);

        let blend_attachment = if desc.alpha_blend {
            vk::PipelineColorBlendAttachmentState::default()
                .blend_enable(true)
                .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
                .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                .color_blend_op(vk::BlendOp::ADD)
                .src_alpha_blend_factor(vk::BlendFactor::ONE)
                .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
                .alpha_blend_op(vk::BlendOp::ADD)
                .color_write_mask(vk::ColorComponentFlags::RGBA)
        } else {
            vk::PipelineColorBlendAttachmentState::default()
                .color_write_mask(vk::ColorComponentFlags::RGBA)
        };
        let color_blend_attachments = vec![blend_attachment; desc.target.color_count()];
        let color_blending =
            vk::PipelineColorBlendStateCreateInfo::default().attachments(&color_blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let mut info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(desc.layout.handle());

        let mut rendering_info;
        match &desc.target {
            PipelineTarget::RenderPass { render_pass, .. } => {
                info = info.render_pass(*render_pass).subpass(0);
            }
            PipelineTarget::Dynamic {
                color_formats,
                depth_format,
                stencil_format,
                ..
            } => {
                rendering_info = vk::PipelineRenderingCreateInfo::default()
                    .color_attachment_formats(color_formats)
                    .depth_attachment_format(depth_format.unwrap_or(vk::Format::UNDEFINED))
                    .stencil_attachment_format(stencil_format.unwrap_or(vk::Format::UNDEFINED));
                info = info.push_next(&mut rendering_info);
            }
        }

        // SAFETY: forwarded from the caller
        let pipeline = unsafe { device.raw().create_graphics_pipeline(&info)? };

        Ok(Self {
            device: device.clone(),
            handle: Native::Owned(pipeline),
            layout: desc.layout,
        })
    }

    unsafe fn destroy_api_objects(&mut self) {
        if let Some(pipeline) = self.handle.destroyable() {
            // SAFETY: forwarded from the caller
            unsafe { self.device.raw().destroy_pipeline(pipeline) };
        }
        self.handle = Native::Borrowed(vk::Pipeline::null());
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        // SAFETY: the owner guarantees no pending command buffer binds this pipeline
        unsafe { self.destroy_api_objects() };
        self.device.registry().release(Self::KIND);
    }
}

/// Compute pipeline configuration.
#[derive(Clone)]
pub struct ComputePipelineDesc {
    pub layout: Arc<PipelineLayout>,
    pub shader: Arc<ShaderModule>,
    pub entry_point: &'static CStr,
}

impl ComputePipelineDesc {
    pub fn new(layout: Arc<PipelineLayout>, shader: Arc<ShaderModule>) -> Self {
        Self {
            layout,
            shader,
            entry_point: c"main",
        }
    }
}

/// Compute pipeline wrapper.
pub struct ComputePipeline {
    device: Arc<RenderDevice>,
    handle: Native<vk::Pipeline>,
    layout: Arc<PipelineLayout>,
}

impl ComputePipeline {
    pub fn create(device: &Arc<RenderDevice>, desc: ComputePipelineDesc) -> Result<Self> {
        crate::object::create(device, desc)
    }

    pub fn handle(&self) -> vk::Pipeline {
        self.handle.raw()
    }

    pub fn layout(&self) -> &Arc<PipelineLayout> {
        &self.layout
    }
}

impl DeviceObject for ComputePipeline {
    type Desc = ComputePipelineDesc;
    const KIND: &'static str = "ComputePipeline";

    fn validate(_device: &RenderDevice, _desc: &ComputePipelineDesc) -> Result<()> {
        Ok(())
    }

    unsafe fn create_api_objects(device: &Arc<RenderDevice>, desc: ComputePipelineDesc) -> Result<Self> {
        let stage_info = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(desc.shader.handle())
            .name(desc.entry_point);

        let info = vk::ComputePipelineCreateInfo::default()
            .stage(stage_info)
            .layout(desc.layout.handle());
        // SAFETY: forwarded from the caller
        let pipeline = unsafe { device.raw().create_compute_pipeline(&info)? };

        Ok(Self {
            device: device.clone(),
            handle: Native::Owned(pipeline),
            layout: desc.layout,
        })
    }

    unsafe fn destroy_api_objects(&mut self) {
        if let Some(pipeline) = self.handle.destroyable() {
            // SAFETY: forwarded from the caller
            unsafe { self.device.raw().destroy_pipeline(pipeline) };
        }
        self.handle = Native::Borrowed(vk::Pipeline::null());
    }
}

impl Drop for ComputePipeline {
    fn drop(&mut self) {
        // SAFETY: the owner guarantees no pending command buffer binds this pipeline
        unsafe { self.destroy_api_objects() };
        self.device.registry().release(Self::KIND);
    }
}

//! Render passes.
//!
//! A [`RenderPass`] owns a native render pass and framebuffer over a shared set of
//! [`RenderPassAttachments`]. Attachments come from one of three sources:
//!
//! - existing views, whose format and sample count describe the attachments;
//! - formats only, in which case images and views are allocated and owned here;
//! - existing images, from which attachment views are derived and owned here.
//!
//! Any clear load op makes the pass require clear values at begin time, see
//! [`RenderPass::clear_value_count`].

mod draw_pass;
mod dynamic;

pub use draw_pass::{enumerate_variants, DepthVariantInfo, DrawPass, DrawPassDesc};
pub use dynamic::{RenderingAttachment, RenderingInfo};

use std::sync::Arc;

use ash::vk;
use bitflags::bitflags;

use crate::device::RenderDevice;
use crate::error::{fatal, GpuError, Result};
use crate::format;
use crate::image::{Image, ImageDesc, ImageView, ImageViewDesc};
use crate::object::{DeviceObject, Native};
use crate::state::ResourceState;

/// Color attachments one pass can hold.
pub const MAX_RENDER_TARGETS: usize = 8;

bitflags! {
    /// Attachments a draw pass variant clears on load.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ClearFlags: u8 {
        const RENDER_TARGETS = 1;
        const DEPTH = 2;
        const STENCIL = 4;
    }
}

/// Value an attachment is cleared to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClearValue {
    Color([f32; 4]),
    DepthStencil { depth: f32, stencil: u32 },
}

impl ClearValue {
    pub fn to_vk(self) -> vk::ClearValue {
        match self {
            Self::Color(float32) => vk::ClearValue {
                color: vk::ClearColorValue { float32 },
            },
            Self::DepthStencil { depth, stencil } => vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth, stencil },
            },
        }
    }
}

/// Load/store behavior and state transitions of a color attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorAttachmentDesc {
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    /// State the image is in when the pass begins.
    pub initial_state: ResourceState,
    /// State the pass leaves the image in.
    pub final_state: ResourceState,
}

impl Default for ColorAttachmentDesc {
    fn default() -> Self {
        Self {
            load_op: vk::AttachmentLoadOp::LOAD,
            store_op: vk::AttachmentStoreOp::STORE,
            initial_state: ResourceState::RenderTarget,
            final_state: ResourceState::RenderTarget,
        }
    }
}

impl ColorAttachmentDesc {
    /// Clear on load, discarding previous contents.
    pub fn clear(final_state: ResourceState) -> Self {
        Self {
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            initial_state: ResourceState::Undefined,
            final_state,
        }
    }
}

/// Load/store behavior and states of the depth/stencil attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthAttachmentDesc {
    pub depth_load_op: vk::AttachmentLoadOp,
    pub depth_store_op: vk::AttachmentStoreOp,
    pub stencil_load_op: vk::AttachmentLoadOp,
    pub stencil_store_op: vk::AttachmentStoreOp,
    /// Access during the pass; read-only variants select read-only layouts.
    pub state: ResourceState,
    pub initial_state: ResourceState,
    pub final_state: ResourceState,
}

impl Default for DepthAttachmentDesc {
    fn default() -> Self {
        Self {
            depth_load_op: vk::AttachmentLoadOp::LOAD,
            depth_store_op: vk::AttachmentStoreOp::STORE,
            stencil_load_op: vk::AttachmentLoadOp::LOAD,
            stencil_store_op: vk::AttachmentStoreOp::STORE,
            state: ResourceState::DepthStencilWrite,
            initial_state: ResourceState::DepthStencilWrite,
            final_state: ResourceState::DepthStencilWrite,
        }
    }
}

impl DepthAttachmentDesc {
    /// Writable depth/stencil cleared on load.
    pub fn clear() -> Self {
        Self {
            depth_load_op: vk::AttachmentLoadOp::CLEAR,
            stencil_load_op: vk::AttachmentLoadOp::CLEAR,
            initial_state: ResourceState::Undefined,
            ..Self::default()
        }
    }

    /// Read-only depth and stencil, loaded.
    pub fn read_only() -> Self {
        Self {
            depth_store_op: vk::AttachmentStoreOp::NONE,
            stencil_store_op: vk::AttachmentStoreOp::NONE,
            state: ResourceState::DepthStencilRead,
            initial_state: ResourceState::DepthStencilRead,
            final_state: ResourceState::DepthStencilRead,
            ..Self::default()
        }
    }

    /// Aspect that is cleared although its state forbids writes.
    pub(super) fn clears_read_only_aspect(&self) -> Option<&'static str> {
        if self.state.is_depth_read_only() && self.depth_load_op == vk::AttachmentLoadOp::CLEAR {
            return Some("depth");
        }
        if self.state.is_stencil_read_only() && self.stencil_load_op == vk::AttachmentLoadOp::CLEAR
        {
            return Some("stencil");
        }
        None
    }
}

/// Format and extra usage of an attachment allocated by the pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetFormat {
    pub format: vk::Format,
    /// Usage beyond the attachment bit, e.g. `SAMPLED` to read the result later.
    pub usage: vk::ImageUsageFlags,
}

impl TargetFormat {
    pub fn new(format: vk::Format) -> Self {
        Self {
            format,
            usage: vk::ImageUsageFlags::empty(),
        }
    }

    pub fn with_usage(mut self, usage: vk::ImageUsageFlags) -> Self {
        self.usage = usage;
        self
    }
}

/// Where a pass's attachments come from.
#[derive(Clone)]
pub enum RenderPassSource {
    /// Existing views.
    Views {
        render_targets: Vec<Arc<ImageView>>,
        depth_stencil: Option<Arc<ImageView>>,
    },
    /// Formats only; images and views are allocated and owned by the attachments.
    Formats {
        extent: vk::Extent2D,
        samples: vk::SampleCountFlags,
        render_targets: Vec<TargetFormat>,
        depth_stencil: Option<TargetFormat>,
    },
    /// Existing images; attachment views are derived and owned by the attachments.
    Images {
        render_targets: Vec<Arc<Image>>,
        depth_stencil: Option<Arc<Image>>,
    },
    /// Attachments already built, shared with other passes.
    Shared(Arc<RenderPassAttachments>),
}

impl RenderPassSource {
    fn render_target_count(&self) -> usize {
        match self {
            Self::Views { render_targets, .. } => render_targets.len(),
            Self::Formats { render_targets, .. } => render_targets.len(),
            Self::Images { render_targets, .. } => render_targets.len(),
            Self::Shared(attachments) => attachments.render_targets.len(),
        }
    }

    fn has_depth_stencil(&self) -> bool {
        match self {
            Self::Views { depth_stencil, .. } => depth_stencil.is_some(),
            Self::Formats { depth_stencil, .. } => depth_stencil.is_some(),
            Self::Images { depth_stencil, .. } => depth_stencil.is_some(),
            Self::Shared(attachments) => attachments.depth_stencil.is_some(),
        }
    }

    fn depth_format(&self) -> Option<vk::Format> {
        match self {
            Self::Views { depth_stencil, .. } => depth_stencil.as_ref().map(|v| v.format()),
            Self::Formats { depth_stencil, .. } => depth_stencil.map(|t| t.format),
            Self::Images { depth_stencil, .. } => depth_stencil.as_ref().map(|i| i.format()),
            Self::Shared(attachments) => attachments.depth_stencil.as_ref().map(|v| v.format()),
        }
    }
}

/// The views a pass renders into.
///
/// Views are dropped before the images they reference, and images allocated for
/// [`RenderPassSource::Formats`] live exactly as long as their views.
pub struct RenderPassAttachments {
    render_targets: Vec<Arc<ImageView>>,
    depth_stencil: Option<Arc<ImageView>>,
    extent: vk::Extent2D,
    samples: vk::SampleCountFlags,
}

impl RenderPassAttachments {
    /// Resolve a source into views, allocating what the source does not provide.
    pub fn from_source(device: &Arc<RenderDevice>, source: RenderPassSource) -> Result<Arc<Self>> {
        let (render_targets, depth_stencil) = match source {
            RenderPassSource::Shared(attachments) => return Ok(attachments),
            RenderPassSource::Views {
                render_targets,
                depth_stencil,
            } => (render_targets, depth_stencil),
            RenderPassSource::Images {
                render_targets,
                depth_stencil,
            } => {
                let views = render_targets
                    .into_iter()
                    .map(|image| {
                        ImageView::create(device, ImageViewDesc::attachment(image)).map(Arc::new)
                    })
                    .collect::<Result<Vec<_>>>()?;
                let depth = depth_stencil
                    .map(|image| {
                        ImageView::create(device, ImageViewDesc::attachment(image)).map(Arc::new)
                    })
                    .transpose()?;
                (views, depth)
            }
            RenderPassSource::Formats {
                extent,
                samples,
                render_targets,
                depth_stencil,
            } => {
                let allocate = |target: TargetFormat, attachment_usage, name: String| {
                    let desc = ImageDesc::new_2d(
                        extent.width,
                        extent.height,
                        target.format,
                        attachment_usage | target.usage,
                    )
                    .with_samples(samples)
                    .with_name(name);
                    let image = Arc::new(Image::create(device, desc)?);
                    ImageView::create(device, ImageViewDesc::attachment(image)).map(Arc::new)
                };

                let views = render_targets
                    .into_iter()
                    .enumerate()
                    .map(|(i, target)| {
                        allocate(
                            target,
                            vk::ImageUsageFlags::COLOR_ATTACHMENT,
                            format!("render target {i}"),
                        )
                    })
                    .collect::<Result<Vec<_>>>()?;
                let depth = depth_stencil
                    .map(|target| {
                        allocate(
                            target,
                            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
                            "depth stencil".to_string(),
                        )
                    })
                    .transpose()?;
                (views, depth)
            }
        };

        Self::new(device, render_targets, depth_stencil).map(Arc::new)
    }

    fn new(
        device: &RenderDevice,
        render_targets: Vec<Arc<ImageView>>,
        depth_stencil: Option<Arc<ImageView>>,
    ) -> Result<Self> {
        let max = MAX_RENDER_TARGETS.min(device.info().limits.max_color_attachments as usize);
        if render_targets.len() > max {
            return Err(GpuError::LimitExceeded(format!(
                "{} render targets, at most {max}",
                render_targets.len()
            )));
        }

        let mut all = render_targets.iter().chain(depth_stencil.iter());
        let first = all
            .next()
            .ok_or_else(|| GpuError::InvalidConfig("render pass without attachments".to_string()))?;
        let extent = first.extent();
        let samples = first.samples();

        for view in render_targets.iter().chain(depth_stencil.iter()) {
            if view.extent() != extent {
                return Err(GpuError::InvalidConfig(format!(
                    "attachment extent {:?} differs from {extent:?}",
                    view.extent()
                )));
            }
            if view.samples() != samples {
                return Err(GpuError::InvalidConfig(
                    "attachments disagree on sample count".to_string(),
                ));
            }
        }
        if let Some(view) = render_targets.iter().find(|v| format::is_depth_stencil(v.format())) {
            return Err(GpuError::InvalidConfig(format!(
                "{:?} cannot be a render target",
                view.format()
            )));
        }
        if let Some(view) = &depth_stencil {
            if !format::is_depth_stencil(view.format()) {
                return Err(GpuError::InvalidConfig(format!(
                    "{:?} cannot be a depth/stencil attachment",
                    view.format()
                )));
            }
        }

        Ok(Self {
            render_targets,
            depth_stencil,
            extent,
            samples,
        })
    }

    pub fn render_targets(&self) -> &[Arc<ImageView>] {
        &self.render_targets
    }

    pub fn depth_stencil(&self) -> Option<&Arc<ImageView>> {
        self.depth_stencil.as_ref()
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn samples(&self) -> vk::SampleCountFlags {
        self.samples
    }
}

/// Render pass creation parameters.
#[derive(Clone)]
pub struct RenderPassDesc {
    pub source: RenderPassSource,
    /// One entry per render target, in order.
    pub render_targets: Vec<ColorAttachmentDesc>,
    /// Required exactly when the source has a depth/stencil attachment.
    pub depth_stencil: Option<DepthAttachmentDesc>,
    pub name: String,
}

/// A native render pass with its framebuffer.
pub struct RenderPass {
    device: Arc<RenderDevice>,
    handle: Native<vk::RenderPass>,
    framebuffer: Native<vk::Framebuffer>,
    attachments: Arc<RenderPassAttachments>,
    color_ops: Vec<ColorAttachmentDesc>,
    depth_ops: Option<DepthAttachmentDesc>,
    clear_value_count: usize,
    name: String,
}

/// Everything needed to begin a render pass.
pub struct RenderPassBeginInfo<'a> {
    pub render_pass: &'a RenderPass,
    pub render_area: vk::Rect2D,
    /// Indexed like the attachments: render targets, then depth/stencil.
    pub clear_values: Vec<ClearValue>,
}

impl RenderPass {
    pub fn create(device: &Arc<RenderDevice>, desc: RenderPassDesc) -> Result<Self> {
        crate::object::create(device, desc)
    }

    pub fn handle(&self) -> vk::RenderPass {
        self.handle.raw()
    }

    pub fn framebuffer(&self) -> vk::Framebuffer {
        self.framebuffer.raw()
    }

    pub fn attachments(&self) -> &Arc<RenderPassAttachments> {
        &self.attachments
    }

    pub fn render_target_count(&self) -> usize {
        self.attachments.render_targets.len()
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.attachments.extent
    }

    pub fn samples(&self) -> vk::SampleCountFlags {
        self.attachments.samples
    }

    pub fn color_ops(&self) -> &[ColorAttachmentDesc] {
        &self.color_ops
    }

    pub fn depth_ops(&self) -> Option<&DepthAttachmentDesc> {
        self.depth_ops.as_ref()
    }

    /// Whether any attachment clears on load.
    pub fn has_load_op_clear(&self) -> bool {
        self.clear_value_count > 0
    }

    /// Minimum number of clear values a begin must supply.
    pub fn clear_value_count(&self) -> usize {
        self.clear_value_count
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Begin info covering the whole framebuffer.
    pub fn begin_info(&self, clear_values: Vec<ClearValue>) -> RenderPassBeginInfo<'_> {
        RenderPassBeginInfo {
            render_pass: self,
            render_area: vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent: self.extent(),
            },
            clear_values,
        }
    }
}

/// One past the highest attachment index with a clear load op; zero without clears.
pub fn clear_value_count(
    color_ops: &[ColorAttachmentDesc],
    depth_ops: Option<&DepthAttachmentDesc>,
) -> usize {
    let depth_clears = depth_ops.is_some_and(|d| {
        d.depth_load_op == vk::AttachmentLoadOp::CLEAR
            || d.stencil_load_op == vk::AttachmentLoadOp::CLEAR
    });
    if depth_clears {
        return color_ops.len() + 1;
    }
    color_ops
        .iter()
        .rposition(|c| c.load_op == vk::AttachmentLoadOp::CLEAR)
        .map_or(0, |i| i + 1)
}

impl DeviceObject for RenderPass {
    type Desc = RenderPassDesc;
    const KIND: &'static str = "RenderPass";

    fn validate(_device: &RenderDevice, desc: &RenderPassDesc) -> Result<()> {
        let target_count = desc.source.render_target_count();
        if target_count > MAX_RENDER_TARGETS {
            return Err(GpuError::LimitExceeded(format!(
                "render pass {}: {target_count} render targets, at most {MAX_RENDER_TARGETS}",
                desc.name
            )));
        }
        if desc.render_targets.len() != target_count {
            return Err(GpuError::InvalidConfig(format!(
                "render pass {}: {} attachment descriptions for {target_count} render targets",
                desc.name,
                desc.render_targets.len()
            )));
        }
        if desc.depth_stencil.is_some() != desc.source.has_depth_stencil() {
            return Err(GpuError::InvalidConfig(format!(
                "render pass {}: depth description and depth attachment must come together",
                desc.name
            )));
        }

        for color in &desc.render_targets {
            if color.final_state == ResourceState::Undefined
                || color.final_state.is_buffer_only()
                || color.initial_state.is_buffer_only()
                || color.initial_state.is_depth_stencil()
                || color.final_state.is_depth_stencil()
            {
                return Err(GpuError::InvalidConfig(format!(
                    "render pass {}: invalid render target states {:?} -> {:?}",
                    desc.name, color.initial_state, color.final_state
                )));
            }
        }

        if let Some(depth) = &desc.depth_stencil {
            if !depth.state.is_depth_stencil() {
                return Err(GpuError::InvalidConfig(format!(
                    "render pass {}: {:?} is not a depth/stencil state",
                    desc.name, depth.state
                )));
            }
            if depth.final_state == ResourceState::Undefined || depth.final_state.is_buffer_only() {
                return Err(GpuError::InvalidConfig(format!(
                    "render pass {}: invalid depth final state {:?}",
                    desc.name, depth.final_state
                )));
            }
            if let Some(aspect) = depth.clears_read_only_aspect() {
                fatal(format!(
                    "render pass {}: read-only {aspect} state {:?} cannot be cleared",
                    desc.name, depth.state
                ));
            }
            let stencil = desc.source.depth_format().is_some_and(format::has_stencil);
            if !stencil && depth.stencil_load_op == vk::AttachmentLoadOp::CLEAR {
                tracing::debug!(
                    "Render pass {}: stencil clear on a format without stencil is ignored",
                    desc.name
                );
            }
        }
        Ok(())
    }

    unsafe fn create_api_objects(device: &Arc<RenderDevice>, desc: RenderPassDesc) -> Result<Self> {
        let attachments = RenderPassAttachments::from_source(device, desc.source)?;
        let samples = attachments.samples;

        let mut descriptions = Vec::with_capacity(MAX_RENDER_TARGETS + 1);
        let mut color_refs = Vec::with_capacity(MAX_RENDER_TARGETS);
        for (i, (view, ops)) in attachments
            .render_targets
            .iter()
            .zip(&desc.render_targets)
            .enumerate()
        {
            descriptions.push(
                vk::AttachmentDescription::default()
                    .format(view.format())
                    .samples(samples)
                    .load_op(ops.load_op)
                    .store_op(ops.store_op)
                    .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                    .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                    .initial_layout(ops.initial_state.image_layout())
                    .final_layout(ops.final_state.image_layout()),
            );
            color_refs.push(vk::AttachmentReference {
                attachment: i as u32,
                layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            });
        }

        let depth_ref = match (&attachments.depth_stencil, &desc.depth_stencil) {
            (Some(view), Some(ops)) => {
                let stencil = format::has_stencil(view.format());
                let stencil_load = if stencil {
                    ops.stencil_load_op
                } else {
                    vk::AttachmentLoadOp::DONT_CARE
                };
                let stencil_store = if stencil {
                    ops.stencil_store_op
                } else {
                    vk::AttachmentStoreOp::DONT_CARE
                };
                descriptions.push(
                    vk::AttachmentDescription::default()
                        .format(view.format())
                        .samples(samples)
                        .load_op(ops.depth_load_op)
                        .store_op(ops.depth_store_op)
                        .stencil_load_op(stencil_load)
                        .stencil_store_op(stencil_store)
                        .initial_layout(ops.initial_state.image_layout())
                        .final_layout(ops.final_state.image_layout()),
                );
                Some(vk::AttachmentReference {
                    attachment: color_refs.len() as u32,
                    layout: ops.state.image_layout(),
                })
            }
            _ => None,
        };

        let mut subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs);
        if let Some(depth_ref) = depth_ref.as_ref() {
            subpass = subpass.depth_stencil_attachment(depth_ref);
        }
        let subpasses = [subpass];

        let attachment_stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
            | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
        let dependencies = [vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(attachment_stages)
            .dst_stage_mask(attachment_stages)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_access_mask(
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            )];

        let info = vk::RenderPassCreateInfo::default()
            .attachments(&descriptions)
            .subpasses(&subpasses)
            .dependencies(&dependencies);
        // SAFETY: forwarded from the caller
        let render_pass = unsafe { device.raw().create_render_pass(&info)? };

        let views: Vec<vk::ImageView> = attachments
            .render_targets
            .iter()
            .chain(attachments.depth_stencil.iter())
            .map(|v| v.handle())
            .collect();
        let framebuffer_info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass)
            .attachments(&views)
            .width(attachments.extent.width)
            .height(attachments.extent.height)
            .layers(1);
        // SAFETY: forwarded from the caller
        let framebuffer = match unsafe { device.raw().create_framebuffer(&framebuffer_info) } {
            Ok(framebuffer) => framebuffer,
            Err(e) => {
                // SAFETY: the pass was never used
                unsafe { device.raw().destroy_render_pass(render_pass) };
                return Err(e);
            }
        };

        let clear_value_count = clear_value_count(&desc.render_targets, desc.depth_stencil.as_ref());
        tracing::debug!(
            "Render pass {}: {} targets, depth {}, {clear_value_count} clear values",
            desc.name,
            color_refs.len(),
            depth_ref.is_some()
        );

        Ok(Self {
            device: device.clone(),
            handle: Native::Owned(render_pass),
            framebuffer: Native::Owned(framebuffer),
            attachments,
            color_ops: desc.render_targets,
            depth_ops: desc.depth_stencil,
            clear_value_count,
            name: desc.name,
        })
    }

    unsafe fn destroy_api_objects(&mut self) {
        let raw = self.device.raw();
        // Framebuffer first: it references the pass and the views.
        if let Some(framebuffer) = self.framebuffer.destroyable() {
            // SAFETY: forwarded from the caller
            unsafe { raw.destroy_framebuffer(framebuffer) };
        }
        self.framebuffer = Native::Borrowed(vk::Framebuffer::null());
        if let Some(render_pass) = self.handle.destroyable() {
            // SAFETY: forwarded from the caller
            unsafe { raw.destroy_render_pass(render_pass) };
        }
        self.handle = Native::Borrowed(vk::RenderPass::null());
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        // SAFETY: the owner guarantees no pending command buffer uses this pass
        unsafe { self.destroy_api_objects() };
        self.device.registry().release(Self::KIND);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn color(load_op: vk::AttachmentLoadOp) -> ColorAttachmentDesc {
        ColorAttachmentDesc {
            load_op,
            ..ColorAttachmentDesc::default()
        }
    }

    #[test]
    fn no_clears_need_no_values() {
        let ops = [color(vk::AttachmentLoadOp::LOAD); 2];
        assert_eq!(clear_value_count(&ops, None), 0);
    }

    #[test]
    fn clear_count_reaches_highest_cleared_target() {
        let ops = [
            color(vk::AttachmentLoadOp::CLEAR),
            color(vk::AttachmentLoadOp::LOAD),
            color(vk::AttachmentLoadOp::CLEAR),
            color(vk::AttachmentLoadOp::DONT_CARE),
        ];
        assert_eq!(clear_value_count(&ops, None), 3);
    }

    #[test]
    fn depth_clear_covers_every_attachment() {
        let ops = [color(vk::AttachmentLoadOp::LOAD)];
        let depth = DepthAttachmentDesc::clear();
        assert_eq!(clear_value_count(&ops, Some(&depth)), 2);
    }

    #[test]
    fn read_only_depth_clear_is_detected() {
        let mut depth = DepthAttachmentDesc::read_only();
        assert_eq!(depth.clears_read_only_aspect(), None);
        depth.depth_load_op = vk::AttachmentLoadOp::CLEAR;
        assert_eq!(depth.clears_read_only_aspect(), Some("depth"));

        let mut depth = DepthAttachmentDesc {
            state: ResourceState::DepthWriteStencilRead,
            ..DepthAttachmentDesc::default()
        };
        depth.stencil_load_op = vk::AttachmentLoadOp::CLEAR;
        assert_eq!(depth.clears_read_only_aspect(), Some("stencil"));
    }

    #[test]
    fn clear_values_convert() {
        let value = ClearValue::DepthStencil {
            depth: 1.0,
            stencil: 7,
        }
        .to_vk();
        // SAFETY: written as depth_stencil above
        let depth_stencil = unsafe { value.depth_stencil };
        assert_eq!(depth_stencil.depth, 1.0);
        assert_eq!(depth_stencil.stencil, 7);
    }
}

//! Dynamic rendering attachments.

use ash::vk;

use super::{ClearValue, MAX_RENDER_TARGETS};
use crate::device::RenderDevice;
use crate::error::{fatal, GpuError, Result};
use crate::format;
use crate::image::ImageView;
use crate::state::ResourceState;

/// One attachment of a dynamic rendering scope.
#[derive(Clone, Copy)]
pub struct RenderingAttachment<'a> {
    pub view: &'a ImageView,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub clear_value: ClearValue,
    /// State the view is in while rendering.
    pub state: ResourceState,
}

impl<'a> RenderingAttachment<'a> {
    /// Color attachment that loads and stores.
    pub fn color(view: &'a ImageView) -> Self {
        Self {
            view,
            load_op: vk::AttachmentLoadOp::LOAD,
            store_op: vk::AttachmentStoreOp::STORE,
            clear_value: ClearValue::Color([0.0; 4]),
            state: ResourceState::RenderTarget,
        }
    }

    /// Writable depth/stencil attachment that loads and stores.
    pub fn depth_stencil(view: &'a ImageView) -> Self {
        Self {
            view,
            load_op: vk::AttachmentLoadOp::LOAD,
            store_op: vk::AttachmentStoreOp::STORE,
            clear_value: ClearValue::DepthStencil {
                depth: 1.0,
                stencil: 0,
            },
            state: ResourceState::DepthStencilWrite,
        }
    }

    /// Clear on load.
    pub fn with_clear(mut self, value: ClearValue) -> Self {
        self.load_op = vk::AttachmentLoadOp::CLEAR;
        self.clear_value = value;
        self
    }

    pub fn with_store_op(mut self, store_op: vk::AttachmentStoreOp) -> Self {
        self.store_op = store_op;
        self
    }

    pub fn with_state(mut self, state: ResourceState) -> Self {
        self.state = state;
        self
    }

    pub(crate) fn native(&self) -> vk::RenderingAttachmentInfo<'static> {
        vk::RenderingAttachmentInfo::default()
            .image_view(self.view.handle())
            .image_layout(self.state.image_layout())
            .load_op(self.load_op)
            .store_op(self.store_op)
            .clear_value(self.clear_value.to_vk())
    }
}

/// A dynamic rendering scope.
#[derive(Clone)]
pub struct RenderingInfo<'a> {
    pub render_area: vk::Rect2D,
    pub render_targets: Vec<RenderingAttachment<'a>>,
    pub depth_stencil: Option<RenderingAttachment<'a>>,
}

impl<'a> RenderingInfo<'a> {
    /// Empty scope covering `extent`.
    pub fn new(extent: vk::Extent2D) -> Self {
        Self {
            render_area: vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent,
            },
            render_targets: Vec::new(),
            depth_stencil: None,
        }
    }

    pub fn with_render_target(mut self, attachment: RenderingAttachment<'a>) -> Self {
        self.render_targets.push(attachment);
        self
    }

    pub fn with_depth_stencil(mut self, attachment: RenderingAttachment<'a>) -> Self {
        self.depth_stencil = Some(attachment);
        self
    }

    pub(crate) fn validate(&self, device: &RenderDevice) -> Result<()> {
        if !device.info().features.dynamic_rendering {
            return Err(GpuError::ExtensionNotSupported(
                "dynamic rendering".to_string(),
            ));
        }
        if self.render_targets.len() > MAX_RENDER_TARGETS {
            return Err(GpuError::LimitExceeded(format!(
                "{} render targets, at most {MAX_RENDER_TARGETS}",
                self.render_targets.len()
            )));
        }
        if self.render_area.extent.width == 0 || self.render_area.extent.height == 0 {
            return Err(GpuError::InvalidConfig("empty render area".to_string()));
        }
        for target in &self.render_targets {
            if format::is_depth_stencil(target.view.format()) {
                return Err(GpuError::InvalidConfig(format!(
                    "{:?} cannot be a render target",
                    target.view.format()
                )));
            }
            if !matches!(
                target.state,
                ResourceState::RenderTarget | ResourceState::General
            ) {
                return Err(GpuError::InvalidConfig(format!(
                    "render target in state {:?}",
                    target.state
                )));
            }
        }
        if let Some(depth) = &self.depth_stencil {
            if !format::is_depth_stencil(depth.view.format()) || !depth.state.is_depth_stencil() {
                return Err(GpuError::InvalidConfig(format!(
                    "{:?} in state {:?} is not a depth/stencil attachment",
                    depth.view.format(),
                    depth.state
                )));
            }
            if depth.load_op == vk::AttachmentLoadOp::CLEAR
                && (depth.state.is_depth_read_only() || depth.state.is_stencil_read_only())
            {
                fatal(format!(
                    "read-only depth/stencil state {:?} cannot be cleared",
                    depth.state
                ));
            }
        }
        Ok(())
    }

    /// Whether the depth attachment also binds the stencil aspect.
    pub(crate) fn has_stencil(&self) -> bool {
        self.depth_stencil
            .as_ref()
            .is_some_and(|d| format::has_stencil(d.view.format()))
    }
}

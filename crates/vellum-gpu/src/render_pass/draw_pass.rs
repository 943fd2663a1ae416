//! Draw passes: one render pass per legal clear combination.

use std::sync::Arc;

use ash::vk;

use super::{
    ClearFlags, ClearValue, ColorAttachmentDesc, DepthAttachmentDesc, RenderPass,
    RenderPassAttachments, RenderPassBeginInfo, RenderPassDesc, RenderPassSource,
};
use crate::device::RenderDevice;
use crate::error::{fatal, GpuError, Result};
use crate::format;

const VARIANT_COUNT: usize = 8;

/// Depth/stencil properties that decide which clear variants are legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthVariantInfo {
    pub has_stencil: bool,
    pub depth_read_only: bool,
    pub stencil_read_only: bool,
}

/// Clear combinations a draw pass builds, in ascending bit order.
pub fn enumerate_variants(
    has_render_targets: bool,
    depth: Option<DepthVariantInfo>,
) -> Vec<ClearFlags> {
    (0..VARIANT_COUNT as u8)
        .map(ClearFlags::from_bits_truncate)
        .filter(|flags| {
            if flags.contains(ClearFlags::RENDER_TARGETS) && !has_render_targets {
                return false;
            }
            match depth {
                None => !flags.intersects(ClearFlags::DEPTH | ClearFlags::STENCIL),
                Some(depth) => {
                    if flags.contains(ClearFlags::DEPTH) && depth.depth_read_only {
                        return false;
                    }
                    !(flags.contains(ClearFlags::STENCIL)
                        && (!depth.has_stencil || depth.stencil_read_only))
                }
            }
        })
        .collect()
}

/// Draw pass creation parameters.
///
/// Attachment load ops describe the non-clearing behavior; a `CLEAR` there is treated
/// as `LOAD` for variants that do not clear that attachment.
#[derive(Clone)]
pub struct DrawPassDesc {
    pub source: RenderPassSource,
    pub render_targets: Vec<ColorAttachmentDesc>,
    pub depth_stencil: Option<DepthAttachmentDesc>,
    pub clear_color: [f32; 4],
    pub clear_depth: f32,
    pub clear_stencil: u32,
    pub name: String,
}

impl DrawPassDesc {
    /// Loading and storing every attachment, clearing to transparent black and depth 1.
    pub fn new(source: RenderPassSource) -> Self {
        let render_targets = vec![ColorAttachmentDesc::default(); source.render_target_count()];
        let depth_stencil = source
            .has_depth_stencil()
            .then(DepthAttachmentDesc::default);
        Self {
            source,
            render_targets,
            depth_stencil,
            clear_color: [0.0; 4],
            clear_depth: 1.0,
            clear_stencil: 0,
            name: String::from("draw pass"),
        }
    }

    /// Same states and ops for every render target.
    pub fn with_render_target_ops(mut self, ops: ColorAttachmentDesc) -> Self {
        self.render_targets.fill(ops);
        self
    }

    pub fn with_depth_stencil_ops(mut self, ops: DepthAttachmentDesc) -> Self {
        self.depth_stencil = Some(ops);
        self
    }

    pub fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }

    pub fn with_clear_depth_stencil(mut self, depth: f32, stencil: u32) -> Self {
        self.clear_depth = depth;
        self.clear_stencil = stencil;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

fn load_or(clear: bool, base: vk::AttachmentLoadOp) -> vk::AttachmentLoadOp {
    if clear {
        vk::AttachmentLoadOp::CLEAR
    } else if base == vk::AttachmentLoadOp::CLEAR {
        vk::AttachmentLoadOp::LOAD
    } else {
        base
    }
}

/// A set of render passes over shared attachments, differing only in what they clear.
pub struct DrawPass {
    variants: [Option<RenderPass>; VARIANT_COUNT],
    attachments: Arc<RenderPassAttachments>,
    clear_color: [f32; 4],
    clear_depth: f32,
    clear_stencil: u32,
    name: String,
}

impl DrawPass {
    pub fn create(device: &Arc<RenderDevice>, desc: DrawPassDesc) -> Result<Self> {
        if desc.render_targets.len() != desc.source.render_target_count()
            || desc.depth_stencil.is_some() != desc.source.has_depth_stencil()
        {
            return Err(GpuError::InvalidConfig(format!(
                "draw pass {}: attachment descriptions do not match the attachments",
                desc.name
            )));
        }

        // Same rule as a single render pass; variants must not turn the clear into a load.
        if let Some(ops) = &desc.depth_stencil {
            if let Some(aspect) = ops.clears_read_only_aspect() {
                fatal(format!(
                    "draw pass {}: read-only {aspect} state {:?} cannot be cleared",
                    desc.name, ops.state
                ));
            }
        }

        let attachments = RenderPassAttachments::from_source(device, desc.source)?;
        let depth_info = match (attachments.depth_stencil(), &desc.depth_stencil) {
            (Some(view), Some(ops)) => Some(DepthVariantInfo {
                has_stencil: format::has_stencil(view.format()),
                depth_read_only: ops.state.is_depth_read_only(),
                stencil_read_only: ops.state.is_stencil_read_only(),
            }),
            _ => None,
        };

        let mut variants: [Option<RenderPass>; VARIANT_COUNT] = Default::default();
        let flags_list = enumerate_variants(!attachments.render_targets().is_empty(), depth_info);
        for flags in &flags_list {
            let render_targets = desc
                .render_targets
                .iter()
                .map(|ops| ColorAttachmentDesc {
                    load_op: load_or(flags.contains(ClearFlags::RENDER_TARGETS), ops.load_op),
                    ..*ops
                })
                .collect();
            let depth_stencil = desc.depth_stencil.map(|ops| DepthAttachmentDesc {
                depth_load_op: load_or(flags.contains(ClearFlags::DEPTH), ops.depth_load_op),
                stencil_load_op: load_or(flags.contains(ClearFlags::STENCIL), ops.stencil_load_op),
                ..ops
            });

            // Each variant drops independently, releasing what was built so far on error.
            let render_pass = RenderPass::create(
                device,
                RenderPassDesc {
                    source: RenderPassSource::Shared(attachments.clone()),
                    render_targets,
                    depth_stencil,
                    name: format!("{} {flags:?}", desc.name),
                },
            )?;
            variants[flags.bits() as usize] = Some(render_pass);
        }

        tracing::debug!(
            "Draw pass {}: {} variants built",
            desc.name,
            flags_list.len()
        );

        Ok(Self {
            variants,
            attachments,
            clear_color: desc.clear_color,
            clear_depth: desc.clear_depth,
            clear_stencil: desc.clear_stencil,
            name: desc.name,
        })
    }

    /// The variant for exactly these flags, if it was built.
    pub fn variant(&self, flags: ClearFlags) -> Option<&RenderPass> {
        self.variants[flags.bits() as usize].as_ref()
    }

    /// Flags of every built variant.
    pub fn built_variants(&self) -> impl Iterator<Item = ClearFlags> + '_ {
        self.variants
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_some())
            .map(|(i, _)| ClearFlags::from_bits_truncate(i as u8))
    }

    pub fn attachments(&self) -> &Arc<RenderPassAttachments> {
        &self.attachments
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.attachments.extent()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_clear_color(&mut self, color: [f32; 4]) {
        self.clear_color = color;
    }

    pub fn set_clear_depth_stencil(&mut self, depth: f32, stencil: u32) {
        self.clear_depth = depth;
        self.clear_stencil = stencil;
    }

    /// Begin info for the variant matching `flags` exactly.
    pub fn prepare_render_pass_begin_info(
        &self,
        flags: ClearFlags,
    ) -> Result<RenderPassBeginInfo<'_>> {
        let render_pass = self
            .variant(flags)
            .ok_or(GpuError::MissingRenderPassVariant(flags))?;

        let target_count = render_pass.render_target_count();
        let clear_values = (0..render_pass.clear_value_count())
            .map(|i| {
                if i < target_count {
                    ClearValue::Color(self.clear_color)
                } else {
                    ClearValue::DepthStencil {
                        depth: self.clear_depth,
                        stencil: self.clear_stencil,
                    }
                }
            })
            .collect();

        Ok(render_pass.begin_info(clear_values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WRITABLE_STENCIL: DepthVariantInfo = DepthVariantInfo {
        has_stencil: true,
        depth_read_only: false,
        stencil_read_only: false,
    };

    #[test]
    fn full_attachment_set_builds_every_variant() {
        let variants = enumerate_variants(true, Some(WRITABLE_STENCIL));
        assert_eq!(variants.len(), 8);
        assert_eq!(variants[0], ClearFlags::empty());
        assert_eq!(variants[7], ClearFlags::all());
    }

    #[test]
    fn read_only_depth_never_clears_depth() {
        let depth = DepthVariantInfo {
            depth_read_only: true,
            ..WRITABLE_STENCIL
        };
        let variants = enumerate_variants(true, Some(depth));
        assert!(variants.iter().all(|f| !f.contains(ClearFlags::DEPTH)));
        assert!(variants.contains(&(ClearFlags::RENDER_TARGETS | ClearFlags::STENCIL)));
        assert_eq!(variants.len(), 4);
    }

    #[test]
    fn depth_only_format_never_clears_stencil() {
        let depth = DepthVariantInfo {
            has_stencil: false,
            ..WRITABLE_STENCIL
        };
        let variants = enumerate_variants(true, Some(depth));
        assert_eq!(
            variants,
            vec![
                ClearFlags::empty(),
                ClearFlags::RENDER_TARGETS,
                ClearFlags::DEPTH,
                ClearFlags::RENDER_TARGETS | ClearFlags::DEPTH,
            ]
        );
    }

    #[test]
    fn color_only_pass() {
        assert_eq!(
            enumerate_variants(true, None),
            vec![ClearFlags::empty(), ClearFlags::RENDER_TARGETS]
        );
    }

    #[test]
    fn depth_only_pass_never_clears_targets() {
        let variants = enumerate_variants(false, Some(WRITABLE_STENCIL));
        assert!(variants
            .iter()
            .all(|f| !f.contains(ClearFlags::RENDER_TARGETS)));
        assert_eq!(variants.len(), 4);
    }

    #[test]
    fn load_ops_follow_flags() {
        assert_eq!(
            load_or(true, vk::AttachmentLoadOp::DONT_CARE),
            vk::AttachmentLoadOp::CLEAR
        );
        assert_eq!(
            load_or(false, vk::AttachmentLoadOp::CLEAR),
            vk::AttachmentLoadOp::LOAD
        );
        assert_eq!(
            load_or(false, vk::AttachmentLoadOp::DONT_CARE),
            vk::AttachmentLoadOp::DONT_CARE
        );
    }
}

//! Abstract resource states and their translation into synchronization2 barrier scopes.
//!
//! A transition is always expressed as a `(before, after)` pair. The `before` side goes
//! through [`to_barrier_src`] and the `after` side through [`to_barrier_dst`]; both are
//! pure functions of the state, the kind of queue recording the barrier and the shader
//! stages the device exposes.

use ash::vk;

use crate::error::{GpuError, Result};

/// Logical use of a resource at a point in a command stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    /// Contents are undefined; only legal as the source of a transition.
    Undefined,
    /// Any access from any stage.
    General,
    UniformBuffer,
    VertexBuffer,
    IndexBuffer,
    IndirectArgument,
    RenderTarget,
    /// Read/write storage access from shaders.
    UnorderedAccess,
    DepthStencilWrite,
    /// Depth and stencil are both read-only.
    DepthStencilRead,
    /// Depth read-only, stencil writable.
    DepthReadStencilWrite,
    /// Depth writable, stencil read-only.
    DepthWriteStencilRead,
    /// Sampled from any shader stage.
    ShaderResource,
    /// Sampled from the fragment stage only.
    PixelShaderResource,
    /// Sampled from every stage except fragment.
    NonPixelShaderResource,
    CopySrc,
    CopyDst,
    ResolveSrc,
    ResolveDst,
    Present,
}

impl ResourceState {
    /// Every state, in declaration order.
    pub const ALL: [Self; 20] = [
        Self::Undefined,
        Self::General,
        Self::UniformBuffer,
        Self::VertexBuffer,
        Self::IndexBuffer,
        Self::IndirectArgument,
        Self::RenderTarget,
        Self::UnorderedAccess,
        Self::DepthStencilWrite,
        Self::DepthStencilRead,
        Self::DepthReadStencilWrite,
        Self::DepthWriteStencilRead,
        Self::ShaderResource,
        Self::PixelShaderResource,
        Self::NonPixelShaderResource,
        Self::CopySrc,
        Self::CopyDst,
        Self::ResolveSrc,
        Self::ResolveDst,
        Self::Present,
    ];

    /// States that only make sense for buffers.
    pub fn is_buffer_only(self) -> bool {
        matches!(
            self,
            Self::UniformBuffer | Self::VertexBuffer | Self::IndexBuffer | Self::IndirectArgument
        )
    }

    /// States that only make sense for images.
    pub fn is_image_only(self) -> bool {
        matches!(
            self,
            Self::RenderTarget
                | Self::DepthStencilWrite
                | Self::DepthStencilRead
                | Self::DepthReadStencilWrite
                | Self::DepthWriteStencilRead
                | Self::ResolveSrc
                | Self::ResolveDst
                | Self::Present
        )
    }

    /// Depth-stencil attachment states.
    pub fn is_depth_stencil(self) -> bool {
        matches!(
            self,
            Self::DepthStencilWrite
                | Self::DepthStencilRead
                | Self::DepthReadStencilWrite
                | Self::DepthWriteStencilRead
        )
    }

    /// Whether the depth aspect may not be written in this state.
    pub fn is_depth_read_only(self) -> bool {
        matches!(self, Self::DepthStencilRead | Self::DepthReadStencilWrite)
    }

    /// Whether the stencil aspect may not be written in this state.
    pub fn is_stencil_read_only(self) -> bool {
        matches!(self, Self::DepthStencilRead | Self::DepthWriteStencilRead)
    }

    /// Image layout the state requires.
    pub fn image_layout(self) -> vk::ImageLayout {
        match self {
            Self::Undefined => vk::ImageLayout::UNDEFINED,
            Self::General | Self::UnorderedAccess => vk::ImageLayout::GENERAL,
            Self::RenderTarget => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            Self::DepthStencilWrite => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            Self::DepthStencilRead => vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
            Self::DepthReadStencilWrite => {
                vk::ImageLayout::DEPTH_READ_ONLY_STENCIL_ATTACHMENT_OPTIMAL
            }
            Self::DepthWriteStencilRead => {
                vk::ImageLayout::DEPTH_ATTACHMENT_STENCIL_READ_ONLY_OPTIMAL
            }
            Self::ShaderResource | Self::PixelShaderResource | Self::NonPixelShaderResource => {
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
            }
            Self::CopySrc | Self::ResolveSrc => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            Self::CopyDst | Self::ResolveDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            Self::Present => vk::ImageLayout::PRESENT_SRC_KHR,
            // Buffer states carry no layout.
            Self::UniformBuffer
            | Self::VertexBuffer
            | Self::IndexBuffer
            | Self::IndirectArgument => vk::ImageLayout::UNDEFINED,
        }
    }
}

/// Kind of queue a command buffer is recorded for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandType {
    Graphics,
    Compute,
    Transfer,
}

/// Optional shader stages that widen the "all shaders" stage mask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BarrierFeatures {
    pub geometry_shader: bool,
    pub tessellation_shader: bool,
}

/// One side of a barrier: the stage, access and layout a state maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierScope {
    pub stage: vk::PipelineStageFlags2,
    pub access: vk::AccessFlags2,
    pub layout: vk::ImageLayout,
}

/// Translate the `before` state of a transition.
///
/// Source scopes only carry write accesses; reads never need to be made available.
pub fn to_barrier_src(
    state: ResourceState,
    command_type: CommandType,
    features: BarrierFeatures,
) -> Result<BarrierScope> {
    if state == ResourceState::Undefined {
        return Ok(BarrierScope {
            stage: vk::PipelineStageFlags2::TOP_OF_PIPE,
            access: vk::AccessFlags2::NONE,
            layout: vk::ImageLayout::UNDEFINED,
        });
    }

    if state == ResourceState::Present {
        // Chains with the acquire semaphore wait at color attachment output.
        check_graphics(state, command_type)?;
        return Ok(BarrierScope {
            stage: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            access: vk::AccessFlags2::NONE,
            layout: vk::ImageLayout::PRESENT_SRC_KHR,
        });
    }

    let usage = state_usage(state, command_type, features)?;
    Ok(BarrierScope {
        stage: usage.stage,
        access: usage.writes,
        layout: state.image_layout(),
    })
}

/// Translate the `after` state of a transition.
pub fn to_barrier_dst(
    state: ResourceState,
    command_type: CommandType,
    features: BarrierFeatures,
) -> Result<BarrierScope> {
    if state == ResourceState::Undefined {
        return Err(GpuError::InvalidConfig(
            "Undefined is not a valid transition target".to_string(),
        ));
    }

    if state == ResourceState::Present {
        check_graphics(state, command_type)?;
        return Ok(BarrierScope {
            stage: vk::PipelineStageFlags2::BOTTOM_OF_PIPE,
            access: vk::AccessFlags2::NONE,
            layout: vk::ImageLayout::PRESENT_SRC_KHR,
        });
    }

    let usage = state_usage(state, command_type, features)?;
    Ok(BarrierScope {
        stage: usage.stage,
        access: usage.reads | usage.writes,
        layout: state.image_layout(),
    })
}

/// Queue family indices for a barrier.
///
/// Only two distinct, known families form an ownership transfer; everything else
/// is `VK_QUEUE_FAMILY_IGNORED` on both sides.
pub fn queue_family_indices(src: Option<u32>, dst: Option<u32>) -> (u32, u32) {
    match (src, dst) {
        (Some(src), Some(dst)) if src != dst => (src, dst),
        _ => (vk::QUEUE_FAMILY_IGNORED, vk::QUEUE_FAMILY_IGNORED),
    }
}

/// Whether a transition needs no barrier at all.
///
/// Equal states on different queue families still need the ownership transfer.
pub fn is_noop_transition(
    before: ResourceState,
    after: ResourceState,
    src_queue_family: Option<u32>,
    dst_queue_family: Option<u32>,
) -> bool {
    let (src, dst) = queue_family_indices(src_queue_family, dst_queue_family);
    before == after && src == dst
}

struct StateUsage {
    stage: vk::PipelineStageFlags2,
    reads: vk::AccessFlags2,
    writes: vk::AccessFlags2,
}

fn check_graphics(state: ResourceState, command_type: CommandType) -> Result<()> {
    if command_type == CommandType::Graphics {
        Ok(())
    } else {
        Err(GpuError::InvalidConfig(format!(
            "{state:?} requires a graphics command buffer, got {command_type:?}"
        )))
    }
}

fn check_not_transfer(state: ResourceState, command_type: CommandType) -> Result<()> {
    if command_type == CommandType::Transfer {
        Err(GpuError::InvalidConfig(format!(
            "{state:?} is not usable on a transfer command buffer"
        )))
    } else {
        Ok(())
    }
}

fn all_shader_stages(command_type: CommandType, features: BarrierFeatures) -> vk::PipelineStageFlags2 {
    if command_type == CommandType::Compute {
        return vk::PipelineStageFlags2::COMPUTE_SHADER;
    }
    non_pixel_shader_stages(command_type, features) | vk::PipelineStageFlags2::FRAGMENT_SHADER
}

fn non_pixel_shader_stages(
    command_type: CommandType,
    features: BarrierFeatures,
) -> vk::PipelineStageFlags2 {
    let mut stages = vk::PipelineStageFlags2::COMPUTE_SHADER;
    if command_type == CommandType::Graphics {
        stages |= vk::PipelineStageFlags2::VERTEX_SHADER;
        if features.geometry_shader {
            stages |= vk::PipelineStageFlags2::GEOMETRY_SHADER;
        }
        if features.tessellation_shader {
            stages |= vk::PipelineStageFlags2::TESSELLATION_CONTROL_SHADER
                | vk::PipelineStageFlags2::TESSELLATION_EVALUATION_SHADER;
        }
    }
    stages
}

fn state_usage(
    state: ResourceState,
    command_type: CommandType,
    features: BarrierFeatures,
) -> Result<StateUsage> {
    let depth_stages = vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS
        | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS;

    let usage = match state {
        ResourceState::General => StateUsage {
            stage: vk::PipelineStageFlags2::ALL_COMMANDS,
            reads: vk::AccessFlags2::MEMORY_READ,
            writes: vk::AccessFlags2::MEMORY_WRITE,
        },
        ResourceState::UniformBuffer => {
            check_not_transfer(state, command_type)?;
            StateUsage {
                stage: all_shader_stages(command_type, features),
                reads: vk::AccessFlags2::UNIFORM_READ,
                writes: vk::AccessFlags2::NONE,
            }
        }
        ResourceState::VertexBuffer => {
            check_graphics(state, command_type)?;
            StateUsage {
                stage: vk::PipelineStageFlags2::VERTEX_ATTRIBUTE_INPUT,
                reads: vk::AccessFlags2::VERTEX_ATTRIBUTE_READ,
                writes: vk::AccessFlags2::NONE,
            }
        }
        ResourceState::IndexBuffer => {
            check_graphics(state, command_type)?;
            StateUsage {
                stage: vk::PipelineStageFlags2::INDEX_INPUT,
                reads: vk::AccessFlags2::INDEX_READ,
                writes: vk::AccessFlags2::NONE,
            }
        }
        ResourceState::IndirectArgument => {
            check_not_transfer(state, command_type)?;
            StateUsage {
                stage: vk::PipelineStageFlags2::DRAW_INDIRECT,
                reads: vk::AccessFlags2::INDIRECT_COMMAND_READ,
                writes: vk::AccessFlags2::NONE,
            }
        }
        ResourceState::RenderTarget => {
            check_graphics(state, command_type)?;
            StateUsage {
                stage: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
                reads: vk::AccessFlags2::COLOR_ATTACHMENT_READ,
                writes: vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
            }
        }
        ResourceState::UnorderedAccess => {
            check_not_transfer(state, command_type)?;
            StateUsage {
                stage: all_shader_stages(command_type, features),
                reads: vk::AccessFlags2::SHADER_STORAGE_READ,
                writes: vk::AccessFlags2::SHADER_STORAGE_WRITE,
            }
        }
        ResourceState::DepthStencilWrite
        | ResourceState::DepthReadStencilWrite
        | ResourceState::DepthWriteStencilRead => {
            check_graphics(state, command_type)?;
            StateUsage {
                stage: depth_stages,
                reads: vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ,
                writes: vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
            }
        }
        ResourceState::DepthStencilRead => {
            check_graphics(state, command_type)?;
            // Read-only depth is commonly sampled as well.
            StateUsage {
                stage: depth_stages | all_shader_stages(command_type, features),
                reads: vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ
                    | vk::AccessFlags2::SHADER_SAMPLED_READ,
                writes: vk::AccessFlags2::NONE,
            }
        }
        ResourceState::ShaderResource => {
            check_not_transfer(state, command_type)?;
            StateUsage {
                stage: all_shader_stages(command_type, features),
                reads: vk::AccessFlags2::SHADER_READ,
                writes: vk::AccessFlags2::NONE,
            }
        }
        ResourceState::PixelShaderResource => {
            check_graphics(state, command_type)?;
            StateUsage {
                stage: vk::PipelineStageFlags2::FRAGMENT_SHADER,
                reads: vk::AccessFlags2::SHADER_READ,
                writes: vk::AccessFlags2::NONE,
            }
        }
        ResourceState::NonPixelShaderResource => {
            check_not_transfer(state, command_type)?;
            StateUsage {
                stage: non_pixel_shader_stages(command_type, features),
                reads: vk::AccessFlags2::SHADER_READ,
                writes: vk::AccessFlags2::NONE,
            }
        }
        ResourceState::CopySrc => StateUsage {
            stage: vk::PipelineStageFlags2::TRANSFER,
            reads: vk::AccessFlags2::TRANSFER_READ,
            writes: vk::AccessFlags2::NONE,
        },
        ResourceState::CopyDst => StateUsage {
            stage: vk::PipelineStageFlags2::TRANSFER,
            reads: vk::AccessFlags2::NONE,
            writes: vk::AccessFlags2::TRANSFER_WRITE,
        },
        ResourceState::ResolveSrc => {
            check_graphics(state, command_type)?;
            StateUsage {
                stage: vk::PipelineStageFlags2::RESOLVE,
                reads: vk::AccessFlags2::TRANSFER_READ,
                writes: vk::AccessFlags2::NONE,
            }
        }
        ResourceState::ResolveDst => {
            check_graphics(state, command_type)?;
            StateUsage {
                stage: vk::PipelineStageFlags2::RESOLVE,
                reads: vk::AccessFlags2::NONE,
                writes: vk::AccessFlags2::TRANSFER_WRITE,
            }
        }
        ResourceState::Undefined | ResourceState::Present => {
            unreachable!("handled by the callers")
        }
    };

    Ok(usage)
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMMAND_TYPES: [CommandType; 3] =
        [CommandType::Graphics, CommandType::Compute, CommandType::Transfer];

    #[test]
    fn translation_is_deterministic() {
        let features = BarrierFeatures {
            geometry_shader: true,
            tessellation_shader: false,
        };
        for state in ResourceState::ALL {
            for command_type in COMMAND_TYPES {
                let a = to_barrier_src(state, command_type, features).ok();
                let b = to_barrier_src(state, command_type, features).ok();
                assert_eq!(a, b, "src {state:?} on {command_type:?}");

                let a = to_barrier_dst(state, command_type, features).ok();
                let b = to_barrier_dst(state, command_type, features).ok();
                assert_eq!(a, b, "dst {state:?} on {command_type:?}");
            }
        }
    }

    #[test]
    fn every_state_translates_on_graphics() {
        let features = BarrierFeatures::default();
        for state in ResourceState::ALL {
            assert!(to_barrier_src(state, CommandType::Graphics, features).is_ok());
            if state != ResourceState::Undefined {
                assert!(to_barrier_dst(state, CommandType::Graphics, features).is_ok());
            }
        }
    }

    #[test]
    fn undefined_is_not_a_destination() {
        let err = to_barrier_dst(
            ResourceState::Undefined,
            CommandType::Graphics,
            BarrierFeatures::default(),
        );
        assert!(matches!(err, Err(GpuError::InvalidConfig(_))));
    }

    #[test]
    fn read_only_depth_uses_read_only_layouts() {
        let features = BarrierFeatures::default();
        let scope =
            to_barrier_dst(ResourceState::DepthStencilRead, CommandType::Graphics, features)
                .unwrap();
        assert_eq!(scope.layout, vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL);
        assert!(!scope
            .access
            .contains(vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE));

        let scope = to_barrier_dst(
            ResourceState::DepthReadStencilWrite,
            CommandType::Graphics,
            features,
        )
        .unwrap();
        assert_eq!(
            scope.layout,
            vk::ImageLayout::DEPTH_READ_ONLY_STENCIL_ATTACHMENT_OPTIMAL
        );
    }

    #[test]
    fn source_scopes_carry_only_writes() {
        let features = BarrierFeatures::default();
        let scope =
            to_barrier_src(ResourceState::ShaderResource, CommandType::Graphics, features)
                .unwrap();
        assert_eq!(scope.access, vk::AccessFlags2::NONE);

        let scope =
            to_barrier_src(ResourceState::RenderTarget, CommandType::Graphics, features).unwrap();
        assert_eq!(scope.access, vk::AccessFlags2::COLOR_ATTACHMENT_WRITE);
    }

    #[test]
    fn graphics_states_rejected_on_compute() {
        let features = BarrierFeatures::default();
        for state in [
            ResourceState::RenderTarget,
            ResourceState::DepthStencilWrite,
            ResourceState::VertexBuffer,
            ResourceState::Present,
        ] {
            assert!(to_barrier_dst(state, CommandType::Compute, features).is_err());
        }
        assert!(to_barrier_dst(ResourceState::ShaderResource, CommandType::Transfer, features)
            .is_err());
        assert!(to_barrier_dst(ResourceState::CopyDst, CommandType::Transfer, features).is_ok());
    }

    #[test]
    fn optional_shader_stages_follow_features() {
        let scope = to_barrier_dst(
            ResourceState::ShaderResource,
            CommandType::Graphics,
            BarrierFeatures {
                geometry_shader: true,
                tessellation_shader: true,
            },
        )
        .unwrap();
        assert!(scope.stage.contains(vk::PipelineStageFlags2::GEOMETRY_SHADER));
        assert!(scope
            .stage
            .contains(vk::PipelineStageFlags2::TESSELLATION_EVALUATION_SHADER));

        let scope = to_barrier_dst(
            ResourceState::ShaderResource,
            CommandType::Graphics,
            BarrierFeatures::default(),
        )
        .unwrap();
        assert!(!scope.stage.contains(vk::PipelineStageFlags2::GEOMETRY_SHADER));
    }

    #[test]
    fn queue_families_ignored_unless_distinct() {
        let ignored = (vk::QUEUE_FAMILY_IGNORED, vk::QUEUE_FAMILY_IGNORED);
        assert_eq!(queue_family_indices(None, None), ignored);
        assert_eq!(queue_family_indices(Some(1), Some(1)), ignored);
        assert_eq!(queue_family_indices(Some(0), None), ignored);
        assert_eq!(queue_family_indices(Some(0), Some(2)), (0, 2));
    }

    #[test]
    fn equal_states_on_distinct_families_still_transfer() {
        let state = ResourceState::ShaderResource;
        assert!(is_noop_transition(state, state, None, None));
        assert!(is_noop_transition(state, state, Some(0), Some(0)));
        assert!(!is_noop_transition(state, state, Some(0), Some(1)));
        assert!(!is_noop_transition(
            ResourceState::CopyDst,
            ResourceState::ShaderResource,
            None,
            None
        ));
    }
}

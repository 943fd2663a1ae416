//! Native barrier construction from state transitions.

use ash::vk;

use crate::error::{GpuError, Result};
use crate::state::{
    self, queue_family_indices, BarrierFeatures, CommandType, ResourceState,
};

/// A requested image transition.
#[derive(Debug, Clone, Copy)]
pub struct ImageTransition {
    pub image: vk::Image,
    pub range: vk::ImageSubresourceRange,
    pub before: ResourceState,
    pub after: ResourceState,
    /// Releasing queue family for an ownership transfer.
    pub src_queue_family: Option<u32>,
    /// Acquiring queue family for an ownership transfer.
    pub dst_queue_family: Option<u32>,
}

impl ImageTransition {
    pub fn new(
        image: vk::Image,
        range: vk::ImageSubresourceRange,
        before: ResourceState,
        after: ResourceState,
    ) -> Self {
        Self {
            image,
            range,
            before,
            after,
            src_queue_family: None,
            dst_queue_family: None,
        }
    }

    /// Transfer queue family ownership along with the transition.
    pub fn with_queue_transfer(mut self, src: u32, dst: u32) -> Self {
        self.src_queue_family = Some(src);
        self.dst_queue_family = Some(dst);
        self
    }
}

/// A requested buffer transition.
#[derive(Debug, Clone, Copy)]
pub struct BufferTransition {
    pub buffer: vk::Buffer,
    pub offset: vk::DeviceSize,
    pub size: vk::DeviceSize,
    pub before: ResourceState,
    pub after: ResourceState,
    pub src_queue_family: Option<u32>,
    pub dst_queue_family: Option<u32>,
}

impl BufferTransition {
    pub fn new(
        buffer: vk::Buffer,
        size: vk::DeviceSize,
        before: ResourceState,
        after: ResourceState,
    ) -> Self {
        Self {
            buffer,
            offset: 0,
            size,
            before,
            after,
            src_queue_family: None,
            dst_queue_family: None,
        }
    }

    pub fn with_queue_transfer(mut self, src: u32, dst: u32) -> Self {
        self.src_queue_family = Some(src);
        self.dst_queue_family = Some(dst);
        self
    }
}

/// Build the sync2 barrier for an image transition.
pub fn image_barrier(
    transition: &ImageTransition,
    command_type: CommandType,
    features: BarrierFeatures,
) -> Result<vk::ImageMemoryBarrier2<'static>> {
    if transition.before.is_buffer_only() || transition.after.is_buffer_only() {
        return Err(GpuError::InvalidConfig(format!(
            "image transition {:?} -> {:?} uses a buffer state",
            transition.before, transition.after
        )));
    }

    let src = state::to_barrier_src(transition.before, command_type, features)?;
    let dst = state::to_barrier_dst(transition.after, command_type, features)?;
    let (src_family, dst_family) =
        queue_family_indices(transition.src_queue_family, transition.dst_queue_family);

    Ok(vk::ImageMemoryBarrier2::default()
        .src_stage_mask(src.stage)
        .src_access_mask(src.access)
        .dst_stage_mask(dst.stage)
        .dst_access_mask(dst.access)
        .old_layout(src.layout)
        .new_layout(dst.layout)
        .src_queue_family_index(src_family)
        .dst_queue_family_index(dst_family)
        .image(transition.image)
        .subresource_range(transition.range))
}

/// Build the sync2 barrier for a buffer transition.
pub fn buffer_barrier(
    transition: &BufferTransition,
    command_type: CommandType,
    features: BarrierFeatures,
) -> Result<vk::BufferMemoryBarrier2<'static>> {
    if transition.before.is_image_only() || transition.after.is_image_only() {
        return Err(GpuError::InvalidConfig(format!(
            "buffer transition {:?} -> {:?} uses an image state",
            transition.before, transition.after
        )));
    }

    let src = state::to_barrier_src(transition.before, command_type, features)?;
    let dst = state::to_barrier_dst(transition.after, command_type, features)?;
    let (src_family, dst_family) =
        queue_family_indices(transition.src_queue_family, transition.dst_queue_family);

    Ok(vk::BufferMemoryBarrier2::default()
        .src_stage_mask(src.stage)
        .src_access_mask(src.access)
        .dst_stage_mask(dst.stage)
        .dst_access_mask(dst.access)
        .src_queue_family_index(src_family)
        .dst_queue_family_index(dst_family)
        .buffer(transition.buffer)
        .offset(transition.offset)
        .size(transition.size))
}

/// Subresource range covering every mip and layer of the given aspects.
pub fn full_range(aspect: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: aspect,
        base_mip_level: 0,
        level_count: vk::REMAINING_MIP_LEVELS,
        base_array_layer: 0,
        layer_count: vk::REMAINING_ARRAY_LAYERS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn color_range() -> vk::ImageSubresourceRange {
        full_range(vk::ImageAspectFlags::COLOR)
    }

    #[test]
    fn image_barrier_maps_layouts() {
        let transition = ImageTransition::new(
            vk::Image::from_raw(1),
            color_range(),
            ResourceState::Undefined,
            ResourceState::RenderTarget,
        );
        let barrier =
            image_barrier(&transition, CommandType::Graphics, BarrierFeatures::default()).unwrap();

        assert_eq!(barrier.old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(barrier.new_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(barrier.src_queue_family_index, vk::QUEUE_FAMILY_IGNORED);
        assert!(barrier
            .dst_access_mask
            .contains(vk::AccessFlags2::COLOR_ATTACHMENT_WRITE));
    }

    #[test]
    fn ownership_transfer_sets_both_families() {
        let transition = ImageTransition::new(
            vk::Image::from_raw(1),
            color_range(),
            ResourceState::CopyDst,
            ResourceState::CopyDst,
        )
        .with_queue_transfer(2, 0);
        let barrier =
            image_barrier(&transition, CommandType::Graphics, BarrierFeatures::default()).unwrap();

        assert_eq!(barrier.src_queue_family_index, 2);
        assert_eq!(barrier.dst_queue_family_index, 0);
    }

    #[test]
    fn buffer_states_rejected_for_images() {
        let transition = ImageTransition::new(
            vk::Image::from_raw(1),
            color_range(),
            ResourceState::Undefined,
            ResourceState::VertexBuffer,
        );
        assert!(
            image_barrier(&transition, CommandType::Graphics, BarrierFeatures::default()).is_err()
        );
    }

    #[test]
    fn buffer_barrier_covers_range() {
        let transition = BufferTransition::new(
            vk::Buffer::from_raw(9),
            256,
            ResourceState::CopyDst,
            ResourceState::UniformBuffer,
        );
        let barrier =
            buffer_barrier(&transition, CommandType::Graphics, BarrierFeatures::default()).unwrap();

        assert_eq!(barrier.size, 256);
        assert_eq!(barrier.src_access_mask, vk::AccessFlags2::TRANSFER_WRITE);
        assert!(barrier.dst_access_mask.contains(vk::AccessFlags2::UNIFORM_READ));
    }
}

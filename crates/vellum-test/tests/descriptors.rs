//! Layout aliasing checks and pool capacity accounting.

use std::sync::Arc;

use vellum_gpu::{
    vk, DescriptorPool, DescriptorPoolDesc, DescriptorSetLayout, DescriptorSetLayoutBuilder,
    DeviceFeatures, DeviceInfo, DeviceLimits, GpuError, QueueFamilies, RenderDevice,
    MAX_SETS_PER_POOL,
};
use vellum_test::MockDevice;

#[test]
fn overlapping_array_binding_is_rejected_before_creation() {
    let mock = MockDevice::new();
    let device = mock.render_device().unwrap();

    let result = DescriptorSetLayoutBuilder::new()
        .binding(0, vk::DescriptorType::SAMPLED_IMAGE, 4, vk::ShaderStageFlags::FRAGMENT)
        .uniform_buffer(2, vk::ShaderStageFlags::VERTEX)
        .build(&device);

    assert!(matches!(
        result,
        Err(GpuError::DescriptorAliasing {
            binding: 2,
            other: 0
        })
    ));
    assert_eq!(mock.count("create_descriptor_set_layout"), 0);
}

#[test]
fn adjacent_array_bindings_are_accepted() {
    let mock = MockDevice::new();
    let device = mock.render_device().unwrap();

    let layout = DescriptorSetLayoutBuilder::new()
        .binding(0, vk::DescriptorType::SAMPLED_IMAGE, 4, vk::ShaderStageFlags::FRAGMENT)
        .uniform_buffer(4, vk::ShaderStageFlags::VERTEX)
        .build(&device)
        .unwrap();

    assert_eq!(layout.bindings().len(), 2);
    assert_eq!(mock.count("create_descriptor_set_layout"), 1);
}

fn uniform_layout(device: &Arc<RenderDevice>) -> Arc<DescriptorSetLayout> {
    Arc::new(
        DescriptorSetLayoutBuilder::new()
            .uniform_buffer(0, vk::ShaderStageFlags::VERTEX)
            .build(device)
            .unwrap(),
    )
}

#[test]
fn pool_sizing_saturates_for_huge_set_counts() {
    let mock = MockDevice::new();
    let device = mock.render_device().unwrap();
    let layout = Arc::new(
        DescriptorSetLayoutBuilder::new()
            .binding(0, vk::DescriptorType::SAMPLED_IMAGE, 16, vk::ShaderStageFlags::FRAGMENT)
            .build(&device)
            .unwrap(),
    );

    let desc = DescriptorPoolDesc::for_layouts(&[&*layout, &*layout], u32::MAX);
    assert_eq!(desc.max_sets, MAX_SETS_PER_POOL);
    assert_eq!(desc.sizes, vec![(vk::DescriptorType::SAMPLED_IMAGE, u32::MAX)]);
}

#[test]
fn exhausted_pool_reports_limit_exceeded() {
    let mock = MockDevice::new();
    let device = mock.render_device().unwrap();
    let layout = uniform_layout(&device);
    let pool = DescriptorPool::create(&device, DescriptorPoolDesc::for_layouts(&[&*layout], 2))
        .unwrap();

    let first = pool.allocate(&layout).unwrap();
    let _second = pool.allocate(&layout).unwrap();
    let third = pool.allocate(&layout);

    assert!(third.is_err_and(|e| e.is_limit_exceeded()));
    assert_eq!(pool.allocated_sets(), 2);
    assert_eq!(mock.count("allocate_descriptor_sets"), 2);

    drop(first);
    assert_eq!(pool.allocated_sets(), 1);
    assert!(pool.allocate(&layout).is_ok());
}

#[test]
fn pushable_layout_requires_the_extension() {
    let mock = MockDevice::new();
    let device = mock.render_device().unwrap();

    let result = DescriptorSetLayoutBuilder::new()
        .storage_buffer(0, vk::ShaderStageFlags::COMPUTE)
        .pushable()
        .build(&device);

    assert!(matches!(result, Err(GpuError::ExtensionNotSupported(_))));
}

#[test]
fn pushable_layouts_cannot_be_pool_allocated() {
    let mock = MockDevice::with_info(DeviceInfo {
        name: "push descriptor device".to_string(),
        queue_families: QueueFamilies {
            graphics: 0,
            compute: 0,
            transfer: 0,
        },
        features: DeviceFeatures {
            dynamic_rendering: true,
            push_descriptor: true,
            ..Default::default()
        },
        limits: DeviceLimits::default(),
    });
    let device = mock.render_device().unwrap();
    let pushable = Arc::new(
        DescriptorSetLayoutBuilder::new()
            .storage_buffer(0, vk::ShaderStageFlags::COMPUTE)
            .pushable()
            .build(&device)
            .unwrap(),
    );
    let pool = DescriptorPool::create(&device, DescriptorPoolDesc::for_layouts(&[&*pushable], 1))
        .unwrap();

    assert!(matches!(
        pool.allocate(&pushable),
        Err(GpuError::InvalidConfig(_))
    ));
    assert_eq!(mock.count("allocate_descriptor_sets"), 0);
}

//! Object lifetimes, handle ownership and creation-time transitions.

use std::sync::Arc;

use vellum_gpu::vk::{self, Handle};
use vellum_gpu::{
    CommandList, CommandType, GpuError, Image, ImageDesc, ImageView, ImageViewDesc, Ownership,
    RenderDevice, ResourceState,
};
use vellum_test::MockDevice;

fn sampled_desc() -> ImageDesc {
    ImageDesc::new_2d(
        32,
        32,
        vk::Format::R8G8B8A8_UNORM,
        vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
    )
}

fn device() -> (Arc<MockDevice>, Arc<RenderDevice>) {
    let mock = MockDevice::new();
    let device = mock.render_device().unwrap();
    mock.clear_calls();
    (mock, device)
}

#[test]
fn dropping_a_view_keeps_its_image() {
    let (mock, device) = device();
    let image = Arc::new(Image::create(&device, sampled_desc().with_name("kept")).unwrap());
    let view = ImageView::create(&device, ImageViewDesc::full(image.clone())).unwrap();
    assert_eq!(device.live_objects("ImageView"), 1);

    drop(view);

    assert_eq!(mock.count("destroy_image_view"), 1);
    assert_eq!(mock.count("destroy_image"), 0);
    assert_eq!(device.live_objects("ImageView"), 0);
    assert_eq!(device.live_objects("Image"), 1);

    // The image is still usable after its view is gone.
    let mut list = CommandList::new(&device, CommandType::Graphics).unwrap();
    list.begin().unwrap();
    assert!(list
        .transition_image_layout(&image, ResourceState::Undefined, ResourceState::CopyDst)
        .unwrap());
    list.end().unwrap();
}

#[test]
fn view_keeps_image_alive_past_the_callers_handle() {
    let (mock, device) = device();
    let image = Arc::new(Image::create(&device, sampled_desc()).unwrap());
    let view = ImageView::create(&device, ImageViewDesc::full(image)).unwrap();

    assert_eq!(mock.count("destroy_image"), 0);
    drop(view);
    assert_eq!(mock.count("destroy_image_view"), 1);
    assert_eq!(mock.count("destroy_image"), 1);
    assert_eq!(device.live_objects("Image"), 0);
}

#[test]
fn reference_view_is_never_destroyed() {
    let (mock, device) = device();
    let image = Arc::new(Image::create(&device, sampled_desc()).unwrap());
    let foreign = vk::ImageView::from_raw(0xdead);
    let view = ImageView::create(
        &device,
        ImageViewDesc::full(image).with_existing(foreign, Ownership::Reference),
    )
    .unwrap();

    assert_eq!(view.handle(), foreign);
    assert_eq!(view.ownership(), Ownership::Reference);
    assert_eq!(mock.count("create_image_view"), 0);

    drop(view);
    assert_eq!(mock.count("destroy_image_view"), 0);
}

#[test]
fn disowned_image_is_not_destroyed() {
    let (mock, device) = device();
    let image = Image::create(&device, sampled_desc()).unwrap();
    let handle = image.handle();

    let image = image.disown().unwrap();
    assert_eq!(image.ownership(), Ownership::Reference);
    assert_eq!(image.handle(), handle);

    drop(image);
    assert_eq!(mock.count("destroy_image"), 0);
    assert_eq!(device.live_objects("Image"), 0);
}

#[test]
fn wrapped_reference_image_skips_allocation_and_transition() {
    let (mock, device) = device();
    let foreign = vk::Image::from_raw(0x77);
    let image = Image::create(
        &device,
        sampled_desc()
            .with_initial_state(ResourceState::ShaderResource)
            .with_existing(foreign, Ownership::Reference),
    )
    .unwrap();

    assert_eq!(image.handle(), foreign);
    assert_eq!(mock.count("create_image"), 0);
    assert_eq!(mock.count("queue_submit"), 0);

    drop(image);
    assert_eq!(mock.count("destroy_image"), 0);
}

#[test]
fn invalid_description_makes_no_native_call() {
    let (mock, device) = device();
    let result = Image::create(
        &device,
        ImageDesc::new_2d(0, 64, vk::Format::R8G8B8A8_UNORM, vk::ImageUsageFlags::SAMPLED),
    );

    assert!(matches!(result, Err(GpuError::InvalidConfig(_))));
    assert!(mock.calls().is_empty());
    assert_eq!(device.live_objects("Image"), 0);
}

#[test]
fn initial_state_without_matching_usage_is_rejected() {
    let (mock, device) = device();
    let result = Image::create(
        &device,
        ImageDesc::new_2d(16, 16, vk::Format::R8G8B8A8_UNORM, vk::ImageUsageFlags::SAMPLED)
            .with_initial_state(ResourceState::UnorderedAccess),
    );

    assert!(matches!(result, Err(GpuError::InvalidConfig(_))));
    assert_eq!(mock.count("create_image"), 0);
}

#[test]
fn initial_state_is_applied_once_on_the_graphics_queue() {
    let (mock, device) = device();
    let image = Image::create(
        &device,
        sampled_desc().with_initial_state(ResourceState::ShaderResource),
    )
    .unwrap();

    assert_eq!(mock.count("create_image"), 1);
    assert_eq!(mock.count("cmd_pipeline_barrier2"), 1);

    let submits = mock.calls_named("queue_submit");
    assert_eq!(submits.len(), 1);
    assert_eq!(submits[0].handle, device.graphics_queue().handle().as_raw());
    assert_eq!(image.initial_state(), ResourceState::ShaderResource);
}

#[test]
fn remaining_mip_and_layer_counts_resolve_against_the_image() {
    let (_mock, device) = device();
    let image = Arc::new(Image::create(&device, sampled_desc().with_mip_levels(4)).unwrap());

    let tail = ImageView::create(
        &device,
        ImageViewDesc::full(image.clone())
            .with_mips(1, vk::REMAINING_MIP_LEVELS)
            .with_layers(0, vk::REMAINING_ARRAY_LAYERS),
    )
    .unwrap();
    assert_eq!(tail.range().level_count, 3);
    assert_eq!(tail.range().layer_count, 1);

    let all = ImageView::create(
        &device,
        ImageViewDesc::full(image).with_mips(0, vk::REMAINING_MIP_LEVELS),
    )
    .unwrap();
    assert_eq!(all.range().level_count, 4);
}

#[test]
fn overflowing_view_range_is_rejected() {
    let (mock, device) = device();
    let image = Arc::new(Image::create(&device, sampled_desc().with_mip_levels(4)).unwrap());
    mock.clear_calls();

    let result = ImageView::create(
        &device,
        ImageViewDesc::full(image.clone()).with_mips(2, u32::MAX - 1),
    );
    assert!(matches!(result, Err(GpuError::InvalidConfig(_))));

    let result = ImageView::create(
        &device,
        ImageViewDesc::full(image.clone()).with_mips(4, vk::REMAINING_MIP_LEVELS),
    );
    assert!(matches!(result, Err(GpuError::InvalidConfig(_))));

    let result = ImageView::create(&device, ImageViewDesc::full(image).with_layers(1, u32::MAX));
    assert!(matches!(result, Err(GpuError::InvalidConfig(_))));
    assert_eq!(mock.count("create_image_view"), 0);
}

#[test]
fn registry_total_tracks_every_kind() {
    let (_mock, device) = device();
    let before = device.total_live_objects();

    let image = Arc::new(Image::create(&device, sampled_desc()).unwrap());
    let view = ImageView::create(&device, ImageViewDesc::full(image.clone())).unwrap();
    assert_eq!(device.total_live_objects(), before + 2);

    drop(view);
    drop(image);
    assert_eq!(device.total_live_objects(), before);
}

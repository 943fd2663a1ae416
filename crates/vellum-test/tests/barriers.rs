//! Barrier elision and emission against the recording backend.

use std::sync::Arc;

use vellum_gpu::{vk, CommandList, CommandType, Image, ImageDesc, RenderDevice, ResourceState};
use vellum_test::MockDevice;

fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn setup() -> (Arc<MockDevice>, Arc<RenderDevice>, Image) {
    init_logging();
    let mock = MockDevice::new();
    let device = mock.render_device().unwrap();
    let image = Image::create(
        &device,
        ImageDesc::new_2d(
            64,
            64,
            vk::Format::R8G8B8A8_UNORM,
            vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
        )
        .with_name("sampled"),
    )
    .unwrap();
    (mock, device, image)
}

#[test]
fn repeated_undefined_to_shader_resource_is_noop() {
    let (mock, device, image) = setup();
    let mut list = CommandList::new(&device, CommandType::Graphics).unwrap();
    list.begin().unwrap();
    mock.clear_calls();

    let first = list
        .transition_image_layout(&image, ResourceState::Undefined, ResourceState::ShaderResource)
        .unwrap();
    let second = list
        .transition_image_layout(&image, ResourceState::Undefined, ResourceState::ShaderResource)
        .unwrap();

    assert!(first);
    assert!(!second);
    assert_eq!(mock.count("cmd_pipeline_barrier2"), 1);
    assert_eq!(
        list.tracked_state(image.handle(), &image.full_range()),
        Some(ResourceState::ShaderResource)
    );
}

#[test]
fn tracking_resets_when_recording_restarts() {
    let (mock, device, image) = setup();
    let mut list = CommandList::new(&device, CommandType::Graphics).unwrap();

    for _ in 0..2 {
        list.begin().unwrap();
        list.transition_image_layout(&image, ResourceState::Undefined, ResourceState::ShaderResource)
            .unwrap();
        list.end().unwrap();
    }

    assert_eq!(mock.count("cmd_pipeline_barrier2"), 2);
}

#[test]
fn equal_states_on_same_queue_family_are_elided() {
    let (mock, device, image) = setup();
    let mut list = CommandList::new(&device, CommandType::Graphics).unwrap();
    list.begin().unwrap();
    mock.clear_calls();

    let emitted = list
        .transition_image_range(
            &image,
            (0, 1),
            (0, 1),
            ResourceState::ShaderResource,
            ResourceState::ShaderResource,
            Some(0),
            Some(0),
        )
        .unwrap();

    assert!(!emitted);
    assert_eq!(mock.count("cmd_pipeline_barrier2"), 0);
}

#[test]
fn equal_states_across_queue_families_still_transfer_ownership() {
    let (mock, device, image) = setup();
    let mut list = CommandList::new(&device, CommandType::Graphics).unwrap();
    list.begin().unwrap();
    mock.clear_calls();

    let emitted = list
        .transition_image_range(
            &image,
            (0, 1),
            (0, 1),
            ResourceState::ShaderResource,
            ResourceState::ShaderResource,
            Some(0),
            Some(1),
        )
        .unwrap();

    assert!(emitted);
    let barriers = mock.calls_named("cmd_pipeline_barrier2");
    assert_eq!(barriers.len(), 1);
    assert_eq!(barriers[0].detail, 1);
}

#[test]
fn memory_barriers_are_never_elided() {
    let (mock, device, _image) = setup();
    let mut list = CommandList::new(&device, CommandType::Graphics).unwrap();
    list.begin().unwrap();
    mock.clear_calls();

    list.memory_barrier(ResourceState::UnorderedAccess, ResourceState::UnorderedAccess)
        .unwrap();
    list.memory_barrier(ResourceState::UnorderedAccess, ResourceState::UnorderedAccess)
        .unwrap();

    assert_eq!(mock.count("cmd_pipeline_barrier2"), 2);
}

#[test]
fn compute_lists_reject_graphics_states() {
    let (mock, device, image) = setup();
    let mut list = CommandList::new(&device, CommandType::Compute).unwrap();
    list.begin().unwrap();
    mock.clear_calls();

    let result =
        list.transition_image_layout(&image, ResourceState::ShaderResource, ResourceState::Present);

    assert!(matches!(result, Err(vellum_gpu::GpuError::InvalidConfig(_))));
    assert_eq!(mock.count("cmd_pipeline_barrier2"), 0);
}

#[test]
fn queue_transition_between_equal_states_touches_nothing() {
    let (mock, device, image) = setup();
    mock.clear_calls();

    device
        .graphics_queue()
        .transition_image_layout(
            image.handle(),
            image.full_range(),
            ResourceState::CopyDst,
            ResourceState::CopyDst,
        )
        .unwrap();

    assert!(mock.calls().is_empty());
}

#[test]
fn queue_transition_waits_on_its_own_fence() {
    let (mock, device, image) = setup();
    mock.clear_calls();

    device
        .graphics_queue()
        .transition_image_layout(
            image.handle(),
            image.full_range(),
            ResourceState::Undefined,
            ResourceState::CopyDst,
        )
        .unwrap();

    let calls = mock.calls();
    let barrier = calls
        .iter()
        .position(|c| c.name == "cmd_pipeline_barrier2")
        .unwrap();
    let submit = calls.iter().position(|c| c.name == "queue_submit").unwrap();
    let wait = calls.iter().position(|c| c.name == "wait_for_fences").unwrap();
    let free = calls
        .iter()
        .position(|c| c.name == "free_command_buffers")
        .unwrap();
    assert!(barrier < submit && submit < wait && wait < free);
    assert_eq!(mock.count("device_wait_idle"), 0);
    assert_eq!(mock.live_fences(), 0);
}

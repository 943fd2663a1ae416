//! Draw-pass variant construction and render-pass state checks.

use std::sync::Arc;

use vellum_gpu::vk::{self, Handle};
use vellum_gpu::{
    ClearFlags, ColorAttachmentDesc, CommandList, CommandType, DepthAttachmentDesc, DrawPass,
    DrawPassDesc, GpuError, Image, ImageDesc, RenderDevice, RenderPassSource, ResourceState,
    TargetFormat,
};
use vellum_test::MockDevice;

const EXTENT: vk::Extent2D = vk::Extent2D {
    width: 128,
    height: 128,
};

fn source(depth: Option<vk::Format>) -> RenderPassSource {
    RenderPassSource::Formats {
        extent: EXTENT,
        samples: vk::SampleCountFlags::TYPE_1,
        render_targets: vec![TargetFormat::new(vk::Format::R8G8B8A8_UNORM)
            .with_usage(vk::ImageUsageFlags::SAMPLED)],
        depth_stencil: depth.map(TargetFormat::new),
    }
}

fn read_only_depth_pass(device: &Arc<RenderDevice>) -> DrawPass {
    DrawPass::create(
        device,
        DrawPassDesc::new(source(Some(vk::Format::D24_UNORM_S8_UINT)))
            .with_render_target_ops(ColorAttachmentDesc::clear(ResourceState::ShaderResource))
            .with_depth_stencil_ops(DepthAttachmentDesc::read_only())
            .with_name("read-only depth"),
    )
    .unwrap()
}

#[test]
fn read_only_depth_builds_no_depth_clearing_variant() {
    let mock = MockDevice::new();
    let device = mock.render_device().unwrap();
    let pass = read_only_depth_pass(&device);

    let built: Vec<ClearFlags> = pass.built_variants().collect();
    assert_eq!(built, vec![ClearFlags::empty(), ClearFlags::RENDER_TARGETS]);
    assert_eq!(mock.count("create_render_pass"), 2);

    assert!(matches!(
        pass.prepare_render_pass_begin_info(ClearFlags::DEPTH),
        Err(GpuError::MissingRenderPassVariant(flags)) if flags == ClearFlags::DEPTH
    ));
    assert!(pass
        .prepare_render_pass_begin_info(ClearFlags::RENDER_TARGETS | ClearFlags::STENCIL)
        .is_err());
}

#[test]
fn writable_depth_stencil_builds_every_variant() {
    let mock = MockDevice::new();
    let device = mock.render_device().unwrap();
    let pass = DrawPass::create(
        &device,
        DrawPassDesc::new(source(Some(vk::Format::D24_UNORM_S8_UINT)))
            .with_render_target_ops(ColorAttachmentDesc::clear(ResourceState::ShaderResource))
            .with_depth_stencil_ops(DepthAttachmentDesc::clear()),
    )
    .unwrap();

    assert_eq!(pass.built_variants().count(), 8);
}

#[test]
fn depth_only_format_skips_stencil_variants() {
    let mock = MockDevice::new();
    let device = mock.render_device().unwrap();
    let pass = DrawPass::create(
        &device,
        DrawPassDesc::new(source(Some(vk::Format::D32_SFLOAT)))
            .with_render_target_ops(ColorAttachmentDesc::clear(ResourceState::ShaderResource))
            .with_depth_stencil_ops(DepthAttachmentDesc::clear()),
    )
    .unwrap();

    assert!(pass.built_variants().all(|f| !f.contains(ClearFlags::STENCIL)));
    assert_eq!(pass.built_variants().count(), 4);
}

#[test]
fn begin_info_selects_the_requested_variant() {
    let mock = MockDevice::new();
    let device = mock.render_device().unwrap();
    let mut pass = read_only_depth_pass(&device);
    pass.set_clear_color([0.0, 1.0, 0.0, 1.0]);

    let expected = pass.variant(ClearFlags::RENDER_TARGETS).unwrap().handle();
    let mut list = CommandList::new(&device, CommandType::Graphics).unwrap();
    list.begin().unwrap();
    {
        let info = pass
            .prepare_render_pass_begin_info(ClearFlags::RENDER_TARGETS)
            .unwrap();
        assert_eq!(info.render_pass.handle(), expected);
        assert_eq!(info.render_area.extent, EXTENT);
        list.begin_render_pass(&info).unwrap();
    }
    list.end_render_pass();
    list.end().unwrap();

    let begins = mock.calls_named("cmd_begin_render_pass");
    assert_eq!(begins.len(), 1);
    assert_eq!(begins[0].detail, expected.as_raw());
}

#[test]
fn image_source_derives_views_over_the_given_images() {
    let mock = MockDevice::new();
    let device = mock.render_device().unwrap();
    let color = Arc::new(
        Image::create(
            &device,
            ImageDesc::new_2d(
                EXTENT.width,
                EXTENT.height,
                vk::Format::R8G8B8A8_UNORM,
                vk::ImageUsageFlags::COLOR_ATTACHMENT,
            ),
        )
        .unwrap(),
    );
    let depth = Arc::new(
        Image::create(
            &device,
            ImageDesc::depth_stencil(EXTENT.width, EXTENT.height, vk::Format::D32_SFLOAT),
        )
        .unwrap(),
    );
    mock.clear_calls();

    let pass = DrawPass::create(
        &device,
        DrawPassDesc::new(RenderPassSource::Images {
            render_targets: vec![color.clone()],
            depth_stencil: Some(depth.clone()),
        }),
    )
    .unwrap();

    let attachments = pass.attachments();
    assert!(Arc::ptr_eq(attachments.render_targets()[0].image(), &color));
    assert!(Arc::ptr_eq(attachments.depth_stencil().unwrap().image(), &depth));
    assert_eq!(mock.count("create_image_view"), 2);
    assert_eq!(mock.count("create_image"), 0);
}

#[test]
fn viewport_and_scissor_cover_the_pass_extent() {
    let mock = MockDevice::new();
    let device = mock.render_device().unwrap();
    let pass = read_only_depth_pass(&device);

    let mut list = CommandList::new(&device, CommandType::Graphics).unwrap();
    list.begin().unwrap();
    {
        let info = pass.prepare_render_pass_begin_info(ClearFlags::empty()).unwrap();
        list.begin_render_pass(&info).unwrap();
        list.set_viewport_and_scissor(info.render_area.extent);
    }
    list.end_render_pass();
    list.end().unwrap();

    assert_eq!(mock.count("cmd_set_viewport"), 1);
    let scissors = mock.calls_named("cmd_set_scissor");
    assert_eq!(scissors.len(), 1);
    assert_eq!(
        scissors[0].detail,
        (u64::from(EXTENT.width) << 32) | u64::from(EXTENT.height)
    );
}

#[test]
#[should_panic(expected = "cannot be cleared")]
fn clearing_read_only_depth_is_fatal() {
    let mock = MockDevice::new();
    let device = mock.render_device().unwrap();
    let ops = DepthAttachmentDesc {
        depth_load_op: vk::AttachmentLoadOp::CLEAR,
        ..DepthAttachmentDesc::read_only()
    };

    let _ = DrawPass::create(
        &device,
        DrawPassDesc::new(source(Some(vk::Format::D24_UNORM_S8_UINT)))
            .with_depth_stencil_ops(ops)
            .with_name("cleared read-only depth"),
    );
}

#[test]
#[should_panic(expected = "inside an active")]
fn nested_render_pass_is_fatal() {
    let mock = MockDevice::new();
    let device = mock.render_device().unwrap();
    let pass = read_only_depth_pass(&device);
    let info = pass.prepare_render_pass_begin_info(ClearFlags::empty()).unwrap();

    let mut list = CommandList::new(&device, CommandType::Graphics).unwrap();
    list.begin().unwrap();
    list.begin_render_pass(&info).unwrap();
    let _ = list.begin_render_pass(&info);
}

#[test]
#[should_panic(expected = "ended inside")]
fn ending_a_list_inside_a_pass_is_fatal() {
    let mock = MockDevice::new();
    let device = mock.render_device().unwrap();
    let pass = read_only_depth_pass(&device);
    let info = pass.prepare_render_pass_begin_info(ClearFlags::empty()).unwrap();

    let mut list = CommandList::new(&device, CommandType::Graphics).unwrap();
    list.begin().unwrap();
    list.begin_render_pass(&info).unwrap();
    let _ = list.end();
}

//! Frame pipelining against the recording backend.

use std::sync::Arc;

use vellum_gpu::vk::Handle;
use vellum_gpu::{
    vk, AcquireOutcome, FrameConfig, FrameInfo, FrameSynchronizer, GpuError, PresentOutcome,
    RawSurface, WindowSurface,
};
use vellum_test::{MockDevice, MockSurface, MockWindow};

struct Rig {
    mock: Arc<MockDevice>,
    surface: Arc<MockSurface>,
    window: Arc<MockWindow>,
    frames: FrameSynchronizer,
}

fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn rig(config: FrameConfig) -> Rig {
    init_logging();
    let mock = MockDevice::new();
    let device = mock.render_device().unwrap();
    let surface = MockSurface::new(&mock);
    let window = MockWindow::new(800, 600);
    let raw_surface: Arc<dyn RawSurface> = surface.clone();
    let window_surface: Arc<dyn WindowSurface> = window.clone();
    let frames = FrameSynchronizer::new(&device, raw_surface, window_surface, config).unwrap();
    Rig {
        mock,
        surface,
        window,
        frames,
    }
}

/// Record an empty swapchain pass and finish the frame.
fn run_frame(frames: &mut FrameSynchronizer) -> vk::CommandBuffer {
    let cmd = {
        let FrameInfo {
            render_pass_begin_info,
            command_list,
            ..
        } = frames.begin_frame().unwrap();
        command_list.begin_render_pass(&render_pass_begin_info).unwrap();
        command_list.end_render_pass();
        command_list.end().unwrap();
        command_list.handle()
    };
    frames.end_frame().unwrap();
    cmd
}

/// Begin a frame and end its command list without recording anything.
fn skip_recording(frames: &mut FrameSynchronizer) -> u32 {
    let FrameInfo {
        image_index,
        command_list,
        ..
    } = frames.begin_frame().unwrap();
    command_list.end().unwrap();
    image_index
}

#[test]
fn reused_slot_waits_for_its_fence_before_reset() {
    let mut rig = rig(FrameConfig::new().frames_in_flight(2));
    rig.mock.clear_calls();

    let cmds: Vec<_> = (0..3).map(|_| run_frame(&mut rig.frames)).collect();
    assert_eq!(cmds[0], cmds[2]);
    assert_ne!(cmds[0], cmds[1]);

    let calls = rig.mock.calls();
    let resets = rig.mock.positions("reset_command_buffer", cmds[0].as_raw());
    assert_eq!(resets.len(), 2);

    // The fence slot 0 waited on before its first recording.
    let first_wait = calls[..resets[0]]
        .iter()
        .rposition(|c| c.name == "wait_for_fences")
        .unwrap();
    let fence = calls[first_wait].handle;

    // Slot 0's submission signals that fence; the reuse must wait on it again
    // after the submission and before the reset.
    let submit = calls[resets[0]..]
        .iter()
        .position(|c| c.name == "queue_submit" && c.detail == 1)
        .map(|i| i + resets[0])
        .unwrap();
    let rewait = calls[..resets[1]]
        .iter()
        .rposition(|c| c.name == "wait_for_fences" && c.handle == fence)
        .unwrap();
    assert!(submit < rewait && rewait < resets[1]);

    let reset_fence = calls[rewait..resets[1]]
        .iter()
        .any(|c| c.name == "reset_fences" && c.handle == fence);
    assert!(reset_fence);
}

#[test]
#[should_panic(expected = "fence wait failed")]
fn unsignaled_fence_on_reuse_is_fatal() {
    let mut rig = rig(FrameConfig::new().frames_in_flight(2));
    rig.mock.clear_calls();
    run_frame(&mut rig.frames);
    let fence = rig.mock.calls_named("wait_for_fences")[0].handle;
    run_frame(&mut rig.frames);

    // Slot 0's work never completes.
    rig.mock.set_fence_signaled(vk::Fence::from_raw(fence), false);
    let _ = rig.frames.begin_frame();
}

#[test]
fn zero_area_window_blocks_acquire_until_restored() {
    let mut rig = rig(FrameConfig::new());
    rig.surface.push_acquire(AcquireOutcome::OutOfDate);
    rig.window.minimize_for(3);
    rig.window.resize(1024, 768);

    run_frame(&mut rig.frames);

    assert_eq!(rig.window.wait_count(), 3);
    assert_eq!(rig.mock.count("create_swapchain"), 2);
    assert_eq!(rig.mock.count("destroy_swapchain"), 1);
    assert_eq!(rig.surface.live_swapchains(), 1);
    assert_eq!(
        rig.frames.extent(),
        vk::Extent2D {
            width: 1024,
            height: 768
        }
    );
}

#[test]
fn minimized_window_blocks_construction() {
    let mock = MockDevice::new();
    let device = mock.render_device().unwrap();
    let surface = MockSurface::new(&mock);
    let window = MockWindow::new(320, 240);
    window.minimize_for(2);

    let frames = FrameSynchronizer::new(&device, surface, window.clone(), FrameConfig::new());

    assert!(frames.is_ok());
    assert_eq!(window.wait_count(), 2);
}

#[test]
fn out_of_date_present_drops_frame_and_recreates() {
    let mut rig = rig(FrameConfig::new());
    rig.surface.push_present(PresentOutcome::OutOfDate);

    run_frame(&mut rig.frames);

    assert_eq!(rig.mock.count("create_swapchain"), 2);
    assert_eq!(rig.frames.frame_number(), 1);
    assert_eq!(rig.frames.buffering_index(), 1);
}

#[test]
fn present_failure_is_not_surfaced() {
    let mut rig = rig(FrameConfig::new());
    rig.surface.push_present_error(vk::Result::ERROR_SURFACE_LOST_KHR);

    run_frame(&mut rig.frames);

    assert_eq!(rig.mock.count("create_swapchain"), 2);
}

#[test]
fn present_timeout_is_surfaced() {
    let mut rig = rig(FrameConfig::new());
    rig.surface.push_present_error(vk::Result::TIMEOUT);

    skip_recording(&mut rig.frames);
    let result = rig.frames.end_frame();

    assert!(matches!(result, Err(GpuError::Timeout(_))));
    assert_eq!(rig.frames.frame_number(), 1);
    assert_eq!(rig.frames.buffering_index(), 1);

    // The ring keeps going.
    run_frame(&mut rig.frames);
    run_frame(&mut rig.frames);
    assert_eq!(rig.frames.frame_number(), 3);
}

#[test]
fn failed_acquire_leaves_slot_ready_for_retry() {
    let mut rig = rig(FrameConfig::new().frames_in_flight(1));
    rig.surface.push_acquire_error(vk::Result::TIMEOUT);
    rig.mock.clear_calls();

    let result = rig.frames.begin_frame().map(|_| ());
    assert!(matches!(result, Err(GpuError::Timeout(_))));
    assert_eq!(rig.mock.count("reset_fences"), 0);

    run_frame(&mut rig.frames);
    assert_eq!(rig.frames.frame_number(), 1);
}

#[test]
fn failed_submit_leaves_slot_ready_for_retry() {
    let mut rig = rig(FrameConfig::new().frames_in_flight(1));
    rig.mock.fail_next_submit(vk::Result::ERROR_DEVICE_LOST);

    skip_recording(&mut rig.frames);
    let result = rig.frames.end_frame();
    assert!(matches!(
        result,
        Err(GpuError::Vulkan(vk::Result::ERROR_DEVICE_LOST))
    ));
    assert_eq!(rig.frames.frame_number(), 0);

    // Neither the begin guard nor the fence wait blocks the next frame.
    run_frame(&mut rig.frames);
    assert_eq!(rig.frames.frame_number(), 1);
}

#[test]
fn swapchain_passes_reuse_swapchain_views() {
    let rig = rig(FrameConfig::new());
    let views = rig.frames.swapchain().views();
    assert_eq!(views.len(), rig.frames.swapchain().image_count());

    for (index, view) in views.iter().enumerate() {
        let pass = rig.frames.render_pass(u32::try_from(index).unwrap()).unwrap();
        assert!(Arc::ptr_eq(&pass.attachments().render_targets()[0], view));
    }
}

#[test]
fn suboptimal_acquire_keeps_image_and_recreates_after_present() {
    let mut rig = rig(FrameConfig::new());
    rig.surface.push_acquire(AcquireOutcome::Acquired {
        index: 1,
        suboptimal: true,
    });
    rig.mock.clear_calls();

    assert_eq!(skip_recording(&mut rig.frames), 1);
    assert_eq!(rig.mock.count("create_swapchain"), 0);
    rig.frames.end_frame().unwrap();

    let calls = rig.mock.calls();
    let present = calls.iter().position(|c| c.name == "queue_present").unwrap();
    let recreate = calls
        .iter()
        .position(|c| c.name == "create_swapchain")
        .unwrap();
    assert_eq!(calls[present].detail, 1);
    assert!(present < recreate);
}

#[test]
#[should_panic(expected = "out of date again")]
fn second_out_of_date_after_recreate_is_fatal() {
    let mut rig = rig(FrameConfig::new());
    rig.surface.push_acquire(AcquireOutcome::OutOfDate);
    rig.surface.push_acquire(AcquireOutcome::OutOfDate);

    let _ = rig.frames.begin_frame();
}

#[test]
fn end_frame_requires_ended_command_list() {
    let mut rig = rig(FrameConfig::new());
    rig.frames.begin_frame().unwrap();

    assert!(matches!(
        rig.frames.end_frame(),
        Err(GpuError::InvalidState(_))
    ));
}

#[test]
fn begin_frame_twice_is_rejected() {
    let mut rig = rig(FrameConfig::new());
    skip_recording(&mut rig.frames);

    assert!(matches!(
        rig.frames.begin_frame(),
        Err(GpuError::InvalidState(_))
    ));
}

#[test]
fn frame_ring_cycles_through_every_slot() {
    let mut rig = rig(FrameConfig::new().frames_in_flight(3));
    assert_eq!(rig.frames.frames_in_flight(), 3);

    let slots: Vec<_> = (0..4)
        .map(|_| {
            let index = rig.frames.buffering_index();
            run_frame(&mut rig.frames);
            index
        })
        .collect();

    assert_eq!(slots, vec![0, 1, 2, 0]);
}

#[test]
fn swapchain_pass_clears_acquired_image() {
    let mut rig = rig(FrameConfig::new().clear_color([0.2, 0.3, 0.4, 1.0]));
    rig.mock.clear_calls();

    let (image_index, expected) = {
        let FrameInfo {
            render_pass_begin_info,
            image_index,
            command_list,
            ..
        } = rig.frames.begin_frame().unwrap();
        command_list.begin_render_pass(&render_pass_begin_info).unwrap();
        command_list.end_render_pass();
        command_list.end().unwrap();
        (image_index, render_pass_begin_info.render_pass.handle())
    };
    assert_eq!(
        rig.frames.render_pass(image_index).map(|p| p.handle()),
        Some(expected)
    );
    rig.frames.end_frame().unwrap();

    let begins = rig.mock.calls_named("cmd_begin_render_pass");
    assert_eq!(begins.len(), 1);
    assert_eq!(begins[0].detail, expected.as_raw());
}

//! Window, device and frame pipeline wiring.

use std::f32::consts::TAU;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::ActiveEventLoop;
use winit::window::{Window, WindowId};

use vellum_gpu::{
    DeviceConfig, FrameConfig, FrameInfo, FrameSynchronizer, RawDevice, RenderDevice,
    VulkanSurface, WindowSurface,
};

/// Viewer options (from CLI or defaults).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewerConfig {
    pub width: u32,
    pub height: u32,
    pub vsync: bool,
    pub frames_in_flight: usize,
    /// Exit after this many frames.
    pub frame_limit: Option<u64>,
    pub validation: bool,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            vsync: true,
            frames_in_flight: 2,
            frame_limit: None,
            validation: cfg!(debug_assertions),
        }
    }
}

impl ViewerConfig {
    /// Parse options, ignoring unknown flags and unparsable values.
    pub fn parse(args: impl IntoIterator<Item = String>) -> Self {
        let mut config = Self::default();
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--width" => {
                    if let Some(v) = args.next().and_then(|v| v.parse().ok()) {
                        config.width = v;
                    }
                }
                "--height" => {
                    if let Some(v) = args.next().and_then(|v| v.parse().ok()) {
                        config.height = v;
                    }
                }
                "--frames-in-flight" => {
                    if let Some(v) = args.next().and_then(|v| v.parse().ok()) {
                        config.frames_in_flight = v;
                    }
                }
                "--frames" => {
                    config.frame_limit = args.next().and_then(|v| v.parse().ok());
                }
                "--no-vsync" => config.vsync = false,
                "--validation" => config.validation = true,
                _ => {}
            }
        }

        config
    }
}

/// Adapts a winit window to the frame pipeline's window queries.
struct WinitSurface {
    window: Arc<Window>,
}

impl WindowSurface for WinitSurface {
    fn framebuffer_size(&self) -> (u32, u32) {
        let size = self.window.inner_size();
        (size.width, size.height)
    }

    fn wait_events(&self) {
        // The event loop owns dispatch; the OS updates the size in the meantime.
        std::thread::sleep(Duration::from_millis(16));
    }
}

/// Color for a point in time: a hue cycle with a ten second period.
pub fn clear_color_at(seconds: f32) -> [f32; 4] {
    let phase = seconds / 10.0 * TAU;
    let channel = |offset: f32| 0.5 + 0.5 * (phase + offset).sin();
    [channel(0.0), channel(TAU / 3.0), channel(2.0 * TAU / 3.0), 1.0]
}

/// Running viewer state.
struct ViewerState {
    // Dropped in order: the pipeline before the device, the window last.
    frames: FrameSynchronizer,
    device: Arc<RenderDevice>,
    window: Arc<Window>,
    started: Instant,
}

impl ViewerState {
    fn create(config: &ViewerConfig, event_loop: &ActiveEventLoop) -> anyhow::Result<Self> {
        let attrs = Window::default_attributes()
            .with_title("Vellum Viewer")
            .with_inner_size(PhysicalSize::new(config.width, config.height));
        let window = Arc::new(event_loop.create_window(attrs)?);

        let device_config = DeviceConfig::new()
            .app_name("vellum-viewer")
            .validation(config.validation);
        let vulkan = device_config.build_vulkan()?;
        info!("GPU: {}", vulkan.capabilities().summary());

        // SAFETY: the window outlives the surface; it is dropped last
        let surface = unsafe { VulkanSurface::from_window(&vulkan, window.as_ref())? };
        let raw: Arc<dyn RawDevice> = vulkan;
        let device = RenderDevice::new(raw, &device_config)?;

        let frames = FrameSynchronizer::new(
            &device,
            surface,
            Arc::new(WinitSurface {
                window: window.clone(),
            }),
            FrameConfig::new()
                .frames_in_flight(config.frames_in_flight)
                .vsync(config.vsync),
        )?;
        info!(
            "Frame pipeline ready: {:?}, {} frames in flight",
            frames.extent(),
            frames.frames_in_flight()
        );

        Ok(Self {
            frames,
            device,
            window,
            started: Instant::now(),
        })
    }

    fn render_frame(&mut self) -> anyhow::Result<()> {
        let color = clear_color_at(self.started.elapsed().as_secs_f32());
        self.frames.set_clear_color(color);

        {
            let FrameInfo {
                render_pass_begin_info,
                command_list,
                ..
            } = self.frames.begin_frame()?;
            command_list.begin_render_pass(&render_pass_begin_info)?;
            command_list.end_render_pass();
            command_list.end()?;
        }
        self.frames.end_frame()?;
        Ok(())
    }

    fn shutdown(self) {
        if let Err(e) = self.device.wait_idle() {
            warn!("Wait idle at shutdown failed: {e}");
        }
        info!(
            "Presented {} frames in {:.1}s",
            self.frames.frame_number(),
            self.started.elapsed().as_secs_f32()
        );
    }
}

/// winit application driving the viewer.
pub struct Viewer {
    config: ViewerConfig,
    state: Option<ViewerState>,
}

impl Viewer {
    pub fn new(config: ViewerConfig) -> Self {
        Self {
            config,
            state: None,
        }
    }

    fn exit(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(state) = self.state.take() {
            state.shutdown();
        }
        event_loop.exit();
    }
}

impl ApplicationHandler for Viewer {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }

        match ViewerState::create(&self.config, event_loop) {
            Ok(state) => self.state = Some(state),
            Err(e) => {
                error!("Failed to initialize viewer: {e}");
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested");
                self.exit(event_loop);
            }
            WindowEvent::Resized(size) => {
                if size.width == 0 || size.height == 0 {
                    return;
                }
                if let Some(state) = &mut self.state {
                    if let Err(e) = state.frames.recreate() {
                        error!("Swapchain recreation failed: {e}");
                    }
                }
            }
            WindowEvent::RedrawRequested => {
                let Some(state) = &mut self.state else {
                    return;
                };
                if let Err(e) = state.render_frame() {
                    error!("Render error: {e}");
                }
                let done = self
                    .config
                    .frame_limit
                    .is_some_and(|limit| state.frames.frame_number() >= limit);
                if done {
                    self.exit(event_loop);
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = &self.state {
            state.window.request_redraw();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn parses_every_option() {
        let config = ViewerConfig::parse(args(&[
            "--width",
            "640",
            "--height",
            "480",
            "--no-vsync",
            "--frames",
            "120",
            "--frames-in-flight",
            "3",
            "--validation",
        ]));

        assert_eq!(config.width, 640);
        assert_eq!(config.height, 480);
        assert!(!config.vsync);
        assert_eq!(config.frame_limit, Some(120));
        assert_eq!(config.frames_in_flight, 3);
        assert!(config.validation);
    }

    #[test]
    fn bad_values_keep_defaults() {
        let config = ViewerConfig::parse(args(&["--width", "wide", "--unknown"]));
        assert_eq!(config, ViewerConfig::default());
    }

    #[test]
    fn clear_color_stays_in_range() {
        for step in 0..100 {
            let color = clear_color_at(step as f32 * 0.37);
            assert!(color.iter().all(|c| (0.0..=1.0).contains(c)));
            assert!((color[3] - 1.0).abs() < f32::EPSILON);
        }
    }
}

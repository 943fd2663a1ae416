//! Presentation surfaces and the window collaborator.
//!
//! [`RawSurface`] is the presentation half of the native backend: surface queries,
//! swapchain handles, acquire and present. [`WindowSurface`] is what the frame
//! pipeline needs from a window: its framebuffer size and a way to block on events.

use ash::vk;

use crate::error::Result;
use crate::swapchain::{select_present_mode, select_surface_format};

/// Surface capabilities query result.
#[derive(Debug, Clone)]
pub struct SurfaceCapabilities {
    /// Raw surface capabilities.
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported surface formats.
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes.
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceCapabilities {
    /// Get the recommended surface format.
    pub fn recommended_format(&self) -> Result<vk::SurfaceFormatKHR> {
        select_surface_format(&self.formats)
    }

    /// Get the recommended present mode.
    pub fn recommended_present_mode(&self, vsync: bool) -> vk::PresentModeKHR {
        select_present_mode(&self.present_modes, vsync)
    }
}

/// Result of acquiring a swapchain image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image was acquired; its semaphore will be signaled.
    Acquired { index: u32, suboptimal: bool },
    /// No image was acquired; the swapchain must be recreated.
    OutOfDate,
}

/// Result of presenting a swapchain image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

impl PresentOutcome {
    /// Whether the swapchain should be recreated.
    pub fn needs_recreate(self) -> bool {
        self != Self::Presented
    }
}

/// Native presentation entry points.
///
/// # Safety
/// Every `unsafe` method has the validity requirements of the Vulkan command it wraps.
pub trait RawSurface: Send + Sync {
    /// Native surface handle.
    fn handle(&self) -> vk::SurfaceKHR;

    /// Current capabilities, formats and present modes.
    fn capabilities(&self) -> Result<SurfaceCapabilities>;

    unsafe fn create_swapchain(
        &self,
        info: &vk::SwapchainCreateInfoKHR<'_>,
    ) -> Result<vk::SwapchainKHR>;
    unsafe fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);
    unsafe fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> Result<Vec<vk::Image>>;

    /// Expiry of `timeout_ns` is [`GpuError::Timeout`](crate::GpuError::Timeout).
    unsafe fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout_ns: u64,
        semaphore: vk::Semaphore,
    ) -> Result<AcquireOutcome>;

    unsafe fn queue_present(
        &self,
        queue: vk::Queue,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<PresentOutcome>;
}

/// The window a surface presents to.
pub trait WindowSurface: Send + Sync {
    /// Current framebuffer size in pixels; zero while minimized.
    fn framebuffer_size(&self) -> (u32, u32);

    /// Block until the window system delivers more events.
    fn wait_events(&self);
}

//! Window surfaces for the Vulkan backend.
//!
//! Hides the raw-window-handle plumbing from application code.

use std::sync::Arc;

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use super::VulkanDevice;
use crate::error::{api_failure, GpuError, Result};
use crate::surface::{AcquireOutcome, PresentOutcome, RawSurface, SurfaceCapabilities};

/// A window surface with its swapchain loader.
pub struct VulkanSurface {
    device: Arc<VulkanDevice>,
    surface: vk::SurfaceKHR,
    surface_loader: ash::khr::surface::Instance,
    swapchain_loader: ash::khr::swapchain::Device,
}

impl VulkanSurface {
    /// Create a surface for a window.
    ///
    /// The graphics queue family must be able to present to it.
    ///
    /// # Safety
    /// The window must outlive the surface.
    pub unsafe fn from_window<W>(device: &Arc<VulkanDevice>, window: &W) -> Result<Arc<Self>>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        if device.is_headless() {
            return Err(GpuError::ExtensionNotSupported(
                "surfaces on a headless device".to_string(),
            ));
        }

        let display = window
            .display_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get display handle: {e}")))?;
        let window_handle = window
            .window_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get window handle: {e}")))?;

        // SAFETY: forwarded from the caller
        let surface = unsafe {
            ash_window::create_surface(
                device.entry(),
                device.instance(),
                display.as_raw(),
                window_handle.as_raw(),
                None,
            )
        }
        .map_err(|e| GpuError::SurfaceCreation(e.to_string()))?;

        let surface_loader = ash::khr::surface::Instance::new(device.entry(), device.instance());
        let swapchain_loader = ash::khr::swapchain::Device::new(device.instance(), device.device());

        let graphics = device.info.queue_families.graphics;
        // SAFETY: the surface was just created from this instance
        let supported = unsafe {
            surface_loader.get_physical_device_surface_support(
                device.physical_device(),
                graphics,
                surface,
            )
        };
        if !matches!(supported, Ok(true)) {
            // SAFETY: nothing uses the surface yet
            unsafe { surface_loader.destroy_surface(surface, None) };
            return Err(GpuError::SurfaceCreation(format!(
                "queue family {graphics} cannot present to this surface"
            )));
        }

        tracing::debug!("Window surface created");
        Ok(Arc::new(Self {
            device: device.clone(),
            surface,
            surface_loader,
            swapchain_loader,
        }))
    }
}

impl RawSurface for VulkanSurface {
    fn handle(&self) -> vk::SurfaceKHR {
        self.surface
    }

    fn capabilities(&self) -> Result<SurfaceCapabilities> {
        let physical_device = self.device.physical_device();
        // SAFETY: the surface and physical device belong to the same instance
        unsafe {
            let capabilities = self
                .surface_loader
                .get_physical_device_surface_capabilities(physical_device, self.surface)
                .map_err(|e| api_failure("vkGetPhysicalDeviceSurfaceCapabilitiesKHR", e))?;
            let formats = self
                .surface_loader
                .get_physical_device_surface_formats(physical_device, self.surface)
                .map_err(|e| api_failure("vkGetPhysicalDeviceSurfaceFormatsKHR", e))?;
            let present_modes = self
                .surface_loader
                .get_physical_device_surface_present_modes(physical_device, self.surface)
                .map_err(|e| api_failure("vkGetPhysicalDeviceSurfacePresentModesKHR", e))?;

            Ok(SurfaceCapabilities {
                capabilities,
                formats,
                present_modes,
            })
        }
    }

    unsafe fn create_swapchain(
        &self,
        info: &vk::SwapchainCreateInfoKHR<'_>,
    ) -> Result<vk::SwapchainKHR> {
        // SAFETY: forwarded from the caller
        unsafe { self.swapchain_loader.create_swapchain(info, None) }
            .map_err(|e| GpuError::SwapchainCreation(e.to_string()))
    }

    unsafe fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        // SAFETY: forwarded from the caller
        unsafe { self.swapchain_loader.destroy_swapchain(swapchain, None) }
    }

    unsafe fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> Result<Vec<vk::Image>> {
        // SAFETY: forwarded from the caller
        unsafe { self.swapchain_loader.get_swapchain_images(swapchain) }
            .map_err(|e| api_failure("vkGetSwapchainImagesKHR", e))
    }

    unsafe fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout_ns: u64,
        semaphore: vk::Semaphore,
    ) -> Result<AcquireOutcome> {
        // SAFETY: forwarded from the caller
        let acquired = unsafe {
            self.swapchain_loader
                .acquire_next_image(swapchain, timeout_ns, semaphore, vk::Fence::null())
        };
        match acquired {
            Ok((index, suboptimal)) => Ok(AcquireOutcome::Acquired { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(vk::Result::TIMEOUT | vk::Result::NOT_READY) => {
                tracing::error!("Swapchain acquire timed out after {timeout_ns} ns");
                Err(GpuError::Timeout("swapchain image"))
            }
            Err(e) => Err(api_failure("vkAcquireNextImageKHR", e)),
        }
    }

    unsafe fn queue_present(
        &self,
        queue: vk::Queue,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<PresentOutcome> {
        let swapchains = [swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        // SAFETY: forwarded from the caller
        match unsafe { self.swapchain_loader.queue_present(queue, &present_info) } {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err(api_failure("vkQueuePresentKHR", e)),
        }
    }
}

impl Drop for VulkanSurface {
    fn drop(&mut self) {
        // SAFETY: swapchains hold an Arc to this surface, so none remain
        unsafe { self.surface_loader.destroy_surface(self.surface, None) };
    }
}

//! Swapchain management.

use std::sync::Arc;

use ash::vk;

use crate::device::RenderDevice;
use crate::error::{GpuError, Result};
use crate::image::{Image, ImageDesc, ImageView, ImageViewDesc};
use crate::object::Ownership;
use crate::queue::Queue;
use crate::surface::{AcquireOutcome, PresentOutcome, RawSurface};

/// Swapchain wrapper.
///
/// Swapchain images are wrapped as [`Ownership::Restricted`] images: visible to
/// callers, destroyed only with the swapchain.
pub struct Swapchain {
    device: Arc<RenderDevice>,
    surface: Arc<dyn RawSurface>,
    handle: vk::SwapchainKHR,
    // Views before images: dropped in declaration order.
    views: Vec<Arc<ImageView>>,
    images: Vec<Arc<Image>>,
    format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
    vsync: bool,
}

struct SwapchainParts {
    handle: vk::SwapchainKHR,
    views: Vec<Arc<ImageView>>,
    images: Vec<Arc<Image>>,
    format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
}

impl Swapchain {
    /// Create a swapchain for a surface.
    pub fn new(
        device: &Arc<RenderDevice>,
        surface: Arc<dyn RawSurface>,
        width: u32,
        height: u32,
        vsync: bool,
    ) -> Result<Self> {
        let parts = Self::build(
            device,
            surface.as_ref(),
            width,
            height,
            vsync,
            vk::SwapchainKHR::null(),
        )?;
        Ok(Self {
            device: device.clone(),
            surface,
            handle: parts.handle,
            views: parts.views,
            images: parts.images,
            format: parts.format,
            present_mode: parts.present_mode,
            extent: parts.extent,
            vsync,
        })
    }

    fn build(
        device: &Arc<RenderDevice>,
        surface: &dyn RawSurface,
        width: u32,
        height: u32,
        vsync: bool,
        old_swapchain: vk::SwapchainKHR,
    ) -> Result<SwapchainParts> {
        let caps = surface.capabilities()?;
        let format = select_surface_format(&caps.formats)?;
        let present_mode = select_present_mode(&caps.present_modes, vsync);
        let extent = calculate_extent(&caps.capabilities, width, height);
        if extent.width == 0 || extent.height == 0 {
            return Err(GpuError::SwapchainCreation(format!(
                "zero-area extent {}x{}",
                extent.width, extent.height
            )));
        }

        // Determine image count
        let mut image_count = caps.capabilities.min_image_count + 1;
        if caps.capabilities.max_image_count > 0
            && image_count > caps.capabilities.max_image_count
        {
            image_count = caps.capabilities.max_image_count;
        }

        let usage = vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST;
        let queue_families = [device.graphics_queue().family()];
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface.handle())
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(usage)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .queue_family_indices(&queue_families)
            .pre_transform(caps.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        // SAFETY: the surface outlives the swapchain
        let handle = unsafe { surface.create_swapchain(&create_info)? };

        let wrap = || -> Result<(Vec<Arc<Image>>, Vec<Arc<ImageView>>)> {
            // SAFETY: the swapchain was just created
            let natives = unsafe { surface.swapchain_images(handle)? };
            let mut images = Vec::with_capacity(natives.len());
            let mut views = Vec::with_capacity(natives.len());
            for (i, native) in natives.into_iter().enumerate() {
                let desc = ImageDesc::new_2d(extent.width, extent.height, format.format, usage)
                    .with_name(format!("swapchain image {i}"))
                    .with_existing(native, Ownership::Restricted);
                let image = Arc::new(Image::create(device, desc)?);
                views.push(Arc::new(ImageView::create(
                    device,
                    ImageViewDesc::attachment(image.clone()),
                )?));
                images.push(image);
            }
            Ok((images, views))
        };

        let (images, views) = match wrap() {
            Ok(wrapped) => wrapped,
            Err(e) => {
                // SAFETY: nothing references the new swapchain yet
                unsafe { surface.destroy_swapchain(handle) };
                return Err(e);
            }
        };

        tracing::info!(
            "Swapchain created: {}x{}, {} images, {:?}, {:?}",
            extent.width,
            extent.height,
            images.len(),
            format.format,
            present_mode
        );

        Ok(SwapchainParts {
            handle,
            views,
            images,
            format,
            present_mode,
            extent,
        })
    }

    /// Rebuild for a new size.
    ///
    /// Blocks until the device is idle, then replaces every image and view. Callers must
    /// drop anything referencing the old views (framebuffers, passes) beforehand.
    pub fn recreate(&mut self, width: u32, height: u32) -> Result<()> {
        self.device.wait_idle()?;

        self.views.clear();
        self.images.clear();
        let old = self.handle;
        let built = Self::build(
            &self.device,
            self.surface.as_ref(),
            width,
            height,
            self.vsync,
            old,
        );
        // SAFETY: the device is idle and the old images are no longer wrapped
        unsafe { self.surface.destroy_swapchain(old) };
        self.handle = vk::SwapchainKHR::null();

        let parts = built?;
        self.handle = parts.handle;
        self.views = parts.views;
        self.images = parts.images;
        self.format = parts.format;
        self.present_mode = parts.present_mode;
        self.extent = parts.extent;

        tracing::info!("Swapchain recreated: {}x{}", width, height);
        Ok(())
    }

    /// Acquire the next image, signaling `semaphore` once it is ready.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn acquire_next_image(
        &self,
        semaphore: vk::Semaphore,
        timeout_ns: u64,
    ) -> Result<AcquireOutcome> {
        // SAFETY: the swapchain and semaphore are valid
        unsafe {
            self.surface
                .acquire_next_image(self.handle, timeout_ns, semaphore)
        }
    }

    /// Present an image after `wait_semaphores` signal.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn present(
        &self,
        queue: &Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<PresentOutcome> {
        queue.present(self.surface.as_ref(), self.handle, image_index, wait_semaphores)
    }

    pub fn handle(&self) -> vk::SwapchainKHR {
        self.handle
    }

    pub fn images(&self) -> &[Arc<Image>] {
        &self.images
    }

    pub fn views(&self) -> &[Arc<ImageView>] {
        &self.views
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn format(&self) -> vk::Format {
        self.format.format
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.views.clear();
        self.images.clear();
        if self.handle != vk::SwapchainKHR::null() {
            // SAFETY: the owner waited for presentation to finish
            unsafe { self.surface.destroy_swapchain(self.handle) };
        }
    }
}

/// Select the best surface format.
pub fn select_surface_format(available: &[vk::SurfaceFormatKHR]) -> Result<vk::SurfaceFormatKHR> {
    // Prefer SRGB
    for format in available {
        if format.format == vk::Format::B8G8R8A8_SRGB
            && format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        {
            return Ok(*format);
        }
    }

    // Fall back to first available
    available
        .first()
        .copied()
        .ok_or_else(|| GpuError::SwapchainCreation("surface reports no formats".to_string()))
}

/// Select the best present mode.
pub fn select_present_mode(available: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if vsync {
        // FIFO is always supported
        return vk::PresentModeKHR::FIFO;
    }
    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|mode| available.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Calculate swapchain extent.
pub fn calculate_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    desired_width: u32,
    desired_height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: desired_width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: desired_height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface_format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    #[test]
    fn prefers_srgb_bgra() {
        let available = [
            surface_format(vk::Format::R8G8B8A8_UNORM),
            surface_format(vk::Format::B8G8R8A8_SRGB),
        ];
        assert_eq!(
            select_surface_format(&available).unwrap().format,
            vk::Format::B8G8R8A8_SRGB
        );
    }

    #[test]
    fn falls_back_to_first_format() {
        let available = [surface_format(vk::Format::R8G8B8A8_UNORM)];
        assert_eq!(
            select_surface_format(&available).unwrap().format,
            vk::Format::R8G8B8A8_UNORM
        );
        assert!(select_surface_format(&[]).is_err());
    }

    #[test]
    fn present_mode_selection() {
        let all = [
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::FIFO,
        ];
        assert_eq!(select_present_mode(&all, true), vk::PresentModeKHR::FIFO);
        assert_eq!(select_present_mode(&all, false), vk::PresentModeKHR::MAILBOX);
        assert_eq!(
            select_present_mode(&[vk::PresentModeKHR::IMMEDIATE], false),
            vk::PresentModeKHR::IMMEDIATE
        );
        assert_eq!(select_present_mode(&[], false), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn extent_follows_surface_when_fixed() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
            ..Default::default()
        };
        assert_eq!(
            calculate_extent(&caps, 1024, 768),
            vk::Extent2D {
                width: 800,
                height: 600
            }
        );
    }

    #[test]
    fn extent_clamps_desired_size() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 64,
                height: 64,
            },
            max_image_extent: vk::Extent2D {
                width: 1920,
                height: 1080,
            },
            ..Default::default()
        };
        assert_eq!(
            calculate_extent(&caps, 4000, 10),
            vk::Extent2D {
                width: 1920,
                height: 64
            }
        );
    }
}

//! Vulkan backend: [`VulkanDevice`] implements [`RawDevice`] with `ash` and
//! `gpu-allocator`, [`VulkanSurface`] implements [`RawSurface`](crate::surface::RawSurface).

mod capabilities;
mod device;
mod instance;
mod memory;
mod surface;

pub use capabilities::{is_vulkan_1_3, GpuCapabilities, GpuVendor};
pub use instance::find_queue_families;
pub use memory::MemoryAllocator;
pub use surface::VulkanSurface;

use std::collections::HashSet;
use std::ffi::CStr;
use std::sync::Arc;

use ash::vk;
use parking_lot::Mutex;

use crate::device::{DeviceConfig, DeviceInfo, QueueFamilies, RawDevice, RenderDevice};
use crate::error::{api_failure, GpuError, Result};

/// A Vulkan 1.3 device with its instance and allocator.
pub struct VulkanDevice {
    // Entry must be kept alive for the lifetime of the device
    entry: ash::Entry,
    instance: ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    push_descriptor: Option<ash::khr::push_descriptor::Device>,
    capabilities: GpuCapabilities,
    info: DeviceInfo,
    allocator: Mutex<MemoryAllocator>,
    headless: bool,
}

impl VulkanDevice {
    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn capabilities(&self) -> &GpuCapabilities {
        &self.capabilities
    }

    /// Whether the device was opened without window-system extensions.
    pub fn is_headless(&self) -> bool {
        self.headless
    }

    pub(crate) fn allocator(&self) -> &Mutex<MemoryAllocator> {
        &self.allocator
    }

    pub(crate) fn push_descriptor_loader(&self) -> Option<&ash::khr::push_descriptor::Device> {
        self.push_descriptor.as_ref()
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        // SAFETY: every object created from this device holds an Arc to it,
        // so nothing else is alive once it drops
        unsafe {
            let _ = self.device.device_wait_idle();

            // Shutdown allocator BEFORE destroying device
            self.allocator.lock().shutdown();

            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
        tracing::debug!("Vulkan device destroyed");
    }
}

impl DeviceConfig {
    /// Open the Vulkan backend.
    pub fn build_vulkan(&self) -> Result<Arc<VulkanDevice>> {
        // SAFETY: loading the system Vulkan library
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| GpuError::Other(format!("Failed to load Vulkan: {e}")))?;

        // SAFETY: the entry was just loaded
        let instance = unsafe {
            instance::create_instance(
                &entry,
                &self.app_name,
                self.enable_validation,
                self.headless,
            )?
        };

        // SAFETY: the instance is valid; it is destroyed on every error path below
        match unsafe { self.open_device(entry, &instance) } {
            Ok(device) => Ok(device),
            Err(e) => {
                // SAFETY: nothing was created from the instance
                unsafe { instance.destroy_instance(None) };
                Err(e)
            }
        }
    }

    unsafe fn open_device(
        &self,
        entry: ash::Entry,
        instance: &ash::Instance,
    ) -> Result<Arc<VulkanDevice>> {
        // SAFETY: forwarded from the caller
        let physical_device = unsafe { instance::select_physical_device(instance)? };
        // SAFETY: forwarded from the caller
        let capabilities = unsafe { GpuCapabilities::query(instance, physical_device) };
        if !capabilities.meets_requirements() {
            return Err(GpuError::NoSuitableDevice);
        }

        tracing::info!("Selected GPU: {}", capabilities.summary());

        // SAFETY: forwarded from the caller
        let queue_families = instance::find_queue_families(&unsafe {
            instance.get_physical_device_queue_family_properties(physical_device)
        })?;

        let mut extensions: Vec<&CStr> = Vec::new();
        if !self.headless {
            if !capabilities.has_extension(ash::khr::swapchain::NAME) {
                return Err(GpuError::ExtensionNotSupported(
                    "VK_KHR_swapchain".to_string(),
                ));
            }
            extensions.push(ash::khr::swapchain::NAME);
        }
        let push_descriptor = self.push_descriptors && capabilities.supports_push_descriptor;
        if push_descriptor {
            extensions.push(ash::khr::push_descriptor::NAME);
        }
        if cfg!(target_os = "macos") && capabilities.has_extension(c"VK_KHR_portability_subset") {
            extensions.push(c"VK_KHR_portability_subset");
        }

        // SAFETY: forwarded from the caller
        let device = unsafe {
            create_device(
                instance,
                physical_device,
                &queue_families,
                &extensions,
                &capabilities,
            )?
        };

        // SAFETY: the device was just created from this instance
        let allocator = match unsafe { MemoryAllocator::new(instance, &device, physical_device) } {
            Ok(allocator) => allocator,
            Err(e) => {
                // SAFETY: nothing was created from the device
                unsafe { device.destroy_device(None) };
                return Err(e);
            }
        };

        let push_descriptor =
            push_descriptor.then(|| ash::khr::push_descriptor::Device::new(instance, &device));

        let info = DeviceInfo {
            name: capabilities.device_name.clone(),
            queue_families,
            features: capabilities.device_features(push_descriptor.is_some()),
            limits: capabilities.limits,
        };

        Ok(Arc::new(VulkanDevice {
            entry,
            instance: instance.clone(),
            physical_device,
            device,
            push_descriptor,
            capabilities,
            info,
            allocator: Mutex::new(allocator),
            headless: self.headless,
        }))
    }

    /// Open the Vulkan backend and wrap it in a render device.
    pub fn build(self) -> Result<Arc<RenderDevice>> {
        let raw: Arc<dyn RawDevice> = self.build_vulkan()?;
        RenderDevice::new(raw, &self)
    }
}

/// Create the logical device.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn create_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    queue_families: &QueueFamilies,
    extensions: &[&CStr],
    capabilities: &GpuCapabilities,
) -> Result<ash::Device> {
    let unique_families: HashSet<u32> = [
        queue_families.graphics,
        queue_families.compute,
        queue_families.transfer,
    ]
    .into_iter()
    .collect();

    let queue_priority = 1.0_f32;
    let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
        .iter()
        .map(|&family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(std::slice::from_ref(&queue_priority))
        })
        .collect();

    let extension_names: Vec<*const std::ffi::c_char> =
        extensions.iter().map(|ext| ext.as_ptr()).collect();

    // Enable Vulkan 1.3 features
    let mut vulkan_1_3_features = vk::PhysicalDeviceVulkan13Features::default()
        .dynamic_rendering(true)
        .synchronization2(true);

    let features = vk::PhysicalDeviceFeatures::default()
        .geometry_shader(capabilities.supports_geometry_shader)
        .tessellation_shader(capabilities.supports_tessellation_shader)
        .pipeline_statistics_query(capabilities.supports_pipeline_statistics_query);

    let mut features2 = vk::PhysicalDeviceFeatures2::default()
        .features(features)
        .push_next(&mut vulkan_1_3_features);

    let device_create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extension_names)
        .push_next(&mut features2);

    // SAFETY: forwarded from the caller
    let device = unsafe { instance.create_device(physical_device, &device_create_info, None) }
        .map_err(|e| api_failure("vkCreateDevice", e))?;

    tracing::debug!(
        "Logical device created with {} queue families and extensions {:?}",
        unique_families.len(),
        extensions
    );
    Ok(device)
}

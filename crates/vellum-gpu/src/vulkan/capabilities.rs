//! GPU capability detection.

use std::collections::HashSet;
use std::ffi::CStr;

use ash::vk;

use crate::device::{DeviceFeatures, DeviceLimits};

/// GPU vendor identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    Apple,
    Other(u32),
}

impl GpuVendor {
    /// Identify vendor from PCI vendor ID.
    pub fn from_vendor_id(id: u32) -> Self {
        match id {
            0x10DE => Self::Nvidia,
            0x1002 => Self::Amd,
            0x8086 => Self::Intel,
            0x106B => Self::Apple,
            other => Self::Other(other),
        }
    }
}

/// Whether an API version is at least 1.3.
pub fn is_vulkan_1_3(api_version: u32) -> bool {
    let major = vk::api_version_major(api_version);
    major > 1 || (major == 1 && vk::api_version_minor(api_version) >= 3)
}

/// Detected GPU capabilities.
#[derive(Debug, Clone)]
pub struct GpuCapabilities {
    pub vendor: GpuVendor,
    pub device_name: String,
    pub api_version: u32,
    pub driver_version: u32,

    // Vulkan 1.3 core features
    /// Dynamic rendering support (VK 1.3 core)
    pub supports_dynamic_rendering: bool,
    /// Synchronization2 support (VK 1.3 core)
    pub supports_synchronization2: bool,

    /// `VK_KHR_push_descriptor` is available
    pub supports_push_descriptor: bool,
    pub supports_geometry_shader: bool,
    pub supports_tessellation_shader: bool,
    pub supports_pipeline_statistics_query: bool,

    /// Device-local memory in MB
    pub device_local_memory_mb: u64,

    pub limits: DeviceLimits,

    // Available extensions
    pub available_extensions: HashSet<String>,
}

impl GpuCapabilities {
    /// Query capabilities from a physical device.
    ///
    /// # Safety
    /// The instance and physical device must be valid.
    pub unsafe fn query(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Self {
        // SAFETY: forwarded from the caller
        let (properties, features, memory_properties, extensions) = unsafe {
            (
                instance.get_physical_device_properties(physical_device),
                instance.get_physical_device_features(physical_device),
                instance.get_physical_device_memory_properties(physical_device),
                instance
                    .enumerate_device_extension_properties(physical_device)
                    .unwrap_or_default(),
            )
        };

        let available_extensions: HashSet<String> = extensions
            .iter()
            .filter_map(|ext| ext.extension_name_as_c_str().ok())
            .filter_map(|name| name.to_str().ok().map(String::from))
            .collect();

        let vendor = GpuVendor::from_vendor_id(properties.vendor_id);
        let device_name = properties
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|_| String::from("unknown device"));

        let device_local_memory_mb: u64 = memory_properties
            .memory_heaps
            .iter()
            .take(memory_properties.memory_heap_count as usize)
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size / (1024 * 1024))
            .sum();

        // Vulkan 1.3 features are core, so we check API version
        let api_version = properties.api_version;
        let has_vulkan_1_3 = is_vulkan_1_3(api_version);
        let limits = &properties.limits;

        Self {
            vendor,
            device_name,
            api_version,
            driver_version: properties.driver_version,

            supports_dynamic_rendering: has_vulkan_1_3,
            supports_synchronization2: has_vulkan_1_3,

            supports_push_descriptor: has_extension(&available_extensions, ash::khr::push_descriptor::NAME),
            supports_geometry_shader: features.geometry_shader == vk::TRUE,
            supports_tessellation_shader: features.tessellation_shader == vk::TRUE,
            supports_pipeline_statistics_query: features.pipeline_statistics_query == vk::TRUE,

            device_local_memory_mb,

            limits: DeviceLimits {
                max_color_attachments: limits.max_color_attachments,
                max_image_dimension_2d: limits.max_image_dimension2_d,
                max_bound_descriptor_sets: limits.max_bound_descriptor_sets,
                max_push_constants_size: limits.max_push_constants_size,
                timestamp_period: limits.timestamp_period,
            },

            available_extensions,
        }
    }

    /// Whether the device can run the layer: Vulkan 1.3 with synchronization2.
    pub fn meets_requirements(&self) -> bool {
        is_vulkan_1_3(self.api_version) && self.supports_synchronization2
    }

    /// Whether a named device extension is available.
    pub fn has_extension(&self, name: &CStr) -> bool {
        has_extension(&self.available_extensions, name)
    }

    /// Features as seen by the layer, given which optional extensions were enabled.
    pub fn device_features(&self, push_descriptor_enabled: bool) -> DeviceFeatures {
        DeviceFeatures {
            push_descriptor: push_descriptor_enabled,
            geometry_shader: self.supports_geometry_shader,
            tessellation_shader: self.supports_tessellation_shader,
            dynamic_rendering: self.supports_dynamic_rendering,
        }
    }

    /// Get a human-readable summary of capabilities.
    pub fn summary(&self) -> String {
        format!(
            "{} ({:?}) - Vulkan {}.{}.{} - {} MB VRAM",
            self.device_name,
            self.vendor,
            vk::api_version_major(self.api_version),
            vk::api_version_minor(self.api_version),
            vk::api_version_patch(self.api_version),
            self.device_local_memory_mb,
        )
    }
}

fn has_extension(available: &HashSet<String>, name: &CStr) -> bool {
    name.to_str().is_ok_and(|name| available.contains(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vendor_identification() {
        assert_eq!(GpuVendor::from_vendor_id(0x10DE), GpuVendor::Nvidia);
        assert_eq!(GpuVendor::from_vendor_id(0x1002), GpuVendor::Amd);
        assert_eq!(GpuVendor::from_vendor_id(0x8086), GpuVendor::Intel);
        assert_eq!(GpuVendor::from_vendor_id(0x1234), GpuVendor::Other(0x1234));
    }

    #[test]
    fn api_version_gate() {
        assert!(is_vulkan_1_3(vk::make_api_version(0, 1, 3, 0)));
        assert!(is_vulkan_1_3(vk::make_api_version(0, 1, 4, 0)));
        assert!(is_vulkan_1_3(vk::make_api_version(0, 2, 0, 0)));
        assert!(!is_vulkan_1_3(vk::make_api_version(0, 1, 2, 198)));
    }

    #[test]
    fn extension_lookup() {
        let available: HashSet<String> = [String::from("VK_KHR_push_descriptor")].into();
        assert!(has_extension(&available, ash::khr::push_descriptor::NAME));
        assert!(!has_extension(&available, ash::khr::swapchain::NAME));
    }
}

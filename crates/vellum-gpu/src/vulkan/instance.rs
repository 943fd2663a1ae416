//! Vulkan instance creation and physical device selection.

use std::ffi::{CStr, CString};

use ash::vk;

use super::capabilities::is_vulkan_1_3;
use crate::device::QueueFamilies;
use crate::error::{api_failure, GpuError, Result};

/// Instance extensions for presenting to windows.
pub fn surface_instance_extensions() -> Vec<&'static CStr> {
    vec![
        ash::khr::surface::NAME,
        #[cfg(target_os = "windows")]
        ash::khr::win32_surface::NAME,
        #[cfg(target_os = "linux")]
        ash::khr::xlib_surface::NAME,
        #[cfg(target_os = "linux")]
        ash::khr::wayland_surface::NAME,
        #[cfg(target_os = "macos")]
        ash::ext::metal_surface::NAME,
    ]
}

/// Validation layers to enable in debug builds.
pub fn validation_layers() -> Vec<&'static CStr> {
    vec![c"VK_LAYER_KHRONOS_validation"]
}

/// Create a Vulkan instance.
///
/// Headless instances enable no surface extensions.
///
/// # Safety
/// The entry must be a valid Vulkan entry point.
pub unsafe fn create_instance(
    entry: &ash::Entry,
    app_name: &str,
    enable_validation: bool,
    headless: bool,
) -> Result<ash::Instance> {
    let app_name = CString::new(app_name)
        .map_err(|_| GpuError::InvalidConfig("application name contains a NUL byte".to_string()))?;

    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(c"Vellum")
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(vk::API_VERSION_1_3);

    let mut extensions = if headless {
        Vec::new()
    } else {
        surface_instance_extensions()
    };
    if cfg!(target_os = "macos") {
        extensions.push(ash::khr::portability_enumeration::NAME);
    }
    let extension_names: Vec<*const std::ffi::c_char> =
        extensions.iter().map(|ext| ext.as_ptr()).collect();

    // Only request layers that are installed
    // SAFETY: forwarded from the caller
    let available_layers = unsafe { entry.enumerate_instance_layer_properties() }
        .map_err(|e| api_failure("vkEnumerateInstanceLayerProperties", e))?;
    let layers: Vec<&CStr> = if enable_validation {
        validation_layers()
            .into_iter()
            .filter(|layer| {
                let found = available_layers
                    .iter()
                    .any(|props| props.layer_name_as_c_str().is_ok_and(|name| name == *layer));
                if !found {
                    tracing::warn!("Validation layer {:?} not available", layer);
                }
                found
            })
            .collect()
    } else {
        Vec::new()
    };
    let layer_names: Vec<*const std::ffi::c_char> = layers.iter().map(|l| l.as_ptr()).collect();

    // Required for MoltenVK on macOS
    #[cfg(target_os = "macos")]
    let create_flags = vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    #[cfg(not(target_os = "macos"))]
    let create_flags = vk::InstanceCreateFlags::empty();

    let create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extension_names)
        .enabled_layer_names(&layer_names)
        .flags(create_flags);

    // SAFETY: forwarded from the caller
    let instance = unsafe { entry.create_instance(&create_info, None) }
        .map_err(|e| api_failure("vkCreateInstance", e))?;

    tracing::debug!(
        "Vulkan instance created ({} extensions, {} layers)",
        extension_names.len(),
        layer_names.len()
    );
    Ok(instance)
}

/// Select the best physical device.
///
/// # Safety
/// The instance must be valid.
pub unsafe fn select_physical_device(instance: &ash::Instance) -> Result<vk::PhysicalDevice> {
    // SAFETY: forwarded from the caller
    let devices = unsafe { instance.enumerate_physical_devices() }
        .map_err(|e| api_failure("vkEnumeratePhysicalDevices", e))?;

    devices
        .into_iter()
        // SAFETY: every handle comes from this instance
        .map(|device| (unsafe { score_physical_device(instance, device) }, device))
        .filter(|(score, _)| *score >= 0)
        .max_by_key(|(score, _)| *score)
        .map(|(_, device)| device)
        .ok_or(GpuError::NoSuitableDevice)
}

/// Score a physical device for selection; negative scores are unusable.
unsafe fn score_physical_device(instance: &ash::Instance, device: vk::PhysicalDevice) -> i64 {
    // SAFETY: forwarded from the caller
    let (properties, memory) = unsafe {
        (
            instance.get_physical_device_properties(device),
            instance.get_physical_device_memory_properties(device),
        )
    };

    if !is_vulkan_1_3(properties.api_version) {
        return -1;
    }

    let mut score = match properties.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 50,
        _ => 0,
    };

    // +1 per GB of device-local memory
    let vram_mb: u64 = memory
        .memory_heaps
        .iter()
        .take(memory.memory_heap_count as usize)
        .filter(|h| h.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
        .map(|h| h.size / (1024 * 1024))
        .sum();
    score += i64::try_from(vram_mb / 1024).unwrap_or(0);

    score
}

/// Find queue families for graphics, compute, and transfer.
///
/// Dedicated compute and transfer families are preferred; compute falls back to
/// graphics and transfer falls back to compute.
pub fn find_queue_families(families: &[vk::QueueFamilyProperties]) -> Result<QueueFamilies> {
    let mut graphics_family = None;
    let mut compute_family = None;
    let mut transfer_family = None;

    for (i, family) in families.iter().enumerate() {
        let i = i as u32;
        let flags = family.queue_flags;

        if flags.contains(vk::QueueFlags::COMPUTE)
            && !flags.contains(vk::QueueFlags::GRAPHICS)
            && compute_family.is_none()
        {
            compute_family = Some(i);
        }

        if flags.contains(vk::QueueFlags::TRANSFER)
            && !flags.intersects(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
            && transfer_family.is_none()
        {
            transfer_family = Some(i);
        }

        if flags.contains(vk::QueueFlags::GRAPHICS) && graphics_family.is_none() {
            graphics_family = Some(i);
        }
    }

    let graphics = graphics_family.ok_or(GpuError::NoSuitableDevice)?;
    let compute = compute_family.unwrap_or(graphics);
    let transfer = transfer_family.unwrap_or(compute);

    Ok(QueueFamilies {
        graphics,
        compute,
        transfer,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn prefers_dedicated_families() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::TRANSFER),
        ];
        assert_eq!(
            find_queue_families(&families).unwrap(),
            QueueFamilies {
                graphics: 0,
                compute: 1,
                transfer: 2
            }
        );
    }

    #[test]
    fn single_family_serves_everything() {
        let families = [family(
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
        )];
        assert_eq!(
            find_queue_families(&families).unwrap(),
            QueueFamilies {
                graphics: 0,
                compute: 0,
                transfer: 0
            }
        );
    }

    #[test]
    fn transfer_falls_back_to_compute() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
        ];
        let found = find_queue_families(&families).unwrap();
        assert_eq!(found.compute, 1);
        assert_eq!(found.transfer, 1);
    }

    #[test]
    fn graphics_is_required() {
        let families = [family(vk::QueueFlags::COMPUTE)];
        assert!(matches!(
            find_queue_families(&families),
            Err(GpuError::NoSuitableDevice)
        ));
    }
}

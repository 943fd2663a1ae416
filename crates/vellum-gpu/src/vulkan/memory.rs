//! GPU memory management.

use std::collections::HashMap;
use std::ptr::NonNull;

use ash::vk;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::MemoryLocation;

use crate::error::{api_failure, GpuError, Result};

/// gpu-allocator wrapper keyed by the handles it backs.
pub struct MemoryAllocator {
    allocator: Option<Allocator>,
    device: ash::Device,
    buffers: HashMap<vk::Buffer, Allocation>,
    images: HashMap<vk::Image, Allocation>,
}

impl MemoryAllocator {
    /// Create a new allocator.
    ///
    /// # Safety
    /// The instance, device, and physical device must be valid.
    pub unsafe fn new(
        instance: &ash::Instance,
        device: &ash::Device,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: gpu_allocator::AllocatorDebugSettings {
                log_memory_information: cfg!(debug_assertions),
                log_leaks_on_shutdown: true,
                store_stack_traces: false,
                log_allocations: false,
                log_frees: false,
                log_stack_traces: false,
            },
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .map_err(|e| GpuError::AllocationFailed(e.to_string()))?;

        Ok(Self {
            allocator: Some(allocator),
            device: device.clone(),
            buffers: HashMap::new(),
            images: HashMap::new(),
        })
    }

    fn allocate(
        &mut self,
        name: &str,
        requirements: vk::MemoryRequirements,
        location: MemoryLocation,
        linear: bool,
    ) -> Result<Allocation> {
        self.allocator
            .as_mut()
            .ok_or_else(|| GpuError::InvalidState("Allocator not initialized".to_string()))?
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location,
                linear,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| GpuError::AllocationFailed(format!("{name}: {e}")))
    }

    fn free(&mut self, allocation: Allocation) {
        if let Some(allocator) = self.allocator.as_mut() {
            if let Err(e) = allocator.free(allocation) {
                tracing::error!("Failed to free allocation: {e}");
            }
        }
    }

    /// Create a buffer bound to fresh memory.
    ///
    /// # Safety
    /// `info` must be a valid buffer description for this device.
    pub unsafe fn create_buffer(
        &mut self,
        info: &vk::BufferCreateInfo<'_>,
        location: MemoryLocation,
        name: &str,
    ) -> Result<vk::Buffer> {
        // SAFETY: forwarded from the caller
        let buffer = unsafe { self.device.create_buffer(info, None) }
            .map_err(|e| api_failure("vkCreateBuffer", e))?;
        // SAFETY: the buffer was just created
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };

        let allocation = match self.allocate(name, requirements, location, true) {
            Ok(allocation) => allocation,
            Err(e) => {
                // SAFETY: the buffer is unused
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        // SAFETY: the allocation satisfies the buffer's requirements
        let bound = unsafe {
            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        };
        if let Err(e) = bound {
            self.free(allocation);
            // SAFETY: the buffer is unused
            unsafe { self.device.destroy_buffer(buffer, None) };
            return Err(api_failure("vkBindBufferMemory", e));
        }

        self.buffers.insert(buffer, allocation);
        Ok(buffer)
    }

    /// Destroy a buffer and release its memory.
    ///
    /// # Safety
    /// The buffer must no longer be in use.
    pub unsafe fn destroy_buffer(&mut self, buffer: vk::Buffer) {
        // SAFETY: forwarded from the caller
        unsafe { self.device.destroy_buffer(buffer, None) };
        if let Some(allocation) = self.buffers.remove(&buffer) {
            self.free(allocation);
        }
    }

    /// Host pointer of a buffer's memory, if it is mapped.
    pub fn mapped_ptr(&self, buffer: vk::Buffer) -> Option<NonNull<u8>> {
        self.buffers
            .get(&buffer)
            .and_then(Allocation::mapped_ptr)
            .map(NonNull::cast)
    }

    /// Create an image bound to fresh memory.
    ///
    /// # Safety
    /// `info` must be a valid image description for this device.
    pub unsafe fn create_image(
        &mut self,
        info: &vk::ImageCreateInfo<'_>,
        location: MemoryLocation,
        name: &str,
    ) -> Result<vk::Image> {
        // SAFETY: forwarded from the caller
        let image = unsafe { self.device.create_image(info, None) }
            .map_err(|e| api_failure("vkCreateImage", e))?;
        // SAFETY: the image was just created
        let requirements = unsafe { self.device.get_image_memory_requirements(image) };

        let linear = info.tiling == vk::ImageTiling::LINEAR;
        let allocation = match self.allocate(name, requirements, location, linear) {
            Ok(allocation) => allocation,
            Err(e) => {
                // SAFETY: the image is unused
                unsafe { self.device.destroy_image(image, None) };
                return Err(e);
            }
        };

        // SAFETY: the allocation satisfies the image's requirements
        let bound = unsafe {
            self.device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        };
        if let Err(e) = bound {
            self.free(allocation);
            // SAFETY: the image is unused
            unsafe { self.device.destroy_image(image, None) };
            return Err(api_failure("vkBindImageMemory", e));
        }

        self.images.insert(image, allocation);
        Ok(image)
    }

    /// Destroy an image and release its memory.
    ///
    /// # Safety
    /// The image must no longer be in use.
    pub unsafe fn destroy_image(&mut self, image: vk::Image) {
        // SAFETY: forwarded from the caller
        unsafe { self.device.destroy_image(image, None) };
        if let Some(allocation) = self.images.remove(&image) {
            self.free(allocation);
        }
    }

    /// Number of live allocations.
    pub fn allocation_count(&self) -> usize {
        self.buffers.len() + self.images.len()
    }

    /// Shutdown the allocator, freeing all GPU memory.
    ///
    /// This must be called before the Vulkan device is destroyed.
    /// Any remaining allocations will be freed (and logged as leaks).
    pub fn shutdown(&mut self) {
        let leaked: Vec<Allocation> = self
            .buffers
            .drain()
            .map(|(_, a)| a)
            .chain(self.images.drain().map(|(_, a)| a))
            .collect();
        if !leaked.is_empty() {
            tracing::warn!("{} allocations still live at shutdown", leaked.len());
        }
        for allocation in leaked {
            self.free(allocation);
        }
        self.allocator = None;
    }
}

impl Drop for MemoryAllocator {
    fn drop(&mut self) {
        // Shutdown if not already done
        self.shutdown();
    }
}

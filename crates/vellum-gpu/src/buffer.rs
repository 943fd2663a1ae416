//! Buffers and texel buffer views.

use std::ptr::NonNull;
use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;

use crate::device::RenderDevice;
use crate::error::{GpuError, Result};
use crate::object::{DeviceObject, InitialTransition, Native, Ownership, TransitionTarget};
use crate::state::ResourceState;

/// Buffer creation parameters.
#[derive(Debug, Clone)]
pub struct BufferDesc {
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
    pub location: MemoryLocation,
    /// State the buffer is transitioned to right after allocation.
    pub initial_state: ResourceState,
    pub name: String,
    /// Wrap an existing handle instead of allocating.
    pub existing: Option<(vk::Buffer, Ownership)>,
}

impl BufferDesc {
    /// A device-local buffer.
    pub fn new(size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> Self {
        Self {
            size,
            usage,
            location: MemoryLocation::GpuOnly,
            initial_state: ResourceState::Undefined,
            name: "buffer".to_string(),
            existing: None,
        }
    }

    /// A host-visible buffer for uploads.
    pub fn upload(size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> Self {
        Self::new(size, usage | vk::BufferUsageFlags::TRANSFER_SRC).with_location(MemoryLocation::CpuToGpu)
    }

    /// A host-visible buffer for readbacks.
    pub fn readback(size: vk::DeviceSize) -> Self {
        Self::new(size, vk::BufferUsageFlags::TRANSFER_DST).with_location(MemoryLocation::GpuToCpu)
    }

    pub fn with_location(mut self, location: MemoryLocation) -> Self {
        self.location = location;
        self
    }

    pub fn with_initial_state(mut self, state: ResourceState) -> Self {
        self.initial_state = state;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Wrap a handle created elsewhere. No allocation and no initial transition happen.
    pub fn with_existing(mut self, buffer: vk::Buffer, ownership: Ownership) -> Self {
        self.existing = Some((buffer, ownership));
        self
    }
}

/// Usage bit a buffer needs to be put in `state`.
fn required_buffer_usage(state: ResourceState) -> Option<vk::BufferUsageFlags> {
    match state {
        ResourceState::UniformBuffer => Some(vk::BufferUsageFlags::UNIFORM_BUFFER),
        ResourceState::VertexBuffer => Some(vk::BufferUsageFlags::VERTEX_BUFFER),
        ResourceState::IndexBuffer => Some(vk::BufferUsageFlags::INDEX_BUFFER),
        ResourceState::IndirectArgument => Some(vk::BufferUsageFlags::INDIRECT_BUFFER),
        ResourceState::UnorderedAccess => Some(vk::BufferUsageFlags::STORAGE_BUFFER),
        ResourceState::CopySrc => Some(vk::BufferUsageFlags::TRANSFER_SRC),
        ResourceState::CopyDst => Some(vk::BufferUsageFlags::TRANSFER_DST),
        _ => None,
    }
}

/// A GPU buffer.
pub struct Buffer {
    device: Arc<RenderDevice>,
    handle: Native<vk::Buffer>,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    location: MemoryLocation,
    initial_state: ResourceState,
    allocated: bool,
    name: String,
}

impl Buffer {
    /// Create a buffer.
    pub fn create(device: &Arc<RenderDevice>, desc: BufferDesc) -> Result<Self> {
        crate::object::create(device, desc)
    }

    pub fn handle(&self) -> vk::Buffer {
        self.handle.raw()
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }

    pub fn location(&self) -> MemoryLocation {
        self.location
    }

    pub fn ownership(&self) -> Ownership {
        self.handle.ownership()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Give up destruction rights; the returned buffer only references the handle.
    pub fn disown(mut self) -> Result<Self> {
        self.handle = self.handle.disown()?;
        Ok(self)
    }

    /// Host pointer to the buffer memory, if mapped.
    pub fn mapped_ptr(&self) -> Option<NonNull<u8>> {
        self.device.raw().mapped_ptr(self.handle())
    }

    /// Write data to the start of the buffer (must be host-visible).
    pub fn write<T: bytemuck::Pod>(&self, data: &[T]) -> Result<()> {
        self.write_bytes(0, bytemuck::cast_slice(data))
    }

    /// Write raw bytes at the given offset (must be host-visible).
    pub fn write_bytes(&self, offset: u64, data: &[u8]) -> Result<()> {
        let ptr = self.checked_range(offset, data.len() as u64)?;

        // SAFETY: the range was checked against the buffer size and the mapping
        // lives as long as the buffer
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.as_ptr(), data.len());
        }

        Ok(())
    }

    /// Copy bytes out of the buffer (must be host-visible).
    pub fn read_bytes(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let ptr = self.checked_range(offset, len as u64)?;

        let mut out = vec![0u8; len];
        // SAFETY: see write_bytes
        unsafe {
            std::ptr::copy_nonoverlapping(ptr.as_ptr(), out.as_mut_ptr(), len);
        }

        Ok(out)
    }

    fn checked_range(&self, offset: u64, len: u64) -> Result<NonNull<u8>> {
        let ptr = self
            .mapped_ptr()
            .ok_or_else(|| GpuError::InvalidState(format!("Buffer {} not mapped", self.name)))?;

        let end = offset
            .checked_add(len)
            .ok_or_else(|| GpuError::InvalidState("Offset overflow".to_string()))?;
        if end > self.size {
            return Err(GpuError::InvalidState(format!(
                "Range {offset}..{end} exceeds buffer {} of {} bytes",
                self.name, self.size
            )));
        }

        let offset = usize::try_from(offset)
            .map_err(|_| GpuError::InvalidState("Offset overflow".to_string()))?;
        // SAFETY: offset is within the mapped allocation
        Ok(unsafe { NonNull::new_unchecked(ptr.as_ptr().add(offset)) })
    }
}

impl DeviceObject for Buffer {
    type Desc = BufferDesc;
    const KIND: &'static str = "Buffer";

    fn validate(_device: &RenderDevice, desc: &BufferDesc) -> Result<()> {
        if desc.size == 0 {
            return Err(GpuError::InvalidConfig(format!(
                "buffer {} has zero size",
                desc.name
            )));
        }
        if desc.existing.is_none() && desc.usage.is_empty() {
            return Err(GpuError::InvalidConfig(format!(
                "buffer {} has no usage flags",
                desc.name
            )));
        }
        if desc.initial_state.is_image_only() {
            return Err(GpuError::InvalidConfig(format!(
                "{:?} is not a buffer state",
                desc.initial_state
            )));
        }
        if let Some(required) = required_buffer_usage(desc.initial_state) {
            if !desc.usage.contains(required) {
                return Err(GpuError::InvalidConfig(format!(
                    "buffer {} starts as {:?} but lacks {required:?} usage",
                    desc.name, desc.initial_state
                )));
            }
        }
        Ok(())
    }

    unsafe fn create_api_objects(device: &Arc<RenderDevice>, desc: BufferDesc) -> Result<Self> {
        let (handle, allocated) = match desc.existing {
            Some((buffer, ownership)) => (Native::new(buffer, ownership), false),
            None => {
                let info = vk::BufferCreateInfo::default()
                    .size(desc.size)
                    .usage(desc.usage)
                    .sharing_mode(vk::SharingMode::EXCLUSIVE);
                // SAFETY: forwarded from the caller
                let buffer = unsafe { device.raw().create_buffer(&info, desc.location, &desc.name)? };
                (Native::Owned(buffer), true)
            }
        };

        Ok(Self {
            device: device.clone(),
            handle,
            size: desc.size,
            usage: desc.usage,
            location: desc.location,
            initial_state: desc.initial_state,
            allocated,
            name: desc.name,
        })
    }

    unsafe fn destroy_api_objects(&mut self) {
        if let Some(buffer) = self.handle.destroyable() {
            if buffer != vk::Buffer::null() {
                // SAFETY: forwarded from the caller
                unsafe { self.device.raw().destroy_buffer(buffer) };
            }
        }
        self.handle = Native::Borrowed(vk::Buffer::null());
    }

    fn initial_transition(&self) -> Option<InitialTransition> {
        (self.allocated && self.initial_state != ResourceState::Undefined).then(|| {
            InitialTransition {
                target: TransitionTarget::Buffer {
                    buffer: self.handle(),
                    size: self.size,
                },
                state: self.initial_state,
            }
        })
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        // SAFETY: the owner guarantees the GPU is done with this buffer
        unsafe { self.destroy_api_objects() };
        self.device.registry().release(Self::KIND);
    }
}

/// Texel buffer view creation parameters.
#[derive(Clone)]
pub struct BufferViewDesc {
    pub buffer: Arc<Buffer>,
    pub format: vk::Format,
    pub offset: vk::DeviceSize,
    /// `vk::WHOLE_SIZE` for the rest of the buffer.
    pub range: vk::DeviceSize,
}

/// A formatted view of a buffer for texel-buffer descriptors.
pub struct BufferView {
    device: Arc<RenderDevice>,
    handle: Native<vk::BufferView>,
    buffer: Arc<Buffer>,
    format: vk::Format,
}

impl BufferView {
    pub fn handle(&self) -> vk::BufferView {
        self.handle.raw()
    }

    pub fn buffer(&self) -> &Arc<Buffer> {
        &self.buffer
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }
}

impl DeviceObject for BufferView {
    type Desc = BufferViewDesc;
    const KIND: &'static str = "BufferView";

    fn validate(_device: &RenderDevice, desc: &BufferViewDesc) -> Result<()> {
        let texel_usage = vk::BufferUsageFlags::UNIFORM_TEXEL_BUFFER
            | vk::BufferUsageFlags::STORAGE_TEXEL_BUFFER;
        if !desc.buffer.usage().intersects(texel_usage) {
            return Err(GpuError::InvalidConfig(format!(
                "buffer {} has no texel buffer usage",
                desc.buffer.name()
            )));
        }
        if desc.offset >= desc.buffer.size()
            || (desc.range != vk::WHOLE_SIZE && desc.offset + desc.range > desc.buffer.size())
        {
            return Err(GpuError::InvalidConfig(
                "texel view range exceeds its buffer".to_string(),
            ));
        }
        Ok(())
    }

    unsafe fn create_api_objects(device: &Arc<RenderDevice>, desc: BufferViewDesc) -> Result<Self> {
        let info = vk::BufferViewCreateInfo::default()
            .buffer(desc.buffer.handle())
            .format(desc.format)
            .offset(desc.offset)
            .range(desc.range);
        // SAFETY: forwarded from the caller
        let view = unsafe { device.raw().create_buffer_view(&info)? };

        Ok(Self {
            device: device.clone(),
            handle: Native::Owned(view),
            buffer: desc.buffer,
            format: desc.format,
        })
    }

    unsafe fn destroy_api_objects(&mut self) {
        if let Some(view) = self.handle.destroyable() {
            // SAFETY: forwarded from the caller
            unsafe { self.device.raw().destroy_buffer_view(view) };
        }
        self.handle = Native::Borrowed(vk::BufferView::null());
    }
}

impl Drop for BufferView {
    fn drop(&mut self) {
        // SAFETY: the owner guarantees the GPU is done with this view
        unsafe { self.destroy_api_objects() };
        self.device.registry().release(Self::KIND);
    }
}

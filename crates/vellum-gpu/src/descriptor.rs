//! Descriptor set layouts, pools and sets.
//!
//! Layouts reject aliased binding ranges. Pools are sized per descriptor type up front
//! and never grow: running out is [`GpuError::LimitExceeded`], and the caller decides
//! whether to create another pool. Set updates are batched into one native call.

use std::collections::HashMap;
use std::sync::Arc;

use ash::vk;
use parking_lot::Mutex;

use crate::buffer::{Buffer, BufferView};
use crate::device::RenderDevice;
use crate::error::{fatal, GpuError, Result};
use crate::image::{ImageView, Sampler};
use crate::object::{DeviceObject, Native};

/// Upper bound on sets allocated from one pool.
pub const MAX_SETS_PER_POOL: u32 = 1024;

/// One binding of a set layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorBinding {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    /// Array size. The binding occupies `binding..binding + count`.
    pub count: u32,
    pub stages: vk::ShaderStageFlags,
}

impl DescriptorBinding {
    /// One past the last slot; wide enough that no binding range wraps.
    fn end(&self) -> u64 {
        u64::from(self.binding) + u64::from(self.count.max(1))
    }

    fn is_dynamic(&self) -> bool {
        matches!(
            self.descriptor_type,
            vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC | vk::DescriptorType::STORAGE_BUFFER_DYNAMIC
        )
    }
}

/// Reject bindings whose slot ranges overlap.
pub fn check_binding_overlap(bindings: &[DescriptorBinding]) -> Result<()> {
    let mut sorted: Vec<&DescriptorBinding> = bindings.iter().collect();
    sorted.sort_by_key(|b| b.binding);

    for pair in sorted.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if u64::from(b.binding) < a.end() {
            return Err(GpuError::DescriptorAliasing {
                binding: b.binding,
                other: a.binding,
            });
        }
    }
    Ok(())
}

/// Set layout creation parameters.
#[derive(Debug, Clone, Default)]
pub struct DescriptorSetLayoutDesc {
    pub bindings: Vec<DescriptorBinding>,
    /// Descriptors are pushed through the command list instead of allocated from a pool.
    pub pushable: bool,
}

/// Descriptor set layout builder.
#[derive(Debug, Default)]
pub struct DescriptorSetLayoutBuilder {
    desc: DescriptorSetLayoutDesc,
}

impl DescriptorSetLayoutBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a binding.
    pub fn binding(
        mut self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        count: u32,
        stages: vk::ShaderStageFlags,
    ) -> Self {
        self.desc.bindings.push(DescriptorBinding {
            binding,
            descriptor_type,
            count,
            stages,
        });
        self
    }

    pub fn uniform_buffer(self, binding: u32, stages: vk::ShaderStageFlags) -> Self {
        self.binding(binding, vk::DescriptorType::UNIFORM_BUFFER, 1, stages)
    }

    pub fn storage_buffer(self, binding: u32, stages: vk::ShaderStageFlags) -> Self {
        self.binding(binding, vk::DescriptorType::STORAGE_BUFFER, 1, stages)
    }

    pub fn storage_image(self, binding: u32, stages: vk::ShaderStageFlags) -> Self {
        self.binding(binding, vk::DescriptorType::STORAGE_IMAGE, 1, stages)
    }

    pub fn sampled_image(self, binding: u32, stages: vk::ShaderStageFlags) -> Self {
        self.binding(binding, vk::DescriptorType::SAMPLED_IMAGE, 1, stages)
    }

    pub fn combined_image_sampler(self, binding: u32, stages: vk::ShaderStageFlags) -> Self {
        self.binding(binding, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 1, stages)
    }

    pub fn sampler(self, binding: u32, stages: vk::ShaderStageFlags) -> Self {
        self.binding(binding, vk::DescriptorType::SAMPLER, 1, stages)
    }

    /// Make the layout pushable.
    pub fn pushable(mut self) -> Self {
        self.desc.pushable = true;
        self
    }

    /// Build the layout.
    pub fn build(self, device: &Arc<RenderDevice>) -> Result<DescriptorSetLayout> {
        crate::object::create(device, self.desc)
    }
}

/// A descriptor set layout.
pub struct DescriptorSetLayout {
    device: Arc<RenderDevice>,
    handle: Native<vk::DescriptorSetLayout>,
    bindings: Vec<DescriptorBinding>,
    pushable: bool,
}

impl DescriptorSetLayout {
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.handle.raw()
    }

    pub fn bindings(&self) -> &[DescriptorBinding] {
        &self.bindings
    }

    /// Binding description by binding index.
    pub fn binding(&self, binding: u32) -> Option<&DescriptorBinding> {
        self.bindings.iter().find(|b| b.binding == binding)
    }

    pub fn is_pushable(&self) -> bool {
        self.pushable
    }

    /// Number of dynamic-offset descriptors, in binding order.
    pub fn dynamic_count(&self) -> usize {
        self.bindings
            .iter()
            .filter(|b| b.is_dynamic())
            .map(|b| b.count as usize)
            .sum()
    }

    /// Descriptors of each type one set of this layout consumes.
    pub fn type_counts(&self) -> HashMap<vk::DescriptorType, u32> {
        let mut counts = HashMap::new();
        for binding in &self.bindings {
            let total = counts.entry(binding.descriptor_type).or_insert(0u32);
            *total = total.saturating_add(binding.count);
        }
        counts
    }
}

impl DeviceObject for DescriptorSetLayout {
    type Desc = DescriptorSetLayoutDesc;
    const KIND: &'static str = "DescriptorSetLayout";

    fn validate(device: &RenderDevice, desc: &DescriptorSetLayoutDesc) -> Result<()> {
        check_binding_overlap(&desc.bindings)?;

        if desc.pushable {
            if !device.info().features.push_descriptor {
                return Err(GpuError::ExtensionNotSupported(
                    "VK_KHR_push_descriptor".to_string(),
                ));
            }
            if let Some(b) = desc.bindings.iter().find(|b| b.is_dynamic()) {
                return Err(GpuError::InvalidConfig(format!(
                    "pushable layout cannot hold dynamic binding {}",
                    b.binding
                )));
            }
        }
        Ok(())
    }

    unsafe fn create_api_objects(
        device: &Arc<RenderDevice>,
        desc: DescriptorSetLayoutDesc,
    ) -> Result<Self> {
        let bindings: Vec<vk::DescriptorSetLayoutBinding<'_>> = desc
            .bindings
            .iter()
            .map(|b| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(b.binding)
                    .descriptor_type(b.descriptor_type)
                    .descriptor_count(b.count)
                    .stage_flags(b.stages)
            })
            .collect();

        let flags = if desc.pushable {
            vk::DescriptorSetLayoutCreateFlags::PUSH_DESCRIPTOR_KHR
        } else {
            vk::DescriptorSetLayoutCreateFlags::empty()
        };
        let info = vk::DescriptorSetLayoutCreateInfo::default()
            .flags(flags)
            .bindings(&bindings);
        // SAFETY: forwarded from the caller
        let layout = unsafe { device.raw().create_descriptor_set_layout(&info)? };

        Ok(Self {
            device: device.clone(),
            handle: Native::Owned(layout),
            bindings: desc.bindings,
            pushable: desc.pushable,
        })
    }

    unsafe fn destroy_api_objects(&mut self) {
        if let Some(layout) = self.handle.destroyable() {
            // SAFETY: forwarded from the caller
            unsafe { self.device.raw().destroy_descriptor_set_layout(layout) };
        }
        self.handle = Native::Borrowed(vk::DescriptorSetLayout::null());
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        // SAFETY: sets and pipeline layouts hold an Arc to this layout
        unsafe { self.destroy_api_objects() };
        self.device.registry().release(Self::KIND);
    }
}

/// Pool creation parameters.
#[derive(Debug, Clone, Default)]
pub struct DescriptorPoolDesc {
    pub max_sets: u32,
    /// Capacity per descriptor type.
    pub sizes: Vec<(vk::DescriptorType, u32)>,
}

impl DescriptorPoolDesc {
    /// Capacity for `sets` sets of each given layout.
    pub fn for_layouts(layouts: &[&DescriptorSetLayout], sets: u32) -> Self {
        let mut sizes: HashMap<vk::DescriptorType, u32> = HashMap::new();
        for layout in layouts {
            for (ty, count) in layout.type_counts() {
                let total = sizes.entry(ty).or_insert(0u32);
                *total = total.saturating_add(count.saturating_mul(sets));
            }
        }
        let mut sizes: Vec<_> = sizes.into_iter().collect();
        sizes.sort_by_key(|(ty, _)| ty.as_raw());

        Self {
            max_sets: sets
                .saturating_mul(u32::try_from(layouts.len()).unwrap_or(u32::MAX))
                .min(MAX_SETS_PER_POOL),
            sizes,
        }
    }
}

#[derive(Debug)]
struct PoolUsage {
    sets: u32,
    remaining: HashMap<vk::DescriptorType, u32>,
}

/// A fixed-capacity descriptor pool.
pub struct DescriptorPool {
    device: Arc<RenderDevice>,
    handle: Native<vk::DescriptorPool>,
    max_sets: u32,
    usage: Mutex<PoolUsage>,
}

impl DescriptorPool {
    pub fn create(device: &Arc<RenderDevice>, desc: DescriptorPoolDesc) -> Result<Arc<Self>> {
        crate::object::create::<Self>(device, desc).map(Arc::new)
    }

    pub fn handle(&self) -> vk::DescriptorPool {
        self.handle.raw()
    }

    pub fn max_sets(&self) -> u32 {
        self.max_sets
    }

    /// Sets currently allocated.
    pub fn allocated_sets(&self) -> u32 {
        self.usage.lock().sets
    }

    /// Allocate a set.
    ///
    /// Exhaustion of sets or of any descriptor type is [`GpuError::LimitExceeded`].
    pub fn allocate(self: &Arc<Self>, layout: &Arc<DescriptorSetLayout>) -> Result<DescriptorSet> {
        crate::object::create(
            &self.device,
            DescriptorSetDesc {
                pool: self.clone(),
                layout: layout.clone(),
            },
        )
    }

    fn reserve(&self, layout: &DescriptorSetLayout) -> Result<()> {
        let mut usage = self.usage.lock();
        if usage.sets >= self.max_sets {
            return Err(GpuError::LimitExceeded(format!(
                "descriptor pool holds at most {} sets",
                self.max_sets
            )));
        }

        let needed = layout.type_counts();
        for (ty, count) in &needed {
            let available = usage.remaining.get(ty).copied().unwrap_or(0);
            if available < *count {
                return Err(GpuError::LimitExceeded(format!(
                    "descriptor pool has {available} {ty:?} left, {count} needed"
                )));
            }
        }

        usage.sets += 1;
        for (ty, count) in needed {
            if let Some(remaining) = usage.remaining.get_mut(&ty) {
                *remaining -= count;
            }
        }
        Ok(())
    }

    fn unreserve(&self, layout: &DescriptorSetLayout) {
        let mut usage = self.usage.lock();
        usage.sets = usage.sets.saturating_sub(1);
        for (ty, count) in layout.type_counts() {
            let remaining = usage.remaining.entry(ty).or_insert(0);
            *remaining = remaining.saturating_add(count);
        }
    }
}

impl DeviceObject for DescriptorPool {
    type Desc = DescriptorPoolDesc;
    const KIND: &'static str = "DescriptorPool";

    fn validate(_device: &RenderDevice, desc: &DescriptorPoolDesc) -> Result<()> {
        if desc.max_sets == 0 || desc.max_sets > MAX_SETS_PER_POOL {
            return Err(GpuError::InvalidConfig(format!(
                "descriptor pool max sets {} outside 1..={MAX_SETS_PER_POOL}",
                desc.max_sets
            )));
        }
        if desc.sizes.is_empty() || desc.sizes.iter().any(|(_, count)| *count == 0) {
            return Err(GpuError::InvalidConfig(
                "descriptor pool needs a nonzero capacity per type".to_string(),
            ));
        }
        Ok(())
    }

    unsafe fn create_api_objects(device: &Arc<RenderDevice>, desc: DescriptorPoolDesc) -> Result<Self> {
        let sizes: Vec<vk::DescriptorPoolSize> = desc
            .sizes
            .iter()
            .map(|&(ty, descriptor_count)| vk::DescriptorPoolSize {
                ty,
                descriptor_count,
            })
            .collect();
        let info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(desc.max_sets)
            .pool_sizes(&sizes)
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET);
        // SAFETY: forwarded from the caller
        let pool = unsafe { device.raw().create_descriptor_pool(&info)? };

        let mut remaining = HashMap::new();
        for (ty, count) in desc.sizes {
            let total = remaining.entry(ty).or_insert(0u32);
            *total = total.saturating_add(count);
        }

        Ok(Self {
            device: device.clone(),
            handle: Native::Owned(pool),
            max_sets: desc.max_sets,
            usage: Mutex::new(PoolUsage { sets: 0, remaining }),
        })
    }

    unsafe fn destroy_api_objects(&mut self) {
        if let Some(pool) = self.handle.destroyable() {
            // SAFETY: forwarded from the caller
            unsafe { self.device.raw().destroy_descriptor_pool(pool) };
        }
        self.handle = Native::Borrowed(vk::DescriptorPool::null());
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        // SAFETY: every set holds an Arc to its pool
        unsafe { self.destroy_api_objects() };
        self.device.registry().release(Self::KIND);
    }
}

/// What a descriptor write points at.
#[derive(Clone, Copy)]
pub enum DescriptorPayload<'a> {
    Sampler(&'a Sampler),
    /// Sampled in the shader-read-only layout.
    SampledImage(&'a ImageView),
    /// Accessed in the general layout.
    StorageImage(&'a ImageView),
    /// `None` uses the device default sampler.
    CombinedImageSampler(&'a ImageView, Option<&'a Sampler>),
    UniformBuffer {
        buffer: &'a Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    },
    StorageBuffer {
        buffer: &'a Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    },
    UniformTexelBuffer(&'a BufferView),
    StorageTexelBuffer(&'a BufferView),
}

impl DescriptorPayload<'_> {
    /// Whole-buffer uniform payload.
    pub fn uniform(buffer: &Buffer) -> DescriptorPayload<'_> {
        DescriptorPayload::UniformBuffer {
            buffer,
            offset: 0,
            range: vk::WHOLE_SIZE,
        }
    }

    /// Whole-buffer storage payload.
    pub fn storage(buffer: &Buffer) -> DescriptorPayload<'_> {
        DescriptorPayload::StorageBuffer {
            buffer,
            offset: 0,
            range: vk::WHOLE_SIZE,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Sampler(_) => "Sampler",
            Self::SampledImage(_) => "SampledImage",
            Self::StorageImage(_) => "StorageImage",
            Self::CombinedImageSampler(..) => "CombinedImageSampler",
            Self::UniformBuffer { .. } => "UniformBuffer",
            Self::StorageBuffer { .. } => "StorageBuffer",
            Self::UniformTexelBuffer(_) => "UniformTexelBuffer",
            Self::StorageTexelBuffer(_) => "StorageTexelBuffer",
        }
    }

    fn accepts(&self, ty: vk::DescriptorType) -> bool {
        match self {
            Self::Sampler(_) => ty == vk::DescriptorType::SAMPLER,
            Self::SampledImage(_) => ty == vk::DescriptorType::SAMPLED_IMAGE,
            Self::StorageImage(_) => ty == vk::DescriptorType::STORAGE_IMAGE,
            Self::CombinedImageSampler(..) => ty == vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            Self::UniformBuffer { .. } => matches!(
                ty,
                vk::DescriptorType::UNIFORM_BUFFER | vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC
            ),
            Self::StorageBuffer { .. } => matches!(
                ty,
                vk::DescriptorType::STORAGE_BUFFER | vk::DescriptorType::STORAGE_BUFFER_DYNAMIC
            ),
            Self::UniformTexelBuffer(_) => ty == vk::DescriptorType::UNIFORM_TEXEL_BUFFER,
            Self::StorageTexelBuffer(_) => ty == vk::DescriptorType::STORAGE_TEXEL_BUFFER,
        }
    }
}

/// One typed descriptor write.
#[derive(Clone, Copy)]
pub struct WriteDescriptor<'a> {
    pub binding: u32,
    pub array_element: u32,
    pub payload: DescriptorPayload<'a>,
}

impl<'a> WriteDescriptor<'a> {
    pub fn new(binding: u32, payload: DescriptorPayload<'a>) -> Self {
        Self {
            binding,
            array_element: 0,
            payload,
        }
    }

    pub fn at(mut self, array_element: u32) -> Self {
        self.array_element = array_element;
        self
    }
}

#[derive(Debug, Clone, Copy)]
enum InfoSlot {
    Image(usize),
    Buffer(usize),
    Texel(usize),
}

#[derive(Debug, Clone, Copy)]
struct PendingWrite {
    binding: u32,
    array_element: u32,
    descriptor_type: vk::DescriptorType,
    slot: InfoSlot,
}

/// Reusable storage for the info structs a batch of writes points into.
#[derive(Debug, Default)]
pub(crate) struct DescriptorScratch {
    images: Vec<vk::DescriptorImageInfo>,
    buffers: Vec<vk::DescriptorBufferInfo>,
    texel_views: Vec<vk::BufferView>,
    pending: Vec<PendingWrite>,
}

impl DescriptorScratch {
    /// Resolve writes against a layout into info storage.
    ///
    /// A payload that does not match its binding's type is fatal.
    pub(crate) fn stage(
        &mut self,
        device: &RenderDevice,
        layout: &DescriptorSetLayout,
        writes: &[WriteDescriptor<'_>],
    ) -> Result<()> {
        self.images.clear();
        self.buffers.clear();
        self.texel_views.clear();
        self.pending.clear();
        // Sized to the largest batch seen; clear() keeps the capacity.
        self.pending.reserve(writes.len());

        for write in writes {
            let binding = layout.binding(write.binding).ok_or_else(|| {
                GpuError::InvalidConfig(format!("layout has no binding {}", write.binding))
            })?;
            if write.array_element >= binding.count {
                return Err(GpuError::InvalidConfig(format!(
                    "element {} outside binding {} of {} descriptors",
                    write.array_element, write.binding, binding.count
                )));
            }
            if !write.payload.accepts(binding.descriptor_type) {
                fatal(format!(
                    "{} payload written to binding {} of type {:?}",
                    write.payload.name(),
                    write.binding,
                    binding.descriptor_type
                ));
            }

            let slot = match write.payload {
                DescriptorPayload::Sampler(sampler) => {
                    self.images.push(vk::DescriptorImageInfo {
                        sampler: sampler.handle(),
                        ..Default::default()
                    });
                    InfoSlot::Image(self.images.len() - 1)
                }
                DescriptorPayload::SampledImage(view) => {
                    self.images.push(vk::DescriptorImageInfo {
                        sampler: vk::Sampler::null(),
                        image_view: view.handle(),
                        image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    });
                    InfoSlot::Image(self.images.len() - 1)
                }
                DescriptorPayload::StorageImage(view) => {
                    self.images.push(vk::DescriptorImageInfo {
                        sampler: vk::Sampler::null(),
                        image_view: view.handle(),
                        image_layout: vk::ImageLayout::GENERAL,
                    });
                    InfoSlot::Image(self.images.len() - 1)
                }
                DescriptorPayload::CombinedImageSampler(view, sampler) => {
                    self.images.push(vk::DescriptorImageInfo {
                        sampler: sampler.map_or_else(|| device.default_sampler(), Sampler::handle),
                        image_view: view.handle(),
                        image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    });
                    InfoSlot::Image(self.images.len() - 1)
                }
                DescriptorPayload::UniformBuffer {
                    buffer,
                    offset,
                    range,
                }
                | DescriptorPayload::StorageBuffer {
                    buffer,
                    offset,
                    range,
                } => {
                    self.buffers.push(vk::DescriptorBufferInfo {
                        buffer: buffer.handle(),
                        offset,
                        range,
                    });
                    InfoSlot::Buffer(self.buffers.len() - 1)
                }
                DescriptorPayload::UniformTexelBuffer(view)
                | DescriptorPayload::StorageTexelBuffer(view) => {
                    self.texel_views.push(view.handle());
                    InfoSlot::Texel(self.texel_views.len() - 1)
                }
            };

            self.pending.push(PendingWrite {
                binding: write.binding,
                array_element: write.array_element,
                descriptor_type: binding.descriptor_type,
                slot,
            });
        }
        Ok(())
    }

    /// Native writes pointing into the staged storage.
    pub(crate) fn native_writes(&self, set: vk::DescriptorSet) -> Vec<vk::WriteDescriptorSet<'_>> {
        self.pending
            .iter()
            .map(|pending| {
                let write = vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(pending.binding)
                    .dst_array_element(pending.array_element)
                    .descriptor_type(pending.descriptor_type);
                match pending.slot {
                    InfoSlot::Image(i) => write.image_info(std::slice::from_ref(&self.images[i])),
                    InfoSlot::Buffer(i) => {
                        write.buffer_info(std::slice::from_ref(&self.buffers[i]))
                    }
                    InfoSlot::Texel(i) => {
                        write.texel_buffer_view(std::slice::from_ref(&self.texel_views[i]))
                    }
                }
            })
            .collect()
    }
}

/// Set allocation parameters, see [`DescriptorPool::allocate`].
pub struct DescriptorSetDesc {
    pub pool: Arc<DescriptorPool>,
    pub layout: Arc<DescriptorSetLayout>,
}

/// A pool-allocated descriptor set.
pub struct DescriptorSet {
    device: Arc<RenderDevice>,
    handle: Native<vk::DescriptorSet>,
    pool: Arc<DescriptorPool>,
    layout: Arc<DescriptorSetLayout>,
    scratch: DescriptorScratch,
}

impl DescriptorSet {
    pub fn handle(&self) -> vk::DescriptorSet {
        self.handle.raw()
    }

    pub fn layout(&self) -> &Arc<DescriptorSetLayout> {
        &self.layout
    }

    /// Apply a batch of writes in one native update.
    pub fn update_descriptors(&mut self, writes: &[WriteDescriptor<'_>]) -> Result<()> {
        if writes.is_empty() {
            return Ok(());
        }
        self.scratch.stage(&self.device, &self.layout, writes)?;

        let native = self.scratch.native_writes(self.handle());
        // SAFETY: the set is not bound in a pending command buffer while updated
        unsafe { self.device.raw().update_descriptor_sets(&native) };
        Ok(())
    }
}

impl DeviceObject for DescriptorSet {
    type Desc = DescriptorSetDesc;
    const KIND: &'static str = "DescriptorSet";

    fn validate(_device: &RenderDevice, desc: &DescriptorSetDesc) -> Result<()> {
        if desc.layout.is_pushable() {
            return Err(GpuError::InvalidConfig(
                "pushable layouts cannot be allocated from a pool".to_string(),
            ));
        }
        Ok(())
    }

    unsafe fn create_api_objects(device: &Arc<RenderDevice>, desc: DescriptorSetDesc) -> Result<Self> {
        desc.pool.reserve(&desc.layout)?;

        let layouts = [desc.layout.handle()];
        let info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(desc.pool.handle())
            .set_layouts(&layouts);
        // SAFETY: forwarded from the caller
        let allocated = unsafe { device.raw().allocate_descriptor_sets(&info) };

        let set = match allocated.map(|sets| sets.into_iter().next()) {
            Ok(Some(set)) => set,
            Ok(None) => {
                desc.pool.unreserve(&desc.layout);
                return Err(GpuError::Other("no descriptor set returned".to_string()));
            }
            Err(GpuError::Vulkan(
                vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL,
            )) => {
                desc.pool.unreserve(&desc.layout);
                return Err(GpuError::LimitExceeded(
                    "descriptor pool out of memory".to_string(),
                ));
            }
            Err(e) => {
                desc.pool.unreserve(&desc.layout);
                return Err(e);
            }
        };

        Ok(Self {
            device: device.clone(),
            handle: Native::Owned(set),
            pool: desc.pool,
            layout: desc.layout,
            scratch: DescriptorScratch::default(),
        })
    }

    unsafe fn destroy_api_objects(&mut self) {
        if let Some(set) = self.handle.destroyable() {
            // SAFETY: forwarded from the caller
            if let Err(e) = unsafe { self.device.raw().free_descriptor_sets(self.pool.handle(), &[set]) } {
                tracing::warn!("Freeing descriptor set failed: {e}");
            }
            self.pool.unreserve(&self.layout);
        }
        self.handle = Native::Borrowed(vk::DescriptorSet::null());
    }
}

impl Drop for DescriptorSet {
    fn drop(&mut self) {
        // SAFETY: the owner guarantees the set is not in use
        unsafe { self.destroy_api_objects() };
        self.device.registry().release(Self::KIND);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(binding: u32, count: u32) -> DescriptorBinding {
        DescriptorBinding {
            binding,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
            count,
            stages: vk::ShaderStageFlags::ALL,
        }
    }

    #[test]
    fn disjoint_bindings_pass() {
        let bindings = [binding(0, 1), binding(1, 4), binding(5, 1)];
        assert!(check_binding_overlap(&bindings).is_ok());
    }

    #[test]
    fn array_binding_overlapping_next_is_rejected() {
        let bindings = [binding(0, 2), binding(1, 1)];
        match check_binding_overlap(&bindings) {
            Err(GpuError::DescriptorAliasing { binding, other }) => {
                assert_eq!(binding, 1);
                assert_eq!(other, 0);
            }
            other => panic!("expected aliasing error, got {other:?}"),
        }
    }

    #[test]
    fn overlap_detection_ignores_declaration_order() {
        let bindings = [binding(3, 1), binding(0, 4)];
        assert!(matches!(
            check_binding_overlap(&bindings),
            Err(GpuError::DescriptorAliasing { binding: 3, other: 0 })
        ));
    }

    #[test]
    fn bindings_near_the_top_of_the_range_do_not_wrap() {
        let bindings = [binding(u32::MAX - 1, 4), binding(u32::MAX, 1)];
        assert!(matches!(
            check_binding_overlap(&bindings),
            Err(GpuError::DescriptorAliasing {
                binding: u32::MAX,
                other
            }) if other == u32::MAX - 1
        ));
        assert!(check_binding_overlap(&[binding(0, 1), binding(u32::MAX, u32::MAX)]).is_ok());
    }

    #[test]
    fn duplicate_binding_is_rejected() {
        let bindings = [binding(2, 1), binding(2, 1)];
        assert!(check_binding_overlap(&bindings).is_err());
    }
}

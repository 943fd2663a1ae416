//! Images, image views and samplers.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;

use crate::device::RenderDevice;
use crate::error::{GpuError, Result};
use crate::format;
use crate::object::{DeviceObject, InitialTransition, Native, Ownership, TransitionTarget};
use crate::state::ResourceState;

/// Image creation parameters.
#[derive(Debug, Clone)]
pub struct ImageDesc {
    pub image_type: vk::ImageType,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub samples: vk::SampleCountFlags,
    pub usage: vk::ImageUsageFlags,
    pub flags: vk::ImageCreateFlags,
    pub location: MemoryLocation,
    /// State the image is transitioned to right after allocation.
    pub initial_state: ResourceState,
    pub name: String,
    /// Wrap an existing handle instead of allocating.
    pub existing: Option<(vk::Image, Ownership)>,
}

impl ImageDesc {
    /// A single-mip 2D image.
    pub fn new_2d(width: u32, height: u32, format: vk::Format, usage: vk::ImageUsageFlags) -> Self {
        Self {
            image_type: vk::ImageType::TYPE_2D,
            format,
            extent: vk::Extent3D {
                width,
                height,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            usage,
            flags: vk::ImageCreateFlags::empty(),
            location: MemoryLocation::GpuOnly,
            initial_state: ResourceState::Undefined,
            name: "image".to_string(),
            existing: None,
        }
    }

    /// A color render target that can also be sampled and copied from.
    pub fn render_target(width: u32, height: u32, format: vk::Format) -> Self {
        Self::new_2d(
            width,
            height,
            format,
            vk::ImageUsageFlags::COLOR_ATTACHMENT
                | vk::ImageUsageFlags::SAMPLED
                | vk::ImageUsageFlags::TRANSFER_SRC,
        )
    }

    /// A depth/stencil attachment.
    pub fn depth_stencil(width: u32, height: u32, format: vk::Format) -> Self {
        Self::new_2d(width, height, format, vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
    }

    /// Cube-compatible 2D array with six faces per cube.
    pub fn cube(size: u32, format: vk::Format, usage: vk::ImageUsageFlags) -> Self {
        let mut desc = Self::new_2d(size, size, format, usage);
        desc.array_layers = 6;
        desc.flags |= vk::ImageCreateFlags::CUBE_COMPATIBLE;
        desc
    }

    pub fn with_mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    pub fn with_array_layers(mut self, layers: u32) -> Self {
        self.array_layers = layers;
        self
    }

    pub fn with_samples(mut self, samples: vk::SampleCountFlags) -> Self {
        self.samples = samples;
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
    pub fn with_existing(mut self, image: vk::Image, ownership: Ownership) -> Self {
        self.existing = Some((image, ownership));
        self
    }
}

fn required_image_usage(state: ResourceState) -> Option<vk::ImageUsageFlags> {
    match state {
        ResourceState::RenderTarget => Some(vk::ImageUsageFlags::COLOR_ATTACHMENT),
        ResourceState::UnorderedAccess => Some(vk::ImageUsageFlags::STORAGE),
        ResourceState::ShaderResource
        | ResourceState::PixelShaderResource
        | ResourceState::NonPixelShaderResource => Some(vk::ImageUsageFlags::SAMPLED),
        ResourceState::CopySrc | ResourceState::ResolveSrc => {
            Some(vk::ImageUsageFlags::TRANSFER_SRC)
        }
        ResourceState::CopyDst | ResourceState::ResolveDst => {
            Some(vk::ImageUsageFlags::TRANSFER_DST)
        }
        s if s.is_depth_stencil() => Some(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT),
        _ => None,
    }
}

/// A GPU image.
pub struct Image {
    device: Arc<RenderDevice>,
    handle: Native<vk::Image>,
    image_type: vk::ImageType,
    format: vk::Format,
    extent: vk::Extent3D,
    mip_levels: u32,
    array_layers: u32,
    samples: vk::SampleCountFlags,
    usage: vk::ImageUsageFlags,
    flags: vk::ImageCreateFlags,
    initial_state: ResourceState,
    allocated: bool,
    name: String,
}

impl Image {
    /// Create an image.
    pub fn create(device: &Arc<RenderDevice>, desc: ImageDesc) -> Result<Self> {
        crate::object::create(device, desc)
    }

    pub fn handle(&self) -> vk::Image {
        self.handle.raw()
    }

    pub fn image_type(&self) -> vk::ImageType {
        self.image_type
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn extent(&self) -> vk::Extent3D {
        self.extent
    }

    pub fn width(&self) -> u32 {
        self.extent.width
    }

    pub fn height(&self) -> u32 {
        self.extent.height
    }

    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    pub fn array_layers(&self) -> u32 {
        self.array_layers
    }

    pub fn samples(&self) -> vk::SampleCountFlags {
        self.samples
    }

    pub fn usage(&self) -> vk::ImageUsageFlags {
        self.usage
    }

    pub fn is_cube_compatible(&self) -> bool {
        self.flags.contains(vk::ImageCreateFlags::CUBE_COMPATIBLE)
    }

    /// Aspects of the image format.
    pub fn aspect(&self) -> vk::ImageAspectFlags {
        format::aspect_mask(self.format)
    }

    /// Every mip and layer.
    pub fn full_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: self.aspect(),
            base_mip_level: 0,
            level_count: self.mip_levels,
            base_array_layer: 0,
            layer_count: self.array_layers,
        }
    }

    /// State the image was created in.
    pub fn initial_state(&self) -> ResourceState {
        self.initial_state
    }

    pub fn ownership(&self) -> Ownership {
        self.handle.ownership()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Give up destruction rights. Fails for restricted (swapchain) images.
    pub fn disown(mut self) -> Result<Self> {
        self.handle = self.handle.disown()?;
        Ok(self)
    }
}

impl DeviceObject for Image {
    type Desc = ImageDesc;
    const KIND: &'static str = "Image";

    fn validate(device: &RenderDevice, desc: &ImageDesc) -> Result<()> {
        let invalid = |msg: String| Err(GpuError::InvalidConfig(format!("image {}: {msg}", desc.name)));
        let extent = desc.extent;

        if extent.width == 0 || extent.height == 0 || extent.depth == 0 {
            return invalid(format!("zero extent {extent:?}"));
        }
        if desc.image_type == vk::ImageType::TYPE_2D {
            let max = device.info().limits.max_image_dimension_2d;
            if extent.width > max || extent.height > max {
                return invalid(format!("extent {extent:?} exceeds device limit {max}"));
            }
            if extent.depth != 1 {
                return invalid("2D image with depth > 1".to_string());
            }
        }
        if desc.array_layers == 0 {
            return invalid("zero array layers".to_string());
        }
        let max_mips = format::full_mip_chain(extent.width, extent.height, extent.depth);
        if desc.mip_levels == 0 || desc.mip_levels > max_mips {
            return invalid(format!(
                "{} mip levels, at most {max_mips} allowed",
                desc.mip_levels
            ));
        }
        if desc.samples != vk::SampleCountFlags::TYPE_1 && desc.mip_levels > 1 {
            return invalid("multisampled images cannot have mips".to_string());
        }
        if desc.flags.contains(vk::ImageCreateFlags::CUBE_COMPATIBLE)
            && (extent.width != extent.height || desc.array_layers % 6 != 0)
        {
            return invalid("cube images need square faces and 6n layers".to_string());
        }
        if desc.existing.is_none() && desc.usage.is_empty() {
            return invalid("no usage flags".to_string());
        }

        let depth_format = format::is_depth_stencil(desc.format);
        if depth_format && desc.usage.contains(vk::ImageUsageFlags::COLOR_ATTACHMENT) {
            return invalid(format!("{:?} cannot be a color attachment", desc.format));
        }
        if !depth_format && desc.usage.contains(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT) {
            return invalid(format!("{:?} cannot be a depth attachment", desc.format));
        }

        if desc.initial_state.is_buffer_only() {
            return invalid(format!("{:?} is not an image state", desc.initial_state));
        }
        if desc.initial_state.is_depth_stencil() && !depth_format {
            return invalid(format!(
                "{:?} requires a depth/stencil format",
                desc.initial_state
            ));
        }
        if let Some(required) = required_image_usage(desc.initial_state) {
            if !desc.usage.contains(required) {
                return invalid(format!(
                    "starts as {:?} but lacks {required:?} usage",
                    desc.initial_state
                ));
            }
        }
        Ok(())
    }

    unsafe fn create_api_objects(device: &Arc<RenderDevice>, desc: ImageDesc) -> Result<Self> {
        let (handle, allocated) = match desc.existing {
            Some((image, ownership)) => (Native::new(image, ownership), false),
            None => {
                let info = vk::ImageCreateInfo::default()
                    .image_type(desc.image_type)
                    .format(desc.format)
                    .extent(desc.extent)
                    .mip_levels(desc.mip_levels)
                    .array_layers(desc.array_layers)
                    .samples(desc.samples)
                    .tiling(vk::ImageTiling::OPTIMAL)
                    .usage(desc.usage)
                    .flags(desc.flags)
                    .sharing_mode(vk::SharingMode::EXCLUSIVE)
                    .initial_layout(vk::ImageLayout::UNDEFINED);
                // SAFETY: forwarded from the caller
                let image = unsafe { device.raw().create_image(&info, desc.location, &desc.name)? };
                (Native::Owned(image), true)
            }
        };

        tracing::debug!(
            "Image {} {}x{} {:?} ({:?})",
            desc.name,
            desc.extent.width,
            desc.extent.height,
            desc.format,
            handle.ownership()
        );

        Ok(Self {
            device: device.clone(),
            handle,
            image_type: desc.image_type,
            format: desc.format,
            extent: desc.extent,
            mip_levels: desc.mip_levels,
            array_layers: desc.array_layers,
            samples: desc.samples,
            usage: desc.usage,
            flags: desc.flags,
            initial_state: desc.initial_state,
            allocated,
            name: desc.name,
        })
    }

    unsafe fn destroy_api_objects(&mut self) {
        if let Some(image) = self.handle.destroyable() {
            if image != vk::Image::null() {
                // SAFETY: forwarded from the caller
                unsafe { self.device.raw().destroy_image(image) };
            }
        }
        self.handle = Native::Borrowed(vk::Image::null());
    }

    fn initial_transition(&self) -> Option<InitialTransition> {
        (self.allocated && self.initial_state != ResourceState::Undefined).then(|| {
            InitialTransition {
                target: TransitionTarget::Image {
                    image: self.handle(),
                    range: self.full_range(),
                },
                state: self.initial_state,
            }
        })
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        // SAFETY: views hold an Arc to this image, so none outlive it
        unsafe { self.destroy_api_objects() };
        self.device.registry().release(Self::KIND);
    }
}

/// Image view creation parameters.
#[derive(Clone)]
pub struct ImageViewDesc {
    pub image: Arc<Image>,
    pub view_type: vk::ImageViewType,
    pub format: vk::Format,
    pub aspect: vk::ImageAspectFlags,
    pub base_mip_level: u32,
    pub mip_level_count: u32,
    pub base_array_layer: u32,
    pub array_layer_count: u32,
    pub existing: Option<(vk::ImageView, Ownership)>,
}

impl ImageViewDesc {
    /// View every mip and layer, with the view type derived from the image.
    pub fn full(image: Arc<Image>) -> Self {
        let view_type = derive_view_type(&image);
        Self {
            view_type,
            format: image.format(),
            aspect: image.aspect(),
            base_mip_level: 0,
            mip_level_count: image.mip_levels(),
            base_array_layer: 0,
            array_layer_count: image.array_layers(),
            existing: None,
            image,
        }
    }

    /// View usable as a framebuffer attachment: mip 0 of every layer.
    pub fn attachment(image: Arc<Image>) -> Self {
        let mut desc = Self::full(image);
        desc.mip_level_count = 1;
        if desc.view_type == vk::ImageViewType::CUBE {
            desc.view_type = vk::ImageViewType::TYPE_2D_ARRAY;
        }
        desc
    }

    pub fn with_mips(mut self, base: u32, count: u32) -> Self {
        self.base_mip_level = base;
        self.mip_level_count = count;
        self
    }

    pub fn with_layers(mut self, base: u32, count: u32) -> Self {
        self.base_array_layer = base;
        self.array_layer_count = count;
        self
    }

    pub fn with_view_type(mut self, view_type: vk::ImageViewType) -> Self {
        self.view_type = view_type;
        self
    }

    pub fn with_aspect(mut self, aspect: vk::ImageAspectFlags) -> Self {
        self.aspect = aspect;
        self
    }

    /// Wrap a view created elsewhere.
    pub fn with_existing(mut self, view: vk::ImageView, ownership: Ownership) -> Self {
        self.existing = Some((view, ownership));
        self
    }

    /// Mip count with `vk::REMAINING_MIP_LEVELS` resolved; `None` when out of range.
    fn resolved_mip_count(&self) -> Option<u32> {
        resolve_count(
            self.base_mip_level,
            self.mip_level_count,
            vk::REMAINING_MIP_LEVELS,
            self.image.mip_levels(),
        )
    }

    /// Layer count with `vk::REMAINING_ARRAY_LAYERS` resolved; `None` when out of range.
    fn resolved_layer_count(&self) -> Option<u32> {
        resolve_count(
            self.base_array_layer,
            self.array_layer_count,
            vk::REMAINING_ARRAY_LAYERS,
            self.image.array_layers(),
        )
    }

    /// Only meaningful after validation.
    fn range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: self.aspect,
            base_mip_level: self.base_mip_level,
            level_count: self.resolved_mip_count().unwrap_or(0),
            base_array_layer: self.base_array_layer,
            layer_count: self.resolved_layer_count().unwrap_or(0),
        }
    }
}

fn resolve_count(base: u32, count: u32, remaining: u32, total: u32) -> Option<u32> {
    let count = if count == remaining {
        total.checked_sub(base)?
    } else {
        count
    };
    (count > 0 && base.checked_add(count)? <= total).then_some(count)
}

/// View type matching an image's dimensionality, layers and cube compatibility.
pub fn derive_view_type(image: &Image) -> vk::ImageViewType {
    let layers = image.array_layers();
    match image.image_type() {
        vk::ImageType::TYPE_1D if layers > 1 => vk::ImageViewType::TYPE_1D_ARRAY,
        vk::ImageType::TYPE_1D => vk::ImageViewType::TYPE_1D,
        vk::ImageType::TYPE_3D => vk::ImageViewType::TYPE_3D,
        _ if image.is_cube_compatible() && layers == 6 => vk::ImageViewType::CUBE,
        _ if image.is_cube_compatible() && layers % 6 == 0 => vk::ImageViewType::CUBE_ARRAY,
        _ if layers > 1 => vk::ImageViewType::TYPE_2D_ARRAY,
        _ => vk::ImageViewType::TYPE_2D,
    }
}

/// A view of an image.
///
/// The view keeps its image alive; dropping a view never destroys the image.
pub struct ImageView {
    device: Arc<RenderDevice>,
    handle: Native<vk::ImageView>,
    image: Arc<Image>,
    view_type: vk::ImageViewType,
    format: vk::Format,
    range: vk::ImageSubresourceRange,
}

impl ImageView {
    /// Create a view.
    pub fn create(device: &Arc<RenderDevice>, desc: ImageViewDesc) -> Result<Self> {
        crate::object::create(device, desc)
    }

    pub fn handle(&self) -> vk::ImageView {
        self.handle.raw()
    }

    pub fn image(&self) -> &Arc<Image> {
        &self.image
    }

    pub fn view_type(&self) -> vk::ImageViewType {
        self.view_type
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Subresources covered by the view.
    pub fn range(&self) -> vk::ImageSubresourceRange {
        self.range
    }

    pub fn samples(&self) -> vk::SampleCountFlags {
        self.image.samples()
    }

    /// Extent of the view's base mip.
    pub fn extent(&self) -> vk::Extent2D {
        let extent = self.image.extent();
        let mip = self.range.base_mip_level;
        vk::Extent2D {
            width: (extent.width >> mip).max(1),
            height: (extent.height >> mip).max(1),
        }
    }

    pub fn ownership(&self) -> Ownership {
        self.handle.ownership()
    }
}

impl DeviceObject for ImageView {
    type Desc = ImageViewDesc;
    const KIND: &'static str = "ImageView";

    fn validate(_device: &RenderDevice, desc: &ImageViewDesc) -> Result<()> {
        let image = &desc.image;
        let invalid = |msg: String| {
            Err(GpuError::InvalidConfig(format!(
                "view of image {}: {msg}",
                image.name()
            )))
        };

        if desc.resolved_mip_count().is_none() {
            return invalid(format!(
                "mips {}+{} outside 0..{}",
                desc.base_mip_level,
                desc.mip_level_count,
                image.mip_levels()
            ));
        }
        let Some(layer_count) = desc.resolved_layer_count() else {
            return invalid(format!(
                "layers {}+{} outside 0..{}",
                desc.base_array_layer,
                desc.array_layer_count,
                image.array_layers()
            ));
        };
        if !image.aspect().contains(desc.aspect) || desc.aspect.is_empty() {
            return invalid(format!("aspect {:?} not in the image format", desc.aspect));
        }
        if desc.format != image.format()
            && !image.flags.contains(vk::ImageCreateFlags::MUTABLE_FORMAT)
        {
            return invalid(format!(
                "format {:?} differs from immutable image format {:?}",
                desc.format,
                image.format()
            ));
        }
        match desc.view_type {
            vk::ImageViewType::CUBE | vk::ImageViewType::CUBE_ARRAY => {
                if !image.is_cube_compatible() || layer_count % 6 != 0 {
                    return invalid("cube view needs a cube-compatible image and 6n layers".to_string());
                }
                if desc.view_type == vk::ImageViewType::CUBE && layer_count != 6 {
                    return invalid("cube view needs exactly 6 layers".to_string());
                }
            }
            vk::ImageViewType::TYPE_1D | vk::ImageViewType::TYPE_2D | vk::ImageViewType::TYPE_3D => {
                if layer_count != 1 {
                    return invalid("non-array view over several layers".to_string());
                }
            }
            _ => {}
        }
        Ok(())
    }

    unsafe fn create_api_objects(device: &Arc<RenderDevice>, desc: ImageViewDesc) -> Result<Self> {
        let range = desc.range();
        let handle = match desc.existing {
            Some((view, ownership)) => Native::new(view, ownership),
            None => {
                let info = vk::ImageViewCreateInfo::default()
                    .image(desc.image.handle())
                    .view_type(desc.view_type)
                    .format(desc.format)
                    .components(vk::ComponentMapping::default())
                    .subresource_range(range);
                // SAFETY: forwarded from the caller
                Native::Owned(unsafe { device.raw().create_image_view(&info)? })
            }
        };

        Ok(Self {
            device: device.clone(),
            handle,
            image: desc.image,
            view_type: desc.view_type,
            format: desc.format,
            range,
        })
    }

    unsafe fn destroy_api_objects(&mut self) {
        if let Some(view) = self.handle.destroyable() {
            if view != vk::ImageView::null() {
                // SAFETY: forwarded from the caller
                unsafe { self.device.raw().destroy_image_view(view) };
            }
        }
        self.handle = Native::Borrowed(vk::ImageView::null());
    }
}

impl Drop for ImageView {
    fn drop(&mut self) {
        // SAFETY: the owner guarantees the GPU is done with this view
        unsafe { self.destroy_api_objects() };
        self.device.registry().release(Self::KIND);
    }
}

/// Sampler creation parameters.
#[derive(Debug, Clone, Copy)]
pub struct SamplerDesc {
    pub mag_filter: vk::Filter,
    pub min_filter: vk::Filter,
    pub mipmap_mode: vk::SamplerMipmapMode,
    pub address_mode: vk::SamplerAddressMode,
    pub max_anisotropy: Option<f32>,
    pub compare_op: Option<vk::CompareOp>,
    pub min_lod: f32,
    pub max_lod: f32,
    pub border_color: vk::BorderColor,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self {
            mag_filter: vk::Filter::LINEAR,
            min_filter: vk::Filter::LINEAR,
            mipmap_mode: vk::SamplerMipmapMode::LINEAR,
            address_mode: vk::SamplerAddressMode::REPEAT,
            max_anisotropy: None,
            compare_op: None,
            min_lod: 0.0,
            max_lod: vk::LOD_CLAMP_NONE,
            border_color: vk::BorderColor::FLOAT_TRANSPARENT_BLACK,
        }
    }
}

impl SamplerDesc {
    /// Nearest filtering, clamped to edge.
    pub fn nearest_clamp() -> Self {
        Self {
            mag_filter: vk::Filter::NEAREST,
            min_filter: vk::Filter::NEAREST,
            mipmap_mode: vk::SamplerMipmapMode::NEAREST,
            address_mode: vk::SamplerAddressMode::CLAMP_TO_EDGE,
            ..Self::default()
        }
    }
}

/// A texture sampler.
pub struct Sampler {
    device: Arc<RenderDevice>,
    handle: Native<vk::Sampler>,
}

impl Sampler {
    pub fn create(device: &Arc<RenderDevice>, desc: SamplerDesc) -> Result<Self> {
        crate::object::create(device, desc)
    }

    pub fn handle(&self) -> vk::Sampler {
        self.handle.raw()
    }
}

impl DeviceObject for Sampler {
    type Desc = SamplerDesc;
    const KIND: &'static str = "Sampler";

    fn validate(_device: &RenderDevice, desc: &SamplerDesc) -> Result<()> {
        if desc.min_lod > desc.max_lod {
            return Err(GpuError::InvalidConfig(format!(
                "sampler min lod {} above max lod {}",
                desc.min_lod, desc.max_lod
            )));
        }
        if let Some(anisotropy) = desc.max_anisotropy {
            if anisotropy < 1.0 {
                return Err(GpuError::InvalidConfig(format!(
                    "sampler anisotropy {anisotropy} below 1"
                )));
            }
        }
        Ok(())
    }

    unsafe fn create_api_objects(device: &Arc<RenderDevice>, desc: SamplerDesc) -> Result<Self> {
        let info = vk::SamplerCreateInfo::default()
            .mag_filter(desc.mag_filter)
            .min_filter(desc.min_filter)
            .mipmap_mode(desc.mipmap_mode)
            .address_mode_u(desc.address_mode)
            .address_mode_v(desc.address_mode)
            .address_mode_w(desc.address_mode)
            .anisotropy_enable(desc.max_anisotropy.is_some())
            .max_anisotropy(desc.max_anisotropy.unwrap_or(1.0))
            .compare_enable(desc.compare_op.is_some())
            .compare_op(desc.compare_op.unwrap_or(vk::CompareOp::ALWAYS))
            .min_lod(desc.min_lod)
            .max_lod(desc.max_lod)
            .border_color(desc.border_color);
        // SAFETY: forwarded from the caller
        let sampler = unsafe { device.raw().create_sampler(&info)? };

        Ok(Self {
            device: device.clone(),
            handle: Native::Owned(sampler),
        })
    }

    unsafe fn destroy_api_objects(&mut self) {
        if let Some(sampler) = self.handle.destroyable() {
            // SAFETY: forwarded from the caller
            unsafe { self.device.raw().destroy_sampler(sampler) };
        }
        self.handle = Native::Borrowed(vk::Sampler::null());
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        // SAFETY: the owner guarantees the GPU is done with this sampler
        unsafe { self.destroy_api_objects() };
        self.device.registry().release(Self::KIND);
    }
}

//! Ownership-tracked Vulkan hardware-abstraction layer.
//!
//! This crate provides:
//! - Two-phase device objects with exclusive, reference and restricted handle ownership
//! - Resource-state barrier translation with no-op elision
//! - Render passes, multi-variant draw passes and dynamic rendering
//! - Descriptor layouts, pools, sets and push descriptors
//! - Command recording with render-pass state tracking
//! - Queues with blocking one-shot operations
//! - Swapchain frame pipelining
//!
//! Every object is created against an explicit [`RenderDevice`], which forwards native
//! calls through the [`RawDevice`] seam. [`vulkan::VulkanDevice`] is the real backend.

pub mod barrier;
pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod error;
pub mod format;
pub mod frame;
pub mod image;
pub mod object;
pub mod pipeline;
pub mod query;
pub mod queue;
pub mod render_pass;
pub mod state;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod vulkan;

pub use barrier::{BufferTransition, ImageTransition};
pub use buffer::{Buffer, BufferDesc, BufferView, BufferViewDesc};
pub use command::{CommandList, CommandPool, CommandPoolDesc, PassKind};
pub use descriptor::{
    DescriptorBinding, DescriptorPayload, DescriptorPool, DescriptorPoolDesc, DescriptorSet,
    DescriptorSetDesc, DescriptorSetLayout, DescriptorSetLayoutBuilder, DescriptorSetLayoutDesc,
    WriteDescriptor, MAX_SETS_PER_POOL,
};
pub use device::{
    DeviceConfig, DeviceFeatures, DeviceInfo, DeviceLimits, QueueFamilies, RawDevice,
    RenderDevice, DEFAULT_TIMEOUT,
};
pub use error::{GpuError, Result};
pub use frame::{FrameConfig, FrameInfo, FrameSynchronizer, MAX_FRAMES_IN_FLIGHT};
pub use image::{Image, ImageDesc, ImageView, ImageViewDesc, Sampler, SamplerDesc};
pub use object::{DeviceObject, Native, Ownership};
pub use pipeline::{
    ComputePipeline, ComputePipelineDesc, GraphicsPipeline, GraphicsPipelineDesc, PipelineLayout,
    PipelineLayoutDesc, PipelineTarget, ShaderModule,
};
pub use query::{QueryKind, QueryPool, QueryPoolDesc};
pub use queue::{ImageCopyTarget, Queue, Submission};
pub use render_pass::{
    ClearFlags, ClearValue, ColorAttachmentDesc, DepthAttachmentDesc, DrawPass, DrawPassDesc,
    RenderPass, RenderPassAttachments, RenderPassBeginInfo, RenderPassDesc, RenderPassSource,
    RenderingAttachment, RenderingInfo, TargetFormat, MAX_RENDER_TARGETS,
};
pub use state::{CommandType, ResourceState};
pub use surface::{AcquireOutcome, PresentOutcome, RawSurface, SurfaceCapabilities, WindowSurface};
pub use swapchain::Swapchain;
pub use sync::{Fence, Semaphore};
pub use vulkan::{GpuCapabilities, GpuVendor, VulkanDevice, VulkanSurface};

pub use ash::vk;
pub use gpu_allocator::MemoryLocation;

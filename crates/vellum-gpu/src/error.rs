//! GPU error types.

use ash::vk;
use thiserror::Error;

use crate::render_pass::ClearFlags;

/// GPU-related errors.
#[derive(Error, Debug)]
pub enum GpuError {
    /// Vulkan error.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// Invalid creation parameters or an incompatible combination of states.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Two bindings of a descriptor set layout cover overlapping ranges.
    #[error("Descriptor binding {binding} overlaps binding {other}")]
    DescriptorAliasing { binding: u32, other: u32 },

    /// A fixed-capacity resource (descriptor pool, attachment array, ...) is exhausted.
    #[error("Limit exceeded: {0}")]
    LimitExceeded(String),

    /// Memory allocation failed.
    #[error("Memory allocation failed: {0}")]
    AllocationFailed(String),

    /// A bounded wait expired.
    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    /// A draw pass was asked for a clear combination it never built.
    #[error("No render pass variant for clear flags {0:?}")]
    MissingRenderPassVariant(ClearFlags),

    /// No suitable GPU found.
    #[error("No suitable GPU found")]
    NoSuitableDevice,

    /// Required extension not supported.
    #[error("Required extension not supported: {0}")]
    ExtensionNotSupported(String),

    /// Surface creation failed.
    #[error("Surface creation failed: {0}")]
    SurfaceCreation(String),

    /// Swapchain creation failed.
    #[error("Swapchain creation failed: {0}")]
    SwapchainCreation(String),

    /// Invalid state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl GpuError {
    /// Whether the caller can recover by providing more capacity (e.g. a new pool).
    pub fn is_limit_exceeded(&self) -> bool {
        matches!(self, Self::LimitExceeded(_))
    }

    /// Whether this is a failure reported by the driver.
    pub fn is_api_failure(&self) -> bool {
        matches!(self, Self::Vulkan(_))
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;

/// Log a native failure with its call site and convert it.
pub(crate) fn api_failure(what: &str, result: vk::Result) -> GpuError {
    tracing::error!("{what} failed: {result}");
    GpuError::Vulkan(result)
}

/// Abort on a condition the layer cannot continue past.
///
/// The message is logged before panicking; install a panic hook to intercept it.
#[track_caller]
pub fn fatal(message: impl AsRef<str>) -> ! {
    let message = message.as_ref();
    tracing::error!("fatal: {message}");
    panic!("{message}");
}

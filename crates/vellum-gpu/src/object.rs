//! Two-phase device object construction and handle ownership.
//!
//! Every GPU-backed object is created through [`create`]: the object's
//! [`DeviceObject::validate`] runs first and rejects bad descriptions before any native
//! call, then [`DeviceObject::create_api_objects`] allocates the handles. Objects that
//! declare an initial state get a one-time transition on the graphics queue, but only
//! when they allocated their own handle.

use std::sync::Arc;

use ash::vk;

use crate::device::RenderDevice;
use crate::error::{GpuError, Result};
use crate::state::ResourceState;

/// Who may destroy a wrapped native handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ownership {
    /// The wrapper destroys the handle.
    Exclusive,
    /// An alias of a handle owned elsewhere; never destroyed through this wrapper.
    Reference,
    /// Visible to callers but destroyed only by its creator (e.g. swapchain images).
    Restricted,
}

/// A native handle tagged with its ownership.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Native<H> {
    Owned(H),
    Borrowed(H),
    Restricted(H),
}

impl<H: Copy> Native<H> {
    /// Tag a handle.
    pub fn new(handle: H, ownership: Ownership) -> Self {
        match ownership {
            Ownership::Exclusive => Self::Owned(handle),
            Ownership::Reference => Self::Borrowed(handle),
            Ownership::Restricted => Self::Restricted(handle),
        }
    }

    /// The raw handle.
    pub fn raw(&self) -> H {
        match *self {
            Self::Owned(h) | Self::Borrowed(h) | Self::Restricted(h) => h,
        }
    }

    /// Ownership of the handle.
    pub fn ownership(&self) -> Ownership {
        match self {
            Self::Owned(_) => Ownership::Exclusive,
            Self::Borrowed(_) => Ownership::Reference,
            Self::Restricted(_) => Ownership::Restricted,
        }
    }

    /// Give up destruction rights, leaving a reference.
    ///
    /// A restricted handle cannot be disowned.
    pub fn disown(self) -> Result<Self> {
        match self {
            Self::Owned(h) | Self::Borrowed(h) => Ok(Self::Borrowed(h)),
            Self::Restricted(_) => Err(GpuError::InvalidState(
                "restricted handles cannot be disowned".to_string(),
            )),
        }
    }

    /// The handle, if this wrapper is responsible for destroying it.
    pub fn destroyable(&self) -> Option<H> {
        match *self {
            Self::Owned(h) => Some(h),
            Self::Borrowed(_) | Self::Restricted(_) => None,
        }
    }
}

/// Resource a creation-time transition applies to.
#[derive(Debug, Clone, Copy)]
pub enum TransitionTarget {
    Image {
        image: vk::Image,
        range: vk::ImageSubresourceRange,
    },
    Buffer {
        buffer: vk::Buffer,
        size: vk::DeviceSize,
    },
}

/// One-time transition from `Undefined` requested by a freshly allocated object.
#[derive(Debug, Clone, Copy)]
pub struct InitialTransition {
    pub target: TransitionTarget,
    pub state: ResourceState,
}

/// A GPU-backed object with two-phase construction.
pub trait DeviceObject: Sized {
    /// Creation parameters.
    type Desc;

    /// Registry key.
    const KIND: &'static str;

    /// Cross-field validation. Runs before any native call.
    fn validate(device: &RenderDevice, desc: &Self::Desc) -> Result<()>;

    /// Allocate native handles.
    ///
    /// On failure every handle created so far has been released.
    ///
    /// # Safety
    /// `desc` must have passed [`validate`](Self::validate).
    unsafe fn create_api_objects(device: &Arc<RenderDevice>, desc: Self::Desc) -> Result<Self>;

    /// Release native handles this object owns.
    ///
    /// Idempotent: handles are nulled after release and only exclusively owned handles
    /// are destroyed.
    ///
    /// # Safety
    /// The handles must no longer be in use by the GPU.
    unsafe fn destroy_api_objects(&mut self);

    /// Transition to issue once the handles exist.
    fn initial_transition(&self) -> Option<InitialTransition> {
        None
    }
}

/// Validate, allocate, then apply any initial transition.
///
/// On error nothing is left allocated.
pub fn create<T: DeviceObject>(device: &Arc<RenderDevice>, desc: T::Desc) -> Result<T> {
    T::validate(device, &desc)?;

    // SAFETY: desc was validated above
    let object = unsafe { T::create_api_objects(device, desc)? };
    device.registry().register(T::KIND);

    if let Some(transition) = object.initial_transition() {
        let queue = device.graphics_queue();
        let result = match transition.target {
            TransitionTarget::Image { image, range } => queue.transition_image_layout(
                image,
                range,
                ResourceState::Undefined,
                transition.state,
            ),
            TransitionTarget::Buffer { buffer, size } => queue.buffer_barrier(
                buffer,
                size,
                ResourceState::Undefined,
                transition.state,
            ),
        };

        if let Err(e) = result {
            tracing::error!("Initial transition of {} failed: {e}", T::KIND);
            // Dropping releases the handles and the registry entry.
            drop(object);
            return Err(e);
        }
    }

    tracing::trace!("Created {}", T::KIND);
    Ok(object)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_exclusive_handles_are_destroyable() {
        assert_eq!(Native::new(7u64, Ownership::Exclusive).destroyable(), Some(7));
        assert_eq!(Native::new(7u64, Ownership::Reference).destroyable(), None);
        assert_eq!(Native::new(7u64, Ownership::Restricted).destroyable(), None);
    }

    #[test]
    fn disown_turns_owned_into_borrowed() {
        let owned = Native::new(3u64, Ownership::Exclusive);
        let borrowed = owned.disown().unwrap();
        assert_eq!(borrowed.ownership(), Ownership::Reference);
        assert_eq!(borrowed.raw(), 3);
        assert_eq!(borrowed.destroyable(), None);
    }

    #[test]
    fn restricted_cannot_be_disowned() {
        let restricted = Native::new(3u64, Ownership::Restricted);
        assert!(matches!(restricted.disown(), Err(GpuError::InvalidState(_))));
    }
}

//! Synchronization primitives.

use std::sync::Arc;
use std::time::Duration;

use ash::vk;

use crate::device::RenderDevice;
use crate::error::Result;
use crate::object::{DeviceObject, Native};

/// Fence creation parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct FenceDesc {
    /// Start signaled, so the first wait returns immediately.
    pub signaled: bool,
}

/// A CPU-waitable fence.
pub struct Fence {
    device: Arc<RenderDevice>,
    handle: Native<vk::Fence>,
}

impl Fence {
    /// Create a fence.
    pub fn create(device: &Arc<RenderDevice>, signaled: bool) -> Result<Self> {
        crate::object::create(device, FenceDesc { signaled })
    }

    pub fn handle(&self) -> vk::Fence {
        self.handle.raw()
    }

    /// Wait for the fence, bounded by the device timeout.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn wait(&self) -> Result<()> {
        // SAFETY: the fence belongs to this device
        unsafe {
            self.device
                .raw()
                .wait_for_fences(&[self.handle()], self.device.timeout_ns())
        }
    }

    /// Wait with an explicit bound.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<()> {
        let timeout_ns = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);
        // SAFETY: the fence belongs to this device
        unsafe { self.device.raw().wait_for_fences(&[self.handle()], timeout_ns) }
    }

    /// Reset the fence to unsignaled.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn reset(&self) -> Result<()> {
        // SAFETY: the fence belongs to this device
        unsafe { self.device.raw().reset_fences(&[self.handle()]) }
    }

    /// Wait, then reset. The reset never happens when the wait fails.
    pub fn wait_and_reset(&self) -> Result<()> {
        self.wait()?;
        self.reset()
    }

    /// Non-blocking status query.
    pub fn is_signaled(&self) -> Result<bool> {
        // SAFETY: the fence belongs to this device
        unsafe { self.device.raw().fence_signaled(self.handle()) }
    }
}

impl DeviceObject for Fence {
    type Desc = FenceDesc;
    const KIND: &'static str = "Fence";

    fn validate(_device: &RenderDevice, _desc: &FenceDesc) -> Result<()> {
        Ok(())
    }

    unsafe fn create_api_objects(device: &Arc<RenderDevice>, desc: FenceDesc) -> Result<Self> {
        // SAFETY: forwarded from the caller
        let fence = unsafe { device.raw().create_fence(desc.signaled)? };
        Ok(Self {
            device: device.clone(),
            handle: Native::Owned(fence),
        })
    }

    unsafe fn destroy_api_objects(&mut self) {
        if let Some(fence) = self.handle.destroyable() {
            // SAFETY: forwarded from the caller
            unsafe { self.device.raw().destroy_fence(fence) };
        }
        self.handle = Native::Borrowed(vk::Fence::null());
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        // SAFETY: the owner guarantees no submission still signals this fence
        unsafe { self.destroy_api_objects() };
        self.device.registry().release(Self::KIND);
    }
}

/// A GPU-GPU binary semaphore.
pub struct Semaphore {
    device: Arc<RenderDevice>,
    handle: Native<vk::Semaphore>,
}

impl Semaphore {
    pub fn create(device: &Arc<RenderDevice>) -> Result<Self> {
        crate::object::create(device, ())
    }

    pub fn handle(&self) -> vk::Semaphore {
        self.handle.raw()
    }
}

impl DeviceObject for Semaphore {
    type Desc = ();
    const KIND: &'static str = "Semaphore";

    fn validate(_device: &RenderDevice, _desc: &()) -> Result<()> {
        Ok(())
    }

    unsafe fn create_api_objects(device: &Arc<RenderDevice>, _desc: ()) -> Result<Self> {
        // SAFETY: forwarded from the caller
        let semaphore = unsafe { device.raw().create_semaphore()? };
        Ok(Self {
            device: device.clone(),
            handle: Native::Owned(semaphore),
        })
    }

    unsafe fn destroy_api_objects(&mut self) {
        if let Some(semaphore) = self.handle.destroyable() {
            // SAFETY: forwarded from the caller
            unsafe { self.device.raw().destroy_semaphore(semaphore) };
        }
        self.handle = Native::Borrowed(vk::Semaphore::null());
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        // SAFETY: the owner guarantees no pending wait or signal remains
        unsafe { self.destroy_api_objects() };
        self.device.registry().release(Self::KIND);
    }
}

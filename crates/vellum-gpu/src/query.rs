//! Query pools.

use std::sync::Arc;

use ash::vk;

use crate::device::RenderDevice;
use crate::error::{GpuError, Result};
use crate::object::{DeviceObject, Native};

/// Kind of queries a pool holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Occlusion,
    Timestamp,
    PipelineStatistics(vk::QueryPipelineStatisticFlags),
}

impl QueryKind {
    fn native(self) -> vk::QueryType {
        match self {
            Self::Occlusion => vk::QueryType::OCCLUSION,
            Self::Timestamp => vk::QueryType::TIMESTAMP,
            Self::PipelineStatistics(_) => vk::QueryType::PIPELINE_STATISTICS,
        }
    }

    /// 64-bit values written per query.
    fn values_per_query(self) -> usize {
        match self {
            Self::Occlusion | Self::Timestamp => 1,
            Self::PipelineStatistics(flags) => flags.as_raw().count_ones() as usize,
        }
    }
}

/// Query pool creation parameters.
#[derive(Debug, Clone, Copy)]
pub struct QueryPoolDesc {
    pub kind: QueryKind,
    pub count: u32,
}

/// A pool of GPU queries.
pub struct QueryPool {
    device: Arc<RenderDevice>,
    handle: Native<vk::QueryPool>,
    kind: QueryKind,
    count: u32,
}

impl QueryPool {
    pub fn create(device: &Arc<RenderDevice>, desc: QueryPoolDesc) -> Result<Self> {
        crate::object::create(device, desc)
    }

    pub fn handle(&self) -> vk::QueryPool {
        self.handle.raw()
    }

    pub fn kind(&self) -> QueryKind {
        self.kind
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Read `count` queries starting at `first`.
    ///
    /// Returns `None` while any result is still pending. Pipeline statistics yield one
    /// value per enabled counter, query by query.
    pub fn results(&self, first: u32, count: u32) -> Result<Option<Vec<u64>>> {
        if count == 0 || first + count > self.count {
            return Err(GpuError::InvalidConfig(format!(
                "queries {first}+{count} outside pool of {}",
                self.count
            )));
        }

        let mut data = vec![0u64; count as usize * self.kind.values_per_query()];
        // SAFETY: the range was checked against the pool size
        let ready = unsafe {
            self.device.raw().query_pool_results(
                self.handle(),
                first,
                count,
                &mut data,
                vk::QueryResultFlags::TYPE_64,
            )?
        };

        Ok(ready.then_some(data))
    }

    /// Convert two timestamps into elapsed nanoseconds.
    pub fn timestamp_delta_ns(&self, start: u64, end: u64) -> f64 {
        let period = f64::from(self.device.info().limits.timestamp_period);
        end.saturating_sub(start) as f64 * period
    }
}

impl DeviceObject for QueryPool {
    type Desc = QueryPoolDesc;
    const KIND: &'static str = "QueryPool";

    fn validate(_device: &RenderDevice, desc: &QueryPoolDesc) -> Result<()> {
        if desc.count == 0 {
            return Err(GpuError::InvalidConfig("empty query pool".to_string()));
        }
        if let QueryKind::PipelineStatistics(flags) = desc.kind {
            if flags.is_empty() {
                return Err(GpuError::InvalidConfig(
                    "pipeline statistics pool without counters".to_string(),
                ));
            }
        }
        Ok(())
    }

    unsafe fn create_api_objects(device: &Arc<RenderDevice>, desc: QueryPoolDesc) -> Result<Self> {
        let mut info = vk::QueryPoolCreateInfo::default()
            .query_type(desc.kind.native())
            .query_count(desc.count);
        if let QueryKind::PipelineStatistics(flags) = desc.kind {
            info = info.pipeline_statistics(flags);
        }
        // SAFETY: forwarded from the caller
        let pool = unsafe { device.raw().create_query_pool(&info)? };

        Ok(Self {
            device: device.clone(),
            handle: Native::Owned(pool),
            kind: desc.kind,
            count: desc.count,
        })
    }

    unsafe fn destroy_api_objects(&mut self) {
        if let Some(pool) = self.handle.destroyable() {
            // SAFETY: forwarded from the caller
            unsafe { self.device.raw().destroy_query_pool(pool) };
        }
        self.handle = Native::Borrowed(vk::QueryPool::null());
    }
}

impl Drop for QueryPool {
    fn drop(&mut self) {
        // SAFETY: the owner guarantees no command buffer still references the pool
        unsafe { self.destroy_api_objects() };
        self.device.registry().release(Self::KIND);
    }
}

// Synchronization primitives
//
// Fences for CPU-GPU sync, semaphores for compute -> graphics -> present ordering

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::VulkanDevice;

/// Frame synchronization - one per frame in flight
pub struct FrameSync {
    /// Signalled by acquire, waited on by the graphics submit
    pub image_available: vk::Semaphore,
    /// Signalled by the graphics submit, waited on by present
    pub render_finished: vk::Semaphore,
    /// Signalled by the compute submit, waited on by the graphics submit
    pub compute_finished: vk::Semaphore,
    pub compute_fence: vk::Fence,
    pub in_flight_fence: vk::Fence,
    device: Arc<VulkanDevice>,
}

impl FrameSync {
    pub fn new(device: &Arc<VulkanDevice>) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        // Start signaled so the first wait of each slot returns immediately
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        let mut sync = Self {
            image_available: vk::Semaphore::null(),
            render_finished: vk::Semaphore::null(),
            compute_finished: vk::Semaphore::null(),
            compute_fence: vk::Fence::null(),
            in_flight_fence: vk::Fence::null(),
            device: device.clone(),
        };

        unsafe {
            let d = &device.device;
            sync.image_available = d.create_semaphore(&semaphore_info, None)?;
            sync.render_finished = d.create_semaphore(&semaphore_info, None)?;
            sync.compute_finished = d.create_semaphore(&semaphore_info, None)?;
            sync.compute_fence = d.create_fence(&fence_info, None)?;
            sync.in_flight_fence = d.create_fence(&fence_info, None)?;
        }

        Ok(sync)
    }

    pub fn wait_compute(&self) -> Result<()> {
        wait_fence(&self.device.device, self.compute_fence).context("Compute fence wait failed")
    }

    pub fn wait_graphics(&self) -> Result<()> {
        wait_fence(&self.device.device, self.in_flight_fence).context("Graphics fence wait failed")
    }
}

impl Drop for FrameSync {
    fn drop(&mut self) {
        // Null handles are ignored by vkDestroy*
        unsafe {
            let d = &self.device.device;
            d.destroy_semaphore(self.image_available, None);
            d.destroy_semaphore(self.render_finished, None);
            d.destroy_semaphore(self.compute_finished, None);
            d.destroy_fence(self.compute_fence, None);
            d.destroy_fence(self.in_flight_fence, None);
        }
    }
}

/// Block without timeout until `fence` is signalled
fn wait_fence(device: &ash::Device, fence: vk::Fence) -> Result<()> {
    unsafe { device.wait_for_fences(&[fence], true, u64::MAX) }?;
    Ok(())
}

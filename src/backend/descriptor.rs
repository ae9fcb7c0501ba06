// Descriptor set layouts, pool and per-slot set updates
//
// Graphics set: 0 = MVP uniform (vertex)
// Compute set:  0 = params uniform, 1 = previous particles (read), 2 = current particles (write)

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::buffer::Buffer;
use super::VulkanDevice;

pub fn graphics_bindings() -> [vk::DescriptorSetLayoutBinding; 1] {
    [binding(0, vk::DescriptorType::UNIFORM_BUFFER, vk::ShaderStageFlags::VERTEX)]
}

pub fn compute_bindings() -> [vk::DescriptorSetLayoutBinding; 3] {
    [
        binding(0, vk::DescriptorType::UNIFORM_BUFFER, vk::ShaderStageFlags::COMPUTE),
        binding(1, vk::DescriptorType::STORAGE_BUFFER, vk::ShaderStageFlags::COMPUTE),
        binding(2, vk::DescriptorType::STORAGE_BUFFER, vk::ShaderStageFlags::COMPUTE),
    ]
}

fn binding(
    index: u32,
    ty: vk::DescriptorType,
    stages: vk::ShaderStageFlags,
) -> vk::DescriptorSetLayoutBinding {
    vk::DescriptorSetLayoutBinding::builder()
        .binding(index)
        .descriptor_type(ty)
        .descriptor_count(1)
        .stage_flags(stages)
        .build()
}

/// Pool sizes for `frames` graphics sets plus `frames` compute sets
pub fn pool_sizes(frames: u32) -> Vec<vk::DescriptorPoolSize> {
    let mut uniform = 0;
    let mut storage = 0;

    for b in graphics_bindings().iter().chain(compute_bindings().iter()) {
        match b.descriptor_type {
            vk::DescriptorType::UNIFORM_BUFFER => uniform += b.descriptor_count,
            vk::DescriptorType::STORAGE_BUFFER => storage += b.descriptor_count,
            _ => {}
        }
    }

    vec![
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: uniform * frames,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::STORAGE_BUFFER,
            descriptor_count: storage * frames,
        },
    ]
}

pub struct DescriptorSetLayout {
    pub layout: vk::DescriptorSetLayout,
    device: Arc<VulkanDevice>,
}

impl DescriptorSetLayout {
    pub fn new(device: &Arc<VulkanDevice>, bindings: &[vk::DescriptorSetLayoutBinding]) -> Result<Self> {
        let create_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(bindings);

        let layout = unsafe { device.device.create_descriptor_set_layout(&create_info, None) }
            .context("Failed to create descriptor set layout")?;

        Ok(Self {
            layout,
            device: device.clone(),
        })
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .device
                .destroy_descriptor_set_layout(self.layout, None)
        };
    }
}

/// Pool owning every descriptor set; the sets are freed with the pool
pub struct DescriptorPool {
    pub pool: vk::DescriptorPool,
    device: Arc<VulkanDevice>,
}

impl DescriptorPool {
    pub fn new(device: &Arc<VulkanDevice>, frames: u32) -> Result<Self> {
        let sizes = pool_sizes(frames);
        let create_info = vk::DescriptorPoolCreateInfo::builder()
            .pool_sizes(&sizes)
            .max_sets(2 * frames);

        let pool = unsafe { device.device.create_descriptor_pool(&create_info, None) }
            .context("Failed to create descriptor pool")?;

        Ok(Self {
            pool,
            device: device.clone(),
        })
    }

    pub fn allocate(
        &self,
        layout: &DescriptorSetLayout,
        count: usize,
    ) -> Result<Vec<vk::DescriptorSet>> {
        let layouts = vec![layout.layout; count];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);

        unsafe { self.device.device.allocate_descriptor_sets(&alloc_info) }
            .context("Failed to allocate descriptor sets")
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_descriptor_pool(self.pool, None) };
    }
}

fn whole(buffer: &Buffer) -> [vk::DescriptorBufferInfo; 1] {
    [vk::DescriptorBufferInfo {
        buffer: buffer.buffer,
        offset: 0,
        range: buffer.size,
    }]
}

pub fn write_graphics_set(device: &ash::Device, set: vk::DescriptorSet, mvp: &Buffer) {
    let mvp_info = whole(mvp);

    let writes = [vk::WriteDescriptorSet::builder()
        .dst_set(set)
        .dst_binding(0)
        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
        .buffer_info(&mvp_info)
        .build()];

    unsafe { device.update_descriptor_sets(&writes, &[]) };
}

/// Point a compute set at its parameters and its read/write particle arrays
pub fn write_compute_set(
    device: &ash::Device,
    set: vk::DescriptorSet,
    params: &Buffer,
    previous: &Buffer,
    current: &Buffer,
) {
    let params_info = whole(params);
    let previous_info = whole(previous);
    let current_info = whole(current);

    let writes = [
        vk::WriteDescriptorSet::builder()
            .dst_set(set)
            .dst_binding(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .buffer_info(&params_info)
            .build(),
        vk::WriteDescriptorSet::builder()
            .dst_set(set)
            .dst_binding(1)
            .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
            .buffer_info(&previous_info)
            .build(),
        vk::WriteDescriptorSet::builder()
            .dst_set(set)
            .dst_binding(2)
            .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
            .buffer_info(&current_info)
            .build(),
    ];

    unsafe { device.update_descriptor_sets(&writes, &[]) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_layout_reads_then_writes() {
        let bindings = compute_bindings();
        assert_eq!(bindings[0].descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(bindings[1].descriptor_type, vk::DescriptorType::STORAGE_BUFFER);
        assert_eq!(bindings[2].descriptor_type, vk::DescriptorType::STORAGE_BUFFER);
        assert!(bindings
            .iter()
            .all(|b| b.stage_flags == vk::ShaderStageFlags::COMPUTE));
    }

    #[test]
    fn graphics_layout_is_vertex_uniform() {
        let [mvp] = graphics_bindings();
        assert_eq!(mvp.binding, 0);
        assert_eq!(mvp.descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(mvp.stage_flags, vk::ShaderStageFlags::VERTEX);
    }

    #[test]
    fn pool_covers_all_slots() {
        let sizes = pool_sizes(2);
        assert_eq!(sizes[0].ty, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(sizes[0].descriptor_count, 4);
        assert_eq!(sizes[1].ty, vk::DescriptorType::STORAGE_BUFFER);
        assert_eq!(sizes[1].descriptor_count, 4);
    }
}

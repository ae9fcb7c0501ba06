// Command pool and per-slot command recording
//
// Both recorders assume the command buffer was allocated from a pool with
// RESET_COMMAND_BUFFER and is no longer in use by the GPU.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::VulkanDevice;

pub struct CommandPool {
    pub pool: vk::CommandPool,
    device: Arc<VulkanDevice>,
}

impl CommandPool {
    pub fn new(device: &Arc<VulkanDevice>, queue_family: u32) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family);

        let pool = unsafe { device.device.create_command_pool(&pool_info, None) }
            .context("Failed to create command pool")?;

        Ok(Self {
            pool,
            device: device.clone(),
        })
    }

    pub fn allocate(&self, count: u32) -> Result<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        unsafe { self.device.device.allocate_command_buffers(&alloc_info) }
            .context("Failed to allocate command buffers")
    }

    /// Record `record` into a temporary command buffer, submit it and wait
    /// for the queue to drain.
    pub fn one_shot<F>(&self, queue: vk::Queue, record: F) -> Result<()>
    where
        F: FnOnce(vk::CommandBuffer),
    {
        let device = &self.device.device;
        let cmd = self
            .allocate(1)?
            .into_iter()
            .next()
            .context("No command buffer allocated")?;

        let result = (|| unsafe {
            let begin_info = vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            device.begin_command_buffer(cmd, &begin_info)?;
            record(cmd);
            device.end_command_buffer(cmd)?;

            let command_buffers = [cmd];
            let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);
            device.queue_submit(queue, &[submit_info.build()], vk::Fence::null())?;
            device.queue_wait_idle(queue)?;
            Ok::<_, vk::Result>(())
        })();

        unsafe { device.free_command_buffers(self.pool, &[cmd]) };
        result.context("One-shot command submission failed")
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        // Also frees every command buffer allocated from the pool
        unsafe { self.device.device.destroy_command_pool(self.pool, None) };
    }
}

/// Number of work groups covering `particle_count` particles.
///
/// The division must be exact; the config loader rejects other counts.
pub fn dispatch_count(particle_count: u32, workgroup_size: u32) -> u32 {
    debug_assert_eq!(particle_count % workgroup_size, 0);
    particle_count / workgroup_size
}

/// Stages that touched the particle arrays in earlier submissions: the
/// previous dispatch wrote them and earlier draws read them as instances.
pub const PARTICLE_PRODUCER_STAGES: vk::PipelineStageFlags = vk::PipelineStageFlags::from_raw(
    vk::PipelineStageFlags::COMPUTE_SHADER.as_raw() | vk::PipelineStageFlags::VERTEX_INPUT.as_raw(),
);

/// Orders a dispatch after the previous tick's dispatch (read after write)
/// and after draws still reading the array it overwrites (write after read).
pub fn particle_barrier() -> vk::MemoryBarrier {
    vk::MemoryBarrier {
        src_access_mask: vk::AccessFlags::SHADER_WRITE | vk::AccessFlags::VERTEX_ATTRIBUTE_READ,
        dst_access_mask: vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
        ..Default::default()
    }
}

/// Compute pass state for one slot
pub struct ComputePass {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub descriptor_set: vk::DescriptorSet,
    pub group_count: u32,
}

/// Record the particle update for one slot.
pub fn record_compute(device: &ash::Device, cmd: vk::CommandBuffer, pass: &ComputePass) -> Result<()> {
    unsafe {
        device
            .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
            .context("Failed to reset compute command buffer")?;

        let begin_info = vk::CommandBufferBeginInfo::builder();
        device
            .begin_command_buffer(cmd, &begin_info)
            .context("Failed to begin compute command buffer")?;

        device.cmd_pipeline_barrier(
            cmd,
            PARTICLE_PRODUCER_STAGES,
            vk::PipelineStageFlags::COMPUTE_SHADER,
            vk::DependencyFlags::empty(),
            &[particle_barrier()],
            &[],
            &[],
        );

        device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, pass.pipeline);
        device.cmd_bind_descriptor_sets(
            cmd,
            vk::PipelineBindPoint::COMPUTE,
            pass.layout,
            0,
            &[pass.descriptor_set],
            &[],
        );
        device.cmd_dispatch(cmd, pass.group_count, 1, 1);

        device
            .end_command_buffer(cmd)
            .context("Failed to end compute command buffer")?;
    }

    Ok(())
}

/// Everything the draw needs for one slot and one presentable image
pub struct DrawPass {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub clear_color: [f32; 4],
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub descriptor_set: vk::DescriptorSet,
    /// Per-vertex star geometry (binding 0)
    pub vertex_buffer: vk::Buffer,
    /// Per-instance particle data written by the compute pass (binding 1)
    pub instance_buffer: vk::Buffer,
    pub index_buffer: vk::Buffer,
    pub index_count: u32,
    pub instance_count: u32,
}

/// Record the instanced star draw for one slot.
pub fn record_graphics(device: &ash::Device, cmd: vk::CommandBuffer, pass: &DrawPass) -> Result<()> {
    unsafe {
        device
            .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
            .context("Failed to reset graphics command buffer")?;

        let begin_info = vk::CommandBufferBeginInfo::builder();
        device
            .begin_command_buffer(cmd, &begin_info)
            .context("Failed to begin graphics command buffer")?;

        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: pass.clear_color,
            },
        }];

        let render_pass_info = vk::RenderPassBeginInfo::builder()
            .render_pass(pass.render_pass)
            .framebuffer(pass.framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: pass.extent,
            })
            .clear_values(&clear_values);

        device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);
        device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pass.pipeline);

        device.cmd_bind_vertex_buffers(
            cmd,
            0,
            &[pass.vertex_buffer, pass.instance_buffer],
            &[0, 0],
        );
        device.cmd_bind_index_buffer(cmd, pass.index_buffer, 0, vk::IndexType::UINT16);

        // Extent can change between recreations
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: pass.extent.width as f32,
            height: pass.extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        device.cmd_set_viewport(cmd, 0, &[viewport]);

        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: pass.extent,
        };
        device.cmd_set_scissor(cmd, 0, &[scissor]);

        device.cmd_bind_descriptor_sets(
            cmd,
            vk::PipelineBindPoint::GRAPHICS,
            pass.layout,
            0,
            &[pass.descriptor_set],
            &[],
        );

        device.cmd_draw_indexed(cmd, pass.index_count, pass.instance_count, 0, 0, 0);
        device.cmd_end_render_pass(cmd);

        device
            .end_command_buffer(cmd)
            .context("Failed to end graphics command buffer")?;
    }

    Ok(())
}

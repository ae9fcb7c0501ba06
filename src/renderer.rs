// Renderer - owning render context
//
// Holds every GPU object the animation needs and implements `FramePipeline`,
// the device half of a frame tick. Fields are declared in dependency order,
// so dropping the struct tears everything down in reverse order of creation
// with the device released last.

use anyhow::{Context, Result};
use ash::vk;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::mem::size_of;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use crate::backend::buffer::Buffer;
use crate::backend::command::{self, CommandPool, ComputePass, DrawPass};
use crate::backend::descriptor::{self, DescriptorPool, DescriptorSetLayout};
use crate::backend::pipeline::{self, ComputePipeline, GraphicsPipeline, RenderPass};
use crate::backend::shader::ShaderModule;
use crate::backend::swapchain::{SurfaceChain, SurfacePlan};
use crate::backend::sync::FrameSync;
use crate::backend::VulkanDevice;
use crate::clock::AnimationClock;
use crate::config::Config;
use crate::frame::{FramePipeline, SurfaceStatus, FRAMES_IN_FLIGHT};
use crate::geometry::Star;
use crate::particles::{read_slot, Particle, ParticleState};
use crate::uniforms::{Mvp, SimParams};

const STAR_COLOR: [f32; 3] = [0.8, 0.1, 0.0];

const COMPUTE_SHADER: &str = "particles.comp.spv";
const VERTEX_SHADER: &str = "particles.vert.spv";
const FRAGMENT_SHADER: &str = "particles.frag.spv";

/// Resources owned by one frame slot
struct FrameResources {
    sync: FrameSync,
    compute_cmd: vk::CommandBuffer,
    graphics_cmd: vk::CommandBuffer,
    mvp: Buffer,
    params: Buffer,
    /// Particle array written by this slot's compute pass
    storage: Buffer,
    graphics_set: vk::DescriptorSet,
    compute_set: vk::DescriptorSet,
}

/// Settings copied out of the config at startup
struct RenderSettings {
    clear_color: [f32; 4],
    present_mode: vk::PresentModeKHR,
    shader_dir: PathBuf,
    particle_count: u32,
    group_count: u32,
}

pub struct Renderer {
    frames: [FrameResources; FRAMES_IN_FLIGHT],
    _descriptor_pool: DescriptorPool,
    chain: SurfaceChain,
    graphics_pipeline: GraphicsPipeline,
    render_pass: RenderPass,
    compute_pipeline: ComputePipeline,
    graphics_set_layout: DescriptorSetLayout,
    _compute_set_layout: DescriptorSetLayout,
    star_vertices: Buffer,
    star_indices: Buffer,
    index_count: u32,
    _command_pool: CommandPool,
    particles: ParticleState,
    clock: AnimationClock,
    settings: RenderSettings,
    device: Arc<VulkanDevice>,
}

impl Renderer {
    pub fn new<W>(config: &Config, window: &W, window_size: (u32, u32)) -> Result<Self>
    where
        W: HasRawDisplayHandle + HasRawWindowHandle,
    {
        log::info!("Initializing Vulkan...");

        let sim = &config.simulation;
        let clock = AnimationClock::new(sim.reset_seconds, Instant::now())?;
        let settings = RenderSettings {
            clear_color: config.graphics.clear_color,
            present_mode: config.get_present_mode(),
            shader_dir: config.graphics.shader_dir.clone(),
            particle_count: sim.particle_count,
            group_count: command::dispatch_count(sim.particle_count, sim.workgroup_size),
        };

        // ─────────────────────────────────────────────────────────────────────
        // STEP 1: Device, surface and queues
        // ─────────────────────────────────────────────────────────────────────
        let enable_validation = cfg!(debug_assertions) && config.debug.validation_layers;
        let device = VulkanDevice::new(
            &config.window.title,
            enable_validation,
            config.graphics.max_samples,
            window,
        )?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 2: Render pass and surface chain
        // ─────────────────────────────────────────────────────────────────────
        let support = device.surface_support()?;
        let plan = SurfacePlan::choose(&support, window_size, settings.present_mode)
            .context("Window has no drawable area")?;

        let render_pass = RenderPass::new(&device, plan.format.format, device.msaa_samples)?;
        let chain = SurfaceChain::new(&device, &plan, &support, &render_pass, None)?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 3: Descriptor layouts and pipelines
        // ─────────────────────────────────────────────────────────────────────
        let graphics_set_layout =
            DescriptorSetLayout::new(&device, &descriptor::graphics_bindings())?;
        let compute_set_layout = DescriptorSetLayout::new(&device, &descriptor::compute_bindings())?;

        let graphics_pipeline = build_graphics_pipeline(
            &device,
            &settings.shader_dir,
            &render_pass,
            &graphics_set_layout,
        )?;

        pipeline::check_compute_limits(
            &device.properties.limits,
            sim.workgroup_size,
            settings.group_count,
        )?;

        let compute_shader =
            ShaderModule::from_file(&device, &settings.shader_dir.join(COMPUTE_SHADER))?;
        let compute_pipeline = ComputePipeline::new(
            &device,
            compute_set_layout.layout,
            &compute_shader,
            sim.workgroup_size,
        )?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 4: Static star geometry
        // ─────────────────────────────────────────────────────────────────────
        let command_pool = CommandPool::new(&device, device.queue_families.graphics)?;

        let star = Star::new([0.0, 0.0], sim.star_size, STAR_COLOR);
        let star_vertices = Buffer::device_local_with_data(
            &device,
            &command_pool,
            "star vertices",
            vk::BufferUsageFlags::VERTEX_BUFFER,
            &star.vertices,
        )?;
        let star_indices = Buffer::device_local_with_data(
            &device,
            &command_pool,
            "star indices",
            vk::BufferUsageFlags::INDEX_BUFFER,
            &star.indices,
        )?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 5: Per-slot buffers, descriptor sets and command buffers
        // ─────────────────────────────────────────────────────────────────────
        let mut particles = ParticleState::new(sim);
        let bursts = particles.launch_all();
        let storage_size = (particles.count() * size_of::<Particle>()) as vk::DeviceSize;

        let mut storages = Vec::with_capacity(FRAMES_IN_FLIGHT);
        for (slot, burst) in bursts.iter().enumerate() {
            let mut storage = Buffer::mapped(
                &device,
                &format!("particles[{}]", slot),
                storage_size,
                vk::BufferUsageFlags::STORAGE_BUFFER
                    | vk::BufferUsageFlags::VERTEX_BUFFER
                    | vk::BufferUsageFlags::TRANSFER_DST,
            )?;
            storage.write(burst)?;
            storages.push(storage);
        }

        let descriptor_pool = DescriptorPool::new(&device, FRAMES_IN_FLIGHT as u32)?;
        let graphics_sets = descriptor_pool.allocate(&graphics_set_layout, FRAMES_IN_FLIGHT)?;
        let compute_sets = descriptor_pool.allocate(&compute_set_layout, FRAMES_IN_FLIGHT)?;
        let command_buffers = command_pool.allocate(2 * FRAMES_IN_FLIGHT as u32)?;

        let mvp_data = Mvp::for_extent(chain.extent);
        let mut frames = Vec::with_capacity(FRAMES_IN_FLIGHT);

        for (slot, storage) in storages.iter().enumerate() {
            let mut mvp = Buffer::mapped(
                &device,
                &format!("mvp[{}]", slot),
                size_of::<Mvp>() as vk::DeviceSize,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
            )?;
            mvp.write(&[mvp_data])?;

            let mut params = Buffer::mapped(
                &device,
                &format!("params[{}]", slot),
                size_of::<SimParams>() as vk::DeviceSize,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
            )?;
            params.write(&[SimParams::new(0.0)])?;

            descriptor::write_graphics_set(&device.device, graphics_sets[slot], &mvp);
            descriptor::write_compute_set(
                &device.device,
                compute_sets[slot],
                &params,
                &storages[read_slot(slot)],
                storage,
            );

            frames.push((mvp, params));
        }

        let frames: Vec<FrameResources> = frames
            .into_iter()
            .zip(storages)
            .enumerate()
            .map(|(slot, ((mvp, params), storage))| -> Result<FrameResources> {
                Ok(FrameResources {
                    sync: FrameSync::new(&device)?,
                    compute_cmd: command_buffers[2 * slot],
                    graphics_cmd: command_buffers[2 * slot + 1],
                    mvp,
                    params,
                    storage,
                    graphics_set: graphics_sets[slot],
                    compute_set: compute_sets[slot],
                })
            })
            .collect::<Result<_>>()?;

        let frames: [FrameResources; FRAMES_IN_FLIGHT] = frames
            .try_into()
            .map_err(|_| anyhow::anyhow!("Expected {} frame slots", FRAMES_IN_FLIGHT))?;

        log::info!("Vulkan initialized successfully!");

        Ok(Self {
            frames,
            _descriptor_pool: descriptor_pool,
            chain,
            graphics_pipeline,
            render_pass,
            compute_pipeline,
            graphics_set_layout,
            _compute_set_layout: compute_set_layout,
            star_vertices,
            index_count: star.index_count(),
            star_indices,
            _command_pool: command_pool,
            particles,
            clock,
            settings,
            device,
        })
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.chain.extent
    }

    pub fn wait_idle(&self) -> Result<()> {
        self.device.wait_idle()
    }

    /// Rebuild the surface chain for the current window size.
    ///
    /// Returns `false` without touching anything while the window has no
    /// drawable area.
    pub fn recreate_surface(&mut self, window_size: (u32, u32)) -> Result<bool> {
        let support = self.device.surface_support()?;
        let Some(plan) = SurfacePlan::choose(&support, window_size, self.settings.present_mode)
        else {
            log::debug!("Surface has no drawable area, deferring recreation");
            return Ok(false);
        };

        // Old chain entries may still be referenced by in-flight frames
        self.device.wait_idle()?;

        // A format change invalidates the render pass and the pipeline built on it
        let new_pass = if plan.format.format != self.render_pass.format {
            log::info!(
                "Surface format changed {:?} -> {:?}",
                self.render_pass.format,
                plan.format.format
            );
            Some(RenderPass::new(
                &self.device,
                plan.format.format,
                self.device.msaa_samples,
            )?)
        } else {
            None
        };

        let pass = new_pass.as_ref().unwrap_or(&self.render_pass);
        let chain = SurfaceChain::new(&self.device, &plan, &support, pass, Some(&self.chain))?;
        let pipeline = match &new_pass {
            Some(pass) => Some(build_graphics_pipeline(
                &self.device,
                &self.settings.shader_dir,
                pass,
                &self.graphics_set_layout,
            )?),
            None => None,
        };

        self.chain = chain;
        if let Some(pipeline) = pipeline {
            self.graphics_pipeline = pipeline;
        }
        if let Some(pass) = new_pass {
            self.render_pass = pass;
        }

        Ok(true)
    }
}

fn build_graphics_pipeline(
    device: &Arc<VulkanDevice>,
    shader_dir: &std::path::Path,
    render_pass: &RenderPass,
    set_layout: &DescriptorSetLayout,
) -> Result<GraphicsPipeline> {
    let vert = ShaderModule::from_file(device, &shader_dir.join(VERTEX_SHADER))?;
    let frag = ShaderModule::from_file(device, &shader_dir.join(FRAGMENT_SHADER))?;
    GraphicsPipeline::new(device, render_pass, set_layout.layout, &vert, &frag)
}

impl FramePipeline for Renderer {
    fn wait_for_compute(&mut self, slot: usize) -> Result<()> {
        self.frames[slot].sync.wait_compute()
    }

    fn update_slot(&mut self, slot: usize) -> Result<bool> {
        let tick = self.clock.tick(Instant::now());
        self.frames[slot].params.write(&[SimParams::new(tick.delta)])?;
        Ok(tick.relaunch)
    }

    /// The dispatch of the current tick reads the previous slot's array, so
    /// the same burst goes into every slot.
    fn relaunch(&mut self) -> Result<()> {
        let burst = self.particles.launch();
        for frame in &mut self.frames {
            frame.storage.write(&burst)?;
        }

        log::info!("Particles relaunched");
        Ok(())
    }

    fn submit_compute(&mut self, slot: usize) -> Result<()> {
        let device = &self.device.device;
        let frame = &self.frames[slot];

        unsafe { device.reset_fences(&[frame.sync.compute_fence]) }
            .context("Failed to reset compute fence")?;

        command::record_compute(
            device,
            frame.compute_cmd,
            &ComputePass {
                pipeline: self.compute_pipeline.pipeline,
                layout: self.compute_pipeline.layout,
                descriptor_set: frame.compute_set,
                group_count: self.settings.group_count,
            },
        )?;

        let command_buffers = [frame.compute_cmd];
        let signal_semaphores = [frame.sync.compute_finished];
        let submit_info = vk::SubmitInfo::builder()
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            device.queue_submit(
                self.device.compute_queue,
                &[submit_info.build()],
                frame.sync.compute_fence,
            )
        }
        .context("Failed to submit compute work")
    }

    fn wait_for_graphics(&mut self, slot: usize) -> Result<()> {
        self.frames[slot].sync.wait_graphics()
    }

    fn acquire_image(&mut self, slot: usize) -> Result<SurfaceStatus<u32>> {
        self.chain
            .acquire_next_image(self.frames[slot].sync.image_available)
    }

    fn discard_compute(&mut self, slot: usize) -> Result<()> {
        // Empty batch that consumes the pending compute-finished signal
        let wait_semaphores = [self.frames[slot].sync.compute_finished];
        let wait_stages = [vk::PipelineStageFlags::ALL_COMMANDS];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages);

        unsafe {
            self.device.device.queue_submit(
                self.device.graphics_queue,
                &[submit_info.build()],
                vk::Fence::null(),
            )
        }
        .context("Failed to discard compute signal")
    }

    fn submit_graphics(&mut self, slot: usize, image_index: u32) -> Result<()> {
        let extent = self.chain.extent;
        let framebuffer = *self
            .chain
            .framebuffers
            .get(image_index as usize)
            .context("Acquired image has no framebuffer")?;

        // The graphics fence wait guarantees the previous draw no longer reads it
        self.frames[slot].mvp.write(&[Mvp::for_extent(extent)])?;

        let device = &self.device.device;
        let frame = &self.frames[slot];

        unsafe { device.reset_fences(&[frame.sync.in_flight_fence]) }
            .context("Failed to reset graphics fence")?;

        command::record_graphics(
            device,
            frame.graphics_cmd,
            &DrawPass {
                render_pass: self.render_pass.render_pass,
                framebuffer,
                extent,
                clear_color: self.settings.clear_color,
                pipeline: self.graphics_pipeline.pipeline,
                layout: self.graphics_pipeline.layout,
                descriptor_set: frame.graphics_set,
                vertex_buffer: self.star_vertices.buffer,
                instance_buffer: frame.storage.buffer,
                index_buffer: self.star_indices.buffer,
                index_count: self.index_count,
                instance_count: self.settings.particle_count,
            },
        )?;

        // Vertex input needs the particles, color output needs the image
        let wait_semaphores = [frame.sync.compute_finished, frame.sync.image_available];
        let wait_stages = [
            vk::PipelineStageFlags::VERTEX_INPUT,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ];
        let command_buffers = [frame.graphics_cmd];
        let signal_semaphores = [frame.sync.render_finished];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            device.queue_submit(
                self.device.graphics_queue,
                &[submit_info.build()],
                frame.sync.in_flight_fence,
            )
        }
        .context("Failed to submit draw command buffer")
    }

    fn present(&mut self, slot: usize, image_index: u32) -> Result<SurfaceStatus<()>> {
        self.chain.present(
            self.device.present_queue,
            image_index,
            &[self.frames[slot].sync.render_finished],
        )
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");

        // Drain all queues before the fields are destroyed in declaration order
        if let Err(e) = self.device.wait_idle() {
            log::error!("Device idle wait failed during cleanup: {:#}", e);
        }
    }
}

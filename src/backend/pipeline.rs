// Render pass, graphics pipeline and compute pipeline
//
// The graphics pipeline draws one star per particle: binding 0 streams the
// star vertices, binding 1 streams the particle array as instance data.
// The compute pipeline advances the particle array; its work-group width is
// a specialization constant.

use anyhow::{Context, Result};
use ash::vk;
use std::mem::{offset_of, size_of};
use std::sync::Arc;

use super::shader::ShaderModule;
use super::VulkanDevice;
use crate::geometry::Vertex;
use crate::particles::Particle;

const ENTRY_POINT: &std::ffi::CStr = c"main";

/// Multisampling needs a separate resolve target; one sample renders straight
/// into the presentable image.
pub fn uses_resolve(samples: vk::SampleCountFlags) -> bool {
    samples != vk::SampleCountFlags::TYPE_1
}

pub struct RenderPass {
    pub render_pass: vk::RenderPass,
    pub format: vk::Format,
    pub samples: vk::SampleCountFlags,
    device: Arc<VulkanDevice>,
}

impl RenderPass {
    /// Single subpass: multisampled color attachment resolved into the
    /// presentable image.
    pub fn new(
        device: &Arc<VulkanDevice>,
        format: vk::Format,
        samples: vk::SampleCountFlags,
    ) -> Result<Self> {
        let resolve = uses_resolve(samples);

        // Color attachment (multisampled, or the presentable image itself)
        let color_attachment = vk::AttachmentDescription::builder()
            .format(format)
            .samples(samples)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(if resolve {
                vk::AttachmentStoreOp::DONT_CARE
            } else {
                vk::AttachmentStoreOp::STORE
            })
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(if resolve {
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
            } else {
                vk::ImageLayout::PRESENT_SRC_KHR
            })
            .build();

        // Resolve attachment (the presentable image)
        let resolve_attachment = vk::AttachmentDescription::builder()
            .format(format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::DONT_CARE)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
            .build();

        let color_refs = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let resolve_refs = [vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];

        let mut subpass = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs);
        if resolve {
            subpass = subpass.resolve_attachments(&resolve_refs);
        }
        let subpass = subpass.build();

        // Wait for the presentation engine to release the image before writing it
        let dependency = vk::SubpassDependency::builder()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
            .build();

        let all_attachments = [color_attachment, resolve_attachment];
        let attachments = if resolve {
            &all_attachments[..]
        } else {
            &all_attachments[..1]
        };
        let subpasses = [subpass];
        let dependencies = [dependency];

        let render_pass_info = vk::RenderPassCreateInfo::builder()
            .attachments(attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        let render_pass = unsafe { device.device.create_render_pass(&render_pass_info, None) }
            .context("Failed to create render pass")?;

        Ok(Self {
            render_pass,
            format,
            samples,
            device: device.clone(),
        })
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_render_pass(self.render_pass, None) };
    }
}

/// Create framebuffers for each presentable image.
///
/// `color_view` is the shared multisampled target, absent without MSAA.
pub fn create_framebuffers(
    device: &ash::Device,
    image_views: &[vk::ImageView],
    color_view: Option<vk::ImageView>,
    render_pass: vk::RenderPass,
    extent: vk::Extent2D,
) -> Result<Vec<vk::Framebuffer>> {
    let mut framebuffers = Vec::with_capacity(image_views.len());

    for &image_view in image_views {
        let attachments: Vec<vk::ImageView> = match color_view {
            Some(color) => vec![color, image_view],
            None => vec![image_view],
        };

        let framebuffer_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass)
            .attachments(&attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        match unsafe { device.create_framebuffer(&framebuffer_info, None) } {
            Ok(framebuffer) => framebuffers.push(framebuffer),
            Err(e) => {
                for framebuffer in framebuffers {
                    unsafe { device.destroy_framebuffer(framebuffer, None) };
                }
                return Err(e).context("Failed to create framebuffer");
            }
        }
    }

    Ok(framebuffers)
}

/// Vertex input: star vertices per vertex, particles per instance
pub fn get_vertex_input_info() -> (
    [vk::VertexInputBindingDescription; 2],
    [vk::VertexInputAttributeDescription; 5],
) {
    let bindings = [
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<Vertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        },
        vk::VertexInputBindingDescription {
            binding: 1,
            stride: size_of::<Particle>() as u32,
            input_rate: vk::VertexInputRate::INSTANCE,
        },
    ];

    let attribute = |binding, location, format, offset: usize| vk::VertexInputAttributeDescription {
        location,
        binding,
        format,
        offset: offset as u32,
    };

    let attributes = [
        attribute(0, 0, vk::Format::R32G32_SFLOAT, offset_of!(Vertex, position)),
        attribute(1, 1, vk::Format::R32G32B32_SFLOAT, offset_of!(Particle, color)),
        attribute(1, 2, vk::Format::R32G32_SFLOAT, offset_of!(Particle, position)),
        attribute(1, 3, vk::Format::R32_SFLOAT, offset_of!(Particle, orientation)),
        attribute(0, 4, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, color)),
    ];

    (bindings, attributes)
}

pub struct GraphicsPipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    device: Arc<VulkanDevice>,
}

impl GraphicsPipeline {
    pub fn new(
        device: &Arc<VulkanDevice>,
        render_pass: &RenderPass,
        set_layout: vk::DescriptorSetLayout,
        vert_shader: &ShaderModule,
        frag_shader: &ShaderModule,
    ) -> Result<Self> {
        // Shader stages
        let shader_stages = [
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vert_shader.module)
                .name(ENTRY_POINT)
                .build(),
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(frag_shader.module)
                .name(ENTRY_POINT)
                .build(),
        ];

        // Vertex input
        let (bindings, attributes) = get_vertex_input_info();
        let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);

        // Input assembly
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        // Viewport and scissor are set at record time
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        // Rasterization (stars are flat, draw both faces)
        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::CLOCKWISE)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(render_pass.samples);

        // Alpha blending
        let color_blend_attachments = [vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ONE)
            .alpha_blend_op(vk::BlendOp::ADD)
            .build()];

        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        // Pipeline layout
        let set_layouts = [set_layout];
        let layout_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(&set_layouts);

        let layout = unsafe { device.device.create_pipeline_layout(&layout_info, None) }
            .context("Failed to create graphics pipeline layout")?;

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_info)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(render_pass.render_pass)
            .subpass(0)
            .build();

        let pipelines = unsafe {
            device
                .device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        };

        match pipelines {
            Ok(pipelines) => Ok(Self {
                pipeline: pipelines[0],
                layout,
                device: device.clone(),
            }),
            Err((_, e)) => {
                unsafe { device.device.destroy_pipeline_layout(layout, None) };
                Err(e).context("Failed to create graphics pipeline")
            }
        }
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_pipeline(self.pipeline, None);
            self.device.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

/// Reject a dispatch shape the device cannot run
pub fn check_compute_limits(
    limits: &vk::PhysicalDeviceLimits,
    workgroup_size: u32,
    group_count: u32,
) -> Result<()> {
    let max_width = limits
        .max_compute_work_group_size[0]
        .min(limits.max_compute_work_group_invocations);
    anyhow::ensure!(
        workgroup_size <= max_width,
        "workgroup_size {} exceeds the device limit of {}",
        workgroup_size,
        max_width
    );
    anyhow::ensure!(
        group_count <= limits.max_compute_work_group_count[0],
        "{} work groups exceed the device limit of {}",
        group_count,
        limits.max_compute_work_group_count[0]
    );
    Ok(())
}

pub struct ComputePipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    device: Arc<VulkanDevice>,
}

impl ComputePipeline {
    pub fn new(
        device: &Arc<VulkanDevice>,
        set_layout: vk::DescriptorSetLayout,
        shader: &ShaderModule,
        workgroup_size: u32,
    ) -> Result<Self> {
        // local_size_x_id = 0
        let map_entries = [vk::SpecializationMapEntry {
            constant_id: 0,
            offset: 0,
            size: size_of::<u32>(),
        }];
        let spec_data = workgroup_size.to_ne_bytes();
        let specialization = vk::SpecializationInfo::builder()
            .map_entries(&map_entries)
            .data(&spec_data);

        let stage = vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(shader.module)
            .name(ENTRY_POINT)
            .specialization_info(&specialization)
            .build();

        let set_layouts = [set_layout];
        let layout_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(&set_layouts);

        let layout = unsafe { device.device.create_pipeline_layout(&layout_info, None) }
            .context("Failed to create compute pipeline layout")?;

        let pipeline_info = vk::ComputePipelineCreateInfo::builder()
            .stage(stage)
            .layout(layout)
            .build();

        let pipelines = unsafe {
            device
                .device
                .create_compute_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        };

        match pipelines {
            Ok(pipelines) => Ok(Self {
                pipeline: pipelines[0],
                layout,
                device: device.clone(),
            }),
            Err((_, e)) => {
                unsafe { device.device.destroy_pipeline_layout(layout, None) };
                Err(e).context("Failed to create compute pipeline")
            }
        }
    }
}

impl Drop for ComputePipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_pipeline(self.pipeline, None);
            self.device.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_stream_matches_particle_layout() {
        let (bindings, attributes) = get_vertex_input_info();

        assert_eq!(bindings[0].input_rate, vk::VertexInputRate::VERTEX);
        assert_eq!(bindings[0].stride, 20);
        assert_eq!(bindings[1].input_rate, vk::VertexInputRate::INSTANCE);
        assert_eq!(bindings[1].stride, 32);

        let at = |location: u32| {
            attributes
                .iter()
                .find(|a| a.location == location)
                .copied()
                .unwrap()
        };

        assert_eq!((at(0).binding, at(0).offset), (0, 0));
        assert_eq!((at(1).binding, at(1).offset), (1, 16));
        assert_eq!((at(2).binding, at(2).offset), (1, 0));
        assert_eq!((at(3).binding, at(3).offset), (1, 28));
        assert_eq!((at(4).binding, at(4).offset), (0, 8));
    }

    #[test]
    fn locations_are_unique() {
        let (_, attributes) = get_vertex_input_info();
        let mut locations: Vec<u32> = attributes.iter().map(|a| a.location).collect();
        locations.sort_unstable();
        locations.dedup();
        assert_eq!(locations.len(), attributes.len());
    }

    #[test]
    fn resolve_only_when_multisampled() {
        assert!(!uses_resolve(vk::SampleCountFlags::TYPE_1));
        assert!(uses_resolve(vk::SampleCountFlags::TYPE_4));
    }

    fn limits() -> vk::PhysicalDeviceLimits {
        vk::PhysicalDeviceLimits {
            max_compute_work_group_size: [1024, 1024, 64],
            max_compute_work_group_invocations: 512,
            max_compute_work_group_count: [65535, 65535, 65535],
            ..Default::default()
        }
    }

    #[test]
    fn compute_shape_within_limits() {
        assert!(check_compute_limits(&limits(), 256, 4).is_ok());
        assert!(check_compute_limits(&limits(), 512, 65535).is_ok());
    }

    #[test]
    fn oversized_work_group_is_rejected() {
        // Width fits the size limit but not the invocation limit
        let err = check_compute_limits(&limits(), 1024, 4).unwrap_err();
        assert!(err.to_string().contains("workgroup_size"));
        assert!(check_compute_limits(&limits(), 2048, 2).is_err());
    }

    #[test]
    fn too_many_work_groups_are_rejected() {
        assert!(check_compute_limits(&limits(), 1, 65536).is_err());
    }
}

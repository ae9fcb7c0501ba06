// Swapchain - Window presentation
//
// A SurfaceChain owns the presentable images, their views, the shared
// multisampled color target and one framebuffer per image. It is replaced as
// a whole whenever the surface goes stale; the policy deciding format,
// present mode, extent and image count lives in SurfacePlan.

use anyhow::{Context, Result};
use ash::extensions::khr;
use ash::vk;
use std::sync::Arc;

use super::buffer::{create_image_view, Image};
use super::device::SurfaceSupport;
use super::pipeline::{create_framebuffers, uses_resolve, RenderPass};
use super::VulkanDevice;
use crate::frame::SurfaceStatus;

/// Choices for one surface chain, derived from a fresh surface query
#[derive(Debug, Clone, Copy)]
pub struct SurfacePlan {
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
}

impl SurfacePlan {
    /// Returns `None` while the window has no drawable area (minimized).
    pub fn choose(
        support: &SurfaceSupport,
        window_size: (u32, u32),
        preferred_present_mode: vk::PresentModeKHR,
    ) -> Option<Self> {
        if window_size.0 == 0 || window_size.1 == 0 {
            return None;
        }

        let extent = choose_extent(&support.capabilities, window_size);
        if extent.width == 0 || extent.height == 0 {
            return None;
        }

        Some(Self {
            format: choose_surface_format(&support.formats)?,
            present_mode: choose_present_mode(&support.present_modes, preferred_present_mode),
            extent,
            image_count: choose_image_count(&support.capabilities),
        })
    }
}

/// 8-bit BGRA sRGB if offered, else the first enumerated format
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
}

/// The preferred mode if offered, else FIFO (always available)
pub fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    if modes.contains(&preferred) {
        preferred
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// The surface's current extent, unless it is the "undefined" sentinel
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, window_size: (u32, u32)) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: window_size
                .0
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: window_size
                .1
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// One more than the minimum, clamped to the maximum (0 means unbounded)
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        count.min(caps.max_image_count)
    } else {
        count
    }
}

pub struct SurfaceChain {
    pub swapchain: vk::SwapchainKHR,
    pub swapchain_loader: khr::Swapchain,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub framebuffers: Vec<vk::Framebuffer>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
    // Destroyed after the framebuffers that reference it
    color_target: Option<Image>,
    device: Arc<VulkanDevice>,
}

impl SurfaceChain {
    /// Build a chain for `plan`. `old` is retired by the new swapchain and
    /// may be dropped once this returns.
    pub fn new(
        device: &Arc<VulkanDevice>,
        plan: &SurfacePlan,
        support: &SurfaceSupport,
        render_pass: &RenderPass,
        old: Option<&SurfaceChain>,
    ) -> Result<Self> {
        let caps = &support.capabilities;
        let swapchain_loader = khr::Swapchain::new(&device.instance, &device.device);

        // Presentable images are shared when present lives on another family
        let families = device.queue_families.unique();
        let (sharing_mode, family_indices) = if families.len() > 1 {
            (vk::SharingMode::CONCURRENT, families)
        } else {
            (vk::SharingMode::EXCLUSIVE, Vec::new())
        };

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(device.surface)
            .min_image_count(plan.image_count)
            .image_format(plan.format.format)
            .image_color_space(plan.format.color_space)
            .image_extent(plan.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(&family_indices)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(plan.present_mode)
            .clipped(true)
            .old_swapchain(old.map_or(vk::SwapchainKHR::null(), |c| c.swapchain));

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None) }
            .context("Failed to create swapchain")?;

        // From here on Drop releases whatever has been created
        let mut chain = Self {
            swapchain,
            swapchain_loader,
            images: Vec::new(),
            image_views: Vec::new(),
            framebuffers: Vec::new(),
            format: plan.format.format,
            extent: plan.extent,
            present_mode: plan.present_mode,
            color_target: None,
            device: device.clone(),
        };

        chain.images = unsafe { chain.swapchain_loader.get_swapchain_images(swapchain) }
            .context("Failed to get swapchain images")?;

        for &image in &chain.images {
            let view = create_image_view(&device.device, image, chain.format)?;
            chain.image_views.push(view);
        }

        if uses_resolve(render_pass.samples) {
            chain.color_target = Some(Image::color_target(
                device,
                chain.format,
                chain.extent,
                render_pass.samples,
            )?);
        }

        chain.framebuffers = create_framebuffers(
            &device.device,
            &chain.image_views,
            chain.color_target.as_ref().map(|t| t.view),
            render_pass.render_pass,
            chain.extent,
        )?;

        log::info!(
            "Surface chain: {}x{}, {:?}, {:?}, {} images",
            chain.extent.width,
            chain.extent.height,
            chain.format,
            chain.present_mode,
            chain.images.len()
        );

        Ok(chain)
    }

    /// Acquire the next image without timeout, signalling `semaphore`
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> Result<SurfaceStatus<u32>> {
        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        };

        match result {
            // A suboptimal image is still presentable; present reports it again
            Ok((index, _suboptimal)) => Ok(SurfaceStatus::Ready(index)),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(SurfaceStatus::Stale),
            Err(e) => Err(e).context("Failed to acquire swapchain image"),
        }
    }

    /// Present rendered image to screen once `wait_semaphores` are signalled
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<SurfaceStatus<()>> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.swapchain_loader.queue_present(queue, &present_info) };

        match result {
            Ok(false) => Ok(SurfaceStatus::Ready(())),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(SurfaceStatus::Stale),
            Err(e) => Err(e).context("Failed to present swapchain image"),
        }
    }
}

impl Drop for SurfaceChain {
    fn drop(&mut self) {
        unsafe {
            for &framebuffer in &self.framebuffers {
                self.device.device.destroy_framebuffer(framebuffer, None);
            }
            for &view in &self.image_views {
                self.device.device.destroy_image_view(view, None);
            }
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
        // color_target drops after this body
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(current: (u32, u32), min_count: u32, max_count: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min_count,
            max_image_count: max_count,
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        }
    }

    fn support(capabilities: vk::SurfaceCapabilitiesKHR) -> SurfaceSupport {
        SurfaceSupport {
            capabilities,
            formats: vec![
                vk::SurfaceFormatKHR {
                    format: vk::Format::R8G8B8A8_UNORM,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
                vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_SRGB,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
            ],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
        }
    }

    #[test]
    fn prefers_bgra_srgb_then_first() {
        let s = support(caps((800, 600), 2, 3));
        assert_eq!(
            choose_surface_format(&s.formats).map(|f| f.format),
            Some(vk::Format::B8G8R8A8_SRGB)
        );
        assert_eq!(
            choose_surface_format(&s.formats[..1]).map(|f| f.format),
            Some(vk::Format::R8G8B8A8_UNORM)
        );
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn present_mode_falls_back_to_fifo() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(
            choose_present_mode(&modes, vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(&modes, vk::PresentModeKHR::IMMEDIATE),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn extent_uses_current_unless_sentinel() {
        assert_eq!(
            choose_extent(&caps((800, 600), 2, 3), (1400, 1000)),
            vk::Extent2D {
                width: 800,
                height: 600
            }
        );
        assert_eq!(
            choose_extent(&caps((u32::MAX, u32::MAX), 2, 3), (5000, 300)),
            vk::Extent2D {
                width: 4096,
                height: 300
            }
        );
    }

    #[test]
    fn minimized_window_yields_no_plan() {
        let s = support(caps((u32::MAX, u32::MAX), 2, 3));
        assert!(SurfacePlan::choose(&s, (0, 0), vk::PresentModeKHR::MAILBOX).is_none());
        assert!(SurfacePlan::choose(&s, (640, 0), vk::PresentModeKHR::MAILBOX).is_none());

        // Some platforms report a zero current extent while minimized
        let s = support(caps((0, 0), 2, 3));
        assert!(SurfacePlan::choose(&s, (640, 480), vk::PresentModeKHR::MAILBOX).is_none());

        let s = support(caps((u32::MAX, u32::MAX), 2, 3));
        let plan = SurfacePlan::choose(&s, (640, 480), vk::PresentModeKHR::MAILBOX).unwrap();
        assert_eq!(
            plan.extent,
            vk::Extent2D {
                width: 640,
                height: 480
            }
        );
        assert_eq!(plan.present_mode, vk::PresentModeKHR::MAILBOX);
        assert_eq!(plan.format.format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn image_count_stays_within_bounds() {
        assert_eq!(choose_image_count(&caps((1, 1), 2, 3)), 3);
        assert_eq!(choose_image_count(&caps((1, 1), 3, 3)), 3);
        // Unbounded maximum
        assert_eq!(choose_image_count(&caps((1, 1), 2, 0)), 3);

        for (min, max) in [(1, 0), (2, 2), (2, 8), (3, 4)] {
            let count = choose_image_count(&caps((1, 1), min, max));
            assert!(count >= min);
            assert!(max == 0 || count <= max);
        }
    }
}

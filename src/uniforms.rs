// Per-slot uniform blocks
//
// Both structs are copied byte-for-byte into persistently mapped buffers,
// so their layout follows std140.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

/// Camera matrices read by the vertex stage (binding 0 of the graphics set).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Mvp {
    pub model: Mat4,
    pub view: Mat4,
    pub proj: Mat4,
}

impl Mvp {
    /// Fixed camera looking at the origin, projected for `extent`.
    pub fn for_extent(extent: vk::Extent2D) -> Self {
        let aspect = extent.width as f32 / extent.height.max(1) as f32;

        let view = Mat4::look_at_rh(
            Vec3::new(0.0, 0.0, -2.0),
            Vec3::ZERO,
            Vec3::new(0.0, -1.0, 0.0),
        );

        let mut proj = Mat4::perspective_rh(std::f32::consts::FRAC_PI_4, aspect, 0.1, 10.0);
        // Vulkan clip space has Y pointing down
        proj.y_axis.y *= -1.0;

        Self {
            model: Mat4::IDENTITY,
            view,
            proj,
        }
    }
}

/// Simulation parameters read by the compute stage (binding 0 of the compute set).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct SimParams {
    pub delta_time: f32,
    _pad: [f32; 3],
}

impl SimParams {
    pub fn new(delta_time: f32) -> Self {
        Self {
            delta_time,
            _pad: [0.0; 3],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::Vec4;

    #[test]
    fn block_sizes_match_std140() {
        assert_eq!(std::mem::size_of::<Mvp>(), 192);
        assert_eq!(std::mem::size_of::<SimParams>(), 16);
    }

    #[test]
    fn origin_projects_to_screen_center() {
        let mvp = Mvp::for_extent(vk::Extent2D {
            width: 1400,
            height: 1000,
        });
        let clip = mvp.proj * mvp.view * mvp.model * Vec4::new(0.0, 0.0, 0.0, 1.0);

        assert_relative_eq!(clip.x / clip.w, 0.0, epsilon = 1e-6);
        assert_relative_eq!(clip.y / clip.w, 0.0, epsilon = 1e-6);
        assert!(clip.w > 0.0);
    }

    #[test]
    fn aspect_ratio_follows_extent() {
        let wide = Mvp::for_extent(vk::Extent2D {
            width: 2000,
            height: 1000,
        });
        let square = Mvp::for_extent(vk::Extent2D {
            width: 1000,
            height: 1000,
        });

        assert_relative_eq!(wide.proj.x_axis.x * 2.0, square.proj.x_axis.x, epsilon = 1e-5);
        assert_relative_eq!(wide.proj.y_axis.y, square.proj.y_axis.y, epsilon = 1e-5);
    }

    #[test]
    fn zero_height_does_not_divide_by_zero() {
        let mvp = Mvp::for_extent(vk::Extent2D {
            width: 800,
            height: 0,
        });
        assert!(mvp.proj.is_finite());
    }
}

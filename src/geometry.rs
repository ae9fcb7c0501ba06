// Star geometry - the single static shape instanced once per particle
//
// Ten outer/inner corners around a center vertex, drawn as a fan of
// ten triangles through an index list.

use bytemuck::{Pod, Zeroable};

const INV_PHI_SQ: f32 = 0.381_966_02;
const SIN_36: f32 = 0.587_785_25;
const COS_36: f32 = 0.809_017;
const SIN_72: f32 = 0.951_056_5;
const COS_72: f32 = 0.309_017;

pub const STAR_VERTEX_COUNT: usize = 11;
pub const STAR_INDEX_COUNT: usize = 30;

/// Color of the center vertex, distinct from the tips
const CENTER_COLOR: [f32; 3] = [0.0, 0.1, 0.8];

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 2],
    pub color: [f32; 3],
}

pub struct Star {
    pub vertices: [Vertex; STAR_VERTEX_COUNT],
    pub indices: [u16; STAR_INDEX_COUNT],
}

impl Star {
    /// Build a star centered at `center` whose tips lie `size` away.
    pub fn new(center: [f32; 2], size: f32, color: [f32; 3]) -> Self {
        let [cx, cy] = center;
        let d = size;
        let s = INV_PHI_SQ * d; // inner pentagon distance

        let v = |x: f32, y: f32| Vertex {
            position: [x, y],
            color,
        };

        let vertices = [
            // Outer tips
            v(cx, cy - d),
            v(cx - d * SIN_72, cy - d * COS_72),
            v(cx - d * SIN_36, cy + d * COS_36),
            v(cx + d * SIN_36, cy + d * COS_36),
            v(cx + d * SIN_72, cy - d * COS_72),
            // Inner pentagon
            v(cx - s * SIN_36, cy - s * COS_36),
            v(cx - s * SIN_72, cy + s * COS_72),
            v(cx, cy + s),
            v(cx + s * SIN_72, cy + s * COS_72),
            v(cx + s * SIN_36, cy - s * COS_36),
            Vertex {
                position: [cx, cy],
                color: CENTER_COLOR,
            },
        ];

        #[rustfmt::skip]
        let indices = [
            10, 5, 0,
            10, 1, 5,
            10, 6, 1,
            10, 2, 6,
            10, 7, 2,
            10, 3, 7,
            10, 8, 3,
            10, 4, 8,
            10, 9, 4,
            10, 0, 9,
        ];

        Self { vertices, indices }
    }

    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn distance(v: &Vertex, center: [f32; 2]) -> f32 {
        let dx = v.position[0] - center[0];
        let dy = v.position[1] - center[1];
        (dx * dx + dy * dy).sqrt()
    }

    #[test]
    fn tips_and_inner_corners_lie_on_circles() {
        let center = [0.25, -0.5];
        let star = Star::new(center, 2.0, [1.0, 0.0, 0.0]);

        for tip in &star.vertices[0..5] {
            assert_relative_eq!(distance(tip, center), 2.0, epsilon = 1e-5);
        }
        for inner in &star.vertices[5..10] {
            assert_relative_eq!(distance(inner, center), 2.0 * INV_PHI_SQ, epsilon = 1e-5);
        }
        assert_eq!(star.vertices[10].position, center);
    }

    #[test]
    fn every_triangle_fans_from_center() {
        let star = Star::new([0.0, 0.0], 1.0, [1.0, 1.0, 1.0]);

        assert_eq!(star.index_count(), 30);
        for tri in star.indices.chunks(3) {
            assert_eq!(tri[0], 10);
            assert!(tri.iter().all(|&i| (i as usize) < STAR_VERTEX_COUNT));
        }
    }

    #[test]
    fn center_vertex_has_its_own_color() {
        let star = Star::new([0.0, 0.0], 1.0, [0.8, 0.1, 0.0]);
        assert_eq!(star.vertices[0].color, [0.8, 0.1, 0.0]);
        assert_eq!(star.vertices[10].color, CENTER_COLOR);
    }

    #[test]
    fn vertex_layout_is_tightly_packed() {
        assert_eq!(std::mem::size_of::<Vertex>(), 20);
    }
}

use std::ops::Range;

use bytemuck::Pod;
use bytemuck::Zeroable;

use crate::gpu::Format;
use crate::gpu::InputElement;
use crate::gpu::PrimitiveTopology;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3], // x, y, z
    pub color: [f32; 4],    // r, g, b, a
}

const fn vertex(position: [f32; 3], color: [f32; 4]) -> Vertex {
    Vertex { position, color }
}

const CYAN: [f32; 4] = [0.0, 1.0, 1.0, 1.0];
const RED: [f32; 4] = [1.0, 0.0, 0.0, 1.0];
const GREEN: [f32; 4] = [0.0, 1.0, 0.0, 1.0];
const BLUE: [f32; 4] = [0.0, 0.0, 1.0, 1.0];

/// Triangle first, then the X, Y and Z axes as origin/tip pairs.
pub const VERTICES: [Vertex; 9] = [
    vertex([0.0, 0.5, 0.0], CYAN),
    vertex([0.5, -0.5, 0.0], CYAN),
    vertex([-0.5, -0.5, 0.0], CYAN),
    vertex([0.0, 0.0, 0.0], RED),
    vertex([1.0, 0.0, 0.0], RED),
    vertex([0.0, 0.0, 0.0], GREEN),
    vertex([0.0, 1.0, 0.0], GREEN),
    vertex([0.0, 0.0, 0.0], BLUE),
    vertex([0.0, 0.0, 1.0], BLUE),
];

pub const CLEAR_COLOR: [f32; 4] = [0.6, 0.7, 0.8, 1.0];

/// Matches the `POSITION`/`COLOR` inputs of `vcolors_vertex.hlsl`.
pub const INPUT_LAYOUT: [InputElement; 2] = [
    InputElement {
        semantic_name: "POSITION",
        format: Format::R32G32B32Float,
        aligned_byte_offset: 0,
    },
    InputElement {
        semantic_name: "COLOR",
        format: Format::R32G32B32A32Float,
        aligned_byte_offset: 12, // after position (3 floats * 4 bytes)
    },
];

/// A contiguous slice of the shared vertex buffer drawn with one topology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrawRange {
    pub topology: PrimitiveTopology,
    pub vertices: Range<u32>,
}

impl DrawRange {
    pub fn vertex_count(&self) -> u32 {
        self.vertices.end - self.vertices.start
    }

    pub fn overlaps(&self, other: &DrawRange) -> bool {
        self.vertices.start < other.vertices.end && other.vertices.start < self.vertices.end
    }
}

pub const TRIANGLE: DrawRange = DrawRange {
    topology: PrimitiveTopology::TriangleList,
    vertices: 0..3,
};

pub const AXES: DrawRange = DrawRange {
    topology: PrimitiveTopology::LineList,
    vertices: 3..9,
};

/// Draws issued every frame, in order.
pub const DRAWS: [DrawRange; 2] = [TRIANGLE, AXES];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_matches_input_layout() {
        assert_eq!(std::mem::size_of::<Vertex>(), 28);
        let last = INPUT_LAYOUT[1];
        assert_eq!(
            (last.aligned_byte_offset + last.format.size_in_bytes()) as usize,
            std::mem::size_of::<Vertex>()
        );
    }

    #[test]
    fn draws_partition_the_vertex_buffer() {
        assert_eq!(VERTICES.len(), 9);
        assert!(!TRIANGLE.overlaps(&AXES));
        assert_eq!(TRIANGLE.vertices, 0..3);
        assert_eq!(AXES.vertices, 3..9);
        let covered: u32 = DRAWS.iter().map(DrawRange::vertex_count).sum();
        assert_eq!(covered as usize, VERTICES.len());
    }

    #[test]
    fn axes_are_line_pairs_from_the_origin() {
        for pair in VERTICES[AXES.vertices.start as usize..].chunks(2) {
            assert_eq!(pair[0].position, [0.0, 0.0, 0.0]);
            assert_eq!(pair[0].color, pair[1].color);
        }
    }

    #[test]
    fn overlapping_ranges_are_detected() {
        let a = DrawRange {
            topology: PrimitiveTopology::TriangleList,
            vertices: 0..4,
        };
        assert!(a.overlaps(&AXES));
    }
}

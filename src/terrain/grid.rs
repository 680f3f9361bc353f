use crate::bucket::array::TriangleIndexArray;
use crate::geometry::EXTENT;
use bytemuck::{Pod, Zeroable};

/// Added to x of skirt vertices so the shader can tell them apart
pub const SKIRT_OFFSET: i16 = 0x5FFF;

/// Grid vertex: position (x carries the skirt flag) and texture position
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct GridVertex {
    pub a_pos: [i16; 2],
    pub a_texture_pos: [i16; 2],
}

/// Terrain mesh shared by every proxy tile
pub struct Grid {
    pub vertices: Vec<GridVertex>,
    pub indices: TriangleIndexArray,
    /// Number of triangles of the inner grid; skirt triangles follow them
    pub skirt_indices_offset: usize,
}

/// Uniform grid of `count` x `count` vertices covering one tile, framed by a skirt
///
/// Each grid cell is two triangles. One extra row and column on every side form the
/// skirt that hides cracks between neighbouring tiles of different DEM resolution.
pub fn create_grid(count: usize) -> Grid {
    let size = count + 2;
    let step = EXTENT as f64 / (count - 1) as f64;
    let grid_bound = EXTENT as f64 + step / 2.0;

    let mut vertices = Vec::with_capacity(size * size);
    for j in 0..size {
        let y = (j as f64 - 1.0) * step;
        for i in 0..size {
            let x = (i as f64 - 1.0) * step;
            let skirt = x < 0.0 || x > grid_bound || y < 0.0 || y > grid_bound;
            let xi = x.round().clamp(0.0, EXTENT as f64) as i16;
            let yi = y.round().clamp(0.0, EXTENT as f64) as i16;
            let offset = if skirt { SKIRT_OFFSET } else { 0 };
            vertices.push(GridVertex {
                a_pos: [xi + offset, yi],
                a_texture_pos: [xi, yi],
            });
        }
    }

    let mut indices = TriangleIndexArray::with_capacity((size - 1) * (size - 1) * 2);
    let mut quad = |i: usize, j: usize| {
        let index = (j * size + i) as u16;
        let row = size as u16;
        indices.push([index + 1, index, index + row]);
        indices.push([index + row, index + row + 1, index + 1]);
    };
    for j in 1..size - 2 {
        for i in 1..size - 2 {
            quad(i, j);
        }
    }
    for j in [0, size - 2] {
        for i in 0..size - 1 {
            quad(i, j);
            quad(j, i);
        }
    }

    Grid {
        vertices,
        indices,
        skirt_indices_offset: (size - 3) * (size - 3) * 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_dimensions() {
        let grid = create_grid(129);
        assert_eq!(grid.vertices.len(), 131 * 131);
        assert_eq!(grid.skirt_indices_offset, 128 * 128 * 2);
        assert_eq!(grid.indices.len(), grid.skirt_indices_offset + 8 * 130);
    }

    #[test]
    fn test_skirt_vertices() {
        let grid = create_grid(3);
        let size = 5;
        // Corner of the skirt clamps to the tile corner
        assert_eq!(grid.vertices[0].a_pos, [SKIRT_OFFSET, 0]);
        assert_eq!(grid.vertices[0].a_texture_pos, [0, 0]);
        // First inner vertex sits at the origin
        assert_eq!(grid.vertices[size + 1].a_pos, [0, 0]);
        assert_eq!(grid.vertices[size + 2].a_pos, [2048, 0]);
        let last = grid.vertices[size * size - 1];
        assert_eq!(last.a_pos, [EXTENT as i16 + SKIRT_OFFSET, EXTENT as i16]);
        assert_eq!(last.a_texture_pos, [EXTENT as i16, EXTENT as i16]);
    }

    #[test]
    fn test_inner_grid_indices_come_first() {
        let grid = create_grid(3);
        // Inner grid is 2x2 quads starting at vertex (1, 1)
        assert_eq!(grid.skirt_indices_offset, 8);
        assert_eq!(grid.indices[0], [7, 6, 11]);
        assert_eq!(grid.indices[1], [11, 12, 7]);
        let max = grid.indices.iter().flatten().copied().max().unwrap();
        assert_eq!(max as usize, grid.vertices.len() - 1);
    }
}

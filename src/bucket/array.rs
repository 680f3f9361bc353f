use bytemuck::{Pod, Zeroable};
use std::ops::{Index, IndexMut};

/// Max vertices addressable by one segment with 16-bit indices
pub const MAX_VERTEX_ARRAY_LENGTH: usize = u16::MAX as usize;

/// Packed wall/roof vertex: position+top, position+normal-up, normal ratio+sign, edge distance
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct FillExtrusionVertex {
    pub a_pos_normal_ed: [i16; 4],
}

/// Per-vertex encoded centroid, parallel to the layout array
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct CentroidVertex {
    pub a_centroid_pos: [u16; 2],
}

/// Globe extension: projected position and up vector (scaled by 2^14)
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct FillExtrusionExtVertex {
    pub a_pos_3: [f32; 3],
    pub a_pos_normal_3: [i16; 3],
    pub _pad: i16,
}

/// Ground effect vertex: start point, end point with start/bottom bits, angular offset
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct GroundVertex {
    pub a_pos_end: [i16; 4],
    pub a_angular_offset_factor: i16,
}

/// Glyph/icon quad corner
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct SymbolVertex {
    pub a_pos_offset: [i16; 4],
    pub a_data: [u16; 4],
}

/// Per-frame projected glyph position
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct SymbolDynamicVertex {
    pub a_projected_pos: [f32; 3],
}

pub type TriangleIndexArray = Vec<[u16; 3]>;

/// Contiguous vertex/index range drawn with one base vertex
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Segment {
    pub vertex_offset: usize,
    pub primitive_offset: usize,
    pub vertex_length: usize,
    pub primitive_length: usize,
}

/// Splits geometry into ranges that stay addressable by 16-bit indices
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SegmentVector {
    pub segments: Vec<Segment>,
}

impl SegmentVector {
    pub fn new() -> SegmentVector {
        SegmentVector::default()
    }

    /// Return the index of a segment able to hold `num_vertices` more vertices
    ///
    /// # Arguments
    /// * `num_vertices` - Upper bound of vertices about to be added
    /// * `vertex_len` - Current length of the layout vertex array
    /// * `primitive_len` - Current length of the index array (in triangles)
    pub fn prepare_segment(&mut self, num_vertices: usize, vertex_len: usize, primitive_len: usize) -> usize {
        if num_vertices > MAX_VERTEX_ARRAY_LENGTH {
            log::warn!(
                "Max vertices per segment is {}: bucket requested {}",
                MAX_VERTEX_ARRAY_LENGTH,
                num_vertices
            );
        }
        let fits = self
            .segments
            .last()
            .map_or(false, |s| s.vertex_length + num_vertices <= MAX_VERTEX_ARRAY_LENGTH);
        if !fits {
            self.segments.push(Segment {
                vertex_offset: vertex_len,
                primitive_offset: primitive_len,
                vertex_length: 0,
                primitive_length: 0,
            });
        }
        self.segments.len() - 1
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Segment> {
        self.segments.iter()
    }
}

impl Index<usize> for SegmentVector {
    type Output = Segment;

    fn index(&self, index: usize) -> &Segment {
        &self.segments[index]
    }
}

impl IndexMut<usize> for SegmentVector {
    fn index_mut(&mut self, index: usize) -> &mut Segment {
        &mut self.segments[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_sizes() {
        assert_eq!(std::mem::size_of::<FillExtrusionVertex>(), 8);
        assert_eq!(std::mem::size_of::<FillExtrusionExtVertex>(), 20);
        assert_eq!(std::mem::size_of::<GroundVertex>(), 10);
        assert_eq!(std::mem::size_of::<SymbolVertex>(), 16);
    }

    #[test]
    fn test_segment_reuse_and_split() {
        let mut segments = SegmentVector::new();
        let first = segments.prepare_segment(100, 0, 0);
        segments[first].vertex_length += 100;
        assert_eq!(segments.prepare_segment(100, 100, 50), first);

        segments[first].vertex_length = MAX_VERTEX_ARRAY_LENGTH - 10;
        let second = segments.prepare_segment(20, 70000, 900);
        assert_eq!(second, 1);
        assert_eq!(segments[second].vertex_offset, 70000);
        assert_eq!(segments[second].primitive_offset, 900);
    }
}

use crate::bucket::array::{GroundVertex, SegmentVector, TriangleIndexArray};
use crate::bucket::centroid::PartData;
use crate::bucket::program_configuration::{PaintAttribute, ProgramConfiguration};
use crate::config::{Properties, StyleLayer};
use crate::error::Result;
use crate::renderer::buffer::BufferCache;
use crate::renderer::context::RenderContext;
use glam::IVec2;

pub const GROUND_PAINT_ATTRIBUTES: &[PaintAttribute] = &[
    PaintAttribute { property: "fill-extrusion-flood-light-ground-radius", components: 1 },
];

/// Both points beyond the same bound
pub fn is_edge_outside_bounds(p1: IVec2, p2: IVec2, bounds: &[IVec2; 2]) -> bool {
    (p1.x < bounds[0].x && p2.x < bounds[0].x)
        || (p1.x > bounds[1].x && p2.x > bounds[1].x)
        || (p1.y < bounds[0].y && p2.y < bounds[0].y)
        || (p1.y > bounds[1].y && p2.y > bounds[1].y)
}

pub fn point_outside_bounds(p: IVec2, bounds: &[IVec2; 2]) -> bool {
    p.x < bounds[0].x || p.x > bounds[1].x || p.y < bounds[0].y || p.y > bounds[1].y
}

fn ground_vertex(p: IVec2, q: IVec2, start: i32, bottom: i32, angle: f32) -> GroundVertex {
    GroundVertex {
        a_pos_end: [
            p.x as i16,
            p.y as i16,
            ((q.x << 1) + start) as i16,
            ((q.y << 1) + bottom) as i16,
        ],
        a_angular_offset_factor: angle.round() as i16,
    }
}

/// Flood light and ambient occlusion skirt around extrusion footprints
///
/// Kept in its own arrays so its paint properties and landmark visibility can be updated
/// without touching wall geometry.
#[derive(Clone, Debug, Default)]
pub struct GroundEffect {
    pub vertices: Vec<GroundVertex>,
    pub indices: TriangleIndexArray,
    pub segments: SegmentVector,
    /// 1 for vertices of parts hidden by a landmark, parallel to `vertices`
    pub hidden_by_landmark: Vec<u8>,
    pub needs_hidden_by_landmark_update: bool,
    pub program_configuration: ProgramConfiguration,
}

impl GroundEffect {
    pub fn new(layer: &dyn StyleLayer, zoom: f32) -> GroundEffect {
        GroundEffect {
            program_configuration: ProgramConfiguration::new(layer, GROUND_PAINT_ATTRIBUTES, zoom),
            ..Default::default()
        }
    }

    pub fn has_data(&self) -> bool {
        !self.vertices.is_empty()
    }

    /// Emit one quad per polyline edge (closing edge included)
    ///
    /// # Arguments
    /// * `polyline` - Footprint outline at ground level
    /// * `angular_offset_factors` - Corner factor per polyline point
    /// * `bounds` - Edges entirely outside are skipped
    pub fn add_data(&mut self, polyline: &[IVec2], angular_offset_factors: &[f32], bounds: &[IVec2; 2]) {
        let n = polyline.len();
        if n <= 2 || n != angular_offset_factors.len() {
            return;
        }
        let seg_idx = self
            .segments
            .prepare_segment(n * 4, self.vertices.len(), self.indices.len());

        for i in 0..n {
            let j = if i == n - 1 { 0 } else { i + 1 };
            let pa = polyline[i];
            let pb = polyline[j];
            let a0 = angular_offset_factors[i];
            let a1 = angular_offset_factors[j];

            if is_edge_outside_bounds(pa, pb, bounds)
                || (point_outside_bounds(pa, bounds) && point_outside_bounds(pb, bounds))
            {
                continue;
            }

            let segment = &mut self.segments[seg_idx];
            let idx = segment.vertex_length as u16;

            self.vertices.push(ground_vertex(pa, pb, 1, 1, a0));
            self.vertices.push(ground_vertex(pa, pb, 1, 0, a0));
            self.vertices.push(ground_vertex(pa, pb, 0, 1, a1));
            self.vertices.push(ground_vertex(pa, pb, 0, 0, a1));
            segment.vertex_length += 4;

            self.indices.push([idx, idx + 1, idx + 3]);
            self.indices.push([idx, idx + 3, idx + 2]);
            segment.primitive_length += 2;
        }
    }

    pub fn add_paint_properties_data(&mut self, layer: &dyn StyleLayer, properties: &Properties, zoom: f32) {
        if !self.has_data() {
            return;
        }
        self.program_configuration
            .populate_paint_arrays(layer, self.vertices.len(), properties, zoom);
    }

    /// Copy the part's replacement flag into its ground vertices
    pub fn update_hidden_by_landmark(&mut self, data: &PartData) {
        if !self.has_data() || data.ground_vertex_count == 0 {
            return;
        }
        let start = data.ground_vertex_array_offset;
        let end = (start + data.ground_vertex_count).min(self.hidden_by_landmark.len());
        let hide = u8::from(data.is_hidden_by_replacement());
        for value in &mut self.hidden_by_landmark[start..end] {
            *value = hide;
        }
        self.needs_hidden_by_landmark_update = true;
    }

    pub fn upload<C: RenderContext>(&mut self, ctx: &C, cache: &mut BufferCache<C::Buffer>) -> Result<()> {
        if !self.has_data() {
            return Ok(());
        }
        if cache.ground_vertex_buffer.is_none() {
            cache.ground_vertex_buffer =
                Some(ctx.create_vertex_buffer(bytemuck::cast_slice(&self.vertices), false)?);
            cache.ground_index_buffer =
                Some(ctx.create_index_buffer(bytemuck::cast_slice(&self.indices))?);
        }
        if self.program_configuration.needs_upload {
            cache.upload_paint_arrays(ctx, "ground", &self.program_configuration)?;
            self.program_configuration.needs_upload = false;
        }
        Ok(())
    }

    pub fn upload_hidden_by_landmark<C: RenderContext>(
        &mut self,
        ctx: &C,
        cache: &mut BufferCache<C::Buffer>,
    ) -> Result<()> {
        if !self.has_data() || !self.needs_hidden_by_landmark_update {
            return Ok(());
        }
        match &cache.hidden_by_landmark_buffer {
            Some(buffer) => ctx.update_vertex_buffer(buffer, &self.hidden_by_landmark),
            None if !self.hidden_by_landmark.is_empty() => {
                cache.hidden_by_landmark_buffer =
                    Some(ctx.create_vertex_buffer(&self.hidden_by_landmark, true)?);
            }
            None => {}
        }
        self.needs_hidden_by_landmark_update = false;
        Ok(())
    }
}

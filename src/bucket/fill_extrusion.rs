use crate::bucket::array::{
    CentroidVertex, FillExtrusionExtVertex, FillExtrusionVertex, SegmentVector, TriangleIndexArray,
};
use crate::bucket::centroid::{
    encode_centroid, BorderCentroidData, FootprintSegment, PartData, BORDER_BOTTOM, BORDER_LEFT,
    BORDER_RIGHT, BORDER_TOP, HIDDEN_BY_REPLACEMENT, HIDDEN_CENTROID,
};
use crate::bucket::ground_effect::{is_edge_outside_bounds, GroundEffect};
use crate::bucket::program_configuration::{PaintAttribute, ProgramConfiguration};
use crate::bucket::replacement::{footprint_triangles_intersect, transform_point, ReplacementRegion, ReplacementSource};
use crate::bucket::{Bucket, BucketFeature, FeatureKind, PopulateParameters};
use crate::config::{FillExtrusionLayout, StyleLayer};
use crate::error::{Error, Result};
use crate::geometry::classify::{classify_rings, retain_inside_tile};
use crate::geometry::{perp_unit, subdivide_polygons, ClippedPolygon, Polygon, EXTENT};
use crate::projection::Projection;
use crate::renderer::buffer::BufferCache;
use crate::renderer::context::RenderContext;
use crate::tile_id::{
    lat_from_mercator_y, lng_from_mercator_x, mercator_y_from_lat, tile_to_meter, CanonicalTileId, OverscaledTileId,
};
use glam::{IVec2, Vec2, Vec3};
use std::f32::consts::PI;

pub const FILL_EXTRUSION_PAINT_ATTRIBUTES: &[PaintAttribute] = &[
    PaintAttribute { property: "fill-extrusion-color", components: 4 },
    PaintAttribute { property: "fill-extrusion-height", components: 1 },
    PaintAttribute { property: "fill-extrusion-base", components: 1 },
];

const EARCUT_MAX_RINGS: usize = 500;
const FACTOR: f32 = 8192.0;
const TANGENT_CUTOFF: f32 = 4.0;
/// Edge distance restarts from zero before exceeding this value
const EDGE_DISTANCE_WRAP: f32 = 32768.0;

fn layout_vertex(x: f32, y: f32, nx_ratio: f32, ny_sign: i32, normal_up: i32, top: i32, e: i32) -> FillExtrusionVertex {
    FillExtrusionVertex {
        a_pos_normal_ed: [
            ((x as i32) * 2 + top) as i16,
            ((y as i32) * 2 + normal_up) as i16,
            (((nx_ratio * FACTOR).floor() as i32) * 2 + ny_sign) as i16,
            e as i16,
        ],
    }
}

fn ext_vertex(pos: Vec3, normal: Vec3) -> FillExtrusionExtVertex {
    let n = normal * (1 << 14) as f32;
    FillExtrusionExtVertex {
        a_pos_3: pos.to_array(),
        a_pos_normal_3: [n.x as i16, n.y as i16, n.z as i16],
        _pad: 0,
    }
}

fn cos_half_angle(na: Vec2, nb: Vec2) -> f32 {
    let nm = (na + nb).normalize_or_zero();
    na.dot(nm)
}

fn rounded_edge_offset_with_cos(p0: IVec2, p1: IVec2, p2: IVec2, cos_half: f32, edge_radius: f32) -> f32 {
    let sin_half = (1.0 - cos_half * cos_half).sqrt();
    let d01 = p0.as_vec2().distance(p1.as_vec2());
    let d12 = p1.as_vec2().distance(p2.as_vec2());
    (d01 / 3.0).min(d12 / 3.0).min(edge_radius * sin_half / cos_half)
}

fn rounded_edge_offset(p0: IVec2, p1: IVec2, p2: IVec2, edge_radius: f32) -> f32 {
    let na = perp_unit(p0.as_vec2(), p1.as_vec2());
    let nb = perp_unit(p1.as_vec2(), p2.as_vec2());
    rounded_edge_offset_with_cos(p0, p1, p2, cos_half_angle(na, nb), edge_radius)
}

fn concavity(a: Vec2, b: Vec2) -> f32 {
    if a.perp_dot(b) < 0.0 {
        -1.0
    } else {
        1.0
    }
}

fn tan_angle_clamped(angle: f32) -> f32 {
    angle.tan().clamp(-TANGENT_CUTOFF, TANGENT_CUTOFF) / TANGENT_CUTOFF * FACTOR
}

fn angular_offset_factor(a: Vec2, b: Vec2, angle: f32) -> f32 {
    tan_angle_clamped(angle) * concavity(a, b)
}

/// Concave corner at `p1` between edges to `p2` and `p3`, ignoring angles above 150 degrees
fn is_ao_concave_angle(p2: IVec2, p1: IVec2, p3: IVec2) -> bool {
    let outside = |p: IVec2| p.x < 0 || p.x >= EXTENT;
    if outside(p2) || outside(p1) || outside(p3) {
        return false;
    }
    let a = (p3 - p1).as_vec2();
    let an = a.perp();
    let b = (p2 - p1).as_vec2();
    let cos_ab = a.dot(b) / (a.length_squared() * b.length_squared()).sqrt();
    cos_ab > -0.866 && an.dot(b) < 0.0
}

/// Concavity in bit 1, edge start in bit 0
///
/// Saturates at `i16::MAX` so a single edge longer than the wrap limit still packs.
fn encode_ao_to_edge_distance(edge_distance: f32, concave: bool, edge_start: bool) -> i32 {
    let ed = (edge_distance as i32).clamp(0, i16::MAX as i32);
    let ed = if concave { ed | 2 } else { ed & !2 };
    if edge_start {
        ed | 1
    } else {
        ed & !1
    }
}

/// Earcut indices of a polygon's roof, built from ring points after the first
fn triangulate_roof(polygon: &Polygon) -> Result<Vec<usize>> {
    let mut flattened = Vec::new();
    let mut hole_indices = Vec::new();
    for (r, ring) in polygon.iter().enumerate() {
        if r != 0 && !ring.is_empty() {
            hole_indices.push(flattened.len() / 2);
        }
        for p in ring.iter().skip(1) {
            flattened.push(p.x as f64);
            flattened.push(p.y as f64);
        }
    }
    earcutr::earcut(&flattened, &hole_indices, 2).map_err(|e| Error::Triangulation(format!("{:?}", e)))
}

/// Split polygons along a grid fine enough to follow the globe's curvature
pub fn resample_polygons_for_globe(polygons: &[Polygon], tile_bounds: [IVec2; 2], id: &CanonicalTileId) -> Vec<ClippedPolygon> {
    let cell_count = 360.0 / 32.0;
    let tiles = id.tiles();
    let left_lng = lng_from_mercator_x(id.x as f64 / tiles);
    let right_lng = lng_from_mercator_x((id.x + 1) as f64 / tiles);
    let top_lat = lat_from_mercator_y(id.y as f64 / tiles);
    let bottom_lat = lat_from_mercator_y((id.y + 1) as f64 / tiles);
    let cells_x = ((right_lng - left_lng) / cell_count).ceil() as u32;
    let cells_y = ((top_lat - bottom_lat) / cell_count).ceil() as u32;
    let y = id.y as f64;
    let extent = EXTENT as f64;

    let split_fn = |axis: usize, min: f64, max: f64| -> f64 {
        if axis == 0 {
            0.5 * (min + max)
        } else {
            let max_lat = lat_from_mercator_y((y + min / extent) / tiles);
            let min_lat = lat_from_mercator_y((y + max / extent) / tiles);
            let mid_lat = 0.5 * (min_lat + max_lat);
            (mercator_y_from_lat(mid_lat) * tiles - y) * extent
        }
    };

    subdivide_polygons(polygons, tile_bounds, cells_x, cells_y, 1.0, split_fn)
}

/// Walls, roofs and ground effect of one fill-extrusion layer in one tile
pub struct FillExtrusionBucket {
    pub layer_id: String,
    pub zoom: f32,
    pub canonical: CanonicalTileId,
    pub projection: Projection,
    /// Rounded corner radius in tile units
    pub edge_radius: f32,
    pub tile_to_meter: f64,

    pub vertices: Vec<FillExtrusionVertex>,
    pub centroid_vertices: Vec<CentroidVertex>,
    pub ext_vertices: Option<Vec<FillExtrusionExtVertex>>,
    pub indices: TriangleIndexArray,
    pub segments: SegmentVector,

    pub footprint_segments: Vec<FootprintSegment>,
    pub footprint_vertices: Vec<IVec2>,
    pub footprint_indices: Vec<[u32; 3]>,

    pub centroid_data: Vec<PartData>,
    pub features_on_border: Vec<BorderCentroidData>,
    /// Indices into `features_on_border`, per side, sorted by range start
    pub border_feature_indices: [Vec<usize>; 4],
    pub border_done_with_neighbor_z: [Option<u8>; 4],
    pub needs_centroid_update: bool,

    pub active_replacements: Vec<ReplacementRegion>,
    pub replacement_update_time: Option<u64>,

    pub ground_effect: GroundEffect,
    pub program_configuration: ProgramConfiguration,
    uploaded: bool,
}

impl FillExtrusionBucket {
    pub fn new(layer: &dyn StyleLayer, params: &PopulateParameters) -> FillExtrusionBucket {
        FillExtrusionBucket {
            layer_id: layer.id().to_string(),
            zoom: params.zoom,
            canonical: params.canonical,
            projection: params.projection,
            edge_radius: 0.0,
            tile_to_meter: tile_to_meter(&params.canonical),
            vertices: Vec::new(),
            centroid_vertices: Vec::new(),
            ext_vertices: None,
            indices: Vec::new(),
            segments: SegmentVector::new(),
            footprint_segments: Vec::new(),
            footprint_vertices: Vec::new(),
            footprint_indices: Vec::new(),
            centroid_data: Vec::new(),
            features_on_border: Vec::new(),
            border_feature_indices: Default::default(),
            border_done_with_neighbor_z: [None; 4],
            needs_centroid_update: false,
            active_replacements: Vec::new(),
            replacement_update_time: None,
            ground_effect: GroundEffect::new(layer, params.zoom),
            program_configuration: ProgramConfiguration::new(layer, FILL_EXTRUSION_PAINT_ATTRIBUTES, params.zoom),
            uploaded: false,
        }
    }

    /// Tessellate one feature
    ///
    /// Roofs are triangulated before anything is appended, so a failing feature leaves
    /// the bucket untouched.
    pub fn add_feature(&mut self, feature: &BucketFeature, layer: &dyn StyleLayer) -> Result<()> {
        let tile_bounds = [IVec2::ZERO, IVec2::splat(EXTENT)];
        let is_globe = self.projection.is_globe();
        let is_polygon = feature.kind == FeatureKind::Polygon;
        let projection = self.projection;
        let canonical = self.canonical;

        let classified = classify_rings(&feature.geometry, EARCUT_MAX_RINGS);
        if classified.truncated {
            log::warn!(
                "Feature {:?} in layer {} exceeds {} rings, extra holes dropped",
                feature.id,
                self.layer_id,
                EARCUT_MAX_RINGS
            );
        }
        let mut polygons = classified.polygons;
        retain_inside_tile(&mut polygons);

        let mut clipped: Vec<ClippedPolygon> = if is_globe {
            resample_polygons_for_globe(&polygons, tile_bounds, &canonical)
        } else {
            polygons
                .into_iter()
                .map(|polygon| ClippedPolygon { polygon, bounds: tile_bounds })
                .collect()
        };

        for cp in clipped.iter_mut() {
            for ring in cp.polygon.iter_mut() {
                if is_polygon && ring.first() != ring.last() {
                    let first = ring[0];
                    ring.push(first);
                }
            }
            let min_len = if is_polygon { 4 } else { 2 };
            cp.polygon.retain(|ring| ring.len() >= min_len);
        }
        clipped.retain(|cp| !cp.polygon.is_empty());

        let roofs = if is_polygon {
            clipped
                .iter()
                .map(|cp| triangulate_roof(&cp.polygon))
                .collect::<Result<Vec<_>>>()?
        } else {
            Vec::new()
        };

        if is_globe && self.ext_vertices.is_none() {
            self.ext_vertices = Some(Vec::new());
        }

        let mut border = BorderCentroidData::new(self.centroid_data.len());
        let mut centroid = PartData {
            vertex_array_offset: self.vertices.len(),
            ground_vertex_array_offset: self.ground_effect.vertices.len(),
            ..Default::default()
        };

        let edge_radius = if is_polygon { self.edge_radius } else { 0.0 };
        let rounded = edge_radius > 0.0;

        for (poly_index, ClippedPolygon { polygon, bounds }) in clipped.iter().enumerate() {
            let num_vertices: usize = polygon
                .iter()
                .map(|ring| if is_polygon { ring.len() - 1 } else { ring.len() })
                .sum();
            let estimate = if is_polygon { 5 } else { 4 } * num_vertices;
            let seg = self
                .segments
                .prepare_segment(estimate, self.vertices.len(), self.indices.len());

            if centroid.footprint_seg_idx.is_none() {
                centroid.footprint_seg_idx = Some(self.footprint_segments.len());
            }
            let mut fp_segment = FootprintSegment {
                vertex_offset: self.footprint_vertices.len(),
                index_offset: self.footprint_indices.len(),
                ..Default::default()
            };

            let mut top_index = 0;
            if is_polygon {
                top_index = self.segments[seg].vertex_length;

                // Roof: inset vertices when rounding, triangulated on the unrounded ring
                for ring in polygon {
                    let len = ring.len();
                    let mut ground_polyline = Vec::new();
                    let mut angular_offset_factors = Vec::new();
                    let mut na = perp_unit(ring[0].as_vec2(), ring[1].as_vec2());

                    for i in 1..len {
                        let p1 = ring[i];
                        let p2 = ring[if i == len - 1 { 1 } else { i + 1 }];
                        let mut pos = p1.as_vec2();

                        let nb = perp_unit(p1.as_vec2(), p2.as_vec2());
                        let nm = (na + nb).normalize_or_zero();
                        let cos_half = na.dot(nm);

                        if rounded {
                            pos += nm * edge_radius * (1.0 / cos_half).min(4.0);
                        } else {
                            ground_polyline.push(p1);
                            angular_offset_factors.push(angular_offset_factor(na, nb, cos_half.acos()));
                        }

                        self.vertices.push(layout_vertex(pos.x, pos.y, 0.0, 0, 1, 1, 0));
                        self.segments[seg].vertex_length += 1;
                        self.footprint_vertices.push(p1);

                        if let Some(ext) = self.ext_vertices.as_mut() {
                            ext.push(ext_vertex(
                                projection.project_tile_point(pos.x, pos.y, &canonical),
                                projection.up_vector(&canonical, pos.x, pos.y),
                            ));
                        }
                        na = nb;
                    }

                    if !rounded {
                        self.ground_effect
                            .add_data(&ground_polyline, &angular_offset_factors, bounds);
                    }
                }

                let roof = &roofs[poly_index];
                for tri in roof.chunks_exact(3) {
                    let base = fp_segment.vertex_offset as u32;
                    self.footprint_indices.push([
                        base + tri[0] as u32,
                        base + tri[1] as u32,
                        base + tri[2] as u32,
                    ]);
                    // Clockwise winding
                    self.indices.push([
                        (top_index + tri[0]) as u16,
                        (top_index + tri[2]) as u16,
                        (top_index + tri[1]) as u16,
                    ]);
                    self.segments[seg].primitive_length += 1;
                }
                fp_segment.index_count += roof.len() / 3;
                fp_segment.vertex_count += self.footprint_vertices.len() - fp_segment.vertex_offset;
            }

            // Walls
            for ring in polygon {
                let len = ring.len();
                border.start_ring(&mut centroid, ring[0]);
                let mut is_prev_corner_concave =
                    len > 4 && is_ao_concave_angle(ring[len - 2], ring[0], ring[1]);
                let mut offset_prev = if rounded {
                    rounded_edge_offset(ring[len - 2], ring[0], ring[1], edge_radius)
                } else {
                    0.0
                };
                let mut prev_angular_offset_factor = tan_angle_clamped(PI / 4.0);
                let mut ground_polyline = Vec::new();
                let mut angular_offset_factors = Vec::new();
                let mut k_first: Option<usize> = None;

                let mut na = perp_unit(ring[0].as_vec2(), ring[1].as_vec2());
                let mut cap = true;
                let mut edge_distance = 0.0f32;

                for i in 1..len {
                    let mut p0 = ring[i - 1];
                    let mut p1 = ring[i];
                    let p2 = ring[if i == len - 1 { 1 } else { i + 1 }];

                    border.append_edge(&mut centroid, p1, p0);

                    if is_edge_outside_bounds(p1, p0, bounds) {
                        if rounded {
                            na = perp_unit(p1.as_vec2(), p2.as_vec2());
                            cap = !cap;
                        }
                        continue;
                    }

                    // Normal has no z: nx / (|nx| + |ny|) and the sign of ny reconstruct it
                    let d = (p1 - p0).as_vec2().perp();
                    let nx_ratio = d.x / (d.x.abs() + d.y.abs());
                    let ny_sign = i32::from(d.y > 0.0);

                    let dist = p0.as_vec2().distance(p1.as_vec2());
                    if edge_distance + dist >= EDGE_DISTANCE_WRAP {
                        edge_distance = 0.0;
                    }

                    if rounded {
                        let nb = perp_unit(p1.as_vec2(), p2.as_vec2());
                        let cos_half = cos_half_angle(na, nb);
                        let mut offset_next = rounded_edge_offset_with_cos(p0, p1, p2, cos_half, edge_radius);
                        if offset_next.is_nan() {
                            offset_next = 0.0;
                        }
                        let n_edge = (p1 - p0).as_vec2().normalize_or_zero();
                        let m_edge = (p2 - p1).as_vec2().normalize_or_zero();

                        p0 = (p0.as_vec2() + n_edge * offset_prev).round().as_ivec2();
                        p1 = (p1.as_vec2() - n_edge * offset_next).round().as_ivec2();
                        offset_prev = offset_next;

                        let pa = (ring[i].as_vec2() + m_edge * offset_next).round().as_ivec2();
                        let pap1 = perp_unit(p1.as_vec2(), pa.as_vec2());
                        let current_factor =
                            angular_offset_factor(na, pap1, cos_half_angle(na, pap1).acos());

                        ground_polyline.push(p0);
                        angular_offset_factors.push(prev_angular_offset_factor);
                        ground_polyline.push(p1);
                        angular_offset_factors.push(current_factor);

                        prev_angular_offset_factor =
                            angular_offset_factor(pap1, nb, cos_half_angle(nb, pap1).acos());
                        na = nb;
                    }

                    let k = self.segments[seg].vertex_length;
                    let is_concave_corner = len > 4 && is_ao_concave_angle(p0, p1, p2);

                    let e = encode_ao_to_edge_distance(edge_distance, is_prev_corner_concave, cap);
                    let (x0, y0) = (p0.x as f32, p0.y as f32);
                    self.vertices.push(layout_vertex(x0, y0, nx_ratio, ny_sign, 0, 0, e));
                    self.vertices.push(layout_vertex(x0, y0, nx_ratio, ny_sign, 0, 1, e));

                    edge_distance += dist;
                    let e = encode_ao_to_edge_distance(edge_distance, is_concave_corner, !cap);
                    is_prev_corner_concave = is_concave_corner;

                    let (x1, y1) = (p1.x as f32, p1.y as f32);
                    self.vertices.push(layout_vertex(x1, y1, nx_ratio, ny_sign, 0, 0, e));
                    self.vertices.push(layout_vertex(x1, y1, nx_ratio, ny_sign, 0, 1, e));
                    self.segments[seg].vertex_length += 4;

                    // 1 3    0 -> 1 -> 2
                    // 0 2    1 -> 3 -> 2
                    let k16 = k as u16;
                    self.indices.push([k16, k16 + 1, k16 + 2]);
                    self.indices.push([k16 + 1, k16 + 3, k16 + 2]);
                    self.segments[seg].primitive_length += 2;

                    if rounded {
                        // Roof vertices start at ring index 1
                        let t0 = top_index + if i == 1 { len - 2 } else { i - 2 };
                        let t1 = if i == 1 { top_index } else { t0 + 1 };
                        let (t0, t1) = (t0 as u16, t1 as u16);

                        // Chamfer between wall top and roof
                        self.indices.push([k16 + 1, t0, k16 + 3]);
                        self.indices.push([t0, t1, k16 + 3]);
                        self.segments[seg].primitive_length += 2;

                        let first = *k_first.get_or_insert(k);

                        // Corner gap, only when both edges are inside bounds
                        if !is_edge_outside_bounds(p2, ring[i], bounds) {
                            let l = if i == len - 1 { first } else { self.segments[seg].vertex_length } as u16;
                            self.indices.push([k16 + 2, k16 + 3, l]);
                            self.indices.push([k16 + 3, l + 1, l]);
                            self.indices.push([k16 + 3, t1, l + 1]);
                            self.segments[seg].primitive_length += 3;
                        }
                        cap = !cap;
                    }

                    if let Some(ext) = self.ext_vertices.as_mut() {
                        let q0 = projection.project_tile_point(x0, y0, &canonical);
                        let q1 = projection.project_tile_point(x1, y1, &canonical);
                        let n0 = projection.up_vector(&canonical, x0, y0);
                        let n1 = projection.up_vector(&canonical, x1, y1);
                        ext.push(ext_vertex(q0, n0));
                        ext.push(ext_vertex(q0, n0));
                        ext.push(ext_vertex(q1, n1));
                        ext.push(ext_vertex(q1, n1));
                    }
                }

                if is_polygon {
                    top_index += len - 1;
                }
                if rounded {
                    self.ground_effect
                        .add_data(&ground_polyline, &angular_offset_factors, bounds);
                }
            }

            self.footprint_segments.push(fp_segment);
            centroid.footprint_seg_len += 1;
        }

        centroid.vertex_count = self.vertices.len() - centroid.vertex_array_offset;
        centroid.ground_vertex_count =
            self.ground_effect.vertices.len() - centroid.ground_vertex_array_offset;
        if centroid.vertex_count == 0 {
            return Ok(());
        }

        // Parts on a border stay hidden until the neighbor tile is stitched
        centroid.centroid = if border.borders.is_some() {
            HIDDEN_CENTROID
        } else {
            encode_centroid(border.centroid(), centroid.span(), self.tile_to_meter)
        };
        self.centroid_data.push(centroid);

        if border.borders.is_some() {
            let border_index = self.features_on_border.len();
            for side in 0..4 {
                if border.border(side).is_some() {
                    self.border_feature_indices[side].push(border_index);
                }
            }
            self.features_on_border.push(border);
        }

        self.program_configuration
            .populate_paint_arrays(layer, self.vertices.len(), &feature.properties, self.zoom);
        self.ground_effect
            .add_paint_properties_data(layer, &feature.properties, self.zoom);
        Ok(())
    }

    pub fn sort_borders(&mut self) {
        let features = &self.features_on_border;
        for (side, indices) in self.border_feature_indices.iter_mut().enumerate() {
            indices.sort_by(|&a, &b| {
                let ra = features[a].border(side).map_or(f32::MAX, |r| r[0]);
                let rb = features[b].border(side).map_or(f32::MAX, |r| r[0]);
                ra.total_cmp(&rb)
            });
        }
    }

    /// Allocate the per-vertex centroid and landmark arrays and fill them from part data
    pub fn create_centroids_buffer(&mut self) {
        self.centroid_vertices = vec![CentroidVertex::default(); self.vertices.len()];
        self.ground_effect.hidden_by_landmark = vec![0; self.ground_effect.vertices.len()];
        for i in 0..self.centroid_data.len() {
            self.write_centroid_to_buffer(i);
        }
    }

    /// Write one part's centroid into every vertex of its range
    pub fn write_centroid_to_buffer(&mut self, part_index: usize) {
        let Some(data) = self.centroid_data.get(part_index) else {
            return;
        };
        self.ground_effect.update_hidden_by_landmark(data);

        let start = data.vertex_array_offset;
        let end = (start + data.vertex_count).min(self.centroid_vertices.len());
        if start >= end {
            return;
        }
        let c = if data.is_hidden_by_replacement() {
            HIDDEN_CENTROID
        } else {
            data.centroid
        };
        // Every vertex of the range holds the same value
        if self.centroid_vertices[start].a_centroid_pos == c {
            return;
        }
        for vertex in &mut self.centroid_vertices[start..end] {
            vertex.a_centroid_pos = c;
        }
        self.needs_centroid_update = true;
    }

    /// Reveal a border feature using its own accumulated centroid
    pub fn show_centroid(&mut self, border_index: usize) {
        let Some(border) = self.features_on_border.get(border_index) else {
            return;
        };
        let part_index = border.centroid_data_index;
        let own = border.centroid();
        let part = &mut self.centroid_data[part_index];
        part.flags &= HIDDEN_BY_REPLACEMENT;
        part.centroid = encode_centroid(own, part.span(), self.tile_to_meter);
        self.write_centroid_to_buffer(part_index);
    }

    /// Reveal every feature on `side` when no neighbor tile exists there
    pub fn finish_border(&mut self, side: usize) {
        for border_index in self.border_feature_indices[side].clone() {
            self.show_centroid(border_index);
        }
    }

    /// Join parts of buildings split between this tile and `neighbor` across `side`
    ///
    /// Both buckets are updated. Overlapping border ranges are taken as the same building:
    /// the joined centroid is the count weighted mean of both accumulators and the span is
    /// the union of both bounds. Features touching more than one border, or without a
    /// counterpart, fall back to their own centroid.
    pub fn stitch_border(&mut self, side: usize, neighbor: &mut FillExtrusionBucket) {
        let opposite = side ^ 1;
        if self.border_done_with_neighbor_z[side] == Some(neighbor.canonical.z)
            && neighbor.border_done_with_neighbor_z[opposite] == Some(self.canonical.z)
        {
            return;
        }
        if self.centroid_vertices.len() != self.vertices.len() {
            self.create_centroids_buffer();
        }
        if neighbor.centroid_vertices.len() != neighbor.vertices.len() {
            neighbor.create_centroids_buffer();
        }

        let shift = match side {
            BORDER_LEFT => IVec2::new(-EXTENT, 0),
            BORDER_RIGHT => IVec2::new(EXTENT, 0),
            BORDER_TOP => IVec2::new(0, -EXTENT),
            _ => IVec2::new(0, EXTENT),
        };

        let ours = self.border_feature_indices[side].clone();
        let theirs = neighbor.border_feature_indices[opposite].clone();
        let mut matched_ours = vec![false; ours.len()];
        let mut matched_theirs = vec![false; theirs.len()];

        if self.canonical.z == neighbor.canonical.z {
            let (mut i, mut j) = (0, 0);
            while i < ours.len() && j < theirs.len() {
                let fa = &self.features_on_border[ours[i]];
                let fb = &neighbor.features_on_border[theirs[j]];
                let (Some(ra), Some(rb)) = (fa.border(side), fb.border(opposite)) else {
                    break;
                };
                if ra[1] < rb[0] {
                    i += 1;
                    continue;
                }
                if rb[1] < ra[0] {
                    j += 1;
                    continue;
                }
                if fa.intersects_count() == 1 && fb.intersects_count() == 1 {
                    let count = fa.acc_count + fb.acc_count;
                    let acc = fa.acc + fb.acc + shift.as_i64vec2() * fb.acc_count;
                    let joined = IVec2::new(acc.x.div_euclid(count) as i32, acc.y.div_euclid(count) as i32);

                    let pa_index = fa.centroid_data_index;
                    let pb_index = fb.centroid_data_index;
                    let (pa, pb) = (&self.centroid_data[pa_index], &neighbor.centroid_data[pb_index]);
                    let span = pa.max.max(pb.max + shift) - pa.min.min(pb.min + shift);

                    let part = &mut self.centroid_data[pa_index];
                    part.flags &= HIDDEN_BY_REPLACEMENT;
                    part.centroid = encode_centroid(joined, span, self.tile_to_meter);
                    self.write_centroid_to_buffer(pa_index);

                    let part = &mut neighbor.centroid_data[pb_index];
                    part.flags &= HIDDEN_BY_REPLACEMENT;
                    part.centroid = encode_centroid(joined - shift, span, neighbor.tile_to_meter);
                    neighbor.write_centroid_to_buffer(pb_index);

                    matched_ours[i] = true;
                    matched_theirs[j] = true;
                }
                i += 1;
                j += 1;
            }
        }

        for (k, &border_index) in ours.iter().enumerate() {
            if !matched_ours[k] {
                self.show_centroid(border_index);
            }
        }
        for (k, &border_index) in theirs.iter().enumerate() {
            if !matched_theirs[k] {
                neighbor.show_centroid(border_index);
            }
        }

        self.border_done_with_neighbor_z[side] = Some(neighbor.canonical.z);
        neighbor.border_done_with_neighbor_z[opposite] = Some(self.canonical.z);
    }

    /// Hide parts whose footprint overlaps a landmark footprint from `source`
    ///
    /// Geometry is untouched; hidden parts get the hidden centroid and their ground
    /// vertices are flagged.
    pub fn update_replacement(&mut self, coord: &OverscaledTileId, source: &dyn ReplacementSource) {
        if self.replacement_update_time == Some(source.update_time()) {
            return;
        }
        self.replacement_update_time = Some(source.update_time());

        let regions = source.regions_for_tile(coord);
        if regions == self.active_replacements {
            return;
        }
        self.active_replacements = regions;

        for part in &mut self.centroid_data {
            part.flags &= !HIDDEN_BY_REPLACEMENT;
        }

        let mut transformed = Vec::new();
        for region in &self.active_replacements {
            let footprint_id = region.footprint_tile_id.canonical;
            // Shrink by one footprint unit so adjacent outlines do not count as overlapping
            let padding = 2f32.powi(footprint_id.z as i32 - coord.canonical.z as i32);

            for part in &mut self.centroid_data {
                if part.is_hidden_by_replacement() {
                    continue;
                }
                if region.min.x > part.max.x as f32 || (part.min.x as f32) > region.max.x {
                    continue;
                }
                if region.min.y > part.max.y as f32 || (part.min.y as f32) > region.max.y {
                    continue;
                }
                let Some(first) = part.footprint_seg_idx else {
                    continue;
                };
                for seg in &self.footprint_segments[first..first + part.footprint_seg_len] {
                    transformed.clear();
                    transformed.extend(
                        self.footprint_vertices[seg.vertex_offset..seg.vertex_offset + seg.vertex_count]
                            .iter()
                            .map(|v| transform_point(v.as_vec2(), &coord.canonical, &footprint_id)),
                    );
                    let triangles = &self.footprint_indices[seg.index_offset..seg.index_offset + seg.index_count];
                    if footprint_triangles_intersect(&region.footprint, &transformed, triangles, seg.vertex_offset, -padding) {
                        part.flags |= HIDDEN_BY_REPLACEMENT;
                        break;
                    }
                }
            }
        }

        for i in 0..self.centroid_data.len() {
            self.write_centroid_to_buffer(i);
        }
        self.border_done_with_neighbor_z = [None; 4];
    }

    pub fn upload_centroid<C: RenderContext>(&mut self, ctx: &C, cache: &mut BufferCache<C::Buffer>) -> Result<()> {
        self.ground_effect.upload_hidden_by_landmark(ctx, cache)?;
        if !self.needs_centroid_update {
            return Ok(());
        }
        let bytes: &[u8] = bytemuck::cast_slice(&self.centroid_vertices);
        match &cache.centroid_vertex_buffer {
            Some(buffer) => ctx.update_vertex_buffer(buffer, bytes),
            None if !bytes.is_empty() => {
                cache.centroid_vertex_buffer = Some(ctx.create_vertex_buffer(bytes, true)?);
            }
            None => {}
        }
        self.needs_centroid_update = false;
        Ok(())
    }

    pub fn upload_pending(&self) -> bool {
        !self.uploaded
            || self.program_configuration.needs_upload
            || self.ground_effect.program_configuration.needs_upload
    }
}

impl Bucket for FillExtrusionBucket {
    fn populate(&mut self, features: &[BucketFeature], layer: &dyn StyleLayer, params: &PopulateParameters) -> Result<()> {
        self.tile_to_meter = tile_to_meter(&params.canonical);
        self.edge_radius = FillExtrusionLayout::evaluate(layer, params.zoom)?.edge_radius / self.tile_to_meter as f32;
        self.border_done_with_neighbor_z = [None; 4];

        for feature in features {
            if let Err(err) = self.add_feature(feature, layer) {
                log::warn!("Skipping feature {:?} in layer {}: {}", feature.id, self.layer_id, err);
            }
        }
        self.sort_borders();
        self.create_centroids_buffer();
        Ok(())
    }

    fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    fn upload<C: RenderContext>(&mut self, ctx: &C, cache: &mut BufferCache<C::Buffer>) -> Result<()> {
        if !self.uploaded {
            cache.layout_vertex_buffer = Some(ctx.create_vertex_buffer(bytemuck::cast_slice(&self.vertices), false)?);
            cache.index_buffer = Some(ctx.create_index_buffer(bytemuck::cast_slice(&self.indices))?);
            if let Some(ext) = &self.ext_vertices {
                cache.ext_vertex_buffer = Some(ctx.create_vertex_buffer(bytemuck::cast_slice(ext), true)?);
            }
        }
        self.ground_effect.upload(ctx, cache)?;
        if self.program_configuration.needs_upload {
            cache.upload_paint_arrays(ctx, "fill-extrusion", &self.program_configuration)?;
            self.program_configuration.needs_upload = false;
        }
        self.upload_centroid(ctx, cache)?;
        self.uploaded = true;
        Ok(())
    }

    fn destroy<C: RenderContext>(&mut self, ctx: &C, cache: &mut BufferCache<C::Buffer>) {
        cache.release(ctx);
        self.uploaded = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LayerConfig, Properties};
    use crate::renderer::context::mock::RecordingContext;
    use serde_json::json;

    fn layer(edge_radius: f32) -> LayerConfig {
        serde_json::from_value(json!({
            "id": "buildings",
            "type": "fill-extrusion",
            "layout": {"fill-extrusion-edge-radius": edge_radius},
            "paint": {"fill-extrusion-height": ["get", "height"]}
        }))
        .unwrap()
    }

    fn params(z: u8, x: u32, y: u32) -> PopulateParameters {
        PopulateParameters {
            canonical: CanonicalTileId::new(z, x, y),
            zoom: z as f32,
            overscaling: 1.0,
            projection: Projection::Mercator,
        }
    }

    fn polygon(points: &[(i32, i32)]) -> BucketFeature {
        let mut properties = Properties::new();
        properties.insert("height".to_string(), json!(20));
        BucketFeature {
            id: Some(1),
            index: 0,
            kind: FeatureKind::Polygon,
            geometry: vec![points.iter().map(|&(x, y)| IVec2::new(x, y)).collect()],
            properties,
        }
    }

    fn build(edge_radius: f32, features: &[BucketFeature], p: &PopulateParameters) -> FillExtrusionBucket {
        let l = layer(edge_radius);
        let mut bucket = FillExtrusionBucket::new(&l, p);
        bucket.populate(features, &l, p).unwrap();
        bucket
    }

    const SQUARE: &[(i32, i32)] = &[(10, 10), (110, 10), (110, 110), (10, 110)];

    #[test]
    fn test_square_triangle_count() {
        let bucket = build(0.0, &[polygon(SQUARE)], &params(16, 32768, 21800));
        // 2 roof triangles and 4 wall quads of 2 triangles each
        assert_eq!(bucket.indices.len(), 10);
        assert_eq!(bucket.vertices.len(), 4 + 16);
        assert_eq!(bucket.segments.len(), 1);
        assert_eq!(bucket.segments[0].primitive_length, 10);
        assert_eq!(bucket.centroid_vertices.len(), bucket.vertices.len());
        // Roof vertices carry top and normal-up bits
        assert_eq!(bucket.vertices[0].a_pos_normal_ed, [221, 21, 0, 0]);
        assert!(bucket.features_on_border.is_empty());
        assert_ne!(bucket.centroid_vertices[0].a_centroid_pos, HIDDEN_CENTROID);
    }

    #[test]
    fn test_tessellation_is_idempotent() {
        let features = [polygon(SQUARE), polygon(&[(200, 200), (400, 210), (380, 400), (190, 390)])];
        let p = params(16, 32768, 21800);
        let a = build(0.5, &features, &p);
        let b = build(0.5, &features, &p);
        assert_eq!(a.vertices, b.vertices);
        assert_eq!(a.indices, b.indices);
        assert_eq!(a.ground_effect.vertices, b.ground_effect.vertices);
    }

    #[test]
    fn test_rounded_edges_add_chamfers() {
        let p = params(16, 32768, 21800);
        let flat = build(0.0, &[polygon(SQUARE)], &p);
        let rounded = build(1.0, &[polygon(SQUARE)], &p);
        assert!(rounded.edge_radius > 0.0);
        // Each corner gets 2 top chamfer triangles and 3 corner triangles
        assert_eq!(rounded.indices.len(), flat.indices.len() + 4 * 5);
        // Ground effect follows the inset outline: one quad per polyline point
        assert_eq!(rounded.ground_effect.vertices.len(), 8 * 4);
    }

    #[test]
    fn test_edge_distance_wraps() {
        let mut points = vec![(0, 0)];
        for k in 0..9 {
            let x = if k % 2 == 0 { 4000 } else { 10 };
            points.push((x, k * 10));
            points.push((x, k * 10 + 10));
        }
        points.push((0, 90));
        let bucket = build(0.0, &[polygon(&points)], &params(16, 32768, 21800));

        let perimeter: f32 = points
            .windows(2)
            .map(|w| Vec2::new((w[1].0 - w[0].0) as f32, (w[1].1 - w[0].1) as f32).length())
            .sum();
        assert!(perimeter > EDGE_DISTANCE_WRAP);

        let roof = points.len();
        let walls = &bucket.vertices[roof..];
        assert!(walls.iter().all(|v| v.a_pos_normal_ed[3] >= 0));
        // Some wall other than the first restarts at zero
        let restarted = walls
            .chunks_exact(4)
            .skip(1)
            .any(|quad| quad[0].a_pos_normal_ed[3] & !3 == 0);
        assert!(restarted);
    }

    #[test]
    fn test_edge_distance_exact_wrap_stays_positive() {
        // 8 long and 8 short edges sum to exactly the wrap limit
        let mut points: Vec<(i32, i32)> = vec![(0, 0)];
        for k in 0..8 {
            let x = if k % 2 == 0 { 4000 } else { 0 };
            points.push((x, k * 96));
            points.push((x, k * 96 + 96));
        }
        let total: i32 = points
            .windows(2)
            .map(|w| (w[1].0 - w[0].0).abs() + (w[1].1 - w[0].1).abs())
            .sum();
        assert_eq!(total as f32, EDGE_DISTANCE_WRAP);

        let feature = BucketFeature {
            kind: FeatureKind::LineString,
            ..polygon(&points)
        };
        let bucket = build(0.0, &[feature], &params(16, 32768, 21800));
        assert_eq!(bucket.vertices.len(), 16 * 4);
        assert!(bucket.vertices.iter().all(|v| v.a_pos_normal_ed[3] >= 0));
        // The last wall restarted instead of ending on the limit
        let last = &bucket.vertices[bucket.vertices.len() - 4..];
        assert_eq!(last[0].a_pos_normal_ed[3] & !3, 0);
    }

    #[test]
    fn test_ao_encoding_bits() {
        assert_eq!(encode_ao_to_edge_distance(100.0, true, true), 103);
        assert_eq!(encode_ao_to_edge_distance(103.0, false, false), 100);
        // Saturates below the sign bit with both flags set
        assert_eq!(encode_ao_to_edge_distance(32767.5, true, true), i16::MAX as i32);
        assert_eq!(encode_ao_to_edge_distance(40000.0, false, false), 32764);
        // L-shaped corner is concave from the inside
        assert!(is_ao_concave_angle(IVec2::new(10, 0), IVec2::new(0, 0), IVec2::new(0, 10)));
        assert!(!is_ao_concave_angle(IVec2::new(0, 10), IVec2::new(0, 0), IVec2::new(10, 0)));
        // Angles over tile borders are never shaded
        assert!(!is_ao_concave_angle(IVec2::new(-1, 10), IVec2::new(0, 0), IVec2::new(10, 0)));
    }

    #[test]
    fn test_line_string_has_walls_only() {
        let feature = BucketFeature {
            kind: FeatureKind::LineString,
            ..polygon(SQUARE)
        };
        let bucket = build(1.0, &[feature], &params(16, 32768, 21800));
        assert!(bucket.edge_radius > 0.0);
        // Open ring: 3 edges, no roof, no rounding
        assert_eq!(bucket.vertices.len(), 12);
        assert_eq!(bucket.indices.len(), 6);
    }

    #[test]
    fn test_globe_extension_parallel() {
        let mut p = params(2, 1, 1);
        p.projection = Projection::Globe;
        let bucket = build(0.0, &[polygon(&[(100, 100), (3000, 100), (3000, 3000), (100, 3000)])], &p);
        let ext = bucket.ext_vertices.as_ref().unwrap();
        assert_eq!(ext.len(), bucket.vertices.len());
        // z2 tile is split along the globe grid, so there are more walls than the 4 outer edges
        assert!(bucket.footprint_segments.len() > 1);
    }

    fn split_building() -> (FillExtrusionBucket, FillExtrusionBucket) {
        let left = build(0.0, &[polygon(&[(4000, 100), (4196, 100), (4196, 300), (4000, 300)])], &params(16, 32768, 21800));
        let right = build(0.0, &[polygon(&[(-96, 100), (100, 100), (100, 300), (-96, 300)])], &params(16, 32769, 21800));
        (left, right)
    }

    #[test]
    fn test_border_features_start_hidden() {
        let (left, right) = split_building();
        assert_eq!(left.centroid_data[0].centroid, HIDDEN_CENTROID);
        assert_eq!(left.border_feature_indices[BORDER_RIGHT], vec![0]);
        assert_eq!(right.border_feature_indices[BORDER_LEFT], vec![0]);
        assert_eq!(left.centroid_vertices[0].a_centroid_pos, HIDDEN_CENTROID);
    }

    #[test]
    fn test_border_stitching_is_order_independent() {
        let (mut a_left, mut a_right) = split_building();
        a_left.stitch_border(BORDER_RIGHT, &mut a_right);

        let (mut b_left, mut b_right) = split_building();
        b_right.stitch_border(BORDER_LEFT, &mut b_left);

        assert_eq!(a_left.centroid_data[0].centroid, b_left.centroid_data[0].centroid);
        assert_eq!(a_right.centroid_data[0].centroid, b_right.centroid_data[0].centroid);
        assert_ne!(a_left.centroid_data[0].centroid, HIDDEN_CENTROID);
        assert_eq!(a_left.border_done_with_neighbor_z[BORDER_RIGHT], Some(16));
        assert_eq!(a_right.border_done_with_neighbor_z[BORDER_LEFT], Some(16));
        assert!(a_left.needs_centroid_update);
    }

    #[test]
    fn test_finish_border_reveals_features() {
        let (mut left, _) = split_building();
        left.finish_border(BORDER_RIGHT);
        assert_ne!(left.centroid_data[0].centroid, HIDDEN_CENTROID);
        assert_ne!(left.centroid_vertices[0].a_centroid_pos, HIDDEN_CENTROID);
    }

    #[test]
    fn test_replacement_hides_overlapping_part() {
        use crate::bucket::replacement::{Footprint, FootprintSource};

        let p = params(16, 32768, 21800);
        let mut bucket = build(
            0.0,
            &[polygon(SQUARE), polygon(&[(1000, 1000), (1100, 1000), (1100, 1100), (1000, 1100)])],
            &p,
        );
        let coord = OverscaledTileId::from_canonical(p.canonical);
        let mut source = FootprintSource::new();
        source.add_footprint(coord, Footprint::from_contours(&[vec![[50.0, 50.0], [200.0, 50.0], [200.0, 200.0], [50.0, 200.0]]]));

        bucket.update_replacement(&coord, &source);
        assert!(bucket.centroid_data[0].is_hidden_by_replacement());
        assert!(!bucket.centroid_data[1].is_hidden_by_replacement());
        assert_eq!(bucket.centroid_vertices[0].a_centroid_pos, HIDDEN_CENTROID);
        let hidden = &bucket.ground_effect.hidden_by_landmark;
        assert!(hidden[..bucket.centroid_data[0].ground_vertex_count].iter().all(|&h| h == 1));

        // Unchanged source is a no-op, removal restores the part
        bucket.update_replacement(&coord, &source);
        assert!(bucket.centroid_data[0].is_hidden_by_replacement());
        source.remove_tile(&coord);
        bucket.update_replacement(&coord, &source);
        assert!(!bucket.centroid_data[0].is_hidden_by_replacement());
        assert_ne!(bucket.centroid_vertices[0].a_centroid_pos, HIDDEN_CENTROID);
    }

    #[test]
    fn test_upload_and_destroy() {
        let ctx = RecordingContext::default();
        let mut bucket = build(0.0, &[polygon(SQUARE)], &params(16, 32768, 21800));
        let mut cache = BufferCache::new();
        assert!(bucket.upload_pending());
        bucket.upload(&ctx, &mut cache).unwrap();
        assert!(!bucket.upload_pending());
        assert!(cache.layout_vertex_buffer.is_some());
        assert!(cache.ground_vertex_buffer.is_some());
        assert_eq!(cache.paint_buffers.len(), 1);
        bucket.destroy(&ctx, &mut cache);
        assert_eq!(ctx.live_buffers.get(), 0);
    }
}

use crate::config::{as_color, as_f32, Properties, StyleLayer};
use serde_json::Value;

/// Paint property consumed by a program, with its component count
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PaintAttribute {
    pub property: &'static str,
    pub components: usize,
}

/// How a paint property reaches the shader
#[derive(Clone, Debug, PartialEq)]
pub enum PaintBinding {
    /// Same value for every feature and zoom: a plain uniform
    Constant { value: [f32; 4] },
    /// Same for every feature but zoom dependent: a uniform re-evaluated per frame
    ZoomInterpolated { stops: Vec<f32> },
    /// Data driven: one value per vertex
    PerVertex { components: usize, data: Vec<f32> },
}

fn to_components(value: Option<Value>) -> [f32; 4] {
    match value {
        Some(v) => {
            if let Some(n) = as_f32(&v) {
                [n, 0.0, 0.0, 0.0]
            } else {
                as_color(&v).unwrap_or([0.0; 4])
            }
        }
        None => [0.0; 4],
    }
}

/// Binding strategy of every paint property of one layer, fixed at bucket build time
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProgramConfiguration {
    pub layer_id: String,
    pub bindings: Vec<(&'static str, PaintBinding)>,
    pub needs_upload: bool,
}

impl ProgramConfiguration {
    pub fn new(layer: &dyn StyleLayer, attributes: &[PaintAttribute], zoom: f32) -> ProgramConfiguration {
        let empty = Properties::new();
        let bindings = attributes
            .iter()
            .map(|attr| {
                let binding = if !layer.is_paint_feature_constant(attr.property) {
                    PaintBinding::PerVertex {
                        components: attr.components,
                        data: Vec::new(),
                    }
                } else if !layer.is_paint_zoom_constant(attr.property) {
                    PaintBinding::ZoomInterpolated {
                        stops: layer.paint_stop_zoom_levels(attr.property),
                    }
                } else {
                    PaintBinding::Constant {
                        value: to_components(layer.paint_value(attr.property, zoom, &empty)),
                    }
                };
                (attr.property, binding)
            })
            .collect();

        ProgramConfiguration {
            layer_id: layer.id().to_string(),
            bindings,
            needs_upload: false,
        }
    }

    /// Extend per-vertex arrays up to `length` vertices with this feature's values
    pub fn populate_paint_arrays(
        &mut self,
        layer: &dyn StyleLayer,
        length: usize,
        properties: &Properties,
        zoom: f32,
    ) {
        for (property, binding) in self.bindings.iter_mut() {
            if let PaintBinding::PerVertex { components, data } = binding {
                let value = to_components(layer.paint_value(property, zoom, properties));
                let start = data.len() / *components;
                for _ in start..length {
                    data.extend_from_slice(&value[..*components]);
                }
                self.needs_upload = true;
            }
        }
    }

    /// Uniform values at the current zoom for the non data-driven properties
    pub fn uniform_values(&self, layer: &dyn StyleLayer, zoom: f32) -> Vec<(&'static str, [f32; 4])> {
        let empty = Properties::new();
        self.bindings
            .iter()
            .filter_map(|(property, binding)| match binding {
                PaintBinding::Constant { value } => Some((*property, *value)),
                PaintBinding::ZoomInterpolated { .. } => {
                    Some((*property, to_components(layer.paint_value(property, zoom, &empty))))
                }
                PaintBinding::PerVertex { .. } => None,
            })
            .collect()
    }

    /// Per-vertex arrays, in binding order
    pub fn paint_vertex_arrays(&self) -> Vec<(&'static str, &[f32])> {
        self.bindings
            .iter()
            .filter_map(|(property, binding)| match binding {
                PaintBinding::PerVertex { data, .. } => Some((*property, data.as_slice())),
                _ => None,
            })
            .collect()
    }

    pub fn binding(&self, property: &str) -> Option<&PaintBinding> {
        self.bindings
            .iter()
            .find(|(p, _)| *p == property)
            .map(|(_, b)| b)
    }
}

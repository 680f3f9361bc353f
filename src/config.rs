use crate::projection::Projection;
use crate::symbol::shaping::ImageMap;
use serde::Deserialize;
use serde_json::Value;

/// Feature properties as decoded from the tile
pub type Properties = serde_json::Map<String, Value>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LayerType {
    Background,
    Fill,
    Line,
    Symbol,
    Circle,
    Raster,
    Hillshade,
    FillExtrusion,
}

impl LayerType {
    /// Layer types rendered into terrain proxy tiles instead of directly on the mesh
    pub fn is_draped(&self) -> bool {
        matches!(
            self,
            LayerType::Background
                | LayerType::Fill
                | LayerType::Line
                | LayerType::Raster
                | LayerType::Hillshade
        )
    }

    /// Layer types whose tiles must not bleed into their neighbours
    pub fn is_tile_clipped(&self) -> bool {
        matches!(self, LayerType::Fill | LayerType::Line)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Visible,
    None,
}

/// Evaluated style values, the only surface the core sees of a style layer
///
/// Implementations own expression evaluation; the core asks for a value by property
/// name at a zoom level for a given feature.
pub trait StyleLayer {
    fn id(&self) -> &str;
    fn layer_type(&self) -> LayerType;
    fn source(&self) -> &str;
    fn source_layer(&self) -> Option<&str>;
    fn layout_value(&self, name: &str, zoom: f32, properties: &Properties) -> Option<Value>;
    fn paint_value(&self, name: &str, zoom: f32, properties: &Properties) -> Option<Value>;
    fn is_paint_feature_constant(&self, name: &str) -> bool;
    fn is_paint_zoom_constant(&self, name: &str) -> bool;
    /// Zoom levels of the stops of a zoom-dependent paint property
    fn paint_stop_zoom_levels(&self, name: &str) -> Vec<f32>;
    fn is_layout_feature_constant(&self, name: &str) -> bool;
    fn is_layout_zoom_constant(&self, name: &str) -> bool;
    fn layout_stop_zoom_levels(&self, name: &str) -> Vec<f32>;
    /// Whether the layer should be skipped for tiles at `zoom`
    fn is_hidden(&self, zoom: f32) -> bool;
}

/// Style layer description as passed in from the host
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LayerConfig {
    pub id: String,
    #[serde(rename = "type")]
    pub layer_type: LayerType,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub source_layer: Option<String>,
    #[serde(default)]
    pub minzoom: Option<f32>,
    #[serde(default)]
    pub maxzoom: Option<f32>,
    #[serde(default)]
    pub layout: Properties,
    #[serde(default)]
    pub paint: Properties,
}

impl LayerConfig {
    pub fn visibility(&self) -> Visibility {
        match self.layout.get("visibility").and_then(Value::as_str) {
            Some("none") => Visibility::None,
            _ => Visibility::Visible,
        }
    }
}

fn is_zoom_function(expr: &Value) -> bool {
    expr.get("stops").is_some() && expr.get("property").is_none()
}

fn is_feature_expression(expr: &Value) -> bool {
    match expr {
        Value::Array(items) => items.first().and_then(Value::as_str) == Some("get"),
        Value::Object(map) => map.contains_key("property"),
        _ => false,
    }
}

fn interpolate_value(a: &Value, b: &Value, t: f64) -> Value {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            serde_json::json!(x + (y - x) * t)
        }
        (Value::Array(xs), Value::Array(ys)) if xs.len() == ys.len() => Value::Array(
            xs.iter()
                .zip(ys)
                .map(|(x, y)| interpolate_value(x, y, t))
                .collect(),
        ),
        _ => a.clone(),
    }
}

fn stop_zoom_levels(expr: &Value) -> Vec<f32> {
    expr.get("stops")
        .and_then(Value::as_array)
        .map(|stops| {
            stops
                .iter()
                .filter_map(|s| s.get(0).and_then(Value::as_f64))
                .map(|z| z as f32)
                .collect()
        })
        .unwrap_or_default()
}

/// Evaluate a zoom function `{"base": b, "stops": [[z, v], ...]}`
fn evaluate_stops(function: &Value, zoom: f32) -> Option<Value> {
    let stops = function.get("stops")?.as_array()?;
    let base = function.get("base").and_then(Value::as_f64).unwrap_or(1.0);
    let zoom = zoom as f64;

    let stop = |i: usize| -> Option<(f64, &Value)> {
        let pair = stops.get(i)?.as_array()?;
        Some((pair.first()?.as_f64()?, pair.get(1)?))
    };

    let (first_zoom, first_value) = stop(0)?;
    if zoom <= first_zoom {
        return Some(first_value.clone());
    }
    for i in 1..stops.len() {
        let (z1, v1) = stop(i)?;
        if zoom <= z1 {
            let (z0, v0) = stop(i - 1)?;
            let diff = z1 - z0;
            let progress = zoom - z0;
            let t = if diff == 0.0 {
                0.0
            } else if base == 1.0 {
                progress / diff
            } else {
                (base.powf(progress) - 1.0) / (base.powf(diff) - 1.0)
            };
            return Some(interpolate_value(v0, v1, t));
        }
    }
    stop(stops.len() - 1).map(|(_, v)| v.clone())
}

/// Evaluate a property expression: constant, zoom function, `["get", name]`, or
/// `{"property": name, "default": value}`
pub fn evaluate_expression(expr: &Value, zoom: f32, properties: &Properties) -> Option<Value> {
    match expr {
        Value::Array(items) if items.first().and_then(Value::as_str) == Some("get") => {
            let name = items.get(1)?.as_str()?;
            properties.get(name).cloned()
        }
        Value::Object(map) if map.contains_key("property") => {
            let name = map.get("property")?.as_str()?;
            properties
                .get(name)
                .cloned()
                .or_else(|| map.get("default").cloned())
        }
        _ if is_zoom_function(expr) => evaluate_stops(expr, zoom),
        _ => Some(expr.clone()),
    }
}

impl StyleLayer for LayerConfig {
    fn id(&self) -> &str {
        &self.id
    }

    fn layer_type(&self) -> LayerType {
        self.layer_type
    }

    fn source(&self) -> &str {
        &self.source
    }

    fn source_layer(&self) -> Option<&str> {
        self.source_layer.as_deref()
    }

    fn layout_value(&self, name: &str, zoom: f32, properties: &Properties) -> Option<Value> {
        evaluate_expression(self.layout.get(name)?, zoom, properties)
    }

    fn paint_value(&self, name: &str, zoom: f32, properties: &Properties) -> Option<Value> {
        evaluate_expression(self.paint.get(name)?, zoom, properties)
    }

    fn is_paint_feature_constant(&self, name: &str) -> bool {
        self.paint.get(name).map_or(true, |expr| !is_feature_expression(expr))
    }

    fn is_paint_zoom_constant(&self, name: &str) -> bool {
        self.paint.get(name).map_or(true, |expr| !is_zoom_function(expr))
    }

    fn paint_stop_zoom_levels(&self, name: &str) -> Vec<f32> {
        self.paint.get(name).map(stop_zoom_levels).unwrap_or_default()
    }

    fn is_layout_feature_constant(&self, name: &str) -> bool {
        self.layout.get(name).map_or(true, |expr| !is_feature_expression(expr))
    }

    fn is_layout_zoom_constant(&self, name: &str) -> bool {
        self.layout.get(name).map_or(true, |expr| !is_zoom_function(expr))
    }

    fn layout_stop_zoom_levels(&self, name: &str) -> Vec<f32> {
        self.layout.get(name).map(stop_zoom_levels).unwrap_or_default()
    }

    fn is_hidden(&self, zoom: f32) -> bool {
        if self.visibility() == Visibility::None {
            return true;
        }
        if let Some(minzoom) = self.minzoom {
            if zoom < minzoom {
                return true;
            }
        }
        if let Some(maxzoom) = self.maxzoom {
            if zoom >= maxzoom {
                return true;
            }
        }
        false
    }
}

/// Read a number out of an evaluated value
pub fn as_f32(value: &Value) -> Option<f32> {
    value.as_f64().map(|v| v as f32)
}

/// Read a 2-component number array out of an evaluated value
pub fn as_vec2(value: &Value) -> Option<[f32; 2]> {
    let items = value.as_array()?;
    Some([as_f32(items.first()?)?, as_f32(items.get(1)?)?])
}

/// Read an RGBA color given either as `[r, g, b, a]` (0..1) or as a `#rrggbb` string
pub fn as_color(value: &Value) -> Option<[f32; 4]> {
    match value {
        Value::Array(items) if items.len() == 4 => {
            let mut out = [0.0; 4];
            for (o, v) in out.iter_mut().zip(items) {
                *o = as_f32(v)?;
            }
            Some(out)
        }
        Value::String(s) if s.starts_with('#') && s.len() == 7 => {
            let channel = |i: usize| u8::from_str_radix(&s[i..i + 2], 16).ok();
            Some([
                channel(1)? as f32 / 255.0,
                channel(3)? as f32 / 255.0,
                channel(5)? as f32 / 255.0,
                1.0,
            ])
        }
        _ => None,
    }
}

/// Evaluate a fixed list of layout keys and deserialize them into a typed struct
///
/// Missing keys fall back to the struct's serde defaults.
fn evaluate_layout<T: serde::de::DeserializeOwned>(
    layer: &dyn StyleLayer,
    keys: &[&str],
    zoom: f32,
    properties: &Properties,
) -> crate::error::Result<T> {
    let mut map = Properties::new();
    for key in keys {
        if let Some(value) = layer.layout_value(key, zoom, properties) {
            map.insert(key.to_string(), value);
        }
    }
    Ok(serde_json::from_value(Value::Object(map))?)
}

/// Layout properties of a fill-extrusion layer
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct FillExtrusionLayout {
    /// Rounded corner radius in meters
    #[serde(rename = "fill-extrusion-edge-radius")]
    pub edge_radius: f32,
}

impl FillExtrusionLayout {
    pub fn evaluate(layer: &dyn StyleLayer, zoom: f32) -> crate::error::Result<FillExtrusionLayout> {
        evaluate_layout(layer, &["fill-extrusion-edge-radius"], zoom, &Properties::new())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SymbolPlacement {
    #[default]
    Point,
    Line,
    LineCenter,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Alignment {
    Map,
    Viewport,
    #[default]
    Auto,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TextJustify {
    Auto,
    Left,
    #[default]
    Center,
    Right,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TextAnchor {
    #[default]
    Center,
    Left,
    Right,
    Top,
    Bottom,
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl TextAnchor {
    /// Horizontal and vertical alignment factors in [0, 1]
    pub fn align(&self) -> (f32, f32) {
        let horizontal = match self {
            TextAnchor::Left | TextAnchor::TopLeft | TextAnchor::BottomLeft => 0.0,
            TextAnchor::Right | TextAnchor::TopRight | TextAnchor::BottomRight => 1.0,
            _ => 0.5,
        };
        let vertical = match self {
            TextAnchor::Top | TextAnchor::TopLeft | TextAnchor::TopRight => 0.0,
            TextAnchor::Bottom | TextAnchor::BottomLeft | TextAnchor::BottomRight => 1.0,
            _ => 0.5,
        };
        (horizontal, vertical)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextTransform {
    #[default]
    None,
    Uppercase,
    Lowercase,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WritingMode {
    Horizontal,
    Vertical,
}

/// Layout properties of a symbol layer, evaluated for one zoom and feature
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SymbolLayout {
    pub symbol_placement: SymbolPlacement,
    pub symbol_spacing: f32,
    pub symbol_avoid_edges: bool,
    pub text_field: Option<String>,
    pub text_font: Vec<String>,
    pub text_size: f32,
    pub text_max_width: f32,
    pub text_line_height: f32,
    pub text_letter_spacing: f32,
    pub text_justify: TextJustify,
    pub text_anchor: TextAnchor,
    pub text_offset: [f32; 2],
    pub text_rotate: f32,
    pub text_transform: TextTransform,
    pub text_padding: f32,
    pub text_max_angle: f32,
    pub text_keep_upright: bool,
    pub text_allow_overlap: bool,
    pub text_ignore_placement: bool,
    pub text_optional: bool,
    pub text_rotation_alignment: Alignment,
    pub text_writing_mode: Vec<WritingMode>,
    pub text_repeat_distance: f32,
    pub icon_image: Option<String>,
    pub icon_size: f32,
    pub icon_offset: [f32; 2],
    pub icon_rotate: f32,
    pub icon_padding: f32,
    pub icon_keep_upright: bool,
    pub icon_allow_overlap: bool,
    pub icon_ignore_placement: bool,
    pub icon_optional: bool,
    pub icon_rotation_alignment: Alignment,
}

impl Default for SymbolLayout {
    fn default() -> Self {
        SymbolLayout {
            symbol_placement: SymbolPlacement::Point,
            symbol_spacing: 250.0,
            symbol_avoid_edges: false,
            text_field: None,
            text_font: vec![
                "Open Sans Regular".to_string(),
                "Arial Unicode MS Regular".to_string(),
            ],
            text_size: 16.0,
            text_max_width: 10.0,
            text_line_height: 1.2,
            text_letter_spacing: 0.0,
            text_justify: TextJustify::Center,
            text_anchor: TextAnchor::Center,
            text_offset: [0.0, 0.0],
            text_rotate: 0.0,
            text_transform: TextTransform::None,
            text_padding: 2.0,
            text_max_angle: 45.0,
            text_keep_upright: true,
            text_allow_overlap: false,
            text_ignore_placement: false,
            text_optional: false,
            text_rotation_alignment: Alignment::Auto,
            text_writing_mode: Vec::new(),
            text_repeat_distance: 0.0,
            icon_image: None,
            icon_size: 1.0,
            icon_offset: [0.0, 0.0],
            icon_rotate: 0.0,
            icon_padding: 2.0,
            icon_keep_upright: false,
            icon_allow_overlap: false,
            icon_ignore_placement: false,
            icon_optional: false,
            icon_rotation_alignment: Alignment::Auto,
        }
    }
}

const SYMBOL_LAYOUT_KEYS: &[&str] = &[
    "symbol-placement",
    "symbol-spacing",
    "symbol-avoid-edges",
    "text-field",
    "text-font",
    "text-size",
    "text-max-width",
    "text-line-height",
    "text-letter-spacing",
    "text-justify",
    "text-anchor",
    "text-offset",
    "text-rotate",
    "text-transform",
    "text-padding",
    "text-max-angle",
    "text-keep-upright",
    "text-allow-overlap",
    "text-ignore-placement",
    "text-optional",
    "text-rotation-alignment",
    "text-writing-mode",
    "text-repeat-distance",
    "icon-image",
    "icon-size",
    "icon-offset",
    "icon-rotate",
    "icon-padding",
    "icon-keep-upright",
    "icon-allow-overlap",
    "icon-ignore-placement",
    "icon-optional",
    "icon-rotation-alignment",
];

impl SymbolLayout {
    pub fn evaluate(
        layer: &dyn StyleLayer,
        zoom: f32,
        properties: &Properties,
    ) -> crate::error::Result<SymbolLayout> {
        evaluate_layout(layer, SYMBOL_LAYOUT_KEYS, zoom, properties)
    }

    /// Text follows the line geometry
    pub fn text_along_line(&self) -> bool {
        self.text_rotation_alignment_resolved() == Alignment::Map
            && self.symbol_placement != SymbolPlacement::Point
    }

    /// `auto` resolves to `map` for line placement and `viewport` otherwise
    pub fn text_rotation_alignment_resolved(&self) -> Alignment {
        match self.text_rotation_alignment {
            Alignment::Auto if self.symbol_placement != SymbolPlacement::Point => Alignment::Map,
            Alignment::Auto => Alignment::Viewport,
            other => other,
        }
    }

    pub fn icon_rotation_alignment_resolved(&self) -> Alignment {
        match self.icon_rotation_alignment {
            Alignment::Auto if self.symbol_placement != SymbolPlacement::Point => Alignment::Map,
            Alignment::Auto => Alignment::Viewport,
            other => other,
        }
    }
}

/// Style sent along with a tile: its layers, the icon atlas and the target projection
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct StyleConfig {
    pub layers: Vec<LayerConfig>,
    pub images: ImageMap,
    pub projection: Projection,
}

impl StyleConfig {
    pub fn style_layers(&self) -> Vec<&dyn StyleLayer> {
        self.layers.iter().map(|l| l as &dyn StyleLayer).collect()
    }
}

/// Terrain setup as configured by the style
#[derive(Clone, Debug, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct TerrainOptions {
    pub source: String,
    pub exaggeration: f32,
}

impl Default for TerrainOptions {
    fn default() -> Self {
        TerrainOptions {
            source: String::new(),
            exaggeration: 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn layer(json: Value) -> LayerConfig {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_parse_layer_config() {
        let l = layer(json!({
            "id": "buildings",
            "type": "fill-extrusion",
            "source": "composite",
            "source-layer": "building",
            "minzoom": 14,
            "layout": {"fill-extrusion-edge-radius": 0.5},
            "paint": {"fill-extrusion-height": ["get", "height"]}
        }));
        assert_eq!(l.layer_type, LayerType::FillExtrusion);
        assert_eq!(l.source_layer(), Some("building"));
        assert!(l.is_hidden(13.0));
        assert!(!l.is_hidden(15.0));
        assert!(!l.is_paint_feature_constant("fill-extrusion-height"));
        assert!(l.is_paint_feature_constant("fill-extrusion-base"));
    }

    #[test]
    fn test_zoom_function_interpolates() {
        let l = layer(json!({
            "id": "l",
            "type": "line",
            "paint": {"line-width": {"stops": [[10, 1], [20, 11]]}}
        }));
        let props = Properties::new();
        let v = l.paint_value("line-width", 15.0, &props).unwrap();
        assert_eq!(as_f32(&v), Some(6.0));
        assert!(!l.is_paint_zoom_constant("line-width"));
        assert_eq!(l.paint_stop_zoom_levels("line-width"), vec![10.0, 20.0]);
        // Clamped outside the stop range
        assert_eq!(as_f32(&l.paint_value("line-width", 5.0, &props).unwrap()), Some(1.0));
        assert_eq!(as_f32(&l.paint_value("line-width", 25.0, &props).unwrap()), Some(11.0));
    }

    #[test]
    fn test_feature_expression() {
        let mut props = Properties::new();
        props.insert("name".to_string(), json!("Main St"));
        let expr = json!(["get", "name"]);
        assert_eq!(evaluate_expression(&expr, 0.0, &props), Some(json!("Main St")));

        let with_default = json!({"property": "height", "default": 10});
        assert_eq!(evaluate_expression(&with_default, 0.0, &props), Some(json!(10)));
    }

    #[test]
    fn test_visibility_none_hides_layer() {
        let l = layer(json!({"id": "x", "type": "fill", "layout": {"visibility": "none"}}));
        assert_eq!(l.visibility(), Visibility::None);
        assert!(l.is_hidden(10.0));
    }

    #[test]
    fn test_color_parsing() {
        assert_eq!(as_color(&json!("#ff0000")), Some([1.0, 0.0, 0.0, 1.0]));
        assert_eq!(as_color(&json!([0.5, 0.5, 0.5, 1.0])), Some([0.5, 0.5, 0.5, 1.0]));
        assert_eq!(as_color(&json!("red")), None);
    }

    #[test]
    fn test_symbol_layout_defaults_and_overrides() {
        let l = layer(json!({
            "id": "labels",
            "type": "symbol",
            "layout": {
                "symbol-placement": "line",
                "text-field": "{name}",
                "text-size": {"stops": [[10, 10], [20, 20]]},
                "text-anchor": "top-left"
            }
        }));
        let layout = SymbolLayout::evaluate(&l, 15.0, &Properties::new()).unwrap();
        assert_eq!(layout.symbol_placement, SymbolPlacement::Line);
        assert_eq!(layout.text_field.as_deref(), Some("{name}"));
        assert_eq!(layout.text_size, 15.0);
        assert_eq!(layout.symbol_spacing, 250.0);
        assert_eq!(layout.text_anchor.align(), (0.0, 0.0));
        assert!(layout.text_along_line());
        assert_eq!(layout.icon_rotation_alignment_resolved(), Alignment::Map);
    }

    #[test]
    fn test_symbol_layout_rejects_bad_value() {
        let l = layer(json!({
            "id": "labels",
            "type": "symbol",
            "layout": {"symbol-placement": "sideways"}
        }));
        match SymbolLayout::evaluate(&l, 15.0, &Properties::new()) {
            Err(crate::error::Error::Config(_)) => {}
            _ => panic!("Expected config error"),
        }
    }

    #[test]
    fn test_fill_extrusion_layout() {
        let l = layer(json!({
            "id": "b",
            "type": "fill-extrusion",
            "layout": {"fill-extrusion-edge-radius": 0.5}
        }));
        assert_eq!(FillExtrusionLayout::evaluate(&l, 16.0).unwrap().edge_radius, 0.5);
    }

    #[test]
    fn test_parse_style_config() {
        let style: StyleConfig = serde_json::from_value(json!({
            "layers": [{"id": "b", "type": "fill-extrusion", "source-layer": "building"}],
            "images": {"bus": {"rect": {"x": 0, "y": 0, "w": 22, "h": 22}}},
            "projection": "globe"
        }))
        .unwrap();
        assert_eq!(style.style_layers()[0].id(), "b");
        assert_eq!(style.images["bus"].display_size(), [20.0, 20.0]);
        assert!(style.projection.is_globe());

        let empty: StyleConfig = serde_json::from_str("{}").unwrap();
        assert!(empty.layers.is_empty());
        assert_eq!(empty.projection, Projection::Mercator);
    }

    #[test]
    fn test_draped_layer_types() {
        assert!(LayerType::Fill.is_draped());
        assert!(LayerType::Hillshade.is_draped());
        assert!(!LayerType::Symbol.is_draped());
        assert!(!LayerType::FillExtrusion.is_draped());
        assert!(LayerType::Line.is_tile_clipped());
        assert!(!LayerType::Raster.is_tile_clipped());
    }
}

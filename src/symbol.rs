pub mod anchors;
pub mod collision_feature;
pub mod collision_index;
pub mod merge_lines;
pub mod placement;
pub mod projection;
pub mod quads;
pub mod script;
pub mod shaping;
pub mod tokens;

use crate::bucket::FeatureKind;
use crate::config::Properties;
use anchors::Anchor;
use collision_feature::CollisionFeature;
use glam::IVec2;

/// Feature of a symbol layer with its resolved label
#[derive(Clone, Debug, PartialEq)]
pub struct SymbolFeature {
    pub index: usize,
    pub id: Option<u64>,
    pub kind: FeatureKind,
    pub text: Option<String>,
    pub icon: Option<String>,
    pub geometry: Vec<Vec<IVec2>>,
    pub properties: Properties,
    /// Layout sizes for this feature, taken one zoom level in
    pub text_size: f32,
    pub icon_size: f32,
}

impl SymbolFeature {
    pub fn new(index: usize, kind: FeatureKind) -> SymbolFeature {
        SymbolFeature {
            index,
            id: None,
            kind,
            text: None,
            icon: None,
            geometry: Vec::new(),
            properties: Properties::new(),
            text_size: 16.0,
            icon_size: 1.0,
        }
    }
}

/// One placement candidate: an anchor with the boxes and glyphs of its label
#[derive(Clone, Debug, PartialEq)]
pub struct SymbolInstance {
    pub anchor: Anchor,
    pub feature_index: usize,
    pub text_feature: CollisionFeature,
    pub icon_feature: CollisionFeature,
    /// Indices into the glyph buffers' placed symbols
    pub horizontal_text: Option<usize>,
    pub vertical_text: Option<usize>,
    /// Index into the icon buffers' placed symbols
    pub icon: Option<usize>,
}

impl SymbolInstance {
    pub fn has_text(&self) -> bool {
        !self.text_feature.is_empty()
    }

    pub fn has_icon(&self) -> bool {
        !self.icon_feature.is_empty()
    }
}

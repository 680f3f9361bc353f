use super::collision_feature::CollisionBoxArray;
use super::collision_index::CollisionIndex;
use super::SymbolInstance;
use crate::config::SymbolLayout;

/// Overlap settings of a symbol layer
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PlacementOptions {
    pub text_allow_overlap: bool,
    pub icon_allow_overlap: bool,
    pub text_ignore_placement: bool,
    pub icon_ignore_placement: bool,
    pub text_optional: bool,
    pub icon_optional: bool,
    pub avoid_edges: bool,
}

impl PlacementOptions {
    pub fn from_layout(layout: &SymbolLayout) -> PlacementOptions {
        PlacementOptions {
            text_allow_overlap: layout.text_allow_overlap,
            icon_allow_overlap: layout.icon_allow_overlap,
            text_ignore_placement: layout.text_ignore_placement,
            icon_ignore_placement: layout.icon_ignore_placement,
            text_optional: layout.text_optional,
            icon_optional: layout.icon_optional,
            avoid_edges: layout.symbol_avoid_edges,
        }
    }

    /// Labels of this layer may be drawn over each other
    pub fn may_overlap(&self) -> bool {
        self.text_allow_overlap || self.icon_allow_overlap || self.text_ignore_placement || self.icon_ignore_placement
    }
}

/// Outcome of placing one symbol instance
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Placement {
    pub text_scale: f32,
    pub icon_scale: f32,
    pub text_visible: bool,
    pub icon_visible: bool,
}

/// Order in which instances are placed
///
/// Only layers whose labels may overlap are sorted, top to bottom on screen so lower
/// labels draw over higher ones; sorting otherwise makes labels flicker while rotating.
pub fn placement_order(instances: &[SymbolInstance], angle: f32, may_overlap: bool) -> Vec<usize> {
    let mut order: Vec<usize> = (0..instances.len()).collect();
    if may_overlap {
        let (sin, cos) = angle.sin_cos();
        let key = |i: &SymbolInstance| (sin * i.anchor.point.x + cos * i.anchor.point.y) as i32;
        order.sort_by(|&a, &b| {
            let (a, b) = (&instances[a], &instances[b]);
            key(a).cmp(&key(b)).then(b.feature_index.cmp(&a.feature_index))
        });
    }
    order
}

/// Tie text and icon scales together unless one of them is optional
///
/// A pair that must show together takes the larger of the two scales.
pub fn combine_scales(
    text_scale: f32,
    icon_scale: f32,
    has_text: bool,
    has_icon: bool,
    options: &PlacementOptions,
) -> (f32, f32) {
    let icon_without_text = options.text_optional || !has_text;
    let text_without_icon = options.icon_optional || !has_icon;
    let both = text_scale.max(icon_scale);
    if !icon_without_text && !text_without_icon {
        (both, both)
    } else if !text_without_icon {
        (both, icon_scale)
    } else if !icon_without_text {
        (text_scale, both)
    } else {
        (text_scale, icon_scale)
    }
}

/// Resolve collisions of one bucket's instances against the index
///
/// Returns one placement per instance, in instance order. Labels are shown when their
/// scale is reached at `scale`, the current zoom relative to the tile's zoom.
pub fn place_symbols(
    instances: &[SymbolInstance],
    boxes: &mut CollisionBoxArray,
    index: &mut CollisionIndex,
    options: &PlacementOptions,
    scale: f32,
) -> Vec<Placement> {
    let mut placements = vec![
        Placement {
            text_scale: f32::INFINITY,
            icon_scale: f32::INFINITY,
            text_visible: false,
            icon_visible: false,
        };
        instances.len()
    ];

    for i in placement_order(instances, index.angle, options.may_overlap()) {
        let instance = &instances[i];
        let has_text = instance.has_text();
        let has_icon = instance.has_icon();

        let text_scale = if has_text {
            index.place_feature(boxes, &instance.text_feature, options.text_allow_overlap, options.avoid_edges)
        } else {
            index.min_scale
        };
        let icon_scale = if has_icon {
            index.place_feature(boxes, &instance.icon_feature, options.icon_allow_overlap, options.avoid_edges)
        } else {
            index.min_scale
        };
        let (text_scale, icon_scale) = combine_scales(text_scale, icon_scale, has_text, has_icon, options);

        if has_text {
            index.insert_feature(boxes, &instance.text_feature, text_scale, options.text_ignore_placement);
        }
        if has_icon {
            index.insert_feature(boxes, &instance.icon_feature, icon_scale, options.icon_ignore_placement);
        }

        let shown = |s: f32| s <= index.max_scale && s <= scale;
        placements[i] = Placement {
            text_scale,
            icon_scale,
            text_visible: has_text && shown(text_scale),
            icon_visible: has_icon && shown(icon_scale),
        };
    }

    log::debug!(
        "Placed {} of {} symbols",
        placements.iter().filter(|p| p.text_visible || p.icon_visible).count(),
        instances.len()
    );
    placements
}

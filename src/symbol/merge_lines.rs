use super::SymbolFeature;
use glam::IVec2;
use std::collections::HashMap;

fn endpoint_key(text: &str, line: &[IVec2], last: bool) -> Option<String> {
    let p = if last { line.last()? } else { line.first()? };
    Some(format!("{}:{}:{}", text, p.x, p.y))
}

/// Join line features whose ends meet and that carry the same label
///
/// Features without text, or without a first line, pass through unchanged. Only the
/// first line of each feature takes part in merging.
pub fn merge_lines(features: Vec<SymbolFeature>) -> Vec<SymbolFeature> {
    let mut merged: Vec<SymbolFeature> = Vec::with_capacity(features.len());
    let mut left_index: HashMap<String, usize> = HashMap::new();
    let mut right_index: HashMap<String, usize> = HashMap::new();

    for feature in features {
        let keys = feature.text.as_deref().and_then(|text| {
            let line = feature.geometry.first()?;
            Some((endpoint_key(text, line, false)?, endpoint_key(text, line, true)?))
        });
        let Some((left_key, right_key)) = keys else {
            merged.push(feature);
            continue;
        };

        let joins_right = right_index.get(&left_key).copied();
        let joins_left = left_index.get(&right_key).copied();
        match (joins_right, joins_left) {
            (Some(i), Some(j)) if i != j => {
                // Feature bridges two existing lines: append it and the right line to the left one
                let mut line = feature.geometry.into_iter().next().unwrap_or_default();
                let right_line = std::mem::take(&mut merged[j].geometry);
                let mut right_line = right_line.into_iter().next().unwrap_or_default();
                right_line.remove(0);
                line.extend(right_line);

                let target = &mut merged[i].geometry[0];
                target.pop();
                target.extend(line);

                right_index.remove(&left_key);
                left_index.remove(&right_key);
                if let Some(text) = merged[i].text.clone() {
                    if let Some(key) = endpoint_key(&text, &merged[i].geometry[0], true) {
                        right_index.insert(key, i);
                    }
                }
                right_index.retain(|_, v| *v != j);
            }
            (Some(i), _) => {
                right_index.remove(&left_key);
                right_index.insert(right_key, i);
                let line = feature.geometry.into_iter().next().unwrap_or_default();
                let target = &mut merged[i].geometry[0];
                target.pop();
                target.extend(line);
            }
            (None, Some(j)) => {
                left_index.remove(&right_key);
                left_index.insert(left_key, j);
                let mut line = feature.geometry.into_iter().next().unwrap_or_default();
                let target = &mut merged[j].geometry[0];
                target.remove(0);
                line.append(target);
                *target = line;
            }
            _ => {
                left_index.insert(left_key, merged.len());
                right_index.insert(right_key, merged.len());
                merged.push(feature);
            }
        }
    }

    merged.retain(|f| !f.geometry.is_empty());
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::FeatureKind;

    fn line(text: &str, points: &[(i32, i32)]) -> SymbolFeature {
        SymbolFeature {
            text: Some(text.to_string()),
            geometry: vec![points.iter().map(|&(x, y)| IVec2::new(x, y)).collect()],
            ..SymbolFeature::new(0, FeatureKind::LineString)
        }
    }

    fn points(f: &SymbolFeature) -> Vec<(i32, i32)> {
        f.geometry[0].iter().map(|p| (p.x, p.y)).collect()
    }

    #[test]
    fn test_merge_appends_and_prepends() {
        let merged = merge_lines(vec![
            line("a", &[(0, 0), (10, 0)]),
            line("a", &[(10, 0), (20, 0)]),
            line("a", &[(-10, 0), (0, 0)]),
        ]);
        assert_eq!(merged.len(), 1);
        assert_eq!(points(&merged[0]), vec![(-10, 0), (0, 0), (10, 0), (20, 0)]);
    }

    #[test]
    fn test_merge_bridging_feature() {
        let merged = merge_lines(vec![
            line("a", &[(0, 0), (10, 0)]),
            line("a", &[(20, 0), (30, 0)]),
            line("a", &[(10, 0), (20, 0)]),
        ]);
        assert_eq!(merged.len(), 1);
        assert_eq!(points(&merged[0]), vec![(0, 0), (10, 0), (20, 0), (30, 0)]);
    }

    #[test]
    fn test_different_text_is_not_merged() {
        let merged = merge_lines(vec![line("a", &[(0, 0), (10, 0)]), line("b", &[(10, 0), (20, 0)])]);
        assert_eq!(merged.len(), 2);

        let mut untitled = line("a", &[(10, 0), (20, 0)]);
        untitled.text = None;
        let merged = merge_lines(vec![line("a", &[(0, 0), (10, 0)]), untitled]);
        assert_eq!(merged.len(), 2);
    }
}

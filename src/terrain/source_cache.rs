use crate::tile_id::OverscaledTileId;
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    Vector,
    Raster,
    RasterDem,
    Geojson,
}

/// Elevation encoding of a raster-dem source
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DemEncoding {
    #[default]
    Mapbox,
    Terrarium,
}

impl DemEncoding {
    /// Weights turning a texel's RGB into meters, offset last
    pub fn unpack_vector(&self) -> [f32; 4] {
        match self {
            DemEncoding::Mapbox => [6553.6, 25.6, 0.1, 10000.0],
            DemEncoding::Terrarium => [256.0, 1.0, 1.0 / 256.0, 32768.0],
        }
    }
}

/// Loaded state of one source tile as seen by the terrain controller
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SourceTile {
    pub id: OverscaledTileId,
    pub has_data: bool,
    /// Elevation payload is decoded (raster-dem tiles only)
    pub has_dem: bool,
}

impl SourceTile {
    pub fn loaded(id: OverscaledTileId) -> SourceTile {
        SourceTile {
            id,
            has_data: true,
            has_dem: false,
        }
    }

    pub fn dem(id: OverscaledTileId) -> SourceTile {
        SourceTile {
            id,
            has_data: true,
            has_dem: true,
        }
    }
}

/// Tiles that can be searched for a loaded ancestor
pub trait TilePyramid {
    fn tile(&self, id: &OverscaledTileId) -> Option<&SourceTile>;
    fn min_zoom(&self) -> u8;
    fn max_zoom(&self) -> u8;
    /// Vector data is re-parsed past max zoom instead of scaled
    fn reparse_overscaled(&self) -> bool;
}

/// Snapshot of one content source: its kind, zoom range and loaded tiles
#[derive(Clone, Debug)]
pub struct SourceCache {
    pub id: String,
    pub kind: SourceKind,
    pub min_zoom: u8,
    pub max_zoom: u8,
    pub tile_size: u32,
    pub encoding: DemEncoding,
    /// Some visible layer reads from this source
    pub used: bool,
    /// Source feeds terrain elevation
    pub used_for_terrain: bool,
    tiles: HashMap<OverscaledTileId, SourceTile>,
}

impl SourceCache {
    pub fn new(id: &str, kind: SourceKind) -> SourceCache {
        let tile_size = match kind {
            SourceKind::RasterDem => 514,
            _ => 512,
        };
        SourceCache {
            id: id.to_string(),
            kind,
            min_zoom: 0,
            max_zoom: match kind {
                SourceKind::Geojson => 18,
                SourceKind::Vector => 14,
                _ => 22,
            },
            tile_size,
            encoding: DemEncoding::default(),
            used: kind != SourceKind::RasterDem,
            used_for_terrain: false,
            tiles: HashMap::new(),
        }
    }

    pub fn add_tile(&mut self, tile: SourceTile) {
        self.tiles.insert(tile.id, tile);
    }

    pub fn remove_tile(&mut self, id: &OverscaledTileId) -> Option<SourceTile> {
        self.tiles.remove(id)
    }

    /// Ids of all tiles in a stable order
    pub fn ids(&self) -> Vec<OverscaledTileId> {
        let mut ids: Vec<OverscaledTileId> = self.tiles.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }
}

impl TilePyramid for SourceCache {
    fn tile(&self, id: &OverscaledTileId) -> Option<&SourceTile> {
        self.tiles.get(id)
    }

    fn min_zoom(&self) -> u8 {
        self.min_zoom
    }

    fn max_zoom(&self) -> u8 {
        self.max_zoom
    }

    fn reparse_overscaled(&self) -> bool {
        matches!(self.kind, SourceKind::Vector | SourceKind::Geojson)
    }
}

/// Cached answers of covering-tile searches: a tile id or `None` when nothing is loaded
pub type CoveringTileCache = HashMap<OverscaledTileId, Option<OverscaledTileId>>;

fn store_path(lookup: &mut CoveringTileCache, path: &mut Vec<OverscaledTileId>, found: Option<OverscaledTileId>) {
    for id in path.drain(..) {
        lookup.insert(id, found);
    }
}

fn with_data<'a, P: TilePyramid>(source: &'a P, id: &OverscaledTileId) -> Option<&'a SourceTile> {
    source.tile(id).filter(|t| t.has_data)
}

/// Loaded tile of `source` covering `tile_id`: the tile itself or its closest loaded ancestor
///
/// Unsuccessful ancestor walks are recorded in `lookup` so later searches through the
/// same ids stop early; a `None` entry means nothing above is loaded.
///
/// # Arguments
/// * `tile_zoom` - Integer zoom of the current view, used for re-parsed overscaled ids
pub fn find_tile_covering_tile_id<P: TilePyramid>(
    lookup: &mut CoveringTileCache,
    source: &P,
    tile_id: &OverscaledTileId,
    tile_zoom: u8,
) -> Option<OverscaledTileId> {
    if let Some(tile) = with_data(source, tile_id) {
        return Some(tile.id);
    }

    let key = lookup.get(tile_id).copied();
    let mut tile = key.flatten().and_then(|k| source.tile(&k));
    if let Some(t) = tile.filter(|t| t.has_data) {
        return Some(t.id);
    }
    if key == Some(None) {
        return None;
    }

    let mut source_tile_id = tile.map(|t| t.id).unwrap_or(*tile_id);
    let mut z = source_tile_id.overscaled_z as i32;
    let min_zoom = source.min_zoom() as i32;
    let mut path = Vec::new();

    if key.is_none() {
        let max_zoom = source.max_zoom();
        let canonical = tile_id.canonical;
        if canonical.z >= max_zoom {
            let downscale = canonical.z - max_zoom;
            let (x, y) = (canonical.x >> downscale, canonical.y >> downscale);
            if source.reparse_overscaled() {
                z = (canonical.z as i32 + 2).max(tile_zoom as i32);
                source_tile_id = OverscaledTileId::new(z as u8, tile_id.wrap, max_zoom, x, y);
            } else if downscale != 0 {
                z = max_zoom as i32;
                source_tile_id = OverscaledTileId::new(max_zoom, tile_id.wrap, max_zoom, x, y);
            }
        }
        if source_tile_id != *tile_id {
            path.push(source_tile_id);
            tile = source.tile(&source_tile_id);
        }
    }

    z -= 1;
    while z >= min_zoom && !tile.is_some_and(|t| t.has_data) {
        if let Some(t) = tile {
            // Parents not loaded yet resolve to this tile
            store_path(lookup, &mut path, Some(t.id));
        }
        let id = source_tile_id.scaled_to(z as u8);
        tile = source.tile(&id);
        if tile.is_some_and(|t| t.has_data) {
            break;
        }
        match lookup.get(&id).copied() {
            Some(None) => break,
            Some(Some(k)) => {
                tile = source.tile(&k);
                z -= 1;
                continue;
            }
            None => {}
        }
        path.push(id);
        z -= 1;
    }

    let found = tile.map(|t| t.id);
    store_path(lookup, &mut path, found);
    tile.filter(|t| t.has_data).map(|t| t.id)
}

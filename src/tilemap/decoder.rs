use std::{
    fmt,
    io::{Error as IoError, Read},
};

use glam::Vec2;
use serde::Deserialize;
use tracing::warn;

use super::*;

/// Flip bits in the top three bits of a raw 32-bit tile id.
const FLIPPED_HORIZONTALLY_FLAG: u32 = 0x8000_0000;
const FLIPPED_VERTICALLY_FLAG: u32 = 0x4000_0000;
const FLIPPED_DIAGONALLY_FLAG: u32 = 0x2000_0000;
const FLIP_MASK: u32 =
    FLIPPED_HORIZONTALLY_FLAG | FLIPPED_VERTICALLY_FLAG | FLIPPED_DIAGONALLY_FLAG;

/// Masked global tile ids must fit in 24 bits.
const MAX_GLOBAL_TILE_ID: u32 = 0xFF_FFFF;

/// The editor version this tool understands. Other versions are only warned
/// about.
const SUPPORTED_VERSION: &str = "1.0";

const BACKGROUND_OBJECT_GROUP: &str = "BackgroundObjectLayer";
const FOREGROUND_OBJECT_GROUP: &str = "ForegroundObjectLayer";

/// The maximum number of tile layers the binary format can name.
const MAX_LAYER_COUNT: usize = 255;

/// Map dimensions are encoded as int16 and must stay strictly positive.
const MAX_MAP_DIMENSION: u32 = i16::MAX as u32;

#[derive(Debug)]
pub enum DecodeError {
    IoError(IoError),
    Xml(quick_xml::DeError),
    InvalidWidth(u32),
    InvalidHeight(u32),
    InvalidOrientation(String),
    InvalidRenderOrder(String),
    InvalidTileSize { width: u32, height: u32 },
    InvalidLayerCount(usize),
    NoTilesets,
    UnknownTilesetName(String),
    UnknownObjectGroup(String),
    DuplicateObjectGroup(String),
    TileCountMismatch { layer: String, expected: usize, actual: usize },
    ParseTileId { layer: String, token: String },
    TileIdTooLarge { layer: String, id: u32 },
    UnresolvedTileId { id: u32 },
}

impl std::error::Error for DecodeError {}

impl From<IoError> for DecodeError {
    fn from(error: IoError) -> Self {
        DecodeError::IoError(error)
    }
}

impl From<quick_xml::DeError> for DecodeError {
    fn from(error: quick_xml::DeError) -> Self {
        DecodeError::Xml(error)
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::IoError(e) => write!(f, "IO error: {e}"),
            DecodeError::Xml(e) => write!(f, "malformed map file: {e}"),
            DecodeError::InvalidWidth(w) => write!(f, "invalid tilemap width: {w}"),
            DecodeError::InvalidHeight(h) => write!(f, "invalid tilemap height: {h}"),
            DecodeError::InvalidOrientation(o) => write!(f, "invalid orientation: {o:?}"),
            DecodeError::InvalidRenderOrder(r) => write!(f, "invalid render order: {r:?}"),
            DecodeError::InvalidTileSize { width, height } => {
                write!(f, "invalid tile size: {width}x{height}")
            }
            DecodeError::InvalidLayerCount(count) => write!(f, "invalid layer count: {count}"),
            DecodeError::NoTilesets => write!(f, "no tileset detected"),
            DecodeError::UnknownTilesetName(name) => write!(
                f,
                "the tileset name {name:?} is not allowed and must be \
                 'environment', 'decoration' or 'spawn'"
            ),
            DecodeError::UnknownObjectGroup(name) => write!(
                f,
                "the object group name {name:?} is not allowed and must be \
                 {BACKGROUND_OBJECT_GROUP:?} or {FOREGROUND_OBJECT_GROUP:?}"
            ),
            DecodeError::DuplicateObjectGroup(name) => {
                write!(f, "multiple object groups with name {name:?} found")
            }
            DecodeError::TileCountMismatch { layer, expected, actual } => write!(
                f,
                "unexpected data in layer {layer:?}: tile count {actual} \
                 doesn't match map size {expected}"
            ),
            DecodeError::ParseTileId { layer, token } => write!(
                f,
                "unexpected data in layer {layer:?}: failed to parse tile number {token:?}"
            ),
            DecodeError::TileIdTooLarge { layer, id } => write!(
                f,
                "unexpected data in layer {layer:?}: tile id {id} is invalid (additional flag?)"
            ),
            DecodeError::UnresolvedTileId { id } => {
                write!(f, "tile id {id} does not belong to any tileset")
            }
        }
    }
}

/// Raw `<map>` document as written by the editor. Attributes are picked apart
/// and validated before anything else looks at them.
#[derive(Debug, Deserialize)]
struct RawMap {
    #[serde(rename = "@version")]
    version: String,
    #[serde(rename = "@orientation")]
    orientation: String,
    #[serde(rename = "@renderorder")]
    render_order: String,
    #[serde(rename = "@width")]
    width: u32,
    #[serde(rename = "@height")]
    height: u32,
    #[serde(rename = "@tilewidth")]
    tile_width: u32,
    #[serde(rename = "@tileheight")]
    tile_height: u32,
    #[serde(rename = "tileset", default)]
    tilesets: Vec<RawTileset>,
    #[serde(rename = "layer", default)]
    layers: Vec<RawLayer>,
    #[serde(rename = "objectgroup", default)]
    object_groups: Vec<RawObjectGroup>,
}

#[derive(Debug, Deserialize)]
struct RawTileset {
    #[serde(rename = "@firstgid")]
    first_gid: u32,
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "@tilewidth")]
    tile_width: u32,
    #[serde(rename = "@tileheight")]
    tile_height: u32,
    #[serde(rename = "@tilecount")]
    tile_count: u32,
    #[serde(rename = "@columns", default)]
    columns: u32,
}

#[derive(Debug, Deserialize)]
struct RawLayer {
    #[serde(rename = "@name")]
    name: String,
    data: RawData,
}

#[derive(Debug, Deserialize)]
struct RawData {
    #[serde(rename = "$text")]
    text: String,
}

#[derive(Debug, Deserialize)]
struct RawObjectGroup {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "object", default)]
    objects: Vec<RawObject>,
}

#[derive(Debug, Deserialize)]
struct RawObject {
    #[serde(rename = "@gid", default)]
    gid: u32,
    #[serde(rename = "@x")]
    x: f32,
    #[serde(rename = "@y")]
    y: f32,
    #[serde(rename = "@width", default)]
    width: f32,
    #[serde(rename = "@height", default)]
    height: f32,
    #[serde(rename = "@rotation", default)]
    rotation: f32,
}

pub struct Decoder<R>
where
    R: Read,
{
    reader: R,
}

impl<R: Read> Decoder<R> {
    pub fn new(reader: R) -> Self {
        Decoder { reader }
    }

    /// Reads a `.tmx` document and produces a validated [`TileMap`]: the
    /// structure is checked, every tileset gets a kind, and every layer's CSV
    /// payload is decoded into resolved [`Tile`] values.
    pub fn decode(&mut self) -> Result<TileMap, DecodeError> {
        let mut source = String::new();
        self.reader.read_to_string(&mut source)?;

        let raw: RawMap = quick_xml::de::from_str(&source)?;
        validate_structure(&raw)?;

        let mut tilesets = Vec::with_capacity(raw.tilesets.len());
        for raw_tileset in &raw.tilesets {
            let kind = TilesetKind::from_name(&raw_tileset.name)
                .ok_or_else(|| DecodeError::UnknownTilesetName(raw_tileset.name.clone()))?;
            tilesets.push(Tileset {
                first_gid: raw_tileset.first_gid,
                name: raw_tileset.name.clone(),
                tile_width: raw_tileset.tile_width,
                tile_height: raw_tileset.tile_height,
                tile_count: raw_tileset.tile_count,
                columns: raw_tileset.columns,
                kind,
            });
        }
        tilesets.sort_by_key(|tileset| tileset.first_gid);

        let expected_tile_count = raw.width as usize * raw.height as usize;
        let mut layers = Vec::with_capacity(raw.layers.len());
        for raw_layer in &raw.layers {
            layers.push(decode_layer(raw_layer, expected_tile_count, &tilesets)?);
        }

        let mut background_objects = None;
        let mut foreground_objects = None;
        for group in &raw.object_groups {
            let slot = match group.name.as_str() {
                BACKGROUND_OBJECT_GROUP => &mut background_objects,
                FOREGROUND_OBJECT_GROUP => &mut foreground_objects,
                _ => return Err(DecodeError::UnknownObjectGroup(group.name.clone())),
            };
            if slot.is_some() {
                return Err(DecodeError::DuplicateObjectGroup(group.name.clone()));
            }
            *slot = Some(decode_objects(group, &tilesets)?);
        }

        Ok(TileMap {
            version: raw.version,
            width: raw.width,
            height: raw.height,
            tilesets,
            layers,
            background_objects: background_objects.unwrap_or_default(),
            foreground_objects: foreground_objects.unwrap_or_default(),
        })
    }
}

fn validate_structure(raw: &RawMap) -> Result<(), DecodeError> {
    if raw.version != SUPPORTED_VERSION {
        warn!(
            "the map file was stored with an unsupported version: {:?}",
            raw.version
        );
    }
    if raw.width < 1 || raw.width > MAX_MAP_DIMENSION {
        return Err(DecodeError::InvalidWidth(raw.width));
    }
    if raw.height < 1 || raw.height > MAX_MAP_DIMENSION {
        return Err(DecodeError::InvalidHeight(raw.height));
    }
    if raw.orientation != "orthogonal" {
        return Err(DecodeError::InvalidOrientation(raw.orientation.clone()));
    }
    if raw.render_order != "right-down" {
        return Err(DecodeError::InvalidRenderOrder(raw.render_order.clone()));
    }
    if raw.tile_width != TILE_PIXEL_SIZE || raw.tile_height != TILE_PIXEL_SIZE {
        return Err(DecodeError::InvalidTileSize {
            width: raw.tile_width,
            height: raw.tile_height,
        });
    }
    if raw.layers.is_empty() || raw.layers.len() > MAX_LAYER_COUNT {
        return Err(DecodeError::InvalidLayerCount(raw.layers.len()));
    }
    if raw.tilesets.is_empty() {
        return Err(DecodeError::NoTilesets);
    }
    Ok(())
}

/// Decodes a layer's CSV payload. Separators are commas, line feeds and
/// carriage returns; each token is a raw 32-bit tile id whose top three bits
/// are the flip flags.
fn decode_layer(
    raw: &RawLayer,
    expected_tile_count: usize,
    tilesets: &[Tileset],
) -> Result<TileLayer, DecodeError> {
    let tokens: Vec<&str> = raw
        .data
        .text
        .split(|c| matches!(c, ',' | '\n' | '\r'))
        .filter(|token| !token.is_empty())
        .collect();

    if tokens.len() != expected_tile_count {
        return Err(DecodeError::TileCountMismatch {
            layer: raw.name.clone(),
            expected: expected_tile_count,
            actual: tokens.len(),
        });
    }

    let mut tiles = Vec::with_capacity(expected_tile_count);
    for token in tokens {
        let value: u32 = token.parse().map_err(|_| DecodeError::ParseTileId {
            layer: raw.name.clone(),
            token: token.to_string(),
        })?;

        let (gid, flags) = split_raw_id(value);
        if gid > MAX_GLOBAL_TILE_ID {
            return Err(DecodeError::TileIdTooLarge {
                layer: raw.name.clone(),
                id: gid,
            });
        }

        let tile = if gid == 0 {
            Tile {
                index: 0,
                flags,
                tileset: None,
            }
        } else {
            let tileset = resolve_tileset(tilesets, gid)?;
            Tile {
                index: gid - tilesets[tileset].first_gid + 1,
                flags,
                tileset: Some(tileset),
            }
        };
        tiles.push(tile);
    }

    Ok(TileLayer {
        name: raw.name.clone(),
        tiles,
    })
}

fn decode_objects(
    group: &RawObjectGroup,
    tilesets: &[Tileset],
) -> Result<Vec<MapObject>, DecodeError> {
    let mut objects = Vec::with_capacity(group.objects.len());
    for raw in &group.objects {
        let (gid, flags) = split_raw_id(raw.gid);
        let tileset = if gid == 0 {
            None
        } else {
            Some(resolve_tileset(tilesets, gid)?)
        };
        objects.push(MapObject {
            index: tileset.map_or(0, |idx| gid - tilesets[idx].first_gid + 1),
            flags,
            tileset,
            position: Vec2::new(raw.x, raw.y),
            size: Vec2::new(raw.width, raw.height),
            rotation: raw.rotation,
        });
    }
    Ok(objects)
}

/// Splits a raw 32-bit cell value into the masked global id and the packed
/// 3-bit flip flags.
fn split_raw_id(value: u32) -> (u32, TileFlags) {
    let mut flags = TileFlags::empty();
    if value & FLIPPED_HORIZONTALLY_FLAG != 0 {
        flags |= TileFlags::FLIP_HORIZONTAL;
    }
    if value & FLIPPED_VERTICALLY_FLAG != 0 {
        flags |= TileFlags::FLIP_VERTICAL;
    }
    if value & FLIPPED_DIAGONALLY_FLAG != 0 {
        flags |= TileFlags::FLIP_DIAGONAL;
    }
    (value & !FLIP_MASK, flags)
}

/// Resolves the tileset owning a global id: the one with the greatest
/// `first_gid` not exceeding it. The id must also fall short of the tileset's
/// end.
fn resolve_tileset(tilesets: &[Tileset], gid: u32) -> Result<usize, DecodeError> {
    let mut found = None;
    for (idx, tileset) in tilesets.iter().enumerate() {
        if gid < tileset.first_gid {
            break;
        }
        found = Some(idx);
    }
    let idx = found.ok_or(DecodeError::UnresolvedTileId { id: gid })?;
    let tileset = &tilesets[idx];
    if gid >= tileset.first_gid + tileset.tile_count {
        return Err(DecodeError::UnresolvedTileId { id: gid });
    }
    Ok(idx)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn minimal_tmx(width: u32, height: u32, layer_csv: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<map version="1.0" orientation="orthogonal" renderorder="right-down" width="{width}" height="{height}" tilewidth="256" tileheight="256">
 <tileset firstgid="1" name="environment" tilewidth="256" tileheight="256" tilecount="48" columns="8"/>
 <tileset firstgid="49" name="spawn" tilewidth="256" tileheight="256" tilecount="300" columns="10"/>
 <layer name="environment" width="{width}" height="{height}">
  <data encoding="csv">
{layer_csv}
  </data>
 </layer>
</map>"#
        )
    }

    fn decode(tmx: &str) -> Result<TileMap, DecodeError> {
        Decoder::new(tmx.as_bytes()).decode()
    }

    #[test]
    fn test_decode_minimal_map() {
        let map = decode(&minimal_tmx(2, 2, "1,2\n49,0")).unwrap();

        assert_eq!(map.width, 2);
        assert_eq!(map.height, 2);
        assert_eq!(map.tilesets.len(), 2);
        assert_eq!(map.tilesets[0].kind, TilesetKind::Environment);
        assert_eq!(map.tilesets[1].kind, TilesetKind::Spawn);
        assert_eq!(map.layers.len(), 1);

        let tiles = &map.layers[0].tiles;
        assert_eq!(tiles.len(), 4);
        assert_eq!(tiles[0].index, 1);
        assert_eq!(tiles[0].tileset, Some(0));
        assert_eq!(tiles[1].index, 2);
        // Gid 49 is the first tile of the spawn tileset, so its local id is 1.
        assert_eq!(tiles[2].index, 1);
        assert_eq!(tiles[2].tileset, Some(1));
        assert!(tiles[3].is_empty());
        assert_eq!(tiles[3].tileset, None);
    }

    #[test]
    fn test_decode_flip_flags() {
        let raw = 1u32 | 0x8000_0000 | 0x2000_0000;
        let map = decode(&minimal_tmx(2, 2, &format!("{raw},0,0,0"))).unwrap();

        let tile = map.layers[0].tiles[0];
        assert_eq!(tile.index, 1);
        assert_eq!(
            tile.flags,
            TileFlags::FLIP_HORIZONTAL | TileFlags::FLIP_DIAGONAL
        );
    }

    #[test]
    fn test_decode_rejects_oversized_width() {
        // Grid coordinates must fit in an int16.
        assert!(matches!(
            decode(&minimal_tmx(40000, 8, "0")),
            Err(DecodeError::InvalidWidth(40000))
        ));
    }

    #[test]
    fn test_decode_rejects_wrong_orientation() {
        let tmx = minimal_tmx(2, 2, "0,0,0,0").replace("orthogonal", "isometric");
        assert!(matches!(
            decode(&tmx),
            Err(DecodeError::InvalidOrientation(_))
        ));
    }

    #[test]
    fn test_decode_rejects_wrong_tile_size() {
        let tmx = minimal_tmx(2, 2, "0,0,0,0").replace("tilewidth=\"256\"", "tilewidth=\"128\"");
        assert!(matches!(
            decode(&tmx),
            Err(DecodeError::InvalidTileSize { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_unknown_tileset_name() {
        let tmx = minimal_tmx(2, 2, "0,0,0,0").replace("\"spawn\"", "\"props\"");
        assert!(matches!(
            decode(&tmx),
            Err(DecodeError::UnknownTilesetName(_))
        ));
    }

    #[test]
    fn test_decode_rejects_tile_count_mismatch() {
        assert!(matches!(
            decode(&minimal_tmx(2, 2, "0,0,0")),
            Err(DecodeError::TileCountMismatch { expected: 4, actual: 3, .. })
        ));
    }

    #[test]
    fn test_decode_rejects_bad_token() {
        assert!(matches!(
            decode(&minimal_tmx(2, 2, "0,zero,0,0")),
            Err(DecodeError::ParseTileId { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_unresolved_gid() {
        // Beyond the spawn tileset's last gid (348).
        assert!(matches!(
            decode(&minimal_tmx(2, 2, "0,349,0,0")),
            Err(DecodeError::UnresolvedTileId { id: 349 })
        ));
    }

    #[test]
    fn test_decode_accepts_unsupported_version() {
        // Only warns.
        let tmx = minimal_tmx(2, 2, "0,0,0,0").replace("version=\"1.0\"", "version=\"1.4\"");
        assert!(decode(&tmx).is_ok());
    }

    #[test]
    fn test_decode_object_groups() {
        let tmx = r#"<?xml version="1.0" encoding="UTF-8"?>
<map version="1.0" orientation="orthogonal" renderorder="right-down" width="1" height="1" tilewidth="256" tileheight="256">
 <tileset firstgid="1" name="decoration" tilewidth="128" tileheight="128" tilecount="64" columns="8"/>
 <layer name="environment" width="1" height="1">
  <data encoding="csv">0</data>
 </layer>
 <objectgroup name="BackgroundObjectLayer">
  <object id="1" gid="5" x="384" y="640" width="128" height="256" rotation="90"/>
 </objectgroup>
</map>"#;
        let map = decode(tmx).unwrap();

        assert_eq!(map.background_objects.len(), 1);
        assert!(map.foreground_objects.is_empty());

        let object = map.background_objects[0];
        assert_eq!(object.index, 5);
        assert_eq!(object.tileset, Some(0));
        assert_eq!(object.position, Vec2::new(384., 640.));
        assert_eq!(object.size, Vec2::new(128., 256.));
        assert_eq!(object.rotation, 90.);
    }

    #[test]
    fn test_decode_rejects_unknown_object_group() {
        let tmx = r#"<?xml version="1.0" encoding="UTF-8"?>
<map version="1.0" orientation="orthogonal" renderorder="right-down" width="1" height="1" tilewidth="256" tileheight="256">
 <tileset firstgid="1" name="environment" tilewidth="256" tileheight="256" tilecount="48" columns="8"/>
 <layer name="environment" width="1" height="1">
  <data encoding="csv">0</data>
 </layer>
 <objectgroup name="Markers"/>
</map>"#;
        assert!(matches!(
            decode(tmx),
            Err(DecodeError::UnknownObjectGroup(_))
        ));
    }
}

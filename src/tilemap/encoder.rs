use std::{
    fmt,
    io::{BufWriter, Write},
};

use glam::{IVec2, Vec2};
use tracing::warn;

use crate::border::SortedBorderLines;
use crate::spawn::{Player, SpawnInfo};

use super::*;

const MAGIC_START: u8 = 0xA5;
const FORMAT_VERSION: u8 = 0x02;
const MAGIC_LAYERS_END: u8 = 0xAA;
const MAGIC_OBJECTS_END: u8 = 0x99;
const MAGIC_RESOURCES_END: u8 = 0x5A;
const MAGIC_WATERDROPS_END: u8 = 0xFF;
const MAGIC_PLAYERS_END: u8 = 0xA5;
const MAGIC_END: u8 = 0x55;

/// Object coordinates are stored as fixed-point int32; the loader divides by
/// this scale to recover the float.
const FIXED_POINT_SCALE: f32 = 1000.;

#[derive(Debug)]
pub enum EncodeError {
    IoError(std::io::Error),
    Layer(LayerError),
    MixedTilesetKinds { layer: String, tile: usize },
    ValueOutOfRange {
        field: &'static str,
        value: i64,
        position: Option<IVec2>,
    },
    ObjectWithoutTileset { object: usize },
    ObjectWrongTileset { object: usize, tileset: String },
    ObjectDiagonalFlip { object: usize },
}

impl std::error::Error for EncodeError {}

impl From<std::io::Error> for EncodeError {
    fn from(err: std::io::Error) -> Self {
        EncodeError::IoError(err)
    }
}

impl From<LayerError> for EncodeError {
    fn from(err: LayerError) -> Self {
        EncodeError::Layer(err)
    }
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodeError::IoError(e) => write!(f, "IO error: {e}"),
            EncodeError::Layer(e) => write!(f, "{e}"),
            EncodeError::MixedTilesetKinds { layer, tile } => write!(
                f,
                "the tile {tile} in layer {layer:?} can't be encoded: all \
                 tiles within a layer must come from the same tileset"
            ),
            EncodeError::ValueOutOfRange {
                field,
                value,
                position: Some(position),
            } => write!(
                f,
                "{field} can't be encoded (value {value} out of range) at \
                 x={}, y={}",
                position.x, position.y
            ),
            EncodeError::ValueOutOfRange {
                field,
                value,
                position: None,
            } => write!(f, "{field} can't be encoded (value {value} out of range)"),
            EncodeError::ObjectWithoutTileset { object } => {
                write!(f, "the object {object} can't be encoded: no valid tileset")
            }
            EncodeError::ObjectWrongTileset { object, tileset } => write!(
                f,
                "unsupported tileset {tileset:?} for object {object}: only the \
                 decoration tileset can be used on object layers"
            ),
            EncodeError::ObjectDiagonalFlip { object } => write!(
                f,
                "unable to encode object {object}: the diagonal-flip flag is \
                 not allowed on objects, such flips can always be expressed \
                 with x/y flips and rotations"
            ),
        }
    }
}

/// Writes a tilemap and everything extracted from it as a framed
/// little-endian `.tilemap` stream.
///
/// The encoder expects the spawn layer to have been removed from the layer
/// list already; the stored layer count is the count it sees.
pub struct Encoder<W: Write> {
    writer: BufWriter<W>,
}

impl<W: Write> Encoder<W> {
    pub fn new(writer: W) -> Self {
        Encoder {
            writer: BufWriter::new(writer),
        }
    }

    pub fn encode(
        &mut self,
        tilemap: &TileMap,
        spawns: &SpawnInfo,
        borders: &SortedBorderLines,
    ) -> Result<(), EncodeError> {
        self.writer.write_all(&[MAGIC_START, FORMAT_VERSION])?;
        self.write_i16("map width", tilemap.width as i64, None)?;
        self.write_i16("map height", tilemap.height as i64, None)?;
        self.write_u8("layer count", tilemap.layers.len() as i64, None)?;

        // The layers are stored in reversed order, and so is the index
        // naming the environment layer.
        let environment_idx = tilemap.layer_index(ENVIRONMENT_LAYER_NAME)?;
        self.write_u8(
            "environment layer index",
            (tilemap.layers.len() - 1 - environment_idx) as i64,
            None,
        )?;

        for layer in tilemap.layers.iter().rev() {
            self.encode_layer(tilemap, layer)?;
        }
        self.writer.write_all(&[MAGIC_LAYERS_END])?;

        self.encode_objects(tilemap, &tilemap.background_objects)?;
        self.encode_objects(tilemap, &tilemap.foreground_objects)?;
        self.writer.write_all(&[MAGIC_OBJECTS_END])?;

        self.write_u8("resource point count", spawns.resources.len() as i64, None)?;
        for resource in &spawns.resources {
            self.write_position("resource point", resource.position)?;
            self.writer.write_all(&[resource.flags.bits()])?;
        }
        self.writer.write_all(&[MAGIC_RESOURCES_END])?;

        self.write_u8(
            "water drop source count",
            spawns.waterdrops.len() as i64,
            None,
        )?;
        for source in &spawns.waterdrops {
            self.write_position("water drop source", source.position)?;
            self.writer.write_all(&[source.flags.bits()])?;
        }
        self.writer.write_all(&[MAGIC_WATERDROPS_END])?;

        self.write_u8("player count", spawns.players.len() as i64, None)?;
        for player in &spawns.players {
            self.encode_player(player)?;
        }
        self.writer.write_all(&[MAGIC_PLAYERS_END])?;

        self.encode_borders(borders)?;
        self.writer.write_all(&[MAGIC_END])?;

        // The caller may drop us right after; everything must have reached
        // the sink by then.
        self.writer.flush()?;
        Ok(())
    }

    fn encode_layer(&mut self, tilemap: &TileMap, layer: &TileLayer) -> Result<(), EncodeError> {
        let kind = probe_layer_kind(tilemap, layer);
        self.writer.write_all(&[u8::from(kind)])?;

        for (i, tile) in layer.tiles.iter().enumerate() {
            if !tile.is_empty() && tilemap.tileset_of(tile).map(|t| t.kind) != Some(kind) {
                return Err(EncodeError::MixedTilesetKinds {
                    layer: layer.name.clone(),
                    tile: i,
                });
            }

            let position = IVec2::new(
                (i % tilemap.width as usize) as i32,
                (i / tilemap.width as usize) as i32,
            );
            self.writer.write_all(&[tile.flags.bits()])?;
            self.write_u8("tile index", tile.index as i64, Some(position))?;
        }
        Ok(())
    }

    fn encode_objects(
        &mut self,
        tilemap: &TileMap,
        objects: &[MapObject],
    ) -> Result<(), EncodeError> {
        self.write_i16("object count", objects.len() as i64, None)?;

        for (i, object) in objects.iter().enumerate() {
            let tileset = object
                .tileset
                .map(|idx| &tilemap.tilesets[idx])
                .ok_or(EncodeError::ObjectWithoutTileset { object: i })?;
            if tileset.kind != TilesetKind::Decoration {
                return Err(EncodeError::ObjectWrongTileset {
                    object: i,
                    tileset: tileset.name.clone(),
                });
            }

            self.write_u8("object tile index", object.index as i64, None)?;

            // The editor anchors tile objects at the bottom-left corner; the
            // game wants the center, in cells. The half extents rotate with
            // the object, and the object's y axis points up.
            let half = object.size / 2.;
            let (sin, cos) = (-object.rotation).to_radians().sin_cos();
            let center = Vec2::new(
                object.position.x + (half.x * cos - half.y * sin),
                object.position.y - (half.x * sin + half.y * cos),
            );

            let mut size = object.size;
            if object.flags.contains(TileFlags::FLIP_HORIZONTAL) {
                size.x = -size.x;
            }
            if object.flags.contains(TileFlags::FLIP_VERTICAL) {
                size.y = -size.y;
            }
            if object.flags.contains(TileFlags::FLIP_DIAGONAL) {
                return Err(EncodeError::ObjectDiagonalFlip { object: i });
            }

            self.write_fixed_point(center.x / tileset.tile_width as f32)?;
            self.write_fixed_point(center.y / tileset.tile_width as f32)?;
            self.write_fixed_point(size.x / tileset.tile_height as f32)?;
            self.write_fixed_point(size.y / tileset.tile_height as f32)?;
            self.write_fixed_point(object.rotation)?;
        }
        Ok(())
    }

    fn encode_player(&mut self, player: &Player) -> Result<(), EncodeError> {
        self.write_u8("building count", player.buildings.len() as i64, None)?;
        for building in &player.buildings {
            self.writer.write_all(&[u8::from(building.kind)])?;
            self.write_position("building", building.position)?;
            self.writer.write_all(&[building.flags.bits()])?;
        }

        self.write_u8("unit count", player.units.len() as i64, None)?;
        for unit in &player.units {
            self.writer.write_all(&[u8::from(unit.kind)])?;
            self.write_position("unit", unit.position)?;
        }
        Ok(())
    }

    fn encode_borders(&mut self, borders: &SortedBorderLines) -> Result<(), EncodeError> {
        let buckets = [
            ("left border count", &borders.left),
            ("right border count", &borders.right),
            ("up border count", &borders.up),
            ("down border count", &borders.down),
            ("up-left border count", &borders.up_left),
            ("up-right border count", &borders.up_right),
            ("down-left border count", &borders.down_left),
            ("down-right border count", &borders.down_right),
        ];

        for (field, lines) in buckets {
            self.write_i16(field, lines.len() as i64, None)?;
        }
        for (_, lines) in buckets {
            for line in lines {
                self.write_position("border line", line.start)?;
                self.write_i16("border line length", line.length as i64, Some(line.start))?;
            }
        }
        Ok(())
    }

    fn write_position(&mut self, entity: &'static str, position: IVec2) -> Result<(), EncodeError> {
        self.write_i16(entity, position.x as i64, Some(position))?;
        self.write_i16(entity, position.y as i64, Some(position))?;
        Ok(())
    }

    fn write_u8(
        &mut self,
        field: &'static str,
        value: i64,
        position: Option<IVec2>,
    ) -> Result<(), EncodeError> {
        if !(0..=0xFF).contains(&value) {
            return Err(EncodeError::ValueOutOfRange {
                field,
                value,
                position,
            });
        }
        self.writer.write_all(&[value as u8])?;
        Ok(())
    }

    fn write_i16(
        &mut self,
        field: &'static str,
        value: i64,
        position: Option<IVec2>,
    ) -> Result<(), EncodeError> {
        if value < i16::MIN as i64 || value > i16::MAX as i64 {
            return Err(EncodeError::ValueOutOfRange {
                field,
                value,
                position,
            });
        }
        self.writer.write_all(&(value as i16).to_le_bytes())?;
        Ok(())
    }

    fn write_fixed_point(&mut self, value: f32) -> Result<(), EncodeError> {
        let scaled = (value * FIXED_POINT_SCALE).round() as i32;
        self.writer.write_all(&scaled.to_le_bytes())?;
        Ok(())
    }
}

/// Determines a layer's tileset kind from its first occupied tile. A
/// completely empty layer carries no information and is stored as
/// decoration.
fn probe_layer_kind(tilemap: &TileMap, layer: &TileLayer) -> TilesetKind {
    for tile in &layer.tiles {
        if !tile.is_empty() {
            if let Some(tileset) = tilemap.tileset_of(tile) {
                return tileset.kind;
            }
        }
    }
    warn!(
        "the layer {:?} is completely empty and should be removed",
        layer.name
    );
    TilesetKind::Decoration
}

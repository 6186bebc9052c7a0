mod decoder;
mod encoder;

use std::fmt;

use bitflags::bitflags;
use glam::{IVec2, Vec2};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::Serialize;

pub use decoder::{DecodeError, Decoder};
pub use encoder::{EncodeError, Encoder};

/// The fixed tile size maps must be authored at, in pixels.
pub const TILE_PIXEL_SIZE: u32 = 256;

/// First local tile id that names a diagonal (half-solid) tile. Smaller
/// non-zero ids are completely solid.
pub const FIRST_DIAGONAL_TILE_ID: u32 = 6 * 8 + 1;

/// Name of the terrain layer that collision borders are computed from.
pub const ENVIRONMENT_LAYER_NAME: &str = "environment";

/// Name of the layer whose tiles encode gameplay entities instead of terrain.
pub const SPAWN_LAYER_NAME: &str = "spawn";

/// A tile map parsed from a `.tmx` file, with layer data decoded into [`Tile`]
/// values and every tileset assigned a [`TilesetKind`].
#[derive(Clone, Debug, Serialize)]
pub struct TileMap {
    pub version: String,
    pub width: u32,
    pub height: u32,
    pub tilesets: Vec<Tileset>,
    pub layers: Vec<TileLayer>,
    /// Objects drawn behind the tile layers. Empty if the map has no
    /// `BackgroundObjectLayer` group.
    pub background_objects: Vec<MapObject>,
    /// Objects drawn in front of the tile layers.
    pub foreground_objects: Vec<MapObject>,
}

impl TileMap {
    /// Returns the index of the layer with the given name. The name must match
    /// exactly one layer.
    pub fn layer_index(&self, name: &str) -> Result<usize, LayerError> {
        let mut found = None;
        for (idx, layer) in self.layers.iter().enumerate() {
            if layer.name != name {
                continue;
            }
            if found.is_some() {
                return Err(LayerError::Duplicate(name.to_string()));
            }
            found = Some(idx);
        }
        found.ok_or_else(|| LayerError::NotFound(name.to_string()))
    }

    /// Returns the tileset a tile was resolved against, if any.
    pub fn tileset_of(&self, tile: &Tile) -> Option<&Tileset> {
        tile.tileset.map(|idx| &self.tilesets[idx])
    }
}

impl fmt::Display for TileMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Version:     {}", self.version)?;
        writeln!(f, "Size:        {}x{}", self.width, self.height)?;
        writeln!(f, "Layer count: {}", self.layers.len())?;
        write!(f, "Tilesets:")?;
        for (i, tileset) in self.tilesets.iter().enumerate() {
            write!(
                f,
                "\n\tTileset {i}: {:?}, firstgid={}, count={}",
                tileset.name, tileset.first_gid, tileset.tile_count
            )?;
        }
        write!(f, "\nLayers:")?;
        for (i, layer) in self.layers.iter().enumerate() {
            write!(f, "\n\tLayer {i}: {:?}", layer.name)?;
        }
        Ok(())
    }
}

#[derive(Debug)]
pub enum LayerError {
    NotFound(String),
    Duplicate(String),
}

impl std::error::Error for LayerError {}

impl fmt::Display for LayerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayerError::NotFound(name) => write!(f, "no layer with name {name:?} found"),
            LayerError::Duplicate(name) => write!(f, "multiple layers with name {name:?} found"),
        }
    }
}

/// A contiguous range of global tile ids mapping to one tile image atlas.
#[derive(Clone, Debug, Serialize)]
pub struct Tileset {
    pub first_gid: u32,
    pub name: String,
    pub tile_width: u32,
    pub tile_height: u32,
    pub tile_count: u32,
    pub columns: u32,
    pub kind: TilesetKind,
}

/// The role a tileset plays in the game, assigned from its name.
#[derive(
    Clone, Copy, Debug, Eq, PartialEq, Serialize, IntoPrimitive, TryFromPrimitive,
)]
#[repr(u8)]
pub enum TilesetKind {
    Environment = 0,
    Decoration = 1,
    Spawn = 2,
}

impl TilesetKind {
    /// Maps a tileset name (case-insensitive) to its kind.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "environment" => Some(TilesetKind::Environment),
            "decoration" => Some(TilesetKind::Decoration),
            "spawn" => Some(TilesetKind::Spawn),
            _ => None,
        }
    }
}

/// A `width * height` grid of tiles drawn from the map's tilesets.
#[derive(Clone, Debug, Serialize)]
pub struct TileLayer {
    pub name: String,
    pub tiles: Vec<Tile>,
}

impl TileLayer {
    /// Returns the tile at the given position, or `None` if the position lies
    /// outside the map.
    pub fn tile_at(&self, x: i32, y: i32, width: u32, height: u32) -> Option<Tile> {
        if x < 0 || x >= width as i32 || y < 0 || y >= height as i32 {
            return None;
        }
        self.tiles.get(y as usize * width as usize + x as usize).copied()
    }
}

/// An object placed on one of the optional object layers. Position and size
/// are in pixels; Tiled anchors tile objects at their bottom-left corner.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct MapObject {
    /// 1-based local tile id within the owning tileset, 0 if the object
    /// carries no tile.
    pub index: u32,
    pub flags: TileFlags,
    pub tileset: Option<usize>,
    pub position: Vec2,
    pub size: Vec2,
    /// Clockwise rotation in degrees.
    pub rotation: f32,
}

bitflags! {
    /// The three flip bits of a tile, together encoding one of the eight
    /// rigid 2D transforms (four rotations, mirrored or not).
    #[repr(transparent)]
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize)]
    pub struct TileFlags: u8 {
        const FLIP_HORIZONTAL = 1 << 0;
        const FLIP_VERTICAL = 1 << 1;
        const FLIP_DIAGONAL = 1 << 2;
    }
}

/// A single cell of a tile layer.
///
/// `index` is the 1-based local id within the owning tileset; 0 means the
/// cell is empty and `tileset` is `None`.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct Tile {
    pub index: u32,
    pub flags: TileFlags,
    /// Index into [`TileMap::tilesets`].
    pub tileset: Option<usize>,
}

/// Which part of a tile's cell is solid.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum TileShape {
    /// The cell is empty and completely accessible.
    Accessible,
    /// The whole cell is solid.
    Solid,
    SolidUpperLeft,
    SolidUpperRight,
    SolidLowerLeft,
    SolidLowerRight,
}

/// One of the eight directions a border can point. The first four are the
/// cardinal sides of a tile.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum Orientation {
    Left,
    Right,
    Up,
    Down,
    UpLeft,
    UpRight,
    DownLeft,
    DownRight,
}

impl Orientation {
    #[inline]
    pub fn is_diagonal(self) -> bool {
        matches!(
            self,
            Orientation::UpLeft
                | Orientation::UpRight
                | Orientation::DownLeft
                | Orientation::DownRight
        )
    }

    /// Returns the opposite direction.
    pub fn inverted(self) -> Self {
        match self {
            Orientation::Left => Orientation::Right,
            Orientation::Right => Orientation::Left,
            Orientation::Up => Orientation::Down,
            Orientation::Down => Orientation::Up,
            Orientation::UpLeft => Orientation::DownRight,
            Orientation::UpRight => Orientation::DownLeft,
            Orientation::DownLeft => Orientation::UpRight,
            Orientation::DownRight => Orientation::UpLeft,
        }
    }
}

impl Tile {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.index == 0
    }

    #[inline]
    pub fn is_diagonal(&self) -> bool {
        self.index >= FIRST_DIAGONAL_TILE_ID
    }

    #[inline]
    pub fn is_solid(&self) -> bool {
        !self.is_empty() && !self.is_diagonal()
    }

    /// Classifies the tile into its shape. For diagonal tiles the solid half
    /// depends on the flip flags.
    pub fn shape(&self) -> TileShape {
        if self.is_empty() {
            return TileShape::Accessible;
        }
        if !self.is_diagonal() {
            return TileShape::Solid;
        }

        const FLAG_LOOKUP: [TileShape; 8] = [
            TileShape::SolidUpperLeft,
            TileShape::SolidUpperRight,
            TileShape::SolidLowerLeft,
            TileShape::SolidLowerRight,
            TileShape::SolidLowerRight,
            TileShape::SolidUpperRight,
            TileShape::SolidLowerLeft,
            TileShape::SolidUpperLeft,
        ];
        FLAG_LOOKUP[(self.flags.bits() & 0x07) as usize]
    }

    /// Returns the unit vector that points upwards in the tile's own frame.
    /// A tile rotated 90 degrees clockwise yields `(1, 0)`.
    pub fn up_vector(&self) -> IVec2 {
        match self.flags.bits() & 0x07 {
            0 => IVec2::new(0, -1), // up
            1 => IVec2::new(-1, 0), // left
            2 => IVec2::new(1, 0),  // right
            3 => IVec2::new(0, 1),  // down
            4 => IVec2::new(0, 1),  // down
            5 => IVec2::new(1, 0),  // right
            6 => IVec2::new(-1, 0), // left
            7 => IVec2::new(0, -1), // up
            _ => unreachable!("flags are masked to three bits"),
        }
    }

    /// The 90-degrees-clockwise rotation of [`Tile::up_vector`].
    #[inline]
    pub fn right_vector(&self) -> IVec2 {
        let up = self.up_vector();
        IVec2::new(-up.y, up.x)
    }

    /// A tile is mirrored iff an odd number of flip bits is set.
    #[inline]
    pub fn is_mirrored(&self) -> bool {
        (self.flags.bits() & 0x07).count_ones() % 2 == 1
    }

    /// Returns `true` if this tile fills the given side of its cell with a
    /// straight border.
    ///
    /// For the cardinal sides this tells whether the tile's solid part
    /// reaches that edge in full. A diagonal side is only filled by a
    /// diagonal tile whose hypotenuse faces it.
    pub fn has_border_toward(&self, side: Orientation) -> bool {
        match self.shape() {
            TileShape::Accessible => false,
            TileShape::Solid => !side.is_diagonal(),
            TileShape::SolidUpperLeft => matches!(
                side,
                Orientation::Left | Orientation::Up | Orientation::DownRight
            ),
            TileShape::SolidUpperRight => matches!(
                side,
                Orientation::Right | Orientation::Up | Orientation::DownLeft
            ),
            TileShape::SolidLowerLeft => matches!(
                side,
                Orientation::Left | Orientation::Down | Orientation::UpRight
            ),
            TileShape::SolidLowerRight => matches!(
                side,
                Orientation::Right | Orientation::Down | Orientation::UpLeft
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn tile(index: u32, flags: u8) -> Tile {
        Tile {
            index,
            flags: TileFlags::from_bits_truncate(flags),
            tileset: None,
        }
    }

    #[test]
    fn test_shape_classification() {
        assert_eq!(tile(0, 0).shape(), TileShape::Accessible);
        assert_eq!(tile(1, 0).shape(), TileShape::Solid);
        assert_eq!(tile(48, 5).shape(), TileShape::Solid);

        assert!(tile(0, 0).is_empty());
        assert!(tile(48, 0).is_solid());
        assert!(tile(49, 0).is_diagonal());

        let expected = [
            TileShape::SolidUpperLeft,
            TileShape::SolidUpperRight,
            TileShape::SolidLowerLeft,
            TileShape::SolidLowerRight,
            TileShape::SolidLowerRight,
            TileShape::SolidUpperRight,
            TileShape::SolidLowerLeft,
            TileShape::SolidUpperLeft,
        ];
        for (flags, shape) in expected.into_iter().enumerate() {
            assert_eq!(tile(FIRST_DIAGONAL_TILE_ID, flags as u8).shape(), shape);
        }
    }

    #[test]
    fn test_up_vector_is_unit_and_right_vector_is_rotated() {
        for flags in 0..8u8 {
            let t = tile(1, flags);
            let up = t.up_vector();
            assert_eq!(up.x.abs() + up.y.abs(), 1, "flags {flags}");

            let right = t.right_vector();
            assert_eq!(right, IVec2::new(-up.y, up.x));
        }
    }

    #[test]
    fn test_orientation_pairs_are_distinct() {
        // The eight flag values must produce eight distinct rigid transforms.
        let mut seen = Vec::new();
        for flags in 0..8u8 {
            let t = tile(1, flags);
            let pair = (t.up_vector(), t.is_mirrored());
            assert!(!seen.contains(&pair), "flags {flags} repeats {pair:?}");
            seen.push(pair);
        }
    }

    #[test]
    fn test_is_mirrored() {
        assert!(!tile(1, 0b000).is_mirrored());
        assert!(tile(1, 0b001).is_mirrored());
        assert!(tile(1, 0b010).is_mirrored());
        assert!(!tile(1, 0b011).is_mirrored());
        assert!(tile(1, 0b100).is_mirrored());
        assert!(!tile(1, 0b101).is_mirrored());
        assert!(!tile(1, 0b110).is_mirrored());
        assert!(tile(1, 0b111).is_mirrored());
    }

    #[test]
    fn test_solid_tile_borders_all_cardinals() {
        let t = tile(1, 0);
        for side in [
            Orientation::Left,
            Orientation::Right,
            Orientation::Up,
            Orientation::Down,
        ] {
            assert!(t.has_border_toward(side));
        }
        for side in [
            Orientation::UpLeft,
            Orientation::UpRight,
            Orientation::DownLeft,
            Orientation::DownRight,
        ] {
            assert!(!t.has_border_toward(side));
        }
    }

    #[test]
    fn test_diagonal_tile_borders() {
        // Flags 2 puts the solid half at the lower left.
        let t = tile(FIRST_DIAGONAL_TILE_ID, 2);
        assert_eq!(t.shape(), TileShape::SolidLowerLeft);
        assert!(t.has_border_toward(Orientation::Left));
        assert!(t.has_border_toward(Orientation::Down));
        assert!(t.has_border_toward(Orientation::UpRight));
        assert!(!t.has_border_toward(Orientation::Right));
        assert!(!t.has_border_toward(Orientation::Up));
        assert!(!t.has_border_toward(Orientation::DownLeft));
    }

    #[test]
    fn test_inverted_orientation() {
        let pairs = [
            (Orientation::Left, Orientation::Right),
            (Orientation::Up, Orientation::Down),
            (Orientation::UpLeft, Orientation::DownRight),
            (Orientation::UpRight, Orientation::DownLeft),
        ];
        for (a, b) in pairs {
            assert_eq!(a.inverted(), b);
            assert_eq!(b.inverted(), a);
        }
    }

    #[test]
    fn test_layer_index() {
        let map = TileMap {
            version: "1.0".to_string(),
            width: 1,
            height: 1,
            tilesets: Vec::new(),
            layers: vec![
                TileLayer {
                    name: "environment".to_string(),
                    tiles: vec![Tile::default()],
                },
                TileLayer {
                    name: "decoration".to_string(),
                    tiles: vec![Tile::default()],
                },
                TileLayer {
                    name: "decoration".to_string(),
                    tiles: vec![Tile::default()],
                },
            ],
            background_objects: Vec::new(),
            foreground_objects: Vec::new(),
        };

        assert_eq!(map.layer_index("environment").unwrap(), 0);
        assert!(matches!(
            map.layer_index("spawn"),
            Err(LayerError::NotFound(_))
        ));
        assert!(matches!(
            map.layer_index("decoration"),
            Err(LayerError::Duplicate(_))
        ));
    }
}

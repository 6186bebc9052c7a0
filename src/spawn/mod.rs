mod extractor;

use glam::IVec2;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::Serialize;

use crate::tilemap::TileFlags;

pub use extractor::{extract, ExtractError};

/// Number of player slots a map can address. Slots without a base building
/// are reduced away after extraction.
pub const PLAYER_SLOTS: usize = 8;

/// Local tile id of a resource-point marker on the spawn tileset.
pub const RESOURCE_POINT_TILE_ID: u32 = 173;

/// Local tile id of a water-drop source marker on the spawn tileset.
pub const WATERDROP_SOURCE_TILE_ID: u32 = 177;

/// Everything the spawn layer encodes: resource points, water-drop sources
/// and the per-player starting inventories.
#[derive(Clone, Debug, Serialize)]
pub struct SpawnInfo {
    pub resources: Vec<ResourcePoint>,
    pub waterdrops: Vec<WaterdropSource>,
    pub players: Vec<Player>,
}

/// A recurring resource spawn location. The flags carry the marker's
/// rotation.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct ResourcePoint {
    pub position: IVec2,
    pub flags: TileFlags,
}

/// A source that continuously spawns water drops falling off the roof.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct WaterdropSource {
    pub position: IVec2,
    pub flags: TileFlags,
}

/// One player's starting inventory.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Player {
    pub buildings: Vec<Building>,
    pub units: Vec<Unit>,
}

/// A unit that spawns at game start.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct Unit {
    pub kind: UnitType,
    pub position: IVec2,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum UnitType {
    Offense = 1,
    Defense = 2,
    LongRange = 3,
    Special = 4,
    Construction = 5,
}

/// A building that spawns at game start. The position is the player token's
/// cell; the flags carry the building's rotation.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct Building {
    pub kind: BuildingType,
    pub position: IVec2,
    pub flags: TileFlags,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum BuildingType {
    Base = 1,
    Pump = 2,
    Factory = 3,
    Turret = 4,
    Bridge = 5,
}

/// What a spawn-layer tile id stands for.
///
/// Buildings take two tiles: a player token naming the owner and
/// orientation, and an adjacent tile naming the building type. The type
/// tiles are listed in [`building_type_for_tile`] and are only meaningful
/// next to a token.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Marker {
    Resource,
    Waterdrop,
    Unit { player: usize, kind: UnitType },
    PlayerToken { player: usize },
}

/// First unit tile id of a player slot. Each slot owns ten consecutive ids;
/// every second slot starts a new tileset row pair, hence the extra stride.
fn player_first_tile_id(player: usize) -> u32 {
    1 + player as u32 * 10 + (player as u32 / 2) * 20
}

/// Classifies a local spawn-tileset tile id. Returns `None` for ids with no
/// marker meaning, including standalone building-type tiles.
pub(crate) fn classify_tile(index: u32) -> Option<Marker> {
    match index {
        RESOURCE_POINT_TILE_ID => return Some(Marker::Resource),
        WATERDROP_SOURCE_TILE_ID => return Some(Marker::Waterdrop),
        _ => {}
    }

    for player in 0..PLAYER_SLOTS {
        let first = player_first_tile_id(player);
        if index < first || index > first + 9 {
            continue;
        }
        let kind = match index - first {
            0 => UnitType::Offense,
            2 => UnitType::Defense,
            4 => UnitType::LongRange,
            6 => UnitType::Special,
            8 => UnitType::Construction,
            9 => return Some(Marker::PlayerToken { player }),
            _ => return None,
        };
        return Some(Marker::Unit { player, kind });
    }
    None
}

/// Maps the tile adjacent to a player token to a building type.
///
/// Factory and Bridge have type codes reserved in the binary format but no
/// marker tile yet.
pub(crate) fn building_type_for_tile(index: u32) -> Option<BuildingType> {
    match index {
        162 => Some(BuildingType::Base),
        234 => Some(BuildingType::Pump),
        238 => Some(BuildingType::Turret),
        _ => None,
    }
}

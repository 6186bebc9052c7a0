use std::fmt;

use glam::IVec2;
use tracing::warn;

use crate::tilemap::{LayerError, TileLayer, TileMap, Tileset, TilesetKind, SPAWN_LAYER_NAME};

use super::*;

#[derive(Debug)]
pub enum ExtractError {
    Layer(LayerError),
    MissingTileset { position: IVec2 },
    WrongTileset { position: IVec2, tileset: String },
    MirroredResource { position: IVec2 },
    RotatedUnit { player: usize, position: IVec2 },
    MirroredToken { position: IVec2 },
    BuildingTileMissing { token: IVec2, position: IVec2 },
    InconsistentBuildingFlags { token: IVec2, building: IVec2 },
    NoBuildingMapping { token: IVec2, position: IVec2 },
    NoResourcePoints,
    UnitsWithoutBase { player: usize },
    BuildingsWithoutBase { player: usize },
    NotEnoughPlayers(usize),
}

impl std::error::Error for ExtractError {}

impl From<LayerError> for ExtractError {
    fn from(error: LayerError) -> Self {
        ExtractError::Layer(error)
    }
}

impl fmt::Display for ExtractError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractError::Layer(e) => write!(f, "{e}"),
            ExtractError::MissingTileset { position } => write!(
                f,
                "invalid map: unknown tileset at x={}, y={}",
                position.x, position.y
            ),
            ExtractError::WrongTileset { position, tileset } => write!(
                f,
                "invalid tileset: the tile at x={}, y={} should be part of the \
                 spawn tileset, but it is part of the tileset {tileset:?}",
                position.x, position.y
            ),
            ExtractError::MirroredResource { position } => write!(
                f,
                "resource points must not be mirrored, only rotations are \
                 allowed (x={}, y={})",
                position.x, position.y
            ),
            ExtractError::RotatedUnit { player, position } => write!(
                f,
                "units must not be mirrored or rotated (player {player}, x={}, y={})",
                position.x, position.y
            ),
            ExtractError::MirroredToken { position } => write!(
                f,
                "buildings must not be mirrored, only rotations are allowed; \
                 the player token at x={}, y={} is mirrored",
                position.x, position.y
            ),
            ExtractError::BuildingTileMissing { token, position } => write!(
                f,
                "invalid map: the player token at x={}, y={} expects a building \
                 tile at x={}, y={}, but that cell is empty or off the map",
                token.x, token.y, position.x, position.y
            ),
            ExtractError::InconsistentBuildingFlags { token, building } => write!(
                f,
                "invalid map: inconsistent tile flags; the player token at \
                 x={}, y={} and the building tile at x={}, y={} must have the \
                 same flags",
                token.x, token.y, building.x, building.y
            ),
            ExtractError::NoBuildingMapping { token, position } => write!(
                f,
                "invalid map: the player token at x={}, y={} indicates a \
                 building spawn, but the tile at x={}, y={} is no valid \
                 building type",
                token.x, token.y, position.x, position.y
            ),
            ExtractError::NoResourcePoints => {
                write!(f, "invalid map: does not contain any resource points")
            }
            ExtractError::UnitsWithoutBase { player } => write!(
                f,
                "invalid map: player {player} has no base building, but has units"
            ),
            ExtractError::BuildingsWithoutBase { player } => write!(
                f,
                "invalid map: player {player} has no base building, but has \
                 other buildings"
            ),
            ExtractError::NotEnoughPlayers(count) => write!(
                f,
                "invalid map: does not contain enough player spawn points \
                 (needed >=2, found {count})"
            ),
        }
    }
}

/// Extracts resource points, water-drop sources and player inventories from
/// the spawn layer, and returns the map with that layer removed. Downstream
/// consumers only ever see the reduced layer list.
pub fn extract(mut tilemap: TileMap) -> Result<(TileMap, SpawnInfo), ExtractError> {
    let layer_idx = tilemap.layer_index(SPAWN_LAYER_NAME)?;
    let layer = tilemap.layers.remove(layer_idx);

    let info = extract_from_layer(tilemap.width, tilemap.height, &layer, &tilemap.tilesets)?;
    Ok((tilemap, info))
}

fn extract_from_layer(
    width: u32,
    height: u32,
    layer: &TileLayer,
    tilesets: &[Tileset],
) -> Result<SpawnInfo, ExtractError> {
    let mut players: Vec<Player> = (0..PLAYER_SLOTS).map(|_| Player::default()).collect();
    let mut resources = Vec::new();
    let mut waterdrops = Vec::new();

    for y in 0..height as i32 {
        for x in 0..width as i32 {
            let position = IVec2::new(x, y);
            let tile = layer
                .tile_at(x, y, width, height)
                .expect("scan stays inside the map");
            if tile.is_empty() {
                continue;
            }

            let tileset_idx = tile
                .tileset
                .ok_or(ExtractError::MissingTileset { position })?;
            let tileset = &tilesets[tileset_idx];
            if tileset.kind != TilesetKind::Spawn {
                return Err(ExtractError::WrongTileset {
                    position,
                    tileset: tileset.name.clone(),
                });
            }

            let Some(marker) = classify_tile(tile.index) else {
                // Building-type tiles are picked up via their token; anything
                // else on the spawn layer is ignored.
                continue;
            };

            match marker {
                Marker::Resource => {
                    if tile.is_mirrored() {
                        return Err(ExtractError::MirroredResource { position });
                    }
                    resources.push(ResourcePoint {
                        position,
                        flags: tile.flags,
                    });
                }
                Marker::Waterdrop => {
                    waterdrops.push(WaterdropSource {
                        position,
                        flags: tile.flags,
                    });
                }
                Marker::Unit { player, kind } => {
                    if !tile.flags.is_empty() {
                        return Err(ExtractError::RotatedUnit { player, position });
                    }
                    players[player].units.push(Unit { kind, position });
                }
                Marker::PlayerToken { player } => {
                    if tile.is_mirrored() {
                        return Err(ExtractError::MirroredToken { position });
                    }

                    // The building type sits in the cell the token's right
                    // vector points at and must carry the token's flags.
                    let building_pos = position + tile.right_vector();
                    let building_tile = layer
                        .tile_at(building_pos.x, building_pos.y, width, height)
                        .filter(|t| !t.is_empty())
                        .ok_or(ExtractError::BuildingTileMissing {
                            token: position,
                            position: building_pos,
                        })?;

                    let building_tileset_idx =
                        building_tile
                            .tileset
                            .ok_or(ExtractError::MissingTileset {
                                position: building_pos,
                            })?;
                    let building_tileset = &tilesets[building_tileset_idx];
                    if building_tileset.kind != TilesetKind::Spawn {
                        return Err(ExtractError::WrongTileset {
                            position: building_pos,
                            tileset: building_tileset.name.clone(),
                        });
                    }
                    if building_tile.flags != tile.flags {
                        return Err(ExtractError::InconsistentBuildingFlags {
                            token: position,
                            building: building_pos,
                        });
                    }

                    let kind = building_type_for_tile(building_tile.index).ok_or(
                        ExtractError::NoBuildingMapping {
                            token: position,
                            position: building_pos,
                        },
                    )?;
                    players[player].buildings.push(Building {
                        kind,
                        position,
                        flags: tile.flags,
                    });
                }
            }
        }
    }

    if resources.is_empty() {
        return Err(ExtractError::NoResourcePoints);
    }

    // Reduce the eight slots to the players that actually exist. A slot
    // without a base building must be completely empty.
    let mut actual_players = Vec::new();
    for (idx, player) in players.into_iter().enumerate() {
        let base_count = player
            .buildings
            .iter()
            .filter(|b| b.kind == BuildingType::Base)
            .count();

        if base_count == 0 {
            if !player.units.is_empty() {
                return Err(ExtractError::UnitsWithoutBase { player: idx });
            }
            if !player.buildings.is_empty() {
                return Err(ExtractError::BuildingsWithoutBase { player: idx });
            }
            continue;
        }
        if base_count > 1 {
            warn!(
                "player {idx} has {base_count} base buildings (more than one); \
                 this is ok, but maybe not intended"
            );
        }
        actual_players.push(player);
    }
    if actual_players.len() < 2 {
        return Err(ExtractError::NotEnoughPlayers(actual_players.len()));
    }

    Ok(SpawnInfo {
        resources,
        waterdrops,
        players: actual_players,
    })
}

pub mod border;
pub mod spawn;
pub mod tilemap;

pub mod prelude {
    #[doc(hidden)]
    pub use crate::border::{BorderLine, SortedBorderLines};
    #[doc(hidden)]
    pub use crate::spawn::{
        Building, BuildingType, Player, ResourcePoint, SpawnInfo, Unit, UnitType, WaterdropSource,
    };
    #[doc(hidden)]
    pub use crate::tilemap::{Tile, TileFlags, TileMap, TileShape, Tileset, TilesetKind};
}

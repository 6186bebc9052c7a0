mod extractor;

use std::fmt;

use glam::IVec2;
use serde::Serialize;

use crate::tilemap::{Orientation, Tile};

pub use extractor::{compute, ExtractError};

/// A maximal straight run of unit edges between solid terrain and air,
/// pre-computed for the game's collision detection.
///
/// Walking along the border in its direction, the solid side is always on
/// the right. Position `(0, 0)` is the upper-left corner of the upper-left
/// tile; since borders facing the outside of the map are invalid, all
/// positions lie in `[1, size - 1]`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct BorderLine {
    pub start: IVec2,
    pub length: i32,
}

impl BorderLine {
    pub fn new(x: i32, y: i32, length: i32) -> Self {
        BorderLine {
            start: IVec2::new(x, y),
            length,
        }
    }
}

/// All border lines of a map, bucketed by the direction they point.
#[derive(Clone, Debug, Default, Serialize)]
pub struct SortedBorderLines {
    /// Pointing left; solid terrain is above.
    pub left: Vec<BorderLine>,
    /// Pointing right; solid terrain is below.
    pub right: Vec<BorderLine>,
    /// Pointing up; solid terrain is on the right.
    pub up: Vec<BorderLine>,
    /// Pointing down; solid terrain is on the left.
    pub down: Vec<BorderLine>,

    /// Pointing up-left; solid terrain is right-above.
    pub up_left: Vec<BorderLine>,
    /// Pointing up-right; solid terrain is right-below.
    pub up_right: Vec<BorderLine>,
    /// Pointing down-left; solid terrain is left-above.
    pub down_left: Vec<BorderLine>,
    /// Pointing down-right; solid terrain is left-below.
    pub down_right: Vec<BorderLine>,
}

impl fmt::Display for SortedBorderLines {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Number of borders (left, right, up, down): {}, {}, {}, {}",
            self.left.len(),
            self.right.len(),
            self.up.len(),
            self.down.len()
        )?;
        for (name, lines) in [
            ("Left", &self.left),
            ("Right", &self.right),
            ("Up", &self.up),
            ("Down", &self.down),
        ] {
            for (i, b) in lines.iter().enumerate() {
                writeln!(
                    f,
                    "\t{name:<5} {i:4}: {:3} x{:3}, length {:3}",
                    b.start.x, b.start.y, b.length
                )?;
            }
        }

        writeln!(
            f,
            "Number of borders (up-left, up-right, down-left, down-right): {}, {}, {}, {}",
            self.up_left.len(),
            self.up_right.len(),
            self.down_left.len(),
            self.down_right.len()
        )?;
        for (name, lines) in [
            ("UpLeft", &self.up_left),
            ("UpRight", &self.up_right),
            ("DownLeft", &self.down_left),
            ("DownRight", &self.down_right),
        ] {
            for (i, b) in lines.iter().enumerate() {
                writeln!(
                    f,
                    "\t{name:<9} {i:4}: {:3} x{:3}, length {:3}",
                    b.start.x, b.start.y, b.length
                )?;
            }
        }
        Ok(())
    }
}

/// Returns `true` if the shared cardinal edge between `tile` and its
/// neighbour on `side` is a border: the tile must fill that edge and the
/// neighbour must not fill it from the other side.
///
/// Diagonal sides never consult the neighbour and must not be passed here.
pub(crate) fn shared_cardinal_border(tile: Tile, neighbour: Tile, side: Orientation) -> bool {
    debug_assert!(!side.is_diagonal());

    tile.has_border_toward(side) && !neighbour.has_border_toward(side.inverted())
}

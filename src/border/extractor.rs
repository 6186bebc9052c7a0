use std::fmt;

use tracing::warn;

use crate::tilemap::{
    LayerError, Orientation, Tile, TileLayer, TileMap, TileShape, ENVIRONMENT_LAYER_NAME,
};

use super::*;

#[derive(Debug)]
pub enum ExtractError {
    Layer(LayerError),
    TileLookup { x: i32, y: i32 },
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
            ExtractError::TileLookup { x, y } => {
                write!(f, "failed to compute border: no tile at x={x}, y={y}")
            }
        }
    }
}

/// Computes the borders of the map's environment layer.
pub fn compute(tilemap: &TileMap) -> Result<SortedBorderLines, ExtractError> {
    let layer_idx = tilemap.layer_index(ENVIRONMENT_LAYER_NAME)?;
    layer_borders(tilemap.width, tilemap.height, &tilemap.layers[layer_idx])
}

/// Sweeps a layer for maximal border runs in all eight directions.
///
/// Borders in the outer ring are not accepted: the reachable terrain must be
/// enclosed by a shell of solid, non-diagonal tiles (which does not have to
/// be the outer ring itself). The orthogonal sweeps therefore exclude the
/// last row/column; diagonal tiles found on the outer ring only warn.
fn layer_borders(
    width: u32,
    height: u32,
    layer: &TileLayer,
) -> Result<SortedBorderLines, ExtractError> {
    let width = width as i32;
    let height = height as i32;
    let mut borders = SortedBorderLines::default();

    let tile_at = |x: i32, y: i32| -> Result<Tile, ExtractError> {
        layer
            .tile_at(x, y, width as u32, height as u32)
            .ok_or(ExtractError::TileLookup { x, y })
    };

    // Horizontal sweeps. Runs break when the predicate fails or the scan
    // reaches the last column, so no run survives the inner loop.
    for y in 1..height {
        let mut upwards_start: Option<i32> = None;
        let mut downwards_start: Option<i32> = None;

        for x in 1..width {
            let above = tile_at(x, y - 1)?;
            let mine = tile_at(x, y)?;

            // Border facing upwards, solid below: points right.
            if shared_cardinal_border(mine, above, Orientation::Up) && x != width - 1 {
                upwards_start.get_or_insert(x);
            } else if let Some(start) = upwards_start.take() {
                borders.right.push(BorderLine::new(start, y, x - start));
            }

            // Border facing downwards, solid above: points left and is
            // anchored at the run's end.
            if shared_cardinal_border(above, mine, Orientation::Down) && x != width - 1 {
                downwards_start.get_or_insert(x);
            } else if let Some(start) = downwards_start.take() {
                borders.left.push(BorderLine::new(x, y, x - start));
            }
        }
    }

    // Vertical sweeps.
    for x in 1..width {
        let mut left_start: Option<i32> = None;
        let mut right_start: Option<i32> = None;

        for y in 1..height {
            let left = tile_at(x - 1, y)?;
            let mine = tile_at(x, y)?;

            // Border facing left, solid on the right: points up, anchored at
            // the run's end.
            if shared_cardinal_border(mine, left, Orientation::Left) && y != height - 1 {
                left_start.get_or_insert(y);
            } else if let Some(start) = left_start.take() {
                borders.up.push(BorderLine::new(x, y, y - start));
            }

            // Border facing right, solid on the left: points down.
            if shared_cardinal_border(left, mine, Orientation::Right) && y != height - 1 {
                right_start.get_or_insert(y);
            } else if let Some(start) = right_start.take() {
                borders.down.push(BorderLine::new(x, start, y - start));
            }
        }
    }

    let diagonal_scans = width + height - 1;

    // Diagonal sweeps from the top-left to the bottom-right, one per
    // anti-diagonal starting on the top row or the left column. The tile
    // shape alone drives these runs.
    for d in 0..diagonal_scans {
        let (first_x, first_y) = if d < width { (d, 0) } else { (0, d - width + 1) };

        let mut down_right_start: Option<i32> = None;
        let mut up_left_start: Option<i32> = None;

        let mut x = first_x;
        let mut y = first_y;
        let mut i = 0;
        loop {
            let tile = tile_at(x, y)?;
            let shape = tile.shape();

            // Solid lower left: border pointing down-right.
            if shape == TileShape::SolidLowerLeft {
                warn_outer_ring_diagonal(x, y, width, height);
                down_right_start.get_or_insert(i);
            } else if let Some(start) = down_right_start.take() {
                borders.down_right.push(BorderLine::new(
                    first_x + start,
                    first_y + start,
                    i - start,
                ));
            }

            // Solid upper right: border pointing up-left, anchored at the
            // run's end.
            if shape == TileShape::SolidUpperRight {
                warn_outer_ring_diagonal(x, y, width, height);
                up_left_start.get_or_insert(i);
            } else if let Some(start) = up_left_start.take() {
                borders
                    .up_left
                    .push(BorderLine::new(first_x + i, first_y + i, i - start));
            }

            x += 1;
            y += 1;
            i += 1;
            if x >= width || y >= height {
                break;
            }
        }
        // The scan line ended; close whatever is still running.
        if let Some(start) = down_right_start.take() {
            borders.down_right.push(BorderLine::new(
                first_x + start,
                first_y + start,
                i - start,
            ));
        }
        if let Some(start) = up_left_start.take() {
            borders
                .up_left
                .push(BorderLine::new(first_x + i, first_y + i, i - start));
        }
    }

    // Diagonal sweeps from the bottom-left to the top-right.
    for d in 0..diagonal_scans {
        let (first_x, first_y) = if d < width {
            (d, height - 1)
        } else {
            (0, d - width)
        };

        let mut up_right_start: Option<i32> = None;
        let mut down_left_start: Option<i32> = None;

        let mut x = first_x;
        let mut y = first_y;
        let mut i = 0;
        loop {
            let tile = tile_at(x, y)?;
            let shape = tile.shape();

            // Solid lower right: border pointing up-right.
            if shape == TileShape::SolidLowerRight {
                warn_outer_ring_diagonal(x, y, width, height);
                up_right_start.get_or_insert(i);
            } else if let Some(start) = up_right_start.take() {
                borders.up_right.push(BorderLine::new(
                    first_x + start,
                    first_y - start + 1,
                    i - start,
                ));
            }

            // Solid upper left: border pointing down-left, anchored at the
            // run's end.
            if shape == TileShape::SolidUpperLeft {
                warn_outer_ring_diagonal(x, y, width, height);
                down_left_start.get_or_insert(i);
            } else if let Some(start) = down_left_start.take() {
                borders
                    .down_left
                    .push(BorderLine::new(first_x + i, first_y - i + 1, i - start));
            }

            x += 1;
            y -= 1;
            i += 1;
            if x >= width || y < 0 {
                break;
            }
        }
        if let Some(start) = up_right_start.take() {
            borders.up_right.push(BorderLine::new(
                first_x + start,
                first_y - start + 1,
                i - start,
            ));
        }
        if let Some(start) = down_left_start.take() {
            borders
                .down_left
                .push(BorderLine::new(first_x + i, first_y - i + 1, i - start));
        }
    }

    Ok(borders)
}

fn warn_outer_ring_diagonal(x: i32, y: i32, width: i32, height: i32) {
    if x == 0 || y == 0 || x == width - 1 || y == height - 1 {
        warn!(
            "the outer ring of the map contains diagonal tiles; the whole area \
             reachable within the game must be enclosed by solid, non-diagonal \
             tiles (position: {x}x{y})"
        );
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::tilemap::{TileFlags, FIRST_DIAGONAL_TILE_ID};

    use super::*;

    const WIDTH: u32 = 8;
    const HEIGHT: u32 = 8;

    const SOLID: u32 = 1;
    /// Flags picking each solid corner of a diagonal tile.
    const LOWER_LEFT: u8 = 2;
    const LOWER_RIGHT: u8 = 3;
    const UPPER_LEFT: u8 = 0;
    const UPPER_RIGHT: u8 = 1;

    fn tile(index: u32, flags: u8) -> Tile {
        Tile {
            index,
            flags: TileFlags::from_bits_truncate(flags),
            tileset: Some(0),
        }
    }

    /// An 8x8 layer with a solid outer ring and the given extra tiles inside.
    fn ring_layer(extra: &[(i32, i32, u32, u8)]) -> TileLayer {
        let mut tiles = vec![Tile::default(); (WIDTH * HEIGHT) as usize];
        for y in 0..HEIGHT as i32 {
            for x in 0..WIDTH as i32 {
                if x == 0 || y == 0 || x == WIDTH as i32 - 1 || y == HEIGHT as i32 - 1 {
                    tiles[(y * WIDTH as i32 + x) as usize] = tile(SOLID, 0);
                }
            }
        }
        for &(x, y, index, flags) in extra {
            tiles[(y * WIDTH as i32 + x) as usize] = tile(index, flags);
        }
        TileLayer {
            name: ENVIRONMENT_LAYER_NAME.to_string(),
            tiles,
        }
    }

    #[test]
    fn test_ring_borders() {
        let borders = layer_borders(WIDTH, HEIGHT, &ring_layer(&[])).unwrap();

        // A closed ring produces exactly one run per cardinal direction,
        // hugging the 6x6 interior.
        assert_eq!(borders.right, vec![BorderLine::new(1, 7, 6)]);
        assert_eq!(borders.left, vec![BorderLine::new(7, 1, 6)]);
        assert_eq!(borders.up, vec![BorderLine::new(7, 7, 6)]);
        assert_eq!(borders.down, vec![BorderLine::new(1, 1, 6)]);

        assert!(borders.up_left.is_empty());
        assert!(borders.up_right.is_empty());
        assert!(borders.down_left.is_empty());
        assert!(borders.down_right.is_empty());
    }

    #[test]
    fn test_single_diagonal_tile() {
        let borders = layer_borders(
            WIDTH,
            HEIGHT,
            &ring_layer(&[(3, 4, FIRST_DIAGONAL_TILE_ID, LOWER_LEFT)]),
        )
        .unwrap();

        // The lone lower-left diagonal contributes one down-right segment.
        assert_eq!(borders.down_right, vec![BorderLine::new(3, 4, 1)]);
        assert!(borders.up_left.is_empty());
        assert!(borders.up_right.is_empty());
        assert!(borders.down_left.is_empty());

        // Its solid corner also adds short cardinal borders next to the ring
        // runs: the filled Left edge faces the air at x=2 and the filled
        // Down edge faces the air at y=5.
        assert_eq!(
            borders.up,
            vec![BorderLine::new(3, 5, 1), BorderLine::new(7, 7, 6)]
        );
        assert_eq!(
            borders.left,
            vec![BorderLine::new(7, 1, 6), BorderLine::new(4, 5, 1)]
        );
        assert_eq!(borders.right, vec![BorderLine::new(1, 7, 6)]);
        assert_eq!(borders.down, vec![BorderLine::new(1, 1, 6)]);
    }

    #[test]
    fn test_each_diagonal_shape_fills_its_bucket() {
        type Bucket = fn(&SortedBorderLines) -> &Vec<BorderLine>;
        let cases: [(u8, Bucket); 4] = [
            (LOWER_LEFT, |b| &b.down_right),
            (UPPER_RIGHT, |b| &b.up_left),
            (LOWER_RIGHT, |b| &b.up_right),
            (UPPER_LEFT, |b| &b.down_left),
        ];
        for (flags, bucket) in cases {
            let borders = layer_borders(
                WIDTH,
                HEIGHT,
                &ring_layer(&[(3, 4, FIRST_DIAGONAL_TILE_ID, flags)]),
            )
            .unwrap();
            assert_eq!(bucket(&borders).len(), 1, "flags {flags}");
            assert_eq!(bucket(&borders)[0].length, 1, "flags {flags}");
        }
    }

    #[test]
    fn test_diagonal_anchors() {
        // An up-left segment is anchored at the end of its run, one step
        // past the last tile along the anti-diagonal.
        let borders = layer_borders(
            WIDTH,
            HEIGHT,
            &ring_layer(&[(3, 4, FIRST_DIAGONAL_TILE_ID, UPPER_RIGHT)]),
        )
        .unwrap();
        assert_eq!(borders.up_left, vec![BorderLine::new(4, 5, 1)]);

        // An up-right segment is anchored at its run start, shifted one cell
        // down; a down-left segment at its run end.
        let borders = layer_borders(
            WIDTH,
            HEIGHT,
            &ring_layer(&[(3, 4, FIRST_DIAGONAL_TILE_ID, LOWER_RIGHT)]),
        )
        .unwrap();
        assert_eq!(borders.up_right, vec![BorderLine::new(3, 5, 1)]);

        let borders = layer_borders(
            WIDTH,
            HEIGHT,
            &ring_layer(&[(3, 4, FIRST_DIAGONAL_TILE_ID, UPPER_LEFT)]),
        )
        .unwrap();
        assert_eq!(borders.down_left, vec![BorderLine::new(4, 4, 1)]);
    }

    #[test]
    fn test_run_is_emitted_when_scan_line_ends() {
        // A diagonal tile in the bottom-right corner keeps its run open
        // until the scan line ends; the run must still be emitted.
        let borders = layer_borders(
            WIDTH,
            HEIGHT,
            &ring_layer(&[(7, 7, FIRST_DIAGONAL_TILE_ID, LOWER_LEFT)]),
        )
        .unwrap();
        assert!(borders
            .down_right
            .contains(&BorderLine::new(7, 7, 1)));
    }

    #[test]
    fn test_adjacent_diagonals_merge_into_one_run() {
        let borders = layer_borders(
            WIDTH,
            HEIGHT,
            &ring_layer(&[
                (2, 2, FIRST_DIAGONAL_TILE_ID, LOWER_LEFT),
                (3, 3, FIRST_DIAGONAL_TILE_ID, LOWER_LEFT),
                (4, 4, FIRST_DIAGONAL_TILE_ID, LOWER_LEFT),
            ]),
        )
        .unwrap();
        assert_eq!(borders.down_right, vec![BorderLine::new(2, 2, 3)]);
    }

    #[test]
    fn test_compute_uses_environment_layer() {
        let map = TileMap {
            version: "1.0".to_string(),
            width: WIDTH,
            height: HEIGHT,
            tilesets: Vec::new(),
            layers: vec![ring_layer(&[])],
            background_objects: Vec::new(),
            foreground_objects: Vec::new(),
        };
        assert_eq!(compute(&map).unwrap().right.len(), 1);

        let mut no_environment = map.clone();
        no_environment.layers[0].name = "decoration".to_string();
        assert!(matches!(
            compute(&no_environment),
            Err(ExtractError::Layer(LayerError::NotFound(_)))
        ));
    }
}

use rand::Rng;
use shared::{MapData, TileData, TileKind};

///Represents a single terrain cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell {
    pub kind: TileKind,
    pub x: i32,
    pub y: i32,
}

///Immutable terrain of the world, stored row-major.
/// The outer ring is always stone.
#[derive(Debug, Clone)]
pub struct Grid {
    width: usize,
    height: usize,
    cells: Vec<Cell>,
}

impl Grid {
    ///Builds a grid where each interior cell is stone with `stone_percent` chance.
    pub fn generate<R: Rng + ?Sized>(
        width: usize,
        height: usize,
        stone_percent: u32,
        rng: &mut R,
    ) -> Self {
        Self::from_fn(width, height, |_, _| {
            if rng.gen_range(0..100) < stone_percent {
                TileKind::Stone
            } else {
                TileKind::Grass
            }
        })
    }

    ///Builds a grid with grass everywhere except the border.
    pub fn open(width: usize, height: usize) -> Self {
        Self::from_fn(width, height, |_, _| TileKind::Grass)
    }

    ///Builds a grid from a per-cell function. Border cells ignore `kind_at`.
    pub fn from_fn(
        width: usize,
        height: usize,
        mut kind_at: impl FnMut(i32, i32) -> TileKind,
    ) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        let mut cells = Vec::with_capacity(width * height);

        for y in 0..height {
            for x in 0..width {
                let border = x == 0 || y == 0 || x == width - 1 || y == height - 1;
                let (x, y) = (x as i32, y as i32);
                let kind = if border {
                    TileKind::Stone
                } else {
                    kind_at(x, y)
                };
                cells.push(Cell { kind, x, y });
            }
        }

        Self {
            width,
            height,
            cells,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    ///Returns the cell at `(x, y)`, or `None` when out of range.
    pub fn cell(&self, x: i32, y: i32) -> Option<&Cell> {
        if x < 0 || y < 0 {
            return None;
        }
        let (x, y) = (x as usize, y as usize);
        if x >= self.width || y >= self.height {
            return None;
        }
        self.cells.get(y * self.width + x)
    }

    pub fn is_walkable(&self, x: i32, y: i32) -> bool {
        matches!(self.cell(x, y), Some(cell) if cell.kind == TileKind::Grass)
    }

    ///Coordinates of every grass cell.
    pub fn walkable_cells(&self) -> impl Iterator<Item = (i32, i32)> + '_ {
        self.cells
            .iter()
            .filter(|cell| cell.kind == TileKind::Grass)
            .map(|cell| (cell.x, cell.y))
    }

    ///Snapshot sent to clients, indexed `tiles[y][x]`.
    pub fn to_map_data(&self) -> MapData {
        let tiles = self
            .cells
            .chunks(self.width)
            .map(|row| row.iter().map(|cell| TileData { kind: cell.kind }).collect())
            .collect();

        MapData {
            width: self.width,
            height: self.height,
            tiles,
        }
    }
}

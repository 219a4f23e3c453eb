//! Grid & Capacity Model
//!
//! Cells are addressed purely by `(row, column)`. Adjacency and capacity are
//! derived from the grid dimensions on demand and never stored, so the grid is
//! a flat, acyclic value that serializes as-is.

use std::collections::BTreeSet;
use serde::{Serialize, Deserialize};

use crate::core::hash::{StateHash, StateHasher};
use crate::game::state::PlayerId;

/// Default number of rows.
pub const DEFAULT_ROWS: usize = 5;

/// Default number of columns.
pub const DEFAULT_COLUMNS: usize = 6;

/// Largest accepted dimension on either axis.
pub const MAX_DIMENSION: usize = 64;

/// Orthogonal offsets in the fixed order north, east, south, west.
///
/// The cascade enqueues neighbors in this order, so it is part of the
/// deterministic contract between the authority and its replicas.
const DIRECTIONS: [(isize, isize); 4] = [(-1, 0), (0, 1), (1, 0), (0, -1)];

/// Grid errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GridError {
    /// Coordinates outside the grid.
    #[error("position ({row}, {column}) is outside the {rows}x{columns} grid")]
    OutOfBounds {
        row: i64,
        column: i64,
        rows: usize,
        columns: usize,
    },

    /// Dimensions that cannot host a playable grid.
    #[error("invalid grid dimensions {rows}x{columns}")]
    InvalidDimensions { rows: usize, columns: usize },

    /// Cell list does not match the declared dimensions.
    #[error("expected {expected} cells, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    /// Cell holds more bombs than its capacity.
    #[error("cell ({row}, {column}) holds {bombs} bombs but its capacity is {capacity}")]
    OverCapacity {
        row: usize,
        column: usize,
        bombs: u8,
        capacity: u8,
    },

    /// Owner is set on an empty cell, or missing on a non-empty one.
    #[error("cell ({row}, {column}) ownership does not match its bomb count")]
    OwnershipMismatch { row: usize, column: usize },
}

// =============================================================================
// CONFIG
// =============================================================================

/// Grid dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridConfig {
    /// Number of rows.
    pub rows: usize,
    /// Number of columns.
    pub columns: usize,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            rows: DEFAULT_ROWS,
            columns: DEFAULT_COLUMNS,
        }
    }
}

impl GridConfig {
    /// Create a config with explicit dimensions.
    pub const fn new(rows: usize, columns: usize) -> Self {
        Self { rows, columns }
    }

    /// Check the dimensions describe a playable grid.
    ///
    /// A 1x1 grid is rejected: its only cell would have capacity 0.
    pub fn validate(&self) -> Result<(), GridError> {
        let invalid = self.rows == 0
            || self.columns == 0
            || (self.rows == 1 && self.columns == 1)
            || self.rows > MAX_DIMENSION
            || self.columns > MAX_DIMENSION;

        if invalid {
            return Err(GridError::InvalidDimensions {
                rows: self.rows,
                columns: self.columns,
            });
        }
        Ok(())
    }
}

// =============================================================================
// POSITION & CELL
// =============================================================================

/// A cell coordinate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    /// Zero-based row.
    pub row: usize,
    /// Zero-based column.
    pub column: usize,
}

impl Position {
    /// Create a position.
    pub const fn new(row: usize, column: usize) -> Self {
        Self { row, column }
    }
}

/// One grid position: bomb count and optional owner.
///
/// Invariant: `owner` is `None` iff `bombs == 0`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    bombs: u8,
    owner: Option<PlayerId>,
}

impl Cell {
    /// Empty, unowned cell.
    pub const EMPTY: Cell = Cell { bombs: 0, owner: None };

    /// Build a cell from raw parts. Checked against the grid in [`Grid::from_cells`].
    pub const fn from_parts(bombs: u8, owner: Option<PlayerId>) -> Self {
        Self { bombs, owner }
    }

    /// Current bomb count.
    #[inline]
    pub fn bombs(&self) -> u8 {
        self.bombs
    }

    /// Current owner, if any.
    #[inline]
    pub fn owner(&self) -> Option<PlayerId> {
        self.owner
    }

    /// True when no bombs are present.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bombs == 0
    }
}

// =============================================================================
// GRID
// =============================================================================

/// Fixed `rows x columns` array of cells, stored row-major.
///
/// Deserialization goes through [`Grid::from_cells`], so a decoded grid holds
/// the same invariants as a constructed one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "GridParts")]
pub struct Grid {
    rows: usize,
    columns: usize,
    cells: Vec<Cell>,
}

/// Unchecked serialized form of a [`Grid`].
#[derive(Deserialize)]
struct GridParts {
    rows: usize,
    columns: usize,
    cells: Vec<Cell>,
}

impl TryFrom<GridParts> for Grid {
    type Error = GridError;

    fn try_from(parts: GridParts) -> Result<Self, GridError> {
        Grid::from_cells(GridConfig::new(parts.rows, parts.columns), parts.cells)
    }
}

impl Default for Grid {
    fn default() -> Self {
        Self {
            rows: DEFAULT_ROWS,
            columns: DEFAULT_COLUMNS,
            cells: vec![Cell::EMPTY; DEFAULT_ROWS * DEFAULT_COLUMNS],
        }
    }
}

impl Grid {
    /// Create an empty grid.
    pub fn new(config: GridConfig) -> Result<Self, GridError> {
        config.validate()?;
        Ok(Self {
            rows: config.rows,
            columns: config.columns,
            cells: vec![Cell::EMPTY; config.rows * config.columns],
        })
    }

    /// Rebuild a grid from row-major cells, checking every cell invariant.
    pub fn from_cells(config: GridConfig, cells: Vec<Cell>) -> Result<Self, GridError> {
        config.validate()?;
        let expected = config.rows * config.columns;
        if cells.len() != expected {
            return Err(GridError::ShapeMismatch { expected, actual: cells.len() });
        }

        let grid = Self {
            rows: config.rows,
            columns: config.columns,
            cells,
        };

        for (pos, cell) in grid.iter() {
            let capacity = grid.capacity(pos);
            if cell.bombs > capacity {
                return Err(GridError::OverCapacity {
                    row: pos.row,
                    column: pos.column,
                    bombs: cell.bombs,
                    capacity,
                });
            }
            if cell.owner.is_none() != (cell.bombs == 0) {
                return Err(GridError::OwnershipMismatch { row: pos.row, column: pos.column });
            }
        }

        Ok(grid)
    }

    /// Number of rows.
    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    #[inline]
    pub fn columns(&self) -> usize {
        self.columns
    }

    /// Dimensions of this grid.
    pub fn config(&self) -> GridConfig {
        GridConfig::new(self.rows, self.columns)
    }

    /// Validate signed wire coordinates into a position.
    pub fn position(&self, row: i64, column: i64) -> Result<Position, GridError> {
        let in_bounds = row >= 0
            && column >= 0
            && (row as u64) < self.rows as u64
            && (column as u64) < self.columns as u64;

        if !in_bounds {
            return Err(GridError::OutOfBounds {
                row,
                column,
                rows: self.rows,
                columns: self.columns,
            });
        }
        Ok(Position::new(row as usize, column as usize))
    }

    /// Check whether a position lies inside the grid.
    #[inline]
    pub fn contains(&self, pos: Position) -> bool {
        pos.row < self.rows && pos.column < self.columns
    }

    #[inline]
    fn index(&self, pos: Position) -> usize {
        debug_assert!(self.contains(pos), "position {:?} outside grid", pos);
        pos.row * self.columns + pos.column
    }

    /// Get a cell.
    ///
    /// # Panics
    /// Panics if `pos` lies outside the grid.
    #[inline]
    pub fn cell(&self, pos: Position) -> &Cell {
        &self.cells[self.index(pos)]
    }

    /// Get a cell if the position is in bounds.
    pub fn get(&self, pos: Position) -> Option<&Cell> {
        if self.contains(pos) {
            Some(self.cell(pos))
        } else {
            None
        }
    }

    fn offset(&self, pos: Position, dr: isize, dc: isize) -> Option<Position> {
        let row = pos.row.checked_add_signed(dr)?;
        let column = pos.column.checked_add_signed(dc)?;
        let next = Position::new(row, column);
        self.contains(next).then_some(next)
    }

    /// In-bounds orthogonal neighbors, in north, east, south, west order.
    pub fn neighbors(&self, pos: Position) -> impl Iterator<Item = Position> + '_ {
        DIRECTIONS
            .iter()
            .filter_map(move |&(dr, dc)| self.offset(pos, dr, dc))
    }

    /// Number of bombs a cell holds before it detonates (its neighbor count).
    pub fn capacity(&self, pos: Position) -> u8 {
        self.neighbors(pos).count() as u8
    }

    /// Largest capacity of any cell on this grid.
    pub fn max_capacity(&self) -> u8 {
        let rows = self.rows.min(3) as u8;
        let columns = self.columns.min(3) as u8;
        // A cell's capacity is (vertical neighbors) + (horizontal neighbors),
        // each side contributing at most 2.
        (rows - 1) + (columns - 1)
    }

    /// Upper bound on detonations in one cascade: `rows * columns * max_capacity`.
    pub fn detonation_limit(&self) -> usize {
        self.rows * self.columns * self.max_capacity() as usize
    }

    /// Whether `player` may place on `pos`: the cell is unowned or already theirs.
    pub fn can_place(&self, player: PlayerId, pos: Position) -> bool {
        match self.cell(pos).owner {
            None => true,
            Some(owner) => owner == player,
        }
    }

    /// Add one bomb for `player`, capped at capacity.
    ///
    /// Ownership is granted unconditionally, even when the count is already
    /// at capacity and even over a different prior owner. Callers gate
    /// player moves with [`Grid::can_place`] first.
    pub fn place(&mut self, player: PlayerId, pos: Position) {
        let capacity = self.capacity(pos);
        let idx = self.index(pos);
        let cell = &mut self.cells[idx];
        cell.owner = Some(player);
        cell.bombs = cell.bombs.saturating_add(1).min(capacity);
    }

    /// Drain a cell: zero bombs, no owner.
    pub(crate) fn clear(&mut self, pos: Position) {
        let idx = self.index(pos);
        self.cells[idx] = Cell::EMPTY;
    }

    /// Whether a cell has reached its capacity.
    #[inline]
    pub fn is_critical(&self, pos: Position) -> bool {
        self.cell(pos).bombs >= self.capacity(pos)
    }

    /// Iterate all cells row-major with their positions.
    pub fn iter(&self) -> impl Iterator<Item = (Position, &Cell)> + '_ {
        let columns = self.columns;
        self.cells
            .iter()
            .enumerate()
            .map(move |(i, cell)| (Position::new(i / columns, i % columns), cell))
    }

    /// Iterate rows as cell slices.
    pub fn row_slices(&self) -> impl Iterator<Item = &[Cell]> + '_ {
        self.cells.chunks(self.columns)
    }

    /// Distinct owners across all owned cells.
    pub fn owners(&self) -> BTreeSet<PlayerId> {
        self.cells.iter().filter_map(|c| c.owner).collect()
    }

    /// The single remaining owner, if exactly one player owns cells.
    pub fn sole_owner(&self) -> Option<PlayerId> {
        let owners = self.owners();
        if owners.len() == 1 {
            owners.into_iter().next()
        } else {
            None
        }
    }

    /// Total bombs on the board.
    pub fn total_bombs(&self) -> usize {
        self.cells.iter().map(|c| c.bombs as usize).sum()
    }

    /// Hash this grid for drift detection.
    pub fn compute_hash(&self) -> StateHash {
        let mut hasher = StateHasher::for_grid();
        hasher.update_u32(self.rows as u32);
        hasher.update_u32(self.columns as u32);
        for cell in &self.cells {
            hasher.update_u8(cell.bombs);
            match cell.owner {
                Some(owner) => {
                    hasher.update_bool(true);
                    hasher.update_uuid(owner.as_bytes());
                }
                None => hasher.update_bool(false),
            }
        }
        hasher.finalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: PlayerId = PlayerId::new([1; 16]);
    const B: PlayerId = PlayerId::new([2; 16]);

    #[test]
    fn test_deserialize_checks_invariants() {
        let mut grid = Grid::new(GridConfig::new(2, 3)).unwrap();
        grid.place(A, Position::new(0, 1));
        let json = serde_json::to_string(&grid).unwrap();
        assert_eq!(serde_json::from_str::<Grid>(&json).unwrap(), grid);

        let empty = r#"{"rows":0,"columns":3,"cells":[]}"#;
        assert!(serde_json::from_str::<Grid>(empty).is_err());

        let short = r#"{"rows":2,"columns":2,"cells":[]}"#;
        assert!(serde_json::from_str::<Grid>(short).is_err());

        let ownerless = r#"{"rows":1,"columns":2,"cells":[{"bombs":1,"owner":null},{"bombs":0,"owner":null}]}"#;
        assert!(serde_json::from_str::<Grid>(ownerless).is_err());
    }

    #[test]
    fn test_default_dimensions() {
        let grid = Grid::new(GridConfig::default()).unwrap();
        assert_eq!(grid.rows(), 5);
        assert_eq!(grid.columns(), 6);
        assert_eq!(grid.iter().count(), 30);
        assert_eq!(grid, Grid::default());
    }

    #[test]
    fn test_capacity_by_location() {
        let grid = Grid::default();
        // Corners
        assert_eq!(grid.capacity(Position::new(0, 0)), 2);
        assert_eq!(grid.capacity(Position::new(0, 5)), 2);
        assert_eq!(grid.capacity(Position::new(4, 0)), 2);
        assert_eq!(grid.capacity(Position::new(4, 5)), 2);
        // Edges
        assert_eq!(grid.capacity(Position::new(0, 3)), 3);
        assert_eq!(grid.capacity(Position::new(2, 0)), 3);
        // Interior
        assert_eq!(grid.capacity(Position::new(2, 3)), 4);
        assert_eq!(grid.max_capacity(), 4);
    }

    #[test]
    fn test_neighbors_order_and_bounds() {
        let grid = Grid::default();
        let corner: Vec<_> = grid.neighbors(Position::new(0, 0)).collect();
        assert_eq!(corner, vec![Position::new(0, 1), Position::new(1, 0)]);

        let interior: Vec<_> = grid.neighbors(Position::new(2, 3)).collect();
        assert_eq!(
            interior,
            vec![
                Position::new(1, 3),
                Position::new(2, 4),
                Position::new(3, 3),
                Position::new(2, 2),
            ]
        );
    }

    #[test]
    fn test_thin_grids() {
        let line = Grid::new(GridConfig::new(1, 4)).unwrap();
        assert_eq!(line.capacity(Position::new(0, 0)), 1);
        assert_eq!(line.capacity(Position::new(0, 1)), 2);
        assert_eq!(line.max_capacity(), 2);

        let square = Grid::new(GridConfig::new(2, 2)).unwrap();
        assert_eq!(square.max_capacity(), 2);
        assert_eq!(square.detonation_limit(), 8);
    }

    #[test]
    fn test_invalid_dimensions() {
        for (rows, columns) in [(0, 5), (5, 0), (1, 1), (MAX_DIMENSION + 1, 2)] {
            let result = Grid::new(GridConfig::new(rows, columns));
            assert_eq!(result, Err(GridError::InvalidDimensions { rows, columns }));
        }
    }

    #[test]
    fn test_place_increments_and_caps() {
        let mut grid = Grid::default();
        let corner = Position::new(0, 0);

        grid.place(A, corner);
        assert_eq!(grid.cell(corner).bombs(), 1);
        assert_eq!(grid.cell(corner).owner(), Some(A));

        grid.place(A, corner);
        grid.place(A, corner);
        assert_eq!(grid.cell(corner).bombs(), 2);
        assert!(grid.is_critical(corner));
    }

    #[test]
    fn test_place_overrides_owner() {
        let mut grid = Grid::default();
        let pos = Position::new(1, 1);
        grid.place(A, pos);
        assert!(!grid.can_place(B, pos));
        assert!(grid.can_place(A, pos));

        grid.place(B, pos);
        assert_eq!(grid.cell(pos).owner(), Some(B));
        assert_eq!(grid.cell(pos).bombs(), 2);
    }

    #[test]
    fn test_position_validation() {
        let grid = Grid::default();
        assert_eq!(grid.position(4, 5), Ok(Position::new(4, 5)));
        assert!(matches!(grid.position(5, 0), Err(GridError::OutOfBounds { .. })));
        assert!(matches!(grid.position(0, 6), Err(GridError::OutOfBounds { .. })));
        assert!(matches!(grid.position(-1, 0), Err(GridError::OutOfBounds { .. })));
        assert!(grid.get(Position::new(9, 9)).is_none());
    }

    #[test]
    fn test_sole_owner() {
        let mut grid = Grid::default();
        assert_eq!(grid.sole_owner(), None);

        grid.place(A, Position::new(0, 0));
        grid.place(A, Position::new(3, 3));
        assert_eq!(grid.sole_owner(), Some(A));

        grid.place(B, Position::new(2, 2));
        assert_eq!(grid.sole_owner(), None);
        assert_eq!(grid.owners().len(), 2);
    }

    #[test]
    fn test_from_cells_checks_invariants() {
        let config = GridConfig::new(2, 2);

        let short = Grid::from_cells(config, vec![Cell::EMPTY; 3]);
        assert_eq!(short, Err(GridError::ShapeMismatch { expected: 4, actual: 3 }));

        let mut cells = vec![Cell::EMPTY; 4];
        cells[0] = Cell::from_parts(3, Some(A));
        assert!(matches!(
            Grid::from_cells(config, cells),
            Err(GridError::OverCapacity { capacity: 2, .. })
        ));

        let mut cells = vec![Cell::EMPTY; 4];
        cells[1] = Cell::from_parts(0, Some(A));
        assert!(matches!(
            Grid::from_cells(config, cells),
            Err(GridError::OwnershipMismatch { row: 0, column: 1 })
        ));

        let mut cells = vec![Cell::EMPTY; 4];
        cells[3] = Cell::from_parts(1, Some(B));
        let grid = Grid::from_cells(config, cells).unwrap();
        assert_eq!(grid.cell(Position::new(1, 1)).owner(), Some(B));
    }

    #[test]
    fn test_hash_tracks_contents() {
        let mut grid = Grid::default();
        let empty = grid.compute_hash();
        assert_eq!(empty, Grid::default().compute_hash());

        grid.place(A, Position::new(0, 0));
        let one = grid.compute_hash();
        assert_ne!(empty, one);

        let mut other = Grid::default();
        other.place(B, Position::new(0, 0));
        assert_ne!(one, other.compute_hash());
    }

    #[test]
    fn test_row_slices() {
        let grid = Grid::default();
        let rows: Vec<_> = grid.row_slices().collect();
        assert_eq!(rows.len(), 5);
        assert!(rows.iter().all(|r| r.len() == 6));
    }
}

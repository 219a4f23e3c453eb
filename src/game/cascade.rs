//! Cascade Engine
//!
//! Resolves every chain reaction stemming from one placement.
//!
//! ## Traversal
//!
//! The worklist is a LIFO stack (depth-first). A detonating cell pushes its
//! neighbors in north, east, south, west order, so the most recently pushed
//! neighbor (west, when present) is examined next. This matches the move
//! order existing clients replay with.
//!
//! ## Termination
//!
//! Capped placement alone does not bound a cascade: a 2x2 board holding four
//! bombs cycles forever without ever losing one. Each cascade is therefore
//! limited to [`Grid::detonation_limit`] detonations (`rows * columns *
//! max_capacity`). Reaching the limit stops the cascade at the same point on
//! every copy of the grid and reports [`CascadeOutcome::Truncated`].
//!
//! ## Modes
//!
//! - **Eager** ([`add_bomb`]): runs to completion without yielding. Used by the
//!   turn authority.
//! - **Staged** ([`add_bomb_staged`]): awaits a [`DetonationObserver`] after each
//!   detonation. Used by replicas to pace presentation effects.
//!
//! Both drive the same [`Cascade`] step machine, so they produce identical
//! grids and identical detonation sequences.

use std::future::Future;

#[cfg(feature = "debug-tracing")]
use tracing::trace;

use crate::game::events::{CascadeOutcome, CascadeReport, Detonation};
use crate::game::grid::{Grid, Position};
use crate::game::state::PlayerId;

/// Hook awaited between detonations in staged mode.
pub trait DetonationObserver {
    /// Called after `detonation` has been applied to `grid`.
    ///
    /// The cascade resumes once the returned future completes.
    fn on_detonation(
        &mut self,
        grid: &Grid,
        detonation: &Detonation,
    ) -> impl Future<Output = ()> + Send;
}

/// No-op observer.
impl DetonationObserver for () {
    fn on_detonation(
        &mut self,
        _grid: &Grid,
        _detonation: &Detonation,
    ) -> impl Future<Output = ()> + Send {
        std::future::ready(())
    }
}

/// Step machine for one cascade.
///
/// Holds the worklist between steps; the grid is borrowed per step so that a
/// caller may await between steps while still owning the grid.
#[derive(Debug, Clone)]
pub struct Cascade {
    player: PlayerId,
    origin: Position,
    worklist: Vec<Position>,
    detonations: Vec<Detonation>,
    limit: usize,
    truncated: bool,
}

impl Cascade {
    /// Place the triggering bomb on `origin` and prime the worklist.
    ///
    /// # Panics
    /// Panics if `origin` lies outside the grid.
    pub fn start(grid: &mut Grid, player: PlayerId, origin: Position) -> Self {
        grid.place(player, origin);
        Self::from_origin(grid, player, origin)
    }

    /// Prime a cascade at `origin` without placing a bomb first.
    pub fn from_origin(grid: &Grid, player: PlayerId, origin: Position) -> Self {
        Self {
            player,
            origin,
            worklist: vec![origin],
            detonations: Vec::new(),
            limit: grid.detonation_limit(),
            truncated: false,
        }
    }

    /// Apply the next detonation, if any.
    ///
    /// Returns `None` once the worklist is empty or the limit is reached.
    pub fn step(&mut self, grid: &mut Grid) -> Option<Detonation> {
        while let Some(pos) = self.worklist.pop() {
            if !grid.is_critical(pos) {
                continue;
            }

            if self.detonations.len() >= self.limit {
                self.truncated = true;
                self.worklist.clear();
                return None;
            }

            grid.clear(pos);
            let neighbors: Vec<Position> = grid.neighbors(pos).collect();
            for &neighbor in &neighbors {
                grid.place(self.player, neighbor);
            }
            self.worklist.extend(neighbors);

            let detonation = Detonation {
                sequence: self.detonations.len() as u32,
                position: pos,
            };
            self.detonations.push(detonation);

            #[cfg(feature = "debug-tracing")]
            trace!(
                sequence = detonation.sequence,
                row = pos.row,
                column = pos.column,
                pending = self.worklist.len(),
                "detonation"
            );

            return Some(detonation);
        }
        None
    }

    /// Whether no further detonations will occur.
    pub fn is_finished(&self) -> bool {
        self.truncated || self.worklist.is_empty()
    }

    /// Detonations applied so far.
    pub fn detonations(&self) -> &[Detonation] {
        &self.detonations
    }

    /// Consume the machine into its report.
    pub fn into_report(self) -> CascadeReport {
        CascadeReport {
            player: self.player,
            origin: self.origin,
            detonations: self.detonations,
            outcome: if self.truncated {
                CascadeOutcome::Truncated
            } else {
                CascadeOutcome::Settled
            },
        }
    }
}

/// Place a bomb and resolve the full cascade eagerly.
///
/// # Panics
/// Panics if `origin` lies outside the grid.
pub fn add_bomb(grid: &mut Grid, player: PlayerId, origin: Position) -> CascadeReport {
    add_bomb_observed(grid, player, origin, |_, _| {})
}

/// Eager resolution with a synchronous per-detonation callback.
pub fn add_bomb_observed<F>(
    grid: &mut Grid,
    player: PlayerId,
    origin: Position,
    mut observer: F,
) -> CascadeReport
where
    F: FnMut(&Grid, &Detonation),
{
    let mut cascade = Cascade::start(grid, player, origin);
    while let Some(detonation) = cascade.step(grid) {
        observer(grid, &detonation);
    }
    cascade.into_report()
}

/// Place a bomb and resolve the cascade, suspending on `observer` after every
/// detonation.
pub async fn add_bomb_staged<O>(
    grid: &mut Grid,
    player: PlayerId,
    origin: Position,
    observer: &mut O,
) -> CascadeReport
where
    O: DetonationObserver,
{
    let mut cascade = Cascade::start(grid, player, origin);
    while let Some(detonation) = cascade.step(grid) {
        observer.on_detonation(grid, &detonation).await;
    }
    cascade.into_report()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::grid::{Cell, GridConfig};
    use proptest::prelude::*;

    const A: PlayerId = PlayerId::new([1; 16]);
    const B: PlayerId = PlayerId::new([2; 16]);
    const C: PlayerId = PlayerId::new([3; 16]);

    fn grid_with(config: GridConfig, cells: &[((usize, usize), u8, PlayerId)]) -> Grid {
        let mut raw = vec![Cell::EMPTY; config.rows * config.columns];
        for &((row, column), bombs, owner) in cells {
            raw[row * config.columns + column] = Cell::from_parts(bombs, Some(owner));
        }
        Grid::from_cells(config, raw).unwrap()
    }

    fn cell(grid: &Grid, row: usize, column: usize) -> (u8, Option<PlayerId>) {
        let c = grid.cell(Position::new(row, column));
        (c.bombs(), c.owner())
    }

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
    }

    /// Records each detonation and yields to the scheduler.
    #[derive(Default)]
    struct Recorder {
        seen: Vec<Detonation>,
        bombs_seen: Vec<usize>,
    }

    impl DetonationObserver for Recorder {
        async fn on_detonation(&mut self, grid: &Grid, detonation: &Detonation) {
            self.seen.push(*detonation);
            self.bombs_seen.push(grid.total_bombs());
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn test_corner_detonates_on_second_bomb() {
        let mut grid = Grid::default();

        let first = add_bomb(&mut grid, A, Position::new(0, 0));
        assert!(first.detonations.is_empty());
        assert_eq!(cell(&grid, 0, 0), (1, Some(A)));

        let second = add_bomb(&mut grid, A, Position::new(0, 0));
        assert_eq!(second.positions(), vec![Position::new(0, 0)]);
        assert_eq!(second.outcome, CascadeOutcome::Settled);
        assert_eq!(cell(&grid, 0, 0), (0, None));
        assert_eq!(cell(&grid, 0, 1), (1, Some(A)));
        assert_eq!(cell(&grid, 1, 0), (1, Some(A)));
        assert_eq!(grid.total_bombs(), 2);
    }

    #[test]
    fn test_interior_detonation_captures_neighbors() {
        let mut grid = grid_with(
            GridConfig::default(),
            &[
                ((2, 3), 3, A),
                ((1, 3), 1, B),
                ((2, 4), 1, B),
                ((3, 3), 1, B),
                ((2, 2), 1, B),
            ],
        );

        let report = add_bomb(&mut grid, A, Position::new(2, 3));

        assert_eq!(report.detonation_count(), 1);
        assert_eq!(cell(&grid, 2, 3), (0, None));
        for (row, column) in [(1, 3), (2, 4), (3, 3), (2, 2)] {
            assert_eq!(cell(&grid, row, column), (2, Some(A)));
        }
        assert_eq!(grid.sole_owner(), Some(A));
    }

    #[test]
    fn test_chain_reaction_order() {
        let mut grid = grid_with(GridConfig::default(), &[((0, 0), 1, A), ((0, 1), 2, A)]);

        let report = add_bomb(&mut grid, A, Position::new(0, 0));

        assert_eq!(report.positions(), vec![Position::new(0, 0), Position::new(0, 1)]);
        assert_eq!(report.detonations[1].sequence, 1);
        assert_eq!(cell(&grid, 0, 0), (1, Some(A)));
        assert_eq!(cell(&grid, 0, 1), (0, None));
        assert_eq!(cell(&grid, 0, 2), (1, Some(A)));
        assert_eq!(cell(&grid, 1, 0), (1, Some(A)));
        assert_eq!(cell(&grid, 1, 1), (1, Some(A)));
    }

    #[test]
    fn test_cycle_is_truncated_at_limit() {
        let config = GridConfig::new(2, 2);
        let mut grid = grid_with(config, &[((0, 0), 1, A), ((0, 1), 1, A), ((1, 0), 1, A)]);
        assert_eq!(grid.detonation_limit(), 8);

        let report = add_bomb(&mut grid, A, Position::new(0, 0));

        assert!(report.is_truncated());
        assert_eq!(report.detonation_count(), 8);
        // No bomb ever hits a full cell in this cycle.
        assert_eq!(grid.total_bombs(), 4);
    }

    #[test]
    fn test_saturated_board_hits_limit() {
        let mut cells = Vec::new();
        let layout = Grid::default();
        for (pos, _) in layout.iter() {
            cells.push(Cell::from_parts(layout.capacity(pos) - 1, Some(A)));
        }
        let mut grid = Grid::from_cells(GridConfig::default(), cells).unwrap();

        let report = add_bomb(&mut grid, A, Position::new(0, 0));
        assert_eq!(report.detonation_count(), 120);
        assert!(report.is_truncated());
    }

    #[test]
    fn test_capture_overrides_foreign_owner() {
        let mut grid = grid_with(GridConfig::default(), &[((0, 0), 1, A), ((0, 1), 2, B)]);

        add_bomb(&mut grid, A, Position::new(0, 0));

        // (0, 1) went to 3 (its capacity) as A's and detonated in turn.
        assert_eq!(cell(&grid, 0, 1), (0, None));
        assert!(grid.owners().iter().all(|&o| o == A));
    }

    #[test]
    fn test_observer_sees_every_detonation() {
        let mut grid = grid_with(GridConfig::default(), &[((0, 0), 1, A), ((0, 1), 2, A)]);
        let mut seen = Vec::new();

        let report = add_bomb_observed(&mut grid, A, Position::new(0, 0), |_, d| seen.push(*d));

        assert_eq!(seen, report.detonations);
    }

    #[test]
    fn test_step_machine_manual_drive() {
        let mut grid = grid_with(GridConfig::default(), &[((0, 0), 1, A), ((0, 1), 2, A)]);
        let mut cascade = Cascade::start(&mut grid, A, Position::new(0, 0));

        assert!(!cascade.is_finished());
        assert_eq!(cascade.step(&mut grid).map(|d| d.position), Some(Position::new(0, 0)));
        assert_eq!(cascade.step(&mut grid).map(|d| d.position), Some(Position::new(0, 1)));
        assert_eq!(cascade.step(&mut grid), None);
        assert!(cascade.is_finished());
        assert_eq!(cascade.detonations().len(), 2);
    }

    #[test]
    fn test_staged_matches_eager() {
        let start = grid_with(
            GridConfig::default(),
            &[((0, 0), 1, A), ((0, 1), 2, A), ((1, 1), 3, B), ((0, 2), 2, C)],
        );

        let mut eager_grid = start.clone();
        let eager = add_bomb(&mut eager_grid, A, Position::new(0, 0));

        let mut staged_grid = start.clone();
        let mut recorder = Recorder::default();
        let staged = runtime().block_on(add_bomb_staged(
            &mut staged_grid,
            A,
            Position::new(0, 0),
            &mut recorder,
        ));

        assert_eq!(eager_grid, staged_grid);
        assert_eq!(eager, staged);
        assert_eq!(recorder.seen, staged.detonations);
        assert_eq!(recorder.bombs_seen.len(), staged.detonation_count());
    }

    // =========================================================================
    // PROPERTIES
    // =========================================================================

    fn build_grid(rows: usize, columns: usize, raw: Vec<(u8, usize)>) -> Grid {
        let config = GridConfig::new(rows, columns);
        let layout = Grid::new(config).unwrap();
        let players = [A, B, C];
        let cells = layout
            .iter()
            .zip(raw)
            .map(|((pos, _), (bombs, owner))| {
                // Keep the board settled: every cell strictly below capacity.
                let bombs = bombs % layout.capacity(pos);
                let owner = (bombs > 0).then_some(players[owner]);
                Cell::from_parts(bombs, owner)
            })
            .collect();
        Grid::from_cells(config, cells).unwrap()
    }

    fn arb_grid() -> impl Strategy<Value = Grid> {
        (1usize..=6, 2usize..=6).prop_flat_map(|(rows, columns)| {
            prop::collection::vec((0u8..4, 0usize..3), rows * columns)
                .prop_map(move |raw| build_grid(rows, columns, raw))
        })
    }

    fn pick(grid: &Grid, index: prop::sample::Index) -> Position {
        let i = index.index(grid.rows() * grid.columns());
        Position::new(i / grid.columns(), i % grid.columns())
    }

    proptest! {
        #[test]
        fn prop_capacity_and_ownership_invariants(
            grid in arb_grid(),
            index in any::<prop::sample::Index>(),
            who in 0usize..3,
        ) {
            let mut grid = grid;
            let origin = pick(&grid, index);
            let player = [A, B, C][who];

            let mut violations = 0usize;
            add_bomb_observed(&mut grid, player, origin, |g, _| {
                for (pos, cell) in g.iter() {
                    if cell.bombs() > g.capacity(pos) || cell.owner().is_none() != cell.is_empty() {
                        violations += 1;
                    }
                }
            });

            prop_assert_eq!(violations, 0);
            for (pos, cell) in grid.iter() {
                prop_assert!(cell.bombs() <= grid.capacity(pos));
                prop_assert_eq!(cell.owner().is_none(), cell.is_empty());
            }
        }

        #[test]
        fn prop_terminates_within_bound(
            grid in arb_grid(),
            index in any::<prop::sample::Index>(),
        ) {
            let mut grid = grid;
            let origin = pick(&grid, index);
            let limit = grid.detonation_limit();

            let report = add_bomb(&mut grid, A, origin);

            prop_assert!(report.detonation_count() <= limit);
            if report.outcome == CascadeOutcome::Settled {
                for (pos, _) in grid.iter() {
                    prop_assert!(!grid.is_critical(pos));
                }
            }
        }

        #[test]
        fn prop_deterministic(
            grid in arb_grid(),
            index in any::<prop::sample::Index>(),
            who in 0usize..3,
        ) {
            let origin = pick(&grid, index);
            let player = [A, B, C][who];

            let mut first = grid.clone();
            let mut second = grid.clone();
            let r1 = add_bomb(&mut first, player, origin);
            let r2 = add_bomb(&mut second, player, origin);

            prop_assert_eq!(&first, &second);
            prop_assert_eq!(r1, r2);
        }

        #[test]
        fn prop_staged_equals_eager(
            grid in arb_grid(),
            index in any::<prop::sample::Index>(),
        ) {
            let origin = pick(&grid, index);

            let mut eager_grid = grid.clone();
            let eager = add_bomb(&mut eager_grid, B, origin);

            let mut staged_grid = grid.clone();
            let mut recorder = Recorder::default();
            let staged = runtime().block_on(add_bomb_staged(&mut staged_grid, B, origin, &mut recorder));

            prop_assert_eq!(&eager_grid, &staged_grid);
            prop_assert_eq!(&eager.detonations, &recorder.seen);
            prop_assert_eq!(eager, staged);
        }
    }
}

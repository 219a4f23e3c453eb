//! Game Logic Module
//!
//! Grid model and cascade rules. 100% deterministic.
//!
//! ## Module Structure
//!
//! - `state`: Player identity
//! - `grid`: Cells, dimensions, capacity, adjacency, placement
//! - `events`: Detonation events and cascade reports
//! - `cascade`: Eager and staged chain-reaction resolution
//! - `transcript`: Move history and replay verification

pub mod state;
pub mod grid;
pub mod events;
pub mod cascade;
pub mod transcript;

// Re-export key types
pub use state::PlayerId;
pub use grid::{Cell, Grid, GridConfig, GridError, Position, DEFAULT_ROWS, DEFAULT_COLUMNS};
pub use events::{CascadeOutcome, CascadeReport, Detonation};
pub use cascade::{Cascade, DetonationObserver, add_bomb, add_bomb_observed, add_bomb_staged};
pub use transcript::{MoveRecord, MoveTranscript, TranscriptError, replay_transcript};

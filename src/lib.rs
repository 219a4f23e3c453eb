//! # Chain Reaction Game Server
//!
//! Authoritative turn server and deterministic cascade engine for a
//! multiplayer chain-reaction grid game.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  CHAIN REACTION SERVER                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/            - Deterministic primitives                 │
//! │  └── hash.rs      - State hashing for drift detection        │
//! │                                                              │
//! │  game/            - Game rules (deterministic)               │
//! │  ├── state.rs     - Player identity                          │
//! │  ├── grid.rs      - Cells, capacity, adjacency, placement    │
//! │  ├── events.rs    - Detonation events                        │
//! │  ├── cascade.rs   - Eager and staged chain reactions         │
//! │  └── transcript.rs- Move history and replay                  │
//! │                                                              │
//! │  network/         - Networking (non-deterministic)           │
//! │  ├── protocol.rs  - Message types                            │
//! │  ├── session.rs   - Turn authority and room registry         │
//! │  ├── replica.rs   - Participant grid copy                    │
//! │  ├── client.rs    - WebSocket participant                    │
//! │  └── server.rs    - WebSocket server                         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Determinism Guarantee
//!
//! The `core/` and `game/` modules are **100% deterministic**:
//! - Cells are addressed by `(row, column)`; adjacency is computed, never stored
//! - Fixed neighbor order and a LIFO worklist in every cascade
//! - No HashMap (uses BTreeMap/BTreeSet for sorted iteration)
//! - No system time or randomness
//!
//! The authority broadcasts only move coordinates. Every participant re-runs
//! the cascade on its own copy and arrives at the same grid.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use core::hash::{StateHash, StateHasher};
pub use game::state::PlayerId;
pub use game::grid::{Cell, Grid, GridConfig, GridError, Position};
pub use game::cascade::{add_bomb, add_bomb_staged, DetonationObserver};
pub use game::events::{CascadeOutcome, CascadeReport, Detonation};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

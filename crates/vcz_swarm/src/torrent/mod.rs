//! Torrent wide state shared by every connection of a swarm.
//!
//! The [`Scheduler`] decides which blocks to request from which peer and
//! the [`Choker`] decides which peers we upload to. Both are plain values
//! without locks, a torrent keeps them behind its own lock, for example:
//!
//! ```
//! use std::sync::{Arc, Mutex};
//! use tokio::sync::mpsc;
//! use vcz_swarm::{
//!     config::SchedulerConfig,
//!     peer::{PeerCtx, PeerId},
//!     torrent::{Piece, PiecesetDescriptor, Scheduler},
//! };
//!
//! let (tx, _assembled) = mpsc::unbounded_channel::<(PeerId, Piece)>();
//! let pieceset = PiecesetDescriptor::new(1 << 20, 1 << 18);
//! let scheduler: Scheduler<PeerCtx> =
//!     Scheduler::new(pieceset, &SchedulerConfig::default(), tx);
//! let scheduler = Arc::new(Mutex::new(scheduler));
//!
//! assert_eq!(scheduler.lock().unwrap().needed_piece_count(), 4);
//! ```

mod choker;
mod piece;
mod scheduler;
mod types;

// re-exports
pub use choker::*;
pub use piece::*;
pub use scheduler::*;
pub use types::*;

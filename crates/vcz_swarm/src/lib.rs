//! The swarm engine of Vincenzo, a BitTorrent client.
//!
//! This crate holds the pieces of a client that sit between the sockets and
//! the disk, without doing any IO itself:
//!
//! * [`peer::Parser`], an incremental parser of the peer wire protocol,
//!   including the Fast extension, the Extension protocol and the Merkle
//!   and Elastic extensions. Parsed messages are handed to a
//!   [`peer::ProtocolConsumer`].
//! * [`peer::PeerCodec`], the [`tokio_util::codec`] wrapper over the parser,
//!   for use with `Framed` sockets.
//! * [`torrent::Scheduler`], which decides which blocks to request from
//!   which peer, and reassembles pieces from the blocks that arrive.
//! * [`torrent::Choker`], the policy deciding which peers we upload to.
//!
//! # Example
//!
//! Decoding messages from a stream of bytes:
//!
//! ```
//! use std::collections::VecDeque;
//! use vcz_swarm::{
//!     bitfield::Reserved,
//!     extensions::Handshake,
//!     peer::{Event, Parser},
//! };
//!
//! let mut parser = Parser::default();
//! let mut events: VecDeque<Event> = VecDeque::new();
//!
//! let handshake = Handshake::new([1; 20], [2; 20], Reserved::new(true, true));
//! parser.feed(&handshake.serialize(), &mut events).unwrap();
//! parser.feed(&[0, 0, 0, 1, 2], &mut events).unwrap();
//!
//! assert_eq!(events.pop_back(), Some(Event::Interested));
//! ```

pub mod bitfield;
pub mod config;
pub mod counter;
pub mod error;
pub mod extensions;
pub mod peer;
pub mod torrent;

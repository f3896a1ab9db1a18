//! A remote peer in the network that downloads and uploads data.
//!
//! The scheduling side never touches sockets, it sees each peer through the
//! [`Peer`] trait. [`PeerCtx`] is the implementation that forwards commands
//! to the task owning the connection through a channel.
mod codec;
mod consumer;
mod parser;
mod types;

// re-exports
pub use codec::*;
pub use consumer::*;
pub use parser::*;
pub use types::*;

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Mutex, RwLock,
    },
    time::Instant,
};

use tokio::sync::mpsc;
use tracing::debug;

use crate::{
    bitfield::{Bitfield, VczBitfield},
    counter::Counter,
    extensions::core::BlockInfo,
};

/// What the scheduler and the choker can see and do on a peer.
pub trait Peer: Send + Sync {
    fn id(&self) -> PeerId;

    /// Snapshot of the pieces advertised by the peer.
    fn bitfield(&self) -> Bitfield;

    /// Total length of the torrent in the peer's view.
    fn view_length(&self) -> u64;

    /// Client is choking the peer.
    fn am_choking(&self) -> bool;

    /// Client is interested in downloading from peer.
    fn am_interested(&self) -> bool;

    /// The peer is choking the client.
    fn peer_choking(&self) -> bool;

    /// The peer is interested in downloading from the client.
    fn peer_interested(&self) -> bool;

    /// When we last choked or unchoked the peer.
    fn choke_changed_at(&self) -> Option<Instant>;

    /// Bytes received from the peer in the trailing window.
    fn window_downloaded(&self, now: Instant) -> u64;

    /// Bytes sent to the peer in the trailing window.
    fn window_uploaded(&self, now: Instant) -> u64;

    /// Cancel outstanding requests, sent as one batch.
    fn cancel_requests(&self, blocks: Vec<BlockInfo>);

    /// Returns `true` if the state changed.
    fn set_am_choking(&self, choking: bool, now: Instant) -> bool;

    fn set_am_interested(&self, interested: bool);

    fn reject_piece(&self, piece: usize);
}

/// Shared state of a connected peer.
#[derive(Debug)]
pub struct PeerCtx {
    pub id: PeerId,
    pub tx: mpsc::UnboundedSender<PeerMsg>,

    /// Counter for upload and download rates, in the local peer perspective.
    pub counter: Counter,

    pub am_choking: AtomicBool,
    pub am_interested: AtomicBool,
    pub peer_choking: AtomicBool,
    pub peer_interested: AtomicBool,

    /// Pieces that this peer has, and hasn't.
    pub pieces: RwLock<Bitfield>,
    pub view_length: AtomicU64,
    pub choke_changed_at: Mutex<Option<Instant>>,
}

impl PeerCtx {
    /// Connections start out choked and not interested on both sides.
    pub fn new(
        id: impl Into<PeerId>,
        view_length: u64,
        tx: mpsc::UnboundedSender<PeerMsg>,
    ) -> Self {
        Self {
            id: id.into(),
            tx,
            counter: Counter::default(),
            am_choking: AtomicBool::new(true),
            am_interested: AtomicBool::new(false),
            peer_choking: AtomicBool::new(true),
            peer_interested: AtomicBool::new(false),
            pieces: RwLock::new(Bitfield::default()),
            view_length: AtomicU64::new(view_length),
            choke_changed_at: Mutex::new(None),
        }
    }

    fn send(&self, msg: PeerMsg) {
        if self.tx.send(msg).is_err() {
            debug!("{} connection task is gone", self.id);
        }
    }

    pub fn set_pieces(&self, pieces: Bitfield) {
        *self.pieces.write().unwrap_or_else(|e| e.into_inner()) = pieces;
    }

    pub fn set_have(&self, piece: usize) {
        self.pieces.write().unwrap_or_else(|e| e.into_inner()).safe_set(piece);
    }

    pub fn set_view_length(&self, view_length: u64) {
        self.view_length.store(view_length, Ordering::Relaxed);
    }

    pub fn set_peer_choking(&self, choking: bool) {
        self.peer_choking.store(choking, Ordering::Relaxed);
    }

    pub fn set_peer_interested(&self, interested: bool) {
        self.peer_interested.store(interested, Ordering::Relaxed);
    }
}

impl Peer for PeerCtx {
    fn id(&self) -> PeerId {
        self.id
    }

    fn bitfield(&self) -> Bitfield {
        self.pieces.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn view_length(&self) -> u64 {
        self.view_length.load(Ordering::Relaxed)
    }

    fn am_choking(&self) -> bool {
        self.am_choking.load(Ordering::Relaxed)
    }

    fn am_interested(&self) -> bool {
        self.am_interested.load(Ordering::Relaxed)
    }

    fn peer_choking(&self) -> bool {
        self.peer_choking.load(Ordering::Relaxed)
    }

    fn peer_interested(&self) -> bool {
        self.peer_interested.load(Ordering::Relaxed)
    }

    fn choke_changed_at(&self) -> Option<Instant> {
        *self.choke_changed_at.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn window_downloaded(&self, now: Instant) -> u64 {
        self.counter.window_downloaded(now)
    }

    fn window_uploaded(&self, now: Instant) -> u64 {
        self.counter.window_uploaded(now)
    }

    fn cancel_requests(&self, blocks: Vec<BlockInfo>) {
        if blocks.is_empty() {
            return;
        }
        debug!("{} > cancel {} blocks", self.id, blocks.len());
        self.send(PeerMsg::CancelBlocks(blocks));
    }

    fn set_am_choking(&self, choking: bool, now: Instant) -> bool {
        if self.am_choking.swap(choking, Ordering::Relaxed) == choking {
            return false;
        }

        *self.choke_changed_at.lock().unwrap_or_else(|e| e.into_inner()) =
            Some(now);

        if choking {
            debug!("{} > choke", self.id);
            self.send(PeerMsg::Choke);
        } else {
            debug!("{} > unchoke", self.id);
            self.send(PeerMsg::Unchoke);
        }
        true
    }

    fn set_am_interested(&self, interested: bool) {
        if self.am_interested.swap(interested, Ordering::Relaxed) == interested
        {
            return;
        }

        if interested {
            debug!("{} > interested", self.id);
            self.send(PeerMsg::Interested);
        } else {
            debug!("{} > not_interested", self.id);
            self.send(PeerMsg::NotInterested);
        }
    }

    fn reject_piece(&self, piece: usize) {
        debug!("{} > reject piece {piece}", self.id);
        self.send(PeerMsg::RejectPiece(piece));
    }
}

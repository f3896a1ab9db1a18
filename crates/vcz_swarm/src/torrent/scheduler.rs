//! Assignment of blocks to peers.
//!
//! # Locking
//!
//! The scheduler has no internal locking. It is shared by every connection
//! of a torrent, so the caller must wrap it in one torrent wide lock and
//! hold that lock across every call, including the allocate, handle block
//! and cancel sequence of a connection. Every `&mut self` method below
//! assumes that lock is held.
//!
//! # Duplication
//!
//! A piece may be claimed by more than one peer at the same time. When one
//! of them completes it, the requests that the other peers still have
//! outstanding are cancelled and the piece waits for verification: it is
//! not handed out again until the caller either marks it as not needed or
//! reports that the verification failed.

use std::{collections::VecDeque, sync::Arc};

use bytes::Bytes;
use hashbrown::{HashMap, HashSet};
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use tracing::{debug, trace};

use super::{Piece, PieceListener, PiecesetDescriptor};
use crate::{
    bitfield::{Bitfield, VczBitfield},
    config::SchedulerConfig,
    error::Error,
    extensions::{core::BlockInfo, elastic::ViewSignature, merkle::HashChain},
    peer::{Peer, PeerId},
};

/// A partially downloaded piece whose peer went away.
#[derive(Debug)]
struct Orphan {
    piece: Piece,
    /// Requests that were in flight with the departed peer.
    outstanding: Vec<BlockInfo>,
}

impl Orphan {
    /// Missing blocks, the ones never requested first.
    fn blocks(&self) -> Vec<BlockInfo> {
        let (stale, mut fresh): (Vec<_>, Vec<_>) = self
            .piece
            .missing_blocks()
            .into_iter()
            .partition(|b| self.outstanding.contains(b));
        fresh.extend(stale);
        fresh
    }
}

/// A set with a maximum size, the oldest entry goes first.
#[derive(Debug, Default)]
struct BoundedSet {
    items: VecDeque<usize>,
    max: usize,
}

impl BoundedSet {
    fn new(max: usize) -> Self {
        Self { items: VecDeque::with_capacity(max), max }
    }

    fn insert(&mut self, piece: usize) {
        if self.max == 0 || self.items.contains(&piece) {
            return;
        }
        if self.items.len() == self.max {
            self.items.pop_front();
        }
        self.items.push_back(piece);
    }

    fn contains(&self, piece: usize) -> bool {
        self.items.contains(&piece)
    }

    fn remove(&mut self, piece: usize) {
        self.items.retain(|p| *p != piece);
    }

    fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.items.iter().copied()
    }
}

/// Requests and pieces of one peer.
struct PeerAllocation<P: ?Sized> {
    peer: Arc<P>,
    /// Pieces of the peer counted in the availability.
    bitfield: Bitfield,
    unissued: VecDeque<BlockInfo>,
    issued: HashSet<BlockInfo>,
    pieces: HashMap<usize, Piece>,
    allowed_fast: BoundedSet,
    suggested: BoundedSet,
}

impl<P: Peer + ?Sized> PeerAllocation<P> {
    /// Drop every request of `piece`, returns the issued ones ordered by
    /// offset.
    fn drop_piece(&mut self, piece: usize) -> Vec<BlockInfo> {
        self.unissued.retain(|b| b.index != piece);
        self.pieces.remove(&piece);
        self.take_issued(|b| b.index == piece)
    }

    fn take_issued(
        &mut self,
        f: impl Fn(&BlockInfo) -> bool,
    ) -> Vec<BlockInfo> {
        let mut taken: Vec<BlockInfo> =
            self.issued.iter().filter(|b| f(*b)).copied().collect();
        for b in &taken {
            self.issued.remove(b);
        }
        taken.sort_unstable();
        taken
    }

    fn cancel(&self, blocks: Vec<BlockInfo>) {
        if !blocks.is_empty() {
            self.peer.cancel_requests(blocks);
        }
    }

    fn update_interest(&self, needed: &Bitfield) {
        self.peer.set_am_interested(self.bitfield.intersects(needed));
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Source {
    AllowedFast,
    Orphan,
    Suggested,
    Queue,
}

/// The request allocation engine of one torrent.
pub struct Scheduler<P: Peer + ?Sized, R: Rng = StdRng> {
    pieceset: PiecesetDescriptor,
    block_len: u32,
    max_allowed_fast: usize,
    max_suggested: usize,

    /// Pieces that we still need.
    needed: Bitfield,
    /// Always equal to `needed.count_ones()`.
    needed_count: usize,
    /// Needed pieces in random order, claimed pieces go to the back.
    queue: VecDeque<usize>,
    orphans: HashMap<usize, Orphan>,
    /// Assembled pieces given to the listener and not verified yet.
    verifying: HashSet<usize>,
    /// How many registered peers have each piece.
    availability: Vec<usize>,

    peers: HashMap<PeerId, PeerAllocation<P>>,
    listener: Box<dyn PieceListener>,
    rng: R,
}

impl<P: Peer + ?Sized> Scheduler<P> {
    /// Every piece starts as needed. The queue is shuffled with the seed of
    /// the configuration, if any.
    pub fn new(
        pieceset: PiecesetDescriptor,
        config: &SchedulerConfig,
        listener: impl PieceListener + 'static,
    ) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self::with_rng(pieceset, config, listener, rng)
    }
}

impl<P: Peer + ?Sized, R: Rng> Scheduler<P, R> {
    pub fn with_rng(
        pieceset: PiecesetDescriptor,
        config: &SchedulerConfig,
        listener: impl PieceListener + 'static,
        rng: R,
    ) -> Self {
        let count = pieceset.piece_count();
        let mut scheduler = Self {
            pieceset,
            block_len: config.block_len,
            max_allowed_fast: config.max_allowed_fast,
            max_suggested: config.max_suggested,
            needed: Bitfield::repeat(true, count),
            needed_count: count,
            queue: VecDeque::with_capacity(count),
            orphans: HashMap::new(),
            verifying: HashSet::new(),
            availability: vec![0; count],
            peers: HashMap::new(),
            listener: Box::new(listener),
            rng,
        };
        scheduler.rebuild_queue();
        scheduler
    }

    pub fn pieceset(&self) -> PiecesetDescriptor {
        self.pieceset
    }

    pub fn needed_pieces(&self) -> &Bitfield {
        &self.needed
    }

    pub fn needed_piece_count(&self) -> usize {
        self.needed_count
    }

    /// Needed pieces in the order they will be claimed.
    pub fn queued_pieces(&self) -> impl Iterator<Item = usize> + '_ {
        self.queue.iter().copied()
    }

    /// How many registered peers advertise `piece`.
    pub fn availability(&self, piece: usize) -> usize {
        self.availability.get(piece).copied().unwrap_or(0)
    }

    pub fn is_orphaned(&self, piece: usize) -> bool {
        self.orphans.contains_key(&piece)
    }

    /// If `piece` was assembled and waits for the verdict of the caller.
    pub fn is_verifying(&self, piece: usize) -> bool {
        self.verifying.contains(&piece)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Requests sent to the peer and not answered yet.
    pub fn issued_requests(
        &self,
        peer: &PeerId,
    ) -> Result<Vec<BlockInfo>, Error> {
        let alloc =
            self.peers.get(peer).ok_or(Error::PeerNotFound(*peer))?;
        let mut issued: Vec<BlockInfo> = alloc.issued.iter().copied().collect();
        issued.sort_unstable();
        Ok(issued)
    }

    fn rebuild_queue(&mut self) {
        let mut pieces: Vec<usize> = self
            .needed
            .iter_ones()
            .filter(|p| !self.verifying.contains(p))
            .collect();
        pieces.shuffle(&mut self.rng);
        self.queue = pieces.into();
    }

    /// A copy of `bitfield` with exactly one bit per piece.
    fn fit(&self, bitfield: &Bitfield) -> Bitfield {
        let mut bitfield = bitfield.clone();
        bitfield.resize(self.pieceset.piece_count(), false);
        bitfield
    }

    fn rotate_to_back(&mut self, piece: usize) {
        if let Some(pos) = self.queue.iter().position(|p| *p == piece) {
            self.queue.remove(pos);
            self.queue.push_back(piece);
        }
    }

    /// If the piece has the same boundaries in the view of the peer as in
    /// ours. A view length of 0 means the peer never advertised one.
    fn same_boundaries(&self, view_length: u64, piece: usize) -> bool {
        if view_length == 0 {
            return true;
        }
        let theirs = self.pieceset.with_length(view_length);
        theirs.piece_len(piece) == self.pieceset.piece_len(piece)
    }

    fn claimable(&self, alloc: &PeerAllocation<P>, piece: usize) -> bool {
        self.needed.has(piece)
            && !self.verifying.contains(&piece)
            && alloc.bitfield.has(piece)
            && !alloc.pieces.contains_key(&piece)
            && self.same_boundaries(alloc.peer.view_length(), piece)
    }

    /// Pick a new piece for the peer and queue its blocks, returns `false`
    /// if there is nothing left to claim.
    fn claim(&mut self, id: &PeerId, allowed_fast_only: bool) -> bool {
        let Some(alloc) = self.peers.get(id) else { return false };

        let found = if allowed_fast_only {
            alloc
                .allowed_fast
                .iter()
                .find(|p| self.claimable(alloc, *p))
                .map(|p| (p, Source::AllowedFast))
        } else {
            let mut orphans: Vec<usize> =
                self.orphans.keys().copied().collect();
            orphans.sort_unstable();

            orphans
                .into_iter()
                .find(|p| self.claimable(alloc, *p))
                .map(|p| (p, Source::Orphan))
                .or_else(|| {
                    alloc
                        .suggested
                        .iter()
                        .find(|p| self.claimable(alloc, *p))
                        .map(|p| (p, Source::Suggested))
                })
                .or_else(|| {
                    self.queue
                        .iter()
                        .copied()
                        .find(|p| self.claimable(alloc, *p))
                        .map(|p| (p, Source::Queue))
                })
        };

        let Some((index, source)) = found else { return false };
        trace!("{id} claimed piece {index} from {source:?}");

        let (piece, blocks) = match self.orphans.remove(&index) {
            Some(orphan) => {
                let blocks = orphan.blocks();
                (orphan.piece, blocks)
            }
            None => {
                let piece = Piece::new(
                    index,
                    self.pieceset.piece_len(index),
                    self.block_len,
                );
                let blocks = piece.missing_blocks();
                (piece, blocks)
            }
        };

        self.rotate_to_back(index);

        let Some(alloc) = self.peers.get_mut(id) else { return false };
        if source == Source::Suggested {
            alloc.suggested.remove(index);
        }
        alloc.unissued.extend(blocks);
        alloc.pieces.insert(index, piece);

        true
    }

    /// Hand out up to `n` requests to the peer.
    ///
    /// Blocks of pieces the peer already holds go first. New pieces are
    /// claimed from the orphans, then the pieces suggested by the peer,
    /// then the shuffled queue. With `allowed_fast_only`, only pieces that
    /// the peer allows us to download while choked are considered.
    ///
    /// Requires the torrent lock.
    pub fn allocate_requests(
        &mut self,
        id: &PeerId,
        n: usize,
        allowed_fast_only: bool,
    ) -> Result<Vec<BlockInfo>, Error> {
        if !self.peers.contains_key(id) {
            return Err(Error::PeerNotFound(*id));
        }

        let mut requests = Vec::with_capacity(n);

        loop {
            if let Some(alloc) = self.peers.get_mut(id) {
                let mut i = 0;
                while requests.len() < n && i < alloc.unissued.len() {
                    let block = alloc.unissued[i];
                    if allowed_fast_only
                        && !alloc.allowed_fast.contains(block.index)
                    {
                        i += 1;
                        continue;
                    }
                    alloc.unissued.remove(i);
                    if alloc.issued.insert(block) {
                        requests.push(block);
                    }
                }
            }

            if requests.len() >= n || !self.claim(id, allowed_fast_only) {
                break;
            }
        }

        if !requests.is_empty() {
            debug!("{id} allocated {} requests", requests.len());
        }

        Ok(requests)
    }

    /// A block arrived from the peer.
    ///
    /// Returns `true` if the block completed its piece, which is then given
    /// to the listener. The requests of the other peers for that piece are
    /// cancelled and the piece is not claimed again until the caller calls
    /// [`Self::set_piece_not_needed`] or
    /// [`Self::piece_verification_failed`].
    ///
    /// Requires the torrent lock.
    pub fn handle_block(
        &mut self,
        id: &PeerId,
        info: &BlockInfo,
        signature: Option<ViewSignature>,
        hash_chain: Option<HashChain>,
        data: Bytes,
    ) -> Result<bool, Error> {
        let alloc = self.peers.get_mut(id).ok_or(Error::PeerNotFound(*id))?;
        alloc.issued.remove(info);

        let Some(piece) = alloc.pieces.get_mut(&info.index) else {
            trace!("{id} block of untracked piece {}", info.index);
            return Ok(false);
        };

        if hash_chain.is_some() {
            piece.hash_chain = hash_chain;
        }
        if signature.is_some() {
            piece.signature = signature;
        }

        if !piece.write_block(info, &data)? {
            // a block that arrived before we asked for it
            alloc.unissued.retain(|b| b != info);
            return Ok(false);
        }

        alloc.unissued.retain(|b| b.index != info.index);
        let Some(piece) = alloc.pieces.remove(&info.index) else {
            return Ok(false);
        };

        debug!("{id} assembled piece {}", info.index);

        let index = info.index;
        self.verifying.insert(index);
        self.queue.retain(|p| *p != index);
        self.orphans.remove(&index);

        for alloc in self.peers.values_mut() {
            let cancelled = alloc.drop_piece(index);
            alloc.cancel(cancelled);
        }

        self.listener.piece_assembled(*id, piece);

        Ok(true)
    }

    /// The assembled piece did not pass verification, download it again.
    ///
    /// The piece goes to the back of the queue, so it is not claimed again
    /// right away by the peer that sent the bad data.
    ///
    /// Requires the torrent lock.
    pub fn piece_verification_failed(&mut self, piece: usize) {
        if !self.verifying.remove(&piece) {
            return;
        }
        if self.needed.has(piece) {
            debug!("piece {piece} failed verification");
            self.queue.push_back(piece);
        }
    }

    /// Replace the needed pieces.
    ///
    /// The queue is reshuffled, interest is recomputed for every peer and
    /// requests of pieces no longer needed are cancelled, one batch per
    /// peer.
    ///
    /// Requires the torrent lock.
    pub fn set_needed_pieces(&mut self, needed: &Bitfield) {
        self.needed = self.fit(needed);
        self.needed_count = self.needed.count_ones();
        let needed = &self.needed;
        self.verifying.retain(|p| needed.has(*p));
        self.rebuild_queue();

        let needed = &self.needed;
        self.orphans.retain(|index, _| needed.has(*index));

        for alloc in self.peers.values_mut() {
            alloc.unissued.retain(|b| needed.has(b.index));
            alloc.pieces.retain(|index, _| needed.has(*index));
            let cancelled = alloc.take_issued(|b| !needed.has(b.index));
            alloc.cancel(cancelled);
            alloc.update_interest(needed);
        }

        debug!("needed pieces set, {} remaining", self.needed_count);
    }

    /// Stop downloading `piece`, usually because it was verified.
    ///
    /// Requires the torrent lock.
    pub fn set_piece_not_needed(&mut self, piece: usize) {
        if self.needed.has(piece) {
            self.needed.set(piece, false);
            self.needed_count -= 1;
        }

        self.queue.retain(|p| *p != piece);
        self.orphans.remove(&piece);
        self.verifying.remove(&piece);

        let needed = &self.needed;
        let none_needed = self.needed_count == 0;

        for alloc in self.peers.values_mut() {
            alloc.suggested.remove(piece);
            let cancelled = alloc.drop_piece(piece);
            alloc.cancel(cancelled);

            if none_needed {
                alloc.peer.set_am_interested(false);
            } else if alloc.bitfield.has(piece) {
                alloc.update_interest(needed);
            }
        }

        trace!("piece {piece} not needed, {} remaining", self.needed_count);
    }

    /// Start tracking a peer. Its advertised pieces are counted and our
    /// interest in it is signaled.
    ///
    /// Requires the torrent lock.
    pub fn peer_registered(&mut self, peer: Arc<P>) -> Result<(), Error> {
        let id = peer.id();
        if self.peers.contains_key(&id) {
            return Err(Error::PeerAlreadyRegistered(id));
        }

        let bitfield = self.fit(&peer.bitfield());
        for piece in bitfield.iter_ones() {
            self.availability[piece] += 1;
        }

        let alloc = PeerAllocation {
            peer,
            bitfield,
            unissued: VecDeque::new(),
            issued: HashSet::new(),
            pieces: HashMap::new(),
            allowed_fast: BoundedSet::new(self.max_allowed_fast),
            suggested: BoundedSet::new(self.max_suggested),
        };
        alloc.update_interest(&self.needed);
        self.peers.insert(id, alloc);

        debug!("{id} registered");
        Ok(())
    }

    /// Stop tracking a peer. Its pieces in progress become orphans, unless
    /// the same piece was already orphaned by another peer, in which case
    /// the first orphan is kept.
    ///
    /// Requires the torrent lock.
    pub fn peer_deregistered(&mut self, id: &PeerId) -> Result<(), Error> {
        let alloc = self.peers.remove(id).ok_or(Error::PeerNotFound(*id))?;

        for piece in alloc.bitfield.iter_ones() {
            if let Some(count) = self.availability.get_mut(piece) {
                *count = count.saturating_sub(1);
            }
        }

        let mut pieces: Vec<(usize, Piece)> =
            alloc.pieces.into_iter().collect();
        pieces.sort_unstable_by_key(|(index, _)| *index);

        for (index, piece) in pieces {
            if !self.needed.has(index) || self.orphans.contains_key(&index) {
                continue;
            }
            let mut outstanding: Vec<BlockInfo> = alloc
                .issued
                .iter()
                .filter(|b| b.index == index)
                .copied()
                .collect();
            outstanding.sort_unstable();

            trace!("{id} left piece {index} orphaned");
            self.orphans.insert(index, Orphan { piece, outstanding });
        }

        debug!("{id} deregistered");
        Ok(())
    }

    /// The peer announced a new piece.
    ///
    /// Requires the torrent lock.
    pub fn peer_have(
        &mut self,
        id: &PeerId,
        piece: usize,
    ) -> Result<(), Error> {
        let alloc = self.peers.get_mut(id).ok_or(Error::PeerNotFound(*id))?;

        if piece >= alloc.bitfield.len() || alloc.bitfield.has(piece) {
            return Ok(());
        }

        alloc.bitfield.set(piece, true);
        self.availability[piece] += 1;

        if self.needed.has(piece) {
            alloc.peer.set_am_interested(true);
        }

        Ok(())
    }

    /// The peer replaced its whole bitfield, from a bitfield, have all or
    /// have none message.
    ///
    /// Requires the torrent lock.
    pub fn peer_bitfield(
        &mut self,
        id: &PeerId,
        bitfield: &Bitfield,
    ) -> Result<(), Error> {
        let bitfield = self.fit(bitfield);
        let alloc = self.peers.get_mut(id).ok_or(Error::PeerNotFound(*id))?;

        for piece in alloc.bitfield.iter_ones() {
            self.availability[piece] =
                self.availability[piece].saturating_sub(1);
        }
        for piece in bitfield.iter_ones() {
            self.availability[piece] += 1;
        }

        alloc.bitfield = bitfield;
        alloc.update_interest(&self.needed);

        Ok(())
    }

    /// The peer allows us to request `piece` while it chokes us.
    ///
    /// Requires the torrent lock.
    pub fn add_allowed_fast(
        &mut self,
        id: &PeerId,
        piece: usize,
    ) -> Result<(), Error> {
        let alloc = self.peers.get_mut(id).ok_or(Error::PeerNotFound(*id))?;
        alloc.allowed_fast.insert(piece);
        Ok(())
    }

    /// The peer suggests that we download `piece`.
    ///
    /// Requires the torrent lock.
    pub fn add_suggested(
        &mut self,
        id: &PeerId,
        piece: usize,
    ) -> Result<(), Error> {
        let alloc = self.peers.get_mut(id).ok_or(Error::PeerNotFound(*id))?;
        alloc.suggested.insert(piece);
        Ok(())
    }

    /// The peer choked us and dropped our requests, they go back to the
    /// front of its queue.
    ///
    /// Requires the torrent lock.
    pub fn peer_choked(&mut self, id: &PeerId) -> Result<(), Error> {
        let alloc = self.peers.get_mut(id).ok_or(Error::PeerNotFound(*id))?;
        let dropped = alloc.take_issued(|_| true);

        for block in dropped.into_iter().rev() {
            alloc.unissued.push_front(block);
        }

        Ok(())
    }

    /// The peer refused one of our requests.
    ///
    /// Requires the torrent lock.
    pub fn handle_reject(
        &mut self,
        id: &PeerId,
        block: &BlockInfo,
    ) -> Result<(), Error> {
        let alloc = self.peers.get_mut(id).ok_or(Error::PeerNotFound(*id))?;

        if alloc.issued.remove(block) && alloc.pieces.contains_key(&block.index)
        {
            alloc.unissued.push_front(*block);
        }

        Ok(())
    }

    /// Grow the torrent.
    ///
    /// If the last piece was shorter than the piece length, its boundaries
    /// change: everything in flight for it is discarded, pending requests of
    /// the peers for it are rejected and it becomes needed again, together
    /// with the new pieces.
    ///
    /// Requires the torrent lock.
    pub fn extend(
        &mut self,
        pieceset: PiecesetDescriptor,
    ) -> Result<(), Error> {
        let old = self.pieceset;

        if pieceset.piece_length != old.piece_length {
            return Err(Error::PieceLengthChanged(
                old.piece_length,
                pieceset.piece_length,
            ));
        }
        if pieceset.total_length < old.total_length {
            return Err(Error::PiecesetShrink(
                old.total_length,
                pieceset.total_length,
            ));
        }
        if pieceset.total_length == old.total_length {
            return Ok(());
        }

        let old_count = old.piece_count();
        let new_count = pieceset.piece_count();

        let first_new = if old_count > 0 && !old.last_piece_is_regular() {
            let last = old_count - 1;
            self.orphans.remove(&last);
            self.verifying.remove(&last);
            for alloc in self.peers.values_mut() {
                let cancelled = alloc.drop_piece(last);
                alloc.cancel(cancelled);
                // requests for the old boundaries can't be served anymore
                alloc.peer.reject_piece(last);
            }
            last
        } else {
            old_count
        };

        self.pieceset = pieceset;
        self.needed.resize(new_count, false);
        self.availability.resize(new_count, 0);
        for piece in first_new..new_count {
            self.needed.set(piece, true);
        }
        self.needed_count = self.needed.count_ones();
        self.rebuild_queue();

        let needed = &self.needed;
        for alloc in self.peers.values_mut() {
            alloc.bitfield.resize(new_count, false);
            alloc.update_interest(needed);
        }

        debug!(
            "extended from {} to {} bytes, {} pieces",
            old.total_length, pieceset.total_length, new_count
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Mutex, time::Instant};

    use tokio::sync::mpsc;

    use super::*;
    use crate::extensions::core::BLOCK_LEN;

    const PIECE_LEN: u32 = BLOCK_LEN as u32 * 16;

    /// Records what the scheduler asks of it.
    #[derive(Default)]
    struct MockPeer {
        id: PeerId,
        pieces: Bitfield,
        view_length: u64,
        interested: Mutex<Option<bool>>,
        cancels: Mutex<Vec<Vec<BlockInfo>>>,
        rejected: Mutex<Vec<usize>>,
    }

    impl MockPeer {
        fn new(id: u8, pieces: Bitfield) -> Arc<Self> {
            Arc::new(Self {
                id: PeerId([id; 20]),
                pieces,
                ..Default::default()
            })
        }

        fn interested(&self) -> Option<bool> {
            *self.interested.lock().unwrap()
        }

        fn cancels(&self) -> Vec<Vec<BlockInfo>> {
            self.cancels.lock().unwrap().clone()
        }
    }

    impl Peer for MockPeer {
        fn id(&self) -> PeerId {
            self.id
        }
        fn bitfield(&self) -> Bitfield {
            self.pieces.clone()
        }
        fn view_length(&self) -> u64 {
            self.view_length
        }
        fn am_choking(&self) -> bool {
            true
        }
        fn am_interested(&self) -> bool {
            self.interested().unwrap_or(false)
        }
        fn peer_choking(&self) -> bool {
            false
        }
        fn peer_interested(&self) -> bool {
            false
        }
        fn choke_changed_at(&self) -> Option<Instant> {
            None
        }
        fn window_downloaded(&self, _now: Instant) -> u64 {
            0
        }
        fn window_uploaded(&self, _now: Instant) -> u64 {
            0
        }
        fn cancel_requests(&self, blocks: Vec<BlockInfo>) {
            self.cancels.lock().unwrap().push(blocks);
        }
        fn set_am_choking(&self, _choking: bool, _now: Instant) -> bool {
            false
        }
        fn set_am_interested(&self, interested: bool) {
            *self.interested.lock().unwrap() = Some(interested);
        }
        fn reject_piece(&self, piece: usize) {
            self.rejected.lock().unwrap().push(piece);
        }
    }

    type Assembled = mpsc::UnboundedReceiver<(PeerId, Piece)>;

    fn scheduler(
        total_length: u64,
    ) -> (Scheduler<MockPeer>, Assembled) {
        let (tx, rx) = mpsc::unbounded_channel();
        let config = SchedulerConfig { seed: Some(7), ..Default::default() };
        let pieceset = PiecesetDescriptor::new(total_length, PIECE_LEN);
        (Scheduler::new(pieceset, &config, tx), rx)
    }

    fn all(n: usize) -> Bitfield {
        Bitfield::repeat(true, n)
    }

    fn data(block: &BlockInfo) -> Bytes {
        Bytes::from(vec![block.begin as u8; block.len])
    }

    #[test]
    fn double_allocation() {
        let (mut s, _rx) = scheduler(PIECE_LEN as u64);
        let a = MockPeer::new(1, all(1));
        let b = MockPeer::new(2, all(1));
        s.peer_registered(a.clone()).unwrap();
        s.peer_registered(b.clone()).unwrap();

        let from_a = s.allocate_requests(&a.id, 16, false).unwrap();
        let expected: Vec<BlockInfo> = (0..16)
            .map(|i| BlockInfo::new(0, i * BLOCK_LEN, BLOCK_LEN))
            .collect();

        assert_eq!(from_a, expected);
        assert_eq!(from_a.last().unwrap().begin, 245760);
        assert!(s.allocate_requests(&a.id, 16, false).unwrap().is_empty());
        assert_eq!(s.allocate_requests(&b.id, 16, false).unwrap(), expected);
    }

    #[test]
    fn completion_cancels_the_duplicate() {
        let (mut s, mut rx) = scheduler(PIECE_LEN as u64);
        let a = MockPeer::new(1, all(1));
        let b = MockPeer::new(2, all(1));
        s.peer_registered(a.clone()).unwrap();
        s.peer_registered(b.clone()).unwrap();

        let blocks = s.allocate_requests(&a.id, 16, false).unwrap();
        s.allocate_requests(&b.id, 16, false).unwrap();

        for (i, block) in blocks.iter().enumerate() {
            let done = s
                .handle_block(&a.id, block, None, None, data(block))
                .unwrap();
            assert_eq!(done, i == 15);
        }

        let (peer, piece) = rx.try_recv().unwrap();
        assert_eq!(peer, a.id);
        assert!(piece.is_complete());

        s.set_piece_not_needed(0);

        assert!(a.cancels().is_empty());
        assert_eq!(b.cancels(), vec![blocks]);
        assert_eq!(b.interested(), Some(false));
    }

    #[test]
    fn assembled_piece_is_not_claimed_again() {
        let (mut s, mut rx) = scheduler(PIECE_LEN as u64);
        let a = MockPeer::new(1, all(1));
        let b = MockPeer::new(2, all(1));
        s.peer_registered(a.clone()).unwrap();
        s.peer_registered(b.clone()).unwrap();

        let blocks = s.allocate_requests(&a.id, 16, false).unwrap();
        s.allocate_requests(&b.id, 16, false).unwrap();
        for block in &blocks {
            s.handle_block(&a.id, block, None, None, data(block)).unwrap();
        }
        assert_eq!(rx.try_recv().unwrap().1.index, 0);

        // still needed until verified, but nobody downloads it
        assert!(s.is_verifying(0));
        assert!(s.needed_pieces().has(0));
        assert_eq!(s.queued_pieces().count(), 0);
        assert!(s.allocate_requests(&a.id, 16, false).unwrap().is_empty());
        assert!(s.allocate_requests(&b.id, 16, false).unwrap().is_empty());

        // the duplicate is cancelled once, at assembly
        assert!(a.cancels().is_empty());
        assert_eq!(b.cancels(), vec![blocks.clone()]);

        // a late duplicate block is ignored
        assert!(!s
            .handle_block(&b.id, &blocks[0], None, None, data(&blocks[0]))
            .unwrap());
        assert!(rx.try_recv().is_err());

        s.piece_verification_failed(0);
        assert!(!s.is_verifying(0));
        assert_eq!(s.allocate_requests(&b.id, 16, false).unwrap(), blocks);
    }

    #[test]
    fn verification_failure_of_unneeded_piece() {
        let (mut s, mut rx) = scheduler(PIECE_LEN as u64 * 2);
        let a = MockPeer::new(1, all(2));
        s.peer_registered(a.clone()).unwrap();

        let blocks = s.allocate_requests(&a.id, 16, false).unwrap();
        let index = blocks[0].index;
        for block in &blocks {
            s.handle_block(&a.id, block, None, None, data(block)).unwrap();
        }
        assert!(rx.try_recv().is_ok());

        s.set_piece_not_needed(index);
        assert!(!s.is_verifying(index));

        // too late to matter, the piece stays out of the queue
        s.piece_verification_failed(index);
        assert_eq!(s.queued_pieces().collect::<Vec<_>>(), vec![1 - index]);
    }

    #[test]
    fn orphan_is_claimed_first() {
        let (mut s, _rx) = scheduler(PIECE_LEN as u64);
        let a = MockPeer::new(1, all(1));
        let b = MockPeer::new(2, all(1));
        s.peer_registered(a.clone()).unwrap();

        let first = s.allocate_requests(&a.id, 8, false).unwrap();
        assert_eq!(first.len(), 8);

        s.peer_deregistered(&a.id).unwrap();
        assert!(s.is_orphaned(0));

        s.peer_registered(b.clone()).unwrap();
        let from_b = s.allocate_requests(&b.id, 8, false).unwrap();

        let remaining: Vec<BlockInfo> = (8..16)
            .map(|i| BlockInfo::new(0, i * BLOCK_LEN, BLOCK_LEN))
            .collect();
        assert_eq!(from_b, remaining);
        assert!(!s.is_orphaned(0));

        // then the blocks that were in flight with the departed peer
        assert_eq!(s.allocate_requests(&b.id, 8, false).unwrap(), first);
    }

    #[test]
    fn orphan_keeps_received_blocks() {
        let (mut s, _rx) = scheduler(PIECE_LEN as u64 * 4);
        let a = MockPeer::new(1, all(4));
        let b = MockPeer::new(2, all(4));
        s.peer_registered(a.clone()).unwrap();
        s.peer_registered(b.clone()).unwrap();

        let blocks = s.allocate_requests(&a.id, 4, false).unwrap();
        let index = blocks[0].index;
        for block in &blocks[..2] {
            s.handle_block(&a.id, block, None, None, data(block)).unwrap();
        }
        s.peer_deregistered(&a.id).unwrap();

        let from_b = s.allocate_requests(&b.id, 14, false).unwrap();
        assert_eq!(from_b.len(), 14);
        assert!(from_b.iter().all(|b| b.index == index));
        assert!(!from_b.contains(&blocks[0]));
        assert_eq!(&from_b[12..], &blocks[2..4]);
    }

    #[test]
    fn first_orphan_wins() {
        let (mut s, _rx) = scheduler(PIECE_LEN as u64);
        let a = MockPeer::new(1, all(1));
        let b = MockPeer::new(2, all(1));
        let c = MockPeer::new(3, all(1));
        s.peer_registered(a.clone()).unwrap();
        s.peer_registered(b.clone()).unwrap();

        let from_a = s.allocate_requests(&a.id, 4, false).unwrap();
        for block in &from_a {
            s.handle_block(&a.id, block, None, None, data(block)).unwrap();
        }
        let from_b = s.allocate_requests(&b.id, 16, false).unwrap();
        for block in &from_b[14..] {
            s.handle_block(&b.id, block, None, None, data(block)).unwrap();
        }

        s.peer_deregistered(&a.id).unwrap();
        s.peer_deregistered(&b.id).unwrap();
        assert!(s.is_orphaned(0));

        // what b received is lost, what a received is kept
        s.peer_registered(c.clone()).unwrap();
        let missing: Vec<BlockInfo> = (4..16)
            .map(|i| BlockInfo::new(0, i * BLOCK_LEN, BLOCK_LEN))
            .collect();
        assert_eq!(s.allocate_requests(&c.id, 16, false).unwrap(), missing);
        assert!(s.allocate_requests(&c.id, 16, false).unwrap().is_empty());
    }

    #[test]
    fn not_needed_stops_allocation() {
        let (mut s, _rx) = scheduler(PIECE_LEN as u64);
        let a = MockPeer::new(1, all(1));
        s.peer_registered(a.clone()).unwrap();
        assert_eq!(a.interested(), Some(true));

        s.set_piece_not_needed(0);

        assert_eq!(s.needed_piece_count(), 0);
        assert!(s.allocate_requests(&a.id, 16, false).unwrap().is_empty());
        assert_eq!(a.interested(), Some(false));
    }

    #[test]
    fn extend_rejects_shrink_and_new_piece_length() {
        let (mut s, _rx) = scheduler(PIECE_LEN as u64 * 2);

        assert!(matches!(
            s.extend(PiecesetDescriptor::new(PIECE_LEN as u64, PIECE_LEN)),
            Err(Error::PiecesetShrink(_, _))
        ));
        assert!(matches!(
            s.extend(PiecesetDescriptor::new(
                PIECE_LEN as u64 * 4,
                BLOCK_LEN as u32
            )),
            Err(Error::PieceLengthChanged(_, _))
        ));
        assert_eq!(s.pieceset().piece_count(), 2);
    }

    #[test]
    fn extend_discards_irregular_last_piece() {
        let half = PIECE_LEN as u64 / 2;
        let (mut s, _rx) = scheduler(PIECE_LEN as u64 + half);
        let a = MockPeer::new(1, all(2));
        s.peer_registered(a.clone()).unwrap();

        s.set_piece_not_needed(0);
        let short = s.allocate_requests(&a.id, 16, false).unwrap();
        assert_eq!(short.len(), 8);
        assert!(short.iter().all(|b| b.index == 1));

        s.extend(PiecesetDescriptor::new(PIECE_LEN as u64 * 3, PIECE_LEN))
            .unwrap();

        assert_eq!(a.cancels(), vec![short]);
        assert_eq!(*a.rejected.lock().unwrap(), vec![1]);
        assert_eq!(s.needed_piece_count(), 2);
        assert!(s.needed_pieces()[1] && s.needed_pieces()[2]);
        assert_eq!(s.availability(2), 0);

        s.peer_have(&a.id, 2).unwrap();
        s.peer_have(&a.id, 1).unwrap();
        let blocks = s.allocate_requests(&a.id, 32, false).unwrap();
        assert_eq!(blocks.len(), 32);
        assert_eq!(
            blocks.iter().filter(|b| b.index == 1).count(),
            16,
            "piece 1 now has full length"
        );
    }

    #[test]
    fn shorter_view_is_never_asked_for_the_difference() {
        let (mut s, _rx) = scheduler(PIECE_LEN as u64 * 2);
        let short = Arc::new(MockPeer {
            id: PeerId([3; 20]),
            pieces: all(2),
            view_length: PIECE_LEN as u64 + 100,
            ..Default::default()
        });
        s.peer_registered(short.clone()).unwrap();

        let blocks = s.allocate_requests(&short.id, 64, false).unwrap();
        assert_eq!(blocks.len(), 16);
        assert!(blocks.iter().all(|b| b.index == 0));
    }

    #[test]
    fn registration() {
        let (mut s, _rx) = scheduler(PIECE_LEN as u64 * 3);
        let a = MockPeer::new(1, Bitfield::repeat(false, 3));

        s.peer_registered(a.clone()).unwrap();
        assert_eq!(a.interested(), Some(false));
        assert!(matches!(
            s.peer_registered(a.clone()),
            Err(Error::PeerAlreadyRegistered(_))
        ));

        s.peer_have(&a.id, 1).unwrap();
        assert_eq!(s.availability(1), 1);
        assert_eq!(a.interested(), Some(true));

        s.peer_deregistered(&a.id).unwrap();
        assert_eq!(s.availability(1), 0);
        assert!(matches!(
            s.peer_deregistered(&a.id),
            Err(Error::PeerNotFound(_))
        ));
        assert!(matches!(
            s.allocate_requests(&a.id, 1, false),
            Err(Error::PeerNotFound(_))
        ));
    }

    #[test]
    fn set_needed_pieces_cancels_and_updates_interest() {
        let (mut s, _rx) = scheduler(PIECE_LEN as u64 * 2);
        let a = MockPeer::new(1, all(2));
        s.peer_registered(a.clone()).unwrap();

        let blocks = s.allocate_requests(&a.id, 32, false).unwrap();
        assert_eq!(blocks.len(), 32);

        let mut needed = Bitfield::repeat(false, 2);
        needed.set(1, true);
        s.set_needed_pieces(&needed);

        assert_eq!(s.needed_piece_count(), 1);
        assert_eq!(s.queued_pieces().collect::<Vec<_>>(), vec![1]);
        let cancels = a.cancels();
        assert_eq!(cancels.len(), 1);
        assert_eq!(cancels[0].len(), 16);
        assert!(cancels[0].iter().all(|b| b.index == 0));
        assert_eq!(a.interested(), Some(true));

        s.set_needed_pieces(&Bitfield::repeat(false, 2));
        assert_eq!(a.interested(), Some(false));
        assert_eq!(a.cancels().len(), 2);

        // nothing in flight, no empty batch
        s.set_needed_pieces(&Bitfield::repeat(false, 2));
        assert_eq!(a.cancels().len(), 2);
    }

    #[test]
    fn allowed_fast_only() {
        let (mut s, _rx) = scheduler(PIECE_LEN as u64 * 3);
        let a = MockPeer::new(1, all(3));
        s.peer_registered(a.clone()).unwrap();

        assert!(s.allocate_requests(&a.id, 4, true).unwrap().is_empty());

        s.add_allowed_fast(&a.id, 2).unwrap();
        let blocks = s.allocate_requests(&a.id, 20, true).unwrap();
        assert_eq!(blocks.len(), 16);
        assert!(blocks.iter().all(|b| b.index == 2));
    }

    #[test]
    fn suggested_before_queue() {
        let (mut s, _rx) = scheduler(PIECE_LEN as u64 * 8);
        let a = MockPeer::new(1, all(8));
        s.peer_registered(a.clone()).unwrap();

        let last = s.queued_pieces().last().unwrap();
        s.add_suggested(&a.id, last).unwrap();

        let blocks = s.allocate_requests(&a.id, 1, false).unwrap();
        assert_eq!(blocks[0].index, last);
    }

    #[test]
    fn claimed_pieces_rotate_to_the_back() {
        let (mut s, _rx) = scheduler(PIECE_LEN as u64 * 4);
        let a = MockPeer::new(1, all(4));
        s.peer_registered(a.clone()).unwrap();

        let front = s.queued_pieces().next().unwrap();
        s.allocate_requests(&a.id, 1, false).unwrap();

        assert_eq!(s.queued_pieces().last(), Some(front));
        assert_eq!(s.queued_pieces().count(), 4);
    }

    #[test]
    fn seeded_queue_is_deterministic() {
        let (a, _) = scheduler(PIECE_LEN as u64 * 50);
        let (b, _) = scheduler(PIECE_LEN as u64 * 50);
        let a: Vec<usize> = a.queued_pieces().collect();
        assert_eq!(a, b.queued_pieces().collect::<Vec<_>>());
        assert_eq!(a.len(), 50);
    }

    #[test]
    fn choke_and_reject_requeue() {
        let (mut s, _rx) = scheduler(PIECE_LEN as u64);
        let a = MockPeer::new(1, all(1));
        s.peer_registered(a.clone()).unwrap();

        let blocks = s.allocate_requests(&a.id, 4, false).unwrap();
        s.peer_choked(&a.id).unwrap();
        assert!(s.issued_requests(&a.id).unwrap().is_empty());
        assert_eq!(s.allocate_requests(&a.id, 4, false).unwrap(), blocks);

        s.handle_reject(&a.id, &blocks[2]).unwrap();
        assert_eq!(
            s.allocate_requests(&a.id, 1, false).unwrap(),
            vec![blocks[2]]
        );
    }

    #[test]
    fn availability_follows_bitfields() {
        let (mut s, _rx) = scheduler(PIECE_LEN as u64 * 2);
        let a = MockPeer::new(1, all(2));
        let b = MockPeer::new(2, Bitfield::repeat(false, 2));
        s.peer_registered(a.clone()).unwrap();
        s.peer_registered(b.clone()).unwrap();

        assert_eq!(s.availability(0), 1);
        s.peer_bitfield(&b.id, &all(2)).unwrap();
        assert_eq!(s.availability(0), 2);
        s.peer_bitfield(&a.id, &Bitfield::repeat(false, 2)).unwrap();
        assert_eq!(s.availability(1), 1);
        assert_eq!(a.interested(), Some(false));
    }

    #[test]
    fn invalid_block_is_an_error() {
        let (mut s, _rx) = scheduler(PIECE_LEN as u64);
        let a = MockPeer::new(1, all(1));
        s.peer_registered(a.clone()).unwrap();
        s.allocate_requests(&a.id, 1, false).unwrap();

        let bad = BlockInfo::new(0, 3, BLOCK_LEN);
        assert!(matches!(
            s.handle_block(&a.id, &bad, None, None, data(&bad)),
            Err(Error::BlockInvalid(_))
        ));
    }
}

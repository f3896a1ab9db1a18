//! Documentation of the "TCP Wire" protocol between Peers in the network.
//! Peers will follow this protocol to exchange information about torrents.

mod codec;
mod handshake_codec;

// re-exports
pub use codec::*;
pub use handshake_codec::*;

use bytes::Bytes;

/// The default block_len that most clients support, some clients drop
/// the connection on blocks larger than this value.
///
/// Tha last block of a piece might be smaller.
pub const BLOCK_LEN: usize = 16384;

/// The largest block accepted inside a piece message. The maximum size of a
/// wire message is derived from it, see [`max_message_len`].
pub const MAX_BLOCK_LEN: usize = 128 * 1024;

/// Protocol String (PSTR)
/// Bytes of the string "BitTorrent protocol". Used during handshake.
pub const PSTR: [u8; 19] = *b"BitTorrent protocol";

pub const PSTR_LEN: usize = 19;

/// pstrlen + pstr + reserved + info_hash + peer_id
pub const HANDSHAKE_LEN: usize = 1 + PSTR_LEN + 8 + 20 + 20;

/// Largest message body accepted for a given maximum block size:
/// <id=7><index><begin><block>
pub const fn max_message_len(max_block_len: usize) -> usize {
    max_block_len + 9
}

/// A Block is a subset of a Piece,
/// pieces are subsets of the entire Torrent data.
///
/// When peers send data (seed) to us, they send us Blocks.
/// This happens on the "Piece" message of the peer wire protocol.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Block {
    /// The index of the piece this block belongs to.
    pub index: usize,

    /// The zero-based byte offset into the piece.
    pub begin: usize,

    /// The block's data. 16 KiB most of the times,
    /// but the last block of a piece *might* be smaller.
    pub block: Bytes,
}

impl Block {
    pub fn new(index: usize, begin: usize, block: impl Into<Bytes>) -> Self {
        Self { index, begin, block: block.into() }
    }

    pub fn info(&self) -> BlockInfo {
        self.into()
    }
}

/// The representation of a [`Block`].
///
/// When we ask a peer to give us a [`Block`], we send this struct,
/// using the "Request" message of the tcp wire protocol.
///
/// Value-equal, so it doubles as the key of the request sets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockInfo {
    /// The index of the piece of which this is a block.
    pub index: usize,

    /// The zero-based byte offset into the piece.
    pub begin: usize,

    /// The block's length in bytes.
    pub len: usize,
}

impl Default for BlockInfo {
    fn default() -> Self {
        Self { index: 0, begin: 0, len: BLOCK_LEN }
    }
}

impl From<&Block> for BlockInfo {
    fn from(block: &Block) -> Self {
        BlockInfo {
            index: block.index,
            begin: block.begin,
            len: block.block.len(),
        }
    }
}

impl BlockInfo {
    pub fn new(index: usize, begin: usize, len: usize) -> Self {
        Self { index, begin, len }
    }
}

// Client connections start out as "choked" and "not interested".
//
// A block is downloaded by the client,
// when the client is interested in a peer,
// and that peer is not choking the client.
//
// A block is uploaded by a client,
// when the client is not choking a peer,
// and that peer is interested in the client.
//
// c <-handshake-> p
// c <-(exactly one of) bitfield | have all | have none-> p
// c <-extended (if supported)->p
// c -interested-> p
// c <-unchoke- p
// c -request-> p
// c <-piece- p
// c -cancel-> p (once another peer delivered the same block)

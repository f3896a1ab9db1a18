//! Merkle hash pieces.
//!
//! Pieces of merkle torrents travel with the uncle hashes that prove them
//! against the root hash of the torrent. Verification happens elsewhere,
//! here the chain is an opaque list of `(position, hash)` pairs where
//! position is the breadth first index of the node in the tree.

mod codec;

pub use codec::*;

use bytes::Bytes;

use crate::extensions::core::Block;

/// Name of the extension in the `m` dictionary.
pub const MERKLE: &str = "Tr_hashpiece";

/// Length of a single hash of the chain.
pub const HASH_LEN: usize = 20;

/// Hashes of the tree needed to verify a piece, ordered as received.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HashChain {
    pub entries: Vec<(u32, [u8; HASH_LEN])>,
}

impl HashChain {
    pub fn new(entries: Vec<(u32, [u8; HASH_LEN])>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Size on the wire, count prefix included.
    pub fn encoded_len(&self) -> usize {
        4 + self.entries.len() * (4 + HASH_LEN)
    }
}

/// A block of a merkle torrent with the hashes that prove its piece.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerklePiece {
    pub block: Block,
    pub hash_chain: HashChain,
}

impl MerklePiece {
    pub fn new(
        index: usize,
        begin: usize,
        hash_chain: HashChain,
        data: impl Into<Bytes>,
    ) -> Self {
        Self { block: Block::new(index, begin, data), hash_chain }
    }
}

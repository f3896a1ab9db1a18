//! Geometry of the torrent and pieces being assembled.

use bitvec::{bitvec, prelude::Msb0};
use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;
use tracing::warn;

use crate::{
    bitfield::Bitfield,
    error::Error,
    extensions::{core::BlockInfo, elastic::ViewSignature, merkle::HashChain},
    peer::PeerId,
};

/// Total length and piece size of a torrent.
///
/// The last piece may be shorter than the others. When the torrent is
/// extensible, that short piece is provisional and grows on
/// [`crate::torrent::Scheduler::extend`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PiecesetDescriptor {
    pub total_length: u64,
    pub piece_length: u32,
}

impl PiecesetDescriptor {
    pub fn new(total_length: u64, piece_length: u32) -> Self {
        Self { total_length, piece_length }
    }

    pub fn piece_count(&self) -> usize {
        if self.piece_length == 0 {
            return 0;
        }
        self.total_length.div_ceil(self.piece_length as u64) as usize
    }

    /// Length of the piece at `index`, 0 if it is out of range.
    pub fn piece_len(&self, index: usize) -> u32 {
        let piece_length = self.piece_length as u64;
        let begin = index as u64 * piece_length;
        if begin >= self.total_length {
            return 0;
        }
        (self.total_length - begin).min(piece_length) as u32
    }

    /// If the last piece has exactly `piece_length` bytes.
    pub fn last_piece_is_regular(&self) -> bool {
        self.piece_length != 0
            && self.total_length % self.piece_length as u64 == 0
    }

    /// The same torrent as seen with another total length.
    pub fn with_length(&self, total_length: u64) -> Self {
        Self { total_length, ..*self }
    }
}

/// A piece being downloaded, block by block.
#[derive(Debug, Clone, PartialEq)]
pub struct Piece {
    pub index: usize,
    len: u32,
    block_len: u32,
    /// One bit per block, set while the block is missing.
    missing: Bitfield,
    data: BytesMut,
    pub hash_chain: Option<HashChain>,
    pub signature: Option<ViewSignature>,
}

impl Piece {
    pub fn new(index: usize, len: u32, block_len: u32) -> Self {
        let block_len = block_len.max(1);
        let blocks = len.div_ceil(block_len) as usize;
        Self {
            index,
            len,
            block_len,
            missing: bitvec![u8, Msb0; 1; blocks],
            data: BytesMut::zeroed(len as usize),
            hash_chain: None,
            signature: None,
        }
    }

    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn block_count(&self) -> usize {
        self.missing.len()
    }

    pub fn block_info(&self, block: usize) -> BlockInfo {
        let begin = block as u32 * self.block_len;
        let len = self.block_len.min(self.len.saturating_sub(begin));
        BlockInfo::new(self.index, begin as usize, len as usize)
    }

    /// Blocks not written yet, by offset.
    pub fn missing_blocks(&self) -> Vec<BlockInfo> {
        self.missing.iter_ones().map(|b| self.block_info(b)).collect()
    }

    pub fn has_block(&self, begin: usize) -> bool {
        let b = begin / self.block_len as usize;
        begin % self.block_len as usize == 0
            && b < self.missing.len()
            && !self.missing[b]
    }

    pub fn is_complete(&self) -> bool {
        self.missing.not_any()
    }

    /// Write one block, returns `true` if this completed the piece.
    ///
    /// The block must start on a block boundary and have the length of
    /// that block. Writing a block twice is harmless.
    pub fn write_block(
        &mut self,
        info: &BlockInfo,
        data: &[u8],
    ) -> Result<bool, Error> {
        let b = info.begin / self.block_len as usize;

        if info.index != self.index
            || info.begin % self.block_len as usize != 0
            || b >= self.missing.len()
            || self.block_info(b) != *info
            || data.len() != info.len
        {
            return Err(Error::BlockInvalid(*info));
        }

        self.data[info.begin..info.begin + info.len].copy_from_slice(data);
        self.missing.set(b, false);

        Ok(self.is_complete())
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Bytes {
        self.data.freeze()
    }
}

/// Receives the pieces assembled by the scheduler, before any
/// verification.
pub trait PieceListener: Send {
    fn piece_assembled(&mut self, peer: PeerId, piece: Piece);
}

impl PieceListener for mpsc::UnboundedSender<(PeerId, Piece)> {
    fn piece_assembled(&mut self, peer: PeerId, piece: Piece) {
        let index = piece.index;
        if self.send((peer, piece)).is_err() {
            warn!("piece listener is gone, dropped piece {index}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extensions::core::BLOCK_LEN;

    #[test]
    fn descriptor() {
        let d = PiecesetDescriptor::new(100_000, 32768);

        assert_eq!(d.piece_count(), 4);
        assert_eq!(d.piece_len(0), 32768);
        assert_eq!(d.piece_len(3), 100_000 - 3 * 32768);
        assert_eq!(d.piece_len(4), 0);
        assert!(!d.last_piece_is_regular());
        assert!(d.with_length(4 * 32768).last_piece_is_regular());
        assert_eq!(PiecesetDescriptor::new(0, 32768).piece_count(), 0);
    }

    #[test]
    fn blocks_of_a_short_piece() {
        let piece = Piece::new(2, BLOCK_LEN as u32 * 2 + 10, BLOCK_LEN as u32);

        assert_eq!(piece.block_count(), 3);
        assert_eq!(
            piece.missing_blocks(),
            vec![
                BlockInfo::new(2, 0, BLOCK_LEN),
                BlockInfo::new(2, BLOCK_LEN, BLOCK_LEN),
                BlockInfo::new(2, BLOCK_LEN * 2, 10),
            ]
        );
    }

    #[test]
    fn write_until_complete() {
        let mut piece = Piece::new(0, 20, 8);
        let blocks = piece.missing_blocks();

        assert!(!piece.write_block(&blocks[2], &[3; 4]).unwrap());
        assert!(!piece.write_block(&blocks[0], &[1; 8]).unwrap());
        assert!(piece.has_block(0));
        assert!(!piece.has_block(8));
        assert!(piece.write_block(&blocks[1], &[2; 8]).unwrap());

        assert!(piece.is_complete());
        assert!(piece.missing_blocks().is_empty());
        assert_eq!(
            piece.into_bytes().to_vec(),
            [[1u8; 8].as_slice(), &[2; 8], &[3; 4]].concat()
        );
    }

    #[test]
    fn invalid_blocks() {
        let mut piece = Piece::new(0, 20, 8);

        for info in [
            BlockInfo::new(1, 0, 8),
            BlockInfo::new(0, 4, 8),
            BlockInfo::new(0, 16, 8),
            BlockInfo::new(0, 24, 8),
        ] {
            assert!(matches!(
                piece.write_block(&info, &[0; 8]),
                Err(Error::BlockInvalid(_))
            ));
        }

        // length of the data differs from the info
        assert!(piece.write_block(&BlockInfo::new(0, 0, 8), &[0; 7]).is_err());
    }

    #[test]
    fn listener_without_receiver() {
        let (mut tx, rx) = mpsc::unbounded_channel::<(PeerId, Piece)>();
        tx.piece_assembled(PeerId([1; 20]), Piece::new(0, 8, 8));

        drop(rx);
        tx.piece_assembled(PeerId([1; 20]), Piece::new(1, 8, 8));
        assert!(tx.is_closed());
    }
}

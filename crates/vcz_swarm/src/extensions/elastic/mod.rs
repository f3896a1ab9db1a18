//! Elastic torrents.
//!
//! The total length of an elastic torrent can grow after creation. Each
//! peer advertises a view, the length of the torrent it knows about, signed
//! by the publisher. Pieces and bitfields are always relative to a view.

mod codec;

pub use codec::*;

use bytes::Bytes;

use crate::{
    bitfield::Bitfield,
    extensions::{core::Block, merkle::HashChain},
};

/// Name of the extension in the `m` dictionary.
pub const ELASTIC: &str = "Elastic";

/// A view length and the publisher's signature over it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ViewSignature {
    pub view_length: u64,
    pub signature: Bytes,
}

impl ViewSignature {
    pub fn new(view_length: u64, signature: impl Into<Bytes>) -> Self {
        Self { view_length, signature: signature.into() }
    }
}

#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ElasticMsgType {
    Signature = 0,
    Piece = 1,
    Bitfield = 2,
}

impl TryFrom<u8> for ElasticMsgType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use ElasticMsgType::*;
        match value {
            v if v == Signature as u8 => Ok(Signature),
            v if v == Piece as u8 => Ok(Piece),
            v if v == Bitfield as u8 => Ok(Bitfield),
            v => Err(v),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ElasticMessage {
    /// The sender moved to a new view.
    Signature(ViewSignature),

    /// A block, the signed view it belongs to and the hashes that prove it.
    Piece { block: Block, view: ViewSignature, hash_chain: HashChain },

    /// The pieces the sender has under the given view length.
    Bitfield { view_length: u64, bitfield: Bitfield },
}

impl ElasticMessage {
    pub fn msg_type(&self) -> ElasticMsgType {
        match self {
            Self::Signature(_) => ElasticMsgType::Signature,
            Self::Piece { .. } => ElasticMsgType::Piece,
            Self::Bitfield { .. } => ElasticMsgType::Bitfield,
        }
    }
}

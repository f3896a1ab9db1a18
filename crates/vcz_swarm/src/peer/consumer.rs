//! Receiving side of the [`Parser`](super::Parser).

use std::collections::VecDeque;

use bytes::Bytes;

use crate::{
    bitfield::{Bitfield, Reserved},
    error::Error,
    extensions::{
        core::{Block, BlockInfo},
        elastic::ElasticMessage,
        extended::ExtensionHandshake,
        merkle::MerklePiece,
    },
    peer::{Capabilities, PeerId},
    torrent::InfoHash,
};

/// Receives the decoded units of one connection, in arrival order.
///
/// Returning an error from any method moves the parser into its terminal
/// error state, the connection must then be closed. Every method defaults
/// to ignoring the event.
#[allow(unused_variables)]
pub trait ProtocolConsumer {
    /// The reserved bytes of the remote handshake, and the capabilities
    /// that both sides support.
    fn capabilities(
        &mut self,
        reserved: Reserved,
        negotiated: Capabilities,
    ) -> Result<(), Error> {
        Ok(())
    }

    fn info_hash(&mut self, info_hash: InfoHash) -> Result<(), Error> {
        Ok(())
    }

    fn peer_id(&mut self, peer_id: PeerId) -> Result<(), Error> {
        Ok(())
    }

    fn keep_alive(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn choke(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn unchoke(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn interested(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn not_interested(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn have(&mut self, piece: usize) -> Result<(), Error> {
        Ok(())
    }

    fn bitfield(&mut self, bitfield: Bitfield) -> Result<(), Error> {
        Ok(())
    }

    fn have_all(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn have_none(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn request(&mut self, block: BlockInfo) -> Result<(), Error> {
        Ok(())
    }

    fn piece(&mut self, block: Block) -> Result<(), Error> {
        Ok(())
    }

    fn cancel(&mut self, block: BlockInfo) -> Result<(), Error> {
        Ok(())
    }

    fn suggest_piece(&mut self, piece: usize) -> Result<(), Error> {
        Ok(())
    }

    fn reject_request(&mut self, block: BlockInfo) -> Result<(), Error> {
        Ok(())
    }

    fn allowed_fast(&mut self, piece: usize) -> Result<(), Error> {
        Ok(())
    }

    fn extension_handshake(
        &mut self,
        handshake: ExtensionHandshake,
    ) -> Result<(), Error> {
        Ok(())
    }

    fn merkle_piece(&mut self, piece: MerklePiece) -> Result<(), Error> {
        Ok(())
    }

    fn elastic(&mut self, msg: ElasticMessage) -> Result<(), Error> {
        Ok(())
    }

    /// Payload of a registered extension without a built-in decoder.
    fn extension_message(
        &mut self,
        name: &str,
        payload: Bytes,
    ) -> Result<(), Error> {
        Ok(())
    }

    /// A message with an id that this crate does not know, or an extended
    /// message with an id that the peer never registered.
    fn unknown_message(&mut self, id: u8, payload: Bytes) -> Result<(), Error> {
        Ok(())
    }
}

/// Owned form of each [`ProtocolConsumer`] callback.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Capabilities { reserved: Reserved, negotiated: Capabilities },
    InfoHash(InfoHash),
    PeerId(PeerId),
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have(usize),
    Bitfield(Bitfield),
    HaveAll,
    HaveNone,
    Request(BlockInfo),
    Piece(Block),
    Cancel(BlockInfo),
    SuggestPiece(usize),
    RejectRequest(BlockInfo),
    AllowedFast(usize),
    ExtensionHandshake(ExtensionHandshake),
    MerklePiece(MerklePiece),
    Elastic(ElasticMessage),
    Extension { name: String, payload: Bytes },
    Unknown { id: u8, payload: Bytes },
}

impl Event {
    /// Deliver this event to the matching method of `consumer`.
    pub fn dispatch<C: ProtocolConsumer + ?Sized>(
        self,
        consumer: &mut C,
    ) -> Result<(), Error> {
        match self {
            Event::Capabilities { reserved, negotiated } => {
                consumer.capabilities(reserved, negotiated)
            }
            Event::InfoHash(v) => consumer.info_hash(v),
            Event::PeerId(v) => consumer.peer_id(v),
            Event::KeepAlive => consumer.keep_alive(),
            Event::Choke => consumer.choke(),
            Event::Unchoke => consumer.unchoke(),
            Event::Interested => consumer.interested(),
            Event::NotInterested => consumer.not_interested(),
            Event::Have(v) => consumer.have(v),
            Event::Bitfield(v) => consumer.bitfield(v),
            Event::HaveAll => consumer.have_all(),
            Event::HaveNone => consumer.have_none(),
            Event::Request(v) => consumer.request(v),
            Event::Piece(v) => consumer.piece(v),
            Event::Cancel(v) => consumer.cancel(v),
            Event::SuggestPiece(v) => consumer.suggest_piece(v),
            Event::RejectRequest(v) => consumer.reject_request(v),
            Event::AllowedFast(v) => consumer.allowed_fast(v),
            Event::ExtensionHandshake(v) => consumer.extension_handshake(v),
            Event::MerklePiece(v) => consumer.merkle_piece(v),
            Event::Elastic(v) => consumer.elastic(v),
            Event::Extension { name, payload } => {
                consumer.extension_message(&name, payload)
            }
            Event::Unknown { id, payload } => {
                consumer.unknown_message(id, payload)
            }
        }
    }
}

/// Collects every event, in order. Used by [`super::PeerCodec`].
impl ProtocolConsumer for VecDeque<Event> {
    fn capabilities(
        &mut self,
        reserved: Reserved,
        negotiated: Capabilities,
    ) -> Result<(), Error> {
        self.push_back(Event::Capabilities { reserved, negotiated });
        Ok(())
    }

    fn info_hash(&mut self, info_hash: InfoHash) -> Result<(), Error> {
        self.push_back(Event::InfoHash(info_hash));
        Ok(())
    }

    fn peer_id(&mut self, peer_id: PeerId) -> Result<(), Error> {
        self.push_back(Event::PeerId(peer_id));
        Ok(())
    }

    fn keep_alive(&mut self) -> Result<(), Error> {
        self.push_back(Event::KeepAlive);
        Ok(())
    }

    fn choke(&mut self) -> Result<(), Error> {
        self.push_back(Event::Choke);
        Ok(())
    }

    fn unchoke(&mut self) -> Result<(), Error> {
        self.push_back(Event::Unchoke);
        Ok(())
    }

    fn interested(&mut self) -> Result<(), Error> {
        self.push_back(Event::Interested);
        Ok(())
    }

    fn not_interested(&mut self) -> Result<(), Error> {
        self.push_back(Event::NotInterested);
        Ok(())
    }

    fn have(&mut self, piece: usize) -> Result<(), Error> {
        self.push_back(Event::Have(piece));
        Ok(())
    }

    fn bitfield(&mut self, bitfield: Bitfield) -> Result<(), Error> {
        self.push_back(Event::Bitfield(bitfield));
        Ok(())
    }

    fn have_all(&mut self) -> Result<(), Error> {
        self.push_back(Event::HaveAll);
        Ok(())
    }

    fn have_none(&mut self) -> Result<(), Error> {
        self.push_back(Event::HaveNone);
        Ok(())
    }

    fn request(&mut self, block: BlockInfo) -> Result<(), Error> {
        self.push_back(Event::Request(block));
        Ok(())
    }

    fn piece(&mut self, block: Block) -> Result<(), Error> {
        self.push_back(Event::Piece(block));
        Ok(())
    }

    fn cancel(&mut self, block: BlockInfo) -> Result<(), Error> {
        self.push_back(Event::Cancel(block));
        Ok(())
    }

    fn suggest_piece(&mut self, piece: usize) -> Result<(), Error> {
        self.push_back(Event::SuggestPiece(piece));
        Ok(())
    }

    fn reject_request(&mut self, block: BlockInfo) -> Result<(), Error> {
        self.push_back(Event::RejectRequest(block));
        Ok(())
    }

    fn allowed_fast(&mut self, piece: usize) -> Result<(), Error> {
        self.push_back(Event::AllowedFast(piece));
        Ok(())
    }

    fn extension_handshake(
        &mut self,
        handshake: ExtensionHandshake,
    ) -> Result<(), Error> {
        self.push_back(Event::ExtensionHandshake(handshake));
        Ok(())
    }

    fn merkle_piece(&mut self, piece: MerklePiece) -> Result<(), Error> {
        self.push_back(Event::MerklePiece(piece));
        Ok(())
    }

    fn elastic(&mut self, msg: ElasticMessage) -> Result<(), Error> {
        self.push_back(Event::Elastic(msg));
        Ok(())
    }

    fn extension_message(
        &mut self,
        name: &str,
        payload: Bytes,
    ) -> Result<(), Error> {
        self.push_back(Event::Extension { name: name.to_owned(), payload });
        Ok(())
    }

    fn unknown_message(&mut self, id: u8, payload: Bytes) -> Result<(), Error> {
        self.push_back(Event::Unknown { id, payload });
        Ok(())
    }
}

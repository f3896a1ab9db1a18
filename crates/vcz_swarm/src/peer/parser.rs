//! Incremental decoder of one connection.
//!
//! The parser reads the handshake field by field and then the stream of
//! length prefixed messages, calling one method of a [`ProtocolConsumer`]
//! for each complete unit. It never blocks and keeps partial units in its
//! own buffer, so bytes may be fed in chunks of any size.

use bytes::{Buf, BytesMut};
use tracing::{debug, warn};

use super::{Capabilities, PeerId, ProtocolConsumer};
use crate::{
    bitfield::Reserved,
    config::ParserConfig,
    error::Error,
    extensions::{
        core::{
            max_message_len, ExtendedMessage, Message, MessageId, PSTR,
            PSTR_LEN,
        },
        elastic::{ElasticMessage, ELASTIC},
        extended::{ExtensionHandshake, ExtensionRegistry, HANDSHAKE_ID},
        merkle::{MerklePiece, MERKLE},
    },
    torrent::InfoHash,
};

/// pstrlen + pstr + reserved
const HEADER_LEN: usize = 1 + PSTR_LEN + 8;

/// Where the parser is in the stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    /// pstrlen, pstr and the reserved bytes.
    Header,
    InfoHash,
    PeerId,
    MessageLength,
    /// Body of a message of the given length, id included.
    Message { len: usize },
    /// Terminal, no more bytes are processed.
    Error,
}

impl State {
    /// Bytes needed to complete the unit of this state.
    fn unit_len(&self) -> usize {
        match self {
            State::Header => HEADER_LEN,
            State::InfoHash | State::PeerId => 20,
            State::MessageLength => 4,
            State::Message { len } => *len,
            State::Error => 0,
        }
    }
}

#[derive(Debug)]
pub struct Parser {
    state: State,
    buf: BytesMut,
    /// Capabilities that we offered in our handshake.
    offered: Capabilities,
    negotiated: Capabilities,
    registry: ExtensionRegistry,
    /// Set until the first message after the handshake.
    awaiting_first: bool,
    max_message_len: usize,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new(&ParserConfig::default())
    }
}

impl Parser {
    pub fn new(config: &ParserConfig) -> Self {
        Self {
            state: State::Header,
            buf: BytesMut::with_capacity(HEADER_LEN),
            offered: Capabilities {
                fast: config.offer_fast,
                extension: config.offer_extension,
            },
            negotiated: Capabilities::default(),
            registry: ExtensionRegistry::new(),
            awaiting_first: true,
            max_message_len: max_message_len(config.max_block_len),
        }
    }

    /// The reserved bytes that our own handshake must carry.
    pub fn local_reserved(&self) -> Reserved {
        Reserved::new(self.offered.fast, self.offered.extension)
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_errored(&self) -> bool {
        self.state == State::Error
    }

    pub fn negotiated(&self) -> Capabilities {
        self.negotiated
    }

    /// Extensions registered by the remote peer so far.
    pub fn registry(&self) -> &ExtensionRegistry {
        &self.registry
    }

    pub fn max_message_len(&self) -> usize {
        self.max_message_len
    }

    /// Bytes still missing to complete the current unit.
    pub fn wanted(&self) -> usize {
        self.state.unit_len().saturating_sub(self.buf.len())
    }

    /// Feed a chunk of the stream, returns how many bytes of `input` were
    /// consumed. On error the parser is left in [`State::Error`] and every
    /// later call fails with [`Error::ParserErrored`].
    pub fn feed<C: ProtocolConsumer + ?Sized>(
        &mut self,
        input: &[u8],
        consumer: &mut C,
    ) -> Result<usize, Error> {
        if self.state == State::Error {
            return Err(Error::ParserErrored);
        }

        let mut consumed = 0;

        while consumed < input.len() {
            let take = self.wanted().min(input.len() - consumed);
            let start = self.buf.len();
            self.buf.extend_from_slice(&input[consumed..consumed + take]);
            consumed += take;

            if let Err(e) = self.step(start, consumer) {
                warn!("parser error: {e}");
                self.state = State::Error;
                self.buf = BytesMut::new();
                return Err(e);
            }
        }

        Ok(consumed)
    }

    /// Handle the bytes buffered so far, `start` is where the new bytes
    /// begin.
    fn step<C: ProtocolConsumer + ?Sized>(
        &mut self,
        start: usize,
        consumer: &mut C,
    ) -> Result<(), Error> {
        if self.state == State::Header {
            self.check_magic(start)?;
        }

        if self.wanted() > 0 {
            return Ok(());
        }

        let unit = self.buf.split().freeze();

        match self.state {
            State::Header => {
                let mut reserved = [0u8; 8];
                reserved.copy_from_slice(&unit[1 + PSTR_LEN..]);
                let reserved = Reserved::from(reserved);

                self.negotiated =
                    Capabilities::from(reserved).intersection(self.offered);
                debug!("< handshake {:?}", self.negotiated);

                self.state = State::InfoHash;
                consumer.capabilities(reserved, self.negotiated)?;
            }
            State::InfoHash => {
                let mut info_hash = [0u8; 20];
                info_hash.copy_from_slice(&unit);
                self.state = State::PeerId;
                consumer.info_hash(InfoHash(info_hash))?;
            }
            State::PeerId => {
                let mut peer_id = [0u8; 20];
                peer_id.copy_from_slice(&unit);
                self.state = State::MessageLength;
                consumer.peer_id(PeerId(peer_id))?;
            }
            State::MessageLength => {
                let len = (&unit[..]).get_u32() as usize;

                if len == 0 {
                    debug!("< keepalive");
                    return consumer.keep_alive();
                }

                if len > self.max_message_len {
                    return Err(Error::MessageTooLarge(
                        len,
                        self.max_message_len,
                    ));
                }

                self.buf.reserve(len);
                self.state = State::Message { len };
            }
            State::Message { .. } => {
                self.state = State::MessageLength;
                self.message(unit, consumer)?;
            }
            State::Error => return Err(Error::ParserErrored),
        }

        Ok(())
    }

    /// Fail on the first byte that differs from pstrlen + pstr.
    fn check_magic(&self, start: usize) -> Result<(), Error> {
        let end = self.buf.len().min(1 + PSTR_LEN);

        for i in start..end {
            let expected =
                if i == 0 { PSTR_LEN as u8 } else { PSTR[i - 1] };
            if self.buf[i] != expected {
                return Err(Error::HandshakeInvalid);
            }
        }

        Ok(())
    }

    fn message<C: ProtocolConsumer + ?Sized>(
        &mut self,
        mut body: bytes::Bytes,
        consumer: &mut C,
    ) -> Result<(), Error> {
        let raw_id = body.get_u8();
        let was_first = std::mem::replace(&mut self.awaiting_first, false);

        let id = match MessageId::try_from(raw_id) {
            Ok(id) => id,
            Err(raw_id) => {
                debug!("< unknown message {raw_id}");
                return consumer.unknown_message(raw_id, body);
            }
        };

        if let Some(fixed) = id.fixed_len() {
            if body.len() + 1 != fixed {
                return Err(Error::MessageSizeInvalid(raw_id, body.len() + 1));
            }
        }

        if id.is_fast() && !self.negotiated.fast {
            return Err(Error::FastNotNegotiated(raw_id));
        }

        if id == MessageId::Extended && !self.negotiated.extension {
            return Err(Error::ExtensionNotNegotiated);
        }

        if id.is_bitfield_class() && !was_first {
            return Err(Error::BitfieldOutOfSequence);
        }

        match Message::decode_body(id, body)? {
            Message::KeepAlive => consumer.keep_alive(),
            Message::Choke => {
                debug!("< choke");
                consumer.choke()
            }
            Message::Unchoke => {
                debug!("< unchoke");
                consumer.unchoke()
            }
            Message::Interested => {
                debug!("< interested");
                consumer.interested()
            }
            Message::NotInterested => {
                debug!("< not_interested");
                consumer.not_interested()
            }
            Message::Have(piece) => {
                debug!("< have {piece}");
                consumer.have(piece)
            }
            Message::Bitfield(bitfield) => {
                debug!("< bitfield len {}", bitfield.len());
                consumer.bitfield(bitfield)
            }
            Message::HaveAll => {
                debug!("< have_all");
                consumer.have_all()
            }
            Message::HaveNone => {
                debug!("< have_none");
                consumer.have_none()
            }
            Message::Request(block) => {
                debug!("< request {block:?}");
                consumer.request(block)
            }
            Message::Piece(block) => {
                debug!(
                    "< piece index {} begin {} len {}",
                    block.index,
                    block.begin,
                    block.block.len()
                );
                consumer.piece(block)
            }
            Message::Cancel(block) => {
                debug!("< cancel {block:?}");
                consumer.cancel(block)
            }
            Message::SuggestPiece(piece) => {
                debug!("< suggest_piece {piece}");
                consumer.suggest_piece(piece)
            }
            Message::RejectRequest(block) => {
                debug!("< reject_request {block:?}");
                consumer.reject_request(block)
            }
            Message::AllowedFast(piece) => {
                debug!("< allowed_fast {piece}");
                consumer.allowed_fast(piece)
            }
            Message::Extended(msg) => self.extended(msg, consumer),
        }
    }

    fn extended<C: ProtocolConsumer + ?Sized>(
        &mut self,
        ExtendedMessage(ext_id, payload): ExtendedMessage,
        consumer: &mut C,
    ) -> Result<(), Error> {
        if ext_id == HANDSHAKE_ID {
            let handshake = ExtensionHandshake::from_payload(&payload)?;
            debug!("< extension handshake {:?}", handshake.m);
            self.registry.update(&handshake);
            return consumer.extension_handshake(handshake);
        }

        match self.registry.name(ext_id) {
            Some(MERKLE) => {
                let piece = MerklePiece::decode(payload)?;
                debug!(
                    "< merkle piece index {} begin {}",
                    piece.block.index, piece.block.begin
                );
                consumer.merkle_piece(piece)
            }
            Some(ELASTIC) => {
                let msg = ElasticMessage::decode(payload)?;
                debug!("< elastic {:?}", msg.msg_type());
                consumer.elastic(msg)
            }
            Some(name) => {
                debug!("< extension {name}");
                consumer.extension_message(name, payload)
            }
            None => {
                debug!("< unregistered extension {ext_id}");
                let mut body = BytesMut::with_capacity(1 + payload.len());
                body.extend_from_slice(&[ext_id]);
                body.extend_from_slice(&payload);
                consumer
                    .unknown_message(MessageId::Extended as u8, body.freeze())
            }
        }
    }
}

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;
use tokio_util::codec::Encoder;

use super::{Block, BlockInfo};
use crate::{bitfield::Bitfield, error::Error};

/// Messages exchanged after a successful handshake, from the vanilla
/// protocol, the Fast extension and the Extension protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have(usize),
    Bitfield(Bitfield),
    Request(BlockInfo),
    Piece(Block),
    Cancel(BlockInfo),
    SuggestPiece(usize),
    HaveAll,
    HaveNone,
    RejectRequest(BlockInfo),
    AllowedFast(usize),
    Extended(ExtendedMessage),
}

/// The first value is the id that the receiving side assigned to the
/// extension in the `m` dictionary of its handshake, 0 is the handshake
/// itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedMessage(pub u8, pub Bytes);

impl From<ExtendedMessage> for Message {
    fn from(value: ExtendedMessage) -> Self {
        Self::Extended(value)
    }
}

/// The IDs of the [`Message`]s.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MessageId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
    Cancel = 8,
    SuggestPiece = 13,
    HaveAll = 14,
    HaveNone = 15,
    RejectRequest = 16,
    AllowedFast = 17,
    Extended = 20,
}

impl TryFrom<u8> for MessageId {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use MessageId::*;
        Ok(match value {
            0 => Choke,
            1 => Unchoke,
            2 => Interested,
            3 => NotInterested,
            4 => Have,
            5 => Bitfield,
            6 => Request,
            7 => Piece,
            8 => Cancel,
            13 => SuggestPiece,
            14 => HaveAll,
            15 => HaveNone,
            16 => RejectRequest,
            17 => AllowedFast,
            20 => Extended,
            v => return Err(v),
        })
    }
}

impl MessageId {
    /// The exact body length (id byte included) of fixed size messages,
    /// `None` for messages with a variable payload.
    pub fn fixed_len(&self) -> Option<usize> {
        use MessageId::*;
        match self {
            Choke | Unchoke | Interested | NotInterested | HaveAll
            | HaveNone => Some(1),
            Have | SuggestPiece | AllowedFast => Some(1 + 4),
            Request | Cancel | RejectRequest => Some(1 + 4 + 4 + 4),
            Bitfield | Piece | Extended => None,
        }
    }

    /// Messages that may only arrive once, as the first message.
    pub fn is_bitfield_class(&self) -> bool {
        matches!(self, Self::Bitfield | Self::HaveAll | Self::HaveNone)
    }

    /// Messages of the Fast extension (BEP 6).
    pub fn is_fast(&self) -> bool {
        use MessageId::*;
        matches!(
            self,
            SuggestPiece | HaveAll | HaveNone | RejectRequest | AllowedFast
        )
    }
}

impl Message {
    pub fn id(&self) -> Option<MessageId> {
        use Message::*;
        Some(match self {
            KeepAlive => return None,
            Choke => MessageId::Choke,
            Unchoke => MessageId::Unchoke,
            Interested => MessageId::Interested,
            NotInterested => MessageId::NotInterested,
            Have(_) => MessageId::Have,
            Bitfield(_) => MessageId::Bitfield,
            Request(_) => MessageId::Request,
            Piece(_) => MessageId::Piece,
            Cancel(_) => MessageId::Cancel,
            SuggestPiece(_) => MessageId::SuggestPiece,
            HaveAll => MessageId::HaveAll,
            HaveNone => MessageId::HaveNone,
            RejectRequest(_) => MessageId::RejectRequest,
            AllowedFast(_) => MessageId::AllowedFast,
            Extended(_) => MessageId::Extended,
        })
    }

    /// Decode the body of a message, `body` starts after the id byte.
    ///
    /// The caller is responsible for the length check of fixed size
    /// messages, see [`MessageId::fixed_len`].
    pub fn decode_body(id: MessageId, mut body: Bytes) -> Result<Self, Error> {
        Ok(match id {
            MessageId::Choke => Message::Choke,
            MessageId::Unchoke => Message::Unchoke,
            MessageId::Interested => Message::Interested,
            MessageId::NotInterested => Message::NotInterested,
            MessageId::HaveAll => Message::HaveAll,
            MessageId::HaveNone => Message::HaveNone,
            MessageId::Have => Message::Have(body.get_u32() as usize),
            MessageId::SuggestPiece => {
                Message::SuggestPiece(body.get_u32() as usize)
            }
            MessageId::AllowedFast => {
                Message::AllowedFast(body.get_u32() as usize)
            }
            MessageId::Request => Message::Request(get_block_info(&mut body)),
            MessageId::Cancel => Message::Cancel(get_block_info(&mut body)),
            MessageId::RejectRequest => {
                Message::RejectRequest(get_block_info(&mut body))
            }
            MessageId::Bitfield => {
                Message::Bitfield(Bitfield::from_vec(body.to_vec()))
            }
            // <id=7><index><begin><block>
            MessageId::Piece => {
                if body.remaining() < 4 + 4 {
                    return Err(Error::MessageSizeInvalid(
                        id as u8,
                        body.len() + 1,
                    ));
                }
                let index = body.get_u32() as usize;
                let begin = body.get_u32() as usize;
                Message::Piece(Block { index, begin, block: body })
            }
            // <id=20><ext_id><payload>
            MessageId::Extended => {
                if body.is_empty() {
                    return Err(Error::MessageSizeInvalid(id as u8, 1));
                }
                let ext_id = body.get_u8();
                Message::Extended(ExtendedMessage(ext_id, body))
            }
        })
    }
}

fn get_block_info(buf: &mut Bytes) -> BlockInfo {
    let index = buf.get_u32() as usize;
    let begin = buf.get_u32() as usize;
    let len = buf.get_u32() as usize;
    BlockInfo { index, begin, len }
}

pub(crate) fn to_u32(v: usize) -> Result<u32, Error> {
    v.try_into()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e).into())
}

fn put_block_info(buf: &mut BytesMut, block: &BlockInfo) -> Result<(), Error> {
    buf.put_u32(to_u32(block.index)?);
    buf.put_u32(to_u32(block.begin)?);
    buf.put_u32(to_u32(block.len)?);
    Ok(())
}

/// Stateless encoder of [`Message`]s, the write side of
/// [`crate::peer::Parser`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageCodec;

impl Encoder<Message> for MessageCodec {
    type Error = Error;

    fn encode(
        &mut self,
        item: Message,
        buf: &mut BytesMut,
    ) -> Result<(), Self::Error> {
        let id = item.id().map_or(0, |id| id as u8);

        match item {
            // <len=0000>
            Message::KeepAlive => buf.put_u32(0),
            Message::Choke
            | Message::Unchoke
            | Message::Interested
            | Message::NotInterested
            | Message::HaveAll
            | Message::HaveNone => {
                buf.put_u32(1);
                buf.put_u8(id);
            }
            // <len=0005><id><piece index>
            Message::Have(piece)
            | Message::SuggestPiece(piece)
            | Message::AllowedFast(piece) => {
                buf.put_u32(1 + 4);
                buf.put_u8(id);
                buf.put_u32(to_u32(piece)?);
            }
            // <len=0013><id><index><begin><length>
            Message::Request(block)
            | Message::Cancel(block)
            | Message::RejectRequest(block) => {
                buf.put_u32(1 + 4 + 4 + 4);
                buf.put_u8(id);
                put_block_info(buf, &block)?;
            }
            // <len=0001+X><id=5><bitfield>
            Message::Bitfield(mut bitfield) => {
                // spare bits at the end must be cleared
                bitfield.set_uninitialized(false);
                let v = bitfield.into_vec();
                buf.put_u32(to_u32(1 + v.len())?);
                buf.put_u8(id);
                buf.extend_from_slice(&v);
            }
            // <len=0009+X><id=7><index><begin><block>
            Message::Piece(Block { index, begin, block }) => {
                buf.put_u32(to_u32(1 + 4 + 4 + block.len())?);
                buf.put_u8(id);
                buf.put_u32(to_u32(index)?);
                buf.put_u32(to_u32(begin)?);
                buf.extend_from_slice(&block);
            }
            // <len=0002+X><id=20><ext_id><payload>
            Message::Extended(ExtendedMessage(ext_id, payload)) => {
                buf.put_u32(to_u32(2 + payload.len())?);
                buf.put_u8(id);
                buf.put_u8(ext_id);
                buf.extend_from_slice(&payload);
            }
        }
        Ok(())
    }
}

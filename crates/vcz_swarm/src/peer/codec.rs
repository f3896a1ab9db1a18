use std::collections::VecDeque;

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::{Event, Parser};
use crate::{
    config::ParserConfig,
    error::Error,
    extensions::core::{Handshake, Message, MessageCodec},
};

/// Codec of a whole connection, for use with `Framed`.
///
/// Decoding drives a [`Parser`] from the first byte of the handshake, so the
/// read half yields the handshake fields as events too. The write half
/// encodes [`Message`]s, and the handshake through [`Encoder<Handshake>`].
///
/// Events parsed before an error are still yielded, the error comes after
/// them.
#[derive(Debug, Default)]
pub struct PeerCodec {
    parser: Parser,
    events: VecDeque<Event>,
    error: Option<Error>,
}

impl PeerCodec {
    pub fn new(config: &ParserConfig) -> Self {
        Self {
            parser: Parser::new(config),
            events: VecDeque::new(),
            error: None,
        }
    }

    pub fn parser(&self) -> &Parser {
        &self.parser
    }
}

impl Decoder for PeerCodec {
    type Item = Event;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Event>, Error> {
        if let Some(event) = self.events.pop_front() {
            return Ok(Some(event));
        }
        if let Some(e) = self.error.take() {
            return Err(e);
        }

        match self.parser.feed(&src[..], &mut self.events) {
            Ok(consumed) => src.advance(consumed),
            Err(e) => {
                src.clear();
                if self.events.is_empty() {
                    return Err(e);
                }
                self.error = Some(e);
            }
        }

        // room for the rest of the current unit
        src.reserve(self.parser.wanted());

        Ok(self.events.pop_front())
    }
}

impl Encoder<Message> for PeerCodec {
    type Error = Error;

    fn encode(
        &mut self,
        item: Message,
        dst: &mut BytesMut,
    ) -> Result<(), Error> {
        MessageCodec.encode(item, dst)
    }
}

impl Encoder<Handshake> for PeerCodec {
    type Error = Error;

    fn encode(
        &mut self,
        item: Handshake,
        dst: &mut BytesMut,
    ) -> Result<(), Error> {
        item.encode(dst);
        Ok(())
    }
}

use std::io;

use thiserror::Error;

use crate::{extensions::core::BlockInfo, peer::PeerId};

impl From<bendy::decoding::Error> for Error {
    fn from(value: bendy::decoding::Error) -> Self {
        Self::BencodeError(value.to_string())
    }
}

impl From<bendy::encoding::Error> for Error {
    fn from(value: bendy::encoding::Error) -> Self {
        Self::BencodeError(value.to_string())
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("The handshake does not start with \"BitTorrent protocol\"")]
    HandshakeInvalid,

    #[error("Message of {0} bytes is larger than the maximum of {1} bytes")]
    MessageTooLarge(usize, usize),

    #[error("Message with id {0} has an invalid length of {1} bytes")]
    MessageSizeInvalid(u8, usize),

    #[error(
        "Bitfield, HaveAll or HaveNone received after the first message of \
         the connection"
    )]
    BitfieldOutOfSequence,

    #[error("Message with id {0} requires the Fast extension")]
    FastNotNegotiated(u8),

    #[error("Extended message received without the Extension protocol")]
    ExtensionNotNegotiated,

    #[error("The extension payload of `{0}` is malformed")]
    ExtensionMalformed(&'static str),

    #[error("Failed to decode or encode the bencode buffer: {0}")]
    BencodeError(String),

    #[error("The parser is in a terminal error state")]
    ParserErrored,

    #[error("The consumer rejected the message: {0}")]
    ConsumerRejected(String),

    #[error("The peer {0} is already registered on this torrent")]
    PeerAlreadyRegistered(PeerId),

    #[error("The given peer id was not found: {0}")]
    PeerNotFound(PeerId),

    #[error("Cannot shrink the torrent from {0} to {1} bytes")]
    PiecesetShrink(u64, u64),

    #[error("Cannot change the piece length from {0} to {1} bytes")]
    PieceLengthChanged(u32, u32),

    #[error("The block {0:?} does not fit inside its piece")]
    BlockInvalid(BlockInfo),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error(
        "Tried to load $HOME but could not find it. Please make sure you have \
         a $HOME env and that this program has the permission to create dirs."
    )]
    HomeInvalid,

    #[error(
        "Error while trying to read the configuration file, please make sure \
         it has the correct format"
    )]
    ConfigDeserializeError(#[from] toml::de::Error),

    #[error("IO error")]
    IO(#[from] io::Error),
}

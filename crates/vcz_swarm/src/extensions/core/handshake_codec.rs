//! Codec for encoding and decoding handshakes.
//!
//! This has to be a separate codec as the handshake has a different
//! structure than the rest of the messages. Moreover, handshakes may only
//! be sent once at the beginning of a connection, preceding all other
//! messages. On the read side the [`crate::peer::Parser`] decodes the
//! handshake field by field, this type is the write side and a convenience
//! decoder for a complete 68 byte buffer.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::Encoder;

use super::{HANDSHAKE_LEN, PSTR, PSTR_LEN};
use crate::{bitfield::Reserved, error::Error, peer::PeerId, torrent::InfoHash};

#[derive(Debug, Clone, Copy, Default)]
pub struct HandshakeCodec;

impl Encoder<Handshake> for HandshakeCodec {
    type Error = Error;

    fn encode(
        &mut self,
        handshake: Handshake,
        buf: &mut BytesMut,
    ) -> Result<(), Error> {
        handshake.encode(buf);
        Ok(())
    }
}

/// pstrlen = 19
/// pstr = "BitTorrent protocol"
///
/// This is the very first message exchanged. If the peer's protocol string
/// (`BitTorrent protocol`) or the info hash differs from ours, the connection
/// is severed. The reserved field advertises which extensions the peer
/// supports. The peer id is usually the client name and version.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Handshake {
    pub reserved: Reserved,
    pub info_hash: InfoHash,
    pub peer_id: PeerId,
}

impl Handshake {
    pub fn new(
        info_hash: impl Into<InfoHash>,
        peer_id: impl Into<PeerId>,
        reserved: Reserved,
    ) -> Self {
        Self { reserved, info_hash: info_hash.into(), peer_id: peer_id.into() }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(HANDSHAKE_LEN);
        buf.put_u8(PSTR_LEN as u8);
        buf.extend_from_slice(&PSTR);
        buf.extend_from_slice(&self.reserved.as_bytes());
        buf.extend_from_slice(&self.info_hash.0);
        buf.extend_from_slice(&self.peer_id.0);
    }

    pub fn serialize(&self) -> [u8; HANDSHAKE_LEN] {
        let mut buf = BytesMut::with_capacity(HANDSHAKE_LEN);
        self.encode(&mut buf);
        let mut out = [0u8; HANDSHAKE_LEN];
        out.copy_from_slice(&buf);
        out
    }

    /// Decode a complete handshake.
    pub fn decode(mut buf: &[u8]) -> Result<Self, Error> {
        if buf.len() < HANDSHAKE_LEN
            || buf[0] as usize != PSTR_LEN
            || buf[1..1 + PSTR_LEN] != PSTR
        {
            return Err(Error::HandshakeInvalid);
        }
        buf.advance(1 + PSTR_LEN);

        let mut reserved = [0u8; 8];
        buf.copy_to_slice(&mut reserved);
        let mut info_hash = [0u8; 20];
        buf.copy_to_slice(&mut info_hash);
        let mut peer_id = [0u8; 20];
        buf.copy_to_slice(&mut peer_id);

        Ok(Self {
            reserved: reserved.into(),
            info_hash: InfoHash(info_hash),
            peer_id: PeerId(peer_id),
        })
    }
}

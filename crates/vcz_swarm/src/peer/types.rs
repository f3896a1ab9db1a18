use std::fmt::Display;

use crate::{bitfield::Reserved, extensions::core::BlockInfo};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct PeerId(pub [u8; 20]);

impl Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl std::fmt::Debug for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.to_string();
        f.write_str(&s)
    }
}

impl TryInto<PeerId> for String {
    type Error = String;
    fn try_into(self) -> Result<PeerId, Self::Error> {
        let buff = hex::decode(self).map_err(|e| e.to_string())?;
        let hash = PeerId::try_from(buff)?;
        Ok(hash)
    }
}

impl From<PeerId> for [u8; 20] {
    fn from(value: PeerId) -> Self {
        value.0
    }
}

impl From<[u8; 20]> for PeerId {
    fn from(value: [u8; 20]) -> Self {
        Self(value)
    }
}

impl TryFrom<Vec<u8>> for PeerId {
    type Error = &'static str;

    fn try_from(value: Vec<u8>) -> Result<Self, Self::Error> {
        let buff: [u8; 20] = value
            .try_into()
            .map_err(|_| "The PeerId must have exactly 20 bytes")?;
        Ok(PeerId(buff))
    }
}

/// Optional protocols of a connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Fast extension, BEP 6.
    pub fast: bool,
    /// Extension protocol, BEP 10.
    pub extension: bool,
}

impl Capabilities {
    /// Capabilities present on both sides.
    pub fn intersection(self, other: Capabilities) -> Capabilities {
        Capabilities {
            fast: self.fast && other.fast,
            extension: self.extension && other.extension,
        }
    }
}

impl From<Reserved> for Capabilities {
    fn from(value: Reserved) -> Self {
        Self {
            fast: value.supports_fast(),
            extension: value.supports_extended(),
        }
    }
}

/// Commands sent by the scheduling side to the task that owns the
/// connection of a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerMsg {
    /// We stopped uploading to this peer.
    Choke,
    /// We will upload to this peer.
    Unchoke,
    Interested,
    NotInterested,
    /// Send a Cancel for each of these requests, in one go.
    CancelBlocks(Vec<BlockInfo>),
    /// Refuse the requests of this peer for the given piece.
    RejectPiece(usize),
}

//! Types for the Extended protocol.
//! BEP 10 https://www.bittorrent.org/beps/bep_0010.html

mod codec;

use std::collections::BTreeMap;

use bendy::{decoding::FromBencode, encoding::ToBencode};
use bytes::Bytes;
use hashbrown::HashMap;
use tracing::trace;

use crate::{
    error::Error,
    extensions::{core::ExtendedMessage, elastic::ELASTIC, merkle::MERKLE},
};

/// The extended message id reserved for the handshake.
pub const HANDSHAKE_ID: u8 = 0;

/// Payload of the extension handshake.
///
/// The `m` dictionary maps an extension name to the id that the sender
/// assigned to it. An id of 0 means the sender disabled the extension.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExtensionHandshake {
    /// messages (supported extensions)
    pub m: BTreeMap<String, u8>,
    /// port
    pub p: Option<u16>,
    /// a string identifying the client and the version
    pub v: Option<String>,
    /// number of outstanding requests messages this client supports
    /// without dropping any.
    pub reqq: Option<u16>,
    /// the size of the metadata file, added by BEP 9.
    pub metadata_size: Option<u32>,
}

impl ExtensionHandshake {
    /// Handshake advertising the extensions that this crate can decode.
    pub fn supported() -> Self {
        let mut m = BTreeMap::new();
        m.insert(MERKLE.to_owned(), 1);
        m.insert(ELASTIC.to_owned(), 2);
        Self {
            m,
            v: Some(concat!("vcz_swarm ", env!("CARGO_PKG_VERSION")).into()),
            ..Default::default()
        }
    }

    pub fn from_payload(payload: &[u8]) -> Result<Self, Error> {
        Ok(Self::from_bencode(payload)?)
    }

    pub fn to_payload(&self) -> Result<Bytes, Error> {
        Ok(self.to_bencode()?.into())
    }
}

impl TryFrom<&ExtensionHandshake> for ExtendedMessage {
    type Error = Error;

    fn try_from(value: &ExtensionHandshake) -> Result<Self, Self::Error> {
        Ok(ExtendedMessage(HANDSHAKE_ID, value.to_payload()?))
    }
}

/// Per connection map of the extension ids assigned by the remote peer.
#[derive(Debug, Clone, Default)]
pub struct ExtensionRegistry {
    names: HashMap<u8, String>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply the `m` dictionary of a handshake. Handshakes may be sent more
    /// than once, each one updates the previous assignment.
    pub fn update(&mut self, handshake: &ExtensionHandshake) {
        for (name, id) in &handshake.m {
            self.names.retain(|_, v| v != name);
            if *id != HANDSHAKE_ID {
                trace!("extension {name} registered as {id}");
                self.names.insert(*id, name.clone());
            } else {
                trace!("extension {name} disabled");
            }
        }
    }

    pub fn name(&self, id: u8) -> Option<&str> {
        self.names.get(&id).map(|v| v.as_str())
    }

    pub fn id(&self, name: &str) -> Option<u8> {
        self.names.iter().find(|(_, v)| *v == name).map(|(k, _)| *k)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

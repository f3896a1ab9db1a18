use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{HashChain, MerklePiece, HASH_LEN, MERKLE};
use crate::{
    error::Error,
    extensions::core::{to_u32, Block},
};

/// <index><begin><count>{<position><hash>}*count
const HEADER_LEN: usize = 4 + 4 + 4;

pub(crate) fn get_hash_chain(
    buf: &mut Bytes,
    name: &'static str,
) -> Result<HashChain, Error> {
    if buf.remaining() < 4 {
        return Err(Error::ExtensionMalformed(name));
    }
    let count = buf.get_u32() as usize;

    // the count comes from the wire, check it before reserving
    if buf.remaining() / (4 + HASH_LEN) < count {
        return Err(Error::ExtensionMalformed(name));
    }

    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        let position = buf.get_u32();
        let mut hash = [0u8; HASH_LEN];
        buf.copy_to_slice(&mut hash);
        entries.push((position, hash));
    }

    Ok(HashChain { entries })
}

pub(crate) fn put_hash_chain(
    buf: &mut BytesMut,
    chain: &HashChain,
) -> Result<(), Error> {
    buf.put_u32(to_u32(chain.entries.len())?);
    for (position, hash) in &chain.entries {
        buf.put_u32(*position);
        buf.extend_from_slice(hash);
    }
    Ok(())
}

impl MerklePiece {
    /// Decode the payload of an extended message, without the extension id.
    pub fn decode(mut buf: Bytes) -> Result<Self, Error> {
        if buf.remaining() < HEADER_LEN {
            return Err(Error::ExtensionMalformed(MERKLE));
        }
        let index = buf.get_u32() as usize;
        let begin = buf.get_u32() as usize;
        let hash_chain = get_hash_chain(&mut buf, MERKLE)?;

        Ok(Self { block: Block { index, begin, block: buf }, hash_chain })
    }

    pub fn encode(&self) -> Result<Bytes, Error> {
        let mut buf = BytesMut::with_capacity(
            8 + self.hash_chain.encoded_len() + self.block.block.len(),
        );
        buf.put_u32(to_u32(self.block.index)?);
        buf.put_u32(to_u32(self.block.begin)?);
        put_hash_chain(&mut buf, &self.hash_chain)?;
        buf.extend_from_slice(&self.block.block);
        Ok(buf.freeze())
    }
}

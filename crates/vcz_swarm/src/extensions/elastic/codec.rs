use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{ElasticMessage, ElasticMsgType, ViewSignature, ELASTIC};
use crate::{
    bitfield::Bitfield,
    error::Error,
    extensions::{
        core::{to_u32, Block},
        merkle::{get_hash_chain, put_hash_chain},
    },
};

fn ensure(buf: &Bytes, len: usize) -> Result<(), Error> {
    if buf.remaining() < len {
        return Err(Error::ExtensionMalformed(ELASTIC));
    }
    Ok(())
}

/// <view_length><sig_len><sig>
fn get_view(buf: &mut Bytes) -> Result<ViewSignature, Error> {
    ensure(buf, 8 + 2)?;
    let view_length = buf.get_u64();
    let sig_len = buf.get_u16() as usize;
    ensure(buf, sig_len)?;
    let signature = buf.split_to(sig_len);
    Ok(ViewSignature { view_length, signature })
}

fn put_view(buf: &mut BytesMut, view: &ViewSignature) -> Result<(), Error> {
    let sig_len: u16 = view
        .signature
        .len()
        .try_into()
        .map_err(|_| Error::ExtensionMalformed(ELASTIC))?;
    buf.put_u64(view.view_length);
    buf.put_u16(sig_len);
    buf.extend_from_slice(&view.signature);
    Ok(())
}

impl ElasticMessage {
    /// Decode the payload of an extended message, without the extension id.
    pub fn decode(mut buf: Bytes) -> Result<Self, Error> {
        ensure(&buf, 1)?;
        let msg_type = ElasticMsgType::try_from(buf.get_u8())
            .map_err(|_| Error::ExtensionMalformed(ELASTIC))?;

        Ok(match msg_type {
            ElasticMsgType::Signature => Self::Signature(get_view(&mut buf)?),
            ElasticMsgType::Piece => {
                ensure(&buf, 4 + 4)?;
                let index = buf.get_u32() as usize;
                let begin = buf.get_u32() as usize;
                let view = get_view(&mut buf)?;
                let hash_chain = get_hash_chain(&mut buf, ELASTIC)?;
                Self::Piece {
                    block: Block { index, begin, block: buf },
                    view,
                    hash_chain,
                }
            }
            ElasticMsgType::Bitfield => {
                ensure(&buf, 8)?;
                let view_length = buf.get_u64();
                Self::Bitfield {
                    view_length,
                    bitfield: Bitfield::from_vec(buf.to_vec()),
                }
            }
        })
    }

    pub fn encode(&self) -> Result<Bytes, Error> {
        let mut buf = BytesMut::new();
        buf.put_u8(self.msg_type() as u8);

        match self {
            Self::Signature(view) => put_view(&mut buf, view)?,
            Self::Piece { block, view, hash_chain } => {
                buf.put_u32(to_u32(block.index)?);
                buf.put_u32(to_u32(block.begin)?);
                put_view(&mut buf, view)?;
                put_hash_chain(&mut buf, hash_chain)?;
                buf.extend_from_slice(&block.block);
            }
            Self::Bitfield { view_length, bitfield } => {
                let mut bitfield = bitfield.clone();
                bitfield.set_uninitialized(false);
                buf.put_u64(*view_length);
                buf.extend_from_slice(&bitfield.into_vec());
            }
        }

        Ok(buf.freeze())
    }
}

#[cfg(test)]
mod tests {
    use bitvec::{bitvec, prelude::Msb0};

    use super::*;
    use crate::extensions::merkle::HashChain;

    #[test]
    fn signature() {
        let msg = ElasticMessage::Signature(ViewSignature::new(
            1 << 33,
            vec![3u8; 40],
        ));
        let mut bytes = msg.encode().unwrap();

        assert_eq!(bytes.len(), 1 + 8 + 2 + 40);
        assert_eq!(ElasticMessage::decode(bytes.clone()).unwrap(), msg);

        assert_eq!(bytes.get_u8(), 0);
        assert_eq!(bytes.get_u64(), 1 << 33);
        assert_eq!(bytes.get_u16(), 40);
    }

    #[test]
    fn piece() {
        let msg = ElasticMessage::Piece {
            block: Block::new(1, 32768, vec![8u8; 10]),
            view: ViewSignature::new(500_000, vec![1u8; 4]),
            hash_chain: HashChain::new(vec![(3, [2; 20])]),
        };
        let bytes = msg.encode().unwrap();

        assert_eq!(bytes[0], ElasticMsgType::Piece as u8);
        assert_eq!(bytes.len(), 1 + 8 + 8 + 2 + 4 + 4 + 24 + 10);
        assert_eq!(ElasticMessage::decode(bytes).unwrap(), msg);
    }

    #[test]
    fn bitfield() {
        let msg = ElasticMessage::Bitfield {
            view_length: 42,
            bitfield: bitvec![u8, Msb0; 1, 0, 1, 1, 0, 0, 0, 0],
        };
        let bytes = msg.encode().unwrap();

        assert_eq!(&bytes[..], &[2, 0, 0, 0, 0, 0, 0, 0, 42, 0b1011_0000]);
        assert_eq!(ElasticMessage::decode(bytes).unwrap(), msg);
    }

    #[test]
    fn malformed() {
        // unknown subtype
        assert!(ElasticMessage::decode(Bytes::from_static(&[9])).is_err());
        // signature shorter than announced
        let bytes = Bytes::from_static(&[0, 0, 0, 0, 0, 0, 0, 0, 1, 0, 5, 1]);
        assert!(matches!(
            ElasticMessage::decode(bytes),
            Err(Error::ExtensionMalformed(ELASTIC))
        ));
        assert!(ElasticMessage::decode(Bytes::new()).is_err());
    }
}

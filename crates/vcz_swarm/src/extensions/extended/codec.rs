//! Bencode codec of the extension handshake.

use std::collections::BTreeMap;

use bendy::{
    decoding::{FromBencode, Object, ResultExt},
    encoding::{SingleItemEncoder, ToBencode},
};

use super::ExtensionHandshake;

/// The `m` dictionary, name -> id.
struct ExtensionIds<'a>(&'a BTreeMap<String, u8>);

impl ToBencode for ExtensionIds<'_> {
    const MAX_DEPTH: usize = 1;

    fn encode(
        &self,
        encoder: SingleItemEncoder,
    ) -> Result<(), bendy::encoding::Error> {
        // BTreeMap<String, _> iterates in the byte order bencode requires
        encoder.emit_dict(|mut e| {
            for (name, id) in self.0 {
                e.emit_pair(name.as_bytes(), *id)?;
            }
            Ok(())
        })
    }
}

fn decode_ids(
    object: Object,
) -> Result<BTreeMap<String, u8>, bendy::decoding::Error> {
    let mut dict = object.try_into_dictionary()?;
    let mut m = BTreeMap::new();

    while let Some((name, value)) = dict.next_pair()? {
        let id = u8::decode_bencode_object(value).context("m")?;
        m.insert(String::from_utf8_lossy(name).into_owned(), id);
    }

    Ok(m)
}

impl ToBencode for ExtensionHandshake {
    const MAX_DEPTH: usize = 20;

    fn encode(
        &self,
        encoder: SingleItemEncoder,
    ) -> Result<(), bendy::encoding::Error> {
        encoder.emit_dict(|mut e| {
            e.emit_pair(b"m", ExtensionIds(&self.m))?;
            if let Some(metadata_size) = self.metadata_size {
                e.emit_pair(b"metadata_size", metadata_size)?;
            }
            if let Some(p) = self.p {
                e.emit_pair(b"p", p)?;
            }
            if let Some(reqq) = self.reqq {
                e.emit_pair(b"reqq", reqq)?;
            }
            if let Some(v) = &self.v {
                e.emit_pair(b"v", v)?;
            }
            Ok(())
        })
    }
}

impl FromBencode for ExtensionHandshake {
    fn decode_bencode_object(
        object: Object,
    ) -> Result<Self, bendy::decoding::Error>
    where
        Self: Sized,
    {
        let mut dict = object.try_into_dictionary()?;
        let mut p = None;
        let mut v = None;
        let mut reqq = None;
        let mut metadata_size = None;
        let mut m = BTreeMap::new();

        while let Some(pair) = dict.next_pair()? {
            match pair {
                (b"m", value) => m = decode_ids(value).context("m")?,
                (b"metadata_size", value) => {
                    metadata_size = u32::decode_bencode_object(value)
                        .context("metadata_size")
                        .map(Some)?;
                }
                (b"p", value) => {
                    p = u16::decode_bencode_object(value)
                        .context("p")
                        .map(Some)?;
                }
                (b"reqq", value) => {
                    reqq = u16::decode_bencode_object(value)
                        .context("reqq")
                        .map(Some)?;
                }
                (b"v", value) => {
                    v = String::decode_bencode_object(value)
                        .context("v")
                        .map(Some)?;
                }
                _ => {}
            }
        }

        Ok(Self { m, p, v, reqq, metadata_size })
    }
}

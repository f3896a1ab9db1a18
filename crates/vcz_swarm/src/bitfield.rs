//! Wrapper types around Bitvec.
use bitvec::prelude::*;

/// Bitfield where index = piece.
pub type Bitfield = BitVec<u8, Msb0>;

/// Reserved bytes exchanged during handshake.
type ReservedAlias = BitArray<[u8; 8], Msb0>;

/// Bit of the Extension protocol (BEP 10), byte 5 mask 0x10.
const EXTENSION_BIT: usize = 43;

/// Bit of the Fast extension (BEP 6), byte 7 mask 0x04.
const FAST_BIT: usize = 61;

#[derive(Debug, Clone, Default, Copy, PartialEq, Eq)]
pub struct Reserved(pub ReservedAlias);

impl From<[u8; 8]> for Reserved {
    fn from(value: [u8; 8]) -> Self {
        Self(ReservedAlias::from(value))
    }
}

impl From<Reserved> for [u8; 8] {
    fn from(value: Reserved) -> Self {
        value.0.into_inner()
    }
}

impl Reserved {
    /// Reserved bits advertising the given capabilities.
    pub fn new(fast: bool, extension: bool) -> Reserved {
        let mut r = Reserved::default();
        r.0.set(FAST_BIT, fast);
        r.0.set(EXTENSION_BIT, extension);
        r
    }

    pub fn supports_extended(&self) -> bool {
        self.0[EXTENSION_BIT]
    }

    pub fn supports_fast(&self) -> bool {
        self.0[FAST_BIT]
    }

    pub fn as_bytes(&self) -> [u8; 8] {
        (*self).into()
    }
}

pub trait VczBitfield {
    fn from_piece(piece: usize) -> Bitfield {
        bitvec![u8, Msb0; 0; piece]
    }

    /// Set vector to a new len, in bits.
    fn new_and_resize(vec: Vec<u8>, len: usize) -> Bitfield {
        let mut s = Bitfield::from_vec(vec);
        s.resize(len, false);
        s
    }

    /// Read a bit, indexes past the end are `false`.
    fn has(&self, index: usize) -> bool;

    /// If there is at least one index set on both bitfields.
    fn intersects(&self, other: &Bitfield) -> bool;

    fn safe_set(&mut self, _index: usize) {}
}

impl VczBitfield for Bitfield {
    fn has(&self, index: usize) -> bool {
        self.get(index).is_some_and(|b| *b)
    }

    fn intersects(&self, other: &Bitfield) -> bool {
        self.iter_ones().any(|i| other.has(i))
    }

    fn safe_set(&mut self, index: usize) {
        if self.len() <= index {
            self.resize(index + 1, false);
        }
        self.set(index, true);
    }
}

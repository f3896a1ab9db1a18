//! Extensions (protocols) that act on Peers, including the core protocol.

pub mod core;
pub mod elastic;
pub mod extended;
pub mod merkle;

pub use core::*;
pub use elastic::*;
pub use extended::*;
pub use merkle::*;

#![allow(dead_code)]

use std::sync::Arc;

use tokio::sync::mpsc;
use vcz_swarm::{
    bitfield::Bitfield,
    peer::{PeerCtx, PeerMsg},
};

pub fn setup() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("vcz_swarm=trace")
        .with_target(false)
        .compact()
        .with_file(false)
        .without_time()
        .with_test_writer()
        .try_init();
}

/// A peer as seen by the torrent, and the receiving end of the commands
/// its connection task would get.
pub fn peer(
    id: u8,
    pieces: Bitfield,
) -> (Arc<PeerCtx>, mpsc::UnboundedReceiver<PeerMsg>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let peer = PeerCtx::new([id; 20], 0, tx);
    peer.set_pieces(pieces);
    (Arc::new(peer), rx)
}

pub fn drain(rx: &mut mpsc::UnboundedReceiver<PeerMsg>) -> Vec<PeerMsg> {
    let mut msgs = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        msgs.push(msg);
    }
    msgs
}

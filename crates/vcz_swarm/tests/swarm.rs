use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use bitvec::{bitvec, prelude::Msb0};
use bytes::Bytes;
use hashbrown::HashSet;
use tokio::sync::mpsc;
use vcz_swarm::{
    bitfield::Bitfield,
    config::{Config, SchedulerConfig},
    extensions::BlockInfo,
    peer::{Peer, PeerCtx, PeerId, PeerMsg},
    torrent::{ChokeMode, Choker, Piece, PiecesetDescriptor, Scheduler},
};

mod common;

use common::{drain, peer};

const BLOCK_LEN: u32 = 16384;
const PIECE_LEN: u32 = BLOCK_LEN * 2;

fn data(block: &BlockInfo) -> Bytes {
    Bytes::from(vec![block.index as u8; block.len])
}

fn blocks_of(piece: usize) -> Vec<BlockInfo> {
    vec![
        BlockInfo::new(piece, 0, BLOCK_LEN as usize),
        BlockInfo::new(piece, BLOCK_LEN as usize, BLOCK_LEN as usize),
    ]
}

/// Two peers race for the same piece, one of them leaves halfway and a
/// third one picks up what it left behind.
#[test]
fn download_with_duplicates_and_orphans() {
    common::setup();

    let (tx, mut assembled) = mpsc::unbounded_channel::<(PeerId, Piece)>();
    let config = SchedulerConfig { seed: Some(3), ..Default::default() };
    let mut s: Scheduler<PeerCtx> = Scheduler::new(
        PiecesetDescriptor::new(PIECE_LEN as u64 * 2, PIECE_LEN),
        &config,
        tx,
    );

    let (a, mut a_rx) = peer(1, bitvec![u8, Msb0; 1; 2]);
    let (b, mut b_rx) = peer(2, bitvec![u8, Msb0; 1; 2]);
    s.peer_registered(a.clone()).unwrap();
    s.peer_registered(b.clone()).unwrap();
    assert_eq!(s.availability(0), 2);

    let from_a = s.allocate_requests(&a.id, 2, false).unwrap();
    let x = from_a[0].index;
    let y = 1 - x;
    assert_eq!(from_a, blocks_of(x));

    // the claimed piece went to the back, b starts with the other one and
    // then duplicates the first
    let from_b = s.allocate_requests(&b.id, 4, false).unwrap();
    assert_eq!(from_b[..2].to_vec(), blocks_of(y));
    assert_eq!(from_b[2..].to_vec(), blocks_of(x));

    for block in &from_a {
        s.handle_block(&a.id, block, None, None, data(block)).unwrap();
    }
    let (by, piece) = assembled.try_recv().unwrap();
    assert_eq!(by, a.id);
    assert_eq!(piece.index, x);
    assert!(piece.data().iter().all(|b| *b == x as u8));

    s.set_piece_not_needed(x);

    assert_eq!(drain(&mut a_rx), vec![PeerMsg::Interested]);
    assert_eq!(
        drain(&mut b_rx),
        vec![PeerMsg::Interested, PeerMsg::CancelBlocks(blocks_of(x))]
    );

    s.peer_deregistered(&b.id).unwrap();
    assert!(s.is_orphaned(y));
    assert_eq!(s.availability(y), 1);

    let (c, mut c_rx) = peer(3, bitvec![u8, Msb0; 1; 2]);
    s.peer_registered(c.clone()).unwrap();

    let from_c = s.allocate_requests(&c.id, 8, false).unwrap();
    assert_eq!(from_c, blocks_of(y));
    assert!(!s.is_orphaned(y));

    for block in &from_c {
        s.handle_block(&c.id, block, None, None, data(block)).unwrap();
    }
    let (by, piece) = assembled.try_recv().unwrap();
    assert_eq!((by, piece.index), (c.id, y));

    s.set_piece_not_needed(y);
    assert_eq!(s.needed_piece_count(), 0);
    assert_eq!(drain(&mut a_rx), vec![PeerMsg::NotInterested]);
    assert_eq!(
        drain(&mut c_rx),
        vec![PeerMsg::Interested, PeerMsg::NotInterested]
    );
    assert!(assembled.try_recv().is_err());
}

#[test]
fn choked_while_downloading() {
    common::setup();

    let (tx, _assembled) = mpsc::unbounded_channel::<(PeerId, Piece)>();
    let config = SchedulerConfig { seed: Some(3), ..Default::default() };
    let mut s: Scheduler<PeerCtx> = Scheduler::new(
        PiecesetDescriptor::new(PIECE_LEN as u64 * 4, PIECE_LEN),
        &config,
        tx,
    );

    let (a, _a_rx) = peer(1, bitvec![u8, Msb0; 1; 4]);
    s.peer_registered(a.clone()).unwrap();
    s.add_allowed_fast(&a.id, 2).unwrap();

    let first = s.allocate_requests(&a.id, 2, false).unwrap();
    s.peer_choked(&a.id).unwrap();
    assert!(s.issued_requests(&a.id).unwrap().is_empty());

    if first[0].index == 2 {
        // the choked requests come back first
        assert_eq!(s.allocate_requests(&a.id, 2, true).unwrap(), first);
    } else {
        // only the allowed fast piece while choked
        let fast = s.allocate_requests(&a.id, 4, true).unwrap();
        assert_eq!(fast, blocks_of(2));
        assert_eq!(s.allocate_requests(&a.id, 2, false).unwrap(), first);
    }

    let issued = s.issued_requests(&a.id).unwrap();
    s.handle_reject(&a.id, &issued[0]).unwrap();
    assert_eq!(s.issued_requests(&a.id).unwrap().len(), issued.len() - 1);
    assert_eq!(s.allocate_requests(&a.id, 1, false).unwrap(), vec![issued[0]]);
}

/// Peers on different tasks sharing one scheduler behind a lock complete
/// every piece exactly once, while the pieces are verified on another
/// task.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shared_scheduler() {
    common::setup();

    const PIECES: usize = 16;

    let (tx, mut assembled) = mpsc::unbounded_channel::<(PeerId, Piece)>();
    let scheduler: Scheduler<PeerCtx> = Scheduler::new(
        PiecesetDescriptor::new(
            PIECE_LEN as u64 * PIECES as u64,
            PIECE_LEN,
        ),
        &SchedulerConfig::default(),
        tx,
    );
    let scheduler = Arc::new(Mutex::new(scheduler));

    let verifier = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move {
            let mut pieces = HashSet::new();
            while pieces.len() < PIECES {
                let Some((_, piece)) = assembled.recv().await else { break };
                assert!(piece.is_complete());
                assert!(
                    pieces.insert(piece.index),
                    "piece {} twice",
                    piece.index
                );
                tokio::task::yield_now().await;
                scheduler.lock().unwrap().set_piece_not_needed(piece.index);
            }
            pieces
        })
    };

    let mut handles = Vec::new();
    let mut receivers = Vec::new();

    for id in 0..4 {
        let (p, rx) = peer(id, Bitfield::repeat(true, PIECES));
        receivers.push(rx);
        scheduler.lock().unwrap().peer_registered(p.clone()).unwrap();

        let scheduler = scheduler.clone();
        handles.push(tokio::spawn(async move {
            loop {
                let done = {
                    let mut s = scheduler.lock().unwrap();
                    let blocks = s.allocate_requests(&p.id, 3, false).unwrap();
                    for block in &blocks {
                        s.handle_block(&p.id, block, None, None, data(block))
                            .unwrap();
                    }
                    s.needed_piece_count() == 0
                };
                if done {
                    break;
                }
                tokio::task::yield_now().await;
            }
        }));
    }

    let pieces = verifier.await.unwrap();
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(pieces.len(), PIECES);
    assert_eq!(scheduler.lock().unwrap().needed_piece_count(), 0);
}

#[test]
fn choke_rounds_follow_the_rates() {
    common::setup();

    let config = Config::from_toml("[choker]\nmax_unchoked = 2").unwrap();
    let choker = Choker::new(&config.choker);

    let mut peers: Vec<Arc<PeerCtx>> = Vec::new();
    let mut receivers = Vec::new();
    for id in 0..3 {
        let (p, rx) = peer(id, Bitfield::new());
        p.set_peer_interested(true);
        peers.push(p);
        receivers.push(rx);
    }

    let start = Instant::now();
    let round = choker.run(&peers, ChokeMode::Downloading, start);
    assert_eq!(round.unchoked.len(), 2);
    assert_eq!(peers.iter().filter(|p| !p.am_choking()).count(), 2);

    let waiting = peers.iter().find(|p| p.am_choking()).unwrap().clone();
    let later = start + Duration::from_secs(config.choker.window_secs + 1);
    for (i, p) in peers.iter().filter(|p| !p.am_choking()).enumerate() {
        p.counter.record_download_at(100 * (i as u64 + 1), later);
    }
    // it keeps sending while choked, faster than the slowest unchoked peer
    waiting.counter.record_download_at(150, later);
    let slowest = peers
        .iter()
        .filter(|p| !p.am_choking())
        .min_by_key(|p| p.window_downloaded(later))
        .unwrap()
        .id;

    let round = choker.run(&peers, ChokeMode::Downloading, later);
    assert_eq!(round.choked, vec![slowest]);
    assert_eq!(round.unchoked, vec![waiting.id]);

    for (p, rx) in peers.iter().zip(receivers.iter_mut()) {
        let msgs = drain(rx);
        if p.id == slowest {
            assert_eq!(msgs, vec![PeerMsg::Unchoke, PeerMsg::Choke]);
        } else {
            assert_eq!(msgs, vec![PeerMsg::Unchoke]);
        }
    }
}

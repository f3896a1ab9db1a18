//! Choking policy.
//!
//! A round partitions the interested peers into a small unchoked set and
//! everyone else. Nothing is kept between rounds: the only inputs are the
//! choke state of each peer, the time of its last choke change and its
//! rolling byte counters.
//!
//! Requires the torrent lock, like the [`super::Scheduler`].

use std::{
    cmp::Reverse,
    sync::Arc,
    time::{Duration, Instant},
};

use hashbrown::HashSet;
use tracing::{debug, info};

use crate::{
    config::ChokerConfig,
    peer::{Peer, PeerId},
};

/// What the peers are ranked by.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChokeMode {
    /// Bytes sent to the peer in the window.
    Seeding,
    /// Bytes received from the peer in the window.
    Downloading,
}

/// Peers whose state changed in a round.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ChokeRound {
    pub choked: Vec<PeerId>,
    pub unchoked: Vec<PeerId>,
}

impl ChokeRound {
    pub fn is_empty(&self) -> bool {
        self.choked.is_empty() && self.unchoked.is_empty()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Choker {
    max_unchoked: usize,
    window: Duration,
}

impl Default for Choker {
    fn default() -> Self {
        Self::new(&ChokerConfig::default())
    }
}

impl Choker {
    pub fn new(config: &ChokerConfig) -> Self {
        Self {
            max_unchoked: config.max_unchoked,
            window: Duration::from_secs(config.window_secs),
        }
    }

    fn rate<P: Peer + ?Sized>(mode: ChokeMode, peer: &P, now: Instant) -> u64 {
        match mode {
            ChokeMode::Seeding => peer.window_uploaded(now),
            ChokeMode::Downloading => peer.window_downloaded(now),
        }
    }

    /// If the peer was unchoked long enough to be judged by its rate.
    fn eligible<P: Peer + ?Sized>(&self, peer: &P, now: Instant) -> bool {
        peer.choke_changed_at()
            .map_or(true, |at| now.saturating_duration_since(at) >= self.window)
    }

    /// Run one round over every peer of the torrent.
    pub fn run<P: Peer + ?Sized>(
        &self,
        peers: &[Arc<P>],
        mode: ChokeMode,
        now: Instant,
    ) -> ChokeRound {
        let mut round = ChokeRound::default();
        let mut flipped: HashSet<PeerId> = HashSet::new();

        let mut flip = |peer: &P, choke: bool, round: &mut ChokeRound| {
            if !flipped.insert(peer.id()) {
                return;
            }
            if peer.set_am_choking(choke, now) {
                if choke {
                    round.choked.push(peer.id());
                } else {
                    round.unchoked.push(peer.id());
                }
            }
        };

        // uninterested peers are always choked
        for peer in peers {
            if !peer.peer_interested() && !peer.am_choking() {
                flip(&**peer, true, &mut round);
            }
        }

        let (mut unchoked, mut candidates): (Vec<&Arc<P>>, Vec<&Arc<P>>) =
            peers
                .iter()
                .filter(|p| p.peer_interested())
                .partition(|p| !p.am_choking());

        // best first
        candidates
            .sort_by_key(|p| Reverse(Self::rate(mode, &***p, now)));

        // worst first, recently unchoked peers are left alone
        unchoked.sort_by_key(|p| Self::rate(mode, &***p, now));
        let eligible: Vec<&Arc<P>> = unchoked
            .iter()
            .copied()
            .filter(|p| self.eligible(&***p, now))
            .collect();

        if unchoked.len() > self.max_unchoked {
            let excess = unchoked.len() - self.max_unchoked;
            for peer in eligible.into_iter().take(excess) {
                flip(&**peer, true, &mut round);
            }
        } else if unchoked.len() < self.max_unchoked {
            let free = self.max_unchoked - unchoked.len();
            for peer in candidates.into_iter().take(free) {
                flip(&**peer, false, &mut round);
            }
        } else if let (Some(worst), Some(best)) =
            (eligible.first(), candidates.first())
        {
            // only for a candidate at least as fast
            if Self::rate(mode, &***best, now)
                >= Self::rate(mode, &***worst, now)
            {
                debug!("replacing {} with {}", worst.id(), best.id());
                flip(&***worst, true, &mut round);
                flip(&***best, false, &mut round);
            }
        }

        if !round.is_empty() {
            info!(
                "choke round {mode:?}: {} choked, {} unchoked",
                round.choked.len(),
                round.unchoked.len()
            );
        }

        round
    }
}

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex, MutexGuard,
    },
    time::{Duration, Instant},
};

/// Length of the trailing window used by the choking policy.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(20);

/// Counter of transferred bytes, used in downloaded and uploaded.
///
/// Besides the cumulative totals, the counter keeps one bucket per second
/// for the trailing window, so the bytes moved in the last N seconds can be
/// read at any moment without a periodic reset.
#[derive(Debug)]
pub struct Counter {
    total_downloaded: AtomicU64,
    total_uploaded: AtomicU64,
    window: Mutex<Window>,
}

#[derive(Debug)]
struct Window {
    origin: Instant,
    /// (second since origin, bytes) for each slot of the ring.
    downloaded: Vec<(u64, u64)>,
    uploaded: Vec<(u64, u64)>,
}

impl Window {
    fn second(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.origin).as_secs()
    }

    fn record(ring: &mut [(u64, u64)], second: u64, bytes: u64) {
        let len = ring.len() as u64;
        let slot = &mut ring[(second % len) as usize];
        if slot.0 != second {
            *slot = (second, 0);
        }
        slot.1 += bytes;
    }

    fn sum(ring: &[(u64, u64)], second: u64) -> u64 {
        let len = ring.len() as u64;
        ring.iter()
            .filter(|(s, _)| *s <= second && second - *s < len)
            .map(|(_, bytes)| bytes)
            .sum()
    }
}

impl Default for Counter {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl Counter {
    /// A counter that remembers the last `window` worth of traffic, with a
    /// granularity of one second.
    pub fn new(window: Duration) -> Self {
        Self::with_origin(window, Instant::now())
    }

    pub fn with_origin(window: Duration, origin: Instant) -> Self {
        let slots = window.as_secs().max(1) as usize;
        Self {
            total_downloaded: AtomicU64::new(0),
            total_uploaded: AtomicU64::new(0),
            window: Mutex::new(Window {
                origin,
                downloaded: vec![(u64::MAX, 0); slots],
                uploaded: vec![(u64::MAX, 0); slots],
            }),
        }
    }

    fn window(&self) -> MutexGuard<'_, Window> {
        // a panic while holding the lock cannot leave the ring half written
        self.window.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record downloaded bytes
    pub fn record_download(&self, bytes: u64) {
        self.record_download_at(bytes, Instant::now());
    }

    /// Record uploaded bytes
    pub fn record_upload(&self, bytes: u64) {
        self.record_upload_at(bytes, Instant::now());
    }

    pub fn record_download_at(&self, bytes: u64, now: Instant) {
        self.total_downloaded.fetch_add(bytes, Ordering::Relaxed);
        let mut w = self.window();
        let second = w.second(now);
        Window::record(&mut w.downloaded, second, bytes);
    }

    pub fn record_upload_at(&self, bytes: u64, now: Instant) {
        self.total_uploaded.fetch_add(bytes, Ordering::Relaxed);
        let mut w = self.window();
        let second = w.second(now);
        Window::record(&mut w.uploaded, second, bytes);
    }

    /// Bytes downloaded inside the trailing window ending at `now`.
    pub fn window_downloaded(&self, now: Instant) -> u64 {
        let w = self.window();
        Window::sum(&w.downloaded, w.second(now))
    }

    /// Bytes uploaded inside the trailing window ending at `now`.
    pub fn window_uploaded(&self, now: Instant) -> u64 {
        let w = self.window();
        Window::sum(&w.uploaded, w.second(now))
    }

    pub fn total_download(&self) -> u64 {
        self.total_downloaded.load(Ordering::Relaxed)
    }

    pub fn total_upload(&self) -> u64 {
        self.total_uploaded.load(Ordering::Relaxed)
    }
}

//! Paces request issuance to a fixed rate over a fixed wall-clock window.
//!
//! Slot `n` of a run is due at `start + n / rps` seconds. Workers claim slots in
//! order and sleep until the slot is due, so every one-second interval holds
//! `rps` evenly spaced permits and the run never issues more than
//! `rps * duration` of them. A pool that falls further behind than `max_lag`
//! skips the overdue slots instead of firing them back to back.
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const DEFAULT_MAX_LAG: Duration = Duration::from_millis(250);

/// Longest window a governor accepts. Longer durations are clamped.
pub const MAX_WINDOW: Duration = Duration::from_secs(365 * 24 * 60 * 60);

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// The right to send one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permit {
    pub slot: u64,
    pub due: Instant,
}

#[derive(Debug)]
pub struct RateGovernor {
    rps: u64,
    start: Instant,
    deadline: Instant,
    total: u64,
    max_lag: Duration,
    next_slot: Mutex<u64>,
    skipped: AtomicU64,
    closed: CancellationToken,
}

impl RateGovernor {
    /// Starts the clock now. Cancelling `cancel` closes the governor.
    pub fn new(rps: u64, duration: Duration, cancel: &CancellationToken) -> Self {
        Self::with_max_lag(rps, duration, DEFAULT_MAX_LAG, cancel)
    }

    pub fn with_max_lag(
        rps: u64,
        duration: Duration,
        max_lag: Duration,
        cancel: &CancellationToken,
    ) -> Self {
        let start = Instant::now();
        let window = duration.min(MAX_WINDOW);
        let total = u64::try_from(u128::from(rps) * window.as_nanos() / NANOS_PER_SEC)
            .unwrap_or(u64::MAX);
        Self {
            rps,
            start,
            deadline: start.checked_add(window).unwrap_or(start),
            total,
            max_lag,
            next_slot: Mutex::new(0),
            skipped: AtomicU64::new(0),
            closed: cancel.child_token(),
        }
    }

    /// Wait for the next permit. `None` means the run is over: the window has
    /// elapsed, every slot was handed out, or the governor was closed.
    pub async fn acquire(&self) -> Option<Permit> {
        let permit = self.claim()?;
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => None,
            _ = sleep_until(permit.due) => Some(permit),
        }
    }

    fn claim(&self) -> Option<Permit> {
        if self.closed.is_cancelled() {
            return None;
        }
        let now = Instant::now();
        if now >= self.deadline {
            return None;
        }

        let mut next = self.next_slot.lock();
        let mut slot = *next;
        if slot >= self.total {
            return None;
        }

        let earliest = now.saturating_duration_since(self.start);
        if earliest > self.slot_offset(slot).saturating_add(self.max_lag) {
            let catch_up = self.first_slot_at_or_after(earliest - self.max_lag);
            if catch_up > slot {
                let skipped = catch_up - slot;
                self.skipped.fetch_add(skipped, Ordering::Relaxed);
                debug!(skipped, slot, "dispatcher fell behind, skipping overdue slots");
                slot = catch_up;
            }
            if slot >= self.total {
                *next = self.total;
                return None;
            }
        }
        *next = slot + 1;

        Some(Permit {
            slot,
            due: self.start + self.slot_offset(slot),
        })
    }

    fn slot_offset(&self, slot: u64) -> Duration {
        let nanos = u128::from(slot) * NANOS_PER_SEC / u128::from(self.rps.max(1));
        Duration::from_nanos(nanos as u64)
    }

    fn first_slot_at_or_after(&self, offset: Duration) -> u64 {
        let scaled = offset.as_nanos() * u128::from(self.rps);
        u64::try_from(scaled.div_ceil(NANOS_PER_SEC)).unwrap_or(u64::MAX)
    }

    /// Stop handing out permits. Workers parked in `acquire` wake with `None`.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Resolves once the governor is closed or its window has elapsed.
    pub async fn closed(&self) {
        tokio::select! {
            _ = self.closed.cancelled() => {}
            _ = sleep_until(self.deadline) => {}
        }
    }

    /// Upper bound on permits for this run.
    pub fn capacity(&self) -> u64 {
        self.total
    }

    /// Slots dropped because the pool fell behind.
    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    /// When slot 0 was due.
    pub fn start(&self) -> Instant {
        self.start
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::task::JoinSet;

    use super::*;

    async fn drain(governor: Arc<RateGovernor>, workers: usize) -> Vec<Permit> {
        let mut set = JoinSet::new();
        for _ in 0..workers {
            let governor = governor.clone();
            set.spawn(async move {
                let mut got = Vec::new();
                while let Some(permit) = governor.acquire().await {
                    got.push(permit);
                }
                got
            });
        }
        let mut all = Vec::new();
        while let Some(res) = set.join_next().await {
            all.extend(res.expect("worker panicked"));
        }
        all.sort_by_key(|p| p.slot);
        all
    }

    #[tokio::test(start_paused = true)]
    async fn issues_exactly_rate_times_duration() {
        let cancel = CancellationToken::new();
        let governor = Arc::new(RateGovernor::new(10, Duration::from_secs(2), &cancel));
        let start = governor.start();

        let permits = drain(governor.clone(), 4).await;
        assert_eq!(permits.len(), 20);
        assert_eq!(governor.capacity(), 20);
        assert_eq!(governor.skipped(), 0);
        // evenly spaced, 100ms apart
        for (i, permit) in permits.iter().enumerate() {
            assert_eq!(permit.slot, i as u64);
            assert_eq!(permit.due - start, Duration::from_millis(100 * i as u64));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn each_second_holds_rate_permits() {
        let cancel = CancellationToken::new();
        let governor = Arc::new(RateGovernor::new(7, Duration::from_secs(3), &cancel));
        let start = governor.start();
        let permits = drain(governor, 2).await;

        for second in 0..3u64 {
            let lo = Duration::from_secs(second);
            let hi = Duration::from_secs(second + 1);
            let in_window = permits
                .iter()
                .filter(|p| (lo..hi).contains(&(p.due - start)))
                .count();
            assert_eq!(in_window, 7, "second {second}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn skips_slots_when_far_behind() {
        let cancel = CancellationToken::new();
        let governor = RateGovernor::new(10, Duration::from_secs(5), &cancel);

        assert_eq!(governor.acquire().await.map(|p| p.slot), Some(0));
        tokio::time::advance(Duration::from_secs(1)).await;

        // 1s behind with 250ms tolerance: slots 1..=7 are dropped, 8 is due
        // 200ms ago which is still within tolerance
        let permit = governor.acquire().await.expect("permit");
        assert_eq!(permit.slot, 8);
        assert_eq!(governor.skipped(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn small_lag_is_not_skipped() {
        let cancel = CancellationToken::new();
        let governor = RateGovernor::new(10, Duration::from_secs(5), &cancel);
        assert!(governor.acquire().await.is_some());
        tokio::time::advance(Duration::from_millis(200)).await;
        assert_eq!(governor.acquire().await.map(|p| p.slot), Some(1));
        assert_eq!(governor.skipped(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_wakes_parked_workers() {
        let cancel = CancellationToken::new();
        let governor = Arc::new(RateGovernor::new(1, Duration::from_secs(60), &cancel));
        assert!(governor.acquire().await.is_some());

        let parked = tokio::spawn({
            let governor = governor.clone();
            async move { governor.acquire().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();

        assert_eq!(parked.await.expect("join"), None);
        assert!(governor.acquire().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn close_resolves_closed() {
        let cancel = CancellationToken::new();
        let governor = Arc::new(RateGovernor::new(5, Duration::from_secs(60), &cancel));
        let waiter = tokio::spawn({
            let governor = governor.clone();
            async move { governor.closed().await }
        });
        governor.close();
        waiter.await.expect("closed resolves");
        assert!(!cancel.is_cancelled(), "closing must not cancel the parent");
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_window_is_clamped() {
        let cancel = CancellationToken::new();
        let governor = RateGovernor::new(u64::MAX, Duration::from_secs(u64::MAX), &cancel);
        assert_eq!(governor.capacity(), u64::MAX);
        assert_eq!(governor.acquire().await.map(|p| p.slot), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_after_deadline() {
        let cancel = CancellationToken::new();
        let governor = RateGovernor::new(100, Duration::from_secs(1), &cancel);
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(governor.acquire().await.is_none());
        governor.closed().await;
    }
}

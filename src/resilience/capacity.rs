use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapacitySnapshot {
    pub max_requests: u64,
    pub max_tokens: u64,
    pub available_requests: u64,
    pub available_tokens: u64,
    pub last_replenished_at: SystemTime,
}

#[derive(Debug)]
struct State {
    available_requests: u64,
    available_tokens: u64,
    last_replenished_at: SystemTime,
}

/// Dual-resource capacity tracker (requests and tokens per interval).
///
/// - Reset-style bucket: [`replenish`](Self::replenish) restores both counters
///   to their maxima at once, it never drip-feeds
/// - [`try_consume`](Self::try_consume) is linearizable: the check and the
///   subtraction happen under one lock
pub struct CapacityTracker {
    max_requests: u64,
    max_tokens: u64,
    state: Mutex<State>,
    replenished: Notify,
}

impl CapacityTracker {
    pub fn new(max_requests: u64, max_tokens: u64) -> Self {
        Self {
            max_requests,
            max_tokens,
            state: Mutex::new(State {
                available_requests: max_requests,
                available_tokens: max_tokens,
                last_replenished_at: SystemTime::now(),
            }),
            replenished: Notify::new(),
        }
    }

    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }

    pub fn max_tokens(&self) -> u64 {
        self.max_tokens
    }

    /// Consume `request_cost` requests and `token_cost` tokens if both are available.
    ///
    /// Leaves the state untouched and returns `false` otherwise.
    pub fn try_consume(&self, request_cost: u64, token_cost: u64) -> bool {
        let mut st = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if st.available_requests >= request_cost && st.available_tokens >= token_cost {
            st.available_requests -= request_cost;
            st.available_tokens -= token_cost;
            true
        } else {
            false
        }
    }

    /// Reset both counters to their maxima and wake every waiter.
    pub fn replenish(&self) {
        {
            let mut st = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            st.available_requests = self.max_requests;
            st.available_tokens = self.max_tokens;
            st.last_replenished_at = SystemTime::now();
        }
        self.replenished.notify_waiters();
    }

    /// Wait until the costs can be consumed, then consume them.
    ///
    /// Re-checks every `poll_interval` and immediately after each replenish.
    /// Cancel-safe: capacity is only ever taken in the same poll that returns.
    pub async fn acquire(&self, request_cost: u64, token_cost: u64, poll_interval: Duration) {
        loop {
            let notified = self.replenished.notified();
            tokio::pin!(notified);
            // register before checking so a replenish between the check and the wait is not missed
            notified.as_mut().enable();

            if self.try_consume(request_cost, token_cost) {
                return;
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }
    }

    pub fn snapshot(&self) -> CapacitySnapshot {
        let st = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        CapacitySnapshot {
            max_requests: self.max_requests,
            max_tokens: self.max_tokens,
            available_requests: st.available_requests,
            available_tokens: st.available_tokens,
            last_replenished_at: st.last_replenished_at,
        }
    }

    /// Spawn the background task that calls [`replenish`](Self::replenish)
    /// every `interval` until `shutdown` fires.
    pub fn spawn_replenisher(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("capacity replenisher stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        tracker.replenish();
                        debug!(
                            max_requests = tracker.max_requests,
                            max_tokens = tracker.max_tokens,
                            "capacity replenished"
                        );
                    }
                }
            }
        })
    }
}

impl std::fmt::Debug for CapacityTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapacityTracker")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_consume_subtracts_both() {
        let tracker = CapacityTracker::new(3, 100);
        assert!(tracker.try_consume(1, 40));
        let snap = tracker.snapshot();
        assert_eq!(snap.available_requests, 2);
        assert_eq!(snap.available_tokens, 60);
    }

    #[test]
    fn test_try_consume_failure_leaves_state() {
        let tracker = CapacityTracker::new(1, 10);
        assert!(!tracker.try_consume(1, 11));
        let snap = tracker.snapshot();
        assert_eq!(snap.available_requests, 1);
        assert_eq!(snap.available_tokens, 10);

        assert!(tracker.try_consume(1, 10));
        // requests exhausted, tokens are not the limiting factor here
        assert!(!tracker.try_consume(1, 0));
        assert_eq!(tracker.snapshot().available_tokens, 0);
    }

    #[test]
    fn test_replenish_resets_to_max() {
        let tracker = CapacityTracker::new(5, 50);
        assert!(tracker.try_consume(1, 20));
        assert!(tracker.try_consume(1, 20));
        tracker.replenish();
        let snap = tracker.snapshot();
        assert_eq!(snap.available_requests, 5);
        assert_eq!(snap.available_tokens, 50);
    }

    #[test]
    fn test_replenish_at_max_is_idempotent() {
        let tracker = CapacityTracker::new(5, 50);
        tracker.replenish();
        tracker.replenish();
        let snap = tracker.snapshot();
        assert_eq!(snap.available_requests, 5);
        assert_eq!(snap.available_tokens, 50);
    }

    #[test]
    fn test_zero_capacity_admits_nothing_costly() {
        let tracker = CapacityTracker::new(0, 0);
        assert!(!tracker.try_consume(1, 0));
        assert!(tracker.try_consume(0, 0));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_consume_never_oversubscribes() {
        let tracker = Arc::new(CapacityTracker::new(100, 1_000));
        let mut handles = Vec::new();
        for _ in 0..500 {
            let t = tracker.clone();
            handles.push(tokio::spawn(async move { t.try_consume(1, 7) }));
        }
        let mut admitted = 0u64;
        for h in handles {
            if h.await.unwrap() {
                admitted += 1;
            }
        }
        // tokens run out first: floor(1000 / 7) = 142 > 100, so requests bind
        assert_eq!(admitted, 100);
        let snap = tracker.snapshot();
        assert_eq!(snap.available_requests, 0);
        assert_eq!(snap.available_tokens, 1_000 - 700);
    }

    #[test]
    fn test_concurrent_threads_last_unit() {
        let tracker = Arc::new(CapacityTracker::new(1, 1));
        let winners: usize = std::thread::scope(|s| {
            let hs: Vec<_> = (0..8)
                .map(|_| {
                    let t = &tracker;
                    s.spawn(move || t.try_consume(1, 1) as usize)
                })
                .collect();
            hs.into_iter().map(|h| h.join().unwrap()).sum()
        });
        assert_eq!(winners, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_wakes_on_replenish() {
        let tracker = Arc::new(CapacityTracker::new(1, 10));
        assert!(tracker.try_consume(1, 10));

        let waiter = {
            let t = tracker.clone();
            tokio::spawn(async move {
                t.acquire(1, 5, Duration::from_secs(3600)).await;
            })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        tracker.replenish();
        waiter.await.unwrap();
        let snap = tracker.snapshot();
        assert_eq!(snap.available_requests, 0);
        assert_eq!(snap.available_tokens, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_polls_periodically() {
        let tracker = Arc::new(CapacityTracker::new(1, 10));
        assert!(tracker.try_consume(1, 10));
        let start = tokio::time::Instant::now();

        let waiter = {
            let t = tracker.clone();
            tokio::spawn(async move {
                t.acquire(1, 1, Duration::from_secs(1)).await;
                tokio::time::Instant::now()
            })
        };
        // Restore capacity behind the tracker's back (no notification).
        tokio::time::sleep(Duration::from_millis(2500)).await;
        {
            let mut st = tracker.state.lock().unwrap();
            st.available_requests = 1;
            st.available_tokens = 10;
        }
        let admitted_at = waiter.await.unwrap();
        assert!(admitted_at - start >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_replenisher_runs_until_shutdown() {
        let tracker = Arc::new(CapacityTracker::new(2, 20));
        let shutdown = CancellationToken::new();
        let task = tracker.spawn_replenisher(Duration::from_secs(60), shutdown.clone());

        assert!(tracker.try_consume(2, 20));
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(tracker.snapshot().available_requests, 0);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(tracker.snapshot().available_requests, 2);

        shutdown.cancel();
        task.await.unwrap();
    }
}

//! Host throttle module
//!
//! Identifies and blocks hosts that send us too many requests. Every host
//! gets a leaky bucket of 60 units that refills by 5 units every 5 seconds;
//! each checked request costs one unit. A host that spends more than its
//! per-minute quota within a refill cycle is penalized and moved to a
//! blocked set it only leaves when other blocked hosts push it out.

use crate::error::DhtError;
use anyhow::Result;
use lru::LruCache;
use parking_lot::Mutex;
use std::net::IpAddr;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{debug, info, trace};

/// Bucket size. A host whose budget refills past this is no longer tracked.
pub const BUCKET_CAPACITY: i32 = 60;

/// Budget of a host seen for the first time, its first request already paid.
pub const FRESH_BUDGET: i32 = BUCKET_CAPACITY - 1;

/// Units given back to every tracked host on each decay tick.
pub const REFILL_AMOUNT: i32 = 5;

/// Time between decay ticks.
pub const DECAY_INTERVAL: Duration = Duration::from_secs(5);

/// Budget taken away from a host when it gets blocked.
pub const BLOCK_PENALTY: i32 = 300;

/// Capacity bounded set of hosts, least recently touched evicted first.
#[derive(Debug)]
pub struct BoundedHostSet {
    hosts: LruCache<IpAddr, ()>,
}

impl BoundedHostSet {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            hosts: LruCache::new(capacity),
        }
    }

    /// Membership check that also refreshes the host's recency.
    pub fn touch(&mut self, host: &IpAddr) -> bool {
        self.hosts.get(host).is_some()
    }

    /// Insert a host, evicting the least recently touched one when full.
    pub fn insert(&mut self, host: IpAddr) {
        if let Some((evicted, _)) = self.hosts.push(host, ()) {
            if evicted != host {
                debug!("Released {} from the blocked set", evicted);
            }
        }
    }

    /// Membership check without touching recency.
    pub fn contains(&self, host: &IpAddr) -> bool {
        self.hosts.contains(host)
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

/// State shared between request handlers and the decay task.
#[derive(Debug)]
struct ThrottleState {
    max_per_minute: i32,
    /// Remaining budget per host
    budgets: Mutex<LruCache<IpAddr, i32>>,
    /// Hosts that got blocked once stay here until pushed out
    blocked: Mutex<BoundedHostSet>,
}

impl ThrottleState {
    fn check_block(&self, host: IpAddr) -> bool {
        if self.blocked.lock().touch(&host) {
            return false;
        }

        let mut budgets = self.budgets.lock();
        let budget = budgets.get(&host).map_or(FRESH_BUDGET, |budget| budget - 1);
        if budget < BUCKET_CAPACITY - self.max_per_minute {
            budgets.put(host, budget - BLOCK_PENALTY);
            drop(budgets);
            self.blocked.lock().insert(host);
            info!("Blocking {} for exceeding {} requests per minute", host, self.max_per_minute);
            return false;
        }
        budgets.put(host, budget);
        true
    }

    fn decay(&self) {
        let mut budgets = self.budgets.lock();
        let mut full = Vec::new();
        for (host, budget) in budgets.iter_mut() {
            *budget += REFILL_AMOUNT;
            if *budget > BUCKET_CAPACITY {
                full.push(*host);
            }
        }
        for host in &full {
            budgets.pop(host);
        }
        trace!("Refilled {} hosts, {} back to full", budgets.len() + full.len(), full.len());
    }
}

/// Per host rate limiter with a two tier (throttled, blocked) policy.
pub struct HostThrottle {
    state: Arc<ThrottleState>,
    stop_tx: watch::Sender<bool>,
    decay_task: Mutex<Option<JoinHandle<()>>>,
}

impl HostThrottle {
    /// Create a throttle without a decay task; budgets only refill through `decay`.
    pub fn new(max_per_minute: usize, max_hosts: usize) -> Result<Self> {
        let max_per_minute = i32::try_from(max_per_minute)
            .ok()
            .filter(|&max| max > 0)
            .ok_or_else(|| {
                let message = "must be between 1 and i32::MAX";
                DhtError::config_error_with_field(message, "max_per_minute")
            })?;
        let capacity = NonZeroUsize::new(max_hosts)
            .ok_or_else(|| DhtError::config_error_with_field("must be at least 1", "max_hosts"))?;

        let (stop_tx, _) = watch::channel(false);
        Ok(Self {
            state: Arc::new(ThrottleState {
                max_per_minute,
                budgets: Mutex::new(LruCache::new(capacity)),
                blocked: Mutex::new(BoundedHostSet::new(capacity)),
            }),
            stop_tx,
            decay_task: Mutex::new(None),
        })
    }

    /// Create a throttle and start its decay task on the current tokio runtime.
    pub fn spawn(max_per_minute: usize, max_hosts: usize) -> Result<Self> {
        let throttle = Self::new(max_per_minute, max_hosts)?;
        let state = throttle.state.clone();
        let mut stop_rx = throttle.stop_tx.subscribe();

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + DECAY_INTERVAL, DECAY_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => state.decay(),
                    _ = stop_rx.changed() => break,
                }
            }
            debug!("Host throttle decay task stopped");
        });
        *throttle.decay_task.lock() = Some(handle);

        Ok(throttle)
    }

    /// Returns false if the request from `host` should be dropped.
    pub fn check_block(&self, host: IpAddr) -> bool {
        self.state.check_block(host)
    }

    /// Run one refill tick over every tracked host.
    pub fn decay(&self) {
        self.state.decay();
    }

    /// Stop the decay task and wait for it to exit.
    pub async fn stop(&self) {
        let _ = self.stop_tx.send(true);
        let handle = self.decay_task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    pub fn is_blocked(&self, host: &IpAddr) -> bool {
        self.state.blocked.lock().contains(host)
    }

    /// Current budget of a tracked host, without touching its recency.
    pub fn budget(&self, host: &IpAddr) -> Option<i32> {
        self.state.budgets.lock().peek(host).copied()
    }

    pub fn tracked_hosts(&self) -> usize {
        self.state.budgets.lock().len()
    }

    pub fn blocked_hosts(&self) -> usize {
        self.state.blocked.lock().len()
    }
}

impl Drop for HostThrottle {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(n: u8) -> IpAddr {
        IpAddr::from([192, 0, 2, n])
    }

    #[test]
    fn test_new_rejects_zero_limits() {
        assert!(HostThrottle::new(0, 10).is_err());
        assert!(HostThrottle::new(10, 0).is_err());
        assert!(HostThrottle::new(10, 10).is_ok());
    }

    #[test]
    fn test_first_check_consumes_one_unit() {
        let throttle = HostThrottle::new(10, 10).unwrap();
        assert!(throttle.check_block(host(1)));
        assert_eq!(throttle.budget(&host(1)), Some(FRESH_BUDGET));
        assert!(throttle.check_block(host(1)));
        assert_eq!(throttle.budget(&host(1)), Some(FRESH_BUDGET - 1));
    }

    #[test]
    fn test_blocks_after_quota_and_stays_blocked() {
        let throttle = HostThrottle::new(10, 10).unwrap();
        for _ in 0..10 {
            assert!(throttle.check_block(host(1)));
        }
        assert!(!throttle.check_block(host(1)));
        assert!(throttle.is_blocked(&host(1)));
        assert_eq!(throttle.budget(&host(1)), Some(49 - BLOCK_PENALTY));

        for _ in 0..50 {
            throttle.decay();
        }
        assert!(!throttle.check_block(host(1)));

        // Other hosts are unaffected.
        assert!(throttle.check_block(host(2)));
    }

    #[test]
    fn test_full_quota_then_refill_is_allowed() {
        let throttle = HostThrottle::new(10, 10).unwrap();
        for _ in 0..10 {
            assert!(throttle.check_block(host(1)));
        }
        for _ in 0..12 {
            throttle.decay();
        }
        assert_eq!(throttle.budget(&host(1)), None);
        assert!(throttle.check_block(host(1)));
        assert!(!throttle.is_blocked(&host(1)));
    }

    #[test]
    fn test_decay_forgets_full_buckets() {
        let throttle = HostThrottle::new(10, 10).unwrap();
        throttle.check_block(host(1));
        for _ in 0..5 {
            throttle.check_block(host(2));
        }
        throttle.decay();
        assert_eq!(throttle.budget(&host(1)), None);
        assert_eq!(throttle.budget(&host(2)), Some(60));
        assert_eq!(throttle.tracked_hosts(), 1);
    }

    #[test]
    fn test_blocked_host_released_by_churn() {
        let throttle = HostThrottle::new(1, 2).unwrap();
        for n in 1..=3 {
            assert!(throttle.check_block(host(n)));
            assert!(!throttle.check_block(host(n)));
        }
        assert_eq!(throttle.blocked_hosts(), 2);
        assert!(!throttle.is_blocked(&host(1)));
        assert!(throttle.check_block(host(1)));
    }

    #[test]
    fn test_blocked_lookup_refreshes_recency() {
        let throttle = HostThrottle::new(1, 2).unwrap();
        for n in 1..=2 {
            throttle.check_block(host(n));
            throttle.check_block(host(n));
        }
        // Touch host 1 so host 2 is the one pushed out.
        assert!(!throttle.check_block(host(1)));
        throttle.check_block(host(3));
        throttle.check_block(host(3));
        assert!(throttle.is_blocked(&host(1)));
        assert!(!throttle.is_blocked(&host(2)));
    }

    #[test]
    fn test_bounded_host_set() {
        let mut set = BoundedHostSet::new(NonZeroUsize::new(2).unwrap());
        assert!(set.is_empty());
        set.insert(host(1));
        set.insert(host(2));
        assert!(set.touch(&host(1)));
        set.insert(host(3));
        assert_eq!(set.len(), 2);
        assert!(set.contains(&host(1)));
        assert!(!set.contains(&host(2)));
        assert!(!set.touch(&host(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_decay_task_refills_over_time() {
        let throttle = HostThrottle::spawn(10, 10).unwrap();
        for _ in 0..10 {
            assert!(throttle.check_block(host(1)));
        }
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(throttle.budget(&host(1)), None);
        assert!(throttle.check_block(host(1)));
        throttle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_halts_decay() {
        let throttle = HostThrottle::spawn(10, 10).unwrap();
        throttle.stop().await;
        throttle.stop().await;
        throttle.check_block(host(1));
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(throttle.budget(&host(1)), Some(FRESH_BUDGET));
    }

    #[test]
    fn test_concurrent_checks_and_decay() {
        let throttle = Arc::new(HostThrottle::new(1000, 64).unwrap());
        let handles: Vec<_> = (0..4u8)
            .map(|t| {
                let throttle = throttle.clone();
                std::thread::spawn(move || {
                    for i in 0..200u32 {
                        throttle.check_block(host(t));
                        if i % 50 == 0 {
                            throttle.decay();
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(throttle.blocked_hosts(), 0);
        assert!(throttle.tracked_hosts() <= 4);
    }
}

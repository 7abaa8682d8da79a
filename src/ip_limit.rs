use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

const WINDOW_MS: u64 = 60_000;
const SWEEP_EVERY: u64 = 64;

/// Per-IP sliding-window limiter. Process-local by design: the window does
/// not survive restarts and is not shared across instances.
pub struct IpRateLimiter {
    limit: u32,
    windows: Mutex<HashMap<IpAddr, VecDeque<u64>>>,
    sweep_seq: AtomicU64,
}

impl IpRateLimiter {
    pub fn new(limit_per_minute: u32) -> Self {
        Self {
            limit: limit_per_minute,
            windows: Mutex::new(HashMap::new()),
            sweep_seq: AtomicU64::new(0),
        }
    }

    /// Accepts or rejects one request from `ip` at `now_ms`.
    ///
    /// On reject the timestamp is NOT recorded, so a client hammering the
    /// endpoint can't push its own window forward forever. Check-and-append
    /// happens under the map lock, which makes it atomic per IP.
    pub fn check_and_record(&self, ip: IpAddr, now_ms: u64) -> bool {
        let mut windows = self.windows.lock();
        let window = windows.entry(ip).or_default();
        let floor = now_ms.saturating_sub(WINDOW_MS);
        while window.front().is_some_and(|&t| t <= floor) {
            window.pop_front();
        }
        let accepted = (window.len() as u32) < self.limit;
        if accepted {
            window.push_back(now_ms);
        }
        drop(windows);

        // The check itself is cheap, so the dead-entry sweep piggybacks on
        // every Nth call instead of needing a background task.
        if self.sweep_seq.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            self.sweep(now_ms);
        }
        accepted
    }

    /// Drops IPs whose recorded timestamps have all expired, bounding the map
    /// to the set of IPs active in the last minute.
    fn sweep(&self, now_ms: u64) {
        let floor = now_ms.saturating_sub(WINDOW_MS);
        self.windows
            .lock()
            .retain(|_, w| w.back().is_some_and(|&t| t > floor));
    }

    #[cfg(test)]
    fn tracked_ips(&self) -> usize {
        self.windows.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(last: u8) -> IpAddr {
        IpAddr::from([127, 0, 0, last])
    }

    #[test]
    fn allows_up_to_limit_then_rejects() {
        let limiter = IpRateLimiter::new(10);
        let t0 = 1_000_000;
        for i in 0..10 {
            assert!(limiter.check_and_record(ip(1), t0 + i), "request {i}");
        }
        assert!(!limiter.check_and_record(ip(1), t0 + 500));
        // a different IP is unaffected
        assert!(limiter.check_and_record(ip(2), t0 + 500));
    }

    #[test]
    fn window_frees_up_after_sixty_seconds() {
        let limiter = IpRateLimiter::new(3);
        let t0 = 1_000_000;
        for i in 0..3 {
            assert!(limiter.check_and_record(ip(1), t0 + i));
        }
        assert!(!limiter.check_and_record(ip(1), t0 + 30_000));
        assert!(limiter.check_and_record(ip(1), t0 + WINDOW_MS + 5));
    }

    #[test]
    fn rejected_requests_leave_no_timestamp() {
        let limiter = IpRateLimiter::new(1);
        let t0 = 1_000_000;
        assert!(limiter.check_and_record(ip(1), t0));
        // Rejections right before expiry must not extend the window.
        assert!(!limiter.check_and_record(ip(1), t0 + WINDOW_MS - 1));
        assert!(limiter.check_and_record(ip(1), t0 + WINDOW_MS + 1));
    }

    #[test]
    fn sweep_evicts_idle_ips() {
        let limiter = IpRateLimiter::new(10);
        let t0 = 1_000_000;
        for last in 1..=5 {
            limiter.check_and_record(ip(last), t0);
        }
        assert_eq!(limiter.tracked_ips(), 5);
        // Advance past the window and force enough calls to trigger a sweep.
        let later = t0 + WINDOW_MS + 1;
        for i in 0..(SWEEP_EVERY as u64) {
            limiter.check_and_record(ip(200), later + i);
        }
        assert_eq!(limiter.tracked_ips(), 1);
    }
}

//! Per-client connection limits.
//!
//! # Responsibilities
//! - Cap concurrent connections from a single client IP
//! - Release the slot automatically when the connection ends
//!
//! # Design Decisions
//! - Counts live in a sharded `DashMap`, no global lock on accept
//! - A permit is an RAII guard; a panicking connection task still frees its slot
//! - Entries are removed when their count returns to zero

use std::net::IpAddr;
use std::sync::Arc;

use dashmap::DashMap;

/// Tracks live connections per client IP.
#[derive(Debug, Clone)]
pub struct PerIpLimiter {
    counts: Arc<DashMap<IpAddr, usize>>,
    /// 0 disables the limit.
    max_per_ip: usize,
}

impl PerIpLimiter {
    pub fn new(max_per_ip: usize) -> Self {
        Self {
            counts: Arc::new(DashMap::new()),
            max_per_ip,
        }
    }

    /// Claim a slot for `ip`, or `None` if it is already at its cap.
    pub fn try_acquire(&self, ip: IpAddr) -> Option<IpPermit> {
        {
            let mut count = self.counts.entry(ip).or_insert(0);
            if self.max_per_ip > 0 && *count >= self.max_per_ip {
                return None;
            }
            *count += 1;
        }
        Some(IpPermit {
            counts: Arc::clone(&self.counts),
            ip,
        })
    }

    /// Live connections currently held by `ip`.
    pub fn active(&self, ip: IpAddr) -> usize {
        self.counts.get(&ip).map(|c| *c).unwrap_or(0)
    }

    pub fn max_per_ip(&self) -> usize {
        self.max_per_ip
    }
}

/// Slot held for the lifetime of one client connection.
#[derive(Debug)]
pub struct IpPermit {
    counts: Arc<DashMap<IpAddr, usize>>,
    ip: IpAddr,
}

impl IpPermit {
    pub fn ip(&self) -> IpAddr {
        self.ip
    }
}

impl Drop for IpPermit {
    fn drop(&mut self) {
        let empty = match self.counts.get_mut(&self.ip) {
            Some(mut count) => {
                *count = count.saturating_sub(1);
                *count == 0
            }
            None => false,
        };
        if empty {
            self.counts.remove_if(&self.ip, |_, count| *count == 0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enforces_cap_per_ip() {
        let limiter = PerIpLimiter::new(2);
        let a: IpAddr = "10.0.0.5".parse().unwrap();
        let b: IpAddr = "10.0.0.6".parse().unwrap();

        let p1 = limiter.try_acquire(a).unwrap();
        let _p2 = limiter.try_acquire(a).unwrap();
        assert!(limiter.try_acquire(a).is_none());
        assert!(limiter.try_acquire(b).is_some());

        drop(p1);
        assert_eq!(limiter.active(a), 1);
        assert!(limiter.try_acquire(a).is_some());
    }

    #[test]
    fn zero_means_unlimited() {
        let limiter = PerIpLimiter::new(0);
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        let permits: Vec<_> = (0..100).map(|_| limiter.try_acquire(ip).unwrap()).collect();
        assert_eq!(limiter.active(ip), 100);
        drop(permits);
        assert_eq!(limiter.active(ip), 0);
    }
}

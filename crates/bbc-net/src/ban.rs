use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use tracing::warn;

/// `setMisbehavior`/ban-list tracking (spec §4.5 "Ban logic"). Persistence
/// is in-memory only for this core — durability is a product decision left
/// to the binary wrapping it.
pub struct BanList {
    threshold: i32,
    ban_time: Duration,
    scores: HashMap<IpAddr, i32>,
    banned: HashMap<IpAddr, Instant>,
}

impl BanList {
    pub fn new(threshold: i32, ban_time: Duration) -> Self {
        BanList {
            threshold,
            ban_time,
            scores: HashMap::new(),
            banned: HashMap::new(),
        }
    }

    /// Adds `score` to `ip`'s misbehavior score; if it crosses `threshold`,
    /// bans the host starting now. Returns `true` if this call banned it.
    pub fn set_misbehavior(&mut self, ip: IpAddr, score: i32) -> bool {
        let total = self.scores.entry(ip).or_insert(0);
        *total += score;
        if *total >= self.threshold {
            warn!(%ip, score = *total, "banning peer for misbehavior");
            self.banned.insert(ip, Instant::now());
            return true;
        }
        false
    }

    /// Whether `ip` is currently banned, expiring (and forgetting) entries
    /// whose `BAN_TIME` has elapsed.
    pub fn is_banned(&mut self, ip: &IpAddr) -> bool {
        if let Some(&since) = self.banned.get(ip) {
            if since.elapsed() >= self.ban_time {
                self.banned.remove(ip);
                self.scores.remove(ip);
                return false;
            }
            return true;
        }
        false
    }

    pub fn score(&self, ip: &IpAddr) -> i32 {
        self.scores.get(ip).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn bans_once_score_crosses_threshold() {
        let mut bans = BanList::new(100, Duration::from_secs(3600));
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        assert!(!bans.set_misbehavior(ip, 40));
        assert!(!bans.is_banned(&ip));
        assert!(bans.set_misbehavior(ip, 60));
        assert!(bans.is_banned(&ip));
    }

    #[test]
    fn unbanned_host_reports_clean() {
        let mut bans = BanList::new(100, Duration::from_secs(3600));
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));
        assert!(!bans.is_banned(&ip));
        assert_eq!(bans.score(&ip), 0);
    }
}

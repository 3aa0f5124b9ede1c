//! Channel snapshots and the balances derived from them.
//!
//! A balance at or below its reserve cannot be spent and counts as zero. The
//! same clamp is applied to the remote side against the remote reserve.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::types::{Amount, BitcoinUnit};

/// One channel as reported by the node at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSnapshot {
    pub channel_id: String,
    pub remote_pubkey: String,
    /// Funding outpoint as `txid:index`
    #[serde(default)]
    pub channel_point: Option<String>,
    pub capacity: Amount,
    pub local_balance: Amount,
    pub remote_balance: Amount,
    pub local_reserve: Amount,
    #[serde(default)]
    pub remote_reserve: Amount,
    #[serde(default)]
    pub commit_fee: Amount,
    pub active: bool,
    #[serde(default)]
    pub public: bool,
    /// Funding transaction not yet confirmed.
    #[serde(default)]
    pub pending_open: bool,
}

fn above_reserve(balance: Amount, reserve: Amount) -> Amount {
    let reserve = reserve.non_negative();
    if balance <= reserve {
        Amount::ZERO
    } else {
        balance - reserve
    }
}

impl ChannelSnapshot {
    /// Local balance minus local reserve, clamped at zero.
    pub fn sendable(&self) -> Amount {
        above_reserve(self.local_balance, self.local_reserve)
    }

    /// Remote balance minus remote reserve, clamped at zero.
    pub fn receivable(&self) -> Amount {
        above_reserve(self.remote_balance, self.remote_reserve)
    }

    /// Part of the local balance held back as reserve.
    pub fn reserve_used(&self) -> Amount {
        self.local_balance
            .non_negative()
            .min(self.local_reserve.non_negative())
    }

    pub fn reserve_display(&self) -> ReserveDisplay {
        let used = self.reserve_used();
        let total = self.local_reserve.non_negative();
        if used == total {
            ReserveDisplay::Full(total)
        } else {
            ReserveDisplay::Partial { used, total }
        }
    }

    /// Split of the capacity for the channel bar. Percentages are integral;
    /// the unallocated segment is the remainder so the three always add up.
    pub fn capacity_split(&self) -> CapacitySplit {
        let capacity = self.capacity.to_sats();
        let local = self.sendable().mul_div(100, capacity).to_sats().clamp(0, 100);
        let remote = self
            .receivable()
            .mul_div(100, capacity)
            .to_sats()
            .clamp(0, 100 - local);
        CapacitySplit::from_percents(local as u8, remote as u8)
    }
}

/// Local reserve as shown to the user: the full reserve once the local balance
/// has reached it, or `used/total` while it is still being built up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveDisplay {
    Full(Amount),
    Partial { used: Amount, total: Amount },
}

impl ReserveDisplay {
    pub fn format(&self, unit: BitcoinUnit) -> String {
        match self {
            ReserveDisplay::Full(total) => total.to_unit(unit),
            ReserveDisplay::Partial { used, total } => {
                format!("{}/{}", used.to_unit(unit), total.to_unit(unit))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacitySplit {
    local_percent: u8,
    remote_percent: u8,
}

impl CapacitySplit {
    fn from_percents(local_percent: u8, remote_percent: u8) -> Self {
        debug_assert!(local_percent as u16 + remote_percent as u16 <= 100);
        Self {
            local_percent,
            remote_percent,
        }
    }

    pub fn local(&self) -> f64 {
        self.local_percent as f64 / 100.0
    }

    pub fn remote(&self) -> f64 {
        self.remote_percent as f64 / 100.0
    }

    pub fn unallocated(&self) -> f64 {
        (100 - self.local_percent - self.remote_percent) as f64 / 100.0
    }

    pub fn percents(&self) -> (u8, u8, u8) {
        (
            self.local_percent,
            self.remote_percent,
            100 - self.local_percent - self.remote_percent,
        )
    }
}

/// Per-channel row for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelBalance {
    pub channel_id: String,
    pub remote_pubkey: String,
    pub capacity: Amount,
    pub sendable: Amount,
    pub receivable: Amount,
    pub reserve: ReserveDisplay,
    pub commit_fee: Amount,
    pub split: CapacitySplit,
    pub active: bool,
    pub public: bool,
    pub pending_open: bool,
}

impl From<&ChannelSnapshot> for ChannelBalance {
    fn from(c: &ChannelSnapshot) -> Self {
        Self {
            channel_id: c.channel_id.clone(),
            remote_pubkey: c.remote_pubkey.clone(),
            capacity: c.capacity,
            sendable: c.sendable(),
            receivable: c.receivable(),
            reserve: c.reserve_display(),
            commit_fee: c.commit_fee,
            split: c.capacity_split(),
            active: c.active,
            public: c.public,
            pending_open: c.pending_open,
        }
    }
}

/// Aggregate wallet balances. Never negative.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Balances {
    pub total: Amount,
    pub pending_open: Amount,
    pub receivable: Amount,
    pub reserved: Amount,
}

/// Balance computations over one channel set.
#[derive(Debug, Clone)]
pub struct ChannelSet {
    channels: Arc<[ChannelSnapshot]>,
}

impl Default for ChannelSet {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl ChannelSet {
    pub fn new(channels: impl Into<Arc<[ChannelSnapshot]>>) -> Self {
        Self {
            channels: channels.into(),
        }
    }

    pub fn channels(&self) -> Arc<[ChannelSnapshot]> {
        Arc::clone(&self.channels)
    }

    pub fn get(&self, channel_id: &str) -> Option<&ChannelSnapshot> {
        self.channels.iter().find(|c| c.channel_id == channel_id)
    }

    fn usable(&self) -> impl Iterator<Item = &ChannelSnapshot> {
        self.channels.iter().filter(|c| c.active && !c.pending_open)
    }

    /// Σ sendable over active channels.
    pub fn total_balance(&self) -> Amount {
        let total: Amount = self.usable().map(ChannelSnapshot::sendable).sum();
        debug_assert!(!total.is_negative(), "negative total balance {}", total);
        total.non_negative()
    }

    /// Σ capacity over channels still waiting for their funding transaction.
    pub fn pending_open_balance(&self) -> Amount {
        self.channels
            .iter()
            .filter(|c| c.pending_open)
            .map(|c| c.capacity.non_negative())
            .sum()
    }

    pub fn receivable_total(&self) -> Amount {
        self.usable().map(ChannelSnapshot::receivable).sum()
    }

    pub fn reserved_total(&self) -> Amount {
        self.usable().map(ChannelSnapshot::reserve_used).sum()
    }

    pub fn sendable(&self, channel_id: &str) -> Option<Amount> {
        self.get(channel_id).map(ChannelSnapshot::sendable)
    }

    pub fn receivable(&self, channel_id: &str) -> Option<Amount> {
        self.get(channel_id).map(ChannelSnapshot::receivable)
    }

    pub fn per_channel(&self) -> Vec<ChannelBalance> {
        self.channels.iter().map(ChannelBalance::from).collect()
    }

    pub fn balances(&self) -> Balances {
        Balances {
            total: self.total_balance(),
            pending_open: self.pending_open_balance(),
            receivable: self.receivable_total(),
            reserved: self.reserved_total(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(id: &str, capacity: i64, local: i64, remote: i64, reserve: i64) -> ChannelSnapshot {
        ChannelSnapshot {
            channel_id: id.to_string(),
            remote_pubkey: format!("02{}", id),
            channel_point: None,
            capacity: Amount::from_sats(capacity),
            local_balance: Amount::from_sats(local),
            remote_balance: Amount::from_sats(remote),
            local_reserve: Amount::from_sats(reserve),
            remote_reserve: Amount::ZERO,
            commit_fee: Amount::from_sats(200),
            active: true,
            public: false,
            pending_open: false,
        }
    }

    #[test]
    fn test_balance_at_reserve_is_zero() {
        let c = channel("a", 100_000, 5_000, 95_000, 5_000);
        assert_eq!(c.sendable(), Amount::ZERO);
        assert_eq!(c.reserve_display(), ReserveDisplay::Full(Amount::from_sats(5_000)));
    }

    #[test]
    fn test_sendable_plus_reserve_equals_local() {
        for local in [0, 1, 999, 1_000, 1_001, 50_000, 100_000] {
            let c = channel("a", 100_000, local, 100_000 - local, 1_000);
            if c.local_balance > c.local_reserve {
                assert_eq!(c.sendable() + c.reserve_used(), c.local_balance);
            } else {
                assert_eq!(c.sendable(), Amount::ZERO);
            }
        }
    }

    #[test]
    fn test_reserve_being_built_up() {
        let c = channel("a", 100_000, 400, 99_600, 1_000);
        let display = c.reserve_display();
        assert_eq!(
            display,
            ReserveDisplay::Partial {
                used: Amount::from_sats(400),
                total: Amount::from_sats(1_000)
            }
        );
        assert_eq!(display.format(BitcoinUnit::Sat), "400/1000");
        assert_eq!(ReserveDisplay::Full(Amount::from_sats(1_000)).format(BitcoinUnit::Sat), "1000");
    }

    #[test]
    fn test_remote_clamped_symmetrically() {
        let mut c = channel("a", 100_000, 90_000, 10_000, 1_000);
        c.remote_reserve = Amount::from_sats(10_000);
        assert_eq!(c.receivable(), Amount::ZERO);
        c.remote_reserve = Amount::from_sats(2_500);
        assert_eq!(c.receivable(), Amount::from_sats(7_500));
    }

    #[test]
    fn test_capacity_split_sums_to_one() {
        let cases = [
            (100_000, 33_333, 66_667, 1_000),
            (3, 1, 1, 0),
            (100_000, 100_000, 100_000, 0), // inconsistent node data
            (7, 7, 0, 0),
            (1_000_000, 0, 0, 0),
        ];
        for (capacity, local, remote, reserve) in cases {
            let split = channel("a", capacity, local, remote, reserve).capacity_split();
            assert!(split.local() >= 0.0 && split.remote() >= 0.0 && split.unallocated() >= 0.0);
            let sum = split.local() + split.remote() + split.unallocated();
            assert!((sum - 1.0).abs() < 1e-9, "sum was {}", sum);
        }
    }

    #[test]
    fn test_capacity_split_values() {
        let split = channel("a", 100_000, 51_000, 40_000, 1_000).capacity_split();
        assert_eq!(split.percents(), (50, 40, 10));
    }

    #[test]
    fn test_zero_capacity() {
        let split = channel("a", 0, 5_000, 5_000, 0).capacity_split();
        assert_eq!(split.local(), 0.0);
        assert_eq!(split.remote(), 0.0);
        assert_eq!(split.unallocated(), 1.0);
    }

    #[test]
    fn test_split_with_huge_amounts() {
        let big = i64::MAX / 2;
        let split = channel("a", big, big, 0, 0).capacity_split();
        assert_eq!(split.percents(), (100, 0, 0));
    }

    #[test]
    fn test_totals_skip_inactive_and_pending() {
        let mut inactive = channel("b", 50_000, 20_000, 30_000, 500);
        inactive.active = false;
        let mut opening = channel("c", 250_000, 250_000, 0, 2_500);
        opening.active = false;
        opening.pending_open = true;

        let set = ChannelSet::new(vec![
            channel("a", 100_000, 60_000, 40_000, 1_000),
            inactive,
            opening,
            channel("d", 10_000, 100, 9_900, 100),
        ]);

        assert_eq!(set.total_balance(), Amount::from_sats(59_000));
        assert_eq!(set.pending_open_balance(), Amount::from_sats(250_000));
        assert_eq!(set.receivable_total(), Amount::from_sats(49_900));
        assert_eq!(set.reserved_total(), Amount::from_sats(1_100));
        assert_eq!(set.sendable("d"), Some(Amount::ZERO));
        assert_eq!(set.receivable("b"), Some(Amount::from_sats(30_000)));
        assert_eq!(set.sendable("zzz"), None);
        assert_eq!(set.per_channel().len(), 4);
    }

    #[test]
    fn test_empty_set() {
        let set = ChannelSet::default();
        assert_eq!(set.balances(), Balances::default());
    }
}

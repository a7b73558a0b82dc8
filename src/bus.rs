//! The single snooping bus every coherence transaction serializes on.

use std::fmt;

/// Bus arbiter. The bus itself holds no queue: a requester that finds it
/// busy stalls until `busy_until` and retries, and ties within a cycle go
/// to the lowest core index.
#[derive(Debug, Default)]
pub struct Bus {
    pub busy_until: u64,
}

impl Bus {
    pub fn new() -> Self {
        Bus { busy_until: 0 }
    }

    pub fn free_at(&self, cycle: u64) -> bool {
        cycle >= self.busy_until
    }

    /// Claim the bus at `cycle` for `duration` cycles.
    pub fn occupy(&mut self, cycle: u64, duration: u64) {
        self.busy_until = self.busy_until.max(cycle) + duration;
    }
}

/// The transaction kinds a cache can place on the bus.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BusTx {
    /// Request a block for reading.
    BusRd,
    /// Request a block for ownership, invalidating all other copies.
    BusRdX,
    /// Invalidate remote Shared copies without a data transfer.
    Upgrade,
}

impl fmt::Display for BusTx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BusTx::BusRd => "BusRd",
            BusTx::BusRdX => "BusRdX",
            BusTx::Upgrade => "Upgrade",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transactions_serialize() {
        let mut bus = Bus::new();
        bus.occupy(0, 10);
        assert_eq!(bus.busy_until, 10);
        assert!(!bus.free_at(9));
        assert!(bus.free_at(10));

        // a request while busy queues behind the current transaction
        bus.occupy(5, 10);
        assert_eq!(bus.busy_until, 20);

        // a request on an idle bus starts immediately
        bus.occupy(30, 7);
        assert_eq!(bus.busy_until, 37);
    }

    #[test]
    fn busy_span_equals_sum_of_back_to_back_durations() {
        let mut bus = Bus::new();
        for d in [3u64, 11, 101, 2] {
            bus.occupy(0, d);
        }
        assert_eq!(bus.busy_until, 3 + 11 + 101 + 2);
    }
}

//! Simulated time
//!
//! Time is measured in picoseconds as a 64-bit integer so that a GHz clock
//! loses no precision over long runs.

use serde::{Deserialize, Serialize};

/// A point in simulated time, in picoseconds
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Time(pub u64);

impl Time {
    /// The simulation epoch
    pub const ZERO: Time = Time(0);

    /// Picosecond value
    pub fn ps(self) -> u64 {
        self.0
    }

    /// Time shifted forward by `delta_ps`
    pub fn after(self, delta_ps: u64) -> Time {
        Time(self.0 + delta_ps)
    }

    /// The first clock edge strictly after this instant:
    /// `ceil((t + 1) / period) * period`
    pub fn next_tick(self, period_ps: u64) -> Time {
        debug_assert!(period_ps > 0);
        Time((self.0 / period_ps + 1) * period_ps)
    }

    /// The first clock edge at or after this instant
    pub fn align_up(self, period_ps: u64) -> Time {
        debug_assert!(period_ps > 0);
        Time(self.0.div_ceil(period_ps) * period_ps)
    }

    /// Whether this instant lies on a clock edge
    pub fn is_aligned(self, period_ps: u64) -> bool {
        period_ps > 0 && self.0 % period_ps == 0
    }
}

impl std::fmt::Display for Time {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ps", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    #[test_case(0, 1_000 => 1_000; "epoch advances to first edge")]
    #[test_case(1, 1_000 => 1_000; "mid-cycle rounds up")]
    #[test_case(999, 1_000 => 1_000; "just before the edge")]
    #[test_case(1_000, 1_000 => 2_000; "on an edge advances a full period")]
    #[test_case(1_500, 1_000 => 2_000; "between edges")]
    fn next_tick_cases(now: u64, period: u64) -> u64 {
        Time(now).next_tick(period).ps()
    }

    #[test]
    fn test_align_up_keeps_aligned_instant() {
        assert_eq!(Time(2_000).align_up(1_000), Time(2_000));
        assert_eq!(Time(2_001).align_up(1_000), Time(3_000));
    }

    proptest! {
        #[test]
        fn next_tick_is_aligned_and_strictly_later(now in 0u64..1_000_000, period in 1u64..10_000) {
            let tick = Time(now).next_tick(period);
            prop_assert!(tick.ps() > now);
            prop_assert!(tick.is_aligned(period));
            // no edge is skipped
            prop_assert!(tick.ps() - now <= period);
        }
    }
}

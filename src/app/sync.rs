//! Synchronous stochastic traffic application
//!
//! On every clock tick a source with no packet in its injection pipeline
//! draws against the injection probability; on success it picks a
//! destination according to the configured traffic pattern and emits a head
//! flit, followed by the packet's data flits on the following ticks (at the
//! data-packet speedup) and a closing tail.

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::NocConfig;
use crate::engine::Core;
use crate::error::{NocError, NocResult};
use crate::packet::{Flit, PacketUid, RoutingHeader};
use crate::sim::{Action, EventId, Time};
use crate::topology::{NodeId, Topology};

/// Destination selection rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrafficPattern {
    /// Fixed destination chosen by the user
    DestinationSpecified,
    /// Any node but the source, with equal probability
    UniformRandom,
    /// Swap the high and low halves of the node index bits
    BitMatrixTranspose,
    /// Invert the node index bits
    BitComplement,
    /// Reverse the node index bits
    BitReverse,
}

impl std::str::FromStr for TrafficPattern {
    type Err = NocError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "destination-specified" => Ok(TrafficPattern::DestinationSpecified),
            "uniform-random" => Ok(TrafficPattern::UniformRandom),
            "bit-matrix-transpose" => Ok(TrafficPattern::BitMatrixTranspose),
            "bit-complement" => Ok(TrafficPattern::BitComplement),
            "bit-reverse" => Ok(TrafficPattern::BitReverse),
            other => Err(NocError::ConfigInvalid(format!(
                "unknown traffic pattern '{other}'"
            ))),
        }
    }
}

impl std::fmt::Display for TrafficPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TrafficPattern::DestinationSpecified => "destination-specified",
            TrafficPattern::UniformRandom => "uniform-random",
            TrafficPattern::BitMatrixTranspose => "bit-matrix-transpose",
            TrafficPattern::BitComplement => "bit-complement",
            TrafficPattern::BitReverse => "bit-reverse",
        };
        write!(f, "{name}")
    }
}

/// Configuration of a stochastic traffic source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Probability of starting a packet on an idle tick, in `[0, 1]`
    pub injection_probability: f64,
    /// Destination selection rule
    pub traffic_pattern: TrafficPattern,
    /// Fixed destination for `DestinationSpecified`
    pub destination: Option<NodeId>,
    /// Flits per packet, tail included
    pub number_of_flits: u16,
    /// Stop after this many injected flits (0 = unlimited)
    pub max_flits: u64,
    /// Stop after this many injected payload bytes (0 = unlimited)
    pub max_bytes: u64,
    /// Clock ticks during which no statistics are collected
    pub warmup_cycles: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            injection_probability: 1.0,
            traffic_pattern: TrafficPattern::UniformRandom,
            destination: None,
            number_of_flits: 3,
            max_flits: 0,
            max_bytes: 0,
            warmup_cycles: 0,
        }
    }
}

impl SyncConfig {
    /// Check the configuration against the node and topology it is being
    /// installed on
    pub fn validate(&self, node: NodeId, net: &Topology, _cfg: &NocConfig) -> NocResult<()> {
        if !(0.0..=1.0).contains(&self.injection_probability) {
            return Err(NocError::ConfigInvalid(format!(
                "the injection probability must lie in [0, 1], got {}",
                self.injection_probability
            )));
        }
        if self.number_of_flits < 2 || self.number_of_flits > 256 {
            return Err(NocError::ConfigInvalid(format!(
                "a packet needs between 2 and 256 flits, got {}",
                self.number_of_flits
            )));
        }
        let n = net.node_count();
        match self.traffic_pattern {
            TrafficPattern::DestinationSpecified => {
                let Some(dest) = self.destination else {
                    return Err(NocError::ConfigInvalid(
                        "a fixed-destination source needs a destination".into(),
                    ));
                };
                if dest.0 >= n {
                    return Err(NocError::ConfigInvalid(format!(
                        "destination {dest} does not exist in a {n}-node topology"
                    )));
                }
                if dest == node {
                    return Err(NocError::ConfigInvalid(
                        "a node must not send traffic to itself".into(),
                    ));
                }
            }
            TrafficPattern::UniformRandom => {
                if n < 2 {
                    return Err(NocError::ConfigInvalid(
                        "uniform random traffic needs at least two nodes".into(),
                    ));
                }
            }
            TrafficPattern::BitMatrixTranspose
            | TrafficPattern::BitComplement
            | TrafficPattern::BitReverse => {
                if n < 2 || !n.is_power_of_two() {
                    return Err(NocError::ConfigInvalid(format!(
                        "bit-permutation patterns need a power-of-two node count, got {n}"
                    )));
                }
                if self.traffic_pattern == TrafficPattern::BitMatrixTranspose
                    && n.trailing_zeros() % 2 != 0
                {
                    return Err(NocError::ConfigInvalid(format!(
                        "bit-matrix transpose needs an even number of index bits, got {n} nodes"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Per-source injection state machine
#[derive(Debug)]
pub struct SyncApplication {
    node: NodeId,
    config: SyncConfig,
    running: bool,
    current_flit_index: u16,
    current_uid: Option<PacketUid>,
    total_flits: u64,
    total_bytes: u64,
    send_event: Option<EventId>,
}

impl SyncApplication {
    pub(crate) fn new(node: NodeId, config: SyncConfig) -> Self {
        Self {
            node,
            config,
            running: false,
            current_flit_index: 0,
            current_uid: None,
            total_flits: 0,
            total_bytes: 0,
            send_event: None,
        }
    }

    pub(crate) fn start(&mut self, core: &mut Core) -> NocResult<()> {
        self.running = true;
        // injection decisions made at tick t appear on the wire at tick t
        let at = core.now();
        self.schedule_send_at(core, at);
        Ok(())
    }

    pub(crate) fn stop(&mut self, core: &mut Core) {
        self.running = false;
        if let Some(id) = self.send_event.take() {
            core.scheduler.cancel(id);
        }
    }

    pub(crate) fn on_flit_delivered(&mut self, _flit: &Flit, core: &mut Core) -> NocResult<()> {
        if core.past_warmup(self.config.warmup_cycles) {
            core.stats.record_received(self.node);
        }
        Ok(())
    }

    pub(crate) fn on_send(&mut self, core: &mut Core) -> NocResult<()> {
        if !self.running {
            return Ok(());
        }
        self.send_event = None;

        if self.current_flit_index == 0 {
            self.try_start_packet(core)
        } else {
            self.continue_packet(core)
        }
    }

    /// Idle tick: draw against the injection probability and maybe open a
    /// new packet
    fn try_start_packet(&mut self, core: &mut Core) -> NocResult<()> {
        if self.limits_reached() {
            debug!(node = %self.node, flits = self.total_flits, "source exhausted its budget");
            self.running = false;
            return Ok(());
        }
        let draw: f64 = core.rng.gen();
        if draw >= self.config.injection_probability {
            self.schedule_send_next_tick(core);
            return Ok(());
        }
        let Some(destination) = self.pick_destination(core) else {
            // the pattern mapped this source onto itself: sit this tick out
            self.schedule_send_next_tick(core);
            return Ok(());
        };

        let (dx, dy) = core.net.relative_offsets(self.node, destination);
        let (sx, sy) = core.net.coords(self.node);
        let data_flits = (self.config.number_of_flits - 1) as u8;
        let header = RoutingHeader::new(sx, sy, dx, dy, data_flits)?;
        let payload = core.config.flit_size_bytes() - RoutingHeader::SIZE_BYTES;
        let uid = core.uids.allocate();
        let flit = Flit::head(uid, header, payload);

        match core.inject(self.node, flit) {
            Err(NocError::QueueFull(_)) => {
                self.schedule_send_next_tick(core);
                Ok(())
            }
            Err(other) => Err(other),
            Ok(()) => {
                if core.past_warmup(self.config.warmup_cycles) {
                    core.stats.record_injected(self.node, true);
                }
                self.current_uid = Some(uid);
                self.current_flit_index = 1;
                self.total_flits += 1;
                self.total_bytes += u64::from(payload);
                // data flits follow on consecutive ticks, sped up
                self.schedule_send_after_data_gap(core);
                Ok(())
            }
        }
    }

    /// Mid-packet tick: emit the next data or tail flit
    fn continue_packet(&mut self, core: &mut Core) -> NocResult<()> {
        let Some(uid) = self.current_uid else {
            self.current_flit_index = 0;
            return Ok(());
        };
        let payload = core.config.flit_size_bytes();
        let is_tail = self.current_flit_index + 1 == self.config.number_of_flits;
        let flit = if is_tail {
            Flit::tail(uid, payload)
        } else {
            Flit::data(uid, payload)
        };

        match core.inject(self.node, flit) {
            Err(NocError::QueueFull(_)) => {
                self.schedule_send_next_tick(core);
                Ok(())
            }
            Err(other) => Err(other),
            Ok(()) => {
                if core.past_warmup(self.config.warmup_cycles) {
                    core.stats.record_injected(self.node, false);
                }
                self.total_flits += 1;
                self.total_bytes += u64::from(payload);
                if is_tail {
                    self.current_flit_index = 0;
                    self.current_uid = None;
                    self.schedule_send_next_tick(core);
                } else {
                    self.current_flit_index += 1;
                    self.schedule_send_after_data_gap(core);
                }
                Ok(())
            }
        }
    }

    fn limits_reached(&self) -> bool {
        (self.config.max_flits > 0 && self.total_flits >= self.config.max_flits)
            || (self.config.max_bytes > 0 && self.total_bytes >= self.config.max_bytes)
    }

    fn schedule_send_at(&mut self, core: &mut Core, at: Time) {
        let id = core
            .scheduler
            .schedule_at(at, Action::SendFlit { node: self.node, iteration: 0 });
        self.send_event = Some(id);
    }

    /// Next injection decision on the following clock edge
    fn schedule_send_next_tick(&mut self, core: &mut Core) {
        let at = core.now().next_tick(core.config.global_clock);
        self.schedule_send_at(core, at);
    }

    /// Next body flit after the sped-up data gap
    fn schedule_send_after_data_gap(&mut self, core: &mut Core) {
        let at = core.now().after(core.config.hop_time(false));
        self.schedule_send_at(core, at);
    }

    fn pick_destination(&self, core: &mut Core) -> Option<NodeId> {
        let n = core.net.node_count();
        let dest = match self.config.traffic_pattern {
            TrafficPattern::DestinationSpecified => self.config.destination?,
            TrafficPattern::UniformRandom => loop {
                let candidate = NodeId(core.rng.gen_range(0..n));
                if candidate != self.node {
                    break candidate;
                }
            },
            TrafficPattern::BitMatrixTranspose => NodeId(transpose_bits(self.node.0, n)),
            TrafficPattern::BitComplement => NodeId(!self.node.0 & (n - 1)),
            TrafficPattern::BitReverse => NodeId(reverse_bits(self.node.0, n)),
        };
        (dest != self.node).then_some(dest)
    }
}

/// Swap the high and low halves of the node index bit vector
fn transpose_bits(id: u32, node_count: u32) -> u32 {
    let bits = node_count.trailing_zeros();
    let half = bits / 2;
    let low_mask = (1 << half) - 1;
    ((id >> half) | ((id & low_mask) << half)) & (node_count - 1)
}

/// Reverse the node index bit vector
fn reverse_bits(id: u32, node_count: u32) -> u32 {
    let bits = node_count.trailing_zeros();
    id.reverse_bits() >> (32 - bits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    // 16 nodes: 4-bit indices
    #[test_case(0b0110 => 0b1001; "complementary halves swap")]
    #[test_case(0b0001 => 0b0100)]
    #[test_case(0b1111 => 0b1111; "fixed point")]
    fn transpose_on_16(id: u32) -> u32 {
        transpose_bits(id, 16)
    }

    #[test_case(0b0001 => 0b1000)]
    #[test_case(0b0110 => 0b0110; "palindrome is fixed")]
    #[test_case(0b0011 => 0b1100)]
    fn reverse_on_16(id: u32) -> u32 {
        reverse_bits(id, 16)
    }

    #[test]
    fn test_complement_pairs() {
        assert_eq!(!0b0101u32 & 15, 0b1010);
        assert_eq!(!0u32 & 15, 15);
    }

    #[test]
    fn test_pattern_names_round_trip() {
        for pattern in [
            TrafficPattern::DestinationSpecified,
            TrafficPattern::UniformRandom,
            TrafficPattern::BitMatrixTranspose,
            TrafficPattern::BitComplement,
            TrafficPattern::BitReverse,
        ] {
            let parsed: TrafficPattern = pattern.to_string().parse().expect("name parses back");
            assert_eq!(parsed, pattern);
        }
        assert!("mystery".parse::<TrafficPattern>().is_err());
    }
}

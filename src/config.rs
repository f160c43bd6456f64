//! Simulation-wide configuration bundle
//!
//! All global parameters of a run live here and are passed explicitly into
//! the topology installer and the simulator. There is deliberately no
//! process-wide registry: a `NocConfig` is plain data, cheap to clone and
//! easy to fix in tests.

use serde::{Deserialize, Serialize};

use crate::error::{NocError, NocResult};
use crate::packet::RoutingHeader;

/// Global configuration of a NoC simulation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NocConfig {
    /// Flit size in bits
    pub flit_size: u32,
    /// Network clock period in picoseconds
    pub global_clock: u64,
    /// Speedup applied to data and tail flits: a head flit consumes one
    /// clock per hop, a data flit `clock / speedup`
    pub data_packet_speedup: u32,
    /// Seed for the traffic RNG; a fixed seed yields a deterministic run
    pub seed: u64,
    /// Data flit speedup assumed by the SLB load model
    pub slb_data_flit_speedup: u32,
    /// Message length (in flits) assumed by the SLB load model
    pub slb_message_length: u32,
}

impl Default for NocConfig {
    fn default() -> Self {
        Self {
            flit_size: 32,
            global_clock: 1_000,
            data_packet_speedup: 1,
            seed: 0,
            slb_data_flit_speedup: 2,
            slb_message_length: 9,
        }
    }
}

impl NocConfig {
    /// Flit size in bytes
    pub fn flit_size_bytes(&self) -> u32 {
        self.flit_size / 8
    }

    /// Clock period consumed by one hop of the given flit class
    pub fn hop_time(&self, is_head: bool) -> u64 {
        if is_head {
            self.global_clock
        } else {
            self.global_clock / u64::from(self.data_packet_speedup)
        }
    }

    /// Channel bandwidth so that one flit is delivered per network clock:
    /// `flit_size * 10^12 / clock_ps` bits/s
    pub fn channel_data_rate(&self) -> u64 {
        u64::from(self.flit_size) * 1_000_000_000_000 / self.global_clock
    }

    /// Check the bundle for consistency
    pub fn validate(&self) -> NocResult<()> {
        if self.global_clock == 0 {
            return Err(NocError::ConfigInvalid(
                "the global clock period must not be zero".into(),
            ));
        }
        if self.flit_size == 0 || self.flit_size % 8 != 0 {
            return Err(NocError::ConfigInvalid(format!(
                "the flit size must be a positive multiple of 8 bits, got {}",
                self.flit_size
            )));
        }
        if self.flit_size_bytes() <= RoutingHeader::SIZE_BYTES {
            return Err(NocError::ConfigInvalid(format!(
                "the flit size ({} bytes) must exceed the routing header ({} bytes)",
                self.flit_size_bytes(),
                RoutingHeader::SIZE_BYTES
            )));
        }
        if self.data_packet_speedup < 1 {
            return Err(NocError::ConfigInvalid(
                "the data packet speedup must be at least 1".into(),
            ));
        }
        if self.slb_data_flit_speedup < 1 || self.slb_message_length < 1 {
            return Err(NocError::ConfigInvalid(
                "the SLB load model constants must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

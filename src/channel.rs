//! Point-to-point channel between two net devices
//!
//! A channel is parameterised by a data rate and a propagation delay and
//! carries at most one flit in flight per direction. When the rate is derived
//! from the flit size and the global clock it delivers exactly one flit per
//! tick under saturation.

use crate::error::{NocError, NocResult};
use crate::sim::Time;
use crate::topology::{ChannelId, DeviceId};

/// Unidirectional transmission state is tracked per endpoint slot
const ENDPOINTS: usize = 2;

/// A conduit between exactly two net devices
#[derive(Debug)]
pub struct Channel {
    /// Channel identifier within the topology arena
    pub id: ChannelId,
    /// Bandwidth in bits per second
    pub data_rate_bps: u64,
    /// Propagation delay in picoseconds
    pub delay_ps: u64,
    endpoints: [Option<DeviceId>; ENDPOINTS],
    busy_until: [Time; ENDPOINTS],
}

impl Channel {
    /// Create a detached channel
    pub fn new(id: ChannelId, data_rate_bps: u64, delay_ps: u64) -> Self {
        Self {
            id,
            data_rate_bps,
            delay_ps,
            endpoints: [None; ENDPOINTS],
            busy_until: [Time::ZERO; ENDPOINTS],
        }
    }

    /// Attach a device, returning its endpoint slot. A channel is sealed at
    /// two endpoints.
    pub fn attach(&mut self, device: DeviceId) -> NocResult<usize> {
        for (slot, endpoint) in self.endpoints.iter_mut().enumerate() {
            if endpoint.is_none() {
                *endpoint = Some(device);
                return Ok(slot);
            }
        }
        Err(NocError::ConfigInvalid(format!(
            "channel {} already has two endpoints",
            self.id
        )))
    }

    /// The endpoint slot a device is attached at
    pub fn slot_of(&self, device: DeviceId) -> Option<usize> {
        self.endpoints.iter().position(|ep| *ep == Some(device))
    }

    /// The device on the far side of `device`
    pub fn peer_of(&self, device: DeviceId) -> Option<DeviceId> {
        let slot = self.slot_of(device)?;
        self.endpoints[1 - slot]
    }

    /// Wire time for `bits` at the configured rate, with the serialization
    /// part shortened by the data-packet speedup
    pub fn transfer_time_ps(&self, bits: u64, speedup: u32) -> u64 {
        let serialization = bits * 1_000_000_000_000 / self.data_rate_bps;
        self.delay_ps + serialization / u64::from(speedup.max(1))
    }

    /// Whether the direction out of `slot` is free at `now`
    pub fn is_idle(&self, slot: usize, now: Time) -> bool {
        self.busy_until[slot] <= now
    }

    /// Occupy the direction out of `slot` for `duration_ps`, returning the
    /// arrival time at the peer. Fails with `ChannelBusy` while the previous
    /// transmission is still in flight.
    pub fn try_transmit(&mut self, slot: usize, now: Time, duration_ps: u64) -> NocResult<Time> {
        if !self.is_idle(slot, now) {
            return Err(NocError::ChannelBusy(self.id.0));
        }
        let arrival = now.after(duration_ps);
        self.busy_until[slot] = arrival;
        Ok(arrival)
    }
}

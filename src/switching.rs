//! Switching disciplines
//!
//! The switching protocol governs when a flit may leave an input buffer
//! towards the output the routing protocol chose. All three disciplines share
//! the same per-port state machine; they differ in when the head is allowed
//! to go and in whether the packet is accumulated first.

use serde::{Deserialize, Serialize};

use crate::packet::{FlitType, PacketUid};
use crate::topology::DeviceId;

/// The supported switching disciplines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Switching {
    /// Pipelined: the head reserves the path, the tail releases it
    Wormhole,
    /// Store-and-forward: the whole packet is buffered before forwarding
    Saf,
    /// Wormhole that falls back to store-and-forward under contention
    Vct,
}

/// Where a routed packet leaves the router
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteTarget {
    /// Hand the packet to the local tile
    Local,
    /// Forward through the given output device
    Device(DeviceId),
}

/// Switching state of one input port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortState {
    /// No packet is transiting this port
    Idle,
    /// A head was routed; its output is reserved but not yet streaming
    Reserved {
        /// Reserved output
        out: RouteTarget,
        /// UID of the reserving packet
        head: PacketUid,
    },
    /// The packet streams through flit by flit
    Forwarding {
        /// Reserved output
        out: RouteTarget,
        /// UID of the reserving packet
        head: PacketUid,
        /// Data and tail flits still expected behind the head
        remaining_flits: u8,
    },
    /// The whole packet is being accumulated before it may leave
    /// (store-and-forward, and virtual cut-through under contention)
    Buffering {
        /// Output chosen for the packet
        out: RouteTarget,
        /// UID of the buffered packet
        head: PacketUid,
    },
    /// A fully buffered packet is being emitted back-to-back
    Draining {
        /// Output chosen for the packet
        out: RouteTarget,
        /// UID of the draining packet
        head: PacketUid,
    },
}

impl PortState {
    /// Whether no packet holds this port
    pub fn is_idle(&self) -> bool {
        matches!(self, PortState::Idle)
    }

    /// The output and packet currently holding this port
    pub fn target(&self) -> Option<(RouteTarget, PacketUid)> {
        match *self {
            PortState::Idle => None,
            PortState::Reserved { out, head }
            | PortState::Forwarding { out, head, .. }
            | PortState::Buffering { out, head }
            | PortState::Draining { out, head } => Some((out, head)),
        }
    }

    /// Whether the port is accumulating a packet before forwarding
    pub fn is_buffering(&self) -> bool {
        matches!(self, PortState::Buffering { .. })
    }

    /// Reserve the port for a routed head (wormhole / VCT fast path)
    pub fn reserve(&mut self, out: RouteTarget, head: PacketUid) {
        debug_assert!(self.is_idle(), "reservation over a held port");
        *self = PortState::Reserved { out, head };
    }

    /// Start accumulating a routed packet (SAF, VCT fallback)
    pub fn buffer(&mut self, out: RouteTarget, head: PacketUid) {
        debug_assert!(self.is_idle(), "buffering over a held port");
        *self = PortState::Buffering { out, head };
    }

    /// The buffered packet is complete; start emitting it
    pub fn drain(&mut self) {
        if let PortState::Buffering { out, head } = *self {
            *self = PortState::Draining { out, head };
        } else {
            debug_assert!(false, "drain outside of buffering");
        }
    }

    /// Record a successfully forwarded (or locally delivered) flit.
    /// `data_flits` is the head's remaining-flit count; it is only read when
    /// the forwarded flit is the head.
    pub fn record_forward(&mut self, kind: FlitType, data_flits: u8) {
        match (*self, kind) {
            (PortState::Reserved { out, head }, FlitType::Head) => {
                *self = PortState::Forwarding {
                    out,
                    head,
                    remaining_flits: data_flits,
                };
            }
            (
                PortState::Forwarding {
                    out,
                    head,
                    remaining_flits,
                },
                FlitType::Data,
            ) => {
                *self = PortState::Forwarding {
                    out,
                    head,
                    remaining_flits: remaining_flits.saturating_sub(1),
                };
            }
            (PortState::Forwarding { .. }, FlitType::Tail) => {
                *self = PortState::Idle;
            }
            (PortState::Draining { .. }, FlitType::Head | FlitType::Data) => {}
            (PortState::Draining { .. }, FlitType::Tail) => {
                *self = PortState::Idle;
            }
            (state, kind) => {
                debug_assert!(false, "flit {kind:?} forwarded in state {state:?}");
            }
        }
    }
}

impl Switching {
    /// Whether the discipline requires the whole packet in the input buffer
    /// before the head may leave. For VCT this depends on whether the chosen
    /// output was free when the head wanted to go.
    pub fn buffers_whole_packet(self, output_free: bool) -> bool {
        match self {
            Switching::Wormhole => false,
            Switching::Saf => true,
            Switching::Vct => !output_free,
        }
    }
}

impl std::fmt::Display for Switching {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Switching::Wormhole => "wormhole",
            Switching::Saf => "saf",
            Switching::Vct => "vct",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_wormhole_lifecycle() {
        let uid = PacketUid(7);
        let out = RouteTarget::Device(DeviceId(3));
        let mut port = PortState::Idle;

        port.reserve(out, uid);
        assert_eq!(port.target(), Some((out, uid)));

        // head, two data flits, tail
        port.record_forward(FlitType::Head, 3);
        port.record_forward(FlitType::Data, 0);
        port.record_forward(FlitType::Data, 0);
        assert!(matches!(
            port,
            PortState::Forwarding {
                remaining_flits: 1,
                ..
            }
        ));
        port.record_forward(FlitType::Tail, 0);
        assert!(port.is_idle());
    }

    #[test]
    fn test_draining_releases_on_tail() {
        let uid = PacketUid(1);
        let out = RouteTarget::Local;
        let mut port = PortState::Idle;

        port.buffer(out, uid);
        assert!(port.is_buffering());
        port.drain();
        port.record_forward(FlitType::Head, 2);
        port.record_forward(FlitType::Data, 0);
        port.record_forward(FlitType::Tail, 0);
        assert!(port.is_idle());
    }

    #[test_case(Switching::Wormhole, true => false)]
    #[test_case(Switching::Wormhole, false => false)]
    #[test_case(Switching::Saf, true => true)]
    #[test_case(Switching::Saf, false => true)]
    #[test_case(Switching::Vct, true => false; "vct forwards on arrival when free")]
    #[test_case(Switching::Vct, false => true; "vct buffers under contention")]
    fn buffering_policy(switching: Switching, output_free: bool) -> bool {
        switching.buffers_whole_packet(output_free)
    }
}

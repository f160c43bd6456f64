//! Packet and flit model
//!
//! A packet is a sequence of fixed-size flits sharing one UID: a head flit
//! carrying the routing header, zero or more data flits, and a closing tail
//! flit. Only the head knows where the packet is going; everything behind it
//! follows the reservation the head leaves at each router.

use serde::{Deserialize, Serialize};

use crate::error::{NocError, NocResult};

/// Sign bit of the 4-bit relative distance fields.
/// Set on `x_distance` means West, set on `y_distance` means North.
pub const DIRECTION_BIT_MASK: u8 = 0x08;

/// Magnitude bits of the 4-bit relative distance fields
pub const DISTANCE_MASK: u8 = 0x07;

/// Identifier shared by all flits of one packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PacketUid(pub u64);

impl std::fmt::Display for PacketUid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotone packet UID source; deterministic across runs
#[derive(Debug, Default)]
pub struct PacketUidAllocator {
    next: u64,
}

impl PacketUidAllocator {
    /// Hand out the next UID
    pub fn allocate(&mut self) -> PacketUid {
        let uid = PacketUid(self.next);
        self.next += 1;
        uid
    }
}

/// Flit classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlitType {
    /// First flit of a packet; carries the routing header
    Head,
    /// Payload-only flit between head and tail
    Data,
    /// Last flit of a packet; releases reservations at intermediate routers
    Tail,
}

/// Routing header carried by head flits.
///
/// Distances are relative to the current position and are decremented by the
/// router at every hop, so a header with both magnitudes at zero has reached
/// its destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingHeader {
    /// X coordinate of the source tile
    pub source_x: u8,
    /// Y coordinate of the source tile
    pub source_y: u8,
    /// Sign-and-magnitude horizontal distance (sign set = West)
    pub x_distance: u8,
    /// Sign-and-magnitude vertical distance (sign set = North)
    pub y_distance: u8,
    /// Data and tail flits following the head
    pub data_flit_count: u8,
}

impl RoutingHeader {
    /// Serialized size of the header, in bytes: one byte of packed
    /// distances, one byte of packed source coordinates, one byte of
    /// remaining-data-flit count.
    pub const SIZE_BYTES: u32 = 3;

    /// Build a header for a route from `(source_x, source_y)` with the given
    /// signed offsets (positive = East / South).
    pub fn new(
        source_x: u8,
        source_y: u8,
        x_offset: i32,
        y_offset: i32,
        data_flit_count: u8,
    ) -> NocResult<Self> {
        let encode = |offset: i32, axis: &str| -> NocResult<u8> {
            let magnitude = offset.unsigned_abs();
            if magnitude > u32::from(DISTANCE_MASK) {
                return Err(NocError::ConfigInvalid(format!(
                    "{axis} offset {offset} exceeds the header distance field"
                )));
            }
            let mut field = magnitude as u8;
            if offset < 0 {
                field |= DIRECTION_BIT_MASK;
            }
            Ok(field)
        };
        Ok(Self {
            source_x,
            source_y,
            x_distance: encode(x_offset, "x")?,
            y_distance: encode(y_offset, "y")?,
            data_flit_count,
        })
    }

    /// Remaining horizontal hops
    pub fn x_magnitude(&self) -> u8 {
        self.x_distance & DISTANCE_MASK
    }

    /// Remaining vertical hops
    pub fn y_magnitude(&self) -> u8 {
        self.y_distance & DISTANCE_MASK
    }

    /// Whether the horizontal leg runs westwards
    pub fn x_is_west(&self) -> bool {
        self.x_distance & DIRECTION_BIT_MASK != 0
    }

    /// Whether the vertical leg runs northwards
    pub fn y_is_north(&self) -> bool {
        self.y_distance & DIRECTION_BIT_MASK != 0
    }

    /// Whether the header has reached its destination tile
    pub fn is_local(&self) -> bool {
        self.x_magnitude() == 0 && self.y_magnitude() == 0
    }

    /// Sum of the remaining hop counts on both axes
    pub fn distance_sum(&self) -> u32 {
        u32::from(self.x_magnitude()) + u32::from(self.y_magnitude())
    }

    /// Consume one horizontal hop, keeping the sign bit
    pub fn decrement_x(&mut self) {
        debug_assert!(self.x_magnitude() > 0);
        self.x_distance = (self.x_distance & DIRECTION_BIT_MASK) | (self.x_magnitude() - 1);
    }

    /// Consume one vertical hop, keeping the sign bit
    pub fn decrement_y(&mut self) {
        debug_assert!(self.y_magnitude() > 0);
        self.y_distance = (self.y_distance & DIRECTION_BIT_MASK) | (self.y_magnitude() - 1);
    }
}

/// One flow-control digit on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flit {
    /// UID shared by every flit of the packet
    pub uid: PacketUid,
    /// Head, data or tail
    pub kind: FlitType,
    /// Routing header; present on head flits only
    pub header: Option<RoutingHeader>,
    /// Payload carried by this flit, in bytes
    pub payload_bytes: u32,
}

impl Flit {
    /// Head flit opening a packet
    pub fn head(uid: PacketUid, header: RoutingHeader, payload_bytes: u32) -> Self {
        Self {
            uid,
            kind: FlitType::Head,
            header: Some(header),
            payload_bytes,
        }
    }

    /// Data flit in the body of a packet
    pub fn data(uid: PacketUid, payload_bytes: u32) -> Self {
        Self {
            uid,
            kind: FlitType::Data,
            header: None,
            payload_bytes,
        }
    }

    /// Tail flit closing a packet
    pub fn tail(uid: PacketUid, payload_bytes: u32) -> Self {
        Self {
            uid,
            kind: FlitType::Tail,
            header: None,
            payload_bytes,
        }
    }

    /// Whether this is a head flit
    pub fn is_head(&self) -> bool {
        self.kind == FlitType::Head
    }

    /// Whether this is a tail flit
    pub fn is_tail(&self) -> bool {
        self.kind == FlitType::Tail
    }

    /// Size on the wire, in bits
    pub fn size_bits(&self) -> u64 {
        let header_bytes = if self.header.is_some() {
            RoutingHeader::SIZE_BYTES
        } else {
            0
        };
        u64::from(self.payload_bytes + header_bytes) * 8
    }
}

impl std::fmt::Display for Flit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "uid={} {:?} bytes={}", self.uid, self.kind, self.payload_bytes)?;
        if let Some(header) = &self.header {
            write!(
                f,
                " src=({},{}) dist=({}{},{}{})",
                header.source_x,
                header.source_y,
                if header.x_is_west() { "W" } else { "E" },
                header.x_magnitude(),
                if header.y_is_north() { "N" } else { "S" },
                header.y_magnitude(),
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(3, 0 => (3, false); "eastbound offset")]
    #[test_case(-3, 0 => (3, true); "westbound offset sets the sign bit")]
    #[test_case(0, 0 => (0, false); "zero offset")]
    fn x_encoding(x: i32, y: i32) -> (u8, bool) {
        let header = RoutingHeader::new(0, 0, x, y, 4).expect("valid offsets");
        (header.x_magnitude(), header.x_is_west())
    }

    #[test]
    fn test_offset_overflow_is_config_error() {
        assert!(matches!(
            RoutingHeader::new(0, 0, 8, 0, 0),
            Err(NocError::ConfigInvalid(_))
        ));
        assert!(matches!(
            RoutingHeader::new(0, 0, 0, -9, 0),
            Err(NocError::ConfigInvalid(_))
        ));
    }

    #[test]
    fn test_decrement_keeps_direction() {
        let mut header = RoutingHeader::new(1, 1, -2, 3, 4).expect("valid offsets");
        header.decrement_x();
        assert_eq!(header.x_magnitude(), 1);
        assert!(header.x_is_west());
        header.decrement_x();
        assert_eq!(header.x_magnitude(), 0);
        assert!(!header.is_local());
        header.decrement_y();
        header.decrement_y();
        header.decrement_y();
        assert!(header.is_local());
    }

    #[test]
    fn test_uid_allocation_is_monotone() {
        let mut uids = PacketUidAllocator::default();
        let a = uids.allocate();
        let b = uids.allocate();
        assert!(b > a);
    }

    #[test]
    fn test_flit_sizes_include_header() {
        let header = RoutingHeader::new(0, 0, 1, 1, 2).expect("valid offsets");
        let head = Flit::head(PacketUid(9), header, 1);
        let data = Flit::data(PacketUid(9), 4);
        assert_eq!(head.size_bits(), u64::from(1 + RoutingHeader::SIZE_BYTES) * 8);
        assert_eq!(data.size_bits(), 32);
    }
}

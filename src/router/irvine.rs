//! Irvine split-router device banks
//!
//! The Irvine router is two independent sub-routers sharing the vertical
//! ports. Each node carries duplicated North and South links; the first
//! instance of each goes to the right sub-router, the second to the left.
//! The single East link feeds the left sub-router and drains from the right
//! one, and the West link is the mirror image, so eastbound traffic transits
//! the right sub-router and westbound traffic the left one.

use crate::device::Direction;
use crate::error::{NocError, NocResult};
use crate::topology::DeviceId;

/// Which sub-router a device belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bank {
    /// Westbound sub-router
    Left,
    /// Eastbound sub-router
    Right,
}

impl Bank {
    /// The other sub-router
    pub fn opposite(self) -> Bank {
        match self {
            Bank::Left => Bank::Right,
            Bank::Right => Bank::Left,
        }
    }
}

/// Input and output device banks of a split router
#[derive(Debug, Default)]
pub struct IrvineBanks {
    right_in: Vec<DeviceId>,
    right_out: Vec<DeviceId>,
    left_in: Vec<DeviceId>,
    left_out: Vec<DeviceId>,
    north_instances: u8,
    south_instances: u8,
    east_added: bool,
    west_added: bool,
}

impl IrvineBanks {
    /// Assign a device to its banks based on the routing direction.
    ///
    /// | Direction | First instance      | Second instance   |
    /// |-----------|---------------------|-------------------|
    /// | North     | right-in, right-out | left-in, left-out |
    /// | South     | right-in, right-out | left-in, left-out |
    /// | East      | left-in, right-out  | —                 |
    /// | West      | right-in, left-out  | —                 |
    pub fn add_device(&mut self, device: DeviceId, direction: Direction) -> NocResult<()> {
        match direction {
            Direction::North | Direction::South => {
                let instances = if direction == Direction::North {
                    &mut self.north_instances
                } else {
                    &mut self.south_instances
                };
                match *instances {
                    0 => {
                        self.right_in.push(device);
                        self.right_out.push(device);
                    }
                    1 => {
                        self.left_in.push(device);
                        self.left_out.push(device);
                    }
                    _ => {
                        return Err(NocError::ConfigInvalid(format!(
                            "a split router takes at most two {direction} devices"
                        )))
                    }
                }
                *instances += 1;
            }
            Direction::East => {
                if self.east_added {
                    return Err(NocError::ConfigInvalid(
                        "a split router takes a single east device".into(),
                    ));
                }
                self.left_in.push(device);
                self.right_out.push(device);
                self.east_added = true;
            }
            Direction::West => {
                if self.west_added {
                    return Err(NocError::ConfigInvalid(
                        "a split router takes a single west device".into(),
                    ));
                }
                self.right_in.push(device);
                self.left_out.push(device);
                self.west_added = true;
            }
            other => {
                return Err(NocError::ConfigInvalid(format!(
                    "a split router cannot take a {other} device"
                )))
            }
        }
        Ok(())
    }

    /// The bank whose input side holds `device`
    pub fn input_bank_of(&self, device: DeviceId) -> Option<Bank> {
        if self.right_in.contains(&device) {
            Some(Bank::Right)
        } else if self.left_in.contains(&device) {
            Some(Bank::Left)
        } else {
            None
        }
    }

    /// Input devices of a bank
    pub fn inputs(&self, bank: Bank) -> &[DeviceId] {
        match bank {
            Bank::Left => &self.left_in,
            Bank::Right => &self.right_in,
        }
    }

    /// Output devices of a bank
    pub fn outputs(&self, bank: Bank) -> &[DeviceId] {
        match bank {
            Bank::Left => &self.left_out,
            Bank::Right => &self.right_out,
        }
    }

    /// The device a packet is injected through: the left sub-router when the
    /// destination lies west of the source, the right one otherwise.
    pub fn injection_device(&self, westbound: bool) -> NocResult<DeviceId> {
        let bank = if westbound { Bank::Left } else { Bank::Right };
        self.inputs(bank).first().copied().ok_or_else(|| {
            NocError::ConfigInvalid(format!("split router has an empty {bank:?} input bank"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn banks() -> IrvineBanks {
        let mut banks = IrvineBanks::default();
        // install order of a middle node: W, E, N1, S1, N2, S2
        banks.add_device(DeviceId(0), Direction::West).expect("west");
        banks.add_device(DeviceId(1), Direction::East).expect("east");
        banks.add_device(DeviceId(2), Direction::North).expect("north 1");
        banks.add_device(DeviceId(3), Direction::South).expect("south 1");
        banks.add_device(DeviceId(4), Direction::North).expect("north 2");
        banks.add_device(DeviceId(5), Direction::South).expect("south 2");
        banks
    }

    #[test]
    fn test_partitioning_follows_the_bank_table() {
        let banks = banks();
        assert_eq!(banks.inputs(Bank::Right), &[DeviceId(0), DeviceId(2), DeviceId(3)]);
        assert_eq!(banks.inputs(Bank::Left), &[DeviceId(1), DeviceId(4), DeviceId(5)]);
        assert_eq!(banks.outputs(Bank::Right), &[DeviceId(1), DeviceId(2), DeviceId(3)]);
        assert_eq!(banks.outputs(Bank::Left), &[DeviceId(0), DeviceId(4), DeviceId(5)]);
    }

    #[test]
    fn test_injection_bank_selection() {
        let banks = banks();
        // westbound packets enter the left sub-router
        assert_eq!(banks.injection_device(true), Ok(DeviceId(1)));
        assert_eq!(banks.injection_device(false), Ok(DeviceId(0)));
    }

    #[test]
    fn test_third_vertical_instance_rejected() {
        let mut banks = banks();
        assert!(matches!(
            banks.add_device(DeviceId(6), Direction::North),
            Err(NocError::ConfigInvalid(_))
        ));
        assert!(matches!(
            banks.add_device(DeviceId(6), Direction::East),
            Err(NocError::ConfigInvalid(_))
        ));
    }

    #[test]
    fn test_input_bank_membership() {
        let banks = banks();
        assert_eq!(banks.input_bank_of(DeviceId(0)), Some(Bank::Right));
        assert_eq!(banks.input_bank_of(DeviceId(4)), Some(Bank::Left));
        assert_eq!(banks.input_bank_of(DeviceId(9)), None);
    }
}

//! 2-D torus installer
//!
//! A torus is a mesh with wrap-around channels: the last node of each row
//! links back east to the row's first node, and the last node of each column
//! links back south to the column's top node.

use crate::device::Direction;
use crate::error::NocResult;
use crate::topology::{mesh2d, InstallParams, NodeId, Topology};

pub(crate) fn install(topo: &mut Topology, params: &InstallParams) -> NocResult<()> {
    mesh2d::install_row_links(topo, params)?;
    mesh2d::install_column_links(topo, params, 1)?;

    if params.h >= 2 {
        for row in 0..params.v {
            let last = NodeId(row * params.h + params.h - 1);
            let first = NodeId(row * params.h);
            let channel = topo.add_channel(params.data_rate_bps, params.delay_ps);
            topo.add_device(last, Direction::East, Some(channel), params.queue_depth)?;
            topo.add_device(first, Direction::West, Some(channel), params.queue_depth)?;
        }
    }
    if params.v >= 2 {
        for column in 0..params.h {
            let bottom = NodeId((params.v - 1) * params.h + column);
            let top = NodeId(column);
            let channel = topo.add_channel(params.data_rate_bps, params.delay_ps);
            topo.add_device(bottom, Direction::South, Some(channel), params.queue_depth)?;
            topo.add_device(top, Direction::North, Some(channel), params.queue_depth)?;
        }
    }
    Ok(())
}

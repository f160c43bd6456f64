//! 2-D mesh installer
//!
//! Each horizontal adjacency gets one channel with an East device on the
//! left node and a West device on the right node; each vertical adjacency
//! gets a South device on the upper node and a North device on the lower
//! node.

use crate::device::Direction;
use crate::error::NocResult;
use crate::topology::{ChannelId, InstallParams, NodeId, Topology};

pub(crate) fn install(topo: &mut Topology, params: &InstallParams) -> NocResult<()> {
    install_row_links(topo, params)?;
    install_column_links(topo, params, 1)?;
    Ok(())
}

/// Create the horizontal channels and their E/W device pairs
pub(crate) fn install_row_links(topo: &mut Topology, params: &InstallParams) -> NocResult<()> {
    let n = params.h * params.v;
    let mut carried: Option<ChannelId> = None;
    for i in 0..n {
        let node = NodeId(i);
        if let Some(channel) = carried {
            topo.add_device(node, Direction::West, Some(channel), params.queue_depth)?;
        }
        if (i + 1) % params.h != 0 {
            let channel = topo.add_channel(params.data_rate_bps, params.delay_ps);
            topo.add_device(node, Direction::East, Some(channel), params.queue_depth)?;
            carried = Some(channel);
        } else {
            carried = None;
        }
    }
    Ok(())
}

/// Create the vertical channels and their S/N device pairs, `lanes` times
/// (the Irvine mesh doubles the vertical links)
pub(crate) fn install_column_links(
    topo: &mut Topology,
    params: &InstallParams,
    lanes: u32,
) -> NocResult<()> {
    let n = params.h * params.v;
    for _ in 0..lanes {
        let mut columns: Vec<Option<ChannelId>> = vec![None; params.h as usize];
        for row_start in (0..n).step_by(params.h as usize) {
            for j in 0..params.h {
                let node = NodeId(row_start + j);
                if let Some(channel) = columns[j as usize] {
                    topo.add_device(node, Direction::North, Some(channel), params.queue_depth)?;
                }
                if row_start < n - params.h {
                    let channel = topo.add_channel(params.data_rate_bps, params.delay_ps);
                    topo.add_device(node, Direction::South, Some(channel), params.queue_depth)?;
                    columns[j as usize] = Some(channel);
                } else {
                    columns[j as usize] = None;
                }
            }
        }
    }
    Ok(())
}

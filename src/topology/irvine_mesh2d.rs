//! Irvine mesh installer
//!
//! The Irvine mesh is a 2-D mesh whose vertical links are duplicated so that
//! each split router owns a North/South pair per sub-router. The first
//! vertical lane lands in the right sub-routers, the second in the left
//! ones (see [`crate::router::irvine`]).

use crate::error::NocResult;
use crate::topology::{mesh2d, InstallParams, Topology};

pub(crate) fn install(topo: &mut Topology, params: &InstallParams) -> NocResult<()> {
    mesh2d::install_row_links(topo, params)?;
    mesh2d::install_column_links(topo, params, 2)?;
    Ok(())
}

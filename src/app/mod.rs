//! Traffic-generating applications
//!
//! Applications are the only source of flits. The closed set of variants is
//! dispatched by the engine: [`sync::SyncApplication`] injects
//! stochastically on every clock tick, [`ctg::CtgApplication`] walks a
//! communication task graph with receive-before-send barriers.

pub mod ctg;
pub mod sync;

use crate::engine::Core;
use crate::error::NocResult;
use crate::packet::Flit;
use crate::topology::NodeId;

pub use ctg::{CtgApplication, CtgConfig, DependentTaskData, TaskData};
pub use sync::{SyncApplication, SyncConfig, TrafficPattern};

/// An installed application
#[derive(Debug)]
pub enum Application {
    /// Stochastic per-tick injection
    Sync(SyncApplication),
    /// Task-graph driven injection
    Ctg(CtgApplication),
}

impl Application {
    pub(crate) fn sync(node: NodeId, config: SyncConfig) -> Self {
        Application::Sync(SyncApplication::new(node, config))
    }

    pub(crate) fn ctg(node: NodeId, config: CtgConfig) -> Self {
        Application::Ctg(CtgApplication::new(node, config))
    }

    pub(crate) fn start(&mut self, core: &mut Core) -> NocResult<()> {
        match self {
            Application::Sync(app) => app.start(core),
            Application::Ctg(app) => app.start(core),
        }
    }

    pub(crate) fn stop(&mut self, core: &mut Core) {
        match self {
            Application::Sync(app) => app.stop(core),
            Application::Ctg(app) => app.stop(core),
        }
    }

    pub(crate) fn on_send(&mut self, iteration: u64, core: &mut Core) -> NocResult<()> {
        match self {
            Application::Sync(app) => app.on_send(core),
            Application::Ctg(app) => app.on_send(iteration, core),
        }
    }

    pub(crate) fn on_flit_delivered(&mut self, flit: &Flit, core: &mut Core) -> NocResult<()> {
        match self {
            Application::Sync(app) => app.on_flit_delivered(flit, core),
            Application::Ctg(app) => app.on_flit_delivered(flit, core),
        }
    }
}

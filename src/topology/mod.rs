//! Electrical network graph built from persisted resource and asset records.
//!
//! Construction is pure: `TopologyBuilder::build` reads already-fetched
//! records, parses each element's attributes into its typed parameter struct
//! and registers it against the buses registered before it.

pub mod builder;
pub mod error;
pub mod params;

pub use builder::{BatteryModel, ElementRecord, TopologyBuilder, TopologyRecords};
pub use error::TopologyError;
pub use params::*;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::{AssetId, LoadArchetype, ResourceId};

/// Position of a bus in `Topology::buses`.
pub type BusIndex = usize;

#[derive(Debug, Clone, Serialize)]
pub struct Bus {
    pub id: ResourceId,
    pub name: String,
    pub params: BusParams,
}

/// A line or a transformer, reduced to what the network solver needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BranchKind {
    Line,
    Transformer,
}

#[derive(Debug, Clone, Serialize)]
pub struct Branch {
    pub id: ResourceId,
    pub name: String,
    pub kind: BranchKind,
    pub from: BusIndex,
    pub to: BusIndex,
    /// Series reactance in per unit on the topology base.
    pub x_pu: f64,
    pub rating_mw: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Line {
    pub id: ResourceId,
    pub name: String,
    pub from: BusIndex,
    pub to: BusIndex,
    pub params: LineParams,
}

#[derive(Debug, Clone, Serialize)]
pub struct Transformer {
    pub id: ResourceId,
    pub name: String,
    pub hv: BusIndex,
    pub lv: BusIndex,
    pub params: TransformerParams,
}

#[derive(Debug, Clone, Serialize)]
pub struct Shunt {
    pub id: ResourceId,
    pub name: String,
    pub bus: BusIndex,
    pub params: ShuntParams,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExternalGrid {
    pub id: ResourceId,
    pub name: String,
    pub bus: BusIndex,
    pub params: ExternalGridParams,
}

#[derive(Debug, Clone, Serialize)]
pub struct Generator {
    pub asset_id: AssetId,
    pub name: String,
    pub bus: BusIndex,
    pub params: GeneratorParams,
}

#[derive(Debug, Clone, Serialize)]
pub struct Storage {
    pub asset_id: AssetId,
    pub name: String,
    pub bus: BusIndex,
    pub params: StorageParams,
}

#[derive(Debug, Clone, Serialize)]
pub struct PvUnit {
    pub asset_id: AssetId,
    pub name: String,
    pub bus: BusIndex,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadPoint {
    pub asset_id: AssetId,
    pub name: String,
    pub bus: BusIndex,
    pub archetype: LoadArchetype,
}

/// Immutable network model for one scheduling run.
#[derive(Debug, Clone, Serialize)]
pub struct Topology {
    pub base_mva: f64,
    pub buses: Vec<Bus>,
    pub lines: Vec<Line>,
    pub transformers: Vec<Transformer>,
    pub shunts: Vec<Shunt>,
    pub external_grids: Vec<ExternalGrid>,
    pub generators: Vec<Generator>,
    pub storages: Vec<Storage>,
    pub pvs: Vec<PvUnit>,
    pub loads: Vec<LoadPoint>,
    #[serde(skip)]
    bus_index: HashMap<ResourceId, BusIndex>,
}

impl Topology {
    pub(crate) fn empty(base_mva: f64) -> Self {
        Self {
            base_mva,
            buses: Vec::new(),
            lines: Vec::new(),
            transformers: Vec::new(),
            shunts: Vec::new(),
            external_grids: Vec::new(),
            generators: Vec::new(),
            storages: Vec::new(),
            pvs: Vec::new(),
            loads: Vec::new(),
            bus_index: HashMap::new(),
        }
    }

    pub fn bus_index(&self, id: ResourceId) -> Option<BusIndex> {
        self.bus_index.get(&id).copied()
    }

    pub(crate) fn register_bus(&mut self, bus: Bus) -> Result<BusIndex, TopologyError> {
        if self.bus_index.contains_key(&bus.id) {
            return Err(TopologyError::DuplicateBus(bus.id));
        }
        let index = self.buses.len();
        self.bus_index.insert(bus.id, index);
        self.buses.push(bus);
        Ok(index)
    }

    /// Lines and transformers as solver branches.
    pub fn branches(&self) -> Vec<Branch> {
        let lines = self.lines.iter().map(|line| {
            let vn_kv = self.buses[line.from].params.vn_kv;
            Branch {
                id: line.id,
                name: line.name.clone(),
                kind: BranchKind::Line,
                from: line.from,
                to: line.to,
                x_pu: line.params.x_pu(vn_kv, self.base_mva),
                rating_mw: line.params.rating_mw(vn_kv),
            }
        });
        let transformers = self.transformers.iter().map(|trafo| Branch {
            id: trafo.id,
            name: trafo.name.clone(),
            kind: BranchKind::Transformer,
            from: trafo.hv,
            to: trafo.lv,
            x_pu: trafo.params.x_pu(self.base_mva),
            rating_mw: trafo.params.sn_mva,
        });
        lines.chain(transformers).collect()
    }

    /// Buses hosting a source able to balance the network.
    pub fn slack_buses(&self) -> Vec<BusIndex> {
        let mut buses: Vec<BusIndex> = self
            .external_grids
            .iter()
            .map(|eg| eg.bus)
            .chain(self.generators.iter().filter(|g| g.params.slack).map(|g| g.bus))
            .collect();
        buses.sort_unstable();
        buses.dedup();
        buses
    }
}

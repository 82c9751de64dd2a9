use petgraph::graph::UnGraph;
use petgraph::visit::Bfs;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::params::Fields;
use super::*;
use crate::domain::{Asset, Attributes, NetworkResource};

/// How battery assets enter the network model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatteryModel {
    /// Controllable generator with a polynomial cost (OPF, power flow, load scheduling).
    Generator,
    /// Storage unit with energy limits and a state of charge (flexibility dispatch).
    Storage,
}

/// Identifier, name and attributes of one persisted element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementRecord {
    pub id: i64,
    pub name: String,
    pub attributes: Attributes,
}

impl From<&NetworkResource> for ElementRecord {
    fn from(r: &NetworkResource) -> Self {
        Self {
            id: r.id,
            name: r.name.clone(),
            attributes: r.attributes.clone(),
        }
    }
}

impl From<&Asset> for ElementRecord {
    fn from(a: &Asset) -> Self {
        Self {
            id: a.id,
            name: a.name.clone(),
            attributes: a.attributes.clone(),
        }
    }
}

/// Records resolved for one run, segmented by role and kept in request order.
#[derive(Debug, Clone, Default)]
pub struct TopologyRecords {
    pub buses: Vec<ElementRecord>,
    pub lines: Vec<ElementRecord>,
    pub transformers: Vec<ElementRecord>,
    pub shunts: Vec<ElementRecord>,
    pub external_grids: Vec<ElementRecord>,
    pub batteries: Vec<Asset>,
    pub loads: Vec<Asset>,
    pub pvs: Vec<Asset>,
}

pub struct TopologyBuilder {
    battery_model: BatteryModel,
    base_mva: f64,
}

impl TopologyBuilder {
    pub fn new(battery_model: BatteryModel) -> Self {
        Self {
            battery_model,
            base_mva: 1.0,
        }
    }

    pub fn with_base_mva(mut self, base_mva: f64) -> Self {
        self.base_mva = base_mva;
        self
    }

    pub fn build(&self, records: &TopologyRecords) -> Result<Topology, TopologyError> {
        let mut topology = Topology::empty(self.base_mva);

        for rec in &records.buses {
            let element = format!("bus {}", rec.id);
            let params = BusParams::parse(&Fields::new(&element, &rec.attributes))?;
            topology.register_bus(Bus {
                id: rec.id,
                name: rec.name.clone(),
                params,
            })?;
        }

        for rec in &records.lines {
            let element = format!("line {}", rec.id);
            let params = LineParams::parse(&Fields::new(&element, &rec.attributes))?;
            topology.lines.push(Line {
                id: rec.id,
                name: rec.name.clone(),
                from: resolve_bus(&topology, &element, params.from_bus)?,
                to: resolve_bus(&topology, &element, params.to_bus)?,
                params,
            });
        }

        for rec in &records.transformers {
            let element = format!("transformer {}", rec.id);
            let params = TransformerParams::parse(&Fields::new(&element, &rec.attributes))?;
            topology.transformers.push(Transformer {
                id: rec.id,
                name: rec.name.clone(),
                hv: resolve_bus(&topology, &element, params.hv_bus)?,
                lv: resolve_bus(&topology, &element, params.lv_bus)?,
                params,
            });
        }

        for rec in &records.shunts {
            let element = format!("shunt {}", rec.id);
            let params = ShuntParams::parse(&Fields::new(&element, &rec.attributes))?;
            topology.shunts.push(Shunt {
                id: rec.id,
                name: rec.name.clone(),
                bus: resolve_bus(&topology, &element, params.bus)?,
                params,
            });
        }

        for rec in &records.external_grids {
            let element = format!("external grid {}", rec.id);
            let params = ExternalGridParams::parse(&Fields::new(&element, &rec.attributes))?;
            topology.external_grids.push(ExternalGrid {
                id: rec.id,
                name: rec.name.clone(),
                bus: resolve_bus(&topology, &element, params.bus)?,
                params,
            });
        }

        for asset in &records.batteries {
            let element = format!("battery {}", asset.id);
            let fields = Fields::new(&element, &asset.attributes);
            match self.battery_model {
                BatteryModel::Generator => {
                    let params = GeneratorParams::parse(&fields)?;
                    topology.generators.push(Generator {
                        asset_id: asset.id,
                        name: asset.name.clone(),
                        bus: resolve_bus(&topology, &element, params.bus)?,
                        params,
                    });
                }
                BatteryModel::Storage => {
                    let params = StorageParams::parse(&fields)?;
                    topology.storages.push(Storage {
                        asset_id: asset.id,
                        name: asset.name.clone(),
                        bus: resolve_bus(&topology, &element, params.bus)?,
                        params,
                    });
                }
            }
        }

        for asset in &records.pvs {
            let element = format!("pv {}", asset.id);
            let bus = Fields::new(&element, &asset.attributes).id("bus")?;
            topology.pvs.push(PvUnit {
                asset_id: asset.id,
                name: asset.name.clone(),
                bus: resolve_bus(&topology, &element, bus)?,
            });
        }

        for asset in &records.loads {
            let element = format!("load {}", asset.id);
            let bus = Fields::new(&element, &asset.attributes).id("bus")?;
            topology.loads.push(LoadPoint {
                asset_id: asset.id,
                name: asset.name.clone(),
                bus: resolve_bus(&topology, &element, bus)?,
                archetype: asset
                    .archetype()
                    .map_err(|reason| TopologyError::InvalidValue { element: element.clone(), reason })?,
            });
        }

        check_connectivity(&topology)?;

        debug!(
            buses = topology.buses.len(),
            branches = topology.lines.len() + topology.transformers.len(),
            generators = topology.generators.len(),
            storages = topology.storages.len(),
            loads = topology.loads.len(),
            "topology built"
        );
        Ok(topology)
    }
}

fn resolve_bus(topology: &Topology, element: &str, bus: ResourceId) -> Result<BusIndex, TopologyError> {
    topology.bus_index(bus).ok_or_else(|| TopologyError::UnknownBus {
        element: element.to_string(),
        bus,
    })
}

/// Every bus must reach a slack source through lines or transformers.
fn check_connectivity(topology: &Topology) -> Result<(), TopologyError> {
    let slack = topology.slack_buses();
    if slack.is_empty() {
        return Err(TopologyError::NoSlack);
    }

    let mut graph = UnGraph::<BusIndex, ()>::with_capacity(topology.buses.len(), topology.lines.len());
    let nodes: Vec<_> = (0..topology.buses.len()).map(|i| graph.add_node(i)).collect();
    for line in &topology.lines {
        graph.add_edge(nodes[line.from], nodes[line.to], ());
    }
    for trafo in &topology.transformers {
        graph.add_edge(nodes[trafo.hv], nodes[trafo.lv], ());
    }

    let mut reached = vec![false; topology.buses.len()];
    for bus in slack {
        let mut bfs = Bfs::new(&graph, nodes[bus]);
        while let Some(node) = bfs.next(&graph) {
            reached[graph[node]] = true;
        }
    }

    let islanded: Vec<ResourceId> = topology
        .buses
        .iter()
        .zip(&reached)
        .filter(|(_, reached)| !**reached)
        .map(|(bus, _)| bus.id)
        .collect();
    if islanded.is_empty() {
        Ok(())
    } else {
        Err(TopologyError::Islanded(islanded))
    }
}

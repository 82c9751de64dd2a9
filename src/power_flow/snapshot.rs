use serde::{Deserialize, Serialize};

use super::{SolverFailure, SolverStatus};
use crate::topology::Topology;

/// Device setpoints for a single timestep.
///
/// Built fresh for every solve from the run's curves; vectors are indexed like
/// the matching device list of the `Topology`. Sign convention: loads and
/// storage consume when positive, PV and generators inject when positive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Injections {
    pub timestep: usize,
    pub load_p: Vec<f64>,
    pub load_q: Vec<f64>,
    pub pv_p: Vec<f64>,
    pub storage_p: Vec<f64>,
    pub generator_p: Vec<f64>,
}

impl Injections {
    /// Zero loads and PV, storage and generators at their recorded setpoints.
    pub fn at_rest(topology: &Topology, timestep: usize) -> Self {
        Self {
            timestep,
            load_p: vec![0.0; topology.loads.len()],
            load_q: vec![0.0; topology.loads.len()],
            pv_p: vec![0.0; topology.pvs.len()],
            storage_p: topology.storages.iter().map(|s| s.params.p_mw).collect(),
            generator_p: topology.generators.iter().map(|g| g.params.p_mw).collect(),
        }
    }

    pub(crate) fn validate(&self, topology: &Topology) -> Result<(), SolverFailure> {
        let checks = [
            ("load_p", self.load_p.len(), topology.loads.len()),
            ("load_q", self.load_q.len(), topology.loads.len()),
            ("pv_p", self.pv_p.len(), topology.pvs.len()),
            ("storage_p", self.storage_p.len(), topology.storages.len()),
            ("generator_p", self.generator_p.len(), topology.generators.len()),
        ];
        for (name, found, expected) in checks {
            if found != expected {
                return Err(SolverFailure::new(
                    SolverStatus::InvalidModel,
                    format!("{name} has {found} entries, topology has {expected} devices"),
                ));
            }
        }
        let all = self
            .load_p
            .iter()
            .chain(&self.load_q)
            .chain(&self.pv_p)
            .chain(&self.storage_p)
            .chain(&self.generator_p);
        if all.into_iter().any(|v| !v.is_finite()) {
            return Err(SolverFailure::new(
                SolverStatus::InvalidModel,
                format!("non-finite setpoint at timestep {}", self.timestep),
            ));
        }
        Ok(())
    }

    /// Fixed active demand per bus: loads, shunt losses and charging storage
    /// minus PV infeed. Generators are not included.
    pub fn fixed_demand_mw(&self, topology: &Topology) -> Vec<f64> {
        let mut demand = vec![0.0; topology.buses.len()];
        for (load, p) in topology.loads.iter().zip(&self.load_p) {
            demand[load.bus] += p;
        }
        for shunt in &topology.shunts {
            demand[shunt.bus] += shunt.params.p_mw;
        }
        for (storage, p) in topology.storages.iter().zip(&self.storage_p) {
            demand[storage.bus] += p;
        }
        for (pv, p) in topology.pvs.iter().zip(&self.pv_p) {
            demand[pv.bus] -= p;
        }
        demand
    }

    /// Reactive demand of loads and shunts over the whole network.
    pub fn reactive_demand_mvar(&self, topology: &Topology) -> f64 {
        self.load_q.iter().sum::<f64>() + topology.shunts.iter().map(|s| s.params.q_mvar).sum::<f64>()
    }
}

/// Per-device time series for one run.
///
/// Outer index follows the topology device list, inner index the horizon slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceCurves {
    pub load_p: Vec<Vec<f64>>,
    pub load_q: Vec<Vec<f64>>,
    pub pv_p: Vec<Vec<f64>>,
}

impl DeviceCurves {
    pub fn zeros(topology: &Topology, len: usize) -> Self {
        Self {
            load_p: vec![vec![0.0; len]; topology.loads.len()],
            load_q: vec![vec![0.0; len]; topology.loads.len()],
            pv_p: vec![vec![0.0; len]; topology.pvs.len()],
        }
    }

    /// Injections for slot `t`. Slots past the end of a curve read as zero.
    pub fn snapshot(&self, topology: &Topology, t: usize) -> Injections {
        let at = |curves: &[Vec<f64>]| curves.iter().map(|c| c.get(t).copied().unwrap_or(0.0)).collect();
        Injections {
            load_p: at(&self.load_p),
            load_q: at(&self.load_q),
            pv_p: at(&self.pv_p),
            ..Injections::at_rest(topology, t)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Asset, AssetKind, Attributes};
    use crate::topology::{BatteryModel, ElementRecord, TopologyBuilder, TopologyRecords};

    fn topology() -> Topology {
        let rec = |id, attributes| ElementRecord { id, name: format!("r{id}"), attributes };
        let records = TopologyRecords {
            buses: vec![rec(1, Attributes::new().with("vn_kv", 0.4))],
            shunts: vec![rec(5, Attributes::new().with("bus", 1).with("q_mvar", 0.2).with("p_mw", 0.01))],
            external_grids: vec![rec(
                9,
                Attributes::new()
                    .with("bus", 1)
                    .with("min_p_mw", -10.0)
                    .with("max_p_mw", 10.0)
                    .with("min_q_mvar", -10.0)
                    .with("max_q_mvar", 10.0),
            )],
            loads: vec![Asset {
                id: 3,
                name: "load".into(),
                kind: AssetKind::Load,
                attributes: Attributes::new().with("bus", 1),
                sensors: vec![],
            }],
            pvs: vec![Asset {
                id: 4,
                name: "pv".into(),
                kind: AssetKind::Pv,
                attributes: Attributes::new().with("bus", 1),
                sensors: vec![],
            }],
            ..Default::default()
        };
        TopologyBuilder::new(BatteryModel::Generator).build(&records).unwrap()
    }

    #[test]
    fn test_snapshot_reads_slot_and_nets_pv() {
        let topology = topology();
        let curves = DeviceCurves {
            load_p: vec![vec![1.0, 2.0]],
            load_q: vec![vec![0.1, 0.3]],
            pv_p: vec![vec![0.5, 0.5]],
        };
        let inj = curves.snapshot(&topology, 1);
        assert_eq!(inj.timestep, 1);
        assert_eq!(inj.load_p, vec![2.0]);
        let demand = inj.fixed_demand_mw(&topology);
        assert!((demand[0] - 1.51).abs() < 1e-12);
        assert!((inj.reactive_demand_mvar(&topology) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_validate_rejects_wrong_length() {
        let topology = topology();
        let mut inj = Injections::at_rest(&topology, 0);
        inj.load_p.push(1.0);
        let err = inj.validate(&topology).unwrap_err();
        assert_eq!(err.status, SolverStatus::InvalidModel);
    }

    #[test]
    fn test_validate_rejects_nan() {
        let topology = topology();
        let mut inj = Injections::at_rest(&topology, 0);
        inj.pv_p[0] = f64::NAN;
        assert!(inj.validate(&topology).is_err());
    }
}

//! Sequential storage and curtailable-load dispatch over the horizon.

use tracing::debug;

use super::price_discovery::{solve_horizon, HorizonSolve};
use super::{ProgressSink, SchedulingError};
use crate::optimizer::{dispatch_timestep, BatteryState, DispatchInput, DispatchWeights};
use crate::power_flow::{DeviceCurves, PowerFlowSolver, SolveMode};
use crate::topology::Topology;

/// Per-device series of a flexibility run, indexed `[device][timestep]`.
#[derive(Debug, Clone, PartialEq)]
pub struct FlexibilitySchedule {
    pub served: Vec<Vec<f64>>,
    /// Net storage power, positive when charging.
    pub storage_mw: Vec<Vec<f64>>,
    pub soc_percent: Vec<Vec<f64>>,
    /// Total dumped energy per timestep.
    pub dumped: Vec<f64>,
    pub prices: HorizonSolve,
}

impl FlexibilitySchedule {
    pub fn total_cost(&self) -> f64 {
        self.prices.total_cost()
    }
}

pub fn dispatch_horizon(
    solver: &dyn PowerFlowSolver,
    topology: &Topology,
    curves: &DeviceCurves,
    len: usize,
    dt_hours: f64,
    weights: &DispatchWeights,
    progress: &dyn ProgressSink,
) -> Result<FlexibilitySchedule, SchedulingError> {
    let prices = solve_horizon(solver, topology, curves, len, SolveMode::OptimalPowerFlow)?;
    progress.report("flexibility prices", len, len);

    let mut batteries: Vec<BatteryState> = topology
        .storages
        .iter()
        .map(|s| BatteryState::from_storage(&s.params, weights.soc_ceiling))
        .collect();

    let mut served = vec![Vec::with_capacity(len); topology.loads.len()];
    let mut storage_mw = vec![Vec::with_capacity(len); batteries.len()];
    let mut soc_percent = vec![Vec::with_capacity(len); batteries.len()];
    let mut dumped = Vec::with_capacity(len);

    for (t, result) in prices.results.iter().enumerate() {
        let load_max: Vec<f64> = curves.load_p.iter().map(|c| c[t]).collect();
        let load_price: Vec<f64> = topology.loads.iter().map(|l| result.lambda_p(l.bus)).collect();
        let generation: Vec<f64> = curves.pv_p.iter().map(|c| c[t]).collect();
        for (battery, storage) in batteries.iter_mut().zip(&topology.storages) {
            battery.price = result.lambda_p(storage.bus);
        }

        let input = DispatchInput {
            load_max: &load_max,
            load_price: &load_price,
            generation: &generation,
            batteries: &batteries,
            dt_hours,
        };
        let outcome =
            dispatch_timestep(&input, weights).map_err(|source| SchedulingError::Dispatch { timestep: t, source })?;

        for (series, value) in served.iter_mut().zip(&outcome.served) {
            series.push(*value);
        }
        for (series, value) in storage_mw.iter_mut().zip(outcome.net_battery_mw()) {
            series.push(value);
        }
        for ((series, battery), soc) in soc_percent.iter_mut().zip(batteries.iter_mut()).zip(&outcome.soc_percent) {
            series.push(*soc);
            battery.soc_percent = *soc;
        }
        let dump: f64 = outcome.dumped.iter().sum();
        debug!(timestep = t, dumped = dump, "dispatched timestep");
        dumped.push(dump);
        progress.report("flexibility dispatch", t + 1, len);
    }

    Ok(FlexibilitySchedule {
        served,
        storage_mw,
        soc_percent,
        dumped,
        prices,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Asset, AssetKind, Attributes};
    use crate::power_flow::{BusResult, DispatchResult, MockPowerFlowSolver, SolverFailure, SolverStatus};
    use crate::scheduler::NoopProgress;
    use crate::topology::{BatteryModel, ElementRecord, TopologyBuilder, TopologyRecords};

    fn topology() -> Topology {
        let records = TopologyRecords {
            buses: vec![ElementRecord {
                id: 1,
                name: "bus".into(),
                attributes: Attributes::new().with("vn_kv", 0.4),
            }],
            external_grids: vec![ElementRecord {
                id: 2,
                name: "grid".into(),
                attributes: Attributes::new()
                    .with("bus", 1)
                    .with("min_p_mw", -10.0)
                    .with("max_p_mw", 10.0)
                    .with("min_q_mvar", -10.0)
                    .with("max_q_mvar", 10.0),
            }],
            batteries: vec![Asset {
                id: 41,
                name: "battery".into(),
                kind: AssetKind::Battery,
                attributes: Attributes::new()
                    .with("bus", 1)
                    .with("p_mw", 0.0)
                    .with("min_p_mw", -2.0)
                    .with("max_p_mw", 2.0)
                    .with("min_q_mvar", -1.0)
                    .with("max_q_mvar", 1.0)
                    .with("max_e_mwh", 10.0)
                    .with("min_e_mwh", 1.0)
                    .with("soc_percent", 50.0),
                sensors: vec![],
            }],
            loads: vec![Asset {
                id: 7,
                name: "load".into(),
                kind: AssetKind::Load,
                attributes: Attributes::new().with("bus", 1).with("type", "Modulatable"),
                sensors: vec![],
            }],
            pvs: vec![Asset {
                id: 9,
                name: "pv".into(),
                kind: AssetKind::Pv,
                attributes: Attributes::new().with("bus", 1),
                sensors: vec![],
            }],
            ..Default::default()
        };
        TopologyBuilder::new(BatteryModel::Storage).build(&records).unwrap()
    }

    fn flat_price(price: f64) -> MockPowerFlowSolver {
        let mut solver = MockPowerFlowSolver::new();
        solver.expect_solve().returning(move |topology: &Topology, _inj, _mode| {
            Ok(DispatchResult {
                buses: topology
                    .buses
                    .iter()
                    .map(|b| BusResult {
                        bus_id: b.id,
                        vm_pu: 1.0,
                        va_degree: 0.0,
                        lambda_p: Some(price),
                        lambda_q: Some(0.0),
                    })
                    .collect(),
                generators: vec![],
                external_grids: vec![],
                branches: vec![],
                cost: 0.0,
            })
        });
        solver
    }

    #[test]
    fn test_surplus_charges_and_soc_carries_over() {
        let topology = topology();
        let mut curves = DeviceCurves::zeros(&topology, 2);
        curves.load_p[0] = vec![1.0, 1.0];
        curves.pv_p[0] = vec![2.0, 2.0];

        let schedule = dispatch_horizon(
            &flat_price(10.0),
            &topology,
            &curves,
            2,
            1.0,
            &DispatchWeights::default(),
            &NoopProgress,
        )
        .unwrap();

        assert_eq!(schedule.served[0].len(), 2);
        for t in 0..2 {
            assert!((schedule.served[0][t] - 1.0).abs() < 1e-6);
            assert!((schedule.storage_mw[0][t] - 1.0).abs() < 1e-6);
            assert!(schedule.dumped[t].abs() < 1e-6);
        }
        // 1 MWh into a 10 MWh unit per hour: 50% -> 60% -> 70%
        assert!((schedule.soc_percent[0][0] - 60.0).abs() < 1e-6);
        assert!((schedule.soc_percent[0][1] - 70.0).abs() < 1e-6);
    }

    #[test]
    fn test_price_failure_aborts_before_dispatch() {
        let topology = topology();
        let curves = DeviceCurves::zeros(&topology, 3);
        let mut solver = MockPowerFlowSolver::new();
        solver
            .expect_solve()
            .returning(|_, _, _| Err(SolverFailure::new(SolverStatus::Numerical, "diverged")));

        let err = dispatch_horizon(
            &solver,
            &topology,
            &curves,
            3,
            1.0,
            &DispatchWeights::default(),
            &NoopProgress,
        )
        .unwrap_err();
        assert_eq!(err.timestep(), Some(0));
    }
}

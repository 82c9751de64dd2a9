//! Price-Discovery Loop.
//!
//! `solve_horizon` runs one network solve per timestep, each on a fresh
//! `Injections` snapshot, and aborts on the first failure. `schedule_loads`
//! repeats that pass per flexible load and reschedules the load against the
//! prices at its bus until no curve moves or the iteration cap is reached.

use tracing::{debug, info};

use super::{ProgressSink, SchedulingError};
use crate::optimizer::{reschedule, ModulationLimits};
use crate::power_flow::{DeviceCurves, DispatchResult, PowerFlowSolver, SolveMode};
use crate::topology::{BusIndex, Topology};

/// Curves closer than this are the same curve.
const CURVE_TOLERANCE: f64 = 1e-9;

/// Per-timestep results of one pass over the horizon.
#[derive(Debug, Clone, PartialEq)]
pub struct HorizonSolve {
    pub results: Vec<DispatchResult>,
}

impl HorizonSolve {
    pub fn total_cost(&self) -> f64 {
        self.results.iter().map(|r| r.cost).sum()
    }

    pub fn lambda_p(&self, bus: BusIndex) -> Vec<f64> {
        self.results.iter().map(|r| r.lambda_p(bus)).collect()
    }

    pub fn lambda_q(&self, bus: BusIndex) -> Vec<f64> {
        self.results.iter().map(|r| r.lambda_q(bus)).collect()
    }

    /// Active and reactive output series of generator `index`.
    pub fn generator_series(&self, index: usize) -> (Vec<f64>, Vec<f64>) {
        self.results
            .iter()
            .map(|r| r.generators.get(index).map_or((0.0, 0.0), |d| (d.p_mw, d.q_mvar)))
            .unzip()
    }

    pub fn external_grid_series(&self, index: usize) -> (Vec<f64>, Vec<f64>) {
        self.results
            .iter()
            .map(|r| r.external_grids.get(index).map_or((0.0, 0.0), |d| (d.p_mw, d.q_mvar)))
            .unzip()
    }
}

pub fn solve_horizon(
    solver: &dyn PowerFlowSolver,
    topology: &Topology,
    curves: &DeviceCurves,
    len: usize,
    mode: SolveMode,
) -> Result<HorizonSolve, SchedulingError> {
    let mut results = Vec::with_capacity(len);
    for t in 0..len {
        let injections = curves.snapshot(topology, t);
        let result = solver
            .solve(topology, &injections, mode)
            .map_err(|source| SchedulingError::Solver { timestep: t, source })?;
        results.push(result);
    }
    Ok(HorizonSolve { results })
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadSchedule {
    pub curves: DeviceCurves,
    /// Outer iterations actually run.
    pub iterations: usize,
    /// Horizon cost of the baseline, then of the curves left by each iteration.
    pub costs: Vec<f64>,
}

fn same_curve(a: &[f64], b: &[f64]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() <= CURVE_TOLERANCE)
}

pub fn schedule_loads(
    solver: &dyn PowerFlowSolver,
    topology: &Topology,
    baseline: DeviceCurves,
    len: usize,
    max_iterations: usize,
    limits: &ModulationLimits,
    progress: &dyn ProgressSink,
) -> Result<LoadSchedule, SchedulingError> {
    let mut curves = baseline;
    let mut current = solve_horizon(solver, topology, &curves, len, SolveMode::OptimalPowerFlow)?;
    let mut costs = vec![current.total_cost()];
    let mut iterations = 0;

    while iterations < max_iterations {
        iterations += 1;
        let mut moved = false;
        // `current` no longer matches `curves`
        let mut stale = false;

        for (l, load) in topology.loads.iter().enumerate() {
            if !load.archetype.is_flexible() {
                continue;
            }
            if stale {
                current = solve_horizon(solver, topology, &curves, len, SolveMode::OptimalPowerFlow)?;
                stale = false;
            }

            let reschedule_with = |prices: &[f64], curve: &[f64]| {
                reschedule(load.archetype, prices, curve, limits).map_err(|source| SchedulingError::Reschedule {
                    asset: load.asset_id,
                    source,
                })
            };
            let p = reschedule_with(&current.lambda_p(load.bus), &curves.load_p[l])?;
            let q = reschedule_with(&current.lambda_q(load.bus), &curves.load_q[l])?;

            if !same_curve(&p, &curves.load_p[l]) || !same_curve(&q, &curves.load_q[l]) {
                moved = true;
                stale = true;
            }
            curves.load_p[l] = p;
            curves.load_q[l] = q;
        }

        if stale {
            current = solve_horizon(solver, topology, &curves, len, SolveMode::OptimalPowerFlow)?;
        }
        let cost = current.total_cost();
        costs.push(cost);
        progress.report("load scheduling", iterations, max_iterations);
        debug!(iteration = iterations, cost, moved, "load scheduling iteration");
        if !moved {
            info!(iterations, "load curves reached a fixed point");
            break;
        }
    }

    Ok(LoadSchedule {
        curves,
        iterations,
        costs,
    })
}

//! Linearised (DC) optimal power flow on `good_lp`.
//!
//! Active power only: bus angles, branch flows `(θi − θj)·base / x`, and one
//! balance row per bus. Convex quadratic costs are split into secant segments
//! so the problem stays linear. Nodal prices are the marginal cost of a small
//! demand probe at each bus.

use good_lp::{
    constraint, default_solver, variable, Expression, ProblemVariables, ResolutionError, Solution,
    SolverModel, Variable,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::*;
use crate::topology::{Branch, PolyCost};

/// Bound on variables that are unconstrained in the network model.
const FREE_BOUND: f64 = 1e6;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DcOpfSettings {
    /// Secant segments per quadratic cost curve.
    pub cost_segments: usize,
    /// Extra demand used to read the marginal price at a bus.
    pub price_probe_mw: f64,
    /// Price reported when the probe cannot be served.
    pub price_cap: f64,
}

impl Default for DcOpfSettings {
    fn default() -> Self {
        Self {
            cost_segments: 4,
            price_probe_mw: 1e-3,
            price_cap: 1e4,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DcOpfSolver {
    settings: DcOpfSettings,
}

/// A source as it enters one LP.
enum SourceVar {
    Fixed(f64),
    Free(Variable),
    Segmented { base: f64, segments: Vec<(Variable, f64)> },
}

impl SourceVar {
    fn expression(&self) -> Expression {
        match self {
            SourceVar::Fixed(p) => Expression::from(*p),
            SourceVar::Free(v) => Expression::from(*v),
            SourceVar::Segmented { base, segments } => segments
                .iter()
                .fold(Expression::from(*base), |acc, (v, _)| acc + *v),
        }
    }

    fn objective(&self) -> Expression {
        match self {
            SourceVar::Segmented { segments, .. } => {
                segments.iter().map(|(v, slope)| *slope * *v).sum::<Expression>()
            }
            _ => Expression::from(0.0),
        }
    }

    fn value(&self, solution: &impl Solution) -> f64 {
        match self {
            SourceVar::Fixed(p) => *p,
            SourceVar::Free(v) => solution.value(*v),
            SourceVar::Segmented { base, segments } => {
                base + segments.iter().map(|(v, _)| solution.value(*v)).sum::<f64>()
            }
        }
    }

    fn lp_cost(&self, solution: &impl Solution) -> f64 {
        match self {
            SourceVar::Segmented { segments, .. } => {
                segments.iter().map(|(v, slope)| slope * solution.value(*v)).sum()
            }
            _ => 0.0,
        }
    }
}

/// Primal values of one solved LP.
struct Solved {
    theta: Vec<f64>,
    ext_p: Vec<f64>,
    gen_p: Vec<f64>,
    lp_cost: f64,
}

impl DcOpfSolver {
    pub fn new(settings: DcOpfSettings) -> Self {
        Self { settings }
    }

    fn segmented(&self, vars: &mut ProblemVariables, min: f64, max: f64, cost: &PolyCost) -> SourceVar {
        let span = max - min;
        if span <= 0.0 {
            return SourceVar::Fixed(min);
        }
        let n = if cost.cp2 > 0.0 {
            self.settings.cost_segments.max(1)
        } else {
            1
        };
        let width = span / n as f64;
        let segments = (0..n)
            .map(|k| {
                let a = min + width * k as f64;
                (vars.add(variable().min(0.0).max(width)), cost.segment_slope(a, width))
            })
            .collect();
        SourceVar::Segmented { base: min, segments }
    }

    fn solve_once(
        &self,
        topology: &Topology,
        branches: &[Branch],
        injections: &Injections,
        mode: SolveMode,
        probe: Option<(BusIndex, f64)>,
    ) -> Result<Solved, SolverFailure> {
        let n = topology.buses.len();
        let reference = topology
            .slack_buses()
            .first()
            .copied()
            .ok_or_else(|| SolverFailure::new(SolverStatus::InvalidModel, "network has no slack bus"))?;

        let mut demand = injections.fixed_demand_mw(topology);
        if let Some((bus, delta)) = probe {
            demand[bus] += delta;
        }

        let mut vars = ProblemVariables::new();
        let theta: Vec<Option<Variable>> = (0..n)
            .map(|i| (i != reference).then(|| vars.add(variable().min(-FREE_BOUND).max(FREE_BOUND))))
            .collect();

        let mut ext = Vec::with_capacity(topology.external_grids.len());
        for eg in &topology.external_grids {
            ext.push(match mode {
                SolveMode::PowerFlow => SourceVar::Free(vars.add(variable().min(-FREE_BOUND).max(FREE_BOUND))),
                SolveMode::OptimalPowerFlow => {
                    self.segmented(&mut vars, eg.params.min_p_mw, eg.params.max_p_mw, &eg.params.cost)
                }
            });
        }
        let mut gens = Vec::with_capacity(topology.generators.len());
        for (gen, &setpoint) in topology.generators.iter().zip(&injections.generator_p) {
            gens.push(match mode {
                SolveMode::PowerFlow if gen.params.slack => {
                    SourceVar::Free(vars.add(variable().min(-FREE_BOUND).max(FREE_BOUND)))
                }
                SolveMode::PowerFlow => SourceVar::Fixed(setpoint),
                SolveMode::OptimalPowerFlow => {
                    self.segmented(&mut vars, gen.params.min_p_mw, gen.params.max_p_mw, &gen.params.cost)
                }
            });
        }

        let objective: Expression = ext.iter().chain(&gens).map(SourceVar::objective).sum();

        let angle = |i: BusIndex| theta[i].map(Expression::from).unwrap_or_else(|| Expression::from(0.0));
        let flows: Vec<Expression> = branches
            .iter()
            .map(|b| (angle(b.from) - angle(b.to)) * (topology.base_mva / b.x_pu))
            .collect();

        let mut supply = vec![Expression::from(0.0); n];
        for (eg, source) in topology.external_grids.iter().zip(&ext) {
            supply[eg.bus] += source.expression();
        }
        for (gen, source) in topology.generators.iter().zip(&gens) {
            supply[gen.bus] += source.expression();
        }
        let mut outflow = vec![Expression::from(0.0); n];
        for (branch, flow) in branches.iter().zip(&flows) {
            outflow[branch.from] += flow.clone();
            outflow[branch.to] -= flow.clone();
        }

        let mut problem = vars.minimise(objective).using(default_solver);
        for i in 0..n {
            let balance = supply[i].clone() - outflow[i].clone();
            problem = problem.with(constraint!(balance == demand[i]));
        }
        if mode == SolveMode::OptimalPowerFlow {
            for (branch, flow) in branches.iter().zip(&flows) {
                let limit = branch.rating_mw;
                problem = problem.with(constraint!(flow.clone() <= limit));
                problem = problem.with(constraint!(flow.clone() >= -limit));
            }
        }

        let solution = problem.solve().map_err(resolution_failure)?;

        Ok(Solved {
            theta: theta
                .iter()
                .map(|v| v.map(|v| solution.value(v)).unwrap_or(0.0))
                .collect(),
            ext_p: ext.iter().map(|s| s.value(&solution)).collect(),
            gen_p: gens.iter().map(|s| s.value(&solution)).collect(),
            lp_cost: ext.iter().chain(&gens).map(|s| s.lp_cost(&solution)).sum(),
        })
    }

    fn nodal_prices(
        &self,
        topology: &Topology,
        branches: &[Branch],
        injections: &Injections,
        base: &Solved,
    ) -> Result<Vec<f64>, SolverFailure> {
        let probe = self.settings.price_probe_mw;
        (0..topology.buses.len())
            .map(|bus| {
                match self.solve_once(topology, branches, injections, SolveMode::OptimalPowerFlow, Some((bus, probe))) {
                    Ok(probed) => Ok((probed.lp_cost - base.lp_cost) / probe),
                    Err(failure) if failure.status == SolverStatus::Infeasible => {
                        trace!(bus, "price probe infeasible, reporting cap");
                        Ok(self.settings.price_cap)
                    }
                    Err(failure) => Err(failure),
                }
            })
            .collect()
    }
}

fn resolution_failure(err: ResolutionError) -> SolverFailure {
    match err {
        ResolutionError::Infeasible => {
            SolverFailure::new(SolverStatus::Infeasible, "no dispatch satisfies balance and limits")
        }
        ResolutionError::Unbounded => SolverFailure::new(SolverStatus::Unbounded, "objective is unbounded"),
        other => SolverFailure::new(SolverStatus::Numerical, other.to_string()),
    }
}

impl PowerFlowSolver for DcOpfSolver {
    fn solve(
        &self,
        topology: &Topology,
        injections: &Injections,
        mode: SolveMode,
    ) -> Result<DispatchResult, SolverFailure> {
        injections.validate(topology)?;
        let branches = topology.branches();
        let solved = self.solve_once(topology, &branches, injections, mode, None)?;
        let prices = match mode {
            SolveMode::OptimalPowerFlow => Some(self.nodal_prices(topology, &branches, injections, &solved)?),
            SolveMode::PowerFlow => None,
        };

        let buses = topology
            .buses
            .iter()
            .enumerate()
            .map(|(i, bus)| BusResult {
                bus_id: bus.id,
                vm_pu: topology
                    .external_grids
                    .iter()
                    .find(|eg| eg.bus == i)
                    .map(|eg| eg.params.vm_pu)
                    .unwrap_or(1.0),
                va_degree: solved.theta[i].to_degrees(),
                lambda_p: prices.as_ref().map(|p| p[i]),
                lambda_q: prices.as_ref().map(|_| 0.0),
            })
            .collect();

        let mut external_grids: Vec<DeviceDispatch> = solved
            .ext_p
            .iter()
            .map(|&p_mw| DeviceDispatch { p_mw, q_mvar: 0.0 })
            .collect();
        let mut generators: Vec<DeviceDispatch> = solved
            .gen_p
            .iter()
            .map(|&p_mw| DeviceDispatch { p_mw, q_mvar: 0.0 })
            .collect();
        let reactive = injections.reactive_demand_mvar(topology);
        if let Some(first) = external_grids.first_mut() {
            first.q_mvar = reactive;
        } else if let Some(i) = topology.generators.iter().position(|g| g.params.slack) {
            generators[i].q_mvar = reactive;
        }

        let flows = branches
            .iter()
            .map(|b| {
                let p = (solved.theta[b.from] - solved.theta[b.to]) * topology.base_mva / b.x_pu;
                BranchFlow {
                    id: b.id,
                    kind: b.kind,
                    p_from_mw: p,
                    loading_percent: p.abs() / b.rating_mw * 100.0,
                }
            })
            .collect();

        let cost = topology
            .external_grids
            .iter()
            .zip(&external_grids)
            .map(|(eg, d)| eg.params.cost.active(d.p_mw))
            .chain(
                topology
                    .generators
                    .iter()
                    .zip(&generators)
                    .map(|(g, d)| g.params.cost.active(d.p_mw)),
            )
            .sum();

        debug!(timestep = injections.timestep, ?mode, cost, "dc network solve complete");

        Ok(DispatchResult {
            buses,
            generators,
            external_grids,
            branches: flows,
            cost,
        })
    }
}

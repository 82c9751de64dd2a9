//! Battery/Flexibility Dispatch Engine: one timestep of joint storage and
//! curtailable-load dispatch.
//!
//! Minimises
//! `p_load·ℓ + p_bat·(a3·charge + discharge) + a1·Σ(ℓ_max − ℓ) + a2·p_bat·dumped`
//! subject to the global balance `Σg + Σdischarge = Σℓ + Σcharge + Σdumped`,
//! `0 ≤ ℓ ≤ ℓ_max`, power limits and SOC bounds. The weights are multiples of
//! the price scale, so serving load dominates avoiding dumps, which dominates
//! cycling cost.

use good_lp::{constraint, default_solver, variable, Expression, ProblemVariables, Solution, SolverModel};
use serde::{Deserialize, Serialize};

use super::{price_scale, DispatchWeights, OptimizationError, Subproblem};
use crate::topology::StorageParams;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatteryState {
    pub charge_max_mw: f64,
    pub discharge_max_mw: f64,
    pub soc_min_percent: f64,
    pub soc_max_percent: f64,
    pub soc_percent: f64,
    pub e_nominal_mwh: f64,
    /// Price at the battery's bus for this timestep.
    pub price: f64,
}

impl BatteryState {
    pub fn from_storage(params: &StorageParams, soc_ceiling: f64) -> Self {
        Self {
            charge_max_mw: params.max_p_mw,
            discharge_max_mw: -params.min_p_mw,
            soc_min_percent: params.soc_min_percent(),
            soc_max_percent: params.soc_max_percent(soc_ceiling),
            soc_percent: params.soc_percent,
            e_nominal_mwh: params.max_e_mwh,
            price: 0.0,
        }
    }

    fn energy_mwh(&self, percent: f64) -> f64 {
        self.e_nominal_mwh * percent / 100.0
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DispatchInput<'a> {
    /// Per-load ceiling `ℓ_max`.
    pub load_max: &'a [f64],
    /// Price at each load's bus.
    pub load_price: &'a [f64],
    pub generation: &'a [f64],
    pub batteries: &'a [BatteryState],
    pub dt_hours: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchOutcome {
    pub served: Vec<f64>,
    pub charge: Vec<f64>,
    pub discharge: Vec<f64>,
    pub soc_percent: Vec<f64>,
    /// One entry per battery, or a single system slack when there is none.
    pub dumped: Vec<f64>,
}

impl DispatchOutcome {
    /// `Σg + Σdischarge − Σcharge − Σdumped − Σserved`, zero for a balanced solution.
    pub fn balance_residual(&self, generation: &[f64]) -> f64 {
        let sum = |v: &[f64]| v.iter().sum::<f64>();
        sum(generation) + sum(&self.discharge) - sum(&self.charge) - sum(&self.dumped) - sum(&self.served)
    }

    /// Net battery power, positive when charging.
    pub fn net_battery_mw(&self) -> Vec<f64> {
        self.charge.iter().zip(&self.discharge).map(|(c, d)| c - d).collect()
    }
}

pub fn dispatch_timestep(
    input: &DispatchInput<'_>,
    weights: &DispatchWeights,
) -> Result<DispatchOutcome, OptimizationError> {
    if input.load_max.len() != input.load_price.len() {
        return Err(OptimizationError::LengthMismatch {
            prices: input.load_price.len(),
            curve: input.load_max.len(),
        });
    }
    for (i, battery) in input.batteries.iter().enumerate() {
        if battery.soc_min_percent > battery.soc_max_percent {
            return Err(OptimizationError::Infeasible {
                problem: Subproblem::Dispatch,
                reason: format!(
                    "battery {i}: SOC floor {:.1}% above ceiling {:.1}%",
                    battery.soc_min_percent, battery.soc_max_percent
                ),
            });
        }
    }

    let scale = price_scale(input.load_price.iter().chain(input.batteries.iter().map(|b| &b.price)));
    let (a1, a2, a3) = (weights.unserved * scale, weights.dumped * scale, weights.cycling * scale);
    let dt = input.dt_hours;

    let mut vars = ProblemVariables::new();
    let served: Vec<_> = input
        .load_max
        .iter()
        .map(|&max| vars.add(variable().min(0.0).max(max)))
        .collect();
    let charge: Vec<_> = input
        .batteries
        .iter()
        .map(|b| vars.add(variable().min(0.0).max(b.charge_max_mw)))
        .collect();
    let discharge: Vec<_> = input
        .batteries
        .iter()
        .map(|b| vars.add(variable().min(0.0).max(b.discharge_max_mw)))
        .collect();
    let dump_prices: Vec<f64> = if input.batteries.is_empty() {
        vec![scale]
    } else {
        input.batteries.iter().map(|b| b.price).collect()
    };
    let dumped = vars.add_vector(variable().min(0.0), dump_prices.len());

    let load_cost: Expression = served
        .iter()
        .zip(input.load_price)
        .map(|(&l, &p)| p * l)
        .sum();
    let battery_cost: Expression = input
        .batteries
        .iter()
        .enumerate()
        .map(|(i, b)| b.price * a3 * charge[i] + b.price * discharge[i])
        .sum();
    let unserved: Expression = served
        .iter()
        .zip(input.load_max)
        .map(|(&l, &max)| Expression::from(a1 * max) - a1 * l)
        .sum();
    let dump_cost: Expression = dumped
        .iter()
        .zip(&dump_prices)
        .map(|(&d, &p)| a2 * p * d)
        .sum();

    let supply: Expression = discharge.iter().copied().sum::<Expression>() + input.generation.iter().sum::<f64>();
    let sinks: Expression = served.iter().copied().sum::<Expression>()
        + charge.iter().copied().sum::<Expression>()
        + dumped.iter().copied().sum::<Expression>();

    let mut problem = vars
        .minimise(load_cost + battery_cost + unserved + dump_cost)
        .using(default_solver)
        .with(constraint!(supply == sinks));
    for (i, battery) in input.batteries.iter().enumerate() {
        let stored = battery.energy_mwh(battery.soc_percent);
        let after = (charge[i] - discharge[i]) * dt + stored;
        problem = problem
            .with(constraint!(after.clone() >= battery.energy_mwh(battery.soc_min_percent)))
            .with(constraint!(after <= battery.energy_mwh(battery.soc_max_percent)));
    }

    let solution = problem.solve().map_err(|e| {
        OptimizationError::from_resolution(Subproblem::Dispatch, e, "balance and SOC bounds cannot both hold")
    })?;

    let charge: Vec<f64> = charge.iter().map(|v| solution.value(*v)).collect();
    let discharge: Vec<f64> = discharge.iter().map(|v| solution.value(*v)).collect();
    let soc_percent = input
        .batteries
        .iter()
        .enumerate()
        .map(|(i, b)| {
            let energy = b.energy_mwh(b.soc_percent) + (charge[i] - discharge[i]) * dt;
            (energy / b.e_nominal_mwh * 100.0).clamp(b.soc_min_percent, b.soc_max_percent)
        })
        .collect();

    Ok(DispatchOutcome {
        served: served.iter().map(|v| solution.value(*v)).collect(),
        charge,
        discharge,
        soc_percent,
        dumped: dumped.iter().map(|v| solution.value(*v)).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn battery(soc: f64) -> BatteryState {
        BatteryState {
            charge_max_mw: 2.0,
            discharge_max_mw: 3.0,
            soc_min_percent: 10.0,
            soc_max_percent: 90.0,
            soc_percent: soc,
            e_nominal_mwh: 10.0,
            price: 10.0,
        }
    }

    fn run(load_max: &[f64], generation: &[f64], batteries: &[BatteryState]) -> DispatchOutcome {
        let prices = vec![10.0; load_max.len()];
        let input = DispatchInput {
            load_max,
            load_price: &prices,
            generation,
            batteries,
            dt_hours: 1.0,
        };
        let outcome = dispatch_timestep(&input, &DispatchWeights::default()).unwrap();
        assert!(outcome.balance_residual(generation).abs() < 1e-6);
        outcome
    }

    #[test]
    fn test_serves_what_generation_allows() {
        let outcome = run(&[5.0], &[3.0], &[]);
        assert!((outcome.served[0] - 3.0).abs() < 1e-6);
        assert!(outcome.dumped[0].abs() < 1e-6);
    }

    #[test]
    fn test_excess_generation_is_dumped_without_storage() {
        let outcome = run(&[5.0], &[8.0], &[]);
        assert!((outcome.served[0] - 5.0).abs() < 1e-6);
        assert!((outcome.dumped[0] - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_battery_absorbs_excess_before_dumping() {
        let outcome = run(&[5.0], &[8.0], &[battery(50.0)]);
        assert!((outcome.charge[0] - 2.0).abs() < 1e-6);
        assert!((outcome.dumped[0] - 1.0).abs() < 1e-6);
        assert!((outcome.soc_percent[0] - 70.0).abs() < 1e-6);
        assert_eq!(outcome.net_battery_mw().len(), 1);
    }

    #[test]
    fn test_battery_discharges_to_serve_load() {
        let outcome = run(&[4.0], &[0.0], &[battery(50.0)]);
        assert!((outcome.discharge[0] - 3.0).abs() < 1e-6);
        assert!((outcome.served[0] - 3.0).abs() < 1e-6);
        assert!((outcome.soc_percent[0] - 20.0).abs() < 1e-6);
    }

    #[test]
    fn test_soc_floor_limits_discharge() {
        let outcome = run(&[4.0], &[0.0], &[battery(15.0)]);
        assert!((outcome.discharge[0] - 0.5).abs() < 1e-6);
        assert!((outcome.soc_percent[0] - 10.0).abs() < 1e-6);
    }

    #[test]
    fn test_inverted_soc_bounds_are_infeasible() {
        let mut b = battery(50.0);
        b.soc_min_percent = 95.0;
        let input = DispatchInput {
            load_max: &[],
            load_price: &[],
            generation: &[],
            batteries: &[b],
            dt_hours: 1.0,
        };
        let err = dispatch_timestep(&input, &DispatchWeights::default()).unwrap_err();
        assert!(matches!(err, OptimizationError::Infeasible { problem: Subproblem::Dispatch, .. }));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_dispatch_respects_bounds_and_balance(
            load_max in prop::collection::vec(0.0f64..10.0, 0..4),
            generation in prop::collection::vec(0.0f64..10.0, 0..3),
            socs in prop::collection::vec(10.0f64..90.0, 0..3),
            price in 1.0f64..100.0,
        ) {
            let batteries: Vec<_> = socs.iter().map(|&s| BatteryState { price, ..battery(s) }).collect();
            let prices = vec![price; load_max.len()];
            let input = DispatchInput {
                load_max: &load_max,
                load_price: &prices,
                generation: &generation,
                batteries: &batteries,
                dt_hours: 0.25,
            };
            let outcome = dispatch_timestep(&input, &DispatchWeights::default()).unwrap();

            prop_assert!(outcome.balance_residual(&generation).abs() < 1e-6 * (1.0 + generation.iter().sum::<f64>()));
            for (served, max) in outcome.served.iter().zip(&load_max) {
                prop_assert!(*served >= -1e-9 && *served <= max + 1e-9);
            }
            for (soc, b) in outcome.soc_percent.iter().zip(&batteries) {
                prop_assert!(*soc >= b.soc_min_percent && *soc <= b.soc_max_percent);
            }
        }
    }
}

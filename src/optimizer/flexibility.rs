//! Load Flexibility Engine.
//!
//! Re-shapes one load curve against the price series at its bus. Every
//! archetype keeps the total energy of the curve:
//!
//! - **Breakable**: the non-zero entries are reassigned to slots one-to-one
//!   (binary assignment), so the multiset of values is preserved.
//! - **Shiftable**: the whole curve is cyclically rotated; the cheapest rotation wins.
//! - **Modulatable**: a bounded continuous perturbation `Δℓ` with `Σ Δℓ = 0`.
//! - **Inflexible**: identity.
//!
//! A flat price series carries no signal: a curve that already satisfies its
//! archetype's constraints comes back unchanged.

use good_lp::{constraint, default_solver, variable, Expression, ProblemVariables, Solution, SolverModel, Variable};
use itertools::Itertools;
use ordered_float::OrderedFloat;
use tracing::trace;

use super::{price_scale, ModulationLimits, OptimizationError, Subproblem};
use crate::domain::LoadArchetype;

/// Relative weight of the displacement penalty that breaks cost ties.
const TIE_BREAK: f64 = 1e-6;

pub fn reschedule(
    archetype: LoadArchetype,
    prices: &[f64],
    baseline: &[f64],
    limits: &ModulationLimits,
) -> Result<Vec<f64>, OptimizationError> {
    if prices.len() != baseline.len() {
        return Err(OptimizationError::LengthMismatch {
            prices: prices.len(),
            curve: baseline.len(),
        });
    }
    let flat = is_flat(prices);
    let revised = match archetype {
        LoadArchetype::Inflexible => return Ok(baseline.to_vec()),
        LoadArchetype::Breakable if flat => return Ok(baseline.to_vec()),
        LoadArchetype::Breakable => breakable(prices, baseline)?,
        LoadArchetype::Shiftable => {
            check_non_negative(baseline)?;
            if flat {
                return Ok(baseline.to_vec());
            }
            shiftable(prices, baseline)
        }
        // A baseline inside the limits is already optimal under flat prices.
        LoadArchetype::Modulatable if flat && within(baseline, limits) => return Ok(baseline.to_vec()),
        LoadArchetype::Modulatable => modulatable(prices, baseline, limits)?,
    };
    trace!(%archetype, before = cost(prices, baseline), after = cost(prices, &revised), "curve rescheduled");
    Ok(revised)
}

/// Price-weighted energy `p · ℓ`.
pub fn cost(prices: &[f64], curve: &[f64]) -> f64 {
    prices.iter().zip(curve).map(|(p, l)| p * l).sum()
}

fn is_flat(prices: &[f64]) -> bool {
    prices.iter().tuple_windows().all(|(a, b)| a == b)
}

fn breakable(prices: &[f64], baseline: &[f64]) -> Result<Vec<f64>, OptimizationError> {
    let slots = baseline.len();
    let values: Vec<(usize, f64)> = baseline
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, v)| *v != 0.0)
        .collect();
    if values.is_empty() {
        return Ok(baseline.to_vec());
    }
    let eps = TIE_BREAK * price_scale(prices);

    // x[i][t] = 1 when value i is placed in slot t.
    let mut vars = ProblemVariables::new();
    let x: Vec<Vec<Variable>> = values
        .iter()
        .map(|_| vars.add_vector(variable().binary(), slots))
        .collect();

    let objective: Expression = values
        .iter()
        .zip(&x)
        .flat_map(|(&(origin, v), row)| {
            row.iter().enumerate().map(move |(t, &var)| {
                let displacement = t.abs_diff(origin) as f64 * v.abs();
                (prices[t] * v + eps * displacement) * var
            })
        })
        .sum();

    let mut problem = vars.minimise(objective).using(default_solver);
    for row in &x {
        let placed: Expression = row.iter().copied().sum();
        problem = problem.with(constraint!(placed == 1.0));
    }
    for t in 0..slots {
        let occupancy: Expression = x.iter().map(|row| row[t]).sum();
        problem = problem.with(constraint!(occupancy <= 1.0));
    }

    let solution = problem.solve().map_err(|e| {
        OptimizationError::from_resolution(Subproblem::Breakable, e, "values cannot be assigned to slots")
    })?;

    let mut revised = vec![0.0; slots];
    let mut taken = vec![false; slots];
    for (&(_, v), row) in values.iter().zip(&x) {
        let slot = row
            .iter()
            .position_max_by_key(|var| OrderedFloat(solution.value(**var)))
            .unwrap_or(0);
        if taken[slot] {
            return Err(OptimizationError::Solver {
                problem: Subproblem::Breakable,
                message: format!("slot {slot} assigned twice"),
            });
        }
        taken[slot] = true;
        revised[slot] = v;
    }
    Ok(revised)
}

/// `rotate(ℓ, k)[t] = ℓ[(t − k) mod T]`.
pub(crate) fn rotate(curve: &[f64], k: usize) -> Vec<f64> {
    let n = curve.len();
    (0..n).map(|t| curve[(t + n - k % n) % n]).collect()
}

/// The selector over `T` rotations has exactly one non-zero entry, so the
/// program reduces to the cheapest candidate; ties go to the smallest shift.
fn check_non_negative(baseline: &[f64]) -> Result<(), OptimizationError> {
    if baseline.iter().any(|v| *v < 0.0) {
        return Err(OptimizationError::Infeasible {
            problem: Subproblem::Shiftable,
            reason: "every rotation of a curve with negative entries is negative somewhere".into(),
        });
    }
    Ok(())
}

fn within(curve: &[f64], limits: &ModulationLimits) -> bool {
    curve
        .iter()
        .all(|v| (limits.min_power..=limits.max_power).contains(v))
}

fn shiftable(prices: &[f64], baseline: &[f64]) -> Vec<f64> {
    let best = (0..baseline.len())
        .map(|k| (k, cost(prices, &rotate(baseline, k))))
        .min_by_key(|&(k, c)| (OrderedFloat(c), k))
        .map(|(k, _)| k)
        .unwrap_or(0);
    rotate(baseline, best)
}

fn modulatable(prices: &[f64], baseline: &[f64], limits: &ModulationLimits) -> Result<Vec<f64>, OptimizationError> {
    let n = baseline.len();
    let eps = TIE_BREAK * price_scale(prices);

    // Δℓ = up − down, both bounded by the per-slot change limit.
    let mut vars = ProblemVariables::new();
    let up = vars.add_vector(variable().min(0.0).max(limits.max_change), n);
    let down = vars.add_vector(variable().min(0.0).max(limits.max_change), n);

    let objective: Expression = (0..n)
        .map(|t| prices[t] * (up[t] - down[t]) + eps * (up[t] + down[t]))
        .sum();

    let net: Expression = (0..n).map(|t| up[t] - down[t]).sum();
    let mut problem = vars.minimise(objective).using(default_solver).with(constraint!(net == 0.0));
    for t in 0..n {
        let level = up[t] - down[t] + baseline[t];
        problem = problem
            .with(constraint!(level.clone() >= limits.min_power))
            .with(constraint!(level <= limits.max_power));
    }

    let solution = problem.solve().map_err(|e| {
        OptimizationError::from_resolution(
            Subproblem::Modulatable,
            e,
            "curve cannot be brought inside the power limits with the allowed change",
        )
    })?;

    Ok((0..n)
        .map(|t| baseline[t] + solution.value(up[t]) - solution.value(down[t]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    fn limits() -> ModulationLimits {
        ModulationLimits::default()
    }

    fn sorted(v: &[f64]) -> Vec<OrderedFloat<f64>> {
        v.iter().copied().map(OrderedFloat).sorted().collect()
    }

    #[rstest]
    #[case(LoadArchetype::Inflexible)]
    #[case(LoadArchetype::Breakable)]
    #[case(LoadArchetype::Shiftable)]
    #[case(LoadArchetype::Modulatable)]
    fn test_flat_prices_keep_baseline(#[case] archetype: LoadArchetype) {
        let baseline = [10.0, 10.0, 10.0];
        let revised = reschedule(archetype, &[5.0, 5.0, 5.0], &baseline, &limits()).unwrap();
        assert_eq!(revised, baseline);
    }

    #[test]
    fn test_flat_prices_still_enforce_modulation_limits() {
        let revised = reschedule(LoadArchetype::Modulatable, &[5.0, 5.0], &[48.5, 10.0], &limits()).unwrap();
        assert!((revised[0] - 48.0).abs() < 1e-6);
        assert!((revised[1] - 10.5).abs() < 1e-6);
    }

    #[rstest]
    #[case(&[5.0, 5.0])]
    #[case(&[5.0, 6.0])]
    fn test_shiftable_rejects_negative_entries(#[case] prices: &[f64]) {
        let err = reschedule(LoadArchetype::Shiftable, prices, &[-1.0, 3.0], &limits()).unwrap_err();
        assert!(matches!(
            err,
            OptimizationError::Infeasible {
                problem: Subproblem::Shiftable,
                ..
            }
        ));
    }

    #[test]
    fn test_inflexible_is_identity_under_varying_prices() {
        let baseline = [3.0, 0.0, 7.0, 1.0];
        let revised = reschedule(LoadArchetype::Inflexible, &[9.0, 1.0, 4.0, 2.0], &baseline, &limits()).unwrap();
        assert_eq!(revised, baseline);
    }

    #[test]
    fn test_length_mismatch() {
        let err = reschedule(LoadArchetype::Breakable, &[1.0, 2.0], &[1.0], &limits()).unwrap_err();
        assert_eq!(err, OptimizationError::LengthMismatch { prices: 2, curve: 1 });
    }

    #[test]
    fn test_breakable_moves_largest_value_to_cheapest_slot() {
        let revised = reschedule(
            LoadArchetype::Breakable,
            &[5.0, 1.0, 3.0, 8.0],
            &[4.0, 0.0, 2.0, 0.0],
            &limits(),
        )
        .unwrap();
        assert_eq!(revised, vec![0.0, 4.0, 2.0, 0.0]);
    }

    #[test]
    fn test_shiftable_picks_cheapest_rotation() {
        // rotations: [0,0,10] cost 10, [10,0,0] cost 10, [0,10,0] cost 100
        let revised = reschedule(LoadArchetype::Shiftable, &[1.0, 10.0, 1.0], &[0.0, 0.0, 10.0], &limits()).unwrap();
        assert_eq!(revised, vec![0.0, 0.0, 10.0]);

        let revised = reschedule(LoadArchetype::Shiftable, &[1.0, 10.0, 5.0], &[0.0, 0.0, 10.0], &limits()).unwrap();
        assert_eq!(revised, vec![10.0, 0.0, 0.0]);
    }

    #[test]
    fn test_modulatable_shifts_energy_towards_cheap_slots() {
        let revised = reschedule(LoadArchetype::Modulatable, &[10.0, 1.0], &[5.0, 5.0], &limits()).unwrap();
        assert!((revised[0] - 4.0).abs() < 1e-6);
        assert!((revised[1] - 6.0).abs() < 1e-6);
    }

    #[test]
    fn test_modulatable_out_of_reach_is_infeasible() {
        // 60 MW baseline cannot get below the 48 MW ceiling with 1 MW of change.
        let err = reschedule(LoadArchetype::Modulatable, &[1.0, 2.0], &[60.0, 0.0], &limits()).unwrap_err();
        assert!(matches!(err, OptimizationError::Infeasible { problem: Subproblem::Modulatable, .. }));
    }

    #[test]
    fn test_rotate() {
        assert_eq!(rotate(&[1.0, 2.0, 3.0], 1), vec![3.0, 1.0, 2.0]);
        assert_eq!(rotate(&[1.0, 2.0, 3.0], 3), vec![1.0, 2.0, 3.0]);
    }

    fn curve_and_prices() -> impl Strategy<Value = (Vec<f64>, Vec<f64>)> {
        (1usize..7).prop_flat_map(|n| {
            (
                prop::collection::vec(prop_oneof![Just(0.0), 0.5f64..40.0], n),
                prop::collection::vec(0.0f64..100.0, n),
            )
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn prop_breakable_preserves_multiset((baseline, prices) in curve_and_prices()) {
            let revised = reschedule(LoadArchetype::Breakable, &prices, &baseline, &limits()).unwrap();
            prop_assert_eq!(sorted(&revised), sorted(&baseline));
            prop_assert!((revised.iter().sum::<f64>() - baseline.iter().sum::<f64>()).abs() < 1e-9);
            prop_assert!(cost(&prices, &revised) <= cost(&prices, &baseline) + 1e-6);
        }

        #[test]
        fn prop_shiftable_returns_a_rotation((baseline, prices) in curve_and_prices()) {
            let revised = reschedule(LoadArchetype::Shiftable, &prices, &baseline, &limits()).unwrap();
            prop_assert!((0..baseline.len()).any(|k| rotate(&baseline, k) == revised));
            prop_assert!((revised.iter().sum::<f64>() - baseline.iter().sum::<f64>()).abs() < 1e-9);
        }

        #[test]
        fn prop_modulatable_conserves_energy_within_limits((baseline, prices) in curve_and_prices()) {
            let l = limits();
            let revised = reschedule(LoadArchetype::Modulatable, &prices, &baseline, &l).unwrap();
            prop_assert!((revised.iter().sum::<f64>() - baseline.iter().sum::<f64>()).abs() < 1e-6);
            for (r, b) in revised.iter().zip(&baseline) {
                prop_assert!(*r >= l.min_power - 1e-6 && *r <= l.max_power + 1e-6);
                prop_assert!((r - b).abs() <= l.max_change + 1e-6);
            }
        }
    }
}

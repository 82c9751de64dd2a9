use serde::{Deserialize, Serialize};

/// Bounds for the modulatable archetype.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModulationLimits {
    pub min_power: f64,
    pub max_power: f64,
    /// Largest per-slot change `|Δℓ_t|`.
    pub max_change: f64,
}

impl Default for ModulationLimits {
    fn default() -> Self {
        Self {
            min_power: 0.0,
            max_power: 48.0,
            max_change: 1.0,
        }
    }
}

/// Penalty factors for the joint battery/load dispatch, as multiples of the
/// price scale. `unserved > dumped > cycling` fixes the priority order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DispatchWeights {
    pub unserved: f64,
    pub dumped: f64,
    pub cycling: f64,
    /// Upper SOC bound as a fraction of nominal energy.
    pub soc_ceiling: f64,
}

impl Default for DispatchWeights {
    fn default() -> Self {
        Self {
            unserved: 50.0,
            dumped: 40.0,
            cycling: 1.0,
            soc_ceiling: 0.9,
        }
    }
}

/// Magnitude used to scale penalties: the largest absolute price, or 1 when
/// every price is zero.
pub fn price_scale<'a>(prices: impl IntoIterator<Item = &'a f64>) -> f64 {
    let scale = prices.into_iter().fold(0.0_f64, |acc, p| acc.max(p.abs()));
    if scale > 0.0 {
        scale
    } else {
        1.0
    }
}

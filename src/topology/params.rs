//! Strongly typed per-role solver parameters.
//!
//! Each struct is parsed from an attribute map exactly once, at build time,
//! and reports the offending element and field on failure.

use serde::{Deserialize, Serialize};

use super::TopologyError;
use crate::domain::{AttributeIssue, Attributes, ResourceId};

/// Field reader bound to one element, for error reporting.
pub(crate) struct Fields<'a> {
    element: &'a str,
    attrs: &'a Attributes,
}

impl<'a> Fields<'a> {
    pub(crate) fn new(element: &'a str, attrs: &'a Attributes) -> Self {
        Self { element, attrs }
    }

    fn issue(&self, field: &'static str, issue: AttributeIssue) -> TopologyError {
        let element = self.element.to_string();
        match issue {
            AttributeIssue::Missing => TopologyError::MissingAttribute { element, field },
            AttributeIssue::NotNumeric => TopologyError::NonNumeric { element, field },
            AttributeIssue::NotBoolean => TopologyError::NonBoolean { element, field },
        }
    }

    pub(crate) fn num(&self, field: &'static str) -> Result<f64, TopologyError> {
        self.attrs.number(field).map_err(|e| self.issue(field, e))
    }

    pub(crate) fn num_or(&self, field: &'static str, default: f64) -> Result<f64, TopologyError> {
        self.attrs.number_or(field, default).map_err(|e| self.issue(field, e))
    }

    pub(crate) fn opt(&self, field: &'static str) -> Result<Option<f64>, TopologyError> {
        match self.attrs.number(field) {
            Ok(v) => Ok(Some(v)),
            Err(AttributeIssue::Missing) => Ok(None),
            Err(e) => Err(self.issue(field, e)),
        }
    }

    pub(crate) fn id(&self, field: &'static str) -> Result<ResourceId, TopologyError> {
        self.attrs.id(field).map_err(|e| self.issue(field, e))
    }

    pub(crate) fn flag_or(&self, field: &'static str, default: bool) -> Result<bool, TopologyError> {
        self.attrs.flag_or(field, default).map_err(|e| self.issue(field, e))
    }

    fn positive(&self, field: &'static str) -> Result<f64, TopologyError> {
        let value = self.num(field)?;
        if value <= 0.0 {
            return Err(self.invalid(format!("`{field}` must be positive, got {value}")));
        }
        Ok(value)
    }

    pub(crate) fn invalid(&self, reason: String) -> TopologyError {
        TopologyError::InvalidValue {
            element: self.element.to_string(),
            reason,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BusParams {
    pub vn_kv: f64,
    pub min_vm_pu: Option<f64>,
    pub max_vm_pu: Option<f64>,
}

impl BusParams {
    pub(crate) fn parse(f: &Fields<'_>) -> Result<Self, TopologyError> {
        Ok(Self {
            vn_kv: f.positive("vn_kv")?,
            min_vm_pu: f.opt("min_vm_pu")?,
            max_vm_pu: f.opt("max_vm_pu")?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LineParams {
    pub from_bus: ResourceId,
    pub to_bus: ResourceId,
    pub length_km: f64,
    pub r_ohm_per_km: f64,
    pub x_ohm_per_km: f64,
    pub c_nf_per_km: f64,
    pub max_i_ka: f64,
}

impl LineParams {
    pub(crate) fn parse(f: &Fields<'_>) -> Result<Self, TopologyError> {
        let params = Self {
            from_bus: f.id("from_bus")?,
            to_bus: f.id("to_bus")?,
            length_km: f.positive("length_km")?,
            r_ohm_per_km: f.num("r_ohm_per_km")?,
            x_ohm_per_km: f.positive("x_ohm_per_km")?,
            c_nf_per_km: f.num("c_nf_per_km")?,
            max_i_ka: f.positive("max_i_ka")?,
        };
        if params.from_bus == params.to_bus {
            return Err(f.invalid(format!("line connects bus {} to itself", params.from_bus)));
        }
        Ok(params)
    }

    /// Series reactance in per unit on the given base.
    pub fn x_pu(&self, vn_kv: f64, base_mva: f64) -> f64 {
        let z_base = vn_kv * vn_kv / base_mva;
        self.x_ohm_per_km * self.length_km / z_base
    }

    /// Thermal rating in MW (unity power factor).
    pub fn rating_mw(&self, vn_kv: f64) -> f64 {
        3f64.sqrt() * vn_kv * self.max_i_ka
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransformerParams {
    pub hv_bus: ResourceId,
    pub lv_bus: ResourceId,
    pub sn_mva: f64,
    pub vn_hv_kv: f64,
    pub vn_lv_kv: f64,
    pub vk_percent: f64,
    pub vkr_percent: f64,
    pub pfe_kw: f64,
    pub i0_percent: f64,
}

impl TransformerParams {
    pub(crate) fn parse(f: &Fields<'_>) -> Result<Self, TopologyError> {
        let params = Self {
            hv_bus: f.id("hv_bus")?,
            lv_bus: f.id("lv_bus")?,
            sn_mva: f.positive("sn_mva")?,
            vn_hv_kv: f.positive("vn_hv_kv")?,
            vn_lv_kv: f.positive("vn_lv_kv")?,
            vk_percent: f.positive("vk_percent")?,
            vkr_percent: f.num("vkr_percent")?,
            pfe_kw: f.num("pfe_kw")?,
            i0_percent: f.num("i0_percent")?,
        };
        if params.vkr_percent > params.vk_percent {
            return Err(f.invalid(format!(
                "vkr_percent ({}) exceeds vk_percent ({})",
                params.vkr_percent, params.vk_percent
            )));
        }
        Ok(params)
    }

    pub fn x_pu(&self, base_mva: f64) -> f64 {
        self.vk_percent / 100.0 * base_mva / self.sn_mva
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShuntParams {
    pub bus: ResourceId,
    pub q_mvar: f64,
    pub p_mw: f64,
    pub vn_kv: Option<f64>,
}

impl ShuntParams {
    pub(crate) fn parse(f: &Fields<'_>) -> Result<Self, TopologyError> {
        Ok(Self {
            bus: f.id("bus")?,
            q_mvar: f.num("q_mvar")?,
            p_mw: f.num_or("p_mw", 0.0)?,
            vn_kv: f.opt("vn_kv")?,
        })
    }
}

/// Polynomial operating cost `c0 + c1·x + c2·x²` for active and reactive power.
///
/// Absent coefficients are zero, i.e. an element without cost attributes is free.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PolyCost {
    pub cp0: f64,
    pub cp1: f64,
    pub cp2: f64,
    pub cq0: f64,
    pub cq1: f64,
    pub cq2: f64,
}

impl PolyCost {
    pub(crate) fn parse(f: &Fields<'_>) -> Result<Self, TopologyError> {
        let cost = Self {
            cp0: f.num_or("cp0", 0.0)?,
            cp1: f.num_or("cp1", 0.0)?,
            cp2: f.num_or("cp2", 0.0)?,
            cq0: f.num_or("cq0", 0.0)?,
            cq1: f.num_or("cq1", 0.0)?,
            cq2: f.num_or("cq2", 0.0)?,
        };
        for (field, value) in [("cp2", cost.cp2), ("cq2", cost.cq2)] {
            if value < 0.0 {
                return Err(TopologyError::NonConvexCost {
                    element: f.element.to_string(),
                    field,
                    value,
                });
            }
        }
        Ok(cost)
    }

    pub fn active(&self, p_mw: f64) -> f64 {
        self.cp0 + self.cp1 * p_mw + self.cp2 * p_mw * p_mw
    }

    pub fn reactive(&self, q_mvar: f64) -> f64 {
        self.cq0 + self.cq1 * q_mvar + self.cq2 * q_mvar * q_mvar
    }

    /// Secant slope of the active cost over `[a, a + width]`.
    pub fn segment_slope(&self, a: f64, width: f64) -> f64 {
        self.cp1 + self.cp2 * (2.0 * a + width)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExternalGridParams {
    pub bus: ResourceId,
    pub vm_pu: f64,
    pub min_p_mw: f64,
    pub max_p_mw: f64,
    pub min_q_mvar: f64,
    pub max_q_mvar: f64,
    pub cost: PolyCost,
}

impl ExternalGridParams {
    pub(crate) fn parse(f: &Fields<'_>) -> Result<Self, TopologyError> {
        let params = Self {
            bus: f.id("bus")?,
            vm_pu: f.num_or("vm_pu", 1.0)?,
            min_p_mw: f.num("min_p_mw")?,
            max_p_mw: f.num("max_p_mw")?,
            min_q_mvar: f.num("min_q_mvar")?,
            max_q_mvar: f.num("max_q_mvar")?,
            cost: PolyCost::parse(f)?,
        };
        check_range(f, "p_mw", params.min_p_mw, params.max_p_mw)?;
        check_range(f, "q_mvar", params.min_q_mvar, params.max_q_mvar)?;
        Ok(params)
    }
}

/// A battery registered as a controllable generator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeneratorParams {
    pub bus: ResourceId,
    pub p_mw: f64,
    pub vm_pu: f64,
    pub min_p_mw: f64,
    pub max_p_mw: f64,
    pub min_q_mvar: f64,
    pub max_q_mvar: f64,
    pub slack: bool,
    pub cost: PolyCost,
}

impl GeneratorParams {
    /// Limits default to the setpoint, so a generator without limits is held
    /// at `p_mw` by the OPF as well.
    pub(crate) fn parse(f: &Fields<'_>) -> Result<Self, TopologyError> {
        let p_mw = f.num("p_mw")?;
        let params = Self {
            bus: f.id("bus")?,
            p_mw,
            vm_pu: f.num_or("vm_pu", 1.0)?,
            min_p_mw: f.num_or("min_p_mw", p_mw)?,
            max_p_mw: f.num_or("max_p_mw", p_mw)?,
            min_q_mvar: f.num_or("min_q_mvar", 0.0)?,
            max_q_mvar: f.num_or("max_q_mvar", 0.0)?,
            slack: f.flag_or("slack", false)?,
            cost: PolyCost::parse(f)?,
        };
        check_range(f, "p_mw", params.min_p_mw, params.max_p_mw)?;
        check_range(f, "q_mvar", params.min_q_mvar, params.max_q_mvar)?;
        Ok(params)
    }
}

/// A battery registered as a storage unit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StorageParams {
    pub bus: ResourceId,
    pub p_mw: f64,
    pub q_mvar: f64,
    /// Most negative power, i.e. the discharge limit.
    pub min_p_mw: f64,
    /// Charge limit.
    pub max_p_mw: f64,
    pub min_q_mvar: f64,
    pub max_q_mvar: f64,
    pub min_e_mwh: f64,
    pub max_e_mwh: f64,
    pub soc_percent: f64,
}

impl StorageParams {
    pub(crate) fn parse(f: &Fields<'_>) -> Result<Self, TopologyError> {
        let params = Self {
            bus: f.id("bus")?,
            p_mw: f.num_or("p_mw", 0.0)?,
            q_mvar: f.num_or("q_mvar", 0.0)?,
            min_p_mw: f.num("min_p_mw")?,
            max_p_mw: f.num("max_p_mw")?,
            min_q_mvar: f.num_or("min_q_mvar", 0.0)?,
            max_q_mvar: f.num_or("max_q_mvar", 0.0)?,
            min_e_mwh: f.num("min_e_mwh")?,
            max_e_mwh: f.positive("max_e_mwh")?,
            soc_percent: f.num("soc_percent")?,
        };
        if params.min_p_mw > 0.0 || params.max_p_mw < 0.0 {
            return Err(f.invalid(format!(
                "power range [{}, {}] must contain zero",
                params.min_p_mw, params.max_p_mw
            )));
        }
        check_range(f, "e_mwh", params.min_e_mwh, params.max_e_mwh)?;
        if !(0.0..=100.0).contains(&params.soc_percent) {
            return Err(f.invalid(format!("soc_percent {} outside 0..=100", params.soc_percent)));
        }
        Ok(params)
    }

    pub fn soc_min_percent(&self) -> f64 {
        self.min_e_mwh * 100.0 / self.max_e_mwh
    }

    /// Upper SOC bound, `ceiling_factor` of the nominal energy.
    pub fn soc_max_percent(&self, ceiling_factor: f64) -> f64 {
        100.0 * ceiling_factor
    }
}

fn check_range(f: &Fields<'_>, what: &str, min: f64, max: f64) -> Result<(), TopologyError> {
    if min > max {
        return Err(f.invalid(format!("min_{what} ({min}) exceeds max_{what} ({max})")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_attrs() -> Attributes {
        Attributes::new()
            .with("from_bus", 1)
            .with("to_bus", 2)
            .with("length_km", 2.0)
            .with("r_ohm_per_km", 0.1)
            .with("x_ohm_per_km", 0.4)
            .with("c_nf_per_km", 10.0)
            .with("max_i_ka", 0.5)
    }

    #[test]
    fn test_line_parse_and_derived_values() {
        let attrs = line_attrs();
        let line = LineParams::parse(&Fields::new("line 5", &attrs)).unwrap();
        // z_base = 20² / 1 = 400 Ω, x = 0.8 Ω
        assert!((line.x_pu(20.0, 1.0) - 0.002).abs() < 1e-12);
        assert!((line.rating_mw(20.0) - 3f64.sqrt() * 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_field_names_element_and_field() {
        let attrs = Attributes::new()
            .with("from_bus", 1)
            .with("to_bus", 2)
            .with("length_km", 2.0)
            .with("r_ohm_per_km", 0.1)
            .with("x_ohm_per_km", 0.4)
            .with("c_nf_per_km", 10.0);
        let err = LineParams::parse(&Fields::new("line 5", &attrs)).unwrap_err();
        assert_eq!(
            err,
            TopologyError::MissingAttribute {
                element: "line 5".into(),
                field: "max_i_ka"
            }
        );
    }

    #[test]
    fn test_non_numeric_field() {
        let attrs = line_attrs().with("x_ohm_per_km", "abc");
        let err = LineParams::parse(&Fields::new("line 5", &attrs)).unwrap_err();
        assert!(matches!(err, TopologyError::NonNumeric { field: "x_ohm_per_km", .. }));
    }

    #[test]
    fn test_negative_quadratic_cost_rejected() {
        let attrs = Attributes::new().with("cp1", 10.0).with("cp2", -0.1);
        let err = PolyCost::parse(&Fields::new("gen 1", &attrs)).unwrap_err();
        assert!(matches!(err, TopologyError::NonConvexCost { field: "cp2", .. }));
    }

    #[test]
    fn test_segment_slope_is_exact_secant() {
        let cost = PolyCost { cp1: 2.0, cp2: 0.5, ..Default::default() };
        let (a, w) = (1.0, 3.0);
        let secant = (cost.active(a + w) - cost.active(a)) / w;
        assert!((cost.segment_slope(a, w) - secant).abs() < 1e-12);
    }

    #[test]
    fn test_storage_soc_bounds() {
        let attrs = Attributes::new()
            .with("bus", 1)
            .with("min_p_mw", -2.0)
            .with("max_p_mw", 2.0)
            .with("min_e_mwh", 1.0)
            .with("max_e_mwh", 10.0)
            .with("soc_percent", 50.0);
        let storage = StorageParams::parse(&Fields::new("battery 3", &attrs)).unwrap();
        assert!((storage.soc_min_percent() - 10.0).abs() < 1e-12);
        assert!((storage.soc_max_percent(0.9) - 90.0).abs() < 1e-12);
    }

    #[test]
    fn test_storage_power_range_must_contain_zero() {
        let attrs = Attributes::new()
            .with("bus", 1)
            .with("min_p_mw", 1.0)
            .with("max_p_mw", 2.0)
            .with("min_e_mwh", 0.0)
            .with("max_e_mwh", 10.0)
            .with("soc_percent", 50.0);
        assert!(matches!(
            StorageParams::parse(&Fields::new("battery 3", &attrs)),
            Err(TopologyError::InvalidValue { .. })
        ));
    }
}

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::optimizer::{DispatchWeights, ModulationLimits};
use crate::power_flow::DcOpfSettings;
use crate::scheduler::{ScheduleKind, SchedulerSettings};

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct Config {
    #[validate(nested)]
    pub scheduler: SchedulerConfig,
    #[validate(nested)]
    pub opf: OpfConfig,
    #[validate(nested)]
    pub flexibility: FlexibilityConfig,
    pub db: DbConfig,
    #[validate(nested)]
    pub job: JobConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SchedulerConfig {
    #[validate(range(min = 1, max = 1000))]
    pub outer_iterations: usize,
    /// Empty reads baselines from every source.
    pub baseline_source: String,
    #[validate(length(min = 1))]
    pub source_name: String,
    #[validate(length(min = 1))]
    pub source_type: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            outer_iterations: 20,
            baseline_source: "thesis".into(),
            source_name: "scheduler".into(),
            source_type: "scheduler".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct OpfConfig {
    #[validate(range(min = 0.001))]
    pub base_mva: f64,
    #[validate(range(min = 1, max = 64))]
    pub cost_segments: usize,
    #[validate(range(min = 1e-9))]
    pub price_probe_mw: f64,
    #[validate(range(min = 0.0))]
    pub price_cap: f64,
}

impl Default for OpfConfig {
    fn default() -> Self {
        let solver = DcOpfSettings::default();
        Self {
            base_mva: 1.0,
            cost_segments: solver.cost_segments,
            price_probe_mw: solver.price_probe_mw,
            price_cap: solver.price_cap,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct FlexibilityConfig {
    pub min_power: f64,
    pub max_power: f64,
    #[validate(range(min = 0.0))]
    pub max_change: f64,
    /// Unserved-load penalty (a1).
    #[validate(range(min = 0.0))]
    pub unserved_weight: f64,
    /// Dumped-energy penalty (a2).
    #[validate(range(min = 0.0))]
    pub dumped_weight: f64,
    /// Charging cost factor (a3).
    #[validate(range(min = 0.0))]
    pub cycling_weight: f64,
    #[validate(range(min = 0.0, max = 1.0))]
    pub soc_ceiling: f64,
}

impl Default for FlexibilityConfig {
    fn default() -> Self {
        let limits = ModulationLimits::default();
        let weights = DispatchWeights::default();
        Self {
            min_power: limits.min_power,
            max_power: limits.max_power,
            max_change: limits.max_change,
            unserved_weight: weights.unserved,
            dumped_weight: weights.dumped,
            cycling_weight: weights.cycling,
            soc_ceiling: weights.soc_ceiling,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    pub url: Option<String>,
    pub max_connections: Option<u32>,
}

/// The scheduling job the binary runs.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct JobConfig {
    pub fixture: PathBuf,
    pub kind: ScheduleKind,
    /// Network whose resources are scheduled.
    pub network_id: i64,
    pub batteries: Vec<i64>,
    pub loads: Vec<i64>,
    pub pvs: Vec<i64>,
    pub start: String,
    /// One year of one-minute slots at most.
    #[validate(range(min = 1, max = 525_600))]
    pub slots: u32,
    #[validate(range(min = 60))]
    pub resolution_secs: i64,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            fixture: PathBuf::from("demos/two_bus.json"),
            kind: ScheduleKind::LoadScheduling,
            network_id: 1,
            batteries: Vec::new(),
            loads: Vec::new(),
            pvs: Vec::new(),
            start: "2024-03-01T00:00:00Z".into(),
            slots: 24,
            resolution_secs: 3600,
        }
    }
}

impl JobConfig {
    /// Start, end and resolution of the scheduled horizon.
    pub fn horizon(&self) -> Result<(DateTime<Utc>, DateTime<Utc>, Duration)> {
        let start: DateTime<Utc> = self
            .start
            .parse()
            .with_context(|| format!("job.start {:?} is not an RFC 3339 timestamp", self.start))?;
        let resolution = Duration::try_seconds(self.resolution_secs)
            .with_context(|| format!("job.resolution_secs {} is out of range", self.resolution_secs))?;
        let end = i32::try_from(self.slots)
            .ok()
            .and_then(|slots| resolution.checked_mul(slots))
            .and_then(|span| start.checked_add_signed(span))
            .with_context(|| format!("job.slots {} overflows the horizon", self.slots))?;
        Ok((start, end, resolution))
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::from_figment(
            Figment::from(Serialized::defaults(Config::default()))
                .merge(Toml::file("config/default.toml"))
                .merge(Env::prefixed("GFS__").split("__")),
        )
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Config = figment.extract().context("reading configuration")?;
        config.validate().context("invalid configuration")?;
        if config.flexibility.min_power > config.flexibility.max_power {
            anyhow::bail!(
                "invalid configuration: flexibility.min_power {} above max_power {}",
                config.flexibility.min_power,
                config.flexibility.max_power
            );
        }
        Ok(config)
    }

    pub fn scheduler_settings(&self) -> SchedulerSettings {
        let baseline_source = Some(self.scheduler.baseline_source.clone()).filter(|s| !s.is_empty());
        SchedulerSettings {
            outer_iterations: self.scheduler.outer_iterations,
            baseline_source,
            source_name: self.scheduler.source_name.clone(),
            source_type: self.scheduler.source_type.clone(),
            base_mva: self.opf.base_mva,
            modulation: ModulationLimits {
                min_power: self.flexibility.min_power,
                max_power: self.flexibility.max_power,
                max_change: self.flexibility.max_change,
            },
            dispatch: DispatchWeights {
                unserved: self.flexibility.unserved_weight,
                dumped: self.flexibility.dumped_weight,
                cycling: self.flexibility.cycling_weight,
                soc_ceiling: self.flexibility.soc_ceiling,
            },
        }
    }

    pub fn solver_settings(&self) -> DcOpfSettings {
        DcOpfSettings {
            cost_segments: self.opf.cost_segments,
            price_probe_mw: self.opf.price_probe_mw,
            price_cap: self.opf.price_cap,
        }
    }
}

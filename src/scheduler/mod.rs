//! Scheduling entry points.
//!
//! A `Scheduler` owns its collaborators (data store, network solver, progress
//! sink) and runs one `ScheduleRequest` to completion: resolve records, build
//! the topology, read baselines, compute, then persist every series in a
//! single batch. Any failure before the commit leaves the store untouched.

pub mod error;
pub mod flexibility;
pub mod inputs;
pub mod price_discovery;
pub mod progress;

pub use error::SchedulingError;
pub use flexibility::{dispatch_horizon, FlexibilitySchedule};
pub use inputs::{fetch_baselines, fetch_records, RunRecords};
pub use price_discovery::{schedule_loads, solve_horizon, HorizonSolve, LoadSchedule};
pub use progress::{NoopProgress, ProgressSink, TracingProgress};

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::{error, info, instrument, warn};

use crate::domain::{Asset, Horizon, Quantity, ResourceSelection};
use crate::optimizer::{DispatchWeights, ModulationLimits};
use crate::power_flow::{PowerFlowSolver, SolveMode};
use crate::repo::DataStore;
use crate::topology::{BatteryModel, TopologyBuilder, TopologyError};
use crate::writer::ResultWriter;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Cap on price-discovery passes of the load scheduler.
    pub outer_iterations: usize,
    /// Source of the baseline curves; `None` reads every source.
    pub baseline_source: Option<String>,
    pub source_name: String,
    pub source_type: String,
    pub base_mva: f64,
    pub modulation: ModulationLimits,
    pub dispatch: DispatchWeights,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            outer_iterations: 20,
            baseline_source: Some("thesis".to_string()),
            source_name: "scheduler".to_string(),
            source_type: "scheduler".to_string(),
            base_mva: 1.0,
            modulation: ModulationLimits::default(),
            dispatch: DispatchWeights::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ScheduleKind {
    OptimalPowerFlow,
    PowerFlow,
    LoadScheduling,
    Flexibility,
}

impl ScheduleKind {
    pub fn battery_model(self) -> BatteryModel {
        match self {
            ScheduleKind::Flexibility => BatteryModel::Storage,
            _ => BatteryModel::Generator,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRequest {
    pub kind: ScheduleKind,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(with = "crate::domain::series::resolution_secs")]
    pub resolution: Duration,
    #[serde(default)]
    pub belief_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub selection: ResourceSelection,
}

impl ScheduleRequest {
    pub fn new(kind: ScheduleKind, start: DateTime<Utc>, end: DateTime<Utc>, resolution: Duration) -> Self {
        Self {
            kind,
            start,
            end,
            resolution,
            belief_time: None,
            selection: ResourceSelection::default(),
        }
    }

    pub fn with_selection(mut self, selection: ResourceSelection) -> Self {
        self.selection = selection;
        self
    }

    pub fn with_belief_time(mut self, belief_time: DateTime<Utc>) -> Self {
        self.belief_time = Some(belief_time);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduleOutcome {
    pub kind: ScheduleKind,
    pub horizon: Horizon,
    /// Price-discovery passes; 1 for the single-pass kinds.
    pub iterations: usize,
    /// Horizon cost of each solved state, the baseline first for load scheduling.
    pub costs: Vec<f64>,
    pub sensors_written: usize,
    pub observations_written: usize,
}

pub struct Scheduler {
    store: Arc<dyn DataStore>,
    solver: Arc<dyn PowerFlowSolver>,
    progress: Arc<dyn ProgressSink>,
    settings: SchedulerSettings,
}

impl Scheduler {
    pub fn new(store: Arc<dyn DataStore>, solver: Arc<dyn PowerFlowSolver>, settings: SchedulerSettings) -> Self {
        Self {
            store,
            solver,
            progress: Arc::new(TracingProgress),
            settings,
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    /// Resolve a stored network into a selection of its resources. Batteries,
    /// loads and PVs are left for the caller to fill in.
    pub async fn selection_for_network(&self, network_id: i64) -> Result<ResourceSelection, SchedulingError> {
        let network = self
            .store
            .network(network_id)
            .await?
            .ok_or_else(|| SchedulingError::InvalidRequest(format!("network {network_id} does not exist")))?;
        let mut resources = Vec::with_capacity(network.resources.len());
        for &id in &network.resources {
            let resource = self
                .store
                .network_resource(id)
                .await?
                .ok_or_else(|| TopologyError::NotFound {
                    kind: "network resource".to_string(),
                    id,
                })?;
            resources.push(resource);
        }
        Ok(ResourceSelection::from_resources(&resources))
    }

    #[instrument(skip(self, request), fields(kind = %request.kind))]
    pub async fn run(&self, request: &ScheduleRequest) -> Result<ScheduleOutcome, SchedulingError> {
        let horizon = Horizon::new(request.start, request.end, request.resolution)?;
        if request.selection.buses.is_empty() {
            return Err(SchedulingError::InvalidRequest("no buses selected".to_string()));
        }
        let len = horizon.len();
        info!(start = %horizon.start, end = %horizon.end, slots = len, "scheduling run started");

        let records = fetch_records(self.store.as_ref(), &request.selection).await?;
        let topology = TopologyBuilder::new(request.kind.battery_model())
            .with_base_mva(self.settings.base_mva)
            .build(&records.topology)?;
        let curves = fetch_baselines(
            self.store.as_ref(),
            &records.topology,
            &topology,
            &horizon,
            self.settings.baseline_source.as_deref(),
        )
        .await?;
        let source = self
            .store
            .data_source(&self.settings.source_name, &self.settings.source_type)
            .await?;
        let mut writer = ResultWriter::new(source, horizon, request.belief_time);
        let solver = self.solver.as_ref();
        let progress = self.progress.as_ref();

        let (iterations, costs) = match request.kind {
            ScheduleKind::OptimalPowerFlow | ScheduleKind::PowerFlow => {
                let mode = match request.kind {
                    ScheduleKind::PowerFlow => SolveMode::PowerFlow,
                    _ => SolveMode::OptimalPowerFlow,
                };
                let solved = solve_horizon(solver, &topology, &curves, len, mode)?;
                progress.report("network solve", len, len);
                for (i, battery) in records.topology.batteries.iter().enumerate() {
                    let (p, q) = solved.generator_series(i);
                    stage(&mut writer, battery, Quantity::ActivePower, &p)?;
                    stage(&mut writer, battery, Quantity::ReactivePower, &q)?;
                }
                for (i, grid) in records.external_grid_assets.iter().enumerate() {
                    if let Some(grid) = grid {
                        let (p, q) = solved.external_grid_series(i);
                        stage(&mut writer, grid, Quantity::ActivePower, &p)?;
                        stage(&mut writer, grid, Quantity::ReactivePower, &q)?;
                    }
                }
                (1, vec![solved.total_cost()])
            }
            ScheduleKind::LoadScheduling => {
                let schedule = schedule_loads(
                    solver,
                    &topology,
                    curves,
                    len,
                    self.settings.outer_iterations,
                    &self.settings.modulation,
                    progress,
                )?;
                for (i, load) in records.topology.loads.iter().enumerate() {
                    stage(&mut writer, load, Quantity::ActivePower, &schedule.curves.load_p[i])?;
                    stage(&mut writer, load, Quantity::ReactivePower, &schedule.curves.load_q[i])?;
                }
                (schedule.iterations, schedule.costs)
            }
            ScheduleKind::Flexibility => {
                let schedule = dispatch_horizon(
                    solver,
                    &topology,
                    &curves,
                    len,
                    horizon.resolution_hours(),
                    &self.settings.dispatch,
                    progress,
                )?;
                for (i, battery) in records.topology.batteries.iter().enumerate() {
                    stage(&mut writer, battery, Quantity::ActivePower, &schedule.storage_mw[i])?;
                    stage(&mut writer, battery, Quantity::StateOfCharge, &schedule.soc_percent[i])?;
                }
                for (i, load) in records.topology.loads.iter().enumerate() {
                    stage(&mut writer, load, Quantity::ActivePower, &schedule.served[i])?;
                }
                (1, vec![schedule.total_cost()])
            }
        };

        let sensors_written = writer.staged_sensors().len();
        let observations_written = writer.commit(self.store.as_ref()).await?;
        info!(iterations, sensors_written, observations_written, "scheduling run finished");

        Ok(ScheduleOutcome {
            kind: request.kind,
            horizon,
            iterations,
            costs,
            sensors_written,
            observations_written,
        })
    }

    /// Run as a background job: failures are logged, never propagated.
    pub async fn run_job(&self, request: &ScheduleRequest) -> bool {
        match self.run(request).await {
            Ok(_) => true,
            Err(e) => {
                error!(kind = %request.kind, timestep = ?e.timestep(), error = %e, "scheduling run failed");
                false
            }
        }
    }
}

/// Stage `values` on `asset`'s sensor for `quantity`; assets without one are skipped.
fn stage(writer: &mut ResultWriter, asset: &Asset, quantity: Quantity, values: &[f64]) -> Result<(), SchedulingError> {
    match asset.sensor_for(quantity) {
        Some(sensor) => Ok(writer.stage(sensor.id, values)?),
        None => {
            warn!(asset = asset.id, %quantity, "no sensor, result not written");
            Ok(())
        }
    }
}

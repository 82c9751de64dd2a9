use std::sync::Arc;

use anyhow::Result;
use grid_flex_scheduler::{config, power_flow::DcOpfSolver, repo, telemetry};
use grid_flex_scheduler::{ScheduleRequest, Scheduler};
use config::Config;
use telemetry::init_tracing;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cfg = Config::load()?;
    let job = &cfg.job;

    let store = repo::open(&cfg.db, &job.fixture).await?;
    let solver = Arc::new(DcOpfSolver::new(cfg.solver_settings()));
    let scheduler = Scheduler::new(store, solver, cfg.scheduler_settings());

    let mut selection = scheduler.selection_for_network(job.network_id).await?;
    selection.batteries = job.batteries.clone();
    selection.loads = job.loads.clone();
    selection.pvs = job.pvs.clone();

    let (start, end, resolution) = job.horizon()?;
    let request = ScheduleRequest::new(job.kind, start, end, resolution).with_selection(selection);

    info!(kind = %job.kind, fixture = %job.fixture.display(), "starting grid-flex-scheduler job");

    if scheduler.run_job(&request).await {
        info!("job finished");
        Ok(())
    } else {
        anyhow::bail!("scheduling job failed, see log for details")
    }
}

use thiserror::Error;

use crate::domain::DataGapError;
use crate::optimizer::OptimizationError;
use crate::power_flow::SolverFailure;
use crate::topology::TopologyError;

/// Why a scheduling run failed. Nothing is persisted for a failed run.
#[derive(Debug, Error)]
pub enum SchedulingError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error("network solve failed at timestep {timestep}: {source}")]
    Solver {
        timestep: usize,
        #[source]
        source: SolverFailure,
    },

    #[error("load {asset} could not be rescheduled: {source}")]
    Reschedule {
        asset: i64,
        #[source]
        source: OptimizationError,
    },

    #[error("dispatch failed at timestep {timestep}: {source}")]
    Dispatch {
        timestep: usize,
        #[source]
        source: OptimizationError,
    },

    #[error(transparent)]
    DataGap(#[from] DataGapError),

    #[error("data store: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl SchedulingError {
    /// Timestep of a failed solve or dispatch, when the failure is tied to one.
    pub fn timestep(&self) -> Option<usize> {
        match self {
            SchedulingError::Solver { timestep, .. } | SchedulingError::Dispatch { timestep, .. } => Some(*timestep),
            _ => None,
        }
    }
}

//! Power-flow / optimal-power-flow capability.
//!
//! The scheduler talks to the network solver through `PowerFlowSolver` only.
//! A solve takes the immutable `Topology` plus one timestep's `Injections` and
//! returns per-bus and per-device results, or a `SolverFailure`. Solvers never
//! retry; the caller decides what a failure means for the run.

pub mod dc_opf;
pub mod snapshot;

pub use dc_opf::{DcOpfSettings, DcOpfSolver};
pub use snapshot::{DeviceCurves, Injections};

use serde::{Deserialize, Serialize};
use strum::Display;
use thiserror::Error;

use crate::domain::ResourceId;
use crate::topology::{BranchKind, BusIndex, Topology};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolveMode {
    /// Generators held at their setpoints, slack sources balance.
    PowerFlow,
    /// Economic dispatch under network limits, with nodal prices.
    OptimalPowerFlow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[strum(serialize_all = "snake_case")]
pub enum SolverStatus {
    Infeasible,
    Unbounded,
    Numerical,
    InvalidModel,
}

#[derive(Debug, Clone, Error, PartialEq)]
#[error("solver reported {status}: {message}")]
pub struct SolverFailure {
    pub status: SolverStatus,
    pub message: String,
}

impl SolverFailure {
    pub fn new(status: SolverStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusResult {
    pub bus_id: ResourceId,
    pub vm_pu: f64,
    pub va_degree: f64,
    /// Active power price, OPF only.
    pub lambda_p: Option<f64>,
    /// Reactive power price, OPF only.
    pub lambda_q: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceDispatch {
    pub p_mw: f64,
    pub q_mvar: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchFlow {
    pub id: ResourceId,
    pub kind: BranchKind,
    pub p_from_mw: f64,
    pub loading_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchResult {
    /// Indexed like `Topology::buses`.
    pub buses: Vec<BusResult>,
    /// Indexed like `Topology::generators`.
    pub generators: Vec<DeviceDispatch>,
    /// Indexed like `Topology::external_grids`.
    pub external_grids: Vec<DeviceDispatch>,
    pub branches: Vec<BranchFlow>,
    pub cost: f64,
}

impl DispatchResult {
    /// Active price at a bus, zero when the solve produced none.
    pub fn lambda_p(&self, bus: BusIndex) -> f64 {
        self.buses.get(bus).and_then(|b| b.lambda_p).unwrap_or(0.0)
    }

    pub fn lambda_q(&self, bus: BusIndex) -> f64 {
        self.buses.get(bus).and_then(|b| b.lambda_q).unwrap_or(0.0)
    }
}

/// Network solver capability: "solve network N at one timestep, or fail".
#[cfg_attr(test, mockall::automock)]
pub trait PowerFlowSolver: Send + Sync {
    fn solve(
        &self,
        topology: &Topology,
        injections: &Injections,
        mode: SolveMode,
    ) -> Result<DispatchResult, SolverFailure>;
}

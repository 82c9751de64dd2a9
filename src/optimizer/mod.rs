//! Load flexibility and battery dispatch sub-problems.

pub mod constraints;
pub mod dispatch;
pub mod flexibility;

pub use constraints::*;
pub use dispatch::{dispatch_timestep, BatteryState, DispatchInput, DispatchOutcome};
pub use flexibility::reschedule;

use good_lp::ResolutionError;
use strum::Display;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Subproblem {
    Breakable,
    Shiftable,
    Modulatable,
    Dispatch,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum OptimizationError {
    #[error("{problem} problem has no feasible solution: {reason}")]
    Infeasible { problem: Subproblem, reason: String },

    #[error("{problem} problem failed in the solver: {message}")]
    Solver { problem: Subproblem, message: String },

    #[error("price series has {prices} slots but the curve has {curve}")]
    LengthMismatch { prices: usize, curve: usize },
}

impl OptimizationError {
    pub(crate) fn from_resolution(problem: Subproblem, err: ResolutionError, infeasible: &str) -> Self {
        match err {
            ResolutionError::Infeasible => OptimizationError::Infeasible {
                problem,
                reason: infeasible.to_string(),
            },
            other => OptimizationError::Solver {
                problem,
                message: other.to_string(),
            },
        }
    }
}

//! Grid-aware flexibility scheduler.
//!
//! Builds an electrical network model from persisted records, discovers nodal
//! prices with per-timestep optimal power flow, and reschedules flexible
//! loads and storage against those prices.

pub mod config;
pub mod domain;
pub mod optimizer;
pub mod power_flow;
pub mod repo;
pub mod scheduler;
pub mod telemetry;
pub mod topology;
pub mod writer;

pub use scheduler::{ScheduleKind, ScheduleOutcome, ScheduleRequest, Scheduler, SchedulerSettings, SchedulingError};

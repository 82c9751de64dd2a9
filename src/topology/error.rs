use thiserror::Error;

use crate::domain::ResourceId;

/// Malformed or incomplete network data. Always fatal for a run.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TopologyError {
    #[error("{kind} {id} does not exist")]
    NotFound { kind: String, id: i64 },

    #[error("{element}: expected a {expected}, found a {found}")]
    WrongKind {
        element: String,
        expected: String,
        found: String,
    },

    #[error("type id {type_id} is not a known {what} type")]
    UnknownType { what: &'static str, type_id: i32 },

    #[error("{element}: missing attribute `{field}`")]
    MissingAttribute { element: String, field: &'static str },

    #[error("{element}: attribute `{field}` is not numeric")]
    NonNumeric { element: String, field: &'static str },

    #[error("{element}: attribute `{field}` is not a boolean")]
    NonBoolean { element: String, field: &'static str },

    #[error("{element}: {reason}")]
    InvalidValue { element: String, reason: String },

    #[error("{element}: quadratic cost coefficient `{field}` = {value} is negative (non-convex)")]
    NonConvexCost {
        element: String,
        field: &'static str,
        value: f64,
    },

    #[error("{element} references bus {bus}, which is not registered")]
    UnknownBus { element: String, bus: ResourceId },

    #[error("bus {0} is registered twice")]
    DuplicateBus(ResourceId),

    #[error("no slack source: the network needs an external grid or a slack generator")]
    NoSlack,

    #[error("buses {0:?} are not connected to any slack source")]
    Islanded(Vec<ResourceId>),
}

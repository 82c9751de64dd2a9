use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use super::Attributes;

pub type ResourceId = i64;

/// Physical role of a network resource.
///
/// The persisted schema discriminates resources by an integer type id; that id
/// is mapped to this enum once, when the record leaves the store.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ResourceKind {
    Line,
    Bus,
    Transformer,
    ExternalGrid,
    Shunt,
}

impl ResourceKind {
    pub fn from_type_id(type_id: i32) -> Option<Self> {
        match type_id {
            0 => Some(Self::Line),
            1 => Some(Self::Bus),
            2 => Some(Self::Transformer),
            3 => Some(Self::ExternalGrid),
            4 => Some(Self::Shunt),
            _ => None,
        }
    }

    pub fn type_id(self) -> i32 {
        match self {
            Self::Line => 0,
            Self::Bus => 1,
            Self::Transformer => 2,
            Self::ExternalGrid => 3,
            Self::Shunt => 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkResource {
    pub id: ResourceId,
    pub name: String,
    pub kind: ResourceKind,
    #[serde(default)]
    pub attributes: Attributes,
}

impl NetworkResource {
    pub fn new(id: ResourceId, name: impl Into<String>, kind: ResourceKind, attributes: Attributes) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            attributes,
        }
    }
}

/// A named collection of resource references, owned by an account or public.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Network {
    pub id: i64,
    pub name: String,
    pub account_id: Option<i64>,
    pub resources: Vec<ResourceId>,
}

/// Role-segmented identifiers handed to a scheduling run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceSelection {
    pub buses: Vec<ResourceId>,
    pub lines: Vec<ResourceId>,
    pub transformers: Vec<ResourceId>,
    pub shunts: Vec<ResourceId>,
    pub external_grids: Vec<ResourceId>,
    pub batteries: Vec<super::AssetId>,
    pub loads: Vec<super::AssetId>,
    pub pvs: Vec<super::AssetId>,
}

impl ResourceSelection {
    /// Segment already-resolved network resources by role, keeping their order.
    /// Asset lists (batteries, loads, pvs) are left empty for the caller.
    pub fn from_resources<'a>(resources: impl IntoIterator<Item = &'a NetworkResource>) -> Self {
        let mut selection = Self::default();
        for resource in resources {
            let target = match resource.kind {
                ResourceKind::Bus => &mut selection.buses,
                ResourceKind::Line => &mut selection.lines,
                ResourceKind::Transformer => &mut selection.transformers,
                ResourceKind::Shunt => &mut selection.shunts,
                ResourceKind::ExternalGrid => &mut selection.external_grids,
            };
            target.push(resource.id);
        }
        selection
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn test_type_id_round_trip_covers_every_kind() {
        for kind in ResourceKind::iter() {
            assert_eq!(ResourceKind::from_type_id(kind.type_id()), Some(kind));
        }
        assert_eq!(ResourceKind::from_type_id(9), None);
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(ResourceKind::ExternalGrid.to_string(), "external_grid");
        assert_eq!(ResourceKind::from_str("transformer").unwrap(), ResourceKind::Transformer);
    }

    #[test]
    fn test_selection_segments_by_kind() {
        let resources = vec![
            NetworkResource::new(10, "b1", ResourceKind::Bus, Attributes::new()),
            NetworkResource::new(11, "l1", ResourceKind::Line, Attributes::new()),
            NetworkResource::new(12, "b2", ResourceKind::Bus, Attributes::new()),
            NetworkResource::new(13, "eg", ResourceKind::ExternalGrid, Attributes::new()),
        ];
        let selection = ResourceSelection::from_resources(&resources);
        assert_eq!(selection.buses, vec![10, 12]);
        assert_eq!(selection.lines, vec![11]);
        assert_eq!(selection.external_grids, vec![13]);
        assert!(selection.transformers.is_empty());
    }
}

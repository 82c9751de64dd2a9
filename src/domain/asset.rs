use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};

use super::Attributes;

pub type AssetId = i64;
pub type SensorId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AssetKind {
    Pv,
    Battery,
    Load,
    ExternalGrid,
}

impl AssetKind {
    pub fn from_type_id(type_id: i32) -> Option<Self> {
        match type_id {
            1 => Some(Self::Pv),
            5 => Some(Self::Battery),
            6 => Some(Self::Load),
            7 => Some(Self::ExternalGrid),
            _ => None,
        }
    }

    pub fn type_id(self) -> i32 {
        match self {
            Self::Pv => 1,
            Self::Battery => 5,
            Self::Load => 6,
            Self::ExternalGrid => 7,
        }
    }
}

/// Flexibility archetype of a load: the rule governing how its curve may change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
pub enum LoadArchetype {
    #[default]
    Inflexible,
    Breakable,
    Shiftable,
    Modulatable,
}

impl LoadArchetype {
    pub fn is_flexible(self) -> bool {
        !matches!(self, LoadArchetype::Inflexible)
    }
}

/// Physical quantity a sensor records, keyed by its unit string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
pub enum Quantity {
    #[strum(serialize = "W")]
    #[serde(rename = "W")]
    ActivePower,
    #[strum(serialize = "VAr")]
    #[serde(rename = "VAr")]
    ReactivePower,
    #[strum(serialize = "%")]
    #[serde(rename = "%")]
    StateOfCharge,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sensor {
    pub id: SensorId,
    pub name: String,
    pub unit: String,
}

impl Sensor {
    pub fn quantity(&self) -> Option<Quantity> {
        self.unit.parse().ok()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub id: AssetId,
    pub name: String,
    pub kind: AssetKind,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default)]
    pub sensors: Vec<Sensor>,
}

impl Asset {
    /// First sensor recording `quantity`, if any.
    pub fn sensor_for(&self, quantity: Quantity) -> Option<&Sensor> {
        self.sensors.iter().find(|s| s.quantity() == Some(quantity))
    }

    /// Connection bus, `None` when the attribute is absent or malformed.
    pub fn bus(&self) -> Option<super::ResourceId> {
        self.attributes.id("bus").ok()
    }

    /// Archetype of a load asset. An absent `type` reads as inflexible; any
    /// other value must name an archetype exactly.
    pub fn archetype(&self) -> Result<LoadArchetype, String> {
        match self.attributes.get("type") {
            None => Ok(LoadArchetype::default()),
            Some(Value::String(name)) => name
                .parse()
                .map_err(|_| format!("load type {name:?} is not one of Inflexible, Breakable, Shiftable, Modulatable")),
            Some(other) => Err(format!("load type {other} is not a string")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(attrs: Attributes) -> Asset {
        Asset {
            id: 1,
            name: "house".into(),
            kind: AssetKind::Load,
            attributes: attrs,
            sensors: vec![
                Sensor { id: 7, name: "p".into(), unit: "W".into() },
                Sensor { id: 8, name: "q".into(), unit: "VAr".into() },
            ],
        }
    }

    #[test]
    fn test_sensor_lookup_by_quantity() {
        let asset = load(Attributes::new());
        assert_eq!(asset.sensor_for(Quantity::ActivePower).map(|s| s.id), Some(7));
        assert_eq!(asset.sensor_for(Quantity::ReactivePower).map(|s| s.id), Some(8));
        assert!(asset.sensor_for(Quantity::StateOfCharge).is_none());
    }

    #[test]
    fn test_archetype_parsing() {
        assert_eq!(load(Attributes::new().with("type", "Shiftable")).archetype(), Ok(LoadArchetype::Shiftable));
        assert_eq!(load(Attributes::new()).archetype(), Ok(LoadArchetype::Inflexible));
        assert!(load(Attributes::new().with("type", "shiftable")).archetype().is_err());
        assert!(load(Attributes::new().with("type", 3)).archetype().is_err());
    }

    #[test]
    fn test_asset_kind_ids() {
        assert_eq!(AssetKind::from_type_id(5), Some(AssetKind::Battery));
        assert_eq!(AssetKind::from_type_id(6), Some(AssetKind::Load));
        assert_eq!(AssetKind::from_type_id(2), None);
        assert_eq!(AssetKind::Pv.type_id(), 1);
    }
}

//! Free-form attribute maps carried by network resources and assets.
//!
//! The CRUD layer stores solver parameters as an untyped JSON object. Nothing
//! outside the topology builder reads these maps directly: every role parses
//! them once into a typed parameter struct (see `crate::topology::params`).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Reason a typed lookup failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeIssue {
    Missing,
    NotNumeric,
    NotBoolean,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attributes(Map<String, Value>);

impl Attributes {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Attribute lookup with default, the collaborator contract of the CRUD layer.
    pub fn get_attribute<'a>(&'a self, name: &str, default: &'a Value) -> &'a Value {
        self.0.get(name).unwrap_or(default)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(name.into(), value.into());
    }

    /// Builder-style `set`, handy for fixtures.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    /// Numeric attribute. Numeric strings ("0.4") are accepted since the CRUD
    /// forms historically stored some values as text.
    pub fn number(&self, name: &str) -> Result<f64, AttributeIssue> {
        match self.0.get(name) {
            None | Some(Value::Null) => Err(AttributeIssue::Missing),
            Some(Value::Number(n)) => n.as_f64().ok_or(AttributeIssue::NotNumeric),
            Some(Value::String(s)) => s.trim().parse::<f64>().map_err(|_| AttributeIssue::NotNumeric),
            Some(_) => Err(AttributeIssue::NotNumeric),
        }
        .and_then(|v| if v.is_finite() { Ok(v) } else { Err(AttributeIssue::NotNumeric) })
    }

    pub fn number_or(&self, name: &str, default: f64) -> Result<f64, AttributeIssue> {
        match self.number(name) {
            Err(AttributeIssue::Missing) => Ok(default),
            other => other,
        }
    }

    /// Integer identifier attribute, e.g. `bus` or `from_bus`.
    pub fn id(&self, name: &str) -> Result<i64, AttributeIssue> {
        let value = self.number(name)?;
        if value.fract() != 0.0 {
            return Err(AttributeIssue::NotNumeric);
        }
        Ok(value as i64)
    }

    pub fn flag_or(&self, name: &str, default: bool) -> Result<bool, AttributeIssue> {
        match self.0.get(name) {
            None | Some(Value::Null) => Ok(default),
            Some(Value::Bool(b)) => Ok(*b),
            Some(Value::String(s)) => match s.trim() {
                "True" | "true" => Ok(true),
                "False" | "false" => Ok(false),
                _ => Err(AttributeIssue::NotBoolean),
            },
            Some(_) => Err(AttributeIssue::NotBoolean),
        }
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }
}

impl From<Map<String, Value>> for Attributes {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_number_accepts_numeric_strings() {
        let attrs = Attributes::new().with("vn_kv", "20.0").with("length_km", 1.5);
        assert_eq!(attrs.number("vn_kv"), Ok(20.0));
        assert_eq!(attrs.number("length_km"), Ok(1.5));
    }

    #[test]
    fn test_number_rejects_garbage() {
        let attrs = Attributes::new().with("vn_kv", "twenty").with("flag", true);
        assert_eq!(attrs.number("vn_kv"), Err(AttributeIssue::NotNumeric));
        assert_eq!(attrs.number("flag"), Err(AttributeIssue::NotNumeric));
        assert_eq!(attrs.number("absent"), Err(AttributeIssue::Missing));
    }

    #[test]
    fn test_flag_parses_python_style_strings() {
        let attrs = Attributes::new().with("slack", "True").with("other", "nope");
        assert_eq!(attrs.flag_or("slack", false), Ok(true));
        assert_eq!(attrs.flag_or("missing", false), Ok(false));
        assert_eq!(attrs.flag_or("other", false), Err(AttributeIssue::NotBoolean));
    }

    #[test]
    fn test_get_attribute_falls_back_to_default() {
        let attrs = Attributes::new().with("type", "Shiftable");
        let default = json!("Inflexible");
        assert_eq!(attrs.get_attribute("type", &default), &json!("Shiftable"));
        assert_eq!(attrs.get_attribute("nothing", &default), &default);
    }

    #[test]
    fn test_id_rejects_fractions() {
        let attrs = Attributes::new().with("bus", 3).with("odd", 2.5);
        assert_eq!(attrs.id("bus"), Ok(3));
        assert_eq!(attrs.id("odd"), Err(AttributeIssue::NotNumeric));
    }
}

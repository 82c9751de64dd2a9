//! Time-series primitives: the scheduling horizon and sensor observations.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use super::SensorId;

#[derive(Debug, Error, PartialEq)]
pub enum DataGapError {
    #[error("horizon [{start}, {end}) is not a whole number of {resolution_secs}s slots")]
    UnevenHorizon {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        resolution_secs: i64,
    },
    #[error("sensor {sensor}: no observation for slot {slot} ({at})")]
    MissingSlot {
        sensor: SensorId,
        slot: usize,
        at: DateTime<Utc>,
    },
    #[error("sensor {sensor}: expected {expected} values, found {found}")]
    LengthMismatch {
        sensor: SensorId,
        expected: usize,
        found: usize,
    },
}

/// Ordered fixed-resolution timesteps `[start, start+res, ...)` ending before `end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Horizon {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(with = "resolution_secs")]
    pub resolution: Duration,
}

impl Horizon {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>, resolution: Duration) -> Result<Self, DataGapError> {
        let horizon = Self { start, end, resolution };
        horizon.checked_len()?;
        Ok(horizon)
    }

    fn checked_len(&self) -> Result<usize, DataGapError> {
        let res = self.resolution.num_seconds();
        let span = (self.end - self.start).num_seconds();
        if res <= 0 || span <= 0 || span % res != 0 {
            return Err(DataGapError::UnevenHorizon {
                start: self.start,
                end: self.end,
                resolution_secs: res,
            });
        }
        Ok((span / res) as usize)
    }

    pub fn len(&self) -> usize {
        self.checked_len().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn slot_start(&self, slot: usize) -> DateTime<Utc> {
        self.start + self.resolution * slot as i32
    }

    pub fn slot_of(&self, at: DateTime<Utc>) -> Option<usize> {
        if at < self.start || at >= self.end {
            return None;
        }
        let offset = (at - self.start).num_seconds();
        let res = self.resolution.num_seconds();
        (offset % res == 0).then(|| (offset / res) as usize)
    }

    pub fn resolution_hours(&self) -> f64 {
        self.resolution.num_seconds() as f64 / 3600.0
    }
}

pub(crate) mod resolution_secs {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_i64(d.num_seconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::seconds(i64::deserialize(d)?))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataSource {
    pub id: i64,
    pub name: String,
    pub source_type: String,
}

/// An immutable belief about one sensor slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub sensor_id: SensorId,
    pub event_start: DateTime<Utc>,
    pub belief_time: DateTime<Utc>,
    pub value: f64,
    pub source: String,
}

/// Lay observations onto the horizon slots.
///
/// When several beliefs exist for the same slot the most recent belief wins.
/// Observations outside the horizon or off the slot grid are ignored; every
/// slot must end up with a value.
pub fn align_to_horizon(
    sensor: SensorId,
    horizon: &Horizon,
    observations: &[Observation],
) -> Result<Vec<f64>, DataGapError> {
    let mut latest: BTreeMap<usize, (DateTime<Utc>, f64)> = BTreeMap::new();
    for obs in observations {
        let Some(slot) = horizon.slot_of(obs.event_start) else {
            continue;
        };
        match latest.get(&slot) {
            Some((belief_time, _)) if *belief_time > obs.belief_time => {}
            _ => {
                latest.insert(slot, (obs.belief_time, obs.value));
            }
        }
    }

    (0..horizon.len())
        .map(|slot| {
            latest.get(&slot).map(|(_, v)| *v).ok_or(DataGapError::MissingSlot {
                sensor,
                slot,
                at: horizon.slot_start(slot),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn horizon(hours: i64) -> Horizon {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        Horizon::new(start, start + Duration::hours(hours), Duration::hours(1)).unwrap()
    }

    fn obs(h: &Horizon, slot: usize, value: f64, belief_offset_min: i64) -> Observation {
        Observation {
            sensor_id: 1,
            event_start: h.slot_start(slot),
            belief_time: h.start + Duration::minutes(belief_offset_min),
            value,
            source: "thesis".into(),
        }
    }

    #[test]
    fn test_horizon_length_and_slots() {
        let h = horizon(3);
        assert_eq!(h.len(), 3);
        assert_eq!(h.slot_of(h.start + Duration::hours(2)), Some(2));
        assert_eq!(h.slot_of(h.end), None);
        assert_eq!(h.slot_of(h.start + Duration::minutes(30)), None);
        assert!((h.resolution_hours() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_uneven_horizon_rejected() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let err = Horizon::new(start, start + Duration::minutes(90), Duration::hours(1)).unwrap_err();
        assert!(matches!(err, DataGapError::UnevenHorizon { .. }));
    }

    #[test]
    fn test_align_prefers_latest_belief() {
        let h = horizon(2);
        let observations = vec![obs(&h, 0, 1.0, 0), obs(&h, 0, 5.0, 10), obs(&h, 1, 2.0, 0)];
        assert_eq!(align_to_horizon(1, &h, &observations).unwrap(), vec![5.0, 2.0]);
    }

    #[test]
    fn test_align_reports_missing_slot() {
        let h = horizon(3);
        let observations = vec![obs(&h, 0, 1.0, 0), obs(&h, 2, 2.0, 0)];
        let err = align_to_horizon(1, &h, &observations).unwrap_err();
        assert!(matches!(err, DataGapError::MissingSlot { slot: 1, .. }));
    }
}

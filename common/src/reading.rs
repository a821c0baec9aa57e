//! The reading produced by one sampling cycle.

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

/// Marker stored in place of a group whose source failed.
pub const ERROR_MARKER: &str = "error";

/// Rounds to two decimal digits, half away from zero.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// A single measurement inside a group.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Field {
    /// Always stored rounded to two decimals.
    Float(f64),
    Int(i64),
}

impl Field {
    pub fn float(value: f64) -> Self {
        Self::Float(round2(value))
    }

    pub fn as_f64(&self) -> f64 {
        match *self {
            Self::Float(value) => value,
            Self::Int(value) => value as f64,
        }
    }
}

impl Serialize for Field {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match *self {
            Self::Float(value) => serializer.serialize_f64(value),
            Self::Int(value) => serializer.serialize_i64(value),
        }
    }
}

/// Named fields measured by one physical sensor, in insertion order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Group {
    fields: Vec<(&'static str, Field)>,
}

impl Group {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a float field, rounded to two decimals.
    pub fn with_float(mut self, name: &'static str, value: f64) -> Self {
        self.fields.push((name, Field::float(value)));
        self
    }

    pub fn with_int(mut self, name: &'static str, value: i64) -> Self {
        self.fields.push((name, Field::Int(value)));
        self
    }

    pub fn get(&self, name: &str) -> Option<Field> {
        self.fields
            .iter()
            .find(|(field, _)| *field == name)
            .map(|(_, value)| *value)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&'static str, Field)> + '_ {
        self.fields.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Serialize for Group {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Either the data of a group or the error marker.
#[derive(Clone, Debug, PartialEq)]
pub enum GroupValue {
    Valid(Group),
    Error,
}

impl GroupValue {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }

    pub fn as_group(&self) -> Option<&Group> {
        match self {
            Self::Valid(group) => Some(group),
            Self::Error => None,
        }
    }
}

impl Serialize for GroupValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Valid(group) => group.serialize(serializer),
            Self::Error => serializer.serialize_str(ERROR_MARKER),
        }
    }
}

/// One cycle's merged sensor output.
///
/// Serialized as a flat JSON object: the `timestamp`, one entry per group
/// (an object, or `"error"`), and `uploaded_at_ms` once the gateway has
/// stamped it.
#[derive(Clone, Debug, PartialEq)]
pub struct SensorReading {
    timestamp: u32,
    groups: Vec<(&'static str, GroupValue)>,
    uploaded_at_ms: Option<u64>,
}

impl SensorReading {
    /// Creates an empty reading taken at `timestamp` milliseconds since boot.
    pub fn new(timestamp: u32) -> Self {
        Self {
            timestamp,
            groups: Vec::new(),
            uploaded_at_ms: None,
        }
    }

    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    pub fn uploaded_at_ms(&self) -> Option<u64> {
        self.uploaded_at_ms
    }

    /// Adds a group. A second group with the same name replaces the first,
    /// keeping its position.
    pub fn push_group(&mut self, name: &'static str, value: GroupValue) {
        match self.groups.iter_mut().find(|(group, _)| *group == name) {
            Some(slot) => slot.1 = value,
            None => self.groups.push((name, value)),
        }
    }

    pub fn group(&self, name: &str) -> Option<&GroupValue> {
        self.groups
            .iter()
            .find(|(group, _)| *group == name)
            .map(|(_, value)| value)
    }

    /// Value of `field` in `group`, if the group is present and valid.
    pub fn field(&self, group: &str, field: &str) -> Option<f64> {
        self.group(group)
            .and_then(GroupValue::as_group)
            .and_then(|group| group.get(field))
            .map(|field| field.as_f64())
    }

    pub fn groups(&self) -> impl Iterator<Item = (&'static str, &GroupValue)> + '_ {
        self.groups.iter().map(|(name, value)| (*name, value))
    }

    pub fn stamp_upload(&mut self, uploaded_at_ms: u64) {
        self.uploaded_at_ms = Some(uploaded_at_ms);
    }

    pub fn to_json(&self) -> serde_json::Value {
        // Serializing numbers, strings and string-keyed maps cannot fail.
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl Serialize for SensorReading {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = 1 + self.groups.len() + usize::from(self.uploaded_at_ms.is_some());
        let mut map = serializer.serialize_map(Some(len))?;
        map.serialize_entry("timestamp", &self.timestamp)?;
        for (name, value) in &self.groups {
            map.serialize_entry(name, value)?;
        }
        if let Some(uploaded_at_ms) = self.uploaded_at_ms {
            map.serialize_entry("uploaded_at_ms", &uploaded_at_ms)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> SensorReading {
        let mut reading = SensorReading::new(1234);
        reading.push_group(
            "dht11",
            GroupValue::Valid(
                Group::new()
                    .with_float("temperature", 19.864)
                    .with_float("humidity", 61.976),
            ),
        );
        reading.push_group("soilTemperature", GroupValue::Error);
        reading
    }

    #[test]
    fn floats_are_rounded_to_two_decimals() {
        assert_eq!(round2(19.864), 19.86);
        assert_eq!(round2(-3.456), -3.46);
        assert_eq!(Field::float(0.125 + 1e-9), Field::Float(0.13));
    }

    #[test]
    fn serializes_groups_and_error_marker() {
        let mut reading = sample();
        reading.stamp_upload(5000);

        assert_eq!(
            reading.to_json(),
            json!({
                "timestamp": 1234,
                "dht11": { "temperature": 19.86, "humidity": 61.98 },
                "soilTemperature": "error",
                "uploaded_at_ms": 5000,
            })
        );
    }

    #[test]
    fn serialization_keeps_insertion_order() {
        let text = serde_json::to_string(&sample()).unwrap();
        let dht = text.find("dht11").unwrap();
        let soil = text.find("soilTemperature").unwrap();
        assert!(text.starts_with("{\"timestamp\":1234"));
        assert!(dht < soil);
    }

    #[test]
    fn field_lookup_skips_error_groups() {
        let reading = sample();
        assert_eq!(reading.field("dht11", "temperature"), Some(19.86));
        assert_eq!(reading.field("dht11", "heatIndex"), None);
        assert_eq!(reading.field("soilTemperature", "celsius"), None);
        assert_eq!(reading.field("bme280", "pressure"), None);
    }

    #[test]
    fn pushing_a_group_twice_replaces_it() {
        let mut reading = sample();
        reading.push_group("dht11", GroupValue::Error);
        assert_eq!(reading.groups().count(), 2);
        assert_eq!(reading.group("dht11"), Some(&GroupValue::Error));
    }
}

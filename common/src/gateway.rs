//! Upload of readings to a remote tree-structured database.

use core::fmt;

use log::{debug, info, warn};

use crate::reading::SensorReading;
use crate::sensor::{DHT_GROUP, SOIL_MOISTURE_GROUP, SOIL_TEMPERATURE_GROUP};

/// A remote write that did not go through.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteError {
    pub reason: String,
}

impl WriteError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "write failed: {}", self.reason)
    }
}

impl std::error::Error for WriteError {}

/// Write access to a tree-structured store addressed by slash-delimited
/// paths. A write replaces whatever was stored at the path before.
pub trait TreeStore {
    fn set_scalar(&mut self, path: &str, value: f64) -> Result<(), WriteError>;

    fn set_record(&mut self, path: &str, record: &serde_json::Value) -> Result<(), WriteError>;
}

/// Paths of one node: `<owner>/FarmData/<node>/...`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodePath {
    base: String,
}

impl NodePath {
    pub fn new(owner: &str, node: &str) -> Self {
        Self {
            base: format!(
                "{}/FarmData/{}",
                owner.trim_matches('/'),
                node.trim_matches('/')
            ),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn leaf(&self, name: &str) -> String {
        format!("{}/{}", self.base, name)
    }

    pub fn record(&self, key: u64) -> String {
        format!("{}/lastReadings/{}", self.base, key)
    }

    pub fn latest(&self) -> String {
        format!("{}/lastReadings/latest", self.base)
    }
}

/// A reading field mirrored to a scalar leaf for consumers that do not
/// read nested records.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlattenedField {
    pub group: &'static str,
    pub field: &'static str,
    pub leaf: &'static str,
}

pub const FLATTENED_FIELDS: [FlattenedField; 5] = [
    FlattenedField {
        group: DHT_GROUP,
        field: "temperature",
        leaf: "Temperature",
    },
    FlattenedField {
        group: DHT_GROUP,
        field: "humidity",
        leaf: "Humidity",
    },
    FlattenedField {
        group: DHT_GROUP,
        field: "heatIndex",
        leaf: "HeatIndex",
    },
    FlattenedField {
        group: SOIL_TEMPERATURE_GROUP,
        field: "celsius",
        leaf: "SoilTemperature",
    },
    FlattenedField {
        group: SOIL_MOISTURE_GROUP,
        field: "percentage",
        leaf: "SoilMoisture",
    },
];

/// Outcome of one cycle's upload.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UploadReport {
    /// Paths written to, in order, whether or not the write succeeded.
    pub attempted: Vec<String>,
    /// Failed paths with the reason given by the store.
    pub failed: Vec<(String, String)>,
}

impl UploadReport {
    /// True when every attempted write succeeded.
    pub fn success(&self) -> bool {
        self.failed.is_empty()
    }

    fn record(&mut self, path: String, result: Result<(), WriteError>) {
        if let Err(e) = result {
            self.failed.push((path.clone(), e.reason));
        }
        self.attempted.push(path);
    }
}

/// Writes readings of one node to a [`TreeStore`].
pub struct UploadGateway {
    paths: NodePath,
}

impl UploadGateway {
    pub fn new(paths: NodePath) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &NodePath {
        &self.paths
    }

    pub fn write_scalar<S: TreeStore + ?Sized>(
        &self,
        store: &mut S,
        path: &str,
        value: f64,
    ) -> Result<(), WriteError> {
        debug!("{} = {}", path, value);
        store.set_scalar(path, value)
    }

    pub fn write_record<S: TreeStore + ?Sized>(
        &self,
        store: &mut S,
        path: &str,
        reading: &SensorReading,
    ) -> Result<(), WriteError> {
        let record = reading.to_json();
        debug!("{} = {}", path, record);
        store.set_record(path, &record)
    }

    /// Uploads `reading` under `lastReadings/<uploaded_at_ms>`, refreshes
    /// `lastReadings/latest`, then writes each flattened field present in
    /// the reading.
    ///
    /// Every write is attempted even if an earlier one failed.
    pub fn upload<S: TreeStore + ?Sized>(
        &self,
        store: &mut S,
        mut reading: SensorReading,
        uploaded_at_ms: u64,
    ) -> UploadReport {
        info!("Uploading sensor reading to {}", self.paths.base());
        reading.stamp_upload(uploaded_at_ms);

        let mut report = UploadReport::default();

        let path = self.paths.record(uploaded_at_ms);
        let result = self.write_record(store, &path, &reading);
        match &result {
            Ok(()) => info!("Record uploaded to {}", path),
            Err(e) => warn!("Record upload to {} failed: {}", path, e.reason),
        }
        report.record(path, result);

        let path = self.paths.latest();
        let result = self.write_record(store, &path, &reading);
        match &result {
            Ok(()) => info!("'latest' updated"),
            Err(e) => warn!("Failed to update 'latest' pointer: {}", e.reason),
        }
        report.record(path, result);

        for flattened in &FLATTENED_FIELDS {
            let Some(value) = reading.field(flattened.group, flattened.field) else {
                continue;
            };

            let path = self.paths.leaf(flattened.leaf);
            let result = self.write_scalar(store, &path, value);
            match &result {
                Ok(()) => info!("{} uploaded", flattened.leaf),
                Err(e) => warn!("{} upload failed: {}", flattened.leaf, e.reason),
            }
            report.record(path, result);
        }

        if report.success() {
            info!("All data uploaded successfully ({} writes)", report.attempted.len());
        } else {
            warn!(
                "{} of {} writes failed",
                report.failed.len(),
                report.attempted.len()
            );
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reading::{Group, GroupValue};
    use serde_json::Value;

    #[derive(Default)]
    struct Recorder {
        writes: Vec<(String, Value)>,
        reject: Option<String>,
    }

    impl TreeStore for Recorder {
        fn set_scalar(&mut self, path: &str, value: f64) -> Result<(), WriteError> {
            self.writes.push((path.to_string(), Value::from(value)));
            match &self.reject {
                Some(rejected) if path == rejected => Err(WriteError::new("permission denied")),
                _ => Ok(()),
            }
        }

        fn set_record(&mut self, path: &str, record: &Value) -> Result<(), WriteError> {
            self.writes.push((path.to_string(), record.clone()));
            match &self.reject {
                Some(rejected) if path == rejected => Err(WriteError::new("permission denied")),
                _ => Ok(()),
            }
        }
    }

    fn reading() -> SensorReading {
        let mut reading = SensorReading::new(900);
        reading.push_group(
            DHT_GROUP,
            GroupValue::Valid(
                Group::new()
                    .with_float("temperature", 19.86)
                    .with_float("humidity", 61.98)
                    .with_float("heatIndex", 19.52),
            ),
        );
        reading.push_group(SOIL_TEMPERATURE_GROUP, GroupValue::Error);
        reading.push_group(
            SOIL_MOISTURE_GROUP,
            GroupValue::Valid(
                Group::new()
                    .with_int("raw", 1825)
                    .with_int("percentage", 44),
            ),
        );
        reading
    }

    #[test]
    fn node_paths_trim_slashes() {
        let paths = NodePath::new("Niranj", "/Node1");
        assert_eq!(paths.base(), "Niranj/FarmData/Node1");
        assert_eq!(paths.record(1000), "Niranj/FarmData/Node1/lastReadings/1000");
        assert_eq!(paths.latest(), "Niranj/FarmData/Node1/lastReadings/latest");
        assert_eq!(paths.leaf("Humidity"), "Niranj/FarmData/Node1/Humidity");
    }

    #[test]
    fn upload_writes_record_latest_and_present_fields() {
        let gateway = UploadGateway::new(NodePath::new("Niranj", "Node1"));
        let mut store = Recorder::default();

        let report = gateway.upload(&mut store, reading(), 1000);

        assert!(report.success());
        let paths: Vec<_> = store.writes.iter().map(|(path, _)| path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "Niranj/FarmData/Node1/lastReadings/1000",
                "Niranj/FarmData/Node1/lastReadings/latest",
                "Niranj/FarmData/Node1/Temperature",
                "Niranj/FarmData/Node1/Humidity",
                "Niranj/FarmData/Node1/HeatIndex",
                "Niranj/FarmData/Node1/SoilMoisture",
            ]
        );
        assert_eq!(store.writes[0].1, store.writes[1].1);
        assert_eq!(store.writes[0].1["uploaded_at_ms"], 1000);
        assert_eq!(store.writes[0].1["soilTemperature"], "error");
        assert_eq!(store.writes[5].1, Value::from(44.0));
    }

    #[test]
    fn failed_write_does_not_abort_the_rest() {
        let gateway = UploadGateway::new(NodePath::new("Niranj", "Node1"));
        let mut store = Recorder {
            reject: Some("Niranj/FarmData/Node1/lastReadings/latest".into()),
            ..Default::default()
        };

        let report = gateway.upload(&mut store, reading(), 1000);

        assert!(!report.success());
        assert_eq!(store.writes.len(), 6);
        assert_eq!(report.attempted.len(), 6);
        assert_eq!(
            report.failed,
            vec![(
                "Niranj/FarmData/Node1/lastReadings/latest".to_string(),
                "permission denied".to_string()
            )]
        );
    }

    #[test]
    fn write_scalar_overwrites_a_leaf() {
        let gateway = UploadGateway::new(NodePath::new("Niranj", "Node1"));
        let mut store = crate::memory::MemoryTreeStore::new();
        let path = gateway.paths().leaf("Temperature");

        gateway.write_scalar(&mut store, &path, 19.86).unwrap();
        gateway.write_scalar(&mut store, &path, 20.5).unwrap();

        assert_eq!(store.get(&path), Some(&Value::from(20.5)));
        assert_eq!(store.writes(), 2);
    }

    #[test]
    fn write_scalar_passes_on_the_store_reason() {
        let gateway = UploadGateway::new(NodePath::new("Niranj", "Node1"));
        let path = gateway.paths().leaf("Humidity");
        let mut store = Recorder {
            reject: Some(path.clone()),
            ..Default::default()
        };

        let error = gateway.write_scalar(&mut store, &path, 61.98).unwrap_err();

        assert_eq!(error.reason, "permission denied");
        assert_eq!(store.writes, vec![(path, Value::from(61.98))]);
    }
}

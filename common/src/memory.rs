use serde_json::{Map, Value};

use crate::gateway::{TreeStore, WriteError};

/// A [`TreeStore`] kept in memory as one JSON tree.
///
/// Used by the host simulator and by tests. Writing a value replaces the
/// whole subtree at its path, like the remote database does.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MemoryTreeStore {
    root: Value,
    writes: usize,
}

impl MemoryTreeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    /// Number of successful writes so far.
    pub fn writes(&self) -> usize {
        self.writes
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        segments(path).try_fold(&self.root, |node, segment| node.get(segment))
    }

    fn set(&mut self, path: &str, value: Value) -> Result<(), WriteError> {
        let mut segments = segments(path).peekable();
        if segments.peek().is_none() {
            return Err(WriteError::new("empty path"));
        }

        let mut node = &mut self.root;
        while let Some(segment) = segments.next() {
            if !node.is_object() {
                *node = Value::Object(Map::new());
            }
            let Some(children) = node.as_object_mut() else {
                return Err(WriteError::new("path is not a subtree"));
            };
            let child = children.entry(segment.to_string()).or_insert(Value::Null);
            if segments.peek().is_none() {
                *child = value;
                self.writes += 1;
                return Ok(());
            }
            node = child;
        }

        Ok(())
    }
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|segment| !segment.is_empty())
}

impl TreeStore for MemoryTreeStore {
    fn set_scalar(&mut self, path: &str, value: f64) -> Result<(), WriteError> {
        self.set(path, Value::from(value))
    }

    fn set_record(&mut self, path: &str, record: &Value) -> Result<(), WriteError> {
        self.set(path, record.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_paths_create_intermediate_nodes() {
        let mut store = MemoryTreeStore::new();
        store.set_scalar("owner/FarmData/Node1/Temperature", 19.86).unwrap();
        store
            .set_record("owner/FarmData/Node1/lastReadings/latest", &json!({ "a": 1 }))
            .unwrap();

        assert_eq!(
            store.root(),
            &json!({
                "owner": { "FarmData": { "Node1": {
                    "Temperature": 19.86,
                    "lastReadings": { "latest": { "a": 1 } },
                }}}
            })
        );
        assert_eq!(store.get("/owner/FarmData/Node1/Temperature/"), Some(&json!(19.86)));
        assert_eq!(store.writes(), 2);
    }

    #[test]
    fn writes_replace_subtrees() {
        let mut store = MemoryTreeStore::new();
        store.set_record("a/b", &json!({ "x": 1, "y": 2 })).unwrap();
        store.set_record("a/b", &json!({ "z": 3 })).unwrap();
        store.set_scalar("a/c/d", 1.0).unwrap();
        store.set_scalar("a/c", 2.0).unwrap();

        assert_eq!(store.root(), &json!({ "a": { "b": { "z": 3 }, "c": 2.0 } }));
    }

    #[test]
    fn empty_path_is_rejected() {
        let mut store = MemoryTreeStore::new();
        assert!(store.set_scalar("//", 1.0).is_err());
        assert_eq!(store.writes(), 0);
    }
}

//! Named data blobs produced and consumed by tasks, plus the per-node store
//! that stands in for each node's local disk.
//!
//! Naming convention: the intermediate file for reduce bucket `j` of map
//! task `i` is `intermediate{j}-{i}`; the final output of reduce task `i`
//! is `output{i}`.

use std::collections::HashMap;

/// A named blob. Artifacts ride along with messages and are copied into the
/// receiving node's store on delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub name: String,
    pub data: String,
}

impl Artifact {
    pub fn new(name: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

/// Name of the intermediate artifact for reduce bucket `bucket` of map task
/// `map_index`.
pub fn intermediate_name(bucket: usize, map_index: usize) -> String {
    format!("intermediate{}-{}", bucket, map_index)
}

/// Name of the final output artifact of reduce task `index`.
pub fn output_name(index: usize) -> String {
    format!("output{}", index)
}

/// Per-node local artifact storage, keyed by name.
///
/// Inserting an existing name overwrites it; task outputs are deterministic
/// per task identity, so a rewrite is always byte-identical in practice.
#[derive(Debug, Clone, Default)]
pub struct ArtifactStore {
    entries: HashMap<String, Artifact>,
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, artifact: Artifact) {
        self.entries.insert(artifact.name.clone(), artifact);
    }

    pub fn insert_all(&mut self, artifacts: impl IntoIterator<Item = Artifact>) {
        for artifact in artifacts {
            self.insert(artifact);
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Artifact> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

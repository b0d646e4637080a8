//! Instance discovery.
//!
//! veadotube writes one descriptor file per running instance into a shared
//! directory and deletes it on exit. [`InstanceRegistry`] turns per-file
//! notifications into [`DiscoveryEvent`]s and [`DiscoveryWatcher`] feeds it
//! file names from the filesystem.
//!
//! Descriptor writes are not atomic, so a notification can observe an empty
//! or half-written file. Those are ignored; the write that completes the file
//! produces another notification.

mod watcher;

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};
use veado_types::{Instance, InstanceFile};

use crate::Result;
use crate::parse::{ParsedValue, SafeParser};

pub use watcher::DiscoveryWatcher;

/// Change to the set of running instances
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    Appeared(Instance),
    /// Known id whose `server` changed
    Updated(Instance),
    Gone(String),
}

impl DiscoveryEvent {
    #[must_use]
    pub fn instance_id(&self) -> &str {
        match self {
            DiscoveryEvent::Appeared(instance) | DiscoveryEvent::Updated(instance) => &instance.id,
            DiscoveryEvent::Gone(id) => id,
        }
    }
}

/// Instances currently described by files in the instances directory
#[derive(Debug)]
pub struct InstanceRegistry {
    dir: PathBuf,
    parser: Arc<SafeParser>,
    instances: HashMap<String, Instance>,
}

impl InstanceRegistry {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, parser: Arc<SafeParser>) -> Self {
        Self {
            dir: dir.into(),
            parser,
            instances: HashMap::new(),
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Instance id for a descriptor file name. Names that parse to anything
    /// other than text keep their literal spelling.
    #[must_use]
    pub fn instance_id(&self, filename: &str) -> String {
        match self.parser.parse(filename) {
            ParsedValue::Text(id) => id,
            _ => filename.trim().to_string(),
        }
    }

    /// Re-read one descriptor file and reconcile the registry with it.
    pub fn process_file(&mut self, filename: &str) -> Option<DiscoveryEvent> {
        let id = self.instance_id(filename);
        let path = self.dir.join(filename);

        match std::fs::read_to_string(&path) {
            Ok(content) => self.apply_descriptor(id, &content),
            Err(e) if e.kind() == ErrorKind::NotFound => self.remove(&id),
            Err(e) => {
                warn!("Failed to read instance file {:?}: {}", path, e);
                None
            }
        }
    }

    /// Process every file currently in the directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be listed.
    pub fn scan(&mut self) -> Result<Vec<DiscoveryEvent>> {
        let mut events = Vec::new();
        for entry in std::fs::read_dir(&self.dir)?.flatten() {
            let filename = entry.file_name();
            if let Some(event) = self.process_file(&filename.to_string_lossy()) {
                events.push(event);
            }
        }
        Ok(events)
    }

    fn apply_descriptor(&mut self, id: String, content: &str) -> Option<DiscoveryEvent> {
        if content.is_empty() {
            debug!("Instance file for {} is empty, waiting for write", id);
            return None;
        }

        let parsed = self.parser.parse(content);
        let file: InstanceFile = match serde_json::from_value(parsed.into_json()) {
            Ok(file) => file,
            Err(e) => {
                debug!("Ignoring incomplete instance file for {}: {}", id, e);
                return None;
            }
        };

        let known = match self.instances.get(&id) {
            Some(existing) if existing.server == file.server => return None,
            Some(_) => true,
            None => false,
        };

        let instance = Instance::from_file(id, file);
        info!(
            "Instance {}: id={}, server={}",
            if known { "updated" } else { "detected" },
            instance.id,
            instance.server
        );
        self.instances
            .insert(instance.id.clone(), instance.clone());

        Some(if known {
            DiscoveryEvent::Updated(instance)
        } else {
            DiscoveryEvent::Appeared(instance)
        })
    }

    fn remove(&mut self, id: &str) -> Option<DiscoveryEvent> {
        self.instances.remove(id).map(|instance| {
            info!("Instance closed: id={}", instance.id);
            DiscoveryEvent::Gone(instance.id)
        })
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Instance> {
        self.instances.get(id)
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.instances.contains_key(id)
    }

    pub fn instances(&self) -> impl Iterator<Item = &Instance> {
        self.instances.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn clear(&mut self) {
        self.instances.clear();
    }
}

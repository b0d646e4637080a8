//! Per-instance state and thumbnail cache.
//!
//! Everything here is derived from protocol events and can be rebuilt with a
//! fresh `list`/`peek` round trip. Each handler returns the notifications the
//! update produced, in the order they should be delivered.

use std::collections::HashMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::{debug, warn};
use veado_types::{Entry, State, Thumbnail};

/// A state transition with the value it replaced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub instance_id: String,
    pub previous_state: Option<String>,
    pub new_state: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    StateListUpdated {
        instance_id: String,
        states: Vec<State>,
    },
    StateDiscovered {
        instance_id: String,
        state: State,
    },
    StateChanged(StateChange),
    StatePeeked {
        instance_id: String,
        state: String,
    },
    ThumbnailReceived {
        instance_id: String,
        thumbnail: Thumbnail,
    },
    NodeListReceived {
        instance_id: String,
        entries: Vec<Entry>,
    },
    NodeDiscovered {
        instance_id: String,
        entry: Entry,
    },
    StateEventsNodeDiscovered {
        instance_id: String,
        entry: Entry,
    },
    InstanceCacheCleared {
        instance_id: String,
    },
    AllCacheCleared,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub instances_with_states: usize,
    pub instances_with_current_state: usize,
    pub thumbnails_cached: usize,
}

#[derive(Debug, Default)]
pub struct StateCache {
    states: HashMap<String, Vec<State>>,
    current_states: HashMap<String, String>,
    thumbnails: HashMap<(String, String), Vec<u8>>,
}

impl StateCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle_state_list(&mut self, instance_id: &str, states: Vec<State>) -> Vec<CacheEvent> {
        self.states.insert(instance_id.to_string(), states.clone());

        let mut events = Vec::with_capacity(states.len() + 1);
        events.push(CacheEvent::StateListUpdated {
            instance_id: instance_id.to_string(),
            states: states.clone(),
        });
        events.extend(states.into_iter().map(|state| CacheEvent::StateDiscovered {
            instance_id: instance_id.to_string(),
            state,
        }));
        events
    }

    pub fn handle_state_change(&mut self, instance_id: &str, new_state: &str) -> Vec<CacheEvent> {
        let previous_state = self
            .current_states
            .insert(instance_id.to_string(), new_state.to_string());

        vec![CacheEvent::StateChanged(StateChange {
            instance_id: instance_id.to_string(),
            previous_state,
            new_state: new_state.to_string(),
        })]
    }

    pub fn handle_state_peek(&mut self, instance_id: &str, state: &str) -> Vec<CacheEvent> {
        self.current_states
            .insert(instance_id.to_string(), state.to_string());

        vec![CacheEvent::StatePeeked {
            instance_id: instance_id.to_string(),
            state: state.to_string(),
        }]
    }

    pub fn handle_thumbnail(&mut self, instance_id: &str, thumbnail: Thumbnail) -> Vec<CacheEvent> {
        match STANDARD.decode(thumbnail.png.trim()) {
            Ok(bytes) => {
                debug!(
                    "Cached {}-byte thumbnail for {}:{}",
                    bytes.len(),
                    instance_id,
                    thumbnail.state
                );
                self.thumbnails
                    .insert((instance_id.to_string(), thumbnail.state.clone()), bytes);
            }
            Err(e) => warn!(
                "Thumbnail for {}:{} is not valid base64: {}",
                instance_id, thumbnail.state, e
            ),
        }

        vec![CacheEvent::ThumbnailReceived {
            instance_id: instance_id.to_string(),
            thumbnail,
        }]
    }

    /// Node lists are not cached; this only fans the entries out.
    #[must_use]
    pub fn handle_node_list(&self, instance_id: &str, entries: Vec<Entry>) -> Vec<CacheEvent> {
        let mut events = vec![CacheEvent::NodeListReceived {
            instance_id: instance_id.to_string(),
            entries: entries.clone(),
        }];
        for entry in entries {
            let is_state_events = entry.is_state_events();
            events.push(CacheEvent::NodeDiscovered {
                instance_id: instance_id.to_string(),
                entry: entry.clone(),
            });
            if is_state_events {
                events.push(CacheEvent::StateEventsNodeDiscovered {
                    instance_id: instance_id.to_string(),
                    entry,
                });
            }
        }
        events
    }

    #[must_use]
    pub fn states(&self, instance_id: &str) -> Option<&[State]> {
        self.states.get(instance_id).map(Vec::as_slice)
    }

    #[must_use]
    pub fn current_state(&self, instance_id: &str) -> Option<&str> {
        self.current_states.get(instance_id).map(String::as_str)
    }

    #[must_use]
    pub fn thumbnail(&self, instance_id: &str, state_id: &str) -> Option<&[u8]> {
        self.thumbnails
            .get(&(instance_id.to_string(), state_id.to_string()))
            .map(Vec::as_slice)
    }

    pub fn clear_instance(&mut self, instance_id: &str) -> CacheEvent {
        self.states.remove(instance_id);
        self.current_states.remove(instance_id);
        self.thumbnails.retain(|(owner, _), _| owner != instance_id);

        CacheEvent::InstanceCacheCleared {
            instance_id: instance_id.to_string(),
        }
    }

    pub fn clear(&mut self) -> CacheEvent {
        self.states.clear();
        self.current_states.clear();
        self.thumbnails.clear();
        CacheEvent::AllCacheCleared
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            instances_with_states: self.states.len(),
            instances_with_current_state: self.current_states.len(),
            thumbnails_cached: self.thumbnails.len(),
        }
    }
}

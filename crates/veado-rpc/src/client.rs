//! Discovery-driven client for every running veadotube instance.
//!
//! [`VeadoClient`] is a handle to a single control task. The task owns the
//! instance registry, one [`Connection`] per instance and the state cache,
//! and applies file notifications, connection events and handle commands to
//! them one at a time. Everything observable is reported as a
//! [`ClientEvent`] on the receiver returned from [`VeadoClient::start`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use veado_core::config::ClientConfig;
use veado_core::{
    CacheEvent, CacheStats, DiscoveryEvent, DiscoveryWatcher, InstanceRegistry, SafeParser,
    StateCache,
};
use veado_types::{Instance, Request, State};

use crate::connection::{
    Connection, ConnectionEvent, ConnectionEventKind, ConnectionInfo, ConnectionSettings,
};
use crate::protocol::ProtocolEvent;
use crate::{Error, Result};

/// How long shutdown waits for each session to unsubscribe and close
const CLOSE_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    InstanceStart(Instance),
    /// A known instance moved to a new server address
    InstanceUpdated(Instance),
    InstanceEnd(String),
    Connection(ConnectionEvent),
    Cache(CacheEvent),
}

enum ClientCommand {
    Instances(oneshot::Sender<Vec<Instance>>),
    Connect {
        instance_id: String,
        name: Option<String>,
        reply: oneshot::Sender<bool>,
    },
    Disconnect {
        instance_id: String,
        reply: oneshot::Sender<bool>,
    },
    Send {
        instance_id: String,
        request: Request,
        reply: oneshot::Sender<bool>,
    },
    ConnectionInfo {
        instance_id: String,
        reply: oneshot::Sender<Option<ConnectionInfo>>,
    },
    States {
        instance_id: String,
        reply: oneshot::Sender<Option<Vec<State>>>,
    },
    CurrentState {
        instance_id: String,
        reply: oneshot::Sender<Option<String>>,
    },
    Thumbnail {
        instance_id: String,
        state_id: String,
        reply: oneshot::Sender<Option<Vec<u8>>>,
    },
    CacheStats(oneshot::Sender<CacheStats>),
    Close(oneshot::Sender<()>),
}

/// Handle to a running client
#[derive(Debug)]
pub struct VeadoClient {
    config: ClientConfig,
    commands: mpsc::UnboundedSender<ClientCommand>,
    task: Option<JoinHandle<()>>,
}

impl VeadoClient {
    /// Watch the instances directory, process every descriptor already in
    /// it and start the control task.
    ///
    /// # Errors
    ///
    /// Fails if the instances directory does not exist or cannot be
    /// watched or listed.
    pub fn start(config: ClientConfig) -> Result<(Self, mpsc::UnboundedReceiver<ClientEvent>)> {
        Self::start_with_parser(config, Arc::new(SafeParser::new()))
    }

    /// Like [`start`](Self::start), sharing a custom parser between
    /// discovery and frame decoding.
    ///
    /// # Errors
    ///
    /// See [`start`](Self::start).
    pub fn start_with_parser(
        config: ClientConfig,
        parser: Arc<SafeParser>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ClientEvent>)> {
        let (file_tx, file_rx) = mpsc::unbounded_channel();
        let watcher = DiscoveryWatcher::spawn(&config.instances_dir, file_tx)?;

        let mut registry = InstanceRegistry::new(&config.instances_dir, Arc::clone(&parser));
        let initial = registry.scan()?;
        info!(
            "Found {} running instance(s) in {:?}",
            initial.len(),
            config.instances_dir
        );

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (connection_tx, connection_rx) = mpsc::unbounded_channel();

        let control = ControlLoop {
            config: config.clone(),
            parser,
            registry,
            watcher: Some(watcher),
            connections: HashMap::new(),
            cache: StateCache::new(),
            events: event_tx,
            connection_tx,
        };
        let task = tokio::spawn(control.run(initial, file_rx, connection_rx, command_rx));

        Ok((
            Self {
                config,
                commands: command_tx,
                task: Some(task),
            },
            event_rx,
        ))
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> ClientCommand) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(make(reply))
            .map_err(|_| Error::Closed)?;
        rx.await.map_err(|_| Error::Closed)
    }

    /// Instances currently described in the instances directory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] after [`close`](Self::close).
    pub async fn instances(&self) -> Result<Vec<Instance>> {
        self.request(ClientCommand::Instances).await
    }

    /// Open (or reopen) the connection to a discovered instance, optionally
    /// with a custom connection name. Returns `false` for unknown ids.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] after [`close`](Self::close).
    pub async fn create_connection(&self, instance_id: &str, name: Option<&str>) -> Result<bool> {
        self.request(|reply| ClientCommand::Connect {
            instance_id: instance_id.to_string(),
            name: name.map(str::to_string),
            reply,
        })
        .await
    }

    /// Close and forget the connection to an instance.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] after [`close`](Self::close).
    pub async fn disconnect(&self, instance_id: &str) -> Result<bool> {
        self.request(|reply| ClientCommand::Disconnect {
            instance_id: instance_id.to_string(),
            reply,
        })
        .await
    }

    /// Send a request to an instance. Returns `false` when it has no open
    /// connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] after [`close`](Self::close).
    pub async fn send(&self, instance_id: &str, request: Request) -> Result<bool> {
        self.request(|reply| ClientCommand::Send {
            instance_id: instance_id.to_string(),
            request,
            reply,
        })
        .await
    }

    /// # Errors
    ///
    /// Returns [`Error::Closed`] after [`close`](Self::close).
    pub async fn set_avatar_state(&self, instance_id: &str, state: &str) -> Result<bool> {
        self.send(instance_id, Request::set_state(state)).await
    }

    /// # Errors
    ///
    /// Returns [`Error::Closed`] after [`close`](Self::close).
    pub async fn request_thumbnail(
        &self,
        instance_id: &str,
        state: &str,
        size: Option<(u32, u32)>,
    ) -> Result<bool> {
        let (width, height) = size.unzip();
        self.send(instance_id, Request::thumbnail(state, width, height))
            .await
    }

    /// # Errors
    ///
    /// Returns [`Error::Closed`] after [`close`](Self::close).
    pub async fn connection_info(&self, instance_id: &str) -> Result<Option<ConnectionInfo>> {
        self.request(|reply| ClientCommand::ConnectionInfo {
            instance_id: instance_id.to_string(),
            reply,
        })
        .await
    }

    /// Cached state list of an instance.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] after [`close`](Self::close).
    pub async fn states(&self, instance_id: &str) -> Result<Option<Vec<State>>> {
        self.request(|reply| ClientCommand::States {
            instance_id: instance_id.to_string(),
            reply,
        })
        .await
    }

    /// # Errors
    ///
    /// Returns [`Error::Closed`] after [`close`](Self::close).
    pub async fn current_state(&self, instance_id: &str) -> Result<Option<String>> {
        self.request(|reply| ClientCommand::CurrentState {
            instance_id: instance_id.to_string(),
            reply,
        })
        .await
    }

    /// Cached PNG bytes of a state thumbnail.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] after [`close`](Self::close).
    pub async fn thumbnail(&self, instance_id: &str, state_id: &str) -> Result<Option<Vec<u8>>> {
        self.request(|reply| ClientCommand::Thumbnail {
            instance_id: instance_id.to_string(),
            state_id: state_id.to_string(),
            reply,
        })
        .await
    }

    /// # Errors
    ///
    /// Returns [`Error::Closed`] after [`close`](Self::close).
    pub async fn cache_stats(&self) -> Result<CacheStats> {
        self.request(ClientCommand::CacheStats).await
    }

    /// Stop watching, close every connection and clear all state. Calling
    /// it again is a no-op.
    pub async fn close(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        if self.request(ClientCommand::Close).await.is_err() {
            debug!("Control task already stopped");
        }
        if let Err(e) = task.await {
            warn!("Control task failed: {}", e);
        }
    }
}

struct ControlLoop {
    config: ClientConfig,
    parser: Arc<SafeParser>,
    registry: InstanceRegistry,
    watcher: Option<DiscoveryWatcher>,
    connections: HashMap<String, Connection>,
    cache: StateCache,
    events: mpsc::UnboundedSender<ClientEvent>,
    connection_tx: mpsc::UnboundedSender<ConnectionEvent>,
}

impl ControlLoop {
    async fn run(
        mut self,
        initial: Vec<DiscoveryEvent>,
        mut files: mpsc::UnboundedReceiver<String>,
        mut connection_events: mpsc::UnboundedReceiver<ConnectionEvent>,
        mut commands: mpsc::UnboundedReceiver<ClientCommand>,
    ) {
        for event in initial {
            self.on_discovery(event);
        }

        loop {
            tokio::select! {
                Some(filename) = files.recv() => {
                    if let Some(event) = self.registry.process_file(&filename) {
                        self.on_discovery(event);
                    }
                }
                Some(event) = connection_events.recv() => self.on_connection_event(event),
                command = commands.recv() => match command {
                    Some(ClientCommand::Close(reply)) => {
                        self.shutdown().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.on_command(command),
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
            }
        }
        info!("Client stopped");
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }

    fn on_discovery(&mut self, event: DiscoveryEvent) {
        match event {
            DiscoveryEvent::Appeared(instance) => {
                self.emit(ClientEvent::InstanceStart(instance.clone()));
                if self.config.auto_connect {
                    self.connect(&instance, None);
                }
            }
            DiscoveryEvent::Updated(instance) => {
                self.emit(ClientEvent::InstanceUpdated(instance.clone()));
                if self.config.auto_connect || self.connections.contains_key(&instance.id) {
                    self.connect(&instance, None);
                }
            }
            DiscoveryEvent::Gone(id) => {
                if let Some(connection) = self.connections.remove(&id) {
                    connection.close();
                }
                if self.config.connection_config.enable_cache {
                    let event = self.cache.clear_instance(&id);
                    self.emit(ClientEvent::Cache(event));
                }
                self.emit(ClientEvent::InstanceEnd(id));
            }
        }
    }

    /// Replace any existing connection for the instance.
    fn connect(&mut self, instance: &Instance, name: Option<String>) {
        let mut settings = ConnectionSettings::from_config(&self.config, &instance.id);
        if let Some(name) = name {
            settings.name = name;
        }

        if let Some(previous) = self.connections.remove(&instance.id) {
            previous.close();
        }
        let connection = Connection::spawn(
            instance,
            settings,
            Arc::clone(&self.parser),
            self.connection_tx.clone(),
        );
        self.connections.insert(instance.id.clone(), connection);
    }

    fn on_connection_event(&mut self, event: ConnectionEvent) {
        let current = self
            .connections
            .get(&event.instance_id)
            .map(Connection::serial);
        if current != Some(event.serial) {
            debug!(
                "[{}] Dropping event from replaced connection: {:?}",
                event.instance_id, event.kind
            );
            return;
        }

        let cache_events = match &event.kind {
            ConnectionEventKind::Protocol(protocol)
                if self.config.connection_config.enable_cache =>
            {
                self.update_cache(&event.instance_id, protocol)
            }
            _ => Vec::new(),
        };

        self.emit(ClientEvent::Connection(event));
        for cache_event in cache_events {
            self.emit(ClientEvent::Cache(cache_event));
        }
    }

    fn update_cache(&mut self, instance_id: &str, event: &ProtocolEvent) -> Vec<CacheEvent> {
        match event {
            ProtocolEvent::StateList(states) => {
                self.cache.handle_state_list(instance_id, states.clone())
            }
            ProtocolEvent::StatePeeked(state) => self.cache.handle_state_peek(instance_id, state),
            ProtocolEvent::StateChanged(state) => {
                self.cache.handle_state_change(instance_id, state)
            }
            ProtocolEvent::Thumbnail(thumbnail) => {
                self.cache.handle_thumbnail(instance_id, thumbnail.clone())
            }
            ProtocolEvent::NodeList { entries, .. } => {
                self.cache.handle_node_list(instance_id, entries.clone())
            }
            ProtocolEvent::EntryList { .. }
            | ProtocolEvent::StateEvent { .. }
            | ProtocolEvent::Unrecognized(_) => Vec::new(),
        }
    }

    fn on_command(&mut self, command: ClientCommand) {
        match command {
            ClientCommand::Instances(reply) => {
                let _ = reply.send(self.registry.instances().cloned().collect());
            }
            ClientCommand::Connect {
                instance_id,
                name,
                reply,
            } => {
                let instance = self.registry.get(&instance_id).cloned();
                let found = instance.is_some();
                if let Some(instance) = instance {
                    self.connect(&instance, name);
                }
                let _ = reply.send(found);
            }
            ClientCommand::Disconnect { instance_id, reply } => {
                let closed = self
                    .connections
                    .remove(&instance_id)
                    .is_some_and(|connection| connection.close());
                let _ = reply.send(closed);
            }
            ClientCommand::Send {
                instance_id,
                request,
                reply,
            } => {
                let sent = self
                    .connections
                    .get(&instance_id)
                    .is_some_and(|connection| connection.send(&request));
                let _ = reply.send(sent);
            }
            ClientCommand::ConnectionInfo { instance_id, reply } => {
                let _ = reply.send(self.connections.get(&instance_id).map(Connection::info));
            }
            ClientCommand::States { instance_id, reply } => {
                let _ = reply.send(self.cache.states(&instance_id).map(<[State]>::to_vec));
            }
            ClientCommand::CurrentState { instance_id, reply } => {
                let _ = reply.send(self.cache.current_state(&instance_id).map(str::to_string));
            }
            ClientCommand::Thumbnail {
                instance_id,
                state_id,
                reply,
            } => {
                let _ = reply.send(
                    self.cache
                        .thumbnail(&instance_id, &state_id)
                        .map(<[u8]>::to_vec),
                );
            }
            ClientCommand::CacheStats(reply) => {
                let _ = reply.send(self.cache.stats());
            }
            ClientCommand::Close(reply) => {
                let _ = reply.send(());
            }
        }
    }

    async fn shutdown(&mut self) {
        info!("Shutting down client");
        self.watcher = None;

        let connections: Vec<Connection> = self.connections.drain().map(|(_, c)| c).collect();
        for connection in &connections {
            connection.close();
        }
        for connection in connections {
            let id = connection.instance_id().to_string();
            if tokio::time::timeout(CLOSE_GRACE, connection.join())
                .await
                .is_err()
            {
                warn!("[{}] Session did not stop within {:?}", id, CLOSE_GRACE);
            }
        }

        self.registry.clear();
        if self.config.connection_config.enable_cache {
            let event = self.cache.clear();
            self.emit(ClientEvent::Cache(event));
        }
    }
}

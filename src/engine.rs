//! The engine value that owns the registry and coordinates everything else.
//!
//! One `Engine` is built by the process entry point and handed by reference
//! to whatever needs it. Registry mutations take the internal registry lock
//! only for the mutation itself; the resulting data events are delivered
//! after the lock is released, so listeners may freely call back into the
//! engine. Longer sequences of work (tasks, session installs) are serialized
//! through the shared execution lock handle.

use crate::{
    about,
    cancel::CancellationToken,
    catalog::{DataFormatCatalog, OperationCatalog, Plugin, PluginRegistry},
    client::{Client, ClientMessages, ClientTaskObserver},
    config::EngineConfig,
    data::{Collection, DataKind, DataObject, Formattable},
    error::EngineError,
    notify::{DataEvent, DataListener, LogLevel, MessageListener, NotificationBus},
    pool::WorkerPool,
    protocol::ProtocolState,
    registry::DataStorage,
    session::{
        self, DisplaySettings, OutputTabs, RestoredSession, SessionReader, SessionSnapshot,
        WorkspaceState,
    },
    task::{Task, TaskError, TaskEvent, TaskObserver},
};
use motiflab_protocol::{Capabilities, SESSION_FORMAT_VERSION, TaskStatus};
use parking_lot::{ReentrantMutex, RwLock};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufWriter, Read, Write},
    sync::Arc,
};

/// Lock handle shared by everything that runs multi-step work on the engine.
pub type ExecutionLock = Arc<ReentrantMutex<()>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSummary {
    pub name: String,
    pub kind: String,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSummary {
    pub object_count: usize,
    pub default_collection: String,
    pub default_collection_size: usize,
    pub updates_allowed: bool,
    pub objects: Vec<DataSummary>,
    pub open_tabs: Vec<String>,
    pub selected_tab: Option<String>,
    pub protocol: Option<String>,
}

/// Relays task progress onto the notification bus.
struct TaskForwarder {
    bus: Arc<NotificationBus>,
}

impl TaskObserver for TaskForwarder {
    fn task_changed(&self, event: &TaskEvent) {
        match event {
            TaskEvent::Status { task, status } => {
                tracing::debug!(task = %task, status = %status, "task status changed");
            }
            TaskEvent::Message { message, .. } => self.bus.status_message(message),
            TaskEvent::Progress { percent, .. } => self.bus.progress_report(*percent),
        }
    }
}

struct ClientSlot {
    client: Arc<dyn Client>,
    listener: Arc<dyn MessageListener>,
}

pub struct Engine {
    registry: RwLock<DataStorage>,
    bus: Arc<NotificationBus>,
    operations: OperationCatalog,
    formats: DataFormatCatalog,
    plugins: PluginRegistry,
    client: RwLock<Option<ClientSlot>>,
    config: RwLock<EngineConfig>,
    workspace: RwLock<WorkspaceState>,
    pool: WorkerPool,
    execution_lock: ExecutionLock,
    task_forwarder: Arc<dyn TaskObserver>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let bus = Arc::new(NotificationBus::new());
        Self {
            registry: RwLock::new(DataStorage::new()),
            task_forwarder: Arc::new(TaskForwarder { bus: bus.clone() }),
            bus,
            operations: OperationCatalog::with_builtins(),
            formats: DataFormatCatalog::with_builtins(),
            plugins: PluginRegistry::new(),
            client: RwLock::new(None),
            pool: WorkerPool::new(config.worker_pool_size),
            config: RwLock::new(config),
            workspace: RwLock::new(WorkspaceState::default()),
            execution_lock: Arc::new(ReentrantMutex::new(())),
        }
    }

    pub fn version() -> &'static str {
        about::ENGINE_VERSION
    }

    pub fn bus(&self) -> &NotificationBus {
        &self.bus
    }

    pub fn add_data_listener(&self, listener: Arc<dyn DataListener>) {
        self.bus.add_data_listener(listener);
    }

    pub fn remove_data_listener(&self, listener: &Arc<dyn DataListener>) {
        self.bus.remove_data_listener(listener);
    }

    pub fn add_message_listener(&self, listener: Arc<dyn MessageListener>) {
        self.bus.add_message_listener(listener);
    }

    pub fn remove_message_listener(&self, listener: &Arc<dyn MessageListener>) {
        self.bus.remove_message_listener(listener);
    }

    /// Handle that GUI threads and task runners use to take turns on the engine.
    pub fn execution_lock(&self) -> ExecutionLock {
        self.execution_lock.clone()
    }

    pub fn operations(&self) -> &OperationCatalog {
        &self.operations
    }

    pub fn formats(&self) -> &DataFormatCatalog {
        &self.formats
    }

    pub fn plugins(&self) -> &PluginRegistry {
        &self.plugins
    }

    pub fn worker_pool(&self) -> &WorkerPool {
        &self.pool
    }

    // Client

    /// Installs `client` as the front end, replacing any previous one. The
    /// client also receives every message published on the bus.
    pub fn set_client(&self, client: Option<Arc<dyn Client>>) {
        let mut slot = self.client.write();
        if let Some(old) = slot.take() {
            self.bus.remove_message_listener(&old.listener);
        }
        if let Some(client) = client {
            let listener: Arc<dyn MessageListener> = Arc::new(ClientMessages(client.clone()));
            self.bus.add_message_listener(listener.clone());
            *slot = Some(ClientSlot { client, listener });
        }
    }

    pub fn client(&self) -> Option<Arc<dyn Client>> {
        self.client.read().as_ref().map(|s| s.client.clone())
    }

    /// Passes a failure that escaped every handler to the client, or logs it.
    pub fn report_uncaught(&self, message: &str) {
        tracing::error!("{message}");
        if let Some(client) = self.client() {
            client.handle_uncaught_exception(message);
        }
    }

    pub fn shutdown(&self) {
        for plugin in self.plugins.drain() {
            tracing::debug!(plugin = plugin.name(), "shutting down plugin");
            plugin.shutdown();
        }
        if let Some(client) = self.client() {
            client.shutdown();
        }
        self.set_client(None);
    }

    // Configuration

    pub fn config(&self) -> EngineConfig {
        self.config.read().clone()
    }

    pub fn set_parameter(&self, name: &str, value: &str) -> Result<(), EngineError> {
        let pool_size = {
            let mut config = self.config.write();
            config.set_parameter(name, value)?;
            config.worker_pool_size
        };
        if name == "worker_pool_size" {
            self.pool.resize(pool_size);
        }
        tracing::info!(parameter = name, value, "engine parameter changed");
        Ok(())
    }

    // Plugins and capabilities

    pub fn register_plugin(&self, plugin: Arc<dyn Plugin>) -> Result<(), EngineError> {
        let name = plugin.name().to_string();
        if self.plugins.contains(&name) {
            return Err(EngineError::InvalidInput(format!(
                "Plugin '{name}' is already installed"
            )));
        }
        let metadata = plugin.metadata();
        let missing = self.plugins.missing(metadata.requires.iter().map(String::as_str));
        if !missing.is_empty() {
            return Err(EngineError::InvalidInput(format!(
                "Plugin '{name}' requires missing plugin(s): {}",
                missing.join(", ")
            )));
        }
        plugin.initialize(self)?;
        self.plugins.insert(plugin)?;
        self.bus
            .log_message(&format!("Installed plugin '{name}'"), LogLevel::Info);
        Ok(())
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            engine_version: Self::version().to_string(),
            session_format: SESSION_FORMAT_VERSION,
            supported_operations: self.operations.names(),
            supported_data_formats: self.formats.names(),
            installed_plugins: self.plugins.names(),
            data_kinds: DataKind::ALL.iter().map(|k| k.to_string()).collect(),
        }
    }

    // Registry

    fn mutate<F>(&self, f: F) -> Result<(), EngineError>
    where
        F: FnOnce(&mut DataStorage) -> Result<Vec<DataEvent>, EngineError>,
    {
        let events = {
            let mut registry = self.registry.write();
            f(&mut registry)?
        };
        self.bus.dispatch_all(&events);
        Ok(())
    }

    /// Runs `f` against the registry under its read lock. Keep `f` short and
    /// never call back into the engine's mutating API from it.
    pub fn with_registry<R>(&self, f: impl FnOnce(&DataStorage) -> R) -> R {
        f(&self.registry.read())
    }

    pub fn store(&self, object: DataObject) -> Result<(), EngineError> {
        self.mutate(|r| r.store(object))
    }

    /// Merges `object` into its namesake. Listeners hear "about to update"
    /// with the current value before anything changes.
    ///
    /// The update is checked again under the write lock. If a listener changed
    /// the registry in between and the update is refused, listeners are sent
    /// `Updated` with the value that is still in place.
    pub fn update(&self, object: DataObject) -> Result<(), EngineError> {
        let old = self.registry.read().check_update(&object)?;
        self.bus.dispatch(&DataEvent::AboutToUpdate {
            old,
            new: object.clone(),
        });
        let name = object.name().to_string();
        let result = self.mutate(|r| r.update(object));
        if result.is_err() {
            if let Some(current) = self.get(&name) {
                self.bus.dispatch(&DataEvent::Updated(current));
            }
        }
        result
    }

    pub fn remove(&self, name: &str) -> Result<Option<DataObject>, EngineError> {
        let (removed, events) = self.registry.write().remove(name)?;
        self.bus.dispatch_all(&events);
        Ok(removed)
    }

    pub fn rename(&self, old_name: &str, new_name: &str) -> Result<(), EngineError> {
        self.mutate(|r| r.rename(old_name, new_name))
    }

    pub fn reorder_collection(&self, name: &str, order: Vec<String>) -> Result<(), EngineError> {
        self.mutate(|r| r.reorder(name, order))
    }

    /// Removes every object except the default sequence collection.
    pub fn clear_data(&self) -> Result<(), EngineError> {
        self.mutate(|r| {
            let mut names: Vec<String> = r
                .iter()
                .map(|o| o.name().to_string())
                .filter(|n| n != r.default_collection_name())
                .collect();
            names.sort();
            let mut events = Vec::new();
            for name in names {
                events.extend(r.remove(&name)?.1);
            }
            Ok(events)
        })
    }

    pub fn updates_allowed(&self) -> bool {
        self.registry.read().updates_allowed()
    }

    pub fn set_updates_allowed(&self, allowed: bool) {
        self.registry.write().set_updates_allowed(allowed);
    }

    pub fn get(&self, name: &str) -> Option<DataObject> {
        self.registry.read().get(name).cloned()
    }

    pub fn get_of_kind(&self, name: &str, kind: DataKind) -> Option<DataObject> {
        self.registry.read().get_of_kind(name, kind).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.registry.read().contains(name)
    }

    pub fn object_count(&self) -> usize {
        self.registry.read().len()
    }

    pub fn all_of_kind(&self, kind: DataKind) -> Vec<DataObject> {
        self.registry
            .read()
            .all_of_kind(kind)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn names_of_kind(&self, kind: DataKind) -> Vec<String> {
        self.registry.read().names_of_kind(kind)
    }

    pub fn matching(&self, kind: DataKind, pattern: &str) -> Result<Vec<DataObject>, EngineError> {
        Ok(self
            .registry
            .read()
            .matching(kind, pattern)?
            .into_iter()
            .cloned()
            .collect())
    }

    pub fn in_numeric_range(
        &self,
        kind: DataKind,
        prefix: &str,
        suffix: &str,
        from: u64,
        to: u64,
    ) -> Vec<DataObject> {
        self.registry
            .read()
            .in_numeric_range(kind, prefix, suffix, from, to)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn default_collection(&self) -> Collection {
        self.registry.read().default_collection().clone()
    }

    pub fn default_collection_name(&self) -> String {
        self.registry.read().default_collection_name().to_string()
    }

    pub fn resolve_members(&self, collection_name: &str) -> Vec<DataObject> {
        self.registry
            .read()
            .resolve_members(collection_name)
            .into_iter()
            .cloned()
            .collect()
    }

    // Workspace

    pub fn display_settings(&self) -> DisplaySettings {
        self.workspace.read().display.clone()
    }

    pub fn set_display_settings(&self, display: DisplaySettings) {
        self.workspace.write().display = display;
    }

    pub fn protocol_state(&self) -> ProtocolState {
        self.workspace.read().protocol.clone()
    }

    pub fn set_protocol_state(&self, protocol: ProtocolState) {
        self.workspace.write().protocol = protocol;
    }

    pub fn output_tabs(&self) -> OutputTabs {
        self.workspace.read().tabs.clone()
    }

    pub fn open_tab(&self, name: &str) -> Result<(), EngineError> {
        if !self.contains(name) {
            return Err(EngineError::NotFound(name.to_string()));
        }
        let mut workspace = self.workspace.write();
        if !workspace.tabs.tabs.iter().any(|t| t == name) {
            workspace.tabs.tabs.push(name.to_string());
        }
        workspace.tabs.selected = Some(name.to_string());
        Ok(())
    }

    pub fn close_tab(&self, name: &str) {
        let mut workspace = self.workspace.write();
        workspace.tabs.tabs.retain(|t| t != name);
        if workspace.tabs.selected.as_deref() == Some(name) {
            workspace.tabs.selected = workspace.tabs.tabs.last().cloned();
        }
    }

    pub fn summarize_state(&self) -> StateSummary {
        let registry = self.registry.read();
        let mut objects: Vec<DataSummary> = registry
            .iter()
            .map(|o| DataSummary {
                name: o.name().to_string(),
                kind: o.kind().to_string(),
                summary: o.summary(),
            })
            .collect();
        objects.sort_by(|a, b| a.name.cmp(&b.name));
        let workspace = self.workspace.read();
        StateSummary {
            object_count: registry.len(),
            default_collection: registry.default_collection_name().to_string(),
            default_collection_size: registry.default_collection().len(),
            updates_allowed: registry.updates_allowed(),
            objects,
            open_tabs: workspace.tabs.tabs.clone(),
            selected_tab: workspace.tabs.selected.clone(),
            protocol: workspace.protocol.name.clone(),
        }
    }

    // Tasks

    /// Runs `task` to completion on the calling thread.
    ///
    /// The engine (and the client, if any) observe the task only for the
    /// duration of the call. Failures are published once on the message
    /// channel before they are returned; cancellation is returned as
    /// [`EngineError::Cancelled`].
    pub fn execute_task(&self, task: &mut Task) -> Result<(), EngineError> {
        if task.status() != TaskStatus::Created {
            return Err(EngineError::InvalidInput(format!(
                "Task '{}' has already run ({})",
                task.name(),
                task.status()
            )));
        }
        let _guard = self.execution_lock.lock();
        let client_observer: Option<Arc<dyn TaskObserver>> = self
            .client()
            .map(|c| Arc::new(ClientTaskObserver(c)) as Arc<dyn TaskObserver>);

        task.add_observer(self.task_forwarder.clone());
        if let Some(observer) = &client_observer {
            task.add_observer(observer.clone());
        }
        tracing::info!(task = task.name(), "task started");
        let result = task.run(self);
        task.remove_observer(&self.task_forwarder);
        if let Some(observer) = &client_observer {
            task.remove_observer(observer);
        }

        match result {
            Ok(()) => {
                tracing::info!(task = task.name(), "task finished");
                Ok(())
            }
            Err(TaskError::Cancelled) => {
                tracing::info!(task = task.name(), "task aborted");
                self.bus
                    .log_message(&format!("{}: Aborted!", task.name()), LogLevel::Info);
                Err(EngineError::Cancelled)
            }
            Err(err) => {
                if let TaskError::Unexpected { origin, message } = &err {
                    tracing::error!(task = task.name(), origin = %origin, "unexpected failure: {message}");
                } else {
                    tracing::warn!(task = task.name(), "task failed: {err}");
                }
                let err = EngineError::from(err);
                self.bus.error_message(&err.to_string(), err.code() as i32);
                Err(err)
            }
        }
    }

    /// Runs a protocol task after showing its script as the current protocol.
    pub fn execute_protocol_task(&self, task: &mut Task) -> Result<(), EngineError> {
        let protocol = task.protocol().ok_or_else(|| {
            EngineError::InvalidInput(format!("Task '{}' does not run a protocol", task.name()))
        })?;
        self.set_protocol_state(ProtocolState::from(protocol));
        self.execute_task(task)
    }

    // Sessions

    fn capture_session(&self) -> SessionSnapshot {
        let registry = self.registry.read();
        let default_name = registry.default_collection_name();
        let mut rest: Vec<&DataObject> = registry
            .iter()
            .filter(|o| !o.is_temporary() && o.name() != default_name)
            .collect();
        rest.sort_by(|a, b| a.kind().cmp(&b.kind()).then_with(|| a.name().cmp(b.name())));

        let mut objects = Vec::with_capacity(rest.len() + 1);
        objects.push(DataObject::SequenceCollection(
            registry.default_collection().clone(),
        ));
        objects.extend(rest.into_iter().cloned());

        let mut workspace = self.workspace.read().clone();
        workspace
            .tabs
            .retain_existing(|t| registry.get(t).is_some_and(|o| !o.is_temporary()));
        SessionSnapshot { objects, workspace }
    }

    /// Writes the current state as a session and returns the number of objects written.
    /// Temporary objects are left out.
    pub fn save_session<W: Write>(&self, writer: &mut W) -> Result<usize, EngineError> {
        let snapshot = self.capture_session();
        let written = session::write_session(writer, Self::version(), &snapshot, &self.pool)?;
        tracing::info!(objects = written, "session saved");
        Ok(written)
    }

    pub fn save_session_to_path(&self, path: &str) -> Result<usize, EngineError> {
        let file = File::create(path)
            .map_err(|e| EngineError::io(format!("Could not create session file '{path}'"), e))?;
        let mut writer = BufWriter::new(file);
        self.save_session(&mut writer)
    }

    /// Reads a session without touching the live registry.
    pub fn restore_session<R: Read>(
        &self,
        reader: R,
        cancel: &CancellationToken,
    ) -> Result<RestoredSession, EngineError> {
        let config = self.config();
        let bus = self.bus.clone();
        let mut last = None;
        let mut progress = |done: usize, total: usize| {
            let percent = (done * 100 / total.max(1)) as u8;
            if last != Some(percent) {
                last = Some(percent);
                bus.progress_report(percent);
            }
        };
        SessionReader::new(&self.plugins, &self.formats)
            .max_format(config.max_session_format)
            .poll_interval(config.cancel_poll_interval)
            .read(reader, cancel, &mut progress)
    }

    /// Replaces the registry and workspace with a restored session.
    ///
    /// The new registry is built on the side in dependency order and swapped
    /// in only if every object was accepted.
    pub fn install_session(&self, restored: RestoredSession) -> Result<(), EngineError> {
        let _guard = self.execution_lock.lock();
        if !self.updates_allowed() {
            return Err(EngineError::UpdatesDisabled);
        }
        let default_name = restored
            .default_collection
            .as_ref()
            .map(|c| c.name().to_string())
            .unwrap_or_else(|| crate::registry::DEFAULT_SEQUENCE_COLLECTION.to_string());
        let mut fresh = DataStorage::with_default_collection(&default_name);
        let mut order = Vec::with_capacity(restored.objects.len());
        for object in restored.insertion_order() {
            fresh.store(object.clone())?;
            order.push(object.name().to_string());
        }
        if let Some(saved) = &restored.default_collection {
            fresh.restore_default_order(saved.members());
        }
        let mut workspace = restored.workspace;
        workspace.tabs.retain_existing(|t| fresh.contains(t));

        let added: Vec<DataObject> = order
            .iter()
            .filter_map(|n| fresh.get(n).cloned())
            .collect();
        let default_collection = DataObject::SequenceCollection(fresh.default_collection().clone());
        let old = {
            let mut registry = self.registry.write();
            if !registry.updates_allowed() {
                return Err(EngineError::UpdatesDisabled);
            }
            std::mem::replace(&mut *registry, fresh)
        };
        *self.workspace.write() = workspace;

        let old_default = old.default_collection_name().to_string();
        let mut removed: Vec<DataObject> = old
            .iter()
            .filter(|o| o.name() != old_default)
            .cloned()
            .collect();
        removed.sort_by(|a, b| a.name().cmp(b.name()));
        let mut events: Vec<DataEvent> = removed.into_iter().map(DataEvent::Removed).collect();
        events.extend(added.into_iter().map(DataEvent::Added));
        events.push(DataEvent::Updated(default_collection));
        self.bus.dispatch_all(&events);
        tracing::info!(objects = order.len(), "session installed");
        Ok(())
    }

    pub fn load_session<R: Read>(&self, reader: R, cancel: &CancellationToken) -> Result<(), EngineError> {
        let restored = self.restore_session(reader, cancel)?;
        self.install_session(restored)
    }

    pub fn load_session_from_path(&self, path: &str) -> Result<(), EngineError> {
        let file = File::open(path)
            .map_err(|e| EngineError::io(format!("Could not open session file '{path}'"), e))?;
        self.load_session(file, &CancellationToken::new())
    }
}

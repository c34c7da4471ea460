//! Publish/subscribe plumbing between the engine and its observers.
//!
//! Two independent channels: free-text messages (errors, log lines, status
//! text, progress) and structured data events. Both deliver from a snapshot
//! of the subscriber list taken under the bus lock, so callbacks are free to
//! subscribe or unsubscribe listeners while a broadcast is in flight.

use crate::data::DataObject;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
}

pub trait MessageListener: Send + Sync {
    fn error_message(&self, message: &str, code: i32);
    fn log_message(&self, message: &str, level: LogLevel);
    fn status_message(&self, _message: &str) {}
    fn progress_report(&self, _percent: u8) {}
}

/// Observer of registry changes. Every callback defaults to a no-op.
pub trait DataListener: Send + Sync {
    fn data_added(&self, _data: &DataObject) {}
    fn data_removed(&self, _data: &DataObject) {}
    /// Fired before an in-place update with both the current and incoming value.
    fn data_about_to_update(&self, _old: &DataObject, _new: &DataObject) {}
    fn data_updated(&self, _data: &DataObject) {}
    fn data_added_to_set(&self, _collection: &DataObject, _members: &[DataObject]) {}
    fn data_removed_from_set(&self, _collection: &DataObject, _members: &[DataObject]) {}
    fn data_order_changed(&self, _collection: &DataObject, _old_order: &[String]) {}
    fn data_renamed(&self, _old_name: &str, _data: &DataObject) {}
}

#[derive(Debug, Clone, PartialEq)]
pub enum DataEvent {
    Added(DataObject),
    Removed(DataObject),
    AboutToUpdate {
        old: DataObject,
        new: DataObject,
    },
    Updated(DataObject),
    AddedToSet {
        collection: DataObject,
        members: Vec<DataObject>,
    },
    RemovedFromSet {
        collection: DataObject,
        members: Vec<DataObject>,
    },
    OrderChanged {
        collection: DataObject,
        old_order: Vec<String>,
    },
    Renamed {
        old_name: String,
        data: DataObject,
    },
}

impl DataEvent {
    fn deliver(&self, listener: &dyn DataListener) {
        match self {
            Self::Added(d) => listener.data_added(d),
            Self::Removed(d) => listener.data_removed(d),
            Self::AboutToUpdate { old, new } => listener.data_about_to_update(old, new),
            Self::Updated(d) => listener.data_updated(d),
            Self::AddedToSet {
                collection,
                members,
            } => listener.data_added_to_set(collection, members),
            Self::RemovedFromSet {
                collection,
                members,
            } => listener.data_removed_from_set(collection, members),
            Self::OrderChanged {
                collection,
                old_order,
            } => listener.data_order_changed(collection, old_order),
            Self::Renamed { old_name, data } => listener.data_renamed(old_name, data),
        }
    }
}

fn same_listener<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Listener list with idempotent add/remove and snapshot reads.
struct Subscribers<T: ?Sized> {
    inner: Mutex<Vec<Arc<T>>>,
}

impl<T: ?Sized> Subscribers<T> {
    fn new() -> Self {
        Self {
            inner: Mutex::new(Vec::new()),
        }
    }

    fn add(&self, listener: Arc<T>) {
        let mut list = self.inner.lock();
        if !list.iter().any(|l| same_listener(l, &listener)) {
            list.push(listener);
        }
    }

    fn remove(&self, listener: &Arc<T>) {
        self.inner.lock().retain(|l| !same_listener(l, listener));
    }

    fn snapshot(&self) -> Vec<Arc<T>> {
        self.inner.lock().clone()
    }

    fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

pub struct NotificationBus {
    message_listeners: Subscribers<dyn MessageListener>,
    data_listeners: Subscribers<dyn DataListener>,
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationBus {
    pub fn new() -> Self {
        Self {
            message_listeners: Subscribers::new(),
            data_listeners: Subscribers::new(),
        }
    }

    pub fn add_message_listener(&self, listener: Arc<dyn MessageListener>) {
        self.message_listeners.add(listener);
    }

    pub fn remove_message_listener(&self, listener: &Arc<dyn MessageListener>) {
        self.message_listeners.remove(listener);
    }

    pub fn add_data_listener(&self, listener: Arc<dyn DataListener>) {
        self.data_listeners.add(listener);
    }

    pub fn remove_data_listener(&self, listener: &Arc<dyn DataListener>) {
        self.data_listeners.remove(listener);
    }

    pub fn message_listener_count(&self) -> usize {
        self.message_listeners.len()
    }

    pub fn data_listener_count(&self) -> usize {
        self.data_listeners.len()
    }

    pub fn error_message(&self, message: &str, code: i32) {
        let listeners = self.message_listeners.snapshot();
        if listeners.is_empty() {
            tracing::error!(code, "{message}");
            return;
        }
        for listener in listeners {
            listener.error_message(message, code);
        }
    }

    pub fn log_message(&self, message: &str, level: LogLevel) {
        let listeners = self.message_listeners.snapshot();
        if listeners.is_empty() {
            match level {
                LogLevel::Debug => tracing::debug!("{message}"),
                LogLevel::Info => tracing::info!("{message}"),
                LogLevel::Warning => tracing::warn!("{message}"),
            }
            return;
        }
        for listener in listeners {
            listener.log_message(message, level);
        }
    }

    pub fn status_message(&self, message: &str) {
        for listener in self.message_listeners.snapshot() {
            listener.status_message(message);
        }
    }

    pub fn progress_report(&self, percent: u8) {
        let percent = percent.min(100);
        for listener in self.message_listeners.snapshot() {
            listener.progress_report(percent);
        }
    }

    pub fn dispatch(&self, event: &DataEvent) {
        for listener in self.data_listeners.snapshot() {
            event.deliver(listener.as_ref());
        }
    }

    /// Delivers events in order, each from a fresh snapshot.
    pub fn dispatch_all(&self, events: &[DataEvent]) {
        for event in events {
            self.dispatch(event);
        }
    }
}

/// Records everything it hears. Handy for tests and for the CLI's JSON output.
#[derive(Default)]
pub struct MessageRecorder {
    entries: Mutex<Vec<(String, String)>>,
}

impl MessageRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<(String, String)> {
        self.entries.lock().clone()
    }

    pub fn count(&self, channel: &str) -> usize {
        self.entries.lock().iter().filter(|(c, _)| c == channel).count()
    }

    fn push(&self, channel: &str, message: String) {
        self.entries.lock().push((channel.to_string(), message));
    }
}

impl MessageListener for MessageRecorder {
    fn error_message(&self, message: &str, _code: i32) {
        self.push("error", message.to_string());
    }

    fn log_message(&self, message: &str, _level: LogLevel) {
        self.push("log", message.to_string());
    }

    fn status_message(&self, message: &str) {
        self.push("status", message.to_string());
    }

    fn progress_report(&self, percent: u8) {
        self.push("progress", percent.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::NumericVariable;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counter {
        added: AtomicUsize,
    }

    impl DataListener for Counter {
        fn data_added(&self, _data: &DataObject) {
            self.added.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn var(name: &str) -> DataObject {
        DataObject::NumericVariable(NumericVariable::new(name, 1.0))
    }

    #[test]
    fn test_subscribe_is_idempotent() {
        let bus = NotificationBus::new();
        let counter = Arc::new(Counter::default());
        let listener: Arc<dyn DataListener> = counter.clone();
        bus.add_data_listener(listener.clone());
        bus.add_data_listener(listener.clone());
        assert_eq!(bus.data_listener_count(), 1);
        bus.dispatch(&DataEvent::Added(var("a")));
        assert_eq!(counter.added.load(Ordering::SeqCst), 1);

        bus.remove_data_listener(&listener);
        bus.remove_data_listener(&listener);
        assert_eq!(bus.data_listener_count(), 0);
    }

    struct SelfRemover {
        bus: Arc<NotificationBus>,
        me: Mutex<Option<Arc<dyn DataListener>>>,
        newcomer: Arc<dyn DataListener>,
    }

    impl DataListener for SelfRemover {
        fn data_added(&self, _data: &DataObject) {
            if let Some(me) = self.me.lock().take() {
                self.bus.remove_data_listener(&me);
            }
            self.bus.add_data_listener(self.newcomer.clone());
        }
    }

    #[test]
    fn test_listener_changes_during_broadcast_use_snapshot() {
        let bus = Arc::new(NotificationBus::new());
        let bystander = Arc::new(Counter::default());
        let newcomer = Arc::new(Counter::default());
        let remover = Arc::new(SelfRemover {
            bus: bus.clone(),
            me: Mutex::new(None),
            newcomer: newcomer.clone(),
        });
        let remover_dyn: Arc<dyn DataListener> = remover.clone();
        *remover.me.lock() = Some(remover_dyn.clone());

        bus.add_data_listener(remover_dyn);
        bus.add_data_listener(bystander.clone());
        bus.dispatch(&DataEvent::Added(var("a")));

        assert_eq!(bystander.added.load(Ordering::SeqCst), 1);
        assert_eq!(newcomer.added.load(Ordering::SeqCst), 0);
        assert_eq!(bus.data_listener_count(), 2);

        bus.dispatch(&DataEvent::Added(var("b")));
        assert_eq!(bystander.added.load(Ordering::SeqCst), 2);
        assert_eq!(newcomer.added.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_messages_reach_every_listener_once() {
        let bus = NotificationBus::new();
        let a = Arc::new(MessageRecorder::new());
        let b = Arc::new(MessageRecorder::new());
        bus.add_message_listener(a.clone());
        bus.add_message_listener(b.clone());
        bus.error_message("bad", 1);
        bus.log_message("hello", LogLevel::Info);
        bus.status_message("working");
        bus.progress_report(250);
        for rec in [&a, &b] {
            assert_eq!(rec.count("error"), 1);
            assert_eq!(rec.count("log"), 1);
            assert_eq!(rec.count("status"), 1);
            assert_eq!(rec.entries().last().unwrap().1, "100");
        }
    }

    #[test]
    fn test_messages_without_listeners_do_not_panic() {
        let bus = NotificationBus::new();
        bus.error_message("nobody listens", 2);
        bus.log_message("nobody listens", LogLevel::Warning);
        bus.status_message("nobody listens");
    }
}

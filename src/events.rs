use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::trace;

use crate::objects::ObjectRef;
use crate::variant::Variant;

/// Subscription trampoline into the host engine: `(object, subscribe)`.
pub type EventBinder = Arc<dyn Fn(Option<&ObjectRef>, bool) + Send + Sync>;

/// Dispatch hook invoked for every fired event: `(object, params, event type, event name)`.
pub type EventListener = Arc<dyn Fn(Option<&ObjectRef>, &mut [Variant], &str, &str) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Clone)]
pub struct RegisteredEvent {
    pub is_static: bool,
    pub binder: EventBinder,
}

impl fmt::Debug for RegisteredEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredEvent").field("is_static", &self.is_static).finish()
    }
}

/// Process-wide event-binder registry plus the listener list events are routed through.
#[derive(Default)]
pub struct ScriptingEvents {
    events: RwLock<HashMap<(String, String), RegisteredEvent>>,
    listeners: RwLock<Vec<(ListenerId, EventListener)>>,
    next_listener: Mutex<u64>,
}

impl ScriptingEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_event<F>(&self, type_name: impl Into<String>, name: impl Into<String>, is_static: bool, binder: F)
    where
        F: Fn(Option<&ObjectRef>, bool) + Send + Sync + 'static,
    {
        let event = RegisteredEvent { is_static, binder: Arc::new(binder) };
        self.events.write().insert((type_name.into(), name.into()), event);
    }

    pub fn find(&self, type_name: &str, name: &str) -> Option<RegisteredEvent> {
        self.events.read().get(&(type_name.to_string(), name.to_string())).cloned()
    }

    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(Option<&ObjectRef>, &mut [Variant], &str, &str) + Send + Sync + 'static,
    {
        let mut next = self.next_listener.lock();
        *next += 1;
        let id = ListenerId(*next);
        self.listeners.write().push((id, Arc::new(listener)));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) {
        self.listeners.write().retain(|(existing, _)| *existing != id);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Routes an engine event to every listener. `object` is `None` for static events.
    pub fn fire(&self, object: Option<&ObjectRef>, type_name: &str, name: &str, params: &mut [Variant]) {
        let listeners: Vec<EventListener> = self.listeners.read().iter().map(|(_, listener)| listener.clone()).collect();
        trace!(event = %format!("{type_name}.{name}"), listeners = listeners.len(), "fire");
        for listener in listeners {
            listener(object, params, type_name, name);
        }
    }
}

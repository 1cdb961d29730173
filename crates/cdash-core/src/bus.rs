use crate::error::HandlerError;
use crate::model::{Instance, LogEntry};
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Create,
    Start,
    Stop,
    Remove,
    Connected,
    Disconnected,
    LoadedInstances,
    Created,
    Started,
    Stopped,
    Removed,
    Log,
}

impl Topic {
    pub const ALL: [Topic; 12] = [
        Topic::Create,
        Topic::Start,
        Topic::Stop,
        Topic::Remove,
        Topic::Connected,
        Topic::Disconnected,
        Topic::LoadedInstances,
        Topic::Created,
        Topic::Started,
        Topic::Stopped,
        Topic::Removed,
        Topic::Log,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Topic::Create => "CREATE",
            Topic::Start => "START",
            Topic::Stop => "STOP",
            Topic::Remove => "REMOVE",
            Topic::Connected => "connected",
            Topic::Disconnected => "disconnected",
            Topic::LoadedInstances => "loadedInstances",
            Topic::Created => "CREATED",
            Topic::Started => "STARTED",
            Topic::Stopped => "STOPPED",
            Topic::Removed => "REMOVED",
            Topic::Log => "LOG",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    Create,
    Start { id: String },
    Stop { id: String },
    Remove { id: String },
    Connected,
    Disconnected,
    LoadedInstances(Vec<Instance>),
    Created(Instance),
    Started { id: String },
    Stopped { id: String },
    Removed { id: String },
    Log(LogEntry),
}

impl BusEvent {
    pub fn topic(&self) -> Topic {
        match self {
            BusEvent::Create => Topic::Create,
            BusEvent::Start { .. } => Topic::Start,
            BusEvent::Stop { .. } => Topic::Stop,
            BusEvent::Remove { .. } => Topic::Remove,
            BusEvent::Connected => Topic::Connected,
            BusEvent::Disconnected => Topic::Disconnected,
            BusEvent::LoadedInstances(_) => Topic::LoadedInstances,
            BusEvent::Created(_) => Topic::Created,
            BusEvent::Started { .. } => Topic::Started,
            BusEvent::Stopped { .. } => Topic::Stopped,
            BusEvent::Removed { .. } => Topic::Removed,
            BusEvent::Log(_) => Topic::Log,
        }
    }

    pub fn instance_id(&self) -> Option<&str> {
        match self {
            BusEvent::Start { id }
            | BusEvent::Stop { id }
            | BusEvent::Remove { id }
            | BusEvent::Started { id }
            | BusEvent::Stopped { id }
            | BusEvent::Removed { id } => Some(id.as_str()),
            BusEvent::Created(instance) => Some(instance.id.as_str()),
            _ => None,
        }
    }
}

pub type HandlerResult = Result<(), HandlerError>;

type Handler = Rc<dyn Fn(&BusEvent) -> HandlerResult>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub failed: usize,
}

/// Named publish/subscribe dispatcher. Delivery is synchronous, in
/// registration order, on the caller's thread; nothing is queued or replayed.
#[derive(Default)]
pub struct EventBus {
    subscribers: RefCell<HashMap<Topic, Vec<(SubscriptionId, Handler)>>>,
    next_id: Cell<u64>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, topic: Topic, handler: F) -> SubscriptionId
    where
        F: Fn(&BusEvent) -> HandlerResult + 'static,
    {
        let id = SubscriptionId(self.next_id.get());
        self.next_id.set(self.next_id.get().saturating_add(1));
        self.subscribers
            .borrow_mut()
            .entry(topic)
            .or_default()
            .push((id, Rc::new(handler)));
        id
    }

    pub fn unsubscribe(&self, topic: Topic, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.borrow_mut();
        let Some(list) = subscribers.get_mut(&topic) else {
            return false;
        };
        let before = list.len();
        list.retain(|(existing, _)| *existing != id);
        before != list.len()
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.subscribers
            .borrow()
            .get(&topic)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn publish(&self, event: BusEvent) -> Delivery {
        let topic = event.topic();
        let handlers = self
            .subscribers
            .borrow()
            .get(&topic)
            .cloned()
            .unwrap_or_default();
        let mut delivery = Delivery::default();
        if handlers.is_empty() {
            debug!(event = "bus_publish_unobserved", topic = topic.name());
            return delivery;
        }

        for (id, handler) in handlers {
            // a handler earlier in this dispatch may have unsubscribed this one
            if !self.is_subscribed(topic, id) {
                continue;
            }
            match panic::catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                Ok(Ok(())) => delivery.delivered += 1,
                Ok(Err(err)) => {
                    delivery.failed += 1;
                    warn!(
                        event = "bus_handler_error",
                        topic = topic.name(),
                        subscription = id.0,
                        instance_id = event.instance_id().unwrap_or("-"),
                        error = %err
                    );
                }
                Err(payload) => {
                    delivery.failed += 1;
                    warn!(
                        event = "bus_handler_panic",
                        topic = topic.name(),
                        subscription = id.0,
                        instance_id = event.instance_id().unwrap_or("-"),
                        message = %panic_message(payload.as_ref())
                    );
                }
            }
        }
        delivery
    }

    fn is_subscribed(&self, topic: Topic, id: SubscriptionId) -> bool {
        self.subscribers
            .borrow()
            .get(&topic)
            .map(|list| list.iter().any(|(existing, _)| *existing == id))
            .unwrap_or(false)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    "handler panicked".to_string()
}

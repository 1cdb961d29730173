use crate::registry::{Applied, InstanceRegistry};
use cdash_core::{
    BusEvent, CommandKind, EventBus, HandlerResult, InstanceStatus, LogEntry, SubscriptionId,
    Topic,
};
use std::cell::{Ref, RefCell};
use std::rc::{Rc, Weak};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlRole {
    Add,
    Start,
    Stop,
    Remove,
}

impl ControlRole {
    pub fn label(&self) -> &'static str {
        match self {
            ControlRole::Add => "Create new instance",
            ControlRole::Start => "start",
            ControlRole::Stop => "stop",
            ControlRole::Remove => "remove",
        }
    }

    pub fn command_kind(&self) -> CommandKind {
        match self {
            ControlRole::Add => CommandKind::Create,
            ControlRole::Start => CommandKind::Start,
            ControlRole::Stop => CommandKind::Stop,
            ControlRole::Remove => CommandKind::Remove,
        }
    }
}

/// Controls rendered on an instance card. A started instance offers stop,
/// anything else offers start.
pub fn visible_controls(status: InstanceStatus) -> &'static [ControlRole] {
    if status.is_started() {
        &[ControlRole::Stop, ControlRole::Remove]
    } else {
        &[ControlRole::Start, ControlRole::Remove]
    }
}

/// What a click or key press landed on: the control role, if any, and the
/// enclosing instance row, if any.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Hit {
    pub role: Option<ControlRole>,
    pub instance_id: Option<String>,
}

impl Hit {
    pub fn add() -> Self {
        Self {
            role: Some(ControlRole::Add),
            instance_id: None,
        }
    }

    pub fn control(role: ControlRole, instance_id: impl Into<String>) -> Self {
        Self {
            role: Some(role),
            instance_id: Some(instance_id.into()),
        }
    }

    pub fn nothing() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    Blocked,
    NoRole,
    NoInstance,
    UnknownInstance,
    HiddenControl,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Published(CommandKind),
    Ignored(IgnoreReason),
}

#[derive(Debug, Default)]
struct InstancesState {
    registry: InstanceRegistry,
    blocked: bool,
}

pub struct InstancesComponent {
    bus: Rc<EventBus>,
    state: Rc<RefCell<InstancesState>>,
    subscriptions: Vec<(Topic, SubscriptionId)>,
}

impl InstancesComponent {
    pub fn mount(bus: Rc<EventBus>) -> Self {
        let state = Rc::new(RefCell::new(InstancesState::default()));
        let mut component = Self {
            bus,
            state,
            subscriptions: Vec::new(),
        };
        component.listen(Topic::LoadedInstances);
        component.listen(Topic::Created);
        component.listen(Topic::Started);
        component.listen(Topic::Stopped);
        component.listen(Topic::Removed);
        component.listen(Topic::Disconnected);
        component
    }

    fn listen(&mut self, topic: Topic) {
        let state = Rc::clone(&self.state);
        let bus = Rc::downgrade(&self.bus);
        let id = self
            .bus
            .subscribe(topic, move |event| handle_event(&state, &bus, event));
        self.subscriptions.push((topic, id));
    }

    pub fn registry(&self) -> Ref<'_, InstanceRegistry> {
        Ref::map(self.state.borrow(), |state| &state.registry)
    }

    pub fn is_blocked(&self) -> bool {
        self.state.borrow().blocked
    }

    pub fn interact(&self, hit: &Hit) -> Dispatch {
        if self.state.borrow().blocked {
            return Dispatch::Ignored(IgnoreReason::Blocked);
        }
        let Some(role) = hit.role else {
            return Dispatch::Ignored(IgnoreReason::NoRole);
        };
        let id = match (role, hit.instance_id.as_deref()) {
            (ControlRole::Add, _) => return self.request_create(),
            (_, None) => return Dispatch::Ignored(IgnoreReason::NoInstance),
            (_, Some(id)) => id.to_string(),
        };
        let (intent, note) = match role {
            ControlRole::Start => (BusEvent::Start { id: id.clone() }, "Starting instance"),
            ControlRole::Stop => (BusEvent::Stop { id: id.clone() }, "Stopping instance"),
            _ => (BusEvent::Remove { id: id.clone() }, "Removing instance"),
        };
        {
            let mut state = self.state.borrow_mut();
            let Some(row) = state.registry.get(&id) else {
                return Dispatch::Ignored(IgnoreReason::UnknownInstance);
            };
            if !visible_controls(row.status()).contains(&role) {
                return Dispatch::Ignored(IgnoreReason::HiddenControl);
            }
            state.registry.mark_processing(&id);
        }

        info!(event = "instance_intent", role = ?role, instance_id = %id);
        self.bus.publish(intent);
        self.bus.publish(BusEvent::Log(LogEntry::instance(id, note)));
        Dispatch::Published(role.command_kind())
    }

    fn request_create(&self) -> Dispatch {
        self.state.borrow_mut().registry.mark_add_processing();
        info!(event = "instance_intent", role = "add");
        self.bus.publish(BusEvent::Create);
        self.bus
            .publish(BusEvent::Log(LogEntry::all("Creating new instance")));
        Dispatch::Published(CommandKind::Create)
    }
}

impl Drop for InstancesComponent {
    fn drop(&mut self) {
        for (topic, id) in self.subscriptions.drain(..) {
            self.bus.unsubscribe(topic, id);
        }
    }
}

fn handle_event(
    state: &RefCell<InstancesState>,
    bus: &Weak<EventBus>,
    event: &BusEvent,
) -> HandlerResult {
    let log = {
        let mut state = state.borrow_mut();
        if state.blocked {
            return Ok(());
        }
        match event {
            BusEvent::Disconnected => {
                state.blocked = true;
                None
            }
            BusEvent::LoadedInstances(instances) => {
                state.registry.replace_all(instances.clone());
                None
            }
            BusEvent::Created(instance) => confirmation_log(
                state.registry.apply_created(instance.clone()),
                &instance.id,
                "Instance created",
            ),
            BusEvent::Started { id } => {
                confirmation_log(state.registry.apply_started(id), id, "Instance started")
            }
            BusEvent::Stopped { id } => {
                confirmation_log(state.registry.apply_stopped(id), id, "Instance stopped")
            }
            BusEvent::Removed { id } => {
                confirmation_log(state.registry.apply_removed(id), id, "Instance removed")
            }
            _ => None,
        }
    };
    if let (Some(entry), Some(bus)) = (log, bus.upgrade()) {
        bus.publish(BusEvent::Log(entry));
    }
    Ok(())
}

fn confirmation_log(applied: Applied, id: &str, info: &str) -> Option<LogEntry> {
    if applied.changed() {
        return Some(LogEntry::instance(id, info));
    }
    debug!(event = "confirmation_for_unknown_instance", instance_id = id);
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdash_core::Instance;

    fn mounted() -> (Rc<EventBus>, InstancesComponent, Rc<RefCell<Vec<BusEvent>>>) {
        let bus = Rc::new(EventBus::new());
        let component = InstancesComponent::mount(Rc::clone(&bus));
        let intents = Rc::new(RefCell::new(Vec::new()));
        for topic in [Topic::Create, Topic::Start, Topic::Stop, Topic::Remove] {
            let intents = Rc::clone(&intents);
            bus.subscribe(topic, move |event| {
                intents.borrow_mut().push(event.clone());
                Ok(())
            });
        }
        (bus, component, intents)
    }

    fn load(bus: &EventBus, instances: &[(&str, InstanceStatus)]) {
        bus.publish(BusEvent::LoadedInstances(
            instances
                .iter()
                .map(|(id, status)| Instance::new(*id, *status))
                .collect(),
        ));
    }

    #[test]
    fn start_click_marks_processing_until_started_arrives() {
        let (bus, component, intents) = mounted();
        load(
            &bus,
            &[("7", InstanceStatus::Stopped), ("8", InstanceStatus::Stopped)],
        );
        component.interact(&Hit::control(ControlRole::Start, "8"));

        assert_eq!(
            component.interact(&Hit::control(ControlRole::Start, "7")),
            Dispatch::Published(CommandKind::Start)
        );
        assert!(component.registry().is_processing("7"));
        assert_eq!(
            intents.borrow().last(),
            Some(&BusEvent::Start {
                id: "7".to_string()
            })
        );

        bus.publish(BusEvent::Started {
            id: "7".to_string(),
        });
        let registry = component.registry();
        assert!(!registry.is_processing("7"));
        assert_eq!(
            registry.get("7").map(|row| row.status()),
            Some(InstanceStatus::Started)
        );
        assert!(registry.is_processing("8"));
    }

    #[test]
    fn add_click_publishes_create_and_clears_on_created() {
        let (bus, component, intents) = mounted();
        assert_eq!(
            component.interact(&Hit::add()),
            Dispatch::Published(CommandKind::Create)
        );
        assert!(component.registry().add_processing());
        assert_eq!(*intents.borrow(), vec![BusEvent::Create]);

        bus.publish(BusEvent::Created(Instance::new("11", InstanceStatus::Created)));
        assert!(!component.registry().add_processing());
        assert_eq!(component.registry().ids(), vec!["11"]);
    }

    #[test]
    fn loaded_instances_clears_add_mark() {
        let (bus, component, _intents) = mounted();
        component.interact(&Hit::add());
        load(&bus, &[("1", InstanceStatus::Created)]);
        assert!(!component.registry().add_processing());
    }

    #[test]
    fn unresolvable_clicks_are_noops() {
        let (bus, component, intents) = mounted();
        load(&bus, &[("1", InstanceStatus::Started)]);

        assert_eq!(
            component.interact(&Hit::nothing()),
            Dispatch::Ignored(IgnoreReason::NoRole)
        );
        assert_eq!(
            component.interact(&Hit {
                role: Some(ControlRole::Stop),
                instance_id: None,
            }),
            Dispatch::Ignored(IgnoreReason::NoInstance)
        );
        assert_eq!(
            component.interact(&Hit::control(ControlRole::Stop, "404")),
            Dispatch::Ignored(IgnoreReason::UnknownInstance)
        );
        assert_eq!(
            component.interact(&Hit::control(ControlRole::Start, "1")),
            Dispatch::Ignored(IgnoreReason::HiddenControl)
        );
        assert!(intents.borrow().is_empty());
        assert!(!component.registry().is_processing("1"));
    }

    #[test]
    fn contradictory_clicks_produce_independent_round_trips() {
        let (bus, component, intents) = mounted();
        load(&bus, &[("3", InstanceStatus::Stopped)]);
        component.interact(&Hit::control(ControlRole::Start, "3"));
        component.interact(&Hit::control(ControlRole::Remove, "3"));
        assert_eq!(intents.borrow().len(), 2);

        bus.publish(BusEvent::Removed {
            id: "3".to_string(),
        });
        bus.publish(BusEvent::Started {
            id: "3".to_string(),
        });
        assert!(component.registry().is_empty());
    }

    #[test]
    fn disconnect_blocks_interaction_and_mutation() {
        let (bus, component, intents) = mounted();
        load(&bus, &[("1", InstanceStatus::Stopped)]);
        bus.publish(BusEvent::Disconnected);

        assert!(component.is_blocked());
        assert_eq!(
            component.interact(&Hit::add()),
            Dispatch::Ignored(IgnoreReason::Blocked)
        );
        assert_eq!(
            component.interact(&Hit::control(ControlRole::Start, "1")),
            Dispatch::Ignored(IgnoreReason::Blocked)
        );
        bus.publish(BusEvent::Removed {
            id: "1".to_string(),
        });
        assert!(intents.borrow().is_empty());
        assert_eq!(component.registry().ids(), vec!["1"]);
    }

    #[test]
    fn confirmations_emit_log_entries_only_when_applied() {
        let (bus, _component, _intents) = mounted();
        let logs = Rc::new(RefCell::new(Vec::new()));
        {
            let logs = Rc::clone(&logs);
            bus.subscribe(Topic::Log, move |event| {
                if let BusEvent::Log(entry) = event {
                    logs.borrow_mut().push(format!("{} {}", entry.id, entry.info));
                }
                Ok(())
            });
        }
        load(&bus, &[("1", InstanceStatus::Started)]);
        bus.publish(BusEvent::Stopped {
            id: "1".to_string(),
        });
        bus.publish(BusEvent::Stopped {
            id: "2".to_string(),
        });
        assert_eq!(*logs.borrow(), vec!["1 Instance stopped"]);
    }

    #[test]
    fn visible_controls_follow_status() {
        assert_eq!(
            visible_controls(InstanceStatus::Started),
            &[ControlRole::Stop, ControlRole::Remove]
        );
        assert_eq!(
            visible_controls(InstanceStatus::Created),
            &[ControlRole::Start, ControlRole::Remove]
        );
    }
}

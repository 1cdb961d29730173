use crate::transport::{Connector, TransportEvent};
use cdash_core::{
    decode_server_event, encode_command, BusEvent, Command, CommandKind, ConfigError, EventBus,
    LogEntry, ProtocolError, ServerEvent, SubscriptionId, Topic, DEFAULT_MAX_FRAME_BYTES,
};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;

pub const COMMAND_QUEUE_CAPACITY: usize = 64;
pub const TRANSPORT_EVENT_CAPACITY: usize = 256;

const INTENT_TOPICS: [Topic; 4] = [Topic::Create, Topic::Start, Topic::Stop, Topic::Remove];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    NotOpen(ConnectionState),
    Encode,
    QueueFull,
    ChannelClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    Dropped(DropReason),
}

pub struct ConnectionManager {
    bus: Rc<EventBus>,
    connector: Box<dyn Connector>,
    state: Cell<ConnectionState>,
    outbound: RefCell<Option<mpsc::Sender<String>>>,
    subscriptions: RefCell<Vec<(Topic, SubscriptionId)>>,
    max_frame_bytes: usize,
}

impl ConnectionManager {
    pub fn new(bus: Rc<EventBus>, connector: Box<dyn Connector>) -> Rc<Self> {
        let manager = Rc::new(Self {
            bus,
            connector,
            state: Cell::new(ConnectionState::Idle),
            outbound: RefCell::new(None),
            subscriptions: RefCell::new(Vec::new()),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        });
        manager.attach();
        manager
    }

    fn attach(self: &Rc<Self>) {
        for topic in INTENT_TOPICS {
            let weak = Rc::downgrade(self);
            let id = self.bus.subscribe(topic, move |event| {
                let Some(manager) = weak.upgrade() else {
                    return Ok(());
                };
                let command = command_from_intent(event)?;
                manager.send(&command);
                Ok(())
            });
            self.subscriptions.borrow_mut().push((topic, id));
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    /// Opens the session's one connection. The returned receiver must be
    /// drained into [`ConnectionManager::handle_transport_event`].
    pub fn initialize(&self, endpoint: &str) -> Result<mpsc::Receiver<TransportEvent>, ConfigError> {
        if self.state.get() != ConnectionState::Idle {
            return Err(ConfigError::AlreadyInitialized);
        }
        let url = validate_endpoint(endpoint)?;
        let (outbound_tx, outbound_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(TRANSPORT_EVENT_CAPACITY);
        info!(event = "connection_initialize", url = %url);
        self.connector.connect(url, outbound_rx, events_tx);
        *self.outbound.borrow_mut() = Some(outbound_tx);
        self.state.set(ConnectionState::Connecting);
        Ok(events_rx)
    }

    pub fn send(&self, command: &Command) -> SendOutcome {
        let state = self.state.get();
        if state != ConnectionState::Open {
            warn!(
                event = "command_dropped",
                reason = "not_open",
                command = %command.kind(),
                state = ?state
            );
            return SendOutcome::Dropped(DropReason::NotOpen(state));
        }
        let text = match encode_command(command, self.max_frame_bytes) {
            Ok(text) => text,
            Err(err) => {
                warn!(event = "command_dropped", reason = "encode", error = %err);
                return SendOutcome::Dropped(DropReason::Encode);
            }
        };
        let outbound = self.outbound.borrow();
        let Some(tx) = outbound.as_ref() else {
            return SendOutcome::Dropped(DropReason::ChannelClosed);
        };
        match tx.try_send(text) {
            Ok(()) => {
                debug!(
                    event = "command_sent",
                    command = %command.kind(),
                    target = command.target_id().unwrap_or("-")
                );
                SendOutcome::Sent
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    event = "command_dropped",
                    reason = "queue_full",
                    command = %command.kind(),
                    capacity = COMMAND_QUEUE_CAPACITY
                );
                SendOutcome::Dropped(DropReason::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(
                    event = "command_dropped",
                    reason = "channel_closed",
                    command = %command.kind()
                );
                SendOutcome::Dropped(DropReason::ChannelClosed)
            }
        }
    }

    pub fn handle_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Opened => {
                if self.state.get() != ConnectionState::Connecting {
                    return;
                }
                self.state.set(ConnectionState::Open);
                self.bus.publish(BusEvent::Connected);
                self.bus
                    .publish(BusEvent::Log(LogEntry::all("Server connected")));
            }
            TransportEvent::Closed { reason } => {
                if self.state.get() == ConnectionState::Closed {
                    return;
                }
                info!(event = "connection_closed", reason = ?reason);
                self.state.set(ConnectionState::Closed);
                self.outbound.borrow_mut().take();
                self.bus.publish(BusEvent::Disconnected);
                self.bus
                    .publish(BusEvent::Log(LogEntry::all("Server disconnected")));
            }
            TransportEvent::Frame(text) => {
                if self.state.get() != ConnectionState::Open {
                    debug!(event = "frame_ignored", state = ?self.state.get());
                    return;
                }
                match decode_server_event(&text) {
                    Ok(event) => self.publish_server_event(event),
                    Err(err) => {
                        warn!(event = "protocol_error", error = %err);
                    }
                }
            }
        }
    }

    /// Drops the outbound queue so the transport closes the socket.
    pub fn terminate(&self) {
        if self.outbound.borrow_mut().take().is_some() {
            info!(event = "connection_terminate");
        }
    }

    fn publish_server_event(&self, event: ServerEvent) {
        debug!(event = "server_event", kind = event.event_name());
        match event {
            ServerEvent::InstancesLoaded(instances) => {
                self.bus
                    .publish(BusEvent::Log(LogEntry::all("Instances loaded")));
                self.bus.publish(BusEvent::LoadedInstances(instances));
            }
            ServerEvent::Created(instance) => {
                self.bus.publish(BusEvent::Created(instance));
            }
            ServerEvent::Started(target) => {
                self.bus.publish(BusEvent::Started { id: target.id });
            }
            ServerEvent::Stopped(target) => {
                self.bus.publish(BusEvent::Stopped { id: target.id });
            }
            ServerEvent::Removed(target) => {
                self.bus.publish(BusEvent::Removed { id: target.id });
            }
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        for (topic, id) in self.subscriptions.get_mut().drain(..) {
            self.bus.unsubscribe(topic, id);
        }
    }
}

pub fn command_from_intent(event: &BusEvent) -> Result<Command, ProtocolError> {
    match event {
        BusEvent::Create => Ok(Command::create()),
        BusEvent::Start { id } => Command::new(CommandKind::Start, Some(id.clone())),
        BusEvent::Stop { id } => Command::new(CommandKind::Stop, Some(id.clone())),
        BusEvent::Remove { id } => Command::new(CommandKind::Remove, Some(id.clone())),
        other => Err(ProtocolError::InvalidCommand(format!(
            "{} is not an outbound intent",
            other.topic()
        ))),
    }
}

pub fn validate_endpoint(endpoint: &str) -> Result<Url, ConfigError> {
    let trimmed = endpoint.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::MissingEndpoint);
    }
    let url = Url::parse(trimmed).map_err(|err| ConfigError::InvalidEndpoint {
        url: trimmed.to_string(),
        reason: err.to_string(),
    })?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(ConfigError::UnsupportedScheme {
            scheme: url.scheme().to_string(),
        });
    }
    if url.host_str().map(str::is_empty).unwrap_or(true) {
        return Err(ConfigError::InvalidEndpoint {
            url: trimmed.to_string(),
            reason: "missing host".to_string(),
        });
    }
    Ok(url)
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingConnector;
    use super::*;
    use cdash_core::{Instance, InstanceStatus};

    fn record_topics(bus: &EventBus, topics: &[Topic]) -> Rc<RefCell<Vec<BusEvent>>> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        for topic in topics {
            let seen = Rc::clone(&seen);
            bus.subscribe(*topic, move |event| {
                seen.borrow_mut().push(event.clone());
                Ok(())
            });
        }
        seen
    }

    fn open_manager() -> (Rc<EventBus>, Rc<ConnectionManager>, RecordingConnector) {
        let bus = Rc::new(EventBus::new());
        let connector = RecordingConnector::default();
        let manager = ConnectionManager::new(Rc::clone(&bus), Box::new(connector.clone()));
        let _events = manager
            .initialize("ws://localhost:10000/dashboard")
            .expect("initialize");
        manager.handle_transport_event(TransportEvent::Opened);
        (bus, manager, connector)
    }

    #[test]
    fn endpoint_validation_is_a_configuration_error() {
        assert_eq!(validate_endpoint("  "), Err(ConfigError::MissingEndpoint));
        assert!(matches!(
            validate_endpoint("not a url"),
            Err(ConfigError::InvalidEndpoint { .. })
        ));
        assert_eq!(
            validate_endpoint("http://localhost:10000/dashboard"),
            Err(ConfigError::UnsupportedScheme {
                scheme: "http".to_string()
            })
        );
        let url = validate_endpoint("wss://example.com/dashboard").expect("valid endpoint");
        assert_eq!(url.host_str(), Some("example.com"));
    }

    #[test]
    fn initialize_opens_exactly_one_connection() {
        let bus = Rc::new(EventBus::new());
        let connector = RecordingConnector::default();
        let manager = ConnectionManager::new(Rc::clone(&bus), Box::new(connector.clone()));

        assert_eq!(
            manager.initialize("").err(),
            Some(ConfigError::MissingEndpoint)
        );
        assert_eq!(manager.state(), ConnectionState::Idle);

        let _events = manager
            .initialize("ws://localhost:10000/dashboard")
            .expect("initialize");
        assert_eq!(manager.state(), ConnectionState::Connecting);
        assert_eq!(
            connector
                .wiring
                .borrow()
                .as_ref()
                .map(|wiring| wiring.url.as_str().to_string()),
            Some("ws://localhost:10000/dashboard".to_string())
        );
        assert_eq!(
            manager.initialize("ws://localhost:10000/dashboard").err(),
            Some(ConfigError::AlreadyInitialized)
        );
    }

    #[test]
    fn open_publishes_connected_and_log() {
        let bus = Rc::new(EventBus::new());
        let seen = record_topics(&bus, &[Topic::Connected, Topic::Log]);
        let manager = ConnectionManager::new(Rc::clone(&bus), Box::new(RecordingConnector::default()));
        let _events = manager
            .initialize("ws://localhost:10000/dashboard")
            .expect("initialize");

        manager.handle_transport_event(TransportEvent::Opened);
        manager.handle_transport_event(TransportEvent::Opened);

        let seen = seen.borrow();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], BusEvent::Connected);
        assert!(matches!(&seen[1], BusEvent::Log(entry) if entry.info == "Server connected"));
        assert_eq!(manager.state(), ConnectionState::Open);
    }

    #[test]
    fn intents_are_serialized_onto_the_socket() {
        let (bus, _manager, connector) = open_manager();
        bus.publish(BusEvent::Start {
            id: "42".to_string(),
        });
        bus.publish(BusEvent::Create);

        assert_eq!(
            connector.drain_outbound(),
            vec![
                r#"{"event":"START","payload":{"id":"42"}}"#.to_string(),
                r#"{"event":"CREATE","payload":""}"#.to_string(),
            ]
        );
    }

    #[test]
    fn send_while_not_open_is_dropped() {
        let bus = Rc::new(EventBus::new());
        let connector = RecordingConnector::default();
        let manager = ConnectionManager::new(Rc::clone(&bus), Box::new(connector.clone()));
        assert_eq!(
            manager.send(&Command::create()),
            SendOutcome::Dropped(DropReason::NotOpen(ConnectionState::Idle))
        );

        let _events = manager
            .initialize("ws://localhost:10000/dashboard")
            .expect("initialize");
        assert_eq!(
            manager.send(&Command::stop("1")),
            SendOutcome::Dropped(DropReason::NotOpen(ConnectionState::Connecting))
        );
        manager.handle_transport_event(TransportEvent::Opened);
        assert_eq!(manager.send(&Command::stop("1")), SendOutcome::Sent);

        manager.handle_transport_event(TransportEvent::Closed {
            reason: crate::transport::CloseReason::ServerClosed,
        });
        assert_eq!(
            manager.send(&Command::stop("1")),
            SendOutcome::Dropped(DropReason::NotOpen(ConnectionState::Closed))
        );
        assert_eq!(connector.drain_outbound().len(), 1);
    }

    #[test]
    fn close_publishes_disconnected_once() {
        let (bus, manager, _connector) = open_manager();
        let seen = record_topics(&bus, &[Topic::Disconnected]);
        manager.handle_transport_event(TransportEvent::Closed {
            reason: crate::transport::CloseReason::ReadError("reset".to_string()),
        });
        manager.handle_transport_event(TransportEvent::Closed {
            reason: crate::transport::CloseReason::ServerClosed,
        });
        assert_eq!(*seen.borrow(), vec![BusEvent::Disconnected]);
        assert_eq!(manager.state(), ConnectionState::Closed);
    }

    #[test]
    fn terminate_releases_the_outbound_queue() {
        let (bus, manager, connector) = open_manager();
        let seen = record_topics(&bus, &[Topic::Disconnected]);
        manager.terminate();

        assert_eq!(
            manager.send(&Command::start("1")),
            SendOutcome::Dropped(DropReason::ChannelClosed)
        );
        {
            let mut wiring = connector.wiring.borrow_mut();
            let wiring = wiring.as_mut().expect("wired");
            assert_eq!(
                wiring.outbound.try_recv(),
                Err(mpsc::error::TryRecvError::Disconnected)
            );
        }

        manager.handle_transport_event(TransportEvent::Closed {
            reason: crate::transport::CloseReason::ClientShutdown,
        });
        manager.terminate();
        assert_eq!(*seen.borrow(), vec![BusEvent::Disconnected]);
        assert_eq!(manager.state(), ConnectionState::Closed);
    }

    #[test]
    fn large_snapshot_replaces_the_instance_list() {
        let (bus, manager, _connector) = open_manager();
        let seen = record_topics(&bus, &[Topic::LoadedInstances]);
        let rows: Vec<String> = (0..8000)
            .map(|idx| format!(r#"{{"id":"i{idx}","status":"stopped"}}"#))
            .collect();
        let frame = format!(r#"{{"event":"Instances","payload":[{}]}}"#, rows.join(","));
        assert!(frame.len() > DEFAULT_MAX_FRAME_BYTES);

        manager.handle_transport_event(TransportEvent::Frame(frame));
        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        assert!(matches!(&seen[0], BusEvent::LoadedInstances(list) if list.len() == 8000));
    }

    #[test]
    fn inbound_frames_map_to_bus_events() {
        let (bus, manager, _connector) = open_manager();
        let seen = record_topics(
            &bus,
            &[
                Topic::LoadedInstances,
                Topic::Created,
                Topic::Started,
                Topic::Stopped,
                Topic::Removed,
            ],
        );

        for frame in [
            r#"{"event":"Instances","payload":[{"id":"1","status":"stopped"}]}"#,
            r#"{"event":"Created","payload":{"id":"2","status":"created"}}"#,
            r#"{"event":"Started","payload":{"id":"2"}}"#,
            r#"{"event":"Stopped","payload":{"id":"2"}}"#,
            r#"{"event":"Removed","payload":{"id":"2"}}"#,
        ] {
            manager.handle_transport_event(TransportEvent::Frame(frame.to_string()));
        }

        assert_eq!(
            *seen.borrow(),
            vec![
                BusEvent::LoadedInstances(vec![Instance::new("1", InstanceStatus::Stopped)]),
                BusEvent::Created(Instance::new("2", InstanceStatus::Created)),
                BusEvent::Started {
                    id: "2".to_string()
                },
                BusEvent::Stopped {
                    id: "2".to_string()
                },
                BusEvent::Removed {
                    id: "2".to_string()
                },
            ]
        );
    }

    #[test]
    fn unknown_and_malformed_frames_are_dropped() {
        let (bus, manager, _connector) = open_manager();
        let seen = record_topics(&bus, &Topic::ALL);

        manager.handle_transport_event(TransportEvent::Frame(
            r#"{"event":"Bogus","payload":{}}"#.to_string(),
        ));
        manager.handle_transport_event(TransportEvent::Frame("{oops".to_string()));
        manager.handle_transport_event(TransportEvent::Frame(
            r#"{"event":"Started","payload":"7"}"#.to_string(),
        ));

        assert!(seen.borrow().is_empty());
        assert_eq!(manager.state(), ConnectionState::Open);
    }

    #[test]
    fn frames_after_close_are_ignored() {
        let (bus, manager, _connector) = open_manager();
        manager.handle_transport_event(TransportEvent::Closed {
            reason: crate::transport::CloseReason::ServerClosed,
        });
        let seen = record_topics(&bus, &[Topic::Started]);
        manager.handle_transport_event(TransportEvent::Frame(
            r#"{"event":"Started","payload":{"id":"1"}}"#.to_string(),
        ));
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn dropping_the_manager_detaches_it_from_the_bus() {
        let bus = Rc::new(EventBus::new());
        let manager = ConnectionManager::new(Rc::clone(&bus), Box::new(RecordingConnector::default()));
        assert_eq!(bus.subscriber_count(Topic::Start), 1);
        drop(manager);
        assert_eq!(bus.subscriber_count(Topic::Start), 0);
    }

    #[test]
    fn only_intents_convert_to_commands() {
        assert_eq!(
            command_from_intent(&BusEvent::Remove {
                id: "9".to_string()
            }),
            Ok(Command::remove("9"))
        );
        assert!(command_from_intent(&BusEvent::Connected).is_err());
        assert!(command_from_intent(&BusEvent::Start { id: String::new() }).is_err());
    }
}

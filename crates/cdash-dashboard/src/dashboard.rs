use crate::connection::{validate_endpoint, ConnectionManager};
use crate::instances::{Dispatch, Hit, InstancesComponent};
use crate::transport::{Connector, TransportEvent};
use crate::worklog::WorkLog;
use cdash_core::{ConfigError, EventBus, SubscriptionId, Topic};
use std::cell::RefCell;
use std::rc::Rc;
use tokio::sync::mpsc;
use tracing::{info, warn};

pub const DISCONNECTED_NOTICE: &str =
    "Connection lost. Press r to reload the dashboard or q to quit.";

/// Where the dashboard renders. Mounting fails fast when it is unavailable.
pub trait MountTarget {
    fn describe(&self) -> String;
    fn is_available(&self) -> bool;
}

/// One mounted session: its own bus, components and single connection.
/// Dropping it and mounting again is the reload path.
pub struct Dashboard {
    bus: Rc<EventBus>,
    worklog: WorkLog,
    instances: InstancesComponent,
    connection: Rc<ConnectionManager>,
    notice: Rc<RefCell<Option<String>>>,
    subscription: SubscriptionId,
}

impl Dashboard {
    pub fn mount(
        target: &dyn MountTarget,
        endpoint: &str,
        connector: Box<dyn Connector>,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>), ConfigError> {
        if !target.is_available() {
            return Err(ConfigError::MissingTarget(target.describe()));
        }
        validate_endpoint(endpoint)?;

        let bus = Rc::new(EventBus::new());
        let worklog = WorkLog::mount(Rc::clone(&bus));
        let instances = InstancesComponent::mount(Rc::clone(&bus));
        let connection = ConnectionManager::new(Rc::clone(&bus), connector);
        let notice = Rc::new(RefCell::new(None));
        let subscription = {
            let notice = Rc::clone(&notice);
            bus.subscribe(Topic::Disconnected, move |_| {
                warn!(event = "dashboard_blocked");
                *notice.borrow_mut() = Some(DISCONNECTED_NOTICE.to_string());
                Ok(())
            })
        };
        let transport_rx = connection.initialize(endpoint)?;
        info!(event = "dashboard_mounted", target = %target.describe());

        Ok((
            Self {
                bus,
                worklog,
                instances,
                connection,
                notice,
                subscription,
            },
            transport_rx,
        ))
    }

    pub fn instances(&self) -> &InstancesComponent {
        &self.instances
    }

    pub fn worklog(&self) -> &WorkLog {
        &self.worklog
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn notice(&self) -> Option<String> {
        self.notice.borrow().clone()
    }

    pub fn is_blocked(&self) -> bool {
        self.notice.borrow().is_some()
    }

    pub fn interact(&self, hit: &Hit) -> Dispatch {
        self.instances.interact(hit)
    }

    pub fn handle_transport_event(&self, event: TransportEvent) {
        self.connection.handle_transport_event(event);
    }

    pub fn terminate(&self) {
        self.connection.terminate();
    }
}

impl Drop for Dashboard {
    fn drop(&mut self) {
        self.bus.unsubscribe(Topic::Disconnected, self.subscription);
    }
}

pub mod config;
pub mod connection;
pub mod dashboard;
pub mod instances;
pub mod logging;
pub mod registry;
pub mod transport;
pub mod ui;
pub mod worklog;

pub use connection::{ConnectionManager, ConnectionState};
pub use dashboard::{Dashboard, MountTarget, DISCONNECTED_NOTICE};
pub use instances::{ControlRole, Dispatch, Hit, IgnoreReason, InstancesComponent};
pub use registry::{Applied, InstanceRegistry, InstanceView};
pub use transport::{CloseReason, Connector, TransportEvent, WebSocketConnector};
pub use worklog::WorkLog;

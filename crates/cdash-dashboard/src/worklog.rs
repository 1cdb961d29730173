use cdash_core::{BusEvent, EventBus, LogEntry, SubscriptionId, Topic};
use std::cell::{Ref, RefCell};
use std::rc::Rc;
use tracing::info;

pub struct WorkLog {
    bus: Rc<EventBus>,
    entries: Rc<RefCell<Vec<LogEntry>>>,
    subscription: SubscriptionId,
}

impl WorkLog {
    pub fn mount(bus: Rc<EventBus>) -> Self {
        let entries = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&entries);
        let subscription = bus.subscribe(Topic::Log, move |event| {
            if let BusEvent::Log(entry) = event {
                info!(
                    event = "work_log",
                    scope = %entry.id,
                    info = %entry.info
                );
                sink.borrow_mut().push(entry.clone());
            }
            Ok(())
        });
        Self {
            bus,
            entries,
            subscription,
        }
    }

    pub fn entries(&self) -> Ref<'_, Vec<LogEntry>> {
        self.entries.borrow()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    pub fn clear(&self) {
        let dropped = std::mem::take(&mut *self.entries.borrow_mut()).len();
        info!(event = "work_log_cleared", dropped);
    }

    /// The newest `count` entries, oldest first.
    pub fn tail(&self, count: usize) -> Vec<LogEntry> {
        let entries = self.entries.borrow();
        let start = entries.len().saturating_sub(count);
        entries[start..].to_vec()
    }
}

impl Drop for WorkLog {
    fn drop(&mut self) {
        self.bus.unsubscribe(Topic::Log, self.subscription);
    }
}

use cdash_core::{Instance, InstanceStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceView {
    pub instance: Instance,
    pub processing: bool,
}

impl InstanceView {
    fn new(instance: Instance) -> Self {
        Self {
            instance,
            processing: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.instance.id
    }

    pub fn status(&self) -> InstanceStatus {
        self.instance.status
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Replaced(usize),
    Appended,
    Updated,
    Removed,
    Unknown,
}

impl Applied {
    pub fn changed(&self) -> bool {
        !matches!(self, Applied::Unknown)
    }
}

/// Client-side projection of what the server last reported, plus the
/// transient processing marks. One row per instance id, in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceRegistry {
    rows: Vec<InstanceView>,
    add_processing: bool,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> &[InstanceView] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&InstanceView> {
        self.rows.iter().find(|row| row.id() == id)
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut InstanceView> {
        self.rows.iter_mut().find(|row| row.id() == id)
    }

    pub fn ids(&self) -> Vec<&str> {
        self.rows.iter().map(InstanceView::id).collect()
    }

    pub fn add_processing(&self) -> bool {
        self.add_processing
    }

    pub fn is_processing(&self, id: &str) -> bool {
        self.get(id).map(|row| row.processing).unwrap_or(false)
    }

    pub fn processing_count(&self) -> usize {
        self.rows.iter().filter(|row| row.processing).count() + usize::from(self.add_processing)
    }

    pub fn mark_add_processing(&mut self) {
        self.add_processing = true;
    }

    pub fn mark_processing(&mut self, id: &str) -> bool {
        match self.get_mut(id) {
            Some(row) => {
                row.processing = true;
                true
            }
            None => false,
        }
    }

    pub fn replace_all(&mut self, instances: Vec<Instance>) -> Applied {
        self.rows.clear();
        self.add_processing = false;
        for instance in instances {
            match self.get_mut(&instance.id) {
                Some(row) => row.instance = instance,
                None => self.rows.push(InstanceView::new(instance)),
            }
        }
        Applied::Replaced(self.rows.len())
    }

    pub fn apply_created(&mut self, instance: Instance) -> Applied {
        self.add_processing = false;
        match self.get_mut(&instance.id) {
            Some(row) => {
                row.instance.status = instance.status;
                row.processing = false;
                Applied::Updated
            }
            None => {
                self.rows.push(InstanceView::new(instance));
                Applied::Appended
            }
        }
    }

    pub fn apply_started(&mut self, id: &str) -> Applied {
        self.set_status(id, InstanceStatus::Started)
    }

    pub fn apply_stopped(&mut self, id: &str) -> Applied {
        self.set_status(id, InstanceStatus::Stopped)
    }

    pub fn apply_removed(&mut self, id: &str) -> Applied {
        let before = self.rows.len();
        self.rows.retain(|row| row.id() != id);
        if self.rows.len() == before {
            Applied::Unknown
        } else {
            Applied::Removed
        }
    }

    fn set_status(&mut self, id: &str, status: InstanceStatus) -> Applied {
        match self.get_mut(id) {
            Some(row) => {
                row.instance.status = status;
                row.processing = false;
                Applied::Updated
            }
            None => Applied::Unknown,
        }
    }
}

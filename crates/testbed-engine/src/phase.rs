use crate::task::Task;

/// A barrier-synchronized group of independent tasks
#[derive(Debug)]
pub struct Phase {
    name: String,
    tasks: Vec<Task>,
}

impl Phase {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tasks: Vec::new(),
        }
    }

    pub fn task(mut self, task: Task) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn push(&mut self, task: Task) {
        self.tasks.push(task);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn task_names(&self) -> impl Iterator<Item = &str> {
        self.tasks.iter().map(Task::name)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub(crate) fn into_parts(self) -> (String, Vec<Task>) {
        (self.name, self.tasks)
    }
}

/// Ordered phases of one provisioning run
#[derive(Debug)]
pub struct ProvisioningPlan {
    run_id: String,
    phases: Vec<Phase>,
}

impl ProvisioningPlan {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            phases: Vec::new(),
        }
    }

    /// Append a phase. Empty phases are dropped.
    pub fn phase(mut self, phase: Phase) -> Self {
        self.push(phase);
        self
    }

    pub fn push(&mut self, phase: Phase) {
        if phase.is_empty() {
            tracing::debug!(phase = %phase.name(), "skipping empty phase");
        } else {
            self.phases.push(phase);
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    pub fn task_count(&self) -> usize {
        self.phases.iter().map(Phase::len).sum()
    }

    pub(crate) fn into_parts(self) -> (String, Vec<Phase>) {
        (self.run_id, self.phases)
    }
}

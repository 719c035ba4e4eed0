//! Tasks and the values they hand to later phases

use futures_util::future::BoxFuture;
use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use testbed_core::{Endpoint, ResourceHandle, ResourceKind, ServiceLocation, TaskError};

/// Values produced by the tasks of every completed phase, keyed by task name.
///
/// Rebuilt (never mutated) at each phase boundary and shared read-only with
/// the tasks of the next phase.
#[derive(Debug, Clone, Default)]
pub struct PlanOutputs {
    values: BTreeMap<String, String>,
}

impl PlanOutputs {
    pub fn get(&self, task: &str) -> Option<&str> {
        self.values.get(task).map(String::as_str)
    }

    /// Value of an earlier task that this task cannot run without
    pub fn require(&self, task: &str) -> Result<&str, TaskError> {
        self.get(task)
            .ok_or_else(|| TaskError::MissingInput(task.to_string()))
    }

    /// Values of every task named `{prefix}{key}`, keyed by `key`
    pub fn with_prefix(&self, prefix: &str) -> BTreeMap<String, String> {
        self.values
            .iter()
            .filter_map(|(name, value)| {
                name.strip_prefix(prefix)
                    .map(|key| (key.to_string(), value.clone()))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub(crate) fn extended<I>(&self, values: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut next = self.clone();
        next.values.extend(values);
        next
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for PlanOutputs {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Successful outcome of one task
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskOutput {
    /// Passed to later phases under the task's name
    pub value: Option<String>,
    pub endpoints: Vec<(String, Endpoint)>,
    pub locations: Vec<(String, ServiceLocation)>,
    pub kubeconfig: Option<PathBuf>,
}

impl TaskOutput {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn value(value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            ..Default::default()
        }
    }

    pub fn with_endpoint(mut self, service: impl Into<String>, endpoint: Endpoint) -> Self {
        self.endpoints.push((service.into(), endpoint));
        self
    }

    pub fn with_location(mut self, service: impl Into<String>, location: ServiceLocation) -> Self {
        self.locations.push((service.into(), location));
        self
    }

    pub fn with_kubeconfig(mut self, path: impl Into<PathBuf>) -> Self {
        self.kubeconfig = Some(path.into());
        self
    }
}

/// What a running task sees: upstream outputs and a place to record the
/// resources it is about to create.
#[derive(Clone)]
pub struct TaskScope {
    inputs: Arc<PlanOutputs>,
    created: Arc<Mutex<Vec<ResourceHandle>>>,
}

impl TaskScope {
    pub(crate) fn new(inputs: Arc<PlanOutputs>) -> Self {
        Self {
            inputs,
            created: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn inputs(&self) -> &PlanOutputs {
        &self.inputs
    }

    /// Record a resource before issuing its create operation, so that it is
    /// torn down even when creation fails halfway.
    pub fn record(&self, handle: ResourceHandle) {
        tracing::debug!(kind = %handle.kind, name = %handle.name, "recording resource");
        if let Ok(mut created) = self.created.lock() {
            created.push(handle);
        }
    }

    /// Drop a recorded resource that turned out to predate this run
    pub fn forget(&self, kind: ResourceKind, name: &str) {
        tracing::debug!(kind = %kind, name = %name, "forgetting resource");
        if let Ok(mut created) = self.created.lock() {
            created.retain(|h| !(h.kind == kind && h.name == name));
        }
    }

    pub(crate) fn take_created(&self) -> Vec<ResourceHandle> {
        self.created
            .lock()
            .map(|mut created| std::mem::take(&mut *created))
            .unwrap_or_default()
    }
}

/// Bound a collaborator call that carries no budget of its own
pub(crate) async fn within<T, F>(
    budget: Duration,
    operation: &str,
    call: F,
) -> Result<T, TaskError>
where
    F: Future<Output = Result<T, TaskError>>,
{
    match tokio::time::timeout(budget, call).await {
        Ok(result) => result,
        Err(_) => Err(TaskError::Timeout {
            operation: operation.to_string(),
            budget,
            output: String::new(),
        }),
    }
}

pub type TaskFuture = BoxFuture<'static, Result<TaskOutput, TaskError>>;
type TaskBody = Box<dyn FnOnce(TaskScope) -> TaskFuture + Send>;

/// One unit of provisioning work with a single outcome
pub struct Task {
    name: String,
    body: TaskBody,
}

impl Task {
    pub fn new<F, Fut>(name: impl Into<String>, body: F) -> Self
    where
        F: FnOnce(TaskScope) -> Fut + Send + 'static,
        Fut: Future<Output = Result<TaskOutput, TaskError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            body: Box::new(move |scope| Box::pin(body(scope))),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn into_parts(self) -> (String, TaskBody) {
        (self.name, self.body)
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task").field("name", &self.name).finish()
    }
}

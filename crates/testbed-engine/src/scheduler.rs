//! Phase scheduler
//!
//! Runs the phases of a plan strictly in order. Every task of a phase is
//! dispatched as its own tokio task; the scheduler then waits for exactly
//! as many results as the phase has tasks before deciding the outcome.
//! Failing tasks never cancel their siblings.
//!
//! ```text
//! Pending ─> Running(0) ─> Running(1) ─> ... ─> Succeeded
//!                 │             │
//!                 └─────────────┴──────────────> Failed
//! ```

use crate::phase::{Phase, ProvisioningPlan};
use crate::task::{PlanOutputs, TaskOutput, TaskScope};
use futures_util::FutureExt;
use std::any::Any;
use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use testbed_core::{
    ProvisioningError, ProvisioningResult, ResourceHandle, TaskError, TaskFailure,
};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanState {
    Pending,
    /// Index of the phase currently in flight
    Running(usize),
    Succeeded,
    Failed,
}

impl PlanState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PlanState::Succeeded | PlanState::Failed)
    }
}

/// Progress notifications for callers that render progress
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    PhaseStarted {
        index: usize,
        phase: String,
        tasks: Vec<String>,
    },
    TaskFinished {
        phase: String,
        task: String,
        succeeded: bool,
    },
    PhaseFinished {
        phase: String,
        failed: usize,
    },
}

/// Start and end of one task, for tracing and ordering checks
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub phase: String,
    pub task: String,
    pub started: Instant,
    pub finished: Instant,
    pub succeeded: bool,
}

struct TaskReport {
    index: usize,
    name: String,
    outcome: Result<TaskOutput, TaskError>,
    created: Vec<ResourceHandle>,
    started: Instant,
    finished: Instant,
}

/// Executes one [`ProvisioningPlan`], exactly once.
pub struct PhaseScheduler {
    plan: Mutex<Option<ProvisioningPlan>>,
    state: watch::Sender<PlanState>,
    events: Option<mpsc::UnboundedSender<SchedulerEvent>>,
    trace: Mutex<Vec<TaskRecord>>,
}

impl PhaseScheduler {
    pub fn new(plan: ProvisioningPlan) -> Self {
        let (state, _) = watch::channel(PlanState::Pending);
        Self {
            plan: Mutex::new(Some(plan)),
            state,
            events: None,
            trace: Mutex::new(Vec::new()),
        }
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<SchedulerEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn state(&self) -> PlanState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<PlanState> {
        self.state.subscribe()
    }

    /// Start/end records of every task that ran so far
    pub fn trace(&self) -> Vec<TaskRecord> {
        self.trace
            .lock()
            .map(|trace| trace.clone())
            .unwrap_or_default()
    }

    fn emit(&self, event: SchedulerEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    /// Run every phase in order and assemble the result.
    pub async fn execute(&self) -> Result<ProvisioningResult, ProvisioningError> {
        let plan = self
            .plan
            .lock()
            .ok()
            .and_then(|mut plan| plan.take())
            .ok_or(ProvisioningError::AlreadyExecuted)?;

        let (run_id, phases) = plan.into_parts();
        let mut result = ProvisioningResult {
            run_id,
            ..Default::default()
        };
        let mut inputs = Arc::new(PlanOutputs::default());
        let total = phases.len();

        tracing::info!(run_id = %result.run_id, phases = total, "executing plan");

        for (index, phase) in phases.into_iter().enumerate() {
            self.state.send_replace(PlanState::Running(index));
            let phase_name = phase.name().to_string();
            let started = Instant::now();

            let reports = self.run_phase(index, phase, Arc::clone(&inputs)).await;

            let mut failures = Vec::new();
            let mut values = Vec::new();
            for report in reports {
                result.handles.extend(report.created);
                match report.outcome {
                    Ok(output) => {
                        if let Some(value) = output.value {
                            values.push((report.name.clone(), value));
                        }
                        result.endpoints.extend(output.endpoints);
                        result.locations.extend(output.locations);
                        if output.kubeconfig.is_some() {
                            result.kubeconfig = output.kubeconfig;
                        }
                    }
                    Err(error) => failures.push(TaskFailure {
                        phase: phase_name.clone(),
                        task: report.name,
                        error,
                    }),
                }
            }

            let elapsed_ms = started.elapsed().as_millis() as u64;
            self.emit(SchedulerEvent::PhaseFinished {
                phase: phase_name.clone(),
                failed: failures.len(),
            });

            if !failures.is_empty() {
                tracing::error!(
                    phase = %phase_name,
                    failed = failures.len(),
                    elapsed_ms,
                    "phase failed, not starting later phases"
                );
                self.state.send_replace(PlanState::Failed);
                return Err(ProvisioningError::Aggregate {
                    phase: phase_name,
                    failures,
                    created: result.handles,
                });
            }

            tracing::info!(phase = %phase_name, elapsed_ms, "phase complete");
            inputs = Arc::new(inputs.extended(values));
        }

        self.state.send_replace(PlanState::Succeeded);
        tracing::info!(
            run_id = %result.run_id,
            resources = result.handles.len(),
            endpoints = result.endpoints.len(),
            "plan succeeded"
        );
        Ok(result)
    }

    /// Dispatch every task of `phase` and collect exactly one report per task,
    /// in declaration order.
    async fn run_phase(
        &self,
        index: usize,
        phase: Phase,
        inputs: Arc<PlanOutputs>,
    ) -> Vec<TaskReport> {
        let (phase_name, tasks) = phase.into_parts();
        let names: Vec<String> = tasks.iter().map(|t| t.name().to_string()).collect();
        let expected = tasks.len();

        tracing::info!(phase = %phase_name, tasks = expected, "phase started");
        self.emit(SchedulerEvent::PhaseStarted {
            index,
            phase: phase_name.clone(),
            tasks: names.clone(),
        });

        let (tx, mut rx) = mpsc::unbounded_channel::<TaskReport>();
        for (task_index, task) in tasks.into_iter().enumerate() {
            let (name, body) = task.into_parts();
            let scope = TaskScope::new(Arc::clone(&inputs));
            let tx = tx.clone();
            let phase_name = phase_name.clone();

            tokio::spawn(async move {
                let started = Instant::now();
                tracing::debug!(phase = %phase_name, task = %name, "task started");

                let run_scope = scope.clone();
                let outcome = AssertUnwindSafe(async move { body(run_scope).await })
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| Err(TaskError::Panicked(panic_message(panic))));

                let finished = Instant::now();
                let elapsed_ms = (finished - started).as_millis() as u64;
                match &outcome {
                    Ok(_) => {
                        tracing::debug!(
                            phase = %phase_name,
                            task = %name,
                            elapsed_ms,
                            "task succeeded"
                        )
                    }
                    Err(e) => {
                        tracing::warn!(
                            phase = %phase_name,
                            task = %name,
                            elapsed_ms,
                            error = %e,
                            "task failed"
                        )
                    }
                }

                let _ = tx.send(TaskReport {
                    index: task_index,
                    name,
                    outcome,
                    created: scope.take_created(),
                    started,
                    finished,
                });
            });
        }
        drop(tx);

        let mut reports = Vec::with_capacity(expected);
        while reports.len() < expected {
            match rx.recv().await {
                Some(report) => {
                    self.emit(SchedulerEvent::TaskFinished {
                        phase: phase_name.clone(),
                        task: report.name.clone(),
                        succeeded: report.outcome.is_ok(),
                    });
                    reports.push(report);
                }
                None => break,
            }
        }

        // A unit that vanished without reporting still counts as a failure
        if reports.len() < expected {
            let reported: BTreeSet<usize> = reports.iter().map(|r| r.index).collect();
            let now = Instant::now();
            for (i, name) in names.iter().enumerate() {
                if !reported.contains(&i) {
                    reports.push(TaskReport {
                        index: i,
                        name: name.clone(),
                        outcome: Err(TaskError::Panicked(
                            "task ended without a result".to_string(),
                        )),
                        created: Vec::new(),
                        started: now,
                        finished: now,
                    });
                }
            }
        }

        reports.sort_by_key(|r| r.index);

        if let Ok(mut trace) = self.trace.lock() {
            trace.extend(reports.iter().map(|r| TaskRecord {
                phase: phase_name.clone(),
                task: r.name.clone(),
                started: r.started,
                finished: r.finished,
                succeeded: r.outcome.is_ok(),
            }));
        }

        reports
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Task;
    use std::time::Duration;

    fn ok_task(name: &str, value: &str) -> Task {
        let value = value.to_string();
        Task::new(name, move |_| async move { Ok(TaskOutput::value(value)) })
    }

    #[tokio::test]
    async fn test_values_flow_into_next_phase() {
        let plan = ProvisioningPlan::new("run1")
            .phase(Phase::new("prepare").task(ok_task("image:api", "acme/api:run1")))
            .phase(Phase::new("deploy").task(Task::new("deploy:api", |scope| async move {
                let image = scope.inputs().require("image:api")?.to_string();
                Ok::<_, TaskError>(
                    TaskOutput::empty().with_endpoint("api", testbed_core::Endpoint::new(image)),
                )
            })));

        let scheduler = PhaseScheduler::new(plan);
        let result = scheduler.execute().await.unwrap();

        assert_eq!(result.run_id, "run1");
        assert_eq!(result.endpoint("api").unwrap().url, "acme/api:run1");
        assert_eq!(scheduler.state(), PlanState::Succeeded);
    }

    #[tokio::test]
    async fn test_second_execution_is_rejected() {
        let scheduler = PhaseScheduler::new(ProvisioningPlan::new("run1"));
        assert!(scheduler.execute().await.is_ok());
        assert!(matches!(
            scheduler.execute().await,
            Err(ProvisioningError::AlreadyExecuted)
        ));
    }

    #[tokio::test]
    async fn test_panicking_task_becomes_a_failure() {
        let plan = ProvisioningPlan::new("run1").phase(
            Phase::new("prepare")
                .task(Task::new("boom", |_| async move {
                    if true {
                        panic!("kaboom");
                    }
                    Ok(TaskOutput::empty())
                }))
                .task(ok_task("fine", "x")),
        );

        let err = PhaseScheduler::new(plan).execute().await.unwrap_err();
        let failures = err.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].task, "boom");
        assert!(matches!(&failures[0].error, TaskError::Panicked(m) if m.contains("kaboom")));
    }

    #[tokio::test]
    async fn test_handles_recorded_by_failed_tasks_are_kept() {
        let plan = ProvisioningPlan::new("run1").phase(Phase::new("prepare").task(Task::new(
            "cluster",
            |scope| async move {
                scope.record(ResourceHandle::new(
                    testbed_core::ResourceKind::Cluster,
                    "ci-run1-0aa",
                    "ci",
                ));
                Err(TaskError::external("kind create cluster", Some(1), "boom"))
            },
        )));

        let err = PhaseScheduler::new(plan).execute().await.unwrap_err();
        assert_eq!(err.created().len(), 1);
        assert_eq!(err.created()[0].name, "ci-run1-0aa");
    }

    #[tokio::test]
    async fn test_events_and_state_are_published() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let plan = ProvisioningPlan::new("run1")
            .phase(Phase::new("prepare").task(ok_task("a", "1")))
            .phase(Phase::new("deploy").task(ok_task("b", "2")));
        let scheduler = PhaseScheduler::new(plan).with_events(tx);
        let states = scheduler.subscribe();

        scheduler.execute().await.unwrap();
        assert_eq!(*states.borrow(), PlanState::Succeeded);

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(events.len(), 6);
        assert_eq!(
            events[0],
            SchedulerEvent::PhaseStarted {
                index: 0,
                phase: "prepare".to_string(),
                tasks: vec!["a".to_string()],
            }
        );
        assert_eq!(
            events[5],
            SchedulerEvent::PhaseFinished {
                phase: "deploy".to_string(),
                failed: 0,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_sibling_is_not_cancelled_by_fast_failure() {
        let plan = ProvisioningPlan::new("run1").phase(
            Phase::new("prepare")
                .task(Task::new("fast-fail", |_| async move {
                    Err(TaskError::external("docker build", Some(1), "bad"))
                }))
                .task(Task::new("slow-ok", |_| async move {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(TaskOutput::value("done"))
                })),
        );

        let scheduler = PhaseScheduler::new(plan);
        let err = scheduler.execute().await.unwrap_err();
        assert_eq!(err.failures().len(), 1);

        let trace = scheduler.trace();
        let slow = trace.iter().find(|r| r.task == "slow-ok").unwrap();
        assert!(slow.succeeded);
        assert!(slow.finished - slow.started >= Duration::from_secs(30));
    }
}

mod common;

use common::Fakes;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use testbed_core::{BuildSpec, ImageTool, ProvisioningError, TaskError};
use testbed_engine::{
    Observation, Phase, PhaseScheduler, PlanState, Probe, ProvisioningPlan, Task, TaskOutput,
    wait_until_ready,
};
use tokio::time::Instant;

fn sleeper(name: &str, millis: u64) -> Task {
    Task::new(name, move |_| async move {
        tokio::time::sleep(Duration::from_millis(millis)).await;
        Ok(TaskOutput::empty())
    })
}

fn failing(name: &str, millis: u64) -> Task {
    let label = name.to_string();
    Task::new(name, move |_| async move {
        tokio::time::sleep(Duration::from_millis(millis)).await;
        Err(TaskError::external(label, Some(2), "boom"))
    })
}

#[tokio::test(start_paused = true)]
async fn test_no_task_starts_before_previous_phase_finished() {
    let plan = ProvisioningPlan::new("run")
        .phase(
            Phase::new("prepare")
                .task(sleeper("fast", 10))
                .task(sleeper("slow", 900))
                .task(sleeper("medium", 300)),
        )
        .phase(
            Phase::new("deploy-0")
                .task(sleeper("db", 50))
                .task(sleeper("cache", 400)),
        )
        .phase(Phase::new("ready-0").task(sleeper("wait", 20)));

    let scheduler = PhaseScheduler::new(plan);
    scheduler.execute().await.unwrap();
    assert_eq!(scheduler.state(), PlanState::Succeeded);

    let trace = scheduler.trace();
    assert_eq!(trace.len(), 6);
    for (earlier, later) in [("prepare", "deploy-0"), ("deploy-0", "ready-0")] {
        let last_end = trace
            .iter()
            .filter(|r| r.phase == earlier)
            .map(|r| r.finished)
            .max()
            .unwrap();
        let first_start = trace
            .iter()
            .filter(|r| r.phase == later)
            .map(|r| r.started)
            .min()
            .unwrap();
        assert!(first_start >= last_end, "{later} started before {earlier} ended");
    }
}

#[tokio::test(start_paused = true)]
async fn test_every_failure_of_the_phase_is_reported() {
    for failures in 1..=4usize {
        let mut phase = Phase::new("prepare");
        for i in 0..4usize {
            let name = format!("task-{}", i);
            if i < failures {
                phase.push(failing(&name, 100 * i as u64));
            } else {
                phase.push(sleeper(&name, 50));
            }
        }

        let err = PhaseScheduler::new(ProvisioningPlan::new("run").phase(phase))
            .execute()
            .await
            .unwrap_err();

        assert_eq!(err.failures().len(), failures);
        let mut tasks: Vec<&str> = err.failures().iter().map(|f| f.task.as_str()).collect();
        tasks.sort();
        tasks.dedup();
        assert_eq!(tasks.len(), failures, "failure entries must be distinct");
        assert!(err.failures().iter().all(|f| f.phase == "prepare"));
    }
}

#[tokio::test]
async fn test_failed_build_stops_plan_before_deploy() {
    let fakes = Fakes::with(
        common::FakeImages {
            failing: ["api".to_string()].into(),
            ..Default::default()
        },
        common::FakeRuntime::default(),
    );
    let deployed = Arc::new(AtomicBool::new(false));

    let mut builds = Phase::new("prepare");
    for service in ["api", "worker"] {
        let images = fakes.images.clone();
        builds.push(Task::new(format!("image:{}", service), move |_| async move {
            let spec = BuildSpec::new(service, format!("acme/{}", service));
            let reference = images
                .build(&spec, &format!("acme/{}:t3st", service), Duration::from_secs(60))
                .await?;
            Ok::<_, TaskError>(TaskOutput::value(reference))
        }));
    }

    let flag = deployed.clone();
    let deploy = Phase::new("deploy-0").task(Task::new("deploy:api", move |_| async move {
        flag.store(true, Ordering::SeqCst);
        Ok(TaskOutput::empty())
    }));

    let scheduler = PhaseScheduler::new(ProvisioningPlan::new("run").phase(builds).phase(deploy));
    let err = scheduler.execute().await.unwrap_err();

    match &err {
        ProvisioningError::Aggregate {
            phase, failures, ..
        } => {
            assert_eq!(phase, "prepare");
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].task, "image:api");
            assert_eq!(
                failures[0].error.output(),
                Some("error: could not compile `api`")
            );
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!deployed.load(Ordering::SeqCst));
    assert_eq!(scheduler.state(), PlanState::Failed);
    assert_eq!(fakes.journal.starting_with("build").len(), 2);

    let report = err.report();
    assert!(report.contains("image:api"));
    assert!(report.contains("could not compile"));
}

/// Ready once the clock reaches `at`
struct FlipsAt {
    start: Instant,
    at: Duration,
}

#[async_trait::async_trait]
impl Probe for FlipsAt {
    fn target(&self) -> String {
        "flip".to_string()
    }

    async fn observe(&self) -> Observation {
        if self.start.elapsed() >= self.at {
            Observation::ready("up")
        } else {
            Observation::not_ready("down")
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_readiness_wait_inside_a_phase() {
    let start = Instant::now();
    let plan = ProvisioningPlan::new("run").phase(Phase::new("ready-0").task(Task::new(
        "ready:api",
        move |_| async move {
            let probe = FlipsAt {
                start,
                at: Duration::from_secs(3),
            };
            wait_until_ready(&probe, Duration::from_secs(1), Duration::from_secs(5)).await?;
            Ok::<_, TaskError>(TaskOutput::empty())
        },
    )));

    PhaseScheduler::new(plan).execute().await.unwrap();

    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(3), "returned early: {elapsed:?}");
    assert!(elapsed <= Duration::from_secs(4), "returned late: {elapsed:?}");
}

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use testbed_engine::{SchedulerEvent, StepOutcome, TeardownReport};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

/// One spinner per phase, fed by scheduler events
struct PhaseProgress {
    bar: ProgressBar,
    label: String,
    total: usize,
    done: usize,
}

impl PhaseProgress {
    fn new(index: usize, phase: &str, total: usize) -> Self {
        let bar = ProgressBar::new_spinner();
        if let Ok(style) =
            ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")
        {
            bar.set_style(style);
        }
        bar.enable_steady_tick(Duration::from_millis(120));

        let progress = Self {
            bar,
            label: format!("[{}] {}", index + 1, phase),
            total,
            done: 0,
        };
        progress.refresh();
        progress
    }

    fn refresh(&self) {
        self.bar
            .set_message(format!("{} ({}/{})", self.label, self.done, self.total));
    }

    fn task_finished(&mut self, task: &str, succeeded: bool) {
        self.done += 1;
        if !succeeded {
            self.bar.println(format!("  {} {}", "✗".red(), task));
        }
        self.refresh();
    }

    fn finish(self, failed: usize) {
        let message = if failed == 0 {
            format!("{} {}", "✓".green(), self.label)
        } else {
            format!(
                "{} {} ({} of {} failed)",
                "✗".red(),
                self.label,
                failed,
                self.total
            )
        };
        self.bar.finish_with_message(message);
    }
}

/// Render scheduler events until the sender is dropped
pub fn spawn(mut events: UnboundedReceiver<SchedulerEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut current: Option<PhaseProgress> = None;
        while let Some(event) = events.recv().await {
            match event {
                SchedulerEvent::PhaseStarted {
                    index,
                    phase,
                    tasks,
                } => {
                    current = Some(PhaseProgress::new(index, &phase, tasks.len()));
                }
                SchedulerEvent::TaskFinished {
                    task, succeeded, ..
                } => {
                    if let Some(progress) = current.as_mut() {
                        progress.task_finished(&task, succeeded);
                    }
                }
                SchedulerEvent::PhaseFinished { failed, .. } => {
                    if let Some(progress) = current.take() {
                        progress.finish(failed);
                    }
                }
            }
        }
    })
}

pub fn print_teardown(report: &TeardownReport) {
    println!();
    println!("{}", "Teardown".bold());
    if let Some(dir) = &report.diagnostics {
        println!("  diagnostics: {}", dir.display().to_string().cyan());
    }
    for step in &report.steps {
        let mark = match &step.outcome {
            StepOutcome::Removed => "✓".green(),
            StepOutcome::AlreadyAbsent => "-".dimmed(),
            StepOutcome::Failed(_) => "✗".red(),
        };
        println!("  {} {} ({})", mark, step.handle, step.outcome);
    }
    if let Some((path, StepOutcome::Failed(reason))) = &report.kubeconfig {
        println!("  {} kubeconfig {} ({})", "✗".red(), path.display(), reason);
    }
}

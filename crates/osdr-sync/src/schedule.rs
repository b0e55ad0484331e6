//! Periodic driver: an initial delay, then one cycle per period until shutdown.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::pipeline::{Cycle, CycleOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub initial_delay: Duration,
    pub period: Duration,
}

/// Source of ticks. `wait` returns `false` once the driver should stop.
#[async_trait]
pub trait Trigger: Send {
    async fn wait(&mut self, delay: Duration) -> bool;
}

/// Sleeps on the tokio timer; Ctrl-C ends the schedule.
#[derive(Debug, Default)]
pub struct TokioTrigger;

#[async_trait]
impl Trigger for TokioTrigger {
    async fn wait(&mut self, delay: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            signal = tokio::signal::ctrl_c() => {
                if let Err(err) = signal {
                    warn!(error = %err, "listening for shutdown signal failed");
                }
                info!("shutdown requested");
                false
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScheduleReport {
    pub cycles: usize,
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl ScheduleReport {
    fn tally(&mut self, outcome: Option<&CycleOutcome>) {
        self.cycles += 1;
        match outcome {
            Some(CycleOutcome::Completed(_)) => self.completed += 1,
            Some(CycleOutcome::Skipped) => self.skipped += 1,
            Some(CycleOutcome::Failed { .. }) | None => self.failed += 1,
        }
    }
}

/// Run cycles until the trigger says stop. A cycle that panics is logged and
/// counted as failed; the next tick still fires.
pub async fn run_periodic<C, T>(schedule: Schedule, trigger: &mut T, cycle: Arc<C>) -> ScheduleReport
where
    C: Cycle + ?Sized + 'static,
    T: Trigger + ?Sized,
{
    let mut report = ScheduleReport::default();
    info!(
        initial_delay_secs = schedule.initial_delay.as_secs(),
        period_secs = schedule.period.as_secs(),
        "scheduler started"
    );
    if !trigger.wait(schedule.initial_delay).await {
        return report;
    }

    loop {
        let task = {
            let cycle = Arc::clone(&cycle);
            tokio::spawn(async move { cycle.run_cycle().await })
        };
        let outcome = match task.await {
            Ok(outcome) => Some(outcome),
            Err(err) => {
                error!(error = %err, "export cycle aborted unexpectedly");
                None
            }
        };
        report.tally(outcome.as_ref());

        let next_secs = schedule.period.as_secs();
        match &outcome {
            Some(CycleOutcome::Completed(_)) => info!(next_secs, "cycle completed; next in {next_secs}s"),
            Some(CycleOutcome::Skipped) => warn!(next_secs, "cycle skipped; next in {next_secs}s"),
            Some(CycleOutcome::Failed { stage, .. }) => {
                warn!(%stage, next_secs, "cycle failed; next in {next_secs}s")
            }
            None => {}
        }

        if !trigger.wait(schedule.period).await {
            break;
        }
    }

    info!(
        cycles = report.cycles,
        completed = report.completed,
        skipped = report.skipped,
        failed = report.failed,
        "scheduler stopped"
    );
    report
}

//! Automatic check scheduling.
//!
//! One interval loop looks for due checks each tick and dispatches them
//! to a bounded worker pool. Stopping the loop waits for the executions
//! already in flight; it never aborts them.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::check::HealthCheckResult;
use crate::config::{ExecutorConfig, SchedulerConfig};
use crate::events::{EventBus, HealthEvent};
use crate::registry::{execution_waves, RegisteredCheck};

/// What the scheduler drives. Implemented by the health service.
#[async_trait]
pub trait CheckRunner: Send + Sync {
    /// Checks eligible for automatic execution.
    fn candidates(&self) -> Vec<RegisteredCheck>;

    /// Execute one check and record its result.
    async fn run_check(&self, check: RegisteredCheck, cancel: CancellationToken) -> HealthCheckResult;

    /// Called once after every dispatched batch.
    async fn pass_completed(&self, results: Vec<HealthCheckResult>, elapsed: Duration);
}

struct RunningLoop {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

/// Interval-driven scheduler with bounded concurrency.
pub struct Scheduler {
    config: SchedulerConfig,
    executor_defaults: ExecutorConfig,
    last_run: DashMap<String, Instant>,
    permits: Arc<Semaphore>,
    running: Mutex<Option<RunningLoop>>,
    events: EventBus,
}

impl Scheduler {
    /// Create a stopped scheduler.
    pub fn new(config: SchedulerConfig, executor_defaults: ExecutorConfig, events: EventBus) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
        Self {
            config,
            executor_defaults,
            last_run: DashMap::new(),
            permits,
            running: Mutex::new(None),
            events,
        }
    }

    /// Tick interval and concurrency limit.
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Wait for a worker slot. Shared by scheduled and manual passes.
    pub async fn acquire(&self) -> Option<OwnedSemaphorePermit> {
        self.permits.clone().acquire_owned().await.ok()
    }

    /// Has the check's interval elapsed since its last run?
    pub fn is_due(&self, check: &RegisteredCheck, now: Instant) -> bool {
        let interval = check.definition.effective_interval(&self.executor_defaults);
        match self.last_run.get(check.name()) {
            Some(last) => now.saturating_duration_since(*last) >= interval,
            None => true,
        }
    }

    /// Checks whose interval has elapsed.
    pub fn due_checks(&self, checks: Vec<RegisteredCheck>) -> Vec<RegisteredCheck> {
        let now = Instant::now();
        checks
            .into_iter()
            .filter(|check| check.definition.enabled && self.is_due(check, now))
            .collect()
    }

    /// Record a completed execution, scheduled or manual.
    pub fn mark_run(&self, name: &str) {
        self.last_run.insert(name.to_string(), Instant::now());
    }

    /// When a check last ran, manually or on schedule.
    pub fn last_run(&self, name: &str) -> Option<Instant> {
        self.last_run.get(name).map(|last| *last)
    }

    /// Drop scheduling state for an unregistered check.
    pub fn forget(&self, name: &str) {
        self.last_run.remove(name);
    }

    /// Run checks wave by wave, at most `max_concurrency` at a time.
    pub async fn dispatch(
        &self,
        checks: Vec<RegisteredCheck>,
        runner: Arc<dyn CheckRunner>,
        cancel: CancellationToken,
    ) -> Vec<HealthCheckResult> {
        let mut results = Vec::with_capacity(checks.len());

        for wave in execution_waves(checks) {
            let mut tasks = JoinSet::new();

            for check in wave {
                let Some(permit) = self.acquire().await else {
                    warn!("Worker pool closed, dropping remaining checks");
                    break;
                };
                let runner = runner.clone();
                let cancel = cancel.clone();
                tasks.spawn(async move {
                    let _permit = permit;
                    runner.run_check(check, cancel).await
                });
            }

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(result) => {
                        self.mark_run(&result.check_name);
                        results.push(result);
                    }
                    Err(error) => warn!(error = %error, "Health check task aborted"),
                }
            }
        }

        results
    }

    /// One scheduling pass: dispatch whatever is due.
    pub async fn tick(&self, runner: Arc<dyn CheckRunner>, cancel: CancellationToken) -> usize {
        let due = self.due_checks(runner.candidates());
        if due.is_empty() {
            return 0;
        }

        debug!(due = due.len(), "Dispatching due health checks");
        let started = Instant::now();
        let results = self.dispatch(due, runner.clone(), cancel).await;
        let count = results.len();
        runner.pass_completed(results, started.elapsed()).await;
        count
    }

    /// Is the background loop active?
    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Start the loop. Returns false if it is already running.
    ///
    /// The loop holds only a weak reference to the runner and exits once
    /// the runner is dropped.
    pub fn start(self: &Arc<Self>, runner: Weak<dyn CheckRunner>) -> bool {
        let mut running = self.running.lock();
        if running.is_some() {
            return false;
        }

        let stop = CancellationToken::new();
        let scheduler = Arc::clone(self);
        let loop_stop = stop.clone();
        let handle = tokio::spawn(async move {
            scheduler.run_loop(runner, loop_stop).await;
        });

        *running = Some(RunningLoop { stop, handle });
        drop(running);

        info!(tick_ms = self.config.tick_interval.as_millis() as u64, "Automatic health checks started");
        self.events.publish(HealthEvent::SchedulerStarted {
            tick_interval: self.config.tick_interval,
        });
        true
    }

    async fn run_loop(&self, runner: Weak<dyn CheckRunner>, stop: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // Executions get their own token so a stop request lets them finish.
        let executions = CancellationToken::new();

        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {
                    let Some(runner) = runner.upgrade() else {
                        debug!("Check runner dropped, scheduler exiting");
                        break;
                    };
                    self.tick(runner, executions.clone()).await;
                }
            }
        }
    }

    /// Stop the loop and wait for in-flight checks. Returns false if it
    /// was not running.
    pub async fn stop(&self) -> bool {
        let Some(running) = self.running.lock().take() else {
            return false;
        };

        running.stop.cancel();
        if let Err(error) = running.handle.await {
            warn!(error = %error, "Scheduler loop ended abnormally");
        }

        info!("Automatic health checks stopped");
        self.events.publish(HealthEvent::SchedulerStopped);
        true
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.stop.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::{CheckOutcome, HealthCheckDefinition, StaticCheck};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use vigil_types::CheckCategory;

    struct CountingRunner {
        checks: Vec<RegisteredCheck>,
        runs: AtomicUsize,
        passes: AtomicUsize,
        active: AtomicUsize,
        peak: AtomicUsize,
        work: Duration,
    }

    impl CountingRunner {
        fn new(checks: Vec<RegisteredCheck>, work: Duration) -> Arc<Self> {
            Arc::new(Self {
                checks,
                runs: AtomicUsize::new(0),
                passes: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                work,
            })
        }
    }

    #[async_trait]
    impl CheckRunner for CountingRunner {
        fn candidates(&self) -> Vec<RegisteredCheck> {
            self.checks.clone()
        }

        async fn run_check(&self, check: RegisteredCheck, _cancel: CancellationToken) -> HealthCheckResult {
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(active, Ordering::SeqCst);
            tokio::time::sleep(self.work).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.runs.fetch_add(1, Ordering::SeqCst);
            HealthCheckResult::from_outcome(check.name(), CheckOutcome::healthy("ok"))
        }

        async fn pass_completed(&self, _results: Vec<HealthCheckResult>, _elapsed: Duration) {
            self.passes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn check(name: &str, interval: Duration) -> RegisteredCheck {
        RegisteredCheck {
            definition: HealthCheckDefinition::new(name, CheckCategory::System).with_interval(interval),
            check: Arc::new(StaticCheck::healthy()),
        }
    }

    fn scheduler(max_concurrency: usize) -> Arc<Scheduler> {
        Arc::new(Scheduler::new(
            SchedulerConfig {
                tick_interval: Duration::from_millis(100),
                max_concurrency,
            },
            ExecutorConfig::default(),
            EventBus::new(16),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_bounds_concurrency() {
        let checks: Vec<_> = (0..6)
            .map(|i| check(&format!("c{}", i), Duration::from_secs(1)))
            .collect();
        let runner = CountingRunner::new(checks.clone(), Duration::from_millis(50));
        let scheduler = scheduler(2);

        let results = scheduler
            .dispatch(checks, runner.clone(), CancellationToken::new())
            .await;

        assert_eq!(results.len(), 6);
        assert_eq!(runner.peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_controls_due_checks() {
        let fast = check("fast", Duration::from_millis(100));
        let slow = check("slow", Duration::from_secs(10));
        let scheduler = scheduler(4);

        let due = scheduler.due_checks(vec![fast.clone(), slow.clone()]);
        assert_eq!(due.len(), 2);

        scheduler.mark_run("fast");
        scheduler.mark_run("slow");
        assert!(scheduler.due_checks(vec![fast.clone(), slow.clone()]).is_empty());

        tokio::time::advance(Duration::from_millis(150)).await;
        let due = scheduler.due_checks(vec![fast, slow]);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].name(), "fast");
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_checks_are_never_due() {
        let mut disabled = check("off", Duration::from_millis(10));
        disabled.definition.enabled = false;
        assert!(scheduler(1).due_checks(vec![disabled]).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_runs_and_stops_gracefully() {
        let runner = CountingRunner::new(
            vec![check("db", Duration::from_millis(50))],
            Duration::from_millis(30),
        );
        let scheduler = scheduler(2);
        let weak: Weak<dyn CheckRunner> = Arc::downgrade(&(runner.clone() as Arc<dyn CheckRunner>));

        assert!(scheduler.start(weak.clone()));
        assert!(!scheduler.start(weak));
        assert!(scheduler.is_running());

        // Stop while the fourth run is in flight
        tokio::time::sleep(Duration::from_millis(310)).await;
        assert!(scheduler.stop().await);
        assert!(!scheduler.is_running());

        let runs = runner.runs.load(Ordering::SeqCst);
        assert_eq!(runs, 4);
        assert_eq!(runner.active.load(Ordering::SeqCst), 0);
        assert_eq!(runner.passes.load(Ordering::SeqCst), runs);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(runner.runs.load(Ordering::SeqCst), runs);
        assert!(!scheduler.stop().await);
    }
}

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::{
    channel::ComputeChannel,
    error::{Result, SchedulerError},
    factory::JobFactory,
    pending::PendingJobs,
    schedule::delay_until_aligned_start,
    types::{Job, Trigger},
};

/// The per-tick work shared by every trigger task.
#[derive(Clone)]
struct Dispatcher {
    factory: JobFactory,
    pending: Arc<PendingJobs>,
    channel: Arc<dyn ComputeChannel>,
}

impl Dispatcher {
    async fn dispatch(&self, trigger: &Trigger) -> Result<Job> {
        let job = self
            .factory
            .create(&trigger.type_name, trigger.params.clone(), trigger.time_offset)?;
        self.pending.insert(job.clone())?;

        if let Err(e) = self.channel.submit(&job.request()).await {
            // Never reached the engine, so no response can ever match it.
            if let Err(gone) = self.pending.take(&job.id) {
                debug!(job_id = %job.id, error = %gone, "failed job already left the pending set");
            }
            return Err(e.into());
        }

        info!(
            job_id = %job.id,
            job_type = %job.type_name,
            channel = self.channel.name(),
            pending = self.pending.len(),
            "job dispatched"
        );
        Ok(job)
    }
}

/// Runs one independent recurring task per [`Trigger`].
///
/// All tasks hang off a single cancellation token so they stop as a group,
/// and are tracked so [`IntervalScheduler::shutdown`] can wait for them.
pub struct IntervalScheduler {
    dispatcher: Dispatcher,
    cancel: CancellationToken,
    tasks: TaskTracker,
    started: AtomicBool,
}

impl IntervalScheduler {
    pub fn new(
        factory: JobFactory,
        pending: Arc<PendingJobs>,
        channel: Arc<dyn ComputeChannel>,
    ) -> Self {
        Self {
            dispatcher: Dispatcher {
                factory,
                pending,
                channel,
            },
            cancel: CancellationToken::new(),
            tasks: TaskTracker::new(),
            started: AtomicBool::new(false),
        }
    }

    pub fn pending(&self) -> &Arc<PendingJobs> {
        &self.dispatcher.pending
    }

    /// Token cancelled by [`shutdown`](Self::shutdown). Child tokens of it
    /// can be handed to companion tasks.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Create, register and submit one job for `trigger` right now.
    pub async fn dispatch(&self, trigger: &Trigger) -> Result<Job> {
        self.dispatcher.dispatch(trigger).await
    }

    /// Start a recurring task for `trigger` immediately. Its first fire is
    /// one period from now.
    pub fn schedule(&self, trigger: Trigger) {
        spawn_trigger(
            &self.tasks,
            self.dispatcher.clone(),
            trigger,
            self.cancel.child_token(),
        );
    }

    /// Start all `triggers` once `delay` has elapsed.
    ///
    /// The wait itself is cancellable through [`shutdown`](Self::shutdown).
    /// A scheduler can only be started once.
    pub fn start_after(&self, delay: Duration, triggers: Vec<Trigger>) -> Result<()> {
        if self.dispatcher.factory.registry().is_empty() {
            return Err(SchedulerError::EmptyRegistry);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::AlreadyStarted);
        }
        for trigger in &triggers {
            if let Err(e) = self.dispatcher.factory.registry().lookup(&trigger.type_name) {
                warn!(error = %e, "trigger references an unknown job type; its ticks will be skipped");
            }
        }

        info!(delay_secs = delay.as_secs(), triggers = triggers.len(), "scheduler start deferred");
        let tasks = self.tasks.clone();
        let dispatcher = self.dispatcher.clone();
        let cancel = self.cancel.clone();
        self.tasks.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("deferred scheduler start cancelled");
                }
                _ = tokio::time::sleep(delay) => {
                    info!(triggers = triggers.len(), "starting job triggers");
                    for trigger in triggers {
                        spawn_trigger(&tasks, dispatcher.clone(), trigger, cancel.child_token());
                    }
                }
            }
        });
        Ok(())
    }

    /// Start all `triggers` at the next full hour plus `grace`.
    pub fn start_aligned(&self, grace: chrono::Duration, triggers: Vec<Trigger>) -> Result<()> {
        self.start_after(delay_until_aligned_start(Utc::now(), grace), triggers)
    }

    /// Periodically drop pending jobs older than `ttl`.
    ///
    /// Not started by default: without it an unanswered job stays pending
    /// until the process exits.
    pub fn spawn_orphan_sweep(&self, ttl: chrono::Duration, every: Duration) {
        let pending = Arc::clone(&self.dispatcher.pending);
        let cancel = self.cancel.child_token();
        info!(ttl_secs = ttl.num_seconds(), every_secs = every.as_secs(), "orphan sweep enabled");
        self.tasks.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        for job in pending.sweep_expired(ttl, Utc::now()) {
                            warn!(
                                job_id = %job.id,
                                job_type = %job.type_name,
                                created_at = %job.created_at,
                                "pending job expired without a response"
                            );
                        }
                    }
                }
            }
        });
    }

    /// Run a companion task (e.g. the response correlator) under the same
    /// tracker so shutdown waits for it too.
    pub fn track<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(task);
    }

    /// Cancel the deferred start and every trigger, then wait for all
    /// tracked tasks to finish.
    pub async fn shutdown(&self) {
        info!("scheduler shutting down");
        self.cancel.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        info!(pending = self.dispatcher.pending.len(), "scheduler stopped");
    }
}

fn spawn_trigger(
    tasks: &TaskTracker,
    dispatcher: Dispatcher,
    trigger: Trigger,
    cancel: CancellationToken,
) {
    tasks.spawn(run_trigger(dispatcher, trigger, cancel));
}

async fn run_trigger(dispatcher: Dispatcher, trigger: Trigger, cancel: CancellationToken) {
    let period_ms = trigger.period.as_millis() as u64;
    info!(job_type = %trigger.type_name, period_ms, repeat = ?trigger.repeat, "trigger started");

    let mut ticker = tokio::time::interval_at(Instant::now() + trigger.period, trigger.period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut fired: u32 = 0;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(job_type = %trigger.type_name, fired, "trigger cancelled");
                return;
            }
            _ = ticker.tick() => {}
        }

        if let Err(e) = dispatcher.dispatch(&trigger).await {
            warn!(job_type = %trigger.type_name, error = %e, "tick skipped");
        }

        fired = fired.saturating_add(1);
        if trigger.repeat.is_exhausted(fired) {
            info!(job_type = %trigger.type_name, fired, "trigger finished");
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::{error::ChannelError, jobs::builtin_registry, types::JobRequest};

    struct FlakyChannel {
        sent: Mutex<Vec<JobRequest>>,
        fail: bool,
    }

    #[async_trait]
    impl ComputeChannel for FlakyChannel {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn submit(&self, request: &JobRequest) -> std::result::Result<(), ChannelError> {
            if self.fail {
                return Err(ChannelError::SendFailed("connection reset".to_string()));
            }
            self.sent.lock().unwrap().push(request.clone());
            Ok(())
        }
    }

    fn scheduler(fail: bool) -> (IntervalScheduler, Arc<FlakyChannel>) {
        let channel = Arc::new(FlakyChannel {
            sent: Mutex::new(Vec::new()),
            fail,
        });
        let factory = JobFactory::new(Arc::new(builtin_registry().unwrap()));
        (
            IntervalScheduler::new(factory, Arc::new(PendingJobs::new()), channel.clone()),
            channel,
        )
    }

    #[tokio::test]
    async fn dispatch_registers_then_submits() {
        let (scheduler, channel) = scheduler(false);
        let trigger = Trigger::every("TopHashtagJob", vec![serde_json::json!(10)], 1000).unwrap();

        let job = scheduler.dispatch(&trigger).await.unwrap();
        assert!(scheduler.pending().contains(&job.id));
        assert_eq!(channel.sent.lock().unwrap()[0].id, job.id);
    }

    #[tokio::test]
    async fn failed_submit_leaves_nothing_pending() {
        let (scheduler, _channel) = scheduler(true);
        let trigger = Trigger::every("TopHashtagJob", Vec::new(), 1000).unwrap();

        let err = scheduler.dispatch(&trigger).await.unwrap_err();
        assert!(matches!(err, SchedulerError::Channel(_)));
        assert!(scheduler.pending().is_empty());
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let (scheduler, _channel) = scheduler(false);
        scheduler.start_after(Duration::from_secs(60), Vec::new()).unwrap();
        assert!(matches!(
            scheduler.start_after(Duration::ZERO, Vec::new()),
            Err(SchedulerError::AlreadyStarted)
        ));
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn empty_registry_cannot_start() {
        let channel = Arc::new(FlakyChannel {
            sent: Mutex::new(Vec::new()),
            fail: false,
        });
        let scheduler = IntervalScheduler::new(
            JobFactory::new(Arc::new(crate::registry::JobTypeRegistry::new())),
            Arc::new(PendingJobs::new()),
            channel,
        );
        assert!(matches!(
            scheduler.start_after(Duration::ZERO, Vec::new()),
            Err(SchedulerError::EmptyRegistry)
        ));
    }
}

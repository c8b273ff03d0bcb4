use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use batch_dispatcher::DispatcherHandle;
use common_kafka::rebalance::AssignmentEvent;
use metrics::counter;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::MonitorConfig;
use crate::metrics::{record_partition_lag, record_partition_status, SAMPLER_FAILURES};
use crate::rules::{classify, Verdict};
use crate::sample::total_lag;
use crate::sampler::{ProgressSampler, SamplerError};
use crate::window::SampleWindow;

/// Receives the per-partition verdicts computed over each full window.
///
/// Verdicts are observations for alerting, not control flow; returning
/// from this hook never stops the consumer being observed.
pub trait VerdictHandler: Send + Sync {
    fn on_verdicts(&self, topic: &str, verdicts: &BTreeMap<i32, Verdict>);
}

/// Default handler: logs unhealthy partitions and keeps a status gauge.
pub struct LoggingVerdictHandler {
    pub group_id: String,
}

impl VerdictHandler for LoggingVerdictHandler {
    fn on_verdicts(&self, topic: &str, verdicts: &BTreeMap<i32, Verdict>) {
        for (&partition, &verdict) in verdicts {
            record_partition_status(topic, partition, &self.group_id, verdict);
            match verdict {
                Verdict::Healthy => {}
                Verdict::Stalled { lag } => warn!(
                    topic,
                    partition,
                    lag,
                    group_id = %self.group_id,
                    "partition stalled: offsets are not advancing"
                ),
                Verdict::Lagging => warn!(
                    topic,
                    partition,
                    group_id = %self.group_id,
                    "partition lag is not decreasing"
                ),
            }
        }
    }
}

enum AssignmentSignal {
    Event(AssignmentEvent),
    Lagged,
    Closed,
}

/// Periodic lag observer for one (consumer, topic, group) triple.
///
/// Each tick samples progress, appends to the sliding window, and runs the
/// rules engine once the window is full. Sampling failures are tolerated
/// until `max_consecutive_failures` in a row, then re-raised.
pub struct LagMonitor {
    sampler: ProgressSampler,
    window: SampleWindow,
    topic: String,
    group_id: String,
    poll_interval: Duration,
    max_consecutive_failures: u32,
    verdicts: Arc<dyn VerdictHandler>,
    assignments: Option<broadcast::Receiver<AssignmentEvent>>,
}

impl LagMonitor {
    pub fn new(
        sampler: ProgressSampler,
        config: &MonitorConfig,
        verdicts: Arc<dyn VerdictHandler>,
    ) -> Self {
        Self {
            sampler,
            window: SampleWindow::new(config.window_size),
            topic: config.kafka_topic.clone(),
            group_id: config.kafka_consumer_group.clone(),
            poll_interval: config.poll_interval(),
            max_consecutive_failures: config.max_consecutive_failures,
            verdicts,
            assignments: None,
        }
    }

    /// Reset the window whenever an assignment event mentions the
    /// monitored topic; pre- and post-rebalance samples must not mix.
    pub fn with_assignment_events(
        mut self,
        events: broadcast::Receiver<AssignmentEvent>,
    ) -> Self {
        self.assignments = Some(events);
        self
    }

    /// Attach to a running dispatcher: sample through its consumer handle
    /// and reset on its rebalances.
    pub fn for_dispatcher(
        handle: &DispatcherHandle,
        config: &MonitorConfig,
        verdicts: Arc<dyn VerdictHandler>,
    ) -> Self {
        let sampler = ProgressSampler::new(handle.consumer(), config.kafka_topic.clone(), config);
        Self::new(sampler, config, verdicts).with_assignment_events(handle.subscribe_assignments())
    }

    pub async fn run(mut self, shutdown: CancellationToken) -> Result<(), SamplerError> {
        let mut assignments = self.assignments.take();
        let mut consecutive_failures = 0u32;
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                signal = Self::next_assignment(&mut assignments) => match signal {
                    AssignmentSignal::Event(event) => {
                        if event.mentions_topic(&self.topic) {
                            info!(topic = %self.topic, "assignment changed, resetting sample window");
                            self.window.reset();
                        }
                    }
                    AssignmentSignal::Lagged => {
                        // missed events mean partitions may have moved
                        self.window.reset();
                    }
                    AssignmentSignal::Closed => {}
                },
                _ = ticker.tick() => match self.tick() {
                    Ok(()) => consecutive_failures = 0,
                    Err(err) => {
                        consecutive_failures += 1;
                        error!(
                            topic = %self.topic,
                            group_id = %self.group_id,
                            consecutive_failures,
                            error = %err,
                            "progress sampling failed"
                        );
                        counter!(SAMPLER_FAILURES).increment(1);
                        if consecutive_failures >= self.max_consecutive_failures {
                            return Err(err);
                        }
                    }
                },
            }
        }
    }

    /// Drive the monitor next to its dispatcher; whichever side finishes
    /// first wins and the other is stopped.
    pub async fn run_alongside(self, handle: DispatcherHandle) -> anyhow::Result<()> {
        let shutdown = CancellationToken::new();
        let monitor = self.run(shutdown.clone());
        tokio::pin!(monitor);
        tokio::select! {
            result = handle.join() => {
                shutdown.cancel();
                result
            }
            result = &mut monitor => {
                handle.stop();
                result.map_err(anyhow::Error::from)
            }
        }
    }

    async fn next_assignment(
        rx: &mut Option<broadcast::Receiver<AssignmentEvent>>,
    ) -> AssignmentSignal {
        let Some(receiver) = rx else {
            return std::future::pending().await;
        };
        match receiver.recv().await {
            Ok(event) => AssignmentSignal::Event(event),
            Err(broadcast::error::RecvError::Lagged(_)) => AssignmentSignal::Lagged,
            Err(broadcast::error::RecvError::Closed) => {
                // the sender is gone; stop polling this side
                *rx = None;
                AssignmentSignal::Closed
            }
        }
    }

    fn tick(&self) -> Result<(), SamplerError> {
        let samples = self.sampler.sample()?;

        for sample in &samples {
            record_partition_lag(&self.topic, sample.partition, &self.group_id, sample.lag);
            info!(
                topic = %self.topic,
                partition = sample.partition,
                consumer_offset = ?sample.consumer_offset,
                high_watermark = ?sample.high_watermark,
                lag = sample.lag,
                "partition progress"
            );
        }
        info!(
            topic = %self.topic,
            group_id = %self.group_id,
            partitions = samples.len(),
            total_lag = total_lag(&samples),
            "sampled consumer progress"
        );

        self.window.push(samples);

        let window = self.window.snapshot_if_full();
        if !window.is_empty() {
            let verdicts = classify(&window);
            self.verdicts.on_verdicts(&self.topic, &verdicts);
        }
        Ok(())
    }
}

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common_kafka::kafka_consumer::TrackedConsumerContext;
use common_kafka::rebalance::AssignmentEvent;
use rdkafka::consumer::StreamConsumer;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Where the dispatcher is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Running,
    Draining,
    Completed,
    Faulted,
}

/// Cloneable control surface for a running dispatcher.
///
/// Also the sampling surface for the lag monitor: [`DispatcherHandle::consumer`]
/// exposes the underlying client for assignment/committed/watermark queries,
/// and [`DispatcherHandle::subscribe_assignments`] the rebalance events.
#[derive(Clone)]
pub struct DispatcherHandle {
    inner: Arc<HandleInner>,
}

pub(crate) struct HandleInner {
    pub(crate) shutdown: CancellationToken,
    pub(crate) state_tx: watch::Sender<DispatcherState>,
    pub(crate) fault: Mutex<Option<anyhow::Error>>,
    pub(crate) consumer: Arc<StreamConsumer<TrackedConsumerContext>>,
    pub(crate) assignments: broadcast::Sender<AssignmentEvent>,
}

impl DispatcherHandle {
    pub(crate) fn new(
        consumer: Arc<StreamConsumer<TrackedConsumerContext>>,
        assignments: broadcast::Sender<AssignmentEvent>,
    ) -> Self {
        let (state_tx, _) = watch::channel(DispatcherState::Running);
        Self {
            inner: Arc::new(HandleInner {
                shutdown: CancellationToken::new(),
                state_tx,
                fault: Mutex::new(None),
                consumer,
                assignments,
            }),
        }
    }

    /// Request a graceful drain: polling stops, queued-but-undispatched
    /// batches are discarded, in-flight batches complete and commit.
    /// Idempotent.
    pub fn stop(&self) {
        if !self.inner.shutdown.is_cancelled() {
            info!("dispatcher stop requested");
        }
        self.inner.shutdown.cancel();
    }

    /// Arm a timer that calls [`DispatcherHandle::stop`] once. Fire-and-forget.
    pub fn stop_after(&self, delay: Duration) {
        let shutdown = self.inner.shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            shutdown.cancel();
        });
    }

    pub fn state(&self) -> DispatcherState {
        *self.inner.state_tx.borrow()
    }

    /// Resolve once the pipeline has drained. Surfaces the first fatal
    /// handler error; subsequent calls after a fault report a generic
    /// faulted error.
    pub async fn join(&self) -> anyhow::Result<()> {
        let mut rx = self.inner.state_tx.subscribe();
        loop {
            let state = *rx.borrow_and_update();
            match state {
                DispatcherState::Completed => return Ok(()),
                DispatcherState::Faulted => return Err(self.take_fault()),
                DispatcherState::Running | DispatcherState::Draining => {}
            }
            if rx.changed().await.is_err() {
                // dispatcher task gone without reaching a terminal state
                return match self.try_take_fault() {
                    Some(err) => Err(err),
                    None => Ok(()),
                };
            }
        }
    }

    pub fn subscribe_assignments(&self) -> broadcast::Receiver<AssignmentEvent> {
        self.inner.assignments.subscribe()
    }

    pub fn consumer(&self) -> Arc<StreamConsumer<TrackedConsumerContext>> {
        self.inner.consumer.clone()
    }

    pub(crate) fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    /// Record the first fatal error and trigger shutdown.
    pub(crate) fn fault(&self, err: anyhow::Error) {
        {
            let mut slot = self.inner.fault.lock().unwrap();
            if slot.is_none() {
                *slot = Some(err);
            } else {
                debug!(error = ?err, "suppressing secondary dispatcher fault");
            }
        }
        self.inner.shutdown.cancel();
    }

    pub(crate) fn is_faulted(&self) -> bool {
        self.inner.fault.lock().unwrap().is_some()
    }

    pub(crate) fn set_state(&self, state: DispatcherState) {
        // send_replace stores the state even while nobody is joined yet
        self.inner.state_tx.send_replace(state);
    }

    fn try_take_fault(&self) -> Option<anyhow::Error> {
        self.inner.fault.lock().unwrap().take()
    }

    fn take_fault(&self) -> anyhow::Error {
        self.try_take_fault()
            .unwrap_or_else(|| anyhow::anyhow!("dispatcher faulted"))
    }
}

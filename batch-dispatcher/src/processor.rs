use async_trait::async_trait;

use crate::handle::DispatcherHandle;
use crate::message::Batch;

/// User-supplied batch handler.
///
/// Batches for the same partition are handed over strictly one at a time;
/// batches for different partitions run concurrently up to the worker pool
/// size. The handle is passed at invocation time so a handler can call
/// [`DispatcherHandle::stop`] from within a batch.
///
/// Returning an error is fatal to the dispatcher instance: no further
/// batches are dispatched and the error surfaces from
/// [`DispatcherHandle::join`].
#[async_trait]
pub trait BatchProcessor<T>: Send + Sync {
    async fn process_batch(
        &self,
        consumer: &DispatcherHandle,
        batch: Batch<T>,
    ) -> anyhow::Result<()>;
}

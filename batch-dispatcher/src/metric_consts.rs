pub const BATCHES_DISPATCHED: &str = "batch_dispatcher_batches_dispatched";
pub const MESSAGES_HANDLED: &str = "batch_dispatcher_messages_handled";
pub const MESSAGES_DECODED: &str = "batch_dispatcher_messages_decoded";
pub const DECODE_FAILURES: &str = "batch_dispatcher_decode_failures";
pub const HANDLER_FAILURES: &str = "batch_dispatcher_handler_failures";
pub const COMMIT_FAILURES: &str = "batch_dispatcher_commit_failures";
pub const RECV_ERRORS: &str = "batch_dispatcher_recv_errors";
pub const BATCHES_DISCARDED: &str = "batch_dispatcher_batches_discarded";
pub const IN_FLIGHT_PARTITIONS: &str = "batch_dispatcher_in_flight_partitions";
pub const QUEUED_BYTES: &str = "batch_dispatcher_queued_bytes";

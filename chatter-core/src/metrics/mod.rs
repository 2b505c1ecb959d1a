//! Metrics registration for observability
//!
//! Call sites use the `metrics` facade macros directly; this module
//! registers descriptions so an exporter installed by the host process
//! renders them with units and help text.

use metrics::{describe_counter, describe_histogram};

/// Register descriptions for every metric the engine emits
pub fn init_metrics() {
    // Send pipeline
    describe_counter!("chat.send.total", "Total send operations accepted");
    describe_counter!("chat.send.duplicate", "Sends deduplicated on client_message_id");
    describe_counter!("chat.send.delayed", "Sends whose mirror updates exhausted retries");
    describe_histogram!("chat.send.duration_ms", "End-to-end send duration in milliseconds");

    // Message log
    describe_counter!("chat.log.append.total", "Messages appended to the log");
    describe_counter!("chat.log.append.duplicate", "Appends resolved as idempotent replays");

    // Mirror store
    describe_counter!("chat.mirror.upsert.applied", "Mirror upserts that won last-writer-wins");
    describe_counter!("chat.mirror.upsert.stale", "Mirror upserts dropped as stale");

    // Retry / reconciliation
    describe_counter!("chat.sync.retries", "Transient store failures retried with backoff");
    describe_counter!("chat.reconcile.rounds", "Reconciliation rounds executed");
    describe_counter!("chat.reconcile.repaired", "Mirror entries repaired by reconciliation");

    // Realtime channel
    describe_counter!("chat.channel.messages.published", "Message events published");
    describe_counter!("chat.channel.mirrors.published", "Mirror events published");
    describe_counter!("chat.channel.overflow", "Subscribers disconnected for falling behind");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics_is_idempotent() {
        // registration without an installed recorder must not panic
        init_metrics();
        init_metrics();
    }
}

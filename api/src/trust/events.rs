use guild_core::trust::TrustEvent;

/// Destination for trust events. Delivery is the collaborator's concern;
/// emitting never fails the transition that produced the event.
pub trait TrustEventSink: Send + Sync {
    fn emit(&self, event: &TrustEvent);
}

/// Writes events to the structured log under the `trust_events` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl TrustEventSink for TracingEventSink {
    fn emit(&self, event: &TrustEvent) {
        tracing::info!(
            target: "trust_events",
            kind = event.kind.as_str(),
            agent_id = %event.agent_id,
            previous_tier = %event.previous_tier,
            new_tier = %event.new_tier,
            timestamp = %event.timestamp,
            reason = event.reason.as_deref().unwrap_or(""),
            "trust event"
        );
    }
}

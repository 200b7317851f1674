use anyhow::{bail, Result};
use std::sync::Arc;

use super::envelope::Envelope;
use super::event::{DomainEvent, Event, EventPayload, SharedEvent};

// ============================================================================
// Aggregate Root Pattern - Event Sourcing Core
// ============================================================================
//
// Key Principles:
// 1. State is derived from events (not stored directly)
// 2. Commands are validated before emitting events
// 3. Events represent facts that have already happened
// 4. The aggregate owns its sequence: new events continue `version()`
//
// This is the GENERIC aggregate trait that works for ANY domain aggregate.
//
// ============================================================================

pub trait Aggregate: Sized + Send + Sync {
    type Payload: EventPayload;
    type Command;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Create new aggregate from its first event
    fn apply_first_event(event: &DomainEvent<Self::Payload>) -> Result<Self, Self::Error>;

    /// Apply subsequent events to update state
    fn apply_event(&mut self, event: &DomainEvent<Self::Payload>) -> Result<(), Self::Error>;

    /// Decide the events for a command against a stream that does not exist yet
    fn handle_initial_command(command: &Self::Command) -> Result<Vec<Self::Payload>, Self::Error>;

    /// Decide the events for a command against the current state
    fn handle_command(&self, command: &Self::Command) -> Result<Vec<Self::Payload>, Self::Error>;

    fn aggregate_id(&self) -> &str;

    /// Sequence number of the last applied event
    fn version(&self) -> i64;

    /// Rebuild from stored history (ascending sequence order)
    fn load_from_envelopes(envelopes: &[Envelope]) -> Result<Self> {
        let Some((first, rest)) = envelopes.split_first() else {
            bail!("No events to load");
        };

        let first = DomainEvent::<Self::Payload>::from_envelope(first)?;
        let mut aggregate = Self::apply_first_event(&first)
            .map_err(|e| anyhow::anyhow!("Failed to apply first event: {}", e))?;

        for envelope in rest {
            let event = DomainEvent::<Self::Payload>::from_envelope(envelope)?;
            aggregate
                .apply_event(&event)
                .map_err(|e| anyhow::anyhow!("Failed to apply event {}: {}", event.sequence_no(), e))?;
        }

        Ok(aggregate)
    }
}

/// Stamp freshly decided payloads with the sequence numbers that follow `version`.
pub fn sequence_events<P: EventPayload>(aggregate_id: &str, version: i64, payloads: Vec<P>) -> Vec<SharedEvent> {
    payloads
        .into_iter()
        .zip(version + 1..)
        .map(|(payload, sequence_no)| Arc::new(DomainEvent::new(aggregate_id, sequence_no, payload)) as SharedEvent)
        .collect()
}

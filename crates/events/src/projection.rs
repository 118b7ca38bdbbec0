use crate::{Event, EventEnvelope};

/// A projection builds a read model from an append-only event stream.
///
/// Read models are disposable views: events are the source of truth and a
/// projection can always be rebuilt from scratch by replaying them. Because
/// the bus delivers at-least-once, `apply` must be idempotent; the usual
/// strategy is a per-stream sequence-number cursor that skips replays.
///
/// Persistence of the read model is an infrastructure concern and not part
/// of this trait.
pub trait Projection {
    type Ev: Event;

    /// Apply a single event to the projection, updating the read model.
    ///
    /// Must be idempotent, and must scope updates by the envelope's
    /// warehouse so read models never leak across warehouses.
    fn apply(&mut self, envelope: &EventEnvelope<Self::Ev>);
}

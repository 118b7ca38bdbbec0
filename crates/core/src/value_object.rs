//! Value object trait: equality by value, not identity.

/// Marker trait for immutable, value-compared domain objects.
///
/// A lot draw or a movement reference is a value object; a lot or a serial
/// unit is an entity. "Modifying" a value object means constructing a new
/// one.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}

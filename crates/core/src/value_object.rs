//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by their attribute values; two
/// value objects with the same values are the same value. "Modifying" one
/// means constructing a new one. A zone label or a reservation quantity is a
/// value object; a storage unit is an entity.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}

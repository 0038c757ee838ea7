/// Errors produced while packing or unpacking wire-level primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
pub enum WireError {
    /// A varint still had its continuation bit set on the tenth byte, or the
    /// input ended before the varint terminated.
    #[error("unterminated varint")]
    UnterminatedVarint,
    /// A tag carried field number zero.
    #[error("zero field number")]
    ZeroFieldNumber,
    /// A tag carried a field number above the protobuf limit of `2^29 - 1`.
    #[error("field number {0} out of range")]
    FieldNumberOutOfRange(u64),
    /// The low three tag bits named a wire type that does not exist.
    #[error("invalid wire type {0}")]
    InvalidWireType(u8),
}

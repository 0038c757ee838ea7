//! Decoder parameters.

/// Default frame-stack capacity: the maximum submessage nesting depth.
/// Matches the proto2 nesting limit.  Adjustable per decoder with
/// [`Decoder::set_max_nesting`](crate::Decoder::set_max_nesting).
pub const DEFAULT_MAX_NESTING: usize = 64;

/// Size of the residual buffer holding bytes of a partial value across feed
/// calls.  Sized for the worst case of a five-byte tag plus a ten-byte
/// varint, less the one byte that forces the suspension.
pub const MAX_RESIDUAL_BYTES: usize = 14;

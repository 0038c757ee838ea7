/// Fatal decoder failures.
///
/// Every variant disables further progress until the decoder is reset; the
/// feed call that hit it returns the pre-failure consumed count and the
/// decoder's [`Status`](seam_schema::Status) records the code and message.
/// End-of-buffer conditions in the middle of a value are suspensions, not
/// errors, and never appear here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum DecodeError {
    /// A varint still had its continuation bit set on the tenth byte.
    #[error("unterminated varint")]
    UnterminatedVarint,
    /// A varint carrying a tag or length overflowed 32 bits.  This also
    /// covers field numbers above the wire-format limit.
    #[error("varint overflows a 32-bit value")]
    Oversized32BitVarint,
    /// Submessage nesting exceeded the decoder's frame-stack capacity.
    #[error("nesting too deep")]
    NestingTooDeep,
    /// A submessage length ran past the end of its enclosing submessage.
    #[error("submessage end extends past the enclosing submessage")]
    SubmessageTooLong,
    /// A skipped value ran past the end of its enclosing submessage.
    #[error("skipped value extends past the enclosing submessage")]
    SkipPastEnd,
    /// A string handler asked to skip more bytes than the value has left.
    #[error("tried to skip past the end of the string")]
    StringSkipPastEnd,
    /// A delimited region ended in the middle of a value or group.
    #[error("submessage ended in the middle of a value or group")]
    TruncatedValue,
    /// A tag carried field number zero.
    #[error("invalid field number (0)")]
    ZeroFieldNumber,
    /// A tag carried wire type 6 or 7.
    #[error("invalid wire type")]
    InvalidWireType,
    /// An end-group tag did not match the group being parsed.
    #[error("unmatched end-group tag")]
    UnmatchedEndGroup,
    /// A shim store fell outside the sink's shim region.
    #[error("shim store outside the sink's shim region")]
    ShimOutOfRange,
    /// The stream ended while the decoder still buffered a partial value.
    #[error("unexpected end of stream with buffered partial data")]
    ResidualAtEof,
    /// The stream ended inside data the decoder was told to skip.
    #[error("unexpected end of stream inside skipped data")]
    SkipAtEof,
    /// The stream ended inside an open delimited region.
    #[error("unexpected end of stream inside a delimited region")]
    DelimitedAtEof,
    /// The stream ended inside a submessage or group.
    #[error("unexpected end of stream inside a submessage or group")]
    EofInSubmessage,
    /// A sink callback rejected the input and no further bytes can retry
    /// it.  Raised only by the one-shot decode entry point; streaming feeds
    /// surface rejection as a short consumed count instead.
    #[error("a handler rejected the input")]
    HandlerRejected,
}

impl DecodeError {
    /// Stable numeric code recorded in the decoder status.
    pub const fn code(self) -> u32 {
        match self {
            Self::UnterminatedVarint => 1,
            Self::Oversized32BitVarint => 2,
            Self::NestingTooDeep => 3,
            Self::SubmessageTooLong => 4,
            Self::SkipPastEnd => 5,
            Self::StringSkipPastEnd => 6,
            Self::TruncatedValue => 7,
            Self::ZeroFieldNumber => 8,
            Self::InvalidWireType => 9,
            Self::UnmatchedEndGroup => 10,
            Self::ShimOutOfRange => 11,
            Self::ResidualAtEof => 12,
            Self::SkipAtEof => 13,
            Self::DelimitedAtEof => 14,
            Self::EofInSubmessage => 15,
            Self::HandlerRejected => 16,
        }
    }
}

/// Immediate return from the feed call with this many bytes consumed.
/// Carries both suspensions and fatal-error returns; when it unwinds, the
/// decoder state is already captured for resumption (or poisoned, if the
/// status records an error).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Stop(pub usize);

/// Control-flow result of decoder-internal steps.
pub(crate) type Ctl<T> = Result<T, Stop>;

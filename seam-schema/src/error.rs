/// Errors raised while building or freezing schemas and handler bindings.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum SchemaError {
    /// Field number 0 is reserved by the wire format.
    #[error("message {message}: field number 0 is reserved")]
    ZeroFieldNumber {
        /// Full name of the offending message.
        message: String,
    },
    /// Field number above `2^29 - 1`.
    #[error("message {message}: field number {number} exceeds the wire-format limit")]
    FieldNumberOutOfRange {
        /// Full name of the offending message.
        message: String,
        /// The out-of-range number.
        number: u32,
    },
    /// Two fields of one message share a number.
    #[error("message {message}: duplicate field number {number}")]
    DuplicateFieldNumber {
        /// Full name of the offending message.
        message: String,
        /// The duplicated number.
        number: u32,
    },
    /// A message, group or enum field has no subdef reference.
    #[error("message {message}: field {number} needs a subdef")]
    MissingSubDef {
        /// Full name of the offending message.
        message: String,
        /// The field number.
        number: u32,
    },
    /// A field carries a subdef of the wrong kind for its type.
    #[error("message {message}: field {number} has a mismatched subdef")]
    MismatchedSubDef {
        /// Full name of the offending message.
        message: String,
        /// The field number.
        number: u32,
    },
    /// A oneof names a field number the message does not define.
    #[error("message {message}: oneof {oneof} references unknown field {number}")]
    UnknownOneofField {
        /// Full name of the offending message.
        message: String,
        /// Name of the oneof.
        oneof: String,
        /// The missing field number.
        number: u32,
    },
    /// Two enum values share a name or a number.
    #[error("enum {name}: duplicate value")]
    DuplicateEnumValue {
        /// Full name of the offending enum.
        name: String,
    },
    /// A handler binding referenced a field the message does not define.
    #[error("message {message}: no field with number {number} to bind")]
    UnknownField {
        /// Full name of the message being bound.
        message: String,
        /// The missing field number.
        number: u32,
    },
    /// A handler binding does not fit the field's type or label.
    #[error("message {message}: field {number} cannot take this binding: {reason}")]
    InvalidBinding {
        /// Full name of the message being bound.
        message: String,
        /// The field number.
        number: u32,
        /// Why the binding is rejected.
        reason: &'static str,
    },
    /// A field was bound twice.
    #[error("message {message}: field {number} is already bound")]
    DuplicateBinding {
        /// Full name of the message being bound.
        message: String,
        /// The field number.
        number: u32,
    },
}

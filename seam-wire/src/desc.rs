use crate::tag::WireType;

/// The eighteen concrete protobuf descriptor types.
///
/// Discriminants match the values used in descriptor protos; the scalar
/// subset doubles as the parse-opcode numbering in the decoder bytecode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum DescriptorType {
    /// 64-bit IEEE float, fixed64 on the wire.
    Double = 1,
    /// 32-bit IEEE float, fixed32 on the wire.
    Float = 2,
    /// Signed 64-bit varint.
    Int64 = 3,
    /// Unsigned 64-bit varint.
    Uint64 = 4,
    /// Signed 32-bit varint.
    Int32 = 5,
    /// Unsigned 64-bit fixed-width value.
    Fixed64 = 6,
    /// Unsigned 32-bit fixed-width value.
    Fixed32 = 7,
    /// Boolean varint.
    Bool = 8,
    /// Length-delimited UTF-8 text.
    String = 9,
    /// Tag-delimited nested message.
    Group = 10,
    /// Length-delimited nested message.
    Message = 11,
    /// Length-delimited raw bytes.
    Bytes = 12,
    /// Unsigned 32-bit varint.
    Uint32 = 13,
    /// Enum value, decoded as int32.
    Enum = 14,
    /// Signed 32-bit fixed-width value.
    Sfixed32 = 15,
    /// Signed 64-bit fixed-width value.
    Sfixed64 = 16,
    /// Zig-zag encoded 32-bit varint.
    Sint32 = 17,
    /// Zig-zag encoded 64-bit varint.
    Sint64 = 18,
}

impl DescriptorType {
    /// The wire type a non-packed value of this type uses.
    pub const fn native_wire_type(self) -> WireType {
        match self {
            Self::Double | Self::Fixed64 | Self::Sfixed64 => WireType::Fixed64,
            Self::Float | Self::Fixed32 | Self::Sfixed32 => WireType::Fixed32,
            Self::Int64
            | Self::Uint64
            | Self::Int32
            | Self::Bool
            | Self::Uint32
            | Self::Enum
            | Self::Sint32
            | Self::Sint64 => WireType::Varint,
            Self::String | Self::Bytes | Self::Message => WireType::Delimited,
            Self::Group => WireType::StartGroup,
        }
    }

    /// Whether values of this type are scalar (eligible for packed encoding
    /// and value callbacks).
    pub const fn is_scalar(self) -> bool {
        !matches!(
            self,
            Self::String | Self::Bytes | Self::Message | Self::Group
        )
    }

    /// Whether this type nests a message (length- or tag-delimited).
    pub const fn is_submessage(self) -> bool {
        matches!(self, Self::Message | Self::Group)
    }

    /// Whether this type is a length-delimited byte region.
    pub const fn is_string(self) -> bool {
        matches!(self, Self::String | Self::Bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn native_wire_types() {
        assert_eq!(DescriptorType::Int32.native_wire_type(), WireType::Varint);
        assert_eq!(DescriptorType::Double.native_wire_type(), WireType::Fixed64);
        assert_eq!(DescriptorType::Float.native_wire_type(), WireType::Fixed32);
        assert_eq!(
            DescriptorType::Bytes.native_wire_type(),
            WireType::Delimited
        );
        assert_eq!(
            DescriptorType::Group.native_wire_type(),
            WireType::StartGroup
        );
    }

    #[test]
    fn classification_is_total() {
        for ty in DescriptorType::iter() {
            // Exactly one of the three classes applies.
            let classes = [ty.is_scalar(), ty.is_submessage(), ty.is_string()];
            assert_eq!(classes.iter().filter(|c| **c).count(), 1, "{ty:?}");
        }
    }
}

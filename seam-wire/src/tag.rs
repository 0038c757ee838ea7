use crate::error::WireError;

/// The largest field number the wire format can represent: `2^29 - 1`.
pub const MAX_FIELD_NUMBER: u32 = (1 << 29) - 1;

/// The six concrete protobuf wire types.
///
/// Values 6 and 7 are unassigned and fail conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum WireType {
    /// Base-128 variable-length integer.
    Varint = 0,
    /// Little-endian 64-bit value.
    Fixed64 = 1,
    /// Length-prefixed byte region.
    Delimited = 2,
    /// Start of a group.
    StartGroup = 3,
    /// End of a group.
    EndGroup = 4,
    /// Little-endian 32-bit value.
    Fixed32 = 5,
}

impl TryFrom<u8> for WireType {
    type Error = WireError;

    fn try_from(b: u8) -> Result<Self, Self::Error> {
        match b {
            0 => Ok(Self::Varint),
            1 => Ok(Self::Fixed64),
            2 => Ok(Self::Delimited),
            3 => Ok(Self::StartGroup),
            4 => Ok(Self::EndGroup),
            5 => Ok(Self::Fixed32),
            _ => Err(WireError::InvalidWireType(b)),
        }
    }
}

/// A decoded field tag: `(field_number << 3) | wire_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Tag {
    /// Field number, `1..=MAX_FIELD_NUMBER`.
    pub field_number: u32,
    /// Wire type of the value that follows.
    pub wire_type: WireType,
}

impl Tag {
    /// Creates a tag, validating the field number range.
    pub fn new(field_number: u32, wire_type: WireType) -> Result<Self, WireError> {
        if field_number == 0 {
            return Err(WireError::ZeroFieldNumber);
        }
        if field_number > MAX_FIELD_NUMBER {
            return Err(WireError::FieldNumberOutOfRange(u64::from(field_number)));
        }
        Ok(Self {
            field_number,
            wire_type,
        })
    }

    /// Packs the tag into its raw wire representation.
    pub const fn pack(self) -> u32 {
        (self.field_number << 3) | self.wire_type as u32
    }

    /// Unpacks a raw tag, validating both halves.
    pub fn unpack(raw: u32) -> Result<Self, WireError> {
        let wire_type = WireType::try_from((raw & 0x7) as u8)?;
        Self::new(raw >> 3, wire_type)
    }
}

use core::fmt;

/// Opcode representation for the decoder VM.
///
/// The canonical meaning of each opcode is its implementation in the
/// interpreter loop.  All instructions carry the opcode in the low byte;
/// most fit one 32-bit word with a 24-bit argument:
///
/// ```text
/// +-------------------+--------+
/// |     arg (24)      | op (8) |
/// +-------------------+--------+
/// ```
///
/// The tag matchers and jumps replace part of the argument with a signed
/// jump offset, and a few opcodes span extra words; see [`Opcode::words`].
///
/// Parse opcodes share their discriminants with the scalar descriptor
/// types, which is why the frame and string opcodes fill the gaps left by
/// the non-scalar descriptor values (9-12, 14).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum Opcode {
    /// Parses a fixed64 and emits a double value.  Arg: selector.
    ParseDouble = 1,
    /// Parses a fixed32 and emits a float value.  Arg: selector.
    ParseFloat = 2,
    /// Parses a varint and emits an int64 value.  Arg: selector.
    ParseInt64 = 3,
    /// Parses a varint and emits a uint64 value.  Arg: selector.
    ParseUint64 = 4,
    /// Parses a varint and emits an int32 value.  Arg: selector.
    ParseInt32 = 5,
    /// Parses a fixed64 and emits a uint64 value.  Arg: selector.
    ParseFixed64 = 6,
    /// Parses a fixed32 and emits a uint32 value.  Arg: selector.
    ParseFixed32 = 7,
    /// Parses a varint and emits a bool value.  Arg: selector.
    ParseBool = 8,
    /// Invokes the start-of-message callback.  Arg: selector.
    StartMsg = 9,
    /// Invokes the end-of-message callback.  Arg: selector.
    EndMsg = 10,
    /// Invokes the start-of-sequence callback.  Arg: selector.
    StartSeq = 11,
    /// Invokes the end-of-sequence callback.  Arg: selector.
    EndSeq = 12,
    /// Parses a varint and emits a uint32 value.  Arg: selector.
    ParseUint32 = 13,
    /// Invokes the start-of-submessage callback.  Arg: selector.
    StartSubMsg = 14,
    /// Parses a fixed32 and emits an sfixed32 value.  Arg: selector.
    ParseSfixed32 = 15,
    /// Parses a fixed64 and emits an sfixed64 value.  Arg: selector.
    ParseSfixed64 = 16,
    /// Parses a zig-zag varint and emits an int32 value.  Arg: selector.
    ParseSint32 = 17,
    /// Parses a zig-zag varint and emits an int64 value.  Arg: selector.
    ParseSint64 = 18,
    /// Invokes the end-of-submessage callback.  Arg: selector.
    EndSubMsg = 19,
    /// Invokes the start-of-string callback.  Arg: selector.
    StartStr = 20,
    /// Feeds available string bytes to the string callback; repeats itself
    /// across buffer seams.  Arg: selector.
    String = 21,
    /// Invokes the end-of-string callback.  Arg: selector.
    EndStr = 22,
    /// Pushes a frame that inherits the parent delimiter.  Arg: group
    /// number, or 0 for sequence frames.
    PushTagDelim = 23,
    /// Reads a varint length and pushes a length-delimited frame.  No arg.
    PushLenDelim = 24,
    /// Pops the top frame.  No arg.
    Pop = 25,
    /// Recomputes the buffer-local delimiter ends from the top frame.  No
    /// arg.
    SetDelim = 26,
    /// Two words; the second word replaces the top frame's group number
    /// (for group numbers of 2^24 and above).
    SetBigGroupNum = 27,
    /// Jumps by the signed 24-bit offset when the read position sits on the
    /// current delimiter end.
    CheckDelim = 28,
    /// Pushes the return address and jumps by the signed 24-bit offset to a
    /// method body.
    Call = 29,
    /// Pops the return address.  No arg.
    Ret = 30,
    /// Unconditional jump by the signed 24-bit offset.
    Branch = 31,
    /// Matches one tag byte:
    /// `| match tag (16) | jump target (8) | op (8) |`.
    Tag1 = 32,
    /// Matches two tag bytes; same layout as [`Opcode::Tag1`].
    Tag2 = 33,
    /// Three words; matches 3-5 tag bytes:
    /// `| n (16) | jump target (8) | op (8) |` followed by the expected tag
    /// packed little-endian into two words.
    TagN = 34,
    /// Two words; the second word holds the method index whose dispatch
    /// table becomes active for the top frame.
    SetDispatch = 35,
    /// Decodes a tag and jumps through the active dispatch table.  No arg.
    Dispatch = 36,
    /// Stops execution, reporting the full buffer as consumed.  No arg.
    Halt = 37,
}

impl Opcode {
    /// Whether executing this opcode consumes input bytes.  Only consuming
    /// opcodes advance the decoder checkpoint when they complete.
    pub const fn consumes_input(self) -> bool {
        !matches!(
            self,
            Self::SetDispatch
                | Self::StartMsg
                | Self::EndMsg
                | Self::StartSeq
                | Self::EndSeq
                | Self::StartSubMsg
                | Self::EndSubMsg
                | Self::StartStr
                | Self::EndStr
                | Self::PushTagDelim
                | Self::Pop
                | Self::SetDelim
                | Self::SetBigGroupNum
                | Self::CheckDelim
                | Self::Call
                | Self::Ret
                | Self::Branch
        )
    }

    /// Number of 32-bit words this instruction spans.
    pub const fn words(self) -> usize {
        match self {
            Self::TagN => 3,
            Self::SetDispatch | Self::SetBigGroupNum => 2,
            _ => 1,
        }
    }

    /// Whether the jump offset occupies the full 24-bit argument.  The tag
    /// matchers keep only eight bits for the offset, which suffices for the
    /// short jumps they need.
    pub const fn has_long_ofs(self) -> bool {
        matches!(self, Self::Call | Self::Branch | Self::CheckDelim)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// The byte that failed conversion to an [`Opcode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InvalidOpcode(pub u8);

impl fmt::Display for InvalidOpcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid opcode {:#04x}", self.0)
    }
}

impl std::error::Error for InvalidOpcode {}

impl TryFrom<u8> for Opcode {
    type Error = InvalidOpcode;

    fn try_from(b: u8) -> Result<Self, Self::Error> {
        use Opcode::*;
        Ok(match b {
            1 => ParseDouble,
            2 => ParseFloat,
            3 => ParseInt64,
            4 => ParseUint64,
            5 => ParseInt32,
            6 => ParseFixed64,
            7 => ParseFixed32,
            8 => ParseBool,
            9 => StartMsg,
            10 => EndMsg,
            11 => StartSeq,
            12 => EndSeq,
            13 => ParseUint32,
            14 => StartSubMsg,
            15 => ParseSfixed32,
            16 => ParseSfixed64,
            17 => ParseSint32,
            18 => ParseSint64,
            19 => EndSubMsg,
            20 => StartStr,
            21 => String,
            22 => EndStr,
            23 => PushTagDelim,
            24 => PushLenDelim,
            25 => Pop,
            26 => SetDelim,
            27 => SetBigGroupNum,
            28 => CheckDelim,
            29 => Call,
            30 => Ret,
            31 => Branch,
            32 => Tag1,
            33 => Tag2,
            34 => TagN,
            35 => SetDispatch,
            36 => Dispatch,
            37 => Halt,
            _ => return Err(InvalidOpcode(b)),
        })
    }
}

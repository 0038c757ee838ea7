//! Bytecode instruction set of the seam decoder VM.
//!
//! Decoder methods are sequences of 32-bit code words.  This crate defines
//! the opcode set, the word layouts, packing/patching helpers used by the
//! compiler, and a disassembler.  The semantics of every opcode are defined
//! by the interpreter in `seam-vm`.

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![deny(unused_must_use)]

mod dump;
mod opcode;
pub mod pack;

pub use dump::disassemble;
pub use opcode::{InvalidOpcode, Opcode};

/// A raw encoded instruction word.
pub type RawInstruction = u32;

/// A decoded view over one instruction word.
///
/// The accessors expose the overlapping field layouts; which ones are
/// meaningful depends on the opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Instruction(RawInstruction);

impl Instruction {
    /// Wraps a raw code word.
    pub const fn new(raw: RawInstruction) -> Self {
        Self(raw)
    }

    /// The raw code word.
    pub const fn raw(self) -> RawInstruction {
        self.0
    }

    /// The opcode in the low byte.
    pub fn opcode(self) -> Result<Opcode, InvalidOpcode> {
        Opcode::try_from((self.0 & 0xff) as u8)
    }

    /// The unsigned 24-bit argument (selector or group number).
    pub const fn arg(self) -> u32 {
        self.0 >> 8
    }

    /// The sign-extended 24-bit jump offset of `CALL`/`BRANCH`/`CHECKDELIM`.
    pub const fn long_ofs(self) -> i32 {
        (self.0 as i32) >> 8
    }

    /// The signed 8-bit jump offset of the tag matchers.
    pub const fn short_ofs(self) -> i8 {
        (self.0 >> 8) as u8 as i8
    }

    /// The 16-bit expected tag of `TAG1`/`TAG2`, or the encoded tag length
    /// of `TAGN`.
    pub const fn tag16(self) -> u16 {
        (self.0 >> 16) as u16
    }
}

impl From<RawInstruction> for Instruction {
    fn from(raw: RawInstruction) -> Self {
        Self::new(raw)
    }
}
